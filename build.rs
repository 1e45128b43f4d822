// Build script to compile GLSL shaders to SPIR-V

use std::fs;
use std::path::Path;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    let entries = match fs::read_dir("shaders") {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("Warning: no shaders directory ({})", e);
            return;
        }
    };

    // Compile every GLSL stage file using glslc (part of the Vulkan SDK)
    for entry in entries.flatten() {
        let path = entry.path();
        let is_stage_source = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("vert") | Some("frag")
        );
        if is_stage_source {
            let output = format!("{}.spv", path.display());
            compile_shader(&path, Path::new(&output));
        }
    }
}

fn compile_shader(input: &Path, output: &Path) {
    let result = Command::new("glslc")
        .arg(input)
        .arg("-o")
        .arg(output)
        .status();

    match result {
        Ok(status) if status.success() => {
            println!("Compiled {} -> {}", input.display(), output.display());
        }
        Ok(status) => {
            panic!(
                "Failed to compile {}: exit code {:?}",
                input.display(),
                status.code()
            );
        }
        Err(e) => {
            eprintln!("Warning: glslc not found ({})", e);
            eprintln!("Shaders will not be compiled. Install the Vulkan SDK or compile manually:");
            eprintln!("  glslc {} -o {}", input.display(), output.display());
        }
    }
}
