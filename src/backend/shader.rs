// Shader module loading
//
// Shaders arrive as pre-compiled SPIR-V blobs; this module reads them as raw
// bytes and hands them to the driver without further parsing.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;
use super::RenderDevice;

/// Read a SPIR-V blob from disk
pub fn load_shader_blob<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).with_context(|| format!("Failed to read shader: {:?}", path))
}

/// Create a shader module from SPIR-V bytes
pub fn create_shader_module(device: &RenderDevice, code: &[u8]) -> Result<vk::ShaderModule> {
    // SPIR-V is a stream of 4-byte words; read_spv validates size/alignment
    let mut cursor = std::io::Cursor::new(code);
    let words = ash::util::read_spv(&mut cursor).context("Shader blob is not valid SPIR-V")?;

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}
