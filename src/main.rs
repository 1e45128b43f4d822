// Minimal Vulkan front end: pick a GPU, build a swapchain, draw one
// shader-generated triangle per frame.
//
// FRAME FLOW (slot s = frame counter mod frames-in-flight):
// 1. Wait on slot s's fence (GPU done with the previous use of this slot)
// 2. Acquire a swapchain image, signaling slot s's image-available semaphore
// 3. Re-record slot s's command buffer against the acquired framebuffer
// 4. Submit, waiting on image-available, signaling render-finished + fence
// 5. Present, waiting on render-finished
// 6. Advance the slot ring

mod backend;
mod config;

use anyhow::{Context, Result};
use ash::vk;
use backend::sync::{FrameSync, SlotTracker};
use backend::{commands, pipeline, shader};
use backend::{GraphicsPipeline, RenderDevice, Surface, Swapchain, VulkanContext};
use config::Config;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

const VERT_SHADER_PATH: &str = "shaders/triangle.vert.spv";
const FRAG_SHADER_PATH: &str = "shaders/triangle.frag.spv";

fn main() -> Result<()> {
    init_logging();

    let config = Config::load();
    log::info!(
        "Starting renderer: {}x{}, {} frames in flight",
        config.window.width,
        config.window.height,
        config.graphics.max_frames_in_flight
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    builder.init();
}

/// Main application struct holding all Vulkan resources.
///
/// Resources are torn down in exact reverse order of creation; see Drop.
pub struct App {
    config: Config,

    // Window & surface
    window: Option<Arc<Window>>,
    context: Option<Arc<VulkanContext>>,
    surface: Option<Surface>,

    // Vulkan core
    device: Option<Arc<RenderDevice>>,
    swapchain: Option<Swapchain>,
    render_pass: Option<vk::RenderPass>,
    framebuffers: Vec<vk::Framebuffer>,
    pipeline: Option<GraphicsPipeline>,

    // Commands: one buffer per frame slot
    command_pool: Option<vk::CommandPool>,
    command_buffers: Vec<vk::CommandBuffer>,

    // Synchronization: one sync bundle per frame slot
    frame_sync: Vec<FrameSync>,
    slot_states: SlotTracker,
    /// Frame slot in use this iteration (0 to max_frames_in_flight - 1).
    /// Distinct from the acquired swapchain image index.
    current_frame: usize,

    wait_stages: [vk::PipelineStageFlags; 1],

    // State flags
    needs_resize: bool,
    is_minimized: bool,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    pub fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            window: None,
            context: None,
            surface: None,
            device: None,
            swapchain: None,
            render_pass: None,
            framebuffers: Vec::new(),
            pipeline: None,
            command_pool: None,
            command_buffers: Vec::new(),
            frame_sync: Vec::new(),
            slot_states: SlotTracker::new(0),
            current_frame: 0,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            needs_resize: false,
            is_minimized: false,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_vulkan(&mut self, window: Arc<Window>) -> Result<()> {
        log::info!("Initializing Vulkan...");

        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;

        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        let context =
            VulkanContext::new(&self.config.window.title, enable_validation, display_handle)?;
        let surface = Surface::new(context.clone(), display_handle, window_handle)?;
        let device = RenderDevice::new(context.clone(), &surface)?;

        self.context = Some(context);
        self.surface = Some(surface);
        self.device = Some(device.clone());

        // Swapchain, render pass, framebuffers
        self.create_swapchain_resources(&window)?;
        let render_pass = self.render_pass.context("Render pass not initialized")?;

        // Pipeline from the two SPIR-V blobs; the modules are only needed
        // while the pipeline is being built
        let vert_code = shader::load_shader_blob(VERT_SHADER_PATH)?;
        let frag_code = shader::load_shader_blob(FRAG_SHADER_PATH)?;
        let vert_module = shader::create_shader_module(&device, &vert_code)?;
        let frag_module = shader::create_shader_module(&device, &frag_code)?;
        let pipeline_result =
            pipeline::create_graphics_pipeline(&device, render_pass, vert_module, frag_module);
        unsafe {
            device.device.destroy_shader_module(vert_module, None);
            device.device.destroy_shader_module(frag_module, None);
        }
        self.pipeline = Some(pipeline_result?);

        // Command pool + one command buffer per frame slot
        let pool = commands::create_command_pool(&device)?;
        self.command_pool = Some(pool);

        let max_frames = self.config.graphics.max_frames_in_flight;
        self.command_buffers = commands::allocate_command_buffers(&device, pool, max_frames as u32)?;

        // Per-slot sync objects and the slot state machine
        self.frame_sync = (0..max_frames)
            .map(|_| FrameSync::new(&device))
            .collect::<Result<Vec<_>>>()?;
        self.slot_states = SlotTracker::new(max_frames);

        log::info!("Vulkan initialized");
        Ok(())
    }

    /// Create the swapchain and everything sized to it.
    ///
    /// Called at startup and again whenever the chain goes stale (resize,
    /// suboptimal or out-of-date signal).
    fn create_swapchain_resources(&mut self, window: &Window) -> Result<()> {
        let device = self
            .device
            .as_ref()
            .context("Device not initialized")?
            .clone();

        let size = window.inner_size();

        // A zero-size framebuffer means the window is minimized
        if size.width == 0 || size.height == 0 {
            self.is_minimized = true;
            return Ok(());
        }
        self.is_minimized = false;

        // Framebuffers reference the old image views
        self.destroy_framebuffers();

        // The surface can only have one swapchain at a time
        self.swapchain = None;

        let surface = self.surface.as_ref().context("Surface not initialized")?;
        let swapchain = Swapchain::new(device.clone(), surface, size.width, size.height)?;

        let render_pass = match self.render_pass {
            Some(render_pass) => render_pass,
            None => {
                let render_pass = pipeline::create_render_pass(&device, swapchain.format)?;
                self.render_pass = Some(render_pass);
                render_pass
            }
        };

        self.framebuffers = pipeline::create_framebuffers(
            &device,
            &swapchain.image_views,
            render_pass,
            swapchain.extent,
        )?;

        self.swapchain = Some(swapchain);
        self.needs_resize = false;

        Ok(())
    }

    fn destroy_framebuffers(&mut self) {
        if let Some(ref device) = self.device {
            for framebuffer in self.framebuffers.drain(..) {
                unsafe {
                    device.device.destroy_framebuffer(framebuffer, None);
                }
            }
        }
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        // Nothing sized to the old chain may still be in flight
        if let Some(ref device) = self.device {
            device.wait_idle()?;
        }

        let window = self.window.clone();
        if let Some(ref window) = window {
            self.create_swapchain_resources(window)?;
        }

        Ok(())
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Render a single frame. Returns false when nothing was drawn
    /// (minimized, or the chain went stale and will be rebuilt).
    pub fn render_frame(&mut self) -> Result<bool> {
        if self.is_minimized {
            return Ok(false);
        }

        if self.needs_resize {
            self.recreate_swapchain()?;
            if self.is_minimized {
                return Ok(false);
            }
        }

        let device = self
            .device
            .as_ref()
            .context("Device not initialized")?
            .clone();

        let slot = self.current_frame;
        let in_flight_fence = self.frame_sync[slot].in_flight_fence;
        let image_available = self.frame_sync[slot].image_available;
        let render_finished = self.frame_sync[slot].render_finished;

        // Step 1: wait until the GPU is done with this slot
        unsafe {
            device
                .device
                .wait_for_fences(&[in_flight_fence], true, u64::MAX)?;
        }
        self.slot_states.complete(slot)?;

        // Step 2: acquire an image. Its index selects the framebuffer and is
        // independent of the slot index.
        let acquired = {
            let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;
            swapchain.acquire_next_image(u64::MAX, image_available)?
        };

        let (image_index, suboptimal) = match acquired {
            Some(result) => result,
            None => {
                // Out of date; fence is still signaled, so the next visit to
                // this slot will not deadlock
                self.needs_resize = true;
                return Ok(false);
            }
        };
        if suboptimal {
            self.needs_resize = true;
        }

        // Reset the fence only now that a submission is certain
        unsafe {
            device.device.reset_fences(&[in_flight_fence])?;
        }

        // Steps 3-7: record this slot's command buffer
        let command_buffer = self.command_buffers[slot];
        let extent = self
            .swapchain
            .as_ref()
            .context("Swapchain not initialized")?
            .extent;
        let framebuffer = self.framebuffers[image_index as usize];
        let pipeline = self.pipeline.as_ref().context("Pipeline not initialized")?;

        commands::record_frame(
            &device,
            &mut self.slot_states,
            slot,
            command_buffer,
            self.render_pass.context("Render pass not initialized")?,
            framebuffer,
            extent,
            pipeline,
            self.config.graphics.clear_color,
        )?;

        // Step 8: submit, fencing this slot
        let wait_semaphores = [image_available];
        let signal_semaphores = [render_finished];
        let command_buffers = [command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device.device.queue_submit(
                device.graphics_queue,
                &[submit_info.build()],
                in_flight_fence,
            )?;
        }
        self.slot_states.submit(slot)?;

        // Step 9: present on the present queue
        let present_stale = {
            let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;
            swapchain.present(device.present_queue, image_index, &[render_finished])?
        };
        if present_stale {
            self.needs_resize = true;
        }

        // Step 10: advance the slot ring
        self.current_frame = (self.current_frame + 1) % self.config.graphics.max_frames_in_flight;

        Ok(true)
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    pub fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        if now.duration_since(self.last_fps_update).as_secs_f32() >= 1.0 {
            let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_vulkan(window.clone()) {
            log::error!("Failed to initialize Vulkan: {:?}", e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref device) = self.device {
                    let _ = device.wait_idle();
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    self.needs_resize = true;
                }
            }

            WindowEvent::RedrawRequested => {
                match self.render_frame() {
                    Ok(rendered) => {
                        if rendered {
                            self.update_fps();
                        }
                    }
                    Err(e) => {
                        log::error!("Render error: {:?}", e);
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(KeyCode::Escape) = event.physical_key {
                        log::info!("ESC pressed, exiting...");
                        event_loop.exit();
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws to keep the loop running
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        if let Some(ref device) = self.device {
            // Nothing may still reference these handles on the GPU
            let _ = device.wait_idle();

            unsafe {
                // Destroy in reverse order of creation

                // 1. Sync objects
                for sync in &self.frame_sync {
                    sync.destroy(&device.device);
                }

                // 2. Command pool (also frees command buffers)
                if let Some(pool) = self.command_pool.take() {
                    device.device.destroy_command_pool(pool, None);
                }

                // 3. Pipeline and layout
                if let Some(pipeline) = self.pipeline.take() {
                    pipeline.destroy(&device.device);
                }

                // 4. Framebuffers, then render pass
                for framebuffer in self.framebuffers.drain(..) {
                    device.device.destroy_framebuffer(framebuffer, None);
                }
                if let Some(render_pass) = self.render_pass.take() {
                    device.device.destroy_render_pass(render_pass, None);
                }
            }
            self.frame_sync.clear();
        }

        // 5. Swapchain (image views then chain), device, surface, context
        self.swapchain = None;
        self.device = None;
        self.surface = None;
        self.context = None;

        log::info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    type Registry = Rc<RefCell<Vec<&'static str>>>;

    /// Mock resource that records its creation and destruction
    struct Tracked {
        name: &'static str,
        dropped: Registry,
    }

    impl Tracked {
        fn create(name: &'static str, created: &Registry, dropped: &Registry) -> Self {
            created.borrow_mut().push(name);
            Self {
                name,
                dropped: dropped.clone(),
            }
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.dropped.borrow_mut().push(self.name);
        }
    }

    /// Field order mirrors the renderer teardown: dependents first, so the
    /// default drop order is the exact reverse of construction.
    struct RendererStack {
        _frame_sync: Tracked,
        _command_pool: Tracked,
        _pipeline: Tracked,
        _framebuffers: Tracked,
        _render_pass: Tracked,
        _swapchain: Tracked,
        _device: Tracked,
        _surface: Tracked,
        _context: Tracked,
    }

    #[test]
    fn destruction_order_is_reverse_of_creation() {
        let created: Registry = Rc::new(RefCell::new(Vec::new()));
        let dropped: Registry = Rc::new(RefCell::new(Vec::new()));

        // Construction order, leaves first
        let context = Tracked::create("context", &created, &dropped);
        let surface = Tracked::create("surface", &created, &dropped);
        let device = Tracked::create("device", &created, &dropped);
        let swapchain = Tracked::create("swapchain", &created, &dropped);
        let render_pass = Tracked::create("render_pass", &created, &dropped);
        let framebuffers = Tracked::create("framebuffers", &created, &dropped);
        let pipeline = Tracked::create("pipeline", &created, &dropped);
        let command_pool = Tracked::create("command_pool", &created, &dropped);
        let frame_sync = Tracked::create("frame_sync", &created, &dropped);

        let stack = RendererStack {
            _frame_sync: frame_sync,
            _command_pool: command_pool,
            _pipeline: pipeline,
            _framebuffers: framebuffers,
            _render_pass: render_pass,
            _swapchain: swapchain,
            _device: device,
            _surface: surface,
            _context: context,
        };
        drop(stack);

        let mut expected = created.borrow().clone();
        expected.reverse();
        assert_eq!(*dropped.borrow(), expected);
    }
}
