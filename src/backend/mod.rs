// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with safety and ergonomics

pub mod commands;
pub mod device;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::RenderDevice;
pub use instance::VulkanContext;
pub use pipeline::GraphicsPipeline;
pub use surface::Surface;
pub use swapchain::Swapchain;
