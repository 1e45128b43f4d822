// Command pool and per-frame command recording
//
// One primary command buffer per frame-in-flight slot, re-recorded every
// frame against the framebuffer of whichever swapchain image was acquired.

use anyhow::{Context, Result};
use ash::vk;
use super::sync::SlotTracker;
use super::{GraphicsPipeline, RenderDevice};

/// Command pool on the graphics queue family, with per-buffer reset
pub fn create_command_pool(device: &RenderDevice) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(device.graphics_family)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe {
        device
            .device
            .create_command_pool(&pool_info, None)
            .context("Failed to create command pool")
    }
}

/// One primary command buffer per frame slot
pub fn allocate_command_buffers(
    device: &RenderDevice,
    pool: vk::CommandPool,
    count: u32,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);

    unsafe {
        device
            .device
            .allocate_command_buffers(&alloc_info)
            .context("Failed to allocate command buffers")
    }
}

/// Record one frame into a slot's command buffer.
///
/// `slot` indexes the command buffer and its sync objects; `framebuffer`
/// belongs to the acquired swapchain image, which lives in its own index
/// space. The tracker enforces the slot's state transitions.
#[allow(clippy::too_many_arguments)]
pub fn record_frame(
    device: &RenderDevice,
    tracker: &mut SlotTracker,
    slot: usize,
    command_buffer: vk::CommandBuffer,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    pipeline: &GraphicsPipeline,
    clear_color: [f32; 4],
) -> Result<()> {
    tracker.begin_recording(slot)?;

    unsafe {
        device
            .device
            .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
            .context("Failed to reset command buffer")?;

        let begin_info = vk::CommandBufferBeginInfo::builder();
        device
            .device
            .begin_command_buffer(command_buffer, &begin_info)
            .context("Failed to begin command buffer")?;
    }

    tracker.enter_render_pass(slot)?;

    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: clear_color,
        },
    }];

    let render_pass_begin = vk::RenderPassBeginInfo::builder()
        .render_pass(render_pass)
        .framebuffer(framebuffer)
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        })
        .clear_values(&clear_values);

    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };

    unsafe {
        device.device.cmd_begin_render_pass(
            command_buffer,
            &render_pass_begin,
            vk::SubpassContents::INLINE,
        );
        device.device.cmd_bind_pipeline(
            command_buffer,
            vk::PipelineBindPoint::GRAPHICS,
            pipeline.pipeline,
        );
        device.device.cmd_set_viewport(command_buffer, 0, &[viewport]);
        device.device.cmd_set_scissor(command_buffer, 0, &[scissor]);

        // The whole scene: one shader-generated triangle
        device.device.cmd_draw(command_buffer, 3, 1, 0, 0);

        device.device.cmd_end_render_pass(command_buffer);
    }

    tracker.exit_render_pass(slot)?;

    unsafe {
        device
            .device
            .end_command_buffer(command_buffer)
            .context("Failed to end command buffer")?;
    }

    tracker.finish_recording(slot)?;

    Ok(())
}
