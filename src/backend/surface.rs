// Presentation surface - window connection
//
// Wraps the VkSurfaceKHR created for a winit window, plus the surface
// queries device selection and swapchain setup need.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;
use super::VulkanContext;

pub struct Surface {
    pub handle: vk::SurfaceKHR,
    pub loader: ash::extensions::khr::Surface,
    /// Keeps the instance alive for as long as the surface exists
    _context: Arc<VulkanContext>,
}

impl Surface {
    pub fn new(
        context: Arc<VulkanContext>,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Self> {
        let loader = ash::extensions::khr::Surface::new(&context.entry, &context.instance);

        let handle = unsafe {
            ash_window::create_surface(
                &context.entry,
                &context.instance,
                display_handle,
                window_handle,
                None,
            )
        }
        .context("Failed to create window surface")?;
        log::info!("Created window surface");

        Ok(Self {
            handle,
            loader,
            _context: context,
        })
    }

    pub fn capabilities(&self, device: vk::PhysicalDevice) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(device, self.handle)
                .context("Failed to query surface capabilities")
        }
    }

    pub fn formats(&self, device: vk::PhysicalDevice) -> Vec<vk::SurfaceFormatKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(device, self.handle)
                .unwrap_or_default()
        }
    }

    pub fn present_modes(&self, device: vk::PhysicalDevice) -> Vec<vk::PresentModeKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(device, self.handle)
                .unwrap_or_default()
        }
    }

    pub fn supports_present(&self, device: vk::PhysicalDevice, queue_family: u32) -> bool {
        unsafe {
            self.loader
                .get_physical_device_surface_support(device, queue_family, self.handle)
                .unwrap_or(false)
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        log::info!("Destroyed window surface");
    }
}
