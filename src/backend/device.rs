// GPU selection and logical device
//
// Responsibilities:
// - Enumerate and rank physical devices against the surface
// - Resolve graphics/present queue families
// - Logical device + queue creation

use anyhow::{Context, Result};
use ash::vk;
use std::collections::BTreeSet;
use std::ffi::{CStr, CString};
use std::sync::Arc;
use super::{Surface, VulkanContext};

/// Device extensions a candidate must expose to be usable at all
pub fn required_device_extensions() -> Vec<&'static CStr> {
    #[allow(unused_mut)]
    let mut extensions = vec![ash::extensions::khr::Swapchain::name()];
    #[cfg(target_os = "macos")]
    extensions.push(vk::KhrPortabilitySubsetFn::name());
    extensions
}

/// Queue family roles resolved for a device/surface pair.
///
/// Graphics and present may resolve to the same family (single queue) or to
/// two different families (two queues, concurrent swapchain sharing).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
    pub priority: f32,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Deduplicated family set, in ascending index order
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = BTreeSet::new();
        if let Some(graphics) = self.graphics_family {
            families.insert(graphics);
        }
        if let Some(present) = self.present_family {
            families.insert(present);
        }
        families.into_iter().collect()
    }
}

/// Scan queue families in order: the first family with the graphics bit and,
/// independently, the first family that can present to the surface.
pub fn resolve_queue_families(
    families: &[vk::QueueFamilyProperties],
    present_support: &[bool],
) -> QueueFamilyIndices {
    let graphics_family = families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|i| i as u32);

    let present_family = present_support
        .iter()
        .position(|&supported| supported)
        .map(|i| i as u32);

    QueueFamilyIndices {
        graphics_family,
        present_family,
        priority: 1.0,
    }
}

/// Everything known about one enumerated GPU, gathered during selection and
/// discarded once the logical device exists.
pub struct DeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub supported_extensions: Vec<CString>,
    pub surface_formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub queue_families: QueueFamilyIndices,
}

impl DeviceCandidate {
    /// Ranking score; 0 means unusable. Integrated GPUs rank above discrete
    /// ones, and any other category is rejected outright.
    pub fn score(&self) -> u8 {
        let base = match self.device_type {
            vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
            vk::PhysicalDeviceType::DISCRETE_GPU => 1,
            _ => return 0,
        };

        if self.surface_formats.is_empty() || self.present_modes.is_empty() {
            return 0;
        }

        if !self.queue_families.is_complete() {
            return 0;
        }

        if !self.supports_required_extensions() {
            return 0;
        }

        base
    }

    fn supports_required_extensions(&self) -> bool {
        required_device_extensions()
            .iter()
            .all(|required| self.supported_extensions.iter().any(|e| e.as_c_str() == *required))
    }

    fn log_missing_extensions(&self) {
        for required in required_device_extensions() {
            if !self.supported_extensions.iter().any(|e| e.as_c_str() == required) {
                log::warn!(
                    "{}: device extension not supported: {}",
                    self.name,
                    required.to_string_lossy()
                );
            }
        }
    }
}

/// Gather candidate data for every GPU the instance can see
fn enumerate_candidates(
    context: &VulkanContext,
    surface: &Surface,
) -> Result<Vec<DeviceCandidate>> {
    let devices = unsafe { context.instance.enumerate_physical_devices() }
        .context("Failed to enumerate physical devices")?;

    if devices.is_empty() {
        anyhow::bail!("No Vulkan-capable GPU found");
    }

    let mut candidates = Vec::with_capacity(devices.len());
    for device in devices {
        let properties = unsafe { context.instance.get_physical_device_properties(device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let supported_extensions =
            unsafe { context.instance.enumerate_device_extension_properties(device) }
                .unwrap_or_default()
                .iter()
                .map(|prop| unsafe { CStr::from_ptr(prop.extension_name.as_ptr()) }.to_owned())
                .collect();

        let families =
            unsafe { context.instance.get_physical_device_queue_family_properties(device) };
        let present_support: Vec<bool> = (0..families.len())
            .map(|i| surface.supports_present(device, i as u32))
            .collect();

        candidates.push(DeviceCandidate {
            handle: device,
            name,
            device_type: properties.device_type,
            supported_extensions,
            surface_formats: surface.formats(device),
            present_modes: surface.present_modes(device),
            queue_families: resolve_queue_families(&families, &present_support),
        });
    }

    Ok(candidates)
}

/// Highest-scoring usable candidate, if any scores above 0
pub fn pick_best(candidates: &[DeviceCandidate]) -> Option<&DeviceCandidate> {
    candidates
        .iter()
        .map(|candidate| (candidate.score(), candidate))
        .filter(|(score, _)| *score > 0)
        .max_by_key(|(score, _)| *score)
        .map(|(_, candidate)| candidate)
}

/// Opened device with its graphics and present queues
pub struct RenderDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub graphics_family: u32,
    pub present_family: u32,
    pub queue_families: QueueFamilyIndices,
    context: Arc<VulkanContext>,
}

impl RenderDevice {
    pub fn new(context: Arc<VulkanContext>, surface: &Surface) -> Result<Arc<Self>> {
        let candidates = enumerate_candidates(&context, surface)?;

        let selected = match pick_best(&candidates) {
            Some(candidate) => candidate,
            None => {
                for candidate in &candidates {
                    candidate.log_missing_extensions();
                }
                anyhow::bail!("No suitable GPU found");
            }
        };

        log::info!("Selected GPU: {} ({:?})", selected.name, selected.device_type);

        let queue_families = selected.queue_families;
        let (graphics_family, present_family) = match (
            queue_families.graphics_family,
            queue_families.present_family,
        ) {
            (Some(graphics), Some(present)) => (graphics, present),
            _ => anyhow::bail!("Queue families not fully resolved for selected GPU"),
        };

        let priorities = [queue_families.priority];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .unique_families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<*const std::os::raw::c_char> = required_device_extensions()
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        // No optional GPU features requested
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device =
            unsafe { context.instance.create_device(selected.handle, &create_info, None) }
                .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        log::info!("Created logical device");

        Ok(Arc::new(Self {
            device,
            physical_device: selected.handle,
            graphics_queue,
            present_queue,
            graphics_family,
            present_family,
            queue_families,
            context,
        }))
    }

    /// Wait for the device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.context.instance
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        log::info!("Destroying logical device...");
        let _ = self.wait_idle();
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qualifying_candidate(device_type: vk::PhysicalDeviceType) -> DeviceCandidate {
        DeviceCandidate {
            handle: vk::PhysicalDevice::null(),
            name: "test gpu".to_string(),
            device_type,
            supported_extensions: required_device_extensions()
                .iter()
                .map(|name| (*name).to_owned())
                .collect(),
            surface_formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
            queue_families: QueueFamilyIndices {
                graphics_family: Some(0),
                present_family: Some(0),
                priority: 1.0,
            },
        }
    }

    #[test]
    fn rejects_candidate_missing_required_extensions() {
        let mut candidate = qualifying_candidate(vk::PhysicalDeviceType::DISCRETE_GPU);
        candidate.supported_extensions.clear();
        assert_eq!(candidate.score(), 0);
    }

    #[test]
    fn rejects_candidate_without_surface_formats() {
        let mut candidate = qualifying_candidate(vk::PhysicalDeviceType::DISCRETE_GPU);
        candidate.surface_formats.clear();
        assert_eq!(candidate.score(), 0);
    }

    #[test]
    fn rejects_candidate_without_present_modes() {
        let mut candidate = qualifying_candidate(vk::PhysicalDeviceType::DISCRETE_GPU);
        candidate.present_modes.clear();
        assert_eq!(candidate.score(), 0);
    }

    #[test]
    fn rejects_candidate_without_graphics_family() {
        let mut candidate = qualifying_candidate(vk::PhysicalDeviceType::DISCRETE_GPU);
        candidate.queue_families.graphics_family = None;
        assert_eq!(candidate.score(), 0);
    }

    #[test]
    fn rejects_candidate_without_present_family() {
        let mut candidate = qualifying_candidate(vk::PhysicalDeviceType::INTEGRATED_GPU);
        candidate.queue_families.present_family = None;
        assert_eq!(candidate.score(), 0);
    }

    #[test]
    fn rejects_cpu_and_virtual_categories() {
        assert_eq!(qualifying_candidate(vk::PhysicalDeviceType::CPU).score(), 0);
        assert_eq!(
            qualifying_candidate(vk::PhysicalDeviceType::VIRTUAL_GPU).score(),
            0
        );
    }

    #[test]
    fn prefers_integrated_over_discrete() {
        let candidates = vec![
            qualifying_candidate(vk::PhysicalDeviceType::DISCRETE_GPU),
            qualifying_candidate(vk::PhysicalDeviceType::INTEGRATED_GPU),
        ];
        let best = pick_best(&candidates).unwrap();
        assert_eq!(best.device_type, vk::PhysicalDeviceType::INTEGRATED_GPU);
    }

    #[test]
    fn pick_best_is_none_when_everything_scores_zero() {
        let mut candidate = qualifying_candidate(vk::PhysicalDeviceType::DISCRETE_GPU);
        candidate.surface_formats.clear();
        assert!(pick_best(std::slice::from_ref(&candidate)).is_none());
    }

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn takes_first_graphics_and_first_present_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let present_support = [false, false, true];

        let indices = resolve_queue_families(&families, &present_support);
        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.present_family, Some(2));
        assert_eq!(indices.unique_families(), vec![1, 2]);
    }

    #[test]
    fn graphics_and_present_may_share_a_family() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let present_support = [true];

        let indices = resolve_queue_families(&families, &present_support);
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(0));
        assert_eq!(indices.unique_families(), vec![0]);
    }

    #[test]
    fn incomplete_resolution_reports_not_complete() {
        let families = [family(vk::QueueFlags::COMPUTE)];
        let present_support = [false];

        let indices = resolve_queue_families(&families, &present_support);
        assert!(!indices.is_complete());
        assert!(indices.unique_families().is_empty());
    }
}
