//! Vulkan context: instance, physical device, logical device, and queues.

use ash::khr::{surface, swapchain};
use ash::{vk, Device, Entry, Instance};
use std::ffi::{c_char, CStr};

use super::debug::DebugUtils;
use super::{APP_NAME, ENGINE_NAME, ENGINE_VERSION, REQUIRED_VK_VERSION};
use crate::error::{RenderError, Result, VkResultExt};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Queue family indices.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }
}

/// Main Vulkan context holding all core Vulkan objects.
pub struct VulkanContext {
    pub entry: Entry,
    pub instance: Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: Device,
    pub queue_families: QueueFamilyIndices,

    // Queues
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    // Extension loaders
    pub surface_loader: surface::Instance,
    pub swapchain_loader: swapchain::Device,

    pub device_properties: vk::PhysicalDeviceProperties,
    /// Preferred depth attachment format for this device.
    pub depth_format: vk::Format,
    /// Labels and object names; inert when validation is off.
    pub debug: DebugUtils,

    debug_messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanContext {
    /// Create a new Vulkan context able to present to `surface_probe`.
    ///
    /// The surface is created by the caller against `entry`/`instance`
    /// callbacks, so device selection can check present support.
    ///
    /// # Safety
    /// `display_handle` must be a live display connection.
    pub unsafe fn new(
        display_handle: raw_window_handle::RawDisplayHandle,
        window_handle: raw_window_handle::RawWindowHandle,
        enable_validation: bool,
    ) -> Result<(Self, vk::SurfaceKHR)> {
        let entry = Entry::load().map_err(RenderError::Loader)?;

        let api_version = entry
            .try_enumerate_instance_version()
            .vk("enumerate instance version")?
            .unwrap_or(vk::API_VERSION_1_0);

        if api_version < REQUIRED_VK_VERSION {
            return Err(RenderError::Unsupported(format!(
                "Vulkan 1.3 required, but only {}.{}.{} available",
                vk::api_version_major(api_version),
                vk::api_version_minor(api_version),
                vk::api_version_patch(api_version)
            )));
        }

        let validation = enable_validation && Self::validation_available(&entry);
        if enable_validation && !validation {
            log::warn!("validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }

        let instance = Self::create_instance(&entry, display_handle, validation)?;

        let debug_messenger = if validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
            .vk("create surface")?;

        let (physical_device, queue_families) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;

        let device_properties = instance.get_physical_device_properties(physical_device);
        let depth_format = Self::find_depth_format(&instance, physical_device)?;

        let (device, graphics_queue, present_queue) =
            Self::create_logical_device(&instance, physical_device, &queue_families)?;

        let swapchain_loader = swapchain::Device::new(&instance, &device);
        let debug = DebugUtils::new(&instance, &device, validation);

        log::info!("depth format: {:?}", depth_format);

        Ok((
            Self {
                entry,
                instance,
                physical_device,
                device,
                queue_families,
                graphics_queue,
                present_queue,
                surface_loader,
                swapchain_loader,
                device_properties,
                depth_format,
                debug,
                debug_messenger,
            },
            surface,
        ))
    }

    fn validation_available(entry: &Entry) -> bool {
        // SAFETY: entry is loaded; the call only reads loader state.
        let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
        layers.iter().any(|layer| {
            layer
                .layer_name_as_c_str()
                .map(|name| name == VALIDATION_LAYER)
                .unwrap_or(false)
        })
    }

    /// Create Vulkan instance with required extensions.
    unsafe fn create_instance(
        entry: &Entry,
        display_handle: raw_window_handle::RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<Instance> {
        let app_info = vk::ApplicationInfo::default()
            .application_name(APP_NAME)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(ENGINE_VERSION)
            .api_version(REQUIRED_VK_VERSION);

        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .vk("get required surface extensions")?
            .to_vec();

        if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layer_names: Vec<*const c_char> = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        entry.create_instance(&create_info, None).vk("create instance")
    }

    /// Setup debug messenger for validation layers.
    unsafe fn setup_debug_messenger(
        entry: &Entry,
        instance: &Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = debug_utils
            .create_debug_utils_messenger(&create_info, None)
            .vk("create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    /// Select the best physical device.
    unsafe fn pick_physical_device(
        instance: &Instance,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = instance
            .enumerate_physical_devices()
            .vk("enumerate physical devices")?;

        let best = devices
            .iter()
            .filter_map(|&device| {
                let score = Self::rate_device(instance, device, surface_loader, surface);
                (score > 0).then_some((device, score))
            })
            .max_by_key(|&(_, score)| score);

        let Some((physical_device, _)) = best else {
            return Err(RenderError::Unsupported(
                "no GPU with Vulkan 1.3 graphics + present support".to_string(),
            ));
        };

        let queue_families = Self::find_queue_families(instance, physical_device, surface_loader, surface);

        let props = instance.get_physical_device_properties(physical_device);
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        log::info!("selected GPU: {name} ({:?})", props.device_type);

        Ok((physical_device, queue_families))
    }

    /// Rate a physical device (higher is better, 0 is unusable).
    unsafe fn rate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> u64 {
        let props = instance.get_physical_device_properties(device);
        if props.api_version < REQUIRED_VK_VERSION {
            return 0;
        }

        if !Self::find_queue_families(instance, device, surface_loader, surface).is_complete() {
            return 0;
        }

        let mut score = 1u64;

        // Prefer discrete GPU
        if props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 10000;
        } else if props.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            score += 1000;
        }

        let memory_props = instance.get_physical_device_memory_properties(device);
        for heap in &memory_props.memory_heaps[..memory_props.memory_heap_count as usize] {
            if heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL) {
                score += heap.size / (1024 * 1024); // MB of VRAM
            }
        }

        score
    }

    /// Find queue family indices for a physical device.
    unsafe fn find_queue_families(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> QueueFamilyIndices {
        let queue_families = instance.get_physical_device_queue_family_properties(device);

        let mut indices = QueueFamilyIndices::default();

        for (i, family) in queue_families.iter().enumerate() {
            let i = i as u32;
            let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let present = surface_loader
                .get_physical_device_surface_support(device, i, surface)
                .unwrap_or(false);

            // A family doing both wins outright
            if graphics && present {
                indices.graphics = Some(i);
                indices.present = Some(i);
                break;
            }
            if graphics && indices.graphics.is_none() {
                indices.graphics = Some(i);
            }
            if present && indices.present.is_none() {
                indices.present = Some(i);
            }
        }

        indices
    }

    /// First candidate depth format usable as an optimal-tiling attachment.
    unsafe fn find_depth_format(instance: &Instance, device: vk::PhysicalDevice) -> Result<vk::Format> {
        DEPTH_FORMAT_CANDIDATES
            .iter()
            .copied()
            .find(|&format| {
                instance
                    .get_physical_device_format_properties(device, format)
                    .optimal_tiling_features
                    .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            })
            .ok_or_else(|| RenderError::Unsupported("no supported depth format".to_string()))
    }

    /// Create logical device with required features and extensions.
    unsafe fn create_logical_device(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: &QueueFamilyIndices,
    ) -> Result<(Device, vk::Queue, vk::Queue)> {
        let (Some(graphics), Some(present)) = (queue_families.graphics, queue_families.present) else {
            return Err(RenderError::Unsupported("missing graphics/present queue".to_string()));
        };

        let mut unique_families = vec![graphics];
        if present != graphics {
            unique_families.push(present);
        }

        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<_> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extensions = [swapchain::NAME.as_ptr()];

        // Vulkan 1.3 features
        let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default()
            .synchronization2(true)
            .dynamic_rendering(true);

        // Bindless texture array
        let mut vulkan_12_features = vk::PhysicalDeviceVulkan12Features::default()
            .descriptor_indexing(true)
            .runtime_descriptor_array(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_variable_descriptor_count(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .shader_sampled_image_array_non_uniform_indexing(true)
            .separate_depth_stencil_layouts(true);

        // Post-processing push constants start with a 64-bit timestamp and
        // index the HDR pair with a push-constant slot.
        let device_features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(true)
            .shader_int64(true)
            .shader_sampled_image_array_dynamic_indexing(true);

        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .features(device_features)
            .push_next(&mut vulkan_13_features)
            .push_next(&mut vulkan_12_features);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .push_next(&mut features2);

        let device = instance
            .create_device(physical_device, &create_info, None)
            .vk("create logical device")?;

        let graphics_queue = device.get_device_queue(graphics, 0);
        let present_queue = device.get_device_queue(present, 0);

        Ok((device, graphics_queue, present_queue))
    }

    pub fn graphics_family(&self) -> u32 {
        // is_complete() was checked during device creation
        self.queue_families.graphics.unwrap_or_default()
    }

    /// Nanoseconds per timestamp tick.
    pub fn timestamp_period(&self) -> f32 {
        self.device_properties.limits.timestamp_period
    }

    /// Wait for all device operations to complete.
    pub fn wait_idle(&self) -> Result<()> {
        // SAFETY: device is alive for the lifetime of self.
        unsafe { self.device.device_wait_idle() }.vk("wait for device idle")
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        // SAFETY: owners of device-level objects are dropped before the
        // context; nothing else references the device after this point.
        unsafe {
            let _ = self.device.device_wait_idle();

            if let Some((loader, messenger)) = self.debug_messenger.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _ty: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = if data.is_null() || (*data).p_message.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr((*data).p_message).to_string_lossy()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[VK] {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[VK] {message}");
    }

    vk::FALSE
}
