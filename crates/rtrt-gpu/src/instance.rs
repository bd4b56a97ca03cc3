//! Vulkan instance creation.

use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::{CStr, CString};

/// Required instance extensions for the renderer.
pub fn required_instance_extensions() -> Vec<&'static CStr> {
    let extensions = vec![
        ash::khr::surface::NAME,
        #[cfg(target_os = "windows")]
        ash::khr::win32_surface::NAME,
        #[cfg(target_os = "linux")]
        ash::khr::xlib_surface::NAME,
        #[cfg(target_os = "linux")]
        ash::khr::wayland_surface::NAME,
        #[cfg(target_os = "macos")]
        ash::ext::metal_surface::NAME,
        #[cfg(target_os = "macos")]
        ash::khr::portability_enumeration::NAME,
    ];

    extensions
}

/// Validation layers to enable in debug builds.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Layer that logs every Vulkan call with its arguments.
pub const API_DUMP_LAYER: &CStr = c"VK_LAYER_LUNARG_api_dump";

/// Instance layers requested for the given toggles, in load order.
pub fn requested_layers(enable_validation: bool, enable_api_dump: bool) -> Vec<&'static CStr> {
    let mut layers = Vec::new();
    if enable_api_dump {
        layers.push(API_DUMP_LAYER);
    }
    if enable_validation {
        layers.extend(validation_layers());
    }
    layers
}

/// Create a Vulkan instance.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
    enable_api_dump: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::Other(format!("Invalid application name: {e}")))?;
    let engine_name = c"rtrt";

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    let extension_names: Vec<*const i8> = required_instance_extensions()
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    // Drop layers the loader does not know about rather than failing instance creation
    let available_layers = entry.enumerate_instance_layer_properties()?;
    let layers: Vec<&CStr> = requested_layers(enable_validation, enable_api_dump)
        .into_iter()
        .filter(|layer| {
            let found = available_layers.iter().any(|props| {
                // SAFETY: layer_name is a NUL-terminated string filled in by the loader
                let name = unsafe { CStr::from_ptr(props.layer_name.as_ptr()) };
                name == *layer
            });
            if !found {
                tracing::warn!("Layer {} not available", layer.to_string_lossy());
            }
            found
        })
        .collect();

    let layer_names: Vec<*const i8> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = entry.create_instance(&create_info, None)?;

    Ok(instance)
}

/// Select the best physical device.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
    let devices = instance.enumerate_physical_devices()?;

    if devices.is_empty() {
        return Err(GpuError::NoSuitableDevice);
    }

    let mut best_device = None;
    let mut best_score = 0i32;

    for device in devices {
        let score = score_physical_device(instance, device);
        if score > best_score {
            best_score = score;
            best_device = Some(device);
        }
    }

    best_device.ok_or(GpuError::NoSuitableDevice)
}

/// Score a physical device for selection.
unsafe fn score_physical_device(instance: &ash::Instance, device: vk::PhysicalDevice) -> i32 {
    let properties = instance.get_physical_device_properties(device);

    let api_version = properties.api_version;
    if vk::api_version_major(api_version) < 1
        || (vk::api_version_major(api_version) == 1 && vk::api_version_minor(api_version) < 3)
    {
        return -1;
    }

    let mut score = 1;

    match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => score += 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => score += 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => score += 50,
        _ => {}
    }

    // Hardware ray tracing is the point of the renderer
    let extensions = instance
        .enumerate_device_extension_properties(device)
        .unwrap_or_default();
    let has_rt = extensions.iter().any(|ext| {
        CStr::from_ptr(ext.extension_name.as_ptr()) == ash::khr::ray_tracing_pipeline::NAME
    });
    if has_rt {
        score += 500;
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_dump_layer_loads_before_validation() {
        let layers = requested_layers(true, true);
        assert_eq!(layers.first(), Some(&API_DUMP_LAYER));
        assert_eq!(layers.len(), 2);
    }

    #[test]
    fn no_layers_when_disabled() {
        assert!(requested_layers(false, false).is_empty());
        assert_eq!(requested_layers(false, true), vec![API_DUMP_LAYER]);
    }
}
