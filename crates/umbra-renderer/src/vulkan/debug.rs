//! Debug-utils labels and object names.
//!
//! Inert when validation is off, so call sites never branch on it.

use ash::vk;
use std::ffi::CString;

/// Label colour of post-processing effect regions.
pub const EFFECT_LABEL_COLOR: [f32; 4] = [0.23, 1.0, 0.65, 1.0];

/// Label colour of the fixed geometry/lighting passes.
pub const PASS_LABEL_COLOR: [f32; 4] = [1.0, 0.78, 0.05, 1.0];

pub struct DebugUtils {
    loader: Option<ash::ext::debug_utils::Device>,
}

impl DebugUtils {
    pub fn new(instance: &ash::Instance, device: &ash::Device, enabled: bool) -> Self {
        Self {
            loader: enabled.then(|| ash::ext::debug_utils::Device::new(instance, device)),
        }
    }

    pub fn disabled() -> Self {
        Self { loader: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.loader.is_some()
    }

    /// Open a labelled region in `cmd`.
    pub unsafe fn begin_label(&self, cmd: vk::CommandBuffer, name: &str, color: [f32; 4]) {
        let Some(loader) = &self.loader else { return };
        let Ok(name) = CString::new(name) else { return };
        let label = vk::DebugUtilsLabelEXT::default().label_name(&name).color(color);
        loader.cmd_begin_debug_utils_label(cmd, &label);
    }

    pub unsafe fn end_label(&self, cmd: vk::CommandBuffer) {
        if let Some(loader) = &self.loader {
            loader.cmd_end_debug_utils_label(cmd);
        }
    }

    /// Attach a name shown by validation messages and capture tools.
    pub fn name_object<H: vk::Handle>(&self, handle: H, name: &str) {
        let Some(loader) = &self.loader else { return };
        let Ok(name) = CString::new(name) else { return };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        // SAFETY: handle belongs to the device the loader was created for.
        if let Err(e) = unsafe { loader.set_debug_utils_object_name(&info) } {
            log::warn!("naming {name:?} failed: {e:?}");
        }
    }
}
