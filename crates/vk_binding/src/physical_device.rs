//! Physical device child handles

use std::ffi::CStr;
use std::sync::Weak;

use ash::vk::{self, Handle as VkHandle};

use crate::error::{BindingError, BindingResult};
use crate::handle::Handle;
use crate::instance::InstanceShared;

/// A physical device enumerated from an instance.
///
/// Query-only child handle: physical devices are not destroyable native
/// objects, so there is nothing to dispose; wrappers are freely cloned
/// and discarded. The parent back-reference is non-owning and exists for
/// diagnostics and scoping, never for lifetime extension.
#[derive(Clone)]
pub struct PhysicalDevice {
    raw: vk::PhysicalDevice,
    parent: Weak<InstanceShared>,
}

impl PhysicalDevice {
    pub(crate) fn new(raw: vk::PhysicalDevice, parent: Weak<InstanceShared>) -> Self {
        Self { raw, parent }
    }

    /// Raw handle of the instance this device was enumerated from, or
    /// the null handle once that instance has been destroyed.
    pub fn parent_handle(&self) -> vk::Instance {
        self.parent
            .upgrade()
            .map_or(vk::Instance::null(), |shared| shared.raw.handle())
    }

    /// The device name reported by the driver.
    pub fn name(&self) -> BindingResult<String> {
        let shared = self
            .parent
            .upgrade()
            .ok_or_else(|| BindingError::use_after_dispose("parent instance"))?;
        let properties = unsafe { shared.raw.get_physical_device_properties(self.raw) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        Ok(name.to_string_lossy().into_owned())
    }
}

impl Handle for PhysicalDevice {
    type Raw = vk::PhysicalDevice;

    fn handle(&self) -> vk::PhysicalDevice {
        self.raw
    }
}

impl PartialEq for PhysicalDevice {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for PhysicalDevice {}

impl std::fmt::Debug for PhysicalDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDevice")
            .field("handle", &self.raw.as_raw())
            .finish()
    }
}
