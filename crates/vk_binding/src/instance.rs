//! Vulkan instance lifecycle
//!
//! The instance is the root handle: it owns the loader entry, the
//! allocator binding threaded through every creation call, and the
//! extension command table every descendant resolves through. Creation
//! marshals the immutable create-info records into the native ABI shape
//! (self-describing struct headers, NUL-terminated name arrays) and
//! surfaces native failures with their result code attached; no layer or
//! extension validation happens on this side of the boundary.
//!
//! Disposal follows the children-before-parent rule: the native
//! `vkDestroyInstance` runs exactly once, deferred until the last live
//! child registration has released its claim on the instance internals.

use std::ffi::{CStr, CString};
use std::fmt;
use std::os::raw::c_char;
use std::sync::Arc;

use ash::vk::{self, Handle as VkHandle};
use ash::Entry;

use crate::allocator::{raw_callbacks, Allocator};
use crate::commands::CommandTable;
use crate::debug_report::{
    DebugReportCallback, DebugReportCallbackCreateInfo, DebugReportMessageExtFn,
};
use crate::error::{BindingError, BindingResult};
use crate::handle::{Disposable, Handle};
use crate::physical_device::PhysicalDevice;

/// Well-known instance layer names.
pub mod layer_name {
    /// The Khronos validation layer.
    pub const KHRONOS_VALIDATION: &str = "VK_LAYER_KHRONOS_validation";
    /// The legacy LunarG standard validation meta-layer.
    pub const LUNARG_STANDARD_VALIDATION: &str = "VK_LAYER_LUNARG_standard_validation";
}

/// Well-known instance extension names.
pub mod extension_name {
    /// The debug report extension consumed by [`crate::DebugReportCallback`].
    pub const EXT_DEBUG_REPORT: &str = "VK_EXT_debug_report";
}

/// Application metadata passed to instance creation.
///
/// An immutable value record: consumed at call time, safe to reuse or
/// discard afterward. Nothing here is validated; drivers use it for
/// app-specific workarounds only.
#[derive(Clone, Debug)]
pub struct ApplicationInfo {
    /// Application name, if any.
    pub application_name: Option<String>,
    /// Application-defined version number.
    pub application_version: u32,
    /// Engine name, if any.
    pub engine_name: Option<String>,
    /// Engine-defined version number.
    pub engine_version: u32,
    /// Highest Vulkan API version the application targets.
    pub api_version: u32,
}

impl Default for ApplicationInfo {
    fn default() -> Self {
        Self {
            application_name: None,
            application_version: 0,
            engine_name: None,
            engine_version: 0,
            api_version: vk::API_VERSION_1_0,
        }
    }
}

/// Parameters for creating an [`Instance`].
///
/// Layer order matters for layer chaining and is preserved as given.
#[derive(Clone, Debug, Default)]
pub struct InstanceCreateInfo {
    /// Optional application metadata.
    pub application_info: Option<ApplicationInfo>,
    /// Layers to enable, in chaining order.
    pub enabled_layer_names: Vec<String>,
    /// Extensions to enable.
    pub enabled_extension_names: Vec<String>,
}

/// Create-info strings re-encoded for the native ABI. Kept alive on the
/// stack across the create call so the pointer arrays stay valid.
#[derive(Debug)]
pub(crate) struct MarshaledCreateInfo {
    application_name: Option<CString>,
    engine_name: Option<CString>,
    layers: Vec<CString>,
    extensions: Vec<CString>,
}

impl MarshaledCreateInfo {
    pub(crate) fn marshal(create_info: &InstanceCreateInfo) -> BindingResult<Self> {
        let encode = |name: &String| CString::new(name.as_str()).map_err(BindingError::from);
        Ok(Self {
            application_name: create_info
                .application_info
                .as_ref()
                .and_then(|info| info.application_name.as_ref())
                .map(encode)
                .transpose()?,
            engine_name: create_info
                .application_info
                .as_ref()
                .and_then(|info| info.engine_name.as_ref())
                .map(encode)
                .transpose()?,
            layers: create_info
                .enabled_layer_names
                .iter()
                .map(encode)
                .collect::<BindingResult<_>>()?,
            extensions: create_info
                .enabled_extension_names
                .iter()
                .map(encode)
                .collect::<BindingResult<_>>()?,
        })
    }

    pub(crate) fn layer_pointers(&self) -> Vec<*const c_char> {
        self.layers.iter().map(|name| name.as_ptr()).collect()
    }

    pub(crate) fn extension_pointers(&self) -> Vec<*const c_char> {
        self.extensions.iter().map(|name| name.as_ptr()).collect()
    }

    pub(crate) fn application_info(&self, info: &ApplicationInfo) -> vk::ApplicationInfo {
        let mut builder = vk::ApplicationInfo::builder()
            .application_version(info.application_version)
            .engine_version(info.engine_version)
            .api_version(info.api_version);
        if let Some(name) = &self.application_name {
            builder = builder.application_name(name);
        }
        if let Some(name) = &self.engine_name {
            builder = builder.engine_name(name);
        }
        builder.build()
    }
}

/// Shared internals of one live instance.
///
/// Owned jointly by the [`Instance`] wrapper and every live child
/// registration derived from it; the native destroy runs when the last
/// owner releases it. Only the root creates these internals, descendants
/// only read them.
pub(crate) struct InstanceShared {
    #[allow(dead_code)] // keeps the loader library mapped for the instance lifetime
    pub(crate) entry: Entry,
    pub(crate) raw: ash::Instance,
    pub(crate) allocator: Option<Allocator>,
    pub(crate) commands: CommandTable,
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        log::debug!(
            "destroying Vulkan instance 0x{:x}",
            self.raw.handle().as_raw()
        );
        // Teardown never propagates errors; vkDestroyInstance cannot fail
        // and the allocator binding it was created with outlives this call
        // (it is a field of self, dropped after this body).
        unsafe {
            self.raw
                .destroy_instance(raw_callbacks(self.allocator.as_ref()));
        }
    }
}

/// The root handle from which all other resources descend.
pub struct Instance {
    shared: Option<Arc<InstanceShared>>,
}

impl Instance {
    /// Creates a Vulkan instance.
    ///
    /// Loads the Vulkan library, marshals `create_info` into the native
    /// create-info shape and calls `vkCreateInstance`, threading the
    /// allocator binding through when one is given. A native failure
    /// surfaces as [`BindingError::Api`] with the result code attached.
    pub fn new(
        create_info: &InstanceCreateInfo,
        allocator: Option<&Allocator>,
    ) -> BindingResult<Self> {
        let entry = load_entry()?;

        let marshaled = MarshaledCreateInfo::marshal(create_info)?;
        let layer_pointers = marshaled.layer_pointers();
        let extension_pointers = marshaled.extension_pointers();
        let application_info = create_info
            .application_info
            .as_ref()
            .map(|info| marshaled.application_info(info));

        let mut native_info = vk::InstanceCreateInfo::builder()
            .enabled_layer_names(&layer_pointers)
            .enabled_extension_names(&extension_pointers);
        if let Some(info) = &application_info {
            native_info = native_info.application_info(info);
        }

        let raw = unsafe {
            entry
                .create_instance(&native_info, raw_callbacks(allocator))
                .map_err(BindingError::Api)?
        };
        log::info!("created Vulkan instance 0x{:x}", raw.handle().as_raw());

        let commands = CommandTable::new(entry.static_fn().clone(), raw.handle());
        Ok(Self {
            shared: Some(Arc::new(InstanceShared {
                entry,
                raw,
                allocator: allocator.cloned(),
                commands,
            })),
        })
    }

    fn shared(&self) -> BindingResult<&Arc<InstanceShared>> {
        self.shared
            .as_ref()
            .ok_or_else(|| BindingError::use_after_dispose("instance"))
    }

    /// The allocator binding threaded through creation calls, if any.
    ///
    /// `None` means the native default allocator is in effect.
    pub fn allocator(&self) -> Option<&Allocator> {
        self.shared.as_ref().and_then(|s| s.allocator.as_ref())
    }

    /// Enumerates the physical devices available to this instance.
    ///
    /// The returned children carry a non-owning back-reference to this
    /// instance; they are not destroyable native objects and may simply
    /// be discarded.
    pub fn enumerate_physical_devices(&self) -> BindingResult<Vec<PhysicalDevice>> {
        let shared = self.shared()?;
        let raw_devices = unsafe {
            shared
                .raw
                .enumerate_physical_devices()
                .map_err(BindingError::Api)?
        };
        log::debug!("enumerated {} physical device(s)", raw_devices.len());
        Ok(raw_devices
            .into_iter()
            .map(|raw| PhysicalDevice::new(raw, Arc::downgrade(shared)))
            .collect())
    }

    /// Resolves a named command to its raw function-pointer address for
    /// this instance.
    ///
    /// Returns `Ok(None)` (a null address, not an error) when the command
    /// does not exist for this instance. Fails with
    /// [`BindingError::NullArgument`] for an empty name and
    /// [`BindingError::InvalidOperation`] once disposed.
    pub fn get_proc_addr(&self, name: &str) -> BindingResult<vk::PFN_vkVoidFunction> {
        self.shared()?.commands.resolve(name)
    }

    /// Resolves a named command and casts it to the declared function
    /// signature.
    ///
    /// Returns `Ok(None)` when the command is unresolved.
    ///
    /// # Safety
    ///
    /// `F` must be a function-pointer type whose signature and calling
    /// convention match the native command named by `name`; the resolver
    /// trusts the declared type.
    pub unsafe fn get_proc<F: Copy>(&self, name: &str) -> BindingResult<Option<F>> {
        self.shared()?.commands.get(name)
    }

    /// Registers a debug report callback on this instance.
    ///
    /// Requires the [`extension_name::EXT_DEBUG_REPORT`] extension to
    /// have been enabled at creation; without it the extension commands
    /// resolve to null and registration fails with
    /// `Api(ERROR_EXTENSION_NOT_PRESENT)`. When `allocator` is given it
    /// is used for this registration's create/destroy pair.
    pub fn create_debug_report_callback(
        &self,
        create_info: DebugReportCallbackCreateInfo,
        allocator: Option<&Allocator>,
    ) -> BindingResult<DebugReportCallback> {
        let shared = self.shared()?;
        DebugReportCallback::register(Arc::clone(shared), create_info, allocator)
    }

    /// Injects a message into the debug report stream.
    ///
    /// Pass-through diagnostic call: every registered callback whose
    /// flags match observes the exact field values given here. Fails with
    /// `Api(ERROR_EXTENSION_NOT_PRESENT)` when the debug report extension
    /// was not enabled at creation.
    pub fn debug_report_message(
        &self,
        flags: vk::DebugReportFlagsEXT,
        object_type: vk::DebugReportObjectTypeEXT,
        object: u64,
        location: usize,
        message_code: i32,
        layer_prefix: &str,
        message: &str,
    ) -> BindingResult<()> {
        let shared = self.shared()?;
        let report: DebugReportMessageExtFn = unsafe {
            shared
                .commands
                .get("vkDebugReportMessageEXT")?
                .ok_or(BindingError::Api(vk::Result::ERROR_EXTENSION_NOT_PRESENT))?
        };
        let layer_prefix = CString::new(layer_prefix)?;
        let message = CString::new(message)?;
        unsafe {
            report(
                shared.raw.handle(),
                flags,
                object_type,
                object,
                location,
                message_code,
                layer_prefix.as_ptr(),
                message.as_ptr(),
            );
        }
        Ok(())
    }
}

impl Handle for Instance {
    type Raw = vk::Instance;

    fn handle(&self) -> vk::Instance {
        self.shared
            .as_ref()
            .map_or(vk::Instance::null(), |s| s.raw.handle())
    }
}

impl Disposable for Instance {
    fn dispose(&mut self) {
        if let Some(shared) = self.shared.take() {
            let dependents = Arc::strong_count(&shared) - 1;
            if dependents > 0 {
                log::debug!(
                    "instance disposal deferred behind {} live child handle(s)",
                    dependents
                );
            }
            drop(shared);
        }
    }

    fn is_disposed(&self) -> bool {
        self.shared.is_none()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("handle", &self.handle().as_raw())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Properties of an instance layer reported by the loader.
#[derive(Clone, Debug)]
pub struct LayerProperties {
    /// The layer name used to enable it.
    pub layer_name: String,
    /// Vulkan API version the layer was written against.
    pub spec_version: u32,
    /// Layer-defined implementation version.
    pub implementation_version: u32,
    /// Free-form description.
    pub description: String,
}

impl fmt::Display for LayerProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.layer_name, self.description)
    }
}

/// Properties of an instance extension reported by the loader.
#[derive(Clone, Debug)]
pub struct ExtensionProperties {
    /// The extension name used to enable it.
    pub extension_name: String,
    /// Extension specification version.
    pub spec_version: u32,
}

impl fmt::Display for ExtensionProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.extension_name, self.spec_version)
    }
}

/// Enumerates the instance layers available to this process.
pub fn enumerate_instance_layer_properties() -> BindingResult<Vec<LayerProperties>> {
    let entry = load_entry()?;
    let properties =
        unsafe { entry.enumerate_instance_layer_properties() }.map_err(BindingError::Api)?;
    Ok(properties
        .iter()
        .map(|raw| LayerProperties {
            layer_name: fixed_cstr_to_string(&raw.layer_name),
            spec_version: raw.spec_version,
            implementation_version: raw.implementation_version,
            description: fixed_cstr_to_string(&raw.description),
        })
        .collect())
}

/// Enumerates the instance extensions available to this process, either
/// globally (`None`) or as provided by one named layer.
pub fn enumerate_instance_extension_properties(
    layer_name: Option<&str>,
) -> BindingResult<Vec<ExtensionProperties>> {
    let entry = load_entry()?;
    let layer_name = layer_name.map(CString::new).transpose()?;
    let properties =
        unsafe { entry.enumerate_instance_extension_properties(layer_name.as_deref()) }
            .map_err(BindingError::Api)?;
    Ok(properties
        .iter()
        .map(|raw| ExtensionProperties {
            extension_name: fixed_cstr_to_string(&raw.extension_name),
            spec_version: raw.spec_version,
        })
        .collect())
}

fn load_entry() -> BindingResult<Entry> {
    unsafe { Entry::load() }.map_err(|e| BindingError::LoadingFailed(e.to_string()))
}

fn fixed_cstr_to_string(raw: &[c_char]) -> String {
    unsafe { CStr::from_ptr(raw.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marshal_preserves_layer_order() {
        let create_info = InstanceCreateInfo {
            enabled_layer_names: vec![
                "VK_LAYER_first".to_string(),
                "VK_LAYER_second".to_string(),
                "VK_LAYER_third".to_string(),
            ],
            ..Default::default()
        };
        let marshaled = MarshaledCreateInfo::marshal(&create_info).unwrap();
        let names: Vec<&CStr> = marshaled.layers.iter().map(CString::as_c_str).collect();
        assert_eq!(
            names,
            [
                CStr::from_bytes_with_nul(b"VK_LAYER_first\0").unwrap(),
                CStr::from_bytes_with_nul(b"VK_LAYER_second\0").unwrap(),
                CStr::from_bytes_with_nul(b"VK_LAYER_third\0").unwrap(),
            ]
        );
        assert_eq!(marshaled.layer_pointers().len(), 3);
        assert!(marshaled.extension_pointers().is_empty());
    }

    #[test]
    fn test_marshal_rejects_interior_nul() {
        let create_info = InstanceCreateInfo {
            enabled_extension_names: vec!["bad\0extension".to_string()],
            ..Default::default()
        };
        let err = MarshaledCreateInfo::marshal(&create_info).unwrap_err();
        assert!(matches!(err, BindingError::InvalidString(_)));
    }

    #[test]
    fn test_marshal_application_info_header() {
        let info = ApplicationInfo {
            application_name: Some("app name".to_string()),
            application_version: 1,
            engine_name: Some("engine name".to_string()),
            engine_version: 2,
            ..Default::default()
        };
        let create_info = InstanceCreateInfo {
            application_info: Some(info.clone()),
            ..Default::default()
        };
        let marshaled = MarshaledCreateInfo::marshal(&create_info).unwrap();
        let native = marshaled.application_info(&info);

        // Self-describing header plus field-for-field layout.
        assert_eq!(native.s_type, vk::StructureType::APPLICATION_INFO);
        assert_eq!(native.application_version, 1);
        assert_eq!(native.engine_version, 2);
        assert_eq!(native.api_version, vk::API_VERSION_1_0);
        let name = unsafe { CStr::from_ptr(native.p_application_name) };
        assert_eq!(name.to_str().unwrap(), "app name");
        let engine = unsafe { CStr::from_ptr(native.p_engine_name) };
        assert_eq!(engine.to_str().unwrap(), "engine name");
    }

    #[test]
    fn test_marshal_without_application_names() {
        let info = ApplicationInfo::default();
        let create_info = InstanceCreateInfo {
            application_info: Some(info.clone()),
            ..Default::default()
        };
        let marshaled = MarshaledCreateInfo::marshal(&create_info).unwrap();
        let native = marshaled.application_info(&info);
        assert!(native.p_application_name.is_null());
        assert!(native.p_engine_name.is_null());
    }

    #[test]
    fn test_layer_properties_display_leads_with_name() {
        let properties = LayerProperties {
            layer_name: "VK_LAYER_KHRONOS_validation".to_string(),
            spec_version: vk::API_VERSION_1_0,
            implementation_version: 1,
            description: "Khronos validation layer".to_string(),
        };
        assert!(format!("{}", properties).starts_with(&properties.layer_name));
    }

    #[test]
    fn test_extension_properties_display_leads_with_name() {
        let properties = ExtensionProperties {
            extension_name: "VK_EXT_debug_report".to_string(),
            spec_version: 9,
        };
        assert!(format!("{}", properties).starts_with(&properties.extension_name));
    }

    #[test]
    fn test_fixed_cstr_conversion_stops_at_nul() {
        let mut raw = [0 as c_char; 8];
        for (slot, byte) in raw.iter_mut().zip(b"abc\0def\0") {
            *slot = *byte as c_char;
        }
        assert_eq!(fixed_cstr_to_string(&raw), "abc");
    }
}
