//! Debug report callback marshaling
//!
//! Registers a managed callback with the `VK_EXT_debug_report` extension
//! and translates each raw native invocation into a strongly-typed
//! [`DebugReportCallbackData`]. The registered closure and its user-data
//! token are heap-pinned and owned by the registration handle, so the
//! native side can invoke the thunk from any thread for exactly as long
//! as the registration is live. Invocations are delivered synchronously
//! on whichever thread triggered them.

use std::ffi::{c_char, c_void, CStr};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use ash::vk::{self, Handle as VkHandle};

use crate::allocator::{raw_callbacks, Allocator};
use crate::error::{BindingError, BindingResult};
use crate::handle::{Disposable, Handle};
use crate::instance::InstanceShared;

/// Typed signatures for the extension commands this module resolves.
/// The calling convention matching these declarations is guaranteed by
/// the Vulkan spec for the named commands.
pub(crate) type CreateDebugReportCallbackExtFn = unsafe extern "system" fn(
    vk::Instance,
    *const vk::DebugReportCallbackCreateInfoEXT,
    *const vk::AllocationCallbacks,
    *mut vk::DebugReportCallbackEXT,
) -> vk::Result;

pub(crate) type DestroyDebugReportCallbackExtFn = unsafe extern "system" fn(
    vk::Instance,
    vk::DebugReportCallbackEXT,
    *const vk::AllocationCallbacks,
);

pub(crate) type DebugReportMessageExtFn = unsafe extern "system" fn(
    vk::Instance,
    vk::DebugReportFlagsEXT,
    vk::DebugReportObjectTypeEXT,
    u64,
    usize,
    i32,
    *const c_char,
    *const c_char,
);

/// The managed callback invoked for each debug report message.
///
/// Returns `true` to ask the native layer to abort the triggering
/// operation, `false` to continue.
pub type DebugReportHandler = dyn Fn(&DebugReportCallbackData) -> bool + Send + Sync;

/// One debug report invocation, translated from the raw argument list.
#[derive(Clone, Debug)]
pub struct DebugReportCallbackData {
    /// Severity/kind bits of the message.
    pub flags: vk::DebugReportFlagsEXT,
    /// Type of the object the message refers to.
    pub object_type: vk::DebugReportObjectTypeEXT,
    /// Raw 64-bit handle of that object.
    pub object: u64,
    /// Implementation-defined source location.
    pub location: usize,
    /// Layer-defined message code.
    pub message_code: i32,
    /// Abbreviated name of the reporting layer/component.
    pub layer_prefix: String,
    /// The message text.
    pub message: String,
    /// The opaque token supplied at registration, bit-identical.
    pub user_data: usize,
}

/// Parameters for registering a debug report callback.
///
/// Consumed by value at registration; the callback moves into the
/// registration handle. `user_data` is an opaque address-sized token
/// round-tripped to every invocation, meaningful only to the caller.
pub struct DebugReportCallbackCreateInfo {
    /// Which message kinds the callback subscribes to.
    pub flags: vk::DebugReportFlagsEXT,
    /// The managed callback.
    pub callback: Box<DebugReportHandler>,
    /// Opaque token delivered unchanged with every invocation.
    pub user_data: usize,
}

impl DebugReportCallbackCreateInfo {
    /// Subscribes `callback` to the message kinds in `flags`.
    pub fn new(
        flags: vk::DebugReportFlagsEXT,
        callback: impl Fn(&DebugReportCallbackData) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            flags,
            callback: Box::new(callback),
            user_data: 0,
        }
    }

    /// Attaches an opaque user-data token.
    #[must_use]
    pub fn with_user_data(mut self, user_data: usize) -> Self {
        self.user_data = user_data;
        self
    }
}

impl fmt::Debug for DebugReportCallbackCreateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugReportCallbackCreateInfo")
            .field("flags", &self.flags)
            .field("user_data", &self.user_data)
            .finish()
    }
}

/// Every severity/kind bit of the extension.
pub fn all_report_flags() -> vk::DebugReportFlagsEXT {
    vk::DebugReportFlagsEXT::INFORMATION
        | vk::DebugReportFlagsEXT::WARNING
        | vk::DebugReportFlagsEXT::PERFORMANCE_WARNING
        | vk::DebugReportFlagsEXT::ERROR
        | vk::DebugReportFlagsEXT::DEBUG
}

/// Heap-pinned bridge between the raw thunk and the managed callback.
/// Its address is handed to the native layer as `p_user_data`, so it must
/// not move or die before the registration is destroyed.
pub(crate) struct CallbackPayload {
    pub(crate) callback: Box<DebugReportHandler>,
    pub(crate) user_data: usize,
}

/// A live debug report callback registration.
///
/// Holds shared ownership of the instance internals: if the creating
/// [`crate::Instance`] is disposed first, its native destruction is
/// deferred until this registration is gone, preserving the
/// children-before-parent teardown order the native layer requires.
pub struct DebugReportCallback {
    raw: vk::DebugReportCallbackEXT,
    shared: Option<Arc<InstanceShared>>,
    allocator: Option<Allocator>,
    destroy: DestroyDebugReportCallbackExtFn,
    payload: Box<CallbackPayload>,
}

impl DebugReportCallback {
    pub(crate) fn register(
        shared: Arc<InstanceShared>,
        create_info: DebugReportCallbackCreateInfo,
        allocator: Option<&Allocator>,
    ) -> BindingResult<Self> {
        // Resolve both commands up front; dispose must not be able to
        // fail resolution after a successful registration.
        let create: CreateDebugReportCallbackExtFn = unsafe {
            shared
                .commands
                .get("vkCreateDebugReportCallbackEXT")?
                .ok_or(BindingError::Api(vk::Result::ERROR_EXTENSION_NOT_PRESENT))?
        };
        let destroy: DestroyDebugReportCallbackExtFn = unsafe {
            shared
                .commands
                .get("vkDestroyDebugReportCallbackEXT")?
                .ok_or(BindingError::Api(vk::Result::ERROR_EXTENSION_NOT_PRESENT))?
        };

        let payload = Box::new(CallbackPayload {
            callback: create_info.callback,
            user_data: create_info.user_data,
        });

        let native_info = vk::DebugReportCallbackCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_REPORT_CALLBACK_CREATE_INFO_EXT,
            p_next: std::ptr::null(),
            flags: create_info.flags,
            pfn_callback: Some(debug_report_thunk),
            p_user_data: std::ptr::addr_of!(*payload) as *mut c_void,
        };

        let callbacks = raw_callbacks(allocator)
            .map_or(std::ptr::null(), |table| table as *const vk::AllocationCallbacks);
        let mut raw = vk::DebugReportCallbackEXT::null();
        let result = unsafe { create(shared.raw.handle(), &native_info, callbacks, &mut raw) };
        if result != vk::Result::SUCCESS {
            return Err(BindingError::Api(result));
        }

        log::debug!("registered debug report callback 0x{:x}", raw.as_raw());
        Ok(Self {
            raw,
            shared: Some(shared),
            allocator: allocator.cloned(),
            destroy,
            payload,
        })
    }

    /// The user-data token this registration round-trips.
    pub fn user_data(&self) -> usize {
        self.payload.user_data
    }

    /// The allocator binding this registration was created with, if any.
    pub fn allocator(&self) -> Option<&Allocator> {
        self.allocator.as_ref()
    }
}

impl Handle for DebugReportCallback {
    type Raw = vk::DebugReportCallbackEXT;

    fn handle(&self) -> vk::DebugReportCallbackEXT {
        self.raw
    }
}

impl Disposable for DebugReportCallback {
    fn dispose(&mut self) {
        if let Some(shared) = self.shared.take() {
            let callbacks = raw_callbacks(self.allocator.as_ref())
                .map_or(std::ptr::null(), |table| table as *const vk::AllocationCallbacks);
            unsafe { (self.destroy)(shared.raw.handle(), self.raw, callbacks) };
            log::debug!("destroyed debug report callback 0x{:x}", self.raw.as_raw());
            self.raw = vk::DebugReportCallbackEXT::null();
        }
    }

    fn is_disposed(&self) -> bool {
        self.shared.is_none()
    }
}

impl Drop for DebugReportCallback {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for DebugReportCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugReportCallback")
            .field("handle", &self.raw.as_raw())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn lossy_string(raw: *const c_char) -> String {
    if raw.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned()
}

pub(crate) unsafe extern "system" fn debug_report_thunk(
    flags: vk::DebugReportFlagsEXT,
    object_type: vk::DebugReportObjectTypeEXT,
    object: u64,
    location: usize,
    message_code: i32,
    p_layer_prefix: *const c_char,
    p_message: *const c_char,
    p_user_data: *mut c_void,
) -> vk::Bool32 {
    let payload = &*(p_user_data as *const CallbackPayload);
    let data = DebugReportCallbackData {
        flags,
        object_type,
        object,
        location,
        message_code,
        layer_prefix: lossy_string(p_layer_prefix),
        message: lossy_string(p_message),
        user_data: payload.user_data,
    };

    // Unwinding into the native caller is undefined behavior; a panic is
    // reported as "continue".
    let abort = panic::catch_unwind(AssertUnwindSafe(|| (payload.callback)(&data)))
        .unwrap_or_else(|_| {
            log::error!("debug report callback panicked; continuing");
            false
        });
    if abort {
        vk::TRUE
    } else {
        vk::FALSE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::sync::Mutex;

    fn invoke_thunk(
        payload: &CallbackPayload,
        flags: vk::DebugReportFlagsEXT,
        layer_prefix: &CStr,
        message: &CStr,
    ) -> vk::Bool32 {
        unsafe {
            debug_report_thunk(
                flags,
                vk::DebugReportObjectTypeEXT::DEBUG_REPORT_CALLBACK_EXT,
                u64::MAX,
                usize::try_from(i32::MAX).unwrap(),
                1,
                layer_prefix.as_ptr(),
                message.as_ptr(),
                std::ptr::addr_of!(*payload) as *mut c_void,
            )
        }
    }

    #[test]
    fn test_thunk_marshals_all_fields_and_token() {
        let observed: Arc<Mutex<Vec<DebugReportCallbackData>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&observed);
        let payload = CallbackPayload {
            callback: Box::new(move |data| {
                sink.lock().unwrap().push(data.clone());
                false
            }),
            user_data: 0xDEAD_BEEF,
        };

        let layer_prefix = CString::new("prefix õäöü").unwrap();
        let message = CString::new("message õäöü").unwrap();
        let verdict = invoke_thunk(
            &payload,
            vk::DebugReportFlagsEXT::ERROR,
            &layer_prefix,
            &message,
        );
        assert_eq!(verdict, vk::FALSE);

        let observed = observed.lock().unwrap();
        assert_eq!(observed.len(), 1);
        let data = &observed[0];
        assert_eq!(data.flags, vk::DebugReportFlagsEXT::ERROR);
        assert_eq!(
            data.object_type,
            vk::DebugReportObjectTypeEXT::DEBUG_REPORT_CALLBACK_EXT
        );
        assert_eq!(data.object, u64::MAX);
        assert_eq!(data.location, usize::try_from(i32::MAX).unwrap());
        assert_eq!(data.message_code, 1);
        assert_eq!(data.layer_prefix, "prefix õäöü");
        assert_eq!(data.message, "message õäöü");
        assert_eq!(data.user_data, 0xDEAD_BEEF);
    }

    #[test]
    fn test_thunk_returns_abort_verdict() {
        let payload = CallbackPayload {
            callback: Box::new(|_| true),
            user_data: 0,
        };
        let prefix = CString::new("layer").unwrap();
        let message = CString::new("abort me").unwrap();
        let verdict = invoke_thunk(
            &payload,
            vk::DebugReportFlagsEXT::WARNING,
            &prefix,
            &message,
        );
        assert_eq!(verdict, vk::TRUE);
    }

    #[test]
    fn test_thunk_survives_null_strings() {
        let payload = CallbackPayload {
            callback: Box::new(|data| {
                assert!(data.layer_prefix.is_empty());
                assert!(data.message.is_empty());
                false
            }),
            user_data: 0,
        };
        let verdict = unsafe {
            debug_report_thunk(
                vk::DebugReportFlagsEXT::DEBUG,
                vk::DebugReportObjectTypeEXT::UNKNOWN,
                0,
                0,
                0,
                std::ptr::null(),
                std::ptr::null(),
                std::ptr::addr_of!(payload) as *mut c_void,
            )
        };
        assert_eq!(verdict, vk::FALSE);
    }

    #[test]
    fn test_panicking_callback_reports_continue() {
        let payload = CallbackPayload {
            callback: Box::new(|_| panic!("boom")),
            user_data: 0,
        };
        let prefix = CString::new("layer").unwrap();
        let message = CString::new("panic").unwrap();
        let verdict = invoke_thunk(
            &payload,
            vk::DebugReportFlagsEXT::ERROR,
            &prefix,
            &message,
        );
        assert_eq!(verdict, vk::FALSE);
    }

    #[test]
    fn test_all_report_flags_covers_every_kind() {
        let flags = all_report_flags();
        assert!(flags.contains(vk::DebugReportFlagsEXT::INFORMATION));
        assert!(flags.contains(vk::DebugReportFlagsEXT::WARNING));
        assert!(flags.contains(vk::DebugReportFlagsEXT::PERFORMANCE_WARNING));
        assert!(flags.contains(vk::DebugReportFlagsEXT::ERROR));
        assert!(flags.contains(vk::DebugReportFlagsEXT::DEBUG));
    }
}
