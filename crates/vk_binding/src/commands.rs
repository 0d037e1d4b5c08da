//! Extension command resolution
//!
//! Named commands outside the always-present core API are resolved
//! through `vkGetInstanceProcAddr` into raw function pointers and
//! memoized per handle scope. A command resolved against one instance is
//! meaningless on another, so every root handle owns its own table;
//! device-scoped resolution, when the native API distinguishes it, gets
//! a separate table rather than sharing this one.

use std::collections::HashMap;
use std::ffi::CString;
use std::mem;
use std::sync::Mutex;

use ash::vk;

use crate::error::{BindingError, BindingResult};

/// Memoized name-to-function-pointer table scoped to one instance.
///
/// Misses are memoized too: once a name resolves to null it stays null
/// for the lifetime of the handle, since the native API surface of a live
/// instance does not change at runtime.
pub(crate) struct CommandTable {
    scope: vk::Instance,
    static_fn: vk::StaticFn,
    cache: Mutex<HashMap<CString, vk::PFN_vkVoidFunction>>,
}

impl CommandTable {
    /// Creates a table resolving through the given loader entry point,
    /// scoped to `scope`.
    pub(crate) fn new(static_fn: vk::StaticFn, scope: vk::Instance) -> Self {
        Self {
            scope,
            static_fn,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves `name` to a raw function pointer address.
    ///
    /// Returns `Ok(None)` when the command does not exist for this scope;
    /// the caller decides whether that is fatal. Fails with
    /// `NullArgument` for an empty name before touching the native layer.
    pub(crate) fn resolve(&self, name: &str) -> BindingResult<vk::PFN_vkVoidFunction> {
        if name.is_empty() {
            return Err(BindingError::NullArgument("name"));
        }
        let key = CString::new(name)?;

        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(&cached) = cache.get(&key) {
            return Ok(cached);
        }

        let resolved = unsafe { (self.static_fn.get_instance_proc_addr)(self.scope, key.as_ptr()) };
        if resolved.is_none() {
            log::debug!("command `{}` is not present for this instance", name);
        }
        cache.insert(key, resolved);
        Ok(resolved)
    }

    /// Resolves `name` and casts the address to the declared function
    /// signature `F`.
    ///
    /// Returns `Ok(None)` when the command is unresolved. The declared
    /// signature matching the native calling convention is the caller's
    /// obligation; the table only guarantees the address came from the
    /// loader under this scope.
    pub(crate) unsafe fn get<F: Copy>(&self, name: &str) -> BindingResult<Option<F>> {
        debug_assert_eq!(
            mem::size_of::<F>(),
            mem::size_of::<unsafe extern "system" fn()>(),
            "typed command lookups require a function-pointer type"
        );
        match self.resolve(name)? {
            Some(pfn) => Ok(Some(unsafe {
                mem::transmute_copy::<unsafe extern "system" fn(), F>(&pfn)
            })),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::{c_char, CStr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    unsafe extern "system" fn known_command() {}

    fn answer(p_name: *const c_char) -> vk::PFN_vkVoidFunction {
        let name = unsafe { CStr::from_ptr(p_name) }.to_string_lossy();
        if name == "vkKnownCommand" {
            Some(known_command)
        } else {
            None
        }
    }

    unsafe extern "system" fn stub_get_instance_proc_addr(
        _instance: vk::Instance,
        p_name: *const c_char,
    ) -> vk::PFN_vkVoidFunction {
        answer(p_name)
    }

    // Tests run in parallel, so the counting stubs get their own counters.
    static MEMO_LOOKUPS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "system" fn counting_get_instance_proc_addr(
        _instance: vk::Instance,
        p_name: *const c_char,
    ) -> vk::PFN_vkVoidFunction {
        MEMO_LOOKUPS.fetch_add(1, Ordering::SeqCst);
        answer(p_name)
    }

    static EMPTY_LOOKUPS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "system" fn empty_probe_get_instance_proc_addr(
        _instance: vk::Instance,
        p_name: *const c_char,
    ) -> vk::PFN_vkVoidFunction {
        EMPTY_LOOKUPS.fetch_add(1, Ordering::SeqCst);
        answer(p_name)
    }

    fn table_with(
        get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    ) -> CommandTable {
        let static_fn = vk::StaticFn {
            get_instance_proc_addr,
        };
        CommandTable::new(static_fn, vk::Instance::null())
    }

    fn stub_table() -> CommandTable {
        table_with(stub_get_instance_proc_addr)
    }

    #[test]
    fn test_resolve_known_command() {
        let table = stub_table();
        let resolved = table.resolve("vkKnownCommand").unwrap();
        assert_eq!(resolved, Some(known_command as unsafe extern "system" fn()));
    }

    #[test]
    fn test_resolve_missing_command_is_null_not_error() {
        let table = stub_table();
        assert!(table.resolve("does not exist").unwrap().is_none());
    }

    #[test]
    fn test_resolve_empty_name_fails_fast() {
        let table = table_with(empty_probe_get_instance_proc_addr);
        let err = table.resolve("").unwrap_err();
        assert!(matches!(err, BindingError::NullArgument("name")));
        // Validation happens before the native boundary.
        assert_eq!(EMPTY_LOOKUPS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_resolution_is_memoized() {
        let table = table_with(counting_get_instance_proc_addr);

        let first = table.resolve("vkKnownCommand").unwrap();
        let hits = MEMO_LOOKUPS.load(Ordering::SeqCst);
        let second = table.resolve("vkKnownCommand").unwrap();
        assert_eq!(first, second);
        assert_eq!(MEMO_LOOKUPS.load(Ordering::SeqCst), hits);

        // Negative results are memoized as well.
        assert!(table.resolve("vkMissingCommand").unwrap().is_none());
        let hits = MEMO_LOOKUPS.load(Ordering::SeqCst);
        assert!(table.resolve("vkMissingCommand").unwrap().is_none());
        assert_eq!(MEMO_LOOKUPS.load(Ordering::SeqCst), hits);
    }

    #[test]
    fn test_typed_get_casts_to_declared_signature() {
        type VoidCommand = unsafe extern "system" fn();

        let table = stub_table();
        let typed = unsafe { table.get::<VoidCommand>("vkKnownCommand") }.unwrap();
        assert_eq!(
            typed.map(|f| f as usize),
            Some(known_command as usize),
        );
        assert!(unsafe { table.get::<VoidCommand>("does not exist") }
            .unwrap()
            .is_none());
        assert!(unsafe { table.get::<VoidCommand>("") }.is_err());
    }
}
