//! Host-memory allocator binding
//!
//! Adapts user allocation hooks to the native `vk::AllocationCallbacks`
//! ABI. The binding is reference counted and pins its hooks at a stable
//! address: any creation call that received a pointer to the callback
//! table may trigger allocations for as long as the created handle (or
//! any of its descendants) lives, so clones of the binding travel with
//! every wrapper that used it.

use std::ffi::c_void;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

use ash::vk;

/// User-supplied host memory management hooks.
///
/// The three required methods mirror the native allocation slots. The
/// notification hooks are optional and default to no-ops. Implementations
/// must be thread safe: the native layer may allocate from any thread.
pub trait AllocationHooks: Send + Sync {
    /// Allocates `size` bytes aligned to `alignment`. Returns null on
    /// failure, which the native layer treats as out-of-host-memory.
    fn allocate(
        &self,
        size: usize,
        alignment: usize,
        scope: vk::SystemAllocationScope,
    ) -> *mut c_void;

    /// Resizes an allocation previously returned by `allocate` or
    /// `reallocate`. Never called with a null `original`; that case is
    /// routed to `allocate` before reaching the hooks.
    fn reallocate(
        &self,
        original: *mut c_void,
        size: usize,
        alignment: usize,
        scope: vk::SystemAllocationScope,
    ) -> *mut c_void;

    /// Frees an allocation. Never called with a null pointer.
    fn free(&self, memory: *mut c_void);

    /// Notification that the implementation made an internal allocation.
    fn on_internal_allocation(
        &self,
        _size: usize,
        _allocation_type: vk::InternalAllocationType,
        _scope: vk::SystemAllocationScope,
    ) {
    }

    /// Notification that the implementation freed an internal allocation.
    fn on_internal_free(
        &self,
        _size: usize,
        _allocation_type: vk::InternalAllocationType,
        _scope: vk::SystemAllocationScope,
    ) {
    }
}

/// Boxed hooks behind one heap cell so the native `p_user_data` can be a
/// thin pointer with a stable address.
struct HookCell(Box<dyn AllocationHooks>);

struct AllocatorInner {
    // Field order matters: `callbacks.p_user_data` points into `hooks`.
    hooks: Box<HookCell>,
    callbacks: vk::AllocationCallbacks,
}

// The raw pointers in `callbacks` only reference the pinned `hooks` cell,
// and the hooks themselves are Send + Sync by trait bound.
unsafe impl Send for AllocatorInner {}
unsafe impl Sync for AllocatorInner {}

/// A native-compatible allocation callback table bound to user hooks.
///
/// Cheap to clone; all clones share one binding. Equality is identity:
/// two `Allocator` values compare equal exactly when they share the same
/// underlying binding.
#[derive(Clone)]
pub struct Allocator {
    inner: Arc<AllocatorInner>,
}

impl Allocator {
    /// Creates a binding around the given hooks.
    pub fn new(hooks: impl AllocationHooks + 'static) -> Self {
        let hooks = Box::new(HookCell(Box::new(hooks)));
        let user_data = ptr::addr_of!(*hooks) as *mut c_void;
        let callbacks = vk::AllocationCallbacks {
            p_user_data: user_data,
            pfn_allocation: Some(allocation_thunk),
            pfn_reallocation: Some(reallocation_thunk),
            pfn_free: Some(free_thunk),
            pfn_internal_allocation: Some(internal_allocation_thunk),
            pfn_internal_free: Some(internal_free_thunk),
        };
        Self {
            inner: Arc::new(AllocatorInner { hooks, callbacks }),
        }
    }

    /// The native callback table. The returned reference stays valid (and
    /// un-relocated) for as long as any clone of this binding exists.
    pub(crate) fn raw(&self) -> &vk::AllocationCallbacks {
        &self.inner.callbacks
    }
}

/// Maps an optional binding to the nullable table pointer every native
/// creation/destruction call accepts.
pub(crate) fn raw_callbacks(allocator: Option<&Allocator>) -> Option<&vk::AllocationCallbacks> {
    allocator.map(Allocator::raw)
}

impl PartialEq for Allocator {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Allocator {}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("user_data", &self.inner.callbacks.p_user_data)
            .finish()
    }
}

unsafe fn hooks_from(p_user_data: *mut c_void) -> &'static dyn AllocationHooks {
    &*(*(p_user_data as *const HookCell)).0
}

// A panic unwinding across the native boundary is undefined behavior, so
// every thunk catches. Allocation thunks report failure with a null
// pointer; the notification and free thunks swallow the panic.

unsafe extern "system" fn allocation_thunk(
    p_user_data: *mut c_void,
    size: usize,
    alignment: usize,
    allocation_scope: vk::SystemAllocationScope,
) -> *mut c_void {
    let hooks = hooks_from(p_user_data);
    panic::catch_unwind(AssertUnwindSafe(|| {
        hooks.allocate(size, alignment, allocation_scope)
    }))
    .unwrap_or_else(|_| {
        log::error!("allocation hook panicked; reporting allocation failure");
        ptr::null_mut()
    })
}

unsafe extern "system" fn reallocation_thunk(
    p_user_data: *mut c_void,
    p_original: *mut c_void,
    size: usize,
    alignment: usize,
    allocation_scope: vk::SystemAllocationScope,
) -> *mut c_void {
    let hooks = hooks_from(p_user_data);
    panic::catch_unwind(AssertUnwindSafe(|| {
        if p_original.is_null() {
            hooks.allocate(size, alignment, allocation_scope)
        } else {
            hooks.reallocate(p_original, size, alignment, allocation_scope)
        }
    }))
    .unwrap_or_else(|_| {
        log::error!("reallocation hook panicked; reporting allocation failure");
        ptr::null_mut()
    })
}

unsafe extern "system" fn free_thunk(p_user_data: *mut c_void, p_memory: *mut c_void) {
    if p_memory.is_null() {
        return;
    }
    let hooks = hooks_from(p_user_data);
    if panic::catch_unwind(AssertUnwindSafe(|| hooks.free(p_memory))).is_err() {
        log::error!("free hook panicked; leaking allocation");
    }
}

unsafe extern "system" fn internal_allocation_thunk(
    p_user_data: *mut c_void,
    size: usize,
    allocation_type: vk::InternalAllocationType,
    allocation_scope: vk::SystemAllocationScope,
) {
    let hooks = hooks_from(p_user_data);
    let _ = panic::catch_unwind(AssertUnwindSafe(|| {
        hooks.on_internal_allocation(size, allocation_type, allocation_scope);
    }));
}

unsafe extern "system" fn internal_free_thunk(
    p_user_data: *mut c_void,
    size: usize,
    allocation_type: vk::InternalAllocationType,
    allocation_scope: vk::SystemAllocationScope,
) {
    let hooks = hooks_from(p_user_data);
    let _ = panic::catch_unwind(AssertUnwindSafe(|| {
        hooks.on_internal_free(size, allocation_type, allocation_scope);
    }));
}
