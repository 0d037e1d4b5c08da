//! Native handle contracts
//!
//! Every wrapper in this crate is a thin shell around one opaque native
//! handle. The raw value is exposed for interop and diagnostics only;
//! feeding it into unmanaged calls bypasses the lifetime tracking these
//! traits guarantee.

/// Access to the raw native handle behind a wrapper.
///
/// Identity is the raw value: two wrappers are the same resource exactly
/// when their raw handles compare equal. After disposal the raw value is
/// permanently the null handle.
pub trait Handle {
    /// The underlying native handle type.
    type Raw: Copy + PartialEq;

    /// Returns the raw native handle, or the null handle once disposed.
    fn handle(&self) -> Self::Raw;
}

/// Explicit, idempotent teardown of a native resource.
///
/// `dispose` calls the native destroy exactly once; every call beyond the
/// first is a no-op and never an error. `Drop` impls route through the
/// same path, so scope exit guarantees teardown even when an operation in
/// between failed. Teardown itself never propagates errors.
pub trait Disposable {
    /// Destroys the underlying native resource if still live.
    fn dispose(&mut self);

    /// Returns `true` once `dispose` has run.
    fn is_disposed(&self) -> bool;
}
