//! Error types for the binding layer
//!
//! Argument validation fails before any native call is made; native
//! failures carry the raw `vk::Result` unmodified. Teardown paths never
//! return errors (failures there are logged and suppressed).

use ash::vk;
use thiserror::Error;

/// Binding-layer error types
#[derive(Error, Debug)]
pub enum BindingError {
    /// A native entry point returned a non-success result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// A required name/string argument was empty
    #[error("argument `{0}` must not be empty")]
    NullArgument(&'static str),

    /// Use of a disposed handle, or an invalid lifecycle transition
    #[error("invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// The Vulkan loader library could not be loaded
    #[error("failed to load Vulkan library: {0}")]
    LoadingFailed(String),

    /// A string argument contained an interior NUL byte and cannot cross
    /// the native ABI
    #[error("invalid string argument: {0}")]
    InvalidString(#[from] std::ffi::NulError),
}

impl BindingError {
    /// Shorthand for the disposed-handle failure used by every operation
    /// on a dead wrapper.
    pub(crate) fn use_after_dispose(what: &str) -> Self {
        BindingError::InvalidOperation {
            reason: format!("{} used after disposal", what),
        }
    }
}

/// Result type for binding-layer operations
pub type BindingResult<T> = Result<T, BindingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_carries_result_code() {
        let err = BindingError::Api(vk::Result::ERROR_EXTENSION_NOT_PRESENT);
        assert!(format!("{}", err).contains("ERROR_EXTENSION_NOT_PRESENT"));
    }

    #[test]
    fn test_null_argument_names_the_argument() {
        let err = BindingError::NullArgument("name");
        assert_eq!(format!("{}", err), "argument `name` must not be empty");
    }

    #[test]
    fn test_interior_nul_converts() {
        let nul = std::ffi::CString::new("bad\0name").unwrap_err();
        let err = BindingError::from(nul);
        assert!(matches!(err, BindingError::InvalidString(_)));
    }
}
