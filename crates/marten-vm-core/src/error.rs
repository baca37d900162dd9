//! VM error types

use thiserror::Error;

/// Errors surfaced to callers of the VM.
#[derive(Debug, Error)]
pub enum VmError {
    /// A native constructor was given an unusable argument
    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    /// An operation was applied to a value of the wrong kind
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Internal wiring failure
    #[error("InternalError: {0}")]
    InternalError(String),
}

impl VmError {
    /// Create an invalid-argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a type error
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }
}

/// Result type for VM operations
pub type VmResult<T> = Result<T, VmError>;
