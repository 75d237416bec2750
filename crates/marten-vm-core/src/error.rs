//! VM error types
//!
//! Only genuine failures live here. The dispatch core's internal control
//! signals (no meta-object override, a failed cache guard, an invalidated
//! assumption token) are expressed as enum-valued returns and state
//! transitions, never as errors.

use crate::shape::PropertyKey;
use crate::symbol::Symbol;
use thiserror::Error;

/// Failures raised by the shape-based object storage
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    /// A typed slot was written with a value of the wrong runtime type
    #[error("TypeMismatch: property '{key}' holds {expected} slots, got {found}")]
    TypeMismatch {
        /// The property that was written
        key: PropertyKey,
        /// The slot's storage type
        expected: &'static str,
        /// The runtime type of the offending value
        found: &'static str,
    },

    /// A constant or final slot was written after initialization
    #[error("Immutable: property '{key}' cannot be written")]
    Immutable {
        /// The property that was written
        key: PropertyKey,
    },
}

/// VM execution errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    /// A selector could not be resolved anywhere on the receiver's class
    /// chain, and no does-not-understand fallback was installed
    #[error("MessageNotUnderstood: {class} does not understand #{selector}")]
    MessageNotUnderstood {
        /// Name of the receiver's class
        class: Symbol,
        /// The unresolved selector
        selector: Symbol,
    },

    /// Storage failure from an incompatible field write
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Activation depth limit exceeded
    #[error("stack depth limit exceeded")]
    StackOverflow,

    /// Internal error
    #[error("InternalError: {0}")]
    Internal(String),
}

impl VmError {
    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type for VM operations
pub type VmResult<T> = std::result::Result<T, VmError>;
