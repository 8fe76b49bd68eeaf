//! Error types for operator layers.
//!
//! Every failure is scoped to the call that produced it. Configuration
//! invariants are reported at construction time, shape and size invariants
//! when a tensor is evaluated.

use thiserror::Error;

/// Result type alias for operator operations
pub type OperatorResult<T> = Result<T, OperatorError>;

/// Errors raised by transforms, the mixing core and the layers built on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperatorError {
    /// A tensor shape (channel axis, rank or weight tensor) disagrees with the configuration
    #[error("Shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        context: String,
        expected: String,
        got: String,
    },

    /// The input is too small to provide the requested number of frequency bins
    #[error(
        "Mode truncation failed on spatial axis {axis}: requested {requested} modes but only {available} frequency bins are available"
    )]
    ModeTruncation {
        axis: usize,
        requested: usize,
        available: usize,
    },

    /// The transform has no registered implementation or derivative rule
    #[error("Unsupported transform '{transform}': {reason}")]
    UnsupportedTransform { transform: String, reason: String },

    /// A construction-time parameter is out of range
    #[error("Invalid configuration for parameter '{parameter}' with value '{value}': {reason}")]
    InvalidConfiguration {
        parameter: String,
        value: String,
        reason: String,
    },
}

impl OperatorError {
    /// Create a shape mismatch error
    pub fn shape_mismatch(
        context: impl Into<String>,
        expected: impl Into<String>,
        got: impl Into<String>,
    ) -> Self {
        OperatorError::ShapeMismatch {
            context: context.into(),
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Create a mode truncation error
    pub fn mode_truncation(axis: usize, requested: usize, available: usize) -> Self {
        OperatorError::ModeTruncation {
            axis,
            requested,
            available,
        }
    }

    /// Create an unsupported transform error
    pub fn unsupported_transform(transform: impl Into<String>, reason: impl Into<String>) -> Self {
        OperatorError::UnsupportedTransform {
            transform: transform.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(
        parameter: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        OperatorError::InvalidConfiguration {
            parameter: parameter.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}
