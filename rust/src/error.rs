//! Error types for the transform operations.
//!
//! Validation failures ([`TransformError`]) always reach the caller. Backend
//! failures ([`BackendError`]) are recovered by the engine, which reruns the
//! call on the portable backend.

use thiserror::Error;

use crate::array::CoerceError;

/// Unrecoverable failure of `transform`, `scale_array` or `create_new_key`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    /// Wrong logical type at the API boundary (non-mapping input, non-string
    /// key or suffix).
    #[error("{0}")]
    InvalidArgument(String),

    /// A value cannot be interpreted as numeric data.
    #[error("{message}")]
    TypeMismatch {
        /// Mapping key of the offending value, when the failure came from
        /// `transform`.
        key: Option<String>,
        /// Element type that could not be converted (`str`, `bool`, ...).
        element_type: String,
        /// Full human-readable description.
        message: String,
    },

    /// The portable backend failed after the native one had already been
    /// abandoned.
    #[error("portable backend failed: {0}")]
    Backend(#[from] BackendError),
}

impl TransformError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Wraps a coercion failure of a standalone array (`scale_array`).
    pub(crate) fn from_array(err: CoerceError) -> Self {
        let element_type = err.element_type().to_string();
        let message = match &err {
            CoerceError::NonNumericArray { dtype } => {
                format!("array must be numeric, got {dtype}")
            }
            other => format!("cannot convert input to numeric array: {other}"),
        };
        Self::TypeMismatch {
            key: None,
            element_type,
            message,
        }
    }

    /// Wraps a coercion failure of the value stored under `key` (`transform`).
    pub(crate) fn for_key(key: &str, err: CoerceError) -> Self {
        let element_type = err.element_type().to_string();
        let message = match &err {
            CoerceError::NonNumericArray { dtype } => {
                format!("array for key '{key}' must be numeric, got {dtype}")
            }
            other => {
                format!("value for key '{key}' cannot be converted to numeric array: {other}")
            }
        };
        Self::TypeMismatch {
            key: Some(key.to_string()),
            element_type,
            message,
        }
    }
}

/// Failure raised by a [`Backend`](crate::backend::Backend) implementation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    /// The accelerated backend could not be loaded at startup.
    #[error("native backend unavailable: {0}")]
    Unavailable(String),

    #[error("zero-dimensional arrays are not supported")]
    ZeroDimensional,

    #[error("array is not contiguous in C or Fortran order")]
    NonContiguous,

    #[error("scale factor {0} is not finite")]
    NonFiniteFactor(f64),

    #[error("output shape mismatch: {0}")]
    Shape(String),
}

/// Failure while reading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_type_mismatch_names_key_and_dtype() {
        let err = TransformError::for_key(
            "labels",
            CoerceError::NonNumericArray {
                dtype: "str".into(),
            },
        );
        assert_eq!(err.to_string(), "array for key 'labels' must be numeric, got str");
        match err {
            TransformError::TypeMismatch {
                key, element_type, ..
            } => {
                assert_eq!(key.as_deref(), Some("labels"));
                assert_eq!(element_type, "str");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unconvertible_array_uses_conversion_wording() {
        let err = TransformError::from_array(CoerceError::NonNumericElement {
            element_type: "str".into(),
        });
        assert!(err
            .to_string()
            .starts_with("cannot convert input to numeric array"));
    }
}
