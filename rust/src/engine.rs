//! Backend selection and the native-to-portable fallback policy.
//!
//! An [`Engine`] owns an optional native backend and the portable one. Every
//! operation validates first, then tries native once; if native refuses, the
//! whole operation is recomputed on the portable backend and a
//! [`FallbackEvent`] is reported. Results are all-or-nothing.

use std::fmt;
use std::sync::OnceLock;

use ndarray::ArrayD;

use crate::array::{ArrayLike, InputMapping, OutputMapping, ValidatedMapping};
use crate::backend::{Backend, NativeBackend, PortableBackend};
use crate::config::{self, TransformConfig};
use crate::error::{BackendError, TransformError};
use crate::metrics;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Transform,
    ScaleArray,
    CreateNewKey,
}

impl Operation {
    pub const fn name(self) -> &'static str {
        match self {
            Operation::Transform => "transform",
            Operation::ScaleArray => "scale_array",
            Operation::CreateNewKey => "create_new_key",
        }
    }
}

/// Non-fatal notice that a backend failed and the call was recomputed on the
/// portable backend.
#[derive(Clone, Debug, PartialEq)]
pub struct FallbackEvent {
    pub operation: Operation,
    pub backend: &'static str,
    pub error: BackendError,
}

impl fmt::Display for FallbackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} failed, falling back to portable: {}",
            self.backend,
            self.operation.name(),
            self.error
        )
    }
}

pub struct Engine {
    native: Option<Box<dyn Backend>>,
    portable: PortableBackend,
    probe_error: Option<BackendError>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("native", &self.native.as_ref().map(|backend| backend.name()))
            .field("probe_error", &self.probe_error)
            .finish()
    }
}

static ENGINE: OnceLock<Engine> = OnceLock::new();

impl Engine {
    /// The process-wide engine. The native backend is probed on first use
    /// and never again.
    pub fn global() -> &'static Engine {
        ENGINE.get_or_init(|| Engine::probe(config::global()))
    }

    /// Attempts to load the native backend described by `config`.
    pub fn probe(config: &TransformConfig) -> Self {
        match NativeBackend::load(config) {
            Ok(native) => {
                tracing::debug!(
                    capabilities = %native.capabilities(),
                    parallel_min_elements = native.parallel_min_elements(),
                    "native transform backend loaded"
                );
                Self::with_native(Box::new(native))
            }
            Err(error) => {
                tracing::warn!(error = %error, "native transform backend not available, using portable fallback");
                Self {
                    probe_error: Some(error),
                    ..Self::portable_only()
                }
            }
        }
    }

    pub fn with_native(native: Box<dyn Backend>) -> Self {
        Self {
            native: Some(native),
            portable: PortableBackend,
            probe_error: None,
        }
    }

    pub fn portable_only() -> Self {
        Self {
            native: None,
            portable: PortableBackend,
            probe_error: None,
        }
    }

    pub fn native_available(&self) -> bool {
        self.native.is_some()
    }

    /// Name of the backend tried first.
    pub fn preferred_backend(&self) -> &'static str {
        self.native
            .as_deref()
            .map_or(self.portable.name(), |backend| backend.name())
    }

    /// Why the native backend failed to load, if it did.
    pub fn probe_error(&self) -> Option<&BackendError> {
        self.probe_error.as_ref()
    }

    pub fn transform(&self, input: &InputMapping) -> Result<OutputMapping, TransformError> {
        self.transform_with(input, &mut |_| {})
    }

    /// Like [`Engine::transform`], also handing each fallback to `on_fallback`.
    pub fn transform_with(
        &self,
        input: &InputMapping,
        on_fallback: &mut dyn FnMut(&FallbackEvent),
    ) -> Result<OutputMapping, TransformError> {
        if input.is_empty() {
            return Ok(OutputMapping::new());
        }
        let validated = validate(input)?;
        self.dispatch(Operation::Transform, on_fallback, |backend| {
            backend.transform(&validated)
        })
    }

    pub fn scale_array(&self, array: &ArrayLike, factor: f64) -> Result<ArrayD<f64>, TransformError> {
        self.scale_array_with(array, factor, &mut |_| {})
    }

    pub fn scale_array_with(
        &self,
        array: &ArrayLike,
        factor: f64,
        on_fallback: &mut dyn FnMut(&FallbackEvent),
    ) -> Result<ArrayD<f64>, TransformError> {
        let validated = array.to_f64_array().map_err(TransformError::from_array)?;
        self.dispatch(Operation::ScaleArray, on_fallback, |backend| {
            backend.scale(validated.view(), factor)
        })
    }

    pub fn create_new_key(&self, key: &str, suffix: &str) -> Result<String, TransformError> {
        self.create_new_key_with(key, suffix, &mut |_| {})
    }

    pub fn create_new_key_with(
        &self,
        key: &str,
        suffix: &str,
        on_fallback: &mut dyn FnMut(&FallbackEvent),
    ) -> Result<String, TransformError> {
        self.dispatch(Operation::CreateNewKey, on_fallback, |backend| {
            backend.create_new_key(key, suffix)
        })
    }

    fn dispatch<T, F>(
        &self,
        operation: Operation,
        on_fallback: &mut dyn FnMut(&FallbackEvent),
        call: F,
    ) -> Result<T, TransformError>
    where
        F: Fn(&dyn Backend) -> Result<T, BackendError>,
    {
        if let Some(native) = self.native.as_deref() {
            match call(native) {
                Ok(value) => {
                    metrics::record_backend(operation.name(), native.name());
                    return Ok(value);
                }
                Err(error) => {
                    let event = FallbackEvent {
                        operation,
                        backend: native.name(),
                        error,
                    };
                    tracing::warn!(
                        operation = operation.name(),
                        backend = event.backend,
                        error = %event.error,
                        "backend failed, falling back to portable"
                    );
                    metrics::record_fallback(operation.name(), native.name());
                    on_fallback(&event);
                }
            }
        }

        let value = call(&self.portable)?;
        metrics::record_backend(operation.name(), self.portable.name());
        Ok(value)
    }
}

/// Coerces every value to a `float64` array, failing on the first entry
/// that is not numeric.
pub fn validate(input: &InputMapping) -> Result<ValidatedMapping, TransformError> {
    input
        .iter()
        .map(|(key, value)| {
            value
                .to_f64_array()
                .map(|array| (key.clone(), array))
                .map_err(|err| TransformError::for_key(key, err))
        })
        .collect()
}
