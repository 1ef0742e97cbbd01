use ndarray::{ArrayD, ArrayViewD};

use super::Backend;
use crate::error::BackendError;

/// Reference implementation used whenever the native backend is missing or
/// refuses a call. Handles every layout, including zero-dimensional arrays.
#[derive(Clone, Copy, Debug, Default)]
pub struct PortableBackend;

impl Backend for PortableBackend {
    fn name(&self) -> &'static str {
        "portable"
    }

    fn scale(&self, array: ArrayViewD<'_, f64>, factor: f64) -> Result<ArrayD<f64>, BackendError> {
        Ok(array.mapv(|value| value * factor))
    }

    fn create_new_key(&self, key: &str, suffix: &str) -> Result<String, BackendError> {
        Ok(format!("{key}{suffix}"))
    }
}
