//! Interchangeable implementations of the scaling and key algorithms.

use ndarray::{ArrayD, ArrayViewD};

use crate::array::{OutputMapping, ValidatedMapping};
use crate::error::BackendError;
use crate::{DEFAULT_SUFFIX, TRANSFORM_FACTOR};

pub mod cpu;
mod native;
mod portable;

pub use cpu::{capabilities, CpuCapabilities};
pub use native::NativeBackend;
pub use portable::PortableBackend;

/// One implementation of the transform primitives.
///
/// Implementations must not mutate their inputs and must return freshly
/// allocated arrays with the input's shape.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    fn scale(&self, array: ArrayViewD<'_, f64>, factor: f64) -> Result<ArrayD<f64>, BackendError>;

    fn create_new_key(&self, key: &str, suffix: &str) -> Result<String, BackendError>;

    /// Suffixes every key with `"_new"` and scales every array by `0.3`.
    /// Any failing entry fails the whole call.
    fn transform(&self, input: &ValidatedMapping) -> Result<OutputMapping, BackendError> {
        let mut entries = Vec::with_capacity(input.len());
        for (key, array) in input {
            entries.push((
                self.create_new_key(key, DEFAULT_SUFFIX)?,
                self.scale(array.view(), TRANSFORM_FACTOR)?,
            ));
        }
        Ok(collect_output(entries))
    }
}

/// Assembles derived entries in order. When two entries derive the same key
/// the later value wins and the key keeps its first position.
pub(crate) fn collect_output<I>(entries: I) -> OutputMapping
where
    I: IntoIterator<Item = (String, ArrayD<f64>)>,
{
    let entries = entries.into_iter();
    let mut output = OutputMapping::with_capacity(entries.size_hint().0);
    for (key, array) in entries {
        if output.contains_key(&key) {
            tracing::warn!(key = %key, "derived key collision, keeping the later entry");
        }
        output.insert(key, array);
    }
    output
}
