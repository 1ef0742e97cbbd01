//! Dictionary-oriented array scaling.
//!
//! [`transform`] takes a mapping of string keys to numeric arrays and returns
//! a new mapping in which every key gains the `"_new"` suffix and every array
//! is scaled by `0.3`. The work runs on an accelerated native backend when one
//! could be loaded at startup and falls back to a portable implementation
//! whenever the native one is missing or refuses a call.
//!
//! ```
//! use pybase_transform::{transform, InputMapping};
//!
//! let mut input = InputMapping::new();
//! input.insert("array1".into(), vec![1.0, 2.0, 3.0].into());
//! let output = transform(&input).unwrap();
//! assert_eq!(output["array1_new"].shape(), &[3]);
//! ```

mod array;
pub mod backend;
pub mod config;
mod engine;
mod error;
pub mod metrics;
#[cfg(feature = "python")]
mod python;

use ndarray::ArrayD;

pub use crate::array::{
    input_from_json, output_to_json, ArrayLike, CoerceError, DType, InputMapping, OutputMapping,
    Scalar, ValidatedMapping,
};
pub use crate::engine::{validate, Engine, FallbackEvent, Operation};
pub use crate::error::{BackendError, ConfigError, TransformError};
#[cfg(feature = "python")]
pub use crate::python::init_test_module;

/// Suffix appended to every key by [`transform`].
pub const DEFAULT_SUFFIX: &str = "_new";

/// Fixed factor applied by [`transform`].
pub const TRANSFORM_FACTOR: f64 = 0.3;

/// Conventional factor for [`scale_array`].
pub const DEFAULT_SCALE_FACTOR: f64 = 0.3;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Suffixes every key with `"_new"` and scales every array by `0.3`.
///
/// Values are widened to `float64` first; shapes are preserved. An empty
/// mapping returns an empty mapping without touching any backend.
pub fn transform(input: &InputMapping) -> Result<OutputMapping, TransformError> {
    Engine::global().transform(input)
}

/// Returns a new `float64` array holding `array * factor`.
pub fn scale_array<A: Into<ArrayLike>>(array: A, factor: f64) -> Result<ArrayD<f64>, TransformError> {
    Engine::global().scale_array(&array.into(), factor)
}

/// Returns `key` followed by `suffix`, verbatim.
pub fn create_new_key(key: &str, suffix: &str) -> Result<String, TransformError> {
    Engine::global().create_new_key(key, suffix)
}

/// Whether the native backend loaded at startup.
pub fn get_backend_availability() -> bool {
    Engine::global().native_available()
}

/// Semantic version of this crate.
pub fn get_version() -> &'static str {
    VERSION
}
