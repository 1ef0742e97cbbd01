//! Array-like input values and their coercion to `float64` arrays.
//!
//! [`ArrayLike`] covers what a caller may hand to the transform: typed
//! n-dimensional arrays, nested sequences and bare scalars. Coercion follows
//! numpy's `asarray(value, dtype=float64)` rules: numeric arrays widen,
//! rectangular sequences of numbers, numeric text and `None` convert, and
//! typed `bool` or `str` arrays are rejected.

use std::fmt;

use indexmap::IndexMap;
use ndarray::{Array, ArrayD, ArrayViewD, Dimension, IxDyn};
use num_traits::ToPrimitive;
use serde_json::Value;
use thiserror::Error;

use crate::error::TransformError;

/// Caller-supplied mapping, iterated in insertion order.
pub type InputMapping = IndexMap<String, ArrayLike>;

/// Every value coerced to a materialised `float64` array.
pub type ValidatedMapping = IndexMap<String, ArrayD<f64>>;

/// Derived keys mapped to freshly allocated, scaled arrays.
pub type OutputMapping = IndexMap<String, ArrayD<f64>>;

/// Element type of an array-like value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    Float64,
    Float32,
    Int64,
    Int32,
    Bool,
    Str,
    Object,
}

impl DType {
    pub const fn name(self) -> &'static str {
        match self {
            DType::Float64 => "float64",
            DType::Float32 => "float32",
            DType::Int64 => "int64",
            DType::Int32 => "int32",
            DType::Bool => "bool",
            DType::Str => "str",
            DType::Object => "object",
        }
    }

    /// Bool counts as non-numeric, as with `np.issubdtype(bool, np.number)`.
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            DType::Float64 | DType::Float32 | DType::Int64 | DType::Int32
        )
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single element of a nested sequence.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// A missing value (`None`, JSON `null`); converts to NaN.
    None,
    /// Any other host object, identified by its type name.
    Opaque(String),
}

impl Scalar {
    pub fn dtype(&self) -> DType {
        match self {
            Scalar::Bool(_) => DType::Bool,
            Scalar::Int(_) => DType::Int64,
            Scalar::Float(_) => DType::Float64,
            Scalar::Text(_) => DType::Str,
            Scalar::None | Scalar::Opaque(_) => DType::Object,
        }
    }

    fn to_f64(&self) -> Result<f64, CoerceError> {
        match self {
            Scalar::Bool(value) => Ok(if *value { 1.0 } else { 0.0 }),
            Scalar::Int(value) => Ok(*value as f64),
            Scalar::Float(value) => Ok(*value),
            Scalar::Text(text) => parse_text(text),
            Scalar::None => Ok(f64::NAN),
            Scalar::Opaque(type_name) => Err(CoerceError::NonNumericElement {
                element_type: type_name.clone(),
            }),
        }
    }
}

/// A value that may be coerced to a numeric array.
#[derive(Clone, Debug, PartialEq)]
pub enum ArrayLike {
    Float64(ArrayD<f64>),
    Float32(ArrayD<f32>),
    Int64(ArrayD<i64>),
    Int32(ArrayD<i32>),
    Bool(ArrayD<bool>),
    Text(ArrayD<String>),
    /// A (possibly nested) sequence, like a Python list of lists.
    Nested(Vec<ArrayLike>),
    Scalar(Scalar),
}

/// Reason a value could not be coerced.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum CoerceError {
    #[error("array dtype {dtype} is not numeric")]
    NonNumericArray { dtype: String },

    #[error("element of type {element_type} is not numeric")]
    NonNumericElement { element_type: String },

    #[error("could not convert string to float: '{text}'")]
    InvalidText { text: String },

    #[error("ragged nested sequence: expected sub-shape {expected:?}, found {found:?}")]
    Ragged {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("{0}")]
    Shape(String),
}

impl CoerceError {
    /// Element type reported to callers.
    pub fn element_type(&self) -> &str {
        match self {
            CoerceError::NonNumericArray { dtype } => dtype,
            CoerceError::NonNumericElement { element_type } => element_type,
            CoerceError::InvalidText { .. } => DType::Str.name(),
            CoerceError::Ragged { .. } | CoerceError::Shape(_) => DType::Object.name(),
        }
    }
}

impl ArrayLike {
    pub fn dtype(&self) -> DType {
        match self {
            ArrayLike::Float64(_) => DType::Float64,
            ArrayLike::Float32(_) => DType::Float32,
            ArrayLike::Int64(_) => DType::Int64,
            ArrayLike::Int32(_) => DType::Int32,
            ArrayLike::Bool(_) => DType::Bool,
            ArrayLike::Text(_) => DType::Str,
            ArrayLike::Nested(_) => DType::Object,
            ArrayLike::Scalar(scalar) => scalar.dtype(),
        }
    }

    /// Materialises the value as a new `float64` array.
    ///
    /// The result never shares storage with `self`.
    pub fn to_f64_array(&self) -> Result<ArrayD<f64>, CoerceError> {
        match self {
            ArrayLike::Float64(array) => Ok(array.clone()),
            ArrayLike::Float32(array) => Ok(widen(array)),
            ArrayLike::Int64(array) => Ok(widen(array)),
            ArrayLike::Int32(array) => Ok(widen(array)),
            ArrayLike::Bool(_) | ArrayLike::Text(_) => Err(CoerceError::NonNumericArray {
                dtype: self.dtype().name().to_string(),
            }),
            ArrayLike::Scalar(scalar) => Ok(ArrayD::from_elem(IxDyn(&[]), scalar.to_f64()?)),
            ArrayLike::Nested(_) => {
                let mut data = Vec::new();
                let shape = collect_nested(self, &mut data)?;
                ArrayD::from_shape_vec(IxDyn(&shape), data)
                    .map_err(|err| CoerceError::Shape(err.to_string()))
            }
        }
    }

    /// Builds an array-like value from decoded JSON.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Bool(flag) => ArrayLike::Scalar(Scalar::Bool(*flag)),
            Value::Number(number) => ArrayLike::Scalar(match number.as_i64() {
                Some(int) => Scalar::Int(int),
                None => Scalar::Float(number.as_f64().unwrap_or(f64::NAN)),
            }),
            Value::String(text) => ArrayLike::Scalar(Scalar::Text(text.clone())),
            Value::Array(items) => ArrayLike::Nested(items.iter().map(Self::from_json).collect()),
            Value::Null => ArrayLike::Scalar(Scalar::None),
            Value::Object(_) => ArrayLike::Scalar(Scalar::Opaque("object".into())),
        }
    }
}

/// Text elements of a sequence parse as floats, surrounding whitespace
/// ignored.
fn parse_text(text: &str) -> Result<f64, CoerceError> {
    text.trim().parse::<f64>().map_err(|_| CoerceError::InvalidText {
        text: text.to_string(),
    })
}

fn widen<T: ToPrimitive + Copy>(array: &ArrayD<T>) -> ArrayD<f64> {
    array.mapv(|value| value.to_f64().unwrap_or(f64::NAN))
}

/// Flattens `value` into `out` in row-major order and returns its shape.
fn collect_nested(value: &ArrayLike, out: &mut Vec<f64>) -> Result<Vec<usize>, CoerceError> {
    match value {
        ArrayLike::Nested(items) => {
            let mut inner: Option<Vec<usize>> = None;
            for item in items {
                let shape = collect_nested(item, out)?;
                match &inner {
                    None => inner = Some(shape),
                    Some(expected) if *expected != shape => {
                        return Err(CoerceError::Ragged {
                            expected: expected.clone(),
                            found: shape,
                        });
                    }
                    Some(_) => {}
                }
            }
            let mut shape = vec![items.len()];
            shape.extend(inner.unwrap_or_default());
            Ok(shape)
        }
        ArrayLike::Scalar(scalar) => {
            out.push(scalar.to_f64()?);
            Ok(Vec::new())
        }
        ArrayLike::Bool(array) => {
            out.extend(array.iter().map(|&flag| if flag { 1.0 } else { 0.0 }));
            Ok(array.shape().to_vec())
        }
        ArrayLike::Text(array) => {
            for text in array.iter() {
                out.push(parse_text(text)?);
            }
            Ok(array.shape().to_vec())
        }
        numeric => {
            let array = numeric.to_f64_array()?;
            out.extend(array.iter().copied());
            Ok(array.shape().to_vec())
        }
    }
}

/// Decodes a JSON object into an [`InputMapping`], keeping document order.
pub fn input_from_json(value: &Value) -> Result<InputMapping, TransformError> {
    let object = value.as_object().ok_or_else(|| {
        TransformError::invalid_argument(format!(
            "input must be a mapping, got {}",
            json_type_name(value)
        ))
    })?;
    Ok(object
        .iter()
        .map(|(key, value)| (key.clone(), ArrayLike::from_json(value)))
        .collect())
}

/// Renders each array as nested JSON lists. Non-finite values become `null`.
pub fn output_to_json(output: &OutputMapping) -> Value {
    Value::Object(
        output
            .iter()
            .map(|(key, array)| (key.clone(), array_to_json(array.view())))
            .collect(),
    )
}

fn array_to_json(view: ArrayViewD<'_, f64>) -> Value {
    if view.ndim() == 0 {
        return view
            .iter()
            .next()
            .and_then(|&value| serde_json::Number::from_f64(value))
            .map_or(Value::Null, Value::Number);
    }
    Value::Array(view.outer_iter().map(array_to_json).collect())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

macro_rules! impl_from_array {
    ($t:ty, $variant:ident) => {
        impl<D: Dimension> From<Array<$t, D>> for ArrayLike {
            fn from(array: Array<$t, D>) -> Self {
                ArrayLike::$variant(array.into_dyn())
            }
        }
    };
}

impl_from_array!(f64, Float64);
impl_from_array!(f32, Float32);
impl_from_array!(i64, Int64);
impl_from_array!(i32, Int32);
impl_from_array!(bool, Bool);
impl_from_array!(String, Text);

impl From<Scalar> for ArrayLike {
    fn from(scalar: Scalar) -> Self {
        ArrayLike::Scalar(scalar)
    }
}

impl From<f64> for ArrayLike {
    fn from(value: f64) -> Self {
        ArrayLike::Scalar(Scalar::Float(value))
    }
}

impl From<f32> for ArrayLike {
    fn from(value: f32) -> Self {
        ArrayLike::Scalar(Scalar::Float(f64::from(value)))
    }
}

impl From<i64> for ArrayLike {
    fn from(value: i64) -> Self {
        ArrayLike::Scalar(Scalar::Int(value))
    }
}

impl From<i32> for ArrayLike {
    fn from(value: i32) -> Self {
        ArrayLike::Scalar(Scalar::Int(i64::from(value)))
    }
}

impl From<bool> for ArrayLike {
    fn from(value: bool) -> Self {
        ArrayLike::Scalar(Scalar::Bool(value))
    }
}

impl From<&str> for ArrayLike {
    fn from(value: &str) -> Self {
        ArrayLike::Scalar(Scalar::Text(value.to_string()))
    }
}

impl<T: Into<ArrayLike>> From<Vec<T>> for ArrayLike {
    fn from(items: Vec<T>) -> Self {
        ArrayLike::Nested(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use serde_json::json;

    #[test]
    fn typed_arrays_widen_to_float64() {
        let ints: ArrayLike = array![1_i32, 2, 3].into();
        let floats: ArrayLike = array![1.5_f32, 2.5].into();
        assert_eq!(ints.to_f64_array().unwrap().into_raw_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(floats.to_f64_array().unwrap().into_raw_vec(), vec![1.5, 2.5]);
    }

    #[test]
    fn nested_sequences_keep_their_shape() {
        let value: ArrayLike = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]].into();
        let array = value.to_f64_array().unwrap();
        assert_eq!(array.shape(), &[3, 2]);
        assert_eq!(array.into_raw_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn nested_sequences_may_hold_arrays_and_bools() {
        let value = ArrayLike::Nested(vec![
            ArrayLike::from(array![1_i64, 2]),
            ArrayLike::from(vec![true, false]),
        ]);
        let array = value.to_f64_array().unwrap();
        assert_eq!(array.shape(), &[2, 2]);
        assert_eq!(array.into_raw_vec(), vec![1.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn empty_sequence_is_one_dimensional() {
        let value = ArrayLike::Nested(Vec::new());
        assert_eq!(value.to_f64_array().unwrap().shape(), &[0]);
    }

    #[test]
    fn scalar_becomes_zero_dimensional() {
        let array = ArrayLike::from(4_i64).to_f64_array().unwrap();
        assert_eq!(array.ndim(), 0);
        assert_eq!(array.iter().next().copied(), Some(4.0));
    }

    #[test]
    fn ragged_sequences_are_rejected() {
        let value: ArrayLike = vec![vec![1.0, 2.0], vec![3.0]].into();
        let err = value.to_f64_array().unwrap_err();
        assert!(matches!(err, CoerceError::Ragged { .. }));
        assert_eq!(err.element_type(), "object");
    }

    #[test]
    fn sequences_of_numeric_text_parse() {
        let listed: ArrayLike = vec!["1", " 2.5 ", "-3e2"].into();
        assert_eq!(listed.to_f64_array().unwrap().into_raw_vec(), vec![1.0, 2.5, -300.0]);

        let nested = ArrayLike::Nested(vec![ArrayLike::from(array![String::from("4")])]);
        assert_eq!(nested.to_f64_array().unwrap().shape(), &[1, 1]);
    }

    #[test]
    fn non_numeric_text_is_rejected() {
        let listed: ArrayLike = vec!["a", "b", "c"].into();
        let err = listed.to_f64_array().unwrap_err();
        assert_eq!(err, CoerceError::InvalidText { text: "a".into() });
        assert_eq!(err.element_type(), "str");

        let typed: ArrayLike = Array2::from_elem((1, 2), String::from("x")).into();
        assert_eq!(
            typed.to_f64_array().unwrap_err(),
            CoerceError::NonNumericArray {
                dtype: "str".into()
            }
        );
    }

    #[test]
    fn missing_values_become_nan() {
        let value = ArrayLike::Nested(vec![ArrayLike::from(1.0), ArrayLike::Scalar(Scalar::None)]);
        let values = value.to_f64_array().unwrap().into_raw_vec();
        assert_eq!(values[0], 1.0);
        assert!(values[1].is_nan());

        let mapping = input_from_json(&json!({"k": [1.0, null]})).unwrap();
        let values = mapping["k"].to_f64_array().unwrap().into_raw_vec();
        assert!(values[1].is_nan());
    }

    #[test]
    fn bool_arrays_are_not_numeric() {
        let value: ArrayLike = array![true, false].into();
        assert!(matches!(
            value.to_f64_array(),
            Err(CoerceError::NonNumericArray { .. })
        ));
    }

    #[test]
    fn json_object_preserves_document_order() {
        let mapping = input_from_json(&json!({"zeta": [1, 2], "alpha": [[1.5], [2.5]]})).unwrap();
        let keys: Vec<&str> = mapping.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
        assert_eq!(mapping["alpha"].to_f64_array().unwrap().shape(), &[2, 1]);
    }

    #[test]
    fn json_non_object_is_invalid_argument() {
        let err = input_from_json(&json!("not a mapping")).unwrap_err();
        assert_eq!(
            err,
            TransformError::InvalidArgument("input must be a mapping, got string".into())
        );
    }

    #[test]
    fn output_renders_nested_lists() {
        let mut output = OutputMapping::new();
        output.insert("m".into(), array![[1.0, 2.0], [3.0, f64::NAN]].into_dyn());
        assert_eq!(output_to_json(&output), json!({"m": [[1.0, 2.0], [3.0, null]]}));
    }
}
