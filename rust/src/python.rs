//! Python bindings for the `_transform` extension module.
//!
//! Argument checks that Rust's types make unnecessary (non-dict input,
//! non-str keys) happen here. Fallback events become `UserWarning`s.

use ndarray::{ArrayD, IxDyn};
use numpy::{
    PyArrayDescrMethods, PyArrayDyn, PyReadonlyArrayDyn, PyUntypedArray, PyUntypedArrayMethods,
};
use pyo3::exceptions::{PyRuntimeError, PyTypeError, PyUserWarning, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyList, PyLong, PyModule, PyString, PyTuple};

use crate::array::{ArrayLike, InputMapping, Scalar};
use crate::engine::{Engine, FallbackEvent};
use crate::error::TransformError;
use crate::{backend, config, get_version, metrics, DEFAULT_SCALE_FACTOR, DEFAULT_SUFFIX};

impl From<TransformError> for PyErr {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::InvalidArgument(message) => PyValueError::new_err(message),
            TransformError::TypeMismatch { message, .. } => PyTypeError::new_err(message),
            TransformError::Backend(err) => PyRuntimeError::new_err(err.to_string()),
        }
    }
}

fn type_name(value: &Bound<'_, PyAny>) -> String {
    value
        .get_type()
        .name()
        .map(|name| name.to_string())
        .unwrap_or_else(|_| "object".to_string())
}

fn expect_str(argument: &str, value: &Bound<'_, PyAny>) -> PyResult<String> {
    if !value.is_instance_of::<PyString>() {
        return Err(TransformError::invalid_argument(format!(
            "{argument} must be a string, got {}",
            type_name(value)
        ))
        .into());
    }
    value.extract()
}

/// `create_new_key`'s suffix: an explicit `None` is a value, not an omission.
enum SuffixArg<'py> {
    Omitted,
    Given(Bound<'py, PyAny>),
}

impl<'py> FromPyObject<'py> for SuffixArg<'py> {
    fn extract_bound(ob: &Bound<'py, PyAny>) -> PyResult<Self> {
        Ok(SuffixArg::Given(ob.clone()))
    }
}

fn extract_array_like(value: &Bound<'_, PyAny>) -> PyResult<ArrayLike> {
    if let Ok(array) = value.downcast::<PyUntypedArray>() {
        return extract_numpy(array);
    }
    if value.is_none() {
        return Ok(Scalar::None.into());
    }
    if value.is_instance_of::<PyBool>() {
        return Ok(Scalar::Bool(value.extract()?).into());
    }
    if value.is_instance_of::<PyString>() {
        return Ok(Scalar::Text(value.extract()?).into());
    }
    if value.is_instance_of::<PyLong>() {
        if let Ok(int) = value.extract::<i64>() {
            return Ok(Scalar::Int(int).into());
        }
    }
    if value.is_instance_of::<PyList>() || value.is_instance_of::<PyTuple>() {
        let items = value
            .iter()?
            .map(|item| item.and_then(|item| extract_array_like(&item)))
            .collect::<PyResult<Vec<_>>>()?;
        return Ok(ArrayLike::Nested(items));
    }
    if let Ok(float) = value.extract::<f64>() {
        return Ok(Scalar::Float(float).into());
    }
    Ok(Scalar::Opaque(type_name(value)).into())
}

fn extract_numpy(array: &Bound<'_, PyUntypedArray>) -> PyResult<ArrayLike> {
    if let Ok(view) = array.extract::<PyReadonlyArrayDyn<'_, f64>>() {
        return Ok(ArrayLike::Float64(view.as_array().to_owned()));
    }
    if let Ok(view) = array.extract::<PyReadonlyArrayDyn<'_, f32>>() {
        return Ok(ArrayLike::Float32(view.as_array().to_owned()));
    }
    if let Ok(view) = array.extract::<PyReadonlyArrayDyn<'_, i64>>() {
        return Ok(ArrayLike::Int64(view.as_array().to_owned()));
    }
    if let Ok(view) = array.extract::<PyReadonlyArrayDyn<'_, i32>>() {
        return Ok(ArrayLike::Int32(view.as_array().to_owned()));
    }
    if let Ok(view) = array.extract::<PyReadonlyArrayDyn<'_, bool>>() {
        return Ok(ArrayLike::Bool(view.as_array().to_owned()));
    }

    match array.dtype().kind() {
        b'f' | b'i' | b'u' => {
            let widened = array.call_method1("astype", ("float64",))?;
            let view = widened.extract::<PyReadonlyArrayDyn<'_, f64>>()?;
            Ok(ArrayLike::Float64(view.as_array().to_owned()))
        }
        b'U' | b'S' => {
            let shape = array.shape().to_vec();
            let items: Vec<String> = array
                .call_method1("astype", ("U",))?
                .call_method0("ravel")?
                .call_method0("tolist")?
                .extract()?;
            ArrayD::from_shape_vec(IxDyn(&shape), items)
                .map(ArrayLike::Text)
                .map_err(|err| PyValueError::new_err(err.to_string()))
        }
        _ => extract_array_like(&array.call_method0("tolist")?),
    }
}

fn warn_fallbacks(py: Python<'_>, events: &[FallbackEvent]) -> PyResult<()> {
    for event in events {
        PyErr::warn_bound(
            py,
            &py.get_type_bound::<PyUserWarning>(),
            &event.to_string(),
            1,
        )?;
    }
    Ok(())
}

#[pyfunction(name = "transform")]
fn transform_py<'py>(py: Python<'py>, input_dict: &Bound<'py, PyAny>) -> PyResult<Bound<'py, PyDict>> {
    let dict = input_dict.downcast::<PyDict>().map_err(|_| {
        TransformError::invalid_argument(format!(
            "input must be a mapping, got {}",
            type_name(input_dict)
        ))
    })?;

    let mut input = InputMapping::with_capacity(dict.len());
    for (key, value) in dict.iter() {
        if !key.is_instance_of::<PyString>() {
            return Err(TransformError::invalid_argument(format!(
                "keys must be strings, got {}",
                type_name(&key)
            ))
            .into());
        }
        input.insert(key.extract()?, extract_array_like(&value)?);
    }

    let mut events = Vec::new();
    let output = py.allow_threads(|| {
        Engine::global().transform_with(&input, &mut |event| events.push(event.clone()))
    })?;
    warn_fallbacks(py, &events)?;

    let result = PyDict::new_bound(py);
    for (key, array) in output {
        result.set_item(key, PyArrayDyn::from_owned_array_bound(py, array))?;
    }
    Ok(result)
}

#[pyfunction(name = "scale_array")]
#[pyo3(signature = (arr, factor = DEFAULT_SCALE_FACTOR))]
fn scale_array_py<'py>(
    py: Python<'py>,
    arr: &Bound<'py, PyAny>,
    factor: f64,
) -> PyResult<Bound<'py, PyArrayDyn<f64>>> {
    let value = extract_array_like(arr)?;
    let mut events = Vec::new();
    let scaled = py.allow_threads(|| {
        Engine::global().scale_array_with(&value, factor, &mut |event| events.push(event.clone()))
    })?;
    warn_fallbacks(py, &events)?;
    Ok(PyArrayDyn::from_owned_array_bound(py, scaled))
}

#[pyfunction(name = "create_new_key")]
#[pyo3(signature = (key, suffix = SuffixArg::Omitted))]
fn create_new_key_py<'py>(
    py: Python<'py>,
    key: &Bound<'py, PyAny>,
    suffix: SuffixArg<'py>,
) -> PyResult<String> {
    let key = expect_str("key", key)?;
    let suffix = match suffix {
        SuffixArg::Given(suffix) => expect_str("suffix", &suffix)?,
        SuffixArg::Omitted => DEFAULT_SUFFIX.to_string(),
    };
    let mut events = Vec::new();
    let new_key = Engine::global()
        .create_new_key_with(&key, &suffix, &mut |event| events.push(event.clone()))?;
    warn_fallbacks(py, &events)?;
    Ok(new_key)
}

#[pyfunction(name = "get_backend_availability")]
fn get_backend_availability_py() -> bool {
    Engine::global().native_available()
}

#[pyfunction(name = "get_version")]
fn get_version_py() -> &'static str {
    get_version()
}

#[pyfunction(name = "backend_info")]
fn backend_info_py(py: Python<'_>) -> PyResult<Bound<'_, PyDict>> {
    let engine = Engine::global();
    let info = PyDict::new_bound(py);
    info.set_item("available", engine.native_available())?;
    info.set_item("preferred_backend", engine.preferred_backend())?;
    info.set_item(
        "probe_error",
        engine.probe_error().map(|error| error.to_string()),
    )?;
    info.set_item("cpu", backend::capabilities().to_string())?;

    let settings = config::global();
    let config_dict = PyDict::new_bound(py);
    config_dict.set_item("backend", settings.backend.label())?;
    config_dict.set_item("parallel_min_elements", settings.parallel_min_elements)?;
    config_dict.set_item("threads", settings.threads)?;
    info.set_item("config", config_dict)?;

    let usage = PyList::empty_bound(py);
    for entry in metrics::snapshot() {
        let entry_dict = PyDict::new_bound(py);
        entry_dict.set_item("operation", entry.operation)?;
        entry_dict.set_item("backend", entry.backend)?;
        entry_dict.set_item("status", entry.status)?;
        entry_dict.set_item("count", entry.count)?;
        usage.append(entry_dict)?;
    }
    info.set_item("usage", usage)?;
    Ok(info)
}

/// Python module initialization for `_transform`.
#[pymodule]
fn _transform(py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_wrapped(pyo3::wrap_pyfunction!(transform_py))?;
    m.add_wrapped(pyo3::wrap_pyfunction!(scale_array_py))?;
    m.add_wrapped(pyo3::wrap_pyfunction!(create_new_key_py))?;
    m.add_wrapped(pyo3::wrap_pyfunction!(get_backend_availability_py))?;
    m.add_wrapped(pyo3::wrap_pyfunction!(get_version_py))?;
    m.add_wrapped(pyo3::wrap_pyfunction!(backend_info_py))?;

    m.add("__version__", get_version())?;
    m.add(
        "__doc__",
        "Dictionary array scaling with a native backend and a portable fallback.",
    )?;

    if !Engine::global().native_available() {
        PyErr::warn_bound(
            py,
            &py.get_type_bound::<PyUserWarning>(),
            "native transform backend not available, using portable fallback",
            1,
        )?;
    }
    Ok(())
}

pub fn init_test_module(py: Python<'_>, module: &Bound<'_, PyModule>) -> PyResult<()> {
    _transform(py, module)
}
