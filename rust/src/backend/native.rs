use std::sync::OnceLock;

use ndarray::{ArrayD, ArrayViewD, ShapeBuilder};
use rayon::prelude::*;
use wide::f64x4;

use super::cpu::{self, CpuCapabilities};
use super::{collect_output, Backend};
use crate::array::{OutputMapping, ValidatedMapping};
use crate::config::{BackendMode, TransformConfig, BACKEND_ENV};
use crate::error::BackendError;
use crate::{DEFAULT_SUFFIX, TRANSFORM_FACTOR};

const LANES: usize = 4;
const PARALLEL_CHUNK: usize = 1 << 14;

/// Accelerated backend: `f64x4` lanes, with large arrays split across a
/// rayon pool.
///
/// Only contiguous arrays of rank one or more are accepted. Everything else
/// is refused so the engine can hand the call to the portable backend.
#[derive(Debug)]
pub struct NativeBackend {
    caps: CpuCapabilities,
    parallel_min_elements: usize,
    pool: Option<&'static rayon::ThreadPool>,
}

impl NativeBackend {
    /// Probes the running CPU and loads the backend if `config` allows it.
    pub fn load(config: &TransformConfig) -> Result<Self, BackendError> {
        Self::load_with(config, cpu::capabilities())
    }

    pub fn load_with(config: &TransformConfig, caps: &CpuCapabilities) -> Result<Self, BackendError> {
        match config.backend {
            BackendMode::Disable => {
                return Err(BackendError::Unavailable(format!(
                    "disabled by {BACKEND_ENV}={}",
                    config.backend.label()
                )));
            }
            BackendMode::Auto if !caps.has_simd() => {
                return Err(BackendError::Unavailable(format!(
                    "no SIMD support detected on {caps}"
                )));
            }
            BackendMode::Auto | BackendMode::Force => {}
        }
        Ok(Self {
            caps: *caps,
            parallel_min_elements: config.parallel_min_elements,
            pool: thread_pool(config.threads),
        })
    }

    pub fn capabilities(&self) -> &CpuCapabilities {
        &self.caps
    }

    pub fn parallel_min_elements(&self) -> usize {
        self.parallel_min_elements
    }

    fn scale_slice(&self, input: &[f64], factor: f64, out: &mut [f64]) {
        match self.pool {
            Some(pool) if input.len() >= self.parallel_min_elements => pool.install(|| {
                input
                    .par_chunks(PARALLEL_CHUNK)
                    .zip(out.par_chunks_mut(PARALLEL_CHUNK))
                    .for_each(|(src, dst)| scale_lanes(src, factor, dst));
            }),
            _ => scale_lanes(input, factor, out),
        }
    }
}

impl Backend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn scale(&self, array: ArrayViewD<'_, f64>, factor: f64) -> Result<ArrayD<f64>, BackendError> {
        if array.ndim() == 0 {
            return Err(BackendError::ZeroDimensional);
        }
        if !factor.is_finite() {
            return Err(BackendError::NonFiniteFactor(factor));
        }
        let fortran = !array.is_standard_layout();
        let input = if fortran {
            array
                .t()
                .is_standard_layout()
                .then(|| array.as_slice_memory_order())
                .flatten()
        } else {
            array.as_slice()
        }
        .ok_or(BackendError::NonContiguous)?;

        let mut out = vec![0.0; input.len()];
        self.scale_slice(input, factor, &mut out);

        let shape = array.raw_dim();
        let result = if fortran {
            ArrayD::from_shape_vec(shape.f(), out)
        } else {
            ArrayD::from_shape_vec(shape, out)
        };
        result.map_err(|err| BackendError::Shape(err.to_string()))
    }

    fn create_new_key(&self, key: &str, suffix: &str) -> Result<String, BackendError> {
        let mut new_key = String::with_capacity(key.len() + suffix.len());
        new_key.push_str(key);
        new_key.push_str(suffix);
        Ok(new_key)
    }

    fn transform(&self, input: &ValidatedMapping) -> Result<OutputMapping, BackendError> {
        let entries: Vec<(&String, &ArrayD<f64>)> = input.iter().collect();
        let total: usize = entries.iter().map(|(_, array)| array.len()).sum();
        let derive = |&(key, array): &(&String, &ArrayD<f64>)| -> Result<(String, ArrayD<f64>), BackendError> {
            Ok((
                self.create_new_key(key, DEFAULT_SUFFIX)?,
                self.scale(array.view(), TRANSFORM_FACTOR)?,
            ))
        };
        let scaled = match self.pool {
            Some(pool) if entries.len() > 1 && total >= self.parallel_min_elements => {
                pool.install(|| entries.par_iter().map(derive).collect::<Result<Vec<_>, _>>())?
            }
            _ => entries.iter().map(derive).collect::<Result<Vec<_>, _>>()?,
        };
        Ok(collect_output(scaled))
    }
}

fn scale_lanes(input: &[f64], factor: f64, out: &mut [f64]) {
    let factor_vec = f64x4::splat(factor);
    let mut src = input.chunks_exact(LANES);
    let mut dst = out.chunks_exact_mut(LANES);
    for (s, d) in src.by_ref().zip(dst.by_ref()) {
        let lanes = f64x4::new([s[0], s[1], s[2], s[3]]);
        d.copy_from_slice(&(lanes * factor_vec).to_array());
    }
    for (d, &value) in dst.into_remainder().iter_mut().zip(src.remainder()) {
        *d = value * factor;
    }
}

/// Shared by every native backend in the process; the first configuration
/// to ask decides the thread count.
fn thread_pool(threads: Option<usize>) -> Option<&'static rayon::ThreadPool> {
    static POOL: OnceLock<Option<rayon::ThreadPool>> = OnceLock::new();
    POOL.get_or_init(|| {
        let builder = match threads {
            Some(threads) => rayon::ThreadPoolBuilder::new().num_threads(threads),
            None => rayon::ThreadPoolBuilder::new(),
        };
        match builder.thread_name(|idx| format!("pybase-native-{idx}")).build() {
            Ok(pool) if pool.current_num_threads() > 1 => Some(pool),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(error = %err, "native thread pool unavailable, scaling sequentially");
                None
            }
        }
    })
    .as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PortableBackend;
    use ndarray::{arr0, Array, Array2, IxDyn};

    fn forced(parallel_min_elements: usize) -> NativeBackend {
        let config = TransformConfig {
            backend: BackendMode::Force,
            parallel_min_elements,
            threads: None,
        };
        NativeBackend::load(&config).expect("forced native backend loads")
    }

    #[test]
    fn lanes_match_scalar_multiply_including_remainder() {
        let input: Vec<f64> = (0..11).map(|v| v as f64 * 1.25).collect();
        let mut out = vec![0.0; input.len()];
        scale_lanes(&input, 0.3, &mut out);
        let expected: Vec<f64> = input.iter().map(|v| v * 0.3).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn parallel_path_matches_portable() {
        let backend = forced(0);
        let input = Array::linspace(-50.0, 50.0, 3 * PARALLEL_CHUNK + 7).into_dyn();
        let native = backend.scale(input.view(), 0.3).unwrap();
        let portable = PortableBackend.scale(input.view(), 0.3).unwrap();
        assert_eq!(native, portable);
    }

    #[test]
    fn fortran_order_is_preserved() {
        let backend = forced(usize::MAX);
        let matrix = Array2::from_shape_vec((2, 3).f(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]).unwrap();
        let scaled = backend.scale(matrix.view().into_dyn(), 2.0).unwrap();
        assert_eq!(
            scaled,
            ndarray::array![[2.0, 4.0, 6.0], [8.0, 10.0, 12.0]].into_dyn()
        );
    }

    #[test]
    fn refuses_what_it_cannot_accelerate() {
        let backend = forced(usize::MAX);
        let scalar = arr0(1.0).into_dyn();
        assert_eq!(
            backend.scale(scalar.view(), 0.3),
            Err(BackendError::ZeroDimensional)
        );

        let row = ndarray::array![1.0, 2.0, 3.0, 4.0];
        assert_eq!(
            backend.scale(row.view().into_dyn(), f64::INFINITY),
            Err(BackendError::NonFiniteFactor(f64::INFINITY))
        );

        let strided = row.slice(ndarray::s![..;2]).into_dyn();
        assert_eq!(
            backend.scale(strided, 0.3),
            Err(BackendError::NonContiguous)
        );
    }

    #[test]
    fn disabled_mode_reports_unavailable() {
        let config = TransformConfig {
            backend: BackendMode::Disable,
            ..TransformConfig::default()
        };
        let err = NativeBackend::load(&config).unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(reason) if reason.contains(BACKEND_ENV)));
    }

    #[test]
    fn auto_mode_requires_simd_lanes() {
        let scalar_only = cpu::capabilities().capped("scalar");
        let err = NativeBackend::load_with(&TransformConfig::default(), &scalar_only).unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));

        let config = TransformConfig {
            backend: BackendMode::Force,
            ..TransformConfig::default()
        };
        assert!(NativeBackend::load_with(&config, &scalar_only).is_ok());
    }

    #[test]
    fn transform_runs_entries_in_parallel_and_keeps_order() {
        let backend = forced(0);
        let mut input = ValidatedMapping::new();
        for idx in 0..8 {
            input.insert(format!("k{idx}"), Array::from_elem(IxDyn(&[3]), idx as f64));
        }
        let output = backend.transform(&input).unwrap();
        let keys: Vec<&str> = output.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["k0_new", "k1_new", "k2_new", "k3_new", "k4_new", "k5_new", "k6_new", "k7_new"]);
        assert_eq!(output["k5_new"], Array::from_elem(IxDyn(&[3]), 5.0 * 0.3));
    }
}
