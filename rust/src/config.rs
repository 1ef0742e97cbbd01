//! Process-wide configuration, read once from the environment.

use std::env;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use serde::Deserialize;

use crate::error::ConfigError;

pub const CONFIG_ENV: &str = "PYBASE_CONFIG";
pub const BACKEND_ENV: &str = "PYBASE_BACKEND";
pub const PARALLEL_MIN_ENV: &str = "PYBASE_PARALLEL_MIN_ELEMENTS";
pub const THREADS_ENV: &str = "PYBASE_THREADS";

pub const DEFAULT_PARALLEL_MIN_ELEMENTS: usize = 1 << 15;

/// How the native backend is selected at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Load the native backend when the CPU offers SIMD lanes.
    #[default]
    Auto,
    /// Load the native backend regardless of detected CPU features.
    Force,
    /// Never load the native backend.
    Disable,
}

impl BackendMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Some(BackendMode::Auto),
            "1" | "true" | "on" | "force" | "native" => Some(BackendMode::Force),
            "0" | "false" | "off" | "disable" | "portable" => Some(BackendMode::Disable),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            BackendMode::Auto => "auto",
            BackendMode::Force => "force",
            BackendMode::Disable => "disable",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TransformConfig {
    #[serde(default)]
    pub backend: BackendMode,
    #[serde(default = "default_parallel_min_elements")]
    pub parallel_min_elements: usize,
    /// Worker threads for the native backend; `None` lets rayon decide.
    #[serde(default)]
    pub threads: Option<usize>,
}

const fn default_parallel_min_elements() -> usize {
    DEFAULT_PARALLEL_MIN_ELEMENTS
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            backend: BackendMode::Auto,
            parallel_min_elements: DEFAULT_PARALLEL_MIN_ELEMENTS,
            threads: None,
        }
    }
}

impl TransformConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    ///
    /// The JSON file named by `PYBASE_CONFIG` is applied first; individual
    /// variables override it. Unusable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_ENV) {
            Some(path) => Self::load_file(Path::new(&path)).unwrap_or_else(|err| {
                tracing::warn!(path = %path, error = %err, "ignoring transform config file");
                Self::default()
            }),
            None => Self::default(),
        };

        if let Some(value) = lookup(BACKEND_ENV) {
            match BackendMode::parse(&value) {
                Some(mode) => config.backend = mode,
                None => tracing::warn!(value = %value, "unrecognised {BACKEND_ENV} value"),
            }
        }
        if let Some(value) = lookup(PARALLEL_MIN_ENV) {
            match value.trim().parse::<usize>() {
                Ok(min) => config.parallel_min_elements = min,
                Err(_) => tracing::warn!(value = %value, "unrecognised {PARALLEL_MIN_ENV} value"),
            }
        }
        if let Some(value) = lookup(THREADS_ENV) {
            match value.trim().parse::<usize>() {
                Ok(threads) if threads > 0 => config.threads = Some(threads),
                _ => tracing::warn!(value = %value, "unrecognised {THREADS_ENV} value"),
            }
        }
        config
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(Self::from_json_str(&text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

static CONFIG: OnceLock<TransformConfig> = OnceLock::new();

/// Configuration of the running process.
pub fn global() -> &'static TransformConfig {
    CONFIG.get_or_init(TransformConfig::from_env)
}
