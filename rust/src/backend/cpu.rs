use std::fmt;
use std::sync::OnceLock;

pub const SIMD_MAX_ENV: &str = "PYBASE_SIMD_MAX";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuCapabilities {
    pub arch: &'static str,
    pub avx512: bool,
    pub avx2: bool,
    pub sse2: bool,
    pub neon: bool,
    pub lane_width_bits: usize,
}

impl CpuCapabilities {
    pub fn feature_level(&self) -> &'static str {
        if self.avx512 {
            "avx512"
        } else if self.avx2 {
            "avx2"
        } else if self.neon {
            "neon"
        } else if self.sse2 {
            "sse2"
        } else {
            "scalar"
        }
    }

    pub fn has_simd(&self) -> bool {
        self.lane_width_bits >= 128
    }

    /// Applies a `PYBASE_SIMD_MAX` cap such as `scalar` or `sse2`.
    pub fn capped(mut self, max: &str) -> Self {
        match max.trim().to_ascii_lowercase().as_str() {
            "scalar" | "none" => {
                self.avx512 = false;
                self.avx2 = false;
                self.sse2 = false;
                self.neon = false;
            }
            "avx2" => {
                self.avx512 = false;
            }
            "sse2" | "neon" => {
                self.avx512 = false;
                self.avx2 = false;
            }
            _ => {}
        }
        self.lane_width_bits = lane_width(&self);
        self
    }
}

impl fmt::Display for CpuCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} (lane={}b)",
            self.arch,
            self.feature_level(),
            self.lane_width_bits
        )
    }
}

static CAPABILITIES: OnceLock<CpuCapabilities> = OnceLock::new();

pub fn capabilities() -> &'static CpuCapabilities {
    CAPABILITIES.get_or_init(|| {
        let caps = detect();
        match std::env::var(SIMD_MAX_ENV) {
            Ok(max) => caps.capped(&max),
            Err(_) => caps,
        }
    })
}

fn lane_width(caps: &CpuCapabilities) -> usize {
    if caps.avx512 {
        512
    } else if caps.avx2 {
        256
    } else if caps.neon || caps.sse2 {
        128
    } else {
        64
    }
}

#[cfg(target_arch = "x86_64")]
fn detect() -> CpuCapabilities {
    let mut caps = CpuCapabilities {
        arch: "x86_64",
        avx512: std::arch::is_x86_feature_detected!("avx512f"),
        avx2: std::arch::is_x86_feature_detected!("avx2"),
        sse2: std::arch::is_x86_feature_detected!("sse2"),
        neon: false,
        lane_width_bits: 0,
    };
    caps.lane_width_bits = lane_width(&caps);
    caps
}

#[cfg(target_arch = "aarch64")]
fn detect() -> CpuCapabilities {
    CpuCapabilities {
        arch: "aarch64",
        avx512: false,
        avx2: false,
        sse2: false,
        neon: true,
        lane_width_bits: 128,
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn detect() -> CpuCapabilities {
    CpuCapabilities {
        arch: "generic",
        avx512: false,
        avx2: false,
        sse2: false,
        neon: false,
        lane_width_bits: 64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_cap_disables_simd() {
        let caps = detect().capped("scalar");
        assert!(!caps.has_simd());
        assert_eq!(caps.feature_level(), "scalar");
        assert_eq!(caps.lane_width_bits, 64);
    }

    #[test]
    fn unknown_cap_keeps_detection() {
        let detected = detect();
        assert_eq!(detected.capped("whatever"), detected);
    }

    #[test]
    fn display_names_arch_and_level() {
        let text = detect().to_string();
        assert!(text.contains(detect().arch));
        assert!(text.contains("lane="));
    }
}
