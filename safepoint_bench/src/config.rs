//! Benchmark configuration resolved once at startup.
//!
//! With no environment variables set, the configuration is the fixed
//! demonstration: 1024×1024 operands, native probe, no statistics dump.
//!
//! | Variable                   | Effect                              |
//! |----------------------------|-------------------------------------|
//! | `SAFEPOINT_BENCH_SIZE`     | matrix dimension, 1..=`MAX_SIZE`    |
//! | `SAFEPOINT_BENCH_VERBOSE`  | print controller statistics at end  |
//! | `SAFEPOINT_BENCH_PROBE`    | `native` or `volatile`              |

use safepoint_poll::Matrix;

/// Default matrix dimension.
pub const DEFAULT_SIZE: usize = 1024;

/// Largest accepted dimension. Three operands of this size take 6 GiB.
pub const MAX_SIZE: usize = 16 * 1024;

// =============================================================================
// ProbeKind
// =============================================================================

/// Probe used by the test-polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeKind {
    /// Architecture-specific instruction.
    #[default]
    Native,
    /// Portable volatile read.
    Volatile,
}

impl ProbeKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "native" | "test" | "asm" => Some(ProbeKind::Native),
            "volatile" | "portable" => Some(ProbeKind::Volatile),
            _ => None,
        }
    }
}

// =============================================================================
// BenchConfig
// =============================================================================

/// Complete harness configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchConfig {
    /// Side length of A, B and C.
    pub size: usize,

    /// Print the statistics summary after the sequence.
    pub verbose: bool,

    /// Probe for the test-polling loop.
    pub probe: ProbeKind,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_SIZE,
            verbose: false,
            probe: ProbeKind::Native,
        }
    }
}

impl BenchConfig {
    /// Resolve from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Resolve through `lookup`. Unset or malformed values keep the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let size = lookup("SAFEPOINT_BENCH_SIZE")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| Self::size_fits(n))
            .unwrap_or(defaults.size);

        let verbose = lookup("SAFEPOINT_BENCH_VERBOSE")
            .map(|v| Self::truthy(&v))
            .unwrap_or(defaults.verbose);

        let probe = lookup("SAFEPOINT_BENCH_PROBE")
            .and_then(|v| ProbeKind::parse(&v))
            .unwrap_or(defaults.probe);

        Self {
            size,
            verbose,
            probe,
        }
    }

    /// Positive, at most [`MAX_SIZE`], and the bytes of A, B and C fit in `usize`.
    fn size_fits(n: usize) -> bool {
        n > 0
            && n <= MAX_SIZE
            && Matrix::cells(n)
                .and_then(|cells| cells.checked_mul(3 * size_of::<f64>()))
                .is_some()
    }

    /// Non-empty and not `0`.
    #[inline]
    fn truthy(value: &str) -> bool {
        !value.is_empty() && value != "0"
    }
}

// =============================================================================
// Tests
// =============================================================================
