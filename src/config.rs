//! Context configuration.
//!
//! A [`ContextConfig`] is handed to [`Context::host`](crate::api::Context::host)
//! (or the `wgpu` constructor) and fixes, for the lifetime of the context:
//!
//! - the numeric [`Precision`] profile, which selects the upper-bound epsilon
//!   used by `rand_like` and whether the device rounds results to binary16,
//! - how many dispatches may accumulate before the context flushes to the queue,
//! - whether the host-emulated device rejects accesses without a barrier,
//! - the base seed of the per-dispatch seed stream.
//!
//! Every field can also be overridden from the environment through
//! [`ContextConfig::from_env`].

use crate::api::DeviceLimits;

/// Numeric precision profile of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    /// 32-bit float execution.
    #[default]
    Full,
    /// 16-bit float execution.
    Reduced,
}

impl Precision {
    /// Amount subtracted from a nominal upper bound so that sampled values
    /// never reach it at this precision.
    pub const fn epsilon(self) -> f32 {
        match self {
            Precision::Full => 1.192_092_9e-7,
            Precision::Reduced => 0.000_976_562_5,
        }
    }

    /// Rounds `value` to the working precision.
    #[inline]
    pub fn round(self, value: f32) -> f32 {
        match self {
            Precision::Full => value,
            Precision::Reduced => half::f16::from_f32(value).to_f32(),
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "full" | "fp32" | "f32" => Some(Precision::Full),
            "reduced" | "fp16" | "f16" | "half" => Some(Precision::Reduced),
            _ => None,
        }
    }
}

/// Default number of dispatches recorded before a lazy flush.
pub const DEFAULT_MAX_PENDING_DISPATCHES: usize = 16;

/// Configuration of a compute [`Context`](crate::api::Context).
#[derive(Debug, Clone, PartialEq)]
pub struct ContextConfig {
    /// Numeric precision profile.
    pub precision: Precision,
    /// Dispatches batched before the context submits to the device queue.
    pub max_pending_dispatches: usize,
    /// Reject storage accesses that lack a needed barrier (host device only).
    pub validate_barriers: bool,
    /// Base of the per-dispatch seed stream handed to random kernels.
    pub seed: u64,
    /// Limits reported by the host-emulated device.
    pub host_limits: DeviceLimits,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            precision: Precision::Full,
            max_pending_dispatches: DEFAULT_MAX_PENDING_DISPATCHES,
            validate_barriers: true,
            seed: 0x5eed_0f_b41e,
            host_limits: DeviceLimits::default(),
        }
    }
}

impl ContextConfig {
    /// Creates a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the precision profile.
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    /// Sets the flush threshold. Zero is treated as one.
    pub fn with_max_pending(mut self, dispatches: usize) -> Self {
        self.max_pending_dispatches = dispatches.max(1);
        self
    }

    /// Enables or disables barrier validation.
    pub fn with_barrier_validation(mut self, enabled: bool) -> Self {
        self.validate_barriers = enabled;
        self
    }

    /// Sets the base seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the limits of the host-emulated device.
    pub fn with_host_limits(mut self, limits: DeviceLimits) -> Self {
        self.host_limits = limits;
        self
    }

    /// Default config with overrides from `BRINY_PRECISION`,
    /// `BRINY_MAX_PENDING`, `BRINY_SEED` and `BRINY_VALIDATE_BARRIERS`.
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `var`.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(val) = var("BRINY_PRECISION") {
            match Precision::parse(&val) {
                Some(precision) => config.precision = precision,
                None => log::warn!("ignoring BRINY_PRECISION={val:?}"),
            }
        }
        if let Some(val) = var("BRINY_MAX_PENDING") {
            match val.trim().parse::<usize>() {
                Ok(parsed) => config = config.with_max_pending(parsed),
                Err(e) => log::warn!("ignoring BRINY_MAX_PENDING={val:?}: {e}"),
            }
        }
        if let Some(val) = var("BRINY_SEED") {
            match val.trim().parse::<u64>() {
                Ok(parsed) => config.seed = parsed,
                Err(e) => log::warn!("ignoring BRINY_SEED={val:?}: {e}"),
            }
        }
        if let Some(val) = var("BRINY_VALIDATE_BARRIERS") {
            match val.trim() {
                "0" | "false" | "off" => config.validate_barriers = false,
                "1" | "true" | "on" => config.validate_barriers = true,
                _ => log::warn!("ignoring BRINY_VALIDATE_BARRIERS={val:?}"),
            }
        }
        config
    }
}
