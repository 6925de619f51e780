//! Retry delay computation
//!
//! Exponential backoff relative to a configured cooldown unit, capped at
//! [`MAX_BACKOFF_MULTIPLIER`] times that unit, with a bounded jitter band of
//! ±15%. The default jitter source is a hash of `(key, attempt)` so that the
//! same fingerprint always waits the same amount for the same attempt.

use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on the backoff, as a multiple of the cooldown unit.
pub const MAX_BACKOFF_MULTIPLIER: u32 = 6;

/// Jitter multiplier at a normalized sample of 0.
pub const JITTER_FLOOR: f64 = 0.85;

/// Jitter multiplier at a normalized sample of 1.
pub const JITTER_CEIL: f64 = 1.15;

/// Produces a jitter sample in `[0, 1)`.
///
/// Out-of-range samples are tolerated; [`BackoffDelayPolicy`] clamps them.
pub trait JitterSource: Send + Sync {
    fn sample(&self, key: &str, attempt: u32) -> f64;
}

/// Any `Fn() -> f64` closure can stand in as a one-off jitter source.
impl<F> JitterSource for F
where
    F: Fn() -> f64 + Send + Sync,
{
    fn sample(&self, _key: &str, _attempt: u32) -> f64 {
        self()
    }
}

/// Default source: SHA-256 of the key and attempt, reduced to `[0, 1)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintJitter;

impl JitterSource for FingerprintJitter {
    fn sample(&self, key: &str, attempt: u32) -> f64 {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(attempt.to_be_bytes());
        let digest = hasher.finalize();

        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        // 53 significant bits fit an f64 mantissa exactly.
        let bits = u64::from_be_bytes(prefix) >> 11;
        bits as f64 / (1u64 << 53) as f64
    }
}

/// Thread-RNG jitter. Opt-in only; breaks the same-inputs-same-delay guarantee.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&self, _key: &str, _attempt: u32) -> f64 {
        rand::rng().random_range(0.0..1.0)
    }
}

/// Constant sample, mostly for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&self, _key: &str, _attempt: u32) -> f64 {
        self.0
    }
}

/// Computes the wait before the next recovery attempt.
#[derive(Clone)]
pub struct BackoffDelayPolicy {
    cooldown: Duration,
    jitter: Arc<dyn JitterSource>,
}

impl std::fmt::Debug for BackoffDelayPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffDelayPolicy")
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

impl BackoffDelayPolicy {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            jitter: Arc::new(FingerprintJitter),
        }
    }

    /// Replace the default (hash-derived) jitter source.
    pub fn with_jitter(mut self, jitter: impl JitterSource + 'static) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Largest delay this policy will ever return.
    pub fn max_delay(&self) -> Duration {
        self.cooldown * MAX_BACKOFF_MULTIPLIER
    }

    /// Delay for `attempt` (1-based; 0 is treated as 1) using the configured source.
    pub fn compute_delay(&self, key: &str, attempt: u32) -> Duration {
        self.compute_delay_with(key, attempt, self.jitter.as_ref())
    }

    /// Delay for `attempt` with an explicit jitter source, sampled exactly once.
    pub fn compute_delay_with(&self, key: &str, attempt: u32, jitter: &dyn JitterSource) -> Duration {
        let attempt = attempt.max(1);
        let base_ms = self.cooldown.as_millis() as f64;
        let ceiling_ms = base_ms * f64::from(MAX_BACKOFF_MULTIPLIER);

        // 2^(attempt-1) passes the ceiling long before the exponent matters.
        let exponent = (attempt - 1).min(16) as i32;
        let capped_ms = (base_ms * 2f64.powi(exponent)).min(ceiling_ms);

        let multiplier = jitter_multiplier(jitter.sample(key, attempt));
        let delay_ms = (capped_ms * multiplier).round().clamp(base_ms, ceiling_ms);

        tracing::trace!(
            key,
            attempt,
            capped_ms,
            multiplier,
            delay_ms,
            "Computed recovery backoff"
        );

        Duration::from_millis(delay_ms as u64)
    }
}

/// Map a raw sample linearly onto `[JITTER_FLOOR, JITTER_CEIL]`.
fn jitter_multiplier(sample: f64) -> f64 {
    let normalized = if sample.is_nan() {
        0.0
    } else {
        sample.clamp(0.0, 1.0)
    };
    JITTER_FLOOR + (JITTER_CEIL - JITTER_FLOOR) * normalized
}
