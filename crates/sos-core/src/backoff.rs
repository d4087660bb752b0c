//! Exponential reconnect backoff.
//!
//! Pure math only. Callers supply randomness so delays are testable.

use std::time::Duration;

/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Exponential delay for zero-based `attempt`, capped at `max_delay_ms`,
/// with symmetric jitter.
///
/// `random` should be in `[0.0, 1.0)`; it maps onto `[-jitter, +jitter]`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    let with_jitter = (capped as f64) * jitter;

    (with_jitter.round().max(0.0) as u64).min(max_delay_ms)
}

/// Stateful backoff for reconnect loops.
#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter_factor: f64,
    attempt: u32,
}

impl Backoff {
    /// Backoff starting at `initial` and never exceeding `max`.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            jitter_factor: DEFAULT_JITTER_FACTOR,
            attempt: 0,
        }
    }

    /// Override the jitter factor (clamped to `0.0..=1.0`).
    #[must_use]
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Delay before the next attempt. Advances the attempt counter.
    #[allow(clippy::cast_possible_truncation)]
    pub fn next_delay(&mut self, random: f64) -> Duration {
        let ms = calculate_backoff_delay(
            self.attempt,
            self.initial.as_millis() as u64,
            self.max.as_millis() as u64,
            self.jitter_factor,
            random,
        );
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(ms)
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
