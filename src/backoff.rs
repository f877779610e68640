use std::time::Duration;

use rand::Rng;

/* ============================= POLICY ============================= */

/// Delay after the first failure, and the floor for `failures = 0`.
pub const BASE_DELAY: Duration = Duration::from_secs(30);

/// Ceiling for the exponential curve.
pub const MAX_DELAY: Duration = Duration::from_secs(8 * 60);

/// Exponential backoff: `min(BASE_DELAY * 2^failures, MAX_DELAY)`.
///
/// The table this produces: 0 → 30s, 1 → 1m, 2 → 2m, 3 → 4m, 4 → 8m,
/// 5+ → 8m (capped). Also used to space normal post-success re-polls.
pub fn delay_for_failures(failures: u32) -> Duration {
    // 2^6 already exceeds the cap; clamp the shift so it cannot overflow.
    let exponent = failures.min(10);
    let secs = BASE_DELAY.as_secs().saturating_mul(1u64 << exponent);
    Duration::from_secs(secs.min(MAX_DELAY.as_secs()))
}

/// Apply ±10% uniform jitter. A zero duration stays zero.
pub fn with_jitter(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let factor: f64 = rand::rng().random_range(0.9..=1.1);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

/* ============================= TESTS ============================= */
