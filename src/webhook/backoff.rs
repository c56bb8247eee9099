//! Retry delay schedule for failed deliveries

use chrono::Duration;
use rand::Rng;

use crate::config::WebhookConfig;

/// Exponential delay before the next attempt, capped at the configured maximum.
///
/// `attempts` counts the attempts made so far (1 after the first failure).
pub fn backoff_delay(config: &WebhookConfig, attempts: i32) -> Duration {
    let base = config.backoff_base.as_secs();
    let max = config.backoff_max.as_secs();
    let exponent = attempts.saturating_sub(1).clamp(0, 32) as u32;
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    let secs = base.saturating_mul(factor).min(max);
    Duration::seconds(secs as i64)
}

/// Backoff plus up to 10% random jitter
pub fn next_attempt_delay(config: &WebhookConfig, attempts: i32) -> Duration {
    let delay = backoff_delay(config, attempts);
    let spread = delay.num_milliseconds() / 10;
    if spread <= 0 {
        return delay;
    }
    delay + Duration::milliseconds(rand::thread_rng().gen_range(0..=spread))
}
