use std::time::Duration;

use crate::config::Config;
use crate::providers::ProviderError;

/// One backoff policy shared by the resilience wrapper and the store retry
/// helper. Call sites never carry their own delay constants.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            base: cfg.retry_base,
            multiplier: cfg.retry_multiplier,
            max: cfg.retry_max,
            max_attempts: cfg.retry_max_attempts.max(1),
        }
    }

    /// Delay before retry number `attempt` (1-based): base * multiplier^(n-1),
    /// capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let factor = self.multiplier.max(1.0).powi(exp as i32);
        let millis = (self.base.as_millis() as f64 * factor).min(self.max.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Per-error-class override: rate limits wait a full ceiling before the
    /// next attempt; everything else follows the exponential schedule.
    pub fn delay_for(&self, attempt: u32, err: &ProviderError) -> Duration {
        match err {
            ProviderError::RateLimited { .. } => self.max,
            _ => self.delay(attempt),
        }
    }

    /// Malformed payloads are deterministic; retrying them only burns quota.
    pub fn retryable(err: &ProviderError) -> bool {
        !matches!(err, ProviderError::InvalidResponse { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(100),
            multiplier: 2.0,
            max: Duration::from_millis(1000),
            max_attempts: 3,
        }
    }

    #[test]
    fn delays_grow_exponentially_up_to_the_ceiling() {
        let p = policy();
        assert_eq!(p.delay(1), Duration::from_millis(100));
        assert_eq!(p.delay(2), Duration::from_millis(200));
        assert_eq!(p.delay(3), Duration::from_millis(400));
        assert_eq!(p.delay(8), Duration::from_millis(1000), "capped at max");
    }

    #[test]
    fn rate_limits_always_wait_the_ceiling() {
        let p = policy();
        let err = ProviderError::RateLimited { provider: "news" };
        assert_eq!(p.delay_for(1, &err), Duration::from_millis(1000));
    }

    #[test]
    fn invalid_responses_are_not_retried() {
        assert!(!BackoffPolicy::retryable(&ProviderError::InvalidResponse {
            provider: "model",
            detail: "bad json".to_string(),
        }));
        assert!(BackoffPolicy::retryable(&ProviderError::Timeout {
            provider: "news"
        }));
    }
}
