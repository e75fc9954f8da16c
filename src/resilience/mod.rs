pub mod backoff;
pub mod breaker;
pub mod cache;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

pub use backoff::BackoffPolicy;
pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use cache::{fingerprint, SharedCache, TieredCache};

use crate::providers::ProviderError;

/// Wraps every call to one provider with the read-through cache, the retry
/// schedule, and the provider's circuit breaker. One guard per provider,
/// shared across all in-flight runs.
pub struct ProviderGuard {
    name: &'static str,
    breaker: CircuitBreaker,
    cache: Arc<TieredCache>,
    ttl: Duration,
    backoff: BackoffPolicy,
}

impl ProviderGuard {
    pub fn new(
        name: &'static str,
        breaker_config: BreakerConfig,
        cache: Arc<TieredCache>,
        ttl: Duration,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            name,
            breaker: CircuitBreaker::new(name, breaker_config),
            cache,
            ttl,
            backoff,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Resolve one request: fresh cache, else live call with retries, else
    /// the last-known value, else the classified error. `key` must be a
    /// deterministic fingerprint of the request parameters.
    pub async fn call<T, F, Fut>(&self, key: &str, op: F) -> Result<T, ProviderError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        if let Some(value) = self.cache.get_fresh(key).await {
            match serde_json::from_value(value) {
                Ok(hit) => return Ok(hit),
                Err(e) => warn!(key, error = %e, "discarding undecodable cache entry"),
            }
        }

        if !self.breaker.can_attempt() {
            if let Some(hit) = self.stale_hit(key) {
                warn!(provider = self.name, key, "breaker open, serving last cached value");
                return Ok(hit);
            }
            return Err(ProviderError::Unavailable {
                provider: self.name,
                detail: "circuit breaker is open".to_string(),
            });
        }

        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(result) => {
                    self.breaker.record_success();
                    if let Ok(value) = serde_json::to_value(&result) {
                        self.cache.put(key, value, self.ttl).await;
                    }
                    return Ok(result);
                }
                Err(err) => {
                    self.breaker.record_failure();
                    let exhausted = attempt >= self.backoff.max_attempts
                        || !BackoffPolicy::retryable(&err)
                        || !self.breaker.can_attempt();
                    if exhausted {
                        if let Some(hit) = self.stale_hit(key) {
                            warn!(
                                provider = self.name,
                                key,
                                error = %err,
                                "provider failed, serving last cached value"
                            );
                            return Ok(hit);
                        }
                        return Err(err);
                    }
                    let delay = self.backoff.delay_for(attempt, &err);
                    debug!(
                        provider = self.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying provider call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn stale_hit<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.cache
            .get_stale(key)
            .and_then(|v| serde_json::from_value(v).ok())
    }
}
