pub mod phases;
pub mod runner;
pub mod selector;

use std::sync::Arc;

use crate::config::{Config, PROVIDER_MARKET_DATA, PROVIDER_MODEL, PROVIDER_NEWS};
use crate::db::RunStore;
use crate::providers::{MarketDataProvider, ModelProvider, NewsProvider};
use crate::resilience::{BackoffPolicy, BreakerConfig, ProviderGuard, TieredCache};
use crate::types::RunEnv;

/// Everything a run needs to execute: the store, the three providers behind
/// their guards, and the ambient run metadata. Built once at startup and
/// shared by every spawned run.
pub struct Analyzer {
    pub store: RunStore,
    pub market_data: Arc<dyn MarketDataProvider>,
    pub news: Arc<dyn NewsProvider>,
    pub model: Arc<dyn ModelProvider>,
    pub market_guard: ProviderGuard,
    pub news_guard: ProviderGuard,
    pub model_guard: ProviderGuard,
    /// Store writes share the provider retry schedule.
    pub store_backoff: BackoffPolicy,
    pub env: RunEnv,
    pub trace_enabled: bool,
}

impl Analyzer {
    pub fn new(
        cfg: &Config,
        store: RunStore,
        market_data: Arc<dyn MarketDataProvider>,
        news: Arc<dyn NewsProvider>,
        model: Arc<dyn ModelProvider>,
        cache: Arc<TieredCache>,
    ) -> Self {
        let backoff = BackoffPolicy::from_config(cfg);
        let breaker = BreakerConfig {
            failure_threshold: cfg.breaker_failure_threshold,
            success_threshold: cfg.breaker_success_threshold,
            cooldown: cfg.breaker_cooldown,
        };
        Self {
            store,
            market_data,
            news,
            model,
            market_guard: ProviderGuard::new(
                PROVIDER_MARKET_DATA,
                breaker,
                Arc::clone(&cache),
                cfg.market_cache_ttl,
                backoff,
            ),
            news_guard: ProviderGuard::new(
                PROVIDER_NEWS,
                breaker,
                Arc::clone(&cache),
                cfg.news_cache_ttl,
                backoff,
            ),
            model_guard: ProviderGuard::new(
                PROVIDER_MODEL,
                breaker,
                cache,
                cfg.model_cache_ttl,
                backoff,
            ),
            store_backoff: backoff,
            env: RunEnv {
                app_version: env!("CARGO_PKG_VERSION").to_string(),
                model: cfg.model_name.clone(),
            },
            trace_enabled: cfg.trace_enabled,
        }
    }

    /// Look up a guard by its provider name (admin breaker routes).
    pub fn guard_by_name(&self, name: &str) -> Option<&ProviderGuard> {
        [&self.market_guard, &self.news_guard, &self.model_guard]
            .into_iter()
            .find(|g| g.name() == name)
    }
}
