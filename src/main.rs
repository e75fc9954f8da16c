mod api;
mod config;
mod db;
mod error;
mod pipeline;
mod providers;
mod ranking;
mod resilience;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::{router, ApiState};
use crate::config::{Config, CACHE_SWEEP_INTERVAL_SECS};
use crate::db::RunStore;
use crate::error::Result;
use crate::pipeline::Analyzer;
use crate::providers::gamma::GammaClient;
use crate::providers::model::ModelClient;
use crate::providers::news::NewsClient;
use crate::resilience::TieredCache;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    let store = RunStore::new(pool);

    // --- Cache tiers ---
    let cache = Arc::new(TieredCache::new(shared_cache(&cfg).await));

    // --- Providers behind their guards ---
    let gamma = Arc::new(GammaClient::new(&cfg).map_err(provider_setup)?);
    let news = Arc::new(NewsClient::new(&cfg).map_err(provider_setup)?);
    let model = Arc::new(ModelClient::new(&cfg).map_err(provider_setup)?);
    if cfg.news_api_key.is_none() {
        warn!("NEWS_API_KEY not set; news phases will fail until configured");
    }
    if cfg.model_api_key.is_none() {
        warn!("MODEL_API_KEY not set; signal and report phases will fail until configured");
    }

    let analyzer = Arc::new(Analyzer::new(
        &cfg,
        store,
        gamma,
        news,
        model,
        Arc::clone(&cache),
    ));

    // Cache sweep (background). Correctness never depends on it; it just
    // bounds memory on long uptimes.
    let sweep_cache = Arc::clone(&cache);
    tokio::spawn(async move {
        let mut tick =
            tokio::time::interval(Duration::from_secs(CACHE_SWEEP_INTERVAL_SECS));
        tick.tick().await;
        loop {
            tick.tick().await;
            let evicted = sweep_cache.evict_stale();
            if evicted > 0 {
                debug!(evicted, "cache sweep");
            }
        }
    });

    // --- HTTP API server ---
    let app = router(ApiState { analyzer });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

fn provider_setup(e: crate::providers::ProviderError) -> crate::error::AppError {
    crate::error::AppError::Config(e.to_string())
}

#[cfg(feature = "redis-cache")]
async fn shared_cache(cfg: &Config) -> Option<Box<dyn crate::resilience::SharedCache>> {
    use crate::resilience::cache::redis_cache::RedisCache;

    let url = cfg.redis_url.as_deref()?;
    match RedisCache::connect(url).await {
        Ok(cache) => {
            info!("shared cache tier connected");
            Some(Box::new(cache))
        }
        Err(e) => {
            warn!(error = %e, "shared cache unavailable, running on the local tier only");
            None
        }
    }
}

#[cfg(not(feature = "redis-cache"))]
async fn shared_cache(cfg: &Config) -> Option<Box<dyn crate::resilience::SharedCache>> {
    if cfg.redis_url.is_some() {
        warn!("REDIS_URL is set but this build has no redis-cache feature; ignoring");
    }
    None
}
