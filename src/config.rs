use std::time::Duration;

use crate::error::{AppError, Result};

pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";
pub const NEWS_API_URL: &str = "https://api.tavily.com/search";
pub const MODEL_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Provider names used for breaker identification, cache key prefixes and the
/// admin reset route.
pub const PROVIDER_MARKET_DATA: &str = "market-data";
pub const PROVIDER_NEWS: &str = "news";
pub const PROVIDER_MODEL: &str = "model";

/// How often the in-process cache tier sweeps out entries past their stale
/// window (seconds).
pub const CACHE_SWEEP_INTERVAL_SECS: u64 = 600;

/// Expired tier-2 entries are kept around this long past their TTL so an open
/// breaker can still serve the last known value.
pub const CACHE_STALE_WINDOW_SECS: u64 = 3600;

/// Per-request HTTP timeout for provider calls (seconds). Model inference
/// gets a longer one.
pub const PROVIDER_HTTP_TIMEOUT_SECS: u64 = 20;
pub const MODEL_HTTP_TIMEOUT_SECS: u64 = 60;

/// Hard cap on aggregated news articles regardless of request configuration.
pub const MAX_ARTICLES_CEILING: usize = 50;

#[derive(Debug, Clone)]
pub struct Config {
    pub gamma_api_url: String,
    pub news_api_url: String,
    pub news_api_key: Option<String>,
    pub model_api_url: String,
    pub model_api_key: Option<String>,
    pub model_name: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Consecutive failures before a breaker opens (BREAKER_FAILURE_THRESHOLD)
    pub breaker_failure_threshold: u32,
    /// Successful half-open trials required to close (BREAKER_SUCCESS_THRESHOLD)
    pub breaker_success_threshold: u32,
    /// Open-state cool-down before a half-open trial (BREAKER_COOLDOWN_SECS)
    pub breaker_cooldown: Duration,
    /// Retry backoff: base delay, multiplier, ceiling, attempts
    pub retry_base: Duration,
    pub retry_multiplier: f64,
    pub retry_max: Duration,
    pub retry_max_attempts: u32,
    /// Cache TTLs per provider volatility
    pub market_cache_ttl: Duration,
    pub news_cache_ttl: Duration,
    pub model_cache_ttl: Duration,
    /// Redis URL for the shared cache tier (only used with the redis-cache
    /// feature; ignored otherwise)
    pub redis_url: Option<String>,
    /// Persist an execution trace per run (TRACE_ENABLED)
    pub trace_enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            gamma_api_url: std::env::var("GAMMA_API_URL")
                .unwrap_or_else(|_| GAMMA_API_URL.to_string()),
            news_api_url: std::env::var("NEWS_API_URL")
                .unwrap_or_else(|_| NEWS_API_URL.to_string()),
            news_api_key: std::env::var("NEWS_API_KEY").ok().filter(|s| !s.is_empty()),
            model_api_url: std::env::var("MODEL_API_URL")
                .unwrap_or_else(|_| MODEL_API_URL.to_string()),
            model_api_key: std::env::var("MODEL_API_KEY").ok().filter(|s| !s.is_empty()),
            model_name: std::env::var("MODEL_NAME").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "marketscope.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            breaker_failure_threshold: std::env::var("BREAKER_FAILURE_THRESHOLD")
                .unwrap_or_else(|_| "5".to_string())
                .parse::<u32>()
                .unwrap_or(5),
            breaker_success_threshold: std::env::var("BREAKER_SUCCESS_THRESHOLD")
                .unwrap_or_else(|_| "2".to_string())
                .parse::<u32>()
                .unwrap_or(2),
            breaker_cooldown: Duration::from_secs(
                std::env::var("BREAKER_COOLDOWN_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse::<u64>()
                    .unwrap_or(60),
            ),
            retry_base: Duration::from_millis(
                std::env::var("RETRY_BASE_MS")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse::<u64>()
                    .unwrap_or(500),
            ),
            retry_multiplier: std::env::var("RETRY_MULTIPLIER")
                .unwrap_or_else(|_| "2.0".to_string())
                .parse::<f64>()
                .unwrap_or(2.0),
            retry_max: Duration::from_millis(
                std::env::var("RETRY_MAX_MS")
                    .unwrap_or_else(|_| "10000".to_string())
                    .parse::<u64>()
                    .unwrap_or(10_000),
            ),
            retry_max_attempts: std::env::var("RETRY_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse::<u32>()
                .unwrap_or(3),
            market_cache_ttl: Duration::from_secs(
                std::env::var("MARKET_CACHE_TTL_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse::<u64>()
                    .unwrap_or(30),
            ),
            news_cache_ttl: Duration::from_secs(
                std::env::var("NEWS_CACHE_TTL_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse::<u64>()
                    .unwrap_or(300),
            ),
            model_cache_ttl: Duration::from_secs(
                std::env::var("MODEL_CACHE_TTL_SECS")
                    .unwrap_or_else(|_| "600".to_string())
                    .parse::<u64>()
                    .unwrap_or(600),
            ),
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            trace_enabled: matches!(
                std::env::var("TRACE_ENABLED")
                    .unwrap_or_default()
                    .to_lowercase()
                    .as_str(),
                "1" | "true" | "yes"
            ),
        })
    }
}
