pub mod gamma;
pub mod model;
pub mod news;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    Decision, EventRecord, MarketRecord, NewsArticle, ReportBlock, Signal,
};

// ---------------------------------------------------------------------------
// Classified provider errors
// ---------------------------------------------------------------------------

/// Every provider call fails with exactly one of these classes. The
/// resilience wrapper keys retry behavior off the class; phase executors
/// only ever see the classified form.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("{provider} request timed out")]
    Timeout { provider: &'static str },

    #[error("{provider} rate limited")]
    RateLimited { provider: &'static str },

    #[error("{provider} returned an invalid response: {detail}")]
    InvalidResponse {
        provider: &'static str,
        detail: String,
    },

    #[error("{provider} unavailable: {detail}")]
    Unavailable {
        provider: &'static str,
        detail: String,
    },
}

impl ProviderError {
    pub fn provider(&self) -> &'static str {
        match self {
            ProviderError::Timeout { provider }
            | ProviderError::RateLimited { provider }
            | ProviderError::InvalidResponse { provider, .. }
            | ProviderError::Unavailable { provider, .. } => provider,
        }
    }

    /// Classify a transport-level failure.
    pub fn from_reqwest(provider: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ProviderError::Timeout { provider };
        }
        if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                return ProviderError::RateLimited { provider };
            }
            if status.is_client_error() {
                return ProviderError::InvalidResponse {
                    provider,
                    detail: format!("HTTP {status}"),
                };
            }
        }
        if err.is_decode() {
            return ProviderError::InvalidResponse {
                provider,
                detail: err.to_string(),
            };
        }
        ProviderError::Unavailable {
            provider,
            detail: err.to_string(),
        }
    }

    /// Classify a non-2xx status before the body is consumed.
    pub fn from_status(provider: &'static str, status: reqwest::StatusCode) -> Self {
        if status.as_u16() == 429 {
            ProviderError::RateLimited { provider }
        } else if status.is_client_error() {
            ProviderError::InvalidResponse {
                provider,
                detail: format!("HTTP {status}"),
            }
        } else {
            ProviderError::Unavailable {
                provider,
                detail: format!("HTTP {status}"),
            }
        }
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

// ---------------------------------------------------------------------------
// Typed payloads crossing the adapter boundary
// ---------------------------------------------------------------------------

/// Everything the market phase needs about one reference: the owning event
/// (when the upstream exposes one) and all tradable markets under it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBundle {
    pub event: Option<EventRecord>,
    pub markets: Vec<MarketRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsQuery {
    pub query: String,
    pub max_results: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsBatch {
    pub articles: Vec<NewsArticle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRequest {
    pub question: String,
    pub yes_price: f64,
    pub horizon: String,
    pub strategy_preset: String,
    pub news_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalBundle {
    pub signal: Signal,
    pub decision: Decision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub question: String,
    pub horizon: String,
    pub signal: Signal,
    pub decision: Decision,
    pub news_digest: String,
}

// ---------------------------------------------------------------------------
// Provider traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Resolve a market/event slug to the event and its tradable markets.
    async fn resolve(&self, slug: &str) -> ProviderResult<EventBundle>;
}

#[async_trait]
pub trait NewsProvider: Send + Sync {
    async fn search(&self, query: &NewsQuery) -> ProviderResult<NewsBatch>;
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn generate_signal(&self, req: &SignalRequest) -> ProviderResult<SignalBundle>;
    async fn generate_report(&self, req: &ReportRequest) -> ProviderResult<ReportBlock>;
}
