use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::config::{Config, PROVIDER_HTTP_TIMEOUT_SECS, PROVIDER_NEWS};
use crate::providers::{NewsBatch, NewsProvider, NewsQuery, ProviderError, ProviderResult};
use crate::types::NewsArticle;

/// Tavily-style search adapter: one POST per query, results mapped to
/// canonical article fields at this boundary.
pub struct NewsClient {
    api_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl NewsClient {
    pub fn new(cfg: &Config) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROVIDER_HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProviderError::from_reqwest(PROVIDER_NEWS, e))?;
        Ok(Self {
            api_url: cfg.news_api_url.clone(),
            api_key: cfg.news_api_key.clone(),
            client,
        })
    }
}

#[async_trait]
impl NewsProvider for NewsClient {
    async fn search(&self, query: &NewsQuery) -> ProviderResult<NewsBatch> {
        let Some(api_key) = &self.api_key else {
            return Err(ProviderError::Unavailable {
                provider: PROVIDER_NEWS,
                detail: "NEWS_API_KEY is not configured".to_string(),
            });
        };

        let payload = json!({
            "api_key": api_key,
            "query": query.query,
            "max_results": query.max_results,
            "include_answer": false,
            "include_raw_content": false,
        });

        let resp = self
            .client
            .post(&self.api_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER_NEWS, e))?;
        if !resp.status().is_success() {
            return Err(ProviderError::from_status(PROVIDER_NEWS, resp.status()));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER_NEWS, e))?;

        let results = body
            .get("results")
            .and_then(|r| r.as_array())
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: PROVIDER_NEWS,
                detail: "missing results array".to_string(),
            })?;

        let articles: Vec<NewsArticle> = results.iter().filter_map(parse_article).collect();
        debug!(query = %query.query, articles = articles.len(), "news search complete");
        Ok(NewsBatch { articles })
    }
}

fn parse_article(v: &serde_json::Value) -> Option<NewsArticle> {
    let url = v.get("url")?.as_str()?.to_string();
    let title = v.get("title").and_then(|t| t.as_str()).unwrap_or("").to_string();
    if title.is_empty() {
        return None;
    }
    Some(NewsArticle {
        source: host_of(&url).unwrap_or_else(|| "unknown".to_string()),
        published_at: v
            .get("published_date")
            .and_then(|d| d.as_str())
            .map(|s| s.to_string()),
        snippet: v
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .chars()
            .take(500)
            .collect(),
        title,
        url,
    })
}

fn host_of(url: &str) -> Option<String> {
    let no_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    no_scheme
        .split('/')
        .next()
        .filter(|h| !h.is_empty())
        .map(|h| h.to_string())
}
