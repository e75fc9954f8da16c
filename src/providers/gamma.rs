use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{Config, PROVIDER_HTTP_TIMEOUT_SECS, PROVIDER_MARKET_DATA};
use crate::providers::{EventBundle, MarketDataProvider, ProviderError, ProviderResult};
use crate::types::{EventRecord, MarketRecord};

/// Polymarket Gamma REST adapter. All of the upstream's naming quirks
/// (camelCase keys, arrays JSON-encoded inside strings, numbers that arrive
/// as strings) are translated to canonical fields here and nowhere else.
pub struct GammaClient {
    base_url: String,
    client: reqwest::Client,
}

impl GammaClient {
    pub fn new(cfg: &Config) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROVIDER_HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProviderError::from_reqwest(PROVIDER_MARKET_DATA, e))?;
        Ok(Self {
            base_url: cfg.gamma_api_url.clone(),
            client,
        })
    }

    async fn fetch_array(&self, path: &str, slug: &str) -> ProviderResult<Vec<serde_json::Value>> {
        let url = format!("{}/{path}?slug={slug}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER_MARKET_DATA, e))?;
        if !resp.status().is_success() {
            return Err(ProviderError::from_status(PROVIDER_MARKET_DATA, resp.status()));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER_MARKET_DATA, e))?;

        // Both endpoints return either a bare array or {"data": [...]}.
        let items = match &body {
            serde_json::Value::Array(a) => a.clone(),
            serde_json::Value::Object(o) => o
                .get("data")
                .and_then(|d| d.as_array())
                .cloned()
                .unwrap_or_default(),
            _ => {
                return Err(ProviderError::InvalidResponse {
                    provider: PROVIDER_MARKET_DATA,
                    detail: format!("{path} response was neither array nor object"),
                })
            }
        };
        Ok(items)
    }
}

#[async_trait]
impl MarketDataProvider for GammaClient {
    async fn resolve(&self, slug: &str) -> ProviderResult<EventBundle> {
        // The events endpoint carries event-level metadata; fall back to the
        // markets endpoint for references that are market slugs directly.
        let events = self.fetch_array("events", slug).await?;
        if let Some(event_raw) = events.first() {
            let event = parse_event(event_raw, slug);
            let markets: Vec<MarketRecord> = event_raw
                .get("markets")
                .and_then(|m| m.as_array())
                .map(|a| a.iter().filter_map(parse_gamma_market).collect())
                .unwrap_or_default();
            debug!(slug, markets = markets.len(), "resolved via events endpoint");
            return Ok(EventBundle {
                event: Some(event),
                markets,
            });
        }

        let raw_markets = self.fetch_array("markets", slug).await?;
        let markets: Vec<MarketRecord> = raw_markets.iter().filter_map(parse_gamma_market).collect();
        debug!(slug, markets = markets.len(), "resolved via markets endpoint");
        Ok(EventBundle {
            event: None,
            markets,
        })
    }
}

/// Last path segment of a Polymarket URL, query/fragment stripped. A bare
/// slug passes through unchanged.
pub fn extract_slug_from_url(url: &str) -> Option<String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return None;
    }
    let no_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let no_query = no_scheme
        .split(['?', '#'])
        .next()
        .unwrap_or(no_scheme);
    no_query
        .split('/')
        .filter(|p| !p.is_empty())
        .next_back()
        .map(|s| s.to_string())
}

fn parse_event(v: &serde_json::Value, fallback_slug: &str) -> EventRecord {
    EventRecord {
        gamma_event_id: str_field(v, "id").unwrap_or_else(|| format!("event-{fallback_slug}")),
        slug: str_field(v, "slug").unwrap_or_else(|| fallback_slug.to_string()),
        title: str_field(v, "title").unwrap_or_else(|| "Untitled event".to_string()),
        description: str_field(v, "description").unwrap_or_default(),
        category: str_field(v, "category").unwrap_or_else(|| "Macro".to_string()),
        image: str_field(v, "image").or_else(|| str_field(v, "icon")),
        end_date: str_field(v, "endDate"),
    }
}

/// Parse one Gamma market object. Returns None only when the record is
/// structurally unusable (no slug, fewer than two outcomes).
pub fn parse_gamma_market(v: &serde_json::Value) -> Option<MarketRecord> {
    let slug = str_field(v, "slug")?;

    let outcomes: Vec<String> = match v.get("outcomes") {
        // Gamma encodes the array as a JSON string: "[\"Yes\", \"No\"]"
        Some(serde_json::Value::String(s)) => serde_json::from_str(s).ok()?,
        Some(serde_json::Value::Array(a)) => a
            .iter()
            .filter_map(|o| o.as_str().map(|s| s.to_string()))
            .collect(),
        _ => vec!["Yes".to_string(), "No".to_string()],
    };
    if outcomes.len() < 2 {
        return None;
    }
    let yes_index = outcomes
        .iter()
        .position(|o| o.eq_ignore_ascii_case("Yes") || o.eq_ignore_ascii_case("Up"))
        .unwrap_or(0);

    let (yes_price, no_price) = parse_outcome_prices(v, yes_index);

    Some(MarketRecord {
        gamma_market_id: str_field(v, "id").unwrap_or_else(|| format!("market-{slug}")),
        polymarket_url: format!("https://polymarket.com/market/{slug}"),
        question: str_field(v, "question")
            .or_else(|| str_field(v, "title"))
            .unwrap_or_default(),
        outcomes,
        yes_index,
        group_item_title: str_field(v, "groupItemTitle"),
        yes_price,
        no_price,
        best_bid: num_field(v, "bestBid"),
        best_ask: num_field(v, "bestAsk"),
        volume_24h: num_field(v, "volume24hr"),
        volume_total: num_field(v, "volume"),
        liquidity: num_field(v, "liquidityNum").or_else(|| num_field(v, "liquidity")),
        end_date: str_field(v, "endDate").or_else(|| str_field(v, "endDateIso")),
        slug,
    })
}

fn parse_outcome_prices(v: &serde_json::Value, yes_index: usize) -> (Option<f64>, Option<f64>) {
    let prices: Vec<f64> = match v.get("outcomePrices") {
        Some(serde_json::Value::String(s)) => serde_json::from_str::<Vec<String>>(s)
            .map(|arr| arr.iter().filter_map(|p| p.parse().ok()).collect())
            .unwrap_or_default(),
        Some(serde_json::Value::Array(a)) => a
            .iter()
            .filter_map(|p| p.as_f64().or_else(|| p.as_str().and_then(|s| s.parse().ok())))
            .collect(),
        _ => Vec::new(),
    };
    if prices.len() < 2 {
        return (None, None);
    }
    let yes = prices.get(yes_index).copied();
    let no = prices.get(if yes_index == 0 { 1 } else { 0 }).copied();
    (yes, no)
}

fn str_field(v: &serde_json::Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(|x| x.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn num_field(v: &serde_json::Value, key: &str) -> Option<f64> {
    v.get(key)
        .and_then(|x| x.as_f64().or_else(|| x.as_str().and_then(|s| s.parse().ok())))
}
