use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::config::{Config, MODEL_HTTP_TIMEOUT_SECS, PROVIDER_MODEL};
use crate::providers::{
    ModelProvider, ProviderError, ProviderResult, ReportRequest, SignalBundle, SignalRequest,
};
use crate::types::ReportBlock;

/// Chat-completions style inference adapter. Prompt construction lives here;
/// the pipeline only sees typed requests and typed outputs.
pub struct ModelClient {
    api_url: String,
    api_key: Option<String>,
    model_name: String,
    client: reqwest::Client,
}

impl ModelClient {
    pub fn new(cfg: &Config) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(MODEL_HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProviderError::from_reqwest(PROVIDER_MODEL, e))?;
        Ok(Self {
            api_url: cfg.model_api_url.clone(),
            api_key: cfg.model_api_key.clone(),
            model_name: cfg.model_name.clone(),
            client,
        })
    }

    /// POST a system/user prompt pair and return the first choice's content
    /// parsed as JSON.
    async fn complete_json(&self, system: &str, user: String) -> ProviderResult<serde_json::Value> {
        let Some(api_key) = &self.api_key else {
            return Err(ProviderError::Unavailable {
                provider: PROVIDER_MODEL,
                detail: "MODEL_API_KEY is not configured".to_string(),
            });
        };

        let payload = json!({
            "model": self.model_name,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER_MODEL, e))?;
        if !resp.status().is_success() {
            return Err(ProviderError::from_status(PROVIDER_MODEL, resp.status()));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER_MODEL, e))?;

        let content = body
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|c| c.pointer("/message/content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: PROVIDER_MODEL,
                detail: "missing choices[0].message.content".to_string(),
            })?;

        serde_json::from_str(content).map_err(|e| ProviderError::InvalidResponse {
            provider: PROVIDER_MODEL,
            detail: format!("content was not valid JSON: {e}"),
        })
    }
}

#[async_trait]
impl ModelProvider for ModelClient {
    async fn generate_signal(&self, req: &SignalRequest) -> ProviderResult<SignalBundle> {
        let system = "You are a prediction-market analyst. Respond with a single JSON object \
                      containing `signal` {direction, model_prob, market_prob, \
                      expected_delta_range, confidence, rationale} and `decision` \
                      {action, edge_pct, toy_kelly_fraction, notes}.";
        let user = format!(
            "Question: {}\nCurrent yes price: {:.4}\nHorizon: {}\nStrategy preset: {}\n\nNews digest:\n{}",
            req.question, req.yes_price, req.horizon, req.strategy_preset, req.news_digest,
        );
        let value = self.complete_json(system, user).await?;
        let bundle: SignalBundle =
            serde_json::from_value(value).map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER_MODEL,
                detail: format!("signal payload did not match schema: {e}"),
            })?;
        debug!(question = %req.question, action = ?bundle.decision.action, "signal generated");
        Ok(bundle)
    }

    async fn generate_report(&self, req: &ReportRequest) -> ProviderResult<ReportBlock> {
        let system = "You are a prediction-market analyst. Respond with a single JSON object \
                      containing `headline`, `thesis`, `bull_case` (array), `bear_case` (array), \
                      `key_risks` (array) and `execution_notes`.";
        let user = format!(
            "Question: {}\nHorizon: {}\nSignal: {}\nDecision: {}\n\nNews digest:\n{}",
            req.question,
            req.horizon,
            serde_json::to_string(&req.signal).unwrap_or_default(),
            serde_json::to_string(&req.decision).unwrap_or_default(),
            req.news_digest,
        );
        let value = self.complete_json(system, user).await?;
        serde_json::from_value(value).map_err(|e| ProviderError::InvalidResponse {
            provider: PROVIDER_MODEL,
            detail: format!("report payload did not match schema: {e}"),
        })
    }
}
