use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use sqlx::FromRow;

use crate::types::{
    Phase, PhaseStatus, RunEnv, RunStatusMap, RunView, StrategyParams,
};

fn parse_enum<T: DeserializeOwned + Default>(s: &str) -> T {
    serde_json::from_value(serde_json::Value::String(s.to_string())).unwrap_or_default()
}

fn parse_json<T: DeserializeOwned>(s: Option<&str>) -> Option<T> {
    s.and_then(|raw| serde_json::from_str(raw).ok())
}

/// Raw `runs` row. JSON payload columns stay as TEXT here and are decoded
/// once, in [`RunRow::into_view`].
#[derive(Debug, FromRow)]
pub struct RunRow {
    pub run_id: String,
    pub market_url: String,
    pub slug: Option<String>,
    pub event_id: Option<i64>,
    pub market_id: Option<i64>,
    pub run_at: String,
    pub horizon: String,
    pub strategy_preset: String,
    pub strategy_params: Option<String>,
    pub status_market: String,
    pub status_news: String,
    pub status_signal: String,
    pub status_report: String,
    pub market_error: Option<String>,
    pub news_error: Option<String>,
    pub signal_error: Option<String>,
    pub report_error: Option<String>,
    pub market_snapshot: Option<String>,
    pub event_context: Option<String>,
    pub news_context: Option<String>,
    pub signal: Option<String>,
    pub decision: Option<String>,
    pub report: Option<String>,
    pub market_options: Option<String>,
    pub requires_market_selection: i64,
    pub app_version: String,
    pub model: String,
    pub trace_id: Option<String>,
}

impl RunRow {
    pub fn into_view(self) -> RunView {
        let status = RunStatusMap {
            market: PhaseStatus::parse(&self.status_market),
            news: PhaseStatus::parse(&self.status_news),
            signal: PhaseStatus::parse(&self.status_signal),
            report: PhaseStatus::parse(&self.status_report),
        };

        let mut errors = BTreeMap::new();
        for (phase, reason) in [
            (Phase::Market, &self.market_error),
            (Phase::News, &self.news_error),
            (Phase::Signal, &self.signal_error),
            (Phase::Report, &self.report_error),
        ] {
            if let Some(reason) = reason {
                errors.insert(phase.name().to_string(), reason.clone());
            }
        }

        RunView {
            run_id: self.run_id,
            market_url: self.market_url,
            slug: self.slug,
            run_at: self.run_at,
            horizon: parse_enum(&self.horizon),
            strategy_preset: parse_enum(&self.strategy_preset),
            strategy_params: parse_json(self.strategy_params.as_deref())
                .unwrap_or_else(StrategyParams::default),
            complete: status.is_complete(),
            status,
            market_snapshot: parse_json(self.market_snapshot.as_deref()),
            event_context: parse_json(self.event_context.as_deref()),
            news_context: parse_json(self.news_context.as_deref()),
            signal: parse_json(self.signal.as_deref()),
            decision: parse_json(self.decision.as_deref()),
            report: parse_json(self.report.as_deref()),
            market_options: parse_json(self.market_options.as_deref()),
            requires_market_selection: self.requires_market_selection != 0,
            errors,
            env: RunEnv {
                app_version: self.app_version,
                model: self.model,
            },
        }
    }
}
