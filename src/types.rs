use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Run parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Horizon {
    #[serde(rename = "intraday")]
    Intraday,
    #[default]
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "resolution")]
    Resolution,
}

impl std::fmt::Display for Horizon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Horizon::Intraday => "intraday",
            Horizon::Day => "24h",
            Horizon::Resolution => "resolution",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StrategyPreset {
    Cautious,
    #[default]
    Balanced,
    Aggressive,
}

impl std::fmt::Display for StrategyPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StrategyPreset::Cautious => "Cautious",
            StrategyPreset::Balanced => "Balanced",
            StrategyPreset::Aggressive => "Aggressive",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_edge_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<ConfidenceLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_capital_pct: Option<f64>,
    /// Never size beyond this fraction of full Kelly (e.g. 0.25).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_kelly_fraction: Option<f64>,
    /// Quick switch to disable new positions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_off: Option<bool>,
}

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Market,
    News,
    Signal,
    Report,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Market, Phase::News, Phase::Signal, Phase::Report];

    pub fn name(self) -> &'static str {
        match self {
            Phase::Market => "market",
            Phase::News => "news",
            Phase::Signal => "signal",
            Phase::Report => "report",
        }
    }

    /// Phases that depend on this one, in execution order.
    pub fn downstream(self) -> &'static [Phase] {
        match self {
            Phase::Market => &[Phase::News, Phase::Signal, Phase::Report],
            Phase::News => &[Phase::Signal, Phase::Report],
            Phase::Signal => &[Phase::Report],
            Phase::Report => &[],
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Done,
    Error,
}

impl PhaseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PhaseStatus::Done | PhaseStatus::Error)
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "done" => PhaseStatus::Done,
            "error" => PhaseStatus::Error,
            _ => PhaseStatus::Pending,
        }
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Done => "done",
            PhaseStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunStatusMap {
    pub market: PhaseStatus,
    pub news: PhaseStatus,
    pub signal: PhaseStatus,
    pub report: PhaseStatus,
}

impl RunStatusMap {
    pub fn get(&self, phase: Phase) -> PhaseStatus {
        match phase {
            Phase::Market => self.market,
            Phase::News => self.news,
            Phase::Signal => self.signal,
            Phase::Report => self.report,
        }
    }

    /// Aggregate completion predicate: every phase reached a terminal state.
    /// This, not a dedicated run-status field, is what pollers key off.
    pub fn is_complete(&self) -> bool {
        Phase::ALL.iter().all(|p| self.get(*p).is_terminal())
    }
}

// ---------------------------------------------------------------------------
// Phase payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub slug: String,
    pub url: String,
    pub question: String,
    pub outcomes: Vec<String>,
    pub yes_index: usize,
    pub yes_price: f64,
    pub no_price: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub last_trade_price: f64,
    pub volume: f64,
    pub liquidity: f64,
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_item_title: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventContext {
    pub title: String,
    pub description: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsArticle {
    pub title: String,
    pub source: String,
    pub url: String,
    pub published_at: Option<String>,
    pub snippet: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewsContext {
    pub queries: Vec<String>,
    pub articles: Vec<NewsArticle>,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalDirection {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub direction: SignalDirection,
    /// Model-estimated probability of the yes outcome.
    pub model_prob: f64,
    /// Probability currently implied by market pricing.
    pub market_prob: f64,
    pub expected_delta_range: [f64; 2],
    pub confidence: ConfidenceLevel,
    pub rationale: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionAction {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
    #[serde(rename = "HOLD")]
    Hold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    pub edge_pct: f64,
    pub toy_kelly_fraction: f64,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportBlock {
    pub headline: String,
    pub thesis: String,
    pub bull_case: Vec<String>,
    pub bear_case: Vec<String>,
    pub key_risks: Vec<String>,
    pub execution_notes: String,
}

// ---------------------------------------------------------------------------
// Disambiguation / ranking candidates
// ---------------------------------------------------------------------------

/// One selectable market within an event. Doubles as the ranking candidate:
/// the numeric fields feed the sort modes and coerce to 0.0 when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOption {
    pub slug: String,
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_item_title: Option<String>,
    #[serde(default)]
    pub volume_24h: Option<f64>,
    #[serde(default)]
    pub volume_total: Option<f64>,
    #[serde(default)]
    pub liquidity: Option<f64>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub best_bid: Option<f64>,
    #[serde(default)]
    pub best_ask: Option<f64>,
}

// ---------------------------------------------------------------------------
// Run view (what the polling API returns)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RunView {
    pub run_id: String,
    pub market_url: String,
    pub slug: Option<String>,
    pub run_at: String,
    pub horizon: Horizon,
    pub strategy_preset: StrategyPreset,
    pub strategy_params: StrategyParams,
    pub status: RunStatusMap,
    /// Derived from `status`; included so pollers don't re-implement the
    /// completion predicate.
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_snapshot: Option<MarketSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_context: Option<EventContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub news_context: Option<NewsContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<Signal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ReportBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_options: Option<Vec<MarketOption>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub requires_market_selection: bool,
    /// phase name -> human-readable failure reason
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
    pub env: RunEnv,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunEnv {
    pub app_version: String,
    pub model: String,
}

// ---------------------------------------------------------------------------
// Upsert records (canonical field names; provider-name translation happens
// at the adapter boundary, never here)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub gamma_event_id: String,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub image: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRecord {
    pub gamma_market_id: String,
    pub slug: String,
    pub polymarket_url: String,
    pub question: String,
    pub outcomes: Vec<String>,
    pub yes_index: usize,
    pub group_item_title: Option<String>,
    pub yes_price: Option<f64>,
    pub no_price: Option<f64>,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub volume_24h: Option<f64>,
    pub volume_total: Option<f64>,
    pub liquidity: Option<f64>,
    pub end_date: Option<String>,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub market_url: String,
    #[serde(default)]
    pub selected_market_slug: Option<String>,
    #[serde(default)]
    pub horizon: Option<Horizon>,
    #[serde(default)]
    pub strategy_preset: Option<StrategyPreset>,
    #[serde(default)]
    pub strategy_params: Option<StrategyParams>,
    #[serde(default)]
    pub configuration: Option<AnalyzeOptions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeOptions {
    #[serde(default)]
    pub max_articles: Option<usize>,
    #[serde(default)]
    pub max_articles_per_query: Option<usize>,
    #[serde(default)]
    pub min_confidence: Option<ConfidenceLevel>,
}
