use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::MAX_ARTICLES_CEILING;
use crate::pipeline::selector::{self, Selection};
use crate::pipeline::Analyzer;
use crate::providers::{
    gamma, EventBundle, NewsBatch, NewsQuery, ProviderError, ReportRequest, SignalBundle,
    SignalRequest,
};
use crate::ranking::{rank_markets, SortMode};
use crate::resilience::fingerprint;
use crate::types::{
    AnalyzeOptions, Decision, DecisionAction, EventContext, EventRecord, Horizon, MarketOption,
    MarketRecord, MarketSnapshot, NewsArticle, NewsContext, ReportBlock, Signal, StrategyParams,
    StrategyPreset,
};

#[derive(Debug, Error)]
pub enum PhaseError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("{0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Market phase
// ---------------------------------------------------------------------------

pub enum MarketResolution {
    Resolved {
        snapshot: MarketSnapshot,
        event_context: Option<EventContext>,
        event: Option<EventRecord>,
        market: MarketRecord,
    },
    /// Ambiguous event: the run surfaces ranked options and stops.
    NeedsSelection {
        event_context: Option<EventContext>,
        options: Vec<MarketOption>,
    },
}

pub async fn run_market_phase(
    a: &Analyzer,
    market_url: &str,
    selected_slug: Option<&str>,
) -> Result<MarketResolution, PhaseError> {
    let slug = gamma::extract_slug_from_url(market_url).ok_or_else(|| {
        PhaseError::Invalid(format!("could not extract a market slug from '{market_url}'"))
    })?;

    let key = fingerprint(a.market_guard.name(), &["resolve", &slug]);
    let bundle: EventBundle = a
        .market_guard
        .call(&key, || {
            let provider = Arc::clone(&a.market_data);
            let slug = slug.clone();
            async move { provider.resolve(&slug).await }
        })
        .await?;

    if bundle.markets.is_empty() {
        return Err(PhaseError::Invalid(format!("no markets found for '{slug}'")));
    }

    let event_context = bundle.event.as_ref().map(|e| EventContext {
        title: e.title.clone(),
        description: e.description.clone(),
        category: e.category.clone(),
    });

    match selector::select_market(&bundle.markets, selected_slug, &slug) {
        Selection::Chosen(market) => {
            debug!(slug = %market.slug, "market resolved");
            Ok(MarketResolution::Resolved {
                snapshot: snapshot_from(market),
                event_context,
                event: bundle.event.clone(),
                market: market.clone(),
            })
        }
        Selection::NeedsSelection => {
            let options: Vec<MarketOption> = bundle.markets.iter().map(option_from).collect();
            Ok(MarketResolution::NeedsSelection {
                event_context,
                options: rank_markets(&options, SortMode::Active),
            })
        }
        Selection::NoMarkets => {
            Err(PhaseError::Invalid(format!("no markets found for '{slug}'")))
        }
    }
}

pub fn snapshot_from(m: &MarketRecord) -> MarketSnapshot {
    MarketSnapshot {
        slug: m.slug.clone(),
        url: m.polymarket_url.clone(),
        question: m.question.clone(),
        outcomes: m.outcomes.clone(),
        yes_index: m.yes_index,
        yes_price: m.yes_price.unwrap_or(0.0),
        no_price: m.no_price.unwrap_or(0.0),
        best_bid: m.best_bid.unwrap_or(0.0),
        best_ask: m.best_ask.unwrap_or(0.0),
        last_trade_price: m.yes_price.unwrap_or(0.0),
        volume: m.volume_total.or(m.volume_24h).unwrap_or(0.0),
        liquidity: m.liquidity.unwrap_or(0.0),
        end_date: m.end_date.clone(),
        group_item_title: m.group_item_title.clone(),
    }
}

pub fn option_from(m: &MarketRecord) -> MarketOption {
    MarketOption {
        slug: m.slug.clone(),
        question: m.question.clone(),
        group_item_title: m.group_item_title.clone(),
        volume_24h: m.volume_24h,
        volume_total: m.volume_total,
        liquidity: m.liquidity,
        end_date: m.end_date.clone(),
        best_bid: m.best_bid,
        best_ask: m.best_ask,
    }
}

// ---------------------------------------------------------------------------
// News phase
// ---------------------------------------------------------------------------

/// Per-run article limits, resolved from the request configuration against
/// the hard ceiling.
#[derive(Debug, Clone, Copy)]
pub struct NewsPlan {
    pub max_articles: usize,
    pub max_per_query: usize,
}

impl NewsPlan {
    pub fn from_options(opts: Option<&AnalyzeOptions>) -> Self {
        let max_articles = opts
            .and_then(|o| o.max_articles)
            .unwrap_or(15)
            .clamp(1, MAX_ARTICLES_CEILING);
        let max_per_query = opts
            .and_then(|o| o.max_articles_per_query)
            .unwrap_or(8)
            .clamp(1, max_articles);
        Self {
            max_articles,
            max_per_query,
        }
    }
}

/// Search queries derived from the market under analysis. The question is
/// always the lead query; the event title adds broader context when it says
/// something the question doesn't.
pub fn build_queries(snapshot: &MarketSnapshot, event: Option<&EventContext>) -> Vec<String> {
    let mut queries = vec![snapshot.question.clone()];
    if let Some(event) = event {
        let title = event.title.trim();
        if !title.is_empty() && !title.eq_ignore_ascii_case(&snapshot.question) {
            queries.push(title.to_string());
        }
    }
    queries.push(format!("{} latest news", snapshot.question));
    queries
}

/// Merge per-query batches: per-query cap, url dedupe across queries, total
/// cap, in that order. First occurrence wins so lead-query articles survive.
pub fn aggregate_articles(
    batches: Vec<Vec<NewsArticle>>,
    max_per_query: usize,
    max_articles: usize,
) -> Vec<NewsArticle> {
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::new();
    for batch in batches {
        for article in batch.into_iter().take(max_per_query) {
            if merged.len() >= max_articles {
                return merged;
            }
            if seen.insert(article.url.clone()) {
                merged.push(article);
            }
        }
    }
    merged
}

/// Plain-text digest fed into the model prompts. Kept local so a model
/// outage cannot take the news phase down with it.
pub fn digest(articles: &[NewsArticle]) -> String {
    if articles.is_empty() {
        return "No relevant news articles were found.".to_string();
    }
    articles
        .iter()
        .take(10)
        .map(|a| format!("- {} ({}): {}", a.title, a.source, a.snippet))
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn run_news_phase(
    a: &Analyzer,
    snapshot: &MarketSnapshot,
    event_context: Option<&EventContext>,
    plan: NewsPlan,
) -> Result<NewsContext, PhaseError> {
    let queries = build_queries(snapshot, event_context);
    let mut batches = Vec::new();
    let mut last_err: Option<ProviderError> = None;

    for query in &queries {
        let key = fingerprint(
            a.news_guard.name(),
            &["search", query, &plan.max_per_query.to_string()],
        );
        let result: Result<NewsBatch, ProviderError> = a
            .news_guard
            .call(&key, || {
                let provider = Arc::clone(&a.news);
                let query = NewsQuery {
                    query: query.clone(),
                    max_results: plan.max_per_query,
                };
                async move { provider.search(&query).await }
            })
            .await;
        match result {
            Ok(batch) => batches.push(batch.articles),
            Err(e) => {
                warn!(query, error = %e, "news query failed");
                last_err = Some(e);
            }
        }
    }

    let articles = aggregate_articles(batches, plan.max_per_query, plan.max_articles);
    if articles.is_empty() {
        // Partial query failures are tolerable; a run with zero articles and
        // at least one failure is not.
        if let Some(err) = last_err {
            return Err(err.into());
        }
    }
    let summary = digest(&articles);
    Ok(NewsContext {
        queries,
        articles,
        summary,
    })
}

// ---------------------------------------------------------------------------
// Signal phase
// ---------------------------------------------------------------------------

pub async fn run_signal_phase(
    a: &Analyzer,
    snapshot: &MarketSnapshot,
    horizon: Horizon,
    preset: StrategyPreset,
    params: &StrategyParams,
    news: &NewsContext,
) -> Result<(Signal, Decision), PhaseError> {
    let req = SignalRequest {
        question: snapshot.question.clone(),
        yes_price: snapshot.yes_price,
        horizon: horizon.to_string(),
        strategy_preset: preset.to_string(),
        news_digest: news.summary.clone(),
    };
    let key = fingerprint(
        a.model_guard.name(),
        &["signal", &snapshot.slug, &req.horizon, &req.strategy_preset],
    );
    let bundle: SignalBundle = a
        .model_guard
        .call(&key, || {
            let provider = Arc::clone(&a.model);
            let req = req.clone();
            async move { provider.generate_signal(&req).await }
        })
        .await?;
    Ok(apply_strategy_gate(bundle.signal, bundle.decision, params))
}

/// Post-model risk gates. The model proposes; the configured strategy
/// parameters dispose.
pub fn apply_strategy_gate(
    signal: Signal,
    mut decision: Decision,
    params: &StrategyParams,
) -> (Signal, Decision) {
    let mut gates: Vec<String> = Vec::new();

    if params.risk_off == Some(true) && decision.action != DecisionAction::Hold {
        decision.action = DecisionAction::Hold;
        gates.push("risk-off: new positions disabled".to_string());
    }

    if let Some(required) = params.min_confidence {
        if signal.confidence < required && decision.action != DecisionAction::Hold {
            decision.action = DecisionAction::Hold;
            gates.push(format!(
                "confidence {:?} below required {:?}",
                signal.confidence, required
            ));
        }
    }

    if let Some(min_edge) = params.min_edge_pct {
        if decision.edge_pct.abs() < min_edge && decision.action != DecisionAction::Hold {
            decision.action = DecisionAction::Hold;
            gates.push(format!(
                "edge {:.2}% below required {:.2}%",
                decision.edge_pct, min_edge
            ));
        }
    }

    if let Some(max_kelly) = params.max_kelly_fraction {
        if decision.toy_kelly_fraction > max_kelly {
            decision.toy_kelly_fraction = max_kelly;
            gates.push(format!("kelly fraction capped at {max_kelly:.2}"));
        }
    }

    if !gates.is_empty() {
        let gate_note = gates.join("; ");
        if decision.notes.is_empty() {
            decision.notes = gate_note;
        } else {
            decision.notes = format!("{}; {}", decision.notes, gate_note);
        }
    }
    (signal, decision)
}

// ---------------------------------------------------------------------------
// Report phase
// ---------------------------------------------------------------------------

pub async fn run_report_phase(
    a: &Analyzer,
    snapshot: &MarketSnapshot,
    horizon: Horizon,
    signal: &Signal,
    decision: &Decision,
    news: &NewsContext,
) -> Result<ReportBlock, PhaseError> {
    let req = ReportRequest {
        question: snapshot.question.clone(),
        horizon: horizon.to_string(),
        signal: signal.clone(),
        decision: decision.clone(),
        news_digest: news.summary.clone(),
    };
    let key = fingerprint(
        a.model_guard.name(),
        &["report", &snapshot.slug, &req.horizon],
    );
    let report: ReportBlock = a
        .model_guard
        .call(&key, || {
            let provider = Arc::clone(&a.model);
            let req = req.clone();
            async move { provider.generate_report(&req).await }
        })
        .await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConfidenceLevel;

    fn article(url: &str, title: &str) -> NewsArticle {
        NewsArticle {
            title: title.to_string(),
            source: "example.com".to_string(),
            url: url.to_string(),
            published_at: None,
            snippet: "snippet".to_string(),
        }
    }

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            slug: "fed-cut".to_string(),
            url: "https://polymarket.com/event/fed-cut".to_string(),
            question: "Will the Fed cut rates in December?".to_string(),
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            yes_index: 0,
            yes_price: 0.62,
            no_price: 0.38,
            best_bid: 0.61,
            best_ask: 0.63,
            last_trade_price: 0.62,
            volume: 1000.0,
            liquidity: 500.0,
            end_date: None,
            group_item_title: None,
        }
    }

    fn signal(confidence: ConfidenceLevel) -> Signal {
        Signal {
            direction: crate::types::SignalDirection::Up,
            model_prob: 0.7,
            market_prob: 0.62,
            expected_delta_range: [0.02, 0.08],
            confidence,
            rationale: String::new(),
        }
    }

    fn buy(edge_pct: f64, kelly: f64) -> Decision {
        Decision {
            action: DecisionAction::Buy,
            edge_pct,
            toy_kelly_fraction: kelly,
            notes: String::new(),
        }
    }

    #[test]
    fn queries_lead_with_the_question_and_skip_duplicate_titles() {
        let event = EventContext {
            title: "Fed decision December 2026".to_string(),
            description: String::new(),
            category: "economy".to_string(),
        };
        let queries = build_queries(&snapshot(), Some(&event));
        assert_eq!(queries[0], "Will the Fed cut rates in December?");
        assert_eq!(queries[1], "Fed decision December 2026");
        assert_eq!(queries.len(), 3);

        let same_title = EventContext {
            title: "will the fed cut rates in december?".to_string(),
            ..event
        };
        assert_eq!(build_queries(&snapshot(), Some(&same_title)).len(), 2);
    }

    #[test]
    fn aggregation_dedupes_across_queries_and_caps() {
        let batches = vec![
            vec![article("u1", "a"), article("u2", "b"), article("u3", "c")],
            vec![article("u2", "b again"), article("u4", "d")],
        ];
        let merged = aggregate_articles(batches.clone(), 2, 10);
        let urls: Vec<&str> = merged.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, vec!["u1", "u2", "u4"], "per-query cap then dedupe");

        let capped = aggregate_articles(batches, 10, 2);
        assert_eq!(capped.len(), 2, "total cap");
    }

    #[test]
    fn news_plan_respects_the_ceiling() {
        let opts = AnalyzeOptions {
            max_articles: Some(500),
            max_articles_per_query: Some(100),
            min_confidence: None,
        };
        let plan = NewsPlan::from_options(Some(&opts));
        assert_eq!(plan.max_articles, MAX_ARTICLES_CEILING);
        assert_eq!(plan.max_per_query, MAX_ARTICLES_CEILING);

        let defaults = NewsPlan::from_options(None);
        assert_eq!(defaults.max_articles, 15);
        assert_eq!(defaults.max_per_query, 8);
    }

    #[test]
    fn empty_digest_says_so() {
        assert!(digest(&[]).contains("No relevant news"));
        let d = digest(&[article("u1", "Fed holds steady")]);
        assert!(d.contains("Fed holds steady"));
    }

    #[test]
    fn low_confidence_forces_hold() {
        let params = StrategyParams {
            min_confidence: Some(ConfidenceLevel::High),
            ..StrategyParams::default()
        };
        let (_, decision) = apply_strategy_gate(signal(ConfidenceLevel::Low), buy(10.0, 0.1), &params);
        assert_eq!(decision.action, DecisionAction::Hold);
        assert!(decision.notes.contains("confidence"));
    }

    #[test]
    fn risk_off_forces_hold() {
        let params = StrategyParams {
            risk_off: Some(true),
            ..StrategyParams::default()
        };
        let (_, decision) =
            apply_strategy_gate(signal(ConfidenceLevel::High), buy(10.0, 0.1), &params);
        assert_eq!(decision.action, DecisionAction::Hold);
    }

    #[test]
    fn kelly_fraction_is_clamped() {
        let params = StrategyParams {
            max_kelly_fraction: Some(0.05),
            ..StrategyParams::default()
        };
        let (_, decision) =
            apply_strategy_gate(signal(ConfidenceLevel::High), buy(10.0, 0.25), &params);
        assert_eq!(decision.action, DecisionAction::Buy);
        assert_eq!(decision.toy_kelly_fraction, 0.05);
    }

    #[test]
    fn confident_decision_passes_untouched() {
        let params = StrategyParams {
            min_confidence: Some(ConfidenceLevel::Medium),
            min_edge_pct: Some(2.0),
            ..StrategyParams::default()
        };
        let (_, decision) =
            apply_strategy_gate(signal(ConfidenceLevel::High), buy(8.0, 0.05), &params);
        assert_eq!(decision.action, DecisionAction::Buy);
        assert!(decision.notes.is_empty());
    }

    #[test]
    fn snapshot_mapping_defaults_missing_numerics() {
        let m = MarketRecord {
            gamma_market_id: "1".to_string(),
            slug: "fed-cut".to_string(),
            polymarket_url: "https://polymarket.com/event/fed-cut".to_string(),
            question: "Will the Fed cut rates?".to_string(),
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            yes_index: 0,
            group_item_title: None,
            yes_price: None,
            no_price: None,
            best_bid: None,
            best_ask: None,
            volume_24h: Some(12.0),
            volume_total: None,
            liquidity: None,
            end_date: None,
        };
        let s = snapshot_from(&m);
        assert_eq!(s.yes_price, 0.0);
        assert_eq!(s.volume, 12.0, "falls back to 24h volume");
    }
}
