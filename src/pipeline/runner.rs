use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::{NewRun, PhasePatch};
use crate::error::Result;
use crate::pipeline::phases::{self, MarketResolution, NewsPlan};
use crate::pipeline::Analyzer;
use crate::types::{AnalyzeRequest, Phase, StrategyParams};

pub fn new_run_id() -> String {
    format!("run-{}", Uuid::new_v4().simple())
}

/// Effective strategy parameters: an explicit `configuration.min_confidence`
/// wins over the one inside `strategy_params`.
fn merged_params(req: &AnalyzeRequest) -> StrategyParams {
    let mut params = req.strategy_params.clone().unwrap_or_default();
    if let Some(min) = req.configuration.as_ref().and_then(|c| c.min_confidence) {
        params.min_confidence = Some(min);
    }
    params
}

/// Create the run row and spawn execution. Returns as soon as the row is
/// durable; callers poll `GET /run/:run_id` for progress.
pub async fn start_run(a: Arc<Analyzer>, req: AnalyzeRequest) -> Result<String> {
    let run_id = new_run_id();
    let params = merged_params(&req);
    a.store
        .create_run(NewRun {
            run_id: &run_id,
            market_url: &req.market_url,
            slug: None,
            horizon: req.horizon.unwrap_or_default(),
            strategy_preset: req.strategy_preset.unwrap_or_default(),
            strategy_params: &params,
            env: &a.env,
        })
        .await?;

    let spawned_id = run_id.clone();
    tokio::spawn(async move {
        run_analysis(a, spawned_id, req).await;
    });
    Ok(run_id)
}

/// Execute the four phases sequentially against an existing run row.
pub async fn run_analysis(a: Arc<Analyzer>, run_id: String, req: AnalyzeRequest) {
    let started = Instant::now();
    let horizon = req.horizon.unwrap_or_default();
    let preset = req.strategy_preset.unwrap_or_default();
    let params = merged_params(&req);
    let plan = NewsPlan::from_options(req.configuration.as_ref());
    let mut trace = TraceRecorder::new(a.trace_enabled);

    info!(run_id, market_url = %req.market_url, %horizon, "starting analysis run");

    // Phase 1: market resolution.
    let t = Instant::now();
    let resolution =
        phases::run_market_phase(&a, &req.market_url, req.selected_market_slug.as_deref()).await;
    let (snapshot, event_context) = match resolution {
        Err(e) => {
            trace.step("market", "error", t);
            fail_from(&a, &run_id, Phase::Market, &e.to_string()).await;
            trace.finish(&a, &run_id).await;
            return;
        }
        Ok(MarketResolution::NeedsSelection {
            event_context,
            options,
        }) => {
            trace.step("market", "needs_selection", t);
            persist(
                &a,
                &run_id,
                PhasePatch::MarketDone {
                    snapshot: None,
                    event_context,
                    market_options: Some(options),
                    requires_selection: true,
                    slug: None,
                },
            )
            .await;
            // The run stays here; picking an option starts a new run.
            info!(run_id, "market selection required, run paused");
            trace.finish(&a, &run_id).await;
            return;
        }
        Ok(MarketResolution::Resolved {
            snapshot,
            event_context,
            event,
            market,
        }) => {
            trace.step("market", "done", t);

            // Canonical event/market rows. Failures here are logged and the
            // analysis continues; the run document is the source of truth
            // for pollers.
            let mut event_id = None;
            if let Some(event) = &event {
                match a.store.upsert_event(event).await {
                    Ok(id) => event_id = Some(id),
                    Err(e) => warn!(run_id, error = %e, "event upsert failed"),
                }
            }
            let market_id = match a.store.upsert_market(&market, event_id).await {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(run_id, error = %e, "market upsert failed");
                    None
                }
            };
            if let Err(e) = a.store.link_refs(&run_id, event_id, market_id).await {
                warn!(run_id, error = %e, "linking run references failed");
            }

            persist(
                &a,
                &run_id,
                PhasePatch::MarketDone {
                    snapshot: Some(snapshot.clone()),
                    event_context: event_context.clone(),
                    market_options: None,
                    requires_selection: false,
                    slug: Some(snapshot.slug.clone()),
                },
            )
            .await;
            (snapshot, event_context)
        }
    };

    // Phase 2: news.
    let t = Instant::now();
    let news = match phases::run_news_phase(&a, &snapshot, event_context.as_ref(), plan).await {
        Ok(news) => {
            trace.step("news", "done", t);
            persist(&a, &run_id, PhasePatch::NewsDone { news: news.clone() }).await;
            news
        }
        Err(e) => {
            trace.step("news", "error", t);
            fail_from(&a, &run_id, Phase::News, &e.to_string()).await;
            trace.finish(&a, &run_id).await;
            return;
        }
    };

    // Phase 3: signal and decision.
    let t = Instant::now();
    let (signal, decision) =
        match phases::run_signal_phase(&a, &snapshot, horizon, preset, &params, &news).await {
            Ok(out) => {
                trace.step("signal", "done", t);
                persist(
                    &a,
                    &run_id,
                    PhasePatch::SignalDone {
                        signal: out.0.clone(),
                        decision: out.1.clone(),
                    },
                )
                .await;
                out
            }
            Err(e) => {
                trace.step("signal", "error", t);
                fail_from(&a, &run_id, Phase::Signal, &e.to_string()).await;
                trace.finish(&a, &run_id).await;
                return;
            }
        };

    // Phase 4: report.
    let t = Instant::now();
    match phases::run_report_phase(&a, &snapshot, horizon, &signal, &decision, &news).await {
        Ok(report) => {
            trace.step("report", "done", t);
            persist(&a, &run_id, PhasePatch::ReportDone { report }).await;
        }
        Err(e) => {
            trace.step("report", "error", t);
            fail_from(&a, &run_id, Phase::Report, &e.to_string()).await;
            trace.finish(&a, &run_id).await;
            return;
        }
    }

    info!(
        run_id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "analysis run complete"
    );
    trace.finish(&a, &run_id).await;
}

/// Mark `phase` as failed and every phase after it as skipped, so the run
/// reaches a terminal state pollers can act on instead of hanging pending.
async fn fail_from(a: &Analyzer, run_id: &str, phase: Phase, reason: &str) {
    error!(run_id, phase = %phase, reason, "phase failed");
    persist(
        a,
        run_id,
        PhasePatch::Error {
            phase,
            reason: reason.to_string(),
        },
    )
    .await;
    for downstream in phase.downstream() {
        persist(
            a,
            run_id,
            PhasePatch::Error {
                phase: *downstream,
                reason: format!("skipped: {phase} phase failed"),
            },
        )
        .await;
    }
}

/// Apply one patch, retrying store failures on the shared backoff schedule.
/// A patch that cannot be persisted is abandoned after logging; a completed
/// phase nobody can observe is no better than one that never ran.
async fn persist(a: &Analyzer, run_id: &str, patch: PhasePatch) -> bool {
    let mut attempt = 1u32;
    loop {
        match a.store.patch_phase(run_id, patch.clone()).await {
            Ok(applied) => return applied,
            Err(e) if attempt >= a.store_backoff.max_attempts => {
                error!(run_id, error = %e, "store write abandoned");
                return false;
            }
            Err(e) => {
                warn!(run_id, attempt, error = %e, "store write failed, retrying");
                tokio::time::sleep(a.store_backoff.delay(attempt)).await;
                attempt += 1;
            }
        }
    }
}

struct TraceRecorder {
    enabled: bool,
    steps: Vec<serde_json::Value>,
}

impl TraceRecorder {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            steps: Vec::new(),
        }
    }

    fn step(&mut self, phase: &str, outcome: &str, started: Instant) {
        if self.enabled {
            self.steps.push(json!({
                "phase": phase,
                "outcome": outcome,
                "elapsed_ms": started.elapsed().as_millis() as u64,
                "at": Utc::now().to_rfc3339(),
            }));
        }
    }

    async fn finish(self, a: &Analyzer, run_id: &str) {
        if !self.enabled || self.steps.is_empty() {
            return;
        }
        let trace_id = format!("trace-{}", Uuid::new_v4().simple());
        if let Err(e) = a
            .store
            .create_trace(run_id, &trace_id, &json!(self.steps))
            .await
        {
            warn!(run_id, error = %e, "trace persistence failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::{migrations, RunStore};
    use crate::providers::{
        EventBundle, MarketDataProvider, ModelProvider, NewsBatch, NewsProvider, NewsQuery,
        ProviderError, ProviderResult, ReportRequest, SignalBundle, SignalRequest,
    };
    use crate::resilience::TieredCache;
    use crate::types::{
        ConfidenceLevel, Decision, DecisionAction, EventRecord, MarketRecord, NewsArticle,
        PhaseStatus, ReportBlock, Signal, SignalDirection,
    };
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            gamma_api_url: String::new(),
            news_api_url: String::new(),
            news_api_key: None,
            model_api_url: String::new(),
            model_api_key: None,
            model_name: "test-model".to_string(),
            log_level: "info".to_string(),
            db_path: ":memory:".to_string(),
            api_port: 0,
            breaker_failure_threshold: 2,
            breaker_success_threshold: 1,
            breaker_cooldown: Duration::from_secs(3600),
            retry_base: Duration::from_millis(1),
            retry_multiplier: 2.0,
            retry_max: Duration::from_millis(2),
            retry_max_attempts: 1,
            market_cache_ttl: Duration::from_secs(60),
            news_cache_ttl: Duration::from_secs(60),
            model_cache_ttl: Duration::from_secs(60),
            redis_url: None,
            trace_enabled: false,
        }
    }

    fn market(id: &str, slug: &str, volume_24h: f64) -> MarketRecord {
        MarketRecord {
            gamma_market_id: id.to_string(),
            slug: slug.to_string(),
            polymarket_url: format!("https://polymarket.com/event/{slug}"),
            question: slug.replace('-', " "),
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            yes_index: 0,
            group_item_title: None,
            yes_price: Some(0.6),
            no_price: Some(0.4),
            best_bid: Some(0.59),
            best_ask: Some(0.61),
            volume_24h: Some(volume_24h),
            volume_total: Some(volume_24h * 10.0),
            liquidity: Some(100.0),
            end_date: None,
        }
    }

    fn event() -> EventRecord {
        EventRecord {
            gamma_event_id: "77".to_string(),
            slug: "fed-december".to_string(),
            title: "Fed decision in December".to_string(),
            description: "Rate decision event".to_string(),
            category: "economy".to_string(),
            image: None,
            end_date: None,
        }
    }

    struct StubMarketData {
        bundle: EventBundle,
    }

    #[async_trait]
    impl MarketDataProvider for StubMarketData {
        async fn resolve(&self, _slug: &str) -> ProviderResult<EventBundle> {
            Ok(self.bundle.clone())
        }
    }

    struct StubNews;

    #[async_trait]
    impl NewsProvider for StubNews {
        async fn search(&self, query: &NewsQuery) -> ProviderResult<NewsBatch> {
            Ok(NewsBatch {
                articles: vec![NewsArticle {
                    title: format!("About: {}", query.query),
                    source: "example.com".to_string(),
                    url: format!("https://example.com/{}", query.query.len()),
                    published_at: None,
                    snippet: "snippet".to_string(),
                }],
            })
        }
    }

    struct DownNews;

    #[async_trait]
    impl NewsProvider for DownNews {
        async fn search(&self, _query: &NewsQuery) -> ProviderResult<NewsBatch> {
            Err(ProviderError::Unavailable {
                provider: "news",
                detail: "connection refused".to_string(),
            })
        }
    }

    struct StubModel;

    #[async_trait]
    impl ModelProvider for StubModel {
        async fn generate_signal(&self, _req: &SignalRequest) -> ProviderResult<SignalBundle> {
            Ok(SignalBundle {
                signal: Signal {
                    direction: SignalDirection::Up,
                    model_prob: 0.72,
                    market_prob: 0.6,
                    expected_delta_range: [0.02, 0.1],
                    confidence: ConfidenceLevel::High,
                    rationale: "stub".to_string(),
                },
                decision: Decision {
                    action: DecisionAction::Buy,
                    edge_pct: 12.0,
                    toy_kelly_fraction: 0.08,
                    notes: String::new(),
                },
            })
        }

        async fn generate_report(&self, _req: &ReportRequest) -> ProviderResult<ReportBlock> {
            Ok(ReportBlock {
                headline: "Stub headline".to_string(),
                thesis: "Stub thesis".to_string(),
                bull_case: vec!["bull".to_string()],
                bear_case: vec!["bear".to_string()],
                key_risks: vec!["risk".to_string()],
                execution_notes: String::new(),
            })
        }
    }

    async fn analyzer(
        bundle: EventBundle,
        news: Arc<dyn NewsProvider>,
    ) -> Arc<Analyzer> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrations::apply(&pool).await.unwrap();
        Arc::new(Analyzer::new(
            &test_config(),
            RunStore::new(pool),
            Arc::new(StubMarketData { bundle }),
            news,
            Arc::new(StubModel),
            Arc::new(TieredCache::new(None)),
        ))
    }

    async fn start(a: &Arc<Analyzer>, run_id: &str, selected: Option<&str>) -> AnalyzeRequest {
        let req = AnalyzeRequest {
            market_url: "https://polymarket.com/event/fed-december".to_string(),
            selected_market_slug: selected.map(str::to_string),
            horizon: None,
            strategy_preset: None,
            strategy_params: None,
            configuration: None,
        };
        a.store
            .create_run(NewRun {
                run_id,
                market_url: &req.market_url,
                slug: None,
                horizon: req.horizon.unwrap_or_default(),
                strategy_preset: req.strategy_preset.unwrap_or_default(),
                strategy_params: &StrategyParams::default(),
                env: &a.env,
            })
            .await
            .unwrap();
        req
    }

    #[test]
    fn run_ids_carry_the_run_prefix() {
        let id = new_run_id();
        assert!(id.starts_with("run-"));
        assert_ne!(id, new_run_id());
    }

    #[tokio::test]
    async fn single_market_run_completes_every_phase() {
        let bundle = EventBundle {
            event: Some(event()),
            markets: vec![market("1", "fed-cut-25bp", 100.0)],
        };
        let a = analyzer(bundle, Arc::new(StubNews)).await;
        let req = start(&a, "run-1", None).await;

        run_analysis(Arc::clone(&a), "run-1".to_string(), req).await;

        let view = a.store.get_run("run-1").await.unwrap().unwrap();
        assert!(view.complete);
        assert_eq!(view.status.market, PhaseStatus::Done);
        assert_eq!(view.status.report, PhaseStatus::Done);
        assert_eq!(view.slug.as_deref(), Some("fed-cut-25bp"));
        assert!(view.market_snapshot.is_some());
        assert!(!view.news_context.unwrap().articles.is_empty());
        assert_eq!(view.signal.unwrap().direction, SignalDirection::Up);
        assert_eq!(view.decision.unwrap().action, DecisionAction::Buy);
        assert!(view.report.is_some());
        assert!(!view.requires_market_selection);
        assert!(view.errors.is_empty());
    }

    #[tokio::test]
    async fn ambiguous_event_pauses_for_selection_then_a_new_run_resolves() {
        let bundle = EventBundle {
            event: Some(event()),
            markets: vec![
                market("1", "fed-cut-25bp", 100.0),
                market("2", "fed-cut-50bp", 900.0),
            ],
        };
        let a = analyzer(bundle, Arc::new(StubNews)).await;

        let req = start(&a, "run-1", None).await;
        run_analysis(Arc::clone(&a), "run-1".to_string(), req).await;

        let paused = a.store.get_run("run-1").await.unwrap().unwrap();
        assert_eq!(paused.status.market, PhaseStatus::Done);
        assert!(paused.requires_market_selection);
        assert!(paused.market_snapshot.is_none());
        let options = paused.market_options.unwrap();
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].slug, "fed-cut-50bp", "ranked by activity");
        assert_eq!(paused.status.news, PhaseStatus::Pending, "no later phase ran");
        assert!(!paused.complete);

        // Selecting an option starts a fresh run; the paused one is left as-is.
        let req = start(&a, "run-2", Some("fed-cut-50bp")).await;
        run_analysis(Arc::clone(&a), "run-2".to_string(), req).await;

        let resolved = a.store.get_run("run-2").await.unwrap().unwrap();
        assert!(resolved.complete);
        assert_eq!(resolved.slug.as_deref(), Some("fed-cut-50bp"));
        assert!(!resolved.requires_market_selection);

        let original = a.store.get_run("run-1").await.unwrap().unwrap();
        assert!(original.requires_market_selection, "fork never mutates the paused run");
    }

    #[tokio::test]
    async fn news_outage_fails_news_and_skips_downstream() {
        let bundle = EventBundle {
            event: Some(event()),
            markets: vec![market("1", "fed-cut-25bp", 100.0)],
        };
        let a = analyzer(bundle, Arc::new(DownNews)).await;
        let req = start(&a, "run-1", None).await;

        run_analysis(Arc::clone(&a), "run-1".to_string(), req).await;

        let view = a.store.get_run("run-1").await.unwrap().unwrap();
        assert_eq!(view.status.market, PhaseStatus::Done, "market already landed");
        assert!(view.market_snapshot.is_some());
        assert_eq!(view.status.news, PhaseStatus::Error);
        assert_eq!(view.status.signal, PhaseStatus::Error);
        assert_eq!(view.status.report, PhaseStatus::Error);
        assert!(view.complete, "errors are terminal too");
        assert!(view.errors.get("news").unwrap().contains("unavailable"));
        assert_eq!(
            view.errors.get("signal").map(String::as_str),
            Some("skipped: news phase failed")
        );
        assert_eq!(
            view.errors.get("report").map(String::as_str),
            Some("skipped: news phase failed")
        );
    }

    #[tokio::test]
    async fn bad_market_url_fails_the_whole_run() {
        let bundle = EventBundle {
            event: None,
            markets: vec![market("1", "fed-cut-25bp", 100.0)],
        };
        let a = analyzer(bundle, Arc::new(StubNews)).await;
        let mut req = start(&a, "run-1", None).await;
        req.market_url = "   ".to_string();

        run_analysis(Arc::clone(&a), "run-1".to_string(), req).await;

        let view = a.store.get_run("run-1").await.unwrap().unwrap();
        assert_eq!(view.status.market, PhaseStatus::Error);
        assert!(view.complete);
        assert!(view.errors.get("market").unwrap().contains("slug"));
        assert_eq!(
            view.errors.get("news").map(String::as_str),
            Some("skipped: market phase failed")
        );
    }

    #[tokio::test]
    async fn start_run_returns_an_id_and_creates_the_row() {
        let bundle = EventBundle {
            event: Some(event()),
            markets: vec![market("1", "fed-cut-25bp", 100.0)],
        };
        let a = analyzer(bundle, Arc::new(StubNews)).await;
        let req = AnalyzeRequest {
            market_url: "https://polymarket.com/event/fed-december".to_string(),
            selected_market_slug: None,
            horizon: None,
            strategy_preset: None,
            strategy_params: None,
            configuration: None,
        };

        let run_id = start_run(Arc::clone(&a), req).await.unwrap();
        assert!(run_id.starts_with("run-"));
        assert!(a.store.get_run(&run_id).await.unwrap().is_some());
    }
}
