use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::health::{health_snapshot, HealthResponse};
use crate::error::{AppError, Result};
use crate::pipeline::{runner, Analyzer};
use crate::ranking::{rank_markets, SortMode};
use crate::resilience::BreakerState;
use crate::types::{AnalyzeRequest, MarketOption, RunView};

#[derive(Clone)]
pub struct ApiState {
    pub analyzer: Arc<Analyzer>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/analyze/start", post(start_analysis))
        .route("/run/:run_id", get(get_run))
        .route("/runs/recent", get(get_recent_runs))
        .route("/runs", get(get_runs_by_market))
        .route("/markets/rank", post(rank))
        .route("/admin/breakers/:provider/reset", post(reset_breaker))
        .route("/health", get(health))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RecentRunsQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct RunsByMarketQuery {
    pub market_slug: Option<String>,
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub run_id: String,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub run: RunView,
}

#[derive(Debug, Serialize)]
pub struct RunListResponse {
    pub runs: Vec<RunView>,
}

#[derive(Deserialize)]
pub struct RankRequest {
    pub markets: Vec<MarketOption>,
    #[serde(default)]
    pub mode: SortMode,
}

#[derive(Serialize)]
pub struct RankResponse {
    pub markets: Vec<MarketOption>,
}

#[derive(Debug, Serialize)]
pub struct BreakerResetResponse {
    pub provider: String,
    pub state: BreakerState,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn start_analysis(
    State(state): State<ApiState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<StartResponse>> {
    if req.market_url.trim().is_empty() {
        return Err(AppError::InvalidRequest("market_url is required".to_string()));
    }
    let run_id = runner::start_run(Arc::clone(&state.analyzer), req).await?;
    info!(run_id, "analysis run accepted");
    Ok(Json(StartResponse { run_id }))
}

/// Known garbage ids from polling clients that interpolate an unset
/// variable. Rejected before any lookup so they 400 instead of 404.
fn validate_run_id(run_id: &str) -> Result<()> {
    match run_id.trim() {
        "" | "undefined" | "null" => Err(AppError::InvalidRequest(format!(
            "invalid run id '{run_id}'"
        ))),
        _ => Ok(()),
    }
}

async fn get_run(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunResponse>> {
    validate_run_id(&run_id)?;
    let run = state
        .analyzer
        .store
        .get_run(&run_id)
        .await?
        .ok_or(AppError::NotFound("run"))?;
    Ok(Json(RunResponse { run }))
}

async fn get_recent_runs(
    State(state): State<ApiState>,
    Query(params): Query<RecentRunsQuery>,
) -> Result<Json<RunListResponse>> {
    let limit = params.limit.unwrap_or(20).clamp(1, 50);
    let runs = state.analyzer.store.list_recent_runs(limit).await?;
    Ok(Json(RunListResponse { runs }))
}

async fn get_runs_by_market(
    State(state): State<ApiState>,
    Query(params): Query<RunsByMarketQuery>,
) -> Result<Json<RunListResponse>> {
    let slug = params
        .market_slug
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::InvalidRequest("market_slug is required".to_string()))?;
    let runs = state.analyzer.store.list_runs_by_market(slug).await?;
    Ok(Json(RunListResponse { runs }))
}

async fn rank(Json(req): Json<RankRequest>) -> Json<RankResponse> {
    Json(RankResponse {
        markets: rank_markets(&req.markets, req.mode),
    })
}

async fn reset_breaker(
    State(state): State<ApiState>,
    Path(provider): Path<String>,
) -> Result<Json<BreakerResetResponse>> {
    let guard = state
        .analyzer
        .guard_by_name(&provider)
        .ok_or(AppError::NotFound("provider"))?;
    guard.breaker().reset();
    info!(provider, "breaker reset via admin route");
    Ok(Json(BreakerResetResponse {
        provider,
        state: guard.breaker().state(),
    }))
}

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(health_snapshot(&state.analyzer).await)
}
