use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::warn;

use crate::db::models::RunRow;
use crate::error::Result;
use crate::types::{
    Decision, EventContext, EventRecord, MarketOption, MarketRecord, MarketSnapshot, NewsContext,
    Phase, ReportBlock, RunEnv, RunView, Signal, StrategyParams,
};

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Parameters for a freshly created run. Statuses start at `pending` and
/// every payload column starts NULL.
pub struct NewRun<'a> {
    pub run_id: &'a str,
    pub market_url: &'a str,
    pub slug: Option<&'a str>,
    pub horizon: crate::types::Horizon,
    pub strategy_preset: crate::types::StrategyPreset,
    pub strategy_params: &'a StrategyParams,
    pub env: &'a RunEnv,
}

/// A single field-scoped update to one phase of one run. Every variant
/// carries exactly the payload its phase is allowed to write, so callers
/// cannot attach a payload to an error or touch another phase's columns.
#[derive(Clone)]
pub enum PhasePatch {
    /// Normal market-phase completion. `snapshot: None` with
    /// `requires_selection: true` is the disambiguation outcome.
    MarketDone {
        snapshot: Option<MarketSnapshot>,
        event_context: Option<EventContext>,
        market_options: Option<Vec<MarketOption>>,
        requires_selection: bool,
        slug: Option<String>,
    },
    NewsDone {
        news: NewsContext,
    },
    SignalDone {
        signal: Signal,
        decision: Decision,
    },
    ReportDone {
        report: ReportBlock,
    },
    Error {
        phase: Phase,
        reason: String,
    },
}

impl PhasePatch {
    pub fn phase(&self) -> Phase {
        match self {
            PhasePatch::MarketDone { .. } => Phase::Market,
            PhasePatch::NewsDone { .. } => Phase::News,
            PhasePatch::SignalDone { .. } => Phase::Signal,
            PhasePatch::ReportDone { .. } => Phase::Report,
            PhasePatch::Error { phase, .. } => *phase,
        }
    }
}

/// All persistence for runs, events and markets. Updates are field-scoped:
/// each patch touches only its own phase's columns, so concurrent phases of
/// the same run never clobber each other.
#[derive(Clone)]
pub struct RunStore {
    pool: SqlitePool,
}

impl RunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Liveness probe for the health endpoint.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn create_run(&self, new: NewRun<'_>) -> Result<()> {
        let ts = now();
        sqlx::query(
            r#"
            INSERT INTO runs (
                run_id, market_url, slug, run_at, horizon, strategy_preset,
                strategy_params, app_version, model, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.run_id)
        .bind(new.market_url)
        .bind(new.slug)
        .bind(&ts)
        .bind(new.horizon.to_string())
        .bind(new.strategy_preset.to_string())
        .bind(to_json(new.strategy_params)?)
        .bind(&new.env.app_version)
        .bind(&new.env.model)
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Apply one phase patch. A phase only moves out of `pending`; patches
    /// against a terminal phase are dropped and reported as `false`.
    pub async fn patch_phase(&self, run_id: &str, patch: PhasePatch) -> Result<bool> {
        let ts = now();
        let result = match patch {
            PhasePatch::MarketDone {
                snapshot,
                event_context,
                market_options,
                requires_selection,
                slug,
            } => {
                sqlx::query(
                    r#"
                    UPDATE runs SET
                        status_market = 'done',
                        market_snapshot = ?,
                        event_context = ?,
                        market_options = ?,
                        requires_market_selection = ?,
                        slug = COALESCE(?, slug),
                        updated_at = ?
                    WHERE run_id = ? AND status_market = 'pending'
                    "#,
                )
                .bind(snapshot.as_ref().map(to_json).transpose()?)
                .bind(event_context.as_ref().map(to_json).transpose()?)
                .bind(market_options.as_ref().map(to_json).transpose()?)
                .bind(i64::from(requires_selection))
                .bind(slug)
                .bind(&ts)
                .bind(run_id)
                .execute(&self.pool)
                .await?
            }
            PhasePatch::NewsDone { news } => {
                sqlx::query(
                    r#"
                    UPDATE runs SET status_news = 'done', news_context = ?, updated_at = ?
                    WHERE run_id = ? AND status_news = 'pending'
                    "#,
                )
                .bind(to_json(&news)?)
                .bind(&ts)
                .bind(run_id)
                .execute(&self.pool)
                .await?
            }
            PhasePatch::SignalDone { signal, decision } => {
                sqlx::query(
                    r#"
                    UPDATE runs SET status_signal = 'done', signal = ?, decision = ?, updated_at = ?
                    WHERE run_id = ? AND status_signal = 'pending'
                    "#,
                )
                .bind(to_json(&signal)?)
                .bind(to_json(&decision)?)
                .bind(&ts)
                .bind(run_id)
                .execute(&self.pool)
                .await?
            }
            PhasePatch::ReportDone { report } => {
                sqlx::query(
                    r#"
                    UPDATE runs SET status_report = 'done', report = ?, updated_at = ?
                    WHERE run_id = ? AND status_report = 'pending'
                    "#,
                )
                .bind(to_json(&report)?)
                .bind(&ts)
                .bind(run_id)
                .execute(&self.pool)
                .await?
            }
            PhasePatch::Error { phase, reason } => {
                let (status_col, error_col) = match phase {
                    Phase::Market => ("status_market", "market_error"),
                    Phase::News => ("status_news", "news_error"),
                    Phase::Signal => ("status_signal", "signal_error"),
                    Phase::Report => ("status_report", "report_error"),
                };
                let sql = format!(
                    "UPDATE runs SET {status_col} = 'error', {error_col} = ?, updated_at = ? \
                     WHERE run_id = ? AND {status_col} = 'pending'"
                );
                sqlx::query(&sql)
                    .bind(reason)
                    .bind(&ts)
                    .bind(run_id)
                    .execute(&self.pool)
                    .await?
            }
        };

        let applied = result.rows_affected() > 0;
        if !applied {
            warn!(run_id, "phase patch dropped: phase already terminal or run missing");
        }
        Ok(applied)
    }

    /// Attach the persisted event/market row ids to a run after the market
    /// phase resolved them.
    pub async fn link_refs(
        &self,
        run_id: &str,
        event_id: Option<i64>,
        market_id: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE runs SET event_id = COALESCE(?, event_id),
                            market_id = COALESCE(?, market_id),
                            updated_at = ?
            WHERE run_id = ?
            "#,
        )
        .bind(event_id)
        .bind(market_id)
        .bind(now())
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunView>> {
        let row = sqlx::query_as::<_, RunRow>("SELECT * FROM runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(RunRow::into_view))
    }

    pub async fn list_recent_runs(&self, limit: i64) -> Result<Vec<RunView>> {
        let rows = sqlx::query_as::<_, RunRow>(
            "SELECT * FROM runs ORDER BY run_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RunRow::into_view).collect())
    }

    pub async fn list_runs_by_market(&self, slug: &str) -> Result<Vec<RunView>> {
        let rows = sqlx::query_as::<_, RunRow>(
            "SELECT * FROM runs WHERE slug = ? ORDER BY run_at DESC, rowid DESC",
        )
        .bind(slug)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RunRow::into_view).collect())
    }

    /// Insert or refresh an event keyed by slug. The description is written
    /// once on first sight and never overwritten afterwards.
    pub async fn upsert_event(&self, event: &EventRecord) -> Result<i64> {
        let ts = now();
        sqlx::query(
            r#"
            INSERT INTO events (
                gamma_event_id, slug, title, description, category, image,
                end_date, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO UPDATE SET
                gamma_event_id = excluded.gamma_event_id,
                title = excluded.title,
                category = excluded.category,
                image = excluded.image,
                end_date = excluded.end_date,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&event.gamma_event_id)
        .bind(&event.slug)
        .bind(&event.title)
        .bind(&event.description)
        .bind(&event.category)
        .bind(&event.image)
        .bind(&event.end_date)
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM events WHERE slug = ?")
            .bind(&event.slug)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    /// Insert or refresh a market keyed by slug; pricing and volume fields
    /// always take the latest values.
    pub async fn upsert_market(
        &self,
        market: &MarketRecord,
        event_id: Option<i64>,
    ) -> Result<i64> {
        let ts = now();
        sqlx::query(
            r#"
            INSERT INTO markets (
                gamma_market_id, slug, polymarket_url, question, outcomes,
                yes_index, group_item_title, yes_price, no_price, best_bid,
                best_ask, volume_24h, volume_total, liquidity, end_date,
                event_id, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO UPDATE SET
                gamma_market_id = excluded.gamma_market_id,
                polymarket_url = excluded.polymarket_url,
                question = excluded.question,
                outcomes = excluded.outcomes,
                yes_index = excluded.yes_index,
                group_item_title = excluded.group_item_title,
                yes_price = excluded.yes_price,
                no_price = excluded.no_price,
                best_bid = excluded.best_bid,
                best_ask = excluded.best_ask,
                volume_24h = excluded.volume_24h,
                volume_total = excluded.volume_total,
                liquidity = excluded.liquidity,
                end_date = excluded.end_date,
                event_id = COALESCE(excluded.event_id, markets.event_id),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&market.gamma_market_id)
        .bind(&market.slug)
        .bind(&market.polymarket_url)
        .bind(&market.question)
        .bind(to_json(&market.outcomes)?)
        .bind(market.yes_index as i64)
        .bind(&market.group_item_title)
        .bind(market.yes_price)
        .bind(market.no_price)
        .bind(market.best_bid)
        .bind(market.best_ask)
        .bind(market.volume_24h)
        .bind(market.volume_total)
        .bind(market.liquidity)
        .bind(&market.end_date)
        .bind(event_id)
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM markets WHERE slug = ?")
            .bind(&market.slug)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    /// Persist an execution trace and point the run at it.
    pub async fn create_trace(
        &self,
        run_id: &str,
        trace_id: &str,
        steps: &serde_json::Value,
    ) -> Result<()> {
        let ts = now();
        sqlx::query("INSERT INTO traces (trace_id, run_id, steps, created_at) VALUES (?, ?, ?, ?)")
            .bind(trace_id)
            .bind(run_id)
            .bind(to_json(steps)?)
            .bind(&ts)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE runs SET trace_id = ?, updated_at = ? WHERE run_id = ?")
            .bind(trace_id)
            .bind(&ts)
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
