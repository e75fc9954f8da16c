use sqlx::SqlitePool;

use crate::error::Result;

/// Schema applied at startup. Statements are idempotent so restarting against
/// an existing database is a no-op.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    gamma_event_id TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL DEFAULT '',
    image TEXT,
    end_date TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS markets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    gamma_market_id TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    polymarket_url TEXT NOT NULL UNIQUE,
    question TEXT NOT NULL,
    outcomes TEXT NOT NULL DEFAULT '[]',
    yes_index INTEGER NOT NULL DEFAULT 0,
    group_item_title TEXT,
    yes_price REAL,
    no_price REAL,
    best_bid REAL,
    best_ask REAL,
    volume_24h REAL,
    volume_total REAL,
    liquidity REAL,
    end_date TEXT,
    event_id INTEGER REFERENCES events(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    market_url TEXT NOT NULL,
    slug TEXT,
    event_id INTEGER REFERENCES events(id),
    market_id INTEGER REFERENCES markets(id),
    run_at TEXT NOT NULL,
    horizon TEXT NOT NULL,
    strategy_preset TEXT NOT NULL,
    strategy_params TEXT,
    status_market TEXT NOT NULL DEFAULT 'pending',
    status_news TEXT NOT NULL DEFAULT 'pending',
    status_signal TEXT NOT NULL DEFAULT 'pending',
    status_report TEXT NOT NULL DEFAULT 'pending',
    market_error TEXT,
    news_error TEXT,
    signal_error TEXT,
    report_error TEXT,
    market_snapshot TEXT,
    event_context TEXT,
    news_context TEXT,
    signal TEXT,
    decision TEXT,
    report TEXT,
    market_options TEXT,
    requires_market_selection INTEGER NOT NULL DEFAULT 0,
    app_version TEXT NOT NULL DEFAULT '',
    model TEXT NOT NULL DEFAULT '',
    trace_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_slug ON runs(slug);
CREATE INDEX IF NOT EXISTS idx_runs_run_at ON runs(run_at);

CREATE TABLE IF NOT EXISTS traces (
    trace_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    steps TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

pub async fn apply(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;
    for stmt in SCHEMA.split(';') {
        let stmt = stmt.trim();
        if stmt.is_empty() {
            continue;
        }
        sqlx::query(stmt).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}
