pub mod migrations;
pub mod models;
pub mod run_store;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::Result;

pub use run_store::{NewRun, PhasePatch, RunStore};

/// Open (creating if missing) the SQLite database and apply the schema.
pub async fn connect(db_path: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{db_path}"))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    migrations::apply(&pool).await?;
    info!(db_path, "database ready");
    Ok(pool)
}
