use std::collections::BTreeMap;

use serde::Serialize;

use crate::pipeline::Analyzer;
use crate::resilience::BreakerState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
    /// provider name -> breaker state
    pub breakers: BTreeMap<&'static str, BreakerState>,
}

/// Overall status is `degraded` as soon as the database is unreachable or
/// any breaker is not closed; pollers keep working either way.
pub async fn health_snapshot(analyzer: &Analyzer) -> HealthResponse {
    let database = match analyzer.store.ping().await {
        Ok(()) => "ok",
        Err(_) => "error",
    };

    let mut breakers = BTreeMap::new();
    for guard in [
        &analyzer.market_guard,
        &analyzer.news_guard,
        &analyzer.model_guard,
    ] {
        breakers.insert(guard.name(), guard.breaker().state());
    }

    let degraded =
        database != "ok" || breakers.values().any(|s| *s != BreakerState::Closed);
    HealthResponse {
        status: if degraded { "degraded" } else { "ok" },
        version: env!("CARGO_PKG_VERSION"),
        database,
        breakers,
    }
}
