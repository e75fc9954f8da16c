use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::types::MarketOption;

// ---------------------------------------------------------------------------
// Sort modes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// 24h volume, falling back to total volume, then liquidity.
    #[default]
    Active,
    /// Total volume, falling back to 24h volume, then liquidity.
    Total,
    /// End date ascending; unparseable dates sort last.
    Soonest,
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Deterministically order candidate markets. Pure and stable: identical
/// input always yields identical output, and all-zero inputs keep their
/// original order. Absent or non-numeric fields compare as 0.0 so no NaN
/// ever reaches a comparison.
pub fn rank_markets(candidates: &[MarketOption], mode: SortMode) -> Vec<MarketOption> {
    let mut ranked: Vec<MarketOption> = candidates.to_vec();
    match mode {
        SortMode::Active => {
            ranked.sort_by(|a, b| {
                let sa = activity_score(a.volume_24h, a.volume_total, a.liquidity);
                let sb = activity_score(b.volume_24h, b.volume_total, b.liquidity);
                score_desc(sa, sb).then_with(|| end_ts(a).cmp(&end_ts(b)))
            });
        }
        SortMode::Total => {
            ranked.sort_by(|a, b| {
                let sa = activity_score(a.volume_total, a.volume_24h, a.liquidity);
                let sb = activity_score(b.volume_total, b.volume_24h, b.liquidity);
                score_desc(sa, sb).then_with(|| end_ts(a).cmp(&end_ts(b)))
            });
        }
        SortMode::Soonest => {
            ranked.sort_by(|a, b| {
                end_ts(a)
                    .cmp(&end_ts(b))
                    .then_with(|| score_desc(coerce(a.volume_24h), coerce(b.volume_24h)))
            });
        }
    }
    ranked
}

/// Primary metric with two fallbacks; a zero or missing metric defers to the
/// next one.
fn activity_score(primary: Option<f64>, secondary: Option<f64>, tertiary: Option<f64>) -> f64 {
    let p = coerce(primary);
    if p > 0.0 {
        return p;
    }
    let s = coerce(secondary);
    if s > 0.0 {
        return s;
    }
    coerce(tertiary)
}

fn coerce(v: Option<f64>) -> f64 {
    match v {
        Some(x) if x.is_finite() => x,
        _ => 0.0,
    }
}

fn score_desc(a: f64, b: f64) -> std::cmp::Ordering {
    // Scores are coerced finite, so total_cmp gives a real total order.
    b.total_cmp(&a)
}

/// Unix seconds of the market's end date; unparseable/missing dates are +inf
/// so they sort last under ascending order.
fn end_ts(m: &MarketOption) -> i64 {
    m.end_date
        .as_deref()
        .and_then(parse_end_date_secs)
        .unwrap_or(i64::MAX)
}

pub fn parse_end_date_secs(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    // Bare dates ("2026-11-03") show up in older Gamma records.
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(slug: &str, v24: f64, total: f64, liq: f64, end: Option<&str>) -> MarketOption {
        MarketOption {
            slug: slug.to_string(),
            question: format!("Question for {slug}"),
            group_item_title: None,
            volume_24h: Some(v24),
            volume_total: Some(total),
            liquidity: Some(liq),
            end_date: end.map(|s| s.to_string()),
            best_bid: None,
            best_ask: None,
        }
    }

    fn slugs(ranked: &[MarketOption]) -> Vec<&str> {
        ranked.iter().map(|m| m.slug.as_str()).collect()
    }

    #[test]
    fn active_falls_back_to_total_volume() {
        // Zero 24h volume but a large total volume must outrank live markets
        // with smaller 24h volume.
        let candidates = vec![
            option("a", 2000.0, 0.0, 0.0, None),
            option("b", 1500.0, 0.0, 0.0, None),
            option("c", 0.0, 10_000.0, 0.0, None),
        ];
        let ranked = rank_markets(&candidates, SortMode::Active);
        assert_eq!(slugs(&ranked), vec!["c", "a", "b"]);
    }

    #[test]
    fn active_ties_break_by_soonest_end_date() {
        let candidates = vec![
            option("later", 500.0, 0.0, 0.0, Some("2026-12-01T00:00:00Z")),
            option("sooner", 500.0, 0.0, 0.0, Some("2026-09-01T00:00:00Z")),
        ];
        let ranked = rank_markets(&candidates, SortMode::Active);
        assert_eq!(slugs(&ranked), vec!["sooner", "later"]);
    }

    #[test]
    fn total_mode_prefers_total_then_falls_back() {
        let candidates = vec![
            option("a", 9000.0, 100.0, 0.0, None),
            option("b", 50.0, 8000.0, 0.0, None),
            option("c", 0.0, 0.0, 500.0, None),
        ];
        let ranked = rank_markets(&candidates, SortMode::Total);
        // a has a nonzero total (100) so it never reaches its 24h fallback;
        // c has neither volume and lands on liquidity.
        assert_eq!(slugs(&ranked), vec!["b", "c", "a"]);
    }

    #[test]
    fn soonest_sorts_missing_dates_last() {
        let candidates = vec![
            option("undated", 100.0, 0.0, 0.0, None),
            option("garbled", 100.0, 0.0, 0.0, Some("not-a-date")),
            option("dated", 1.0, 0.0, 0.0, Some("2026-10-01T12:00:00Z")),
        ];
        let ranked = rank_markets(&candidates, SortMode::Soonest);
        assert_eq!(ranked[0].slug, "dated");
        // Both undated entries tie at +inf; 24h volume tie-break is equal, so
        // the stable sort keeps their input order.
        assert_eq!(slugs(&ranked)[1..], ["undated", "garbled"]);
    }

    #[test]
    fn soonest_ties_break_by_volume_desc() {
        let candidates = vec![
            option("thin", 10.0, 0.0, 0.0, Some("2026-10-01T00:00:00Z")),
            option("thick", 9999.0, 0.0, 0.0, Some("2026-10-01T00:00:00Z")),
        ];
        let ranked = rank_markets(&candidates, SortMode::Soonest);
        assert_eq!(slugs(&ranked), vec!["thick", "thin"]);
    }

    #[test]
    fn all_zero_inputs_preserve_original_order() {
        let candidates = vec![
            option("first", 0.0, 0.0, 0.0, None),
            option("second", 0.0, 0.0, 0.0, None),
            option("third", 0.0, 0.0, 0.0, None),
        ];
        for mode in [SortMode::Active, SortMode::Total, SortMode::Soonest] {
            let ranked = rank_markets(&candidates, mode);
            assert_eq!(slugs(&ranked), vec!["first", "second", "third"], "{mode:?}");
        }
    }

    #[test]
    fn ranking_is_deterministic_across_calls() {
        let candidates = vec![
            option("a", 120.0, 40.0, 7.0, Some("2026-09-12T00:00:00Z")),
            option("b", 120.0, 90.0, 3.0, Some("2026-09-05T00:00:00Z")),
            option("c", 0.0, 0.0, 55.0, None),
        ];
        let first = rank_markets(&candidates, SortMode::Active);
        for _ in 0..10 {
            let again = rank_markets(&candidates, SortMode::Active);
            assert_eq!(slugs(&first), slugs(&again));
        }
    }

    #[test]
    fn bare_date_parses() {
        assert!(parse_end_date_secs("2026-11-03").is_some());
        assert!(parse_end_date_secs("2026-11-03T10:30:00Z").is_some());
        assert!(parse_end_date_secs("soon").is_none());
    }
}
