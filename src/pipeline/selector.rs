use crate::types::MarketRecord;

/// Outcome of narrowing an event's markets down to one.
#[derive(Debug, PartialEq)]
pub enum Selection<'a> {
    Chosen(&'a MarketRecord),
    /// Multiple candidates and nothing identified one; the run must surface
    /// the options instead of guessing.
    NeedsSelection,
    NoMarkets,
}

/// Pick the market a run should analyze. Order of precedence: a single
/// candidate wins outright; an explicit `selected_slug` is matched exactly by
/// slug or id, then fuzzily, then falls back to the first candidate; failing
/// that a URL-slug suffix match is tried; only then is selection required.
pub fn select_market<'a>(
    markets: &'a [MarketRecord],
    selected_slug: Option<&str>,
    url_slug: &str,
) -> Selection<'a> {
    let Some(first) = markets.first() else {
        return Selection::NoMarkets;
    };
    if markets.len() == 1 {
        return Selection::Chosen(first);
    }

    if let Some(selected) = selected_slug.filter(|s| !s.is_empty()) {
        if let Some(m) = find_market_by_slug(markets, selected) {
            return Selection::Chosen(m);
        }

        let wanted = selected.trim().to_lowercase();
        for m in markets {
            let slug = m.slug.trim().to_lowercase();
            let id = m.gamma_market_id.trim().to_lowercase();
            if slug.is_empty() && id.is_empty() {
                continue;
            }
            if slug.contains(&wanted) || slug.ends_with(&wanted) || wanted == id {
                return Selection::Chosen(m);
            }
        }

        // The caller asked for something specific but nothing matched;
        // proceeding with the first candidate beats stalling the run.
        return Selection::Chosen(first);
    }

    if !url_slug.is_empty() {
        for m in markets {
            if m.slug.ends_with(url_slug) {
                return Selection::Chosen(m);
            }
        }
    }

    Selection::NeedsSelection
}

/// Exact slug-or-id lookup.
pub fn find_market_by_slug<'a>(
    markets: &'a [MarketRecord],
    slug: &str,
) -> Option<&'a MarketRecord> {
    if slug.is_empty() {
        return None;
    }
    markets
        .iter()
        .find(|m| m.slug == slug || m.gamma_market_id == slug)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(id: &str, slug: &str) -> MarketRecord {
        MarketRecord {
            gamma_market_id: id.to_string(),
            slug: slug.to_string(),
            polymarket_url: format!("https://polymarket.com/event/{slug}"),
            question: slug.replace('-', " "),
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            yes_index: 0,
            group_item_title: None,
            yes_price: None,
            no_price: None,
            best_bid: None,
            best_ask: None,
            volume_24h: None,
            volume_total: None,
            liquidity: None,
            end_date: None,
        }
    }

    #[test]
    fn single_market_is_auto_selected() {
        let markets = vec![market("1", "fed-cut-25bp")];
        match select_market(&markets, None, "fed-december") {
            Selection::Chosen(m) => assert_eq!(m.slug, "fed-cut-25bp"),
            other => panic!("expected auto-selection, got {other:?}"),
        }
    }

    #[test]
    fn empty_list_is_no_markets() {
        assert_eq!(select_market(&[], None, "x"), Selection::NoMarkets);
    }

    #[test]
    fn explicit_slug_matches_exactly() {
        let markets = vec![market("1", "fed-cut-25bp"), market("2", "fed-cut-50bp")];
        match select_market(&markets, Some("fed-cut-50bp"), "fed-december") {
            Selection::Chosen(m) => assert_eq!(m.gamma_market_id, "2"),
            other => panic!("expected exact match, got {other:?}"),
        }
    }

    #[test]
    fn explicit_id_matches_too() {
        let markets = vec![market("101", "fed-cut-25bp"), market("102", "fed-cut-50bp")];
        match select_market(&markets, Some("102"), "fed-december") {
            Selection::Chosen(m) => assert_eq!(m.slug, "fed-cut-50bp"),
            other => panic!("expected id match, got {other:?}"),
        }
    }

    #[test]
    fn fuzzy_substring_match_is_case_insensitive() {
        let markets = vec![market("1", "fed-cut-25bp"), market("2", "fed-cut-50bp")];
        match select_market(&markets, Some("50BP"), "fed-december") {
            Selection::Chosen(m) => assert_eq!(m.slug, "fed-cut-50bp"),
            other => panic!("expected fuzzy match, got {other:?}"),
        }
    }

    #[test]
    fn unmatched_explicit_slug_falls_back_to_first() {
        let markets = vec![market("1", "fed-cut-25bp"), market("2", "fed-cut-50bp")];
        match select_market(&markets, Some("no-such-market"), "fed-december") {
            Selection::Chosen(m) => assert_eq!(m.slug, "fed-cut-25bp"),
            other => panic!("expected first-candidate fallback, got {other:?}"),
        }
    }

    #[test]
    fn url_slug_suffix_resolves_without_explicit_selection() {
        let markets = vec![market("1", "fed-cut-25bp"), market("2", "fed-cut-50bp")];
        match select_market(&markets, None, "cut-50bp") {
            Selection::Chosen(m) => assert_eq!(m.slug, "fed-cut-50bp"),
            other => panic!("expected url-suffix match, got {other:?}"),
        }
    }

    #[test]
    fn ambiguous_event_requires_selection() {
        let markets = vec![market("1", "fed-cut-25bp"), market("2", "fed-cut-50bp")];
        assert_eq!(
            select_market(&markets, None, "fed-december"),
            Selection::NeedsSelection
        );
    }

    #[test]
    fn find_by_slug_handles_empty_input() {
        let markets = vec![market("1", "fed-cut-25bp")];
        assert!(find_market_by_slug(&markets, "").is_none());
        assert!(find_market_by_slug(&[], "fed-cut-25bp").is_none());
        assert!(find_market_by_slug(&markets, "1").is_some());
    }
}
