// =============================================================================
// News refresh orchestration — live 5-minute loop + historical backfill
// =============================================================================

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::concurrency::for_each_bounded;
use crate::news::cache::NewsCache;
use crate::news::sources::{NewsSource, SocialMediaSource, DEFAULT_SOCIAL_MAX_PAGES};
use crate::news::NewsArticle;
use crate::store::paths::news_file;
use crate::store::row_store::{NdjsonStore, RowStore};
use crate::types::Tier;

/// The four fetchers, bundled so call sites pass one value around instead of
/// four.
#[derive(Clone)]
pub struct NewsSources {
    pub market_data: Arc<dyn NewsSource>,
    pub rss_generic: Arc<dyn NewsSource>,
    pub rss_press_release: Arc<dyn NewsSource>,
    pub social_media: Arc<SocialMediaSource>,
}

/// Fetch all four sources concurrently for one symbol, single-page
/// social-media mode (the live-refresh / on-demand path).
pub async fn fetch_all_sources(sources: &NewsSources, symbol: &str, start_ms: i64, end_ms: i64) -> Vec<NewsArticle> {
    let (md, rg, pr, sm) = tokio::join!(
        sources.market_data.fetch(symbol, start_ms, end_ms),
        sources.rss_generic.fetch(symbol, start_ms, end_ms),
        sources.rss_press_release.fetch(symbol, start_ms, end_ms),
        sources.social_media.fetch(symbol, start_ms, end_ms),
    );

    let mut combined = Vec::new();
    for (label, result) in [("market_data", md), ("rss_generic", rg), ("rss_press_release", pr), ("social_media", sm)] {
        match result {
            Ok(mut articles) => combined.append(&mut articles),
            Err(e) => warn!(symbol, source = label, error = %e, "news fetch failed, treating as empty"),
        }
    }
    combined
}

/// Fetch and merge one symbol's articles into the cache for `date`. Used by
/// both the refresh loop and the on-demand cache-miss path.
pub async fn refresh_symbol(
    sources: &NewsSources,
    cache: &NewsCache,
    symbol: &str,
    date: &str,
    start_ms: i64,
    end_ms: i64,
) -> Vec<NewsArticle> {
    let fetched = fetch_all_sources(sources, symbol, start_ms, end_ms).await;
    cache.merge_in(symbol, date, fetched)
}

/// One pass of the 5-minute live refresh loop: fan out to `workers` tasks,
/// each refreshing one symbol. `symbols` should already be ordered with
/// newly-seen symbols first — ordering is the caller's responsibility since
/// it depends on the process-wide "ever seen" set this module doesn't own.
pub async fn refresh_once(
    sources: Arc<NewsSources>,
    cache: Arc<NewsCache>,
    symbols: Vec<String>,
    date: String,
    start_ms: i64,
    end_ms: i64,
    workers: usize,
) {
    let n = symbols.len();
    debug!(count = n, date = %date, "starting news refresh pass");

    for_each_bounded(symbols, workers, move |symbol| {
        let sources = sources.clone();
        let cache = cache.clone();
        let date = date.clone();
        async move {
            refresh_symbol(&sources, &cache, &symbol, &date, start_ms, end_ms).await;
        }
    })
    .await;
}

/// Pick the top `top_n` symbols per tier by trade count, for the historical
/// backfill's symbol-selection step.
pub fn top_symbols_per_tier(
    tier_map: &HashMap<String, Tier>,
    trade_counts: &HashMap<String, u64>,
    top_n: usize,
) -> HashMap<Tier, Vec<String>> {
    let mut by_tier: HashMap<Tier, Vec<(String, u64)>> = HashMap::new();
    for (symbol, tier) in tier_map {
        let count = trade_counts.get(symbol).copied().unwrap_or(0);
        by_tier.entry(*tier).or_default().push((symbol.clone(), count));
    }

    by_tier
        .into_iter()
        .map(|(tier, mut symbols)| {
            symbols.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            let top: Vec<String> = symbols.into_iter().take(top_n).map(|(s, _)| s).collect();
            (tier, top)
        })
        .collect()
}

/// From the MODERATE/SPORADIC top-100 lists, the 20+20 symbols that get deep
/// social-media pagination during historical backfill.
pub fn deep_social_targets(by_tier: &HashMap<Tier, Vec<String>>, deep_count: usize) -> Vec<String> {
    let mut targets = Vec::new();
    for tier in [Tier::Moderate, Tier::Sporadic] {
        if let Some(symbols) = by_tier.get(&tier) {
            targets.extend(symbols.iter().take(deep_count).cloned());
        }
    }
    targets
}

/// Fetch one symbol's full historical window, using deep social-media
/// pagination only for symbols in `deep_targets`.
async fn fetch_historical_symbol(
    sources: &NewsSources,
    symbol: &str,
    start_ms: i64,
    end_ms: i64,
    deep: bool,
) -> Vec<NewsArticle> {
    let (md, rg, pr) = tokio::join!(
        sources.market_data.fetch(symbol, start_ms, end_ms),
        sources.rss_generic.fetch(symbol, start_ms, end_ms),
        sources.rss_press_release.fetch(symbol, start_ms, end_ms),
    );

    let social = if deep {
        sources.social_media.fetch_paginated(symbol, start_ms, end_ms, DEFAULT_SOCIAL_MAX_PAGES).await
    } else {
        sources.social_media.fetch(symbol, start_ms, end_ms).await
    };

    let mut combined = Vec::new();
    for (label, result) in [("market_data", md), ("rss_generic", rg), ("rss_press_release", pr)] {
        match result {
            Ok(mut articles) => combined.append(&mut articles),
            Err(e) => warn!(symbol, source = label, error = %e, "historical news fetch failed"),
        }
    }
    match social {
        Ok(mut articles) => combined.append(&mut articles),
        Err(e) => warn!(symbol, error = %e, "historical social-media fetch failed"),
    }
    combined
}

/// The 30-minute historical news backfill for one date lacking a news file:
/// fetch all selected symbols (8 workers), sorted overall by `(symbol,
/// time)`, and write the result via the `RowStore` backing `us/news/`.
pub async fn backfill_date(
    data_root: &Path,
    date: &str,
    top100_per_tier: HashMap<Tier, Vec<String>>,
    deep_targets: Vec<String>,
    sources: Arc<NewsSources>,
    workers: usize,
) -> Result<usize> {
    let deep: std::collections::HashSet<String> = deep_targets.into_iter().collect();
    let mut symbols: Vec<String> = top100_per_tier.into_values().flatten().collect();
    symbols.sort();
    symbols.dedup();

    let (start_ms, end_ms) = super::prev_4pm_to_8pm_window(date)?;

    let results: Vec<(String, Vec<NewsArticle>)> = for_each_bounded(symbols, workers, {
        let sources = sources.clone();
        move |symbol| {
            let sources = sources.clone();
            let is_deep = deep.contains(&symbol);
            async move {
                let articles = fetch_historical_symbol(&sources, &symbol, start_ms, end_ms, is_deep).await;
                (symbol, articles)
            }
        }
    })
    .await;

    let mut rows: Vec<(String, NewsArticle)> = Vec::new();
    for (symbol, articles) in results {
        for article in articles {
            rows.push((symbol.clone(), article));
        }
    }
    rows.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.time.cmp(&b.1.time)));

    #[derive(serde::Serialize, serde::Deserialize)]
    struct NewsRow {
        symbol: String,
        source: crate::news::NewsSourceTag,
        time: i64,
        headline: String,
        content: String,
    }

    let out: Vec<NewsRow> = rows
        .into_iter()
        .map(|(symbol, a)| NewsRow { symbol, source: a.source, time: a.time, headline: a.headline, content: a.content })
        .collect();

    let count = out.len();
    let store = NdjsonStore;
    store.append(&news_file(data_root, date), &out)?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_symbols_per_tier_sorts_by_trade_count_desc() {
        let mut tier_map = HashMap::new();
        tier_map.insert("A".to_string(), Tier::Active);
        tier_map.insert("B".to_string(), Tier::Active);
        let mut counts = HashMap::new();
        counts.insert("A".to_string(), 10);
        counts.insert("B".to_string(), 100);

        let by_tier = top_symbols_per_tier(&tier_map, &counts, 100);
        assert_eq!(by_tier.get(&Tier::Active).unwrap()[0], "B");
    }

    #[test]
    fn deep_social_targets_pulls_from_moderate_and_sporadic_only() {
        let mut by_tier = HashMap::new();
        by_tier.insert(Tier::Active, vec!["A".to_string()]);
        by_tier.insert(Tier::Moderate, vec!["M1".to_string(), "M2".to_string()]);
        by_tier.insert(Tier::Sporadic, vec!["S1".to_string()]);

        let targets = deep_social_targets(&by_tier, 20);
        assert!(targets.contains(&"M1".to_string()));
        assert!(targets.contains(&"S1".to_string()));
        assert!(!targets.contains(&"A".to_string()));
    }
}
