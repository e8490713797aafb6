// =============================================================================
// Dashboard orchestration — shared logic behind the REST handlers
// =============================================================================
//
// The HTTP layer (`api::rest`) stays thin: every handler maps query
// parameters to one of these functions and serializes the result. Keeping
// the orchestration here (rather than inline in the handlers) lets the
// "today" path, the "history" path, and the "replay" path share the same
// `DayData` assembly and news-decoration logic instead of drifting apart,
// and keeps it free of any axum types so it can be unit tested without a
// server running.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::aggregator::compute_day_data;
use crate::news::cache::NewsCache;
use crate::pipeline::trade_universe::read_trade_universe_tier_map;
use crate::replay_cache::{ReplayCache, ReplayEntry};
use crate::store::paths::{news_file, stock_trades_ex_index_file, trades_file};
use crate::store::row_store::{NdjsonStore, RowStore};
use crate::symbol_history::SymbolHistoryCache;
use crate::timeutil::{et_offset_ms, open_930_et_ms};
use crate::types::{DayData, NewsCounts, SortMode, TierMap, TradeRecord};

pub const TODAY_LABEL: &str = "TODAY";
pub const NEXT_DAY_LABEL: &str = "NEXT DAY";
const ONE_DAY_MS: i64 = 86_400_000;

/// Every history date the pipeline has produced an ex-index consolidated
/// file for, ascending. This is the list `GET /api/dates` returns and the
/// set `GET /api/dashboard/history/{date}` validates against.
pub fn history_dates(data_root: &Path) -> Result<Vec<String>> {
    let dir = data_root.join("us").join("stock-trades-ex-index");
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut dates = Vec::new();
    for entry in std::fs::read_dir(&dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
            dates.push(stem.to_string());
        }
    }
    dates.sort();
    Ok(dates)
}

/// News counts for every symbol in `trades`, for a date the live cache
/// covers (today/next). Symbols with no cached articles get the zero
/// `NewsCounts` default.
pub fn news_counts_from_cache(cache: &NewsCache, date: NaiveDate, symbols: &[String]) -> HashMap<String, NewsCounts> {
    let mut out = HashMap::new();
    for symbol in symbols {
        if let Some(articles) = cache.get(symbol, &crate::timeutil::date_key(date)) {
            out.insert(symbol.clone(), crate::news::bucket_news_counts(&articles, date));
        }
    }
    out
}

#[derive(serde::Serialize, serde::Deserialize)]
struct NewsRow {
    symbol: String,
    source: crate::news::NewsSourceTag,
    time: i64,
    headline: String,
    content: String,
}

/// Every article in `us/news/<date>.parquet`, grouped by symbol. The live
/// cache never holds history dates, so history reads always go through
/// this instead.
fn read_news_file_by_symbol(data_root: &Path, date_str: &str) -> HashMap<String, Vec<crate::news::NewsArticle>> {
    let store = NdjsonStore;
    let rows: Vec<NewsRow> = store.read_all(&news_file(data_root, date_str)).unwrap_or_default();

    let mut by_symbol: HashMap<String, Vec<crate::news::NewsArticle>> = HashMap::new();
    for row in rows {
        by_symbol.entry(row.symbol).or_default().push(crate::news::NewsArticle {
            time: row.time,
            source: row.source,
            headline: row.headline,
            content: row.content,
        });
    }
    by_symbol
}

/// News counts for every symbol in `trades`, for a history date, read
/// straight off `us/news/<date>.parquet`.
pub fn news_counts_from_disk(data_root: &Path, date_str: &str, date: NaiveDate) -> Result<HashMap<String, NewsCounts>> {
    Ok(read_news_file_by_symbol(data_root, date_str)
        .into_iter()
        .map(|(symbol, articles)| (symbol, crate::news::bucket_news_counts(&articles, date)))
        .collect())
}

/// `GET /api/news/{symbol}?date=D` history path: read `D`'s news file and
/// filter to `symbol`, sorted by time.
pub fn news_articles_for_symbol_from_disk(data_root: &Path, date_str: &str, symbol: &str) -> Vec<crate::news::NewsArticle> {
    let mut articles = read_news_file_by_symbol(data_root, date_str).remove(symbol).unwrap_or_default();
    crate::news::sort_articles(&mut articles);
    articles
}

/// `GET /api/dashboard` — today (and, if non-empty, "next day") from the
/// live model. `today_trades`/`next_trades` are the caller's already-pulled
/// `LiveModel` snapshots (the caller owns the `Arc<LiveModel>` and its
/// associated `today_cutoff`, so this function stays free of any locking
/// concerns).
pub fn today_dashboard(
    today_trades: &[TradeRecord],
    next_trades: &[TradeRecord],
    tier_map: &TierMap,
    today_date: NaiveDate,
    sort_mode: SortMode,
    news: &NewsCache,
) -> Vec<DayData> {
    let open_930 = open_930_et_ms(today_date);
    let all_symbols: Vec<String> = tier_map.keys().cloned().collect();
    let today_news = news_counts_from_cache(news, today_date, &all_symbols);

    let mut days = vec![compute_day_data(TODAY_LABEL, today_trades, tier_map, open_930, sort_mode, &today_news)];

    if !next_trades.is_empty() {
        let next_date = today_date + chrono::Days::new(1);
        let next_open_930 = open_930 + ONE_DAY_MS;
        let next_news = news_counts_from_cache(news, next_date, &all_symbols);
        days.push(compute_day_data(NEXT_DAY_LABEL, next_trades, tier_map, next_open_930, sort_mode, &next_news));
    }

    days
}

/// `GET /api/dashboard/history/{date}` — reconstructs the tier map from the
/// trade-universe CSV and loads the ex-index consolidated file for `date`.
/// `next_day_window` is the caller-supplied source of the post-market
/// `[4PM ET(date), 8PM ET(date)]` supplement: either another history date's
/// consolidated file, or (when `date` is the latest history date) trades
/// pulled from today's LiveModel / per-symbol files.
pub fn history_dashboard(
    data_root: &Path,
    date_str: &str,
    sort_mode: SortMode,
) -> Result<DayData> {
    let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").with_context(|| format!("invalid date {date_str}"))?;
    let tier_map = read_trade_universe_tier_map(data_root, date_str)?;

    let store = NdjsonStore;
    let trades: Vec<TradeRecord> = store.read_all(&stock_trades_ex_index_file(data_root, date_str)).unwrap_or_default();

    let open_930 = open_930_et_ms(date);
    let news = news_counts_from_disk(data_root, date_str, date)?;

    Ok(compute_day_data(date_str, &trades, &tier_map, open_930, sort_mode, &news))
}

/// Post-market window trades for the "next day" supplement of a history
/// view, when `date` already has a successor on disk.
pub fn next_day_window_from_history(data_root: &Path, date_str: &str) -> Vec<TradeRecord> {
    let store = NdjsonStore;
    store.read_all(&stock_trades_ex_index_file(data_root, date_str)).unwrap_or_default()
}

/// Post-market window trades for the "next day" supplement when `date` is
/// the latest history date: read directly from each symbol's trade file in
/// `[4PM ET(date), 8PM ET(date)]`, bypassing the (not-yet-built) ex-index
/// consolidated file for the following day.
pub fn next_day_window_from_symbol_files(data_root: &Path, date_str: &str, symbols: &[String]) -> Result<Vec<TradeRecord>> {
    let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").with_context(|| format!("invalid date {date_str}"))?;
    let (start_ms, end_ms) = crate::timeutil::post_market_window(date);

    let store = NdjsonStore;
    let mut out = Vec::new();
    for symbol in symbols {
        let trades: Vec<TradeRecord> = store.read_all(&trades_file(data_root, symbol, date_str)).unwrap_or_default();
        out.extend(trades.into_iter().filter(|t| t.timestamp > start_ms && t.timestamp <= end_ms));
    }
    Ok(out)
}

/// `GET /api/dashboard/replay?date=D&until=T` — loads `D`'s full trade set
/// (from the live model if `D` is today, else the replay cache, populating
/// it from disk on miss), filters to `timestamp <= untilET`, and computes
/// `DayData`. Also returns the full day's real-UTC ms timestamp range for
/// the client's scrubber.
pub struct ReplayResult {
    pub day: DayData,
    pub min_ts: i64,
    pub max_ts: i64,
}

pub fn replay_dashboard(
    data_root: &Path,
    replay_cache: &ReplayCache,
    date_str: &str,
    until_et: i64,
    sort_mode: SortMode,
    live_entry: Option<(Vec<TradeRecord>, TierMap)>,
) -> Result<ReplayResult> {
    let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").with_context(|| format!("invalid date {date_str}"))?;

    let (mut trades, tier_map) = if let Some((trades, tier_map)) = live_entry {
        (trades, tier_map)
    } else if let Some(entry) = replay_cache.get(date_str) {
        (entry.trades, entry.tier_map)
    } else {
        let tier_map = read_trade_universe_tier_map(data_root, date_str)?;
        let store = NdjsonStore;
        let trades: Vec<TradeRecord> = store.read_all(&stock_trades_ex_index_file(data_root, date_str)).unwrap_or_default();
        replay_cache.insert(date_str.to_string(), ReplayEntry { trades: trades.clone(), tier_map: tier_map.clone() });
        (trades, tier_map)
    };

    trades.sort_by_key(|t| t.timestamp);
    let offset = et_offset_ms(date);
    let min_ts = trades.first().map(|t| t.timestamp - offset).unwrap_or(0);
    let max_ts = trades.last().map(|t| t.timestamp - offset).unwrap_or(0);

    let cutoff_idx = trades.partition_point(|t| t.timestamp <= until_et);
    trades.truncate(cutoff_idx);

    let open_930 = open_930_et_ms(date);
    let news = news_counts_from_disk(data_root, date_str, date).unwrap_or_default();
    let day = compute_day_data(date_str, &trades, &tier_map, open_930, sort_mode, &news);

    Ok(ReplayResult { day, min_ts, max_ts })
}

/// `GET /api/symbol-history/{symbol}?before=&until=&limit=` — a page of
/// per-symbol daily pre/reg stats. `all_dates` is the full ascending
/// history-date list (including today, appended by the caller once it
/// closes out); `before`/`until` bound the page (`date < before`, `date >=
/// until`), `limit` caps the page size, most recent first.
pub fn symbol_history_page(
    data_root: &Path,
    cache: &SymbolHistoryCache,
    symbol: &str,
    all_dates: &[String],
    before: Option<&str>,
    until: Option<&str>,
    limit: usize,
) -> Result<Vec<crate::symbol_history::SymbolDayStats>> {
    let mut candidates: Vec<&str> = all_dates
        .iter()
        .map(|s| s.as_str())
        .filter(|d| before.map_or(true, |b| *d < b))
        .filter(|d| until.map_or(true, |u| *d >= u))
        .collect();
    candidates.sort();

    let page: Vec<&str> = candidates.into_iter().rev().take(limit.max(1)).collect();

    let mut out = Vec::with_capacity(page.len());
    for date in page {
        // `all_dates` is ascending, so the predecessor of `date` in the full
        // series is whichever entry sits immediately before it there.
        let prev_date = all_dates
            .iter()
            .rposition(|d| d.as_str() == date)
            .and_then(|idx| idx.checked_sub(1))
            .map(|idx| all_dates[idx].as_str());
        out.push(cache.get_or_compute(data_root, symbol, date, prev_date)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tier;

    fn trade(symbol: &str, ts: i64, price: f64) -> TradeRecord {
        TradeRecord {
            symbol: symbol.into(),
            timestamp: ts,
            price,
            size: 100,
            exchange: "A".into(),
            conditions: String::new(),
            id: "1".into(),
            update: false,
        }
    }

    #[test]
    fn today_dashboard_includes_next_day_only_when_non_empty() {
        let mut tier_map = TierMap::new();
        tier_map.insert("AAPL".to_string(), Tier::Active);
        let today_date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let open_930 = open_930_et_ms(today_date);
        let cache = NewsCache::new();

        let today_trades = vec![trade("AAPL", open_930 + 1000, 10.0)];
        let days = today_dashboard(&today_trades, &[], &tier_map, today_date, SortMode::RegTurnover, &cache);
        assert_eq!(days.len(), 1);

        let next_trades = vec![trade("AAPL", 1, 10.0)];
        let days = today_dashboard(&today_trades, &next_trades, &tier_map, today_date, SortMode::RegTurnover, &cache);
        assert_eq!(days.len(), 2);
        assert_eq!(days[1].label, NEXT_DAY_LABEL);
    }

    #[test]
    fn replay_dashboard_filters_to_until() {
        let dir = std::env::temp_dir().join(format!("jupitor-replay-test-{}", uuid::Uuid::new_v4()));
        let cache = ReplayCache::new(10);
        let mut tier_map = TierMap::new();
        tier_map.insert("AAPL".to_string(), Tier::Active);

        let live_trades = vec![trade("AAPL", 1_000, 10.0), trade("AAPL", 5_000, 11.0)];
        let result = replay_dashboard(&dir, &cache, "2024-03-04", 2_000, SortMode::RegTurnover, Some((live_trades, tier_map)))
            .unwrap();
        assert_eq!(result.min_ts, 1_000);
        assert_eq!(result.max_ts, 5_000);
        let symbol = &result.day.tiers[0].symbols[0];
        assert_eq!(symbol.reg.as_ref().unwrap().trades, 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn symbol_history_page_respects_before_until_and_limit() {
        let dir = std::env::temp_dir().join(format!("jupitor-symhist-test-{}", uuid::Uuid::new_v4()));
        let cache = SymbolHistoryCache::new();
        let all_dates: Vec<String> =
            ["2024-03-01", "2024-03-04", "2024-03-05", "2024-03-06"].iter().map(|s| s.to_string()).collect();

        let page = symbol_history_page(&dir, &cache, "AAPL", &all_dates, Some("2024-03-06"), Some("2024-03-04"), 10).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].date, "2024-03-05");
        assert_eq!(page[1].date, "2024-03-04");

        let limited = symbol_history_page(&dir, &cache, "AAPL", &all_dates, None, None, 1).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].date, "2024-03-06");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn history_dates_lists_ex_index_files_ascending() {
        let dir = std::env::temp_dir().join(format!("jupitor-histdates-test-{}", uuid::Uuid::new_v4()));
        crate::store::row_store::overwrite_atomic(&stock_trades_ex_index_file(&dir, "2024-03-05"), &Vec::<TradeRecord>::new()).unwrap();
        crate::store::row_store::overwrite_atomic(&stock_trades_ex_index_file(&dir, "2024-03-01"), &Vec::<TradeRecord>::new()).unwrap();

        let dates = history_dates(&dir).unwrap();
        assert_eq!(dates, vec!["2024-03-01".to_string(), "2024-03-05".to_string()]);

        std::fs::remove_dir_all(&dir).ok();
    }
}
