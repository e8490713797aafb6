// =============================================================================
// Trade backfill
// =============================================================================
//
// Walks universe dates newest-first; for each date lacking a
// `trades/.done/{date}` sentinel, batches that date's symbols by trailing
// bar `trade_count` (capped at `trade_batch_turnover_cap` cumulative count
// per batch) and fetches each batch's trades through the shared
// rate-limited token bucket. The sentinel is only written after every batch
// for a date succeeds, so a cancelled or partially-failed day is retried in
// full on the next pass.
// =============================================================================

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use tracing::{info, warn};

use crate::backfill::provider::MarketDataProvider;
use crate::ratelimit::TokenBucket;
use crate::store::paths::{daily_bars_file, trades_done_sentinel, trades_file};
use crate::store::row_store::{NdjsonStore, RowStore};
use crate::store::universe::read_universe;
use crate::types::TradeRecord;

/// A trade is kept iff `size > 100 AND price * size >= 100`.
pub fn keep_trade(trade: &TradeRecord) -> bool {
    trade.size > 100 && trade.price * trade.size as f64 >= 100.0
}

/// Every date under `us/universe/`, newest-first.
pub fn universe_dates_newest_first(data_root: &Path) -> Result<Vec<String>> {
    let dir = data_root.join("us").join("universe");
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
    dates.reverse();
    Ok(dates)
}

fn is_done(data_root: &Path, date: &str) -> bool {
    trades_done_sentinel(data_root, date).exists()
}

fn mark_done(data_root: &Path, date: &str) -> Result<()> {
    let path = trades_done_sentinel(data_root, date);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(&path, "")?;
    Ok(())
}

/// Trailing bar `trade_count` for `symbol` on `date`, or `0` if no bar is on
/// file (new/undiscovered symbols sort last within a batch by this).
fn bar_trade_count(data_root: &Path, symbol: &str, date: &str) -> u64 {
    let Ok(parsed) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
        return 0;
    };
    let store = NdjsonStore;
    let path = daily_bars_file(data_root, symbol, parsed.year());
    let bars: Vec<crate::types::DailyBar> = store.read_all(&path).unwrap_or_default();
    bars.into_iter().find(|b| b.date == date).map(|b| b.trade_count).unwrap_or(0)
}

/// Group `symbols` (already sorted by trade count descending) into batches
/// whose cumulative `trade_count` is `<= cap`, at least one symbol per
/// batch even if that symbol alone exceeds the cap.
pub fn batch_by_turnover_cap(symbols: Vec<(String, u64)>, cap: i64) -> Vec<Vec<String>> {
    let cap = cap.max(1) as u64;
    let mut batches: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_total: u64 = 0;

    for (symbol, count) in symbols {
        if !current.is_empty() && current_total + count > cap {
            batches.push(std::mem::take(&mut current));
            current_total = 0;
        }
        current_total += count;
        current.push(symbol);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

async fn fetch_batch(
    provider: &Arc<dyn MarketDataProvider>,
    rate_limiter: &Arc<TokenBucket>,
    data_root: &Path,
    date: &str,
    symbols: &[String],
) -> Result<()> {
    for symbol in symbols {
        rate_limiter.acquire().await;
        let trades = provider
            .fetch_trades(symbol, date)
            .await
            .with_context(|| format!("fetching trades for {symbol} on {date}"))?;
        let kept: Vec<TradeRecord> = trades.into_iter().filter(keep_trade).collect();
        if !kept.is_empty() {
            let store = NdjsonStore;
            store.append(&trades_file(data_root, symbol, date), &kept)?;
        }
    }
    Ok(())
}

/// Run the trade backfill for every undone universe date, newest-first.
/// Returns the number of dates fully completed this pass.
pub async fn run_trade_backfill(
    provider: Arc<dyn MarketDataProvider>,
    rate_limiter: Arc<TokenBucket>,
    data_root: &Path,
    turnover_cap: i64,
) -> Result<usize> {
    let dates = universe_dates_newest_first(data_root)?;
    let mut completed = 0;

    for date in dates {
        if is_done(data_root, &date) {
            continue;
        }

        let symbols = read_universe(data_root, &date)?;
        if symbols.is_empty() {
            continue;
        }

        let mut counted: Vec<(String, u64)> =
            symbols.into_iter().map(|s| { let c = bar_trade_count(data_root, &s, &date); (s, c) }).collect();
        counted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let batches = batch_by_turnover_cap(counted, turnover_cap);
        info!(date = %date, batches = batches.len(), "trade backfill: processing date");

        let mut date_ok = true;
        for batch in &batches {
            if let Err(e) = fetch_batch(&provider, &rate_limiter, data_root, &date, batch).await {
                warn!(date = %date, error = %e, "trade batch failed, abandoning this date for this pass");
                date_ok = false;
                break;
            }
        }

        if date_ok {
            mark_done(data_root, &date)?;
            completed += 1;
        }
    }

    Ok(completed)
}
