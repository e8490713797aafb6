// =============================================================================
// Nightly daily-bar update
// =============================================================================

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use tracing::{debug, info, warn};

use crate::backfill::provider::MarketDataProvider;
use crate::backfill::universe_discovery::shuffled_discovery_candidates;
use crate::concurrency::for_each_bounded;
use crate::store::paths::{daily_bars_file, reference_long_symbols_file};
use crate::store::progress::ProgressTracker;
use crate::store::row_store::{NdjsonStore, RowStore};
use crate::store::universe::UniverseWriter;
use crate::types::DailyBar;

pub struct DailyUpdateInput {
    pub data_root: std::path::PathBuf,
    pub today: NaiveDate,
    pub last_completed: Option<NaiveDate>,
    pub start_date: NaiveDate,
    pub batch_size: usize,
    pub max_workers: usize,
}

pub struct DailyUpdateOutcome {
    pub known_updated: usize,
    pub discovered: usize,
    pub backfilled: usize,
}

/// Every symbol already present on disk: one directory per symbol under
/// `us/daily/`.
pub fn known_symbols(data_root: &Path) -> Result<Vec<String>> {
    let dir = data_root.join("us").join("daily");
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut symbols = Vec::new();
    for entry in std::fs::read_dir(&dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                symbols.push(name.to_string());
            }
        }
    }
    Ok(symbols)
}

async fn fetch_bars(
    provider: &Arc<dyn MarketDataProvider>,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<DailyBar>> {
    provider
        .fetch_daily_bars(symbol, start, end)
        .await
        .with_context(|| format!("fetching daily bars for {symbol}"))
}

fn write_bars(data_root: &Path, symbol: &str, bars: &[DailyBar]) -> Result<()> {
    let store = NdjsonStore;
    let mut by_year: std::collections::HashMap<i32, Vec<DailyBar>> = std::collections::HashMap::new();
    for bar in bars {
        let year = NaiveDate::parse_from_str(&bar.date, "%Y-%m-%d")
            .map(|d| d.year())
            .unwrap_or_else(|_| bar.date.get(0..4).and_then(|y| y.parse().ok()).unwrap_or(0));
        by_year.entry(year).or_default().push(bar.clone());
    }
    for (year, year_bars) in by_year {
        store.append(&daily_bars_file(data_root, symbol, year), &year_bars)?;
    }
    Ok(())
}

fn touch_universe(universe: &mut UniverseWriter, bars: &[DailyBar], symbol: &str) {
    for bar in bars {
        universe.touch(&bar.date, symbol);
    }
}

/// Run the three-phase nightly update. Callers are responsible for gating
/// on timing (once per ET day, after 20:05 ET, when `.last-completed`
/// doesn't already match today) — this function always runs the phases it's
/// given.
pub async fn run_daily_update(
    provider: Arc<dyn MarketDataProvider>,
    input: &DailyUpdateInput,
) -> Result<DailyUpdateOutcome> {
    let progress = ProgressTracker::new(
        crate::store::paths::daily_tried_empty(&input.data_root),
        crate::store::paths::daily_last_completed(&input.data_root),
    )?;
    let mut universe = UniverseWriter::new(input.data_root.clone());

    // Phase 1: update known symbols.
    let known = known_symbols(&input.data_root)?;
    let update_start = input.last_completed.unwrap_or(input.start_date);
    info!(count = known.len(), start = %update_start, end = %input.today, "updating known symbols");

    let known_results = run_in_batches(known, input.batch_size, input.max_workers, {
        let provider = provider.clone();
        let start = update_start;
        let end = input.today;
        move |symbol: String| {
            let provider = provider.clone();
            async move {
                match fetch_bars(&provider, &symbol, start, end).await {
                    Ok(bars) => Some((symbol, bars)),
                    Err(e) => {
                        warn!(symbol, error = %e, "bar fetch failed for known symbol, skipping this pass");
                        None
                    }
                }
            }
        }
    })
    .await;

    let mut known_updated = 0;
    for (symbol, bars) in known_results.into_iter().flatten() {
        if !bars.is_empty() {
            write_bars(&input.data_root, &symbol, &bars)?;
            touch_universe(&mut universe, &bars, &symbol);
            known_updated += 1;
        }
    }

    // Phase 2: discover new symbols.
    let known_set: HashSet<String> = known_symbols(&input.data_root)?.into_iter().collect();
    let long_symbols_path = reference_long_symbols_file(&input.data_root);
    let candidates = shuffled_discovery_candidates(&long_symbols_path)?;
    let unexplored: Vec<String> = candidates
        .into_iter()
        .filter(|s| !known_set.contains(s) && !progress.is_tried_empty(s))
        .collect();

    info!(count = unexplored.len(), "discovery pass over unexplored candidates");

    let discovery_results = run_in_batches(unexplored, input.batch_size, input.max_workers, {
        let provider = provider.clone();
        let start = update_start;
        let end = input.today;
        move |symbol: String| {
            let provider = provider.clone();
            async move {
                match fetch_bars(&provider, &symbol, start, end).await {
                    Ok(bars) => Some((symbol, bars)),
                    Err(e) => {
                        warn!(symbol, error = %e, "bar fetch failed during discovery, skipping this pass");
                        None
                    }
                }
            }
        }
    })
    .await;

    let mut discovered = Vec::new();
    for (symbol, bars) in discovery_results.into_iter().flatten() {
        if bars.is_empty() {
            progress.mark_tried_empty(&symbol)?;
        } else {
            write_bars(&input.data_root, &symbol, &bars)?;
            touch_universe(&mut universe, &bars, &symbol);
            discovered.push(symbol);
        }
    }

    // Phase 3: backfill full history for newly discovered symbols.
    info!(count = discovered.len(), "backfilling full history for newly discovered symbols");
    let backfill_results = run_in_batches(discovered.clone(), input.batch_size, input.max_workers, {
        let provider = provider.clone();
        let start = input.start_date;
        let end = input.today;
        move |symbol: String| {
            let provider = provider.clone();
            async move {
                match fetch_bars(&provider, &symbol, start, end).await {
                    Ok(bars) => Some((symbol, bars)),
                    Err(e) => {
                        warn!(symbol, error = %e, "full-history backfill failed, will retry next pass");
                        None
                    }
                }
            }
        }
    })
    .await;

    let mut backfilled = 0;
    for (symbol, bars) in backfill_results.into_iter().flatten() {
        if !bars.is_empty() {
            write_bars(&input.data_root, &symbol, &bars)?;
            touch_universe(&mut universe, &bars, &symbol);
            backfilled += 1;
        }
    }

    universe.finalize()?;
    progress.set_last_completed(&crate::timeutil::date_key(input.today))?;

    Ok(DailyUpdateOutcome { known_updated, discovered: discovered.len(), backfilled })
}

/// Chunk `items` into groups of `batch_size` and run each chunk through
/// `for_each_bounded` with `workers` concurrency: batches of `batch_size`
/// symbols, fetched in parallel by up to `workers` at a time.
async fn run_in_batches<T, F, Fut, R>(items: Vec<T>, batch_size: usize, workers: usize, f: F) -> Vec<R>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    let batch_size = batch_size.max(1);
    let mut results = Vec::with_capacity(items.len());
    let mut iter = items.into_iter();
    loop {
        let chunk: Vec<T> = (&mut iter).take(batch_size).collect();
        if chunk.is_empty() {
            break;
        }
        debug!(chunk_len = chunk.len(), "processing discovery/update batch");
        let f = f.clone();
        let chunk_results = for_each_bounded(chunk, workers, move |item| f(item)).await;
        results.extend(chunk_results);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backfill::provider::MockProvider;

    fn bar(symbol: &str, date: &str, trade_count: u64) -> DailyBar {
        DailyBar {
            symbol: symbol.into(),
            date: date.into(),
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 1000,
            vwap: 1.2,
            trade_count,
        }
    }

    #[tokio::test]
    async fn update_known_symbol_writes_bars_and_touches_universe() {
        let dir = std::env::temp_dir().join(format!("jupitor-daily-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join("us/daily/AAPL")).unwrap();

        let mut provider = MockProvider::default();
        provider.bars.insert("AAPL".to_string(), vec![bar("AAPL", "2024-03-04", 500)]);
        let provider: Arc<dyn MarketDataProvider> = Arc::new(provider);

        let input = DailyUpdateInput {
            data_root: dir.clone(),
            today: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            last_completed: None,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            batch_size: 10,
            max_workers: 2,
        };

        let outcome = run_daily_update(provider, &input).await.unwrap();
        assert_eq!(outcome.known_updated, 1);

        let bars_path = daily_bars_file(&dir, "AAPL", 2024);
        assert!(bars_path.exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
