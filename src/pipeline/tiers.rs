// =============================================================================
// Tier computation — trailing turnover percentiles
// =============================================================================
//
// For each non-index universe symbol, computes the median of its trailing
// turnover (`VWAP x Volume`) over up to 60 prior trading dates, then buckets
// symbols into ACTIVE/MODERATE/SPORADIC by the 75th/25th percentile of those
// medians across the whole universe.
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Datelike;

use crate::concurrency::for_each_bounded;
use crate::store::paths::daily_bars_file;
use crate::store::row_store::{NdjsonStore, RowStore};
use crate::types::{DailyBar, Tier, TierMap};

/// Compute the tier map for target date `D`. `candidates` must already be
/// restricted to non-ETF, non-index-member symbols (index/ETF rows get an
/// empty tier in the trade-universe CSV and never reach this function).
/// `trailing_dates` is the up-to-60 trading dates strictly before `D`,
/// newest-first or any order (only the set matters).
pub async fn compute_tier_map(
    data_root: &Path,
    candidates: Vec<String>,
    trailing_dates: Vec<String>,
    workers: usize,
) -> Result<TierMap> {
    let data_root = data_root.to_path_buf();
    let trailing_dates = std::sync::Arc::new(trailing_dates);

    let medians: Vec<Option<f64>> = for_each_bounded(candidates.clone(), workers, {
        let data_root = data_root.clone();
        let trailing_dates = trailing_dates.clone();
        move |symbol| {
            let data_root = data_root.clone();
            let trailing_dates = trailing_dates.clone();
            async move {
                tokio::task::spawn_blocking(move || median_turnover(&data_root, &symbol, &trailing_dates))
                    .await
                    .expect("blocking task panicked")
            }
        }
    })
    .await;

    let pairs: Vec<(String, f64)> = candidates
        .into_iter()
        .zip(medians)
        .filter_map(|(symbol, median)| median.map(|m| (symbol, m)))
        .collect();

    let all_medians: Vec<f64> = pairs.iter().map(|(_, m)| *m).collect();
    let p25 = percentile(&all_medians, 25.0);
    let p75 = percentile(&all_medians, 75.0);

    let mut map = TierMap::new();
    for (symbol, median) in pairs {
        let tier = if median >= p75 {
            Tier::Active
        } else if median >= p25 {
            Tier::Moderate
        } else {
            Tier::Sporadic
        };
        map.insert(symbol, tier);
    }
    Ok(map)
}

/// Blocking: load bars for `symbol` on each of `dates`, grouping reads by
/// year since `daily_bars_file` stores one file per calendar year.
fn median_turnover(data_root: &Path, symbol: &str, dates: &[String]) -> Option<f64> {
    let mut by_year: HashMap<i32, Vec<&String>> = HashMap::new();
    for date in dates {
        if let Ok(parsed) = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d") {
            by_year.entry(parsed.year()).or_default().push(date);
        }
    }

    let store = NdjsonStore;
    let mut turnovers = Vec::with_capacity(dates.len());
    let mut cache: HashMap<i32, Vec<DailyBar>> = HashMap::new();
    for (&year, wanted_dates) in &by_year {
        let path: PathBuf = daily_bars_file(data_root, symbol, year);
        let bars: Vec<DailyBar> = store.read_all(&path).unwrap_or_default();
        cache.insert(year, bars);
        for wanted in wanted_dates {
            if let Some(bar) = cache[&year].iter().find(|b| &b.date == *wanted) {
                turnovers.push(bar.turnover());
            }
        }
    }

    if turnovers.is_empty() {
        return None;
    }
    Some(median(&mut turnovers))
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Linear-interpolated percentile (0..=100) over an unsorted slice.
fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] + (sorted[upper] - sorted[lower]) * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_matches_known_values() {
        let values = vec![10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&values, 0.0), 10.0);
        assert_eq!(percentile(&values, 100.0), 40.0);
        assert!((percentile(&values, 50.0) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn median_odd_and_even() {
        let mut odd = vec![3.0, 1.0, 2.0];
        assert_eq!(median(&mut odd), 2.0);
        let mut even = vec![4.0, 1.0, 2.0, 3.0];
        assert_eq!(median(&mut even), 2.5);
    }

    #[tokio::test]
    async fn compute_tier_map_buckets_by_percentile() {
        let dir = std::env::temp_dir().join(format!("jupitor-tiers-test-{}", uuid::Uuid::new_v4()));
        let store = NdjsonStore;

        // Three symbols with clearly separated turnovers across 2 trailing
        // dates each.
        for (symbol, turnover_per_day) in [("LOW", 10.0), ("MID", 100.0), ("HIGH", 1000.0)] {
            let path = daily_bars_file(&dir, symbol, 2024);
            let bars = vec![
                DailyBar {
                    symbol: symbol.into(),
                    date: "2024-01-01".into(),
                    open: 1.0,
                    high: 1.0,
                    low: 1.0,
                    close: 1.0,
                    volume: 1,
                    vwap: turnover_per_day,
                    trade_count: 1,
                },
                DailyBar {
                    symbol: symbol.into(),
                    date: "2024-01-02".into(),
                    open: 1.0,
                    high: 1.0,
                    low: 1.0,
                    close: 1.0,
                    volume: 1,
                    vwap: turnover_per_day,
                    trade_count: 1,
                },
            ];
            store.append(&path, &bars).unwrap();
        }

        let map = compute_tier_map(
            &dir,
            vec!["LOW".into(), "MID".into(), "HIGH".into()],
            vec!["2024-01-01".into(), "2024-01-02".into()],
            4,
        )
        .await
        .unwrap();

        assert_eq!(map.get("HIGH"), Some(&Tier::Active));
        assert_eq!(map.get("LOW"), Some(&Tier::Sporadic));

        std::fs::remove_dir_all(&dir).ok();
    }
}
