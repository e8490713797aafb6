// =============================================================================
// Rolling 5-minute bars
// =============================================================================
//
// Reads a date's ex-index consolidated trades, bins each symbol into 5-second
// VWAP bins, and decorates each bin with a trailing (<=60 bins, <=5 minutes,
// gap-aware) and a forward-looking statistic.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;

use crate::store::paths::{stock_trades_ex_index_file, stock_trades_ex_index_rolling_file};
use crate::store::row_store::{overwrite_atomic, NdjsonStore, RowStore};
use crate::timeutil::{PRE_MARKET_OPEN, REGULAR_CLOSE, REGULAR_OPEN};
use crate::types::{RollingBar, TradeRecord};

const BIN_WIDTH_MS: i64 = 5_000;
const MAX_WINDOW_BINS: usize = 60;
const MAX_WINDOW_MS: i64 = 300_000;
const MAX_INTRA_SESSION_GAP_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Session {
    PreMarket,
    Regular,
    PostMarket,
    Other,
}

fn session_key(ts: i64) -> (chrono::NaiveDate, Session) {
    let date = crate::timeutil::et_date_from_shifted_ms(ts);
    let time = crate::timeutil::et_time_of_day(ts);
    let session = if time >= PRE_MARKET_OPEN && time < REGULAR_OPEN {
        Session::PreMarket
    } else if time >= REGULAR_OPEN && time < REGULAR_CLOSE {
        Session::Regular
    } else if time >= REGULAR_CLOSE {
        Session::PostMarket
    } else {
        Session::Other
    };
    (date, session)
}

struct Bin {
    bin_start: i64,
    trades: u64,
    turnover: f64,
    size_sum: i64,
}

impl Bin {
    fn vwap(&self) -> f64 {
        if self.size_sum == 0 {
            0.0
        } else {
            self.turnover / self.size_sum as f64
        }
    }
}

fn bin_trades(trades: &[TradeRecord]) -> Vec<Bin> {
    let mut by_bin: HashMap<i64, Bin> = HashMap::new();
    for t in trades {
        let bin_start = t.timestamp.div_euclid(BIN_WIDTH_MS) * BIN_WIDTH_MS;
        let entry = by_bin.entry(bin_start).or_insert(Bin { bin_start, trades: 0, turnover: 0.0, size_sum: 0 });
        entry.trades += 1;
        entry.turnover += t.price * t.size as f64;
        entry.size_sum += t.size;
    }
    let mut bins: Vec<Bin> = by_bin.into_values().collect();
    bins.sort_by_key(|b| b.bin_start);
    bins
}

fn compute_symbol_bars(symbol: &str, trades: &[TradeRecord]) -> Vec<RollingBar> {
    let bins = bin_trades(trades);
    let mut bars = Vec::with_capacity(bins.len());

    for i in 0..bins.len() {
        let vwap_i = bins[i].vwap();

        // Backward window: up to 60 bins, up to 5 minutes, never crossing an
        // intra-session gap > 60s (session boundaries bridge freely).
        let mut window_start = i;
        let mut count = 1usize;
        while window_start > 0 && count < MAX_WINDOW_BINS {
            let prev = window_start - 1;
            if bins[i].bin_start - bins[prev].bin_start > MAX_WINDOW_MS {
                break;
            }
            let gap = bins[window_start].bin_start - bins[prev].bin_start;
            if gap > MAX_INTRA_SESSION_GAP_MS
                && session_key(bins[prev].bin_start) == session_key(bins[window_start].bin_start)
            {
                break;
            }
            window_start = prev;
            count += 1;
        }

        let window = &bins[window_start..=i];
        let min_vwap = window.iter().map(|b| b.vwap()).fold(f64::INFINITY, f64::min);
        let trades_5m: u64 = window.iter().map(|b| b.trades).sum();
        let turnover_5m: f64 = window.iter().map(|b| b.turnover).sum();
        let gain_pct_5m = if min_vwap > 0.0 && min_vwap.is_finite() {
            (vwap_i - min_vwap) / min_vwap * 100.0
        } else {
            0.0
        };

        let max_vwap_after = bins[i + 1..].iter().map(|b| b.vwap()).fold(f64::NEG_INFINITY, f64::max);
        let gain_pct_future = if max_vwap_after.is_finite() && vwap_i > 0.0 {
            ((max_vwap_after - vwap_i) / vwap_i * 100.0).max(0.0)
        } else {
            0.0
        };

        bars.push(RollingBar {
            symbol: symbol.to_string(),
            bin_start: bins[i].bin_start,
            vwap: vwap_i,
            trades: bins[i].trades,
            turnover: bins[i].turnover,
            gain_pct_5m,
            trades_5m,
            turnover_5m,
            gain_pct_future,
        });
    }
    bars
}

/// Compute and persist rolling bars for `date` from its ex-index
/// consolidated trades.
pub fn process_rolling_bars_for_date(data_root: &Path, date: &str) -> Result<()> {
    let store = NdjsonStore;
    let trades: Vec<TradeRecord> = store.read_all(&stock_trades_ex_index_file(data_root, date)).unwrap_or_default();

    let mut by_symbol: HashMap<String, Vec<TradeRecord>> = HashMap::new();
    for t in trades {
        by_symbol.entry(t.symbol.clone()).or_default().push(t);
    }

    let mut all_bars = Vec::new();
    for (symbol, mut symbol_trades) in by_symbol {
        symbol_trades.sort_by_key(|t| t.timestamp);
        all_bars.extend(compute_symbol_bars(&symbol, &symbol_trades));
    }

    overwrite_atomic(&stock_trades_ex_index_rolling_file(data_root, date), &all_bars)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(symbol: &str, ts: i64, price: f64, size: i64) -> TradeRecord {
        TradeRecord {
            symbol: symbol.into(),
            timestamp: ts,
            price,
            size,
            exchange: "A".into(),
            conditions: String::new(),
            id: "1".into(),
            update: false,
        }
    }

    #[test]
    fn bins_group_by_five_second_window() {
        let trades = vec![trade("ABC", 0, 10.0, 1), trade("ABC", 4999, 20.0, 1), trade("ABC", 5000, 30.0, 1)];
        let bins = bin_trades(&trades);
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[0].bin_start, 0);
        assert_eq!(bins[0].trades, 2);
        assert_eq!(bins[1].bin_start, 5000);
    }

    #[test]
    fn gain_pct_5m_uses_trailing_minimum() {
        let trades = vec![
            trade("ABC", 0, 10.0, 1),
            trade("ABC", 5000, 5.0, 1),
            trade("ABC", 10000, 15.0, 1),
        ];
        let bars = compute_symbol_bars("ABC", &trades);
        // Third bar's trailing window min vwap is 5.0 (second bar).
        let last = bars.last().unwrap();
        assert!((last.gain_pct_5m - ((15.0 - 5.0) / 5.0 * 100.0)).abs() < 1e-9);
    }

    #[test]
    fn large_intra_session_gap_truncates_window() {
        let trades = vec![
            trade("ABC", 0, 100.0, 1),
            // 70 seconds later, same session (regular, but synthetic ts so
            // session_key is identical since both map to "Other" bucket here).
            trade("ABC", 70_000, 10.0, 1),
        ];
        let bars = compute_symbol_bars("ABC", &trades);
        let last = bars.last().unwrap();
        // The gap exceeds 60s and both timestamps map to the same session
        // bucket (Other), so the window should exclude the first bar.
        assert_eq!(last.gain_pct_5m, 0.0);
    }

    #[test]
    fn gain_pct_future_is_never_negative() {
        let trades = vec![trade("ABC", 0, 10.0, 1), trade("ABC", 5000, 5.0, 1)];
        let bars = compute_symbol_bars("ABC", &trades);
        assert_eq!(bars[0].gain_pct_future, 0.0); // price only fell after bar 0
    }
}
