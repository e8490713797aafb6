// =============================================================================
// Daily summary
// =============================================================================
//
// Collapses a date's index + ex-index consolidated trades into one row per
// symbol: trade count, turnover, VWAP, and OHLC by first/last timestamp.
// Regenerated only when the output file is missing (idempotency lives in the
// pipeline driver, not here).
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;

use crate::store::paths::{stock_trades_daily_file, stock_trades_ex_index_file, stock_trades_index_file};
use crate::store::row_store::{overwrite_atomic, NdjsonStore, RowStore};
use crate::types::{DailySummaryRow, TradeRecord};

struct Fold {
    trades: u64,
    turnover: f64,
    size_sum: i64,
    open: f64,
    close: f64,
    high: f64,
    low: f64,
    open_ts: i64,
    close_ts: i64,
}

pub fn build_daily_summary(data_root: &Path, date: &str) -> Result<()> {
    let store = NdjsonStore;
    let index: Vec<TradeRecord> = store.read_all(&stock_trades_index_file(data_root, date)).unwrap_or_default();
    let ex_index: Vec<TradeRecord> =
        store.read_all(&stock_trades_ex_index_file(data_root, date)).unwrap_or_default();

    let mut folds: HashMap<String, Fold> = HashMap::new();
    for t in index.iter().chain(ex_index.iter()) {
        let entry = folds.entry(t.symbol.clone()).or_insert_with(|| Fold {
            trades: 0,
            turnover: 0.0,
            size_sum: 0,
            open: t.price,
            close: t.price,
            high: t.price,
            low: t.price,
            open_ts: t.timestamp,
            close_ts: t.timestamp,
        });
        entry.trades += 1;
        entry.turnover += t.price * t.size as f64;
        entry.size_sum += t.size;
        entry.high = entry.high.max(t.price);
        entry.low = entry.low.min(t.price);
        if t.timestamp < entry.open_ts {
            entry.open_ts = t.timestamp;
            entry.open = t.price;
        }
        if t.timestamp >= entry.close_ts {
            entry.close_ts = t.timestamp;
            entry.close = t.price;
        }
    }

    let rows: Vec<DailySummaryRow> = folds
        .into_iter()
        .map(|(symbol, f)| DailySummaryRow {
            symbol,
            trades: f.trades,
            turnover: f.turnover,
            vwap: if f.size_sum == 0 { 0.0 } else { f.turnover / f.size_sum as f64 },
            open: f.open,
            high: f.high,
            low: f.low,
            close: f.close,
        })
        .collect();

    overwrite_atomic(&stock_trades_daily_file(data_root, date), &rows)?;
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
    fn summarizes_index_and_ex_index_together() {
        let dir = std::env::temp_dir().join(format!("jupitor-daily-summary-test-{}", uuid::Uuid::new_v4()));
        let store = NdjsonStore;
        store
            .append(&stock_trades_index_file(&dir, "2024-03-04"), &[trade("AAPL", 100, 10.0, 2)])
            .unwrap();
        store
            .append(
                &stock_trades_ex_index_file(&dir, "2024-03-04"),
                &[trade("ZZZZ", 50, 5.0, 1), trade("ZZZZ", 200, 7.0, 3)],
            )
            .unwrap();

        build_daily_summary(&dir, "2024-03-04").unwrap();

        let rows: Vec<DailySummaryRow> = store.read_all(&stock_trades_daily_file(&dir, "2024-03-04")).unwrap();
        let zzzz = rows.iter().find(|r| r.symbol == "ZZZZ").unwrap();
        assert_eq!(zzzz.trades, 2);
        assert_eq!(zzzz.open, 5.0);
        assert_eq!(zzzz.close, 7.0);
        assert_eq!(zzzz.high, 7.0);
        assert_eq!(zzzz.low, 5.0);

        std::fs::remove_dir_all(&dir).ok();
    }
}
