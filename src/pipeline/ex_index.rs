// =============================================================================
// Ex-index consolidated trades
// =============================================================================
//
// For a universe-date pair (P, D), builds D's "effective trading day": P's
// after-hours trades plus D's regular-session trades, filtered, split into
// index (SPX/NDX member on D) and ex-index buckets, and written out sorted
// by timestamp.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::filter::filter_trades;
use crate::store::paths::{stock_trades_ex_index_file, stock_trades_index_file, trades_file};
use crate::store::row_store::{overwrite_atomic, NdjsonStore, RowStore};
use crate::timeutil::close_4pm_et_ms;
use crate::types::TradeRecord;

/// Build and persist the two consolidated files for date `D`.
///
/// `universe_symbols` must already be restricted to non-ETF symbols from
/// D's trade-universe. `is_index_member` answers "is this symbol an SPX or
/// NDX member on D" for the index/ex-index split.
pub fn process_stock_trades_for_date(
    data_root: &Path,
    prev_date: &str,
    date: &str,
    universe_symbols: &[String],
    is_index_member: impl Fn(&str) -> bool,
) -> Result<()> {
    let prev_parsed = NaiveDate::parse_from_str(prev_date, "%Y-%m-%d")
        .with_context(|| format!("invalid prev date {prev_date}"))?;
    let date_parsed =
        NaiveDate::parse_from_str(date, "%Y-%m-%d").with_context(|| format!("invalid date {date}"))?;
    let prev_cutoff = close_4pm_et_ms(prev_parsed);
    let cutoff = close_4pm_et_ms(date_parsed);

    let store = NdjsonStore;
    let mut index_trades: Vec<TradeRecord> = Vec::new();
    let mut ex_index_trades: Vec<TradeRecord> = Vec::new();

    for symbol in universe_symbols {
        let prev_path = trades_file(data_root, symbol, prev_date);
        let cur_path = trades_file(data_root, symbol, date);

        let prev_trades: Vec<TradeRecord> = store.read_all(&prev_path).unwrap_or_default();
        let cur_trades: Vec<TradeRecord> = store.read_all(&cur_path).unwrap_or_default();

        let mut combined: Vec<TradeRecord> = prev_trades
            .into_iter()
            .filter(|t| t.timestamp > prev_cutoff)
            .chain(cur_trades.into_iter().filter(|t| t.timestamp <= cutoff))
            .collect();
        combined = filter_trades(&combined);

        if is_index_member(symbol) {
            index_trades.append(&mut combined);
        } else {
            ex_index_trades.append(&mut combined);
        }
    }

    index_trades.sort_by_key(|t| t.timestamp);
    ex_index_trades.sort_by_key(|t| t.timestamp);

    overwrite_atomic(&stock_trades_index_file(data_root, date), &index_trades)?;
    overwrite_atomic(&stock_trades_ex_index_file(data_root, date), &ex_index_trades)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(symbol: &str, ts: i64) -> TradeRecord {
        TradeRecord {
            symbol: symbol.into(),
            timestamp: ts,
            price: 1.0,
            size: 1,
            exchange: "A".into(),
            conditions: String::new(),
            id: "1".into(),
            update: false,
        }
    }

    #[test]
    fn splits_index_and_ex_index_and_spans_after_hours() {
        let dir = std::env::temp_dir().join(format!("jupitor-exidx-test-{}", uuid::Uuid::new_v4()));
        let store = NdjsonStore;

        let prev = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let cur = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(); // Monday after Friday
        let prev_cutoff = close_4pm_et_ms(prev);
        let cur_cutoff = close_4pm_et_ms(cur);

        // AAPL: index member. One after-hours trade on prev, one regular on cur.
        store
            .append(
                &trades_file(&dir, "AAPL", "2024-03-01"),
                &[trade("AAPL", prev_cutoff + 1000), trade("AAPL", prev_cutoff - 1000)],
            )
            .unwrap();
        store
            .append(&trades_file(&dir, "AAPL", "2024-03-04"), &[trade("AAPL", cur_cutoff - 1000)])
            .unwrap();

        // ZZZZ: ex-index member, only a current-day trade.
        store
            .append(&trades_file(&dir, "ZZZZ", "2024-03-04"), &[trade("ZZZZ", cur_cutoff - 500)])
            .unwrap();

        process_stock_trades_for_date(
            &dir,
            "2024-03-01",
            "2024-03-04",
            &["AAPL".to_string(), "ZZZZ".to_string()],
            |s| s == "AAPL",
        )
        .unwrap();

        let index: Vec<TradeRecord> = store.read_all(&stock_trades_index_file(&dir, "2024-03-04")).unwrap();
        let ex_index: Vec<TradeRecord> =
            store.read_all(&stock_trades_ex_index_file(&dir, "2024-03-04")).unwrap();

        // AAPL's pre-cutoff prev trade is excluded; the post-cutoff prev trade
        // and the regular cur trade are included.
        assert_eq!(index.len(), 2);
        assert_eq!(ex_index.len(), 1);
        assert_eq!(ex_index[0].symbol, "ZZZZ");

        std::fs::remove_dir_all(&dir).ok();
    }
}
