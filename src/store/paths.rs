// =============================================================================
// On-disk layout — path construction for $DATA_1
// =============================================================================
//
// Every other module in `store` and the pipeline/backfill/news layers builds
// paths through these functions rather than formatting strings inline, so the
// on-disk tree stays centralized in one place. Extensions are kept verbatim
// (`.parquet`) even though the concrete store underneath is NDJSON — see
// `RowStore` for why.
// =============================================================================

use std::path::{Path, PathBuf};

/// Root of the `us/` tree under `$DATA_1`.
fn us_root(data_root: &Path) -> PathBuf {
    data_root.join("us")
}

pub fn daily_bars_file(data_root: &Path, symbol: &str, year: i32) -> PathBuf {
    us_root(data_root)
        .join("daily")
        .join(symbol)
        .join(format!("{year}.parquet"))
}

pub fn daily_tried_empty(data_root: &Path) -> PathBuf {
    us_root(data_root).join("daily").join(".tried-empty")
}

pub fn daily_last_completed(data_root: &Path) -> PathBuf {
    us_root(data_root).join("daily").join(".last-completed")
}

pub fn trades_file(data_root: &Path, symbol: &str, date: &str) -> PathBuf {
    us_root(data_root)
        .join("trades")
        .join(symbol)
        .join(format!("{date}.parquet"))
}

pub fn trades_done_sentinel(data_root: &Path, date: &str) -> PathBuf {
    us_root(data_root).join("trades").join(".done").join(date)
}

pub fn universe_file(data_root: &Path, date: &str) -> PathBuf {
    us_root(data_root).join("universe").join(format!("{date}.txt"))
}

pub fn trade_universe_csv(data_root: &Path, date: &str) -> PathBuf {
    us_root(data_root)
        .join("trade-universe")
        .join(format!("{date}.csv"))
}

pub fn stock_trades_index_file(data_root: &Path, date: &str) -> PathBuf {
    us_root(data_root)
        .join("stock-trades-index")
        .join(format!("{date}.parquet"))
}

pub fn stock_trades_ex_index_file(data_root: &Path, date: &str) -> PathBuf {
    us_root(data_root)
        .join("stock-trades-ex-index")
        .join(format!("{date}.parquet"))
}

pub fn stock_trades_daily_file(data_root: &Path, date: &str) -> PathBuf {
    us_root(data_root)
        .join("stock-trades-daily")
        .join(format!("{date}.parquet"))
}

pub fn stock_trades_ex_index_rolling_file(data_root: &Path, date: &str) -> PathBuf {
    us_root(data_root)
        .join("stock-trades-ex-index-rolling")
        .join(format!("{date}.parquet"))
}

pub fn news_file(data_root: &Path, date: &str) -> PathBuf {
    us_root(data_root).join("news").join(format!("{date}.parquet"))
}

/// Index-membership file for `index` ("spx" or "ndx") on `date`.
pub fn index_members_file(data_root: &Path, index: &str, date: &str) -> PathBuf {
    us_root(data_root)
        .join("index")
        .join(index.to_lowercase())
        .join(format!("{date}.txt"))
}

/// Reference CSV of length->=5 discovery-seed symbols; an input to the
/// pipeline, not an output, so it lives directly under `$DATA_1/reference/`
/// rather than `us/`.
pub fn reference_long_symbols_file(data_root: &Path) -> PathBuf {
    data_root.join("reference").join("long-symbols.csv")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_nest_under_us() {
        let root = Path::new("/data");
        assert_eq!(
            daily_bars_file(root, "ABC", 2024),
            PathBuf::from("/data/us/daily/ABC/2024.parquet")
        );
        assert_eq!(
            universe_file(root, "2024-01-02"),
            PathBuf::from("/data/us/universe/2024-01-02.txt")
        );
        assert_eq!(
            trades_done_sentinel(root, "2024-01-02"),
            PathBuf::from("/data/us/trades/.done/2024-01-02")
        );
        assert_eq!(
            index_members_file(root, "SPX", "2024-01-02"),
            PathBuf::from("/data/us/index/spx/2024-01-02.txt")
        );
    }
}
