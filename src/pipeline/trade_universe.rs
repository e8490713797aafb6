// =============================================================================
// Trade-universe CSV
// =============================================================================
//
// `us/trade-universe/<date>.csv`: one row per symbol that traded on `date`,
// decorated with its reference type, SPX/NDX membership, and computed tier.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::store::paths::{index_members_file, trade_universe_csv};
use crate::types::{ReferenceType, Tier, TierMap, TradeUniverseRow};

/// Reconstruct `D`'s tier map from the already-written trade-universe CSV,
/// for history/replay views that don't want to recompute tiers. Rows with
/// an empty `tier` (ETFs and index members) are omitted.
pub fn read_trade_universe_tier_map(data_root: &Path, date: &str) -> Result<TierMap> {
    let path = trade_universe_csv(data_root, date);
    if !path.exists() {
        return Ok(TierMap::new());
    }
    let mut reader = csv::Reader::from_path(&path).with_context(|| format!("reading {}", path.display()))?;
    let mut map = TierMap::new();
    for row in reader.deserialize() {
        let row: TradeUniverseRow = row.with_context(|| format!("parsing row in {}", path.display()))?;
        if let Ok(tier) = row.tier.parse::<Tier>() {
            map.insert(row.symbol, tier);
        }
    }
    Ok(map)
}

/// Load an index membership file for `date`, falling back to the latest
/// earlier available file under the same directory if `date`'s file is
/// missing (recent-date gap-fill).
pub fn load_index_members(data_root: &Path, index: &str, date: &str) -> Result<HashSet<String>> {
    let path = index_members_file(data_root, index, date);
    if path.exists() {
        return read_symbol_lines(&path);
    }

    let dir = match path.parent() {
        Some(dir) => dir,
        None => return Ok(HashSet::new()),
    };
    if !dir.exists() {
        return Ok(HashSet::new());
    }

    let mut best: Option<(String, PathBuf)> = None;
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(stem) = name.strip_suffix(".txt") else { continue };
        if stem.as_str() < date && best.as_ref().map_or(true, |(best_stem, _)| stem > best_stem.as_str()) {
            best = Some((stem.to_string(), entry.path()));
        }
    }

    match best {
        Some((_, path)) => read_symbol_lines(&path),
        None => Ok(HashSet::new()),
    }
}

fn read_symbol_lines(path: &Path) -> Result<HashSet<String>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(content.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
}

/// Classify `symbol` from a reference type lookup, defaulting to `Stock`
/// when the symbol is absent from the reference data (see DESIGN.md).
fn classify(symbol: &str, reference_types: &HashMap<String, ReferenceType>) -> ReferenceType {
    reference_types.get(symbol).copied().unwrap_or(ReferenceType::Stock)
}

/// Write the trade-universe CSV for `date`. Does not check for idempotency
/// itself; the pipeline driver skips this stage when the output already
/// exists.
pub fn write_trade_universe_csv(
    data_root: &Path,
    date: &str,
    universe: &[String],
    reference_types: &HashMap<String, ReferenceType>,
    spx_members: &HashSet<String>,
    ndx_members: &HashSet<String>,
    tier_map: &TierMap,
) -> Result<()> {
    let path = trade_universe_csv(data_root, date);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let tmp_path = path.with_extension("tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;

        for symbol in universe {
            let reference_type = classify(symbol, reference_types);
            let spx = spx_members.contains(symbol);
            let ndx = ndx_members.contains(symbol);
            let is_index_or_etf = reference_type == ReferenceType::Etf || spx || ndx;
            let tier = if is_index_or_etf {
                String::new()
            } else {
                tier_map.get(symbol).map(|t| t.to_string()).unwrap_or_else(|| "SPORADIC".to_string())
            };

            writer
                .serialize(TradeUniverseRow {
                    symbol: symbol.clone(),
                    reference_type,
                    spx,
                    ndx,
                    tier,
                })
                .with_context(|| format!("failed to write row for {symbol}"))?;
        }
        writer.flush().context("failed to flush trade-universe CSV")?;
    }

    std::fs::rename(&tmp_path, &path)
        .with_context(|| format!("failed to rename {} to {}", tmp_path.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etf_and_index_members_get_empty_tier() {
        let dir = std::env::temp_dir().join(format!("jupitor-tuc-test-{}", uuid::Uuid::new_v4()));
        let mut reference_types = HashMap::new();
        reference_types.insert("SPY".to_string(), ReferenceType::Etf);
        reference_types.insert("AAPL".to_string(), ReferenceType::Stock);
        reference_types.insert("ZZZZ".to_string(), ReferenceType::Stock);

        let mut spx = HashSet::new();
        spx.insert("AAPL".to_string());

        let mut tier_map = TierMap::new();
        tier_map.insert("ZZZZ".to_string(), crate::types::Tier::Moderate);

        write_trade_universe_csv(
            &dir,
            "2024-01-02",
            &["SPY".to_string(), "AAPL".to_string(), "ZZZZ".to_string()],
            &reference_types,
            &spx,
            &HashSet::new(),
            &tier_map,
        )
        .unwrap();

        let path = trade_universe_csv(&dir, "2024-01-02");
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<TradeUniverseRow> = reader.deserialize().map(|r| r.unwrap()).collect();

        assert_eq!(rows[0].symbol, "SPY");
        assert_eq!(rows[0].tier, "");
        assert_eq!(rows[1].symbol, "AAPL");
        assert_eq!(rows[1].tier, "");
        assert_eq!(rows[2].symbol, "ZZZZ");
        assert_eq!(rows[2].tier, "MODERATE");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn read_trade_universe_tier_map_skips_empty_tiers() {
        let dir = std::env::temp_dir().join(format!("jupitor-tucread-test-{}", uuid::Uuid::new_v4()));
        let reference_types = HashMap::new();
        let mut spx = HashSet::new();
        spx.insert("AAPL".to_string());
        let mut tier_map = TierMap::new();
        tier_map.insert("ZZZZ".to_string(), crate::types::Tier::Active);

        write_trade_universe_csv(
            &dir,
            "2024-01-02",
            &["AAPL".to_string(), "ZZZZ".to_string()],
            &reference_types,
            &spx,
            &HashSet::new(),
            &tier_map,
        )
        .unwrap();

        let reconstructed = read_trade_universe_tier_map(&dir, "2024-01-02").unwrap();
        assert_eq!(reconstructed.get("ZZZZ"), Some(&crate::types::Tier::Active));
        assert_eq!(reconstructed.get("AAPL"), None);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_index_file_falls_back_to_latest_earlier() {
        let dir = std::env::temp_dir().join(format!("jupitor-gapfill-test-{}", uuid::Uuid::new_v4()));
        let earlier = index_members_file(&dir, "SPX", "2024-01-01");
        std::fs::create_dir_all(earlier.parent().unwrap()).unwrap();
        std::fs::write(&earlier, "AAPL\nMSFT\n").unwrap();

        let members = load_index_members(&dir, "SPX", "2024-01-05").unwrap();
        assert!(members.contains("AAPL"));
        assert!(members.contains("MSFT"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
