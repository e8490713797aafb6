// =============================================================================
// Universe writer — per-date symbol universe files
// =============================================================================
//
// Collects `(date, symbol)` pairs touched during a backfill pass in memory,
// then sort+dedups each touched date's file exactly once at `finalize`. This
// matches the documented invariant: "strictly increasing lines, no blanks"
// after finalize, while keeping writes cheap during the hot loop.
// =============================================================================

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::store::paths::universe_file;

pub struct UniverseWriter {
    data_root: PathBuf,
    // date -> symbols touched this pass, merged with the file's existing
    // contents at finalize time.
    pending: HashMap<String, BTreeSet<String>>,
}

impl UniverseWriter {
    pub fn new(data_root: PathBuf) -> Self {
        Self { data_root, pending: HashMap::new() }
    }

    /// Record that `symbol` traded (or otherwise belongs to the universe)
    /// on `date`. Cheap, in-memory only; durable only after `finalize`.
    pub fn touch(&mut self, date: &str, symbol: &str) {
        self.pending
            .entry(date.to_string())
            .or_default()
            .insert(symbol.to_string());
    }

    /// Every date touched since the writer was created (or since the last
    /// `finalize`), for callers that need to know which trade-universe CSVs
    /// etc. might now need regenerating.
    pub fn touched_dates(&self) -> Vec<String> {
        self.pending.keys().cloned().collect()
    }

    /// Merge pending in-memory symbols into each touched date's on-disk
    /// file and rewrite it sorted and deduplicated. Clears the pending set.
    pub fn finalize(&mut self) -> Result<()> {
        for (date, symbols) in self.pending.drain() {
            let path = universe_file(&self.data_root, &date);
            let mut merged: BTreeSet<String> = if path.exists() {
                std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?
                    .lines()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect()
            } else {
                BTreeSet::new()
            };
            merged.extend(symbols);

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create directory {}", parent.display()))?;
            }
            let content: String = merged.into_iter().collect::<Vec<_>>().join("\n");
            let content = if content.is_empty() { content } else { content + "\n" };
            let tmp = path.with_extension("tmp");
            std::fs::write(&tmp, &content)
                .with_context(|| format!("failed to write tmp universe file {}", tmp.display()))?;
            std::fs::rename(&tmp, &path)
                .with_context(|| format!("failed to rename tmp universe file to {}", path.display()))?;
        }
        Ok(())
    }
}

/// Read a finalized universe file; returns an empty `Vec` if it does not
/// exist (a date that was never touched).
pub fn read_universe(data_root: &std::path::Path, date: &str) -> Result<Vec<String>> {
    let path = universe_file(data_root, date);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("jupitor-universe-test-{}-{}", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn finalize_sorts_and_dedupes() {
        let root = temp_root("a");
        let mut writer = UniverseWriter::new(root.clone());
        writer.touch("2024-01-02", "ZZZ");
        writer.touch("2024-01-02", "AAA");
        writer.touch("2024-01-02", "AAA");
        writer.finalize().unwrap();

        let symbols = read_universe(&root, "2024-01-02").unwrap();
        assert_eq!(symbols, vec!["AAA".to_string(), "ZZZ".to_string()]);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn finalize_merges_with_existing_file() {
        let root = temp_root("b");
        let mut writer = UniverseWriter::new(root.clone());
        writer.touch("2024-01-02", "AAA");
        writer.finalize().unwrap();

        let mut writer2 = UniverseWriter::new(root.clone());
        writer2.touch("2024-01-02", "BBB");
        writer2.finalize().unwrap();

        let symbols = read_universe(&root, "2024-01-02").unwrap();
        assert_eq!(symbols, vec!["AAA".to_string(), "BBB".to_string()]);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn read_universe_missing_date_is_empty() {
        let root = temp_root("c");
        let symbols = read_universe(&root, "2024-01-02").unwrap();
        assert!(symbols.is_empty());
    }

    #[test]
    fn touched_dates_reports_pending() {
        let root = temp_root("d");
        let mut writer = UniverseWriter::new(root);
        writer.touch("2024-01-02", "AAA");
        writer.touch("2024-01-03", "BBB");
        let mut dates = writer.touched_dates();
        dates.sort();
        assert_eq!(dates, vec!["2024-01-02".to_string(), "2024-01-03".to_string()]);
    }
}
