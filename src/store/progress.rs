// =============================================================================
// Progress tracker — `.tried-empty` ledger and `.last-completed` marker
// =============================================================================
//
// Both files back the backfill daemon's resumability guarantee: `.tried-empty`
// is an append-only ledger of symbols known to return no bars (so discovery
// never re-fetches them), and `.last-completed` is a single ISO date the
// daily-bar update compares against to decide whether it has anything to do.
// =============================================================================

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;

pub struct ProgressTracker {
    tried_empty_path: PathBuf,
    last_completed_path: PathBuf,
    // In-memory mirror of the ledger to avoid re-reading the file on every
    // `is_tried_empty` check during a discovery pass.
    tried_empty: Mutex<HashSet<String>>,
}

impl ProgressTracker {
    pub fn new(tried_empty_path: PathBuf, last_completed_path: PathBuf) -> Result<Self> {
        let tried_empty = load_tried_empty(&tried_empty_path)?;
        Ok(Self {
            tried_empty_path,
            last_completed_path,
            tried_empty: Mutex::new(tried_empty),
        })
    }

    pub fn is_tried_empty(&self, symbol: &str) -> bool {
        self.tried_empty.lock().contains(symbol)
    }

    /// Append a symbol to the ledger. Idempotent: a symbol already present
    /// in memory is not re-appended to disk.
    pub fn mark_tried_empty(&self, symbol: &str) -> Result<()> {
        let mut set = self.tried_empty.lock();
        if set.contains(symbol) {
            return Ok(());
        }
        if let Some(parent) = self.tried_empty_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.tried_empty_path)
            .with_context(|| format!("failed to open {}", self.tried_empty_path.display()))?;
        writeln!(file, "{symbol}")
            .with_context(|| format!("failed to append to {}", self.tried_empty_path.display()))?;
        set.insert(symbol.to_string());
        Ok(())
    }

    pub fn last_completed(&self) -> Result<Option<String>> {
        if !self.last_completed_path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.last_completed_path).with_context(|| {
            format!("failed to read {}", self.last_completed_path.display())
        })?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            Ok(None)
        } else {
            Ok(Some(trimmed.to_string()))
        }
    }

    /// Atomic tmp+rename write of the completed date.
    pub fn set_last_completed(&self, date: &str) -> Result<()> {
        if let Some(parent) = self.last_completed_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let tmp = self.last_completed_path.with_extension("tmp");
        std::fs::write(&tmp, date)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.last_completed_path).with_context(|| {
            format!("failed to rename {} to {}", tmp.display(), self.last_completed_path.display())
        })?;
        Ok(())
    }
}

fn load_tried_empty(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_paths(name: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("jupitor-progress-test-{}-{}", name, uuid::Uuid::new_v4()));
        (dir.join(".tried-empty"), dir.join(".last-completed"))
    }

    #[test]
    fn fresh_tracker_has_no_completed_date() {
        let (te, lc) = temp_paths("a");
        let tracker = ProgressTracker::new(te, lc).unwrap();
        assert_eq!(tracker.last_completed().unwrap(), None);
    }

    #[test]
    fn mark_tried_empty_is_idempotent_on_disk() {
        let (te, lc) = temp_paths("b");
        let tracker = ProgressTracker::new(te.clone(), lc).unwrap();
        tracker.mark_tried_empty("ZZZZ").unwrap();
        tracker.mark_tried_empty("ZZZZ").unwrap();
        assert!(tracker.is_tried_empty("ZZZZ"));

        let content = std::fs::read_to_string(&te).unwrap();
        assert_eq!(content.lines().count(), 1);
        std::fs::remove_dir_all(te.parent().unwrap()).ok();
    }

    #[test]
    fn reloading_tracker_sees_prior_ledger() {
        let (te, lc) = temp_paths("c");
        {
            let tracker = ProgressTracker::new(te.clone(), lc.clone()).unwrap();
            tracker.mark_tried_empty("QQQQ").unwrap();
        }
        let reloaded = ProgressTracker::new(te.clone(), lc).unwrap();
        assert!(reloaded.is_tried_empty("QQQQ"));
        std::fs::remove_dir_all(te.parent().unwrap()).ok();
    }

    #[test]
    fn last_completed_round_trips() {
        let (te, lc) = temp_paths("d");
        let tracker = ProgressTracker::new(te.clone(), lc).unwrap();
        tracker.set_last_completed("2024-03-01").unwrap();
        assert_eq!(tracker.last_completed().unwrap().as_deref(), Some("2024-03-01"));
        std::fs::remove_dir_all(te.parent().unwrap()).ok();
    }
}
