// =============================================================================
// RowStore — append/read abstraction over the columnar on-disk format
// =============================================================================
//
// The production system backs this with a columnar on-disk format; that
// format is out of scope here (see the module doc in `crate::store`). This
// crate provides one concrete backend — newline-delimited JSON — behind the
// same trait, so callers (bar store, trade store, news store) are written
// against the abstraction and don't change if the backend does. Paths keep
// their `.parquet` extension regardless of the backend in use, matching the
// documented on-disk tree.
// =============================================================================

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Append-only row store keyed by whatever path the caller constructs
/// (typically `(symbol, date-or-year)`).
pub trait RowStore<T> {
    /// Append rows to `path`, creating parent directories and the file if
    /// necessary. Does not deduplicate; callers that need dedup-on-write
    /// (the bar store) perform it before calling `append`.
    fn append(&self, path: &Path, rows: &[T]) -> Result<()>;

    /// Read every row previously appended to `path`. Returns an empty `Vec`
    /// if the file does not exist.
    fn read_all(&self, path: &Path) -> Result<Vec<T>>;

    /// True if at least one row has ever been written to `path`.
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// NDJSON-backed `RowStore`: one JSON object per line, opened in append mode.
pub struct NdjsonStore;

impl<T> RowStore<T> for NdjsonStore
where
    T: Serialize + DeserializeOwned,
{
    fn append(&self, path: &Path, rows: &[T]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {} for append", path.display()))?;
        for row in rows {
            let line = serde_json::to_string(row)
                .with_context(|| format!("failed to serialise row for {}", path.display()))?;
            writeln!(file, "{line}")
                .with_context(|| format!("failed to write row to {}", path.display()))?;
        }
        Ok(())
    }

    fn read_all(&self, path: &Path) -> Result<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(path)
            .with_context(|| format!("failed to open {} for read", path.display()))?;
        let reader = BufReader::new(file);
        let mut rows = Vec::new();
        for line in reader.lines() {
            let line = line.with_context(|| format!("failed to read line from {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let row: T = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse row from {}", path.display()))?;
            rows.push(row);
        }
        Ok(rows)
    }
}

/// Overwrite `path` atomically with `rows`, replacing any prior contents.
/// Used by stores that dedupe on write (the bar store keyed by
/// `(symbol, date)`) rather than blindly appending.
pub fn overwrite_atomic<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let mut buf = String::new();
    for row in rows {
        buf.push_str(&serde_json::to_string(row)?);
        buf.push('\n');
    }
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("tmp")
    ));
    fs::write(&tmp_path, buf)
        .with_context(|| format!("failed to write tmp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename tmp file to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        symbol: String,
        value: f64,
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("jupitor-rowstore-test-{}-{}", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn append_then_read_all_round_trips() {
        let path = temp_path("a").join("rows.parquet");
        let store = NdjsonStore;
        let rows = vec![
            Row { symbol: "ABC".into(), value: 1.0 },
            Row { symbol: "XYZ".into(), value: 2.0 },
        ];
        store.append(&path, &rows).unwrap();
        let read_back: Vec<Row> = store.read_all(&path).unwrap();
        assert_eq!(read_back, rows);
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn append_twice_accumulates() {
        let path = temp_path("b").join("rows.parquet");
        let store = NdjsonStore;
        store.append(&path, &[Row { symbol: "A".into(), value: 1.0 }]).unwrap();
        store.append(&path, &[Row { symbol: "B".into(), value: 2.0 }]).unwrap();
        let rows: Vec<Row> = store.read_all(&path).unwrap();
        assert_eq!(rows.len(), 2);
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn read_all_missing_file_is_empty() {
        let path = temp_path("c").join("missing.parquet");
        let store = NdjsonStore;
        let rows: Vec<Row> = store.read_all(&path).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn overwrite_atomic_replaces_contents() {
        let path = temp_path("d").join("rows.parquet");
        overwrite_atomic(&path, &[Row { symbol: "A".into(), value: 1.0 }]).unwrap();
        overwrite_atomic(&path, &[Row { symbol: "B".into(), value: 2.0 }]).unwrap();
        let store = NdjsonStore;
        let rows: Vec<Row> = store.read_all(&path).unwrap();
        assert_eq!(rows, vec![Row { symbol: "B".into(), value: 2.0 }]);
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }
}
