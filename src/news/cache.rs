// =============================================================================
// News cache — process-wide, keyed by "SYMBOL:DATE", persisted to disk
// =============================================================================
//
// Live cache entries live in memory for the current/next trading date only;
// history dates are read straight from `us/news/<date>.parquet` by the
// dashboard handler and never enter this cache. Persistence is a single
// JSON file per date at `/tmp/us-stream-news-<date>.json`, matching spec
// §6's documented path, written with the same atomic tmp+rename pattern
// every other store in this crate uses.
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::warn;

use crate::news::{merge_articles, NewsArticle};

fn cache_key(symbol: &str, date: &str) -> String {
    format!("{symbol}:{date}")
}

fn persistence_path(date: &str) -> PathBuf {
    std::env::temp_dir().join(format!("us-stream-news-{date}.json"))
}

pub struct NewsCache {
    entries: Mutex<HashMap<String, Vec<NewsArticle>>>,
}

impl Default for NewsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl NewsCache {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, symbol: &str, date: &str) -> Option<Vec<NewsArticle>> {
        self.entries.lock().get(&cache_key(symbol, date)).cloned()
    }

    /// Merge `articles` into the cached entry for `(symbol, date)`,
    /// preserving previously-cached articles whose `(time, source)` key is
    /// missing from `articles` (transient fetcher failures don't erase
    /// history), then store the merged, sorted result.
    pub fn merge_in(&self, symbol: &str, date: &str, articles: Vec<NewsArticle>) -> Vec<NewsArticle> {
        let key = cache_key(symbol, date);
        let mut entries = self.entries.lock();
        let merged = match entries.get(&key) {
            Some(existing) => merge_articles(existing, &articles),
            None => {
                let mut sorted = articles;
                crate::news::sort_articles(&mut sorted);
                sorted
            }
        };
        entries.insert(key, merged.clone());
        merged
    }

    /// Every symbol with a cached entry for `date`.
    pub fn symbols_for_date(&self, date: &str) -> Vec<String> {
        let suffix = format!(":{date}");
        self.entries
            .lock()
            .keys()
            .filter_map(|k| k.strip_suffix(&suffix).map(|s| s.to_string()))
            .collect()
    }

    /// Load `date`'s persisted cache file into memory, replacing any
    /// in-memory entries for that date. Missing file degrades to a no-op.
    pub fn load_from_disk(&self, date: &str) -> Result<()> {
        let path = persistence_path(date);
        if !path.exists() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let persisted: HashMap<String, Vec<NewsArticle>> =
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

        let mut entries = self.entries.lock();
        for (symbol, articles) in persisted {
            entries.insert(cache_key(&symbol, date), articles);
        }
        Ok(())
    }

    /// Serialize every cached entry for `date` back to its JSON file,
    /// atomically (tmp + rename).
    pub fn persist_to_disk(&self, date: &str) -> Result<()> {
        let suffix = format!(":{date}");
        let snapshot: HashMap<String, Vec<NewsArticle>> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .filter_map(|(k, v)| k.strip_suffix(&suffix).map(|sym| (sym.to_string(), v.clone())))
                .collect()
        };

        let path = persistence_path(date);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let tmp_path = path.with_extension("json.tmp");
        let body = serde_json::to_vec(&snapshot).context("serializing news cache")?;
        std::fs::write(&tmp_path, &body).with_context(|| format!("writing {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path).with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Best-effort disk load used at startup; logs and continues on failure
/// rather than treating a corrupt cache file as fatal.
pub fn load_or_warn(cache: &NewsCache, date: &str) {
    if let Err(e) = cache.load_from_disk(date) {
        warn!(date, error = %e, "failed to load news cache from disk");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::news::NewsSourceTag;

    fn article(time: i64, headline: &str) -> NewsArticle {
        NewsArticle { time, source: NewsSourceTag::RssGeneric, headline: headline.into(), content: String::new() }
    }

    #[test]
    fn merge_in_preserves_prior_articles() {
        let cache = NewsCache::new();
        cache.merge_in("AAPL", "2024-03-04", vec![article(1, "first")]);
        let merged = cache.merge_in("AAPL", "2024-03-04", vec![article(2, "second")]);
        assert_eq!(merged.len(), 2);
        assert_eq!(cache.get("AAPL", "2024-03-04").unwrap().len(), 2);
    }

    #[test]
    fn symbols_for_date_filters_by_suffix() {
        let cache = NewsCache::new();
        cache.merge_in("AAPL", "2024-03-04", vec![article(1, "a")]);
        cache.merge_in("MSFT", "2024-03-05", vec![article(1, "b")]);
        let symbols = cache.symbols_for_date("2024-03-04");
        assert_eq!(symbols, vec!["AAPL".to_string()]);
    }

    #[test]
    fn persist_and_reload_round_trips() {
        let cache = NewsCache::new();
        let date = format!("test-{}", uuid::Uuid::new_v4());
        cache.merge_in("AAPL", &date, vec![article(1, "first")]);
        cache.persist_to_disk(&date).unwrap();

        let reloaded = NewsCache::new();
        reloaded.load_from_disk(&date).unwrap();
        assert_eq!(reloaded.get("AAPL", &date).unwrap().len(), 1);

        std::fs::remove_file(persistence_path(&date)).ok();
    }
}
