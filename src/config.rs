// =============================================================================
// Runtime configuration — environment + hot-reloadable tunables
// =============================================================================
//
// Two layers, matching the split the dashboard daemon needs:
//   - `EnvConfig` is read once at startup from the process environment and
//     never changes (data root, vendor credentials, stream address).
//   - `RuntimeConfig` holds the tunables that are safe to reload without a
//     restart (worker pool sizes, batch sizes, rate-limit intervals). It
//     persists with the same atomic tmp+rename write pattern used
//     throughout this crate to avoid corrupting the file on crash.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// =============================================================================
// Environment configuration
// =============================================================================

/// Configuration read once from the process environment at startup.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// `$DATA_1` — root data directory. Required; a missing value is a fatal
    /// startup error (exit code 1).
    pub data_root: PathBuf,
    /// `APCA_API_KEY_ID` / `APCA_API_SECRET_KEY` — optional vendor
    /// credentials. When absent, watchlist and vendor news-API features
    /// degrade to no-op rather than failing requests.
    pub vendor_key_id: Option<String>,
    pub vendor_secret_key: Option<String>,
    /// `STREAM_ADDR` — external trade-stream producer endpoint.
    pub stream_addr: String,
    /// `JUPITOR_CONFIG` — optional path to a `RuntimeConfig` JSON file,
    /// overriding the default `runtime_config.json` in the working directory.
    pub config_path: PathBuf,
}

impl EnvConfig {
    /// Load from the process environment. Fatal (returns `Err`) only when
    /// `DATA_1` is missing — that failure is fatal and exits the process.
    pub fn from_env() -> Result<Self> {
        let data_root = std::env::var("DATA_1")
            .context("DATA_1 environment variable is required")?
            .into();

        let vendor_key_id = std::env::var("APCA_API_KEY_ID").ok().filter(|s| !s.is_empty());
        let vendor_secret_key =
            std::env::var("APCA_API_SECRET_KEY").ok().filter(|s| !s.is_empty());

        let stream_addr =
            std::env::var("STREAM_ADDR").unwrap_or_else(|_| "localhost:50051".to_string());

        let config_path = std::env::var("JUPITOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("runtime_config.json"));

        if vendor_key_id.is_none() || vendor_secret_key.is_none() {
            warn!("vendor credentials not set — watchlist and vendor news API will no-op");
        }

        Ok(Self {
            data_root,
            vendor_key_id,
            vendor_secret_key,
            stream_addr,
            config_path,
        })
    }

    pub fn vendor_credentials(&self) -> Option<(&str, &str)> {
        match (&self.vendor_key_id, &self.vendor_secret_key) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

// =============================================================================
// RuntimeConfig — hot-reloadable tunables
// =============================================================================

fn default_bar_batch_size() -> usize {
    5000
}
fn default_bar_workers() -> usize {
    10
}
fn default_trade_workers() -> usize {
    16
}
fn default_news_refresh_workers() -> usize {
    4
}
fn default_news_backfill_workers() -> usize {
    8
}
fn default_trade_batch_turnover_cap() -> i64 {
    500_000
}
fn default_trade_fetch_token_interval_ms() -> u64 {
    300
}
fn default_social_token_interval_ms() -> u64 {
    500
}
fn default_replay_cache_capacity() -> usize {
    10
}
fn default_start_date() -> String {
    "2015-01-01".to_string()
}
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// Tunables that may be safely changed without restarting the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_start_date")]
    pub backfill_start_date: String,

    #[serde(default = "default_bar_batch_size")]
    pub bar_batch_size: usize,
    #[serde(default = "default_bar_workers")]
    pub bar_workers: usize,
    #[serde(default = "default_trade_workers")]
    pub trade_workers: usize,
    #[serde(default = "default_trade_batch_turnover_cap")]
    pub trade_batch_turnover_cap: i64,
    #[serde(default = "default_trade_fetch_token_interval_ms")]
    pub trade_fetch_token_interval_ms: u64,

    #[serde(default = "default_news_refresh_workers")]
    pub news_refresh_workers: usize,
    #[serde(default = "default_news_backfill_workers")]
    pub news_backfill_workers: usize,
    #[serde(default = "default_social_token_interval_ms")]
    pub social_token_interval_ms: u64,

    #[serde(default = "default_replay_cache_capacity")]
    pub replay_cache_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            backfill_start_date: default_start_date(),
            bar_batch_size: default_bar_batch_size(),
            bar_workers: default_bar_workers(),
            trade_workers: default_trade_workers(),
            trade_batch_turnover_cap: default_trade_batch_turnover_cap(),
            trade_fetch_token_interval_ms: default_trade_fetch_token_interval_ms(),
            news_refresh_workers: default_news_refresh_workers(),
            news_backfill_workers: default_news_backfill_workers(),
            social_token_interval_ms: default_social_token_interval_ms(),
            replay_cache_capacity: default_replay_cache_capacity(),
        }
    }
}

impl RuntimeConfig {
    /// Load from a JSON file. Missing file is not an error here — callers
    /// fall back to `Default` with a warning (config failures are only
    /// fatal when `DATA_1` itself is missing).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;
        info!(path = %path.display(), "runtime config loaded");
        Ok(config)
    }

    /// Persist using an atomic tmp+rename write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.bar_batch_size, 5000);
        assert_eq!(cfg.bar_workers, 10);
        assert_eq!(cfg.trade_workers, 16);
        assert_eq!(cfg.news_refresh_workers, 4);
        assert_eq!(cfg.news_backfill_workers, 8);
        assert_eq!(cfg.trade_batch_turnover_cap, 500_000);
        assert_eq!(cfg.replay_cache_capacity, 10);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.bar_batch_size, 5000);
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.bar_batch_size, cfg2.bar_batch_size);
        assert_eq!(cfg.trade_workers, cfg2.trade_workers);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("jupitor-cfg-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime_config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.bar_batch_size = 1234;
        cfg.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.bar_batch_size, 1234);

        std::fs::remove_dir_all(&dir).ok();
    }
}
