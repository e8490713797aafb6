// =============================================================================
// Watchlist — vendor trading API CRUD with a per-date ID cache
// =============================================================================
//
// The vendor trading API is an out-of-scope external collaborator; this
// module is the seam (`WatchlistProvider`) plus the per-date ID cache the
// dashboard server needs so every add/remove doesn't re-list watchlists.
// Read-lock-and-check, upgrade to write-lock on miss with double-checked
// insertion. When the vendor quota is hit creating a new watchlist, the 5
// oldest `jupitor-YYYY-MM-DD` watchlists are deleted and creation is retried
// once.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

const WATCHLIST_PREFIX: &str = "jupitor-";
const PRUNE_COUNT: usize = 5;

#[derive(Debug, Clone)]
pub struct VendorWatchlist {
    pub id: String,
    pub name: String,
}

/// Errors a vendor call can surface that the store needs to special-case.
#[derive(Debug, thiserror::Error)]
pub enum WatchlistError {
    #[error("vendor watchlist quota exceeded")]
    QuotaExceeded,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait WatchlistProvider: Send + Sync {
    async fn list_watchlists(&self) -> Result<Vec<VendorWatchlist>, WatchlistError>;
    async fn create_watchlist(&self, name: &str) -> Result<VendorWatchlist, WatchlistError>;
    async fn delete_watchlist(&self, id: &str) -> Result<(), WatchlistError>;
    async fn add_symbol(&self, watchlist_id: &str, symbol: &str) -> Result<(), WatchlistError>;
    async fn remove_symbol(&self, watchlist_id: &str, symbol: &str) -> Result<(), WatchlistError>;
    async fn list_symbols(&self, watchlist_id: &str) -> Result<Vec<String>, WatchlistError>;
}

pub struct WatchlistStore {
    provider: Arc<dyn WatchlistProvider>,
    id_cache: RwLock<HashMap<String, String>>,
}

impl WatchlistStore {
    pub fn new(provider: Arc<dyn WatchlistProvider>) -> Self {
        Self { provider, id_cache: RwLock::new(HashMap::new()) }
    }

    fn watchlist_name(date: &str) -> String {
        format!("{WATCHLIST_PREFIX}{date}")
    }

    /// Resolve `date`'s watchlist id, creating it on the vendor if needed.
    pub async fn id_for_date(&self, date: &str) -> Result<String, WatchlistError> {
        {
            let cache = self.id_cache.upgradable_read();
            if let Some(id) = cache.get(date) {
                return Ok(id.clone());
            }
            let mut cache = parking_lot::RwLockUpgradableReadGuard::upgrade(cache);
            // Double-checked: another writer may have populated it while we
            // waited for the write lock.
            if let Some(id) = cache.get(date) {
                return Ok(id.clone());
            }
            drop(cache);
        }

        let created = match self.provider.create_watchlist(&Self::watchlist_name(date)).await {
            Ok(wl) => wl,
            Err(WatchlistError::QuotaExceeded) => {
                self.prune_oldest().await?;
                self.provider.create_watchlist(&Self::watchlist_name(date)).await?
            }
            Err(e) => return Err(e),
        };

        self.id_cache.write().insert(date.to_string(), created.id.clone());
        Ok(created.id)
    }

    /// Delete the 5 oldest `jupitor-YYYY-MM-DD` watchlists (oldest by the
    /// date embedded in the name, since vendor-side creation timestamps are
    /// not assumed to be queryable).
    async fn prune_oldest(&self) -> Result<(), WatchlistError> {
        let mut existing = self.provider.list_watchlists().await?;
        existing.retain(|w| w.name.starts_with(WATCHLIST_PREFIX));
        existing.sort_by(|a, b| a.name.cmp(&b.name));

        let mut cache = self.id_cache.write();
        for wl in existing.into_iter().take(PRUNE_COUNT) {
            self.provider.delete_watchlist(&wl.id).await?;
            cache.retain(|_, id| id != &wl.id);
        }
        Ok(())
    }

    pub async fn add_symbol(&self, symbol: &str, date: &str) -> Result<(), WatchlistError> {
        let id = self.id_for_date(date).await?;
        self.provider.add_symbol(&id, symbol).await
    }

    pub async fn remove_symbol(&self, symbol: &str, date: &str) -> Result<(), WatchlistError> {
        let id = self.id_for_date(date).await?;
        self.provider.remove_symbol(&id, symbol).await
    }

    pub async fn list_symbols(&self, date: &str) -> Result<Vec<String>, WatchlistError> {
        let id = self.id_for_date(date).await?;
        self.provider.list_symbols(&id).await
    }
}

/// Deterministic in-memory provider for tests and for when vendor
/// credentials are absent (the feature then no-ops at the HTTP layer instead
/// of wiring this provider in).
#[derive(Default)]
pub struct MockWatchlistProvider {
    inner: parking_lot::Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    watchlists: Vec<VendorWatchlist>,
    symbols: HashMap<String, Vec<String>>,
    next_id: u64,
    quota: Option<usize>,
}

impl MockWatchlistProvider {
    pub fn with_quota(quota: usize) -> Self {
        let provider = Self::default();
        provider.inner.lock().quota = Some(quota);
        provider
    }
}

#[async_trait]
impl WatchlistProvider for MockWatchlistProvider {
    async fn list_watchlists(&self) -> Result<Vec<VendorWatchlist>, WatchlistError> {
        Ok(self.inner.lock().watchlists.clone())
    }

    async fn create_watchlist(&self, name: &str) -> Result<VendorWatchlist, WatchlistError> {
        let mut state = self.inner.lock();
        if let Some(quota) = state.quota {
            if state.watchlists.len() >= quota {
                return Err(WatchlistError::QuotaExceeded);
            }
        }
        state.next_id += 1;
        let wl = VendorWatchlist { id: state.next_id.to_string(), name: name.to_string() };
        state.watchlists.push(wl.clone());
        Ok(wl)
    }

    async fn delete_watchlist(&self, id: &str) -> Result<(), WatchlistError> {
        let mut state = self.inner.lock();
        state.watchlists.retain(|w| w.id != id);
        state.symbols.remove(id);
        Ok(())
    }

    async fn add_symbol(&self, watchlist_id: &str, symbol: &str) -> Result<(), WatchlistError> {
        self.inner.lock().symbols.entry(watchlist_id.to_string()).or_default().push(symbol.to_string());
        Ok(())
    }

    async fn remove_symbol(&self, watchlist_id: &str, symbol: &str) -> Result<(), WatchlistError> {
        if let Some(symbols) = self.inner.lock().symbols.get_mut(watchlist_id) {
            symbols.retain(|s| s != symbol);
        }
        Ok(())
    }

    async fn list_symbols(&self, watchlist_id: &str) -> Result<Vec<String>, WatchlistError> {
        Ok(self.inner.lock().symbols.get(watchlist_id).cloned().unwrap_or_default())
    }
}

/// Real vendor-backed provider over the trading-account watchlist API,
/// using the same header pair as [`crate::backfill::provider::VendorMarketDataProvider`].
pub struct VendorWatchlistProvider {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    secret_key: String,
}

impl VendorWatchlistProvider {
    pub fn new(base_url: impl Into<String>, key_id: String, secret_key: String) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), key_id, secret_key }
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("APCA-API-KEY-ID", &self.key_id)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
    }

    fn map_err(status: reqwest::StatusCode, err: anyhow::Error) -> WatchlistError {
        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            WatchlistError::QuotaExceeded
        } else {
            WatchlistError::Other(err)
        }
    }
}

#[derive(serde::Deserialize)]
struct VendorWatchlistResponse {
    id: String,
    name: String,
    #[serde(default)]
    assets: Vec<VendorWatchlistAsset>,
}

#[derive(serde::Deserialize)]
struct VendorWatchlistAsset {
    symbol: String,
}

#[async_trait]
impl WatchlistProvider for VendorWatchlistProvider {
    async fn list_watchlists(&self) -> Result<Vec<VendorWatchlist>, WatchlistError> {
        let url = format!("{}/v2/watchlists", self.base_url);
        let resp = self.authed(self.client.get(&url)).send().await.map_err(|e| WatchlistError::Other(e.into()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Self::map_err(status, anyhow::anyhow!("list watchlists: {status}")));
        }
        let parsed: Vec<VendorWatchlistResponse> =
            resp.json().await.map_err(|e| WatchlistError::Other(e.into()))?;
        Ok(parsed.into_iter().map(|w| VendorWatchlist { id: w.id, name: w.name }).collect())
    }

    async fn create_watchlist(&self, name: &str) -> Result<VendorWatchlist, WatchlistError> {
        let url = format!("{}/v2/watchlists", self.base_url);
        let resp = self
            .authed(self.client.post(&url).json(&serde_json::json!({ "name": name })))
            .send()
            .await
            .map_err(|e| WatchlistError::Other(e.into()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Self::map_err(status, anyhow::anyhow!("create watchlist: {status}")));
        }
        let parsed: VendorWatchlistResponse = resp.json().await.map_err(|e| WatchlistError::Other(e.into()))?;
        Ok(VendorWatchlist { id: parsed.id, name: parsed.name })
    }

    async fn delete_watchlist(&self, id: &str) -> Result<(), WatchlistError> {
        let url = format!("{}/v2/watchlists/{id}", self.base_url);
        let resp = self.authed(self.client.delete(&url)).send().await.map_err(|e| WatchlistError::Other(e.into()))?;
        let status = resp.status();
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            return Err(Self::map_err(status, anyhow::anyhow!("delete watchlist: {status}")));
        }
        Ok(())
    }

    async fn add_symbol(&self, watchlist_id: &str, symbol: &str) -> Result<(), WatchlistError> {
        let url = format!("{}/v2/watchlists/{watchlist_id}", self.base_url);
        let resp = self
            .authed(self.client.post(&url).json(&serde_json::json!({ "symbol": symbol })))
            .send()
            .await
            .map_err(|e| WatchlistError::Other(e.into()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Self::map_err(status, anyhow::anyhow!("add symbol: {status}")));
        }
        Ok(())
    }

    async fn remove_symbol(&self, watchlist_id: &str, symbol: &str) -> Result<(), WatchlistError> {
        let url = format!("{}/v2/watchlists/{watchlist_id}/{symbol}", self.base_url);
        let resp = self.authed(self.client.delete(&url)).send().await.map_err(|e| WatchlistError::Other(e.into()))?;
        let status = resp.status();
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            return Err(Self::map_err(status, anyhow::anyhow!("remove symbol: {status}")));
        }
        Ok(())
    }

    async fn list_symbols(&self, watchlist_id: &str) -> Result<Vec<String>, WatchlistError> {
        let url = format!("{}/v2/watchlists/{watchlist_id}", self.base_url);
        let resp = self.authed(self.client.get(&url)).send().await.map_err(|e| WatchlistError::Other(e.into()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Self::map_err(status, anyhow::anyhow!("list symbols: {status}")));
        }
        let parsed: VendorWatchlistResponse = resp.json().await.map_err(|e| WatchlistError::Other(e.into()))?;
        Ok(parsed.assets.into_iter().map(|a| a.symbol).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_then_list_round_trips() {
        let store = WatchlistStore::new(Arc::new(MockWatchlistProvider::default()));
        store.add_symbol("AAPL", "2024-01-02").await.unwrap();
        let symbols = store.list_symbols("2024-01-02").await.unwrap();
        assert_eq!(symbols, vec!["AAPL".to_string()]);
    }

    #[tokio::test]
    async fn same_date_reuses_cached_id() {
        let store = WatchlistStore::new(Arc::new(MockWatchlistProvider::default()));
        let id1 = store.id_for_date("2024-01-02").await.unwrap();
        let id2 = store.id_for_date("2024-01-02").await.unwrap();
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn quota_exceeded_prunes_then_retries() {
        let provider = Arc::new(MockWatchlistProvider::with_quota(2));
        let store = WatchlistStore::new(provider.clone());

        store.id_for_date("2024-01-01").await.unwrap();
        store.id_for_date("2024-01-02").await.unwrap();
        // Third creation hits the quota, prunes the 2 oldest, then succeeds.
        let id3 = store.id_for_date("2024-01-03").await.unwrap();
        assert!(!id3.is_empty());

        let remaining = provider.list_watchlists().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "jupitor-2024-01-03");
    }

    #[tokio::test]
    async fn remove_symbol_drops_it() {
        let store = WatchlistStore::new(Arc::new(MockWatchlistProvider::default()));
        store.add_symbol("AAPL", "2024-01-02").await.unwrap();
        store.remove_symbol("AAPL", "2024-01-02").await.unwrap();
        assert!(store.list_symbols("2024-01-02").await.unwrap().is_empty());
    }
}
