// =============================================================================
// Shared application state — dashboard daemon
// =============================================================================
//
// One `AppState` is built at startup and handed to every long-running task
// and every HTTP handler behind an `Arc`. Field groups mirror the
// responsibilities laid out in the component design: live ingestion, the
// derived-artifact stores the dashboard reads, the news engine, and the
// vendor-backed watchlist (optional — absent vendor credentials degrade it
// to `None` rather than a panic, per the env-config contract).
// =============================================================================

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{EnvConfig, RuntimeConfig};
use crate::live_model::LiveModel;
use crate::news::cache::NewsCache;
use crate::news::refresh::NewsSources;
use crate::ratelimit::TokenBucket;
use crate::replay_cache::ReplayCache;
use crate::symbol_history::SymbolHistoryCache;
use crate::targets::TargetsStore;
use crate::types::TierMap;
use crate::watchlist::WatchlistStore;

pub struct AppState {
    pub env: EnvConfig,
    pub runtime_config: RwLock<RuntimeConfig>,

    /// Today's/next's continuously-updated in-memory trade buffers.
    pub live_model: Arc<LiveModel>,
    /// The tier map currently in force for "today", published once the
    /// nightly backfill's derived-artifact pipeline has run for the prior
    /// trading date. Empty until the first pipeline run completes.
    pub tier_map: RwLock<Arc<TierMap>>,

    pub news_cache: Arc<NewsCache>,
    pub news_sources: Arc<NewsSources>,
    pub social_media_limiter: Arc<TokenBucket>,
    pub trade_fetch_limiter: Arc<TokenBucket>,

    pub targets: Arc<TargetsStore>,
    pub replay_cache: Arc<ReplayCache>,
    pub symbol_history: Arc<SymbolHistoryCache>,

    /// `None` when vendor credentials are absent at startup — watchlist
    /// endpoints then no-op.
    pub watchlist: Option<Arc<WatchlistStore>>,

    state_version: AtomicU64,
    started_at: std::time::Instant,
}

impl AppState {
    pub fn new(
        env: EnvConfig,
        runtime_config: RuntimeConfig,
        live_model: Arc<LiveModel>,
        news_cache: Arc<NewsCache>,
        news_sources: Arc<NewsSources>,
        social_media_limiter: Arc<TokenBucket>,
        trade_fetch_limiter: Arc<TokenBucket>,
        watchlist: Option<Arc<WatchlistStore>>,
    ) -> Self {
        let replay_capacity = runtime_config.replay_cache_capacity;
        Self {
            env,
            runtime_config: RwLock::new(runtime_config),
            live_model,
            tier_map: RwLock::new(Arc::new(TierMap::new())),
            news_cache,
            news_sources,
            social_media_limiter,
            trade_fetch_limiter,
            targets: Arc::new(TargetsStore::new()),
            replay_cache: Arc::new(ReplayCache::new(replay_capacity)),
            symbol_history: Arc::new(SymbolHistoryCache::new()),
            watchlist,
            state_version: AtomicU64::new(0),
            started_at: std::time::Instant::now(),
        }
    }

    pub fn data_root(&self) -> &PathBuf {
        &self.env.data_root
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn set_tier_map(&self, map: TierMap) {
        *self.tier_map.write() = Arc::new(map);
        self.increment_version();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::news::sources::{MarketDataNewsSource, RssSource, SocialMediaSource};
    use std::time::Duration;

    fn test_state() -> AppState {
        let env = EnvConfig {
            data_root: std::env::temp_dir(),
            vendor_key_id: None,
            vendor_secret_key: None,
            stream_addr: "localhost:50051".to_string(),
            config_path: PathBuf::from("runtime_config.json"),
        };
        let social_limiter = TokenBucket::new(Duration::from_millis(500));
        let trade_limiter = TokenBucket::new(Duration::from_millis(300));
        let news_sources = Arc::new(NewsSources {
            market_data: Arc::new(MarketDataNewsSource::new("https://example.invalid", None, None)),
            rss_generic: Arc::new(RssSource::generic_news_aggregator("https://example.invalid/{query}")),
            rss_press_release: Arc::new(RssSource::press_release_wire("https://example.invalid/{query}")),
            social_media: Arc::new(SocialMediaSource::new("https://example.invalid", social_limiter.clone())),
        });

        AppState::new(
            env,
            RuntimeConfig::default(),
            Arc::new(LiveModel::new(0)),
            Arc::new(NewsCache::new()),
            news_sources,
            social_limiter,
            trade_limiter,
            None,
        )
    }

    #[test]
    fn increment_version_is_monotonic() {
        let state = test_state();
        assert_eq!(state.current_state_version(), 0);
        assert_eq!(state.increment_version(), 1);
        assert_eq!(state.increment_version(), 2);
        assert_eq!(state.current_state_version(), 2);
    }

    #[test]
    fn set_tier_map_bumps_version_and_publishes() {
        let state = test_state();
        let mut map = TierMap::new();
        map.insert("AAPL".to_string(), crate::types::Tier::Active);
        state.set_tier_map(map);
        assert_eq!(state.tier_map.read().len(), 1);
        assert_eq!(state.current_state_version(), 1);
    }
}
