// =============================================================================
// Jupitor Nexus — ex-index dashboard daemon entry point
// =============================================================================
//
// Wires together the five subsystems the component design lays out: the
// live trade ingest feeding `LiveModel`, the backfill daemon (nightly bars +
// trade history), the derived-artifact pipeline + historical news backfill,
// the 5-minute live news refresh, and the dashboard HTTP/SSE server. Every
// long-running task shares one `CancellationToken` so a single Ctrl+C tears
// the whole process down cleanly.
// =============================================================================

mod aggregator;
mod api;
mod app_state;
mod backfill;
mod concurrency;
mod config;
mod dashboard;
mod error;
mod filter;
mod ingest;
mod live_model;
mod news;
mod pipeline;
mod ratelimit;
mod replay_cache;
mod store;
mod symbol_history;
mod targets;
mod timeutil;
mod types;
mod watchlist;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, NaiveTime, Utc};
use chrono_tz::America::New_York;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::backfill::daily::{run_daily_update, DailyUpdateInput};
use crate::backfill::provider::{MarketDataProvider, VendorMarketDataProvider};
use crate::backfill::trades::{run_trade_backfill, universe_dates_newest_first};
use crate::config::{EnvConfig, RuntimeConfig};
use crate::live_model::LiveModel;
use crate::news::cache::{load_or_warn, NewsCache};
use crate::news::refresh::{backfill_date, deep_social_targets, refresh_once, top_symbols_per_tier, NewsSources};
use crate::news::sources::{MarketDataNewsSource, RssSource, SocialMediaSource};
use crate::ratelimit::TokenBucket;
use crate::store::paths::{daily_last_completed, daily_tried_empty};
use crate::store::progress::ProgressTracker;
use crate::store::row_store::{NdjsonStore, RowStore};
use crate::store::universe::read_universe;
use crate::timeutil::{close_4pm_et_ms, current_et_date, date_key};
use crate::types::{DailyBar, ReferenceType};
use crate::watchlist::{VendorWatchlistProvider, WatchlistStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("jupitor-nexus starting up");

    let env = match EnvConfig::from_env() {
        Ok(env) => env,
        Err(e) => {
            error!(error = %e, "fatal startup error");
            std::process::exit(1);
        }
    };

    let runtime_config = RuntimeConfig::load(&env.config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load runtime config, using defaults");
        RuntimeConfig::default()
    });

    // ── News sources ──────────────────────────────────────────────────────
    let social_limiter = TokenBucket::new(Duration::from_millis(runtime_config.social_token_interval_ms));
    let trade_fetch_limiter = TokenBucket::new(Duration::from_millis(runtime_config.trade_fetch_token_interval_ms));

    let market_data_base =
        std::env::var("MARKET_DATA_NEWS_URL").unwrap_or_else(|_| "https://data.example-vendor.invalid/v1beta1/news".to_string());
    let rss_generic_url = std::env::var("RSS_GENERIC_NEWS_URL")
        .unwrap_or_else(|_| "https://news.example-aggregator.invalid/rss?q={query}".to_string());
    let rss_press_release_url =
        std::env::var("RSS_PRESS_RELEASE_URL").unwrap_or_else(|_| "https://wire.example-pr.invalid/rss?q={query}".to_string());
    let social_media_base =
        std::env::var("SOCIAL_MEDIA_API_URL").unwrap_or_else(|_| "https://api.example-social.invalid/v2".to_string());

    let news_sources = Arc::new(NewsSources {
        market_data: Arc::new(MarketDataNewsSource::new(market_data_base, env.vendor_key_id.clone(), env.vendor_secret_key.clone())),
        rss_generic: Arc::new(RssSource::generic_news_aggregator(rss_generic_url)),
        rss_press_release: Arc::new(RssSource::press_release_wire(rss_press_release_url)),
        social_media: Arc::new(SocialMediaSource::new(social_media_base, social_limiter.clone())),
    });

    let news_cache = Arc::new(NewsCache::new());
    let today_et = current_et_date(Utc::now());
    load_or_warn(&news_cache, &date_key(today_et));

    // ── Watchlist (no-op when vendor credentials are absent) ─────────────
    let watchlist = env.vendor_credentials().map(|(key_id, secret_key)| {
        let vendor_base = std::env::var("VENDOR_TRADING_API_URL").unwrap_or_else(|_| "https://paper-api.example-vendor.invalid".to_string());
        Arc::new(WatchlistStore::new(Arc::new(VendorWatchlistProvider::new(vendor_base, key_id.to_string(), secret_key.to_string()))))
    });

    // ── Live model ────────────────────────────────────────────────────────
    let live_model = Arc::new(LiveModel::new(close_4pm_et_ms(today_et)));

    let state = Arc::new(AppState::new(
        env.clone(),
        runtime_config.clone(),
        live_model.clone(),
        news_cache.clone(),
        news_sources.clone(),
        social_limiter.clone(),
        trade_fetch_limiter.clone(),
        watchlist,
    ));

    // Publish whatever tier map the last pipeline run already left on disk,
    // so the dashboard isn't empty for the first 30-minute cycle.
    if let Some(latest) = dashboard::history_dates(state.data_root()).ok().and_then(|d| d.last().cloned()) {
        if let Ok(tier_map) = crate::pipeline::trade_universe::read_trade_universe_tier_map(state.data_root(), &latest) {
            if !tier_map.is_empty() {
                state.set_tier_map(tier_map);
            }
        }
    }

    let market_data_provider: Arc<dyn MarketDataProvider> = match env.vendor_credentials() {
        Some((key_id, secret_key)) => {
            let bars_base = std::env::var("VENDOR_MARKET_DATA_URL").unwrap_or_else(|_| "https://data.example-vendor.invalid/v2".to_string());
            Arc::new(VendorMarketDataProvider::new(bars_base, key_id.to_string(), secret_key.to_string()))
        }
        None => {
            warn!("vendor credentials not set — backfill daemon has no upstream data source");
            Arc::new(crate::backfill::provider::MockProvider::default())
        }
    };

    let cancel = CancellationToken::new();

    // ── Live ingest + startup calibration ────────────────────────────────
    {
        let model = live_model.clone();
        tokio::spawn(async move { model.run_ready_calibration().await });
    }
    {
        let model = live_model.clone();
        let addr = env.stream_addr.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { run_ingest_loop(model, addr, cancel).await });
    }

    info!("waiting for the historical trade burst to settle before serving requests");
    live_model.wait_ready().await;
    info!("ready signal received");

    // ── Backfill daemon ───────────────────────────────────────────────────
    {
        let state = state.clone();
        let provider = market_data_provider.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { run_backfill_loop(state, provider, cancel).await });
    }

    // ── News: 5-minute live refresh ───────────────────────────────────────
    {
        let state = state.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { run_news_refresh_loop(state, cancel).await });
    }

    // ── Derived-artifact pipeline + historical news backfill (30 min) ────
    {
        let state = state.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { run_historical_pipeline_loop(state, cancel).await });
    }

    // ── Dashboard HTTP/SSE server ─────────────────────────────────────────
    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&runtime_config.bind_addr).await?;
    info!(addr = %runtime_config.bind_addr, "dashboard server listening");

    tokio::select! {
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                error!(error = %e, "dashboard server exited unexpectedly");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received");
        }
    }

    cancel.cancel();
    info!("jupitor-nexus shut down complete");
    Ok(())
}

// =============================================================================
// Live ingest — reconnect-with-backoff wrapper around `ingest::run_ingest`
// =============================================================================

async fn run_ingest_loop(model: Arc<LiveModel>, addr: String, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            res = ingest::run_ingest(&addr, &model) => {
                match res {
                    Ok(()) => info!(addr = %addr, "trade stream closed cleanly, reconnecting"),
                    Err(e) => warn!(addr = %addr, error = %e, "trade stream error, reconnecting in 2s"),
                }
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(2)) => {}
        }
    }
}

// =============================================================================
// Backfill daemon — nightly daily-bar update (after 20:05 ET) + trade backfill
// =============================================================================

const NIGHTLY_TRIGGER_TIME: NaiveTime = NaiveTime::from_hms_opt(20, 5, 0).unwrap();
const BACKFILL_POLL: Duration = Duration::from_secs(300);

async fn run_backfill_loop(state: Arc<AppState>, provider: Arc<dyn MarketDataProvider>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(BACKFILL_POLL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        let data_root = state.data_root().clone();
        let now = Utc::now();
        let et_now = now.with_timezone(&New_York);
        let today = current_et_date(now);

        let progress = match ProgressTracker::new(daily_tried_empty(&data_root), daily_last_completed(&data_root)) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to open progress tracker, skipping this pass");
                continue;
            }
        };
        let last_completed = progress
            .last_completed()
            .ok()
            .flatten()
            .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok());

        let due = et_now.time() >= NIGHTLY_TRIGGER_TIME && last_completed != Some(today);
        if due {
            let cfg = state.runtime_config.read().clone();
            let start_date = NaiveDate::parse_from_str(&cfg.backfill_start_date, "%Y-%m-%d").unwrap_or(today);
            let input = DailyUpdateInput {
                data_root: data_root.clone(),
                today,
                last_completed,
                start_date,
                batch_size: cfg.bar_batch_size,
                max_workers: cfg.bar_workers,
            };
            match run_daily_update(provider.clone(), &input).await {
                Ok(outcome) => info!(
                    known_updated = outcome.known_updated,
                    discovered = outcome.discovered,
                    backfilled = outcome.backfilled,
                    "nightly daily-bar update complete"
                ),
                Err(e) => warn!(error = %e, "nightly daily-bar update failed, will retry next pass"),
            }
        }

        let cfg = state.runtime_config.read().clone();
        let rate_limiter = state.trade_fetch_limiter.clone();
        match run_trade_backfill(provider.clone(), rate_limiter, &data_root, cfg.trade_batch_turnover_cap).await {
            Ok(completed) if completed > 0 => info!(completed, "trade backfill pass completed dates"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "trade backfill pass failed, will retry next pass"),
        }
    }
}

// =============================================================================
// News: 5-minute live refresh loop
// =============================================================================

const NEWS_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

async fn run_news_refresh_loop(state: Arc<AppState>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(NEWS_REFRESH_INTERVAL);
    let mut ever_seen: HashMap<String, HashSet<String>> = HashMap::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        let today = current_et_date(Utc::now());
        let today_key = date_key(today);
        let next_key = date_key(today + chrono::Days::new(1));

        let all_symbols: Vec<String> = state.tier_map.read().keys().cloned().collect();
        if all_symbols.is_empty() {
            continue;
        }

        for (date_key_str, window) in [
            (today_key.clone(), (crate::timeutil::pre_market_start_et_ms(today), crate::timeutil::post_market_end_et_ms(today))),
            (
                next_key.clone(),
                (
                    crate::news::next_session_open_930_et_ms(today) - 5 * 3_600_000,
                    crate::news::next_session_open_930_et_ms(today) + 10 * 3_600_000,
                ),
            ),
        ] {
            let seen = ever_seen.entry(date_key_str.clone()).or_default();
            let mut ordered: Vec<String> = all_symbols.iter().filter(|s| !seen.contains(*s)).cloned().collect();
            ordered.extend(all_symbols.iter().filter(|s| seen.contains(*s)).cloned());
            for symbol in &all_symbols {
                seen.insert(symbol.clone());
            }

            refresh_once(
                state.news_sources.clone(),
                state.news_cache.clone(),
                ordered,
                date_key_str,
                window.0,
                window.1,
                state.runtime_config.read().news_refresh_workers,
            )
            .await;
        }

        ever_seen.retain(|d, _| *d == today_key || *d == next_key);

        if let Err(e) = state.news_cache.persist_to_disk(&today_key) {
            warn!(error = %e, "failed to persist news cache");
        }
    }
}

// =============================================================================
// Derived-artifact pipeline + historical news backfill
// =============================================================================

const HISTORICAL_LOOP_SETTLE: Duration = Duration::from_secs(120);
const HISTORICAL_LOOP_INTERVAL: Duration = Duration::from_secs(1800);
const MAX_PIPELINE_GAPS_PER_PASS: usize = 10;
const TOP_N_PER_TIER: usize = 100;
const DEEP_SOCIAL_PER_TIER: usize = 20;

async fn run_historical_pipeline_loop(state: Arc<AppState>, cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(HISTORICAL_LOOP_SETTLE) => {}
    }

    let mut interval = tokio::time::interval(HISTORICAL_LOOP_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        let data_root = state.data_root().clone();
        let dates = match universe_dates_newest_first(&data_root) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "failed to list universe dates");
                continue;
            }
        };
        if dates.is_empty() {
            continue;
        }

        let reference_types = load_reference_types(&data_root);
        let tier_workers = state.runtime_config.read().bar_workers.max(16);

        let mut processed = 0;
        for date in dates.iter().rev() {
            if processed >= MAX_PIPELINE_GAPS_PER_PASS {
                break;
            }
            if crate::store::paths::stock_trades_ex_index_file(&data_root, date).exists() {
                continue;
            }
            let idx = dates.iter().position(|d| d == date).unwrap_or(0);
            let prev_date = dates.get(idx + 1).cloned();
            let trailing_dates: Vec<String> = dates.iter().skip(idx + 1).take(60).cloned().collect();

            let input = crate::pipeline::PipelineInput {
                date: date.clone(),
                prev_date,
                trailing_dates,
                reference_types: reference_types.clone(),
                tier_workers,
            };
            match crate::pipeline::run_for_date(&data_root, input).await {
                Ok(()) => {
                    processed += 1;
                    info!(date = %date, "derived-artifact pipeline caught up one gap");
                }
                Err(e) => warn!(date = %date, error = %e, "derived-artifact pipeline failed for date"),
            }
        }

        if let Some(latest) = dates.first() {
            if let Ok(tier_map) = crate::pipeline::trade_universe::read_trade_universe_tier_map(&data_root, latest) {
                if !tier_map.is_empty() {
                    state.set_tier_map(tier_map);
                }
            }
        }

        for date in dates.iter().take(20) {
            let news_path = crate::store::paths::news_file(&data_root, date);
            if news_path.exists() {
                continue;
            }
            let Ok(tier_map) = crate::pipeline::trade_universe::read_trade_universe_tier_map(&data_root, date) else { continue };
            if tier_map.is_empty() {
                continue;
            }
            let trade_counts = trade_counts_for_date(&data_root, date);
            let by_tier = top_symbols_per_tier(&tier_map, &trade_counts, TOP_N_PER_TIER);
            let deep_targets = deep_social_targets(&by_tier, DEEP_SOCIAL_PER_TIER);
            let workers = state.runtime_config.read().news_backfill_workers;

            match backfill_date(&data_root, date, by_tier, deep_targets, state.news_sources.clone(), workers).await {
                Ok(count) => info!(date = %date, articles = count, "historical news backfill wrote a date"),
                Err(e) => warn!(date = %date, error = %e, "historical news backfill failed for date"),
            }
        }
    }
}

/// Every symbol's bar `trade_count` on `date`, for ranking the top-100
/// deep-pagination candidates. Missing bars count as zero.
fn trade_counts_for_date(data_root: &std::path::Path, date: &str) -> HashMap<String, u64> {
    let Ok(symbols) = read_universe(data_root, date) else { return HashMap::new() };
    let Ok(parsed) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else { return HashMap::new() };
    let store = NdjsonStore;
    let mut out = HashMap::with_capacity(symbols.len());
    for symbol in symbols {
        let bars: Vec<DailyBar> = store
            .read_all(&crate::store::paths::daily_bars_file(data_root, &symbol, parsed.year()))
            .unwrap_or_default();
        let count = bars.iter().find(|b| b.date == date).map(|b| b.trade_count).unwrap_or(0);
        out.insert(symbol, count);
    }
    out
}

/// Optional `$DATA_1/reference/etf-symbols.txt` listing known ETF tickers,
/// one per line. Absent file means every universe symbol defaults to
/// `ReferenceType::Stock` (see DESIGN.md — the reference-type source itself
/// is out of scope for this crate).
fn load_reference_types(data_root: &std::path::Path) -> HashMap<String, ReferenceType> {
    let path = data_root.join("reference").join("etf-symbols.txt");
    let mut out = HashMap::new();
    if let Ok(content) = std::fs::read_to_string(&path) {
        for line in content.lines() {
            let symbol = line.trim().to_uppercase();
            if !symbol.is_empty() {
                out.insert(symbol, ReferenceType::Etf);
            }
        }
    }
    out
}
