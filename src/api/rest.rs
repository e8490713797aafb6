// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/`. None require authentication — the
// dashboard is deployed behind a trusted network boundary. CORS is
// permissive, matching how a read-mostly internal dashboard is typically
// exposed.
// =============================================================================

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as AxPath, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;
use crate::dashboard;
use crate::error::{ApiError, ApiResult};
use crate::news::refresh::fetch_all_sources;
use crate::news::NewsArticle;
use crate::symbol_history::SymbolDayStats;
use crate::targets::TargetEvent;
use crate::timeutil::{current_et_date, et_offset_ms, pre_market_start_et_ms, post_market_end_et_ms};
use crate::types::{DayData, SortMode};

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/dashboard", get(dashboard_today))
        .route("/api/dashboard/replay", get(dashboard_replay))
        .route("/api/dashboard/history/:date", get(dashboard_history))
        .route("/api/dates", get(dates))
        .route("/api/watchlist", get(watchlist_get))
        .route("/api/watchlist/:symbol", put(watchlist_put))
        .route("/api/watchlist/:symbol", delete(watchlist_delete))
        .route("/api/news/:symbol", get(news_for_symbol))
        .route("/api/symbol-history/:symbol", get(symbol_history))
        .route("/api/targets", get(targets_get))
        .route("/api/targets", put(targets_put))
        .route("/api/targets", delete(targets_delete))
        .route("/api/targets/stream", get(targets_stream))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Shared query types
// =============================================================================

#[derive(Debug, Deserialize)]
struct SortQuery {
    sort: Option<u8>,
}

fn sort_mode_of(q: &SortQuery) -> SortMode {
    q.sort.map(SortMode::from_query).unwrap_or_default()
}

/// `all_dates` for `/api/symbol-history`: every history date plus today's,
/// appended so pages bordering "today" resolve a `prev_date` correctly.
fn all_dates_including_today(state: &AppState) -> anyhow::Result<Vec<String>> {
    let mut dates = dashboard::history_dates(state.data_root())?;
    let today = crate::timeutil::date_key(current_et_date(chrono::Utc::now()));
    if dates.last().map_or(true, |d| *d != today) {
        dates.push(today);
    }
    Ok(dates)
}

// =============================================================================
// GET /api/dashboard
// =============================================================================

async fn dashboard_today(State(state): State<Arc<AppState>>, Query(q): Query<SortQuery>) -> ApiResult<Json<Vec<DayData>>> {
    let today_date = current_et_date(chrono::Utc::now());
    let (_, today_trades) = state.live_model.today_snapshot();
    let (_, next_trades) = state.live_model.next_snapshot();
    let tier_map = state.tier_map.read().clone();

    let days = dashboard::today_dashboard(
        &today_trades,
        &next_trades,
        &tier_map,
        today_date,
        sort_mode_of(&q),
        &state.news_cache,
    );
    Ok(Json(days))
}

// =============================================================================
// GET /api/dashboard/history/{date}
// =============================================================================

async fn dashboard_history(
    State(state): State<Arc<AppState>>,
    AxPath(date): AxPath<String>,
    Query(q): Query<SortQuery>,
) -> ApiResult<Json<Vec<DayData>>> {
    let history_dates = dashboard::history_dates(state.data_root()).map_err(ApiError::Internal)?;
    if !history_dates.iter().any(|d| d == &date) {
        return Err(ApiError::NotFound(format!("no history for {date}")));
    }

    let mut day = dashboard::history_dashboard(state.data_root(), &date, sort_mode_of(&q)).map_err(ApiError::Internal)?;
    day.label = date.clone();
    let mut days = vec![day];

    let successor = history_dates.iter().find(|d| d.as_str() > date.as_str());
    let next_trades = if let Some(successor) = successor {
        dashboard::next_day_window_from_history(state.data_root(), successor)
    } else if history_dates.last() == Some(&date) {
        let symbols: Vec<String> = state.tier_map.read().keys().cloned().collect();
        dashboard::next_day_window_from_symbol_files(state.data_root(), &date, &symbols).map_err(ApiError::Internal)?
    } else {
        Vec::new()
    };

    if !next_trades.is_empty() {
        let next_tier_map = crate::pipeline::trade_universe::read_trade_universe_tier_map(state.data_root(), &date)
            .map_err(ApiError::Internal)?;
        let next_date = chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|e| ApiError::BadRequest(e.to_string()))?
            + chrono::Days::new(1);
        let open_930 = crate::timeutil::open_930_et_ms(next_date);
        let news = dashboard::news_counts_from_cache(&state.news_cache, next_date, &next_tier_map.keys().cloned().collect::<Vec<_>>());
        days.push(crate::aggregator::compute_day_data(
            dashboard::NEXT_DAY_LABEL,
            &next_trades,
            &next_tier_map,
            open_930,
            sort_mode_of(&q),
            &news,
        ));
    }

    Ok(Json(days))
}

// =============================================================================
// GET /api/dashboard/replay
// =============================================================================

#[derive(Debug, Deserialize)]
struct ReplayQuery {
    date: String,
    until: i64,
    sort: Option<u8>,
}

#[derive(Debug, Serialize)]
struct ReplayResponse {
    day: DayData,
    min_ts: i64,
    max_ts: i64,
}

async fn dashboard_replay(State(state): State<Arc<AppState>>, Query(q): Query<ReplayQuery>) -> ApiResult<Json<ReplayResponse>> {
    let parsed_date =
        chrono::NaiveDate::parse_from_str(&q.date, "%Y-%m-%d").map_err(|_| ApiError::BadRequest(format!("invalid date {}", q.date)))?;
    let until_et = q.until + et_offset_ms(parsed_date);

    let today = crate::timeutil::date_key(current_et_date(chrono::Utc::now()));
    let live_entry = if q.date == today {
        let (_, today_trades) = state.live_model.today_snapshot();
        Some((today_trades, state.tier_map.read().as_ref().clone()))
    } else {
        None
    };

    let sort_mode = q.sort.map(SortMode::from_query).unwrap_or_default();
    let result = dashboard::replay_dashboard(state.data_root(), &state.replay_cache, &q.date, until_et, sort_mode, live_entry)
        .map_err(ApiError::Internal)?;

    Ok(Json(ReplayResponse { day: result.day, min_ts: result.min_ts, max_ts: result.max_ts }))
}

// =============================================================================
// GET /api/dates
// =============================================================================

#[derive(Debug, Serialize)]
struct DatesResponse {
    dates: Vec<String>,
}

async fn dates(State(state): State<Arc<AppState>>) -> ApiResult<Json<DatesResponse>> {
    let dates = dashboard::history_dates(state.data_root()).map_err(ApiError::Internal)?;
    Ok(Json(DatesResponse { dates }))
}

// =============================================================================
// Watchlist
// =============================================================================

#[derive(Debug, Deserialize)]
struct DateQuery {
    date: Option<String>,
}

fn watchlist_date(q: &DateQuery) -> String {
    q.date.clone().unwrap_or_else(|| crate::timeutil::date_key(current_et_date(chrono::Utc::now())))
}

async fn watchlist_get(State(state): State<Arc<AppState>>, Query(q): Query<DateQuery>) -> ApiResult<Json<Vec<String>>> {
    let Some(watchlist) = &state.watchlist else {
        return Ok(Json(Vec::new()));
    };
    let symbols = watchlist.list_symbols(&watchlist_date(&q)).await.map_err(|e| ApiError::Internal(e.into()))?;
    Ok(Json(symbols))
}

async fn watchlist_put(
    State(state): State<Arc<AppState>>,
    AxPath(symbol): AxPath<String>,
    Query(q): Query<DateQuery>,
) -> ApiResult<axum::http::StatusCode> {
    let Some(watchlist) = &state.watchlist else {
        return Ok(axum::http::StatusCode::NO_CONTENT);
    };
    watchlist.add_symbol(&symbol, &watchlist_date(&q)).await.map_err(|e| ApiError::Internal(e.into()))?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn watchlist_delete(
    State(state): State<Arc<AppState>>,
    AxPath(symbol): AxPath<String>,
    Query(q): Query<DateQuery>,
) -> ApiResult<axum::http::StatusCode> {
    let Some(watchlist) = &state.watchlist else {
        return Ok(axum::http::StatusCode::NO_CONTENT);
    };
    watchlist.remove_symbol(&symbol, &watchlist_date(&q)).await.map_err(|e| ApiError::Internal(e.into()))?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

// =============================================================================
// GET /api/news/{symbol}
// =============================================================================

async fn news_for_symbol(
    State(state): State<Arc<AppState>>,
    AxPath(symbol): AxPath<String>,
    Query(q): Query<DateQuery>,
) -> ApiResult<Json<Vec<NewsArticle>>> {
    let date_str = watchlist_date(&q);
    let history_dates = dashboard::history_dates(state.data_root()).map_err(ApiError::Internal)?;

    if history_dates.iter().any(|d| d == &date_str) {
        return Ok(Json(dashboard::news_articles_for_symbol_from_disk(state.data_root(), &date_str, &symbol)));
    }

    // Today/next: serve the live cache, falling back to an on-demand fetch
    // on a cache miss so a freshly-added watchlist symbol isn't empty until
    // the next 5-minute refresh pass.
    if let Some(articles) = state.news_cache.get(&symbol, &date_str) {
        return Ok(Json(articles));
    }

    let date = chrono::NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").map_err(|_| ApiError::BadRequest(format!("invalid date {date_str}")))?;
    let start_ms = pre_market_start_et_ms(date);
    let end_ms = post_market_end_et_ms(date);
    let fetched = fetch_all_sources(&state.news_sources, &symbol, start_ms, end_ms).await;
    let merged = state.news_cache.merge_in(&symbol, &date_str, fetched);
    Ok(Json(merged))
}

// =============================================================================
// GET /api/symbol-history/{symbol}
// =============================================================================

#[derive(Debug, Deserialize)]
struct SymbolHistoryQuery {
    before: Option<String>,
    until: Option<String>,
    limit: Option<usize>,
}

async fn symbol_history(
    State(state): State<Arc<AppState>>,
    AxPath(symbol): AxPath<String>,
    Query(q): Query<SymbolHistoryQuery>,
) -> ApiResult<Json<Vec<SymbolDayStats>>> {
    let all_dates = all_dates_including_today(&state).map_err(ApiError::Internal)?;
    let limit = q.limit.unwrap_or(30);
    let page = dashboard::symbol_history_page(
        state.data_root(),
        &state.symbol_history,
        &symbol,
        &all_dates,
        q.before.as_deref(),
        q.until.as_deref(),
        limit,
    )
    .map_err(ApiError::Internal)?;
    Ok(Json(page))
}

// =============================================================================
// Targets
// =============================================================================

async fn targets_get(State(state): State<Arc<AppState>>, Query(q): Query<DateQuery>) -> Json<std::collections::HashMap<String, f64>> {
    Json(state.targets.for_date(&watchlist_date(&q)))
}

#[derive(Debug, Deserialize)]
struct TargetBody {
    date: String,
    key: String,
    value: f64,
}

async fn targets_put(State(state): State<Arc<AppState>>, Json(body): Json<TargetBody>) -> axum::http::StatusCode {
    state.targets.set(&body.date, &body.key, body.value);
    axum::http::StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct TargetDeleteQuery {
    date: String,
    key: String,
}

async fn targets_delete(State(state): State<Arc<AppState>>, Query(q): Query<TargetDeleteQuery>) -> axum::http::StatusCode {
    state.targets.delete(&q.date, &q.key);
    axum::http::StatusCode::NO_CONTENT
}

/// `GET /api/targets/stream` — a `snapshot` event immediately on connect,
/// then `set`/`delete` deltas as they happen. The subscriber is dropped
/// (unregistering it) when the client disconnects and this stream is
/// dropped in turn.
async fn targets_stream(State(state): State<Arc<AppState>>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (id, snapshot, rx) = state.targets.subscribe();
    let targets = state.targets.clone();

    let snapshot_event = stream::once(async move { Ok(target_event_to_sse(snapshot)) });
    let deltas = ReceiverStream::new(rx).map(|event| Ok(target_event_to_sse(event)));
    let guarded = UnsubscribeOnDrop { targets, id, inner: snapshot_event.chain(deltas) };

    Sse::new(guarded).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text("heartbeat"))
}

fn target_event_to_sse(event: TargetEvent) -> Event {
    let name = match &event {
        TargetEvent::Snapshot { .. } => "snapshot",
        TargetEvent::Set { .. } => "set",
        TargetEvent::Delete { .. } => "delete",
    };
    Event::default().event(name).json_data(&event).unwrap_or_else(|_| Event::default().event(name).data("{}"))
}

/// Wraps the event stream so `TargetsStore::unsubscribe` runs when the
/// client disconnects and axum drops this stream, rather than leaking a
/// subscriber slot per connection.
struct UnsubscribeOnDrop<S> {
    targets: std::sync::Arc<crate::targets::TargetsStore>,
    id: u64,
    inner: S,
}

impl<S: Stream + Unpin> Stream for UnsubscribeOnDrop<S> {
    type Item = S::Item;

    fn poll_next(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Option<Self::Item>> {
        std::pin::Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<S> Drop for UnsubscribeOnDrop<S> {
    fn drop(&mut self) {
        self.targets.unsubscribe(self.id);
    }
}
