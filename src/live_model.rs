// =============================================================================
// LiveModel — concurrent trade store with session rollover
// =============================================================================
//
// Maintains two continuously-updated in-memory buffers ("today" and "next")
// of filtered trades. A single mutex guards append + copy-on-snapshot, which
// is the simplest design that keeps snapshots atomic w.r.t. individual
// `ingest` calls while allowing many concurrent readers.
//
// Startup handshake: the external stream emits a historical "burst" before
// going live. Modeled here as an explicit `ReadySignal` capability rather
// than a polling loop over a counter: `run_ready_calibration` watches the
// ingest rate and fires the signal once it has observed a burst settle
// (rate exceeded 100/100ms, then stayed below it for 5 consecutive 100ms
// windows). `wait_ready` blocks startup on that signal.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::filter::passes_filter;
use crate::types::TradeRecord;

const ONE_DAY_MS: i64 = 86_400_000;
const CALIBRATION_WINDOW: Duration = Duration::from_millis(100);
const CALIBRATION_BURST_THRESHOLD: u64 = 100;
const CALIBRATION_QUIET_WINDOWS: u32 = 5;

struct Inner {
    cutoff_et: i64,
    today: Vec<TradeRecord>,
    next: Vec<TradeRecord>,
}

/// Concurrent sliding-window trade store with ET-day rollover.
pub struct LiveModel {
    inner: Mutex<Inner>,
    seen_count: AtomicU64,
    ready_observed: AtomicBool,
    ready: Notify,
}

impl LiveModel {
    /// `today_cutoff_et` is the ET-shifted 4 PM of the current date. Trades
    /// with `timestamp <= cutoff` belong to today; later trades belong to
    /// next.
    pub fn new(today_cutoff_et: i64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                cutoff_et: today_cutoff_et,
                today: Vec::new(),
                next: Vec::new(),
            }),
            seen_count: AtomicU64::new(0),
            ready_observed: AtomicBool::new(false),
            ready: Notify::new(),
        }
    }

    /// Ingest a single trade. Safe under concurrent callers (single-writer
    /// is assumed by the producer contract, but the lock makes this correct
    /// even if that assumption is ever violated).
    pub fn ingest(&self, trade: TradeRecord) {
        self.seen_count.fetch_add(1, Ordering::Relaxed);
        if !passes_filter(&trade) {
            return;
        }

        let mut inner = self.inner.lock();
        // Lazily roll over: a trade landing past the *next* cutoff means
        // we've crossed at least one ET day boundary since the last ingest.
        while trade.timestamp > inner.cutoff_et + ONE_DAY_MS {
            inner.today = std::mem::take(&mut inner.next);
            inner.cutoff_et += ONE_DAY_MS;
        }

        if trade.timestamp <= inner.cutoff_et {
            inner.today.push(trade);
        } else {
            inner.next.push(trade);
        }
    }

    /// Independent copy of the current "today" bucket (regular + pre-market
    /// of the current trading day).
    pub fn today_snapshot(&self) -> (u64, Vec<TradeRecord>) {
        let inner = self.inner.lock();
        (self.seen_count(), inner.today.clone())
    }

    /// Independent copy of the current "next" bucket (post-market rolling
    /// forward to tomorrow's pre-market).
    pub fn next_snapshot(&self) -> (u64, Vec<TradeRecord>) {
        let inner = self.inner.lock();
        (self.seen_count(), inner.next.clone())
    }

    /// Total number of `ingest` calls made over the process lifetime
    /// (monotonically non-decreasing).
    pub fn seen_count(&self) -> u64 {
        self.seen_count.load(Ordering::Relaxed)
    }

    /// The ET-shifted cutoff currently in effect (useful for tests and
    /// diagnostics).
    pub fn current_cutoff(&self) -> i64 {
        self.inner.lock().cutoff_et
    }

    /// Watch the ingest rate and fire the ready signal once a historical
    /// burst has settled: at least one 100ms window exceeding 100 trades,
    /// followed by 5 consecutive 100ms windows below that threshold.
    pub async fn run_ready_calibration(&self) {
        let mut last = self.seen_count();
        let mut burst_seen = false;
        let mut quiet_windows = 0u32;
        let mut interval = tokio::time::interval(CALIBRATION_WINDOW);

        loop {
            interval.tick().await;
            let current = self.seen_count();
            let delta = current.saturating_sub(last);
            last = current;

            if delta > CALIBRATION_BURST_THRESHOLD {
                burst_seen = true;
                quiet_windows = 0;
                continue;
            }
            if burst_seen {
                quiet_windows += 1;
                if quiet_windows >= CALIBRATION_QUIET_WINDOWS {
                    self.ready_observed.store(true, Ordering::Release);
                    self.ready.notify_waiters();
                    return;
                }
            }
        }
    }

    /// Block until the calibration window has completed.
    pub async fn wait_ready(&self) {
        if self.ready_observed.load(Ordering::Acquire) {
            return;
        }
        let notified = self.ready.notified();
        if self.ready_observed.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(symbol: &str, ts: i64) -> TradeRecord {
        TradeRecord {
            symbol: symbol.into(),
            timestamp: ts,
            price: 1.0,
            size: 1,
            exchange: "A".into(),
            conditions: String::new(),
            id: "1".into(),
            update: false,
        }
    }

    #[test]
    fn ingest_buckets_today_and_next() {
        let model = LiveModel::new(1000);
        model.ingest(trade("ABC", 500));
        model.ingest(trade("ABC", 1000));
        model.ingest(trade("ABC", 1500));

        let (_, today) = model.today_snapshot();
        let (_, next) = model.next_snapshot();
        assert_eq!(today.len(), 2);
        assert_eq!(next.len(), 1);
    }

    #[test]
    fn filtered_trades_never_stored() {
        let model = LiveModel::new(1000);
        let mut rejected = trade("ABC", 500);
        rejected.exchange = "D".into();
        model.ingest(rejected);

        let (seen, today) = model.today_snapshot();
        assert_eq!(seen, 1);
        assert_eq!(today.len(), 0);
    }

    #[test]
    fn seen_count_is_monotonic() {
        let model = LiveModel::new(1000);
        let mut last = model.seen_count();
        for i in 0..10 {
            model.ingest(trade("ABC", i));
            let current = model.seen_count();
            assert!(current >= last);
            last = current;
        }
    }

    #[test]
    fn rollover_promotes_next_to_today() {
        let model = LiveModel::new(1000);
        model.ingest(trade("ABC", 1500)); // lands in "next"
        assert_eq!(model.next_snapshot().1.len(), 1);

        // A trade past the *next* cutoff (1000 + 86_400_000) forces rollover.
        model.ingest(trade("ABC", 1000 + ONE_DAY_MS + 1));

        let (_, today) = model.today_snapshot();
        let (_, next) = model.next_snapshot();
        assert_eq!(today.len(), 1); // the promoted trade at ts=1500
        assert_eq!(next.len(), 1); // the new trade that triggered rollover
        assert_eq!(model.current_cutoff(), 1000 + ONE_DAY_MS);
    }

    #[test]
    fn snapshot_is_independent_of_live_state() {
        let model = LiveModel::new(1000);
        model.ingest(trade("ABC", 500));
        let (_, mut snapshot) = model.today_snapshot();
        snapshot.push(trade("XYZ", 600));

        let (_, fresh) = model.today_snapshot();
        assert_eq!(fresh.len(), 1);
    }

    #[tokio::test]
    async fn ready_signal_fires_after_burst_then_quiet() {
        let model = std::sync::Arc::new(LiveModel::new(1_000_000_000));
        let calibrator = model.clone();
        let handle = tokio::spawn(async move {
            calibrator.run_ready_calibration().await;
        });

        // Simulate a burst immediately.
        for i in 0..500 {
            model.ingest(trade("ABC", i));
        }

        tokio::time::timeout(Duration::from_secs(2), model.wait_ready())
            .await
            .expect("ready signal should fire once ingest quiets down");

        handle.await.unwrap();
    }
}
