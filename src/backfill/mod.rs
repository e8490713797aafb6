// =============================================================================
// Backfill daemon — nightly bar update + trade backfill
// =============================================================================
//
// Two independently-triggered workloads sharing the same `MarketDataProvider`
// seam: `daily` runs once per ET trading day after 20:05 ET and keeps the bar
// store + universe + `.tried-empty`/`.last-completed` ledgers current;
// `trades` walks universe dates newest-first filling in per-symbol trade
// files behind the `trades/.done/{date}` sentinel. Both are idempotent and
// safe to re-run.
// =============================================================================

pub mod daily;
pub mod provider;
pub mod trades;
pub mod universe_discovery;

pub use provider::MarketDataProvider;
