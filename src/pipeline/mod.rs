// =============================================================================
// Derived artifact pipeline
// =============================================================================
//
// Four idempotent stages (skip if the output file already exists, except the
// tier computation which the trade-universe CSV stage depends on and is
// always recomputed as part of it): trade-universe CSV, ex-index
// consolidated trades, rolling 5-minute bars, daily summary.
// =============================================================================

pub mod daily_summary;
pub mod ex_index;
pub mod rolling_bars;
pub mod tiers;
pub mod trade_universe;

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use tracing::info;

use crate::store::paths::{
    stock_trades_daily_file, stock_trades_ex_index_file, stock_trades_ex_index_rolling_file,
    trade_universe_csv,
};
use crate::store::universe::read_universe;
use crate::types::ReferenceType;

/// Input the caller assembles for one date's pipeline run. `trailing_dates`
/// is the up-to-60 trading dates strictly before `date` used for tier
/// computation; `reference_types` classifies each universe symbol.
pub struct PipelineInput {
    pub date: String,
    pub prev_date: Option<String>,
    pub trailing_dates: Vec<String>,
    pub reference_types: HashMap<String, ReferenceType>,
    pub tier_workers: usize,
}

/// Run all four stages for `date`, skipping any whose output already
/// exists. Returns the tier map actually used (freshly computed, or
/// reconstructed from the existing trade-universe CSV when that stage was
/// skipped — callers that only need trade-universe output can ignore it).
pub async fn run_for_date(data_root: &Path, input: PipelineInput) -> Result<()> {
    let universe = read_universe(data_root, &input.date)?;
    if universe.is_empty() {
        info!(date = %input.date, "no universe for date, skipping pipeline");
        return Ok(());
    }

    if !trade_universe_csv(data_root, &input.date).exists() {
        let spx = trade_universe::load_index_members(data_root, "SPX", &input.date)?;
        let ndx = trade_universe::load_index_members(data_root, "NDX", &input.date)?;

        let non_index: Vec<String> = universe
            .iter()
            .filter(|s| {
                input.reference_types.get(*s).copied().unwrap_or(ReferenceType::Stock) != ReferenceType::Etf
                    && !spx.contains(*s)
                    && !ndx.contains(*s)
            })
            .cloned()
            .collect();

        let tier_map = tiers::compute_tier_map(
            data_root,
            non_index,
            input.trailing_dates.clone(),
            input.tier_workers,
        )
        .await?;

        trade_universe::write_trade_universe_csv(
            data_root,
            &input.date,
            &universe,
            &input.reference_types,
            &spx,
            &ndx,
            &tier_map,
        )?;
        info!(date = %input.date, "trade-universe CSV written");
    }

    if let Some(prev_date) = &input.prev_date {
        if !stock_trades_ex_index_file(data_root, &input.date).exists() {
            let spx = trade_universe::load_index_members(data_root, "SPX", &input.date)?;
            let ndx = trade_universe::load_index_members(data_root, "NDX", &input.date)?;
            let non_etf: Vec<String> = universe
                .iter()
                .filter(|s| {
                    input.reference_types.get(*s).copied().unwrap_or(ReferenceType::Stock)
                        != ReferenceType::Etf
                })
                .cloned()
                .collect();
            ex_index::process_stock_trades_for_date(data_root, prev_date, &input.date, &non_etf, |s| {
                spx.contains(s) || ndx.contains(s)
            })?;
            info!(date = %input.date, prev = %prev_date, "ex-index consolidated trades written");
        }
    }

    if !stock_trades_ex_index_rolling_file(data_root, &input.date).exists() {
        rolling_bars::process_rolling_bars_for_date(data_root, &input.date)?;
        info!(date = %input.date, "rolling bars written");
    }

    if !stock_trades_daily_file(data_root, &input.date).exists() {
        daily_summary::build_daily_summary(data_root, &input.date)?;
        info!(date = %input.date, "daily summary written");
    }

    Ok(())
}
