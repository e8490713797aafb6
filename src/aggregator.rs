// =============================================================================
// Aggregator — SymbolStats computation, session splitting, DayData assembly
// =============================================================================

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::filter::filter_trades;
use crate::types::{CombinedStats, DayData, NewsCounts, SortMode, SymbolStats, Tier, TierGroup, TierMap};
use crate::types::TradeRecord;

// =============================================================================
// Per-symbol accumulator
// =============================================================================

struct Accumulator {
    trades: u64,
    total_size: i64,
    turnover: f64,
    min_price: f64,
    min_ts: i64,
    max_price: f64,
    max_ts: i64,
    open_price: f64,
    open_ts: i64,
    close_price: f64,
    close_ts: i64,
}

impl Accumulator {
    fn new(t: &TradeRecord) -> Self {
        Self {
            trades: 1,
            total_size: t.size,
            turnover: t.price * t.size as f64,
            min_price: t.price,
            min_ts: t.timestamp,
            max_price: t.price,
            max_ts: t.timestamp,
            open_price: t.price,
            open_ts: t.timestamp,
            close_price: t.price,
            close_ts: t.timestamp,
        }
    }

    fn fold(&mut self, t: &TradeRecord) {
        self.trades += 1;
        self.total_size += t.size;
        self.turnover += t.price * t.size as f64;

        if t.price < self.min_price {
            self.min_price = t.price;
            self.min_ts = t.timestamp;
        }
        if t.price > self.max_price {
            self.max_price = t.price;
            self.max_ts = t.timestamp;
        }
        if t.timestamp < self.open_ts {
            self.open_price = t.price;
            self.open_ts = t.timestamp;
        }
        if t.timestamp >= self.close_ts {
            self.close_price = t.price;
            self.close_ts = t.timestamp;
        }
    }

    /// Merge two partial accumulations of the same symbol (for the batching
    /// law: split -> aggregate -> merge == aggregate the whole).
    fn merge(mut self, other: Accumulator) -> Self {
        self.trades += other.trades;
        self.total_size += other.total_size;
        self.turnover += other.turnover;

        if other.min_price < self.min_price {
            self.min_price = other.min_price;
            self.min_ts = other.min_ts;
        }
        if other.max_price > self.max_price {
            self.max_price = other.max_price;
            self.max_ts = other.max_ts;
        }
        if other.open_ts < self.open_ts {
            self.open_price = other.open_price;
            self.open_ts = other.open_ts;
        }
        if other.close_ts >= self.close_ts {
            self.close_price = other.close_price;
            self.close_ts = other.close_ts;
        }
        self
    }

    fn into_stats(self, symbol: String) -> Option<SymbolStats> {
        if self.open_price == 0.0 {
            return None;
        }
        let max_gain = (self.max_price - self.open_price) / self.open_price;
        let max_loss = ((self.open_price - self.min_price) / self.open_price).max(0.0);
        let gain_first = self.max_ts <= self.min_ts;

        Some(SymbolStats {
            symbol,
            trades: self.trades,
            open: self.open_price,
            close: self.close_price,
            high: self.max_price,
            low: self.min_price,
            total_size: self.total_size,
            turnover: self.turnover,
            max_gain,
            max_loss,
            gain_first,
            close_gain: None,
            max_drawdown: None,
            trade_profile: None,
        })
    }
}

// =============================================================================
// AggregateTrades
// =============================================================================

/// Fold an unordered trade set into per-symbol `SymbolStats`. A single pass
/// per symbol; ties between the high and low timestamps resolve
/// `gain_first = true`.
pub fn aggregate_trades(trades: &[TradeRecord]) -> HashMap<String, SymbolStats> {
    let mut accs: HashMap<String, Accumulator> = HashMap::new();
    for t in trades {
        accs.entry(t.symbol.clone())
            .and_modify(|a| a.fold(t))
            .or_insert_with(|| Accumulator::new(t));
    }
    accs.into_iter()
        .filter_map(|(symbol, acc)| acc.into_stats(symbol.clone()).map(|s| (symbol, s)))
        .collect()
}

/// Aggregate each of `partitions` independently and merge per-symbol results.
/// Equivalent up to floating-point roundoff to aggregating the concatenation
/// of all partitions (the "aggregator batching" law).
pub fn aggregate_trades_partitioned(partitions: &[&[TradeRecord]]) -> HashMap<String, SymbolStats> {
    let mut accs: HashMap<String, Accumulator> = HashMap::new();
    for part in partitions {
        let mut local: HashMap<String, Accumulator> = HashMap::new();
        for t in *part {
            local
                .entry(t.symbol.clone())
                .and_modify(|a| a.fold(t))
                .or_insert_with(|| Accumulator::new(t));
        }
        for (symbol, acc) in local {
            let merged = match accs.remove(&symbol) {
                Some(existing) => existing.merge(acc),
                None => acc,
            };
            accs.insert(symbol, merged);
        }
    }
    accs.into_iter()
        .filter_map(|(symbol, acc)| acc.into_stats(symbol.clone()).map(|s| (symbol, s)))
        .collect()
}

// =============================================================================
// SplitBySession
// =============================================================================

/// Partition by timestamp: `t < open930ET` is pre-market, otherwise regular.
pub fn split_by_session(
    trades: &[TradeRecord],
    open_930_et: i64,
) -> (Vec<TradeRecord>, Vec<TradeRecord>) {
    let mut pre = Vec::new();
    let mut reg = Vec::new();
    for t in trades {
        if t.timestamp < open_930_et {
            pre.push(t.clone());
        } else {
            reg.push(t.clone());
        }
    }
    (pre, reg)
}

// =============================================================================
// ComputeDayData
// =============================================================================

/// Apply the filter, split by session, aggregate each side, join into
/// `CombinedStats` per symbol present in `tier_map`, group by tier, and sort
/// each group by `sort_mode`.
pub fn compute_day_data(
    label: &str,
    trades: &[TradeRecord],
    tier_map: &TierMap,
    open_930_et: i64,
    sort_mode: SortMode,
    news: &HashMap<String, NewsCounts>,
) -> DayData {
    let filtered = filter_trades(trades);
    let (pre, reg) = split_by_session(&filtered, open_930_et);
    let pre_count = pre.len();
    let reg_count = reg.len();

    let pre_stats = aggregate_trades(&pre);
    let reg_stats = aggregate_trades(&reg);

    let mut by_tier: HashMap<Tier, Vec<CombinedStats>> = HashMap::new();
    for tier in Tier::all() {
        by_tier.insert(tier, Vec::new());
    }

    for (symbol, tier) in tier_map {
        let pre = pre_stats.get(symbol).cloned();
        let reg = reg_stats.get(symbol).cloned();
        if pre.is_none() && reg.is_none() {
            continue;
        }
        let news_counts = news.get(symbol).copied().unwrap_or_default();
        by_tier.entry(*tier).or_default().push(CombinedStats {
            symbol: symbol.clone(),
            tier: *tier,
            pre,
            reg,
            news_counts,
        });
    }

    let mut tiers = Vec::with_capacity(3);
    for tier in Tier::all() {
        let mut symbols = by_tier.remove(&tier).unwrap_or_default();
        sort_symbols(&mut symbols, sort_mode);
        tiers.push(TierGroup {
            tier,
            count: symbols.len(),
            symbols,
        });
    }

    DayData {
        label: label.to_string(),
        pre_count,
        reg_count,
        tiers,
    }
}

/// Resort an existing `DayData` in place without recomputing aggregates.
/// Preserves the set of `(symbol, tier, pre, reg)` tuples.
pub fn resort_day_data(day: &mut DayData, sort_mode: SortMode) {
    for group in &mut day.tiers {
        sort_symbols(&mut group.symbols, sort_mode);
    }
}

/// Sort key: symbols missing the addressed session sort last; ties break by
/// symbol for determinism.
fn sort_symbols(symbols: &mut [CombinedStats], mode: SortMode) {
    symbols.sort_by(|a, b| sort_cmp(a, b, mode));
}

fn sort_cmp(a: &CombinedStats, b: &CombinedStats, mode: SortMode) -> Ordering {
    match mode {
        SortMode::PreTrades => cmp_session_key(&a.pre, &b.pre, |s| s.trades as f64, &a.symbol, &b.symbol),
        SortMode::PreTurnover => cmp_session_key(&a.pre, &b.pre, |s| s.turnover, &a.symbol, &b.symbol),
        SortMode::PreGain => cmp_session_key(&a.pre, &b.pre, |s| s.max_gain, &a.symbol, &b.symbol),
        SortMode::RegTrades => cmp_session_key(&a.reg, &b.reg, |s| s.trades as f64, &a.symbol, &b.symbol),
        SortMode::RegTurnover => cmp_session_key(&a.reg, &b.reg, |s| s.turnover, &a.symbol, &b.symbol),
        SortMode::RegGain => cmp_session_key(&a.reg, &b.reg, |s| s.max_gain, &a.symbol, &b.symbol),
        SortMode::News => {
            let an = total_news(&a.news_counts);
            let bn = total_news(&b.news_counts);
            bn.cmp(&an).then_with(|| a.symbol.cmp(&b.symbol))
        }
    }
}

fn total_news(n: &NewsCounts) -> u32 {
    n.st_pre + n.st_reg + n.st_post + n.news
}

fn cmp_session_key(
    a: &Option<SymbolStats>,
    b: &Option<SymbolStats>,
    key: impl Fn(&SymbolStats) -> f64,
    a_symbol: &str,
    b_symbol: &str,
) -> Ordering {
    match (a, b) {
        (Some(sa), Some(sb)) => key(sb)
            .partial_cmp(&key(sa))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a_symbol.cmp(b_symbol)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a_symbol.cmp(b_symbol),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(symbol: &str, ts: i64, price: f64, size: i64) -> TradeRecord {
        TradeRecord {
            symbol: symbol.into(),
            timestamp: ts,
            price,
            size,
            exchange: "A".into(),
            conditions: String::new(),
            id: format!("{symbol}-{ts}"),
            update: false,
        }
    }

    #[test]
    fn aggregator_basic_scenario() {
        let trades = vec![
            trade("ABC", 1000, 10.0, 100),
            trade("ABC", 2000, 12.0, 200),
            trade("ABC", 3000, 9.0, 300),
            trade("ABC", 4000, 11.0, 100),
        ];
        let stats = aggregate_trades(&trades);
        let s = stats.get("ABC").unwrap();
        assert_eq!(s.open, 10.0);
        assert_eq!(s.close, 11.0);
        assert_eq!(s.high, 12.0);
        assert_eq!(s.low, 9.0);
        assert_eq!(s.trades, 4);
        assert_eq!(s.total_size, 700);
        assert!((s.turnover - 6300.0).abs() < 1e-9);
        assert!((s.max_gain - 0.20).abs() < 1e-9);
        assert!((s.max_loss - 0.10).abs() < 1e-9);
        assert!(s.gain_first);
    }

    #[test]
    fn session_split_boundary() {
        let open_930 = 5000;
        let trades = vec![
            trade("ABC", 4999, 1.0, 1),
            trade("ABC", 5000, 1.0, 1),
            trade("ABC", 5001, 1.0, 1),
        ];
        let (pre, reg) = split_by_session(&trades, open_930);
        assert_eq!(pre.len(), 1);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn open_zero_drops_row() {
        let trades = vec![trade("ABC", 1, 0.0, 10)];
        let stats = aggregate_trades(&trades);
        assert!(stats.get("ABC").is_none());
    }

    #[test]
    fn tie_timestamp_is_gain_first() {
        let trades = vec![trade("ABC", 100, 5.0, 1)];
        // Single trade: high == low == open == close at same ts.
        let stats = aggregate_trades(&trades);
        let s = stats.get("ABC").unwrap();
        assert!(s.gain_first);
    }

    #[test]
    fn batching_law_merge_equivalent_to_whole() {
        let trades = vec![
            trade("ABC", 1000, 10.0, 100),
            trade("ABC", 2000, 12.0, 200),
            trade("ABC", 3000, 9.0, 300),
            trade("ABC", 4000, 11.0, 100),
        ];
        let whole = aggregate_trades(&trades);
        let (left, right) = trades.split_at(2);
        let merged = aggregate_trades_partitioned(&[left, right]);

        let w = whole.get("ABC").unwrap();
        let m = merged.get("ABC").unwrap();
        assert_eq!(w.trades, m.trades);
        assert_eq!(w.total_size, m.total_size);
        assert!((w.turnover - m.turnover).abs() < 1e-9);
        assert!((w.high - m.high).abs() < 1e-9);
        assert!((w.low - m.low).abs() < 1e-9);
    }

    #[test]
    fn compute_day_data_drops_symbols_outside_tier_map() {
        let trades = vec![trade("ABC", 1000, 10.0, 100), trade("XYZ", 1000, 5.0, 10)];
        let mut tier_map = TierMap::new();
        tier_map.insert("ABC".to_string(), Tier::Active);
        let day = compute_day_data(
            "TODAY",
            &trades,
            &tier_map,
            5000,
            SortMode::RegTurnover,
            &HashMap::new(),
        );
        let all_symbols: Vec<_> = day.tiers.iter().flat_map(|g| g.symbols.iter()).collect();
        assert_eq!(all_symbols.len(), 1);
        assert_eq!(all_symbols[0].symbol, "ABC");
    }

    #[test]
    fn pre_reg_count_matches_filtered_trade_count() {
        let trades = vec![
            trade("ABC", 1000, 10.0, 100),
            trade("ABC", 6000, 11.0, 100),
        ];
        let mut tier_map = TierMap::new();
        tier_map.insert("ABC".to_string(), Tier::Active);
        let day = compute_day_data(
            "TODAY",
            &trades,
            &tier_map,
            5000,
            SortMode::RegTurnover,
            &HashMap::new(),
        );
        assert_eq!(day.pre_count + day.reg_count, trades.len());
    }

    #[test]
    fn resort_preserves_tuple_set() {
        let trades = vec![
            trade("ABC", 1000, 10.0, 100),
            trade("XYZ", 1000, 5.0, 900),
        ];
        let mut tier_map = TierMap::new();
        tier_map.insert("ABC".to_string(), Tier::Active);
        tier_map.insert("XYZ".to_string(), Tier::Active);
        let mut day = compute_day_data(
            "TODAY",
            &trades,
            &tier_map,
            5000,
            SortMode::RegTrades,
            &HashMap::new(),
        );
        let before: std::collections::HashSet<String> = day.tiers[0]
            .symbols
            .iter()
            .map(|c| c.symbol.clone())
            .collect();
        resort_day_data(&mut day, SortMode::RegTurnover);
        let after: std::collections::HashSet<String> = day.tiers[0]
            .symbols
            .iter()
            .map(|c| c.symbol.clone())
            .collect();
        assert_eq!(before, after);
    }
}
