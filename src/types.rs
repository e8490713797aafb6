// =============================================================================
// Core data model — ticks, per-session statistics, tiers, day snapshots
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// TradeRecord
// =============================================================================

/// A single tick, immutable once produced. `timestamp` is ET-shifted
/// milliseconds (see `crate::timeutil`): the ET wall-clock reading encoded as
/// if it were UTC, so session boundaries are constant integers across DST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub timestamp: i64,
    pub price: f64,
    pub size: i64,
    pub exchange: String,
    pub conditions: String,
    pub id: String,
    #[serde(default)]
    pub update: bool,
}

// =============================================================================
// SymbolStats
// =============================================================================

/// Aggregate for one symbol over one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolStats {
    pub symbol: String,
    pub trades: u64,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub total_size: i64,
    pub turnover: f64,
    pub max_gain: f64,
    pub max_loss: f64,
    pub gain_first: bool,

    // Carried through the JSON surface but not computed by `ComputeDayData`
    // in this implementation — see DESIGN.md ("Open Questions").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_gain: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_drawdown: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_profile: Option<Vec<u32>>,
}

impl SymbolStats {
    /// `Trades >= 0`; when `Trades > 0`, `Low <= Open,Close <= High` and
    /// `MaxGain, MaxLoss >= 0`.
    pub fn is_valid(&self) -> bool {
        if self.trades == 0 {
            return true;
        }
        self.open > 0.0
            && self.close > 0.0
            && self.high > 0.0
            && self.low > 0.0
            && self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
            && self.max_gain >= 0.0
            && self.max_loss >= 0.0
    }
}

// =============================================================================
// Tier
// =============================================================================

/// Activity tier assigned by trailing 60-day median-turnover percentile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    Active,
    Moderate,
    Sporadic,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Active => "ACTIVE",
            Tier::Moderate => "MODERATE",
            Tier::Sporadic => "SPORADIC",
        }
    }

    pub fn all() -> [Tier; 3] {
        [Tier::Active, Tier::Moderate, Tier::Sporadic]
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Tier::Active),
            "MODERATE" => Ok(Tier::Moderate),
            "SPORADIC" => Ok(Tier::Sporadic),
            other => anyhow::bail!("unknown tier: {other}"),
        }
    }
}

/// Per-date mapping from symbol to tier. Symbols outside the map are dropped
/// from `DayData`.
pub type TierMap = HashMap<String, Tier>;

// =============================================================================
// News counts
// =============================================================================

/// News counts bucketed by ET session, plus the non-social-media count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NewsCounts {
    #[serde(rename = "stPre")]
    pub st_pre: u32,
    #[serde(rename = "stReg")]
    pub st_reg: u32,
    #[serde(rename = "stPost")]
    pub st_post: u32,
    pub news: u32,
}

// =============================================================================
// CombinedStats / TierGroup / DayData
// =============================================================================

/// A symbol, its tier, optional pre/regular `SymbolStats`, and news counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedStats {
    pub symbol: String,
    pub tier: Tier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre: Option<SymbolStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reg: Option<SymbolStats>,
    #[serde(default)]
    pub news_counts: NewsCounts,
}

/// Named tier group with its ordered, sorted members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierGroup {
    pub tier: Tier,
    pub count: usize,
    pub symbols: Vec<CombinedStats>,
}

/// A full day snapshot: label, session trade counts, and ordered tier groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayData {
    pub label: String,
    pub pre_count: usize,
    pub reg_count: usize,
    pub tiers: Vec<TierGroup>,
}

// =============================================================================
// Sort modes
// =============================================================================

/// The seven sort modes `ComputeDayData`/`ResortDayData` accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortMode {
    PreTrades,
    PreTurnover,
    PreGain,
    RegTrades,
    RegTurnover,
    RegGain,
    News,
}

impl SortMode {
    /// Numeric encoding used by the `?sort=N` query parameter.
    pub fn from_query(n: u8) -> Self {
        match n {
            0 => SortMode::PreTrades,
            1 => SortMode::PreTurnover,
            2 => SortMode::PreGain,
            3 => SortMode::RegTrades,
            4 => SortMode::RegTurnover,
            5 => SortMode::RegGain,
            _ => SortMode::News,
        }
    }
}

impl Default for SortMode {
    fn default() -> Self {
        SortMode::RegTurnover
    }
}

// =============================================================================
// DailyBar
// =============================================================================

/// One symbol's OHLCV summary for a single trading date, as persisted by the
/// backfill daemon and consumed by tier computation and gap-fill fallbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub symbol: String,
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub vwap: f64,
    pub trade_count: u64,
}

impl DailyBar {
    /// `VWAP x Volume`, the turnover figure tier computation trails over.
    pub fn turnover(&self) -> f64 {
        self.vwap * self.volume as f64
    }
}

// =============================================================================
// Reference type / trade-universe row
// =============================================================================

/// Reference classification for a universe symbol, as carried in the
/// trade-universe CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceType {
    Stock,
    Etf,
    Other,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Stock => "STOCK",
            ReferenceType::Etf => "ETF",
            ReferenceType::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of `us/trade-universe/<date>.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeUniverseRow {
    pub symbol: String,
    #[serde(rename = "type")]
    pub reference_type: ReferenceType,
    pub spx: bool,
    pub ndx: bool,
    /// Empty for ETFs and index members, otherwise the looked-up tier.
    pub tier: String,
}

// =============================================================================
// RollingBar
// =============================================================================

/// One 5-second VWAP bin decorated with its trailing/forward derived
/// statistics, as produced by the rolling 5-minute bar stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingBar {
    pub symbol: String,
    pub bin_start: i64,
    pub vwap: f64,
    pub trades: u64,
    pub turnover: f64,
    pub gain_pct_5m: f64,
    pub trades_5m: u64,
    pub turnover_5m: f64,
    pub gain_pct_future: f64,
}

// =============================================================================
// DailySummaryRow
// =============================================================================

/// One row of the daily summary artifact: index + ex-index trades collapsed
/// to a single per-symbol record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummaryRow {
    pub symbol: String,
    pub trades: u64,
    pub turnover: f64,
    pub vwap: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}
