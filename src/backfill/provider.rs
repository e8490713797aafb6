// =============================================================================
// Upstream market-data provider
// =============================================================================
//
// The vendor API the backfill daemon fetches from is explicitly out of scope
// for this crate. `MarketDataProvider` is the seam: a thin trait object the
// daemon depends on, with a test double standing in for the real vendor
// client.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::warn;

use crate::types::{DailyBar, TradeRecord};

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Daily bars for `symbol` over `[start, end]`. An empty result means
    /// the symbol has no data in the window (used by discovery to populate
    /// `.tried-empty`).
    async fn fetch_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>>;

    /// Trades for `symbol` on a single `date`.
    async fn fetch_trades(&self, symbol: &str, date: &str) -> Result<Vec<TradeRecord>>;
}

/// Deterministic in-memory provider for tests and local development without
/// vendor credentials.
#[derive(Default)]
pub struct MockProvider {
    pub bars: std::collections::HashMap<String, Vec<DailyBar>>,
    pub trades: std::collections::HashMap<(String, String), Vec<TradeRecord>>,
}

#[async_trait]
impl MarketDataProvider for MockProvider {
    async fn fetch_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>> {
        Ok(self
            .bars
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| {
                        NaiveDate::parse_from_str(&b.date, "%Y-%m-%d")
                            .map(|d| d >= start && d <= end)
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_trades(&self, symbol: &str, date: &str) -> Result<Vec<TradeRecord>> {
        Ok(self.trades.get(&(symbol.to_string(), date.to_string())).cloned().unwrap_or_default())
    }
}

/// Real vendor-backed provider, keyed off the same `APCA-API-KEY-ID` /
/// `APCA-API-SECRET-KEY` header pair the news side uses. Bar/trade page
/// shapes are the vendor's documented ones; anything about the vendor's
/// auth handshake beyond those two headers is out of scope here, same as
/// `MarketDataNewsSource`.
pub struct VendorMarketDataProvider {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    secret_key: String,
}

impl VendorMarketDataProvider {
    pub fn new(base_url: impl Into<String>, key_id: String, secret_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            key_id,
            secret_key,
        }
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("APCA-API-KEY-ID", &self.key_id)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
    }
}

#[derive(serde::Deserialize)]
struct VendorBar {
    #[serde(rename = "t")]
    time: String,
    #[serde(rename = "o")]
    open: f64,
    #[serde(rename = "h")]
    high: f64,
    #[serde(rename = "l")]
    low: f64,
    #[serde(rename = "c")]
    close: f64,
    #[serde(rename = "v")]
    volume: f64,
    #[serde(rename = "n")]
    trade_count: u64,
    #[serde(rename = "vw")]
    vwap: f64,
}

#[derive(serde::Deserialize)]
struct VendorBarsPage {
    bars: Vec<VendorBar>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(serde::Deserialize)]
struct VendorTrade {
    #[serde(rename = "t")]
    time: String,
    #[serde(rename = "x")]
    exchange: String,
    #[serde(rename = "p")]
    price: f64,
    #[serde(rename = "s")]
    size: i64,
    #[serde(rename = "c", default)]
    conditions: Vec<String>,
    #[serde(rename = "i", default)]
    id: u64,
}

#[derive(serde::Deserialize)]
struct VendorTradesPage {
    trades: Vec<VendorTrade>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[async_trait]
impl MarketDataProvider for VendorMarketDataProvider {
    async fn fetch_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>> {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self.client.get(format!("{}/v2/stocks/{symbol}/bars", self.base_url)).query(&[
                ("timeframe", "1Day"),
                ("start", &start.format("%Y-%m-%d").to_string()),
                ("end", &end.format("%Y-%m-%d").to_string()),
                ("limit", "10000"),
            ]);
            if let Some(token) = &page_token {
                req = req.query(&[("page_token", token)]);
            }
            let resp = self.authed(req).send().await.context("vendor bars request")?;
            if !resp.status().is_success() {
                warn!(symbol, status = %resp.status(), "vendor bars fetch failed");
                return Ok(out);
            }
            let page: VendorBarsPage = resp.json().await.context("vendor bars decode")?;
            out.extend(page.bars.into_iter().map(|b| DailyBar {
                symbol: symbol.to_string(),
                date: b.time.get(..10).unwrap_or(&b.time).to_string(),
                open: b.open,
                high: b.high,
                low: b.low,
                close: b.close,
                volume: b.volume as i64,
                trade_count: b.trade_count,
                vwap: b.vwap,
            }));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(out)
    }

    async fn fetch_trades(&self, symbol: &str, date: &str) -> Result<Vec<TradeRecord>> {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .get(format!("{}/v2/stocks/{symbol}/trades", self.base_url))
                .query(&[("start", date), ("end", date), ("limit", "10000")]);
            if let Some(token) = &page_token {
                req = req.query(&[("page_token", token)]);
            }
            let resp = self.authed(req).send().await.context("vendor trades request")?;
            if !resp.status().is_success() {
                warn!(symbol, date, status = %resp.status(), "vendor trades fetch failed");
                return Ok(out);
            }
            let page: VendorTradesPage = resp.json().await.context("vendor trades decode")?;
            out.extend(page.trades.into_iter().filter_map(|t| {
                let ts = chrono::DateTime::parse_from_rfc3339(&t.time).ok()?.timestamp_millis();
                Some(TradeRecord {
                    symbol: symbol.to_string(),
                    timestamp: ts,
                    price: t.price,
                    size: t.size,
                    exchange: t.exchange,
                    conditions: t.conditions.join(","),
                    id: t.id.to_string(),
                    update: false,
                })
            }));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(out)
    }
}
