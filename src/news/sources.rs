// =============================================================================
// News fetchers — four independent sources behind one trait
// =============================================================================
//
// Each source is a pure-ish async function of `(symbol, start_ms, end_ms)`.
// The market-data and RSS sources are single-shot; the social-media source
// is cursor-paginated and shares a process-wide rate limiter across every
// symbol and every worker, with one `reqwest::Client` built once and cloned
// everywhere.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, warn};

use crate::news::{NewsArticle, NewsSourceTag};
use crate::ratelimit::TokenBucket;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_PAGES: u32 = 10;
const MARKET_DATA_MAX_ARTICLES: usize = 50;

#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Fetch every article for `symbol` published in `[start_ms, end_ms]`
    /// (real-UTC milliseconds). Single-page/single-shot semantics; the
    /// social-media source's deeper pagination is a separate method.
    async fn fetch(&self, symbol: &str, start_ms: i64, end_ms: i64) -> Result<Vec<NewsArticle>>;
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .expect("failed to build reqwest client")
}

// -----------------------------------------------------------------------------
// Market-data API
// -----------------------------------------------------------------------------

/// Vendor market-data-API news RPC. Degrades to an empty result (not an
/// error) when vendor credentials are absent.
pub struct MarketDataNewsSource {
    client: reqwest::Client,
    base_url: String,
    key_id: Option<String>,
    secret_key: Option<String>,
}

impl MarketDataNewsSource {
    pub fn new(base_url: impl Into<String>, key_id: Option<String>, secret_key: Option<String>) -> Self {
        Self { client: http_client(), base_url: base_url.into(), key_id, secret_key }
    }
}

#[derive(serde::Deserialize)]
struct VendorNewsResponse {
    #[serde(default)]
    news: Vec<VendorNewsItem>,
}

#[derive(serde::Deserialize)]
struct VendorNewsItem {
    #[serde(rename = "created_at")]
    created_at: String,
    headline: String,
    #[serde(default)]
    content: String,
}

#[async_trait]
impl NewsSource for MarketDataNewsSource {
    async fn fetch(&self, symbol: &str, start_ms: i64, end_ms: i64) -> Result<Vec<NewsArticle>> {
        let (Some(key_id), Some(secret_key)) = (self.key_id.as_ref(), self.secret_key.as_ref()) else {
            debug!("vendor news source disabled (no credentials)");
            return Ok(Vec::new());
        };

        let start = chrono::DateTime::from_timestamp_millis(start_ms).unwrap_or_default().to_rfc3339();
        let end = chrono::DateTime::from_timestamp_millis(end_ms).unwrap_or_default().to_rfc3339();
        let url = format!("{}/v1beta1/news?symbols={symbol}&start={start}&end={end}&limit=50", self.base_url);

        let resp = self
            .client
            .get(&url)
            .header("APCA-API-KEY-ID", key_id)
            .header("APCA-API-SECRET-KEY", secret_key)
            .send()
            .await
            .with_context(|| format!("vendor news fetch failed for {symbol}"))?;

        if !resp.status().is_success() {
            warn!(symbol, status = %resp.status(), "vendor news fetch returned non-success status");
            return Ok(Vec::new());
        }

        let parsed: VendorNewsResponse = resp.json().await.context("decoding vendor news response")?;
        let articles = parsed
            .news
            .into_iter()
            .take(MARKET_DATA_MAX_ARTICLES)
            .filter_map(|item| {
                let time = chrono::DateTime::parse_from_rfc3339(&item.created_at).ok()?.timestamp_millis();
                Some(NewsArticle {
                    time,
                    source: NewsSourceTag::MarketData,
                    headline: item.headline,
                    content: strip_html(&item.content),
                })
            })
            .filter(|a| a.time >= start_ms && a.time <= end_ms)
            .collect();
        Ok(articles)
    }
}

// -----------------------------------------------------------------------------
// Generic RSS (shared by the news aggregator and press-release wire)
// -----------------------------------------------------------------------------

pub enum PubDateFormat {
    Rfc1123,
    Rfc1123Z,
}

/// One RSS 2.0 feed, parameterized by URL template and `pubDate` format.
/// The generic news aggregator and the press-release wire are both
/// instances of this with different configuration — same pattern,
/// different URL and `pubDate` format.
pub struct RssSource {
    client: reqwest::Client,
    url_template: String,
    tag: NewsSourceTag,
    date_format: PubDateFormat,
}

impl RssSource {
    pub fn generic_news_aggregator(url_template: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            url_template: url_template.into(),
            tag: NewsSourceTag::RssGeneric,
            date_format: PubDateFormat::Rfc1123,
        }
    }

    pub fn press_release_wire(url_template: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            url_template: url_template.into(),
            tag: NewsSourceTag::RssPressRelease,
            date_format: PubDateFormat::Rfc1123Z,
        }
    }
}

#[async_trait]
impl NewsSource for RssSource {
    async fn fetch(&self, symbol: &str, start_ms: i64, end_ms: i64) -> Result<Vec<NewsArticle>> {
        let query = format!("{symbol} stock");
        let url = self.url_template.replace("{query}", &urlencoding_replace_spaces(&query));

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("RSS fetch failed for {symbol}"))?;

        if !resp.status().is_success() {
            warn!(symbol, url, status = %resp.status(), "RSS fetch returned non-success status");
            return Ok(Vec::new());
        }

        let body = resp.text().await.context("reading RSS response body")?;
        let items = parse_rss_items(&body).unwrap_or_else(|e| {
            warn!(symbol, error = %e, "failed to parse RSS feed");
            Vec::new()
        });

        let articles = items
            .into_iter()
            .filter_map(|item| {
                let time = parse_pub_date(&item.pub_date, &self.date_format)?;
                Some(NewsArticle {
                    time,
                    source: self.tag,
                    headline: strip_publisher_suffix(&item.title),
                    content: strip_html(&item.description),
                })
            })
            .filter(|a| a.time >= start_ms && a.time <= end_ms)
            .collect();
        Ok(articles)
    }
}

struct RssItem {
    title: String,
    description: String,
    pub_date: String,
}

fn parse_rss_items(body: &str) -> Result<Vec<RssItem>> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text = true;

    let mut items = Vec::new();
    let mut buf = Vec::new();

    let mut in_item = false;
    let mut current_tag: Option<String> = None;
    let mut title = String::new();
    let mut description = String::new();
    let mut pub_date = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "item" {
                    in_item = true;
                    title.clear();
                    description.clear();
                    pub_date.clear();
                }
                current_tag = Some(name);
            }
            Ok(Event::Text(e)) if in_item => {
                let text = e.unescape().unwrap_or_default().to_string();
                match current_tag.as_deref() {
                    Some("title") => title.push_str(&text),
                    Some("description") => description.push_str(&text),
                    Some("pubDate") => pub_date.push_str(&text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "item" {
                    in_item = false;
                    items.push(RssItem { title: title.clone(), description: description.clone(), pub_date: pub_date.clone() });
                }
                current_tag = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("XML parse error: {e}")),
            _ => {}
        }
        buf.clear();
    }

    Ok(items)
}

fn parse_pub_date(raw: &str, format: &PubDateFormat) -> Option<i64> {
    match format {
        PubDateFormat::Rfc1123 | PubDateFormat::Rfc1123Z => {
            chrono::DateTime::parse_from_rfc2822(raw.trim()).ok().map(|dt| dt.timestamp_millis())
        }
    }
}

fn strip_publisher_suffix(headline: &str) -> String {
    match headline.rfind(" - ") {
        Some(idx) => headline[..idx].to_string(),
        None => headline.to_string(),
    }
}

fn strip_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

fn urlencoding_replace_spaces(input: &str) -> String {
    input.replace(' ', "+")
}

// -----------------------------------------------------------------------------
// Social-media JSON API (cursor-paginated, rate-limited)
// -----------------------------------------------------------------------------

#[derive(serde::Deserialize)]
struct SocialPage {
    #[serde(default)]
    messages: Vec<SocialMessage>,
}

#[derive(serde::Deserialize)]
struct SocialMessage {
    id: i64,
    #[serde(rename = "created_at")]
    created_at_ms: i64,
    body: String,
}

pub struct SocialMediaSource {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<TokenBucket>,
}

impl SocialMediaSource {
    pub fn new(base_url: impl Into<String>, rate_limiter: Arc<TokenBucket>) -> Self {
        Self { client: http_client(), base_url: base_url.into(), rate_limiter }
    }

    async fn fetch_page(&self, symbol: &str, max_id: Option<i64>) -> Result<Vec<SocialMessage>> {
        self.rate_limiter.acquire().await;

        let mut url = format!("{}/symbols/{symbol}/messages", self.base_url);
        if let Some(max_id) = max_id {
            url.push_str(&format!("?max={max_id}"));
        }

        let resp = self.client.get(&url).send().await.with_context(|| format!("social fetch failed for {symbol}"))?;
        if !resp.status().is_success() {
            warn!(symbol, status = %resp.status(), "social-media fetch returned non-success status");
            return Ok(Vec::new());
        }
        let page: SocialPage = resp.json().await.context("decoding social-media response")?;
        Ok(page.messages)
    }

    /// Deep pagination for the historical-backfill path: keep paging back
    /// until a page contains a message older than `start_ms`, or
    /// `max_pages` is exhausted.
    pub async fn fetch_paginated(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
        max_pages: u32,
    ) -> Result<Vec<NewsArticle>> {
        let mut articles = Vec::new();
        let mut cursor: Option<i64> = None;

        for _ in 0..max_pages.max(1) {
            let page = self.fetch_page(symbol, cursor).await?;
            if page.is_empty() {
                break;
            }

            let mut hit_start = false;
            let mut oldest_id = i64::MAX;
            for msg in &page {
                oldest_id = oldest_id.min(msg.id);
                if msg.created_at_ms < start_ms {
                    hit_start = true;
                    continue;
                }
                if msg.created_at_ms > end_ms {
                    continue;
                }
                articles.push(NewsArticle {
                    time: msg.created_at_ms,
                    source: NewsSourceTag::SocialMedia,
                    headline: first_line(&msg.body),
                    content: strip_html(&msg.body),
                });
            }

            if hit_start || oldest_id == i64::MAX {
                break;
            }
            if cursor == Some(oldest_id) {
                break;
            }
            cursor = Some(oldest_id);
        }

        Ok(articles)
    }
}

#[async_trait]
impl NewsSource for SocialMediaSource {
    /// Single-page fetch, used by the on-demand and live-refresh paths.
    async fn fetch(&self, symbol: &str, start_ms: i64, end_ms: i64) -> Result<Vec<NewsArticle>> {
        self.fetch_paginated(symbol, start_ms, end_ms, 1).await
    }
}

fn first_line(body: &str) -> String {
    body.lines().next().unwrap_or(body).to_string()
}

pub const DEFAULT_SOCIAL_MAX_PAGES: u32 = DEFAULT_MAX_PAGES;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_html_removes_tags() {
        assert_eq!(strip_html("<p>Hello <b>world</b></p>"), "Hello world");
    }

    #[test]
    fn strip_publisher_suffix_trims_trailing_dash_source() {
        assert_eq!(strip_publisher_suffix("Acme beats earnings - Reuters"), "Acme beats earnings");
        assert_eq!(strip_publisher_suffix("No dash here"), "No dash here");
    }

    #[test]
    fn parse_rss_items_extracts_item_fields() {
        let xml = r#"<rss><channel>
            <item>
                <title>Acme surges - Wire</title>
                <description><![CDATA[<p>up big</p>]]></description>
                <pubDate>Mon, 04 Mar 2024 14:00:00 GMT</pubDate>
            </item>
        </channel></rss>"#;
        let items = parse_rss_items(xml).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Acme surges - Wire");
        assert!(items[0].pub_date.contains("2024"));
    }

    #[test]
    fn parse_pub_date_reads_rfc1123() {
        let ts = parse_pub_date("Mon, 04 Mar 2024 14:00:00 GMT", &PubDateFormat::Rfc1123);
        assert!(ts.is_some());
    }
}
