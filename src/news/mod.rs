// =============================================================================
// News aggregation engine
// =============================================================================
//
// Four independent, per-symbol fetchers (`sources`), a process-wide cache
// keyed by `"SYMBOL:DATE"` with on-disk JSON persistence (`cache`), and the
// two orchestration loops that drive them: a 5-minute live refresh and a
// 30-minute historical backfill (`refresh`). Dashboard handlers read the
// cache directly; they never call a fetcher themselves except for the
// on-demand cache-miss path.
// =============================================================================

pub mod cache;
pub mod refresh;
pub mod sources;

use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::timeutil::{close_4pm_et_ms, open_930_et_ms, post_market_end_et_ms, real_utc_ms_to_et_time, REGULAR_CLOSE, REGULAR_OPEN};
use crate::types::NewsCounts;

/// The closed set of source tags an article can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewsSourceTag {
    MarketData,
    RssGeneric,
    RssPressRelease,
    SocialMedia,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    /// Real-UTC milliseconds (not ET-shifted — this is wall-clock time as
    /// reported by the external source).
    pub time: i64,
    pub source: NewsSourceTag,
    pub headline: String,
    pub content: String,
}

/// Sort articles by `time` ascending, the order the cache and on-disk files
/// store them in.
pub fn sort_articles(articles: &mut [NewsArticle]) {
    articles.sort_by_key(|a| a.time);
}

/// Merge `old` and `new` article lists keyed by `(time, source)`, keeping
/// every article present in either set — protects against a transient
/// fetcher failure silently dropping previously-cached articles. Sorted by
/// time on return.
pub fn merge_articles(old: &[NewsArticle], new: &[NewsArticle]) -> Vec<NewsArticle> {
    use std::collections::HashSet;

    let mut seen: HashSet<(i64, NewsSourceTag)> = HashSet::new();
    let mut merged = Vec::with_capacity(old.len() + new.len());

    for article in new.iter().chain(old.iter()) {
        let key = (article.time, article.source);
        if seen.insert(key) {
            merged.push(article.clone());
        }
    }

    sort_articles(&mut merged);
    merged
}

/// Bucket `articles` into `NewsCounts` for `date`: social-media messages are
/// bucketed by ET wall-clock minute (`< 09:30` → `stPre`, `[09:30, 16:00)` →
/// `stReg`, `>= 16:00` → `stPost`); every other source accumulates into
/// `news`. `date` is unused for the time math (it's derived purely from the
/// article's own timestamp) but documents which calendar day the caller
/// intends these counts to represent.
pub fn bucket_news_counts(articles: &[NewsArticle], _date: NaiveDate) -> NewsCounts {
    let mut counts = NewsCounts::default();
    for article in articles {
        if article.source != NewsSourceTag::SocialMedia {
            counts.news += 1;
            continue;
        }
        let time_of_day = real_utc_ms_to_et_time(article.time);
        if time_of_day < REGULAR_OPEN {
            counts.st_pre += 1;
        } else if time_of_day < REGULAR_CLOSE {
            counts.st_reg += 1;
        } else {
            counts.st_post += 1;
        }
    }
    counts
}

/// `open930ET(date) + 86_400_000`, the start of the "next day" window used
/// both by the dashboard's next-session supplement and by the news refresh
/// loop's "next-session symbol set".
pub fn next_session_open_930_et_ms(date: NaiveDate) -> i64 {
    open_930_et_ms(date) + 86_400_000
}

/// The historical-backfill fetch window for `date`: `prevDate 4PM ET` to
/// `date 8PM ET`.
pub fn prev_4pm_to_8pm_window(date: &str) -> Result<(i64, i64)> {
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d").with_context(|| format!("invalid date {date}"))?;
    let prev = parsed.checked_sub_days(Days::new(1)).with_context(|| format!("date underflow for {date}"))?;
    Ok((close_4pm_et_ms(prev), post_market_end_et_ms(parsed)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn article(time: i64, source: NewsSourceTag) -> NewsArticle {
        NewsArticle { time, source, headline: "h".into(), content: "c".into() }
    }

    #[test]
    fn merge_keeps_old_entries_missing_from_new() {
        let old = vec![article(1, NewsSourceTag::RssGeneric), article(2, NewsSourceTag::MarketData)];
        let new = vec![article(2, NewsSourceTag::MarketData), article(3, NewsSourceTag::SocialMedia)];
        let merged = merge_articles(&old, &new);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].time, 1);
        assert_eq!(merged[2].time, 3);
    }

    #[test]
    fn merge_dedupes_identical_time_and_source() {
        let old = vec![article(5, NewsSourceTag::RssGeneric)];
        let new = vec![article(5, NewsSourceTag::RssGeneric)];
        assert_eq!(merge_articles(&old, &new).len(), 1);
    }

    #[test]
    fn bucket_counts_split_social_by_session() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let pre = chrono_tz::America::New_York
            .with_ymd_and_hms(2024, 3, 4, 8, 0, 0)
            .unwrap()
            .timestamp_millis();
        let reg = chrono_tz::America::New_York
            .with_ymd_and_hms(2024, 3, 4, 10, 0, 0)
            .unwrap()
            .timestamp_millis();
        let post = chrono_tz::America::New_York
            .with_ymd_and_hms(2024, 3, 4, 17, 0, 0)
            .unwrap()
            .timestamp_millis();

        let articles = vec![
            article(pre, NewsSourceTag::SocialMedia),
            article(reg, NewsSourceTag::SocialMedia),
            article(post, NewsSourceTag::SocialMedia),
            article(reg, NewsSourceTag::MarketData),
        ];
        let counts = bucket_news_counts(&articles, date);
        assert_eq!(counts.st_pre, 1);
        assert_eq!(counts.st_reg, 1);
        assert_eq!(counts.st_post, 1);
        assert_eq!(counts.news, 1);
    }
}
