//! Finnhub company-news fetcher.
//!
//! # REST endpoint
//!
//! | Operation    | Method | Path                                                       |
//! |--------------|--------|------------------------------------------------------------|
//! | Company news | GET    | `/company-news?symbol=..&from=YYYY-MM-DD&to=YYYY-MM-DD&token=..` |
//!
//! The free tier allows roughly one call per second, so consecutive requests
//! are spaced by at least `min_request_interval_ms`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use hl_core::config::FinnhubConfig;
use hl_core::time_util::now_secs;
use hl_core::{HlError, Item};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::Fetcher;

/// Publisher name used when the API omits `source`.
const DEFAULT_SOURCE: &str = "FinnHub";

/// One element of the company-news response array.
#[derive(Debug, Deserialize)]
struct NewsEntry {
    #[serde(default)]
    headline: String,
    /// Publication time, seconds since epoch.
    datetime: Option<i64>,
    source: Option<String>,
}

/// Finnhub REST client implementing [`Fetcher`].
pub struct FinnhubFetcher {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    lookback_days: u64,
    max_items: usize,
    min_interval: Duration,
    /// Time of the last request, for client-side rate limiting.
    last_request: Mutex<Option<Instant>>,
}

impl FinnhubFetcher {
    /// Build a fetcher. `api_key` must be non-empty.
    pub fn new(api_key: String, config: &FinnhubConfig) -> Result<Self, HlError> {
        if api_key.trim().is_empty() {
            return Err(HlError::Config("Finnhub API key is empty".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| HlError::Config(format!("http client: {e}")))?;

        Ok(Self {
            http,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            lookback_days: config.lookback_days,
            max_items: config.max_items_per_symbol,
            min_interval: Duration::from_millis(config.min_request_interval_ms),
            last_request: Mutex::new(None),
        })
    }

    /// Sleep until `min_interval` has passed since the previous request.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl Fetcher for FinnhubFetcher {
    fn name(&self) -> &str {
        "finnhub"
    }

    async fn fetch(&self, symbol: &str) -> Result<Vec<Item>, HlError> {
        let fail = |reason: String| HlError::FetchFailure { symbol: symbol.to_string(), reason };
        let (from, to) = date_range(Utc::now().date_naive(), self.lookback_days);

        self.throttle().await;
        let url = format!("{}/company-news", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("from", from.as_str()),
                ("to", to.as_str()),
                ("token", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| fail(format!("request: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(fail("rate limited (HTTP 429)".into()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(fail(format!("HTTP {status}: {body}")));
        }

        let body = resp.text().await.map_err(|e| fail(format!("read body: {e}")))?;
        let items = parse_news(symbol, &body, self.max_items, now_secs()).map_err(fail)?;
        debug!("[finnhub] {symbol}: {} headline(s)", items.len());
        Ok(items)
    }
}

/// `(from, to)` as `YYYY-MM-DD`, `from` being `lookback_days` before `today`.
fn date_range(today: NaiveDate, lookback_days: u64) -> (String, String) {
    let from = today.checked_sub_days(Days::new(lookback_days)).unwrap_or(today);
    (from.format("%Y-%m-%d").to_string(), today.format("%Y-%m-%d").to_string())
}

/// Map a company-news JSON array onto items, keeping at most `max_items`.
///
/// Missing timestamps default to `now`; missing sources to `"FinnHub"`.
fn parse_news(symbol: &str, body: &str, max_items: usize, now: i64) -> Result<Vec<Item>, String> {
    let entries: Vec<NewsEntry> = serde_json::from_str(body).map_err(|e| format!("decode: {e}"))?;
    Ok(entries
        .into_iter()
        .take(max_items)
        .map(|e| {
            Item::new(symbol, e.headline, e.datetime.unwrap_or(now))
                .with_source(e.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_company_news_payload() {
        let body = r#"[
            {"category":"company","datetime":1700000000,"headline":"Apple beats estimates","id":1,
             "related":"AAPL","source":"Reuters","summary":"...","url":"https://example.com/1"},
            {"headline":"Apple unveils chip","id":2},
            {"headline":"Third","datetime":1700000100,"source":"CNBC"}
        ]"#;
        let items = parse_news("AAPL", body, 2, 42).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].text, "Apple beats estimates");
        assert_eq!(items[0].source_timestamp, 1_700_000_000);
        assert_eq!(items[0].source, "Reuters");
        assert_eq!(items[0].symbol, "AAPL");
        assert_eq!(items[1].source_timestamp, 42);
        assert_eq!(items[1].source, "FinnHub");
    }

    #[test]
    fn error_object_is_a_decode_failure() {
        assert!(parse_news("AAPL", r#"{"error":"Invalid API key"}"#, 10, 0).is_err());
    }

    #[test]
    fn date_range_spans_lookback() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(date_range(today, 1), ("2024-02-29".to_string(), "2024-03-01".to_string()));
        assert_eq!(date_range(today, 0), ("2024-03-01".to_string(), "2024-03-01".to_string()));
    }

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(matches!(FinnhubFetcher::new("  ".into(), &FinnhubConfig::default()), Err(HlError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_spaces_requests() {
        let cfg = FinnhubConfig { min_request_interval_ms: 1_000, ..FinnhubConfig::default() };
        let f = FinnhubFetcher::new("key".into(), &cfg).unwrap();
        let t0 = Instant::now();
        f.throttle().await;
        f.throttle().await;
        f.throttle().await;
        assert!(t0.elapsed() >= Duration::from_secs(2));
    }
}
