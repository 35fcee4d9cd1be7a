//! Composite-Index Adapter: Upbit composite indices bundled with the
//! USD/KRW FX reading, behind a three-stage fallback chain — each stage
//! a `try() -> Result`, the first one passing validation wins.

use std::sync::Arc;
use std::time::Duration;

use headless_chrome::{Browser, LaunchOptions};
use parking_lot::Mutex;
use regex::Regex;
use rust_decimal::Decimal;
use scraper::{Html, Selector};
use std::str::FromStr;
use tracing::{debug, error};

use super::rate_limit::RateGate;
use super::CompositeSnapshot;
use crate::error::{SourceError, SourceResult};
use crate::models::ScalarReading;

const RATE_FLOOR: Duration = Duration::from_secs(5);
const ANCHORS: [(&str, &str); 4] = [("ubci", "UBCI"), ("ubmi", "UBMI"), ("ub10", "UB10"), ("ub30", "UB30")];
const FX_ANCHOR: &str = "USD/KRW";

pub struct CompositeIndexAdapter {
    primary_url: String,
    alt_url: String,
    http: reqwest::Client,
    rate_gate: RateGate,
    /// Cached across calls to amortize browser startup; fenced behind a
    /// mutex so concurrent composite calls cannot race it.
    browser: Mutex<Option<Arc<Browser>>>,
}

impl CompositeIndexAdapter {
    pub fn new(primary_url: impl Into<String>, alt_url: impl Into<String>) -> Self {
        Self {
            primary_url: primary_url.into(),
            alt_url: alt_url.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client builds with static config"),
            rate_gate: RateGate::new(RATE_FLOOR),
            browser: Mutex::new(None),
        }
    }

    pub async fn fetch(&self) -> SourceResult<CompositeSnapshot> {
        self.rate_gate.check_and_record()?;

        let stage1 = self.try_structured_selector_scrape().await;
        if let Ok(snapshot) = &stage1 {
            if snapshot.is_valid() {
                return stage1;
            }
        }
        debug!("composite stage 1 (structured selector) yielded no valid index, falling back");

        let stage2 = self.try_text_line_heuristic().await;
        if let Ok(snapshot) = &stage2 {
            if snapshot.is_valid() {
                return stage2;
            }
        }
        debug!("composite stage 2 (text-line heuristic) yielded no valid index, falling back");

        let stage3 = self.try_aggregate_regex_sweep().await;
        if let Ok(snapshot) = &stage3 {
            if snapshot.is_valid() {
                return stage3;
            }
        }

        error!("all three composite-index fallback stages failed; returning empty snapshot");
        Ok(CompositeSnapshot::default())
    }

    /// Stage 1: launch (or reuse) a headless browser, evaluate a script
    /// that walks visible text lines and extracts the value/change pair
    /// that follows each anchor string. FX comes from a dedicated anchor
    /// whose next three lines are `value / change / change_rate`.
    async fn try_structured_selector_scrape(&self) -> SourceResult<CompositeSnapshot> {
        let url = self.primary_url.clone();
        let browser = self.browser_handle()?;

        let raw = tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
            let tab = browser.new_tab()?;
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            let script = r#"
                (() => {
                  const lines = document.body.innerText.split('\n').map(l => l.trim()).filter(Boolean);
                  return JSON.stringify(lines);
                })()
            "#;
            let result = tab.evaluate(script, false)?;
            let value = result.value.ok_or_else(|| anyhow::anyhow!("no value returned from page evaluation"))?;
            Ok(value.as_str().unwrap_or_default().to_string())
        })
        .await
        .map_err(|e| SourceError::Unavailable(format!("browser task panicked: {e}")))?
        .map_err(|e| SourceError::Unavailable(format!("headless browser scrape failed: {e}")))?;

        let lines: Vec<String> = serde_json::from_str(&raw).map_err(|e| SourceError::ParseFailed(e.to_string()))?;
        Ok(extract_from_lines(&lines))
    }

    /// Gets a cached `Browser` handle, launching one if this is the first
    /// call. `Browser` itself is `Send + Sync`; the mutex only protects
    /// the "launch if absent" race, not per-call use.
    fn browser_handle(&self) -> SourceResult<Arc<Browser>> {
        let mut guard = self.browser.lock();
        if let Some(browser) = guard.as_ref() {
            return Ok(browser.clone());
        }
        let browser = Browser::new(LaunchOptions::default_builder().build().expect("launch options build"))
            .map_err(|e| SourceError::Unavailable(format!("failed to launch headless browser: {e}")))?;
        let browser = Arc::new(browser);
        *guard = Some(browser.clone());
        Ok(browser)
    }

    /// Stage 2: retry against the alternate URL, parse the returned HTML
    /// with a DOM parser to recover its visible text lines (plain
    /// `.lines()` on raw markup would split mid-tag), and regex-scan each
    /// anchor followed by numbers within a small look-ahead window.
    async fn try_text_line_heuristic(&self) -> SourceResult<CompositeSnapshot> {
        let body = self.fetch_text(&self.alt_url).await?;
        let lines = visible_text_lines(&body);
        Ok(extract_from_lines(&lines))
    }

    /// Stage 3: last resort. Extract every numeric token of the form
    /// `\d+,\d+\.\d\d`, sort descending, assign the top four in order.
    /// FX is not extractable at this stage.
    async fn try_aggregate_regex_sweep(&self) -> SourceResult<CompositeSnapshot> {
        let body = self.fetch_text(&self.primary_url).await?;
        let token_re = Regex::new(r"\d{1,3}(?:,\d{3})*\.\d{2}").expect("static regex compiles");

        let mut values: Vec<Decimal> = token_re
            .find_iter(&body)
            .filter_map(|m| Decimal::from_str(&m.as_str().replace(',', "")).ok())
            .collect();
        values.sort_by(|a, b| b.cmp(a));
        values.dedup();

        let mut snapshot = CompositeSnapshot::default();
        let mut slots = [&mut snapshot.ubci, &mut snapshot.ubmi, &mut snapshot.ub10, &mut snapshot.ub30];
        for (slot, value) in slots.iter_mut().zip(values.into_iter()) {
            **slot = Some(ScalarReading::value_only(value));
        }
        Ok(snapshot)
    }

    async fn fetch_text(&self, url: &str) -> SourceResult<String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| source_error_from_reqwest(&e))?;
        response.text().await.map_err(|e| SourceError::ParseFailed(e.to_string()))
    }
}

fn source_error_from_reqwest(e: &reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout(Duration::from_secs(10))
    } else {
        SourceError::Unavailable(e.to_string())
    }
}

/// Parses `html` and returns the text of every element body as one line
/// per node, mirroring what a browser's `innerText` would produce well
/// enough for anchor/number scanning.
fn visible_text_lines(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let body_selector = Selector::parse("body").expect("static selector parses");

    document
        .select(&body_selector)
        .flat_map(|body| body.text())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Shared line-walking extraction used by stage 1 (already-structured
/// lines from the DOM) and stage 2 (raw page text split into lines).
fn extract_from_lines(lines: &[String]) -> CompositeSnapshot {
    let number_re = Regex::new(r"-?\d{1,3}(?:,\d{3})*\.\d+").expect("static regex compiles");
    let mut snapshot = CompositeSnapshot::default();

    for (code, anchor) in ANCHORS {
        if let Some(reading) = find_reading_after_anchor(lines, anchor, &number_re) {
            match code {
                "ubci" => snapshot.ubci = Some(reading),
                "ubmi" => snapshot.ubmi = Some(reading),
                "ub10" => snapshot.ub10 = Some(reading),
                "ub30" => snapshot.ub30 = Some(reading),
                _ => unreachable!(),
            }
        }
    }

    if let Some(fx) = find_fx_reading_after_anchor(lines, FX_ANCHOR, &number_re) {
        snapshot.usd_krw = Some(fx);
    }

    snapshot
}

/// Finds `anchor` in `lines`, then parses the first two numeric tokens in
/// the following lines (within a small look-ahead window) as
/// `value` and `change_rate_pct`.
fn find_reading_after_anchor(lines: &[String], anchor: &str, number_re: &Regex) -> Option<ScalarReading> {
    const LOOKAHEAD: usize = 4;

    let idx = lines.iter().position(|l| l.contains(anchor))?;
    let window = &lines[idx + 1..(idx + 1 + LOOKAHEAD).min(lines.len())];

    let mut numbers = window.iter().filter_map(|line| {
        number_re
            .find(line)
            .and_then(|m| Decimal::from_str(&m.as_str().replace(',', "")).ok())
    });

    let value = numbers.next()?;
    let change_rate_pct = numbers.next().unwrap_or(Decimal::ZERO);
    Some(ScalarReading::new(value, Decimal::ZERO, change_rate_pct))
}

/// Finds the FX `anchor` in `lines`, then parses the first three numeric
/// tokens that follow it (within a small look-ahead window) as
/// `value`, `change_absolute`, and `change_rate_pct`, respectively — the
/// FX anchor's trailing lines carry all three, unlike the index anchors'
/// value/rate pair.
fn find_fx_reading_after_anchor(lines: &[String], anchor: &str, number_re: &Regex) -> Option<ScalarReading> {
    const LOOKAHEAD: usize = 5;

    let idx = lines.iter().position(|l| l.contains(anchor))?;
    let window = &lines[idx + 1..(idx + 1 + LOOKAHEAD).min(lines.len())];

    let mut numbers = window.iter().filter_map(|line| {
        number_re
            .find(line)
            .and_then(|m| Decimal::from_str(&m.as_str().replace(',', "")).ok())
    });

    let value = numbers.next()?;
    let change_absolute = numbers.next().unwrap_or(Decimal::ZERO);
    let change_rate_pct = numbers.next().unwrap_or(Decimal::ZERO);
    Some(ScalarReading::new(value, change_absolute, change_rate_pct))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn extracts_reading_following_anchor() {
        let lines = vec!["UBCI".to_string(), "18,000.50".to_string(), "+0.84%".to_string()];
        let re = Regex::new(r"-?\d{1,3}(?:,\d{3})*\.\d+").unwrap();
        let reading = find_reading_after_anchor(&lines, "UBCI", &re).unwrap();
        assert_eq!(reading.value, dec!(18000.50));
        assert_eq!(reading.change_rate_pct, dec!(0.84));
    }

    #[test]
    fn missing_anchor_yields_none() {
        let lines = vec!["something else".to_string()];
        let re = Regex::new(r"-?\d{1,3}(?:,\d{3})*\.\d+").unwrap();
        assert!(find_reading_after_anchor(&lines, "UBCI", &re).is_none());
    }

    #[test]
    fn fx_reading_assigns_value_change_and_rate_to_distinct_trailing_numbers() {
        let lines = vec!["USD/KRW".to_string(), "1,417.20".to_string(), "5.30".to_string(), "0.37%".to_string()];
        let re = Regex::new(r"-?\d{1,3}(?:,\d{3})*\.\d+").unwrap();
        let reading = find_fx_reading_after_anchor(&lines, "USD/KRW", &re).unwrap();
        assert_eq!(reading.value, dec!(1417.20));
        assert_eq!(reading.change_absolute, dec!(5.30));
        assert_eq!(reading.change_rate_pct, dec!(0.37));
    }

    #[test]
    fn snapshot_invalid_when_all_indices_zero() {
        let snapshot = CompositeSnapshot {
            ubci: Some(ScalarReading::value_only(dec!(0))),
            ubmi: Some(ScalarReading::value_only(dec!(0))),
            ub10: None,
            ub30: None,
            usd_krw: None,
        };
        assert!(!snapshot.is_valid());
    }
}
