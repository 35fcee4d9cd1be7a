//! Top-Coins Fallback Adapter: single ranked-listing REST call including
//! market cap, sparkline, and 24h/7d changes.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use super::rate_limit::RateGate;
use super::TopCoinsSnapshot;
use crate::error::{SourceError, SourceResult};
use crate::models::CoinRow;

const RATE_FLOOR: Duration = Duration::from_secs(4);
const PAGE_SIZE: u32 = 10;

#[derive(Debug, Deserialize)]
struct SparklineIn7d {
    price: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct MarketRow {
    id: String,
    symbol: String,
    name: String,
    current_price: Decimal,
    market_cap: Option<Decimal>,
    price_change_percentage_24h: Option<Decimal>,
    price_change_percentage_7d_in_currency: Option<Decimal>,
    sparkline_in_7d: Option<SparklineIn7d>,
}

pub struct TopCoinsFallbackAdapter {
    url: String,
    http: reqwest::Client,
    rate_gate: RateGate,
}

impl TopCoinsFallbackAdapter {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(8))
                .build()
                .expect("reqwest client builds with static config"),
            rate_gate: RateGate::new(RATE_FLOOR),
        }
    }

    pub async fn fetch(&self) -> SourceResult<TopCoinsSnapshot> {
        self.rate_gate.check_and_record()?;

        let response = self
            .http
            .get(&self.url)
            .query(&[
                ("vs_currency", "usd"),
                ("order", "market_cap_desc"),
                ("per_page", &PAGE_SIZE.to_string()),
                ("page", "1"),
                ("sparkline", "true"),
                ("price_change_percentage", "7d"),
            ])
            .send()
            .await
            .map_err(|e| source_error(&e))?;

        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!("fallback listing returned {}", response.status())));
        }

        let rows: Vec<MarketRow> = response.json().await.map_err(|e| SourceError::ParseFailed(e.to_string()))?;

        let rows = rows
            .into_iter()
            .map(|row| CoinRow {
                id: row.id,
                symbol: row.symbol,
                name: row.name,
                price_usd: row.current_price,
                change_pct_24h: row.price_change_percentage_24h.unwrap_or(Decimal::ZERO),
                change_pct_7d: row.price_change_percentage_7d_in_currency,
                market_cap: row.market_cap,
                source_tag: "fallback".to_string(),
                sparkline: row.sparkline_in_7d.map(|s| s.price),
            })
            .collect();

        Ok(TopCoinsSnapshot { rows })
    }
}

fn source_error(e: &reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout(Duration::from_secs(8))
    } else {
        SourceError::Unavailable(e.to_string())
    }
}
