//! Top-Coins Primary Adapter: one REST call per coin from a fixed list to
//! obtain a 24h ticker. Rate-limit floor: 100ms per request, 1s
//! for the whole bundle.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use super::rate_limit::RateGate;
use super::TopCoinsSnapshot;
use crate::error::{SourceError, SourceResult};
use crate::models::CoinRow;

const PER_REQUEST_FLOOR: Duration = Duration::from_millis(100);
const BUNDLE_FLOOR: Duration = Duration::from_secs(1);
const TICKER_BASE_URL: &str = "https://api.binance.com/api/v3/ticker/24hr";

/// `(coin id, display symbol, display name, exchange ticker symbol)`.
const FIXED_COIN_LIST: [(&str, &str, &str, &str); 8] = [
    ("bitcoin", "btc", "Bitcoin", "BTCUSDT"),
    ("ethereum", "eth", "Ethereum", "ETHUSDT"),
    ("ripple", "xrp", "XRP", "XRPUSDT"),
    ("solana", "sol", "Solana", "SOLUSDT"),
    ("dogecoin", "doge", "Dogecoin", "DOGEUSDT"),
    ("cardano", "ada", "Cardano", "ADAUSDT"),
    ("tron", "trx", "TRON", "TRXUSDT"),
    ("polkadot", "dot", "Polkadot", "DOTUSDT"),
];

#[derive(Debug, Deserialize)]
struct TickerResponse {
    #[serde(rename = "lastPrice")]
    last_price: Decimal,
    #[serde(rename = "priceChangePercent")]
    price_change_percent: Decimal,
}

pub struct TopCoinsPrimaryAdapter {
    http: reqwest::Client,
    bundle_gate: RateGate,
    request_gate: RateGate,
}

impl Default for TopCoinsPrimaryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl TopCoinsPrimaryAdapter {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("reqwest client builds with static config"),
            bundle_gate: RateGate::new(BUNDLE_FLOOR),
            request_gate: RateGate::new(PER_REQUEST_FLOOR),
        }
    }

    pub async fn fetch(&self) -> SourceResult<TopCoinsSnapshot> {
        self.bundle_gate.check_and_record()?;

        let mut rows = Vec::with_capacity(FIXED_COIN_LIST.len());
        for (id, symbol, name, ticker) in FIXED_COIN_LIST {
            if let Err(e) = self.request_gate.check_and_record() {
                warn!(coin = id, "skipping primary ticker call: {e}");
                continue;
            }

            match self.fetch_one(ticker).await {
                Ok(response) => rows.push(CoinRow {
                    id: id.to_string(),
                    symbol: symbol.to_string(),
                    name: name.to_string(),
                    price_usd: response.last_price,
                    change_pct_24h: response.price_change_percent,
                    change_pct_7d: None,
                    market_cap: None,
                    source_tag: "primary".to_string(),
                    sparkline: None,
                }),
                Err(e) => warn!(coin = id, "primary ticker call failed: {e}"),
            }
        }

        Ok(TopCoinsSnapshot { rows })
    }

    async fn fetch_one(&self, ticker: &str) -> SourceResult<TickerResponse> {
        let response = self
            .http
            .get(TICKER_BASE_URL)
            .query(&[("symbol", ticker)])
            .send()
            .await
            .map_err(|e| source_error(&e))?;

        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!("ticker endpoint returned {}", response.status())));
        }

        response.json().await.map_err(|e| SourceError::ParseFailed(e.to_string()))
    }
}

fn source_error(e: &reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout(Duration::from_secs(5))
    } else {
        SourceError::Unavailable(e.to_string())
    }
}
