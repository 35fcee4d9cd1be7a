//! Global-Crypto Adapter: single REST call for aggregate market figures
//! (total market cap, volume, BTC/ETH dominance).

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use super::rate_limit::RateGate;
use super::GlobalCryptoSnapshot;
use crate::error::{SourceError, SourceResult};
use crate::models::ScalarReading;

const RATE_FLOOR: Duration = Duration::from_secs(4);

#[derive(Debug, Deserialize)]
struct GlobalResponseEnvelope {
    data: GlobalResponseData,
}

#[derive(Debug, Deserialize)]
struct GlobalResponseData {
    total_market_cap: std::collections::HashMap<String, Decimal>,
    total_volume: std::collections::HashMap<String, Decimal>,
    market_cap_percentage: std::collections::HashMap<String, Decimal>,
    market_cap_change_percentage_24h_usd: Decimal,
}

pub struct GlobalCryptoAdapter {
    base_url: String,
    http: reqwest::Client,
    rate_gate: RateGate,
}

impl GlobalCryptoAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(8))
                .build()
                .expect("reqwest client builds with static config"),
            rate_gate: RateGate::new(RATE_FLOOR),
        }
    }

    pub async fn fetch(&self) -> SourceResult<GlobalCryptoSnapshot> {
        self.rate_gate.check_and_record()?;

        let url = format!("{}/global", self.base_url);
        let response = self.http.get(&url).send().await.map_err(|e| source_error(&e))?;

        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!("global endpoint returned {}", response.status())));
        }

        let envelope: GlobalResponseEnvelope =
            response.json().await.map_err(|e| SourceError::ParseFailed(e.to_string()))?;

        let data = envelope.data;
        let total_market_cap_usd = *data
            .total_market_cap
            .get("usd")
            .ok_or_else(|| SourceError::InvalidData("missing total_market_cap.usd".into()))?;
        let total_volume_usd = *data
            .total_volume
            .get("usd")
            .ok_or_else(|| SourceError::InvalidData("missing total_volume.usd".into()))?;
        let btc_dominance = *data.market_cap_percentage.get("btc").unwrap_or(&Decimal::ZERO);
        let eth_dominance = *data.market_cap_percentage.get("eth").unwrap_or(&Decimal::ZERO);
        let volume_to_market_cap_ratio = if total_market_cap_usd.is_zero() {
            Decimal::ZERO
        } else {
            total_volume_usd / total_market_cap_usd
        };

        let snapshot = GlobalCryptoSnapshot {
            total_market_cap_usd: ScalarReading::value_only(total_market_cap_usd),
            total_volume_usd: ScalarReading::value_only(total_volume_usd),
            btc_dominance: ScalarReading::value_only(btc_dominance),
            eth_dominance: ScalarReading::value_only(eth_dominance),
            market_cap_change_24h: ScalarReading::value_only(data.market_cap_change_percentage_24h_usd),
            volume_to_market_cap_ratio: ScalarReading::value_only(volume_to_market_cap_ratio),
        };

        if !snapshot.is_valid() {
            debug!("global-crypto response failed boundary validation");
            return Err(SourceError::InvalidData("all fields non-positive".into()));
        }

        Ok(snapshot)
    }
}

fn source_error(e: &reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout(Duration::from_secs(8))
    } else {
        SourceError::Unavailable(e.to_string())
    }
}
