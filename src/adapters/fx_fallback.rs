//! FX-Fallback Adapter: only invoked when the Composite-Index Adapter did
//! not return a valid FX reading. Two ordered strategies: an
//! authenticated real-time service floored hourly to respect a monthly
//! quota, then a daily-update service with a two-day lookback for change
//! computation.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::rate_limit::RateGate;
use crate::error::{SourceError, SourceResult};
use crate::models::ScalarReading;

const REALTIME_FLOOR: Duration = Duration::from_secs(3600);
const LOOKBACK_WINDOW: chrono::Duration = chrono::Duration::hours(48);

#[derive(Debug, Deserialize)]
struct RealtimeResponse {
    conversion_rates: std::collections::HashMap<String, Decimal>,
}

pub struct FxFallbackAdapter {
    realtime_api_key: Option<String>,
    daily_url: String,
    http: reqwest::Client,
    realtime_gate: RateGate,
    daily_history: Mutex<VecDeque<(DateTime<Utc>, Decimal)>>,
}

impl FxFallbackAdapter {
    pub fn new(realtime_api_key: Option<String>, daily_url: impl Into<String>) -> Self {
        Self {
            realtime_api_key,
            daily_url: daily_url.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(8))
                .build()
                .expect("reqwest client builds with static config"),
            realtime_gate: RateGate::new(REALTIME_FLOOR),
            daily_history: Mutex::new(VecDeque::with_capacity(4)),
        }
    }

    pub async fn fetch(&self) -> SourceResult<ScalarReading> {
        if self.realtime_api_key.is_some() {
            match self.try_realtime().await {
                Ok(reading) => return Ok(reading),
                Err(e) => debug!("fx realtime strategy unavailable, falling back to daily: {e}"),
            }
        }
        self.try_daily().await
    }

    async fn try_realtime(&self) -> SourceResult<ScalarReading> {
        self.realtime_gate.check_and_record()?;
        let key = self.realtime_api_key.as_deref().expect("checked by caller");

        let url = format!("https://v6.exchangerate-api.com/v6/{key}/latest/USD");
        let response = self.http.get(&url).send().await.map_err(|e| source_error(&e))?;
        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!("realtime fx endpoint returned {}", response.status())));
        }

        let parsed: RealtimeResponse = response.json().await.map_err(|e| SourceError::ParseFailed(e.to_string()))?;
        let value = *parsed
            .conversion_rates
            .get("KRW")
            .ok_or_else(|| SourceError::InvalidData("missing KRW conversion rate".into()))?;

        if value <= Decimal::ZERO {
            return Err(SourceError::InvalidData("non-positive KRW rate".into()));
        }

        Ok(ScalarReading::value_only(value))
    }

    async fn try_daily(&self) -> SourceResult<ScalarReading> {
        let response = self.http.get(&self.daily_url).send().await.map_err(|e| source_error(&e))?;
        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!("daily fx endpoint returned {}", response.status())));
        }

        let body: Value = response.json().await.map_err(|e| SourceError::ParseFailed(e.to_string()))?;
        let value = body
            .get("usd")
            .and_then(|usd| usd.get("krw"))
            .and_then(|v| v.as_f64())
            .and_then(Decimal::from_f64_retain)
            .ok_or_else(|| SourceError::ParseFailed("missing usd.krw in daily fx payload".into()))?;

        if value <= Decimal::ZERO {
            return Err(SourceError::InvalidData("non-positive KRW rate".into()));
        }

        let now = Utc::now();
        let reading = {
            let mut history = self.daily_history.lock();
            let baseline = history
                .iter()
                .find(|(ts, _)| now.signed_duration_since(*ts) >= LOOKBACK_WINDOW)
                .map(|(_, v)| *v);

            history.push_back((now, value));
            while history.len() > 4 {
                history.pop_front();
            }

            match baseline {
                Some(prev) => {
                    let change_absolute = value - prev;
                    let change_rate_pct = if prev.is_zero() { Decimal::ZERO } else { change_absolute / prev * Decimal::from(100) };
                    ScalarReading::new(value, change_absolute, change_rate_pct)
                }
                None => ScalarReading::value_only(value),
            }
        };

        Ok(reading)
    }
}

fn source_error(e: &reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout(Duration::from_secs(8))
    } else {
        SourceError::Unavailable(e.to_string())
    }
}
