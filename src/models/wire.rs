//! JSON message shapes crossing the streaming transport.

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::index::ScalarReading;
use super::snapshot::{derive_krw_price, format_krw, format_usd, MarketSnapshot};

/// A scalar reading as it appears on the wire: plain f64s, no `Decimal`.
#[derive(Debug, Clone, Serialize)]
pub struct WireReading {
    pub value: f64,
    pub change: f64,
    pub change_rate: f64,
}

impl From<&ScalarReading> for WireReading {
    fn from(r: &ScalarReading) -> Self {
        use rust_decimal::prelude::ToPrimitive;
        Self {
            value: r.value.to_f64().unwrap_or(0.0),
            change: r.change_absolute.to_f64().unwrap_or(0.0),
            change_rate: r.change_rate_pct.to_f64().unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WireCoin {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub current_price: f64,
    pub price_change_percentage_24h: f64,
    pub price_usd_formatted: String,
    pub price_krw_formatted: String,
    pub market_cap: Option<f64>,
    pub source: String,
}

/// Builds the `data.top_coins[]` entries and the rest of the `data` object
/// from a [`MarketSnapshot`], deriving KRW prices from the snapshot's own
/// FX reading.
pub fn build_indices_updated(snapshot: &MarketSnapshot, update_duration: Option<f64>) -> serde_json::Value {
    use rust_decimal::prelude::ToPrimitive;

    let upbit: serde_json::Map<String, serde_json::Value> = snapshot
        .upbit
        .iter()
        .map(|(code, reading)| (code.clone(), json!(WireReading::from(reading))))
        .collect();

    let top_coins: Vec<WireCoin> = snapshot
        .top_coins
        .iter()
        .map(|coin| {
            let krw = derive_krw_price(coin.price_usd, snapshot.fx.value);
            WireCoin {
                id: coin.id.clone(),
                symbol: coin.symbol.clone(),
                name: coin.name.clone(),
                current_price: coin.price_usd.to_f64().unwrap_or(0.0),
                price_change_percentage_24h: coin.change_pct_24h.to_f64().unwrap_or(0.0),
                price_usd_formatted: format_usd(coin.price_usd),
                price_krw_formatted: format_krw(krw),
                market_cap: coin.market_cap.and_then(|m| m.to_f64()),
                source: coin.source_tag.clone(),
            }
        })
        .collect();

    let global: serde_json::Map<String, serde_json::Value> = snapshot
        .global
        .iter()
        .map(|(code, reading)| (code.clone(), json!(reading.value.to_f64().unwrap_or(0.0))))
        .collect();

    json!({
        "type": "indices_updated",
        "timestamp": Local::now().to_rfc3339(),
        "update_duration": update_duration,
        "data": {
            "upbit": upbit,
            "usd_krw": WireReading::from(&snapshot.fx),
            "global": global,
            "top_coins": top_coins,
        }
    })
}

/// A control message sent by a connected client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientControlMessage {
    ClientInfo {
        page: String,
        #[serde(default)]
        requested_interval: Option<u64>,
    },
}

/// Parses one incoming text frame into a control action. Plain `"ping"`
/// and `"get_latest"` are handled as bare text before JSON is attempted;
/// anything else is parsed as a [`ClientControlMessage`].
pub enum ControlAction {
    Ping,
    GetLatest,
    Register { page: String, requested_interval: Option<u64> },
    Unrecognized,
}

pub fn parse_control_message(text: &str) -> ControlAction {
    match text.trim() {
        "ping" => return ControlAction::Ping,
        "get_latest" => return ControlAction::GetLatest,
        _ => {}
    }

    match serde_json::from_str::<ClientControlMessage>(text) {
        Ok(ClientControlMessage::ClientInfo { page, requested_interval }) => {
            ControlAction::Register { page, requested_interval }
        }
        Err(_) => ControlAction::Unrecognized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_text_control_messages_recognized() {
        assert!(matches!(parse_control_message("ping"), ControlAction::Ping));
        assert!(matches!(parse_control_message("get_latest"), ControlAction::GetLatest));
    }

    #[test]
    fn client_info_parses_into_register() {
        let raw = r#"{"type":"client_info","page":"dashboard","requested_interval":5}"#;
        match parse_control_message(raw) {
            ControlAction::Register { page, requested_interval } => {
                assert_eq!(page, "dashboard");
                assert_eq!(requested_interval, Some(5));
            }
            _ => panic!("expected Register"),
        }
    }

    #[test]
    fn garbage_is_unrecognized() {
        assert!(matches!(parse_control_message("{not json"), ControlAction::Unrecognized));
    }
}
