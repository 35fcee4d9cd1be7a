//! Dispatcher-assembled, transient view of the freshest cached data.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::index::ScalarReading;

/// One row of the top-coins list. Formatting (`price_usd_formatted`,
/// `price_krw_formatted`) is deliberately not stored here — it is derived
/// at dispatch time in `wire.rs`, since it depends on the FX rate at send
/// time, not at collection time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinRow {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub price_usd: Decimal,
    pub change_pct_24h: Decimal,
    pub change_pct_7d: Option<Decimal>,
    pub market_cap: Option<Decimal>,
    pub source_tag: String,
    pub sparkline: Option<Vec<f64>>,
}

/// A point-in-time composite view built from the Cache Store. Never
/// persisted — it lives only inside one dispatch cycle.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub upbit: HashMap<String, ScalarReading>,
    pub fx: ScalarReading,
    pub global: HashMap<String, ScalarReading>,
    pub top_coins: Vec<CoinRow>,
    pub generated_at: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn empty() -> Self {
        Self {
            upbit: HashMap::new(),
            fx: ScalarReading::value_only(Decimal::ZERO),
            global: HashMap::new(),
            top_coins: Vec::new(),
            generated_at: Utc::now(),
        }
    }
}

/// `price_usd * fx_value`, rounded at formatting time only.
pub fn derive_krw_price(price_usd: Decimal, fx_value: Decimal) -> Decimal {
    price_usd * fx_value
}

/// USD formatting rule: `< 1` → 4 decimals; else thousands-grouped 2
/// decimals.
pub fn format_usd(price: Decimal) -> String {
    if price.abs() < Decimal::ONE {
        format!("${:.4}", price)
    } else {
        format!("${}", group_thousands(price, 2))
    }
}

/// KRW formatting rule: `< 1000` → 2 decimals; else thousands-grouped
/// 0 decimals.
pub fn format_krw(price: Decimal) -> String {
    if price.abs() < Decimal::from(1000) {
        format!("\u{20a9}{:.2}", price)
    } else {
        format!("\u{20a9}{}", group_thousands(price, 0))
    }
}

/// Thousands-group a decimal with a fixed number of fraction digits,
/// e.g. `107065.16` → `"107,065.16"`.
fn group_thousands(value: Decimal, decimals: u32) -> String {
    let rounded = value.round_dp(decimals);
    let formatted = if decimals == 0 {
        format!("{}", ToPrimitive::to_i64(&rounded).unwrap_or(0))
    } else {
        format!("{:.*}", decimals as usize, rounded)
    };

    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (formatted.as_str(), None),
    };

    let negative = int_part.starts_with('-');
    let digits = if negative { &int_part[1..] } else { int_part };

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (count, ch) in digits.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let grouped: String = grouped.chars().rev().collect();

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&grouped);
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(frac);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn usd_formatting_switches_precision_at_magnitude_thresholds() {
        assert_eq!(format_usd(dec!(0.5)), "$0.5000");
        assert_eq!(format_usd(dec!(107065.16)), "$107,065.16");
        assert_eq!(format_usd(dec!(1234567.8)), "$1,234,567.80");
    }

    #[test]
    fn krw_formatting_switches_precision_at_magnitude_thresholds() {
        assert_eq!(format_krw(dec!(500)), "\u{20a9}500.00");
        assert_eq!(format_krw(dec!(149891224)), "\u{20a9}149,891,224");
    }

    #[test]
    fn krw_price_derived_from_usd_and_fx_rate() {
        let usd = dec!(107065.16);
        let fx = dec!(1400.0);
        let krw = derive_krw_price(usd, fx);
        assert_eq!(format_usd(usd), "$107,065.16");
        assert_eq!(format_krw(krw), "\u{20a9}149,891,224");
    }
}
