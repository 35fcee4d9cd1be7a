//! Source Adapters: pure request/response abstractions with no scheduling
//! of their own. Each enforces its own minimum inter-call interval
//! and never retries beyond its internal fallback chain.

mod composite;
mod fx_fallback;
mod global_crypto;
mod rate_limit;
mod top_coins_fallback;
mod top_coins_primary;

pub use composite::CompositeIndexAdapter;
pub use fx_fallback::FxFallbackAdapter;
pub use global_crypto::GlobalCryptoAdapter;
pub use rate_limit::RateGate;
pub use top_coins_fallback::TopCoinsFallbackAdapter;
pub use top_coins_primary::TopCoinsPrimaryAdapter;

use crate::models::{CoinRow, ScalarReading};

/// Output of the Composite-Index Adapter: four Upbit index readings plus,
/// when extractable from the same page, the USD/KRW FX reading.
#[derive(Debug, Clone, Default)]
pub struct CompositeSnapshot {
    pub ubci: Option<ScalarReading>,
    pub ubmi: Option<ScalarReading>,
    pub ub10: Option<ScalarReading>,
    pub ub30: Option<ScalarReading>,
    pub usd_krw: Option<ScalarReading>,
}

impl CompositeSnapshot {
    /// Valid iff at least one index has `value > 0`.
    pub fn is_valid(&self) -> bool {
        [&self.ubci, &self.ubmi, &self.ub10, &self.ub30]
            .into_iter()
            .flatten()
            .any(|r| r.is_positive())
    }

    /// Named index readings with `value > 0`, ready for `upsert_many`.
    pub fn valid_indices(&self) -> Vec<(&'static str, ScalarReading)> {
        [("ubci", self.ubci), ("ubmi", self.ubmi), ("ub10", self.ub10), ("ub30", self.ub30)]
            .into_iter()
            .filter_map(|(code, reading)| reading.filter(|r| r.is_positive()).map(|r| (code, r)))
            .collect()
    }
}

/// Output of the Global-Crypto Adapter.
#[derive(Debug, Clone)]
pub struct GlobalCryptoSnapshot {
    pub total_market_cap_usd: ScalarReading,
    pub total_volume_usd: ScalarReading,
    pub btc_dominance: ScalarReading,
    pub eth_dominance: ScalarReading,
    pub market_cap_change_24h: ScalarReading,
    pub volume_to_market_cap_ratio: ScalarReading,
}

impl GlobalCryptoSnapshot {
    pub fn as_named_fields(&self) -> [(&'static str, ScalarReading); 6] {
        [
            ("total_market_cap_usd", self.total_market_cap_usd),
            ("total_volume_usd", self.total_volume_usd),
            ("btc_dominance", self.btc_dominance),
            ("eth_dominance", self.eth_dominance),
            ("market_cap_change_24h", self.market_cap_change_24h),
            ("volume_to_market_cap_ratio", self.volume_to_market_cap_ratio),
        ]
    }

    /// Valid iff at least one field came back positive.
    pub fn is_valid(&self) -> bool {
        self.as_named_fields().iter().any(|(_, r)| r.is_positive())
    }
}

/// Output of both Top-Coins adapters, normalized to the same shape
/// regardless of `source_tag`.
#[derive(Debug, Clone, Default)]
pub struct TopCoinsSnapshot {
    pub rows: Vec<CoinRow>,
}

impl TopCoinsSnapshot {
    /// Non-empty, every row has a positive `price_usd`.
    pub fn is_valid(&self) -> bool {
        !self.rows.is_empty() && self.rows.iter().all(|r| r.price_usd.is_sign_positive() && !r.price_usd.is_zero())
    }
}
