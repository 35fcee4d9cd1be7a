//! Cache-store data model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Tagged variant over the four series this service tracks. Determines the
/// shape of the payload stored under a given `(kind, code, source_tag)` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    UpbitComposite,
    GlobalCrypto,
    FxRate,
    TopCoinsSnapshot,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::UpbitComposite => "upbit_composite",
            IndexKind::GlobalCrypto => "global_crypto",
            IndexKind::FxRate => "fx_rate",
            IndexKind::TopCoinsSnapshot => "top_coins_snapshot",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upbit_composite" => Some(IndexKind::UpbitComposite),
            "global_crypto" => Some(IndexKind::GlobalCrypto),
            "fx_rate" => Some(IndexKind::FxRate),
            "top_coins_snapshot" => Some(IndexKind::TopCoinsSnapshot),
            _ => None,
        }
    }
}

/// `{value, change_absolute, change_rate_pct}` — the shape every scalar
/// series (index levels, FX, global-crypto figures) shares.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalarReading {
    pub value: Decimal,
    pub change_absolute: Decimal,
    pub change_rate_pct: Decimal,
}

impl ScalarReading {
    pub fn new(value: Decimal, change_absolute: Decimal, change_rate_pct: Decimal) -> Self {
        Self {
            value,
            change_absolute,
            change_rate_pct,
        }
    }

    /// A reading with no change information at all (used for series whose
    /// provider never supplies a delta).
    pub fn value_only(value: Decimal) -> Self {
        Self {
            value,
            change_absolute: Decimal::ZERO,
            change_rate_pct: Decimal::ZERO,
        }
    }

    /// Validation at the adapter boundary: known-nonzero series must
    /// be strictly positive.
    pub fn is_positive(&self) -> bool {
        self.value > Decimal::ZERO
    }
}

/// The unit of storage in the Cache Store. For scalar series, `value`
/// carries the reading inline; for `TopCoinsSnapshot`, the row list is
/// JSON-encoded into `payload_blob` instead.
#[derive(Debug, Clone)]
pub struct CachedRecord {
    pub kind: IndexKind,
    pub code: String,
    pub source_tag: Option<String>,
    pub scalar: Option<ScalarReading>,
    pub payload_blob: Option<Vec<u8>>,
    pub updated_at: DateTime<Utc>,
    pub ttl_seconds: i64,
}

impl CachedRecord {
    pub fn scalar(
        kind: IndexKind,
        code: impl Into<String>,
        reading: ScalarReading,
        ttl_seconds: i64,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            source_tag: None,
            scalar: Some(reading),
            payload_blob: None,
            updated_at: Utc::now(),
            ttl_seconds,
        }
    }

    pub fn blob(
        kind: IndexKind,
        code: impl Into<String>,
        source_tag: impl Into<String>,
        payload_blob: Vec<u8>,
        ttl_seconds: i64,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            source_tag: Some(source_tag.into()),
            scalar: None,
            payload_blob: Some(payload_blob),
            updated_at: Utc::now(),
            ttl_seconds,
        }
    }

    /// A record is fresh iff `now - updated_at < ttl_seconds`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        (now - self.updated_at).num_seconds() < self.ttl_seconds
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        !self.is_fresh(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[test]
    fn fresh_iff_within_ttl() {
        let now = Utc::now();
        let mut rec = CachedRecord::scalar(
            IndexKind::FxRate,
            "USD_KRW",
            ScalarReading::value_only(dec!(1400)),
            300,
        );
        rec.updated_at = now - Duration::seconds(100);
        assert!(rec.is_fresh(now));

        rec.updated_at = now - Duration::seconds(301);
        assert!(rec.is_stale(now));
    }

    #[test]
    fn scalar_reading_positivity() {
        assert!(ScalarReading::value_only(dec!(1)).is_positive());
        assert!(!ScalarReading::value_only(dec!(0)).is_positive());
        assert!(!ScalarReading::value_only(dec!(-1)).is_positive());
    }
}
