//! SQLite-backed [`CacheStore`]. WAL mode for concurrent reads
//! during writes, one shared connection behind a `parking_lot::Mutex`.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;

use super::CacheStore;
use crate::error::{StoreError, StoreResult};
use crate::models::{CachedRecord, IndexKind, ScalarReading};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -16000;

CREATE TABLE IF NOT EXISTS cache_records (
    kind TEXT NOT NULL,
    code TEXT NOT NULL,
    source_tag TEXT NOT NULL DEFAULT '',
    value TEXT,
    change_absolute TEXT,
    change_rate_pct TEXT,
    payload_blob BLOB,
    updated_at TEXT NOT NULL,
    ttl_seconds INTEGER NOT NULL,
    PRIMARY KEY (kind, code, source_tag)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
) WITHOUT ROWID;
"#;

/// Empty-string sentinel for "no source tag", since SQLite's `PRIMARY KEY`
/// uniqueness does not hold across `NULL` values.
fn tag_key(tag: Option<&str>) -> &str {
    tag.unwrap_or("")
}

pub struct SqliteCacheStore {
    conn: Mutex<Connection>,
}

impl SqliteCacheStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn write_one(conn: &Connection, record: &CachedRecord) -> rusqlite::Result<()> {
        let (value, change_absolute, change_rate_pct) = match &record.scalar {
            Some(s) => (
                Some(s.value.to_string()),
                Some(s.change_absolute.to_string()),
                Some(s.change_rate_pct.to_string()),
            ),
            None => (None, None, None),
        };

        conn.execute(
            "INSERT INTO cache_records
                (kind, code, source_tag, value, change_absolute, change_rate_pct, payload_blob, updated_at, ttl_seconds)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(kind, code, source_tag) DO UPDATE SET
                value = excluded.value,
                change_absolute = excluded.change_absolute,
                change_rate_pct = excluded.change_rate_pct,
                payload_blob = excluded.payload_blob,
                updated_at = excluded.updated_at,
                ttl_seconds = excluded.ttl_seconds",
            params![
                record.kind.as_str(),
                record.code,
                tag_key(record.source_tag.as_deref()),
                value,
                change_absolute,
                change_rate_pct,
                record.payload_blob,
                Utc::now().to_rfc3339(),
                record.ttl_seconds,
            ],
        )?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<CachedRecord> {
        let kind_str: String = row.get("kind")?;
        let code: String = row.get("code")?;
        let source_tag: String = row.get("source_tag")?;
        let value: Option<String> = row.get("value")?;
        let change_absolute: Option<String> = row.get("change_absolute")?;
        let change_rate_pct: Option<String> = row.get("change_rate_pct")?;
        let payload_blob: Option<Vec<u8>> = row.get("payload_blob")?;
        let updated_at: String = row.get("updated_at")?;
        let ttl_seconds: i64 = row.get("ttl_seconds")?;

        let scalar = value.map(|v| {
            ScalarReading::new(
                Decimal::from_str(&v).unwrap_or_default(),
                change_absolute
                    .as_deref()
                    .and_then(|s| Decimal::from_str(s).ok())
                    .unwrap_or_default(),
                change_rate_pct
                    .as_deref()
                    .and_then(|s| Decimal::from_str(s).ok())
                    .unwrap_or_default(),
            )
        });

        Ok(CachedRecord {
            kind: IndexKind::parse(&kind_str).unwrap_or(IndexKind::FxRate),
            code,
            source_tag: if source_tag.is_empty() { None } else { Some(source_tag) },
            scalar,
            payload_blob,
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            ttl_seconds,
        })
    }
}

impl CacheStore for SqliteCacheStore {
    fn upsert(&self, record: &CachedRecord) -> StoreResult<()> {
        let conn = self.conn.lock();
        Self::write_one(&conn, record)?;
        Ok(())
    }

    fn upsert_many(&self, records: &[CachedRecord]) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(StoreError::Unavailable)?;
        for record in records {
            Self::write_one(&tx, record)?;
        }
        tx.commit().map_err(StoreError::Unavailable)?;
        Ok(())
    }

    fn get(&self, kind: IndexKind, code: &str, source_tag: Option<&str>) -> StoreResult<Option<CachedRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM cache_records WHERE kind = ?1 AND code = ?2 AND source_tag = ?3",
        )?;
        let mut rows = stmt.query(params![kind.as_str(), code, tag_key(source_tag)])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_record(row)?)),
            None => Ok(None),
        }
    }

    fn get_by_kind(&self, kind: IndexKind) -> StoreResult<Vec<CachedRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM cache_records WHERE kind = ?1")?;
        let rows = stmt.query_map(params![kind.as_str()], Self::row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn get_by_code_and_source(&self, code: &str, source_tag: &str) -> StoreResult<Option<CachedRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM cache_records WHERE code = ?1 AND source_tag = ?2")?;
        let mut rows = stmt.query(params![code, source_tag])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_record(row)?)),
            None => Ok(None),
        }
    }

    fn sweep_expired(&self) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM cache_records
             WHERE (strftime('%s','now') - strftime('%s', updated_at)) >= ttl_seconds",
            [],
        )?;
        Ok(removed)
    }

    fn get_dynamic_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get("value")?)),
            None => Ok(None),
        }
    }

    fn set_dynamic_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample(code: &str) -> CachedRecord {
        CachedRecord::scalar(
            IndexKind::FxRate,
            code,
            ScalarReading::new(dec!(1400), dec!(5), dec!(0.3)),
            300,
        )
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        store.upsert(&sample("USD_KRW")).unwrap();
        let fetched = store.get(IndexKind::FxRate, "USD_KRW", None).unwrap().unwrap();
        assert_eq!(fetched.scalar.unwrap().value, dec!(1400));
    }

    #[test]
    fn upsert_replaces_existing_key() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        store.upsert(&sample("USD_KRW")).unwrap();
        let mut updated = sample("USD_KRW");
        updated.scalar = Some(ScalarReading::value_only(dec!(1410)));
        store.upsert(&updated).unwrap();

        let all = store.get_by_kind(IndexKind::FxRate).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].scalar.unwrap().value, dec!(1410));
    }

    #[test]
    fn upsert_many_is_atomic() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let records = vec![sample("A"), sample("B"), sample("C")];
        store.upsert_many(&records).unwrap();
        assert_eq!(store.get_by_kind(IndexKind::FxRate).unwrap().len(), 3);
    }

    #[test]
    fn dynamic_setting_round_trips_and_overwrites() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        assert_eq!(store.get_dynamic_setting("websocket_enabled").unwrap(), None);

        store.set_dynamic_setting("websocket_enabled", "false").unwrap();
        assert_eq!(store.get_dynamic_setting("websocket_enabled").unwrap(), Some("false".to_string()));

        store.set_dynamic_setting("websocket_enabled", "true").unwrap();
        assert_eq!(store.get_dynamic_setting("websocket_enabled").unwrap(), Some("true".to_string()));
    }

    #[test]
    fn top_coins_blob_round_trips_with_source_tag() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let record = CachedRecord::blob(
            IndexKind::TopCoinsSnapshot,
            "top_coins",
            "primary",
            b"[]".to_vec(),
            60,
        );
        store.upsert(&record).unwrap();
        let fetched = store.get_by_code_and_source("top_coins", "primary").unwrap().unwrap();
        assert_eq!(fetched.payload_blob.unwrap(), b"[]".to_vec());
    }
}
