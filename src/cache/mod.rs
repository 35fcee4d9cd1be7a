//! The Cache Store: persists the latest reading for each
//! `(kind, code, source_tag)` key and answers point reads and kind-scans.

mod sqlite_store;

pub use sqlite_store::SqliteCacheStore;

use crate::error::StoreResult;
use crate::models::{CachedRecord, IndexKind};

/// Write-through, atomic-per-record persistence for [`CachedRecord`]s.
/// Implementations must guarantee no torn reads and must not block
/// concurrent writers to distinct keys observably.
pub trait CacheStore: Send + Sync {
    fn upsert(&self, record: &CachedRecord) -> StoreResult<()>;

    /// Bulk variant. Must be atomic at the batch level so a
    /// `TopCoinsSnapshot` and its companion fields are never observed
    /// half-written.
    fn upsert_many(&self, records: &[CachedRecord]) -> StoreResult<()>;

    fn get(&self, kind: IndexKind, code: &str, source_tag: Option<&str>) -> StoreResult<Option<CachedRecord>>;

    fn get_by_kind(&self, kind: IndexKind) -> StoreResult<Vec<CachedRecord>>;

    fn get_by_code_and_source(&self, code: &str, source_tag: &str) -> StoreResult<Option<CachedRecord>>;

    /// Deletes records whose TTL has elapsed. Returns the count removed.
    /// Optional maintenance, safe to no-op.
    fn sweep_expired(&self) -> StoreResult<usize>;

    /// Reads an operator-set dynamic setting by key. `None` if the key has
    /// never been written, in which case the caller falls back to its own
    /// default. Collector loops and the Dispatcher call this every tick
    /// rather than caching the result, so a value set by an operator takes
    /// effect without a restart.
    fn get_dynamic_setting(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes an operator-set dynamic setting, creating the key if absent.
    fn set_dynamic_setting(&self, key: &str, value: &str) -> StoreResult<()>;
}
