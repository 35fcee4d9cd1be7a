//! Domain model: cache-store records, client/session state, the assembled
//! snapshot, and the wire message shapes built from it.

pub mod client;
pub mod index;
pub mod snapshot;
pub mod wire;

pub use client::{CadencePolicy, ClientId, ClientSession, PageCadencePolicy, PageClass};
pub use index::{CachedRecord, IndexKind, ScalarReading};
pub use snapshot::{CoinRow, MarketSnapshot};
