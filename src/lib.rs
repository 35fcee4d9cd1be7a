//! Market-index aggregation and broadcast service.
//!
//! Collector Loops pull composite-index, FX, global-crypto, and top-coins
//! readings from external providers into the Cache Store; the Dispatcher
//! paces snapshot assembly per connected client's page class; the Stream
//! Server carries it over a WebSocket transport.

pub mod adapters;
pub mod cache;
pub mod collectors;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod middleware;
pub mod models;
pub mod stream;
