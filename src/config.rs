//! Unified runtime configuration.
//!
//! Every tunable lives on one `Settings` value instead of being scattered
//! across constants, environment lookups, and ad hoc config tables. Most
//! fields are env-backed and fixed for the process lifetime; the three
//! fields collector loops and the Dispatcher consult on every tick
//! (`general_update_interval`, `dashboard_refresh_interval`,
//! `websocket_enabled`) are instead read fresh each tick from
//! [`DynamicSettings::read`], which checks the Cache Store's `settings`
//! table before falling back to the `Settings` value below, so an operator
//! can change them without a restart.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use crate::cache::CacheStore;

/// System-wide floor: no collector invokes an adapter faster than the most
/// restrictive rate limit in the fleet (the composite scrape, 5s).
pub const MIN_DISPATCH_SEC: u64 = 5;

/// Slice size for the collector sleep loop, so a dashboard-active
/// transition is observed within one slice instead of a whole interval.
pub const DISPATCH_TICK_SEC: u64 = 5;

#[derive(Parser, Debug, Clone)]
#[command(name = "market-index-service")]
#[command(about = "Market-index scheduler and broadcast fabric")]
pub struct Settings {
    /// Streaming transport listen address.
    #[arg(long, env = "STREAM_LISTEN_ADDR", default_value = "0.0.0.0:8765")]
    pub listen_addr: String,

    /// Path to the SQLite cache store file.
    #[arg(long, env = "CACHE_DB_PATH", default_value = "market_index_cache.db")]
    pub db_path: String,

    /// Background (non-dashboard) collector cadence in seconds. Overridable
    /// at runtime via the `general_update_interval` settings-store key.
    #[arg(long, env = "GENERAL_UPDATE_INTERVAL", default_value_t = 300)]
    pub general_update_interval_sec: u64,

    /// Dashboard-active collector cadence in seconds for Loop A (composite
    /// index + FX). Overridable via `dashboard_refresh_interval`.
    #[arg(long, env = "DASHBOARD_REFRESH_INTERVAL", default_value_t = 5)]
    pub dashboard_refresh_interval_sec: u64,

    /// Dashboard-active cadence for Loop B (global crypto + top coins).
    #[arg(long, env = "LOOP_B_DASHBOARD_INTERVAL", default_value_t = 6)]
    pub loop_b_dashboard_interval_sec: u64,

    /// Global dispatch gate. Overridable via `websocket_enabled`.
    #[arg(long, env = "WEBSOCKET_ENABLED", default_value_t = true)]
    pub websocket_enabled: bool,

    /// Per-client send timeout in seconds.
    #[arg(long, env = "DISPATCH_TIMEOUT_SECS", default_value_t = 3)]
    pub dispatch_timeout_secs: u64,

    /// Application-level ping interval for the streaming transport.
    #[arg(long, env = "WS_PING_INTERVAL_SECS", default_value_t = 20)]
    pub ws_ping_interval_secs: u64,

    /// Pong timeout before a connection is considered dead.
    #[arg(long, env = "WS_PONG_TIMEOUT_SECS", default_value_t = 10)]
    pub ws_pong_timeout_secs: u64,

    /// Graceful close grace period on shutdown.
    #[arg(long, env = "WS_CLOSE_TIMEOUT_SECS", default_value_t = 10)]
    pub ws_close_timeout_secs: u64,

    /// TTL (seconds) for Upbit composite index records.
    #[arg(long, env = "TTL_UPBIT_SECS", default_value_t = 300)]
    pub ttl_upbit_secs: i64,

    /// TTL (seconds) for global-crypto records.
    #[arg(long, env = "TTL_GLOBAL_SECS", default_value_t = 300)]
    pub ttl_global_secs: i64,

    /// TTL (seconds) for the USD/KRW FX record.
    #[arg(long, env = "TTL_FX_SECS", default_value_t = 300)]
    pub ttl_fx_secs: i64,

    /// TTL (seconds) for top-coin snapshot records.
    #[arg(long, env = "TTL_COIN_SECS", default_value_t = 60)]
    pub ttl_coin_secs: i64,

    /// Primary composite-index scrape endpoint.
    #[arg(
        long,
        env = "COMPOSITE_SCRAPE_URL_PRIMARY",
        default_value = "https://upbit.com/indices/ubmi"
    )]
    pub composite_scrape_url_primary: String,

    /// Alternate composite-index scrape endpoint used by the text-line
    /// heuristic fallback stage.
    #[arg(
        long,
        env = "COMPOSITE_SCRAPE_URL_ALT",
        default_value = "https://upbit.com/indices"
    )]
    pub composite_scrape_url_alt: String,

    /// Global-crypto REST base URL.
    #[arg(
        long,
        env = "GLOBAL_CRYPTO_API_BASE",
        default_value = "https://api.coingecko.com/api/v3"
    )]
    pub global_crypto_api_base: String,

    /// Top-coins fallback ranked-listing endpoint.
    #[arg(
        long,
        env = "TOP_COINS_FALLBACK_URL",
        default_value = "https://api.coingecko.com/api/v3/coins/markets"
    )]
    pub top_coins_fallback_url: String,

    /// FX fallback authenticated real-time endpoint API key, if configured.
    #[arg(long, env = "FX_REALTIME_API_KEY")]
    pub fx_realtime_api_key: Option<String>,

    /// FX fallback daily-update (CDN-hosted) JSON endpoint.
    #[arg(
        long,
        env = "FX_DAILY_URL",
        default_value = "https://cdn.jsdelivr.net/npm/@fawazahmed0/currency-api@latest/v1/currencies/usd.json"
    )]
    pub fx_daily_url: String,
}

impl Settings {
    /// Load settings from the environment (via `dotenv`), falling back to
    /// CLI defaults for anything unset. Intended to be called once at
    /// startup.
    pub fn load() -> anyhow::Result<Self> {
        load_env();
        // `Settings::parse` reads argv; in the non-CLI (e.g. test) path we
        // want env/defaults only, so parse against an empty arg list.
        let mut settings = Settings::parse_from(std::iter::once("market-index-service"));
        if settings.db_path != ":memory:" {
            settings.db_path = resolve_data_path(std::env::var("CACHE_DB_PATH").ok(), "market_index_cache.db");
        }
        Ok(settings)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn ws_ping_interval(&self) -> Duration {
        Duration::from_secs(self.ws_ping_interval_secs)
    }

    pub fn ws_pong_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_pong_timeout_secs)
    }

    pub fn ws_close_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_close_timeout_secs)
    }

    /// Loop B (global + top coins) dashboard-active interval. Not one of
    /// the three dynamic keys, so this is the process-lifetime value.
    pub fn loop_b_dashboard_interval(&self) -> u64 {
        self.loop_b_dashboard_interval_sec.max(MIN_DISPATCH_SEC)
    }
}

/// Keys under which [`DynamicSettings`] values live in the Cache Store's
/// `settings` table.
const KEY_GENERAL_UPDATE_INTERVAL: &str = "general_update_interval";
const KEY_DASHBOARD_REFRESH_INTERVAL: &str = "dashboard_refresh_interval";
const KEY_WEBSOCKET_ENABLED: &str = "websocket_enabled";

/// The subset of [`Settings`] that collector loops and the Dispatcher
/// re-read from the Cache Store on every tick instead of caching, so an
/// operator's write to the `settings` table is picked up without a
/// restart. [`Settings`] itself still supplies the startup default for
/// each key, used when the store has never been written.
#[derive(Debug, Clone, Copy)]
pub struct DynamicSettings {
    pub general_update_interval_sec: u64,
    pub dashboard_refresh_interval_sec: u64,
    pub websocket_enabled: bool,
}

impl DynamicSettings {
    /// Reads each key from `store`, falling back to `defaults` for any key
    /// absent or unparsable, then floors both intervals at
    /// [`MIN_DISPATCH_SEC`]. A single cheap point read per key; cheap
    /// enough to call once per tick rather than caching the result.
    pub fn read(store: &dyn CacheStore, defaults: &Settings) -> Self {
        let general_update_interval_sec = read_u64(store, KEY_GENERAL_UPDATE_INTERVAL, defaults.general_update_interval_sec)
            .max(MIN_DISPATCH_SEC);
        let dashboard_refresh_interval_sec =
            read_u64(store, KEY_DASHBOARD_REFRESH_INTERVAL, defaults.dashboard_refresh_interval_sec).max(MIN_DISPATCH_SEC);
        let websocket_enabled = read_bool(store, KEY_WEBSOCKET_ENABLED, defaults.websocket_enabled);

        Self {
            general_update_interval_sec,
            dashboard_refresh_interval_sec,
            websocket_enabled,
        }
    }
}

fn read_u64(store: &dyn CacheStore, key: &str, default: u64) -> u64 {
    store
        .get_dynamic_setting(key)
        .ok()
        .flatten()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn read_bool(store: &dyn CacheStore, key: &str, default: bool) -> bool {
    match store.get_dynamic_setting(key).ok().flatten().as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    }
}

fn default_data_path(filename: &str) -> String {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    base.join(filename).to_string_lossy().to_string()
}

/// Resolve a possibly-relative env-provided path against the crate
/// directory rather than the process's cwd.
pub fn resolve_data_path(env_value: Option<String>, default_filename: &str) -> String {
    let base = Path::new(env!("CARGO_MANIFEST_DIR"));
    let Some(raw) = env_value.filter(|v| !v.trim().is_empty()) else {
        return default_data_path(default_filename);
    };

    let p = PathBuf::from(raw);
    if p.is_absolute() {
        return p.to_string_lossy().to_string();
    }
    base.join(p).to_string_lossy().to_string()
}

fn load_env() {
    let _ = dotenv::dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    for candidate in [manifest_dir.join(".env"), manifest_dir.join("../.env")] {
        if candidate.exists() {
            let _ = dotenv::from_path(&candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SqliteCacheStore;

    #[test]
    fn dynamic_settings_fall_back_to_defaults_when_store_empty() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let defaults = Settings::parse_from(std::iter::once("market-index-service"));
        let dynamic = DynamicSettings::read(&store, &defaults);
        assert_eq!(dynamic.general_update_interval_sec, defaults.general_update_interval_sec);
        assert_eq!(dynamic.dashboard_refresh_interval_sec, defaults.dashboard_refresh_interval_sec);
        assert_eq!(dynamic.websocket_enabled, defaults.websocket_enabled);
    }

    #[test]
    fn dynamic_settings_prefer_store_value_and_floor_intervals() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        store.set_dynamic_setting(KEY_GENERAL_UPDATE_INTERVAL, "1").unwrap();
        store.set_dynamic_setting(KEY_DASHBOARD_REFRESH_INTERVAL, "1").unwrap();
        store.set_dynamic_setting(KEY_WEBSOCKET_ENABLED, "false").unwrap();
        let defaults = Settings::parse_from(std::iter::once("market-index-service"));

        let dynamic = DynamicSettings::read(&store, &defaults);
        assert_eq!(dynamic.general_update_interval_sec, MIN_DISPATCH_SEC);
        assert_eq!(dynamic.dashboard_refresh_interval_sec, MIN_DISPATCH_SEC);
        assert!(!dynamic.websocket_enabled);
    }

    #[test]
    fn loop_b_dashboard_interval_matches_configured_value() {
        let settings = Settings::parse_from(std::iter::once("market-index-service"));
        assert_eq!(settings.loop_b_dashboard_interval(), 6);
    }
}
