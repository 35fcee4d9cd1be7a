//! Loop B — Global + Top-Coins.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::{sleep_with_dashboard_watch, DashboardActivity};
use crate::adapters::{GlobalCryptoAdapter, TopCoinsFallbackAdapter, TopCoinsPrimaryAdapter};
use crate::cache::CacheStore;
use crate::config::{DynamicSettings, Settings};
use crate::models::{CachedRecord, IndexKind};

pub async fn run_global_topcoins_loop(
    settings: Arc<Settings>,
    store: Arc<dyn CacheStore>,
    global: Arc<GlobalCryptoAdapter>,
    top_coins_primary: Arc<TopCoinsPrimaryAdapter>,
    top_coins_fallback: Arc<TopCoinsFallbackAdapter>,
    dashboard: Arc<DashboardActivity>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    info!("global/top-coins collector loop starting");

    loop {
        if *shutdown.borrow() {
            break;
        }

        // Re-read every tick rather than caching, so an operator's write to
        // the settings table takes effect on the next cycle without a restart.
        let dynamic = DynamicSettings::read(store.as_ref(), &settings);
        let dashboard_active = dashboard.is_active();
        let interval = if dashboard_active {
            settings.loop_b_dashboard_interval()
        } else {
            dynamic.general_update_interval_sec
        };

        let tick_started = Instant::now();
        run_global_topcoins_tick(&store, &global, &top_coins_primary, &top_coins_fallback, &settings).await;

        let elapsed = tick_started.elapsed();
        let sleep_for = Duration::from_secs(interval).saturating_sub(elapsed).max(Duration::from_secs(1));
        sleep_with_dashboard_watch(sleep_for, &dashboard, dashboard_active, shutdown.clone()).await;
    }

    info!("global/top-coins collector loop stopped");
}

async fn run_global_topcoins_tick(
    store: &Arc<dyn CacheStore>,
    global: &Arc<GlobalCryptoAdapter>,
    top_coins_primary: &Arc<TopCoinsPrimaryAdapter>,
    top_coins_fallback: &Arc<TopCoinsFallbackAdapter>,
    settings: &Arc<Settings>,
) {
    match global.fetch().await {
        Ok(snapshot) => {
            let records: Vec<CachedRecord> = snapshot
                .as_named_fields()
                .into_iter()
                .map(|(code, reading)| CachedRecord::scalar(IndexKind::GlobalCrypto, code, reading, settings.ttl_global_secs))
                .collect();
            if let Err(e) = store.upsert_many(&records) {
                warn!("failed to persist global-crypto records: {e}");
            }
        }
        Err(e) => warn!("global-crypto adapter call failed: {e}"),
    }

    let (rows, source_tag) = match top_coins_primary.fetch().await {
        Ok(snapshot) if snapshot.is_valid() => (snapshot.rows, "primary"),
        primary_result => {
            if let Err(e) = &primary_result {
                warn!("top-coins primary adapter call failed: {e}");
            } else {
                warn!("top-coins primary adapter returned no usable rows; trying fallback");
            }
            match top_coins_fallback.fetch().await {
                Ok(snapshot) if snapshot.is_valid() => (snapshot.rows, "fallback"),
                Ok(_) => {
                    warn!("top-coins fallback adapter returned no usable rows; preserving last-good snapshot");
                    return;
                }
                Err(e) => {
                    warn!("top-coins fallback adapter call failed: {e}");
                    return;
                }
            }
        }
    };

    match serde_json::to_vec(&rows) {
        Ok(blob) => {
            let record = CachedRecord::blob(IndexKind::TopCoinsSnapshot, "top_coins", source_tag, blob, settings.ttl_coin_secs);
            if let Err(e) = store.upsert(&record) {
                warn!("failed to persist top-coins snapshot: {e}");
            }
        }
        Err(e) => warn!("failed to encode top-coins snapshot: {e}"),
    }
}
