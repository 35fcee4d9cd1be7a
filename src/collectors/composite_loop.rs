//! Loop A — Composite (Upbit + FX).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::{sleep_with_dashboard_watch, DashboardActivity};
use crate::adapters::{CompositeIndexAdapter, FxFallbackAdapter};
use crate::cache::CacheStore;
use crate::config::{DynamicSettings, Settings};
use crate::models::{CachedRecord, IndexKind};

pub async fn run_composite_loop(
    settings: Arc<Settings>,
    store: Arc<dyn CacheStore>,
    composite: Arc<CompositeIndexAdapter>,
    fx_fallback: Arc<FxFallbackAdapter>,
    dashboard: Arc<DashboardActivity>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    info!("composite collector loop starting");

    loop {
        if *shutdown.borrow() {
            break;
        }

        // Re-read every tick rather than caching, so an operator's write to
        // the settings table takes effect on the next cycle without a restart.
        let dynamic = DynamicSettings::read(store.as_ref(), &settings);
        let dashboard_active = dashboard.is_active();
        let interval = if dashboard_active {
            dynamic.dashboard_refresh_interval_sec
        } else {
            dynamic.general_update_interval_sec
        };

        let tick_started = Instant::now();
        run_composite_tick(&store, &composite, &fx_fallback, &settings).await;

        let elapsed = tick_started.elapsed();
        let sleep_for = Duration::from_secs(interval).saturating_sub(elapsed).max(Duration::from_secs(1));
        sleep_with_dashboard_watch(sleep_for, &dashboard, dashboard_active, shutdown.clone()).await;
    }

    info!("composite collector loop stopped");
}

async fn run_composite_tick(
    store: &Arc<dyn CacheStore>,
    composite: &Arc<CompositeIndexAdapter>,
    fx_fallback: &Arc<FxFallbackAdapter>,
    settings: &Arc<Settings>,
) {
    let snapshot = match composite.fetch().await {
        Ok(s) => s,
        Err(e) => {
            warn!("composite-index adapter call failed: {e}");
            return;
        }
    };

    let valid_indices = snapshot.valid_indices();
    if !valid_indices.is_empty() {
        let records: Vec<CachedRecord> = valid_indices
            .into_iter()
            .map(|(code, reading)| CachedRecord::scalar(IndexKind::UpbitComposite, code, reading, settings.ttl_upbit_secs))
            .collect();

        if let Err(e) = store.upsert_many(&records) {
            warn!("failed to persist composite index records: {e}");
        }
    } else {
        warn!("composite-index adapter returned no valid index reading; preserving last-good records");
    }

    let fx_reading = match snapshot.usd_krw {
        Some(reading) if reading.is_positive() => Some(reading),
        _ => match fx_fallback.fetch().await {
            Ok(reading) if reading.is_positive() => Some(reading),
            Ok(_) => {
                warn!("fx-fallback adapter returned a non-positive reading; preserving last-good record");
                None
            }
            Err(e) => {
                warn!("fx-fallback adapter call failed: {e}");
                None
            }
        },
    };

    if let Some(reading) = fx_reading {
        let record = CachedRecord::scalar(IndexKind::FxRate, "USD_KRW", reading, settings.ttl_fx_secs);
        if let Err(e) = store.upsert(&record) {
            warn!("failed to persist fx record: {e}");
        }
    }
}
