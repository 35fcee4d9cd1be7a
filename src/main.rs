//! Process entry point. Wires one `Service` aggregate — Cache Store,
//! Source Adapters, the two Collector Loops, the Dispatcher, and the
//! Stream Server — with no hidden globals.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use market_index_service::adapters::{
    CompositeIndexAdapter, FxFallbackAdapter, GlobalCryptoAdapter, TopCoinsFallbackAdapter, TopCoinsPrimaryAdapter,
};
use market_index_service::cache::{CacheStore, SqliteCacheStore};
use market_index_service::collectors::{run_composite_loop, run_global_topcoins_loop};
use market_index_service::config::Settings;
use market_index_service::dispatcher;
use market_index_service::stream::{self, StreamState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = Arc::new(Settings::load().context("failed to load configuration")?);
    info!(listen_addr = %settings.listen_addr, db_path = %settings.db_path, "starting market-index service");

    let store: Arc<dyn CacheStore> =
        Arc::new(SqliteCacheStore::open(&settings.db_path).context("failed to open cache store")?);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let (dispatcher_handle, dashboard_activity) = dispatcher::spawn(settings.clone(), store.clone(), shutdown_rx.clone());

    let composite = Arc::new(CompositeIndexAdapter::new(
        settings.composite_scrape_url_primary.clone(),
        settings.composite_scrape_url_alt.clone(),
    ));
    let fx_fallback = Arc::new(FxFallbackAdapter::new(settings.fx_realtime_api_key.clone(), settings.fx_daily_url.clone()));
    let global_crypto = Arc::new(GlobalCryptoAdapter::new(settings.global_crypto_api_base.clone()));
    let top_coins_primary = Arc::new(TopCoinsPrimaryAdapter::new());
    let top_coins_fallback = Arc::new(TopCoinsFallbackAdapter::new(settings.top_coins_fallback_url.clone()));

    tokio::spawn(run_composite_loop(
        settings.clone(),
        store.clone(),
        composite,
        fx_fallback,
        dashboard_activity.clone(),
        shutdown_rx.clone(),
    ));

    tokio::spawn(run_global_topcoins_loop(
        settings.clone(),
        store.clone(),
        global_crypto,
        top_coins_primary,
        top_coins_fallback,
        dashboard_activity,
        shutdown_rx.clone(),
    ));

    let stream_state = StreamState {
        dispatcher: dispatcher_handle,
        settings: settings.clone(),
    };
    let app = stream::build_router(stream_state);

    let listen_addr: SocketAddr = settings.listen_addr.parse().context("invalid STREAM_LISTEN_ADDR")?;
    let listener = tokio::net::TcpListener::bind(listen_addr).await.context("failed to bind listen address")?;
    info!(addr = %listen_addr, "stream server listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(wait_for_shutdown_signal(shutdown_tx, settings.ws_close_timeout()))
        .await
        .context("stream server exited with an error")?;

    Ok(())
}

async fn wait_for_shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<bool>, grace: std::time::Duration) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, stopping loops and draining connections");
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(grace).await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
