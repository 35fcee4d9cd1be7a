//! End-to-end test of the streaming transport: a real client connects over
//! a loopback `TcpListener`, receives the initial push, exercises both
//! control-message forms, and gets an on-demand snapshot.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use market_index_service::cache::{CacheStore, SqliteCacheStore};
use market_index_service::config::Settings;
use market_index_service::dispatcher;
use market_index_service::models::{CachedRecord, IndexKind, ScalarReading};
use market_index_service::stream::{self, StreamState};
use rust_decimal_macros::dec;
use tokio_tungstenite::tungstenite::Message as WsMessage;

fn test_settings() -> Settings {
    Settings {
        listen_addr: "127.0.0.1:0".to_string(),
        db_path: ":memory:".to_string(),
        general_update_interval_sec: 300,
        dashboard_refresh_interval_sec: 1,
        loop_b_dashboard_interval_sec: 1,
        websocket_enabled: true,
        dispatch_timeout_secs: 3,
        ws_ping_interval_secs: 20,
        ws_pong_timeout_secs: 10,
        ws_close_timeout_secs: 1,
        ttl_upbit_secs: 300,
        ttl_global_secs: 300,
        ttl_fx_secs: 300,
        ttl_coin_secs: 60,
        composite_scrape_url_primary: "https://example.invalid/primary".to_string(),
        composite_scrape_url_alt: "https://example.invalid/alt".to_string(),
        global_crypto_api_base: "https://example.invalid/global".to_string(),
        top_coins_fallback_url: "https://example.invalid/coins".to_string(),
        fx_realtime_api_key: None,
        fx_daily_url: "https://example.invalid/fx".to_string(),
    }
}

#[tokio::test]
async fn client_receives_initial_push_and_control_messages_work() {
    let settings = Arc::new(test_settings());

    let store: Arc<dyn CacheStore> = Arc::new(SqliteCacheStore::open_in_memory().unwrap());
    store
        .upsert(&CachedRecord::scalar(
            IndexKind::FxRate,
            "USD_KRW",
            ScalarReading::new(dec!(1400), dec!(5), dec!(0.3)),
            300,
        ))
        .unwrap();
    store
        .upsert(&CachedRecord::scalar(
            IndexKind::UpbitComposite,
            "ubci",
            ScalarReading::new(dec!(18000.5), dec!(150.3), dec!(0.84)),
            300,
        ))
        .unwrap();

    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let (dispatcher_handle, _dashboard) = dispatcher::spawn(settings.clone(), store.clone(), shutdown_rx);

    let app = stream::build_router(StreamState {
        dispatcher: dispatcher_handle,
        settings: settings.clone(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
            .await
            .unwrap();
    });

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await.unwrap();

    let initial = tokio::time::timeout(Duration::from_secs(3), ws.next())
        .await
        .expect("initial push within timeout")
        .expect("stream not closed")
        .expect("valid frame");
    let initial_text = initial.into_text().unwrap();
    let initial_json: serde_json::Value = serde_json::from_str(&initial_text).unwrap();
    assert_eq!(initial_json["type"], "indices_updated");
    assert_eq!(initial_json["data"]["usd_krw"]["value"], 1400.0);
    assert_eq!(initial_json["data"]["upbit"]["ubci"]["value"], 18000.5);

    ws.send(WsMessage::Text("ping".to_string())).await.unwrap();
    let pong = tokio::time::timeout(Duration::from_secs(3), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(pong.into_text().unwrap(), "pong");

    ws.send(WsMessage::Text(
        r#"{"type":"client_info","page":"dashboard","requested_interval":1}"#.to_string(),
    ))
    .await
    .unwrap();

    ws.send(WsMessage::Text("get_latest".to_string())).await.unwrap();
    let on_demand = tokio::time::timeout(Duration::from_secs(3), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let on_demand_json: serde_json::Value = serde_json::from_str(&on_demand.into_text().unwrap()).unwrap();
    assert_eq!(on_demand_json["type"], "indices_updated");

    ws.close(None).await.unwrap();
}
