//! Dispatcher: owns the client set and the `last_dispatch_at` table,
//! decides which clients receive an update on each tick, assembles the
//! snapshot, and hands it to connected clients.
//!
//! Single-owner-task discipline: all mutable state below lives
//! inside [`run`]; every other component talks to it only through
//! [`DispatcherHandle`] and its command channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::collectors::DashboardActivity;
use crate::config::{DynamicSettings, Settings};
use crate::models::{
    CachedRecord, ClientId, ClientSession, CoinRow, IndexKind, MarketSnapshot, PageCadencePolicy, PageClass,
};
use crate::models::wire::build_indices_updated;

const NO_ENABLED_CLIENT_WAIT: Duration = Duration::from_secs(10);
const MIN_WAIT: Duration = Duration::from_millis(100);

/// Per-client outbound channel. Bounded at one slot: a client that
/// doesn't drain its previous message makes the next `send` block, which
/// is exactly the behavior the per-dispatch timeout guards against.
pub type ClientOutbox = mpsc::Sender<Arc<Value>>;

enum DispatcherCommand {
    Connect {
        id: ClientId,
        remote: String,
        outbox: ClientOutbox,
    },
    Register {
        id: ClientId,
        page: String,
        requested_interval: Option<u64>,
    },
    GetLatest {
        id: ClientId,
    },
    Disconnect {
        id: ClientId,
    },
}

/// Cloneable front door to a running Dispatcher task.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<DispatcherCommand>,
}

impl DispatcherHandle {
    pub async fn connect(&self, id: ClientId, remote: String, outbox: ClientOutbox) {
        let _ = self.tx.send(DispatcherCommand::Connect { id, remote, outbox }).await;
    }

    pub async fn register(&self, id: ClientId, page: String, requested_interval: Option<u64>) {
        let _ = self.tx.send(DispatcherCommand::Register { id, page, requested_interval }).await;
    }

    pub async fn get_latest(&self, id: ClientId) {
        let _ = self.tx.send(DispatcherCommand::GetLatest { id }).await;
    }

    pub async fn disconnect(&self, id: ClientId) {
        let _ = self.tx.send(DispatcherCommand::Disconnect { id }).await;
    }
}

struct ConnectedClient {
    session: ClientSession,
    outbox: ClientOutbox,
}

/// Spawns the Dispatcher task and returns a handle to it plus the shared
/// `DashboardActivity` flag collector loops should poll.
pub fn spawn(
    settings: Arc<Settings>,
    store: Arc<dyn CacheStore>,
    shutdown: tokio::sync::watch::Receiver<bool>,
) -> (DispatcherHandle, Arc<DashboardActivity>) {
    let (tx, rx) = mpsc::channel(256);
    let dashboard = Arc::new(DashboardActivity::default());
    let dashboard_for_task = dashboard.clone();

    tokio::spawn(run(settings, store, rx, dashboard_for_task, shutdown));

    (DispatcherHandle { tx }, dashboard)
}

async fn run(
    settings: Arc<Settings>,
    store: Arc<dyn CacheStore>,
    mut commands: mpsc::Receiver<DispatcherCommand>,
    dashboard: Arc<DashboardActivity>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    info!("dispatcher starting");

    let mut clients: HashMap<ClientId, ConnectedClient> = HashMap::new();
    let mut last_dispatch_at: HashMap<PageClass, DateTime<Utc>> = HashMap::new();
    let mut policy = PageCadencePolicy::with_dashboard_interval(settings.dashboard_refresh_interval_sec);
    // Set once a connected client requests a custom Dashboard interval;
    // while set, the per-tick settings-table read no longer overwrites the
    // Dashboard base interval, so the client's explicit request sticks.
    let mut dashboard_interval_overridden = false;

    // Startup: force a dispatch to every enabled class once a client exists,
    // by leaving last_dispatch_at empty so the first wait computes to zero.

    loop {
        if *shutdown.borrow() {
            break;
        }

        // Re-read every tick rather than caching, so an operator's write to
        // the settings table takes effect on the next cycle without a restart.
        let dynamic = DynamicSettings::read(store.as_ref(), &settings);
        if !dashboard_interval_overridden {
            policy.set_dashboard_interval(dynamic.dashboard_refresh_interval_sec);
        }

        let wait = compute_wait(&clients, &last_dispatch_at, &policy);

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                dispatch_tick(&settings, &dynamic, &store, &mut clients, &mut last_dispatch_at, &policy).await;
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(cmd) => {
                        handle_command(
                            cmd,
                            &settings,
                            &dynamic,
                            &store,
                            &mut clients,
                            &mut policy,
                            &dashboard,
                            &mut dashboard_interval_overridden,
                        )
                        .await
                    }
                    None => break,
                }
            }
            _ = shutdown.changed() => break,
        }

        dashboard.set(clients.values().any(|c| c.session.page_class == PageClass::Dashboard));
    }

    info!("dispatcher stopped");
}

async fn handle_command(
    cmd: DispatcherCommand,
    settings: &Arc<Settings>,
    dynamic: &DynamicSettings,
    store: &Arc<dyn CacheStore>,
    clients: &mut HashMap<ClientId, ConnectedClient>,
    policy: &mut PageCadencePolicy,
    dashboard: &Arc<DashboardActivity>,
    dashboard_interval_overridden: &mut bool,
) {
    match cmd {
        DispatcherCommand::Connect { id, remote, outbox } => {
            let mut session = ClientSession::new(remote);
            session.id = id;
            clients.insert(id, ConnectedClient { session, outbox });
            send_snapshot_to_one(settings, dynamic, store, clients, id).await;
        }
        DispatcherCommand::Register { id, page, requested_interval } => {
            if let Some(client) = clients.get_mut(&id) {
                client.session.page_class = PageClass::classify(&page);
                client.session.requested_interval_sec = requested_interval;
                if let Some(requested) = requested_interval {
                    if client.session.page_class == PageClass::Dashboard {
                        policy.set_dashboard_interval(requested.max(crate::config::MIN_DISPATCH_SEC));
                        *dashboard_interval_overridden = true;
                    }
                }
            }
            dashboard.set(clients.values().any(|c| c.session.page_class == PageClass::Dashboard));
        }
        DispatcherCommand::GetLatest { id } => {
            send_snapshot_to_one(settings, dynamic, store, clients, id).await;
        }
        DispatcherCommand::Disconnect { id } => {
            clients.remove(&id);
            debug!(client_id = %id, "client disconnected, evicted from dispatcher");
        }
    }
}

fn compute_wait(
    clients: &HashMap<ClientId, ConnectedClient>,
    last_dispatch_at: &HashMap<PageClass, DateTime<Utc>>,
    policy: &PageCadencePolicy,
) -> Duration {
    let now = Utc::now();
    let mut min_wait: Option<Duration> = None;

    for class in PageClass::ALL {
        let class_policy = policy.get(class);
        if !class_policy.enabled {
            continue;
        }
        if !clients.values().any(|c| c.session.page_class == class) {
            continue;
        }

        let interval = Duration::from_secs(class_policy.base_interval_sec);
        let remaining = match last_dispatch_at.get(&class) {
            Some(last) => {
                let elapsed = now.signed_duration_since(*last).to_std().unwrap_or(Duration::ZERO);
                interval.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        };

        min_wait = Some(min_wait.map_or(remaining, |w: Duration| w.min(remaining)));
    }

    min_wait.map(|w| w.max(MIN_WAIT)).unwrap_or(NO_ENABLED_CLIENT_WAIT)
}

async fn dispatch_tick(
    settings: &Arc<Settings>,
    dynamic: &DynamicSettings,
    store: &Arc<dyn CacheStore>,
    clients: &mut HashMap<ClientId, ConnectedClient>,
    last_dispatch_at: &mut HashMap<PageClass, DateTime<Utc>>,
    policy: &PageCadencePolicy,
) {
    if !dynamic.websocket_enabled {
        return;
    }

    let now = Utc::now();

    for class in PageClass::ALL {
        let class_policy = policy.get(class);
        if !class_policy.enabled {
            continue;
        }

        let member_ids: Vec<ClientId> = clients
            .iter()
            .filter(|(_, c)| c.session.page_class == class)
            .map(|(id, _)| *id)
            .collect();
        if member_ids.is_empty() {
            continue;
        }

        let interval = Duration::from_secs(class_policy.base_interval_sec);
        let due = match last_dispatch_at.get(&class) {
            Some(last) => now.signed_duration_since(*last).to_std().unwrap_or(Duration::MAX) >= interval,
            None => true,
        };
        if !due {
            continue;
        }

        let snapshot = match build_snapshot(store) {
            Ok(s) => s,
            Err(e) => {
                warn!("skipping dispatch tick for {class:?}: failed to build snapshot: {e}");
                continue;
            }
        };

        let message = Arc::new(build_indices_updated(&snapshot, None));

        let mut evicted = Vec::new();
        for id in member_ids {
            if let Some(client) = clients.get(&id) {
                let sent = matches!(
                    tokio::time::timeout(settings.dispatch_timeout(), client.outbox.send(message.clone())).await,
                    Ok(Ok(()))
                );
                if !sent {
                    evicted.push(id);
                }
            }
        }
        for id in evicted {
            warn!(client_id = %id, "evicting client after send timeout/failure");
            clients.remove(&id);
        }

        last_dispatch_at.insert(class, now);
    }
}

async fn send_snapshot_to_one(
    settings: &Arc<Settings>,
    dynamic: &DynamicSettings,
    store: &Arc<dyn CacheStore>,
    clients: &mut HashMap<ClientId, ConnectedClient>,
    id: ClientId,
) {
    if !dynamic.websocket_enabled {
        return;
    }
    let Some(client) = clients.get(&id) else { return };

    let snapshot = match build_snapshot(store) {
        Ok(s) => s,
        Err(e) => {
            warn!("failed to build snapshot for client {id}: {e}");
            return;
        }
    };

    let message = Arc::new(build_indices_updated(&snapshot, None));
    let sent = matches!(
        tokio::time::timeout(settings.dispatch_timeout(), client.outbox.send(message)).await,
        Ok(Ok(()))
    );
    if !sent {
        warn!(client_id = %id, "evicting client after failed initial/on-demand send");
        clients.remove(&id);
    }
}

/// Builds a [`MarketSnapshot`] from the freshest Cache Store records.
/// Top-coins prefers `source_tag="primary"`, falling back to `"fallback"`
/// if absent or empty.
fn build_snapshot(store: &Arc<dyn CacheStore>) -> anyhow::Result<MarketSnapshot> {
    let mut snapshot = MarketSnapshot::empty();

    for record in store.get_by_kind(IndexKind::UpbitComposite)? {
        if let Some(scalar) = record.scalar {
            snapshot.upbit.insert(record.code, scalar);
        }
    }

    for record in store.get_by_kind(IndexKind::GlobalCrypto)? {
        if let Some(scalar) = record.scalar {
            snapshot.global.insert(record.code, scalar);
        }
    }

    if let Some(record) = store.get(IndexKind::FxRate, "USD_KRW", None)? {
        if let Some(scalar) = record.scalar {
            snapshot.fx = scalar;
        }
    }

    let top_coins_record = match store.get_by_code_and_source("top_coins", "primary")? {
        Some(record) if record.payload_blob.as_ref().is_some_and(|b| !b.is_empty()) => Some(record),
        _ => store.get_by_code_and_source("top_coins", "fallback")?,
    };

    if let Some(record) = top_coins_record {
        if let Some(blob) = record.payload_blob {
            snapshot.top_coins = serde_json::from_slice::<Vec<CoinRow>>(&blob).unwrap_or_default();
        }
    }

    snapshot.generated_at = Utc::now();
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SqliteCacheStore;
    use rust_decimal_macros::dec;

    #[test]
    fn compute_wait_is_idle_floor_with_no_clients() {
        let clients = HashMap::new();
        let last_dispatch_at = HashMap::new();
        let policy = PageCadencePolicy::with_dashboard_interval(5);
        assert_eq!(compute_wait(&clients, &last_dispatch_at, &policy), NO_ENABLED_CLIENT_WAIT);
    }

    #[tokio::test]
    async fn dispatch_tick_honors_dynamic_websocket_disable_over_static_settings() {
        let mut settings = Settings::parse_from(std::iter::once("market-index-service"));
        settings.websocket_enabled = true;
        let settings = Arc::new(settings);
        let store: Arc<dyn CacheStore> = Arc::new(SqliteCacheStore::open_in_memory().unwrap());

        let dynamic = DynamicSettings { websocket_enabled: false, ..DynamicSettings::read(store.as_ref(), &settings) };

        let (outbox, mut inbox) = mpsc::channel(1);
        let mut clients = HashMap::new();
        let id = ClientId::new_v4();
        clients.insert(
            id,
            ConnectedClient { session: ClientSession::new("127.0.0.1:9"), outbox },
        );
        clients.get_mut(&id).unwrap().session.page_class = PageClass::Dashboard;

        let mut last_dispatch_at = HashMap::new();
        let policy = PageCadencePolicy::with_dashboard_interval(5);
        dispatch_tick(&settings, &dynamic, &store, &mut clients, &mut last_dispatch_at, &policy).await;

        assert!(inbox.try_recv().is_err(), "no message should be sent while the dynamic flag is off");
    }

    #[tokio::test]
    async fn build_snapshot_prefers_primary_top_coins() {
        let store: Arc<dyn CacheStore> = Arc::new(SqliteCacheStore::open_in_memory().unwrap());
        let primary_rows = vec![CoinRow {
            id: "bitcoin".into(),
            symbol: "btc".into(),
            name: "Bitcoin".into(),
            price_usd: dec!(100),
            change_pct_24h: dec!(0),
            change_pct_7d: None,
            market_cap: None,
            source_tag: "primary".into(),
            sparkline: None,
        }];
        let blob = serde_json::to_vec(&primary_rows).unwrap();
        store
            .upsert(&CachedRecord::blob(IndexKind::TopCoinsSnapshot, "top_coins", "primary", blob, 60))
            .unwrap();
        store
            .upsert(&CachedRecord::blob(IndexKind::TopCoinsSnapshot, "top_coins", "fallback", b"[]".to_vec(), 60))
            .unwrap();

        let snapshot = build_snapshot(&store).unwrap();
        assert_eq!(snapshot.top_coins.len(), 1);
        assert_eq!(snapshot.top_coins[0].source_tag, "primary");
    }
}
