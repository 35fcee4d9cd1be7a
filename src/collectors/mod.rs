//! Collector Loops: long-lived schedulers that periodically drive
//! adapters and write to the Cache Store. Own no long-lived state
//! beyond their own schedule cursors.

mod composite_loop;
mod global_topcoins_loop;

pub use composite_loop::run_composite_loop;
pub use global_topcoins_loop::run_global_topcoins_loop;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::DISPATCH_TICK_SEC;

/// Cheap, frequently-read flag the Dispatcher updates whenever its client
/// set changes, and collector loops poll once per tick slice. Avoids
/// collector loops needing a borrow of the Dispatcher's client set.
#[derive(Default)]
pub struct DashboardActivity {
    active: AtomicBool,
}

impl DashboardActivity {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }
}

/// Sleeps for `total`, but in slices of `DISPATCH_TICK_SEC` so a
/// dashboard-active transition mid-sleep is observed and the sleep exits
/// early. Returns early also on shutdown.
pub async fn sleep_with_dashboard_watch(
    total: Duration,
    dashboard: &DashboardActivity,
    was_dashboard_active_at_start: bool,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let tick = Duration::from_secs(DISPATCH_TICK_SEC);
    let deadline = Instant::now() + total;

    loop {
        if *shutdown.borrow() {
            return;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }

        let slice = remaining.min(tick);
        tokio::select! {
            _ = tokio::time::sleep(slice) => {}
            _ = shutdown.changed() => return,
        }

        if dashboard.is_active() != was_dashboard_active_at_start {
            debug!("dashboard-active transition observed mid-sleep, re-evaluating schedule");
            return;
        }
    }
}
