//! Client classification and per-page cadence policy.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Closed set of page classes plus the `Unknown` catch-all — a tagged
/// variant instead of a dictionary with a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageClass {
    Dashboard,
    Other,
    Unknown,
}

impl PageClass {
    /// Unknown page strings collapse to `Unknown`.
    pub fn classify(page: &str) -> Self {
        match page {
            "dashboard" => PageClass::Dashboard,
            "other" => PageClass::Other,
            _ => PageClass::Unknown,
        }
    }

    pub const ALL: [PageClass; 3] = [PageClass::Dashboard, PageClass::Other, PageClass::Unknown];
}

/// Process-wide `page_class → policy` table. A total function over
/// `PageClass`.
#[derive(Debug, Clone)]
pub struct CadencePolicy {
    pub enabled: bool,
    pub base_interval_sec: u64,
    pub description: &'static str,
}

#[derive(Debug, Clone)]
pub struct PageCadencePolicy {
    table: HashMap<PageClass, CadencePolicy>,
}

impl PageCadencePolicy {
    /// `dashboard_interval_sec` is the (possibly config-overridden)
    /// Dashboard base interval.
    pub fn with_dashboard_interval(dashboard_interval_sec: u64) -> Self {
        let mut table = HashMap::new();
        table.insert(
            PageClass::Dashboard,
            CadencePolicy {
                enabled: true,
                base_interval_sec: dashboard_interval_sec,
                description: "live dashboard view",
            },
        );
        table.insert(
            PageClass::Other,
            CadencePolicy {
                enabled: false,
                base_interval_sec: 0,
                description: "non-dashboard page, no push cadence",
            },
        );
        table.insert(
            PageClass::Unknown,
            CadencePolicy {
                enabled: false,
                base_interval_sec: 0,
                description: "unrecognized page class",
            },
        );
        Self { table }
    }

    pub fn get(&self, class: PageClass) -> &CadencePolicy {
        self.table
            .get(&class)
            .expect("PageCadencePolicy is a total function over PageClass")
    }

    pub fn set_dashboard_interval(&mut self, seconds: u64) {
        if let Some(policy) = self.table.get_mut(&PageClass::Dashboard) {
            policy.base_interval_sec = seconds;
        }
    }
}

pub type ClientId = Uuid;

/// Dispatcher-owned per-connection record. `last_dispatch_at` is
/// deliberately *not* here — it is held globally per page class, not per
/// session, so a late joiner doesn't immediately get a send.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub id: ClientId,
    pub remote: String,
    pub page_class: PageClass,
    pub connected_at: DateTime<Utc>,
    pub requested_interval_sec: Option<u64>,
}

impl ClientSession {
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote: remote.into(),
            page_class: PageClass::Unknown,
            connected_at: Utc::now(),
            requested_interval_sec: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_page_collapses_to_unknown() {
        assert_eq!(PageClass::classify("dashboard"), PageClass::Dashboard);
        assert_eq!(PageClass::classify("admin"), PageClass::Unknown);
        assert_eq!(PageClass::classify(""), PageClass::Unknown);
    }

    #[test]
    fn unknown_and_other_disabled_by_default() {
        let policy = PageCadencePolicy::with_dashboard_interval(5);
        assert!(policy.get(PageClass::Dashboard).enabled);
        assert!(!policy.get(PageClass::Other).enabled);
        assert!(!policy.get(PageClass::Unknown).enabled);
    }
}
