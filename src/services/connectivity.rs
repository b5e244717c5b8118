use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use log::{debug, info, warn};
use reqwest::Client;
use tokio::time::{timeout, Duration};

use crate::config::ConnectivityConfig;

/// Serving mode derived from recent reachability probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Online,
    /// At least one probe failed recently; fetching is still attempted.
    Degraded,
    /// The data source is considered unreachable; no network calls are made.
    Offline,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectivityState::Online => "online",
            ConnectivityState::Degraded => "degraded",
            ConnectivityState::Offline => "offline",
        };
        f.write_str(label)
    }
}

/// Pure transition logic, separated from probing so it can be tested without
/// I/O. One failure demotes ONLINE to DEGRADED; `offline_threshold`
/// consecutive failures demote to OFFLINE; any success restores ONLINE.
#[derive(Debug)]
pub struct ConnectivityTracker {
    state: ConnectivityState,
    consecutive_failures: u32,
    offline_threshold: u32,
}

impl ConnectivityTracker {
    pub fn new(offline_threshold: u32) -> Self {
        Self {
            state: ConnectivityState::Online,
            consecutive_failures: 0,
            offline_threshold: offline_threshold.max(1),
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn record_success(&mut self) -> ConnectivityState {
        self.consecutive_failures = 0;
        self.state = ConnectivityState::Online;
        self.state
    }

    pub fn record_failure(&mut self) -> ConnectivityState {
        self.consecutive_failures += 1;
        self.state = if self.consecutive_failures >= self.offline_threshold {
            ConnectivityState::Offline
        } else {
            ConnectivityState::Degraded
        };
        self.state
    }
}

/// Tracks reachability of the market-data source.
///
/// The monitor is polled lazily (before each batch fetch) rather than on a
/// background timer, and each probe is bounded by a short timeout so a hung
/// connection can never stall the offline fallback path. A manual offline
/// override is available for forced offline sessions.
pub struct ConnectivityMonitor {
    client: Client,
    config: ConnectivityConfig,
    tracker: Mutex<ConnectivityTracker>,
    forced_offline: AtomicBool,
}

impl ConnectivityMonitor {
    pub fn new(client: Client, config: ConnectivityConfig) -> Self {
        let tracker = ConnectivityTracker::new(config.offline_threshold);
        Self {
            client,
            config,
            tracker: Mutex::new(tracker),
            forced_offline: AtomicBool::new(false),
        }
    }

    /// Run one reachability probe and return the resulting state. With no
    /// probe URL configured the last known state is returned unchanged.
    pub async fn check(&self) -> ConnectivityState {
        if self.forced_offline.load(Ordering::SeqCst) {
            return ConnectivityState::Offline;
        }

        let Some(url) = self.config.probe_url.as_deref() else {
            return self.tracker.lock().unwrap().state();
        };

        let probe_timeout = Duration::from_secs(self.config.probe_timeout_secs);
        let reachable = matches!(
            timeout(probe_timeout, self.client.head(url).send()).await,
            Ok(Ok(_))
        );

        let mut tracker = self.tracker.lock().unwrap();
        let before = tracker.state();
        let after = if reachable {
            tracker.record_success()
        } else {
            tracker.record_failure()
        };

        if before != after {
            match after {
                ConnectivityState::Online => info!("connectivity restored: online"),
                ConnectivityState::Degraded => warn!("probe failed, connectivity degraded"),
                ConnectivityState::Offline => warn!("connectivity lost, switching to offline serving"),
            }
        } else {
            debug!("connectivity probe: {}", after);
        }
        after
    }

    /// Current state without probing.
    pub fn state(&self) -> ConnectivityState {
        if self.forced_offline.load(Ordering::SeqCst) {
            return ConnectivityState::Offline;
        }
        self.tracker.lock().unwrap().state()
    }

    /// A successful data fetch is as good as a probe.
    pub fn mark_online(&self) {
        let mut tracker = self.tracker.lock().unwrap();
        if tracker.state() != ConnectivityState::Online {
            info!("fetch succeeded, promoting connectivity to online");
        }
        tracker.record_success();
    }

    /// Manual offline toggle. While set, `check` and `state` report OFFLINE
    /// and no probes are issued.
    pub fn set_offline(&self, offline: bool) {
        self.forced_offline.store(offline, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_failure_degrades_threshold_failures_go_offline() {
        let mut tracker = ConnectivityTracker::new(3);
        assert_eq!(tracker.state(), ConnectivityState::Online);

        assert_eq!(tracker.record_failure(), ConnectivityState::Degraded);
        assert_eq!(tracker.record_failure(), ConnectivityState::Degraded);
        assert_eq!(tracker.record_failure(), ConnectivityState::Offline);
        // Further failures stay offline.
        assert_eq!(tracker.record_failure(), ConnectivityState::Offline);
    }

    #[test]
    fn any_success_restores_online_immediately() {
        let mut tracker = ConnectivityTracker::new(3);
        tracker.record_failure();
        tracker.record_failure();
        tracker.record_failure();
        assert_eq!(tracker.state(), ConnectivityState::Offline);

        assert_eq!(tracker.record_success(), ConnectivityState::Online);
        // The failure streak reset with the success.
        assert_eq!(tracker.record_failure(), ConnectivityState::Degraded);
    }

    fn probeless_monitor() -> ConnectivityMonitor {
        let config = ConnectivityConfig {
            probe_url: None,
            ..ConnectivityConfig::default()
        };
        ConnectivityMonitor::new(Client::new(), config)
    }

    #[tokio::test]
    async fn forced_offline_overrides_probes_and_state() {
        let monitor = probeless_monitor();
        assert_eq!(monitor.state(), ConnectivityState::Online);

        monitor.set_offline(true);
        assert_eq!(monitor.state(), ConnectivityState::Offline);
        assert_eq!(monitor.check().await, ConnectivityState::Offline);

        monitor.set_offline(false);
        assert_eq!(monitor.state(), ConnectivityState::Online);
    }

    #[tokio::test]
    async fn probeless_check_keeps_last_known_state() {
        let monitor = probeless_monitor();
        assert_eq!(monitor.check().await, ConnectivityState::Online);
        monitor.mark_online();
        assert_eq!(monitor.check().await, ConnectivityState::Online);
    }
}
