//! Connectivity monitoring.
//!
//! Samples the host link state periodically and feeds [`LinkSnapshot`]s into
//! the coordinator loop.  Snapshots are replaced wholesale; the quality
//! classification itself lives in `radio_core::status`.

use radio_core::status::{CellularGeneration, LinkSnapshot, LinkType};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::coordinator::CoordinatorEvent;

/// Endpoint expected to answer 204 with no body.  Only reachability matters;
/// the response is discarded.
const REACHABILITY_URL: &str = "http://connectivitycheck.gstatic.com/generate_204";
const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(3);

/// Map a kernel interface name onto a link class.  Wired interfaces get the
/// wifi quality class: a cable is at least as good as a strong access point.
pub fn classify_interface(name: &str) -> Option<LinkType> {
    if name.starts_with("lo") {
        return None;
    }
    if name.starts_with("wl") {
        return Some(LinkType::Wifi);
    }
    if name.starts_with("ww") || name.starts_with("rmnet") {
        return Some(LinkType::Cellular);
    }
    if name.starts_with("en") || name.starts_with("eth") {
        return Some(LinkType::Wifi);
    }
    Some(LinkType::Unknown)
}

pub fn snapshot_from(link: Option<LinkType>, reachable: bool) -> LinkSnapshot {
    match link {
        None => LinkSnapshot::disconnected(),
        Some(link) => LinkSnapshot {
            is_connected: true,
            is_internet_reachable: Some(reachable),
            link,
            // The kernel does not expose signal strength or cellular
            // generation here; quality falls back to the per-link default.
            wifi_strength: None,
            cellular_generation: (link == LinkType::Cellular).then_some(CellularGeneration::FourG),
        },
    }
}

pub struct NetworkMonitor {
    client: reqwest::Client,
    interval: Duration,
}

impl NetworkMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            interval,
        }
    }

    /// Start the sampling loop.  Emits a snapshot only when it differs from
    /// the previous one; the first sample is always emitted.
    pub fn spawn(self, event_tx: mpsc::Sender<CoordinatorEvent>) -> AbortHandle {
        let task = tokio::spawn(async move {
            let mut previous: Option<LinkSnapshot> = None;
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let snapshot = self.sample().await;
                if previous.as_ref() != Some(&snapshot) {
                    debug!("network: link changed: {:?}", snapshot);
                    previous = Some(snapshot.clone());
                    if event_tx
                        .send(CoordinatorEvent::Link(snapshot))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        });
        task.abort_handle()
    }

    async fn sample(&self) -> LinkSnapshot {
        let link = active_link();
        if link.is_none() {
            return LinkSnapshot::disconnected();
        }
        let reachable = self.check_reachability().await;
        snapshot_from(link, reachable)
    }

    async fn check_reachability(&self) -> bool {
        let request = self
            .client
            .get(REACHABILITY_URL)
            .timeout(REACHABILITY_TIMEOUT)
            .send();
        match request.await {
            Ok(resp) => resp.status().is_success() || resp.status().as_u16() == 204,
            Err(e) => {
                debug!("network: reachability check failed: {}", e);
                false
            }
        }
    }
}

/// The link class of the first interface that is operationally up, if any.
#[cfg(unix)]
fn active_link() -> Option<LinkType> {
    let entries = match std::fs::read_dir("/sys/class/net") {
        Ok(entries) => entries,
        Err(e) => {
            warn!("network: cannot enumerate interfaces: {}", e);
            return Some(LinkType::Unknown);
        }
    };

    let mut fallback = None;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(link) = classify_interface(&name) else {
            continue;
        };
        let operstate = std::fs::read_to_string(entry.path().join("operstate"))
            .unwrap_or_default();
        if operstate.trim() != "up" {
            continue;
        }
        // Prefer a classified link over Unknown when several are up.
        if link != LinkType::Unknown {
            return Some(link);
        }
        fallback = Some(link);
    }
    fallback
}

#[cfg(not(unix))]
fn active_link() -> Option<LinkType> {
    // No interface enumeration on this platform; reachability decides.
    Some(LinkType::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio_core::status::{ConnectivityState, NetworkQuality};

    #[test]
    fn interface_classification() {
        assert_eq!(classify_interface("wlan0"), Some(LinkType::Wifi));
        assert_eq!(classify_interface("wlp3s0"), Some(LinkType::Wifi));
        assert_eq!(classify_interface("wwan0"), Some(LinkType::Cellular));
        assert_eq!(classify_interface("eth0"), Some(LinkType::Wifi));
        assert_eq!(classify_interface("enp5s0"), Some(LinkType::Wifi));
        assert_eq!(classify_interface("lo"), None);
        assert_eq!(classify_interface("tun0"), Some(LinkType::Unknown));
    }

    #[test]
    fn snapshot_reflects_reachability() {
        let snap = snapshot_from(Some(LinkType::Wifi), true);
        let conn = ConnectivityState::from_snapshot(&snap);
        assert!(conn.is_online());

        let snap = snapshot_from(Some(LinkType::Wifi), false);
        let conn = ConnectivityState::from_snapshot(&snap);
        assert!(!conn.is_online());
        assert_eq!(conn.quality, NetworkQuality::Unavailable);

        let snap = snapshot_from(None, true);
        assert!(!snap.is_connected);
    }

    #[test]
    fn cellular_snapshot_defaults_to_streamable_generation() {
        let snap = snapshot_from(Some(LinkType::Cellular), true);
        let conn = ConnectivityState::from_snapshot(&snap);
        assert_eq!(conn.quality, NetworkQuality::Good);
        assert!(conn.is_suitable_for_streaming());
    }
}
