//! Stream availability probing.
//!
//! One task polls the stream URL on a fixed interval and reports
//! [`StreamAvailability`] into the coordinator loop.  Every result is tagged
//! with the epoch current at spawn read time; the coordinator drops results
//! whose epoch is stale, so a probe that straddles a reload can never
//! overwrite fresher state.

use radio_core::status::{StreamAvailability, MSG_STREAM_RETRYING};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::coordinator::CoordinatorEvent;

pub struct StreamProber {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    timeout: Duration,
    epoch: Arc<AtomicU64>,
}

/// Channel for on-demand probes, e.g. right after connectivity recovers.
pub type ProbeTrigger = mpsc::Sender<()>;

impl StreamProber {
    pub fn new(url: String, interval: Duration, timeout: Duration, epoch: Arc<AtomicU64>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            interval,
            timeout,
            epoch,
        }
    }

    /// Start the polling loop.  Probes immediately, then on every interval
    /// tick or trigger, whichever fires first.
    pub fn spawn(self, event_tx: mpsc::Sender<CoordinatorEvent>) -> (ProbeTrigger, AbortHandle) {
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(4);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    triggered = trigger_rx.recv() => {
                        if triggered.is_none() {
                            break;
                        }
                        // A triggered probe resets the cadence.
                        ticker.reset();
                    }
                }

                let epoch = self.epoch.load(Ordering::Acquire);
                let availability =
                    probe_once(&self.client, &self.url, self.timeout).await;
                if event_tx
                    .send(CoordinatorEvent::Probe {
                        epoch,
                        availability,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        (trigger_tx, task.abort_handle())
    }
}

/// One GET against the stream URL.  Success is judged on the response status
/// alone; the body is an endless stream and is never read.  Failures carry
/// the canonical off-the-air message, never transport text; the technical
/// cause goes to the log only.
pub async fn probe_once(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> StreamAvailability {
    let result = client.get(url).timeout(timeout).send().await;
    match result {
        Ok(resp) if resp.status().is_success() => {
            debug!("probe: stream reachable ({})", resp.status());
            StreamAvailability::online()
        }
        Ok(resp) => {
            warn!("probe: stream answered {}", resp.status());
            StreamAvailability::offline(MSG_STREAM_RETRYING)
        }
        Err(e) if e.is_timeout() => {
            warn!("probe: timed out after {:?}", timeout);
            StreamAvailability::offline(MSG_STREAM_RETRYING)
        }
        Err(e) => {
            warn!("probe: request failed: {}", e);
            StreamAvailability::offline(MSG_STREAM_RETRYING)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio_core::status::StreamHealth;

    #[tokio::test]
    async fn unreachable_stream_carries_the_canonical_message() {
        // Port 1 refuses connections locally; nothing leaves the host.
        let client = reqwest::Client::new();
        let availability = probe_once(
            &client,
            "http://127.0.0.1:1/stream",
            Duration::from_millis(250),
        )
        .await;

        assert_eq!(availability.health, StreamHealth::Offline);
        assert_eq!(
            availability.last_error.as_deref(),
            Some(MSG_STREAM_RETRYING)
        );
    }
}
