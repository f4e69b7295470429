//! Client-side surface over the coordinator loop.
//!
//! Cheap to clone; commands go in through the event channel, status comes
//! back through the watch channel.  `snapshot()` never blocks and never
//! yields "no status": the watch always holds the latest resolved value.

use tokio::sync::{mpsc, watch};

use crate::coordinator::{Command, CoordinatorEvent, NotificationAction, StatusSnapshot};

#[derive(Clone)]
pub struct CoordinatorHandle {
    events: mpsc::Sender<CoordinatorEvent>,
    status: watch::Receiver<StatusSnapshot>,
}

impl CoordinatorHandle {
    pub(crate) fn new(
        events: mpsc::Sender<CoordinatorEvent>,
        status: watch::Receiver<StatusSnapshot>,
    ) -> Self {
        Self { events, status }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    /// Receiver that resolves whenever the published status changes.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    pub async fn toggle_playback(&self) -> bool {
        self.send(Command::TogglePlayback).await
    }

    pub async fn toggle_mute(&self) -> bool {
        self.send(Command::ToggleMute).await
    }

    /// Volume in `0.0..=1.0`; no-op while no session is live.
    pub async fn set_volume(&self, volume: f32) -> bool {
        self.send(Command::SetVolume(volume)).await
    }

    pub async fn reload(&self) -> bool {
        self.send(Command::Reload).await
    }

    pub async fn set_notifications_enabled(&self, enabled: bool) -> bool {
        self.send(Command::SetNotificationsEnabled(enabled)).await
    }

    pub async fn request_permissions(&self) -> bool {
        self.send(Command::RequestPermissions).await
    }

    pub async fn stop(&self) -> bool {
        self.send(Command::Stop).await
    }

    /// Tell the loop the host is foregrounded again; forces a fresh probe.
    pub async fn app_foregrounded(&self) -> bool {
        self.events
            .send(CoordinatorEvent::AppForeground)
            .await
            .is_ok()
    }

    /// Route a presence-notification button press into the loop.
    pub async fn notification_action(&self, action: NotificationAction) -> bool {
        self.events
            .send(CoordinatorEvent::NotificationAction(action))
            .await
            .is_ok()
    }

    async fn send(&self, cmd: Command) -> bool {
        self.events
            .send(CoordinatorEvent::Command(cmd))
            .await
            .is_ok()
    }
}
