//! End-to-end coordinator tests over fake engine and notification backends.
//!
//! The loop is driven with synthetic link, probe and engine events; no
//! monitors run and no real process or network is involved.  Time is paused,
//! so retry delays and cooldowns elapse deterministically.

use radio_coordinator::coordinator::{CoordinatorCore, CoordinatorEvent, StatusSnapshot};
use radio_coordinator::engine::testing::FakeEngineBackend;
use radio_coordinator::engine::{OBS_CORE_IDLE, OBS_PAUSE};
use radio_coordinator::notify::testing::{NotifyLog, RecordingNotifyBackend};
use radio_core::config::Config;
use radio_core::settings::SettingsStore;
use radio_core::status::{
    LinkSnapshot, StatusKind, StreamAvailability, StreamHealth, MSG_LIVE, MSG_RECONNECT_FAILED,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

struct Harness {
    events: mpsc::Sender<CoordinatorEvent>,
    handle: radio_coordinator::CoordinatorHandle,
    status: watch::Receiver<StatusSnapshot>,
    engine: FakeEngineBackend,
    notify_log: Arc<NotifyLog>,
    _dir: tempfile::TempDir,
}

fn store_with(dir: &tempfile::TempDir, json: Option<serde_json::Value>) -> SettingsStore {
    let path = dir.path().join("settings.json");
    if let Some(json) = json {
        std::fs::write(&path, serde_json::to_string(&json).unwrap()).unwrap();
    }
    SettingsStore::load(path)
}

fn harness_with_settings(settings_json: Option<serde_json::Value>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let settings = store_with(&dir, settings_json);

    let engine = FakeEngineBackend::new();
    let notify = RecordingNotifyBackend::new();
    let notify_log = notify.log.clone();

    let core = CoordinatorCore::new(
        Config::default(),
        Box::new(engine.clone()),
        Box::new(notify),
        settings,
    );
    let events = core.event_sender();
    let handle = core.handle();
    let status = handle.subscribe();
    tokio::spawn(core.run());

    Harness {
        events,
        handle,
        status,
        engine,
        notify_log,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with_settings(None)
}

impl Harness {
    async fn send(&self, event: CoordinatorEvent) {
        self.events.send(event).await.unwrap();
    }

    /// Yield until the loop has drained everything already sent.  The paused
    /// clock refuses to auto-advance while blocking-pool work (the settings
    /// file writes) is outstanding, so the sleeps wait that work out instead
    /// of racing past it.
    async fn settle(&self) {
        for _ in 0..64 {
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    async fn go_online(&self) {
        self.send(CoordinatorEvent::Link(LinkSnapshot::wifi(Some(80))))
            .await;
        self.send(CoordinatorEvent::Probe {
            epoch: 0,
            availability: StreamAvailability::online(),
        })
        .await;
    }

    /// Emit the property changes a healthy engine sends once audio flows.
    /// Settles first so the session is registered before the events land.
    async fn engine_reports_playing(&self) {
        self.settle().await;
        self.engine
            .emit(json!({ "event": "property-change", "id": OBS_PAUSE, "data": false }))
            .await;
        self.engine
            .emit(json!({ "event": "property-change", "id": OBS_CORE_IDLE, "data": false }))
            .await;
    }

    async fn wait_for<F>(&mut self, what: &str, pred: F) -> StatusSnapshot
    where
        F: Fn(&StatusSnapshot) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                {
                    let snapshot = self.status.borrow_and_update().clone();
                    if pred(&snapshot) {
                        return snapshot;
                    }
                }
                self.status.changed().await.unwrap();
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
    }
}

#[tokio::test(start_paused = true)]
async fn toggle_starts_playback_and_reports_live() {
    let mut h = harness();
    h.go_online().await;
    h.wait_for("online", |s| s.stream_health == StreamHealth::Online)
        .await;

    h.handle.toggle_playback().await;
    h.settle().await;
    assert_eq!(h.engine.log.loaded_urls().len(), 1);
    assert_eq!(h.handle.snapshot().kind, StatusKind::Loading);

    h.engine_reports_playing().await;
    let snap = h
        .wait_for("playing", |s| s.kind == StatusKind::Playing && !s.is_buffering)
        .await;
    assert_eq!(snap.message, MSG_LIVE);
    assert!(snap.is_playing);
}

#[tokio::test(start_paused = true)]
async fn repeated_toggle_while_loading_creates_one_session() {
    let mut h = harness();
    h.go_online().await;
    h.wait_for("online", |s| s.stream_health == StreamHealth::Online)
        .await;

    // The engine has not yet confirmed playback, so each toggle takes the
    // start path; setup must stay idempotent regardless.
    h.handle.toggle_playback().await;
    h.handle.toggle_playback().await;
    h.handle.toggle_playback().await;
    h.settle().await;

    assert_eq!(h.handle.snapshot().kind, StatusKind::Loading);
    assert_eq!(h.engine.connect_count.load(Ordering::Relaxed), 1);
    assert_eq!(h.engine.log.loaded_urls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn connectivity_loss_overrides_playing_and_recovery_restarts() {
    let mut h = harness();
    h.go_online().await;
    h.handle.toggle_playback().await;
    h.engine_reports_playing().await;
    h.wait_for("playing", |s| s.kind == StatusKind::Playing).await;

    h.send(CoordinatorEvent::Link(LinkSnapshot::disconnected()))
        .await;
    h.wait_for("no internet", |s| s.kind == StatusKind::NoInternet)
        .await;

    // Back online: the coordinator probes, then restarts the session.
    h.send(CoordinatorEvent::Link(LinkSnapshot::wifi(Some(80))))
        .await;
    h.send(CoordinatorEvent::Probe {
        epoch: 0,
        availability: StreamAvailability::online(),
    })
    .await;
    h.wait_for("restarting", |s| s.kind == StatusKind::Loading)
        .await;
    assert_eq!(h.engine.connect_count.load(Ordering::Relaxed), 2);
}

#[tokio::test(start_paused = true)]
async fn playback_intent_survives_outage_during_retry() {
    let mut h = harness();
    h.go_online().await;
    h.handle.toggle_playback().await;
    h.engine_reports_playing().await;
    h.wait_for("playing", |s| s.kind == StatusKind::Playing).await;

    // The stream dies and a retry gets scheduled.
    h.engine
        .emit(json!({ "event": "end-file", "reason": "error" }))
        .await;
    h.wait_for("reconnecting", |s| s.kind == StatusKind::Reconnecting)
        .await;

    // The link drops before the retry fires.  The tick that lands during
    // the outage must keep the standing request alive instead of parking
    // the coordinator forever.
    h.send(CoordinatorEvent::Link(LinkSnapshot::disconnected()))
        .await;
    h.wait_for("no internet", |s| s.kind == StatusKind::NoInternet)
        .await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    h.settle().await;
    assert_eq!(h.engine.connect_count.load(Ordering::Relaxed), 1);

    // Link and stream return: playback restarts without a fresh toggle.
    h.send(CoordinatorEvent::Link(LinkSnapshot::wifi(Some(80))))
        .await;
    h.send(CoordinatorEvent::Probe {
        epoch: 0,
        availability: StreamAvailability::online(),
    })
    .await;
    h.wait_for("restarting", |s| s.kind == StatusKind::Loading)
        .await;
    assert_eq!(h.engine.connect_count.load(Ordering::Relaxed), 2);
}

#[tokio::test(start_paused = true)]
async fn probe_offline_does_not_interrupt_active_playback() {
    let mut h = harness();
    h.go_online().await;
    h.handle.toggle_playback().await;
    h.engine_reports_playing().await;
    h.wait_for("playing", |s| s.kind == StatusKind::Playing).await;

    h.send(CoordinatorEvent::Probe {
        epoch: 0,
        availability: StreamAvailability::offline("probe timed out"),
    })
    .await;
    let snap = h
        .wait_for("probe applied", |s| s.stream_health == StreamHealth::Offline)
        .await;
    assert_eq!(snap.kind, StatusKind::Playing);
    assert_eq!(h.engine.connect_count.load(Ordering::Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_probe_results_are_dropped() {
    let mut h = harness();
    h.send(CoordinatorEvent::Link(LinkSnapshot::wifi(Some(80))))
        .await;

    // Result from a superseded epoch must not land.
    h.send(CoordinatorEvent::Probe {
        epoch: 7,
        availability: StreamAvailability::offline("stale"),
    })
    .await;
    h.handle.request_permissions().await;
    let snap = h
        .wait_for("marker", |s| s.notifications_permitted.is_some())
        .await;
    assert_eq!(snap.stream_health, StreamHealth::Unknown);
    assert_ne!(snap.kind, StatusKind::Offline);

    h.send(CoordinatorEvent::Probe {
        epoch: 0,
        availability: StreamAvailability::online(),
    })
    .await;
    h.wait_for("fresh probe", |s| s.stream_health == StreamHealth::Online)
        .await;
}

#[tokio::test(start_paused = true)]
async fn reconnection_gives_up_after_three_attempts() {
    let mut h = harness();
    h.go_online().await;
    h.handle.toggle_playback().await;
    h.engine_reports_playing().await;
    h.wait_for("playing", |s| s.kind == StatusKind::Playing).await;

    // Every restart from here on fails to connect.
    h.engine.fail_connect.store(true, Ordering::Relaxed);
    h.engine
        .emit(json!({ "event": "end-file", "reason": "network" }))
        .await;

    let snap = h
        .wait_for("exhausted", |s| s.kind == StatusKind::Error)
        .await;
    assert_eq!(snap.error_message.as_deref(), Some(MSG_RECONNECT_FAILED));
    // Initial connect plus exactly three failed retries.
    assert_eq!(h.engine.connect_count.load(Ordering::Relaxed), 4);
}

#[tokio::test(start_paused = true)]
async fn successful_retry_restores_playback() {
    let mut h = harness();
    h.go_online().await;
    h.handle.toggle_playback().await;
    h.engine_reports_playing().await;
    h.wait_for("playing", |s| s.kind == StatusKind::Playing).await;

    h.engine
        .emit(json!({ "event": "end-file", "reason": "error" }))
        .await;
    h.wait_for("reconnecting", |s| s.kind == StatusKind::Reconnecting)
        .await;

    // The retry reconnects; the engine confirms and the budget resets.
    h.wait_for("reconnected", |s| {
        s.kind == StatusKind::Loading || s.kind == StatusKind::Playing
    })
    .await;
    h.engine_reports_playing().await;
    let snap = h
        .wait_for("playing again", |s| s.kind == StatusKind::Playing)
        .await;
    assert_eq!(snap.retry_attempt, 0);
    assert_eq!(h.engine.connect_count.load(Ordering::Relaxed), 2);
}

#[tokio::test(start_paused = true)]
async fn fresh_intent_auto_resumes_once_stream_is_confirmed() {
    let h = harness_with_settings(Some(json!({
        "settings": { "playback_notifications_enabled": true },
        "last_playback_intent": {
            "was_playing": true,
            "timestamp_ms": chrono::Utc::now().timestamp_millis(),
            "retry_count": 0
        }
    })));

    // Nothing starts before the stream is confirmed reachable.
    assert_eq!(h.engine.connect_count.load(Ordering::Relaxed), 0);

    h.go_online().await;
    h.settle().await;
    assert_eq!(h.handle.snapshot().kind, StatusKind::Loading);
    assert_eq!(h.engine.log.loaded_urls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_intent_does_not_auto_resume() {
    let mut h = harness_with_settings(Some(json!({
        "settings": { "playback_notifications_enabled": true },
        "last_playback_intent": {
            "was_playing": true,
            "timestamp_ms": chrono::Utc::now().timestamp_millis()
                - radio_core::settings::MAX_INTENT_AGE_MS
                - 1,
            "retry_count": 0
        }
    })));

    h.go_online().await;
    h.wait_for("online", |s| s.stream_health == StreamHealth::Online)
        .await;
    assert_eq!(h.engine.connect_count.load(Ordering::Relaxed), 0);
}

#[tokio::test(start_paused = true)]
async fn disabled_notifications_suppress_presence_until_reenabled() {
    let mut h = harness_with_settings(Some(json!({
        "settings": { "playback_notifications_enabled": false }
    })));
    h.go_online().await;
    h.handle.toggle_playback().await;
    h.engine_reports_playing().await;
    h.wait_for("playing", |s| s.kind == StatusKind::Playing).await;

    assert!(h.notify_log.shows().is_empty());

    h.handle.set_notifications_enabled(true).await;
    h.wait_for("enabled", |s| s.notifications_enabled).await;
    assert_eq!(h.notify_log.shows().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn pause_keeps_session_and_mute_is_orthogonal() {
    let mut h = harness();
    h.go_online().await;
    h.handle.toggle_playback().await;
    h.engine_reports_playing().await;
    h.wait_for("playing", |s| s.kind == StatusKind::Playing).await;

    h.handle.toggle_mute().await;
    let snap = h.wait_for("muted", |s| s.is_muted).await;
    assert_eq!(snap.kind, StatusKind::Playing);

    h.handle.toggle_playback().await;
    let snap = h.wait_for("paused", |s| s.kind == StatusKind::Paused).await;
    assert!(snap.is_muted);
    // Pausing keeps the engine around for instant resume.
    assert_eq!(h.engine.connect_count.load(Ordering::Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn volume_command_reaches_the_engine() {
    let mut h = harness();
    h.go_online().await;
    h.handle.toggle_playback().await;
    h.engine_reports_playing().await;
    h.wait_for("playing", |s| s.kind == StatusKind::Playing).await;

    h.handle.set_volume(0.25).await;
    h.settle().await;

    let sets = h.engine.log.property_sets("volume");
    assert_eq!(sets.last(), Some(&json!(25.0)));
}

#[tokio::test(start_paused = true)]
async fn notification_action_routes_to_playback_toggle() {
    let mut h = harness();
    h.go_online().await;
    h.handle.toggle_playback().await;
    h.engine_reports_playing().await;
    h.wait_for("playing", |s| s.kind == StatusKind::Playing).await;

    h.handle
        .notification_action(radio_coordinator::NotificationAction::TogglePlayback)
        .await;
    h.wait_for("paused via action", |s| s.kind == StatusKind::Paused)
        .await;
}

#[tokio::test(start_paused = true)]
async fn stop_tears_everything_down() {
    let mut h = harness();
    h.go_online().await;
    h.handle.toggle_playback().await;
    h.engine_reports_playing().await;
    h.wait_for("playing", |s| s.kind == StatusKind::Playing).await;
    let shows_before = h.notify_log.shows().len();
    assert!(shows_before >= 1);

    h.handle.stop().await;
    // The loop exits; the last notifier op is the teardown dismissal.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let ops = h.notify_log.ops.lock().unwrap();
    assert!(matches!(
        ops.last(),
        Some(radio_coordinator::notify::testing::NotifyOp::Dismiss)
    ));
}
