//! The coordinator core.
//!
//! One task owns all mutable state (aggregator, controller, supervisor,
//! notifier, settings) and consumes a single [`CoordinatorEvent`] stream.
//! Monitors, the engine reader and retry timers only ever send events into
//! that stream, so no state is touched from two tasks at once.  The resolved
//! status fans out through a watch channel, which always holds a value.

use radio_core::config::Config;
use radio_core::error::CoordinatorError;
use radio_core::settings::SettingsStore;
use radio_core::status::{
    AggregatedStatus, ConnectivityState, LinkSnapshot, NetworkQuality, PlayerEvent, StatusKind,
    StreamAvailability, StreamHealth, MSG_NETWORK_UNSTABLE, MSG_RECONNECT_FAILED,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::controller::PlaybackController;
use crate::engine::{EngineBackend, EngineEvent};
use crate::handle::CoordinatorHandle;
use crate::network::NetworkMonitor;
use crate::notify::{NotifyBackend, PresenceContent, PresenceNotifier};
use crate::probe::{ProbeTrigger, StreamProber};
use crate::supervisor::{ReconnectionSupervisor, RetryDecision};

const NETWORK_SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    TogglePlayback,
    ToggleMute,
    SetVolume(f32),
    Reload,
    SetNotificationsEnabled(bool),
    RequestPermissions,
    Stop,
}

/// Action buttons on the presence notification, fed back by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    TogglePlayback,
    Stop,
}

#[derive(Debug)]
pub enum CoordinatorEvent {
    Command(Command),
    Link(LinkSnapshot),
    Probe {
        epoch: u64,
        availability: StreamAvailability,
    },
    Engine(EngineEvent),
    /// The host came back to the foreground; availability may be stale.
    AppForeground,
    RetryTick {
        attempt: u32,
    },
    NotificationAction(NotificationAction),
    NotifierFlush,
}

/// What the UI sees.  Published on every handled event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub kind: StatusKind,
    pub message: String,
    pub error_message: Option<String>,
    pub is_buffering: bool,
    pub is_playing: bool,
    pub is_muted: bool,
    pub quality: NetworkQuality,
    pub stream_health: StreamHealth,
    pub notifications_enabled: bool,
    pub notifications_permitted: Option<bool>,
    pub retry_attempt: u32,
}

pub struct CoordinatorCore {
    config: Config,
    aggregator: radio_core::status::StatusAggregator,
    controller: PlaybackController,
    supervisor: ReconnectionSupervisor,
    notifier: PresenceNotifier,
    settings: SettingsStore,

    event_tx: mpsc::Sender<CoordinatorEvent>,
    event_rx: mpsc::Receiver<CoordinatorEvent>,
    status_tx: watch::Sender<StatusSnapshot>,

    probe_epoch: Arc<AtomicU64>,
    probe_trigger: Option<ProbeTrigger>,
    monitor_aborts: Vec<AbortHandle>,

    /// The user's standing request, as opposed to the engine's current state.
    user_wants_playback: bool,
    /// Playback was live when connectivity dropped; restart once it returns.
    resume_after_recovery: bool,
    /// A fresh persisted intent said playback was active on last shutdown.
    auto_resume_pending: bool,
    notifications_permitted: Option<bool>,
    flush_scheduled: bool,
}

impl CoordinatorCore {
    pub fn new(
        config: Config,
        engine: Box<dyn EngineBackend>,
        notify: Box<dyn NotifyBackend>,
        settings: SettingsStore,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        // Engine events arrive on their own channel; a forwarder folds them
        // into the main stream so the loop stays single-source.
        let (engine_tx, mut engine_rx) = mpsc::channel::<EngineEvent>(64);
        let forward_tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(evt) = engine_rx.recv().await {
                if forward_tx.send(CoordinatorEvent::Engine(evt)).await.is_err() {
                    break;
                }
            }
        });

        let controller = PlaybackController::new(engine, engine_tx);
        let supervisor =
            ReconnectionSupervisor::new(config.reconnect.max_attempts, config.retry_delay());
        let notifier = PresenceNotifier::new(
            notify,
            settings.settings().playback_notifications_enabled,
            config.notification_cooldown(),
        );
        let auto_resume_pending = settings.should_auto_resume();

        let core = Self {
            config,
            aggregator: radio_core::status::StatusAggregator::new(),
            controller,
            supervisor,
            notifier,
            settings,
            event_tx,
            event_rx,
            status_tx: watch::channel(StatusSnapshot {
                kind: StatusKind::Loading,
                message: String::new(),
                error_message: None,
                is_buffering: true,
                is_playing: false,
                is_muted: false,
                quality: NetworkQuality::Good,
                stream_health: StreamHealth::Unknown,
                notifications_enabled: true,
                notifications_permitted: None,
                retry_attempt: 0,
            })
            .0,
            probe_epoch: Arc::new(AtomicU64::new(0)),
            probe_trigger: None,
            monitor_aborts: Vec::new(),
            user_wants_playback: false,
            resume_after_recovery: false,
            auto_resume_pending,
            notifications_permitted: None,
            flush_scheduled: false,
        };
        core.status_tx.send_replace(core.build_snapshot());
        core
    }

    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle::new(self.event_tx.clone(), self.status_tx.subscribe())
    }

    /// Sender for the event stream; monitors and timers use clones of this.
    pub fn event_sender(&self) -> mpsc::Sender<CoordinatorEvent> {
        self.event_tx.clone()
    }

    /// Start the network sampler and the availability prober.  Tests drive
    /// the loop with synthetic events instead and skip this.
    pub fn spawn_monitors(&mut self) {
        let network = NetworkMonitor::new(NETWORK_SAMPLE_INTERVAL);
        self.monitor_aborts.push(network.spawn(self.event_tx.clone()));

        let prober = StreamProber::new(
            self.config.stream.url.clone(),
            self.config.probe_interval(),
            self.config.probe_timeout(),
            self.probe_epoch.clone(),
        );
        let (trigger, abort) = prober.spawn(self.event_tx.clone());
        self.probe_trigger = Some(trigger);
        self.monitor_aborts.push(abort);
    }

    pub async fn run(mut self) {
        info!(
            "coordinator: starting for '{}' ({})",
            self.config.stream.station_name, self.config.stream.url
        );
        if self.auto_resume_pending {
            info!("coordinator: fresh playback intent found, will auto-resume");
        }

        while let Some(event) = self.event_rx.recv().await {
            let stop = self.handle_event(event).await;
            self.publish().await;
            if stop {
                break;
            }
        }
        info!("coordinator: loop exited");
    }

    async fn handle_event(&mut self, event: CoordinatorEvent) -> bool {
        match event {
            CoordinatorEvent::Command(cmd) => return self.handle_command(cmd).await,
            CoordinatorEvent::Link(snapshot) => self.handle_link(snapshot).await,
            CoordinatorEvent::Probe {
                epoch,
                availability,
            } => self.handle_probe(epoch, availability).await,
            CoordinatorEvent::Engine(evt) => self.handle_engine(evt).await,
            CoordinatorEvent::AppForeground => {
                debug!("coordinator: foregrounded, probing immediately");
                self.trigger_probe().await;
            }
            CoordinatorEvent::RetryTick { attempt } => self.handle_retry_tick(attempt).await,
            CoordinatorEvent::NotificationAction(action) => {
                // Notification buttons reuse the command paths.
                let cmd = match action {
                    NotificationAction::TogglePlayback => Command::TogglePlayback,
                    NotificationAction::Stop => Command::Stop,
                };
                return self.handle_command(cmd).await;
            }
            CoordinatorEvent::NotifierFlush => {
                self.flush_scheduled = false;
                if let Some(wait) = self.notifier.flush().await {
                    self.schedule_flush(wait);
                }
            }
        }
        false
    }

    async fn handle_command(&mut self, cmd: Command) -> bool {
        debug!("coordinator: command {:?}", cmd);
        match cmd {
            Command::TogglePlayback => {
                if self.controller.is_playing() {
                    self.user_wants_playback = false;
                    match self.controller.pause().await {
                        Ok(()) => {
                            self.aggregator.push_event(PlayerEvent::Paused {
                                is_buffering: self.controller.is_buffering(),
                            });
                        }
                        Err(e) => warn!("coordinator: pause failed: {}", e),
                    }
                    self.settings.record_intent(false, 0).await;
                } else {
                    self.user_wants_playback = true;
                    self.auto_resume_pending = false;
                    self.try_start().await;
                }
            }
            Command::ToggleMute => {
                if let Err(e) = self.controller.toggle_mute().await {
                    warn!("coordinator: mute toggle failed: {}", e);
                }
            }
            Command::SetVolume(volume) => {
                if let Err(e) = self.controller.set_volume(volume).await {
                    warn!("coordinator: volume change failed: {}", e);
                }
            }
            Command::Reload => {
                // Invalidate in-flight probes before anything else.
                self.probe_epoch.fetch_add(1, Ordering::Release);
                self.trigger_probe().await;
                if self.user_wants_playback {
                    self.try_restart().await;
                }
            }
            Command::SetNotificationsEnabled(enabled) => {
                self.settings.set_notifications_enabled(enabled).await;
                self.notifier.set_enabled(enabled).await;
            }
            Command::RequestPermissions => {
                let granted = self.notifier.permission_granted().await;
                self.notifications_permitted = Some(granted);
                if !granted {
                    warn!(
                        "coordinator: {}",
                        radio_core::status::MSG_NOTIFICATIONS_BLOCKED
                    );
                }
            }
            Command::Stop => {
                info!("coordinator: stop requested");
                self.settings
                    .record_intent(self.user_wants_playback, self.supervisor.attempts())
                    .await;
                self.controller.teardown().await;
                self.notifier.teardown().await;
                for abort in self.monitor_aborts.drain(..) {
                    abort.abort();
                }
                return true;
            }
        }
        false
    }

    async fn handle_link(&mut self, snapshot: LinkSnapshot) {
        let was_online = self.aggregator.connectivity().is_online();
        let connectivity = ConnectivityState::from_snapshot(&snapshot);
        let now_online = connectivity.is_online();
        self.aggregator.set_connectivity(connectivity);

        if was_online && !now_online {
            // The engine keeps retrying on its own; remember only whether to
            // restart when the network comes back.  The standing request is
            // what matters, not whether audio happened to be flowing when the
            // link dropped (a pending retry must survive the outage too).
            if self.user_wants_playback {
                self.resume_after_recovery = true;
            }
        } else if !was_online && now_online {
            info!("coordinator: connectivity restored, probing stream");
            self.trigger_probe().await;
        }
    }

    async fn handle_probe(&mut self, epoch: u64, availability: StreamAvailability) {
        let current = self.probe_epoch.load(Ordering::Acquire);
        if epoch != current {
            debug!(
                "coordinator: dropping stale probe result (epoch {} != {})",
                epoch, current
            );
            return;
        }

        let came_online = availability.health == StreamHealth::Online;
        self.aggregator.set_availability(availability);

        if came_online {
            if self.auto_resume_pending && self.aggregator.can_play() {
                self.auto_resume_pending = false;
                self.user_wants_playback = true;
                info!("coordinator: auto-resuming persisted playback");
                self.try_start().await;
            } else if self.resume_after_recovery && self.user_wants_playback {
                self.resume_after_recovery = false;
                info!("coordinator: stream back, restarting playback");
                self.try_restart().await;
            }
        }
    }

    async fn handle_engine(&mut self, evt: EngineEvent) {
        let Some(player_event) = self.controller.on_engine_event(&evt) else {
            return;
        };

        match &player_event {
            PlayerEvent::Playing {
                is_buffering: false,
            } => {
                // Confirmed healthy audio restores the retry budget.
                self.supervisor.reset();
                self.aggregator.push_event(player_event);
            }
            PlayerEvent::Error { message } if self.user_wants_playback => {
                warn!("coordinator: playback error: {}", message);
                self.handle_playback_failure(message.clone());
            }
            _ => {
                self.aggregator.push_event(player_event);
            }
        }
    }

    async fn handle_retry_tick(&mut self, attempt: u32) {
        if !self.user_wants_playback {
            debug!("coordinator: dropping retry tick {}, playback no longer wanted", attempt);
            return;
        }
        info!("coordinator: retry attempt {}", attempt);
        self.try_restart().await;
    }

    /// Start (or resume) playback, honouring the upstream gates.
    async fn start_playback(&mut self) -> Result<(), CoordinatorError> {
        let connectivity = self.aggregator.connectivity().clone();
        if !connectivity.is_online() {
            // A retry tick landing mid-outage must not discard the standing
            // request; arm the recovery path and let the link monitor
            // restart us once the network returns.
            self.resume_after_recovery = self.user_wants_playback;
            return Err(CoordinatorError::Network);
        }
        if !connectivity.is_suitable_for_streaming() {
            self.aggregator.push_event(PlayerEvent::Error {
                message: MSG_NETWORK_UNSTABLE.to_string(),
            });
            return Ok(());
        }
        if self.aggregator.availability().health == StreamHealth::Offline {
            debug!("coordinator: not starting, stream is off the air");
            // The next online probe result restarts us.
            self.resume_after_recovery = self.user_wants_playback;
            return Ok(());
        }

        self.aggregator.push_event(PlayerEvent::Loading);
        self.controller
            .setup(&self.config.stream.url, self.config.stream.default_volume)
            .await?;
        self.controller.play().await?;
        self.settings
            .record_intent(true, self.supervisor.attempts())
            .await;
        Ok(())
    }

    /// `start_playback` with failure routing: recoverable errors feed the
    /// reconnection supervisor, the rest wait for connectivity recovery.
    async fn try_start(&mut self) {
        if let Err(e) = self.start_playback().await {
            if e.is_recoverable() {
                self.handle_playback_failure(e.to_string());
            } else {
                debug!("coordinator: playback deferred: {}", e);
            }
        }
    }

    async fn try_restart(&mut self) {
        self.controller.teardown().await;
        self.try_start().await;
    }

    /// Feed a failure into the supervisor and act on its decision.
    fn handle_playback_failure(&mut self, message: String) {
        match self.supervisor.on_failure() {
            RetryDecision::Retry { attempt, delay } => {
                self.aggregator.push_event(PlayerEvent::Reconnecting);
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(CoordinatorEvent::RetryTick { attempt }).await;
                });
            }
            RetryDecision::Exhausted => {
                warn!(
                    "coordinator: reconnection exhausted, last error: {}",
                    message
                );
                self.user_wants_playback = false;
                self.aggregator.push_event(PlayerEvent::Error {
                    message: MSG_RECONNECT_FAILED.to_string(),
                });
            }
        }
    }

    async fn trigger_probe(&mut self) {
        if let Some(trigger) = &self.probe_trigger {
            let _ = trigger.send(()).await;
        }
    }

    fn build_snapshot(&self) -> StatusSnapshot {
        let status: &AggregatedStatus = self.aggregator.status();
        StatusSnapshot {
            kind: status.kind,
            message: self.aggregator.status_message().to_string(),
            error_message: status.error_message.clone(),
            is_buffering: status.is_buffering,
            is_playing: self.controller.is_playing(),
            is_muted: self.controller.is_muted(),
            quality: self.aggregator.connectivity().quality,
            stream_health: self.aggregator.availability().health,
            notifications_enabled: self.notifier.is_enabled(),
            notifications_permitted: self.notifications_permitted,
            retry_attempt: self.supervisor.attempts(),
        }
    }

    async fn publish(&mut self) {
        let snapshot = self.build_snapshot();
        self.status_tx.send_replace(snapshot.clone());

        let desired = self.controller.has_session().then(|| PresenceContent {
            title: self.config.stream.station_name.clone(),
            body: snapshot.message.clone(),
            playing: snapshot.is_playing,
        });
        if let Some(wait) = self.notifier.sync(desired).await {
            self.schedule_flush(wait);
        }
    }

    fn schedule_flush(&mut self, wait: Duration) {
        if self.flush_scheduled {
            return;
        }
        self.flush_scheduled = true;
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = tx.send(CoordinatorEvent::NotifierFlush).await;
        });
    }
}
