//! Playback session controller.
//!
//! Owns the single [`PlaybackSession`] and the engine backend.  All transport
//! commands go through here; every engine status change is translated into an
//! explicit [`PlayerEvent`] for the status aggregator.

use radio_core::error::CoordinatorError;
use radio_core::status::PlayerEvent;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::{
    EngineBackend, EngineEvent, EngineHandle, OBS_CACHE_WAIT, OBS_CORE_IDLE, OBS_MUTE, OBS_PAUSE,
};

/// The one live audio session.  At most one exists at a time.
pub struct PlaybackSession {
    handle: EngineHandle,
    pub stream_url: String,
    pub is_playing: bool,
    pub is_muted: bool,
    pub volume: f32,
    pub is_buffering: bool,
}

pub struct PlaybackController {
    backend: Box<dyn EngineBackend>,
    session: Option<PlaybackSession>,
    /// Serialises re-entrant `setup` calls: a second call arriving while a
    /// previous one is still in flight returns without spawning a duplicate.
    is_initializing: bool,
    /// Engine events for the coordinator loop flow through this sender for
    /// the lifetime of each connection.
    engine_event_tx: mpsc::Sender<EngineEvent>,
}

impl PlaybackController {
    pub fn new(backend: Box<dyn EngineBackend>, engine_event_tx: mpsc::Sender<EngineEvent>) -> Self {
        Self {
            backend,
            session: None,
            is_initializing: false,
            engine_event_tx,
        }
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.session.as_ref().map(|s| s.is_playing).unwrap_or(false)
    }

    pub fn is_muted(&self) -> bool {
        self.session.as_ref().map(|s| s.is_muted).unwrap_or(false)
    }

    pub fn is_buffering(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.is_buffering)
            .unwrap_or(false)
    }

    /// Acquire the engine and bind a session to `stream_url`.  Idempotent:
    /// when a live session already exists and the engine still answers, this
    /// returns without creating a second handle.
    pub async fn setup(&mut self, stream_url: &str, volume: f32) -> Result<(), CoordinatorError> {
        if self.is_initializing {
            debug!("controller: setup already in flight, ignoring");
            return Ok(());
        }

        if self.session.is_some() {
            // A live process whose IPC has wedged is as dead as a crashed
            // one; the ping catches that case.
            if self.backend.alive() && self.ping_session().await {
                debug!("controller: session already live, setup is a no-op");
                return Ok(());
            }
            warn!("controller: engine unresponsive under live session, rebuilding");
            self.session = None;
        }

        self.is_initializing = true;
        let result = self.setup_inner(stream_url, volume).await;
        self.is_initializing = false;
        result
    }

    async fn setup_inner(&mut self, stream_url: &str, volume: f32) -> Result<(), CoordinatorError> {
        info!("controller: acquiring engine for {}", stream_url);
        let handle = self
            .backend
            .connect(self.engine_event_tx.clone(), volume)
            .await
            .map_err(|e| CoordinatorError::Playback(e.to_string()))?;

        handle.observe_playback_properties().await;
        handle
            .load_stream(stream_url, volume)
            .await
            .map_err(|e| CoordinatorError::Playback(e.to_string()))?;

        self.session = Some(PlaybackSession {
            handle,
            stream_url: stream_url.to_string(),
            is_playing: false,
            is_muted: false,
            volume,
            is_buffering: true,
        });
        Ok(())
    }

    async fn ping_session(&self) -> bool {
        match self.session.as_ref() {
            Some(session) => session.handle.ping().await.is_ok(),
            None => false,
        }
    }

    fn session(&self) -> Result<&PlaybackSession, CoordinatorError> {
        self.session
            .as_ref()
            .ok_or_else(|| CoordinatorError::Playback("no active session, call setup first".into()))
    }

    pub async fn play(&mut self) -> Result<(), CoordinatorError> {
        let session = self.session()?;
        session
            .handle
            .set_pause(false)
            .await
            .map_err(|e| CoordinatorError::Playback(e.to_string()))
    }

    pub async fn pause(&mut self) -> Result<(), CoordinatorError> {
        let session = self.session()?;
        session
            .handle
            .set_pause(true)
            .await
            .map_err(|e| CoordinatorError::Playback(e.to_string()))
    }

    pub async fn toggle(&mut self) -> Result<(), CoordinatorError> {
        // Use the locally-observed state rather than an IPC round-trip, which
        // can stall for seconds while the engine is buffering.
        if self.is_playing() {
            self.pause().await
        } else {
            self.play().await
        }
    }

    /// Flip output muting without touching `is_playing`.
    pub async fn toggle_mute(&mut self) -> Result<(), CoordinatorError> {
        let target = !self.is_muted();
        let session = self.session()?;
        session
            .handle
            .set_mute(target)
            .await
            .map_err(|e| CoordinatorError::Playback(e.to_string()))?;
        if let Some(session) = self.session.as_mut() {
            session.is_muted = target;
        }
        Ok(())
    }

    pub async fn set_volume(&mut self, volume: f32) -> Result<(), CoordinatorError> {
        let session = self.session()?;
        session
            .handle
            .set_volume(volume)
            .await
            .map_err(|e| CoordinatorError::Playback(e.to_string()))?;
        if let Some(session) = self.session.as_mut() {
            session.volume = volume.clamp(0.0, 1.0);
        }
        Ok(())
    }

    /// Stop and release the session.  Idempotent.
    pub async fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            info!("controller: tearing down session");
            let _ = session.handle.stop().await;
        }
        self.backend.shutdown().await;
    }

    /// Translate an unsolicited engine event into an explicit player event
    /// for the aggregator.  Returns `None` for events that do not change the
    /// user-facing status (e.g. mute confirmations).
    pub fn on_engine_event(&mut self, evt: &EngineEvent) -> Option<PlayerEvent> {
        let session = self.session.as_mut()?;

        if let Some((obs_id, data)) = evt.as_property_change() {
            match obs_id {
                OBS_PAUSE => {
                    let paused = data.as_bool().unwrap_or(false);
                    session.is_playing = !paused;
                    if paused {
                        return Some(PlayerEvent::Paused {
                            is_buffering: session.is_buffering,
                        });
                    }
                    return Some(PlayerEvent::Playing {
                        is_buffering: session.is_buffering,
                    });
                }
                OBS_CORE_IDLE => {
                    // core-idle=false means audio is actually flowing.
                    match data.as_bool() {
                        Some(false) => {
                            session.is_playing = true;
                            session.is_buffering = false;
                            return Some(PlayerEvent::Playing {
                                is_buffering: false,
                            });
                        }
                        Some(true) if session.is_playing => {
                            return Some(PlayerEvent::Buffering);
                        }
                        _ => return None,
                    }
                }
                OBS_CACHE_WAIT => {
                    let buffering = data.as_bool().unwrap_or(false);
                    session.is_buffering = buffering;
                    if session.is_playing {
                        return Some(PlayerEvent::Playing {
                            is_buffering: buffering,
                        });
                    }
                    return Some(PlayerEvent::Paused {
                        is_buffering: buffering,
                    });
                }
                OBS_MUTE => {
                    // Engine confirmation; status is unaffected.
                    session.is_muted = data.as_bool().unwrap_or(session.is_muted);
                    return None;
                }
                _ => return None,
            }
        }

        if evt.event_name() == Some("end-file") {
            let reason = evt.end_reason().unwrap_or("unknown");
            if matches!(reason, "error" | "network" | "quit") {
                warn!("controller: stream ended with reason={}", reason);
                session.is_playing = false;
                session.is_buffering = false;
                return Some(PlayerEvent::Error {
                    message: radio_core::status::MSG_LOAD_ERROR.to_string(),
                });
            }
        }

        None
    }
}
