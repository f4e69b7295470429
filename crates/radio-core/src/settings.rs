//! Persisted settings and last playback intent.
//!
//! Backed by one JSON file in the data dir.  Read once at startup, rewritten
//! on every mutation.  Persistence failures are swallowed with diagnostic
//! logging and the coordinator falls back to defaults; they never take the
//! coordinator down.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

use crate::error::CoordinatorError;

/// Playback intents older than this are discarded rather than honoured.
pub const MAX_INTENT_AGE_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSettings {
    #[serde(default = "default_notifications_enabled")]
    pub playback_notifications_enabled: bool,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self {
            playback_notifications_enabled: default_notifications_enabled(),
        }
    }
}

fn default_notifications_enabled() -> bool {
    true
}

/// What the user last asked for, persisted so a cold start can decide whether
/// to auto-resume playback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackIntent {
    pub was_playing: bool,
    pub timestamp_ms: i64,
    pub retry_count: u32,
}

impl PlaybackIntent {
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.timestamp_ms) < MAX_INTENT_AGE_MS
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    settings: PersistedSettings,
    #[serde(default)]
    last_playback_intent: Option<PlaybackIntent>,
}

pub struct SettingsStore {
    path: PathBuf,
    file: StoreFile,
}

impl SettingsStore {
    /// Load the store, discarding stale intents.  Any read or parse failure
    /// falls back to defaults.
    pub fn load(path: PathBuf) -> Self {
        let mut file = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<StoreFile>(&content) {
                Ok(file) => file,
                Err(e) => {
                    warn!("settings: unreadable store {:?}, using defaults: {}", path, e);
                    StoreFile::default()
                }
            },
            Err(_) => StoreFile::default(),
        };

        let now_ms = chrono::Utc::now().timestamp_millis();
        if let Some(intent) = &file.last_playback_intent {
            if !intent.is_fresh(now_ms) {
                file.last_playback_intent = None;
            }
        }

        Self { path, file }
    }

    pub fn settings(&self) -> &PersistedSettings {
        &self.file.settings
    }

    pub fn playback_intent(&self) -> Option<&PlaybackIntent> {
        self.file.last_playback_intent.as_ref()
    }

    /// True when a fresh persisted intent says playback was active.
    pub fn should_auto_resume(&self) -> bool {
        self.file
            .last_playback_intent
            .as_ref()
            .map(|intent| intent.was_playing)
            .unwrap_or(false)
    }

    pub async fn set_notifications_enabled(&mut self, enabled: bool) {
        self.file.settings.playback_notifications_enabled = enabled;
        self.persist().await;
    }

    pub async fn record_intent(&mut self, was_playing: bool, retry_count: u32) {
        self.file.last_playback_intent = Some(PlaybackIntent {
            was_playing,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            retry_count,
        });
        self.persist().await;
    }

    async fn persist(&self) {
        if let Err(e) = self.try_persist().await {
            warn!("settings: {}", e);
        }
    }

    /// Write the store; callers that can surface the failure get the typed
    /// error, `persist` just logs it.
    pub async fn try_persist(&self) -> Result<(), CoordinatorError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoordinatorError::Persistence(format!("{:?}: {}", parent, e)))?;
        }
        let json = serde_json::to_string_pretty(&self.file)
            .map_err(|e| CoordinatorError::Persistence(e.to_string()))?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| CoordinatorError::Persistence(format!("{:?}: {}", self.path, e)))?;
        Ok(())
    }
}
