//! Aggregated playback status, the single source of truth exposed to the UI.
//!
//! Three independent input channels (connectivity, stream availability, player
//! events) are merged into one [`AggregatedStatus`] by a priority-ordered
//! derivation.  The derivation is pure and last-write-wins per channel:
//! feeding the same inputs twice yields the same output.

use serde::{Deserialize, Serialize};

// ── canonical user-facing texts ───────────────────────────────────────────────

pub const MSG_NO_INTERNET: &str = "No internet connection";
pub const MSG_STREAM_OFFLINE: &str = "Broadcast is off the air";
pub const MSG_STREAM_RETRYING: &str =
    "Broadcast temporarily off the air. Retrying in 30 seconds...";
pub const MSG_LOADING: &str = "Loading...";
pub const MSG_LIVE: &str = "Live";
pub const MSG_LIVE_PAUSED: &str = "Live (paused)";
pub const MSG_READY: &str = "Ready to listen";
pub const MSG_LOAD_ERROR: &str = "Could not load the stream";
pub const MSG_RECONNECT_FAILED: &str =
    "Could not reconnect after several attempts. Try again later.";
pub const MSG_NETWORK_UNSTABLE: &str =
    "Unstable network connection. Wait for a better connection to listen.";
pub const MSG_NOTIFICATIONS_BLOCKED: &str =
    "Notifications are blocked. Enable them in system settings.";

// ── connectivity ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Wifi,
    Cellular,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellularGeneration {
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    #[serde(rename = "5g")]
    FiveG,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkQuality {
    Excellent,
    Good,
    Poor,
    Unavailable,
}

/// Raw link state as reported by the host's connectivity source.
/// Replaced wholesale on every event; never partially mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSnapshot {
    pub is_connected: bool,
    /// `None` while reachability has not been determined yet.
    pub is_internet_reachable: Option<bool>,
    pub link: LinkType,
    /// Wifi signal strength in percent, when the platform exposes it.
    pub wifi_strength: Option<u8>,
    pub cellular_generation: Option<CellularGeneration>,
}

impl LinkSnapshot {
    pub fn disconnected() -> Self {
        Self {
            is_connected: false,
            is_internet_reachable: Some(false),
            link: LinkType::Unknown,
            wifi_strength: None,
            cellular_generation: None,
        }
    }

    pub fn wifi(strength: Option<u8>) -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: Some(true),
            link: LinkType::Wifi,
            wifi_strength: strength,
            cellular_generation: None,
        }
    }

    pub fn cellular(generation: CellularGeneration) -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: Some(true),
            link: LinkType::Cellular,
            wifi_strength: None,
            cellular_generation: Some(generation),
        }
    }
}

/// Normalised connectivity state derived from a [`LinkSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub is_connected: bool,
    pub is_internet_reachable: Option<bool>,
    pub link: LinkType,
    pub quality: NetworkQuality,
}

impl Default for ConnectivityState {
    /// Optimistic startup default, replaced by the first real snapshot.
    fn default() -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: Some(true),
            link: LinkType::Unknown,
            quality: NetworkQuality::Good,
        }
    }
}

impl ConnectivityState {
    pub fn from_snapshot(snapshot: &LinkSnapshot) -> Self {
        Self {
            is_connected: snapshot.is_connected,
            is_internet_reachable: snapshot.is_internet_reachable,
            link: snapshot.link,
            quality: classify_quality(snapshot),
        }
    }

    /// True when connected and internet is definitely reachable.
    pub fn is_online(&self) -> bool {
        self.is_connected && self.is_internet_reachable == Some(true)
    }

    pub fn is_suitable_for_streaming(&self) -> bool {
        !matches!(
            self.quality,
            NetworkQuality::Unavailable | NetworkQuality::Poor
        ) && self.is_online()
    }
}

/// Quality classification policy.  Tie-breaks are deliberate:
/// wifi without strength info is `Good` (not `Excellent`), cellular below 4g
/// is `Poor`, and anything unclassifiable is `Poor`.
fn classify_quality(snapshot: &LinkSnapshot) -> NetworkQuality {
    if !snapshot.is_connected || snapshot.is_internet_reachable != Some(true) {
        return NetworkQuality::Unavailable;
    }
    match snapshot.link {
        LinkType::Wifi => {
            if snapshot.wifi_strength.is_some() {
                NetworkQuality::Excellent
            } else {
                NetworkQuality::Good
            }
        }
        LinkType::Cellular => match snapshot.cellular_generation {
            Some(CellularGeneration::FourG) | Some(CellularGeneration::FiveG) => {
                NetworkQuality::Good
            }
            _ => NetworkQuality::Poor,
        },
        LinkType::Unknown => NetworkQuality::Poor,
    }
}

// ── stream availability ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamHealth {
    /// No probe has resolved yet.
    #[default]
    Unknown,
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StreamAvailability {
    pub health: StreamHealth,
    pub last_error: Option<String>,
}

impl StreamAvailability {
    pub fn online() -> Self {
        Self {
            health: StreamHealth::Online,
            last_error: None,
        }
    }

    pub fn offline(error: impl Into<String>) -> Self {
        Self {
            health: StreamHealth::Offline,
            last_error: Some(error.into()),
        }
    }

    /// True only before the first probe result exists.
    pub fn is_checking(&self) -> bool {
        self.health == StreamHealth::Unknown
    }
}

// ── player events ─────────────────────────────────────────────────────────────

/// Explicit low-level events pushed by the playback controller.
/// For `Playing`/`Paused` the controller reports its own buffering flag and
/// the aggregator carries it through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlayerEvent {
    #[default]
    Idle,
    Loading,
    Playing {
        is_buffering: bool,
    },
    Paused {
        is_buffering: bool,
    },
    Buffering,
    Reconnecting,
    Error {
        message: String,
    },
}

impl PlayerEvent {
    fn is_active_session(&self) -> bool {
        matches!(self, Self::Playing { .. } | Self::Paused { .. })
    }
}

// ── aggregated status ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Buffering,
    Error,
    Offline,
    NoInternet,
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedStatus {
    pub kind: StatusKind,
    pub error_message: Option<String>,
    pub is_buffering: bool,
}

impl Default for AggregatedStatus {
    fn default() -> Self {
        Self {
            kind: StatusKind::Loading,
            error_message: None,
            is_buffering: true,
        }
    }
}

/// The core state machine.  Owns the three input channels and the resolved
/// output.  Writes to any channel trigger a recomputation; the resolved value
/// is never set directly by callers.
#[derive(Debug, Clone, Default)]
pub struct StatusAggregator {
    connectivity: ConnectivityState,
    availability: StreamAvailability,
    last_event: PlayerEvent,
    resolved: AggregatedStatus,
}

impl StatusAggregator {
    pub fn new() -> Self {
        let mut agg = Self::default();
        agg.recompute();
        agg
    }

    pub fn connectivity(&self) -> &ConnectivityState {
        &self.connectivity
    }

    pub fn availability(&self) -> &StreamAvailability {
        &self.availability
    }

    pub fn status(&self) -> &AggregatedStatus {
        &self.resolved
    }

    /// Replace the connectivity channel wholesale and re-derive.
    pub fn set_connectivity(&mut self, state: ConnectivityState) -> &AggregatedStatus {
        self.connectivity = state;
        self.recompute();
        &self.resolved
    }

    /// Replace the availability channel wholesale and re-derive.
    pub fn set_availability(&mut self, availability: StreamAvailability) -> &AggregatedStatus {
        self.availability = availability;
        self.recompute();
        &self.resolved
    }

    /// Record an explicit playback event and re-derive.
    pub fn push_event(&mut self, event: PlayerEvent) -> &AggregatedStatus {
        self.last_event = event;
        self.recompute();
        &self.resolved
    }

    /// True when all upstream conditions allow starting playback.
    pub fn can_play(&self) -> bool {
        self.connectivity.is_online()
            && self.availability.health == StreamHealth::Online
    }

    /// Priority-ordered derivation.  Evaluated top to bottom, first match wins.
    ///
    /// Connectivity loss overrides an active Playing/Paused session; a
    /// stream-offline probe result with connectivity intact does not.  The
    /// asymmetry is deliberate: a probe can false-negative while audio is
    /// still flowing, but no audio flows without a network.
    fn recompute(&mut self) {
        let prev = self.resolved.kind;

        // 1. No connectivity trumps everything, including active playback.
        if !self.connectivity.is_online() {
            self.resolved = AggregatedStatus {
                kind: StatusKind::NoInternet,
                error_message: Some(MSG_NO_INTERNET.to_string()),
                is_buffering: false,
            };
            return;
        }

        // 2. First probe still outstanding.
        if self.availability.health == StreamHealth::Unknown {
            self.resolved = AggregatedStatus {
                kind: StatusKind::Loading,
                error_message: self.resolved.error_message.clone(),
                is_buffering: true,
            };
            return;
        }

        // 3. Stream offline, unless a session is actively playing/paused.
        if self.availability.health == StreamHealth::Offline
            && !self.last_event.is_active_session()
        {
            self.resolved = AggregatedStatus {
                kind: StatusKind::Offline,
                error_message: Some(
                    self.availability
                        .last_error
                        .clone()
                        .unwrap_or_else(|| MSG_STREAM_OFFLINE.to_string()),
                ),
                is_buffering: false,
            };
            return;
        }

        // 4. Recovery: we were degraded and everything is healthy again.
        //    Resolve to Loading as the restart signal.  The stale player event
        //    is replaced so that re-running the derivation stays stable until
        //    the controller pushes fresh events.
        if matches!(prev, StatusKind::Offline | StatusKind::NoInternet)
            && self.availability.health == StreamHealth::Online
        {
            self.last_event = PlayerEvent::Loading;
            self.resolved = AggregatedStatus {
                kind: StatusKind::Loading,
                error_message: None,
                is_buffering: true,
            };
            return;
        }

        // 5. Otherwise the most recent explicit player event, unchanged.
        self.resolved = match &self.last_event {
            PlayerEvent::Idle => AggregatedStatus {
                kind: StatusKind::Idle,
                error_message: None,
                is_buffering: false,
            },
            PlayerEvent::Loading => AggregatedStatus {
                kind: StatusKind::Loading,
                error_message: None,
                is_buffering: true,
            },
            PlayerEvent::Playing { is_buffering } => AggregatedStatus {
                kind: StatusKind::Playing,
                error_message: None,
                is_buffering: *is_buffering,
            },
            PlayerEvent::Paused { is_buffering } => AggregatedStatus {
                kind: StatusKind::Paused,
                error_message: None,
                is_buffering: *is_buffering,
            },
            PlayerEvent::Buffering => AggregatedStatus {
                kind: StatusKind::Buffering,
                error_message: None,
                is_buffering: true,
            },
            PlayerEvent::Reconnecting => AggregatedStatus {
                kind: StatusKind::Reconnecting,
                error_message: None,
                is_buffering: true,
            },
            PlayerEvent::Error { message } => AggregatedStatus {
                kind: StatusKind::Error,
                error_message: Some(message.clone()),
                is_buffering: false,
            },
        };
    }

    /// Canonical user-facing text for the current state.  The no-internet and
    /// stream-offline texts take precedence over everything else.
    pub fn status_message(&self) -> &str {
        if !self.connectivity.is_online() {
            return MSG_NO_INTERNET;
        }
        if self.availability.health == StreamHealth::Offline
            && self.resolved.kind == StatusKind::Offline
        {
            return self
                .resolved
                .error_message
                .as_deref()
                .unwrap_or(MSG_STREAM_OFFLINE);
        }
        match self.resolved.kind {
            StatusKind::Playing => {
                if self.resolved.is_buffering {
                    MSG_LOADING
                } else {
                    MSG_LIVE
                }
            }
            StatusKind::Paused => {
                if self.resolved.is_buffering {
                    MSG_LOADING
                } else {
                    MSG_LIVE_PAUSED
                }
            }
            StatusKind::Loading | StatusKind::Buffering | StatusKind::Reconnecting => MSG_LOADING,
            StatusKind::Error => self
                .resolved
                .error_message
                .as_deref()
                .unwrap_or(MSG_LOAD_ERROR),
            StatusKind::Offline => MSG_STREAM_OFFLINE,
            StatusKind::NoInternet => MSG_NO_INTERNET,
            StatusKind::Idle => MSG_READY,
        }
    }
}
