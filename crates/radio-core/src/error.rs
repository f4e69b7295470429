use thiserror::Error;

/// Failure taxonomy for the playback coordinator.
///
/// `Network` and `Availability` are handled locally and only ever surface as a
/// status/message pair.  `Playback` gets a bounded retry before becoming
/// terminal.  `Permission` blocks notification pushes until resolved.
/// `Persistence` is swallowed with diagnostic logging and defaults.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("no network connectivity")]
    Network,

    #[error("stream endpoint unreachable: {0}")]
    Availability(String),

    #[error("playback failed: {0}")]
    Playback(String),

    #[error("notification permission denied")]
    Permission,

    #[error("settings persistence failed: {0}")]
    Persistence(String),
}

impl CoordinatorError {
    /// True for errors the reconnection supervisor may retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Playback(_) | Self::Availability(_))
    }
}
