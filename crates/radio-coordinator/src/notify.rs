//! Playback presence notifications.
//!
//! While a session exists the coordinator keeps one presence notification in
//! sync with playback state.  Re-pushes are rate-limited: within one cooldown
//! window the desired content is parked and flushed when the window closes,
//! so a flapping stream cannot spam the user.  Dismissal always precedes a
//! forced re-push.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceContent {
    pub title: String,
    pub body: String,
    pub playing: bool,
}

/// Delivery seam.  Production uses [`NotifySendBackend`]; tests plug in
/// [`testing::RecordingNotifyBackend`].
pub trait NotifyBackend: Send {
    fn show(&mut self, content: &PresenceContent) -> BoxFuture<'_, anyhow::Result<()>>;
    fn dismiss(&mut self) -> BoxFuture<'_, ()>;
    fn permission_granted(&mut self) -> BoxFuture<'_, bool>;
}

pub struct PresenceNotifier {
    backend: Box<dyn NotifyBackend>,
    enabled: bool,
    cooldown: Duration,
    last_push: Option<Instant>,
    shown: Option<PresenceContent>,
    /// Desired content parked while the cooldown window is open.
    pending: Option<PresenceContent>,
}

impl PresenceNotifier {
    pub fn new(backend: Box<dyn NotifyBackend>, enabled: bool, cooldown: Duration) -> Self {
        Self {
            backend,
            enabled,
            cooldown,
            last_push: None,
            shown: None,
            pending: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn permission_granted(&mut self) -> bool {
        self.backend.permission_granted().await
    }

    /// Toggle the user setting.  Disabling tears the presence down; enabling
    /// pushes the last desired content exactly once.
    pub async fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        if !enabled {
            info!("notify: disabled, tearing presence down");
            self.backend.dismiss().await;
            self.shown = None;
            self.pending = None;
            return;
        }
        if let Some(content) = self.pending.take().or_else(|| self.shown.take()) {
            self.push(content).await;
        }
    }

    /// Reconcile the presence with the desired state.  `None` means no
    /// session, hence no presence.  Returns how long until a parked push can
    /// go out, when one was parked.
    pub async fn sync(&mut self, desired: Option<PresenceContent>) -> Option<Duration> {
        let Some(content) = desired else {
            if self.shown.is_some() {
                debug!("notify: session gone, dismissing");
                self.backend.dismiss().await;
                self.shown = None;
            }
            self.pending = None;
            return None;
        };

        if !self.enabled {
            // Remember the latest desired content so re-enabling can push it.
            self.pending = Some(content);
            return None;
        }

        if self.shown.as_ref() == Some(&content) {
            self.pending = None;
            return None;
        }

        if let Some(remaining) = self.cooldown_remaining() {
            debug!("notify: within cooldown, parking push for {:?}", remaining);
            self.pending = Some(content);
            return Some(remaining);
        }

        self.push(content).await;
        None
    }

    /// Push the parked content if its window has closed.  Returns the
    /// remaining wait otherwise.
    pub async fn flush(&mut self) -> Option<Duration> {
        if self.pending.is_none() || !self.enabled {
            return None;
        }
        if let Some(remaining) = self.cooldown_remaining() {
            return Some(remaining);
        }
        if let Some(content) = self.pending.take() {
            if self.shown.as_ref() != Some(&content) {
                self.push(content).await;
            }
        }
        None
    }

    pub async fn teardown(&mut self) {
        self.backend.dismiss().await;
        self.shown = None;
        self.pending = None;
    }

    fn cooldown_remaining(&self) -> Option<Duration> {
        let last = self.last_push?;
        let elapsed = last.elapsed();
        if elapsed < self.cooldown {
            Some(self.cooldown - elapsed)
        } else {
            None
        }
    }

    async fn push(&mut self, content: PresenceContent) {
        // Replace, never stack: the old presence goes first.
        if self.shown.is_some() {
            self.backend.dismiss().await;
        }
        if let Err(e) = self.backend.show(&content).await {
            warn!("notify: push failed: {}", e);
        }
        self.last_push = Some(Instant::now());
        self.shown = Some(content);
        self.pending = None;
    }
}

// ── desktop backend ───────────────────────────────────────────────────────────

/// `notify-send` based delivery.  A synchronous hint keyed on the channel id
/// makes every push replace the previous one server-side as well.
pub struct NotifySendBackend {
    channel_id: String,
}

impl NotifySendBackend {
    pub fn new(channel_id: String) -> Self {
        Self { channel_id }
    }

    fn binary() -> Option<std::path::PathBuf> {
        let path = std::env::var_os("PATH")?;
        std::env::split_paths(&path)
            .map(|dir| dir.join("notify-send"))
            .find(|candidate| candidate.is_file())
    }
}

impl NotifyBackend for NotifySendBackend {
    fn show(&mut self, content: &PresenceContent) -> BoxFuture<'_, anyhow::Result<()>> {
        let title = content.title.clone();
        let body = content.body.clone();
        let hint = format!("string:x-canonical-private-synchronous:{}", self.channel_id);
        Box::pin(async move {
            let binary =
                Self::binary().ok_or_else(|| anyhow::anyhow!("notify-send not found"))?;
            let status = tokio::process::Command::new(binary)
                .arg("-a")
                .arg(&title)
                .arg("-h")
                .arg(&hint)
                .arg(&title)
                .arg(&body)
                .status()
                .await?;
            if !status.success() {
                anyhow::bail!("notify-send exited with {}", status);
            }
            Ok(())
        })
    }

    fn dismiss(&mut self) -> BoxFuture<'_, ()> {
        let hint = format!("string:x-canonical-private-synchronous:{}", self.channel_id);
        Box::pin(async move {
            // An immediately expiring replacement clears the synchronous slot.
            let Some(binary) = Self::binary() else {
                return;
            };
            let _ = tokio::process::Command::new(binary)
                .arg("-t")
                .arg("1")
                .arg("-h")
                .arg(&hint)
                .arg("-h")
                .arg("boolean:transient:true")
                .arg(" ")
                .status()
                .await;
        })
    }

    fn permission_granted(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async move { Self::binary().is_some() })
    }
}

#[doc(hidden)]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum NotifyOp {
        Show(PresenceContent),
        Dismiss,
    }

    #[derive(Default)]
    pub struct NotifyLog {
        pub ops: Mutex<Vec<NotifyOp>>,
    }

    impl NotifyLog {
        pub fn shows(&self) -> Vec<PresenceContent> {
            self.ops
                .lock()
                .unwrap()
                .iter()
                .filter_map(|op| match op {
                    NotifyOp::Show(content) => Some(content.clone()),
                    NotifyOp::Dismiss => None,
                })
                .collect()
        }
    }

    pub struct RecordingNotifyBackend {
        pub log: Arc<NotifyLog>,
        pub permitted: Arc<AtomicBool>,
    }

    impl RecordingNotifyBackend {
        pub fn new() -> Self {
            Self {
                log: Arc::new(NotifyLog::default()),
                permitted: Arc::new(AtomicBool::new(true)),
            }
        }
    }

    impl Default for RecordingNotifyBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    impl NotifyBackend for RecordingNotifyBackend {
        fn show(&mut self, content: &PresenceContent) -> BoxFuture<'_, anyhow::Result<()>> {
            let content = content.clone();
            Box::pin(async move {
                self.log.ops.lock().unwrap().push(NotifyOp::Show(content));
                Ok(())
            })
        }

        fn dismiss(&mut self) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                self.log.ops.lock().unwrap().push(NotifyOp::Dismiss);
            })
        }

        fn permission_granted(&mut self) -> BoxFuture<'_, bool> {
            Box::pin(async move { self.permitted.load(Ordering::Relaxed) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{NotifyOp, RecordingNotifyBackend};
    use super::*;
    use std::sync::Arc;

    const COOLDOWN: Duration = Duration::from_secs(60);

    fn content(body: &str, playing: bool) -> PresenceContent {
        PresenceContent {
            title: "Radio".to_string(),
            body: body.to_string(),
            playing,
        }
    }

    fn notifier(enabled: bool) -> (PresenceNotifier, Arc<testing::NotifyLog>) {
        let backend = RecordingNotifyBackend::new();
        let log = backend.log.clone();
        (
            PresenceNotifier::new(Box::new(backend), enabled, COOLDOWN),
            log,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_one_push_per_cooldown_window() {
        let (mut notifier, log) = notifier(true);

        assert!(notifier.sync(Some(content("Live", true))).await.is_none());
        // Flapping inside the window parks instead of pushing.
        let wait = notifier.sync(Some(content("Loading...", true))).await;
        assert!(wait.is_some());
        let wait = notifier.sync(Some(content("Live", true))).await;
        assert!(wait.is_some());
        assert_eq!(log.shows().len(), 1);

        tokio::time::advance(COOLDOWN + Duration::from_millis(1)).await;
        assert!(notifier.flush().await.is_none());
        let shows = log.shows();
        assert_eq!(shows.len(), 2);
        assert_eq!(shows[1].body, "Live");
    }

    #[tokio::test(start_paused = true)]
    async fn identical_content_is_not_repushed() {
        let (mut notifier, log) = notifier(true);
        notifier.sync(Some(content("Live", true))).await;
        tokio::time::advance(COOLDOWN * 2).await;
        notifier.sync(Some(content("Live", true))).await;
        assert_eq!(log.shows().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repush_dismisses_first() {
        let (mut notifier, log) = notifier(true);
        notifier.sync(Some(content("Live", true))).await;
        tokio::time::advance(COOLDOWN * 2).await;
        notifier.sync(Some(content("Live (paused)", false))).await;

        let ops = log.ops.lock().unwrap().clone();
        assert_eq!(
            ops,
            vec![
                NotifyOp::Show(content("Live", true)),
                NotifyOp::Dismiss,
                NotifyOp::Show(content("Live (paused)", false)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_suppresses_and_reenable_pushes_once() {
        let (mut notifier, log) = notifier(false);
        notifier.sync(Some(content("Live", true))).await;
        notifier.sync(Some(content("Loading...", true))).await;
        assert!(log.shows().is_empty());

        notifier.set_enabled(true).await;
        let shows = log.shows();
        assert_eq!(shows.len(), 1);
        assert_eq!(shows[0].body, "Loading...");
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_tears_the_presence_down() {
        let (mut notifier, log) = notifier(true);
        notifier.sync(Some(content("Live", true))).await;
        notifier.set_enabled(false).await;
        assert_eq!(
            log.ops.lock().unwrap().last(),
            Some(&NotifyOp::Dismiss)
        );
        // Nothing further goes out while disabled.
        notifier.sync(Some(content("Live", true))).await;
        assert_eq!(log.shows().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn session_end_dismisses() {
        let (mut notifier, log) = notifier(true);
        notifier.sync(Some(content("Live", true))).await;
        notifier.sync(None).await;
        assert_eq!(log.ops.lock().unwrap().last(), Some(&NotifyOp::Dismiss));
    }
}
