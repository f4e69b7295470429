//! Platform audio engine boundary.
//!
//! The engine is an external `mpv --no-video --idle` process driven over its
//! JSON IPC socket.  We treat it as an opaque transport: load a URL, flip
//! pause/mute/volume, and observe status properties.  No codec or decoding
//! logic lives here.
//!
//! ```text
//!   EngineDriver::spawn_and_connect()
//!         │
//!         ├── writer task   ← EngineRequest via mpsc, serialised → socket
//!         └── reader task   ← JSON lines from socket
//!                               ├── response (request_id) → matched oneshot
//!                               └── property-change / event → event channel
//! ```
//!
//! `EngineHandle` is cheaply cloneable; `send()` returns a future resolving to
//! the engine's reply.  The driver owns the child process.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// Property observation IDs, matched in property-change events.
pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_PAUSE: u64 = 2;
pub const OBS_CACHE_WAIT: u64 = 3;
pub const OBS_MUTE: u64 = 4;

struct EngineRequest {
    req_id: u64,
    payload: String, // serialised JSON line, newline-terminated
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An unsolicited engine event (no request_id): property change or named event.
#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub raw: Value,
}

impl EngineEvent {
    /// `Some((obs_id, data))` when this is a property-change push.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Named event, e.g. "end-file", "start-file".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// For "end-file" events, the termination reason if present.
    pub fn end_reason(&self) -> Option<&str> {
        self.raw.get("reason")?.as_str()
    }
}

/// Cloneable handle to the engine writer task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("engine writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("engine IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("engine reply channel dropped req={}", req_id))?
    }

    pub async fn load_stream(&self, url: &str, volume: f32) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url])).await?;
        let vol_pct = (volume * 100.0).clamp(0.0, 100.0);
        let _ = self.send(json!(["set_property", "volume", vol_pct])).await;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        let _ = self.send(json!(["stop"])).await;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, volume: f32) -> anyhow::Result<()> {
        let vol_pct = (volume * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", vol_pct])).await?;
        Ok(())
    }

    pub async fn set_mute(&self, muted: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "mute", muted])).await?;
        Ok(())
    }

    /// Health check: Ok(()) when the engine responds.
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.send(json!(["get_property", "volume"])).await?;
        Ok(())
    }

    /// Register observation of every property the coordinator cares about.
    /// Must be re-issued on every fresh connection; the engine then pushes a
    /// property-change whenever any of them moves.
    pub async fn observe_playback_properties(&self) {
        let props = [
            (OBS_CORE_IDLE, "core-idle"),
            (OBS_PAUSE, "pause"),
            (OBS_CACHE_WAIT, "paused-for-cache"),
            (OBS_MUTE, "mute"),
        ];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("engine: observe_property id={} name={}", id, name),
                Err(e) => warn!("engine: observe_property {} failed: {}", name, e),
            }
        }
    }
}

/// Owns the engine child process and manages (re)connection.
pub struct EngineDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
}

impl EngineDriver {
    pub fn new() -> Self {
        Self {
            socket_name: radio_core::platform::engine_socket_name(),
            process: None,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn spawn_process(&mut self, volume: f32) -> anyhow::Result<()> {
        let binary = radio_core::platform::find_engine_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let vol_arg = format!(
            "--volume={}",
            (volume * 100.0).clamp(0.0, 100.0).round() as i64
        );
        let child = tokio::process::Command::new(binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(radio_core::platform::engine_socket_arg())
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<EngineEvent>,
        volume: f32,
    ) -> anyhow::Result<EngineHandle> {
        // Kill a stale process and its socket before spawning fresh.
        self.kill().await;
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        info!("engine: spawning audio engine process");
        self.spawn_process(volume)?;

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("engine IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("engine: connected to IPC socket");
        Ok(start_io_tasks(stream, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<EngineEvent>,
        volume: f32,
    ) -> anyhow::Result<EngineHandle> {
        self.kill().await;

        info!("engine: spawning audio engine process");
        self.spawn_process(volume)?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("engine: connected to named pipe");
                use tokio::io::split;
                let (read_half, write_half) = split(client);
                return Ok(start_io_halves(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("engine named pipe did not appear")
    }
}

#[cfg(unix)]
fn start_io_tasks(stream: UnixStream, event_tx: mpsc::Sender<EngineEvent>) -> EngineHandle {
    let (read_half, write_half) = stream.into_split();
    start_io_halves(read_half, write_half, event_tx)
}

fn start_io_halves<R, W>(
    read_half: R,
    write_half: W,
    event_tx: mpsc::Sender<EngineEvent>,
) -> EngineHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // pending map: req_id → reply channel; writer inserts, reader resolves.
    let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>> =
        Arc::new(Mutex::new(HashMap::new()));

    let (cmd_tx, cmd_rx) = mpsc::channel::<EngineRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    EngineHandle { tx: cmd_tx }
}

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>,
    event_tx: mpsc::Sender<EngineEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("engine reader: connection closed");
                fail_pending(&pending, "engine IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("engine reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err =
                                val["error"].as_str().unwrap_or("unknown error").to_string();
                            Err(anyhow::anyhow!("engine error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("engine reader: response for unknown req={}", req_id);
                    }
                } else {
                    let _ = event_tx.send(EngineEvent { raw: val }).await;
                }
            }
            Err(e) => {
                warn!("engine reader: read error: {}", e);
                fail_pending(&pending, "engine IPC read error").await;
                break;
            }
        }
    }
}

async fn fail_pending(
    pending: &Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>,
    reason: &str,
) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn writer_task<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<EngineRequest>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register the reply channel before writing so the reader can match it.
        {
            let mut map = pending.lock().await;
            map.insert(req.req_id, req.reply);
        }
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("engine writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("engine write error: {}", e)));
            }
            break;
        }
    }
    debug!("engine writer: task exiting");
}

// ── backend seam ──────────────────────────────────────────────────────────────

/// Connection seam between the playback controller and the engine process.
/// The production implementation is [`EngineDriver`]; tests plug in
/// [`testing::FakeEngineBackend`].
pub trait EngineBackend: Send + Sync {
    /// Establish (or re-establish) a connection, returning a fresh handle.
    /// Unsolicited events flow to `event_tx` for the lifetime of the
    /// connection.
    fn connect(
        &mut self,
        event_tx: mpsc::Sender<EngineEvent>,
        volume: f32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<EngineHandle>> + Send + '_>>;

    /// True while the underlying process is still alive.
    fn alive(&mut self) -> bool;

    /// Kill the engine and release its resources.
    fn shutdown(&mut self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>>;
}

impl EngineBackend for EngineDriver {
    fn connect(
        &mut self,
        event_tx: mpsc::Sender<EngineEvent>,
        volume: f32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<EngineHandle>> + Send + '_>>
    {
        Box::pin(self.spawn_and_connect(event_tx, volume))
    }

    fn alive(&mut self) -> bool {
        self.process_alive()
    }

    fn shutdown(&mut self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(self.kill())
    }
}

#[doc(hidden)]
pub mod testing {
    //! In-process fake engine: answers the command channel like the real
    //! writer/reader pair, recording every command it sees.

    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    pub struct FakeEngineLog {
        pub commands: StdMutex<Vec<Value>>,
    }

    impl FakeEngineLog {
        /// Commands of the form `["set_property", name, ..]` seen so far.
        pub fn property_sets(&self, name: &str) -> Vec<Value> {
            self.commands
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c[0] == "set_property" && c[1] == name)
                .map(|c| c[2].clone())
                .collect()
        }

        pub fn loaded_urls(&self) -> Vec<String> {
            self.commands
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c[0] == "loadfile")
                .filter_map(|c| c[1].as_str().map(String::from))
                .collect()
        }
    }

    /// Spawn a fake engine task.  Returns a handle whose `send()` always
    /// succeeds, plus the command log.
    pub fn spawn_fake_engine() -> (EngineHandle, Arc<FakeEngineLog>) {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<EngineRequest>(64);
        let log = Arc::new(FakeEngineLog::default());
        let log_task = log.clone();
        tokio::spawn(async move {
            while let Some(req) = cmd_rx.recv().await {
                let parsed: Value = serde_json::from_str(req.payload.trim()).unwrap();
                log_task
                    .commands
                    .lock()
                    .unwrap()
                    .push(parsed["command"].clone());
                let _ = req.reply.send(Ok(json!({ "error": "success" })));
            }
        });
        (EngineHandle { tx: cmd_tx }, log)
    }

    /// Backend whose connections are fake engine tasks.  Tests can inject
    /// unsolicited events and force connection failures.  Clones share all
    /// state, so a test can keep one while handing the other to the
    /// controller.
    #[derive(Clone)]
    pub struct FakeEngineBackend {
        pub log: Arc<FakeEngineLog>,
        pub fail_connect: Arc<AtomicBool>,
        /// Number of upcoming commands to answer with an error before
        /// recovering.
        pub fail_replies: Arc<AtomicU64>,
        pub connect_count: Arc<AtomicU64>,
        event_tx: Arc<StdMutex<Option<mpsc::Sender<EngineEvent>>>>,
    }

    impl Default for FakeEngineBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    impl FakeEngineBackend {
        pub fn new() -> Self {
            Self {
                log: Arc::new(FakeEngineLog::default()),
                fail_connect: Arc::new(AtomicBool::new(false)),
                fail_replies: Arc::new(AtomicU64::new(0)),
                connect_count: Arc::new(AtomicU64::new(0)),
                event_tx: Arc::new(StdMutex::new(None)),
            }
        }

        /// Push an unsolicited event as if the engine emitted it.
        pub async fn emit(&self, raw: Value) {
            let tx = self.event_tx.lock().unwrap().clone();
            if let Some(tx) = tx {
                let _ = tx.send(EngineEvent { raw }).await;
            }
        }
    }

    impl EngineBackend for FakeEngineBackend {
        fn connect(
            &mut self,
            event_tx: mpsc::Sender<EngineEvent>,
            _volume: f32,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = anyhow::Result<EngineHandle>> + Send + '_>,
        > {
            Box::pin(async move {
                self.connect_count.fetch_add(1, Ordering::Relaxed);
                if self.fail_connect.load(Ordering::Relaxed) {
                    anyhow::bail!("fake engine refused to start");
                }
                *self.event_tx.lock().unwrap() = Some(event_tx);
                let (cmd_tx, mut cmd_rx) = mpsc::channel::<EngineRequest>(64);
                let log_task = self.log.clone();
                let fail_replies = self.fail_replies.clone();
                tokio::spawn(async move {
                    while let Some(req) = cmd_rx.recv().await {
                        let parsed: Value = serde_json::from_str(req.payload.trim()).unwrap();
                        log_task
                            .commands
                            .lock()
                            .unwrap()
                            .push(parsed["command"].clone());
                        let remaining = fail_replies.load(Ordering::Relaxed);
                        let reply = if remaining > 0 {
                            fail_replies.store(remaining - 1, Ordering::Relaxed);
                            Err(anyhow::anyhow!("fake engine stalled"))
                        } else {
                            Ok(json!({ "error": "success" }))
                        };
                        let _ = req.reply.send(reply);
                    }
                });
                Ok(EngineHandle { tx: cmd_tx })
            })
        }

        fn alive(&mut self) -> bool {
            self.event_tx.lock().unwrap().is_some()
        }

        fn shutdown(
            &mut self,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
            Box::pin(async move {
                *self.event_tx.lock().unwrap() = None;
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_change_extraction() {
        let evt = EngineEvent {
            raw: json!({ "event": "property-change", "id": OBS_PAUSE, "data": true }),
        };
        let (id, data) = evt.as_property_change().unwrap();
        assert_eq!(id, OBS_PAUSE);
        assert_eq!(data.as_bool(), Some(true));
    }

    #[test]
    fn end_file_reason_extraction() {
        let evt = EngineEvent {
            raw: json!({ "event": "end-file", "reason": "network" }),
        };
        assert_eq!(evt.event_name(), Some("end-file"));
        assert_eq!(evt.end_reason(), Some("network"));
        assert!(evt.as_property_change().is_none());
    }

    #[tokio::test]
    async fn fake_engine_logs_commands() {
        let (handle, log) = testing::spawn_fake_engine();
        handle.set_pause(true).await.unwrap();
        handle.set_mute(true).await.unwrap();
        let commands = log.commands.lock().unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0][1], "pause");
        assert_eq!(commands[1][1], "mute");
    }
}
