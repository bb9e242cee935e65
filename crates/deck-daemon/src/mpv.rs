/// JSON IPC client for the mpv instances the daemon drives.
///
/// ```text
///   MpvSession::handle()
///         │  (spawns or reconnects on demand)
///         ├── writer_task   ← MpvRequest via mpsc → socket
///         └── reader_task   ← JSON lines from socket
///                                ├── reply (request_id) → oneshot
///                                └── event / property-change → event_tx
/// ```
///
/// One session per role: `direct` plays stream references, `embed` plays
/// catalog video ids through mpv's ytdl hook.
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

// ── observation property IDs ──────────────────────────────────────────────────

pub const OBS_PAUSE: u64 = 1;
pub const OBS_TIME_POS: u64 = 2;
pub const OBS_DURATION: u64 = 3;
pub const OBS_PAUSED_FOR_CACHE: u64 = 4;

/// Properties the direct-stream session pushes as property-change events.
pub const DIRECT_OBSERVED: &[(u64, &str)] = &[
    (OBS_PAUSE, "pause"),
    (OBS_TIME_POS, "time-pos"),
    (OBS_DURATION, "duration"),
    (OBS_PAUSED_FOR_CACHE, "paused-for-cache"),
];

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct MpvRequest {
    req_id: u64,
    line: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// Anything mpv sent without a `request_id`.
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// `Some((obs_id, data))` for property-change events.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.event_name()? != "property-change" {
            return None;
        }
        let id = self.raw.get("id")?.as_u64()?;
        Some((id, self.raw.get("data").unwrap_or(&Value::Null)))
    }

    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// `reason` field of an `end-file` event: "eof", "stop", "error", ...
    pub fn end_reason(&self) -> Option<&str> {
        self.raw.get("reason")?.as_str()
    }

    pub fn file_error(&self) -> Option<&str> {
        self.raw.get("file_error")?.as_str()
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

/// Cloneable sender into the writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<MpvRequest>,
    /// Cleared by the reader task when the socket closes.
    connected: Arc<AtomicBool>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&json!({ "command": command, "request_id": req_id }))?;
        line.push('\n');

        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(MpvRequest {
                req_id,
                line,
                reply,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(REPLY_TIMEOUT, reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || !self.connected.load(Ordering::Relaxed)
    }

    pub async fn load_file(&self, location: &str) -> anyhow::Result<()> {
        self.send(json!(["loadfile", location, "replace"])).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_property(&self, name: &str, value: Value) -> anyhow::Result<()> {
        self.send(json!(["set_property", name, value])).await?;
        Ok(())
    }

    /// `Ok(None)` when mpv reports the property unavailable (nothing loaded).
    pub async fn get_property(&self, name: &str) -> anyhow::Result<Option<Value>> {
        match self.send(json!(["get_property", name])).await {
            Ok(resp) => Ok(resp.get("data").cloned().filter(|v| !v.is_null())),
            Err(e) if e.to_string().contains("property unavailable") => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get_f64(&self, name: &str) -> anyhow::Result<Option<f64>> {
        Ok(self.get_property(name).await?.and_then(|v| v.as_f64()))
    }

    pub async fn get_bool(&self, name: &str) -> anyhow::Result<Option<bool>> {
        Ok(self.get_property(name).await?.and_then(|v| v.as_bool()))
    }

    pub async fn get_string(&self, name: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .get_property(name)
            .await?
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.set_property("pause", json!(paused)).await
    }

    pub async fn seek_to(&self, secs: f64) -> anyhow::Result<()> {
        self.send(json!(["seek", secs, "absolute"])).await?;
        Ok(())
    }

    /// Must be re-issued on every fresh connection.
    pub async fn observe(&self, props: &[(u64, &str)]) {
        for (id, name) in props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        self.send(json!(["get_property", "mpv-version"])).await?;
        Ok(())
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns one mpv child process.
pub struct MpvDriver {
    role: &'static str,
    extra_args: Vec<String>,
    process: Option<tokio::process::Child>,
}

impl MpvDriver {
    pub fn new(role: &'static str, extra_args: Vec<String>) -> Self {
        Self {
            role,
            extra_args,
            process: None,
        }
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    async fn spawn_process(&mut self) -> anyhow::Result<()> {
        self.kill().await;

        let mpv_binary = deck_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        info!("mpv[{}]: spawning {}", self.role, mpv_binary.display());

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--idle=yes")
            .arg("--quiet")
            .arg(deck_proto::platform::mpv_socket_arg(self.role))
            .args(&self.extra_args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        let socket_path = std::path::PathBuf::from(deck_proto::platform::mpv_socket_name(self.role));
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process().await?;

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv[{}] IPC socket did not appear", self.role);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv[{}]: connected to IPC socket", self.role);
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    /// Attach to a socket left by an earlier daemon without spawning.
    #[cfg(unix)]
    pub async fn try_reconnect(&mut self, event_tx: mpsc::Sender<MpvEvent>) -> Option<MpvHandle> {
        let socket_path = std::path::PathBuf::from(deck_proto::platform::mpv_socket_name(self.role));
        if !socket_path.exists() {
            return None;
        }
        match UnixStream::connect(&socket_path).await {
            Ok(stream) => {
                info!("mpv[{}]: reconnected to existing IPC socket", self.role);
                let (read_half, write_half) = stream.into_split();
                Some(start_io_tasks(read_half, write_half, event_tx))
            }
            Err(e) => {
                debug!("mpv[{}]: reconnect failed: {}", self.role, e);
                None
            }
        }
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.spawn_process().await?;

        let pipe_path = format!(r"\\.\pipe\{}", deck_proto::platform::mpv_socket_name(self.role));
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv[{}]: connected to named pipe", self.role);
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("mpv[{}] named pipe did not appear", self.role)
    }

    #[cfg(windows)]
    pub async fn try_reconnect(&mut self, event_tx: mpsc::Sender<MpvEvent>) -> Option<MpvHandle> {
        let pipe_path = format!(r"\\.\pipe\{}", deck_proto::platform::mpv_socket_name(self.role));
        match ClientOptions::new().open(&pipe_path) {
            Ok(client) => {
                info!("mpv[{}]: reconnected to named pipe", self.role);
                let (read_half, write_half) = tokio::io::split(client);
                Some(start_io_tasks(read_half, write_half, event_tx))
            }
            Err(e) => {
                debug!("mpv[{}]: reconnect failed: {}", self.role, e);
                None
            }
        }
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let connected = Arc::new(AtomicBool::new(true));
    let (tx, rx) = mpsc::channel::<MpvRequest>(64);

    tokio::spawn(writer_task(write_half, rx, pending.clone()));
    tokio::spawn(reader_task(
        BufReader::new(read_half),
        pending,
        event_tx,
        connected.clone(),
    ));

    MpvHandle { tx, connected }
}

// ── session ───────────────────────────────────────────────────────────────────

/// A driver plus its live connection.  Reconnects or respawns lazily the
/// next time a caller asks for a handle.
pub struct MpvSession {
    driver: Mutex<MpvDriver>,
    handle: Mutex<Option<MpvHandle>>,
    /// Receives events from every connection this session makes.
    event_tx: mpsc::Sender<MpvEvent>,
    observed: &'static [(u64, &'static str)],
}

impl MpvSession {
    pub fn new(
        driver: MpvDriver,
        event_tx: mpsc::Sender<MpvEvent>,
        observed: &'static [(u64, &'static str)],
    ) -> Self {
        Self {
            driver: Mutex::new(driver),
            handle: Mutex::new(None),
            event_tx,
            observed,
        }
    }

    /// A live handle, spawning mpv if needed.
    pub async fn handle(&self) -> anyhow::Result<MpvHandle> {
        let mut slot = self.handle.lock().await;
        let mut driver = self.driver.lock().await;

        if let Some(h) = slot.as_ref() {
            if !h.is_closed() {
                return Ok(h.clone());
            }
            warn!("mpv[{}]: connection lost, reconnecting", driver.role());
        }

        let handle = match driver.try_reconnect(self.event_tx.clone()).await {
            Some(h) if h.ping().await.is_ok() => h,
            _ => driver.spawn_and_connect(self.event_tx.clone()).await?,
        };
        handle.observe(self.observed).await;
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// The current handle without spawning anything.
    pub async fn current(&self) -> Option<MpvHandle> {
        self.handle
            .lock()
            .await
            .as_ref()
            .filter(|h| !h.is_closed())
            .cloned()
    }

    pub async fn shutdown(&self) {
        if let Some(h) = self.handle.lock().await.take() {
            let _ = h.send(json!(["quit"])).await;
        }
        self.driver.lock().await.kill().await;
    }
}

// ── reader / writer tasks ─────────────────────────────────────────────────────

async fn fail_all(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<MpvEvent>,
    connected: Arc<AtomicBool>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_all(&pending, "mpv IPC connection closed").await;
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
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                let Some(req_id) = val.get("request_id").and_then(Value::as_u64) else {
                    // A dropped receiver only means nobody listens to events.
                    let _ = event_tx.send(MpvEvent { raw: val }).await;
                    continue;
                };

                let Some(tx) = pending.lock().await.remove(&req_id) else {
                    debug!("mpv reader: response for unknown req={}", req_id);
                    continue;
                };
                let result = match val["error"].as_str() {
                    Some("success") => Ok(val),
                    other => Err(anyhow::anyhow!(
                        "mpv error: {}",
                        other.unwrap_or("unknown error")
                    )),
                };
                let _ = tx.send(result);
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_all(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<MpvRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can always match the reply.
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: req={} {}", req.req_id, req.line.trim());
        if let Err(e) = writer.write_all(req.line.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}
