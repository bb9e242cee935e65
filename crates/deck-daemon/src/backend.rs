//! Playback backends.
//!
//! The core talks to exactly one active backend at a time through
//! [`PlaybackBackend`].  `DirectStream` plays a track's stream reference in a
//! dedicated mpv and pushes progress; `EmbeddedVideo` (see `embed.rs`) plays
//! catalog matches and has to be polled.

use crate::error::LoadError;
use crate::mpv::{
    MpvDriver, MpvEvent, MpvSession, DIRECT_OBSERVED, OBS_DURATION, OBS_PAUSED_FOR_CACHE,
    OBS_TIME_POS,
};
use deck_proto::protocol::BackendKind;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Progress and lifecycle notifications from a push-capable backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendSignal {
    /// mpv began opening a new file.
    Started,
    /// A file finished loading and is ready to play.
    Ready {
        location: String,
        duration: Option<f64>,
        paused: bool,
    },
    TimeUpdate {
        position: Option<f64>,
        duration: Option<f64>,
    },
    BufferingChanged(bool),
    Ended,
    Failed {
        reason: String,
    },
}

/// What a backend is asked to load: a stream location or an embed video id.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub target: String,
    pub autoplay: bool,
}

/// Result of a successful load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedHandle {
    pub duration_secs: Option<f64>,
    /// False when autoplay was requested but the player stayed paused.
    pub playing: bool,
}

pub trait PlaybackBackend: Clone + Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    /// Whether position and end-of-track arrive as signals.  Poll-only
    /// backends are sampled on the core tick instead.
    fn supports_push_progress(&self) -> bool;

    /// Whether a seek makes the player rebuffer (the core shows Loading).
    fn seek_buffers(&self) -> bool;

    /// Ready to accept loads.  Only the embed host ever reports false.
    fn is_ready(&self) -> bool;

    fn load(&self, request: LoadRequest)
        -> impl Future<Output = Result<LoadedHandle, LoadError>> + Send;

    fn play(&self) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn pause(&self) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn seek_to(&self, secs: f64) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn stop(&self) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn position(&self) -> impl Future<Output = Option<f64>> + Send;

    fn duration(&self) -> impl Future<Output = Option<f64>> + Send;

    /// Poll-only end-of-track detection.
    fn has_ended(&self) -> impl Future<Output = bool> + Send;

    /// `None` for poll-only backends.
    fn subscribe(&self) -> Option<broadcast::Receiver<BackendSignal>>;
}

// ── DirectStream ──────────────────────────────────────────────────────────────

/// A dedicated mpv instance playing stream references.
#[derive(Clone)]
pub struct DirectStream {
    session: Arc<MpvSession>,
    signals: broadcast::Sender<BackendSignal>,
    gate: Arc<LoadGate>,
    load_timeout: Duration,
}

impl DirectStream {
    pub fn new(load_timeout: Duration) -> Self {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (signals, _) = broadcast::channel(64);
        let session = Arc::new(MpvSession::new(
            MpvDriver::new("direct", vec!["--no-video".into()]),
            event_tx,
            DIRECT_OBSERVED,
        ));
        tokio::spawn(pump_events(session.clone(), event_rx, signals.clone()));
        Self {
            session,
            signals,
            gate: Arc::new(LoadGate::new()),
            load_timeout,
        }
    }

    pub async fn shutdown(&self) {
        self.session.shutdown().await;
    }
}

impl PlaybackBackend for DirectStream {
    fn kind(&self) -> BackendKind {
        BackendKind::DirectStream
    }

    fn supports_push_progress(&self) -> bool {
        true
    }

    fn seek_buffers(&self) -> bool {
        false
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn load(&self, request: LoadRequest) -> Result<LoadedHandle, LoadError> {
        let Some(mut turn) = self.gate.enter().await else {
            return Err(LoadError::Superseded);
        };
        let handle = self.session.handle().await?;
        // Subscribe before loadfile so the Ready for this file cannot be missed.
        let mut rx = self.signals.subscribe();

        handle.set_pause(!request.autoplay).await?;
        handle.load_file(&request.target).await?;

        tokio::time::timeout(
            self.load_timeout,
            wait_until_loaded(&mut rx, &mut turn, &request.target),
        )
        .await
        .map_err(|_| LoadError::Timeout(self.load_timeout))?
    }

    async fn play(&self) -> anyhow::Result<()> {
        self.session.handle().await?.set_pause(false).await
    }

    async fn pause(&self) -> anyhow::Result<()> {
        self.session.handle().await?.set_pause(true).await
    }

    async fn seek_to(&self, secs: f64) -> anyhow::Result<()> {
        self.session.handle().await?.seek_to(secs).await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        match self.session.current().await {
            Some(h) => h.stop().await,
            None => Ok(()),
        }
    }

    async fn position(&self) -> Option<f64> {
        let h = self.session.current().await?;
        h.get_f64("time-pos").await.ok().flatten()
    }

    async fn duration(&self) -> Option<f64> {
        let h = self.session.current().await?;
        h.get_f64("duration").await.ok().flatten()
    }

    async fn has_ended(&self) -> bool {
        false
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<BackendSignal>> {
        Some(self.signals.subscribe())
    }
}

/// Serializes loads on one mpv session.  Each load takes a ticket; a load
/// still waiting for its file gives up as soon as a newer ticket is issued.
struct LoadGate {
    lock: Mutex<()>,
    latest: watch::Sender<u64>,
}

struct LoadTurn<'a> {
    _guard: MutexGuard<'a, ()>,
    ticket: u64,
    latest: watch::Receiver<u64>,
}

impl LoadGate {
    fn new() -> Self {
        let (latest, _) = watch::channel(0);
        Self {
            lock: Mutex::new(()),
            latest,
        }
    }

    /// Waits for the previous load to finish or give up.  `None` when a
    /// newer load was requested in the meantime.
    async fn enter(&self) -> Option<LoadTurn<'_>> {
        let mut ticket = 0;
        self.latest.send_modify(|n| {
            *n += 1;
            ticket = *n;
        });
        let latest = self.latest.subscribe();
        let guard = self.lock.lock().await;
        if *latest.borrow() != ticket {
            return None;
        }
        Some(LoadTurn {
            _guard: guard,
            ticket,
            latest,
        })
    }
}

impl LoadTurn<'_> {
    /// Resolves once a newer load has been requested.
    async fn superseded(&mut self) {
        loop {
            if *self.latest.borrow_and_update() != self.ticket {
                return;
            }
            if self.latest.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Wait for `file-loaded` of `target`.  mpv reports the end of the file being
/// replaced before it starts the new one, so failures seen before `Started`
/// belong to the old file.
async fn wait_until_loaded(
    rx: &mut broadcast::Receiver<BackendSignal>,
    turn: &mut LoadTurn<'_>,
    target: &str,
) -> Result<LoadedHandle, LoadError> {
    let mut started = false;
    loop {
        let signal = tokio::select! {
            _ = turn.superseded() => return Err(LoadError::Superseded),
            signal = rx.recv() => signal,
        };
        match signal {
            Ok(BackendSignal::Started) => started = true,
            Ok(BackendSignal::Ready {
                location,
                duration,
                paused,
            }) if location == target => {
                return Ok(LoadedHandle {
                    duration_secs: duration,
                    playing: !paused,
                });
            }
            Ok(BackendSignal::Failed { reason }) if started => {
                return Err(LoadError::Backend(reason));
            }
            Ok(BackendSignal::Failed { reason }) => {
                debug!("direct: ignoring failure of the replaced file: {}", reason);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!("direct: load waiter lagged by {} signals", n);
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err(LoadError::Backend("signal channel closed".into()));
            }
        }
    }
}

/// Signals that follow directly from one mpv event.  `file-loaded` needs
/// follow-up queries and is handled by the pump.
pub fn signal_from_event(evt: &MpvEvent) -> Option<BackendSignal> {
    if let Some((id, data)) = evt.as_property_change() {
        return match id {
            OBS_TIME_POS => Some(BackendSignal::TimeUpdate {
                position: data.as_f64(),
                duration: None,
            }),
            OBS_DURATION => data.as_f64().map(|d| BackendSignal::TimeUpdate {
                position: None,
                duration: Some(d),
            }),
            OBS_PAUSED_FOR_CACHE => Some(BackendSignal::BufferingChanged(
                data.as_bool().unwrap_or(false),
            )),
            _ => None,
        };
    }

    match (evt.event_name()?, evt.end_reason()) {
        ("start-file", _) => Some(BackendSignal::Started),
        ("end-file", Some("eof")) => Some(BackendSignal::Ended),
        ("end-file", Some("error")) => Some(BackendSignal::Failed {
            reason: evt.file_error().unwrap_or("playback error").to_string(),
        }),
        _ => None,
    }
}

async fn pump_events(
    session: Arc<MpvSession>,
    mut events: mpsc::Receiver<MpvEvent>,
    signals: broadcast::Sender<BackendSignal>,
) {
    while let Some(evt) = events.recv().await {
        if evt.event_name() == Some("file-loaded") {
            // Queried off the pump: the reader task is blocked while our
            // event queue is full, and replies come through the reader.
            let session = session.clone();
            let signals = signals.clone();
            tokio::spawn(async move {
                let Some(h) = session.current().await else {
                    return;
                };
                let location = match h.get_string("path").await {
                    Ok(Some(p)) => p,
                    Ok(None) => return,
                    Err(e) => {
                        warn!("direct: could not read path after file-loaded: {}", e);
                        return;
                    }
                };
                let duration = h.get_f64("duration").await.ok().flatten();
                let paused = h.get_bool("pause").await.ok().flatten().unwrap_or(false);
                let _ = signals.send(BackendSignal::Ready {
                    location,
                    duration,
                    paused,
                });
            });
            continue;
        }

        if let Some(signal) = signal_from_event(&evt) {
            // No receivers between loads is normal.
            let _ = signals.send(signal);
        }
    }
    debug!("direct: event pump exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evt(raw: serde_json::Value) -> MpvEvent {
        MpvEvent { raw }
    }

    #[test]
    fn test_time_pos_becomes_time_update() {
        let s = signal_from_event(&evt(
            json!({"event": "property-change", "id": OBS_TIME_POS, "data": 3.25}),
        ));
        assert_eq!(
            s,
            Some(BackendSignal::TimeUpdate {
                position: Some(3.25),
                duration: None
            })
        );
    }

    #[test]
    fn test_unknown_duration_is_dropped() {
        let s = signal_from_event(&evt(
            json!({"event": "property-change", "id": OBS_DURATION, "data": null}),
        ));
        assert_eq!(s, None);
    }

    #[test]
    fn test_cache_pause_is_buffering() {
        let s = signal_from_event(&evt(
            json!({"event": "property-change", "id": OBS_PAUSED_FOR_CACHE, "data": true}),
        ));
        assert_eq!(s, Some(BackendSignal::BufferingChanged(true)));
    }

    #[test]
    fn test_start_file_is_started() {
        assert_eq!(
            signal_from_event(&evt(json!({"event": "start-file", "playlist_entry_id": 2}))),
            Some(BackendSignal::Started)
        );
    }

    #[test]
    fn test_end_file_reasons() {
        assert_eq!(
            signal_from_event(&evt(json!({"event": "end-file", "reason": "eof"}))),
            Some(BackendSignal::Ended)
        );
        // Replacing the file emits end-file/stop for the old one.
        assert_eq!(
            signal_from_event(&evt(json!({"event": "end-file", "reason": "stop"}))),
            None
        );
        assert!(matches!(
            signal_from_event(&evt(
                json!({"event": "end-file", "reason": "error", "file_error": "unrecognized file format"})
            )),
            Some(BackendSignal::Failed { reason }) if reason == "unrecognized file format"
        ));
    }

    fn ready(location: &str) -> BackendSignal {
        BackendSignal::Ready {
            location: location.into(),
            duration: Some(120.0),
            paused: false,
        }
    }

    #[tokio::test]
    async fn test_failure_of_replaced_file_does_not_fail_new_load() {
        let gate = LoadGate::new();
        let mut turn = gate.enter().await.unwrap();
        let (tx, mut rx) = broadcast::channel(8);
        tx.send(BackendSignal::Failed {
            reason: "old file".into(),
        })
        .unwrap();
        tx.send(BackendSignal::Started).unwrap();
        tx.send(ready("b")).unwrap();

        let loaded = wait_until_loaded(&mut rx, &mut turn, "b").await.unwrap();
        assert_eq!(loaded.duration_secs, Some(120.0));
        assert!(loaded.playing);
    }

    #[tokio::test]
    async fn test_failure_after_start_fails_the_load() {
        let gate = LoadGate::new();
        let mut turn = gate.enter().await.unwrap();
        let (tx, mut rx) = broadcast::channel(8);
        tx.send(ready("a")).unwrap();
        tx.send(BackendSignal::Started).unwrap();
        tx.send(BackendSignal::Failed {
            reason: "unrecognized file format".into(),
        })
        .unwrap();

        let err = wait_until_loaded(&mut rx, &mut turn, "b").await.unwrap_err();
        assert!(matches!(err, LoadError::Backend(r) if r == "unrecognized file format"));
    }

    #[tokio::test]
    async fn test_newer_load_waits_and_supersedes_older() {
        let gate = Arc::new(LoadGate::new());
        let mut first = gate.enter().await.unwrap();
        let (_tx, mut rx) = broadcast::channel::<BackendSignal>(8);

        let g = gate.clone();
        let second = tokio::spawn(async move { g.enter().await.map(|t| t.ticket) });

        // The waiting load gives up once the newer one is queued.
        let err = tokio::time::timeout(
            Duration::from_secs(1),
            wait_until_loaded(&mut rx, &mut first, "a"),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert!(matches!(err, LoadError::Superseded));
        assert!(!second.is_finished());

        drop(first);
        assert_eq!(second.await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_queued_load_is_skipped_when_a_newer_one_arrives() {
        let gate = Arc::new(LoadGate::new());
        let first = gate.enter().await.unwrap();

        let g = gate.clone();
        let second = tokio::spawn(async move { g.enter().await.map(|t| t.ticket) });
        while *gate.latest.borrow() < 2 {
            tokio::task::yield_now().await;
        }
        let g = gate.clone();
        let third = tokio::spawn(async move { g.enter().await.map(|t| t.ticket) });
        while *gate.latest.borrow() < 3 {
            tokio::task::yield_now().await;
        }

        drop(first);
        assert_eq!(second.await.unwrap(), None);
        assert_eq!(third.await.unwrap(), Some(3));
    }
}
