//! In-memory stand-ins for backends and network collaborators.

use crate::backend::{BackendSignal, LoadRequest, LoadedHandle, PlaybackBackend};
use crate::discovery::Discovery;
use crate::embed::EmbeddedVideoHost;
use crate::error::{DiscoveryError, LoadError, LyricsError};
use crate::lyrics_provider::{LyricsLookup, LyricsProvider};
use deck_proto::protocol::BackendKind;
use deck_proto::track::{Track, TrackSource};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

pub fn track(id: &str, genre: Option<&str>) -> Track {
    Track {
        id: id.to_string(),
        title: format!("Title {id}"),
        artist_name: format!("Artist {id}"),
        duration_millis: Some(180_000),
        artwork_ref: None,
        source_ref: Some(TrackSource::Stream(format!("https://cdn.test/{id}.m4a"))),
        genre: genre.map(str::to_string),
    }
}

pub fn stream_of(id: &str) -> String {
    format!("https://cdn.test/{id}.m4a")
}

/// A track with neither a stream nor (unless catalogued) an embed.
pub fn unplayable(id: &str) -> Track {
    Track {
        source_ref: None,
        ..track(id, None)
    }
}

// ── backend ───────────────────────────────────────────────────────────────────

type Gate = oneshot::Receiver<Result<LoadedHandle, LoadError>>;

struct BackendInner {
    ready: AtomicBool,
    reject_autoplay: AtomicBool,
    playing: AtomicBool,
    ended: AtomicBool,
    stops: AtomicU32,
    duration: Mutex<Option<f64>>,
    position: Mutex<Option<f64>>,
    loads: Mutex<Vec<String>>,
    seeks: Mutex<Vec<f64>>,
    gates: Mutex<HashMap<String, Gate>>,
    failing: Mutex<HashSet<String>>,
    signals: broadcast::Sender<BackendSignal>,
}

#[derive(Clone)]
pub struct FakeBackend {
    kind: BackendKind,
    inner: Arc<BackendInner>,
}

impl FakeBackend {
    fn with_kind(kind: BackendKind, ready: bool) -> Self {
        let (signals, _) = broadcast::channel(64);
        Self {
            kind,
            inner: Arc::new(BackendInner {
                ready: AtomicBool::new(ready),
                reject_autoplay: AtomicBool::new(false),
                playing: AtomicBool::new(false),
                ended: AtomicBool::new(false),
                stops: AtomicU32::new(0),
                duration: Mutex::new(Some(180.0)),
                position: Mutex::new(None),
                loads: Mutex::new(Vec::new()),
                seeks: Mutex::new(Vec::new()),
                gates: Mutex::new(HashMap::new()),
                failing: Mutex::new(HashSet::new()),
                signals,
            }),
        }
    }

    /// Push-capable, always ready.
    pub fn direct() -> Self {
        Self::with_kind(BackendKind::DirectStream, true)
    }

    /// Poll-only, not ready until [`set_ready`](Self::set_ready).
    pub fn embedded() -> Self {
        Self::with_kind(BackendKind::EmbeddedVideo, false)
    }

    pub fn set_ready(&self, ready: bool) {
        self.inner.ready.store(ready, Ordering::SeqCst);
    }

    pub fn reject_autoplay(&self, reject: bool) {
        self.inner.reject_autoplay.store(reject, Ordering::SeqCst);
    }

    pub fn set_duration(&self, d: Option<f64>) {
        *self.inner.duration.lock().unwrap() = d;
    }

    pub fn set_position(&self, p: Option<f64>) {
        *self.inner.position.lock().unwrap() = p;
    }

    pub fn set_ended(&self, ended: bool) {
        self.inner.ended.store(ended, Ordering::SeqCst);
    }

    /// Hold the next load of `target` until the returned sender fires.
    pub fn gate(&self, target: &str) -> oneshot::Sender<Result<LoadedHandle, LoadError>> {
        let (tx, rx) = oneshot::channel();
        self.inner.gates.lock().unwrap().insert(target.to_string(), rx);
        tx
    }

    pub fn fail_on(&self, target: &str) {
        self.inner.failing.lock().unwrap().insert(target.to_string());
    }

    pub fn emit(&self, signal: BackendSignal) {
        let _ = self.inner.signals.send(signal);
    }

    pub fn loads(&self) -> Vec<String> {
        self.inner.loads.lock().unwrap().clone()
    }

    pub fn seeks(&self) -> Vec<f64> {
        self.inner.seeks.lock().unwrap().clone()
    }

    pub fn is_playing(&self) -> bool {
        self.inner.playing.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u32 {
        self.inner.stops.load(Ordering::SeqCst)
    }
}

impl PlaybackBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn supports_push_progress(&self) -> bool {
        self.kind == BackendKind::DirectStream
    }

    fn seek_buffers(&self) -> bool {
        self.kind == BackendKind::EmbeddedVideo
    }

    fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    async fn load(&self, request: LoadRequest) -> Result<LoadedHandle, LoadError> {
        if !self.is_ready() {
            return Err(LoadError::NotReady);
        }
        self.inner.loads.lock().unwrap().push(request.target.clone());
        self.inner.ended.store(false, Ordering::SeqCst);

        let gate = self.inner.gates.lock().unwrap().remove(&request.target);
        if let Some(gate) = gate {
            return gate
                .await
                .unwrap_or_else(|_| Err(LoadError::Backend("gate dropped".into())));
        }
        if self.inner.failing.lock().unwrap().contains(&request.target) {
            return Err(LoadError::Backend("scripted failure".into()));
        }

        let playing = request.autoplay && !self.inner.reject_autoplay.load(Ordering::SeqCst);
        self.inner.playing.store(playing, Ordering::SeqCst);
        *self.inner.position.lock().unwrap() = Some(0.0);
        Ok(LoadedHandle {
            duration_secs: *self.inner.duration.lock().unwrap(),
            playing,
        })
    }

    async fn play(&self) -> anyhow::Result<()> {
        self.inner.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn pause(&self) -> anyhow::Result<()> {
        self.inner.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn seek_to(&self, secs: f64) -> anyhow::Result<()> {
        self.inner.seeks.lock().unwrap().push(secs);
        *self.inner.position.lock().unwrap() = Some(secs);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.inner.stops.fetch_add(1, Ordering::SeqCst);
        self.inner.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn position(&self) -> Option<f64> {
        *self.inner.position.lock().unwrap()
    }

    async fn duration(&self) -> Option<f64> {
        *self.inner.duration.lock().unwrap()
    }

    async fn has_ended(&self) -> bool {
        self.inner.ended.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<BackendSignal>> {
        self.supports_push_progress()
            .then(|| self.inner.signals.subscribe())
    }
}

// ── embed host ────────────────────────────────────────────────────────────────

pub struct FakeHost {
    ready: AtomicBool,
    muted: AtomicBool,
    paused: AtomicBool,
    reject_autoplay: AtomicBool,
    volume: AtomicU32,
    duration: Mutex<Option<f64>>,
    loaded: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn new(ready: bool) -> Self {
        Self {
            ready: AtomicBool::new(ready),
            muted: AtomicBool::new(false),
            paused: AtomicBool::new(true),
            reject_autoplay: AtomicBool::new(false),
            volume: AtomicU32::new(35),
            duration: Mutex::new(None),
            loaded: Mutex::new(Vec::new()),
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn volume(&self) -> u32 {
        self.volume.load(Ordering::SeqCst)
    }

    pub fn set_duration(&self, d: Option<f64>) {
        *self.duration.lock().unwrap() = d;
    }

    pub fn reject_autoplay(&self, reject: bool) {
        self.reject_autoplay.store(reject, Ordering::SeqCst);
    }

    pub fn loaded(&self) -> Vec<String> {
        self.loaded.lock().unwrap().clone()
    }
}

impl EmbeddedVideoHost for FakeHost {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn load(&self, video_id: &str, _start_secs: f64) -> anyhow::Result<()> {
        self.loaded.lock().unwrap().push(video_id.to_string());
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn play(&self) -> anyhow::Result<()> {
        let rejected = self.reject_autoplay.load(Ordering::SeqCst);
        self.paused.store(rejected, Ordering::SeqCst);
        Ok(())
    }

    async fn pause(&self) -> anyhow::Result<()> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn seek_to(&self, _secs: f64) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn set_volume_max_unmuted(&self) -> anyhow::Result<()> {
        self.muted.store(false, Ordering::SeqCst);
        self.volume.store(100, Ordering::SeqCst);
        Ok(())
    }

    async fn current_time(&self) -> anyhow::Result<Option<f64>> {
        Ok(Some(0.0))
    }

    async fn duration(&self) -> anyhow::Result<Option<f64>> {
        Ok(*self.duration.lock().unwrap())
    }

    async fn is_paused(&self) -> anyhow::Result<bool> {
        Ok(self.paused.load(Ordering::SeqCst))
    }

    async fn has_ended(&self) -> anyhow::Result<bool> {
        Ok(false)
    }
}

// ── discovery / lyrics ────────────────────────────────────────────────────────

pub struct FakeDiscovery {
    results: Mutex<Option<Vec<Track>>>,
    delay: Option<Duration>,
    terms: Mutex<Vec<String>>,
}

impl FakeDiscovery {
    pub fn answering(tracks: Vec<Track>) -> Self {
        Self {
            results: Mutex::new(Some(tracks)),
            delay: None,
            terms: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            results: Mutex::new(None),
            delay: None,
            terms: Mutex::new(Vec::new()),
        }
    }

    pub fn slow(tracks: Vec<Track>, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::answering(tracks)
        }
    }

    pub fn terms(&self) -> Vec<String> {
        self.terms.lock().unwrap().clone()
    }
}

impl Discovery for FakeDiscovery {
    async fn search(&self, term: &str) -> Result<Vec<Track>, DiscoveryError> {
        self.terms.lock().unwrap().push(term.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let results = self.results.lock().unwrap().clone();
        results.ok_or(DiscoveryError::Status(503))
    }
}

pub struct FakeLyrics {
    answer: Option<LyricsLookup>,
}

impl FakeLyrics {
    pub fn answering(lookup: LyricsLookup) -> Self {
        Self {
            answer: Some(lookup),
        }
    }

    pub fn failing() -> Self {
        Self { answer: None }
    }
}

impl LyricsProvider for FakeLyrics {
    async fn fetch(
        &self,
        _artist: &str,
        _title: &str,
        _duration_secs: Option<f64>,
    ) -> Result<LyricsLookup, LyricsError> {
        self.answer.clone().ok_or(LyricsError::Status(500))
    }
}
