//! PlayerCore: the single-owner event loop for all mutable playback state.
//!
//! Client commands, backend signals, ticks and the completions of spawned
//! work (loads, discovery, lyric fetches) all arrive as `CoreEvent`s on one
//! mpsc channel and are handled strictly one at a time.  Anything that can
//! take a while runs in a spawned task and posts its result back, tagged
//! with the generation or token it was issued under.  Results whose tag no
//! longer matches are dropped, which is how a slow load of A can never
//! overwrite a later load of B.
//!
//! After each change the core broadcasts `BroadcastMessage::StateUpdated`;
//! surfaces read the snapshot from the shared `StateManager`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use deck_proto::config::Config;
use deck_proto::lyrics::LyricTranscript;
use deck_proto::protocol::{BackendKind, Command, Notice, PlaybackMode};
use deck_proto::queue::{Advance, Queue, Removal, RepeatMode};
use deck_proto::state::{EmbedCatalog, StateManager};
use deck_proto::track::Track;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::backend::{BackendSignal, LoadRequest, LoadedHandle, PlaybackBackend};
use crate::discovery::Discovery;
use crate::error::LoadError;
use crate::lyric_sync::LyricSync;
use crate::lyrics_provider::{transcript_for, LyricsProvider};
use crate::radio;
use crate::BroadcastMessage;

// ── CoreEvent ─────────────────────────────────────────────────────────────────

/// All inputs into the PlayerCore loop.
#[derive(Debug)]
pub enum CoreEvent {
    /// A command from a socket client or the HTTP API.
    ClientCommand(Command),
    /// Poll-only backends are sampled on this.
    Tick,
    /// Forwarded from a push backend's signal channel.
    Backend {
        gen: u64,
        kind: BackendKind,
        signal: BackendSignal,
    },
    LoadSettled(LoadSettled),
    /// `tracks` is `None` when discovery failed or timed out.
    RadioFinished {
        token: u64,
        term: String,
        tracks: Option<Vec<Track>>,
    },
    LyricsFetched {
        token: u64,
        transcript: LyricTranscript,
    },
    SearchFinished {
        term: String,
        tracks: Vec<Track>,
    },
    /// The embed host finished its handshake.
    EmbedReady,
    /// A track could not be played; move past it.
    SkipUnplayable,
    Shutdown,
}

#[derive(Debug)]
pub struct LoadSettled {
    pub gen: u64,
    pub track: Track,
    pub kind: BackendKind,
    pub result: Result<LoadedHandle, LoadError>,
}

/// The backends and network collaborators the core drives.
pub struct Services<D, E, S, L> {
    pub direct: D,
    pub embedded: E,
    pub discovery: Arc<S>,
    pub lyrics: Arc<L>,
}

struct PendingLoad {
    gen: u64,
    kind: BackendKind,
    autoplay: bool,
}

// ── PlayerCore ────────────────────────────────────────────────────────────────

pub struct PlayerCore<D, E, S, L> {
    config: Config,
    state_manager: Arc<StateManager>,
    direct: D,
    embedded: E,
    discovery: Arc<S>,
    lyrics: Arc<L>,
    catalog: EmbedCatalog,
    queue: Queue,
    repeat: RepeatMode,
    /// Backend holding the loaded track.  `None` while Idle or Loading.
    active: Option<BackendKind>,
    /// Bumped on every load and on stop.
    load_gen: u64,
    /// Generation whose end of track was already handled.
    ended_gen: Option<u64>,
    loading: Option<PendingLoad>,
    /// Forwarder task for the active push backend's signals.
    subscription: Option<tokio::task::AbortHandle>,
    position: Option<f64>,
    /// Whole second last pushed to clients, to keep progress broadcasts cheap.
    last_broadcast_second: Option<i64>,
    lyric_sync: LyricSync,
    radio_token: u64,
    radio_pending: Option<u64>,
    /// Consecutive unplayable tracks skipped; bounds the skip to one pass.
    unplayable_streak: usize,
    rng: StdRng,
    event_tx: mpsc::Sender<CoreEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl<D, E, S, L> PlayerCore<D, E, S, L>
where
    D: PlaybackBackend,
    E: PlaybackBackend,
    S: Discovery,
    L: LyricsProvider,
{
    pub async fn new(
        config: Config,
        state_manager: Arc<StateManager>,
        services: Services<D, E, S, L>,
        catalog: EmbedCatalog,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<CoreEvent>,
    ) -> Self {
        let repeat = state_manager.preferences().await.repeat;
        let quiet = Duration::from_millis(config.lyrics.scroll_quiet_ms);
        if services.embedded.is_ready() {
            state_manager.set_embed_ready(true).await;
        }

        Self {
            config,
            state_manager,
            direct: services.direct,
            embedded: services.embedded,
            discovery: services.discovery,
            lyrics: services.lyrics,
            catalog,
            queue: Queue::new(),
            repeat,
            active: None,
            load_gen: 0,
            ended_gen: None,
            loading: None,
            subscription: None,
            position: None,
            last_broadcast_second: None,
            lyric_sync: LyricSync::new(quiet),
            radio_token: 0,
            radio_pending: None,
            unplayable_streak: 0,
            rng: StdRng::from_entropy(),
            event_tx,
            broadcast_tx,
        }
    }

    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run until `Shutdown` or until every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) -> anyhow::Result<()> {
        info!("PlayerCore: starting event loop");

        let tick_tx = self.event_tx.clone();
        let period = Duration::from_millis(self.config.playback.tick_interval_ms.max(50));
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if tick_tx.send(CoreEvent::Tick).await.is_err() {
                    break;
                }
            }
        });

        while let Some(evt) = event_rx.recv().await {
            if !self.handle_event(evt).await {
                info!("PlayerCore: shutdown requested");
                break;
            }
        }

        ticker.abort();
        self.cleanup().await;
        Ok(())
    }

    /// Returns false when the loop should stop.
    pub(crate) async fn handle_event(&mut self, evt: CoreEvent) -> bool {
        let result = match evt {
            CoreEvent::Shutdown => return false,
            CoreEvent::ClientCommand(cmd) => {
                debug!("PlayerCore: command {:?}", cmd);
                self.handle_command(cmd).await
            }
            CoreEvent::Tick => self.on_tick().await,
            CoreEvent::Backend { gen, kind, signal } => {
                self.on_backend_signal(gen, kind, signal).await
            }
            CoreEvent::LoadSettled(settled) => self.on_load_settled(settled).await,
            CoreEvent::RadioFinished {
                token,
                term,
                tracks,
            } => self.on_radio_finished(token, term, tracks).await,
            CoreEvent::LyricsFetched { token, transcript } => {
                self.on_lyrics_fetched(token, transcript).await;
                Ok(())
            }
            CoreEvent::SearchFinished { term, tracks } => {
                let _ = self
                    .broadcast_tx
                    .send(BroadcastMessage::SearchResults { term, tracks });
                Ok(())
            }
            CoreEvent::EmbedReady => {
                info!("PlayerCore: embedded player ready");
                self.state_manager.set_embed_ready(true).await;
                self.broadcast_state();
                Ok(())
            }
            CoreEvent::SkipUnplayable => self.next().await,
        };
        if let Err(e) = result {
            error!("PlayerCore: {}", e);
        }
        true
    }

    // ── command handlers ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::SetQueue {
                tracks,
                start_index,
            } => self.set_queue(tracks, start_index).await?,
            Command::Enqueue { track } => self.add(track).await,
            Command::RemoveAt { index } => self.remove_at(index).await?,
            Command::PlayIndex { index } => self.play_index(index).await?,
            Command::ClearQueue => self.clear().await?,
            Command::Next => {
                self.unplayable_streak = 0;
                self.next().await?
            }
            Command::Prev => self.prev().await?,
            Command::TogglePause => self.toggle().await?,
            Command::Play => self.play().await?,
            Command::Pause => self.pause().await?,
            Command::Stop => self.stop().await?,
            Command::Seek { fraction } => self.seek(fraction).await?,
            Command::SeekTo { seconds } => self.seek_absolute(seconds).await?,
            Command::SeekBy { seconds } => self.seek_by(seconds).await?,
            Command::SeekToLyric { index } => {
                if let Some(t) = self.lyric_sync.transcript().line_time(index) {
                    self.seek_absolute(t).await?;
                }
            }
            Command::SetRepeat { mode } => self.set_repeat(mode).await,
            Command::SetPreferredGenre { genre } => {
                self.state_manager.set_preferred_genre(genre).await?;
            }
            Command::Search { term } => self.search(term),
            Command::LyricsScrolled => self.lyric_sync.note_manual_scroll(Instant::now()),
            Command::GetState => self.broadcast_state(),
        }
        Ok(())
    }

    // ── queue operations ──────────────────────────────────────────────────────

    async fn set_queue(&mut self, tracks: Vec<Track>, start: usize) -> anyhow::Result<()> {
        if let Err(e) = self.queue.set(tracks, start) {
            warn!("PlayerCore: queue rejected: {}", e);
            self.notify(Notice::QueueRejected {
                reason: e.to_string(),
            });
            return Ok(());
        }
        info!("PlayerCore: queue set ({} tracks, start {})", self.queue.len(), start);
        self.radio_pending = None;
        self.unplayable_streak = 0;
        self.sync_queue().await;
        self.load_index(start).await
    }

    async fn add(&mut self, track: Track) {
        debug!("PlayerCore: enqueue '{}'", track.display());
        self.queue.push(track);
        self.sync_queue().await;
        self.broadcast_state();
    }

    async fn remove_at(&mut self, index: usize) -> anyhow::Result<()> {
        let (removed, removal) = match self.queue.remove_at(index) {
            Ok(r) => r,
            Err(e) => {
                self.notify(Notice::QueueRejected {
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };
        self.sync_queue().await;

        match removal {
            Removal::Spliced | Removal::CursorShifted => {
                self.broadcast_state();
                Ok(())
            }
            Removal::ReloadCurrent(idx) => self.load_index(idx).await,
            Removal::Exhausted => {
                // The removed entry was playing; it seeds the radio.
                self.halt_active().await;
                self.state_manager.set_mode(PlaybackMode::Paused).await;
                self.radio_pending = None;
                self.start_smart_radio(Some(removed)).await
            }
        }
    }

    async fn play_index(&mut self, index: usize) -> anyhow::Result<()> {
        if let Err(e) = self.queue.jump_to(index) {
            self.notify(Notice::QueueRejected {
                reason: e.to_string(),
            });
            return Ok(());
        }
        self.radio_pending = None;
        self.unplayable_streak = 0;
        self.sync_queue().await;
        self.load_index(index).await
    }

    async fn clear(&mut self) -> anyhow::Result<()> {
        self.queue.clear();
        self.sync_queue().await;
        self.stop().await
    }

    async fn next(&mut self) -> anyhow::Result<()> {
        self.radio_pending = None;
        match self.queue.advance(self.repeat) {
            Advance::Restart => self.restart_current().await,
            Advance::Load(idx) => {
                self.sync_queue().await;
                self.load_index(idx).await
            }
            Advance::Exhausted => {
                let seed = self.queue.current().cloned();
                self.start_smart_radio(seed).await
            }
        }
    }

    async fn prev(&mut self) -> anyhow::Result<()> {
        let elapsed = self.position.unwrap_or(0.0);
        if self.active.is_some() && elapsed > self.config.playback.prev_restart_secs {
            debug!("PlayerCore: prev after {:.1}s restarts the track", elapsed);
            return self.seek_absolute(0.0).await;
        }
        self.radio_pending = None;
        match self.queue.retreat() {
            Some(idx) => {
                self.sync_queue().await;
                self.load_index(idx).await
            }
            None => Ok(()),
        }
    }

    async fn restart_current(&mut self) -> anyhow::Result<()> {
        if self.active.is_some() {
            return self.seek_absolute(0.0).await;
        }
        match self.queue.cursor() {
            Some(idx) => self.load_index(idx).await,
            None => Ok(()),
        }
    }

    async fn set_repeat(&mut self, mode: RepeatMode) {
        self.repeat = mode;
        if let Err(e) = self.state_manager.set_repeat(mode).await {
            warn!("PlayerCore: failed to persist repeat mode: {}", e);
        }
        self.broadcast_state();
    }

    // ── smart radio ───────────────────────────────────────────────────────────

    async fn start_smart_radio(&mut self, seed: Option<Track>) -> anyhow::Result<()> {
        let batch = self.config.radio.batch_size.max(1);

        if let Some(seed) = seed.as_ref() {
            let picks = radio::genre_candidates(self.queue.upcoming(), seed, batch);
            if !picks.is_empty() {
                info!(
                    "PlayerCore: radio continues with {} genre matches for '{}'",
                    picks.len(),
                    seed.display()
                );
                return self.append_and_advance(picks).await;
            }
        }

        let prefs = self.state_manager.preferences().await;
        let term = radio::discovery_term(
            prefs.preferred_genre.as_deref(),
            &self.config.radio.fallback_term,
        );
        self.radio_token += 1;
        let token = self.radio_token;
        self.radio_pending = Some(token);
        info!("PlayerCore: radio asking discovery for '{}'", term);

        let discovery = Arc::clone(&self.discovery);
        let tx = self.event_tx.clone();
        let timeout = Duration::from_secs(self.config.radio.discovery_timeout_secs);
        tokio::spawn(async move {
            let tracks = match tokio::time::timeout(timeout, discovery.search(&term)).await {
                Ok(Ok(tracks)) => Some(tracks),
                Ok(Err(e)) => {
                    warn!("radio: discovery failed: {}", e);
                    None
                }
                Err(_) => {
                    warn!("radio: discovery timed out after {:?}", timeout);
                    None
                }
            };
            let _ = tx
                .send(CoreEvent::RadioFinished {
                    token,
                    term,
                    tracks,
                })
                .await;
        });
        Ok(())
    }

    async fn on_radio_finished(
        &mut self,
        token: u64,
        term: String,
        tracks: Option<Vec<Track>>,
    ) -> anyhow::Result<()> {
        if self.radio_pending != Some(token) {
            debug!("PlayerCore: dropping stale radio results for '{}'", term);
            return Ok(());
        }
        self.radio_pending = None;

        let tracks = tracks.unwrap_or_else(|| {
            self.notify(Notice::DiscoveryUnavailable);
            Vec::new()
        });

        let mut exclude: HashSet<String> = self.queue.tracks().iter().map(|t| t.id.clone()).collect();
        exclude.extend(self.state_manager.history().await.into_iter().map(|t| t.id));

        let embed_enabled = self.config.embed.enabled;
        let catalog = &self.catalog;
        let picks = radio::pick_discovered(
            tracks,
            &exclude,
            self.config.radio.batch_size.max(1),
            |t| {
                t.source_ref.is_some()
                    || (embed_enabled && catalog.contains_key(&t.backend_key()))
            },
            &mut self.rng,
        );

        if picks.is_empty() {
            return self.wrap_with_loop_all().await;
        }
        info!("PlayerCore: radio appends {} tracks from '{}'", picks.len(), term);
        self.append_and_advance(picks).await
    }

    async fn append_and_advance(&mut self, picks: Vec<Track>) -> anyhow::Result<()> {
        self.queue.extend(picks);
        let step = self.queue.advance(RepeatMode::Off);
        self.sync_queue().await;
        match step {
            Advance::Load(idx) => self.load_index(idx).await,
            _ => Ok(()),
        }
    }

    /// No candidates anywhere: start over with loop-all, or stop if there
    /// is nothing to start over with.
    async fn wrap_with_loop_all(&mut self) -> anyhow::Result<()> {
        match self.queue.wrap_to_start() {
            None => {
                info!("PlayerCore: queue empty and no radio candidates, stopping");
                self.sync_queue().await;
                self.stop().await
            }
            Some(idx) => {
                info!("PlayerCore: no radio candidates, wrapping with loop-all");
                self.set_repeat(RepeatMode::All).await;
                self.sync_queue().await;
                self.load_index(idx).await
            }
        }
    }

    // ── loading ───────────────────────────────────────────────────────────────

    async fn load_index(&mut self, idx: usize) -> anyhow::Result<()> {
        match self.queue.get(idx).cloned() {
            Some(track) => self.load(track, true).await,
            None => Ok(()),
        }
    }

    fn embed_match(&self, track: &Track) -> Option<String> {
        if !self.config.embed.enabled || !self.embedded.is_ready() {
            return None;
        }
        self.catalog.get(&track.backend_key()).cloned()
    }

    async fn load(&mut self, track: Track, autoplay: bool) -> anyhow::Result<()> {
        self.load_gen += 1;
        let gen = self.load_gen;
        self.drop_subscription();
        self.position = None;
        self.last_broadcast_second = None;

        let embed_id = self.embed_match(&track);
        let direct_target = track.source_ref.as_ref().map(|s| s.location().to_string());

        if embed_id.is_none() && direct_target.is_none() {
            warn!("PlayerCore: nothing to play for '{}'", track.display());
            self.halt_active().await;
            self.loading = None;
            self.lyric_sync.reset();
            self.state_manager.set_idle().await;
            self.notify(Notice::CannotPlay {
                track_id: track.id.clone(),
                title: track.title.clone(),
            });
            self.broadcast_state();
            self.skip_unplayable();
            return Ok(());
        }

        let kind = if embed_id.is_some() {
            BackendKind::EmbeddedVideo
        } else {
            BackendKind::DirectStream
        };
        info!("PlayerCore: loading '{}' via {:?}", track.display(), kind);

        if let Some(prev) = self.active.take() {
            if prev != kind {
                self.stop_backend(prev).await;
            }
        }
        self.loading = Some(PendingLoad {
            gen,
            kind,
            autoplay,
        });

        self.state_manager.set_loading(track.clone(), kind).await;
        if let Err(e) = self.state_manager.push_history(&track).await {
            warn!("PlayerCore: failed to persist history: {}", e);
        }
        self.start_lyrics_fetch(&track);
        self.broadcast_state();

        let direct = self.direct.clone();
        let embedded = self.embedded.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let (kind, result) = run_load(direct, embedded, embed_id, direct_target, autoplay).await;
            let _ = tx
                .send(CoreEvent::LoadSettled(LoadSettled {
                    gen,
                    track,
                    kind,
                    result,
                }))
                .await;
        });
        Ok(())
    }

    async fn on_load_settled(&mut self, settled: LoadSettled) -> anyhow::Result<()> {
        let current = self.loading.as_ref().filter(|p| p.gen == settled.gen);
        let Some(pending) = current else {
            debug!(
                "PlayerCore: discarding stale load of '{}' (gen {} < {})",
                settled.track.display(),
                settled.gen,
                self.load_gen
            );
            // Silence it unless the current load is using the same backend.
            let in_use = self.active == Some(settled.kind)
                || self.loading.as_ref().map(|p| p.kind) == Some(settled.kind);
            if settled.result.is_ok() && !in_use {
                self.stop_backend(settled.kind).await;
            }
            return Ok(());
        };
        let autoplay = pending.autoplay;
        self.loading = None;

        let loaded = match settled.result {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("PlayerCore: load of '{}' failed: {}", settled.track.display(), e);
                self.stop_backend(settled.kind).await;
                self.lyric_sync.reset();
                self.state_manager.set_idle().await;
                self.notify(Notice::LoadFailed {
                    track_id: settled.track.id.clone(),
                    reason: e.to_string(),
                });
                self.broadcast_state();
                return Ok(());
            }
        };

        self.active = Some(settled.kind);
        self.unplayable_streak = 0;
        self.position = Some(0.0);

        let track = match settled.kind {
            // The embed's duration is authoritative over the catalog's.
            BackendKind::EmbeddedVideo => settled.track.with_duration_secs(loaded.duration_secs),
            BackendKind::DirectStream => settled.track,
        };
        self.state_manager.set_backend(settled.kind).await;
        self.state_manager.set_current_track(track.clone()).await;
        self.state_manager
            .set_timeline(Some(0.0), loaded.duration_secs)
            .await;

        if loaded.playing {
            self.state_manager.set_mode(PlaybackMode::Playing).await;
        } else {
            self.state_manager.set_mode(PlaybackMode::Paused).await;
            if autoplay {
                self.notify(Notice::AutoplayRejected {
                    track_id: track.id.clone(),
                });
            }
        }
        self.subscribe(settled.kind, settled.gen);
        self.sync_lyrics(0.0).await;
        info!(
            "PlayerCore: '{}' ready on {:?} ({})",
            track.display(),
            settled.kind,
            if loaded.playing { "playing" } else { "paused" }
        );
        self.broadcast_state();
        Ok(())
    }

    /// Queue-driven skip past an unplayable track, at most one pass.
    fn skip_unplayable(&mut self) {
        if !self.config.playback.skip_unplayable {
            return;
        }
        self.unplayable_streak += 1;
        if self.unplayable_streak >= self.queue.len().max(1) {
            warn!("PlayerCore: no playable track in the queue, giving up");
            self.unplayable_streak = 0;
            return;
        }
        if self.event_tx.try_send(CoreEvent::SkipUnplayable).is_err() {
            warn!("PlayerCore: event queue full, not skipping");
        }
    }

    // ── transport ─────────────────────────────────────────────────────────────

    async fn toggle(&mut self) -> anyhow::Result<()> {
        match self.state_manager.mode().await {
            PlaybackMode::Playing => self.pause().await,
            PlaybackMode::Paused => self.play().await,
            PlaybackMode::Idle | PlaybackMode::Loading => Ok(()),
        }
    }

    async fn play(&mut self) -> anyhow::Result<()> {
        match (self.state_manager.mode().await, self.active) {
            (PlaybackMode::Paused, Some(kind)) => {
                self.backend_play(kind).await?;
                self.state_manager.set_mode(PlaybackMode::Playing).await;
                self.broadcast_state();
                Ok(())
            }
            // From Idle, resume the queue where the cursor sits.
            (PlaybackMode::Idle, _) => match self.queue.cursor() {
                Some(idx) => self.load_index(idx).await,
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    async fn pause(&mut self) -> anyhow::Result<()> {
        if let (PlaybackMode::Playing, Some(kind)) = (self.state_manager.mode().await, self.active) {
            self.backend_pause(kind).await?;
            self.state_manager.set_mode(PlaybackMode::Paused).await;
            self.broadcast_state();
        }
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        info!("PlayerCore: stop");
        self.load_gen += 1;
        self.loading = None;
        self.radio_pending = None;
        self.drop_subscription();
        self.halt_active().await;
        self.position = None;
        self.lyric_sync.reset();
        self.state_manager.set_idle().await;
        self.broadcast_state();
        Ok(())
    }

    async fn seek(&mut self, fraction: f64) -> anyhow::Result<()> {
        let Some(kind) = self.active else {
            return Ok(());
        };
        if !fraction.is_finite() {
            return Ok(());
        }
        let duration = match self.state_manager.duration_secs().await {
            Some(d) if d > 0.0 => Some(d),
            _ => self.backend_duration(kind).await.filter(|d| *d > 0.0),
        };
        match duration {
            Some(d) => self.seek_absolute(fraction.clamp(0.0, 1.0) * d).await,
            None => {
                debug!("PlayerCore: seek ignored, duration unknown");
                Ok(())
            }
        }
    }

    async fn seek_by(&mut self, offset: f64) -> anyhow::Result<()> {
        if self.active.is_none() || !offset.is_finite() {
            return Ok(());
        }
        let mut target = (self.position.unwrap_or(0.0) + offset).max(0.0);
        if let Some(d) = self.state_manager.duration_secs().await.filter(|d| *d > 0.0) {
            target = target.min(d);
        }
        self.seek_absolute(target).await
    }

    /// Seek and resume playing.  Backends that rebuffer on seek show Loading
    /// in between.
    async fn seek_absolute(&mut self, seconds: f64) -> anyhow::Result<()> {
        let Some(kind) = self.active else {
            return Ok(());
        };
        if !seconds.is_finite() {
            return Ok(());
        }
        let seconds = seconds.max(0.0);
        let prior = self.state_manager.mode().await;

        if self.backend_seek_buffers(kind) {
            self.state_manager.set_mode(PlaybackMode::Loading).await;
            self.broadcast_state();
        }

        let result = match self.backend_seek(kind, seconds).await {
            Ok(()) => self.backend_play(kind).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("PlayerCore: seek to {:.1}s failed: {}", seconds, e);
            self.state_manager.set_mode(prior).await;
            self.broadcast_state();
            return Ok(());
        }

        self.state_manager.set_mode(PlaybackMode::Playing).await;
        self.ended_gen = None;
        self.last_broadcast_second = None;
        self.on_time_update(Some(seconds), None).await;
        Ok(())
    }

    // ── backend events ────────────────────────────────────────────────────────

    async fn on_tick(&mut self) -> anyhow::Result<()> {
        let now = Instant::now();
        if self.lyric_sync.expire_override(now) {
            debug!("PlayerCore: lyric auto-follow resumed");
            if let Some(p) = self.position {
                self.sync_lyrics(p).await;
            }
        }

        let Some(kind) = self.active else {
            return Ok(());
        };
        if self.backend_supports_push(kind)
            || self.state_manager.mode().await != PlaybackMode::Playing
        {
            return Ok(());
        }

        let position = self.backend_position(kind).await;
        let duration = self.backend_duration(kind).await;
        self.on_time_update(position, duration).await;

        if self.backend_has_ended(kind).await {
            debug!("PlayerCore: poll detected end of track");
            self.on_backend_ended().await?;
        }
        Ok(())
    }

    async fn on_backend_signal(
        &mut self,
        gen: u64,
        kind: BackendKind,
        signal: BackendSignal,
    ) -> anyhow::Result<()> {
        if gen != self.load_gen || self.active != Some(kind) {
            return Ok(());
        }
        match signal {
            BackendSignal::TimeUpdate { position, duration } => {
                self.on_time_update(position, duration).await;
            }
            BackendSignal::BufferingChanged(buffering) => {
                self.state_manager.set_buffering(buffering).await;
                self.broadcast_state();
            }
            BackendSignal::Ended => {
                if self.state_manager.mode().await != PlaybackMode::Loading {
                    self.on_backend_ended().await?;
                }
            }
            BackendSignal::Failed { reason } => {
                let track_id = self
                    .state_manager
                    .get_state()
                    .await
                    .current_track
                    .map(|t| t.id)
                    .unwrap_or_default();
                warn!("PlayerCore: backend failed mid-track: {}", reason);
                self.stop().await?;
                self.notify(Notice::LoadFailed { track_id, reason });
            }
            BackendSignal::Started | BackendSignal::Ready { .. } => {}
        }
        Ok(())
    }

    async fn on_backend_ended(&mut self) -> anyhow::Result<()> {
        // A keep-open player reports the end on every poll until the next load.
        if self.ended_gen == Some(self.load_gen) {
            return Ok(());
        }
        self.ended_gen = Some(self.load_gen);
        if self.repeat == RepeatMode::One {
            debug!("PlayerCore: loop-one, restarting");
            return self.seek_absolute(0.0).await;
        }
        self.next().await
    }

    async fn on_time_update(&mut self, position: Option<f64>, duration: Option<f64>) {
        if let Some(p) = position {
            self.position = Some(p);
        }
        self.state_manager.set_timeline(self.position, duration).await;

        if let Some(p) = self.position {
            self.sync_lyrics(p).await;
        }

        let second = self.position.map(|p| p.floor() as i64);
        if duration.is_some() || second != self.last_broadcast_second {
            self.last_broadcast_second = second;
            self.broadcast_state();
        }
    }

    // ── lyrics ────────────────────────────────────────────────────────────────

    fn start_lyrics_fetch(&mut self, track: &Track) {
        let token = self.lyric_sync.begin();
        let enabled = self.config.lyrics.enabled;
        let provider = Arc::clone(&self.lyrics);
        let tx = self.event_tx.clone();
        let track = track.clone();
        tokio::spawn(async move {
            let transcript = if enabled {
                transcript_for(provider.as_ref(), &track).await
            } else {
                LyricTranscript::NotFound
            };
            let _ = tx
                .send(CoreEvent::LyricsFetched { token, transcript })
                .await;
        });
    }

    async fn on_lyrics_fetched(&mut self, token: u64, transcript: LyricTranscript) {
        if !self.lyric_sync.accept(token, transcript.clone()) {
            debug!("PlayerCore: dropping stale lyrics");
            return;
        }
        self.state_manager.set_lyrics(transcript).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::LyricsUpdated);
        if let Some(p) = self.position {
            self.sync_lyrics(p).await;
        }
        self.broadcast_state();
    }

    async fn sync_lyrics(&mut self, position: f64) {
        let playing = self.state_manager.mode().await == PlaybackMode::Playing;
        if let Some(line) = self.lyric_sync.sync(position, playing, Instant::now()) {
            if self.state_manager.set_active_lyric(line).await {
                let _ = self.broadcast_tx.send(BroadcastMessage::LyricLine(line));
            }
        }
    }

    // ── search ────────────────────────────────────────────────────────────────

    fn search(&self, term: String) {
        let discovery = Arc::clone(&self.discovery);
        let tx = self.event_tx.clone();
        let timeout = Duration::from_secs(self.config.radio.discovery_timeout_secs);
        tokio::spawn(async move {
            let tracks = match tokio::time::timeout(timeout, discovery.search(&term)).await {
                Ok(Ok(tracks)) => tracks,
                Ok(Err(e)) => {
                    warn!("search '{}' failed: {}", term, e);
                    Vec::new()
                }
                Err(_) => {
                    warn!("search '{}' timed out", term);
                    Vec::new()
                }
            };
            let _ = tx.send(CoreEvent::SearchFinished { term, tracks }).await;
        });
    }

    // ── backend dispatch ──────────────────────────────────────────────────────

    fn subscribe(&mut self, kind: BackendKind, gen: u64) {
        self.drop_subscription();
        if !self.backend_supports_push(kind) {
            return;
        }
        let rx = match kind {
            BackendKind::DirectStream => self.direct.subscribe(),
            BackendKind::EmbeddedVideo => self.embedded.subscribe(),
        };
        let Some(mut rx) = rx else {
            return;
        };
        let tx = self.event_tx.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(signal) => {
                        if tx
                            .send(CoreEvent::Backend { gen, kind, signal })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("signal forwarder lagged by {}", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.subscription = Some(task.abort_handle());
    }

    fn drop_subscription(&mut self) {
        if let Some(h) = self.subscription.take() {
            h.abort();
        }
    }

    async fn halt_active(&mut self) {
        self.drop_subscription();
        if let Some(kind) = self.active.take() {
            self.stop_backend(kind).await;
        }
    }

    async fn stop_backend(&self, kind: BackendKind) {
        let result = match kind {
            BackendKind::DirectStream => self.direct.stop().await,
            BackendKind::EmbeddedVideo => self.embedded.stop().await,
        };
        if let Err(e) = result {
            debug!("PlayerCore: stopping {:?} failed: {}", kind, e);
        }
    }

    fn backend_supports_push(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::DirectStream => self.direct.supports_push_progress(),
            BackendKind::EmbeddedVideo => self.embedded.supports_push_progress(),
        }
    }

    fn backend_seek_buffers(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::DirectStream => self.direct.seek_buffers(),
            BackendKind::EmbeddedVideo => self.embedded.seek_buffers(),
        }
    }

    async fn backend_play(&self, kind: BackendKind) -> anyhow::Result<()> {
        match kind {
            BackendKind::DirectStream => self.direct.play().await,
            BackendKind::EmbeddedVideo => self.embedded.play().await,
        }
    }

    async fn backend_pause(&self, kind: BackendKind) -> anyhow::Result<()> {
        match kind {
            BackendKind::DirectStream => self.direct.pause().await,
            BackendKind::EmbeddedVideo => self.embedded.pause().await,
        }
    }

    async fn backend_seek(&self, kind: BackendKind, secs: f64) -> anyhow::Result<()> {
        match kind {
            BackendKind::DirectStream => self.direct.seek_to(secs).await,
            BackendKind::EmbeddedVideo => self.embedded.seek_to(secs).await,
        }
    }

    async fn backend_position(&self, kind: BackendKind) -> Option<f64> {
        match kind {
            BackendKind::DirectStream => self.direct.position().await,
            BackendKind::EmbeddedVideo => self.embedded.position().await,
        }
    }

    async fn backend_duration(&self, kind: BackendKind) -> Option<f64> {
        match kind {
            BackendKind::DirectStream => self.direct.duration().await,
            BackendKind::EmbeddedVideo => self.embedded.duration().await,
        }
    }

    async fn backend_has_ended(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::DirectStream => self.direct.has_ended().await,
            BackendKind::EmbeddedVideo => self.embedded.has_ended().await,
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    async fn sync_queue(&self) {
        self.state_manager.set_queue(&self.queue).await;
    }

    fn broadcast_state(&self) {
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    fn notify(&self, notice: Notice) {
        info!("PlayerCore: notice {:?}", notice);
        let _ = self.broadcast_tx.send(BroadcastMessage::Notice(notice));
    }

    async fn cleanup(&mut self) {
        info!("PlayerCore: cleanup");
        self.halt_active().await;
    }

    #[cfg(test)]
    pub(crate) fn seed_rng(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }
}

/// Try the embed match first, then the stream reference.
async fn run_load<D, E>(
    direct: D,
    embedded: E,
    embed_id: Option<String>,
    direct_target: Option<String>,
    autoplay: bool,
) -> (BackendKind, Result<LoadedHandle, LoadError>)
where
    D: PlaybackBackend,
    E: PlaybackBackend,
{
    if let Some(video_id) = embed_id {
        let request = LoadRequest {
            target: video_id,
            autoplay,
        };
        match embedded.load(request).await {
            Ok(loaded) => return (BackendKind::EmbeddedVideo, Ok(loaded)),
            Err(LoadError::NotReady) => {
                debug!("load: {:?} not ready, using direct stream", embedded.kind())
            }
            Err(e) => {
                warn!("load: {:?} failed ({}), falling back to direct stream", embedded.kind(), e);
                let _ = embedded.stop().await;
            }
        }
    }

    match direct_target {
        Some(target) => {
            let result = direct.load(LoadRequest { target, autoplay }).await;
            (BackendKind::DirectStream, result)
        }
        None => (BackendKind::DirectStream, Err(LoadError::NoSource)),
    }
}
