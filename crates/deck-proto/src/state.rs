use crate::lyrics::LyricTranscript;
use crate::protocol::{BackendKind, PlaybackMode, PlayerState};
use crate::queue::{Queue, RepeatMode};
use crate::track::{BackendKey, Track};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Preferences {
    /// Genre smart radio asks discovery for.
    #[serde(default)]
    pub preferred_genre: Option<String>,
    #[serde(default)]
    pub repeat: RepeatMode,
}

/// What survives a restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistentState {
    /// Most-recent-first, deduplicated by id.
    #[serde(default)]
    pub history: Vec<Track>,
    #[serde(default)]
    pub preferences: Preferences,
}

impl PersistentState {
    /// Put `track` at the front, dropping any older entry with the same id and
    /// trimming to `cap`.
    pub fn record_play(&mut self, track: &Track, cap: usize) {
        self.history.retain(|t| t.id != track.id);
        self.history.insert(0, track.clone());
        self.history.truncate(cap);
    }
}

/// Shared player state.  The core loop is the only writer; the socket and
/// HTTP surfaces read snapshots.
pub struct StateManager {
    state: RwLock<PlayerState>,
    persistent: RwLock<PersistentState>,
    state_file: PathBuf,
    history_cap: usize,
}

impl StateManager {
    pub fn new(state_file: PathBuf, history_cap: usize) -> Self {
        let persistent = Self::load_persistent(&state_file);

        let state = PlayerState {
            rev: 1,
            repeat: persistent.preferences.repeat,
            ..PlayerState::default()
        };

        Self {
            state: RwLock::new(state),
            persistent: RwLock::new(persistent),
            state_file,
            history_cap,
        }
    }

    pub async fn get_state(&self) -> PlayerState {
        self.state.read().await.clone()
    }

    pub async fn mode(&self) -> PlaybackMode {
        self.state.read().await.mode
    }

    pub async fn duration_secs(&self) -> Option<f64> {
        self.state.read().await.duration_secs
    }

    pub async fn history(&self) -> Vec<Track> {
        self.persistent.read().await.history.clone()
    }

    pub async fn preferences(&self) -> Preferences {
        self.persistent.read().await.preferences.clone()
    }

    /// Enter Loading for `track` on `backend`.  Timeline and lyrics of the
    /// previous track are cleared.
    pub async fn set_loading(&self, track: Track, backend: BackendKind) {
        let mut state = self.state.write().await;
        state.mode = PlaybackMode::Loading;
        state.backend = Some(backend);
        state.current_track = Some(track);
        state.position_secs = Some(0.0);
        state.duration_secs = None;
        state.buffering = false;
        state.lyrics = LyricTranscript::NotFound;
        state.lyrics_pending = true;
        state.active_lyric = None;
        state.rev += 1;
    }

    /// Swap the backend of the track being loaded (embed fallback).
    pub async fn set_backend(&self, backend: BackendKind) {
        let mut state = self.state.write().await;
        if state.current_track.is_some() {
            state.backend = Some(backend);
            state.rev += 1;
        }
    }

    /// Replace the current track value (e.g. with a backend-reported duration).
    pub async fn set_current_track(&self, track: Track) {
        let mut state = self.state.write().await;
        state.duration_secs = track.duration_secs();
        state.current_track = Some(track);
        state.rev += 1;
    }

    pub async fn set_mode(&self, mode: PlaybackMode) {
        let mut state = self.state.write().await;
        if state.current_track.is_none() && mode != PlaybackMode::Idle {
            return;
        }
        state.mode = mode;
        state.rev += 1;
    }

    /// Back to Idle with nothing loaded.
    pub async fn set_idle(&self) {
        let mut state = self.state.write().await;
        state.mode = PlaybackMode::Idle;
        state.backend = None;
        state.current_track = None;
        state.position_secs = None;
        state.duration_secs = None;
        state.buffering = false;
        state.lyrics = LyricTranscript::NotFound;
        state.lyrics_pending = false;
        state.active_lyric = None;
        state.rev += 1;
    }

    pub async fn set_timeline(&self, position_secs: Option<f64>, duration_secs: Option<f64>) {
        let mut state = self.state.write().await;
        state.position_secs = position_secs;
        if duration_secs.is_some() {
            state.duration_secs = duration_secs;
        }
        state.rev += 1;
    }

    pub async fn set_buffering(&self, buffering: bool) {
        let mut state = self.state.write().await;
        if state.buffering != buffering {
            state.buffering = buffering;
            state.rev += 1;
        }
    }

    pub async fn set_queue(&self, queue: &Queue) {
        let mut state = self.state.write().await;
        state.queue = queue.tracks().to_vec();
        state.cursor = queue.cursor();
        state.rev += 1;
    }

    pub async fn set_lyrics(&self, lyrics: LyricTranscript) {
        let mut state = self.state.write().await;
        state.lyrics = lyrics;
        state.lyrics_pending = false;
        state.active_lyric = None;
        state.rev += 1;
    }

    /// Returns true when the active line actually changed.
    pub async fn set_active_lyric(&self, idx: Option<usize>) -> bool {
        let mut state = self.state.write().await;
        if state.active_lyric == idx {
            return false;
        }
        state.active_lyric = idx;
        state.rev += 1;
        true
    }

    pub async fn set_embed_ready(&self, ready: bool) {
        let mut state = self.state.write().await;
        state.embed_ready = ready;
        state.rev += 1;
    }

    pub async fn set_repeat(&self, repeat: RepeatMode) -> anyhow::Result<()> {
        {
            let mut state = self.state.write().await;
            state.repeat = repeat;
            state.rev += 1;
        }
        self.persistent.write().await.preferences.repeat = repeat;
        self.save().await
    }

    pub async fn set_preferred_genre(&self, genre: Option<String>) -> anyhow::Result<()> {
        let genre = genre.map(|g| g.trim().to_string()).filter(|g| !g.is_empty());
        self.persistent.write().await.preferences.preferred_genre = genre;
        self.save().await
    }

    pub async fn push_history(&self, track: &Track) -> anyhow::Result<()> {
        self.persistent
            .write()
            .await
            .record_play(track, self.history_cap);
        self.save().await
    }

    async fn save(&self) -> anyhow::Result<()> {
        let persistent = self.persistent.read().await.clone();

        if let Some(parent) = self.state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&persistent)?;
        tokio::fs::write(&self.state_file, json).await?;
        Ok(())
    }

    fn load_persistent(state_file: &Path) -> PersistentState {
        let Ok(content) = std::fs::read_to_string(state_file) else {
            return PersistentState::default();
        };
        match serde_json::from_str::<PersistentState>(&content) {
            Ok(persistent) => persistent,
            Err(e) => {
                warn!("Ignoring unreadable state file {:?}: {}", state_file, e);
                PersistentState::default()
            }
        }
    }
}

// ── TOML embed catalog loader ────────────────────────────────────────────────

/// Intermediate struct that matches the TOML `[[embed]]` table.
#[derive(Debug, serde::Deserialize)]
struct TomlEmbedFile {
    #[serde(default)]
    embed: Vec<TomlEmbed>,
}

#[derive(Debug, serde::Deserialize)]
struct TomlEmbed {
    artist: String,
    title: String,
    video_id: String,
}

/// Known embedded-video matches keyed by `BackendKey`.
pub type EmbedCatalog = HashMap<BackendKey, String>;

pub fn load_embed_catalog_from_toml(path: &Path) -> anyhow::Result<EmbedCatalog> {
    let content = std::fs::read_to_string(path)?;
    parse_embed_catalog_from_toml_str(&content)
}

/// Later entries win when two normalize to the same key.
pub fn parse_embed_catalog_from_toml_str(content: &str) -> anyhow::Result<EmbedCatalog> {
    let file: TomlEmbedFile = toml::from_str(content)?;
    let catalog = file
        .embed
        .into_iter()
        .filter(|e| !e.video_id.trim().is_empty())
        .map(|e| {
            (
                BackendKey::for_song(&e.artist, &e.title),
                e.video_id.trim().to_string(),
            )
        })
        .collect();
    Ok(catalog)
}
