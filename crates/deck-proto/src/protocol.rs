use crate::lyrics::LyricTranscript;
use crate::queue::RepeatMode;
use crate::track::Track;
use serde::{Deserialize, Serialize};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    SetQueue {
        tracks: Vec<Track>,
        #[serde(default)]
        start_index: usize,
    },
    Enqueue { track: Track },
    RemoveAt { index: usize },
    PlayIndex { index: usize },
    ClearQueue,
    Next,
    Prev,
    TogglePause,
    Play,
    Pause,
    Stop,
    /// Seek to a fraction of the duration, 0.0..=1.0.
    Seek { fraction: f64 },
    SeekTo { seconds: f64 },
    SeekBy { seconds: f64 },
    /// Seek to the start of a synced lyric line.
    SeekToLyric { index: usize },
    SetRepeat { mode: RepeatMode },
    SetPreferredGenre { genre: Option<String> },
    Search { term: String },
    /// The user is scrolling the transcript by hand; pause auto-follow.
    LyricsScrolled,
    GetState,
}

/// Messages sent from the daemon to clients (broadcasts).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: daemon version + full state snapshot.
    Hello {
        protocol_version: u32,
        daemon_rev: u64,
        state: PlayerState,
    },
    State {
        data: PlayerState,
    },
    Notice {
        notice: Notice,
    },
    /// A fetched transcript replaced the current one.
    Lyrics {
        transcript: LyricTranscript,
    },
    /// The highlighted transcript line moved.
    LyricLine {
        index: Option<usize>,
    },
    SearchResults {
        term: String,
        tracks: Vec<Track>,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackMode {
    #[default]
    Idle,
    /// Always transient: resolves to Playing/Paused or back to Idle.
    Loading,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendKind {
    DirectStream,
    EmbeddedVideo,
}

/// Recoverable, user-visible conditions.  None of these stop the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// The track loaded but the runtime would not start it; state is Paused.
    AutoplayRejected { track_id: String },
    /// No stream reference and no embed match.
    CannotPlay { track_id: String, title: String },
    LoadFailed { track_id: String, reason: String },
    /// Smart radio found discovery unreachable and fell back.
    DiscoveryUnavailable,
    QueueRejected { reason: String },
}

/// OS-level "now playing" surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NowPlaying {
    pub title: String,
    pub artist: String,
    pub position_seconds: f64,
    pub duration_seconds: Option<f64>,
    pub is_playing: bool,
}

/// Full state of the daemon.  `rev` is a monotonically increasing counter
/// incremented every time the state changes.  Clients can use it to detect
/// missed updates and request a resync.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlayerState {
    #[serde(default)]
    pub rev: u64,
    pub mode: PlaybackMode,
    /// `None` exactly when `current_track` is `None`.
    pub backend: Option<BackendKind>,
    pub current_track: Option<Track>,
    pub queue: Vec<Track>,
    pub cursor: Option<usize>,
    #[serde(default)]
    pub repeat: RepeatMode,
    pub position_secs: Option<f64>,
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub buffering: bool,
    #[serde(default)]
    pub lyrics: LyricTranscript,
    #[serde(default)]
    pub lyrics_pending: bool,
    pub active_lyric: Option<usize>,
    #[serde(default)]
    pub embed_ready: bool,
}

impl PlayerState {
    pub fn is_playing(&self) -> bool {
        self.mode == PlaybackMode::Playing
    }

    pub fn now_playing(&self) -> Option<NowPlaying> {
        let track = self.current_track.as_ref()?;
        Some(NowPlaying {
            title: track.title.clone(),
            artist: track.artist_name.clone(),
            position_seconds: self.position_secs.unwrap_or(0.0),
            duration_seconds: self.duration_secs.or_else(|| track.duration_secs()),
            is_playing: self.is_playing(),
        })
    }
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackSource;

    fn track() -> Track {
        Track {
            id: "42".into(),
            title: "Song".into(),
            artist_name: "Band".into(),
            duration_millis: Some(180_000),
            artwork_ref: None,
            source_ref: Some(TrackSource::Stream("https://x/y.m4a".into())),
            genre: Some("Rock".into()),
        }
    }

    #[test]
    fn test_command_decodes_from_partial_buffer() {
        let msg = Message::Command(Command::SetQueue {
            tracks: vec![track()],
            start_index: 0,
        });
        let encoded = msg.encode().unwrap();
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::SetQueue { tracks, start_index }) => {
                assert_eq!(tracks[0].id, "42");
                assert_eq!(start_index, 0);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_command_wire_shape() {
        let json = serde_json::to_value(Command::SeekBy { seconds: -10.0 }).unwrap();
        assert_eq!(json["cmd"], "SeekBy");
        let cmd: Command = serde_json::from_str(r#"{"cmd":"SetQueue","tracks":[]}"#).unwrap();
        assert!(matches!(cmd, Command::SetQueue { start_index: 0, .. }));
    }

    #[test]
    fn test_hello_encode_decode() {
        let state = PlayerState {
            rev: 42,
            ..Default::default()
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            daemon_rev: 42,
            state,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                daemon_rev,
                ..
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(daemon_rev, 42);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_now_playing_falls_back_to_catalog_duration() {
        let mut state = PlayerState {
            current_track: Some(track()),
            backend: Some(BackendKind::DirectStream),
            mode: PlaybackMode::Playing,
            ..Default::default()
        };
        let np = state.now_playing().unwrap();
        assert_eq!(np.duration_seconds, Some(180.0));
        assert!(np.is_playing);

        state.duration_secs = Some(181.5);
        state.position_secs = Some(12.0);
        let np = state.now_playing().unwrap();
        assert_eq!(np.duration_seconds, Some(181.5));
        assert_eq!(np.position_seconds, 12.0);
    }

    #[test]
    fn test_now_playing_none_when_idle() {
        assert!(PlayerState::default().now_playing().is_none());
    }
}
