use serde::{Deserialize, Serialize};

/// Where the direct-stream backend reads a track from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "location", rename_all = "snake_case")]
pub enum TrackSource {
    /// Remote http(s) URL (search previews, radio streams).
    Stream(String),
    /// Imported file on local disk.
    LocalFile(String),
}

impl TrackSource {
    /// The string handed to mpv's `loadfile`.
    pub fn location(&self) -> &str {
        match self {
            TrackSource::Stream(url) => url,
            TrackSource::LocalFile(path) => path,
        }
    }
}

/// A song.  Immutable once created by discovery or local import; identity is
/// the `id` alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist_name: String,
    /// Catalog duration.  A backend may report a more accurate one on load.
    #[serde(default)]
    pub duration_millis: Option<u64>,
    #[serde(default)]
    pub artwork_ref: Option<String>,
    #[serde(default)]
    pub source_ref: Option<TrackSource>,
    #[serde(default)]
    pub genre: Option<String>,
}

impl Track {
    pub fn backend_key(&self) -> BackendKey {
        BackendKey::for_song(&self.artist_name, &self.title)
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_millis.map(|ms| ms as f64 / 1000.0)
    }

    /// Copy of this track with the duration replaced by a backend-reported
    /// value.  Non-positive durations are ignored.
    pub fn with_duration_secs(&self, secs: Option<f64>) -> Track {
        let mut track = self.clone();
        if let Some(secs) = secs.filter(|s| s.is_finite() && *s > 0.0) {
            track.duration_millis = Some((secs * 1000.0).round() as u64);
        }
        track
    }

    /// Case-insensitive genre match.  Tracks without a genre never match.
    pub fn shares_genre(&self, other: &Track) -> bool {
        match (self.genre.as_deref(), other.genre.as_deref()) {
            (Some(a), Some(b)) => {
                let a = a.trim();
                !a.is_empty() && a.eq_ignore_ascii_case(b.trim())
            }
            _ => false,
        }
    }

    pub fn display(&self) -> String {
        if self.artist_name.is_empty() {
            self.title.clone()
        } else {
            format!("{} \u{2013} {}", self.artist_name, self.title)
        }
    }
}

/// Normalized "artist title" string used to look up an embedded-video match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendKey(String);

impl BackendKey {
    pub fn for_song(artist: &str, title: &str) -> Self {
        Self(normalize(&format!("{} {}", artist, title)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BackendKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase, drop punctuation and symbols, collapse whitespace.
///
/// Pure and idempotent.  Accents are kept as-is.
pub fn normalize(input: &str) -> String {
    let lowered: String = input
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}
