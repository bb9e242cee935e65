//! Lyrics lookup.

use crate::error::LyricsError;
use deck_proto::config::LyricsConfig;
use deck_proto::lyrics::LyricTranscript;
use deck_proto::track::Track;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Raw provider answer, before parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum LyricsLookup {
    Synced(String),
    Plain(String),
    NotFound,
}

pub trait LyricsProvider: Send + Sync + 'static {
    fn fetch(
        &self,
        artist: &str,
        title: &str,
        duration_secs: Option<f64>,
    ) -> impl Future<Output = Result<LyricsLookup, LyricsError>> + Send;
}

/// Fetch and classify lyrics for `track`.  Any failure is "not found".
pub async fn transcript_for<L: LyricsProvider>(provider: &L, track: &Track) -> LyricTranscript {
    match provider
        .fetch(&track.artist_name, &track.title, track.duration_secs())
        .await
    {
        Ok(LyricsLookup::Synced(text)) => LyricTranscript::from_synced_text(&text),
        Ok(LyricsLookup::Plain(text)) => LyricTranscript::from_plain_text(&text),
        Ok(LyricsLookup::NotFound) => LyricTranscript::NotFound,
        Err(e) => {
            warn!("lyrics: lookup for '{}' failed: {}", track.display(), e);
            LyricTranscript::NotFound
        }
    }
}

// ── LRCLIB ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LrclibRecord {
    #[serde(default)]
    instrumental: bool,
    synced_lyrics: Option<String>,
    plain_lyrics: Option<String>,
}

impl LrclibRecord {
    fn into_lookup(self) -> LyricsLookup {
        if self.instrumental {
            return LyricsLookup::NotFound;
        }
        let non_blank = |s: Option<String>| s.filter(|s| !s.trim().is_empty());
        if let Some(synced) = non_blank(self.synced_lyrics) {
            return LyricsLookup::Synced(synced);
        }
        match non_blank(self.plain_lyrics) {
            Some(plain) => LyricsLookup::Plain(plain),
            None => LyricsLookup::NotFound,
        }
    }
}

pub struct LrclibClient {
    client: reqwest::Client,
    endpoint: String,
}

impl LrclibClient {
    pub fn new(config: &LyricsConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tunedeck/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

impl LyricsProvider for LrclibClient {
    async fn fetch(
        &self,
        artist: &str,
        title: &str,
        duration_secs: Option<f64>,
    ) -> Result<LyricsLookup, LyricsError> {
        let mut query = vec![
            ("artist_name", artist.to_string()),
            ("track_name", title.to_string()),
        ];
        if let Some(d) = duration_secs {
            query.push(("duration", format!("{}", d.round() as u64)));
        }

        let response = self.client.get(&self.endpoint).query(&query).send().await?;
        match response.status().as_u16() {
            404 => {
                debug!("lyrics: none for {} - {}", artist, title);
                Ok(LyricsLookup::NotFound)
            }
            s if !(200..300).contains(&s) => Err(LyricsError::Status(s)),
            _ => {
                let record: LrclibRecord = response.json().await?;
                Ok(record.into_lookup())
            }
        }
    }
}
