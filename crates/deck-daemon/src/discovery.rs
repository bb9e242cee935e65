//! Catalog discovery for search and smart radio.

use crate::error::DiscoveryError;
use deck_proto::config::DiscoveryConfig;
use deck_proto::track::{Track, TrackSource};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("tunedeck/", env!("CARGO_PKG_VERSION"));

pub trait Discovery: Send + Sync + 'static {
    /// Tracks matching `term`, in the service's relevance order.
    fn search(&self, term: &str) -> impl Future<Output = Result<Vec<Track>, DiscoveryError>> + Send;
}

/// iTunes Search API response.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResult {
    track_id: Option<u64>,
    track_name: Option<String>,
    artist_name: Option<String>,
    track_time_millis: Option<u64>,
    artwork_url100: Option<String>,
    preview_url: Option<String>,
    primary_genre_name: Option<String>,
}

impl SearchResult {
    /// Entries without an id or title are albums, videos or junk.
    fn into_track(self) -> Option<Track> {
        let id = self.track_id?;
        let title = self.track_name.filter(|t| !t.trim().is_empty())?;
        Some(Track {
            id: format!("itunes:{}", id),
            title,
            artist_name: self.artist_name.unwrap_or_default(),
            duration_millis: self.track_time_millis.filter(|&ms| ms > 0),
            // 100x100 is the only size advertised; larger ones share the path.
            artwork_ref: self
                .artwork_url100
                .map(|url| url.replace("100x100bb", "600x600bb")),
            source_ref: self.preview_url.map(TrackSource::Stream),
            genre: self.primary_genre_name,
        })
    }
}

fn tracks_from_response(body: SearchResponse) -> Vec<Track> {
    body.results
        .into_iter()
        .filter_map(SearchResult::into_track)
        .collect()
}

pub struct ItunesDiscovery {
    client: reqwest::Client,
    endpoint: String,
    limit: usize,
    country: String,
}

impl ItunesDiscovery {
    pub fn new(config: &DiscoveryConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            limit: config.limit,
            country: config.country.clone(),
        })
    }
}

impl Discovery for ItunesDiscovery {
    async fn search(&self, term: &str) -> Result<Vec<Track>, DiscoveryError> {
        let limit = self.limit.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("term", term),
                ("media", "music"),
                ("entity", "song"),
                ("limit", limit.as_str()),
                ("country", self.country.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DiscoveryError::Status(response.status().as_u16()));
        }

        let body: SearchResponse = response.json().await?;
        let tracks = tracks_from_response(body);
        debug!("discovery: '{}' → {} tracks", term, tracks.len());
        Ok(tracks)
    }
}
