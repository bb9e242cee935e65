#![allow(dead_code)]

use deck_proto::track::{Track, TrackSource};

pub fn track(id: &str, genre: Option<&str>) -> Track {
    Track {
        id: id.to_string(),
        title: format!("Song {id}"),
        artist_name: format!("Artist {id}"),
        duration_millis: Some(200_000),
        artwork_ref: None,
        source_ref: Some(TrackSource::Stream(format!("https://cdn.example/{id}.m4a"))),
        genre: genre.map(str::to_string),
    }
}

pub fn tracks(n: usize) -> Vec<Track> {
    (0..n).map(|i| track(&format!("t{i}"), None)).collect()
}

pub fn ids(tracks: &[Track]) -> Vec<String> {
    tracks.iter().map(|t| t.id.clone()).collect()
}
