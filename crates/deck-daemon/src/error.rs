//! Error types for the playback core.
//!
//! Everything here is recoverable.  Backend failures stop at the controller
//! boundary and become state transitions or `Notice`s.

use std::time::Duration;
use thiserror::Error;

/// A backend could not start a track.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The embed host has not finished its readiness handshake.
    #[error("embedded player is not ready")]
    NotReady,

    /// Neither a stream reference nor an embed match.
    #[error("track has no playable source")]
    NoSource,

    #[error("backend error: {0}")]
    Backend(String),

    #[error("load timed out after {0:?}")]
    Timeout(Duration),

    /// A newer load on the same backend took over.
    #[error("superseded by a newer load")]
    Superseded,
}

impl From<anyhow::Error> for LoadError {
    fn from(e: anyhow::Error) -> Self {
        LoadError::Backend(e.to_string())
    }
}

/// Discovery is best-effort; callers collapse this to an empty result.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("discovery returned HTTP {0}")]
    Status(u16),

    #[error("discovery timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum LyricsError {
    #[error("lyrics request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("lyrics service returned HTTP {0}")]
    Status(u16),
}
