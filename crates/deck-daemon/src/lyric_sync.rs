//! Keeps the active transcript line in step with playback.
//!
//! Auto-follow is suspended while the listener scrolls the transcript by hand
//! and resumes after a quiet period with no further scrolls.

use deck_proto::lyrics::LyricTranscript;
use std::time::Duration;
use tokio::time::Instant;

pub struct LyricSync {
    transcript: LyricTranscript,
    /// Identifies the fetch whose result is allowed to land.
    token: u64,
    pending: bool,
    active: Option<usize>,
    override_until: Option<Instant>,
    quiet: Duration,
}

impl LyricSync {
    pub fn new(quiet: Duration) -> Self {
        Self {
            transcript: LyricTranscript::NotFound,
            token: 0,
            pending: false,
            active: None,
            override_until: None,
            quiet,
        }
    }

    pub fn transcript(&self) -> &LyricTranscript {
        &self.transcript
    }

    /// A new track started loading.  Returns the token its fetch must carry.
    pub fn begin(&mut self) -> u64 {
        self.token += 1;
        self.transcript = LyricTranscript::NotFound;
        self.pending = true;
        self.active = None;
        self.override_until = None;
        self.token
    }

    /// Nothing is loaded any more; in-flight fetches become stale.
    pub fn reset(&mut self) {
        self.token += 1;
        self.transcript = LyricTranscript::NotFound;
        self.pending = false;
        self.active = None;
        self.override_until = None;
    }

    /// Install a fetched transcript.  False when `token` is stale.
    pub fn accept(&mut self, token: u64, transcript: LyricTranscript) -> bool {
        if token != self.token || !self.pending {
            return false;
        }
        self.transcript = transcript;
        self.pending = false;
        self.active = None;
        true
    }

    /// The listener scrolled the transcript.
    pub fn note_manual_scroll(&mut self, now: Instant) {
        self.override_until = Some(now + self.quiet);
    }

    pub fn is_overridden(&self, now: Instant) -> bool {
        self.override_until.is_some_and(|until| now < until)
    }

    /// Drop an elapsed override.  True when auto-follow just resumed.
    pub fn expire_override(&mut self, now: Instant) -> bool {
        match self.override_until {
            Some(until) if now >= until => {
                self.override_until = None;
                true
            }
            _ => false,
        }
    }

    /// Recompute the active line for playback time `t`.  Returns the new
    /// value only when it changed.  Does nothing unless a synced transcript
    /// is playing with no manual scroll in progress.
    pub fn sync(&mut self, t: f64, playing: bool, now: Instant) -> Option<Option<usize>> {
        if !playing || !self.transcript.is_synced() || self.is_overridden(now) {
            return None;
        }
        let next = self.transcript.active_line(t);
        if next == self.active {
            return None;
        }
        self.active = next;
        Some(next)
    }
}
