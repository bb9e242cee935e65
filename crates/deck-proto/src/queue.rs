use crate::track::Track;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    Off,
    /// Loop the current track.
    One,
    /// Wrap to the start when the queue runs out.
    All,
}

impl RepeatMode {
    pub fn cycle(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("cannot set an empty queue")]
    EmptyInput,
    #[error("index {index} out of range for queue of {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

/// What `advance` decided.  The caller does the actual loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Loop-one: replay the current entry from zero.
    Restart,
    /// Cursor moved; load this index.
    Load(usize),
    /// Ran off the end with no repeat.  Cursor is unchanged.
    Exhausted,
}

/// What `remove_at` did to the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Entry after the cursor (or no cursor); nothing else changes.
    Spliced,
    /// Entry before the cursor; cursor decremented to keep the same entry.
    CursorShifted,
    /// Removed the current entry; another entry now sits at this index.
    ReloadCurrent(usize),
    /// Removed the current entry and nothing follows it.
    Exhausted,
}

/// Ordered play sequence plus the cursor of the loaded entry.
///
/// The cursor is the only source of truth for "current"; duplicates by id are
/// allowed, so the current entry is never found by scanning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Queue {
    tracks: Vec<Track>,
    cursor: Option<usize>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn current(&self) -> Option<&Track> {
        self.cursor.and_then(|c| self.tracks.get(c))
    }

    pub fn get(&self, idx: usize) -> Option<&Track> {
        self.tracks.get(idx)
    }

    /// Entries after the cursor.  Everything when nothing is current.
    pub fn upcoming(&self) -> &[Track] {
        match self.cursor {
            Some(c) => self.tracks.get(c + 1..).unwrap_or(&[]),
            None => &self.tracks,
        }
    }

    /// Replace the queue wholesale.  An empty list or bad start index leaves
    /// the queue untouched.
    pub fn set(&mut self, tracks: Vec<Track>, start: usize) -> Result<(), QueueError> {
        if tracks.is_empty() {
            return Err(QueueError::EmptyInput);
        }
        if start >= tracks.len() {
            return Err(QueueError::IndexOutOfRange {
                index: start,
                len: tracks.len(),
            });
        }
        self.tracks = tracks;
        self.cursor = Some(start);
        Ok(())
    }

    pub fn push(&mut self, track: Track) {
        self.tracks.push(track);
    }

    /// Append a batch and return the index of its first entry.
    pub fn extend(&mut self, tracks: Vec<Track>) -> Option<usize> {
        if tracks.is_empty() {
            return None;
        }
        let first = self.tracks.len();
        self.tracks.extend(tracks);
        Some(first)
    }

    pub fn jump_to(&mut self, idx: usize) -> Result<(), QueueError> {
        if idx >= self.tracks.len() {
            return Err(QueueError::IndexOutOfRange {
                index: idx,
                len: self.tracks.len(),
            });
        }
        self.cursor = Some(idx);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.cursor = None;
    }

    pub fn remove_at(&mut self, idx: usize) -> Result<(Track, Removal), QueueError> {
        if idx >= self.tracks.len() {
            return Err(QueueError::IndexOutOfRange {
                index: idx,
                len: self.tracks.len(),
            });
        }
        let removed = self.tracks.remove(idx);

        let removal = match self.cursor {
            None => Removal::Spliced,
            Some(c) if idx < c => {
                self.cursor = Some(c - 1);
                Removal::CursorShifted
            }
            Some(c) if idx > c => Removal::Spliced,
            Some(_) => {
                if self.tracks.is_empty() {
                    self.cursor = None;
                    Removal::Exhausted
                } else if idx < self.tracks.len() {
                    Removal::ReloadCurrent(idx)
                } else {
                    // Was the last entry; park on the new last one so the
                    // exhausted path sees a valid cursor.
                    self.cursor = Some(idx - 1);
                    Removal::Exhausted
                }
            }
        };
        Ok((removed, removal))
    }

    /// Move forward one entry according to `repeat`.
    pub fn advance(&mut self, repeat: RepeatMode) -> Advance {
        if self.tracks.is_empty() {
            return Advance::Exhausted;
        }
        let Some(c) = self.cursor else {
            self.cursor = Some(0);
            return Advance::Load(0);
        };
        if repeat == RepeatMode::One {
            return Advance::Restart;
        }
        let next = c + 1;
        if next < self.tracks.len() {
            self.cursor = Some(next);
            Advance::Load(next)
        } else if repeat == RepeatMode::All {
            self.cursor = Some(0);
            Advance::Load(0)
        } else {
            Advance::Exhausted
        }
    }

    /// Move back one entry, wrapping from the first to the last.
    pub fn retreat(&mut self) -> Option<usize> {
        if self.tracks.is_empty() {
            return None;
        }
        let prev = match self.cursor {
            Some(0) | None => self.tracks.len() - 1,
            Some(c) => c - 1,
        };
        self.cursor = Some(prev);
        Some(prev)
    }

    pub fn wrap_to_start(&mut self) -> Option<usize> {
        if self.tracks.is_empty() {
            self.cursor = None;
            return None;
        }
        self.cursor = Some(0);
        Some(0)
    }
}
