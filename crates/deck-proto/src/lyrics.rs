//! Lyric transcripts.
//!
//! A transcript is either fully time-tagged (`Synced`), fully untimed
//! (`Plain`), or absent (`NotFound`).  Synced transcripts are parsed from the
//! LRC line-prefix grammar `[mm:ss.xx]text`; anything that does not match is
//! dropped without failing the rest of the file.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LyricLine {
    pub time_seconds: Option<f64>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "lines", rename_all = "snake_case")]
pub enum LyricTranscript {
    #[default]
    NotFound,
    Plain(Vec<LyricLine>),
    /// Every line has a time; times are non-decreasing.
    Synced(Vec<LyricLine>),
}

fn stamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[(\d{1,3}):(\d{1,2})(?:[.:](\d{1,3}))?\]").expect("valid lyric stamp regex")
    })
}

/// Parse one `[mm:ss.xx]` stamp capture into seconds.
fn stamp_seconds(caps: &regex::Captures<'_>) -> Option<f64> {
    let minutes: f64 = caps.get(1)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(2)?.as_str().parse().ok()?;
    if seconds >= 60.0 {
        return None;
    }
    let fraction = match caps.get(3) {
        Some(m) => {
            let digits = m.as_str();
            let value: f64 = digits.parse().ok()?;
            value / 10f64.powi(digits.len() as i32)
        }
        None => 0.0,
    };
    Some(minutes * 60.0 + seconds + fraction)
}

/// Split leading stamps off a line.  Returns `None` if the line carries no
/// valid stamp.  A line like `[00:10.00][01:10.00]chorus` yields two times.
fn parse_stamped_line(line: &str) -> Option<(Vec<f64>, &str)> {
    let mut rest = line.trim_start();
    let mut times = Vec::new();
    while let Some(caps) = stamp_re().captures(rest) {
        let whole = caps.get(0)?;
        times.push(stamp_seconds(&caps)?);
        rest = &rest[whole.end()..];
    }
    if times.is_empty() {
        None
    } else {
        Some((times, rest.trim()))
    }
}

impl LyricTranscript {
    /// Parse LRC text.  Falls back to a plain transcript when no line carries
    /// a usable stamp, and to `NotFound` when the text is blank.
    pub fn from_synced_text(text: &str) -> Self {
        let mut lines: Vec<LyricLine> = Vec::new();
        for raw in text.lines() {
            if let Some((times, body)) = parse_stamped_line(raw) {
                for t in times {
                    lines.push(LyricLine {
                        time_seconds: Some(t),
                        text: body.to_string(),
                    });
                }
            }
        }

        if lines.is_empty() {
            return Self::from_plain_text(text);
        }

        // Stable sort keeps file order for equal stamps.
        lines.sort_by(|a, b| {
            a.time_seconds
                .unwrap_or_default()
                .total_cmp(&b.time_seconds.unwrap_or_default())
        });
        LyricTranscript::Synced(lines)
    }

    pub fn from_plain_text(text: &str) -> Self {
        if text.trim().is_empty() {
            return LyricTranscript::NotFound;
        }
        let lines = text
            .trim()
            .lines()
            .map(|l| LyricLine {
                time_seconds: None,
                text: l.trim_end().to_string(),
            })
            .collect();
        LyricTranscript::Plain(lines)
    }

    pub fn lines(&self) -> &[LyricLine] {
        match self {
            LyricTranscript::NotFound => &[],
            LyricTranscript::Plain(lines) | LyricTranscript::Synced(lines) => lines,
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, LyricTranscript::Synced(_))
    }

    pub fn is_found(&self) -> bool {
        !matches!(self, LyricTranscript::NotFound)
    }

    /// Index of the line active at `t`: the last line whose time is `<= t`.
    /// `None` before the first stamp, and always `None` for untimed
    /// transcripts.
    pub fn active_line(&self, t: f64) -> Option<usize> {
        let LyricTranscript::Synced(lines) = self else {
            return None;
        };
        if !t.is_finite() {
            return None;
        }
        let after = lines.partition_point(|l| l.time_seconds.map_or(false, |lt| lt <= t));
        after.checked_sub(1)
    }

    /// Time of line `idx`, used when a client clicks a line to seek.
    pub fn line_time(&self, idx: usize) -> Option<f64> {
        self.lines().get(idx).and_then(|l| l.time_seconds)
    }
}
