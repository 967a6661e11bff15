//! Playback status snapshots.

use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::transcode::Profile;

/// What the jukebox is doing right now. Computed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// Index of the current item; `-1` in JSON when nothing is current
    #[serde(serialize_with = "index_or_minus_one")]
    pub current_index: Option<usize>,
    pub playing: bool,
    /// 0.0 - 1.0
    pub gain: f32,
    /// Whole seconds into the current item, including its seek offset
    pub position: u64,
}

fn index_or_minus_one<S: Serializer>(index: &Option<usize>, s: S) -> Result<S::Ok, S::Error> {
    match index {
        Some(i) => s.serialize_i64(*i as i64),
        None => s.serialize_i64(-1),
    }
}

impl Status {
    /// One-line summary, e.g. `[2/5] playing 1:05 gain 80%`.
    pub fn summary(&self, len: usize) -> String {
        let index = self
            .current_index
            .map(|i| (i + 1).to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "[{}/{}] {} {} gain {:.0}%",
            index,
            len,
            if self.playing { "playing" } else { "paused" },
            format_duration(Duration::from_secs(self.position)),
            self.gain * 100.0
        )
    }
}

/// Seconds into the current item.
///
/// `bytes_read` is what the sink has pulled this epoch and `unplayed` what it
/// still holds; the difference is what has actually been heard.
pub fn position_secs(bytes_read: u64, unplayed: usize, profile: &Profile, seek: Duration) -> u64 {
    let played_bytes = bytes_read.saturating_sub(unplayed as u64);
    let played_secs = (played_bytes * 8) as f64 / profile.bit_rate() as f64;
    (played_secs + seek.as_secs_f64()).round() as u64
}

/// Format a duration as MM:SS or HH:MM:SS.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{}:{:02}", mins, secs)
    }
}
