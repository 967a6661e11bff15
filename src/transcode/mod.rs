//! Transcoding source files into the raw PCM stream the sink expects.
//!
//! Two engines implement [`Transcoder`]:
//! - [`SymphoniaTranscoder`]: in-process decoding (symphonia + rubato)
//! - [`FfmpegTranscoder`]: shells out to `ffmpeg`
//!
//! Both write interleaved signed 16-bit little-endian samples at the rate and
//! channel count of the [`Profile`] and stop promptly when their
//! [`CancelToken`] fires.

mod ffmpeg;
mod native;
mod resampler;

pub use ffmpeg::FfmpegTranscoder;
pub use native::SymphoniaTranscoder;
pub use resampler::Resampler;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;

/// Output format of a transcode, plus where in the source to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Profile {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Offset into the source to start decoding from
    pub seek: Duration,
}

impl Profile {
    /// Signed 16-bit little-endian, 44.1kHz stereo.
    pub const PCM16LE: Profile = Profile {
        sample_rate: 44_100,
        channels: 2,
        bits_per_sample: 16,
        seek: Duration::ZERO,
    };

    /// s16le at an arbitrary rate and channel count.
    pub fn pcm16le(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            ..Self::PCM16LE
        }
    }

    /// Same profile, starting at `seek`.
    pub fn with_seek(self, seek: Duration) -> Self {
        Self { seek, ..self }
    }

    /// Bits per second of the PCM stream.
    pub fn bit_rate(&self) -> u32 {
        self.sample_rate * self.channels as u32 * self.bits_per_sample as u32
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.bit_rate() as u64 / 8
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::PCM16LE
    }
}

/// Converts a media file into PCM written to `out`.
pub trait Transcoder: Send + Sync {
    /// Decode `path` from `profile.seek` onwards into `out`.
    ///
    /// Must return [`TranscodeError::Cancelled`] once `token` fires, and check
    /// it at least at every write.
    fn transcode(
        &self,
        token: &CancelToken,
        profile: &Profile,
        path: &Path,
        out: &mut dyn Write,
    ) -> Result<(), TranscodeError>;
}

/// Selectable transcoding engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Symphonia,
    Ffmpeg,
}

/// Build the transcoder for an engine.
pub fn transcoder_for(engine: Engine, ffmpeg_path: &Path) -> Arc<dyn Transcoder> {
    match engine {
        Engine::Symphonia => Arc::new(SymphoniaTranscoder::new()),
        Engine::Ffmpeg => Arc::new(FfmpegTranscoder::new(ffmpeg_path)),
    }
}

/// Transcoding errors.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    /// The cancellation token fired. Not a failure.
    #[error("Transcode cancelled")]
    Cancelled,

    #[error("Failed to open {0}: {1}")]
    Open(PathBuf, String),

    #[error("Unsupported audio format: {0}")]
    Unsupported(String),

    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Transcoder process failed: {0}")]
    Process(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TranscodeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Classify a write error: a failed write after the token fired is a
    /// cancellation, anything else is a real IO failure.
    pub fn from_write(err: io::Error, token: &CancelToken) -> Self {
        if token.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Io(err)
        }
    }
}

/// Encode f32 samples as s16le bytes into `out`.
pub(crate) fn encode_s16le(samples: &[f32], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16le_bit_rate() {
        // 44100 * 2 * 16
        assert_eq!(Profile::PCM16LE.bit_rate(), 1_411_200);
        assert_eq!(Profile::PCM16LE.bytes_per_second(), 176_400);
    }

    #[test]
    fn test_with_seek_keeps_format() {
        let p = Profile::PCM16LE.with_seek(Duration::from_secs(3));
        assert_eq!(p.seek, Duration::from_secs(3));
        assert_eq!(p.sample_rate, 44_100);
        assert_eq!(Profile::PCM16LE.seek, Duration::ZERO);
    }

    #[test]
    fn test_encode_s16le_clamps() {
        let mut out = Vec::new();
        encode_s16le(&[0.0, 1.0, -1.0, 2.0], &mut out);
        assert_eq!(out.len(), 8);
        assert_eq!(i16::from_le_bytes([out[0], out[1]]), 0);
        assert_eq!(i16::from_le_bytes([out[2], out[3]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([out[4], out[5]]), -i16::MAX);
        assert_eq!(i16::from_le_bytes([out[6], out[7]]), i16::MAX);
    }

    #[test]
    fn test_from_write_classifies_cancellation() {
        let (mut handle, token) = crate::cancel::cancel_pair();
        let err = TranscodeError::from_write(io::Error::other("x"), &token);
        assert!(!err.is_cancelled());
        handle.cancel();
        let err = TranscodeError::from_write(io::Error::other("x"), &token);
        assert!(err.is_cancelled());
    }
}
