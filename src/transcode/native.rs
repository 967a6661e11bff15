//! In-process transcoder using symphonia for multi-format decoding.
//!
//! Supported formats:
//! - MP3
//! - FLAC
//! - OGG Vorbis
//! - WAV/PCM
//! - AAC (in MP4 container)

use std::fs::File;
use std::io::Write;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use super::{Profile, Resampler, TranscodeError, Transcoder, encode_s16le};
use crate::cancel::CancelToken;

/// Decodes with symphonia and resamples with rubato.
#[derive(Debug, Clone, Default)]
pub struct SymphoniaTranscoder;

impl SymphoniaTranscoder {
    pub fn new() -> Self {
        Self
    }
}

impl Transcoder for SymphoniaTranscoder {
    fn transcode(
        &self,
        token: &CancelToken,
        profile: &Profile,
        path: &Path,
        out: &mut dyn Write,
    ) -> Result<(), TranscodeError> {
        let mut source = SourceDecoder::open(path)?;
        if !profile.seek.is_zero() {
            source.seek(profile.seek)?;
        }

        let mut resampler = Resampler::new(source.sample_rate, profile.sample_rate, profile.channels)?;
        tracing::debug!(
            target: "jukebox::transcode",
            path = %path.display(),
            source_rate = source.sample_rate,
            source_channels = source.channels,
            seek = ?profile.seek,
            "Transcoding"
        );

        let mut bytes = Vec::new();
        while let Some(samples) = source.next_samples()? {
            if token.is_cancelled() {
                return Err(TranscodeError::Cancelled);
            }
            let remapped = remap_channels(&samples, source.channels, profile.channels);
            let resampled = resampler.process(&remapped)?;

            bytes.clear();
            encode_s16le(&resampled, &mut bytes);
            out.write_all(&bytes)
                .map_err(|e| TranscodeError::from_write(e, token))?;
        }

        let tail = resampler.flush()?;
        if !tail.is_empty() {
            bytes.clear();
            encode_s16le(&tail, &mut bytes);
            out.write_all(&bytes)
                .map_err(|e| TranscodeError::from_write(e, token))?;
        }

        Ok(())
    }
}

/// A symphonia format reader + decoder for the first audio track of a file.
struct SourceDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    /// Packets before this timestamp are decoded but dropped (accurate seek)
    skip_until_ts: u64,
}

impl SourceDecoder {
    fn open(path: &Path) -> Result<Self, TranscodeError> {
        let file = File::open(path).map_err(|e| TranscodeError::Open(path.to_path_buf(), e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension() {
            hint.with_extension(&ext.to_string_lossy());
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| TranscodeError::Unsupported(e.to_string()))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| TranscodeError::Unsupported("No audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| TranscodeError::Decode("Unknown sample rate".to_string()))?;
        let channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(2);

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| TranscodeError::Unsupported(e.to_string()))?;

        Ok(Self {
            reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            skip_until_ts: 0,
        })
    }

    fn seek(&mut self, offset: std::time::Duration) -> Result<(), TranscodeError> {
        let seeked = self
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::from(offset.as_secs_f64()),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| TranscodeError::Decode(format!("Seek failed: {}", e)))?;

        self.skip_until_ts = seeked.required_ts;
        self.decoder.reset();
        Ok(())
    }

    /// Decode the next packet into interleaved f32 samples.
    ///
    /// Returns `Ok(None)` at end of stream.
    fn next_samples(&mut self) -> Result<Option<Vec<f32>>, TranscodeError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(TranscodeError::Decode(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                // Skip bad frame
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(TranscodeError::Decode(e.to_string())),
            };

            if packet.ts() + packet.dur() <= self.skip_until_ts {
                continue;
            }

            return Ok(Some(to_interleaved_f32(&decoded)));
        }
    }
}

/// Convert a decoded buffer to interleaved f32 samples.
fn to_interleaved_f32(buffer: &AudioBufferRef) -> Vec<f32> {
    macro_rules! interleave {
        ($buf:expr, $conv:expr) => {{
            let planes = $buf.planes();
            let planes = planes.planes();
            let frames = $buf.frames();
            let mut output = Vec::with_capacity(frames * planes.len());
            for frame in 0..frames {
                for plane in planes {
                    output.push($conv(plane[frame]));
                }
            }
            output
        }};
    }

    match buffer {
        AudioBufferRef::F32(buf) => interleave!(buf, |s: f32| s),
        AudioBufferRef::F64(buf) => interleave!(buf, |s: f64| s as f32),
        AudioBufferRef::S16(buf) => interleave!(buf, |s: i16| s as f32 / 32768.0),
        AudioBufferRef::S24(buf) => {
            interleave!(buf, |s: symphonia::core::sample::i24| s.0 as f32 / 8_388_608.0)
        }
        AudioBufferRef::S32(buf) => interleave!(buf, |s: i32| s as f32 / 2_147_483_648.0),
        AudioBufferRef::U8(buf) => interleave!(buf, |s: u8| (s as f32 - 128.0) / 128.0),
        _ => Vec::new(),
    }
}

/// Map interleaved samples from `from` channels to `to` channels.
///
/// Mono is duplicated; extra source channels beyond the target are dropped.
pub(crate) fn remap_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let (from, to) = (from.max(1) as usize, to.max(1) as usize);
    if from == to {
        return samples.to_vec();
    }

    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        for ch in 0..to {
            out.push(if from == 1 { frame[0] } else { frame[ch.min(from - 1)] });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, secs: u32) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..(sample_rate * secs) {
            let v = ((i as f32 * 0.05).sin() * 8000.0) as i16;
            for _ in 0..channels {
                writer.write_sample(v).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_missing_file_is_open_error() {
        let mut out = Vec::new();
        let err = SymphoniaTranscoder::new()
            .transcode(
                &CancelToken::never(),
                &Profile::PCM16LE,
                &PathBuf::from("/nonexistent/file.mp3"),
                &mut out,
            )
            .unwrap_err();
        assert!(matches!(err, TranscodeError::Open(..)));
    }

    #[test]
    fn test_wav_at_profile_rate_transcodes_exact_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2s.wav");
        write_wav(&path, 44_100, 2, 2);

        let mut out = Vec::new();
        SymphoniaTranscoder::new()
            .transcode(&CancelToken::never(), &Profile::PCM16LE, &path, &mut out)
            .unwrap();

        assert_eq!(out.len() as u64, 2 * Profile::PCM16LE.bytes_per_second());
    }

    #[test]
    fn test_mono_source_is_upmixed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, 44_100, 1, 1);

        let mut out = Vec::new();
        SymphoniaTranscoder::new()
            .transcode(&CancelToken::never(), &Profile::PCM16LE, &path, &mut out)
            .unwrap();

        assert_eq!(out.len() as u64, Profile::PCM16LE.bytes_per_second());
    }

    #[test]
    fn test_seek_shortens_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("3s.wav");
        write_wav(&path, 44_100, 2, 3);

        let mut out = Vec::new();
        let profile = Profile::PCM16LE.with_seek(Duration::from_secs(1));
        SymphoniaTranscoder::new()
            .transcode(&CancelToken::never(), &profile, &path, &mut out)
            .unwrap();

        let expected = 2 * Profile::PCM16LE.bytes_per_second();
        let tolerance = Profile::PCM16LE.bytes_per_second() / 10;
        assert!(
            (out.len() as u64).abs_diff(expected) <= tolerance,
            "got {} bytes, expected about {}",
            out.len(),
            expected
        );
    }

    #[test]
    fn test_cancelled_token_stops_transcode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1s.wav");
        write_wav(&path, 44_100, 2, 1);

        let (mut handle, token) = crate::cancel::cancel_pair();
        handle.cancel();
        let mut out = Vec::new();
        let err = SymphoniaTranscoder::new()
            .transcode(&token, &Profile::PCM16LE, &path, &mut out)
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(out.is_empty());
    }

    #[test]
    fn test_remap_channels() {
        assert_eq!(remap_channels(&[0.5, -0.5], 1, 2), vec![0.5, 0.5, -0.5, -0.5]);
        assert_eq!(remap_channels(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6], 3, 2), vec![0.1, 0.2, 0.4, 0.5]);
        assert_eq!(remap_channels(&[0.1, 0.2], 2, 2), vec![0.1, 0.2]);
    }
}
