//! Sample rate conversion using rubato.
//!
//! Sources rarely match the jukebox profile (e.g. 48kHz files into a 44.1kHz
//! stream), so the in-process transcoder pushes every decoded packet through
//! this before encoding.

use rubato::{FftFixedIn, Resampler as RubatoResampler};

use super::TranscodeError;

/// Frames per resampler chunk. Larger = more efficient but more latency.
const CHUNK_FRAMES: usize = 1024;

/// Interleaved-in, interleaved-out wrapper around rubato.
pub struct Resampler {
    resampler: Option<FftFixedIn<f32>>,
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    /// Per-channel samples waiting for a full chunk
    input_buffer: Vec<Vec<f32>>,
}

impl Resampler {
    /// Create a resampler; a pass-through when the rates already match.
    pub fn new(input_rate: u32, output_rate: u32, channels: u16) -> Result<Self, TranscodeError> {
        let channels = channels.max(1) as usize;

        let resampler = if input_rate == output_rate {
            None
        } else {
            let r = FftFixedIn::<f32>::new(
                input_rate as usize,
                output_rate as usize,
                CHUNK_FRAMES,
                2,
                channels,
            )
            .map_err(|e| TranscodeError::Decode(format!("resampler: {}", e)))?;
            tracing::debug!("Resampler: {}Hz → {}Hz ({} channels)", input_rate, output_rate, channels);
            Some(r)
        };

        Ok(Self {
            resampler,
            input_rate,
            output_rate,
            channels,
            input_buffer: vec![Vec::new(); channels],
        })
    }

    pub fn ratio(&self) -> f64 {
        self.output_rate as f64 / self.input_rate as f64
    }

    /// Feed interleaved samples, returning whatever resampled output is ready.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, TranscodeError> {
        let Some(ref mut resampler) = self.resampler else {
            return Ok(input.to_vec());
        };

        for (i, sample) in input.iter().enumerate() {
            self.input_buffer[i % self.channels].push(*sample);
        }

        let mut output = Vec::new();
        while self.input_buffer[0].len() >= CHUNK_FRAMES {
            let chunks: Vec<Vec<f32>> = self
                .input_buffer
                .iter_mut()
                .map(|ch| ch.drain(..CHUNK_FRAMES).collect())
                .collect();

            let resampled = resampler
                .process(&chunks, None)
                .map_err(|e| TranscodeError::Decode(format!("resampling: {}", e)))?;
            interleave(&resampled, &mut output);
        }

        Ok(output)
    }

    /// Drain the partial chunk left at end of stream.
    pub fn flush(&mut self) -> Result<Vec<f32>, TranscodeError> {
        let ratio = self.ratio();
        let Some(ref mut resampler) = self.resampler else {
            return Ok(Vec::new());
        };

        let remaining = self.input_buffer[0].len();
        if remaining == 0 {
            return Ok(Vec::new());
        }

        // Pad to a full chunk, then keep only the unpadded share of the output
        for ch in &mut self.input_buffer {
            ch.resize(CHUNK_FRAMES, 0.0);
        }
        let chunks: Vec<Vec<f32>> = self.input_buffer.iter_mut().map(std::mem::take).collect();

        let mut resampled = resampler
            .process(&chunks, None)
            .map_err(|e| TranscodeError::Decode(format!("resampler flush: {}", e)))?;
        let keep = (remaining as f64 * ratio).ceil() as usize;
        for ch in &mut resampled {
            ch.truncate(keep);
        }

        let mut output = Vec::new();
        interleave(&resampled, &mut output);
        Ok(output)
    }
}

fn interleave(planes: &[Vec<f32>], out: &mut Vec<f32>) {
    let Some(first) = planes.first() else {
        return;
    };
    out.reserve(first.len() * planes.len());
    for frame in 0..first.len() {
        for plane in planes {
            out.push(plane[frame]);
        }
    }
}
