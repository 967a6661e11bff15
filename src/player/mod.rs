//! Audio sinks that drain the jukebox's PCM pipe.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   PcmReader   ┌───────────────────────────────────────┐
//! │ decode task  │ ────────────▶ │ Player                                │
//! └──────────────┘               │  device:  feeder → rtrb → cpal        │
//!                                │  process: feeder → child stdin        │
//!                                └───────────────────────────────────────┘
//! ```
//!
//! The orchestrator only ever talks to the [`Player`] trait, so both backends
//! are interchangeable. Each backend owns the [`PcmReader`] it was built with
//! and counts what it has pulled but not yet rendered, which is what the
//! jukebox subtracts when it turns bytes into a playback position.

mod device;
mod process;

pub use device::DevicePlayer;
pub use process::ProcessPlayer;

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::pipe::PcmReader;
use crate::transcode::Profile;

/// The sink contract the jukebox is written against.
///
/// All methods take `&self`; implementations use interior mutability so a
/// player can be shared between the control loop and status readers.
pub trait Player: Send + Sync {
    /// Start or resume rendering.
    fn play(&self);

    /// Stop rendering, keeping buffered audio.
    fn pause(&self);

    fn is_playing(&self) -> bool;

    /// Drop buffered-but-unplayed audio.
    ///
    /// Volume and open/closed state are unaffected.
    fn reset(&self);

    /// Current gain (0.0 - 1.0).
    fn volume(&self) -> f32;

    /// Set gain (0.0 - 1.0).
    fn set_volume(&self, volume: f32);

    /// Bytes already pulled from the pipe but not rendered yet.
    fn unplayed_buffer_size(&self) -> usize;

    /// Release the output. Further calls are no-ops.
    fn close(&self) -> Result<(), PlayerError>;
}

/// Which sink implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Local audio device via cpal
    #[default]
    Device,
    /// External player process fed over its stdin
    Process,
}

/// Open the configured backend on `reader`.
pub fn open(
    backend: Backend,
    reader: PcmReader,
    profile: &Profile,
    config: &Config,
) -> Result<Box<dyn Player>, PlayerError> {
    let player: Box<dyn Player> = match backend {
        Backend::Device => Box::new(DevicePlayer::open(reader, profile, &config.audio)?),
        Backend::Process => Box::new(ProcessPlayer::open(reader, profile, &config.process)?),
    };
    player.set_volume(config.audio.volume);
    Ok(player)
}

/// List available audio output devices.
pub fn list_audio_devices() -> Vec<String> {
    use cpal::traits::{DeviceTrait, HostTrait};
    let host = cpal::default_host();
    host.output_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

/// Get the current/default audio device name.
pub fn current_audio_device() -> String {
    use cpal::traits::{DeviceTrait, HostTrait};
    let host = cpal::default_host();
    host.default_output_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Gain stored as f32 bits so it can be shared lock-free with audio threads.
#[derive(Debug)]
pub(crate) struct Gain(AtomicU32);

impl Gain {
    pub(crate) fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.clamp(0.0, 1.0).to_bits()))
    }

    pub(crate) fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn set(&self, value: f32) {
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Scale s16le samples in place.
pub(crate) fn apply_gain_s16le(bytes: &mut [u8], gain: f32) {
    if gain >= 1.0 {
        return;
    }
    for pair in bytes.chunks_exact_mut(2) {
        let s = i16::from_le_bytes([pair[0], pair[1]]);
        let scaled = (s as f32 * gain) as i16;
        pair.copy_from_slice(&scaled.to_le_bytes());
    }
}

/// Player errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlayerError {
    #[error("Audio output initialization failed: {0}")]
    AudioInit(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Player process error: {0}")]
    Process(String),

    #[error("Player is closed")]
    Closed,
}
