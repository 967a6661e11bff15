//! Local audio device output using cpal.
//!
//! Two threads cooperate:
//! - the feeder pulls s16le bytes from the [`PcmReader`] and pushes samples
//!   into a lock-free `rtrb` ring buffer
//! - the cpal output callback pops samples, applies gain and writes silence
//!   while paused
//!
//! The cpal `Stream` is not `Send`, so it is built and kept alive on its own
//! thread until the player is closed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{Sender, bounded};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, PushError, RingBuffer};

use super::{Gain, Player, PlayerError};
use crate::config::AudioConfig;
use crate::pipe::PcmReader;
use crate::transcode::Profile;

/// How long the feeder waits on the pipe before re-checking for shutdown.
const FEED_POLL: Duration = Duration::from_millis(50);
/// Back-off while the ring buffer is full.
const RING_FULL_BACKOFF: Duration = Duration::from_millis(2);
const BYTES_PER_SAMPLE: usize = 2;

/// State shared by the player handle, the feeder and the output callback.
#[derive(Debug)]
struct DeviceShared {
    playing: AtomicBool,
    gain: Gain,
    /// Samples in the ring (counted before the push lands)
    queued_samples: AtomicUsize,
    /// Samples read from the pipe but not pushed into the ring yet
    staged_samples: AtomicUsize,
    flush_requested: AtomicBool,
    /// Bumped on reset so the feeder drops what it is holding
    reset_generation: AtomicU64,
    closed: AtomicBool,
}

/// Plays the PCM pipe on a local output device.
pub struct DevicePlayer {
    shared: Arc<DeviceShared>,
    /// Dropping this ends the stream thread
    stream_keepalive: Mutex<Option<Sender<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl DevicePlayer {
    /// Open the configured (or default) output device at the profile's format.
    pub fn open(reader: PcmReader, profile: &Profile, config: &AudioConfig) -> Result<Self, PlayerError> {
        let shared = Arc::new(DeviceShared {
            playing: AtomicBool::new(false),
            gain: Gain::new(config.volume),
            queued_samples: AtomicUsize::new(0),
            staged_samples: AtomicUsize::new(0),
            flush_requested: AtomicBool::new(false),
            reset_generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let samples_per_sec = profile.sample_rate as usize * profile.channels as usize;
        let capacity = (samples_per_sec * config.ring_buffer_ms as usize / 1000).max(1024);
        let (producer, consumer) = RingBuffer::<i16>::new(capacity);

        let (keepalive_tx, keepalive_rx) = bounded::<()>(0);
        let (init_tx, init_rx) = bounded::<Result<(), PlayerError>>(1);

        let stream_shared = Arc::clone(&shared);
        let device_name = config.output_device.clone();
        let profile = *profile;
        let stream_thread = thread::Builder::new()
            .name("jukebox-output".to_string())
            .spawn(move || {
                let stream = match start_stream(&device_name, &profile, consumer, stream_shared) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                let _ = init_tx.send(Ok(()));
                // Park until the player is closed
                let _ = keepalive_rx.recv();
                drop(stream);
                tracing::debug!(target: "jukebox::device", "Output stream stopped");
            })
            .map_err(|e| PlayerError::AudioInit(e.to_string()))?;

        init_rx
            .recv()
            .map_err(|_| PlayerError::AudioInit("output thread exited during startup".to_string()))??;

        let feeder_shared = Arc::clone(&shared);
        let feeder = thread::Builder::new()
            .name("jukebox-feeder".to_string())
            .spawn(move || feed(reader, producer, &feeder_shared))
            .map_err(|e| PlayerError::AudioInit(e.to_string()))?;

        Ok(Self {
            shared,
            stream_keepalive: Mutex::new(Some(keepalive_tx)),
            threads: Mutex::new(vec![stream_thread, feeder]),
        })
    }
}

impl Player for DevicePlayer {
    fn play(&self) {
        self.shared.playing.store(true, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.shared.playing.store(false, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.shared.reset_generation.fetch_add(1, Ordering::SeqCst);
        self.shared.flush_requested.store(true, Ordering::SeqCst);
    }

    fn volume(&self) -> f32 {
        self.shared.gain.get()
    }

    fn set_volume(&self, volume: f32) {
        self.shared.gain.set(volume);
    }

    fn unplayed_buffer_size(&self) -> usize {
        let samples = self.shared.queued_samples.load(Ordering::SeqCst)
            + self.shared.staged_samples.load(Ordering::SeqCst);
        samples * BYTES_PER_SAMPLE
    }

    fn close(&self) -> Result<(), PlayerError> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.playing.store(false, Ordering::SeqCst);
        self.stream_keepalive.lock().take();

        for handle in self.threads.lock().drain(..) {
            if handle.join().is_err() {
                return Err(PlayerError::Device("audio thread panicked".to_string()));
            }
        }
        tracing::info!(target: "jukebox::device", "Audio device closed");
        Ok(())
    }
}

impl Drop for DevicePlayer {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(target: "jukebox::device", "Close on drop failed: {}", e);
        }
    }
}

/// Pick the device named in config, falling back to the system default.
fn select_device(host: &cpal::Host, name: &str) -> Result<Device, PlayerError> {
    if !name.is_empty() {
        let devices = host
            .output_devices()
            .map_err(|e| PlayerError::AudioInit(e.to_string()))?;
        for device in devices {
            if device.name().map(|n| n == name).unwrap_or(false) {
                return Ok(device);
            }
        }
        tracing::warn!(target: "jukebox::device", device = name, "Configured device not found, using default");
    }

    host.default_output_device()
        .ok_or_else(|| PlayerError::AudioInit("No output device found".to_string()))
}

fn start_stream(
    device_name: &str,
    profile: &Profile,
    consumer: Consumer<i16>,
    shared: Arc<DeviceShared>,
) -> Result<Stream, PlayerError> {
    let host = cpal::default_host();
    let device = select_device(&host, device_name)?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let supported = device
        .supported_output_configs()
        .map_err(|e| PlayerError::AudioInit(e.to_string()))?
        .filter(|c| c.channels() == profile.channels)
        .filter(|c| {
            c.min_sample_rate().0 <= profile.sample_rate && profile.sample_rate <= c.max_sample_rate().0
        })
        .filter(|c| matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16))
        .max_by_key(|c| c.sample_format() == SampleFormat::F32)
        .ok_or_else(|| {
            PlayerError::AudioInit(format!(
                "{} does not support {}Hz / {}ch output",
                name, profile.sample_rate, profile.channels
            ))
        })?
        .with_sample_rate(cpal::SampleRate(profile.sample_rate));

    let config = StreamConfig {
        channels: profile.channels,
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    tracing::info!(
        target: "jukebox::device",
        "Using audio device: {} ({}Hz, {} channels, {:?})",
        name,
        profile.sample_rate,
        profile.channels,
        supported.sample_format()
    );

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, consumer, shared),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, consumer, shared),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, consumer, shared),
        format => return Err(PlayerError::AudioInit(format!("Unsupported sample format: {:?}", format))),
    }
    .map_err(|e| PlayerError::AudioInit(e.to_string()))?;

    stream.play().map_err(|e| PlayerError::AudioInit(e.to_string()))?;
    Ok(stream)
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut consumer: Consumer<i16>,
    shared: Arc<DeviceShared>,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            if shared.flush_requested.swap(false, Ordering::SeqCst) {
                let n = consumer.slots();
                if let Ok(chunk) = consumer.read_chunk(n) {
                    chunk.commit_all();
                    shared.queued_samples.fetch_sub(n, Ordering::SeqCst);
                }
            }

            if !shared.playing.load(Ordering::SeqCst) {
                for sample in data.iter_mut() {
                    *sample = T::from_sample(0.0f32);
                }
                return;
            }

            let gain = shared.gain.get();
            let mut popped = 0;
            for sample in data.iter_mut() {
                *sample = match consumer.pop() {
                    Ok(s) => {
                        popped += 1;
                        T::from_sample(s as f32 / 32768.0 * gain)
                    }
                    // Underrun
                    Err(_) => T::from_sample(0.0f32),
                };
            }
            shared.queued_samples.fetch_sub(popped, Ordering::SeqCst);
        },
        |err| {
            tracing::error!(target: "jukebox::device", "Audio stream error: {}", err);
        },
        None,
    )
}

/// Feeder thread: pipe → ring buffer.
fn feed(mut reader: PcmReader, mut producer: Producer<i16>, shared: &DeviceShared) {
    let mut buf = vec![0u8; 8 * 1024];
    let mut carry: Option<u8> = None;

    while !shared.closed.load(Ordering::SeqCst) {
        let generation = shared.reset_generation.load(Ordering::SeqCst);
        let n = match reader.read_timeout(&mut buf, FEED_POLL) {
            Ok(None) => continue,
            Ok(Some(0)) => break,
            Ok(Some(n)) => n,
            Err(e) => {
                tracing::error!(target: "jukebox::device", "Reading PCM pipe failed: {}", e);
                break;
            }
        };

        let samples = decode_s16le(&mut carry, &buf[..n]);
        shared.staged_samples.store(samples.len(), Ordering::SeqCst);

        'samples: for s in samples {
            loop {
                if shared.closed.load(Ordering::SeqCst) {
                    return;
                }
                if shared.reset_generation.load(Ordering::SeqCst) != generation {
                    carry = None;
                    break 'samples;
                }
                shared.queued_samples.fetch_add(1, Ordering::SeqCst);
                match producer.push(s) {
                    Ok(()) => {
                        shared.staged_samples.fetch_sub(1, Ordering::SeqCst);
                        break;
                    }
                    Err(PushError::Full(_)) => {
                        shared.queued_samples.fetch_sub(1, Ordering::SeqCst);
                        thread::sleep(RING_FULL_BACKOFF);
                    }
                }
            }
        }
        shared.staged_samples.store(0, Ordering::SeqCst);
    }
    tracing::debug!(target: "jukebox::device", "Feeder stopped");
}

/// Turn s16le bytes into samples, carrying an odd trailing byte over.
fn decode_s16le(carry: &mut Option<u8>, bytes: &[u8]) -> Vec<i16> {
    let mut samples = Vec::with_capacity(bytes.len() / 2 + 1);
    let mut rest = bytes;
    if let Some(lo) = carry.take() {
        if let Some((&hi, tail)) = rest.split_first() {
            samples.push(i16::from_le_bytes([lo, hi]));
            rest = tail;
        } else {
            *carry = Some(lo);
            return samples;
        }
    }
    let mut pairs = rest.chunks_exact(2);
    for pair in &mut pairs {
        samples.push(i16::from_le_bytes([pair[0], pair[1]]));
    }
    if let [last] = pairs.remainder() {
        *carry = Some(*last);
    }
    samples
}
