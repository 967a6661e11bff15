//! Test utilities and fixtures for jukebox tests.
//!
//! Provides a [`MockPlayer`] that only drains the pipe when told to, a
//! [`SyntheticTranscoder`] that produces an exact number of bytes per file,
//! and small polling helpers.
//!
//! # Example
//!
//! ```ignore
//! use crate::test_utils::{MockPlayer, SyntheticTranscoder, secs_to_bytes};
//!
//! let (jukebox, player) = MockPlayer::jukebox();
//! jukebox.set_items(vec![Item::new(0, "10s.mp3")]);
//! jukebox.play();
//! player.read_n(secs_to_bytes(&Profile::PCM16LE, 1));
//! assert_eq!(jukebox.status().position, 1);
//! ```

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use parking_lot::Mutex;

use crate::cancel::CancelToken;
use crate::jukebox::Jukebox;
use crate::pipe::PcmReader;
use crate::player::{Gain, Player, PlayerError};
use crate::transcode::{Profile, TranscodeError, Transcoder};

/// How long [`MockPlayer::read_n`] waits for more bytes before giving up.
const READ_STALL: Duration = Duration::from_secs(2);

struct MockInner {
    reader: Mutex<PcmReader>,
    playing: AtomicBool,
    gain: Gain,
    closed: AtomicBool,
    unplayed: AtomicUsize,
    resets: AtomicUsize,
    /// Bytes of the current epoch still readable while a reset was running
    leaked: AtomicUsize,
}

/// A player that renders instantly, but only when the test calls [`read_n`].
///
/// Clones share state, so a test can keep one while the jukebox owns another.
///
/// [`read_n`]: MockPlayer::read_n
#[derive(Clone)]
pub struct MockPlayer {
    inner: Arc<MockInner>,
}

impl MockPlayer {
    pub fn new(reader: PcmReader) -> Self {
        Self {
            inner: Arc::new(MockInner {
                reader: Mutex::new(reader),
                playing: AtomicBool::new(false),
                gain: Gain::new(1.0),
                closed: AtomicBool::new(false),
                unplayed: AtomicUsize::new(0),
                resets: AtomicUsize::new(0),
                leaked: AtomicUsize::new(0),
            }),
        }
    }

    /// Build a jukebox over a [`SyntheticTranscoder`] and hand back its mock player.
    pub fn jukebox() -> (Jukebox, MockPlayer) {
        let slot: Arc<Mutex<Option<MockPlayer>>> = Arc::new(Mutex::new(None));
        let factory_slot = Arc::clone(&slot);
        let jukebox = Jukebox::new(
            Arc::new(SyntheticTranscoder),
            Profile::PCM16LE,
            move |reader: PcmReader, _profile: &Profile| {
                let player = MockPlayer::new(reader);
                *factory_slot.lock() = Some(player.clone());
                Ok(Box::new(player) as Box<dyn Player>)
            },
        )
        .unwrap();
        let player = slot.lock().take().unwrap();
        (jukebox, player)
    }

    /// Consume up to `n` bytes from the pipe. Returns how many were read.
    ///
    /// Stops early if nothing arrives for a couple of seconds.
    pub fn read_n(&self, n: usize) -> usize {
        let mut reader = self.inner.reader.lock();
        let mut buf = vec![0u8; 8 * 1024];
        let mut total = 0;
        while total < n {
            let want = (n - total).min(buf.len());
            match reader.read_timeout(&mut buf[..want], READ_STALL) {
                Ok(Some(0)) | Ok(None) | Err(_) => break,
                Ok(Some(got)) => total += got,
            }
        }
        total
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Pretend `n` bytes are still buffered in the sink. Cleared by `reset`.
    pub fn set_unplayed(&self, n: usize) {
        self.inner.unplayed.store(n, Ordering::SeqCst);
    }

    pub fn resets(&self) -> usize {
        self.inner.resets.load(Ordering::SeqCst)
    }

    /// Total bytes a reset could still read as current audio.
    pub fn leaked_bytes(&self) -> usize {
        self.inner.leaked.load(Ordering::SeqCst)
    }
}

impl Player for MockPlayer {
    fn play(&self) {
        self.inner.playing.store(true, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.inner.playing.store(false, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.inner.playing.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.inner.resets.fetch_add(1, Ordering::SeqCst);
        self.inner.unplayed.store(0, Ordering::SeqCst);

        // Flush whatever the sink would pick up next, like a real feeder would.
        // Skipped if a test is reading right now.
        let Some(mut reader) = self.inner.reader.try_lock() else {
            return;
        };
        let mut buf = vec![0u8; 8 * 1024];
        while let Ok(Some(n)) = reader.read_timeout(&mut buf, Duration::ZERO) {
            if n == 0 {
                break;
            }
            self.inner.leaked.fetch_add(n, Ordering::SeqCst);
        }
    }

    fn volume(&self) -> f32 {
        self.inner.gain.get()
    }

    fn set_volume(&self, volume: f32) {
        self.inner.gain.set(volume);
    }

    fn unplayed_buffer_size(&self) -> usize {
        self.inner.unplayed.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<(), PlayerError> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Writes `<N>` seconds of silence for a file named `<N>s.*`, minus the seek.
///
/// Files whose stem starts with `fail` error out immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticTranscoder;

impl SyntheticTranscoder {
    fn duration_of(path: &Path) -> Result<Duration, TranscodeError> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        if stem.starts_with("fail") {
            return Err(TranscodeError::Decode(format!("synthetic failure for {}", stem)));
        }
        stem.strip_suffix('s')
            .and_then(|n| n.parse::<u64>().ok())
            .map(Duration::from_secs)
            .ok_or_else(|| TranscodeError::Unsupported(format!("no duration in {}", stem)))
    }
}

impl Transcoder for SyntheticTranscoder {
    fn transcode(
        &self,
        token: &CancelToken,
        profile: &Profile,
        path: &Path,
        out: &mut dyn Write,
    ) -> Result<(), TranscodeError> {
        let length = Self::duration_of(path)?.saturating_sub(profile.seek);
        let mut remaining = (length.as_secs_f64() * profile.bytes_per_second() as f64) as usize;
        let chunk = [0u8; 4096];
        while remaining > 0 {
            if token.is_cancelled() {
                return Err(TranscodeError::Cancelled);
            }
            let n = remaining.min(chunk.len());
            out.write_all(&chunk[..n])
                .map_err(|e| TranscodeError::from_write(e, token))?;
            remaining -= n;
        }
        Ok(())
    }
}

/// Bytes of PCM for `secs` seconds of `profile`.
pub fn secs_to_bytes(profile: &Profile, secs: u64) -> usize {
    (secs * profile.bytes_per_second()) as usize
}

/// Poll `f` until it returns true or `timeout` passes.
pub fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if f() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// Run `f` on another thread; `false` if it didn't finish within `timeout`.
pub fn with_timeout(timeout: Duration, f: impl FnOnce() + Send + 'static) -> bool {
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        f();
        let _ = tx.send(());
    });
    rx.recv_timeout(timeout).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::pcm_pipe;

    #[test]
    fn test_synthetic_transcoder_writes_exact_length() {
        let mut out = Vec::new();
        SyntheticTranscoder
            .transcode(&CancelToken::never(), &Profile::PCM16LE, Path::new("3s.mp3"), &mut out)
            .unwrap();
        assert_eq!(out.len(), secs_to_bytes(&Profile::PCM16LE, 3));
    }

    #[test]
    fn test_synthetic_transcoder_honours_seek() {
        let mut out = Vec::new();
        let profile = Profile::PCM16LE.with_seek(Duration::from_secs(2));
        SyntheticTranscoder
            .transcode(&CancelToken::never(), &profile, Path::new("/x/5s.flac"), &mut out)
            .unwrap();
        assert_eq!(out.len(), secs_to_bytes(&Profile::PCM16LE, 3));
    }

    #[test]
    fn test_synthetic_transcoder_failures() {
        let mut out = Vec::new();
        let token = CancelToken::never();
        let err = SyntheticTranscoder
            .transcode(&token, &Profile::PCM16LE, Path::new("fail.mp3"), &mut out)
            .unwrap_err();
        assert!(!err.is_cancelled());
        assert!(
            SyntheticTranscoder
                .transcode(&token, &Profile::PCM16LE, Path::new("song.mp3"), &mut out)
                .is_err()
        );
    }

    #[test]
    fn test_mock_player_read_n_stops_when_starved() {
        let (pipe, reader) = pcm_pipe();
        let player = MockPlayer::new(reader);
        let mut writer = pipe.writer(CancelToken::never());
        let producer = thread::spawn(move || writer.write_all(&[0u8; 1000]));

        assert_eq!(player.read_n(400), 400);
        assert_eq!(player.read_n(10_000), 600);
        producer.join().unwrap().unwrap();
    }

    #[test]
    fn test_wait_until_and_with_timeout() {
        assert!(wait_until(Duration::from_millis(100), || true));
        assert!(!wait_until(Duration::from_millis(20), || false));
        assert!(with_timeout(Duration::from_secs(1), || {}));
        assert!(!with_timeout(Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(500))
        }));
    }
}
