//! External player process fed over its stdin.
//!
//! The command comes from `[process]` in the config, with `{rate}` and
//! `{channels}` substituted from the profile. Pausing simply stops feeding,
//! which stalls the pipe and with it the decode task.
//!
//! `unplayed_buffer_size` only knows about bytes staged in the feeder. Whatever
//! sits in the child's stdin pipe and the player's own buffer is invisible, so
//! the reported position runs ahead by up to a pipe buffer (64 KiB, about
//! 0.37 s at 44.1 kHz stereo).

use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use super::{Gain, Player, PlayerError, apply_gain_s16le};
use crate::config::ProcessConfig;
use crate::pipe::PcmReader;
use crate::transcode::Profile;

const FEED_POLL: Duration = Duration::from_millis(50);
/// Bytes written to the child per call, so resets are noticed quickly.
const WRITE_PIECE: usize = 4 * 1024;

#[derive(Debug)]
struct ProcessShared {
    playing: AtomicBool,
    gain: Gain,
    staged_bytes: AtomicUsize,
    reset_generation: AtomicU64,
    closed: AtomicBool,
}

/// Plays by piping raw PCM into a child process such as `aplay`.
pub struct ProcessPlayer {
    shared: Arc<ProcessShared>,
    child: Mutex<Option<Child>>,
    feeder: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessPlayer {
    pub fn open(reader: PcmReader, profile: &Profile, config: &ProcessConfig) -> Result<Self, PlayerError> {
        let args = expand_args(&config.args, profile);
        tracing::info!(
            target: "jukebox::process",
            "Starting player process: {} {}",
            config.command,
            args.join(" ")
        );

        let mut child = Command::new(&config.command)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PlayerError::Process(format!("spawn {}: {}", config.command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PlayerError::Process("player stdin not captured".to_string()))?;

        let shared = Arc::new(ProcessShared {
            playing: AtomicBool::new(false),
            gain: Gain::new(1.0),
            staged_bytes: AtomicUsize::new(0),
            reset_generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let feeder_shared = Arc::clone(&shared);
        let feeder = thread::Builder::new()
            .name("jukebox-feeder".to_string())
            .spawn(move || feed(reader, stdin, &feeder_shared))
            .map_err(|e| PlayerError::Process(e.to_string()))?;

        Ok(Self {
            shared,
            child: Mutex::new(Some(child)),
            feeder: Mutex::new(Some(feeder)),
        })
    }
}

impl Player for ProcessPlayer {
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
        self.shared.staged_bytes.store(0, Ordering::SeqCst);
    }

    fn volume(&self) -> f32 {
        self.shared.gain.get()
    }

    fn set_volume(&self, volume: f32) {
        self.shared.gain.set(volume);
    }

    fn unplayed_buffer_size(&self) -> usize {
        self.shared.staged_bytes.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<(), PlayerError> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(mut child) = self.child.lock().take() {
            // Already exited is fine
            let _ = child.kill();
            child
                .wait()
                .map_err(|e| PlayerError::Process(format!("wait: {}", e)))?;
        }
        if let Some(feeder) = self.feeder.lock().take()
            && feeder.join().is_err()
        {
            return Err(PlayerError::Process("feeder thread panicked".to_string()));
        }
        tracing::info!(target: "jukebox::process", "Player process closed");
        Ok(())
    }
}

impl Drop for ProcessPlayer {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(target: "jukebox::process", "Close on drop failed: {}", e);
        }
    }
}

/// Substitute `{rate}` and `{channels}` in the configured arguments.
pub(crate) fn expand_args(args: &[String], profile: &Profile) -> Vec<String> {
    args.iter()
        .map(|arg| {
            arg.replace("{rate}", &profile.sample_rate.to_string())
                .replace("{channels}", &profile.channels.to_string())
        })
        .collect()
}

fn feed(mut reader: PcmReader, mut stdin: ChildStdin, shared: &ProcessShared) {
    let mut buf = vec![0u8; 8 * 1024];
    // Odd trailing byte kept back so gain always sees whole samples
    let mut carry: Vec<u8> = Vec::with_capacity(buf.len() + 1);

    while !shared.closed.load(Ordering::SeqCst) {
        if !shared.playing.load(Ordering::SeqCst) {
            thread::sleep(FEED_POLL);
            continue;
        }

        let generation = shared.reset_generation.load(Ordering::SeqCst);
        let n = match reader.read_timeout(&mut buf, FEED_POLL) {
            Ok(None) => continue,
            Ok(Some(0)) => break,
            Ok(Some(n)) => n,
            Err(e) => {
                tracing::error!(target: "jukebox::process", "Reading PCM pipe failed: {}", e);
                break;
            }
        };

        carry.extend_from_slice(&buf[..n]);
        let whole = carry.len() - carry.len() % 2;
        let mut staged: Vec<u8> = carry.drain(..whole).collect();
        shared.staged_bytes.store(staged.len() + carry.len(), Ordering::SeqCst);
        apply_gain_s16le(&mut staged, shared.gain.get());

        let mut remaining = staged.len();
        for piece in staged.chunks(WRITE_PIECE) {
            if shared.closed.load(Ordering::SeqCst) {
                return;
            }
            if shared.reset_generation.load(Ordering::SeqCst) != generation {
                carry.clear();
                break;
            }
            if let Err(e) = stdin.write_all(piece) {
                tracing::error!(target: "jukebox::process", "Writing to player process failed: {}", e);
                shared.staged_bytes.store(0, Ordering::SeqCst);
                return;
            }
            remaining -= piece.len();
            if shared.reset_generation.load(Ordering::SeqCst) == generation {
                shared.staged_bytes.store(remaining + carry.len(), Ordering::SeqCst);
            }
        }
        if shared.reset_generation.load(Ordering::SeqCst) != generation {
            carry.clear();
        }
        shared.staged_bytes.store(carry.len(), Ordering::SeqCst);
    }
    tracing::debug!(target: "jukebox::process", "Feeder stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::pipe::pcm_pipe;
    use crate::test_utils::wait_until;

    #[test]
    fn test_expand_args_substitutes_placeholders() {
        let args = vec![
            "-r".to_string(),
            "{rate}".to_string(),
            "-c".to_string(),
            "{channels}".to_string(),
            "--format={rate}/{channels}".to_string(),
        ];
        let expanded = expand_args(&args, &Profile::PCM16LE);
        assert_eq!(expanded, vec!["-r", "44100", "-c", "2", "--format=44100/2"]);
    }

    #[test]
    fn test_missing_program_fails_to_open() {
        let (_pipe, reader) = pcm_pipe();
        let config = ProcessConfig {
            command: "/nonexistent/player".to_string(),
            args: Vec::new(),
        };
        let result = ProcessPlayer::open(reader, &Profile::PCM16LE, &config);
        assert!(matches!(result, Err(PlayerError::Process(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_feeds_child_only_while_playing() {
        let (pipe, reader) = pcm_pipe();
        let config = ProcessConfig {
            command: "cat".to_string(),
            args: Vec::new(),
        };
        let player = ProcessPlayer::open(reader, &Profile::PCM16LE, &config).unwrap();

        let mut writer = pipe.writer(CancelToken::never());
        let producer = thread::spawn(move || {
            let _ = writer.write_all(&[0u8; 4096]);
        });

        thread::sleep(Duration::from_millis(150));
        assert_eq!(pipe.bytes_read(), 0, "paused player must not pull");

        player.play();
        assert!(wait_until(Duration::from_secs(2), || pipe.bytes_read() == 4096));
        producer.join().unwrap();

        player.close().unwrap();
        // Second close is a no-op
        player.close().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_reset_drops_staged_bytes() {
        let (pipe, reader) = pcm_pipe();
        // Never reads stdin, so the feeder ends up blocked with bytes staged
        let config = ProcessConfig {
            command: "sleep".to_string(),
            args: vec!["5".to_string()],
        };
        let player = ProcessPlayer::open(reader, &Profile::PCM16LE, &config).unwrap();
        player.play();

        let mut writer = pipe.writer(CancelToken::never());
        let producer = thread::spawn(move || {
            let _ = writer.write_all(&vec![0u8; 512 * 1024]);
        });

        assert!(wait_until(Duration::from_secs(2), || player.unplayed_buffer_size() > 0));
        thread::sleep(Duration::from_millis(100));
        assert!(player.unplayed_buffer_size() > 0);

        player.reset();
        assert_eq!(player.unplayed_buffer_size(), 0);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(player.unplayed_buffer_size(), 0, "blocked feeder must not restage");

        player.close().unwrap();
        producer.join().unwrap();
    }
}
