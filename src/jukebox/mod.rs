//! The jukebox: one playlist, one sink, one decode task at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  Event   ┌──────────────────┐ spawn ┌──────────────┐
//! │ Jukebox  │ ───────▶ │ jukebox-control  │ ────▶ │ jukebox-     │
//! │ (caller) │ ◀─ ack ─ │ (single owner of │ ◀──── │ decode       │
//! └──────────┘          │ playback state)  │ Finished└──────┬───────┘
//!       │ status()      └──────────────────┘               │ PcmWriter
//!       ▼                                                   ▼
//!  Playlist + PcmPipe byte counter + Player ◀──PcmReader── pipe
//! ```
//!
//! Playlist edits (`set_items`, `append_items`, `remove_item`) go straight to
//! the [`Playlist`]. Anything that changes what is playing goes through the
//! control loop and blocks until it has been applied, so a `status()` right
//! after sees the effect.

mod control;
mod playlist;
mod status;

pub use playlist::{Item, Playlist, PlaylistError};
pub use status::{Status, format_duration, position_secs};

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, bounded, unbounded};
use parking_lot::Mutex;

use crate::error::Result;
use crate::pipe::{PcmReader, pcm_pipe};
use crate::player::{Player, PlayerError};
use crate::transcode::{Profile, Transcoder};
use control::{ControlLoop, Event, Shared};

/// Playback orchestrator.
///
/// Dropping the jukebox quits it.
pub struct Jukebox {
    shared: Arc<Shared>,
    events: Sender<Event>,
    control: Mutex<Option<JoinHandle<()>>>,
}

impl Jukebox {
    /// Build the sink with `make_player` and start the control loop.
    pub fn new<F>(transcoder: Arc<dyn Transcoder>, profile: Profile, make_player: F) -> Result<Self>
    where
        F: FnOnce(PcmReader, &Profile) -> std::result::Result<Box<dyn Player>, PlayerError>,
    {
        let (pipe, reader) = pcm_pipe();
        let player = make_player(reader, &profile)?;

        let shared = Arc::new(Shared {
            playlist: Playlist::new(),
            pipe,
            player,
            profile,
            transition: Mutex::new(()),
        });

        let (events, inbox) = unbounded();
        let control_loop = ControlLoop::new(Arc::clone(&shared), transcoder, inbox, events.clone());
        let control = thread::Builder::new()
            .name("jukebox-control".to_string())
            .spawn(move || control_loop.run())?;

        tracing::info!(
            "Jukebox ready ({}Hz, {} channels, {} kbit/s)",
            profile.sample_rate,
            profile.channels,
            profile.bit_rate() / 1000
        );

        Ok(Self {
            shared,
            events,
            control: Mutex::new(Some(control)),
        })
    }

    // ------------------------------------------------------------------
    // Playlist
    // ------------------------------------------------------------------

    pub fn items(&self) -> Vec<Item> {
        self.shared.playlist.items()
    }

    /// Replace the playlist. Nothing becomes current until the next play or
    /// the end of the track that is playing now.
    pub fn set_items(&self, items: Vec<Item>) {
        self.shared.playlist.replace_all(items);
    }

    pub fn append_items(&self, items: Vec<Item>) {
        self.shared.playlist.append(items);
    }

    pub fn remove_item(&self, index: usize) -> std::result::Result<(), PlaylistError> {
        self.shared.playlist.remove_at(index).map(|_| ())
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    /// Resume, or start from the top if nothing is current.
    pub fn play(&self) {
        self.request(|ack| Event::Play { ack });
    }

    pub fn pause(&self) {
        self.request(|ack| Event::Pause { ack });
    }

    /// Jump to `index`, starting `offset` into it.
    pub fn skip(&self, index: usize, offset: Duration) -> std::result::Result<(), PlaylistError> {
        self.request(|ack| Event::Skip { index, offset, ack })
            .unwrap_or(Ok(()))
    }

    /// Stop playback and empty the playlist.
    pub fn clear(&self) {
        self.request(|ack| Event::Clear { ack });
    }

    /// Stop everything and close the sink. Later calls do nothing.
    pub fn quit(&self) {
        let Some(control) = self.control.lock().take() else {
            return;
        };
        let _ = self.events.send(Event::Quit);
        if control.join().is_err() {
            tracing::error!("Control loop panicked");
        }
        if let Err(e) = self.shared.player.close() {
            tracing::warn!("Closing player failed: {}", e);
        }
        tracing::info!("Jukebox stopped");
    }

    // ------------------------------------------------------------------
    // Gain & status
    // ------------------------------------------------------------------

    pub fn set_gain(&self, gain: f32) {
        self.shared.player.set_volume(gain);
    }

    pub fn gain(&self) -> f32 {
        self.shared.player.volume()
    }

    pub fn status(&self) -> Status {
        let _guard = self.shared.transition.lock();
        let player = &self.shared.player;

        let (current_index, position) = match self.shared.playlist.peek() {
            Some((index, item)) => {
                let position = position_secs(
                    self.shared.pipe.bytes_read(),
                    player.unplayed_buffer_size(),
                    &self.shared.profile,
                    item.seek(),
                );
                (Some(index), position)
            }
            None => (None, 0),
        };

        Status {
            current_index,
            playing: player.is_playing(),
            gain: player.volume(),
            position,
        }
    }

    /// Send a request to the control loop and wait for its answer.
    ///
    /// `None` once the loop has exited.
    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Event) -> Option<T> {
        let (ack, answer) = bounded(1);
        self.events.send(make(ack)).ok()?;
        answer.recv().ok()
    }
}

impl Drop for Jukebox {
    fn drop(&mut self) {
        self.quit();
    }
}
