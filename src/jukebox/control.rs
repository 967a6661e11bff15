//! The control loop and decode tasks.
//!
//! Every playback transition happens on the `jukebox-control` thread, one
//! [`Event`] at a time. Decode tasks run on their own threads and report back
//! with [`Event::Finished`] carrying the epoch they were started in; anything
//! from an older epoch is ignored.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use super::playlist::{Item, Playlist, PlaylistError};
use crate::cancel::{CancelHandle, cancel_pair};
use crate::pipe::{PcmPipe, PcmWriter};
use crate::player::Player;
use crate::transcode::{Profile, Transcoder};

/// How often a draining sink is checked for being empty.
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// State the public handle and the control loop both see.
pub(super) struct Shared {
    pub(super) playlist: Playlist,
    pub(super) pipe: PcmPipe,
    pub(super) player: Box<dyn Player>,
    pub(super) profile: Profile,
    /// Held while an event is applied, so status reads never see half a transition
    pub(super) transition: Mutex<()>,
}

/// Requests for the control loop.
pub(super) enum Event {
    Play { ack: Sender<()> },
    Pause { ack: Sender<()> },
    Skip {
        index: usize,
        offset: Duration,
        ack: Sender<Result<(), PlaylistError>>,
    },
    Clear { ack: Sender<()> },
    /// A decode task ran out of input (or failed)
    Finished { epoch: u64 },
    Quit,
}

#[derive(Debug)]
enum State {
    Idle,
    Decoding(Item),
    /// Queue exhausted, the sink still has audio to render
    Draining,
}

enum Flow {
    Continue,
    Exit,
}

pub(super) struct ControlLoop {
    shared: Arc<Shared>,
    transcoder: Arc<dyn Transcoder>,
    events: Receiver<Event>,
    /// Cloned into each decode task
    sender: Sender<Event>,
    active: Option<CancelHandle>,
    epoch: u64,
    state: State,
}

impl ControlLoop {
    pub(super) fn new(
        shared: Arc<Shared>,
        transcoder: Arc<dyn Transcoder>,
        events: Receiver<Event>,
        sender: Sender<Event>,
    ) -> Self {
        Self {
            shared,
            transcoder,
            events,
            sender,
            active: None,
            epoch: 0,
            state: State::Idle,
        }
    }

    pub(super) fn run(mut self) {
        tracing::debug!(target: "jukebox::control", "Control loop started");
        while let Some(event) = self.next_event() {
            let shared = Arc::clone(&self.shared);
            let _guard = shared.transition.lock();
            if let Flow::Exit = self.handle(event) {
                break;
            }
        }
        tracing::info!(target: "jukebox::control", "Control loop stopped");
    }

    /// Block for the next event, finishing a drain if one is in progress.
    fn next_event(&mut self) -> Option<Event> {
        loop {
            if !matches!(self.state, State::Draining) {
                return self.events.recv().ok();
            }
            match self.events.recv_timeout(DRAIN_POLL) {
                Ok(event) => return Some(event),
                Err(RecvTimeoutError::Timeout) => {
                    if self.shared.player.unplayed_buffer_size() == 0 {
                        let shared = Arc::clone(&self.shared);
                        let _guard = shared.transition.lock();
                        tracing::debug!(target: "jukebox::control", "Drained, pausing");
                        self.end_drain();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn handle(&mut self, event: Event) -> Flow {
        if let Event::Finished { epoch } = event {
            self.on_finished(epoch);
            return Flow::Continue;
        }

        if matches!(self.state, State::Draining) {
            self.end_drain();
        }

        match event {
            Event::Play { ack } => {
                match self.shared.playlist.advance_if_unset() {
                    Ok(Some(item)) => self.track_change(item),
                    Ok(None) | Err(_) => self.shared.player.play(),
                }
                let _ = ack.send(());
            }
            Event::Pause { ack } => {
                self.shared.player.pause();
                let _ = ack.send(());
            }
            Event::Skip { index, offset, ack } => {
                let result = self
                    .shared
                    .playlist
                    .set_target_with_seek(index, offset)
                    .map(|item| self.track_change(item));
                if let Err(e) = &result {
                    tracing::debug!(target: "jukebox::control", "Skip ignored: {}", e);
                }
                let _ = ack.send(result);
            }
            Event::Clear { ack } => {
                self.stop();
                self.shared.playlist.reset();
                self.shared.player.pause();
                self.state = State::Idle;
                let _ = ack.send(());
            }
            Event::Quit => {
                self.stop();
                self.shared.playlist.reset();
                return Flow::Exit;
            }
            Event::Finished { .. } => {}
        }
        Flow::Continue
    }

    fn on_finished(&mut self, epoch: u64) {
        if epoch != self.epoch {
            tracing::debug!(target: "jukebox::control", epoch, current = self.epoch, "Ignoring stale finish");
            return;
        }
        if let State::Decoding(item) = &self.state {
            tracing::debug!(target: "jukebox::control", "Finished decoding {}", item.path().display());
        }
        self.active = None;

        match self.shared.playlist.advance() {
            Ok(item) => self.track_change(item),
            Err(_) => {
                tracing::info!(target: "jukebox::control", "End of playlist");
                self.state = State::Draining;
            }
        }
    }

    fn end_drain(&mut self) {
        self.shared.player.pause();
        self.state = State::Idle;
    }

    /// Cancel the decode task and empty the sink, starting a new epoch.
    fn stop(&mut self) {
        if let Some(mut handle) = self.active.take() {
            handle.cancel();
        }
        // Pipe first: a feeder that takes an old chunk before this point is
        // still on the old player generation, which the player reset drops.
        self.shared.pipe.reset();
        self.shared.player.reset();
        self.epoch += 1;
    }

    fn track_change(&mut self, item: Item) {
        let shared = Arc::clone(&self.shared);
        shared.player.pause();
        self.stop();
        shared.player.play();

        let (handle, token) = cancel_pair();
        let writer = self.shared.pipe.writer(token);
        let task = DecodeTask {
            transcoder: Arc::clone(&self.transcoder),
            profile: self.shared.profile.with_seek(item.seek()),
            item: item.clone(),
            epoch: self.epoch,
            events: self.sender.clone(),
        };

        let spawned = thread::Builder::new()
            .name("jukebox-decode".to_string())
            .spawn(move || task.run(writer));
        match spawned {
            Ok(_) => {
                tracing::info!(
                    target: "jukebox::control",
                    "Now playing: {} (from {:?})",
                    item.display_title(),
                    item.seek()
                );
                self.active = Some(handle);
                self.state = State::Decoding(item);
            }
            Err(e) => {
                tracing::error!(target: "jukebox::control", "Failed to spawn decode task: {}", e);
                shared.player.pause();
                self.state = State::Idle;
            }
        }
    }
}

/// One item's worth of transcoding into the pipe.
struct DecodeTask {
    transcoder: Arc<dyn Transcoder>,
    profile: Profile,
    item: Item,
    epoch: u64,
    events: Sender<Event>,
}

impl DecodeTask {
    fn run(self, mut writer: PcmWriter) {
        let token = writer.token().clone();
        let result = self
            .transcoder
            .transcode(&token, &self.profile, self.item.path(), &mut writer);

        if token.is_cancelled() {
            tracing::debug!(target: "jukebox::decode", "Decode of {} cancelled", self.item.path().display());
            return;
        }
        match result {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                tracing::warn!(target: "jukebox::decode", "Decoding {} failed: {}", self.item.path().display(), e);
            }
        }

        // The loop may already be gone; nothing to do then
        let _ = self.events.send(Event::Finished { epoch: self.epoch });
    }
}
