//! Blocking PCM byte pipe between a decode task and the sink.
//!
//! # Design
//!
//! - **Rendezvous writes**: [`PcmWriter::write`] returns only once the sink has
//!   consumed the bytes, so decode speed is paced by playback speed.
//! - **Cancellable**: a writer blocked on the sink wakes as soon as its
//!   [`CancelToken`] fires.
//! - **Epochs**: every chunk is stamped with the epoch of the writer that
//!   produced it. [`PcmPipe::reset`] starts a new epoch, zeroes the byte counter
//!   and makes the reader discard anything stamped with an older epoch.
//!
//! ```text
//! decode task ──PcmWriter──▶ channel ──PcmReader──▶ sink
//!                                         │
//!                              bytes read this epoch
//! ```

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, select};
use parking_lot::Mutex;

use crate::cancel::CancelToken;

/// Largest chunk handed over in a single write.
const MAX_CHUNK: usize = 16 * 1024;

#[derive(Debug, Default)]
struct EpochState {
    generation: u64,
    bytes_read: u64,
}

struct Chunk {
    generation: u64,
    data: Vec<u8>,
    /// Dropped once the chunk is consumed or discarded, releasing the writer
    _done: Sender<()>,
}

/// Create a pipe. The [`PcmReader`] goes to the sink, the [`PcmPipe`] stays
/// with the orchestrator.
pub fn pcm_pipe() -> (PcmPipe, PcmReader) {
    let (tx, rx) = bounded(0);
    let epoch = Arc::new(Mutex::new(EpochState::default()));
    (
        PcmPipe {
            tx,
            epoch: Arc::clone(&epoch),
        },
        PcmReader {
            rx,
            epoch,
            pending: None,
        },
    )
}

/// Orchestrator side of the pipe: hands out writers and owns the byte counter.
pub struct PcmPipe {
    tx: Sender<Chunk>,
    epoch: Arc<Mutex<EpochState>>,
}

impl PcmPipe {
    /// Create a writer stamped with the current epoch.
    pub fn writer(&self, token: CancelToken) -> PcmWriter {
        PcmWriter {
            tx: self.tx.clone(),
            generation: self.epoch.lock().generation,
            token,
        }
    }

    /// Start a new epoch: zero the counter and invalidate in-flight chunks.
    pub fn reset(&self) {
        let mut epoch = self.epoch.lock();
        epoch.generation += 1;
        epoch.bytes_read = 0;
    }

    /// Bytes handed to the sink since the last reset.
    pub fn bytes_read(&self) -> u64 {
        self.epoch.lock().bytes_read
    }
}

/// Error returned by [`PcmWriter`] when its token fires.
pub fn cancelled_error() -> io::Error {
    io::Error::other("pcm write cancelled")
}

/// Decode-task side of the pipe.
pub struct PcmWriter {
    tx: Sender<Chunk>,
    generation: u64,
    token: CancelToken,
}

impl PcmWriter {
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl Write for PcmWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.token.is_cancelled() {
            return Err(cancelled_error());
        }

        let len = buf.len().min(MAX_CHUNK);
        let (done_tx, done_rx) = bounded::<()>(0);
        let chunk = Chunk {
            generation: self.generation,
            data: buf[..len].to_vec(),
            _done: done_tx,
        };

        select! {
            send(self.tx, chunk) -> res => {
                if res.is_err() {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pcm reader closed"));
                }
            }
            recv(self.token.signal()) -> _ => return Err(cancelled_error()),
        }

        // Wait for the reader to finish with the chunk
        select! {
            recv(done_rx) -> _ => Ok(len),
            recv(self.token.signal()) -> _ => Err(cancelled_error()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink side of the pipe.
pub struct PcmReader {
    rx: Receiver<Chunk>,
    epoch: Arc<Mutex<EpochState>>,
    pending: Option<(Chunk, usize)>,
}

impl PcmReader {
    /// Like [`Read::read`] but gives up after `timeout` with `Ok(None)`.
    ///
    /// `Ok(Some(0))` means every writer and the [`PcmPipe`] are gone.
    pub fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        if buf.is_empty() {
            return Ok(Some(0));
        }
        loop {
            if let Some(n) = self.take_pending(buf) {
                return Ok(Some(n));
            }
            match self.rx.recv_timeout(timeout) {
                Ok(chunk) => self.pending = Some((chunk, 0)),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Ok(Some(0)),
            }
        }
    }

    /// Copy from the pending chunk, counting bytes against the current epoch.
    ///
    /// Returns `None` when there is nothing usable pending.
    fn take_pending(&mut self, buf: &mut [u8]) -> Option<usize> {
        let (chunk, offset) = self.pending.as_mut()?;

        let mut copied = 0;
        let stale = {
            let mut epoch = self.epoch.lock();
            if chunk.generation == epoch.generation {
                copied = (chunk.data.len() - *offset).min(buf.len());
                buf[..copied].copy_from_slice(&chunk.data[*offset..*offset + copied]);
                epoch.bytes_read += copied as u64;
                *offset += copied;
                false
            } else {
                true
            }
        };

        if stale || *offset >= chunk.data.len() {
            self.pending = None;
        }
        if stale { None } else { Some(copied) }
    }
}

impl Read for PcmReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if let Some(n) = self.take_pending(buf) {
                return Ok(n);
            }
            match self.rx.recv() {
                Ok(chunk) => self.pending = Some((chunk, 0)),
                Err(_) => return Ok(0),
            }
        }
    }
}
