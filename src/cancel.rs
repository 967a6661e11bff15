//! Cooperative cancellation for decode tasks.
//!
//! A [`CancelHandle`] is kept by whoever owns the task; the matching
//! [`CancelToken`] travels with the task. Cancelling (or dropping) the handle
//! sets a flag and disconnects a channel, so blocked code can wait on the
//! token inside a `crossbeam_channel::select!` as well as poll it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded};

/// Create a linked handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let flag = Arc::new(AtomicBool::new(false));
    let (tx, rx) = bounded(0);
    (
        CancelHandle {
            flag: Arc::clone(&flag),
            signal: Some(tx),
        },
        CancelToken { flag, signal: rx },
    )
}

/// Owner side of a cancellation pair.
///
/// Dropping the handle cancels the token.
#[derive(Debug)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    signal: Option<Sender<()>>,
}

impl CancelHandle {
    /// Fire the token. Idempotent.
    pub fn cancel(&mut self) {
        self.flag.store(true, Ordering::SeqCst);
        // Disconnecting wakes every select! waiting on the token
        self.signal.take();
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Task side of a cancellation pair.
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    signal: Receiver<()>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            signal: crossbeam_channel::never(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Channel that becomes ready (disconnected) once the token fires.
    ///
    /// Intended for `recv(token.signal())` arms in `select!`.
    pub fn signal(&self) -> &Receiver<()> {
        &self.signal
    }
}
