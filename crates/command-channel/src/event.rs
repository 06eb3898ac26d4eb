//! Runner events and their delivery

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::sync::lock;

/// An event raised by a command runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerEvent {
    /// One line of output, without its terminator (line-buffered runners)
    Output(String),
    /// One raw read of output, verbatim (raw-buffered runners)
    Chunk(Vec<u8>),
    /// An error detail; does not by itself mean the runner stopped
    Error {
        /// Where the error came from
        source: ErrorSource,
        /// The error text
        detail: String,
    },
    /// The command exited; raised exactly once, after all output
    Closed {
        /// Exit code of the process or remote command
        exit_code: i32,
    },
}

/// Origin of a [`RunnerEvent::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSource {
    /// A line the command wrote to its standard error
    Stderr,
    /// A fault in the runner's own plumbing; the runner is torn down
    Fault,
}

/// Subscriber for runner events
pub type EventCallback = Arc<dyn Fn(RunnerEvent) + Send + Sync>;

/// Build an [`EventCallback`] that forwards into a channel
pub fn channel_callback(tx: async_channel::Sender<RunnerEvent>) -> EventCallback {
    Arc::new(move |event| {
        // The receiver going away is how subscribers unsubscribe.
        let _ = tx.send_blocking(event);
    })
}

/// Delivers events to one subscriber until sealed.
///
/// The subscriber is invoked while the gate's lock is held, so once [`EventGate::seal`]
/// returns no further event can be observed. Subscribers must not dispose their runner
/// from inside the callback.
pub(crate) struct EventGate {
    callback: Mutex<Option<EventCallback>>,
    closed: AtomicBool,
}

impl EventGate {
    pub(crate) fn new(callback: EventCallback) -> Self {
        Self {
            callback: Mutex::new(Some(callback)),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn emit(&self, event: RunnerEvent) {
        let guard = lock(&self.callback);
        if let Some(callback) = guard.as_ref() {
            callback(event);
        }
    }

    /// Raise `Closed` unless it has already been raised
    pub(crate) fn emit_closed(&self, exit_code: i32) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.emit(RunnerEvent::Closed { exit_code });
        }
    }

    pub(crate) fn seal(&self) {
        lock(&self.callback).take();
    }
}
