//! Log multiplexer - holds a primed engine's output until a request claims it.
//!
//! A primed process starts writing (banner, preamble diagnostics) long before
//! any request is there to read it. The multiplexer buffers those bytes and,
//! once a consumer attaches, flushes them and forwards everything after.

use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Anything engine output can be written into.
pub trait OutputTarget: Send + Sync {
    fn write(&self, bytes: &[u8]);
}

/// Consumer end handed to the engine cache by a request.
///
/// Cloneable; chunks arrive on the paired receiver in send order. Writes
/// after the receiver is gone are discarded.
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl OutputSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OutputTarget for OutputSink {
    fn write(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let _ = self.tx.send(bytes.to_vec());
    }
}

#[derive(Debug)]
enum MuxState {
    Buffering(Vec<u8>),
    Attached(OutputSink),
}

/// Buffering → Attached state machine. Both states live behind one lock.
#[derive(Debug)]
pub struct LogMultiplexer {
    state: Mutex<MuxState>,
}

impl LogMultiplexer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MuxState::Buffering(Vec::new())),
        }
    }

    /// Flush anything buffered into `sink`, then forward directly.
    pub fn attach(&self, sink: OutputSink) {
        let mut state = self.lock();
        if let MuxState::Buffering(buffered) = &*state {
            sink.write(buffered);
        }
        *state = MuxState::Attached(sink);
    }

    #[cfg(test)]
    fn is_attached(&self) -> bool {
        matches!(&*self.lock(), MuxState::Attached(_))
    }

    fn lock(&self) -> MutexGuard<'_, MuxState> {
        // A panicking writer cannot leave the state half-updated
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for LogMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputTarget for LogMultiplexer {
    fn write(&self, bytes: &[u8]) {
        match &mut *self.lock() {
            MuxState::Attached(sink) => sink.write(bytes),
            MuxState::Buffering(buffer) => buffer.extend_from_slice(bytes),
        }
    }
}
