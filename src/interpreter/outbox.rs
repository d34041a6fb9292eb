//! Outbound envelope sinks.

use parking_lot::Mutex;
use serde_json::Value as Json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Destination for envelopes the agent sends to the controller.
pub trait Outbox: Send + Sync {
    /// Queue an envelope for transmission.
    fn emit(&self, envelope: Json);

    /// Whether the underlying connection is halted. Exceptions are not
    /// reported through a halted outbox.
    fn is_halted(&self) -> bool {
        false
    }
}

/// Outbox that keeps every envelope in memory. Used by tests and by
/// embedders that drain envelopes themselves.
#[derive(Debug, Default)]
pub struct RecordingOutbox {
    sent: Mutex<Vec<Json>>,
    halted: AtomicBool,
}

impl RecordingOutbox {
    /// Create an empty recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything emitted so far.
    pub fn sent(&self) -> Vec<Json> {
        self.sent.lock().clone()
    }

    /// Remove and return everything emitted so far.
    pub fn take(&self) -> Vec<Json> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Most recent envelope.
    pub fn last(&self) -> Option<Json> {
        self.sent.lock().last().cloned()
    }

    /// Simulate a halted connection.
    pub fn set_halted(&self, halted: bool) {
        self.halted.store(halted, Ordering::SeqCst);
    }
}

impl Outbox for RecordingOutbox {
    fn emit(&self, envelope: Json) {
        self.sent.lock().push(envelope);
    }

    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

/// Outbox feeding the pipeline's writer task.
#[derive(Debug, Clone)]
pub struct ChannelOutbox {
    tx: mpsc::UnboundedSender<Json>,
    halted: Arc<AtomicBool>,
}

impl ChannelOutbox {
    /// Create an outbox and the receiver the writer drains.
    pub fn new(halted: Arc<AtomicBool>) -> (Self, mpsc::UnboundedReceiver<Json>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, halted }, rx)
    }
}

impl Outbox for ChannelOutbox {
    fn emit(&self, envelope: Json) {
        if self.tx.send(envelope).is_err() {
            tracing::debug!("outbox receiver dropped; envelope discarded");
        }
    }

    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}
