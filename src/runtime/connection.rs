//! Connection state: URL, reconnect identity and attempt bookkeeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use uuid::Uuid;

use super::error::TransportError;

/// Query parameter carrying the reconnect id.
pub const RECONNECT_PARAM: &str = "reconnect_id";

/// Lifetime state of one logical agent session.
#[derive(Debug)]
pub struct ConnectionState {
    url: String,
    reconnect_id: Uuid,
    attempts: AtomicU32,
    limit: u32,
    halted: Arc<AtomicBool>,
}

impl ConnectionState {
    /// Create state for `url` with a fresh reconnect id.
    pub fn new(url: impl Into<String>, limit: u32) -> Self {
        Self {
            url: url.into(),
            reconnect_id: Uuid::new_v4(),
            attempts: AtomicU32::new(0),
            limit,
            halted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Base transport URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Reconnect id, stable for the lifetime of the agent.
    pub fn reconnect_id(&self) -> Uuid {
        self.reconnect_id
    }

    /// URL to (re)connect with, carrying the reconnect id.
    pub fn connect_url(&self) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{separator}{RECONNECT_PARAM}={}", self.url, self.reconnect_id)
    }

    /// Count a reconnect attempt. Exceeding the limit halts the connection.
    pub fn record_attempt(&self) -> Result<u32, TransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > self.limit {
            tracing::warn!(limit = self.limit, "reconnect limit exceeded; halting");
            self.halt();
            return Err(TransportError::ReconnectLimit(self.limit));
        }
        Ok(attempt)
    }

    /// Reconnect limit.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Whether the attempts ran past the limit.
    pub fn is_exhausted(&self) -> bool {
        self.attempts() > self.limit
    }

    /// Attempts since the last successful send.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Reset the attempt counter after a successful send.
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    /// Halt the connection. There is no way back.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    /// Whether the connection is halted.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Shared halted flag, for outboxes that suppress reports once halted.
    pub fn halted_flag(&self) -> Arc<AtomicBool> {
        self.halted.clone()
    }
}
