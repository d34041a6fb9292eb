//! Connection runtime for the Tendril agent
//!
//! This module carries everything between the dispatcher and the wire: the
//! JSON codec, the packetizer that frames payloads and handles
//! acknowledgments, connection state with reconnect bookkeeping, the
//! transports, and the `Pipeline` that ties them together.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::interpreter::DEFAULT_DEPTH;

// Submodules
pub mod codec;
pub mod connection;
pub mod error;
pub mod packetizer;
pub mod pipeline;
pub mod transport;

use error::{AgentError, Result};

/// Default maximum frame payload, in characters
pub const DEFAULT_FRAME_LIMIT: usize = 500_000;

/// Configuration for one agent connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Transport URL (`tcp://host:port`)
    pub url: String,

    /// Maximum characters per frame payload
    pub frame_limit: usize,

    /// Reconnect attempts allowed before the connection halts
    pub reconnect_limit: u32,

    /// Pause between reconnect attempts
    pub reconnect_delay_ms: u64,

    /// How long a sender waits for the send lock
    pub lock_timeout_ms: u64,

    /// Polling interval while waiting for the send lock
    pub lock_poll_ms: u64,

    /// How long a continue frame waits for its acknowledgment
    pub ack_timeout_ms: u64,

    /// Emit a KEEPALIVE message on this interval, if set
    pub keepalive_interval_ms: Option<u64>,

    /// Truncation depth for callbacks and GET replies without one (0 keeps
    /// scalars only)
    pub default_depth: i64,

    /// Enable debug tracing
    pub debug: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            url: "tcp://127.0.0.1:8675".to_string(),
            frame_limit: DEFAULT_FRAME_LIMIT,
            reconnect_limit: 5,
            reconnect_delay_ms: 500,
            lock_timeout_ms: 10_000,
            lock_poll_ms: 5,
            ack_timeout_ms: 30_000,
            keepalive_interval_ms: None,
            default_depth: DEFAULT_DEPTH,
            debug: false,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|err| {
            AgentError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        let config: AgentConfig = serde_json::from_slice(&data).map_err(|err| {
            AgentError::Config(format!("failed to deserialize {}: {err}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|err| AgentError::Config(format!("failed to serialize config: {err}")))?;
        std::fs::write(path, json).map_err(|err| {
            AgentError::Config(format!("failed to write {}: {err}", path.display()))
        })
    }

    /// Reject settings the packetizer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.frame_limit == 0 {
            return Err(AgentError::Config("frame_limit must be positive".into()));
        }
        if self.lock_poll_ms == 0 {
            return Err(AgentError::Config("lock_poll_ms must be positive".into()));
        }
        Ok(())
    }

    /// Reconnect pause as a duration.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Send lock timeout as a duration.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Send lock polling interval as a duration.
    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms)
    }

    /// Acknowledgment timeout as a duration.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Keepalive interval, if enabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        self.keepalive_interval_ms.map(Duration::from_millis)
    }
}

// Re-export commonly used types
pub use codec::JsonCodec;
pub use connection::ConnectionState;
pub use packetizer::{Frame, FrameKind, Packetizer, Received};
pub use pipeline::Pipeline;
pub use transport::{MemoryPeer, MemoryTransport, TcpTransport, Transport};

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_round_trips_through_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agent.json");

        let config = AgentConfig {
            frame_limit: 64,
            keepalive_interval_ms: Some(1_000),
            ..AgentConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(AgentConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agent.json");
        std::fs::write(&path, r#"{"reconnect_limit": 2}"#).unwrap();

        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.reconnect_limit, 2);
        assert_eq!(config.frame_limit, DEFAULT_FRAME_LIMIT);
    }

    #[test]
    fn zero_frame_limit_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agent.json");
        std::fs::write(&path, r#"{"frame_limit": 0}"#).unwrap();
        assert!(matches!(AgentConfig::load(&path), Err(AgentError::Config(_))));
    }
}
