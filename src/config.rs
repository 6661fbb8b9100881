//! Runtime configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level actor system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// How long an outbound call waits for the target node's connection
    /// to appear before failing.
    pub connection_timeout: Duration,
    /// Bound of each connection's outbound frame queue. Senders suspend
    /// when the queue is full.
    pub outbound_queue_depth: usize,
    /// Client-side dial and reconnect tuning.
    pub client: ClientConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            outbound_queue_depth: 256,
            client: ClientConfig::default(),
        }
    }
}

/// Dial and reconnect tuning for client connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Per-attempt bound on the TCP dial, WebSocket upgrade, and node-id
    /// handshake.
    pub connect_timeout: Duration,
    /// First reconnect delay; doubles per consecutive failure.
    pub base_backoff: Duration,
    /// Reconnect delay cap.
    pub max_backoff: Duration,
    /// Add random jitter of up to half the current delay to avoid
    /// thundering herds.
    pub jitter: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            jitter: true,
        }
    }
}
