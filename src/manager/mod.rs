//! Connection lifecycle managers
//!
//! A manager supervises either an accept loop (server) or a resilient
//! dial loop (client). The kernel owns one manager per `run_server` /
//! `connect_client` call and cancels them all on graceful shutdown.

mod client;
mod server;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::identity::NodeId;

pub(crate) use client::ClientManager;
pub(crate) use server::ServerManager;

/// Lifecycle contract shared by server and client managers.
#[async_trait]
pub trait Manager: Send + Sync {
    /// Stop all work and release resources. Idempotent; returns only
    /// after the supervised tasks have observed cancellation.
    async fn cancel(&self);
}

/// Transport scheme of a server address.
///
/// Servers bind insecurely only; secure deployments terminate TLS in an
/// external reverse proxy. Clients pass `Secure` through to the transport
/// as a `wss://` URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Insecure,
    Secure,
}

/// Host/port endpoint of a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAddress {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn insecure(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Insecure,
            host: host.into(),
            port,
        }
    }

    pub fn secure(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Secure,
            host: host.into(),
            port,
        }
    }

    /// The WebSocket URL for dialing this address.
    pub fn url(&self) -> String {
        match self.scheme {
            Scheme::Insecure => format!("ws://{}:{}", self.host, self.port),
            Scheme::Secure => format!("wss://{}:{}", self.host, self.port),
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Client connection state transitions, observed via a monitor callback.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A dial attempt is starting.
    Connecting,
    /// Handshake completed with the given peer.
    Connected(NodeId),
    /// The connection ended (failure or clean close).
    Disconnected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting { attempt: u32, delay: Duration },
    /// The manager was cancelled; no further attempts.
    Cancelled,
}

/// Observer for client connection state transitions.
pub type ConnectionMonitor = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_urls() {
        assert_eq!(
            ServerAddress::insecure("127.0.0.1", 8765).url(),
            "ws://127.0.0.1:8765"
        );
        assert_eq!(
            ServerAddress::secure("example.com", 443).url(),
            "wss://example.com:443"
        );
    }
}
