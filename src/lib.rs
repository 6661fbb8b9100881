//! # hypha
//!
//! Distributed actor runtime over WebSockets. Each participating process
//! is a node; nodes exchange JSON-framed envelopes over long-lived
//! bidirectional connections and invoke methods on remotely-hosted
//! actors as if they were local.
//!
//! A node may accept inbound connections (server), dial one or more
//! servers (client), or both at once. The runtime handles identity,
//! call/reply correlation, routing by node id (waiting for a peer to
//! connect when necessary), inbound dispatch, and connection supervision
//! with reconnection and graceful shutdown. Delivery is at-most-once with
//! explicit failure reporting.
//!
//! ```no_run
//! use hypha::{ActorSystem, ServerAddress, SystemConfig};
//!
//! # async fn demo() -> hypha::Result<()> {
//! let system = ActorSystem::new(SystemConfig::default());
//! let bound = system.run_server(ServerAddress::insecure("127.0.0.1", 0)).await?;
//! println!("listening on {bound}");
//! system.shutdown_gracefully().await;
//! # Ok(())
//! # }
//! ```
//!
//! Transport security is out of scope: servers bind insecurely and rely
//! on an external reverse proxy for TLS.

pub mod codec;
pub mod config;
mod directory;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod manager;
mod pending;
mod remote;
pub mod system;

pub use codec::{JsonCodec, WireCodec};
pub use config::{ClientConfig, SystemConfig};
pub use envelope::Envelope;
pub use error::{ActorSystemError, Result};
pub use identity::{ActorId, CallId, NodeId};
pub use manager::{ConnectionEvent, ConnectionMonitor, Manager, Scheme, ServerAddress};
pub use system::{Actor, ActorSystem, OnDemandResolver};
