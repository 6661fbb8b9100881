//! Runtime error types
//!
//! One taxonomy covers resolution, routing, handshake, and per-call
//! failures. Variants stay `Clone` so a single connection loss can fail
//! every caller waiting on that connection.

use std::time::Duration;

use thiserror::Error;

use crate::identity::{ActorId, CallId, NodeId};

/// Errors surfaced by the actor runtime.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActorSystemError {
    /// No local actor matched the id and the on-demand resolver produced nothing.
    #[error("no actor found for id {id}")]
    ResolveFailed { id: ActorId },

    /// A typed resolve found an actor of a different concrete type.
    #[error("resolved actor has type {found}, expected {expected}")]
    ResolveFailedToMatchActorType { found: String, expected: String },

    /// Outbound routing needs the actor id to name its home node.
    #[error("actor id {id} carries no node id")]
    MissingNodeId { id: ActorId },

    /// No live connection to the target node.
    #[error("no live connection to node {node}")]
    NoRemoteNode { node: NodeId },

    /// Waited the configured connection timeout; the node never appeared.
    #[error("timed out after {timeout:?} waiting for node {node} to connect")]
    TimeoutWaitingForNode { node: NodeId, timeout: Duration },

    /// WebSocket or node-id handshake failure.
    #[error("connection upgrade failed: {reason}")]
    FailedToUpgrade { reason: String },

    /// A reply arrived for a call id nobody is waiting on (late reply
    /// after caller cancellation).
    #[error("no pending reply continuation for call {call_id}")]
    MissingReplyContinuation { call_id: CallId },

    /// Reply bytes did not decode to the expected type.
    #[error("decoding failed: {detail}")]
    DecodingError { detail: String },

    /// An envelope could not be encoded for the wire.
    #[error("encoding failed: {detail}")]
    EncodingError { detail: String },

    /// The server binds insecurely only; TLS belongs in a reverse proxy.
    #[error("secure websocket servers are not supported; terminate TLS in a reverse proxy")]
    SecureServerNotSupported,

    /// Node-info accessors are only valid while handling an inbound call.
    #[error("not called from within a distributed actor invocation")]
    NotInDistributedActor,

    /// The connection carrying this call went away before a reply arrived.
    #[error("connection to the remote node was lost")]
    ConnectionLost,

    /// A user actor failed while handling an inbound call. Never crosses
    /// the wire; the caller sees an empty reply value.
    #[error("actor failed to handle call: {detail}")]
    ActorError { detail: String },

    /// Socket-level failure (bind, dial).
    #[error("transport error: {detail}")]
    Transport { detail: String },
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, ActorSystemError>;

impl ActorSystemError {
    /// Create a handshake failure.
    pub fn failed_to_upgrade(reason: impl Into<String>) -> Self {
        Self::FailedToUpgrade {
            reason: reason.into(),
        }
    }

    /// Create a decoding error from any displayable cause.
    pub fn decoding(detail: impl std::fmt::Display) -> Self {
        Self::DecodingError {
            detail: detail.to_string(),
        }
    }

    /// Create an encoding error from any displayable cause.
    pub fn encoding(detail: impl std::fmt::Display) -> Self {
        Self::EncodingError {
            detail: detail.to_string(),
        }
    }

    /// Create a user-actor failure.
    pub fn actor(detail: impl std::fmt::Display) -> Self {
        Self::ActorError {
            detail: detail.to_string(),
        }
    }

    /// Create a socket-level transport error.
    pub fn transport(detail: impl std::fmt::Display) -> Self {
        Self::Transport {
            detail: detail.to_string(),
        }
    }

    /// Whether retrying the operation can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoRemoteNode { .. }
                | Self::TimeoutWaitingForNode { .. }
                | Self::ConnectionLost
                | Self::Transport { .. }
        )
    }
}
