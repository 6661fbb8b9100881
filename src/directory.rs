//! Remote-node directory
//!
//! Tracks the live connection for each peer node and parks callers whose
//! target node has not connected yet. Client-only peers are routinely
//! addressed by node id before (or between) their connections, so lookups
//! wait for an `opened` event up to the configured timeout rather than
//! failing fast.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{ActorSystemError, Result};
use crate::identity::{ActorId, NodeId};
use crate::remote::RemoteNode;

type Waiter = oneshot::Sender<Arc<RemoteNode>>;

/// `NodeId → RemoteNode` map plus per-node queues of suspended lookups.
pub(crate) struct RemoteNodeDirectory {
    connection_timeout: Duration,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<NodeId, Arc<RemoteNode>>,
    waiters: HashMap<NodeId, Vec<Waiter>>,
}

impl RemoteNodeDirectory {
    pub(crate) fn new(connection_timeout: Duration) -> Self {
        Self {
            connection_timeout,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Install the connection for its node, waking every parked lookup.
    ///
    /// Returns the evicted entry when the peer already had a connection;
    /// the caller must tear that one down.
    pub(crate) fn opened(&self, remote: Arc<RemoteNode>) -> Option<Arc<RemoteNode>> {
        let node = remote.node_id();
        let (evicted, waiters) = {
            let mut inner = self.inner.lock();
            let evicted = inner.nodes.insert(node, remote.clone());
            let waiters = inner.waiters.remove(&node).unwrap_or_default();
            (evicted, waiters)
        };
        debug!(%node, woken = waiters.len(), "remote node opened");
        // Waiters are woken outside the lock.
        for waiter in waiters {
            let _ = waiter.send(remote.clone());
        }
        evicted
    }

    /// Remove the entry for a closing connection.
    ///
    /// Removal only happens when the stored entry is this very connection;
    /// a newer connection for the same node is left in place. Parked
    /// lookups stay parked until their timeout or another `opened`.
    pub(crate) fn closing(&self, remote: &Arc<RemoteNode>) {
        let node = remote.node_id();
        let mut inner = self.inner.lock();
        if let Some(current) = inner.nodes.get(&node) {
            if Arc::ptr_eq(current, remote) {
                inner.nodes.remove(&node);
                debug!(%node, "remote node closed");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn get(&self, node: NodeId) -> Option<Arc<RemoteNode>> {
        self.inner.lock().nodes.get(&node).cloned()
    }

    pub(crate) fn known_nodes(&self) -> Vec<NodeId> {
        self.inner.lock().nodes.keys().copied().collect()
    }

    /// Resolve the connection for the actor's home node, waiting up to the
    /// connection timeout for it to appear.
    pub(crate) async fn remote_node_for(&self, id: &ActorId) -> Result<Arc<RemoteNode>> {
        let node = id
            .node
            .ok_or_else(|| ActorSystemError::MissingNodeId { id: id.clone() })?;

        let rx = {
            let mut inner = self.inner.lock();
            if let Some(remote) = inner.nodes.get(&node) {
                return Ok(remote.clone());
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.entry(node).or_default().push(tx);
            rx
        };

        debug!(%node, timeout = ?self.connection_timeout, "waiting for node to connect");
        match tokio::time::timeout(self.connection_timeout, rx).await {
            Ok(Ok(remote)) => Ok(remote),
            Ok(Err(_)) => Err(ActorSystemError::NoRemoteNode { node }),
            Err(_) => {
                self.prune_waiters(node);
                Err(ActorSystemError::TimeoutWaitingForNode {
                    node,
                    timeout: self.connection_timeout,
                })
            }
        }
    }

    /// Drop waiter slots whose callers have gone away, so repeated
    /// lookups of a node that never connects do not accumulate.
    fn prune_waiters(&self, node: NodeId) {
        let mut inner = self.inner.lock();
        if let Some(waiters) = inner.waiters.get_mut(&node) {
            waiters.retain(|tx| !tx.is_closed());
            if waiters.is_empty() {
                inner.waiters.remove(&node);
            }
        }
    }
}
