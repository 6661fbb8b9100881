//! Pending-reply registry
//!
//! Correlates outgoing call ids with one-shot completers. A caller holds
//! exactly one entry from just before its call is written until the first
//! of: a matching reply, a connection loss, or its own cancellation.

use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{ActorSystemError, Result};
use crate::identity::CallId;

type Completer = oneshot::Sender<Result<Vec<u8>>>;

/// Thread-safe table of in-flight calls awaiting reply bytes.
#[derive(Default)]
pub(crate) struct ReplyRegistry {
    inflight: Mutex<HashMap<CallId, Completer>>,
}

impl ReplyRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh call id, install a completer, run `send`, then await
    /// the reply bytes.
    ///
    /// If `send` fails the completer is removed and the error re-raised.
    /// If the caller is cancelled while awaiting, the entry is removed so
    /// a late reply surfaces as [`ActorSystemError::MissingReplyContinuation`]
    /// at the dispatch site instead of leaking.
    pub(crate) async fn send_message<F, Fut>(&self, send: F) -> Result<Vec<u8>>
    where
        F: FnOnce(CallId) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let call_id = CallId::random();
        let (tx, rx) = oneshot::channel();
        self.inflight.lock().insert(call_id, tx);
        let _guard = InflightGuard {
            registry: self,
            call_id,
        };

        send(call_id).await?;

        match rx.await {
            Ok(outcome) => outcome,
            // Completer dropped without resolution: the owning connection
            // was torn down between send and reply.
            Err(_) => Err(ActorSystemError::ConnectionLost),
        }
    }

    /// Resolve the completer for `call_id` with reply bytes.
    pub(crate) fn received_reply(&self, call_id: CallId, value: Vec<u8>) -> Result<()> {
        let completer = self
            .inflight
            .lock()
            .remove(&call_id)
            .ok_or(ActorSystemError::MissingReplyContinuation { call_id })?;
        // The receiver may have been cancelled between lookup and send.
        let _ = completer.send(Ok(value));
        Ok(())
    }

    /// Fail a single pending call, if still registered.
    pub(crate) fn fail(&self, call_id: CallId, error: ActorSystemError) {
        if let Some(completer) = self.inflight.lock().remove(&call_id) {
            debug!(%call_id, %error, "failing pending reply");
            let _ = completer.send(Err(error));
        }
    }

    /// Fail every pending call. Used on shutdown.
    pub(crate) fn fail_all(&self, error: ActorSystemError) {
        let drained: Vec<_> = {
            let mut inflight = self.inflight.lock();
            inflight.drain().collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), %error, "failing all pending replies");
        }
        for (_, completer) in drained {
            let _ = completer.send(Err(error.clone()));
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inflight.lock().len()
    }
}

/// Removes the table entry when the caller stops waiting, whichever way.
struct InflightGuard<'a> {
    registry: &'a ReplyRegistry,
    call_id: CallId,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.registry.inflight.lock().remove(&self.call_id);
    }
}
