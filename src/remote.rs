//! Per-connection remote node
//!
//! One `RemoteNode` exists per live peer connection. A single writer task
//! owns the WebSocket sink and serializes every outbound frame; the read
//! loop runs in the owning manager's connection task and hands inbound
//! envelopes to the kernel. User code executing inside an inbound
//! dispatch reaches the dispatching connection through a task-local.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::codec::WireCodec;
use crate::envelope::Envelope;
use crate::error::{ActorSystemError, Result};
use crate::identity::{CallId, NodeId};
use crate::pending::ReplyRegistry;
use crate::system::SystemCore;

tokio::task_local! {
    /// The connection whose inbound call is currently being dispatched.
    pub(crate) static CURRENT_REMOTE: Arc<RemoteNode>;
}

/// The dispatching connection, when inside an inbound invocation.
pub(crate) fn current_remote() -> Result<Arc<RemoteNode>> {
    CURRENT_REMOTE
        .try_with(|remote| remote.clone())
        .map_err(|_| ActorSystemError::NotInDistributedActor)
}

/// Runtime object bound to one live peer connection.
pub(crate) struct RemoteNode {
    node_id: NodeId,
    outbound: mpsc::Sender<Message>,
    codec: Arc<dyn WireCodec>,
    /// Call ids written through this connection and still awaiting replies.
    inflight: Mutex<HashSet<CallId>>,
    /// Per-peer user info, scoped to this connection's lifetime.
    user_info: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl std::fmt::Debug for RemoteNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteNode")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

impl RemoteNode {
    pub(crate) fn new(
        node_id: NodeId,
        outbound: mpsc::Sender<Message>,
        codec: Arc<dyn WireCodec>,
    ) -> Self {
        Self {
            node_id,
            outbound,
            codec,
            inflight: Mutex::new(HashSet::new()),
            user_info: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Queue an envelope for the writer task.
    ///
    /// `ConnectionClose` maps to a WebSocket close frame; everything else
    /// is one text frame. Encoding failures are logged and dropped, so the
    /// caller observes a timeout or call-level error rather than a
    /// propagated encode failure. Queueing suspends when the outbound
    /// queue is full (write-side backpressure).
    pub(crate) async fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        let frame = match envelope {
            Envelope::ConnectionClose => Message::Close(Some(CloseFrame {
                code: CloseCode::Protocol,
                reason: "connection closing".into(),
            })),
            other => match self.codec.encode(other) {
                Ok(text) => Message::Text(text),
                Err(error) => {
                    warn!(node = %self.node_id, %error, "dropping unencodable envelope");
                    return Ok(());
                }
            },
        };
        self.send_frame(frame).await
    }

    pub(crate) async fn send_frame(&self, frame: Message) -> Result<()> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ActorSystemError::ConnectionLost)
    }

    pub(crate) fn track_call(&self, call_id: CallId) {
        self.inflight.lock().insert(call_id);
    }

    pub(crate) fn untrack_call(&self, call_id: CallId) {
        self.inflight.lock().remove(&call_id);
    }

    /// Fail every pending reply routed through this connection.
    pub(crate) fn fail_inflight(&self, replies: &ReplyRegistry) {
        let ids: Vec<CallId> = self.inflight.lock().drain().collect();
        if !ids.is_empty() {
            debug!(node = %self.node_id, count = ids.len(), "failing in-flight calls");
        }
        for call_id in ids {
            replies.fail(call_id, ActorSystemError::ConnectionLost);
        }
    }

    pub(crate) fn set_info(&self, key: impl Into<String>, value: Arc<dyn Any + Send + Sync>) {
        self.user_info.lock().insert(key.into(), value);
    }

    pub(crate) fn get_info<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.user_info.lock().get(key).cloned()?;
        value.downcast::<T>().ok()
    }
}

/// Node-id handshake plus connection setup, shared by both managers.
///
/// Sends the local node id as the first application message, reads the
/// peer's as theirs, spawns the writer task, and installs the resulting
/// node in the directory (tearing down any connection it replaces).
pub(crate) async fn establish<S>(
    ws: WebSocketStream<S>,
    core: &Arc<SystemCore>,
) -> Result<(Arc<RemoteNode>, SplitStream<WebSocketStream<S>>, JoinHandle<()>)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();

    let hello = serde_json::to_string(&core.node_id).map_err(ActorSystemError::encoding)?;
    sink.send(Message::Text(hello))
        .await
        .map_err(|e| ActorSystemError::failed_to_upgrade(format!("sending node id: {e}")))?;

    let handshake_timeout = core.config.client.connect_timeout;
    let peer = tokio::time::timeout(handshake_timeout, read_peer_node_id(&mut stream))
        .await
        .map_err(|_| ActorSystemError::failed_to_upgrade("timed out waiting for peer node id"))??;

    let (outbound_tx, outbound_rx) = mpsc::channel(core.config.outbound_queue_depth);
    let writer = tokio::spawn(write_loop(sink, outbound_rx));
    let remote = Arc::new(RemoteNode::new(peer, outbound_tx, core.codec.clone()));

    if let Some(evicted) = core.directory.opened(remote.clone()) {
        debug!(node = %peer, "new connection replaces existing one");
        evicted.fail_inflight(&core.replies);
    }
    info!(node = %peer, "peer connection established");
    Ok((remote, stream, writer))
}

/// Read the peer's node id, which must be its first application message.
async fn read_peer_node_id<S>(stream: &mut SplitStream<WebSocketStream<S>>) -> Result<NodeId>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = stream.next().await {
        let message =
            frame.map_err(|e| ActorSystemError::failed_to_upgrade(format!("handshake read: {e}")))?;
        match message {
            Message::Text(text) => {
                return serde_json::from_str(&text).map_err(|e| {
                    ActorSystemError::failed_to_upgrade(format!("malformed peer node id: {e}"))
                })
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => {
                return Err(ActorSystemError::failed_to_upgrade(format!(
                    "unexpected {} frame before node id",
                    frame_name(&other)
                )))
            }
        }
    }
    Err(ActorSystemError::failed_to_upgrade(
        "connection closed during node-id handshake",
    ))
}

/// Single writer: the only task touching the sink. Ends on channel close,
/// sink error, or after flushing a close frame.
async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound_rx: mpsc::Receiver<Message>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = outbound_rx.recv().await {
        let is_close = matches!(frame, Message::Close(_));
        if sink.send(frame).await.is_err() {
            break;
        }
        if is_close {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Pump inbound frames until close, error, or shutdown.
pub(crate) async fn read_until_closed<S>(
    stream: &mut SplitStream<WebSocketStream<S>>,
    remote: &Arc<RemoteNode>,
    core: &Arc<SystemCore>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            // Any shutdown change (or a dropped manager) ends the loop.
            _ = shutdown.changed() => {
                let _ = remote.send_envelope(&Envelope::ConnectionClose).await;
                return Ok(());
            }
            frame = stream.next() => {
                let Some(frame) = frame else { return Ok(()) };
                let message = frame.map_err(ActorSystemError::transport)?;
                match message {
                    Message::Text(text) => match core.codec.decode(&text)? {
                        Envelope::Call {
                            call_id,
                            recipient,
                            invocation_target,
                            generic_subs,
                            args,
                        } => {
                            core.dispatch_inbound(
                                remote.clone(),
                                call_id,
                                recipient,
                                invocation_target,
                                generic_subs,
                                args,
                            );
                        }
                        Envelope::Reply { call_id, value, .. } => {
                            remote.untrack_call(call_id);
                            if let Err(error) = core.replies.received_reply(call_id, value) {
                                debug!(node = %remote.node_id(), %error, "dropping late reply");
                            }
                        }
                        Envelope::ConnectionClose => {
                            debug!(node = %remote.node_id(), "peer sent connection close");
                            let _ = remote.send_frame(Message::Close(None)).await;
                            return Ok(());
                        }
                    },
                    Message::Ping(payload) => {
                        let _ = remote.send_frame(Message::Pong(payload)).await;
                    }
                    Message::Pong(_) => {}
                    Message::Binary(_) | Message::Frame(_) => {
                        debug!(node = %remote.node_id(), "ignoring non-text frame");
                    }
                    Message::Close(_) => {
                        let _ = remote.send_frame(Message::Close(None)).await;
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Remove the connection from the directory and fail its in-flight calls.
pub(crate) async fn teardown(
    remote: &Arc<RemoteNode>,
    core: &Arc<SystemCore>,
    mut writer: JoinHandle<()>,
) {
    core.directory.closing(remote);
    remote.fail_inflight(&core.replies);
    // The writer exits on its own after flushing a close frame; give it a
    // moment before cutting it loose.
    if tokio::time::timeout(Duration::from_millis(50), &mut writer)
        .await
        .is_err()
    {
        writer.abort();
        let _ = writer.await;
    }
}

/// Handshake, read loop, and teardown for one accepted connection.
pub(crate) async fn run_connection<S>(
    ws: WebSocketStream<S>,
    core: Arc<SystemCore>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (remote, mut stream, writer) = establish(ws, &core).await?;
    let result = read_until_closed(&mut stream, &remote, &core, &mut shutdown).await;
    teardown(&remote, &core, writer).await;
    result
}

fn frame_name(message: &Message) -> &'static str {
    match message {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
        Message::Frame(_) => "raw",
    }
}
