//! Server manager: bind, accept, upgrade, supervise

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::{Manager, Scheme, ServerAddress};
use crate::error::{ActorSystemError, Result};
use crate::remote::run_connection;
use crate::system::SystemCore;

/// Accept-loop supervisor for one bound endpoint.
#[derive(Debug)]
pub(crate) struct ServerManager {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ServerManager {
    /// Bind the address and start accepting. Port 0 picks an ephemeral
    /// port, observable through [`local_addr`](Self::local_addr).
    pub(crate) async fn bind(core: Arc<SystemCore>, address: ServerAddress) -> Result<Self> {
        if address.scheme == Scheme::Secure {
            return Err(ActorSystemError::SecureServerNotSupported);
        }

        let listener = TcpListener::bind((address.host.as_str(), address.port))
            .await
            .map_err(|e| ActorSystemError::transport(format!("bind {address}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(ActorSystemError::transport)?;
        info!(%local_addr, "server listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, core, shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown: shutdown_tx,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// The bound address, including the resolved port when 0 was requested.
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Manager for ServerManager {
    async fn cancel(&self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.accept_task.lock().await.take() {
            let _ = task.await;
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    core: Arc<SystemCore>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            // Reap finished connection tasks as we go.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        warn!(%error, "accept failed");
                        continue;
                    }
                };
                debug!(%peer, "inbound connection");
                let core = core.clone();
                let shutdown = shutdown.clone();
                // Bound the upgrade so a silent client cannot pin an
                // accept slot past shutdown.
                let upgrade_timeout = core.config.client.connect_timeout;
                connections.spawn(async move {
                    let upgraded =
                        tokio::time::timeout(upgrade_timeout, tokio_tungstenite::accept_async(stream))
                            .await;
                    match upgraded {
                        Ok(Ok(ws)) => {
                            if let Err(error) = run_connection(ws, core, shutdown).await {
                                debug!(%peer, %error, "connection ended");
                            }
                        }
                        Ok(Err(error)) => warn!(%peer, %error, "websocket handshake failed"),
                        Err(_) => warn!(%peer, "websocket handshake timed out"),
                    }
                });
            }
        }
    }

    // Every connection task observes the same shutdown signal; drain them
    // rather than aborting so close frames get flushed.
    while connections.join_next().await.is_some() {}
    info!("server accept loop stopped");
}
