//! Client manager: resilient dial loop with backoff
//!
//! Supervises one target address. The loop dials, handshakes, pumps the
//! connection, and on any failure or clean close reconnects after an
//! exponential backoff with jitter, capped. Cancellation is observed in
//! the dial, the read loop, and the backoff sleep.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{ConnectionEvent, ConnectionMonitor, Manager, ServerAddress};
use crate::remote::{establish, read_until_closed, teardown};
use crate::system::SystemCore;

/// Supervisor for one resilient client connection.
pub(crate) struct ClientManager {
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ClientManager {
    pub(crate) fn start(
        core: Arc<SystemCore>,
        address: ServerAddress,
        monitor: Option<ConnectionMonitor>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(resilient_loop(core, address, monitor, shutdown_rx));
        Self {
            shutdown: shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }
}

#[async_trait]
impl Manager for ClientManager {
    async fn cancel(&self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}

fn notify(monitor: &Option<ConnectionMonitor>, event: ConnectionEvent) {
    if let Some(monitor) = monitor {
        monitor(event);
    }
}

async fn resilient_loop(
    core: Arc<SystemCore>,
    address: ServerAddress,
    monitor: Option<ConnectionMonitor>,
    mut shutdown: watch::Receiver<bool>,
) {
    let config = core.config.client.clone();
    let url = address.url();
    let mut delay = config.base_backoff;
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        attempt += 1;
        notify(&monitor, ConnectionEvent::Connecting);
        debug!(%url, attempt, "dialing");

        let dial = tokio::time::timeout(
            config.connect_timeout,
            tokio_tungstenite::connect_async(&url),
        );
        let dialed = tokio::select! {
            _ = shutdown.changed() => break,
            dialed = dial => dialed,
        };

        match dialed {
            Ok(Ok((ws, _response))) => match establish(ws, &core).await {
                Ok((remote, mut stream, writer)) => {
                    delay = config.base_backoff;
                    attempt = 0;
                    notify(&monitor, ConnectionEvent::Connected(remote.node_id()));

                    let ended =
                        read_until_closed(&mut stream, &remote, &core, &mut shutdown).await;
                    teardown(&remote, &core, writer).await;
                    if let Err(error) = ended {
                        warn!(%url, %error, "connection failed");
                    } else {
                        info!(%url, "connection closed");
                    }
                    notify(&monitor, ConnectionEvent::Disconnected);
                }
                Err(error) => warn!(%url, %error, "node-id handshake failed"),
            },
            Ok(Err(error)) => debug!(%url, %error, "dial failed"),
            Err(_) => debug!(%url, "dial timed out"),
        }

        if *shutdown.borrow() {
            break;
        }

        let wait = backoff_wait(delay, config.jitter);
        notify(
            &monitor,
            ConnectionEvent::Reconnecting {
                attempt,
                delay: wait,
            },
        );
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(wait) => {}
        }
        delay = next_delay(delay, config.max_backoff);
    }

    notify(&monitor, ConnectionEvent::Cancelled);
    debug!(%url, "client loop stopped");
}

/// Current delay plus jitter of up to half of it, to avoid thundering
/// herds when many clients chase the same restarted server.
fn backoff_wait(delay: Duration, jitter: bool) -> Duration {
    let jitter_ms = if jitter {
        let half = (delay.as_millis() as u64) / 2;
        rand::thread_rng().gen_range(0..=half)
    } else {
        0
    };
    delay + Duration::from_millis(jitter_ms)
}

/// Exponential backoff: double per consecutive failure, capped.
fn next_delay(delay: Duration, max: Duration) -> Duration {
    (delay * 2).min(max)
}
