//! Keeps exactly one live connection.
//!
//! After any close the supervisor waits a fixed delay and tries again, with no
//! retry limit. Shutdown is terminal: every pending reconnect and every
//! connect attempt checks the shutdown token first.
//!
//! Outbound frames are only accepted while a connection is open. Each
//! connection gets its own outbound queue, so nothing queued on a dead
//! connection is ever replayed on the next one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::connection::{ChannelConnection, CloseReason, Connector, Delivery, deliver};
use super::types::{ChannelEvent, ConnectionState};

/// Size of the inbound event buffer.
const EVENT_BUFFER_SIZE: usize = 256;

/// Delay between a close and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

type LiveSender = Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>;

/// Owner of the push channel.
pub struct ChannelSupervisor {
    live: LiveSender,
    state: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ChannelSupervisor {
    /// Start connecting. Events arrive on the returned receiver.
    pub fn start(
        connector: Arc<dyn Connector>,
        reconnect_delay: Duration,
    ) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let live: LiveSender = Arc::new(Mutex::new(None));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(supervise(
            connector,
            reconnect_delay,
            event_tx,
            state_tx,
            Arc::clone(&live),
            shutdown.clone(),
        ));

        (
            Self {
                live,
                state: state_rx,
                shutdown,
                task: Some(task),
            },
            event_rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Serialize and enqueue a payload on the open connection.
    ///
    /// Returns false (and logs) when there is no open connection or the payload
    /// cannot be encoded. Nothing is buffered for later.
    pub fn send<T: Serialize>(&self, payload: &T) -> bool {
        match serde_json::to_string(payload) {
            Ok(text) => self.send_text(text),
            Err(e) => {
                warn!("Dropping outbound payload that failed to encode: {}", e);
                false
            }
        }
    }

    pub fn send_text(&self, text: String) -> bool {
        if self.shutdown.is_cancelled() {
            warn!("Push channel shut down, dropping outbound message");
            return false;
        }
        let live = self.live.lock().unwrap_or_else(|p| p.into_inner());
        match live.as_ref() {
            Some(tx) if tx.send(text).is_ok() => true,
            _ => {
                warn!("Push channel not connected, dropping outbound message");
                false
            }
        }
    }

    /// Permanently stop. Idempotent.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Shutting down push channel");
            self.shutdown.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Shut down and wait for the connection task to finish.
    pub async fn close(mut self) {
        self.shutdown();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!("Push channel task ended abnormally: {}", e);
        }
    }
}

impl Drop for ChannelSupervisor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn set_live(live: &LiveSender, tx: Option<mpsc::UnboundedSender<String>>) {
    *live.lock().unwrap_or_else(|p| p.into_inner()) = tx;
}

async fn supervise(
    connector: Arc<dyn Connector>,
    reconnect_delay: Duration,
    events: mpsc::Sender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
    live: LiveSender,
    shutdown: CancellationToken,
) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        state.send_replace(ConnectionState::Connecting);
        let opened = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            opened = ChannelConnection::open(connector.as_ref()) => opened,
        };

        match opened {
            Ok(mut conn) => {
                let (out_tx, mut out_rx) = mpsc::unbounded_channel();
                set_live(&live, Some(out_tx));
                state.send_replace(ConnectionState::Connected);
                if deliver(&events, ChannelEvent::Connected, &shutdown).await != Delivery::Sent {
                    set_live(&live, None);
                    conn.close().await;
                    break;
                }

                let reason = conn.pump(&mut out_rx, &events, &shutdown).await;
                set_live(&live, None);
                state.send_replace(ConnectionState::Disconnected);

                match reason {
                    CloseReason::Shutdown => break,
                    CloseReason::Abandoned => {
                        debug!("Push channel has no listener, stopping");
                        conn.close().await;
                        break;
                    }
                    CloseReason::Peer => info!("Push channel closed by server"),
                    CloseReason::Error(e) => warn!("Push channel error: {}", e),
                }

                if deliver(&events, ChannelEvent::Disconnected, &shutdown).await != Delivery::Sent {
                    break;
                }
            }
            Err(e) => {
                state.send_replace(ConnectionState::Disconnected);
                warn!(
                    "Push channel connection to {} failed: {}",
                    connector.describe(),
                    e
                );
            }
        }

        debug!("Reconnecting push channel in {:?}", reconnect_delay);
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }

    set_live(&live, None);
    state.send_replace(ConnectionState::Disconnected);
    debug!("Push channel supervisor stopped");
}
