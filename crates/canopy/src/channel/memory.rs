//! In-process transport.
//!
//! `MemoryConnector` stands in for the socket: the paired `MemoryServer`
//! decides which connection attempts succeed and plays the backend side of
//! every accepted connection.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures::{SinkExt, StreamExt};
use tokio::time::Instant;

use super::connection::{Connector, FrameSink, FrameStream};
use crate::error::ChannelError;

#[derive(Default)]
struct Inner {
    attempts: Vec<Instant>,
    ready: VecDeque<(FrameSink, FrameStream)>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Client side: hands out connections the server has accepted ahead of time.
pub struct MemoryConnector {
    inner: Arc<Mutex<Inner>>,
}

/// Backend side.
#[derive(Clone)]
pub struct MemoryServer {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryServer) {
        let inner = Arc::new(Mutex::new(Inner::default()));
        (
            Self {
                inner: Arc::clone(&inner),
            },
            MemoryServer { inner },
        )
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<(FrameSink, FrameStream), ChannelError> {
        let mut inner = lock(&self.inner);
        inner.attempts.push(Instant::now());
        inner
            .ready
            .pop_front()
            .ok_or_else(|| ChannelError::connect("connection refused"))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

impl MemoryServer {
    /// Let the next connection attempt succeed.
    pub fn accept_next(&self) -> MemoryPeer {
        let (to_client, from_server) = unbounded::<Result<String, ChannelError>>();
        let (to_server, from_client) = unbounded::<String>();

        let sink: FrameSink = Box::pin(to_server.sink_map_err(|_| ChannelError::Closed));
        let stream: FrameStream = Box::pin(from_server);
        lock(&self.inner).ready.push_back((sink, stream));

        MemoryPeer {
            tx: to_client,
            rx: from_client,
        }
    }

    /// When each connection attempt happened.
    pub fn attempts(&self) -> Vec<Instant> {
        lock(&self.inner).attempts.clone()
    }
}

/// Backend end of one accepted connection.
pub struct MemoryPeer {
    tx: UnboundedSender<Result<String, ChannelError>>,
    rx: UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Push a raw frame to the client. Returns false once the client is gone.
    pub fn push(&self, text: impl Into<String>) -> bool {
        self.tx.unbounded_send(Ok(text.into())).is_ok()
    }

    pub fn push_json(&self, value: &serde_json::Value) -> bool {
        self.push(value.to_string())
    }

    /// Break the connection with a transport error.
    pub fn fail(&self, reason: &str) {
        let _ = self.tx.unbounded_send(Err(ChannelError::transport(reason)));
    }

    /// Close the connection from the backend side.
    pub fn close(&self) {
        self.tx.close_channel();
    }

    /// Next frame sent by the client, `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.next().await
    }
}
