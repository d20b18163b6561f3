//! A single duplex connection.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use log::{debug, info};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::types::ChannelEvent;
use crate::error::ChannelError;

/// Outbound half of a transport: accepts serialized text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;

/// Inbound half of a transport: yields text frames until the peer goes away.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ChannelError>> + Send>>;

/// Opens transports. The supervisor calls this once per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<(FrameSink, FrameStream), ChannelError>;

    /// Human-readable target, for diagnostics.
    fn describe(&self) -> String;
}

/// WebSocket transport.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Build the socket URL, appending the auth token as a query parameter.
    pub fn with_token(url: &str, token: Option<&str>) -> Self {
        match token {
            Some(token) if !token.is_empty() => {
                let sep = if url.contains('?') { '&' } else { '?' };
                Self::new(format!("{url}{sep}token={token}"))
            }
            _ => Self::new(url),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<(FrameSink, FrameStream), ChannelError> {
        let (socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ChannelError::connect(e.to_string()))?;
        let (sink, stream) = socket.split();

        let sink = sink.with(|text: String| {
            future::ready(Ok::<_, ChannelError>(Message::Text(text.into())))
        });

        let stream = stream.filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        debug!("Dropping non-UTF-8 binary frame ({} bytes)", data.len());
                        None
                    }
                },
                Ok(_) => None,
                Err(e) => Some(Err(ChannelError::from(e))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }

    fn describe(&self) -> String {
        // Never log the token.
        self.url
            .split_once('?')
            .map(|(base, _)| base.to_string())
            .unwrap_or_else(|| self.url.clone())
    }
}

/// Why a connection stopped pumping.
#[derive(Debug)]
pub enum CloseReason {
    /// Supervisor shutdown.
    Shutdown,
    /// The peer ended the stream.
    Peer,
    /// Transport failure.
    Error(ChannelError),
    /// Nobody is listening for events anymore.
    Abandoned,
}

/// One open duplex link.
pub struct ChannelConnection {
    sink: FrameSink,
    stream: FrameStream,
}

impl ChannelConnection {
    pub async fn open(connector: &dyn Connector) -> Result<Self, ChannelError> {
        let (sink, stream) = connector.connect().await?;
        info!("Push channel connected to {}", connector.describe());
        Ok(Self { sink, stream })
    }

    pub async fn close(mut self) {
        if let Err(e) = self.sink.close().await {
            debug!("Error closing push channel: {}", e);
        }
    }

    /// Relay frames until the connection ends.
    ///
    /// Inbound frames are forwarded to `events` in arrival order; outbound
    /// frames are taken from `outbound`. Shutdown also interrupts a forward
    /// waiting on a full `events` buffer.
    pub async fn pump(
        &mut self,
        outbound: &mut mpsc::UnboundedReceiver<String>,
        events: &mpsc::Sender<ChannelEvent>,
        shutdown: &CancellationToken,
    ) -> CloseReason {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return self.close_on_shutdown().await,
                inbound = self.stream.next() => match inbound {
                    Some(Ok(text)) => match deliver(events, ChannelEvent::Message(text), shutdown).await {
                        Delivery::Sent => {}
                        Delivery::Cancelled => return self.close_on_shutdown().await,
                        Delivery::Gone => return CloseReason::Abandoned,
                    },
                    Some(Err(err)) => return CloseReason::Error(err),
                    None => return CloseReason::Peer,
                },
                Some(text) = outbound.recv() => {
                    if let Err(err) = self.sink.send(text).await {
                        return CloseReason::Error(err);
                    }
                }
            }
        }
    }

    async fn close_on_shutdown(&mut self) -> CloseReason {
        if let Err(e) = self.sink.close().await {
            debug!("Error closing push channel on shutdown: {}", e);
        }
        CloseReason::Shutdown
    }
}

/// Outcome of handing an event to the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Sent,
    /// Shutdown was requested while waiting for buffer space.
    Cancelled,
    /// The listener dropped its receiver.
    Gone,
}

pub(crate) async fn deliver(
    events: &mpsc::Sender<ChannelEvent>,
    event: ChannelEvent,
    shutdown: &CancellationToken,
) -> Delivery {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Delivery::Cancelled,
        sent = events.send(event) => match sent {
            Ok(()) => Delivery::Sent,
            Err(_) => Delivery::Gone,
        },
    }
}
