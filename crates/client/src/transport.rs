//! Physical push transport.
//!
//! The [`EventChannel`](crate::channel::EventChannel) only talks to the
//! [`Connector`] / [`Transport`] traits. [`WsConnector`] is the production
//! implementation over `tokio-tungstenite`; tests drive the channel with an
//! in-memory connector instead.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Default bound on a single WebSocket handshake.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// One open push connection.
///
/// Exclusively owned by a single connection session. Dropping it releases
/// the underlying socket; [`close`](Transport::close) additionally performs
/// a polite close handshake.
#[async_trait]
pub trait Transport: Send {
    /// Wait for the next inbound frame.
    ///
    /// `None` means the peer went away without an error.
    async fn next_frame(&mut self) -> Option<Result<Message, TransportError>>;

    /// Close the connection. Errors are swallowed: the handle is being
    /// released either way.
    async fn close(&mut self);
}

/// Factory for [`Transport`]s.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Perform the handshake against `url`.
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, TransportError>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    handshake_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl WsConnector {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, TransportError> {
        let handshake = connect_async(url.as_str());
        let (stream, _response) = tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout(self.handshake_timeout))?
            .map_err(|e| {
                TransportError::Connect(format!("Failed to connect to {}: {e}", redact(url)))
            })?;

        tracing::debug!(url = %redact(url), "WebSocket handshake complete");

        Ok(Box::new(WsTransport { stream }))
    }
}

/// A live WebSocket connection.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn next_frame(&mut self) -> Option<Result<Message, TransportError>> {
        self.stream
            .next()
            .await
            .map(|r| r.map_err(|e| TransportError::Protocol(e.to_string())))
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close handshake failed");
        }
    }
}

/// Address without its query string, for logs.
fn redact(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

/// Errors raised by a transport. They never escape the channel: every one
/// of them leads to the Reconnecting state.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The handshake was refused or failed.
    #[error("Connection error: {0}")]
    Connect(String),

    /// The handshake did not complete in time.
    #[error("Handshake timed out after {0:?}")]
    Timeout(Duration),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}
