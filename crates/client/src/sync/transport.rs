// Live transport for a note room.
//
// `Transport` opens one link per connect attempt; the connection controller
// drives the y-sync exchange over it and owns the reconnect loop. The
// production implementation is a websocket client; tests substitute
// in-memory links.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use notesync_common::protocol::ws::note_ws_url;
use notesync_common::types::NoteId;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The server refused the credential. Retrying cannot help.
    #[error("credential rejected: {0}")]
    Rejected(String),
    #[error("transport failure: {0}")]
    Io(String),
}

/// Reconnection parameters.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            max_attempts: u32::MAX, // retry indefinitely
        }
    }
}

impl ReconnectPolicy {
    /// Backoff before the next attempt after `consecutive_failures` failures.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let exp = consecutive_failures.min(7);
        self.base_delay.saturating_mul(1u32 << exp).min(self.max_delay)
    }

    pub fn should_reconnect(&self, consecutive_failures: u32) -> bool {
        consecutive_failures < self.max_attempts
    }
}

/// One established bidirectional link carrying binary y-sync frames.
#[async_trait]
pub trait TransportLink: Send {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Next binary frame. `Ok(None)` on clean close.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    async fn close(&mut self);
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        note_id: NoteId,
        token: &str,
    ) -> Result<Box<dyn TransportLink>, TransportError>;

    fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::default()
    }
}

/// Websocket transport addressing `{ws_base}/notes/{id}?token=...`.
#[derive(Debug, Clone)]
pub struct WsTransport {
    ws_base_url: String,
    policy: ReconnectPolicy,
}

impl WsTransport {
    pub fn new(ws_base_url: impl Into<String>) -> Self {
        Self { ws_base_url: ws_base_url.into(), policy: ReconnectPolicy::default() }
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(
        &self,
        note_id: NoteId,
        token: &str,
    ) -> Result<Box<dyn TransportLink>, TransportError> {
        let url = note_ws_url(&self.ws_base_url, note_id, token)
            .map_err(|error| TransportError::Io(error.to_string()))?;

        match connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                debug!(%note_id, "websocket link established");
                Ok(Box::new(WsLink { stream }))
            }
            Err(WsError::Http(response)) => {
                let status = response.status();
                if status.as_u16() == 401 || status.as_u16() == 403 {
                    Err(TransportError::Rejected(format!("websocket upgrade returned {status}")))
                } else {
                    Err(TransportError::Io(format!("websocket upgrade returned {status}")))
                }
            }
            Err(error) => Err(TransportError::Io(error.to_string())),
        }
    }

    fn reconnect_policy(&self) -> ReconnectPolicy {
        self.policy.clone()
    }
}

struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TransportLink for WsLink {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.stream
            .send(WsMessage::Binary(frame.into()))
            .await
            .map_err(|error| TransportError::Io(error.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.stream.next().await {
                None | Some(Ok(WsMessage::Close(_))) => return Ok(None),
                Some(Ok(WsMessage::Binary(payload))) => return Ok(Some(payload.to_vec())),
                Some(Ok(_)) => {}
                Some(Err(error)) => return Err(TransportError::Io(error.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
