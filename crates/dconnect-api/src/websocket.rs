//! WebSocket event channel.
//!
//! The manager pushes device events over a single socket per application.
//! Opening it is a two-step handshake: the client sends
//! `{"accessToken":"<token>"}` and the first frame the manager sends back is
//! an acknowledgement `{result, errorCode?}`. Only after a successful ack
//! does the socket carry events.
//!
//! # Example
//!
//! ```rust,ignore
//! use dconnect_api::websocket::EventChannel;
//! use tokio_util::sync::CancellationToken;
//!
//! let channel = EventChannel::open("ws://localhost:4035/gotapi/websocket", token, None, None).await?;
//! let cancel = CancellationToken::new();
//! channel.run(|event| println!("{}", event.channel_path()), cancel).await?;
//! ```

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::models::{DeviceEvent, HandshakeAck};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── HandshakeFailure ─────────────────────────────────────────────────

/// Why the manager refused the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeFailure {
    /// errorCode 3: the token is unknown or expired.
    InvalidAccessToken,
    /// errorCode 4: another socket is already open for this token.
    Duplicated,
    Other(i32),
}

impl HandshakeFailure {
    pub fn from_code(code: i32) -> Self {
        match code {
            3 => Self::InvalidAccessToken,
            4 => Self::Duplicated,
            other => Self::Other(other),
        }
    }
}

impl Error {
    /// Classify a rejected handshake. `None` for every other error.
    pub fn handshake_failure(&self) -> Option<HandshakeFailure> {
        match self {
            Self::WebSocketHandshake { code, .. } => Some(HandshakeFailure::from_code(*code)),
            _ => None,
        }
    }
}

// ── EventChannel ─────────────────────────────────────────────────────

/// An established, acknowledged event socket.
pub struct EventChannel {
    stream: WsStream,
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel").finish_non_exhaustive()
    }
}

impl EventChannel {
    /// Connect, send the access token and wait for the acknowledgement.
    ///
    /// With `handshake_timeout == None` this waits for the ack for as long
    /// as the socket stays open.
    pub async fn open(
        url: &str,
        access_token: &str,
        origin: Option<&str>,
        handshake_timeout: Option<Duration>,
    ) -> Result<Self, Error> {
        tracing::info!(url = %url, "Connecting to event WebSocket");

        let uri: tungstenite::http::Uri = url
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

        let mut request = ClientRequestBuilder::new(uri);
        if let Some(origin) = origin {
            request = request.with_header("Origin", origin);
        }

        let (mut stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        let hello = json!({ "accessToken": access_token }).to_string();
        stream
            .send(Message::text(hello))
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        let ack = match handshake_timeout {
            Some(limit) => tokio::time::timeout(limit, read_ack(&mut stream))
                .await
                .map_err(|_| Error::WebSocketClosed {
                    reason: format!("no handshake ack within {}ms", limit.as_millis()),
                })??,
            None => read_ack(&mut stream).await?,
        };

        if ack.result == 0 {
            tracing::info!("Event WebSocket established");
            return Ok(Self { stream });
        }

        let code = ack.error_code.unwrap_or(1);
        let message = ack
            .error_message
            .unwrap_or_else(|| "handshake rejected".to_owned());
        tracing::warn!(code, %message, "Event WebSocket handshake rejected");
        let _ = stream.close(None).await;
        Err(Error::WebSocketHandshake { code, message })
    }

    /// Send a close frame without reading any events.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "Event WebSocket close failed");
        }
    }

    /// Read events until the socket closes or `cancel` fires.
    ///
    /// Each text frame is parsed as a [`DeviceEvent`] and handed to `sink`.
    /// Frames that do not parse are logged and skipped. Returns `Ok(())` on
    /// a clean close or cancellation.
    pub async fn run<F>(mut self, mut sink: F, cancel: CancellationToken) -> Result<(), Error>
    where
        F: FnMut(DeviceEvent) + Send,
    {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!("Event WebSocket cancelled, closing");
                    let _ = self.stream.close(None).await;
                    return Ok(());
                }
                frame = self.stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            match DeviceEvent::from_frame(text.as_str()) {
                                Ok(event) => sink(event),
                                Err(e) => {
                                    tracing::debug!(error = %e, "Skipping unparseable event frame");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(_))) => {
                            // tungstenite queues the pong reply itself
                            tracing::trace!("WebSocket ping");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            if let Some(ref cf) = frame {
                                tracing::info!(
                                    code = %cf.code,
                                    reason = %cf.reason,
                                    "WebSocket close frame received"
                                );
                            } else {
                                tracing::info!("WebSocket close frame received (no payload)");
                            }
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            return Err(Error::WebSocketClosed { reason: e.to_string() });
                        }
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Ok(());
                        }
                        _ => {
                            // Binary, Pong, Frame
                        }
                    }
                }
            }
        }
    }
}

/// Wait for the first text frame and parse it as the handshake ack.
async fn read_ack(stream: &mut WsStream) -> Result<HandshakeAck, Error> {
    while let Some(frame) = stream.next().await {
        match frame.map_err(|e| Error::WebSocketClosed {
            reason: e.to_string(),
        })? {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).map_err(|e| Error::Deserialization {
                    message: format!("invalid handshake ack: {e}"),
                    body: text.to_string(),
                });
            }
            Message::Close(frame) => {
                return Err(Error::WebSocketClosed {
                    reason: frame.map_or_else(|| "closed".to_owned(), |cf| cf.reason.to_string()),
                });
            }
            _ => {}
        }
    }
    Err(Error::WebSocketClosed {
        reason: "stream ended".to_owned(),
    })
}
