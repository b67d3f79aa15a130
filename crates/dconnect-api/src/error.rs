use thiserror::Error;

use crate::models::ErrorCode;

/// Top-level error type for the `dconnect-api` crate.
///
/// Covers every failure mode on the wire: HTTP transport, the
/// `{result, errorCode, errorMessage}` envelope, response authentication,
/// and the WebSocket event channel. `dconnect-core` maps these into its
/// caller-facing taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    /// No HTTP response was received.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The server answered with a non-success status and a body that is
    /// not a protocol envelope.
    #[error("Unexpected HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// TLS or HTTP client construction failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// A client setting cannot be used on the wire (e.g. an origin that is
    /// not a valid header value).
    #[error("Invalid client configuration: {0}")]
    Config(String),

    // ── Protocol ────────────────────────────────────────────────────
    /// The envelope carried `result != 0`.
    #[error("Device Connect error {code}: {message}")]
    Protocol { code: i32, message: String },

    /// The response HMAC did not match the nonce we sent.
    #[error("The response was received from an invalid server")]
    InvalidServer,

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed before the handshake.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The first inbound frame rejected our access token.
    #[error("WebSocket handshake rejected (errorCode {code}): {message}")]
    WebSocketHandshake { code: i32, message: String },

    /// WebSocket closed while we were still waiting for the handshake ack.
    #[error("WebSocket closed before handshake: {reason}")]
    WebSocketClosed { reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// The protocol error code carried by this error, if any.
    ///
    /// Transport failures report `ACCESS_FAILED (-1)` and HMAC mismatches
    /// report `INVALID_SERVER (-2)`.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Protocol { code, .. } => Some(ErrorCode::from_code(*code)),
            Self::Transport(_) | Self::HttpStatus { .. } => Some(ErrorCode::AccessFailed),
            Self::InvalidServer => Some(ErrorCode::InvalidServer),
            _ => None,
        }
    }

    /// Returns `true` for authorization-class protocol errors (codes 11-15).
    ///
    /// These are resolved by discarding the current client id and access
    /// token and running the authorization sequence again.
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Protocol { code, .. } if ErrorCode::from_code(*code).is_authorization())
    }

    /// Returns `true` when the server reports local authorization as disabled
    /// (errorCode 2 on the grant endpoint).
    pub fn is_local_oauth_disabled(&self) -> bool {
        matches!(self, Self::Protocol { code: 2, .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } => true,
            _ => false,
        }
    }
}
