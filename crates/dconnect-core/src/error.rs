// ── Core error types ──
//
// Caller-facing errors from dconnect-core. Consumers branch on the variant
// (and, for connect failures, on `ConnectReason`) instead of inspecting raw
// protocol error codes. The `From<dconnect_api::Error>` impl translates
// wire-level failures into this taxonomy.

use dconnect_api::{ErrorCode, HandshakeFailure};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Why a `connect()` sequence failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ConnectReason {
    /// The availability check got no answer: manager not installed or not started.
    NotRunning,
    /// `authorization/grant` was refused.
    NoClient,
    /// `authorization/accessToken` was refused.
    NoAccessToken,
    /// Authorization kept failing after the permitted number of retries.
    NotAuthorized,
    /// Handshake errorCode 4: another socket is open for this application.
    WsDuplicated,
    /// Handshake errorCode 3.
    WsInvalidAccessToken,
    WsUnknownError,
    /// Service discovery failed.
    NoService,
    /// A response failed HMAC verification.
    InvalidServer,
}

impl ConnectReason {
    pub fn from_handshake(failure: HandshakeFailure) -> Self {
        match failure {
            HandshakeFailure::Duplicated => Self::WsDuplicated,
            HandshakeFailure::InvalidAccessToken => Self::WsInvalidAccessToken,
            HandshakeFailure::Other(_) => Self::WsUnknownError,
        }
    }
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Transport ────────────────────────────────────────────────────
    /// No HTTP response was received.
    #[error("Cannot reach Device Connect Manager at {url}: {reason}")]
    Network { url: String, reason: String },

    /// The manager answered with `result != 0`.
    #[error("Device Connect error {code}: {message}")]
    Protocol { code: i32, message: String },

    /// Authorization-class protocol error (errorCode 11-15).
    #[error("Authorization error {code}: {message}")]
    Authorization { code: i32, message: String },

    /// The event channel failed or its handshake was rejected.
    #[error("WebSocket error {code}: {message}")]
    WebSocket { code: i32, message: String },

    /// Discovery returned nothing usable.
    #[error("No service available: {message}")]
    NoService { message: String },

    /// A response failed HMAC verification.
    #[error("The response was received from an invalid server")]
    InvalidServer,

    // ── Orchestration ────────────────────────────────────────────────
    /// A step of the connect sequence failed.
    #[error("Connect failed ({reason}): {message}")]
    Connect {
        reason: ConnectReason,
        message: String,
    },

    /// The session was disconnected or closed while its handshake was in
    /// flight; the socket that answered has been closed again.
    #[error("Connect to {host} aborted: the session was disconnected during the handshake")]
    ConnectAborted { host: String },

    #[error("No session for host {host}")]
    SessionNotFound { host: String },

    /// A queued offer was dropped before it could run (session deleted).
    #[error("Offer cancelled before the session was established")]
    OfferCancelled,

    // ── Configuration / internal ─────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Coarse category: `network`, `protocol`, `authorization`, `ws`,
    /// `no-service`, `connect`, ...
    pub fn what(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Protocol { .. } => "protocol",
            Self::Authorization { .. } => "authorization",
            Self::WebSocket { .. } => "ws",
            Self::NoService { .. } => "no-service",
            Self::InvalidServer => "invalid-server",
            Self::Connect { .. } | Self::ConnectAborted { .. } => "connect",
            Self::SessionNotFound { .. } => "session",
            Self::OfferCancelled => "offer",
            Self::Config { .. } => "config",
            Self::Internal(_) => "internal",
        }
    }

    /// The connect-sequence tag, for `Connect` errors.
    pub fn reason(&self) -> Option<ConnectReason> {
        match self {
            Self::Connect { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// The protocol error code, if this error carries one.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Protocol { code, .. }
            | Self::Authorization { code, .. }
            | Self::WebSocket { code, .. } => Some(ErrorCode::from_code(*code)),
            Self::Network { .. } => Some(ErrorCode::AccessFailed),
            Self::InvalidServer => Some(ErrorCode::InvalidServer),
            _ => None,
        }
    }

    /// Whether discarding the credentials and re-running authorization can
    /// fix this error.
    pub fn requires_reauthorization(&self) -> bool {
        match self {
            Self::Authorization { .. } => true,
            Self::WebSocket { code, .. } => {
                HandshakeFailure::from_code(*code) == HandshakeFailure::InvalidAccessToken
            }
            Self::Connect { reason, .. } => *reason == ConnectReason::WsInvalidAccessToken,
            _ => false,
        }
    }

    pub(crate) fn connect(reason: ConnectReason, message: impl Into<String>) -> Self {
        Self::Connect {
            reason,
            message: message.into(),
        }
    }
}

// ── Conversion from wire-level errors ────────────────────────────────

impl From<dconnect_api::Error> for CoreError {
    fn from(err: dconnect_api::Error) -> Self {
        match err {
            dconnect_api::Error::Transport(ref e) => CoreError::Network {
                url: e
                    .url()
                    .map_or_else(|| "<unknown>".into(), ToString::to_string),
                reason: e.to_string(),
            },
            dconnect_api::Error::HttpStatus { status, url } => CoreError::Network {
                url,
                reason: format!("unexpected HTTP status {status}"),
            },
            dconnect_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            dconnect_api::Error::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
            dconnect_api::Error::Config(message) => CoreError::Config { message },
            dconnect_api::Error::Protocol { code, message } => {
                if ErrorCode::from_code(code).is_authorization() {
                    CoreError::Authorization { code, message }
                } else {
                    CoreError::Protocol { code, message }
                }
            }
            dconnect_api::Error::InvalidServer => CoreError::InvalidServer,
            dconnect_api::Error::WebSocketHandshake { code, message } => {
                CoreError::WebSocket { code, message }
            }
            dconnect_api::Error::WebSocketConnect(reason) => CoreError::WebSocket {
                code: ErrorCode::AccessFailed.code(),
                message: format!("WebSocket connection failed: {reason}"),
            },
            dconnect_api::Error::WebSocketClosed { reason } => CoreError::WebSocket {
                code: ErrorCode::AccessFailed.code(),
                message: format!("WebSocket closed: {reason}"),
            },
            dconnect_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
