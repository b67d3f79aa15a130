//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use dconnect_config::ConfigError;
use dconnect_core::{ConnectReason, CoreError};

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Device Connect Manager is not reachable")]
    #[diagnostic(
        code(dconnect::not_running),
        help(
            "Check that the manager app is running and reachable.\n\
             {message}\n\
             Try: dconnect availability --host <HOST>"
        )
    )]
    NotRunning { message: String },

    #[error("The manager failed anti-spoofing verification")]
    #[diagnostic(
        code(dconnect::invalid_server),
        help("The response HMAC did not match. Check hmac_key in your profile.")
    )]
    InvalidServer,

    #[error("Event channel refused ({reason}): {message}")]
    #[diagnostic(
        code(dconnect::channel_refused),
        help("Another client may hold the event channel for this token. Retry shortly.")
    )]
    ChannelRefused { reason: String, message: String },

    // ── Authorization ────────────────────────────────────────────────
    #[error("Authorization failed ({reason})")]
    #[diagnostic(
        code(dconnect::auth_failed),
        help(
            "{message}\n\
             Approve the access request on the manager, or drop the cached token with:\n\
             dconnect session logout"
        )
    )]
    AuthFailed { reason: String, message: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("No services available: {message}")]
    #[diagnostic(code(dconnect::no_service))]
    NoService { message: String },

    #[error("No session for host '{host}'")]
    #[diagnostic(
        code(dconnect::session_not_found),
        help("Run: dconnect session list")
    )]
    SessionNotFound { host: String },

    // ── API ──────────────────────────────────────────────────────────
    #[error("Manager error ({code}): {message}")]
    #[diagnostic(code(dconnect::api_error))]
    ApiError { code: i32, message: String },

    // ── Validation / configuration ───────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(dconnect::validation))]
    Validation { field: String, reason: String },

    #[error("No manager host given")]
    #[diagnostic(
        code(dconnect::no_host),
        help(
            "Pass --host, set DCONNECT_HOST, or add a profile to\n\
             {path}"
        )
    )]
    NoHost { path: String },

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(dconnect::profile_not_found),
        help("Available profiles: {available}")
    )]
    ProfileNotFound { name: String, available: String },

    #[error(transparent)]
    #[diagnostic(code(dconnect::config))]
    Config(ConfigError),

    #[error("{0}")]
    #[diagnostic(code(dconnect::internal))]
    Internal(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(dconnect::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotRunning { .. } | Self::InvalidServer | Self::ChannelRefused { .. } => {
                exit_code::CONNECTION
            }
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::NoService { .. } | Self::SessionNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. }
            | Self::NoHost { .. }
            | Self::ProfileNotFound { .. }
            | Self::Config(_) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError ───────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ProfileNotFound { name, available } => {
                CliError::ProfileNotFound { name, available }
            }
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config(other),
        }
    }
}

// ── CoreError → CliError ─────────────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Connect { reason, message } => match reason {
                ConnectReason::NotRunning => CliError::NotRunning { message },
                ConnectReason::InvalidServer => CliError::InvalidServer,
                ConnectReason::NoService => CliError::NoService { message },
                ConnectReason::WsDuplicated | ConnectReason::WsUnknownError => {
                    CliError::ChannelRefused {
                        reason: reason.to_string(),
                        message,
                    }
                }
                ConnectReason::NoClient
                | ConnectReason::NoAccessToken
                | ConnectReason::NotAuthorized
                | ConnectReason::WsInvalidAccessToken => CliError::AuthFailed {
                    reason: reason.to_string(),
                    message,
                },
            },

            CoreError::Network { url, reason } => CliError::NotRunning {
                message: format!("{url}: {reason}"),
            },

            CoreError::InvalidServer => CliError::InvalidServer,

            CoreError::Authorization { code, message } => CliError::AuthFailed {
                reason: format!("errorCode {code}"),
                message,
            },

            CoreError::WebSocket { code, message } => CliError::ChannelRefused {
                reason: format!("errorCode {code}"),
                message,
            },

            CoreError::Protocol { code, message } => CliError::ApiError { code, message },

            CoreError::NoService { message } => CliError::NoService { message },

            CoreError::SessionNotFound { host } => CliError::SessionNotFound { host },

            err @ CoreError::ConnectAborted { .. } => CliError::Internal(err.to_string()),

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::OfferCancelled => {
                CliError::Internal("operation cancelled before it could run".into())
            }

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}
