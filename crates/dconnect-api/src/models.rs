// Wire types for the Device Connect protocol.
//
// Responses share the `{result, errorCode?, errorMessage?}` envelope;
// profile-specific fields ride alongside and are kept in `extra` maps so
// nothing the manager sends is silently dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── ErrorCode ────────────────────────────────────────────────────────

/// Protocol error codes carried in `errorCode`.
///
/// The two negative codes never appear on the wire: they describe failures
/// detected on the client side (no response, response failed HMAC check).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    AccessFailed,
    InvalidServer,
    Unknown,
    NotSupportProfile,
    NotSupportAction,
    NotSupportAttribute,
    EmptyServiceId,
    NotFoundService,
    Timeout,
    UnknownAttribute,
    LowBattery,
    InvalidRequestParameter,
    Authorization,
    ExpiredAccessToken,
    EmptyAccessToken,
    Scope,
    NotFoundClientId,
    IllegalDeviceState,
    IllegalServerState,
    InvalidOrigin,
    InvalidUrl,
    InvalidProfile,
    Other(i32),
}

impl ErrorCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            -1 => Self::AccessFailed,
            -2 => Self::InvalidServer,
            1 => Self::Unknown,
            2 => Self::NotSupportProfile,
            3 => Self::NotSupportAction,
            4 => Self::NotSupportAttribute,
            5 => Self::EmptyServiceId,
            6 => Self::NotFoundService,
            7 => Self::Timeout,
            8 => Self::UnknownAttribute,
            9 => Self::LowBattery,
            10 => Self::InvalidRequestParameter,
            11 => Self::Authorization,
            12 => Self::ExpiredAccessToken,
            13 => Self::EmptyAccessToken,
            14 => Self::Scope,
            15 => Self::NotFoundClientId,
            16 => Self::IllegalDeviceState,
            17 => Self::IllegalServerState,
            18 => Self::InvalidOrigin,
            19 => Self::InvalidUrl,
            20 => Self::InvalidProfile,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::AccessFailed => -1,
            Self::InvalidServer => -2,
            Self::Unknown => 1,
            Self::NotSupportProfile => 2,
            Self::NotSupportAction => 3,
            Self::NotSupportAttribute => 4,
            Self::EmptyServiceId => 5,
            Self::NotFoundService => 6,
            Self::Timeout => 7,
            Self::UnknownAttribute => 8,
            Self::LowBattery => 9,
            Self::InvalidRequestParameter => 10,
            Self::Authorization => 11,
            Self::ExpiredAccessToken => 12,
            Self::EmptyAccessToken => 13,
            Self::Scope => 14,
            Self::NotFoundClientId => 15,
            Self::IllegalDeviceState => 16,
            Self::IllegalServerState => 17,
            Self::InvalidOrigin => 18,
            Self::InvalidUrl => 19,
            Self::InvalidProfile => 20,
            Self::Other(code) => code,
        }
    }

    /// Codes 11-15: the token or client id is unusable and must be
    /// re-acquired.
    pub fn is_authorization(self) -> bool {
        matches!(
            self,
            Self::Authorization
                | Self::ExpiredAccessToken
                | Self::EmptyAccessToken
                | Self::Scope
                | Self::NotFoundClientId
        )
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        Self::from_code(code)
    }
}

// ── Envelope ─────────────────────────────────────────────────────────

/// The common response envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub result: i32,
    #[serde(default)]
    pub error_code: Option<i32>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub hmac: Option<String>,
}

impl Envelope {
    pub fn is_success(&self) -> bool {
        self.result == 0
    }
}

// ── Authorization ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantResponse {
    pub client_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expire: Option<i64>,
}

// ── Availability / System ────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
}

// ── Services ─────────────────────────────────────────────────────────

/// One entry of a `serviceDiscovery` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub service_type: Option<String>,
    #[serde(default)]
    pub online: Option<bool>,
    #[serde(default)]
    pub config: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceDiscovery {
    #[serde(default)]
    pub services: Vec<Service>,
}

/// `serviceInformation` response: which profiles a service implements.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInformation {
    #[serde(default)]
    pub supports: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ServiceInformation {
    /// Case-insensitive membership test on `supports`.
    pub fn supports(&self, profile: &str) -> bool {
        self.supports.iter().any(|p| p.eq_ignore_ascii_case(profile))
    }
}

// ── WebSocket ────────────────────────────────────────────────────────

/// First inbound WebSocket frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeAck {
    pub result: i32,
    #[serde(default)]
    pub error_code: Option<i32>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// An event pushed on the WebSocket after the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    /// Empty when the frame names no profile; such events still dispatch
    /// on `/gotapi/`.
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default)]
    pub service_id: Option<String>,
    /// The frame exactly as received.
    #[serde(skip)]
    pub raw: Value,
    /// Remaining profile-specific payload.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl DeviceEvent {
    /// Parse an event frame, keeping the original JSON in `raw`.
    pub fn from_frame(text: &str) -> Result<Self, serde_json::Error> {
        let raw: Value = serde_json::from_str(text)?;
        let mut event: Self = serde_json::from_value(raw.clone())?;
        event.raw = raw;
        Ok(event)
    }

    /// Lower-cased `/gotapi/{profile}[/{interface}][/{attribute}]`.
    pub fn channel_path(&self) -> String {
        let mut path = format!("/{}/{}", crate::uri::API_GOTAPI, self.profile);
        for segment in [&self.interface, &self.attribute].into_iter().flatten() {
            path.push('/');
            path.push_str(segment);
        }
        path.to_lowercase()
    }
}
