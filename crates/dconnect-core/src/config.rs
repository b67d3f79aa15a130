// ── Runtime client configuration ──
//
// These types describe *how* to talk to a Device Connect Manager. They
// carry connection tuning and the anti-spoofing key, but never touch disk.
// The CLI constructs a `ClientConfig` and hands it in.

use std::time::Duration;

use dconnect_api::transport::{DEFAULT_ORIGIN, DEFAULT_TIMEOUT};
use dconnect_api::{DEFAULT_PORT, HmacKey, TlsMode, TransportConfig};

/// TLS verification strategy for `https` managers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// Bundled root store (strict). Default.
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (self-signed managers).
    DangerAcceptInvalid,
}

/// Configuration shared by every session a client creates.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Sent as `applicationName` when requesting an access token.
    pub application_name: String,
    /// Port used when `ConnectOptions` does not name one.
    pub default_port: u16,
    /// Scheme used when `ConnectOptions` does not name one.
    pub default_ssl: bool,
    /// `Origin` header for REST calls and the WebSocket upgrade.
    pub origin: String,
    /// `X-GotAPI-Origin` header, for hybrid apps.
    pub extended_origin: Option<String>,
    pub tls: TlsVerification,
    /// REST request timeout.
    pub timeout: Duration,
    /// Upper bound on the wait for the WebSocket handshake ack.
    /// `None` waits as long as the socket stays open.
    pub handshake_timeout: Option<Duration>,
    /// How often an established session checks its socket and reopens it
    /// after an unexpected drop. `None` disables monitoring.
    pub monitor_interval: Option<Duration>,
    /// How many times one `connect()` or `offer()` may discard its
    /// credentials and authorize again.
    pub max_reauthorizations: u32,
    /// Authenticate manager responses with this key.
    pub hmac_key: Option<HmacKey>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            application_name: "dconnect".into(),
            default_port: DEFAULT_PORT,
            default_ssl: false,
            origin: DEFAULT_ORIGIN.into(),
            extended_origin: None,
            tls: TlsVerification::default(),
            timeout: DEFAULT_TIMEOUT,
            handshake_timeout: None,
            monitor_interval: Some(Duration::from_secs(1)),
            max_reauthorizations: 1,
            hmac_key: None,
        }
    }
}

impl ClientConfig {
    pub(crate) fn transport(&self) -> TransportConfig {
        let tls = match &self.tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        };
        TransportConfig {
            tls,
            timeout: self.timeout,
            origin: self.origin.clone(),
            extended_origin: self.extended_origin.clone(),
        }
    }
}
