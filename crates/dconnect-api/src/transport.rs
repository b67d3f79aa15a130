// Shared transport configuration for building reqwest::Client instances.
//
// The REST client and the authorization endpoints share TLS, timeout and
// origin settings through this module.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ORIGIN};

use crate::error::Error;

/// Header carrying the extended origin of hybrid (embedded web view) apps.
pub const EXTENDED_ORIGIN_HEADER: &str = "X-GotAPI-Origin";

/// Origin sent when the caller does not configure one.
pub const DEFAULT_ORIGIN: &str = "http://localhost";

/// Request timeout applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// TLS verification mode for `https` managers.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the bundled root certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (managers on phones ship self-signed certs).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
    /// Value of the `Origin` header sent with every request.
    pub origin: String,
    /// Value of `X-GotAPI-Origin`, sent only when set.
    pub extended_origin: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::default(),
            timeout: DEFAULT_TIMEOUT,
            origin: DEFAULT_ORIGIN.to_owned(),
            extended_origin: None,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    ///
    /// The origin headers are installed as default headers so every request
    /// made through the client carries them.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("dconnect/", env!("CARGO_PKG_VERSION")))
            .default_headers(self.origin_headers()?);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    /// The `Origin` / `X-GotAPI-Origin` header pair for this config.
    pub fn origin_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, header_value(&self.origin)?);
        if let Some(ref extended) = self.extended_origin {
            headers.insert(
                HeaderName::from_static("x-gotapi-origin"),
                header_value(extended)?,
            );
        }
        Ok(headers)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value).map_err(|e| Error::Config(format!("invalid origin {value:?}: {e}")))
}
