//! Profile-scoped URI construction.
//!
//! Every Device Connect endpoint lives under
//! `scheme://host:port/gotapi/{profile}[/{interface}][/{attribute}]`.
//! [`UriBuilder`] assembles those URIs with an insertion-ordered parameter
//! map; [`ProfileRequest`] is the typed description of a single call that
//! higher layers pass around and replay.

use std::fmt;

use indexmap::IndexMap;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

/// Port the Device Connect Manager listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 4035;

/// Fixed API segment of every endpoint.
pub const API_GOTAPI: &str = "gotapi";

// ── Well-known parameter names ───────────────────────────────────────

pub const PARAM_SERVICE_ID: &str = "serviceId";
pub const PARAM_ACCESS_TOKEN: &str = "accessToken";
pub const PARAM_SESSION_KEY: &str = "sessionKey";
pub const PARAM_NONCE: &str = "nonce";

// ── HostConfig ───────────────────────────────────────────────────────

/// Where a Device Connect Manager can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl HostConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            ssl: false,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    /// `http` or `https`.
    pub fn scheme(&self) -> &'static str {
        if self.ssl { "https" } else { "http" }
    }

    /// `http(s)://host:port`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme(), self.host, self.port)
    }

    /// `ws(s)://host:port/gotapi/websocket`
    pub fn websocket_url(&self) -> String {
        let scheme = if self.ssl { "wss" } else { "ws" };
        format!(
            "{scheme}://{}:{}/{API_GOTAPI}/websocket",
            self.host, self.port
        )
    }

    /// A fresh builder rooted at this host.
    pub fn uri_builder(&self) -> UriBuilder {
        UriBuilder::new(self)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::new("localhost")
    }
}

impl fmt::Display for HostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ── UriBuilder ───────────────────────────────────────────────────────

/// Builder for `scheme://host:port/gotapi/profile/interface/attribute?k=v`.
///
/// Parameters keep insertion order; setting an existing key replaces its
/// value in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriBuilder {
    ssl: bool,
    host: String,
    port: u16,
    api: String,
    profile: Option<String>,
    interface: Option<String>,
    attribute: Option<String>,
    params: IndexMap<String, String>,
}

impl UriBuilder {
    pub fn new(host: &HostConfig) -> Self {
        Self {
            ssl: host.ssl,
            host: host.host.clone(),
            port: host.port,
            api: API_GOTAPI.to_owned(),
            profile: None,
            interface: None,
            attribute: None,
            params: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    #[must_use]
    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    #[must_use]
    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    #[must_use]
    pub fn service_id(self, service_id: impl Into<String>) -> Self {
        self.add_parameter(PARAM_SERVICE_ID, service_id)
    }

    #[must_use]
    pub fn access_token(self, token: impl Into<String>) -> Self {
        self.add_parameter(PARAM_ACCESS_TOKEN, token)
    }

    /// Legacy event-registration key used by older manager builds.
    #[must_use]
    pub fn session_key(self, key: impl Into<String>) -> Self {
        self.add_parameter(PARAM_SESSION_KEY, key)
    }

    #[must_use]
    pub fn add_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_parameter(key, value);
        self
    }

    /// In-place variant of [`add_parameter`](Self::add_parameter).
    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &IndexMap<String, String> {
        &self.params
    }

    /// `/gotapi/{profile}[/{interface}][/{attribute}]`, percent-encoded.
    pub fn path(&self) -> String {
        let mut path = format!("/{}", urlencoding::encode(&self.api));
        for segment in [&self.profile, &self.interface, &self.attribute]
            .into_iter()
            .flatten()
        {
            path.push('/');
            path.push_str(&urlencoding::encode(segment));
        }
        path
    }

    /// The URI without its query string.
    pub fn build_base(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}{}", self.host, self.port, self.path())
    }

    /// `key=value&...` with every key and value percent-encoded.
    pub fn query_string(&self) -> String {
        self.params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// The full URI, query string included.
    pub fn build(&self) -> String {
        let base = self.build_base();
        if self.params.is_empty() {
            base
        } else {
            format!("{base}?{}", self.query_string())
        }
    }

    pub fn to_url(&self) -> Result<Url, Error> {
        Ok(Url::parse(&self.build())?)
    }
}

impl fmt::Display for UriBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build())
    }
}

// ── ProfileRequest ───────────────────────────────────────────────────

/// A single profile call: method, path segments and parameters.
///
/// Cheap to clone so queued offers can be replayed after re-authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRequest {
    pub method: Method,
    pub profile: String,
    pub interface: Option<String>,
    pub attribute: Option<String>,
    pub params: IndexMap<String, String>,
}

impl ProfileRequest {
    pub fn new(method: Method, profile: impl Into<String>) -> Self {
        Self {
            method,
            profile: profile.into(),
            interface: None,
            attribute: None,
            params: IndexMap::new(),
        }
    }

    pub fn get(profile: impl Into<String>) -> Self {
        Self::new(Method::GET, profile)
    }

    pub fn post(profile: impl Into<String>) -> Self {
        Self::new(Method::POST, profile)
    }

    pub fn put(profile: impl Into<String>) -> Self {
        Self::new(Method::PUT, profile)
    }

    pub fn delete(profile: impl Into<String>) -> Self {
        Self::new(Method::DELETE, profile)
    }

    /// Parse `profile[/interface]/attribute`, with or without a leading
    /// `/gotapi/`.
    ///
    /// Two segments are read as profile + attribute, three as
    /// profile + interface + attribute.
    pub fn from_path(method: Method, path: &str) -> Option<Self> {
        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.first() == Some(&API_GOTAPI) {
            segments.remove(0);
        }

        let request = match segments.as_slice() {
            [profile] => Self::new(method, *profile),
            [profile, attribute] => Self::new(method, *profile).attribute(*attribute),
            [profile, interface, attribute] => Self::new(method, *profile)
                .interface(*interface)
                .attribute(*attribute),
            _ => return None,
        };
        Some(request)
    }

    #[must_use]
    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    #[must_use]
    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    #[must_use]
    pub fn service_id(self, service_id: impl Into<String>) -> Self {
        self.param(PARAM_SERVICE_ID, service_id)
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// `/gotapi/{profile}[/{interface}][/{attribute}]`, not encoded.
    pub fn path(&self) -> String {
        let mut path = format!("/{API_GOTAPI}/{}", self.profile);
        for segment in [&self.interface, &self.attribute].into_iter().flatten() {
            path.push('/');
            path.push_str(segment);
        }
        path
    }

    /// Materialize against a host. Parameters keep their order.
    pub fn to_builder(&self, host: &HostConfig) -> UriBuilder {
        let mut builder = host.uri_builder().profile(&self.profile);
        if let Some(ref interface) = self.interface {
            builder = builder.interface(interface);
        }
        if let Some(ref attribute) = self.attribute {
            builder = builder.attribute(attribute);
        }
        for (k, v) in &self.params {
            builder.set_parameter(k, v);
        }
        builder
    }
}

impl fmt::Display for ProfileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path())
    }
}
