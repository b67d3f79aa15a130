// dconnect-api: Async Rust client for the Device Connect (GotAPI) protocol

pub mod antispoofing;
pub mod auth;
pub mod error;
pub mod models;
pub mod rest;
pub mod transport;
pub mod uri;
pub mod websocket;

pub use antispoofing::HmacKey;
pub use auth::{PLACEHOLDER_ACCESS_TOKEN, ScopeSet};
pub use error::Error;
pub use models::{DeviceEvent, ErrorCode, Service, ServiceInformation};
pub use rest::RestClient;
pub use transport::{TlsMode, TransportConfig};
pub use uri::{DEFAULT_PORT, HostConfig, ProfileRequest, UriBuilder};
pub use websocket::{EventChannel, HandshakeFailure};

pub use reqwest::Method;
