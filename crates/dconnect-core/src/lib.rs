// dconnect-core: sessions, authorization and event dispatch for Device Connect

pub mod authorize;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod offer;
pub mod session;
pub mod store;

pub use authorize::AuthorizationManager;
pub use client::{ConnectOptions, Connection, DeviceConnectClient};
pub use config::{ClientConfig, TlsVerification};
pub use dispatcher::{EventDispatcher, EventSubscription};
pub use error::{ConnectReason, CoreError};
pub use offer::{OfferFuture, Operation};
pub use session::{Session, SessionState};
pub use store::{JsonFileStore, MemoryStore, PersistedSession, SessionStore};

pub use dconnect_api::{
    DeviceEvent, HmacKey, HostConfig, Method, PLACEHOLDER_ACCESS_TOKEN, ProfileRequest, ScopeSet,
    Service,
};
