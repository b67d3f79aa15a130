// Authorization endpoints and scope handling.
//
// Obtaining an access token is a two-step exchange: `grant` yields a
// client id, then `accessToken` trades client id + scopes + application
// name for a token. Caching and re-authorization policy live in
// dconnect-core; this module only speaks the wire protocol.

use std::fmt;

use indexmap::IndexSet;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::models::{AccessTokenResponse, GrantResponse};
use crate::rest::RestClient;

/// Token used when the manager runs with local authorization disabled.
///
/// The manager accepts this literal in the WebSocket handshake and ignores
/// it on REST calls.
pub const PLACEHOLDER_ACCESS_TOKEN: &str = "test-session-key";

const PROFILE_AUTHORIZATION: &str = "authorization";
const ATTR_GRANT: &str = "grant";
const ATTR_ACCESS_TOKEN: &str = "accessToken";
const PARAM_CLIENT_ID: &str = "clientId";
const PARAM_SCOPE: &str = "scope";
const PARAM_APPLICATION_NAME: &str = "applicationName";

/// Profiles most applications ask for.
const DEFAULT_PROFILES: &[&str] = &[
    "serviceDiscovery",
    "serviceInformation",
    "system",
    "battery",
    "connection",
    "deviceOrientation",
    "file",
    "mediaPlayer",
    "mediaStreamRecording",
    "notification",
    "phone",
    "proximity",
    "setting",
    "vibration",
    "light",
    "remoteController",
    "driveController",
    "mhealth",
    "sphero",
    "dice",
    "temperature",
    "camera",
    "canvas",
    "health",
    "touch",
    "humanDetection",
    "keyEvent",
    "omnidirectionalImage",
    "tv",
    "powerMeter",
    "humidity",
    "illuminance",
    "videoChat",
    "airConditioner",
    "atmosphericPressure",
    "ecg",
    "poseEstimation",
    "stressEstimation",
    "walkState",
    "gpio",
    "geolocation",
    "echonetLite",
];

// ── ScopeSet ─────────────────────────────────────────────────────────

/// Ordered, de-duplicated set of profile names to request access to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(IndexSet<String>);

impl ScopeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard profile list.
    pub fn default_profiles() -> Self {
        DEFAULT_PROFILES.iter().copied().collect()
    }

    /// Adds a scope; returns `false` if it was already present.
    pub fn insert(&mut self, scope: impl Into<String>) -> bool {
        self.0.insert(scope.into())
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Comma-joined form sent as the `scope` parameter.
    pub fn combined(&self) -> String {
        self.iter().collect::<Vec<_>>().join(",")
    }

    /// Parse a comma-separated list, ignoring blanks.
    pub fn parse(combined: &str) -> Self {
        combined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.combined())
    }
}

// ── Endpoints ────────────────────────────────────────────────────────

impl RestClient {
    /// Register this application with the manager.
    ///
    /// `GET /gotapi/authorization/grant`
    ///
    /// errorCode 2 means local authorization is disabled; see
    /// [`Error::is_local_oauth_disabled`].
    pub async fn create_client(&self) -> Result<String, Error> {
        let uri = self
            .uri_builder()
            .profile(PROFILE_AUTHORIZATION)
            .attribute(ATTR_GRANT);
        let grant: GrantResponse = self.send_as(Method::GET, uri).await?;
        debug!(client_id = %grant.client_id, "client registered");
        Ok(grant.client_id)
    }

    /// Exchange a client id for an access token.
    ///
    /// `GET /gotapi/authorization/accessToken?clientId=&scope=&applicationName=`
    pub async fn request_access_token(
        &self,
        client_id: &str,
        scopes: &ScopeSet,
        application_name: &str,
    ) -> Result<String, Error> {
        let uri = self
            .uri_builder()
            .profile(PROFILE_AUTHORIZATION)
            .attribute(ATTR_ACCESS_TOKEN)
            .add_parameter(PARAM_CLIENT_ID, client_id)
            .add_parameter(PARAM_SCOPE, scopes.combined())
            .add_parameter(PARAM_APPLICATION_NAME, application_name);
        let token: AccessTokenResponse = self.send_as(Method::GET, uri).await?;
        debug!(scopes = scopes.len(), expire = ?token.expire, "access token granted");
        Ok(token.access_token)
    }
}
