// ── Authorization manager ──
//
// Makes sure a session holds a usable access token before any profile call.
// A token already present on the session is trusted for the lifetime of the
// process; discarding it is the caller's job when the manager later rejects
// it.

use dconnect_api::PLACEHOLDER_ACCESS_TOKEN;
use tracing::{debug, info, warn};

use crate::error::{ConnectReason, CoreError};
use crate::session::Session;

/// Obtains client ids and access tokens on behalf of sessions.
#[derive(Debug, Clone)]
pub struct AuthorizationManager {
    application_name: String,
}

impl AuthorizationManager {
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
        }
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// Return the session's token, acquiring one first if it has none.
    ///
    /// `grant` failing with errorCode 2 means the manager has local
    /// authorization turned off; the session then gets the placeholder
    /// token and the access-token endpoint is never called.
    pub async fn authorize(&self, session: &Session) -> Result<String, CoreError> {
        if let Some(token) = session.access_token() {
            debug!(host = %session.host(), "reusing cached access token");
            return Ok(token);
        }

        let rest = session.rest();
        let client_id = match rest.create_client().await {
            Ok(client_id) => client_id,
            Err(e) if e.is_local_oauth_disabled() => {
                info!(host = %session.host(), "local authorization disabled, using placeholder token");
                session.set_access_token(PLACEHOLDER_ACCESS_TOKEN);
                return Ok(PLACEHOLDER_ACCESS_TOKEN.to_owned());
            }
            Err(dconnect_api::Error::InvalidServer) => {
                return Err(CoreError::connect(
                    ConnectReason::InvalidServer,
                    "grant response failed verification",
                ));
            }
            Err(e) => {
                warn!(host = %session.host(), error = %e, "client registration failed");
                return Err(CoreError::connect(
                    ConnectReason::NoClient,
                    format!("Failed to create a client: {e}"),
                ));
            }
        };
        session.set_client_id(client_id.clone());

        let scopes = session.scopes();
        match rest
            .request_access_token(&client_id, &scopes, &self.application_name)
            .await
        {
            Ok(token) => {
                info!(host = %session.host(), scopes = scopes.len(), "access token acquired");
                session.set_access_token(token.clone());
                Ok(token)
            }
            Err(dconnect_api::Error::InvalidServer) => Err(CoreError::connect(
                ConnectReason::InvalidServer,
                "access token response failed verification",
            )),
            Err(e) => {
                warn!(host = %session.host(), error = %e, "access token request failed");
                Err(CoreError::connect(
                    ConnectReason::NoAccessToken,
                    format!("Failed to get access token: {e}"),
                ))
            }
        }
    }
}
