// ── DeviceConnectClient ──
//
// Top-level facade. Owns one Session per host, runs the connect sequence
// (availability -> authorize -> WebSocket handshake -> discovery), turns
// every failure into a `ConnectReason`, and re-authorizes a bounded number
// of times when the manager rejects the credentials.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use dconnect_api::{HostConfig, ScopeSet, Service};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::authorize::AuthorizationManager;
use crate::config::ClientConfig;
use crate::error::{ConnectReason, CoreError};
use crate::offer::{OfferFuture, Operation, PendingOffer};
use crate::session::Session;
use crate::store::{self, PersistedSession, SessionStore};

// ── ConnectOptions / Connection ──────────────────────────────────────

/// Which manager to connect to and what to ask access for.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub scopes: ScopeSet,
    /// Overrides `ClientConfig::default_ssl`.
    pub ssl: Option<bool>,
    /// Overrides `ClientConfig::default_port`.
    pub port: Option<u16>,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, scopes: ScopeSet) -> Self {
        Self {
            host: host.into(),
            scopes,
            ssl: None,
            port: None,
        }
    }

    #[must_use]
    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = Some(ssl);
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// Result of a successful `connect()`.
#[derive(Debug, Clone)]
pub struct Connection {
    pub session: Session,
    /// Discovered services, in the order the manager listed them.
    pub services: Vec<Service>,
}

// ── Client ───────────────────────────────────────────────────────────

/// Entry point for applications.
///
/// Cheaply cloneable via `Arc<ClientInner>`.
#[derive(Clone)]
pub struct DeviceConnectClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    authorizer: AuthorizationManager,
    state: Mutex<ClientState>,
}

#[derive(Default)]
struct ClientState {
    sessions: HashMap<String, Session>,
    /// Offers for hosts that have no session yet.
    pending: HashMap<String, VecDeque<PendingOffer>>,
}

impl std::fmt::Debug for DeviceConnectClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConnectClient")
            .field("application_name", &self.inner.config.application_name)
            .field("hosts", &self.hosts())
            .finish_non_exhaustive()
    }
}

impl DeviceConnectClient {
    pub fn new(config: ClientConfig) -> Self {
        let authorizer = AuthorizationManager::new(config.application_name.clone());
        Self {
            inner: Arc::new(ClientInner {
                config,
                authorizer,
                state: Mutex::new(ClientState::default()),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn authorizer(&self) -> &AuthorizationManager {
        &self.inner.authorizer
    }

    // ── Session registry ─────────────────────────────────────────────

    pub fn session(&self, host: &str) -> Option<Session> {
        self.inner.state.lock().sessions.get(host).cloned()
    }

    /// Hosts with a session, sorted.
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.inner.state.lock().sessions.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    /// Offers waiting for a session to be created for `host`.
    pub fn pending_offers(&self, host: &str) -> usize {
        self.inner
            .state
            .lock()
            .pending
            .get(host)
            .map_or(0, VecDeque::len)
    }

    /// Register a session restored from storage without any network call.
    ///
    /// Replaces (and closes) an existing session for the same host.
    pub fn add_session(&self, persisted: &PersistedSession) -> Result<Session, CoreError> {
        let session = Session::restore(persisted, &self.inner.config)?;
        let previous = self.install(&persisted.host, session.clone());
        if let Some(previous) = previous {
            previous.close();
        }
        info!(host = %persisted.host, "session added");
        Ok(session)
    }

    /// Remove and tear down the session for `host`.
    pub fn delete_session(&self, host: &str) -> bool {
        let removed = self.inner.state.lock().sessions.remove(host);
        match removed {
            Some(session) => {
                session.close();
                info!(host, "session deleted");
                true
            }
            None => false,
        }
    }

    /// Sessions that hold a token, for persistence.
    pub fn persisted_sessions(&self) -> Vec<PersistedSession> {
        let mut sessions: Vec<PersistedSession> = self
            .inner
            .state
            .lock()
            .sessions
            .values()
            .map(Session::to_persisted)
            .filter(|p| p.access_token.is_some())
            .collect();
        sessions.sort_by(|a, b| a.host.cmp(&b.host));
        sessions
    }

    pub fn save_sessions(&self, store: &dyn SessionStore) -> Result<(), CoreError> {
        store::save_sessions(store, &self.persisted_sessions())
    }

    /// Re-add every saved session. Returns how many were restored.
    pub fn restore_sessions(&self, store: &dyn SessionStore) -> Result<usize, CoreError> {
        let saved = store::load_sessions(store)?;
        for persisted in &saved {
            self.add_session(persisted)?;
        }
        Ok(saved.len())
    }

    fn install(&self, host: &str, session: Session) -> Option<Session> {
        install_locked(&mut self.inner.state.lock(), host, session)
    }

    /// The session for `options.host`, created if needed.
    fn session_for(&self, options: &ConnectOptions) -> Result<Session, CoreError> {
        if let Some(session) = self.session(&options.host) {
            if !options.scopes.is_empty() && session.scopes() != options.scopes {
                session.set_scopes(options.scopes.clone());
            }
            return Ok(session);
        }

        let host = HostConfig::new(options.host.clone())
            .with_port(options.port.unwrap_or(self.inner.config.default_port))
            .with_ssl(options.ssl.unwrap_or(self.inner.config.default_ssl));
        let session = Session::new(host, options.scopes.clone(), &self.inner.config)?;

        // Another connect may have raced us here; keep whichever won.
        let mut state = self.inner.state.lock();
        if let Some(existing) = state.sessions.get(&options.host) {
            return Ok(existing.clone());
        }
        install_locked(&mut state, &options.host, session.clone());
        Ok(session)
    }

    // ── Connect ──────────────────────────────────────────────────────

    /// Run the full connect sequence for `options.host`.
    ///
    /// Authorization-class failures discard the session's credentials and
    /// replay the sequence, at most `max_reauthorizations` times.
    pub async fn connect(&self, options: ConnectOptions) -> Result<Connection, CoreError> {
        let max = self.inner.config.max_reauthorizations;
        let mut attempt = 0;

        loop {
            let session = self.session_for(&options)?;
            match self.connect_once(&session).await {
                Err(e) if e.requires_reauthorization() => {
                    if attempt >= max {
                        warn!(host = %options.host, error = %e, "authorization still rejected, giving up");
                        return Err(match e {
                            CoreError::Connect { .. } => e,
                            other => CoreError::connect(ConnectReason::NotAuthorized, other.to_string()),
                        });
                    }
                    attempt += 1;
                    info!(host = %options.host, attempt, error = %e, "re-authorizing");
                    session.clear_credentials();
                    session.disconnect();
                }
                other => return other,
            }
        }
    }

    async fn connect_once(&self, session: &Session) -> Result<Connection, CoreError> {
        let host = session.host().clone();

        // 1. Is the manager there at all?
        if let Err(e) = session.rest().availability().await {
            let reason = if matches!(e, dconnect_api::Error::InvalidServer) {
                ConnectReason::InvalidServer
            } else {
                ConnectReason::NotRunning
            };
            warn!(%host, error = %e, "availability check failed");
            return Err(CoreError::connect(
                reason,
                format!("Device Connect Manager is not running at {host}: {e}"),
            ));
        }

        // 2. Token
        self.inner.authorizer.authorize(session).await?;

        // 3. Event channel; parked offers flush once established.
        if let Err(e) = session.connect().await {
            return Err(match e {
                CoreError::WebSocket { code, message } => {
                    let failure = dconnect_api::HandshakeFailure::from_code(code);
                    let reason = ConnectReason::from_handshake(failure);
                    warn!(%host, code, %reason, "event channel refused");
                    CoreError::connect(reason, message)
                }
                other => other,
            });
        }

        // 4. Discovery
        match session.discover_services().await {
            Ok(services) => {
                info!(%host, count = services.len(), "connected");
                Ok(Connection {
                    session: session.clone(),
                    services,
                })
            }
            Err(e) if e.requires_reauthorization() => Err(e),
            Err(e) => Err(CoreError::connect(
                ConnectReason::NoService,
                format!("Service discovery failed: {e}"),
            )),
        }
    }

    /// Discard credentials for `host` and connect again with its scopes.
    pub async fn reauthorize(&self, host: &str) -> Result<Connection, CoreError> {
        let session = self.session(host).ok_or_else(|| CoreError::SessionNotFound {
            host: host.to_owned(),
        })?;
        session.clear_credentials();
        session.disconnect();
        let h = session.host();
        let options = ConnectOptions::new(host, session.scopes())
            .with_port(h.port)
            .with_ssl(h.ssl);
        self.connect(options).await
    }

    // ── Offers ───────────────────────────────────────────────────────

    /// Run `operation` against `host`'s session, or park it until the host
    /// has one.
    ///
    /// An authorization-class failure triggers one re-authorization (if
    /// allowed) and a single retry.
    pub fn offer(&self, host: &str, operation: Operation) -> OfferFuture {
        let first = {
            let mut state = self.inner.state.lock();
            if let Some(session) = state.sessions.get(host) {
                session.offer(operation.clone())
            } else {
                debug!(host, operation = operation.label(), "no session yet, parking offer");
                let (pending, fut) = PendingOffer::park(operation.clone());
                state.pending.entry(host.to_owned()).or_default().push_back(pending);
                fut
            }
        };

        let client = self.clone();
        let host = host.to_owned();
        Box::pin(async move {
            match first.await {
                Err(e) if e.requires_reauthorization() && client.inner.config.max_reauthorizations > 0 => {
                    info!(%host, operation = operation.label(), error = %e, "offer rejected, re-authorizing");
                    let connection = client.reauthorize(&host).await?;
                    connection.session.offer(operation).await
                }
                other => other,
            }
        })
    }
}

/// Insert `session` for `host` and move the host's client-level offers into
/// its queue. Callers hold the state lock, so the two steps are atomic.
fn install_locked(state: &mut ClientState, host: &str, session: Session) -> Option<Session> {
    let previous = state.sessions.insert(host.to_owned(), session.clone());
    if let Some(parked) = state.pending.remove(host) {
        debug!(host, count = parked.len(), "handing parked offers to session");
        for pending in parked {
            let fut = session.offer(pending.operation);
            let reply = pending.reply;
            let host = host.to_owned();
            tokio::spawn(async move {
                if reply.send(fut.await).is_err() {
                    debug!(%host, "offer caller went away before the reply");
                }
            });
        }
    }
    previous
}
