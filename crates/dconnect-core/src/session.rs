// ── Session ──
//
// Binds one manager host and its credentials to a single event WebSocket.
// Tracks the connection state, parks offers issued before the handshake
// completes and flushes them in FIFO order once it does. A background
// reader task delivers events to the dispatcher; an optional monitor task
// reopens the socket after an unexpected drop.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use dconnect_api::{
    EventChannel, HostConfig, Method, PLACEHOLDER_ACCESS_TOKEN, ProfileRequest, RestClient,
    ScopeSet, Service, ServiceInformation,
};
use futures_util::future::join_all;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::dispatcher::{EventDispatcher, EventSubscription};
use crate::error::{ConnectReason, CoreError};
use crate::offer::{OfferFuture, Operation, PendingOffer};
use crate::store::PersistedSession;

// ── SessionState ─────────────────────────────────────────────────────

/// Event channel state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// Socket open, waiting for the handshake ack.
    Connecting,
    Established,
}

// ── Internals ────────────────────────────────────────────────────────

struct Credentials {
    client_id: Option<String>,
    access_token: Option<SecretString>,
    scopes: ScopeSet,
}

struct ChannelHandle {
    generation: u64,
    cancel: CancellationToken,
}

/// Everything that must change together when the socket opens or closes.
struct Link {
    state: SessionState,
    channel: Option<ChannelHandle>,
    generation: u64,
    pending: VecDeque<PendingOffer>,
}

struct SessionInner {
    host: HostConfig,
    rest: RestClient,
    origin: String,
    handshake_timeout: Option<std::time::Duration>,
    monitor_interval: Option<std::time::Duration>,
    credentials: Mutex<Credentials>,
    link: Mutex<Link>,
    state_tx: watch::Sender<SessionState>,
    dispatcher: EventDispatcher,
    /// Serializes `connect()` so two callers never open two sockets.
    connect_lock: tokio::sync::Mutex<()>,
    monitor: Mutex<Option<CancellationToken>>,
}

// ── Session ──────────────────────────────────────────────────────────

/// Handle to a per-host session.
///
/// Cheaply cloneable via `Arc<SessionInner>`. The session exclusively owns
/// its WebSocket (through the reader task's cancellation token) and its
/// credentials.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.inner.host)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a disconnected, unauthorized session. Does NOT touch the
    /// network.
    pub fn new(host: HostConfig, scopes: ScopeSet, config: &ClientConfig) -> Result<Self, CoreError> {
        let rest = RestClient::new(host.clone(), &config.transport())?
            .with_hmac_key(config.hmac_key.clone());
        let (state_tx, _) = watch::channel(SessionState::Disconnected);

        Ok(Self {
            inner: Arc::new(SessionInner {
                host,
                rest,
                origin: config.origin.clone(),
                handshake_timeout: config.handshake_timeout,
                monitor_interval: config.monitor_interval,
                credentials: Mutex::new(Credentials {
                    client_id: None,
                    access_token: None,
                    scopes,
                }),
                link: Mutex::new(Link {
                    state: SessionState::Disconnected,
                    channel: None,
                    generation: 0,
                    pending: VecDeque::new(),
                }),
                state_tx,
                dispatcher: EventDispatcher::new(),
                connect_lock: tokio::sync::Mutex::new(()),
                monitor: Mutex::new(None),
            }),
        })
    }

    /// Rebuild a session from persisted credentials.
    pub fn restore(persisted: &PersistedSession, config: &ClientConfig) -> Result<Self, CoreError> {
        let session = Self::new(persisted.host_config(), persisted.scopes.clone(), config)?;
        if let Some(ref token) = persisted.access_token {
            session.set_access_token(token.clone());
        }
        Ok(session)
    }

    pub fn host(&self) -> &HostConfig {
        &self.inner.host
    }

    pub fn rest(&self) -> &RestClient {
        &self.inner.rest
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    // ── Credentials ──────────────────────────────────────────────────

    pub fn access_token(&self) -> Option<String> {
        self.inner
            .credentials
            .lock()
            .access_token
            .as_ref()
            .map(|t| t.expose_secret().to_owned())
    }

    pub fn set_access_token(&self, token: impl Into<String>) {
        self.inner.credentials.lock().access_token = Some(SecretString::from(token.into()));
    }

    /// Whether the current token is the stand-in used when the manager has
    /// local authorization disabled.
    pub fn has_placeholder_token(&self) -> bool {
        self.access_token().as_deref() == Some(PLACEHOLDER_ACCESS_TOKEN)
    }

    pub fn client_id(&self) -> Option<String> {
        self.inner.credentials.lock().client_id.clone()
    }

    pub fn set_client_id(&self, client_id: impl Into<String>) {
        self.inner.credentials.lock().client_id = Some(client_id.into());
    }

    pub fn scopes(&self) -> ScopeSet {
        self.inner.credentials.lock().scopes.clone()
    }

    pub fn set_scopes(&self, scopes: ScopeSet) {
        self.inner.credentials.lock().scopes = scopes;
    }

    /// Forget client id and token so the next authorize starts over.
    pub fn clear_credentials(&self) {
        let mut creds = self.inner.credentials.lock();
        creds.client_id = None;
        creds.access_token = None;
        debug!(host = %self.inner.host, "credentials cleared");
    }

    /// Snapshot for persistence.
    pub fn to_persisted(&self) -> PersistedSession {
        let creds = self.inner.credentials.lock();
        PersistedSession {
            host: self.inner.host.host.clone(),
            port: self.inner.host.port,
            ssl: self.inner.host.ssl,
            access_token: creds
                .access_token
                .as_ref()
                .map(|t| t.expose_secret().to_owned()),
            scopes: creds.scopes.clone(),
        }
    }

    // ── State ────────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.inner.link.lock().state
    }

    pub fn is_established(&self) -> bool {
        self.state() == SessionState::Established
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Offers parked until the next successful `connect()`.
    pub fn pending_offers(&self) -> usize {
        self.inner.link.lock().pending.len()
    }

    fn set_state(&self, link: &mut Link, state: SessionState) {
        link.state = state;
        self.inner.state_tx.send_replace(state);
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Open the event WebSocket and wait for the handshake ack.
    ///
    /// No-op if already established. On success, offers parked while
    /// disconnected are run in submission order on a background task.
    pub async fn connect(&self) -> Result<(), CoreError> {
        let _guard = self.inner.connect_lock.lock().await;

        if self.is_established() {
            return Ok(());
        }

        let Some(token) = self.access_token() else {
            return Err(CoreError::connect(
                ConnectReason::NotAuthorized,
                "session has no access token",
            ));
        };

        {
            let mut link = self.inner.link.lock();
            self.set_state(&mut link, SessionState::Connecting);
        }

        let url = self.inner.host.websocket_url();
        let channel = match EventChannel::open(
            &url,
            &token,
            Some(&self.inner.origin),
            self.inner.handshake_timeout,
        )
        .await
        {
            Ok(channel) => channel,
            Err(e) => {
                if e.is_transient() {
                    debug!(host = %self.inner.host, error = %e, "event channel unreachable");
                } else {
                    warn!(host = %self.inner.host, error = %e, "event channel open failed");
                }
                let mut link = self.inner.link.lock();
                self.set_state(&mut link, SessionState::Disconnected);
                return Err(e.into());
            }
        };

        // State flip and queue snapshot happen in one critical section, so
        // every offer lands either in the snapshot or on the direct path.
        let cancel = CancellationToken::new();
        let snapshot = {
            let mut link = self.inner.link.lock();
            // disconnect() or close() may have run while the ack was in flight
            if link.state == SessionState::Connecting {
                link.generation += 1;
                let generation = link.generation;
                link.channel = Some(ChannelHandle {
                    generation,
                    cancel: cancel.clone(),
                });
                self.set_state(&mut link, SessionState::Established);
                Some((generation, std::mem::take(&mut link.pending)))
            } else {
                None
            }
        };
        let Some((generation, flushed)) = snapshot else {
            debug!(host = %self.inner.host, "session disconnected during handshake");
            channel.close().await;
            return Err(CoreError::ConnectAborted {
                host: self.inner.host.to_string(),
            });
        };
        info!(host = %self.inner.host, generation, "session established");

        tokio::spawn(read_events(
            Arc::downgrade(&self.inner),
            generation,
            channel,
            self.inner.dispatcher.clone(),
            cancel,
        ));

        self.start_monitor();

        if !flushed.is_empty() {
            debug!(count = flushed.len(), "flushing pending offers");
            let session = self.clone();
            tokio::spawn(async move {
                for pending in flushed {
                    pending.settle(session.clone()).await;
                }
            });
        }

        Ok(())
    }

    /// Close the socket and stop monitoring. Keeps credentials and parked
    /// offers.
    pub fn disconnect(&self) {
        self.stop_monitor();
        let handle = {
            let mut link = self.inner.link.lock();
            self.set_state(&mut link, SessionState::Disconnected);
            link.channel.take()
        };
        if let Some(handle) = handle {
            debug!(host = %self.inner.host, generation = handle.generation, "closing event channel");
            handle.cancel.cancel();
        }
    }

    /// Tear everything down: socket, listeners, parked offers, credentials.
    /// Parked offers settle with [`CoreError::OfferCancelled`].
    pub fn close(&self) {
        self.disconnect();
        let dropped = std::mem::take(&mut self.inner.link.lock().pending);
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "cancelling pending offers");
        }
        drop(dropped);
        self.inner.dispatcher.clear();
        self.clear_credentials();
    }

    /// Reader task reports that channel `generation` is gone.
    fn on_channel_closed(&self, generation: u64) {
        let mut link = self.inner.link.lock();
        let current = link
            .channel
            .as_ref()
            .is_some_and(|h| h.generation == generation);
        if current {
            link.channel = None;
            self.set_state(&mut link, SessionState::Disconnected);
            warn!(host = %self.inner.host, generation, "event channel dropped");
        }
    }

    // ── Offers ───────────────────────────────────────────────────────

    /// Run `operation` now if established, otherwise park it until the
    /// next successful `connect()`.
    ///
    /// The decision and the enqueue happen in one critical section.
    pub fn offer(&self, operation: Operation) -> OfferFuture {
        let mut link = self.inner.link.lock();
        if link.state == SessionState::Established {
            drop(link);
            return operation.run(self.clone());
        }
        debug!(operation = operation.label(), "parking offer until established");
        let (pending, fut) = PendingOffer::park(operation);
        link.pending.push_back(pending);
        fut
    }

    // ── REST passthrough ─────────────────────────────────────────────

    /// Run a profile request with the current access token appended.
    pub async fn request(&self, request: &ProfileRequest) -> Result<Value, CoreError> {
        let mut request = request.clone();
        if let Some(token) = self.access_token() {
            request = request.param(dconnect_api::uri::PARAM_ACCESS_TOKEN, token);
        }
        Ok(self.inner.rest.send_request(&request).await?)
    }

    fn token_or_empty(&self) -> String {
        self.access_token().unwrap_or_default()
    }

    /// `GET /gotapi/serviceDiscovery`
    pub async fn discover_services(&self) -> Result<Vec<Service>, CoreError> {
        Ok(self.inner.rest.service_discovery(&self.token_or_empty()).await?)
    }

    /// `GET /gotapi/serviceInformation`
    pub async fn service_information(&self, service_id: &str) -> Result<ServiceInformation, CoreError> {
        Ok(self
            .inner
            .rest
            .service_information(service_id, &self.token_or_empty())
            .await?)
    }

    /// Discovered services whose `supports` list contains `profile`.
    ///
    /// Services whose information request fails are skipped.
    pub async fn services_supporting(&self, profile: &str) -> Result<Vec<Service>, CoreError> {
        let services = self.discover_services().await?;
        let infos = join_all(services.iter().map(|s| self.service_information(&s.id))).await;

        Ok(services
            .into_iter()
            .zip(infos)
            .filter_map(|(service, info)| match info {
                Ok(info) if info.supports(profile) => Some(service),
                Ok(_) => None,
                Err(e) => {
                    debug!(service = %service.id, error = %e, "serviceInformation failed");
                    None
                }
            })
            .collect())
    }

    /// `GET /gotapi/system`
    pub async fn system_info(&self) -> Result<Value, CoreError> {
        Ok(self.inner.rest.system_info(&self.token_or_empty()).await?)
    }

    // ── Events ───────────────────────────────────────────────────────

    /// Ask the manager to start sending events for `request` and register a
    /// listener for them.
    ///
    /// The request is sent as PUT whatever its method; the listener is
    /// registered only once the manager accepts it.
    pub async fn add_event_listener(
        &self,
        request: &ProfileRequest,
    ) -> Result<EventSubscription, CoreError> {
        let mut put = request.clone();
        put.method = Method::PUT;
        self.request(&put).await?;
        let subscription = self.inner.dispatcher.register(&request.path());
        info!(key = subscription.key(), "event listener registered");
        Ok(subscription)
    }

    /// Ask the manager to stop sending events for `request` and drop the
    /// listener.
    pub async fn remove_event_listener(&self, request: &ProfileRequest) -> Result<(), CoreError> {
        let mut delete = request.clone();
        delete.method = Method::DELETE;
        self.request(&delete).await?;
        self.inner.dispatcher.unregister(&request.path());
        Ok(())
    }

    // ── Monitor ──────────────────────────────────────────────────────

    fn start_monitor(&self) {
        let Some(period) = self.inner.monitor_interval else {
            return;
        };
        let mut monitor = self.inner.monitor.lock();
        if monitor.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        *monitor = Some(cancel.clone());
        tokio::spawn(monitor_task(Arc::downgrade(&self.inner), period, cancel));
    }

    fn stop_monitor(&self) {
        if let Some(cancel) = self.inner.monitor.lock().take() {
            cancel.cancel();
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(cancel) = self.monitor.get_mut().take() {
            cancel.cancel();
        }
        if let Some(handle) = self.link.get_mut().channel.take() {
            debug!(host = %self.host, generation = handle.generation, "session dropped, closing event channel");
            handle.cancel.cancel();
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────────

async fn read_events(
    session: Weak<SessionInner>,
    generation: u64,
    channel: EventChannel,
    dispatcher: EventDispatcher,
    cancel: CancellationToken,
) {
    let result = channel
        .run(
            |event| {
                dispatcher.dispatch(event);
            },
            cancel,
        )
        .await;

    if let Err(e) = result {
        warn!(error = %e, generation, "event channel error");
    }

    if let Some(inner) = session.upgrade() {
        Session { inner }.on_channel_closed(generation);
    }
}

/// Periodically reopen a dropped socket with the last-known token.
async fn monitor_task(
    session: Weak<SessionInner>,
    period: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = session.upgrade() else { break };
                let session = Session { inner };
                if session.state() != SessionState::Disconnected || session.access_token().is_none() {
                    continue;
                }
                info!(host = %session.host(), "event channel down, reconnecting");
                if let Err(e) = session.connect().await {
                    warn!(host = %session.host(), error = %e, "reconnect attempt failed");
                }
            }
        }
    }

    debug!("session monitor exiting");
}
