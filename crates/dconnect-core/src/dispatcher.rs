// ── Event dispatch ──
//
// Routes device events from the WebSocket to listeners registered by
// request path. Keys are normalized to the lower-cased
// `/gotapi/{profile}[/{interface}][/{attribute}]` form, so the query string
// of the registering request never matters.

use std::collections::HashMap;
use std::sync::Arc;

use dconnect_api::DeviceEvent;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Listener registry shared between a session and its reader task.
#[derive(Debug, Clone, Default)]
pub struct EventDispatcher {
    listeners: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Arc<DeviceEvent>>>>>,
}

/// Receiving end of one registration.
#[derive(Debug)]
pub struct EventSubscription {
    key: String,
    rx: mpsc::UnboundedReceiver<Arc<DeviceEvent>>,
}

impl EventSubscription {
    /// Normalized path this subscription listens on.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Next event, or `None` once the listener is removed.
    pub async fn recv(&mut self) -> Option<Arc<DeviceEvent>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<DeviceEvent>> {
        self.rx.try_recv().ok()
    }
}

/// Reduce a URI or path to its listener key.
///
/// Scheme, authority and query are stripped; the rest is lower-cased and
/// starts at `/gotapi/`.
pub fn normalize_key(uri: &str) -> String {
    let without_query = uri.split(['?', '#']).next().unwrap_or_default();
    let lower = without_query.to_lowercase();
    let path = match lower.find("/gotapi/") {
        Some(idx) => &lower[idx..],
        None => lower.as_str(),
    };
    path.trim_end_matches('/').to_owned()
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, replacing any previous one for the same key.
    pub fn register(&self, uri: &str) -> EventSubscription {
        let key = normalize_key(uri);
        let (tx, rx) = mpsc::unbounded_channel();
        if self.listeners.lock().insert(key.clone(), tx).is_some() {
            tracing::debug!(%key, "replaced existing event listener");
        }
        EventSubscription { key, rx }
    }

    /// Drop the listener for `uri`. Returns whether one existed.
    pub fn unregister(&self, uri: &str) -> bool {
        self.listeners.lock().remove(&normalize_key(uri)).is_some()
    }

    pub fn is_registered(&self, uri: &str) -> bool {
        self.listeners.lock().contains_key(&normalize_key(uri))
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    /// Deliver `event` to every listener whose key ends with the event's
    /// channel path. Returns the number of deliveries.
    pub fn dispatch(&self, event: DeviceEvent) -> usize {
        let path = event.channel_path();
        let event = Arc::new(event);
        let mut delivered = 0;

        self.listeners.lock().retain(|key, tx| {
            if !key.ends_with(&path) {
                return true;
            }
            if tx.send(Arc::clone(&event)).is_ok() {
                delivered += 1;
                true
            } else {
                tracing::debug!(%key, "pruning closed event listener");
                false
            }
        });

        if delivered == 0 {
            tracing::trace!(%path, "event had no listener");
        }
        delivered
    }
}
