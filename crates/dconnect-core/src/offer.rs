// Deferred profile operations.
//
// An `Operation` is a replayable unit of work against a `Session`. Offers
// that arrive before the session is established are parked as
// `PendingOffer`s together with the channel that settles the caller's
// future.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use dconnect_api::ProfileRequest;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::CoreError;
use crate::session::Session;

/// Future returned by every `offer()`. Settles exactly once.
pub type OfferFuture = BoxFuture<'static, Result<Value, CoreError>>;

type RunFn = dyn Fn(Session) -> OfferFuture + Send + Sync;

/// A profile call that can be run, and run again, against a session.
#[derive(Clone)]
pub struct Operation {
    label: Arc<str>,
    run: Arc<RunFn>,
}

impl Operation {
    /// Wrap an arbitrary async closure.
    pub fn new<F, Fut>(label: impl Into<String>, f: F) -> Self
    where
        F: Fn(Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CoreError>> + Send + 'static,
    {
        Self {
            label: Arc::from(label.into()),
            run: Arc::new(move |session| Box::pin(f(session))),
        }
    }

    /// A single REST call; the session adds its access token.
    pub fn request(request: ProfileRequest) -> Self {
        let label = request.to_string();
        Self::new(label, move |session: Session| {
            let request = request.clone();
            async move { session.request(&request).await }
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn run(&self, session: Session) -> OfferFuture {
        (self.run)(session)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl From<ProfileRequest> for Operation {
    fn from(request: ProfileRequest) -> Self {
        Self::request(request)
    }
}

/// An operation waiting for its session to become established.
pub(crate) struct PendingOffer {
    pub(crate) operation: Operation,
    pub(crate) reply: oneshot::Sender<Result<Value, CoreError>>,
}

impl PendingOffer {
    /// Park `operation`; the returned future settles when `reply` is used,
    /// or with `OfferCancelled` if the entry is dropped unused.
    pub(crate) fn park(operation: Operation) -> (Self, OfferFuture) {
        let (reply, rx) = oneshot::channel();
        let fut: OfferFuture =
            Box::pin(async move { rx.await.unwrap_or(Err(CoreError::OfferCancelled)) });
        (Self { operation, reply }, fut)
    }

    /// Run against `session` and settle the parked future.
    pub(crate) async fn settle(self, session: Session) {
        let result = self.operation.run(session).await;
        if self.reply.send(result).is_err() {
            tracing::debug!(operation = self.operation.label(), "offer caller went away");
        }
    }
}
