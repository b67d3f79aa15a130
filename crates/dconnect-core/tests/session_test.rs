#![allow(clippy::unwrap_used)]
// Session lifecycle against an in-process fake manager: authorization
// caching, offer parking and flush order, handshake rejection, event
// delivery and the reconnect monitor.

mod support;

use std::sync::Arc;
use std::time::Duration;

use dconnect_core::{
    AuthorizationManager, CoreError, Operation, PLACEHOLDER_ACCESS_TOKEN, ProfileRequest, Session,
    SessionState,
};
use futures_util::future::join_all;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use support::{Behavior, FakeManager, GrantMode, scopes, test_config, wait_for};

fn session_for(manager: &FakeManager) -> Session {
    Session::new(manager.host(), scopes(), &test_config()).unwrap()
}

async fn authorized_session(manager: &FakeManager) -> Session {
    let session = session_for(manager);
    AuthorizationManager::new("dconnect-tests")
        .authorize(&session)
        .await
        .unwrap();
    session
}

// ── Authorization ───────────────────────────────────────────────────

#[tokio::test]
async fn authorize_with_cached_token_makes_no_calls() {
    let manager = FakeManager::start().await;
    let session = session_for(&manager);
    session.set_access_token("cached");
    let auth = AuthorizationManager::new("dconnect-tests");

    assert_eq!(auth.authorize(&session).await.unwrap(), "cached");
    assert_eq!(auth.authorize(&session).await.unwrap(), "cached");
    assert!(manager.calls().is_empty());
}

#[tokio::test]
async fn authorize_acquires_once_then_caches() {
    let manager = FakeManager::start().await;
    let session = session_for(&manager);
    let auth = AuthorizationManager::new("dconnect-tests");

    let first = auth.authorize(&session).await.unwrap();
    let second = auth.authorize(&session).await.unwrap();

    assert_eq!(first, "token-1");
    assert_eq!(second, first);
    assert_eq!(session.client_id().as_deref(), Some("client-1"));
    assert_eq!(
        manager.paths(),
        vec![
            "/gotapi/authorization/grant",
            "/gotapi/authorization/accessToken",
        ]
    );

    let token_call = &manager.calls()[1];
    assert_eq!(token_call.param("clientId"), Some("client-1"));
    assert_eq!(token_call.param("applicationName"), Some("dconnect-tests"));
    assert_eq!(
        token_call.param("scope"),
        Some("serviceDiscovery,battery,deviceOrientation")
    );
}

#[tokio::test]
async fn local_oauth_disabled_yields_placeholder() {
    let manager = FakeManager::start_with(Behavior {
        grant: GrantMode::LocalOAuthDisabled,
        ..Behavior::default()
    })
    .await;
    let session = session_for(&manager);

    let token = AuthorizationManager::new("dconnect-tests")
        .authorize(&session)
        .await
        .unwrap();

    assert_eq!(token, PLACEHOLDER_ACCESS_TOKEN);
    assert!(session.has_placeholder_token());
    assert_eq!(manager.count("/gotapi/authorization/accessToken"), 0);
}

#[tokio::test]
async fn grant_failure_is_no_client() {
    let manager = FakeManager::start_with(Behavior {
        grant: GrantMode::Fail(1),
        ..Behavior::default()
    })
    .await;
    let session = session_for(&manager);

    let err = AuthorizationManager::new("dconnect-tests")
        .authorize(&session)
        .await
        .unwrap_err();

    assert_eq!(err.reason(), Some(dconnect_core::ConnectReason::NoClient));
    assert!(session.access_token().is_none());
}

#[tokio::test]
async fn token_failure_is_no_access_token() {
    let manager = FakeManager::start_with(Behavior {
        token_errors: [1].into(),
        ..Behavior::default()
    })
    .await;
    let session = session_for(&manager);

    let err = AuthorizationManager::new("dconnect-tests")
        .authorize(&session)
        .await
        .unwrap_err();

    assert_eq!(err.reason(), Some(dconnect_core::ConnectReason::NoAccessToken));
}

// ── Connect / offers ────────────────────────────────────────────────

#[tokio::test]
async fn connect_without_token_is_not_authorized() {
    let manager = FakeManager::start().await;
    let session = session_for(&manager);

    let err = session.connect().await.unwrap_err();

    assert_eq!(err.reason(), Some(dconnect_core::ConnectReason::NotAuthorized));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(manager.calls().is_empty());
}

#[tokio::test]
async fn connect_sends_token_and_is_idempotent() {
    let manager = FakeManager::start().await;
    let session = authorized_session(&manager).await;

    session.connect().await.unwrap();
    session.connect().await.unwrap();

    assert!(session.is_established());
    assert_eq!(manager.count("/gotapi/websocket"), 1);
    let ws = manager
        .calls()
        .into_iter()
        .find(|c| c.method == "WS")
        .unwrap();
    assert_eq!(ws.param("accessToken"), Some("token-1"));
}

#[tokio::test]
async fn parked_offers_flush_in_submission_order() {
    let manager = FakeManager::start().await;
    let session = authorized_session(&manager).await;

    let futures: Vec<_> = (1..=3)
        .map(|n| {
            session.offer(Operation::request(
                ProfileRequest::get("battery")
                    .service_id("host.deviceconnect.org")
                    .param("n", n.to_string()),
            ))
        })
        .collect();
    assert_eq!(session.pending_offers(), 3);
    assert_eq!(manager.count("/gotapi/battery"), 0);

    session.connect().await.unwrap();
    let results = join_all(futures).await;

    let echoed: Vec<String> = results
        .into_iter()
        .map(|r| r.unwrap()["params"]["n"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(echoed, vec!["1", "2", "3"]);

    let seen: Vec<String> = manager
        .calls()
        .into_iter()
        .filter(|c| c.path == "/gotapi/battery")
        .map(|c| c.param("n").unwrap().to_owned())
        .collect();
    assert_eq!(seen, vec!["1", "2", "3"]);
    assert_eq!(session.pending_offers(), 0);
}

#[tokio::test]
async fn offers_run_directly_once_established() {
    let manager = FakeManager::start().await;
    let session = authorized_session(&manager).await;
    session.connect().await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let op = {
        let order = Arc::clone(&order);
        Operation::new("record", move |_session| {
            let order = Arc::clone(&order);
            async move {
                order.lock().push("ran");
                Ok(json!({ "ok": true }))
            }
        })
    };

    let value = session.offer(op).await.unwrap();

    assert_eq!(value, json!({ "ok": true }));
    assert_eq!(*order.lock(), vec!["ran"]);
    assert_eq!(session.pending_offers(), 0);
}

#[tokio::test]
async fn close_cancels_parked_offers() {
    let manager = FakeManager::start().await;
    let session = authorized_session(&manager).await;

    let parked = session.offer(Operation::request(ProfileRequest::get("battery")));
    session.close();

    assert!(matches!(parked.await, Err(CoreError::OfferCancelled)));
    assert!(session.access_token().is_none());
    assert_eq!(manager.count("/gotapi/battery"), 0);
}

#[tokio::test]
async fn disconnect_parks_later_offers() {
    let manager = FakeManager::start().await;
    let session = authorized_session(&manager).await;
    session.connect().await.unwrap();

    session.disconnect();
    assert_eq!(session.state(), SessionState::Disconnected);
    let parked = session.offer(Operation::request(ProfileRequest::get("battery")));
    assert_eq!(session.pending_offers(), 1);

    session.connect().await.unwrap();
    parked.await.unwrap();
    assert_eq!(manager.count("/gotapi/websocket"), 2);
}

// ── Handshake rejection ─────────────────────────────────────────────

#[tokio::test]
async fn handshake_rejection_keeps_session_disconnected() {
    let manager = FakeManager::start_with(Behavior {
        handshake_errors: [3].into(),
        ..Behavior::default()
    })
    .await;
    let session = authorized_session(&manager).await;
    let parked = session.offer(Operation::request(ProfileRequest::get("battery")));

    let err = session.connect().await.unwrap_err();

    assert!(matches!(err, CoreError::WebSocket { code: 3, .. }));
    assert!(err.requires_reauthorization());
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.pending_offers(), 1);

    // The next handshake is accepted and the parked offer goes out.
    session.connect().await.unwrap();
    parked.await.unwrap();
}

#[tokio::test]
async fn duplicate_handshake_is_not_an_auth_failure() {
    let manager = FakeManager::start_with(Behavior {
        handshake_errors: [4].into(),
        ..Behavior::default()
    })
    .await;
    let session = authorized_session(&manager).await;

    let err = session.connect().await.unwrap_err();

    assert!(matches!(err, CoreError::WebSocket { code: 4, .. }));
    assert!(!err.requires_reauthorization());
}

#[tokio::test]
async fn system_info_carries_the_session_token() {
    let manager = FakeManager::start().await;
    let session = authorized_session(&manager).await;

    let info = session.system_info().await.unwrap();

    assert_eq!(info["path"], json!("/gotapi/system"));
    assert_eq!(info["params"]["accessToken"], json!("token-1"));
}

// ── Events ──────────────────────────────────────────────────────────

#[tokio::test]
async fn events_reach_registered_listener() {
    let manager = FakeManager::start().await;
    let session = authorized_session(&manager).await;
    session.connect().await.unwrap();

    let request = ProfileRequest::get("deviceOrientation")
        .attribute("onDeviceOrientation")
        .service_id("host.deviceconnect.org");
    let mut subscription = session.add_event_listener(&request).await.unwrap();
    assert!(session
        .dispatcher()
        .is_registered("/GotAPI/deviceOrientation/onDeviceOrientation?serviceId=x"));

    let put = manager
        .calls()
        .into_iter()
        .find(|c| c.path == "/gotapi/deviceOrientation/onDeviceOrientation")
        .unwrap();
    assert_eq!(put.method, "PUT");
    assert_eq!(put.param("accessToken"), Some("token-1"));

    manager.push_event(&json!({
        "profile": "deviceOrientation",
        "attribute": "onDeviceOrientation",
        "serviceId": "host.deviceconnect.org",
        "orientation": { "interval": 100 }
    }));

    let event = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.service_id.as_deref(), Some("host.deviceconnect.org"));
    assert_eq!(event.extra["orientation"]["interval"], json!(100));

    session.remove_event_listener(&request).await.unwrap();
    assert!(!session.dispatcher().is_registered(&request.path()));
    assert!(session.dispatcher().is_empty());
    let delete = manager.calls().into_iter().last().unwrap();
    assert_eq!(delete.method, "DELETE");
}

#[tokio::test]
async fn rejected_listener_is_not_registered() {
    let manager = FakeManager::start().await;
    let session = authorized_session(&manager).await;
    session.connect().await.unwrap();
    manager.behave(|b| b.profile_errors.push_back(10));

    let request = ProfileRequest::get("battery").attribute("onBatteryChange");
    assert!(session.add_event_listener(&request).await.is_err());
    assert!(!session.dispatcher().is_registered(&request.path()));
}

// ── Teardown ────────────────────────────────────────────────────────

#[tokio::test]
async fn state_transitions_are_observable() {
    let manager = FakeManager::start_with(Behavior {
        ack_delay: Some(Duration::from_millis(100)),
        ..Behavior::default()
    })
    .await;
    let session = authorized_session(&manager).await;
    let mut state = session.subscribe_state();
    assert_eq!(*state.borrow(), SessionState::Disconnected);

    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });

    for expected in [SessionState::Connecting, SessionState::Established] {
        let seen = tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| *s == expected))
            .await
            .unwrap()
            .is_ok();
        assert!(seen, "never saw {expected:?}");
    }
    connecting.await.unwrap().unwrap();

    manager.drop_sockets();
    let seen = tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == SessionState::Disconnected),
    )
    .await
    .unwrap()
    .is_ok();
    assert!(seen);
}

#[tokio::test]
async fn dropping_last_handle_closes_socket() {
    let manager = FakeManager::start().await;
    let session = authorized_session(&manager).await;
    session.connect().await.unwrap();
    assert!(wait_for(|| manager.open_sockets() == 1).await);

    drop(session);

    assert!(wait_for(|| manager.open_sockets() == 0).await);
}

#[tokio::test]
async fn close_during_handshake_aborts_connect() {
    let manager = FakeManager::start_with(Behavior {
        ack_delay: Some(Duration::from_millis(300)),
        ..Behavior::default()
    })
    .await;
    let session = authorized_session(&manager).await;

    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    assert!(wait_for(|| manager.count("/gotapi/websocket") == 1).await);
    assert_eq!(session.state(), SessionState::Connecting);

    session.close();

    let err = connecting.await.unwrap().unwrap_err();
    assert!(matches!(err, CoreError::ConnectAborted { .. }), "got: {err:?}");
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(wait_for(|| manager.acked_sockets() == 1 && manager.open_sockets() == 0).await);
}

// ── Monitor ─────────────────────────────────────────────────────────

#[tokio::test]
async fn server_drop_marks_session_disconnected() {
    let manager = FakeManager::start().await;
    let session = authorized_session(&manager).await;
    session.connect().await.unwrap();
    assert!(wait_for(|| manager.open_sockets() == 1).await);

    manager.drop_sockets();

    assert!(wait_for(|| session.state() == SessionState::Disconnected).await);
}

#[tokio::test]
async fn monitor_reopens_dropped_socket() {
    let manager = FakeManager::start().await;
    let mut config = test_config();
    config.monitor_interval = Some(Duration::from_millis(50));
    let session = Session::new(manager.host(), scopes(), &config).unwrap();
    AuthorizationManager::new("dconnect-tests")
        .authorize(&session)
        .await
        .unwrap();
    session.connect().await.unwrap();
    assert!(wait_for(|| manager.open_sockets() == 1).await);

    manager.drop_sockets();

    assert!(wait_for(|| manager.count("/gotapi/websocket") == 2).await);
    assert!(wait_for(|| session.is_established() && manager.open_sockets() == 1).await);

    session.close();
    assert!(wait_for(|| manager.open_sockets() == 0).await);
}
