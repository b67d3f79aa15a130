#![allow(clippy::unwrap_used)]
// Integration tests for `RestClient` using wiremock.

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use dconnect_api::antispoofing::Nonce;
use dconnect_api::{
    Error, ErrorCode, HmacKey, HostConfig, Method, ProfileRequest, RestClient, ScopeSet,
    TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn host_for(server: &MockServer) -> HostConfig {
    let addr = server.address();
    HostConfig::new(addr.ip().to_string()).with_port(addr.port())
}

async fn setup() -> (MockServer, RestClient) {
    let server = MockServer::start().await;
    let client = RestClient::new(host_for(&server), &TransportConfig::default()).unwrap();
    (server, client)
}

/// Answers like a manager that knows `key`: signs whatever nonce arrives.
struct SigningResponder {
    key: HmacKey,
    body: serde_json::Value,
}

impl Respond for SigningResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let nonce = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "nonce")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let mut body = self.body.clone();
        body["hmac"] = json!(self.key.sign(&Nonce::from_hex(&nonce).unwrap()));
        ResponseTemplate::new(200).set_body_json(body)
    }
}

// ── Request shape ───────────────────────────────────────────────────

#[tokio::test]
async fn test_get_sends_query_and_origin() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/gotapi/battery"))
        .and(query_param("serviceId", "abc"))
        .and(query_param("accessToken", "tok"))
        .and(header("origin", "http://localhost"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": 0,
            "level": 0.8,
            "charging": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = ProfileRequest::get("battery")
        .service_id("abc")
        .param("accessToken", "tok");
    let value = client.send_request(&request).await.unwrap();
    assert_eq!(value["level"], json!(0.8));
}

#[tokio::test]
async fn test_post_sends_form_body() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/gotapi/vibration/vibrate"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("serviceId=abc&pattern=500%2C100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": 0 })))
        .expect(1)
        .mount(&server)
        .await;

    let request = ProfileRequest::post("vibration")
        .attribute("vibrate")
        .service_id("abc")
        .param("pattern", "500,100");
    client.send_request(&request).await.unwrap();
}

#[tokio::test]
async fn test_extended_origin_header() {
    let server = MockServer::start().await;
    let transport = TransportConfig {
        extended_origin: Some("org.example.hybrid".into()),
        ..TransportConfig::default()
    };
    let client = RestClient::new(host_for(&server), &transport).unwrap();

    Mock::given(method("GET"))
        .and(path("/gotapi/availability"))
        .and(header("x-gotapi-origin", "org.example.hybrid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": 0,
            "version": "2.2.0"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let availability = client.availability().await.unwrap();
    assert_eq!(availability.version.as_deref(), Some("2.2.0"));
}

// ── Error mapping ───────────────────────────────────────────────────

#[tokio::test]
async fn test_error_envelope_maps_to_protocol_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/gotapi/serviceDiscovery"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": 1,
            "errorCode": 12,
            "errorMessage": "Access token has expired."
        })))
        .mount(&server)
        .await;

    let err = client.service_discovery("stale").await.unwrap_err();
    match &err {
        Error::Protocol { code, message } => {
            assert_eq!(*code, 12);
            assert_eq!(message, "Access token has expired.");
        }
        other => panic!("expected Protocol error, got: {other:?}"),
    }
    assert!(err.is_authorization());
    assert_eq!(err.error_code(), Some(ErrorCode::ExpiredAccessToken));
}

#[tokio::test]
async fn test_non_json_error_status() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/gotapi/availability"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .mount(&server)
        .await;

    let result = client.availability().await;
    assert!(
        matches!(result, Err(Error::HttpStatus { status: 503, .. })),
        "expected HttpStatus error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_non_json_success_body() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/gotapi/availability"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>captive portal</html>"))
        .mount(&server)
        .await;

    let result = client.availability().await;
    assert!(
        matches!(result, Err(Error::Deserialization { .. })),
        "expected Deserialization error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_unreachable_manager_is_transport_error() {
    // Bind and release a port so nothing is listening on it.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let host = HostConfig::new("127.0.0.1").with_port(port);

    let client = RestClient::new(host, &TransportConfig::default()).unwrap();
    let err = client.availability().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "got: {err:?}");
    assert_eq!(err.error_code(), Some(ErrorCode::AccessFailed));
}

// ── Authorization endpoints ─────────────────────────────────────────

#[tokio::test]
async fn test_create_client_and_request_token() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/gotapi/authorization/grant"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": 0,
            "clientId": "client-123"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/gotapi/authorization/accessToken"))
        .and(query_param("clientId", "client-123"))
        .and(query_param("scope", "serviceDiscovery,battery"))
        .and(query_param("applicationName", "demo app"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": 0,
            "accessToken": "token-abc",
            "expire": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client_id = client.create_client().await.unwrap();
    assert_eq!(client_id, "client-123");

    let scopes: ScopeSet = ["serviceDiscovery", "battery"].into_iter().collect();
    let token = client
        .request_access_token(&client_id, &scopes, "demo app")
        .await
        .unwrap();
    assert_eq!(token, "token-abc");
}

#[tokio::test]
async fn test_grant_reports_local_oauth_disabled() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/gotapi/authorization/grant"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": 1,
            "errorCode": 2,
            "errorMessage": "Not support profile."
        })))
        .mount(&server)
        .await;

    let err = client.create_client().await.unwrap_err();
    assert!(err.is_local_oauth_disabled());
    assert!(!err.is_authorization());
}

// ── Discovery ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_service_discovery_keeps_server_order() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/gotapi/serviceDiscovery"))
        .and(query_param("accessToken", "tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": 0,
            "services": [
                { "id": "host.deviceconnect", "name": "Host", "online": true, "scopes": ["battery"] },
                { "id": "theta.deviceconnect", "name": "THETA V", "online": false }
            ]
        })))
        .mount(&server)
        .await;

    let services = client.service_discovery("tok").await.unwrap();
    let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Host", "THETA V"]);
    assert_eq!(services[0].scopes, vec!["battery".to_owned()]);
}

#[tokio::test]
async fn test_service_information_supports() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/gotapi/serviceInformation"))
        .and(query_param("serviceId", "host.deviceconnect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": 0,
            "supports": ["battery", "mediaStreamRecording"]
        })))
        .mount(&server)
        .await;

    let info = client
        .service_information("host.deviceconnect", "tok")
        .await
        .unwrap();
    assert!(info.supports("mediastreamrecording"));
    assert!(!info.supports("vibration"));
}

// ── Anti-spoofing ───────────────────────────────────────────────────

#[tokio::test]
async fn test_signed_response_is_accepted() {
    let (server, client) = setup().await;
    let key = HmacKey::generate();
    let client = client.with_hmac_key(Some(key.clone()));

    Mock::given(method("GET"))
        .and(path("/gotapi/availability"))
        .respond_with(SigningResponder {
            key,
            body: json!({ "result": 0 }),
        })
        .expect(1)
        .mount(&server)
        .await;

    client.availability().await.unwrap();
}

#[tokio::test]
async fn test_response_signed_with_other_key_is_rejected() {
    let (server, client) = setup().await;
    let client = client.with_hmac_key(Some(HmacKey::generate()));

    Mock::given(method("GET"))
        .and(path("/gotapi/availability"))
        .respond_with(SigningResponder {
            key: HmacKey::generate(),
            body: json!({ "result": 0 }),
        })
        .mount(&server)
        .await;

    let err = client.availability().await.unwrap_err();
    assert!(matches!(err, Error::InvalidServer), "got: {err:?}");
    assert_eq!(err.error_code(), Some(ErrorCode::InvalidServer));
}

#[tokio::test]
async fn test_unsigned_error_envelope_is_rejected() {
    let (server, client) = setup().await;
    let client = client.with_hmac_key(Some(HmacKey::generate()));

    Mock::given(method("GET"))
        .and(path("/gotapi/authorization/grant"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": 1,
            "errorCode": 2,
            "errorMessage": "Not support profile."
        })))
        .mount(&server)
        .await;

    let err = client.create_client().await.unwrap_err();
    assert!(matches!(err, Error::InvalidServer), "got: {err:?}");
    assert!(!err.is_local_oauth_disabled());
}

#[tokio::test]
async fn test_signed_error_envelope_keeps_its_code() {
    let (server, client) = setup().await;
    let key = HmacKey::generate();
    let client = client.with_hmac_key(Some(key.clone()));

    Mock::given(method("GET"))
        .and(path("/gotapi/authorization/grant"))
        .respond_with(SigningResponder {
            key,
            body: json!({ "result": 1, "errorCode": 2, "errorMessage": "Not support profile." }),
        })
        .mount(&server)
        .await;

    let err = client.create_client().await.unwrap_err();
    assert!(err.is_local_oauth_disabled(), "got: {err:?}");
}

#[tokio::test]
async fn test_no_nonce_without_key() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/gotapi/system"))
        .respond_with(|req: &Request| {
            let has_nonce = req.url.query_pairs().any(|(k, _)| k == "nonce");
            ResponseTemplate::new(200).set_body_json(json!({ "result": 0, "nonce": has_nonce }))
        })
        .mount(&server)
        .await;

    let value = client.system_info("tok").await.unwrap();
    assert_eq!(value["nonce"], json!(false));
}

#[tokio::test]
async fn test_delete_uses_query_string() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/gotapi/deviceOrientation/onDeviceOrientation"))
        .and(query_param("serviceId", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": 0 })))
        .expect(1)
        .mount(&server)
        .await;

    let uri = client
        .uri_builder()
        .profile("deviceOrientation")
        .attribute("onDeviceOrientation")
        .service_id("abc");
    client.send(Method::DELETE, uri).await.unwrap();
}
