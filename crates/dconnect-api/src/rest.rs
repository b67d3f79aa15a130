// REST client for the Device Connect Manager.
//
// Wraps `reqwest::Client` with GotAPI URI construction, the
// `{result, errorCode, errorMessage}` envelope, form-encoded bodies for
// POST/PUT, and optional response authentication. Authorization endpoints
// live in `auth.rs` as further inherent methods.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::antispoofing::{HmacKey, Nonce};
use crate::error::Error;
use crate::models::{Availability, Envelope, Service, ServiceDiscovery, ServiceInformation};
use crate::transport::TransportConfig;
use crate::uri::{HostConfig, PARAM_NONCE, ProfileRequest, UriBuilder};

/// Raw HTTP client for one Device Connect Manager.
///
/// Every method returns the full response JSON on `result == 0` and maps
/// `result != 0` to [`Error::Protocol`]. Cloning is cheap; the underlying
/// connection pool is shared.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    host: HostConfig,
    hmac_key: Option<HmacKey>,
}

impl RestClient {
    /// Create a client for `host` from a `TransportConfig`.
    pub fn new(host: HostConfig, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, host))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, host: HostConfig) -> Self {
        Self {
            http,
            host,
            hmac_key: None,
        }
    }

    /// Enable response authentication with the given shared key.
    #[must_use]
    pub fn with_hmac_key(mut self, key: Option<HmacKey>) -> Self {
        self.hmac_key = key;
        self
    }

    pub fn host(&self) -> &HostConfig {
        &self.host
    }

    /// A fresh URI builder rooted at this client's host.
    pub fn uri_builder(&self) -> UriBuilder {
        self.host.uri_builder()
    }

    // ── Request execution ────────────────────────────────────────────

    /// Run a typed profile request against this host.
    pub async fn send_request(&self, request: &ProfileRequest) -> Result<Value, Error> {
        self.send(request.method.clone(), request.to_builder(&self.host))
            .await
    }

    /// Send a request and unwrap the envelope.
    ///
    /// GET and DELETE carry parameters in the query string. POST and PUT
    /// send them as an `application/x-www-form-urlencoded` body.
    pub async fn send(&self, method: Method, mut uri: UriBuilder) -> Result<Value, Error> {
        let nonce = self.hmac_key.as_ref().map(|_| {
            let nonce = Nonce::generate();
            uri.set_parameter(PARAM_NONCE, nonce.to_hex());
            nonce
        });

        let builder = if method == Method::POST || method == Method::PUT {
            let url = url::Url::parse(&uri.build_base())?;
            debug!(method = %method, url = %url, "sending form request");
            self.http.request(method, url).form(uri.params())
        } else {
            let url = uri.to_url()?;
            debug!(method = %method, url = %url, "sending request");
            self.http.request(method, url)
        };

        let resp = builder.send().await.map_err(Error::Transport)?;
        let (status, url, value) = Self::read_json(resp).await?;

        // Error envelopes are signed too, so verify before looking at `result`.
        if let (Some(key), Some(nonce)) = (&self.hmac_key, &nonce) {
            let hmac = value.get("hmac").and_then(Value::as_str);
            if !key.verify(nonce, hmac) {
                warn!(host = %self.host, "response failed HMAC verification");
                return Err(Error::InvalidServer);
            }
        }

        Self::check_envelope(status, url, value)
    }

    /// Decode a response body as JSON.
    async fn read_json(
        resp: reqwest::Response,
    ) -> Result<(reqwest::StatusCode, String, Value), Error> {
        let status = resp.status();
        let url = resp.url().to_string();
        let body = resp.text().await.map_err(Error::Transport)?;

        match serde_json::from_str::<Value>(&body) {
            Ok(value) => Ok((status, url, value)),
            Err(_) if status.is_success() => Err(Error::Deserialization {
                message: "response body is not JSON".into(),
                body,
            }),
            Err(_) => Err(Error::HttpStatus {
                status: status.as_u16(),
                url,
            }),
        }
    }

    /// Check `result` and map error envelopes to [`Error::Protocol`].
    fn check_envelope(
        status: reqwest::StatusCode,
        url: String,
        value: Value,
    ) -> Result<Value, Error> {
        let envelope: Envelope = match serde_json::from_value(value.clone()) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => {
                return Err(Error::Deserialization {
                    message: e.to_string(),
                    body: value.to_string(),
                });
            }
            Err(_) => {
                return Err(Error::HttpStatus {
                    status: status.as_u16(),
                    url,
                });
            }
        };

        if envelope.is_success() {
            if !status.is_success() {
                return Err(Error::HttpStatus {
                    status: status.as_u16(),
                    url,
                });
            }
            Ok(value)
        } else {
            let code = envelope.error_code.unwrap_or(1);
            let message = envelope
                .error_message
                .unwrap_or_else(|| format!("result={}", envelope.result));
            debug!(code, %message, "manager returned an error envelope");
            Err(Error::Protocol { code, message })
        }
    }

    /// Send a request and deserialize the success body into `T`.
    pub(crate) async fn send_as<T: DeserializeOwned>(
        &self,
        method: Method,
        uri: UriBuilder,
    ) -> Result<T, Error> {
        let value = self.send(method, uri).await?;
        serde_json::from_value(value.clone()).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: value.to_string(),
        })
    }

    // ── Convenience endpoints ────────────────────────────────────────

    /// Liveness check.
    ///
    /// `GET /gotapi/availability`
    pub async fn availability(&self) -> Result<Availability, Error> {
        let uri = self.uri_builder().profile("availability");
        self.send_as(Method::GET, uri).await
    }

    /// List the services reachable through the manager, in server order.
    ///
    /// `GET /gotapi/serviceDiscovery?accessToken=`
    pub async fn service_discovery(&self, access_token: &str) -> Result<Vec<Service>, Error> {
        let uri = self
            .uri_builder()
            .profile("serviceDiscovery")
            .access_token(access_token);
        let discovery: ServiceDiscovery = self.send_as(Method::GET, uri).await?;
        debug!(count = discovery.services.len(), "discovered services");
        Ok(discovery.services)
    }

    /// Profiles implemented by one service.
    ///
    /// `GET /gotapi/serviceInformation?serviceId=&accessToken=`
    pub async fn service_information(
        &self,
        service_id: &str,
        access_token: &str,
    ) -> Result<ServiceInformation, Error> {
        let uri = self
            .uri_builder()
            .profile("serviceInformation")
            .service_id(service_id)
            .access_token(access_token);
        self.send_as(Method::GET, uri).await
    }

    /// Manager-level system information (version, installed plugins).
    ///
    /// `GET /gotapi/system?accessToken=`
    ///
    /// Returned loosely typed; the field set differs between manager builds.
    pub async fn system_info(&self, access_token: &str) -> Result<Value, Error> {
        let uri = self.uri_builder().profile("system").access_token(access_token);
        self.send(Method::GET, uri).await
    }
}
