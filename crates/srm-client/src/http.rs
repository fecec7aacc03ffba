// SPDX-License-Identifier: MIT OR Apache-2.0
//! The production transport: reqwest over rustls with client
//! certificates.

use crate::transport::{ClientIdentity, OutboundRequest, RegulatorTransport};
use crate::ClientError;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use sha2::{Digest, Sha256};
use srm_core::{RegulatorResponse, TransportError};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP transport for the regulator API.
///
/// One instance serves every tenant: TLS clients are pooled per
/// client-certificate identity (keyed by certificate digest), so
/// certificate material is never shared across tenants. Server
/// certificate verification is always enabled.
pub struct HttpRegulatorClient {
    base_url: String,
    timeout: Duration,
    anonymous: reqwest::Client,
    identified: Mutex<HashMap<String, reqwest::Client>>,
}

impl std::fmt::Debug for HttpRegulatorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRegulatorClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpRegulatorClient {
    /// Build a client for the given base URL with the default
    /// 30-second per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidBaseUrl`] or
    /// [`ClientError::Build`].
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Build a client with an explicit per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidBaseUrl`] when the URL does not
    /// parse and [`ClientError::Build`] when the underlying client
    /// cannot be constructed.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        reqwest::Url::parse(base_url)
            .map_err(|e| ClientError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        let anonymous = builder(timeout)
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            anonymous,
            identified: Mutex::new(HashMap::new()),
        })
    }

    /// Fetch (or lazily build) the TLS client for an identity.
    fn client_for(&self, identity: Option<&ClientIdentity>) -> Result<reqwest::Client, ClientError> {
        let Some(identity) = identity else {
            return Ok(self.anonymous.clone());
        };
        let key = {
            let mut hasher = Sha256::new();
            hasher.update(identity.certificate_pem.as_bytes());
            format!("{:x}", hasher.finalize())
        };
        let mut pool = self
            .identified
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = pool.get(&key) {
            return Ok(existing.clone());
        }
        let bundle = format!("{}\n{}", identity.certificate_pem, identity.private_key_pem);
        let tls_identity = reqwest::Identity::from_pem(bundle.as_bytes())
            .map_err(|e| ClientError::TlsIdentity(e.to_string()))?;
        let client = builder(self.timeout)
            .identity(tls_identity)
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;
        pool.insert(key, client.clone());
        Ok(client)
    }
}

fn builder(timeout: Duration) -> reqwest::ClientBuilder {
    reqwest::Client::builder().use_rustls_tls().timeout(timeout)
}

#[async_trait]
impl RegulatorTransport for HttpRegulatorClient {
    async fn post(&self, request: OutboundRequest<'_>) -> RegulatorResponse {
        let client = match self.client_for(request.identity) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "client identity could not be loaded");
                return RegulatorResponse::from_transport(TransportError::Network);
            }
        };

        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = client
            .post(&url)
            .header("Content-Type", "application/json; charset=utf-8")
            .header("Accept", "application/json");
        for (name, value) in request.headers.iter() {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(n), Ok(v)) => builder = builder.header(n, v),
                _ => tracing::warn!(header = name, "skipping malformed request header"),
            }
        }
        if let Some(key) = request.idempotency_key {
            builder = builder.header("X-Idempotency-Key", key);
        }

        // The body is the canonical form; ship the exact bytes.
        let outcome = builder.body(request.body.to_string()).send().await;
        let response = match outcome {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                tracing::warn!(url = %url, "regulator call timed out");
                return RegulatorResponse::from_transport(TransportError::Timeout);
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "regulator call failed");
                return RegulatorResponse::from_transport(TransportError::Network);
            }
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(text) => RegulatorResponse::from_http(status, text),
            Err(e) if e.is_timeout() => RegulatorResponse::from_transport(TransportError::Timeout),
            Err(_) => RegulatorResponse::from_transport(TransportError::Network),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::RequestHeaders;
    use serde_json::json;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request_headers() -> RequestHeaders {
        let mut h = RequestHeaders::new();
        h.push("ENVIRN", "ESSAI");
        h.push("IDSEV", "sev-11");
        h
    }

    #[tokio::test]
    async fn posts_exact_body_and_headers() {
        let server = MockServer::start().await;
        let reply = json!({"retourTrans": {"retourTransActu": {"psiNoTrans": "PSI-7"}}});
        Mock::given(method("POST"))
            .and(path("/transaction"))
            .and(header("ENVIRN", "ESSAI"))
            .and(header("X-Idempotency-Key", "k-123"))
            .and(body_string(r#"{"reqTrans":{"a":1}}"#))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpRegulatorClient::new(&server.uri()).unwrap();
        let headers = request_headers();
        let response = client
            .post(OutboundRequest {
                path: "/transaction",
                body: r#"{"reqTrans":{"a":1}}"#,
                headers: &headers,
                idempotency_key: Some("k-123"),
                identity: None,
            })
            .await;

        assert_eq!(response.http_status, 200);
        assert!(response.transport_error.is_none());
        let body = response.body.expect("json body");
        assert_eq!(srm_core::regulator_tx_id(&body).as_deref(), Some("PSI-7"));
    }

    #[tokio::test]
    async fn timeout_maps_to_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = HttpRegulatorClient::with_timeout(&server.uri(), Duration::from_millis(100)).unwrap();
        let headers = RequestHeaders::new();
        let response = client
            .post(OutboundRequest {
                path: "/transaction",
                body: "{}",
                headers: &headers,
                idempotency_key: None,
                identity: None,
            })
            .await;

        assert_eq!(response.http_status, 0);
        assert_eq!(response.transport_error, Some(TransportError::Timeout));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        // Port 9 (discard) is virtually never listening.
        let client =
            HttpRegulatorClient::with_timeout("http://127.0.0.1:9", Duration::from_millis(300))
                .unwrap();
        let headers = RequestHeaders::new();
        let response = client
            .post(OutboundRequest {
                path: "/transaction",
                body: "{}",
                headers: &headers,
                idempotency_key: None,
                identity: None,
            })
            .await;
        assert_eq!(response.http_status, 0);
        assert!(response.transport_error.is_some());
    }

    #[test]
    fn rejects_malformed_base_url() {
        assert!(matches!(
            HttpRegulatorClient::new("not a url"),
            Err(ClientError::InvalidBaseUrl(_))
        ));
    }
}
