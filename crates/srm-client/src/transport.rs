// SPDX-License-Identifier: MIT OR Apache-2.0
//! The outbound-call seam between the worker and the wire.

use crate::headers::RequestHeaders;
use async_trait::async_trait;
use srm_core::RegulatorResponse;

/// Client-certificate material presented on a mutually-authenticated
/// call.
///
/// Identities are per-device; the HTTP implementation pools TLS
/// clients per identity and never shares certificate material across
/// tenants.
#[derive(Clone)]
pub struct ClientIdentity {
    /// PEM-encoded private key (decrypted).
    pub private_key_pem: String,
    /// PEM-encoded device certificate.
    pub certificate_pem: String,
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("ClientIdentity").finish_non_exhaustive()
    }
}

/// One outbound POST, fully assembled by the caller.
#[derive(Debug)]
pub struct OutboundRequest<'a> {
    /// Path under the regulator base URL (e.g. `/transaction`).
    pub path: &'a str,
    /// Exact body bytes; the client must not re-encode them.
    pub body: &'a str,
    /// Request headers in regulator casing.
    pub headers: &'a RequestHeaders,
    /// Idempotency key, transmitted as `X-Idempotency-Key` when set.
    pub idempotency_key: Option<&'a str>,
    /// Client-certificate identity for mutual TLS, when required.
    pub identity: Option<&'a ClientIdentity>,
}

/// A single-shot POST to the regulator.
///
/// Implementations never retry and never raise for wire-level
/// failures: transport errors come back as a [`RegulatorResponse`]
/// with HTTP status `0`, leaving retry policy entirely to the caller.
#[async_trait]
pub trait RegulatorTransport: Send + Sync {
    /// Perform one POST and report its outcome.
    async fn post(&self, request: OutboundRequest<'_>) -> RegulatorResponse;
}
