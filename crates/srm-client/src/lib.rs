// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Regulator-facing networking for the SRM relay.
//!
//! This crate owns the two wire exchanges the relay performs:
//! one-time device enrollment (keypair + CSR → certificate) and
//! per-transaction POSTs over mutual TLS. It exposes a
//! [`RegulatorTransport`] trait so the worker and tests can swap the
//! HTTP client for a scripted double.
//!
//! The client never retries; retry policy belongs to the queue worker.

mod enroll;
mod headers;
mod http;
mod mock;
mod transport;
mod wire;

pub use enroll::{EnrollmentMode, EnrollmentOutcome, build_csr_pem, enroll, generate_keypair};
pub use headers::{RequestHeaders, authorization_in_header, profile_headers, transaction_headers};
pub use http::HttpRegulatorClient;
pub use mock::{MockTransport, RecordedRequest};
pub use transport::{ClientIdentity, OutboundRequest, RegulatorTransport};
pub use wire::ENROLLMENT_PATH;

/// Errors from client construction and enrollment.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The base URL could not be parsed.
    #[error("invalid regulator base URL: {0}")]
    InvalidBaseUrl(String),

    /// The client certificate/key pair was rejected by the TLS stack.
    #[error("client identity rejected: {0}")]
    TlsIdentity(String),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Build(String),

    /// CSR generation failed.
    #[error("failed to generate certificate signing request: {0}")]
    CsrGeneration(String),

    /// The regulator rejected the enrollment exchange.
    #[error("enrollment rejected (status {status}): {message}")]
    EnrollmentRejected {
        /// HTTP status of the rejection (0 for transport failures).
        status: u16,
        /// Sanitized regulator message.
        message: String,
    },

    /// The enrollment response did not carry a certificate.
    #[error("enrollment response is missing the device certificate")]
    MissingCertificate,
}
