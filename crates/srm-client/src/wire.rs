// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire constants and enrollment body shapes.
//!
//! Transaction and closing bodies are assembled by the worker (they
//! embed the signature envelope and are canonicalized before hitting
//! the wire); only the enrollment exchange has its shape pinned here.

use serde::Deserialize;
use serde_json::Value;

/// Path of the enrollment endpoint under the regulator base URL.
pub const ENROLLMENT_PATH: &str = "/enrolement";

/// Parsed enrollment response payload.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RetourEnrol {
    /// PEM of the issued device certificate.
    #[serde(default)]
    pub certif: Option<String>,
    /// PEM of the issuing chain.
    #[serde(rename = "certifPSI", default)]
    pub certif_psi: Option<String>,
}

/// Extract the `retourEnrol` object from an enrollment response body.
pub(crate) fn parse_retour_enrol(body: &Value) -> Option<RetourEnrol> {
    body.get("retourEnrol")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}
