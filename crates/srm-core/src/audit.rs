// SPDX-License-Identifier: MIT OR Apache-2.0
//! Audit log entries, one per processed queue attempt.

use crate::queue::Entity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single audit record for one submission attempt.
///
/// Bodies are never stored verbatim — only their SHA-256 hashes — and
/// the error message has been through PII sanitation before it lands
/// here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Entry identifier.
    pub id: Uuid,
    /// Tenant the attempt belonged to.
    pub tenant_id: String,
    /// The order or closing being delivered.
    pub entity: Entity,
    /// Operation label (`transaction` or `closing`).
    pub operation: String,
    /// HTTP method of the request.
    pub method: String,
    /// Request path under the regulator base URL.
    pub path: String,
    /// SHA-256 of the canonical request body.
    pub request_hash: String,
    /// Base64 signature transmitted with the request.
    pub request_signature: String,
    /// Response HTTP status (0 for transport failures).
    pub http_status: u16,
    /// SHA-256 of the raw response body.
    pub response_hash: String,
    /// Regulator-assigned transaction id, when one was returned.
    pub regulator_tx_id: Option<String>,
    /// Wall-clock duration of the attempt in milliseconds.
    pub duration_ms: u64,
    /// Classified error code, `None` on success.
    pub error_code: Option<String>,
    /// Sanitized error message, `None` on success.
    pub error_message: Option<String>,
    /// Raw regulator return code (`codRetour`), when present.
    pub regulator_return_code: Option<String>,
    /// When the attempt finished.
    pub created_at: DateTime<Utc>,
}
