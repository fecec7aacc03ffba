// SPDX-License-Identifier: MIT OR Apache-2.0
//! Receipt records: the durable, audit-grade trace of each delivered
//! fiscal event.

use crate::error::TimestampError;
use crate::profile::Environment;
use crate::queue::Entity;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Length of a transaction signature in base64 characters.
pub const SIGNATURE_LEN: usize = 88;

/// Length of a canonical payload hash in hex characters.
pub const HASH_LEN: usize = 64;

/// Maximum length of the QR string.
pub const QR_MAX_LEN: usize = 2048;

/// The previous-signature sentinel used by the first receipt of a
/// (tenant, device) chain: 88 `=` characters.
pub const SIGNATURE_SENTINEL: &str =
    "========================================================================================";

/// How the customer receives the receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintMode {
    /// Printed on paper at the device.
    Paper,
    /// Delivered electronically.
    Electronic,
}

impl PrintMode {
    /// Stable lowercase label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::Electronic => "electronic",
        }
    }
}

/// A per-transaction receipt record.
///
/// Receipts are append-only and keyed by (tenant, entity). The
/// signature chain invariant holds across receipts of the same
/// (tenant, device): each `previous_signature` equals the
/// `current_signature` of the most recent completed receipt, and the
/// first link carries [`SIGNATURE_SENTINEL`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    /// Tenant the receipt belongs to.
    pub tenant_id: String,
    /// The order or closing this receipt records.
    pub entity: Entity,
    /// Signature of the predecessor receipt, or the sentinel.
    pub previous_signature: String,
    /// Signature of this receipt's canonical payload.
    pub current_signature: String,
    /// Canonical payload hash (64 lowercase hex).
    pub canonical_hash: String,
    /// QR string for customer-facing verification (≤ 2048 chars).
    pub qr_data: String,
    /// Delivery mode.
    pub print_mode: PrintMode,
    /// Receipt format tag (e.g. `json`).
    pub format: String,
    /// Regulator-assigned transaction id, once acknowledged.
    pub regulator_tx_id: Option<String>,
    /// Device the transaction was signed on.
    pub device_id: String,
    /// Environment the submission ran in.
    pub environment: Environment,
    /// Software identifier from the profile.
    pub software_id: String,
    /// Software version from the profile.
    pub software_version: String,
    /// Business timestamp of the transaction.
    pub transaction_at: DateTime<Utc>,
    /// Free-form structured metadata.
    pub metadata: serde_json::Value,
    /// When the record was persisted.
    pub created_at: DateTime<Utc>,
}

/// Convert a compact `YYYYMMDDHHMMSS` timestamp into ISO-8601 with a
/// `.000Z` suffix, as stored on receipts.
///
/// # Errors
///
/// Returns [`TimestampError`] when the input is not exactly fourteen
/// digits forming a valid date-time.
///
/// # Examples
///
/// ```
/// use srm_core::normalize_compact_timestamp;
///
/// let iso = normalize_compact_timestamp("20260314150926").unwrap();
/// assert_eq!(iso, "2026-03-14T15:09:26.000Z");
/// ```
pub fn normalize_compact_timestamp(compact: &str) -> Result<String, TimestampError> {
    if compact.len() != 14 || !compact.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TimestampError(compact.to_string()));
    }
    let parsed = NaiveDateTime::parse_from_str(compact, "%Y%m%d%H%M%S")
        .map_err(|_| TimestampError(compact.to_string()))?;
    Ok(parsed.format("%Y-%m-%dT%H:%M:%S.000Z").to_string())
}

/// Assemble the QR string for a receipt.
///
/// Contains the regulator transaction id (or the canonical-hash prefix
/// while no id has been assigned), the compact timestamp, the total in
/// cents, and a signature excerpt. Output is hard-capped at
/// [`QR_MAX_LEN`] characters.
#[must_use]
pub fn build_qr(
    base_url: &str,
    regulator_tx_id: Option<&str>,
    compact_timestamp: &str,
    total_cents: i64,
    canonical_hash: &str,
    current_signature: &str,
) -> String {
    let reference = match regulator_tx_id {
        Some(id) => id.to_string(),
        None => canonical_hash.chars().take(12).collect(),
    };
    let excerpt: String = current_signature.chars().take(22).collect();
    let mut qr = format!(
        "{}/qr?no={}&dt={}&mt={}&sg={}",
        base_url.trim_end_matches('/'),
        reference,
        compact_timestamp,
        total_cents,
        excerpt
    );
    qr.truncate(QR_MAX_LEN);
    qr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_88_equals() {
        assert_eq!(SIGNATURE_SENTINEL.len(), SIGNATURE_LEN);
        assert!(SIGNATURE_SENTINEL.bytes().all(|b| b == b'='));
    }

    #[test]
    fn normalize_accepts_compact_form() {
        assert_eq!(
            normalize_compact_timestamp("20261231235959").unwrap(),
            "2026-12-31T23:59:59.000Z"
        );
    }

    #[test]
    fn normalize_rejects_bad_shapes() {
        assert!(normalize_compact_timestamp("2026-03-14").is_err());
        assert!(normalize_compact_timestamp("20261331000000").is_err());
        assert!(normalize_compact_timestamp("2026031415092").is_err());
    }

    #[test]
    fn qr_fits_cap_and_prefers_regulator_id() {
        let hash = "c".repeat(64);
        let qr = build_qr(
            "https://reg.example",
            Some("PSI-42"),
            "20260314150926",
            1838,
            &hash,
            "s".repeat(88).as_str(),
        );
        assert!(qr.len() <= QR_MAX_LEN);
        assert!(qr.contains("no=PSI-42"));
        assert!(qr.contains("mt=1838"));
    }

    #[test]
    fn qr_falls_back_to_the_hash_prefix() {
        let qr = build_qr(
            "https://reg.example/",
            None,
            "20260314150926",
            1838,
            "abcdefghijklmnopqrstuvwxyz0123456789abcdefghijklmnopqrstuvwxyz01",
            "S".repeat(88).as_str(),
        );
        assert!(qr.contains("no=abcdefghijkl"));
        assert!(!qr.contains("no=SSSS"));
    }
}
