// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-of-day closing snapshots.

use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An immutable snapshot of an end-of-day closing.
///
/// Closings ride the same queue as orders and are submitted to the
/// regulator's closing endpoint with the same signing pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosingSnapshot {
    /// Closing identifier in the ordering system.
    pub closing_id: String,
    /// Tenant identifier.
    pub tenant_id: String,
    /// Branch the day was closed for.
    pub branch_id: String,
    /// Device the closing was produced on.
    pub device_id: String,
    /// When the closing was finalized.
    pub timestamp: DateTime<Utc>,
    /// Number of transactions covered by the closing.
    pub transaction_count: u32,
    /// Gross total of the covered transactions.
    pub gross_total: Money,
    /// GST-equivalent total.
    pub gst: Money,
    /// QST-equivalent total.
    pub qst: Money,
}

impl ClosingSnapshot {
    /// Gross total in integer cents.
    #[must_use]
    pub fn total_cents(&self) -> i64 {
        self.gross_total.cents()
    }

    /// Closing timestamp in the regulator's compact `YYYYMMDDHHMMSS`
    /// form.
    #[must_use]
    pub fn compact_timestamp(&self) -> String {
        self.timestamp.format("%Y%m%d%H%M%S").to_string()
    }
}
