// SPDX-License-Identifier: MIT OR Apache-2.0
//! Queue items: one unit of submission work, bound to exactly one
//! order or closing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Default retry budget for a queue item.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// The business entity a queue item delivers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Entity {
    /// A finalized order (sale, cancellation, or correction).
    Order(String),
    /// An end-of-day closing.
    Closing(String),
}

impl Entity {
    /// The underlying entity identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Order(id) | Self::Closing(id) => id,
        }
    }

    /// Lowercase label used in storage and filenames.
    #[must_use]
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Order(_) => "order",
            Self::Closing(_) => "closing",
        }
    }

    /// The regulator operation this entity is submitted through.
    #[must_use]
    pub fn operation(&self) -> Operation {
        match self {
            Self::Order(_) => Operation::Transaction,
            Self::Closing(_) => Operation::Closing,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind_label(), self.id())
    }
}

/// Regulator-side operation, also the third component of the
/// circuit-breaker key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// POST to the transaction path.
    Transaction,
    /// POST to the end-of-day closing path.
    Closing,
}

impl Operation {
    /// Stable lowercase label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::Closing => "closing",
        }
    }

    /// Wire path segment under the regulator base URL.
    #[must_use]
    pub fn path(&self) -> &'static str {
        match self {
            Self::Transaction => "/transaction",
            Self::Closing => "/closing",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting to be claimed (or re-claimed after a retryable failure).
    Pending,
    /// Exclusively owned by a worker task.
    Processing,
    /// Delivered and acknowledged by the regulator.
    Completed,
    /// Terminated: non-retryable failure or retry budget exhausted.
    Failed,
    /// Withdrawn by an operator before delivery.
    Cancelled,
}

impl QueueStatus {
    /// Stable lowercase label used in storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// `true` for states no worker will touch again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown queue status: {other}")),
        }
    }
}

/// One unit of submission work shepherded by the queue worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Queue entry identifier.
    pub id: Uuid,
    /// Tenant the entity belongs to.
    pub tenant_id: String,
    /// The order or closing being delivered.
    pub entity: Entity,
    /// Idempotency key. Holds a `pending:` placeholder until the
    /// pipeline computes the content-derived key at signing time; the
    /// storage layer enforces uniqueness on this column.
    pub idempotency_key: String,
    /// Canonical payload hash, set during processing.
    pub canonical_hash: Option<String>,
    /// Lifecycle state.
    pub status: QueueStatus,
    /// Number of retries consumed so far.
    pub retry_count: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// Earliest time the item is eligible for a first claim.
    pub scheduled_at: DateTime<Utc>,
    /// Earliest time the item is eligible for a retry claim.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// When the current (or last) processing attempt began.
    pub started_at: Option<DateTime<Utc>>,
    /// When the item reached `completed`.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the last error was recorded.
    pub last_error_at: Option<DateTime<Utc>>,
    /// Classified response code of the last attempt.
    pub response_code: Option<String>,
    /// Sanitized message of the last error.
    pub error_message: Option<String>,
    /// Regulator-assigned transaction id, once acknowledged.
    pub regulator_tx_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    /// Create a fresh `pending` item scheduled immediately.
    #[must_use]
    pub fn new(tenant_id: impl Into<String>, entity: Entity, now: DateTime<Utc>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            tenant_id: tenant_id.into(),
            entity,
            idempotency_key: format!("pending:{id}"),
            canonical_hash: None,
            status: QueueStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            scheduled_at: now,
            next_retry_at: None,
            started_at: None,
            completed_at: None,
            last_error_at: None,
            response_code: None,
            error_message: None,
            regulator_tx_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `true` once the retry budget is spent: an item whose
    /// `retry_count` has reached `max_retries` fails instead of
    /// scheduling another attempt.
    #[must_use]
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_item_is_pending_with_placeholder_key() {
        let item = QueueItem::new("t-1", Entity::Order("ord-1".into()), Utc::now());
        assert_eq!(item.status, QueueStatus::Pending);
        assert!(item.idempotency_key.starts_with("pending:"));
        assert_eq!(item.max_retries, DEFAULT_MAX_RETRIES);
        assert!(item.canonical_hash.is_none());
    }

    #[test]
    fn entity_dispatch() {
        let order = Entity::Order("o".into());
        let closing = Entity::Closing("c".into());
        assert_eq!(order.operation(), Operation::Transaction);
        assert_eq!(closing.operation(), Operation::Closing);
        assert_eq!(order.operation().path(), "/transaction");
        assert_eq!(closing.operation().path(), "/closing");
    }

    #[test]
    fn status_roundtrip() {
        for s in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Completed,
            QueueStatus::Failed,
            QueueStatus::Cancelled,
        ] {
            assert_eq!(s.as_str().parse::<QueueStatus>().unwrap(), s);
        }
        assert!(QueueStatus::Completed.is_terminal());
        assert!(!QueueStatus::Processing.is_terminal());
    }
}
