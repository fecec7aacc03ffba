// SPDX-License-Identifier: MIT OR Apache-2.0
//! Queue collection: enqueue, claim, and state transitions.

use crate::{Store, StoreError, is_unique_violation};
use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use srm_core::{Entity, QueueItem, QueueStatus};
use std::collections::BTreeMap;
use uuid::Uuid;

const ITEM_COLUMNS: &str = "id, tenant_id, entity_kind, entity_id, idempotency_key, \
     canonical_hash, status, retry_count, max_retries, scheduled_at, next_retry_at, \
     started_at, completed_at, last_error_at, response_code, error_message, \
     regulator_tx_id, created_at, updated_at";

/// Result of attempting to claim a queue item.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The item transitioned `pending → processing` and is now owned
    /// by the caller.
    Claimed(Box<QueueItem>),
    /// Another worker owns the item; return without mutation.
    AlreadyProcessing,
    /// The item already completed; treat as success.
    AlreadyCompleted,
    /// The item is in a state that cannot be claimed.
    NotEligible(QueueStatus),
}

struct RawItem {
    id: String,
    tenant_id: String,
    entity_kind: String,
    entity_id: String,
    idempotency_key: String,
    canonical_hash: Option<String>,
    status: String,
    retry_count: u32,
    max_retries: u32,
    scheduled_at: DateTime<Utc>,
    next_retry_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    last_error_at: Option<DateTime<Utc>>,
    response_code: Option<String>,
    error_message: Option<String>,
    regulator_tx_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RawItem {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            entity_kind: row.get(2)?,
            entity_id: row.get(3)?,
            idempotency_key: row.get(4)?,
            canonical_hash: row.get(5)?,
            status: row.get(6)?,
            retry_count: row.get(7)?,
            max_retries: row.get(8)?,
            scheduled_at: row.get(9)?,
            next_retry_at: row.get(10)?,
            started_at: row.get(11)?,
            completed_at: row.get(12)?,
            last_error_at: row.get(13)?,
            response_code: row.get(14)?,
            error_message: row.get(15)?,
            regulator_tx_id: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }

    fn into_item(self) -> Result<QueueItem, StoreError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|_| StoreError::Corrupt(format!("queue id '{}'", self.id)))?;
        let entity = entity_from(&self.entity_kind, self.entity_id)?;
        let status: QueueStatus = self
            .status
            .parse()
            .map_err(StoreError::Corrupt)?;
        Ok(QueueItem {
            id,
            tenant_id: self.tenant_id,
            entity,
            idempotency_key: self.idempotency_key,
            canonical_hash: self.canonical_hash,
            status,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            scheduled_at: self.scheduled_at,
            next_retry_at: self.next_retry_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            last_error_at: self.last_error_at,
            response_code: self.response_code,
            error_message: self.error_message,
            regulator_tx_id: self.regulator_tx_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub(crate) fn entity_from(kind: &str, id: String) -> Result<Entity, StoreError> {
    match kind {
        "order" => Ok(Entity::Order(id)),
        "closing" => Ok(Entity::Closing(id)),
        other => Err(StoreError::Corrupt(format!("entity kind '{other}'"))),
    }
}

impl Store {
    /// Insert a fresh queue item.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyQueued`] when the (entity, tenant)
    /// pair already has an item that is pending, processing, or
    /// completed, and [`StoreError::DuplicateIdempotencyKey`] when the
    /// uniqueness constraint rejects the key.
    pub async fn enqueue(&self, item: &QueueItem) -> Result<(), StoreError> {
        let item = item.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let live: u32 = tx.query_row(
                "SELECT COUNT(*) FROM queue_items \
                 WHERE tenant_id = ?1 AND entity_kind = ?2 AND entity_id = ?3 \
                   AND status IN ('pending', 'processing', 'completed')",
                params![item.tenant_id, item.entity.kind_label(), item.entity.id()],
                |row| row.get(0),
            )?;
            if live > 0 {
                return Err(StoreError::AlreadyQueued {
                    entity: item.entity.to_string(),
                    tenant: item.tenant_id.clone(),
                });
            }
            let inserted = tx.execute(
                "INSERT INTO queue_items (id, tenant_id, entity_kind, entity_id, \
                     idempotency_key, canonical_hash, status, retry_count, max_retries, \
                     scheduled_at, next_retry_at, started_at, completed_at, last_error_at, \
                     response_code, error_message, regulator_tx_id, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
                     ?16, ?17, ?18, ?19)",
                params![
                    item.id.to_string(),
                    item.tenant_id,
                    item.entity.kind_label(),
                    item.entity.id(),
                    item.idempotency_key,
                    item.canonical_hash,
                    item.status.as_str(),
                    item.retry_count,
                    item.max_retries,
                    item.scheduled_at,
                    item.next_retry_at,
                    item.started_at,
                    item.completed_at,
                    item.last_error_at,
                    item.response_code,
                    item.error_message,
                    item.regulator_tx_id,
                    item.created_at,
                    item.updated_at,
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(StoreError::DuplicateIdempotencyKey(
                        item.idempotency_key.clone(),
                    ));
                }
                Err(e) => return Err(e.into()),
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Load a queue item by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ItemNotFound`] when no row exists.
    pub async fn get_item(&self, id: Uuid) -> Result<QueueItem, StoreError> {
        self.with_conn(move |conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {ITEM_COLUMNS} FROM queue_items WHERE id = ?1"),
                    params![id.to_string()],
                    RawItem::from_row,
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::ItemNotFound(id),
                    other => other.into(),
                })?;
            raw.into_item()
        })
        .await
    }

    /// Pending items eligible at `now`, oldest scheduled first.
    ///
    /// A retried item becomes eligible at its `next_retry_at`; a fresh
    /// item at its `scheduled_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on query failure.
    pub async fn eligible_items(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<QueueItem>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM queue_items \
                 WHERE status = 'pending' \
                   AND ((next_retry_at IS NULL AND scheduled_at <= ?1) \
                        OR (next_retry_at IS NOT NULL AND next_retry_at <= ?1)) \
                 ORDER BY scheduled_at ASC \
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![now, limit], RawItem::from_row)?;
            let mut items = Vec::new();
            for raw in rows {
                items.push(raw?.into_item()?);
            }
            Ok(items)
        })
        .await
    }

    /// Atomically claim an item (`pending → processing`).
    ///
    /// Idempotent re-entry per the worker contract: an item already in
    /// `processing` or `completed` is reported as such without
    /// mutation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ItemNotFound`] when the id does not exist.
    pub async fn claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<ClaimOutcome, StoreError> {
        let claimed = self
            .with_conn(move |conn| {
                let changed = conn.execute(
                    "UPDATE queue_items \
                     SET status = 'processing', started_at = ?2, updated_at = ?2 \
                     WHERE id = ?1 AND status = 'pending'",
                    params![id.to_string(), now],
                )?;
                Ok(changed == 1)
            })
            .await?;

        if claimed {
            return Ok(ClaimOutcome::Claimed(Box::new(self.get_item(id).await?)));
        }
        let current = self.get_item(id).await?;
        Ok(match current.status {
            QueueStatus::Processing => ClaimOutcome::AlreadyProcessing,
            QueueStatus::Completed => ClaimOutcome::AlreadyCompleted,
            other => ClaimOutcome::NotEligible(other),
        })
    }

    /// Record the content-derived idempotency key and canonical hash
    /// computed during processing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateIdempotencyKey`] when the key
    /// collides with another item — the at-most-once guard.
    pub async fn set_processing_artifacts(
        &self,
        id: Uuid,
        idempotency_key: &str,
        canonical_hash: &str,
    ) -> Result<(), StoreError> {
        let key = idempotency_key.to_string();
        let hash = canonical_hash.to_string();
        self.with_conn(move |conn| {
            let outcome = conn.execute(
                "UPDATE queue_items SET idempotency_key = ?2, canonical_hash = ?3 \
                 WHERE id = ?1",
                params![id.to_string(), key, hash],
            );
            match outcome {
                Ok(0) => Err(StoreError::ItemNotFound(id)),
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => {
                    Err(StoreError::DuplicateIdempotencyKey(key.clone()))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    /// Transition an item to `completed`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ItemNotFound`] when the id does not exist.
    pub async fn mark_completed(
        &self,
        id: Uuid,
        response_code: &str,
        regulator_tx_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let code = response_code.to_string();
        let tx_id = regulator_tx_id.map(str::to_string);
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE queue_items \
                 SET status = 'completed', completed_at = ?2, response_code = ?3, \
                     regulator_tx_id = ?4, error_message = NULL, updated_at = ?2 \
                 WHERE id = ?1",
                params![id.to_string(), now, code, tx_id],
            )?;
            if changed == 0 {
                return Err(StoreError::ItemNotFound(id));
            }
            Ok(())
        })
        .await
    }

    /// Return an item to `pending` with its retry count incremented
    /// and the next attempt scheduled.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ItemNotFound`] when the id does not exist.
    pub async fn mark_retry(
        &self,
        id: Uuid,
        response_code: &str,
        error_message: &str,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let code = response_code.to_string();
        let message = error_message.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE queue_items \
                 SET status = 'pending', retry_count = retry_count + 1, \
                     next_retry_at = ?2, response_code = ?3, error_message = ?4, \
                     last_error_at = ?5, started_at = NULL, updated_at = ?5 \
                 WHERE id = ?1",
                params![id.to_string(), next_retry_at, code, message, now],
            )?;
            if changed == 0 {
                return Err(StoreError::ItemNotFound(id));
            }
            Ok(())
        })
        .await
    }

    /// Terminate an item in `failed`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ItemNotFound`] when the id does not exist.
    pub async fn mark_failed(
        &self,
        id: Uuid,
        response_code: Option<&str>,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let code = response_code.map(str::to_string);
        let message = error_message.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE queue_items \
                 SET status = 'failed', response_code = ?2, error_message = ?3, \
                     last_error_at = ?4, updated_at = ?4 \
                 WHERE id = ?1",
                params![id.to_string(), code, message, now],
            )?;
            if changed == 0 {
                return Err(StoreError::ItemNotFound(id));
            }
            Ok(())
        })
        .await
    }

    /// Operator recovery: return a crashed `processing` item to
    /// `pending`. Returns `false` when the item was not in
    /// `processing`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on update failure.
    pub async fn reset_to_pending(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE queue_items \
                 SET status = 'pending', started_at = NULL, updated_at = ?2 \
                 WHERE id = ?1 AND status = 'processing'",
                params![id.to_string(), now],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    /// Aggregate queue counts per status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on query failure.
    pub async fn status_counts(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM queue_items GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            let mut counts = BTreeMap::new();
            for row in rows {
                let (status, count) = row?;
                counts.insert(status, count as u64);
            }
            Ok(counts)
        })
        .await
    }
}
