// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Durable storage for the SRM relay.
//!
//! One SQLite database holds the five collections the relay depends
//! on: the submission queue, receipts, audit logs, circuit breakers,
//! and compliance profiles. The queue claim is a conditional update
//! (`pending → processing`), which makes ownership linearizable, and
//! the idempotency-key column carries a uniqueness constraint — the
//! storage-level line of defense against double submission.
//!
//! All methods take `&self`; the connection sits behind an async mutex
//! and each call holds it only for one short transaction.

mod audit;
mod breaker;
mod files;
mod profile;
mod queue;
mod receipt;

pub use files::{ReceiptDocument, ReceiptSink};
pub use queue::ClaimOutcome;

use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Errors from the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// A queue item id was not found.
    #[error("queue item {0} not found")]
    ItemNotFound(Uuid),

    /// The entity already has a live queue item for this tenant.
    #[error("entity '{entity}' is already queued for tenant '{tenant}'")]
    AlreadyQueued {
        /// Entity label (`order:<id>` / `closing:<id>`).
        entity: String,
        /// Tenant identifier.
        tenant: String,
    },

    /// The idempotency-key uniqueness constraint rejected a write.
    #[error("idempotency key already exists: {0}")]
    DuplicateIdempotencyKey(String),

    /// A receipt already exists for the entity (the store is
    /// append-only).
    #[error("receipt already exists for '{0}'")]
    ReceiptExists(String),

    /// Receipt writes to durable storage are disabled by configuration.
    #[error("receipt storage writes are not allowed by configuration")]
    WritesNotAllowed,

    /// Profile resolution or validation failure.
    #[error(transparent)]
    Profile(#[from] srm_core::ProfileError),

    /// Secret-store failure while decrypting or encrypting key material.
    #[error(transparent)]
    Secret(#[from] srm_crypto::SecretError),

    /// A stored value could not be interpreted.
    #[error("corrupt stored value: {0}")]
    Corrupt(String),

    /// Filesystem failure in the file receipt sink.
    #[error("receipt file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to the relay database.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open (creating if needed) the database at `path` and apply the
    /// schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] when the file cannot be opened or the
    /// schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (tests and dry runs).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] when the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) async fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().await;
        f(&mut conn)
    }
}

/// `true` when the error is SQLite's unique-constraint violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queue_items (
    id              TEXT PRIMARY KEY,
    tenant_id       TEXT NOT NULL,
    entity_kind     TEXT NOT NULL,
    entity_id       TEXT NOT NULL,
    idempotency_key TEXT NOT NULL UNIQUE,
    canonical_hash  TEXT,
    status          TEXT NOT NULL,
    retry_count     INTEGER NOT NULL DEFAULT 0,
    max_retries     INTEGER NOT NULL DEFAULT 10,
    scheduled_at    TEXT NOT NULL,
    next_retry_at   TEXT,
    started_at      TEXT,
    completed_at    TEXT,
    last_error_at   TEXT,
    response_code   TEXT,
    error_message   TEXT,
    regulator_tx_id TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_queue_status_scheduled
    ON queue_items (status, scheduled_at);
CREATE INDEX IF NOT EXISTS idx_queue_tenant_entity
    ON queue_items (tenant_id, entity_kind, entity_id);

CREATE TABLE IF NOT EXISTS receipts (
    tenant_id          TEXT NOT NULL,
    entity_kind        TEXT NOT NULL,
    entity_id          TEXT NOT NULL,
    previous_signature TEXT NOT NULL,
    current_signature  TEXT NOT NULL,
    canonical_hash     TEXT NOT NULL,
    qr_data            TEXT NOT NULL,
    print_mode         TEXT NOT NULL,
    format             TEXT NOT NULL,
    regulator_tx_id    TEXT,
    device_id          TEXT NOT NULL,
    environment        TEXT NOT NULL,
    software_id        TEXT NOT NULL,
    software_version   TEXT NOT NULL,
    transaction_at     TEXT NOT NULL,
    metadata           TEXT NOT NULL,
    created_at         TEXT NOT NULL,
    PRIMARY KEY (tenant_id, entity_kind, entity_id)
);
CREATE INDEX IF NOT EXISTS idx_receipts_device_ts
    ON receipts (tenant_id, device_id, transaction_at);

CREATE TABLE IF NOT EXISTS audit_logs (
    id                    TEXT PRIMARY KEY,
    tenant_id             TEXT NOT NULL,
    entity_kind           TEXT NOT NULL,
    entity_id             TEXT NOT NULL,
    operation             TEXT NOT NULL,
    method                TEXT NOT NULL,
    path                  TEXT NOT NULL,
    request_hash          TEXT NOT NULL,
    request_signature     TEXT NOT NULL,
    http_status           INTEGER NOT NULL,
    response_hash         TEXT NOT NULL,
    regulator_tx_id       TEXT,
    duration_ms           INTEGER NOT NULL,
    error_code            TEXT,
    error_message         TEXT,
    regulator_return_code TEXT,
    created_at            TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_entity
    ON audit_logs (entity_id, created_at);

CREATE TABLE IF NOT EXISTS circuit_breakers (
    environment          TEXT NOT NULL,
    tenant_id            TEXT NOT NULL,
    operation            TEXT NOT NULL,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    state                TEXT NOT NULL DEFAULT 'closed',
    opened_at            TEXT,
    updated_at           TEXT NOT NULL,
    PRIMARY KEY (environment, tenant_id, operation)
);

CREATE TABLE IF NOT EXISTS profiles (
    tenant_id          TEXT NOT NULL,
    branch_id          TEXT NOT NULL,
    device_id          TEXT NOT NULL,
    environment        TEXT NOT NULL,
    partner_id         TEXT NOT NULL,
    certificate_code   TEXT NOT NULL,
    software_id        TEXT NOT NULL,
    software_version   TEXT NOT NULL,
    protocol_version   TEXT NOT NULL,
    partner_version    TEXT NOT NULL,
    certification_case TEXT,
    authorization_code TEXT NOT NULL,
    private_key_enc    TEXT NOT NULL,
    certificate_pem    TEXT NOT NULL,
    certificate_chain  TEXT,
    gst_number         TEXT NOT NULL,
    qst_number         TEXT NOT NULL,
    is_active          INTEGER NOT NULL DEFAULT 1,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL,
    PRIMARY KEY (tenant_id, branch_id, device_id)
);
"#;
