// SPDX-License-Identifier: MIT OR Apache-2.0
//! Audit log collection.

use crate::queue::entity_from;
use crate::{Store, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use srm_core::AuditEntry;
use uuid::Uuid;

const AUDIT_COLUMNS: &str = "id, tenant_id, entity_kind, entity_id, operation, method, \
     path, request_hash, request_signature, http_status, response_hash, regulator_tx_id, \
     duration_ms, error_code, error_message, regulator_return_code, created_at";

struct RawAudit {
    id: String,
    tenant_id: String,
    entity_kind: String,
    entity_id: String,
    operation: String,
    method: String,
    path: String,
    request_hash: String,
    request_signature: String,
    http_status: u16,
    response_hash: String,
    regulator_tx_id: Option<String>,
    duration_ms: u64,
    error_code: Option<String>,
    error_message: Option<String>,
    regulator_return_code: Option<String>,
    created_at: DateTime<Utc>,
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<RawAudit> {
    Ok(RawAudit {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        entity_kind: row.get(2)?,
        entity_id: row.get(3)?,
        operation: row.get(4)?,
        method: row.get(5)?,
        path: row.get(6)?,
        request_hash: row.get(7)?,
        request_signature: row.get(8)?,
        http_status: row.get(9)?,
        response_hash: row.get(10)?,
        regulator_tx_id: row.get(11)?,
        duration_ms: row.get::<_, i64>(12)? as u64,
        error_code: row.get(13)?,
        error_message: row.get(14)?,
        regulator_return_code: row.get(15)?,
        created_at: row.get(16)?,
    })
}

impl RawAudit {
    fn into_entry(self) -> Result<AuditEntry, StoreError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|_| StoreError::Corrupt(format!("audit id '{}'", self.id)))?;
        let entity = entity_from(&self.entity_kind, self.entity_id)?;
        Ok(AuditEntry {
            id,
            tenant_id: self.tenant_id,
            entity,
            operation: self.operation,
            method: self.method,
            path: self.path,
            request_hash: self.request_hash,
            request_signature: self.request_signature,
            http_status: self.http_status,
            response_hash: self.response_hash,
            regulator_tx_id: self.regulator_tx_id,
            duration_ms: self.duration_ms,
            error_code: self.error_code,
            error_message: self.error_message,
            regulator_return_code: self.regulator_return_code,
            created_at: self.created_at,
        })
    }
}

impl Store {
    /// Append one audit entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on insert failure.
    pub async fn insert_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let entry = entry.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO audit_logs ({AUDIT_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, \
                         ?15, ?16, ?17)"
                ),
                params![
                    entry.id.to_string(),
                    entry.tenant_id,
                    entry.entity.kind_label(),
                    entry.entity.id(),
                    entry.operation,
                    entry.method,
                    entry.path,
                    entry.request_hash,
                    entry.request_signature,
                    entry.http_status,
                    entry.response_hash,
                    entry.regulator_tx_id,
                    entry.duration_ms as i64,
                    entry.error_code,
                    entry.error_message,
                    entry.regulator_return_code,
                    entry.created_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Query audit entries, most recent first, optionally filtered by
    /// entity id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on query failure.
    pub async fn audit_logs(
        &self,
        entity_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let filter = entity_id.map(str::to_string);
        self.with_conn(move |conn| {
            let mut entries = Vec::new();
            match filter {
                Some(id) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {AUDIT_COLUMNS} FROM audit_logs \
                         WHERE entity_id = ?1 ORDER BY created_at DESC LIMIT ?2"
                    ))?;
                    let rows = stmt.query_map(params![id, limit], audit_from_row)?;
                    for raw in rows {
                        entries.push(raw?.into_entry()?);
                    }
                }
                None => {
                    let mut stmt = stmt_all(conn)?;
                    let rows = stmt.query_map(params![limit], audit_from_row)?;
                    for raw in rows {
                        entries.push(raw?.into_entry()?);
                    }
                }
            }
            Ok(entries)
        })
        .await
    }
}

fn stmt_all(conn: &rusqlite::Connection) -> rusqlite::Result<rusqlite::Statement<'_>> {
    conn.prepare(&format!(
        "SELECT {AUDIT_COLUMNS} FROM audit_logs ORDER BY created_at DESC LIMIT ?1"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use srm_core::Entity;

    fn entry(order: &str, status: u16) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            tenant_id: "t-1".into(),
            entity: Entity::Order(order.into()),
            operation: "transaction".into(),
            method: "POST".into(),
            path: "/transaction".into(),
            request_hash: "r".repeat(64),
            request_signature: "s".repeat(88),
            http_status: status,
            response_hash: "h".repeat(64),
            regulator_tx_id: None,
            duration_ms: 42,
            error_code: None,
            error_message: None,
            regulator_return_code: Some("OK".into()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_and_filtered_query() {
        let store = Store::open_in_memory().unwrap();
        store.insert_audit(&entry("ord-1", 200)).await.unwrap();
        store.insert_audit(&entry("ord-1", 503)).await.unwrap();
        store.insert_audit(&entry("ord-2", 200)).await.unwrap();

        let all = store.audit_logs(None, 50).await.unwrap();
        assert_eq!(all.len(), 3);

        let filtered = store.audit_logs(Some("ord-1"), 50).await.unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|e| e.entity.id() == "ord-1"));

        let limited = store.audit_logs(None, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
