// SPDX-License-Identifier: MIT OR Apache-2.0
//! Receipt collection: append-only, keyed by (tenant, entity).

use crate::queue::entity_from;
use crate::{Store, StoreError, is_unique_violation};
use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use srm_core::{Entity, Environment, PrintMode, Receipt};

const RECEIPT_COLUMNS: &str = "tenant_id, entity_kind, entity_id, previous_signature, \
     current_signature, canonical_hash, qr_data, print_mode, format, regulator_tx_id, \
     device_id, environment, software_id, software_version, transaction_at, metadata, \
     created_at";

fn receipt_from_row(row: &Row<'_>) -> rusqlite::Result<RawReceipt> {
    Ok(RawReceipt {
        tenant_id: row.get(0)?,
        entity_kind: row.get(1)?,
        entity_id: row.get(2)?,
        previous_signature: row.get(3)?,
        current_signature: row.get(4)?,
        canonical_hash: row.get(5)?,
        qr_data: row.get(6)?,
        print_mode: row.get(7)?,
        format: row.get(8)?,
        regulator_tx_id: row.get(9)?,
        device_id: row.get(10)?,
        environment: row.get(11)?,
        software_id: row.get(12)?,
        software_version: row.get(13)?,
        transaction_at: row.get(14)?,
        metadata: row.get(15)?,
        created_at: row.get(16)?,
    })
}

struct RawReceipt {
    tenant_id: String,
    entity_kind: String,
    entity_id: String,
    previous_signature: String,
    current_signature: String,
    canonical_hash: String,
    qr_data: String,
    print_mode: String,
    format: String,
    regulator_tx_id: Option<String>,
    device_id: String,
    environment: String,
    software_id: String,
    software_version: String,
    transaction_at: DateTime<Utc>,
    metadata: String,
    created_at: DateTime<Utc>,
}

impl RawReceipt {
    fn into_receipt(self) -> Result<Receipt, StoreError> {
        let entity = entity_from(&self.entity_kind, self.entity_id)?;
        let print_mode = match self.print_mode.as_str() {
            "paper" => PrintMode::Paper,
            "electronic" => PrintMode::Electronic,
            other => return Err(StoreError::Corrupt(format!("print mode '{other}'"))),
        };
        let environment: Environment = self.environment.parse().map_err(StoreError::Corrupt)?;
        let metadata = serde_json::from_str(&self.metadata)
            .map_err(|e| StoreError::Corrupt(format!("receipt metadata: {e}")))?;
        Ok(Receipt {
            tenant_id: self.tenant_id,
            entity,
            previous_signature: self.previous_signature,
            current_signature: self.current_signature,
            canonical_hash: self.canonical_hash,
            qr_data: self.qr_data,
            print_mode,
            format: self.format,
            regulator_tx_id: self.regulator_tx_id,
            device_id: self.device_id,
            environment,
            software_id: self.software_id,
            software_version: self.software_version,
            transaction_at: self.transaction_at,
            metadata,
            created_at: self.created_at,
        })
    }
}

impl Store {
    /// Append a receipt. The collection is append-only: a second
    /// insert for the same (tenant, entity) fails.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReceiptExists`] on a duplicate key.
    pub async fn insert_receipt(&self, receipt: &Receipt) -> Result<(), StoreError> {
        let receipt = receipt.clone();
        self.with_conn(move |conn| {
            let metadata = serde_json::to_string(&receipt.metadata)
                .map_err(|e| StoreError::Corrupt(format!("receipt metadata: {e}")))?;
            let outcome = conn.execute(
                &format!(
                    "INSERT INTO receipts ({RECEIPT_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, \
                         ?15, ?16, ?17)"
                ),
                params![
                    receipt.tenant_id,
                    receipt.entity.kind_label(),
                    receipt.entity.id(),
                    receipt.previous_signature,
                    receipt.current_signature,
                    receipt.canonical_hash,
                    receipt.qr_data,
                    receipt.print_mode.as_str(),
                    receipt.format,
                    receipt.regulator_tx_id,
                    receipt.device_id,
                    receipt.environment.as_str(),
                    receipt.software_id,
                    receipt.software_version,
                    receipt.transaction_at,
                    metadata,
                    receipt.created_at,
                ],
            );
            match outcome {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => {
                    Err(StoreError::ReceiptExists(receipt.entity.to_string()))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    /// Load the receipt for one entity, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on query failure.
    pub async fn get_receipt(
        &self,
        tenant_id: &str,
        entity: &Entity,
    ) -> Result<Option<Receipt>, StoreError> {
        let tenant = tenant_id.to_string();
        let kind = entity.kind_label();
        let entity_id = entity.id().to_string();
        self.with_conn(move |conn| {
            let raw = conn.query_row(
                &format!(
                    "SELECT {RECEIPT_COLUMNS} FROM receipts \
                     WHERE tenant_id = ?1 AND entity_kind = ?2 AND entity_id = ?3"
                ),
                params![tenant, kind, entity_id],
                receipt_from_row,
            );
            match raw {
                Ok(r) => Ok(Some(r.into_receipt()?)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    /// The `current_signature` of the most recent receipt for a
    /// (tenant, device), ordered by transaction timestamp — the
    /// predecessor link of the signature chain. `None` when the chain
    /// is empty.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on query failure.
    pub async fn latest_signature(
        &self,
        tenant_id: &str,
        device_id: &str,
    ) -> Result<Option<String>, StoreError> {
        let tenant = tenant_id.to_string();
        let device = device_id.to_string();
        self.with_conn(move |conn| {
            let signature = conn.query_row(
                "SELECT current_signature FROM receipts \
                 WHERE tenant_id = ?1 AND device_id = ?2 \
                 ORDER BY transaction_at DESC, created_at DESC \
                 LIMIT 1",
                params![tenant, device],
                |row| row.get::<_, String>(0),
            );
            match signature {
                Ok(s) => Ok(Some(s)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }
}
