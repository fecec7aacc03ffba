// SPDX-License-Identifier: MIT OR Apache-2.0
//! Receipt persistence targets.
//!
//! The worker hands every acknowledged receipt to a [`ReceiptSink`]:
//! `storage` appends to the durable receipts collection (gated by the
//! allow-writes flag), `files` drops a JSON document into a local
//! directory, and `none` discards.

use crate::{Store, StoreError};
use serde::Serialize;
use serde_json::json;
use srm_core::Receipt;
use std::path::{Path, PathBuf};

/// Where receipts are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptSink {
    /// Append a JSON document under a local receipts directory.
    Files {
        /// Directory receiving `<entity>-<timestamp>.json` files.
        dir: PathBuf,
    },
    /// Insert into the durable receipts collection.
    Storage,
    /// Discard.
    None,
}

/// The request context captured alongside a receipt in file documents.
#[derive(Debug, Clone, Serialize)]
pub struct ReceiptDocument {
    /// Headers sent with the acknowledged request.
    pub headers: Vec<(String, String)>,
    /// Exact canonical body that was signed and transmitted.
    pub canonical_body: String,
}

impl ReceiptSink {
    /// Persist a receipt to this sink.
    ///
    /// Returns the file path for the `files` target, `Ok(None)`
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WritesNotAllowed`] when the `storage`
    /// target is selected without `allow_storage_writes`,
    /// [`StoreError::ReceiptExists`] on append-only violations, and
    /// I/O failures for the `files` target.
    pub async fn persist(
        &self,
        store: &Store,
        allow_storage_writes: bool,
        receipt: &Receipt,
        document: &ReceiptDocument,
    ) -> Result<Option<PathBuf>, StoreError> {
        match self {
            Self::None => Ok(None),
            Self::Storage => {
                if !allow_storage_writes {
                    return Err(StoreError::WritesNotAllowed);
                }
                store.insert_receipt(receipt).await?;
                Ok(None)
            }
            Self::Files { dir } => {
                let path = write_receipt_file(dir, receipt, document)?;
                Ok(Some(path))
            }
        }
    }
}

fn write_receipt_file(
    dir: &Path,
    receipt: &Receipt,
    document: &ReceiptDocument,
) -> Result<PathBuf, StoreError> {
    std::fs::create_dir_all(dir)?;
    let compact = receipt.transaction_at.format("%Y%m%d%H%M%S");
    let path = dir.join(format!("{}-{}.json", receipt.entity.id(), compact));

    let headers: serde_json::Map<String, serde_json::Value> = document
        .headers
        .iter()
        .map(|(n, v)| (n.clone(), json!(v)))
        .collect();
    let doc = json!({
        "meta": {
            "tenant_id": receipt.tenant_id,
            "entity": receipt.entity,
            "device_id": receipt.device_id,
            "environment": receipt.environment,
            "software_id": receipt.software_id,
            "software_version": receipt.software_version,
            "regulator_tx_id": receipt.regulator_tx_id,
            "print_mode": receipt.print_mode,
            "format": receipt.format,
            "timestamp": receipt.transaction_at.format("%Y-%m-%dT%H:%M:%S.000Z").to_string(),
        },
        "signatures": {
            "previous": receipt.previous_signature,
            "current": receipt.current_signature,
            "hash": receipt.canonical_hash,
        },
        "qr": receipt.qr_data,
        "headers": headers,
        "canonical": document.canonical_body,
    });
    let rendered = serde_json::to_string_pretty(&doc)
        .map_err(|e| StoreError::Corrupt(format!("receipt document: {e}")))?;
    std::fs::write(&path, rendered)?;
    tracing::debug!(path = %path.display(), "receipt document written");
    Ok(path)
}
