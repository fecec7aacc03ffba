// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! The queue worker: the orchestration heart of the SRM relay.
//!
//! One [`Worker::consume_once`] invocation claims up to a batch of
//! eligible queue items and drives each through the submission
//! pipeline — resolve profile, chain the previous signature, sign,
//! POST over mutual TLS, classify, audit, update the tenant circuit
//! breaker, and transition the item. At most [`MAX_IN_FLIGHT`] items
//! run concurrently; per-item failures are data in the report, never
//! control flow.
//!
//! Signature chaining under concurrency: when two items for the same
//! (tenant, device) are eligible at once, both may read the same
//! previous signature — the first receipt written wins and the second
//! carries a stale `previous`. The worker does not serialize devices;
//! callers wanting strict per-device chains enqueue one item per
//! device at a time (the per-entity enqueue uniqueness rule is the
//! hook for that).

mod breaker;
mod clock;
mod payload;
mod source;

pub use clock::{Clock, ManualClock, SystemClock};
pub use payload::{closing_payload, transaction_payload, with_envelope};
pub use source::{EntitySource, MemoryEntitySource};

use chrono::Duration;
use serde::Serialize;
use sha2::{Digest, Sha256};
use srm_client::{
    ClientIdentity, OutboundRequest, RegulatorTransport, RequestHeaders, transaction_headers,
};
use srm_core::{
    AuditEntry, ClosingSnapshot, Entity, Environment, OrderSnapshot, PrintMode, QueueItem,
    QueueStatus, Receipt, SIGNATURE_SENTINEL, backoff_ms, build_qr, canonical, classify,
    exhausted_message, regulator_tx_id, sanitize_message,
};
use srm_crypto::{DeviceKeypair, SecretStore, sign_transaction};
use srm_store::{ClaimOutcome, ReceiptDocument, ReceiptSink, Store, StoreError};
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Maximum queue items processed concurrently by one invocation.
pub const MAX_IN_FLIGHT: usize = 5;

/// Default batch size for one invocation.
pub const DEFAULT_BATCH_LIMIT: u32 = 20;

/// Upper bound on the batch size.
pub const MAX_BATCH_LIMIT: u32 = 100;

/// Response code recorded for dry-run completions.
pub const NETWORK_DISABLED_CODE: &str = "NETWORK_DISABLED";

/// Errors surfaced by worker entry points (per-item failures are
/// reported as data, not errors).
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Storage failure outside any single item's pipeline.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Immutable invocation configuration, injected at the top; the
/// pipeline never reaches for ambient state.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Deployment environment (also the breaker key's first component).
    pub environment: Environment,
    /// Regulator base URL (also used for QR assembly).
    pub base_url: String,
    /// When false, items complete as dry runs without touching the
    /// network.
    pub network_enabled: bool,
    /// Gate for durable receipt writes.
    pub allow_storage_writes: bool,
    /// Where acknowledged receipts are persisted.
    pub receipt_sink: ReceiptSink,
}

/// Outcome of one queue item within a worker invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    /// Queue item id.
    pub queue_id: Uuid,
    /// Tenant the item belongs to.
    pub tenant_id: String,
    /// The order or closing delivered.
    pub entity: Entity,
    /// Item status after this invocation.
    pub status: QueueStatus,
    /// Response code recorded on the item, when any.
    pub response_code: Option<String>,
    /// Operator-facing message, when any.
    pub message: Option<String>,
    /// Regulator transaction id, when acknowledged.
    pub regulator_tx_id: Option<String>,
}

/// Aggregate result of one [`Worker::consume_once`] invocation.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    /// Number of items examined.
    pub processed: usize,
    /// Items that reached `completed`.
    pub completed: usize,
    /// Items left pending (retry scheduled, breaker hold, or lost
    /// claim race).
    pub pending: usize,
    /// Items that terminated in `failed`.
    pub failed: usize,
    /// Per-item outcomes.
    pub items: Vec<ItemReport>,
}

impl WorkerReport {
    /// `true` when any item failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// A terminal pipeline failure (non-retryable by construction).
struct PipelineFailure {
    code: Option<String>,
    message: String,
}

impl From<StoreError> for PipelineFailure {
    fn from(e: StoreError) -> Self {
        Self {
            code: None,
            message: e.to_string(),
        }
    }
}

/// The order-or-closing view the pipeline operates on after dispatch.
enum Business {
    Order(OrderSnapshot),
    Closing(ClosingSnapshot),
}

impl Business {
    fn branch_id(&self) -> &str {
        match self {
            Self::Order(o) => &o.branch_id,
            Self::Closing(c) => &c.branch_id,
        }
    }

    fn device_id(&self) -> &str {
        match self {
            Self::Order(o) => &o.device_id,
            Self::Closing(c) => &c.device_id,
        }
    }

    fn compact_timestamp(&self) -> String {
        match self {
            Self::Order(o) => o.compact_timestamp(),
            Self::Closing(c) => c.compact_timestamp(),
        }
    }

    fn timestamp(&self) -> chrono::DateTime<chrono::Utc> {
        match self {
            Self::Order(o) => o.timestamp,
            Self::Closing(c) => c.timestamp,
        }
    }

    fn total_cents(&self) -> i64 {
        match self {
            Self::Order(o) => o.total_cents(),
            Self::Closing(c) => c.total_cents(),
        }
    }

    fn kind_label(&self) -> &'static str {
        match self {
            Self::Order(o) => o.kind.wire_label(),
            Self::Closing(_) => "FER",
        }
    }
}

/// The queue worker.
pub struct Worker {
    store: Store,
    secrets: SecretStore,
    source: Arc<dyn EntitySource>,
    transport: Arc<dyn RegulatorTransport>,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
}

impl Worker {
    /// Assemble a worker from its collaborators.
    #[must_use]
    pub fn new(
        store: Store,
        secrets: SecretStore,
        source: Arc<dyn EntitySource>,
        transport: Arc<dyn RegulatorTransport>,
        clock: Arc<dyn Clock>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            secrets,
            source,
            transport,
            clock,
            config,
        }
    }

    /// Queue an order for submission.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyQueued`] (wrapped) when the order
    /// already has a live queue item for this tenant.
    pub async fn enqueue_order(
        &self,
        order_id: &str,
        tenant_id: &str,
    ) -> Result<QueueItem, WorkerError> {
        self.enqueue(tenant_id, Entity::Order(order_id.to_string()))
            .await
    }

    /// Queue an end-of-day closing for submission.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyQueued`] (wrapped) when the closing
    /// already has a live queue item for this tenant.
    pub async fn enqueue_closing(
        &self,
        closing_id: &str,
        tenant_id: &str,
    ) -> Result<QueueItem, WorkerError> {
        self.enqueue(tenant_id, Entity::Closing(closing_id.to_string()))
            .await
    }

    async fn enqueue(&self, tenant_id: &str, entity: Entity) -> Result<QueueItem, WorkerError> {
        let item = QueueItem::new(tenant_id, entity, self.clock.now());
        self.store.enqueue(&item).await?;
        tracing::info!(queue_id = %item.id, entity = %item.entity, tenant = tenant_id, "enqueued");
        Ok(item)
    }

    /// Consume up to `limit` eligible items (clamped to
    /// 1..=[`MAX_BATCH_LIMIT`], default [`DEFAULT_BATCH_LIMIT`]),
    /// processing at most [`MAX_IN_FLIGHT`] concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Store`] only for failures outside any
    /// single item; per-item failures land in the report.
    pub async fn consume_once(&self, limit: Option<u32>) -> Result<WorkerReport, WorkerError> {
        let limit = limit.unwrap_or(DEFAULT_BATCH_LIMIT).clamp(1, MAX_BATCH_LIMIT);
        let now = self.clock.now();
        let eligible = self.store.eligible_items(now, limit).await?;
        tracing::debug!(eligible = eligible.len(), limit, "consuming queue batch");

        let semaphore = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
        let tasks = eligible.into_iter().map(|item| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.ok();
                self.process_one(item).await
            }
        });
        let items = futures::future::join_all(tasks).await;

        let completed = items
            .iter()
            .filter(|i| i.status == QueueStatus::Completed)
            .count();
        let failed = items
            .iter()
            .filter(|i| i.status == QueueStatus::Failed)
            .count();
        let pending = items.len() - completed - failed;
        Ok(WorkerReport {
            processed: items.len(),
            completed,
            pending,
            failed,
            items,
        })
    }

    /// Drive one item: breaker gate, claim, then the pipeline.
    async fn process_one(&self, item: QueueItem) -> ItemReport {
        let now = self.clock.now();
        let operation = item.entity.operation();

        match breaker::gate(
            &self.store,
            self.config.environment,
            &item.tenant_id,
            operation,
            now,
        )
        .await
        {
            Ok(breaker::Gate::Proceed) => {}
            Ok(breaker::Gate::Hold) => {
                tracing::debug!(queue_id = %item.id, tenant = %item.tenant_id, "breaker open; skipping");
                return self.report(&item, QueueStatus::Pending, None, Some("circuit open; submission paused".into()), None);
            }
            Err(e) => {
                tracing::error!(queue_id = %item.id, error = %e, "breaker read failed");
                return self.report(&item, item.status, None, Some(e.to_string()), None);
            }
        }

        let claimed = match self.store.claim(item.id, now).await {
            Ok(ClaimOutcome::Claimed(claimed)) => *claimed,
            Ok(ClaimOutcome::AlreadyCompleted) => {
                return self.report(
                    &item,
                    QueueStatus::Completed,
                    item.response_code.clone(),
                    None,
                    item.regulator_tx_id.clone(),
                );
            }
            Ok(ClaimOutcome::AlreadyProcessing) => {
                return self.report(&item, QueueStatus::Processing, None, Some("owned by another worker".into()), None);
            }
            Ok(ClaimOutcome::NotEligible(status)) => {
                return self.report(&item, status, item.response_code.clone(), None, None);
            }
            Err(e) => {
                tracing::error!(queue_id = %item.id, error = %e, "claim failed");
                return self.report(&item, item.status, None, Some(e.to_string()), None);
            }
        };

        match self.run_pipeline(&claimed).await {
            Ok(report) => report,
            Err(failure) => {
                let message = sanitize_message(&failure.message);
                tracing::warn!(queue_id = %claimed.id, code = ?failure.code, %message, "item failed");
                if let Err(e) = self
                    .store
                    .mark_failed(claimed.id, failure.code.as_deref(), &message, self.clock.now())
                    .await
                {
                    tracing::error!(queue_id = %claimed.id, error = %e, "failed to record failure");
                }
                self.report(&claimed, QueueStatus::Failed, failure.code, Some(message), None)
            }
        }
    }

    /// Steps 2–13 of the per-item pipeline, on a claimed item.
    async fn run_pipeline(&self, item: &QueueItem) -> Result<ItemReport, PipelineFailure> {
        // Step 2: fetch the business object.
        let business = match &item.entity {
            Entity::Order(id) => self
                .source
                .order(&item.tenant_id, id)
                .await
                .map(Business::Order),
            Entity::Closing(id) => self
                .source
                .closing(&item.tenant_id, id)
                .await
                .map(Business::Closing),
        }
        .ok_or_else(|| PipelineFailure {
            code: Some("ENTITY_NOT_FOUND".into()),
            message: format!("{} does not exist", item.entity),
        })?;

        // Step 3: resolve the compliance profile.
        let profile = self
            .store
            .resolve_profile(
                &self.secrets,
                &item.tenant_id,
                Some(business.branch_id()),
                Some(business.device_id()),
            )
            .await
            .map_err(|e| PipelineFailure {
                code: Some("PROFILE".into()),
                message: e.to_string(),
            })?;

        // Step 4: previous signature for the (tenant, device) chain.
        let previous = self
            .store
            .latest_signature(&item.tenant_id, &profile.device_id)
            .await?
            .unwrap_or_else(|| SIGNATURE_SENTINEL.to_string());

        // Steps 5–6: build, sign, inject the envelope.
        let payload = match &business {
            Business::Order(order) => transaction_payload(order, &profile),
            Business::Closing(closing) => closing_payload(closing, &profile),
        };
        let keypair = DeviceKeypair::from_profile(&profile).map_err(|e| PipelineFailure {
            code: Some("KEY_MATERIAL".into()),
            message: e.to_string(),
        })?;
        let compact_ts = business.compact_timestamp();
        let envelope = sign_transaction(&keypair, &payload, &previous, &compact_ts);
        let signed = with_envelope(payload, &envelope);
        let canonical_body = canonical(&signed);

        // Step 7: content-derived idempotency key.
        let idempotency_key = idempotency_key(
            self.config.environment,
            &item.tenant_id,
            item.entity.id(),
            &compact_ts,
            &envelope.current_signature,
            business.total_cents(),
        );
        self.store
            .set_processing_artifacts(item.id, &idempotency_key, &envelope.hash)
            .await
            .map_err(|e| match e {
                StoreError::DuplicateIdempotencyKey(key) => PipelineFailure {
                    code: Some("DUPLICATE".into()),
                    message: format!("idempotency key '{key}' already committed"),
                },
                other => other.into(),
            })?;

        // Step 8: dry run when networking is disabled.
        if !self.config.network_enabled {
            self.store
                .mark_completed(item.id, NETWORK_DISABLED_CODE, None, self.clock.now())
                .await?;
            tracing::info!(queue_id = %item.id, "network disabled; completed as dry run");
            return Ok(self.report(
                item,
                QueueStatus::Completed,
                Some(NETWORK_DISABLED_CODE.into()),
                None,
                None,
            ));
        }

        // Step 9: POST over mutual TLS.
        let operation = item.entity.operation();
        let headers = transaction_headers(&profile);
        let identity = ClientIdentity {
            private_key_pem: profile.private_key_pem.clone(),
            certificate_pem: profile.certificate_pem.clone(),
        };
        let started = std::time::Instant::now();
        let response = self
            .transport
            .post(OutboundRequest {
                path: operation.path(),
                body: &canonical_body,
                headers: &headers,
                idempotency_key: Some(&idempotency_key),
                identity: Some(&identity),
            })
            .await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        // Step 10: classify.
        let classified = classify(&response);
        let regulator_tx = response.body.as_ref().and_then(regulator_tx_id);

        // Step 11: audit.
        let audit_now = self.clock.now();
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            tenant_id: item.tenant_id.clone(),
            entity: item.entity.clone(),
            operation: operation.as_str().to_string(),
            method: "POST".to_string(),
            path: operation.path().to_string(),
            request_hash: sha256_hex(canonical_body.as_bytes()),
            request_signature: envelope.current_signature.clone(),
            http_status: classified.http_status,
            response_hash: sha256_hex(response.raw_body.as_bytes()),
            regulator_tx_id: regulator_tx.clone(),
            duration_ms,
            error_code: (!classified.is_ok()).then(|| classified.code.as_str().to_string()),
            error_message: classified.raw_message.clone(),
            regulator_return_code: if classified.is_ok() {
                Some("OK".to_string())
            } else {
                classified.raw_code.clone()
            },
            created_at: audit_now,
        };
        self.store.insert_audit(&entry).await?;

        // Step 12: fold the outcome into the tenant breaker.
        breaker::record_outcome(
            &self.store,
            self.config.environment,
            &item.tenant_id,
            operation,
            classified.code,
            audit_now,
        )
        .await?;

        // Steps 12–13: state transition, and the receipt on success.
        let now = self.clock.now();
        if classified.is_ok() {
            self.store
                .mark_completed(item.id, "OK", regulator_tx.as_deref(), now)
                .await?;
            let receipt = Receipt {
                tenant_id: item.tenant_id.clone(),
                entity: item.entity.clone(),
                previous_signature: previous,
                current_signature: envelope.current_signature.clone(),
                canonical_hash: envelope.hash.clone(),
                qr_data: build_qr(
                    &self.config.base_url,
                    regulator_tx.as_deref(),
                    &compact_ts,
                    business.total_cents(),
                    &envelope.hash,
                    &envelope.current_signature,
                ),
                print_mode: PrintMode::Paper,
                format: "json".to_string(),
                regulator_tx_id: regulator_tx.clone(),
                device_id: profile.device_id.clone(),
                environment: profile.environment,
                software_id: profile.software_id.clone(),
                software_version: profile.software_version.clone(),
                transaction_at: business.timestamp(),
                metadata: serde_json::json!({
                    "operation": operation.as_str(),
                    "type": business.kind_label(),
                }),
                created_at: now,
            };
            let document = ReceiptDocument {
                headers: collect_headers(&headers),
                canonical_body,
            };
            match self
                .config
                .receipt_sink
                .persist(
                    &self.store,
                    self.config.allow_storage_writes,
                    &receipt,
                    &document,
                )
                .await
            {
                Ok(_) => {}
                Err(StoreError::ReceiptExists(entity)) => {
                    tracing::warn!(%entity, "receipt already persisted; store is append-only");
                }
                Err(e) => return Err(e.into()),
            }
            tracing::info!(queue_id = %item.id, tx = ?regulator_tx, "submission acknowledged");
            return Ok(self.report(
                item,
                QueueStatus::Completed,
                Some("OK".into()),
                None,
                regulator_tx,
            ));
        }

        if classified.retryable {
            if item.retries_exhausted() {
                let message = exhausted_message(item.retry_count + 1);
                self.store
                    .mark_failed(item.id, Some(classified.code.as_str()), &message, now)
                    .await?;
                tracing::warn!(queue_id = %item.id, retries = item.retry_count, "retry budget exhausted");
                return Ok(self.report(
                    item,
                    QueueStatus::Failed,
                    Some(classified.code.as_str().into()),
                    Some(message),
                    None,
                ));
            }
            let delay_ms = backoff_ms(item.retry_count);
            let next_retry_at = now + Duration::milliseconds(i64::try_from(delay_ms).unwrap_or(i64::MAX));
            let message = classified.user_message();
            self.store
                .mark_retry(item.id, classified.code.as_str(), &message, next_retry_at, now)
                .await?;
            tracing::info!(
                queue_id = %item.id,
                retry = item.retry_count + 1,
                delay_ms,
                code = classified.code.as_str(),
                "retry scheduled"
            );
            return Ok(self.report(
                item,
                QueueStatus::Pending,
                Some(classified.code.as_str().into()),
                Some(message),
                None,
            ));
        }

        let message = classified.user_message();
        self.store
            .mark_failed(item.id, Some(classified.code.as_str()), &message, now)
            .await?;
        tracing::warn!(queue_id = %item.id, code = classified.code.as_str(), "submission rejected");
        Ok(self.report(
            item,
            QueueStatus::Failed,
            Some(classified.code.as_str().into()),
            Some(message),
            None,
        ))
    }

    fn report(
        &self,
        item: &QueueItem,
        status: QueueStatus,
        response_code: Option<String>,
        message: Option<String>,
        regulator_tx_id: Option<String>,
    ) -> ItemReport {
        ItemReport {
            queue_id: item.id,
            tenant_id: item.tenant_id.clone(),
            entity: item.entity.clone(),
            status,
            response_code,
            message,
            regulator_tx_id,
        }
    }
}

/// `SHA-256(env ∥ tenant ∥ entity ∥ timestamp ∥ signature ∥ cents)`
/// joined with `|`, hex-encoded — the content-derived idempotency key.
fn idempotency_key(
    environment: Environment,
    tenant_id: &str,
    entity_id: &str,
    compact_timestamp: &str,
    current_signature: &str,
    total_cents: i64,
) -> String {
    let input = format!(
        "{}|{tenant_id}|{entity_id}|{compact_timestamp}|{current_signature}|{total_cents}",
        environment.as_str()
    );
    sha256_hex(input.as_bytes())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn collect_headers(headers: &RequestHeaders) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_is_64_hex_and_content_sensitive() {
        let a = idempotency_key(
            Environment::Development,
            "t-1",
            "ord-1",
            "20260314150926",
            &"s".repeat(88),
            1838,
        );
        assert_eq!(a.len(), 64);
        let b = idempotency_key(
            Environment::Development,
            "t-1",
            "ord-1",
            "20260314150926",
            &"s".repeat(88),
            1839,
        );
        assert_ne!(a, b);
    }
}
