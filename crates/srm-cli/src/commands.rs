// SPDX-License-Identifier: MIT OR Apache-2.0
//! Command implementations for the `srm` binary.

use anyhow::{Context, Result};
use serde_json::json;
use srm_client::{EnrollmentMode, EnrollmentOutcome, HttpRegulatorClient, RegulatorTransport};
use srm_config::{RelayConfig, ReceiptTarget};
use srm_core::OrderSnapshot;
use srm_crypto::SecretStore;
use srm_store::{ReceiptSink, Store, StoreError};
use srm_worker::{
    MemoryEntitySource, SystemClock, Worker, WorkerConfig,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::EXIT_RUNTIME_ERROR;

/// Directory of order-snapshot JSON files loaded into the in-memory
/// entity source (development bridging; the orders database itself is
/// an external collaborator).
const ORDERS_DIR_VAR: &str = "SRM_ORDERS_DIR";

/// Everything a command needs, assembled once.
pub struct AdminContext {
    pub store: Store,
    pub secrets: SecretStore,
    pub transport: Arc<dyn RegulatorTransport>,
    pub worker: Worker,
}

impl AdminContext {
    /// Build the relay collaborators from configuration.
    pub fn build(config: RelayConfig) -> Result<Self> {
        let secrets = SecretStore::from_hex(&config.encryption_key_hex)
            .context("loading encryption key")?;
        let store = Store::open(&config.db_path)
            .with_context(|| format!("opening database {}", config.db_path.display()))?;
        let transport: Arc<dyn RegulatorTransport> = Arc::new(
            HttpRegulatorClient::with_timeout(
                &config.base_url,
                Duration::from_secs(config.timeout_secs),
            )
            .context("building regulator client")?,
        );

        let source = Arc::new(MemoryEntitySource::new());
        if let Ok(dir) = std::env::var(ORDERS_DIR_VAR) {
            let loaded = load_orders(&source, &dir)
                .with_context(|| format!("loading order snapshots from {dir}"))?;
            tracing::info!(loaded, dir, "loaded order snapshots");
        }

        let receipt_sink = match config.receipt_target {
            ReceiptTarget::Files => ReceiptSink::Files {
                dir: config.receipts_dir.clone(),
            },
            ReceiptTarget::Storage => ReceiptSink::Storage,
            ReceiptTarget::None => ReceiptSink::None,
        };
        let worker = Worker::new(
            store.clone(),
            secrets.clone(),
            source,
            Arc::clone(&transport),
            Arc::new(SystemClock),
            WorkerConfig {
                environment: config.environment,
                base_url: config.base_url.clone(),
                network_enabled: config.effective_network_enabled(),
                allow_storage_writes: config.allow_storage_writes,
                receipt_sink,
            },
        );

        Ok(Self {
            store,
            secrets,
            transport,
            worker,
        })
    }
}

fn load_orders(source: &MemoryEntitySource, dir: &str) -> Result<usize> {
    let mut loaded = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let raw = std::fs::read_to_string(&path)?;
        let order: OrderSnapshot = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        source.insert_order(order);
        loaded += 1;
    }
    Ok(loaded)
}

fn print(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn enroll(
    ctx: &AdminContext,
    tenant: &str,
    branch: Option<&str>,
    device: Option<&str>,
    revoke: bool,
) -> Result<i32> {
    let profile = ctx
        .store
        .load_profile(&ctx.secrets, tenant, branch, device)
        .await
        .context("loading profile for enrollment")?;
    let mode = if revoke {
        EnrollmentMode::Revoke
    } else {
        EnrollmentMode::Issue
    };

    match srm_client::enroll(ctx.transport.as_ref(), &profile, mode).await? {
        EnrollmentOutcome::Enrolled {
            private_key_pem,
            certificate_pem,
            chain_pem,
        } => {
            let mut updated = profile;
            updated.private_key_pem = private_key_pem;
            updated.certificate_pem = certificate_pem;
            updated.certificate_chain_pem = chain_pem;
            updated.updated_at = chrono::Utc::now();
            ctx.store
                .save_profile(&ctx.secrets, &updated)
                .await
                .context("storing enrolled profile")?;
            print(&json!({
                "success": true,
                "device": updated.device_id,
                "message": "device enrolled; certificate stored",
            }))?;
        }
        EnrollmentOutcome::Revoked => {
            print(&json!({
                "success": true,
                "device": profile.device_id,
                "message": "certificate annulled",
            }))?;
        }
    }
    Ok(0)
}

pub async fn enqueue(
    ctx: &AdminContext,
    entity_id: &str,
    tenant: &str,
    closing: bool,
) -> Result<i32> {
    let outcome = if closing {
        ctx.worker.enqueue_closing(entity_id, tenant).await
    } else {
        ctx.worker.enqueue_order(entity_id, tenant).await
    };
    match outcome {
        Ok(item) => {
            print(&json!({
                "success": true,
                "queueId": item.id,
                "message": "queued for submission",
            }))?;
            Ok(0)
        }
        Err(srm_worker::WorkerError::Store(StoreError::AlreadyQueued { entity, tenant })) => {
            print(&json!({
                "success": false,
                "queueId": null,
                "message": format!("'{entity}' is already queued for tenant '{tenant}'"),
            }))?;
            Ok(EXIT_RUNTIME_ERROR)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn consume_once(ctx: &AdminContext, limit: u32) -> Result<i32> {
    let report = ctx.worker.consume_once(Some(limit)).await?;
    print(&serde_json::to_value(&report)?)?;
    Ok(if report.has_failures() {
        EXIT_RUNTIME_ERROR
    } else {
        0
    })
}

pub async fn queue_status(ctx: &AdminContext) -> Result<i32> {
    let counts = ctx.store.status_counts().await?;
    print(&serde_json::to_value(&counts)?)?;
    Ok(0)
}

pub async fn queue_reset(ctx: &AdminContext, queue_id: Uuid) -> Result<i32> {
    let reset = ctx
        .store
        .reset_to_pending(queue_id, chrono::Utc::now())
        .await?;
    print(&json!({
        "success": reset,
        "message": if reset {
            "item returned to pending"
        } else {
            "item is not in processing"
        },
    }))?;
    Ok(if reset { 0 } else { EXIT_RUNTIME_ERROR })
}

pub async fn audit_logs(ctx: &AdminContext, order: Option<&str>, limit: u32) -> Result<i32> {
    let entries = ctx.store.audit_logs(order, limit).await?;
    print(&serde_json::to_value(&entries)?)?;
    Ok(0)
}
