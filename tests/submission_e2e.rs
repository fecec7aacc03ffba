// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end submission scenarios: sale, cancellation chain,
//! correction divergence, duplicate rejection, dry runs, and the
//! concurrency bound.

mod common;

use chrono::Duration;
use common::{relay, sale_order, seed_profile, order_with};
use srm_client::MockTransport;
use srm_worker::Clock;
use srm_core::{Entity, OrderKind, QueueItem, QueueStatus};
use srm_store::StoreError;

#[tokio::test]
async fn basic_sale_completes_with_receipt_and_audit() {
    let relay = relay(MockTransport::acknowledging(), true);
    seed_profile(&relay, "t-1", "dev-1").await;
    let at = relay.clock.now();
    relay.source.insert_order(sale_order("t-1", "ord-1", at));

    let queued = relay.worker.enqueue_order("ord-1", "t-1").await.unwrap();
    let report = relay.worker.consume_once(None).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 0);

    let item = relay.store.get_item(queued.id).await.unwrap();
    assert_eq!(item.status, QueueStatus::Completed);
    assert_eq!(item.response_code.as_deref(), Some("OK"));
    assert_eq!(item.regulator_tx_id.as_deref(), Some("PSI-1"));
    assert_eq!(item.canonical_hash.as_ref().map(String::len), Some(64));
    assert_eq!(item.idempotency_key.len(), 64);

    let receipt = relay
        .store
        .get_receipt("t-1", &Entity::Order("ord-1".into()))
        .await
        .unwrap()
        .expect("receipt written");
    assert_eq!(receipt.current_signature.len(), 88);
    assert_eq!(receipt.canonical_hash.len(), 64);
    assert!(receipt.qr_data.len() <= 2048);
    assert_eq!(receipt.regulator_tx_id.as_deref(), Some("PSI-1"));
    assert_eq!(receipt.previous_signature, srm_core::SIGNATURE_SENTINEL);

    let audits = relay.store.audit_logs(Some("ord-1"), 50).await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].error_code, None);
    assert_eq!(audits[0].regulator_return_code.as_deref(), Some("OK"));
    assert_eq!(audits[0].http_status, 200);
    assert_eq!(audits[0].request_signature.len(), 88);

    // The wire saw exactly the canonical body with the idempotency key.
    let requests = relay.transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/transaction");
    assert_eq!(requests[0].idempotency_key.as_deref(), Some(item.idempotency_key.as_str()));
    assert!(requests[0].had_identity);
    let wire: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(wire["reqTrans"]["mont"]["apresTax"], 1838);
    assert_eq!(srm_core::canonical(&wire), requests[0].body);
}

#[tokio::test]
async fn cancellation_chains_to_the_sale_signature() {
    let relay = relay(MockTransport::acknowledging(), true);
    seed_profile(&relay, "t-1", "dev-1").await;
    let at = relay.clock.now();
    relay.source.insert_order(sale_order("t-1", "ord-1", at));
    relay.worker.enqueue_order("ord-1", "t-1").await.unwrap();
    relay.worker.consume_once(None).await.unwrap();

    let sale = relay
        .store
        .get_receipt("t-1", &Entity::Order("ord-1".into()))
        .await
        .unwrap()
        .unwrap();

    // Negated amounts, later timestamp, same device.
    relay.source.insert_order(order_with(
        "t-1",
        "ord-1-ann",
        OrderKind::Cancellation,
        at + Duration::minutes(10),
        "-15.99",
        "-0.80",
        "-1.59",
        "-18.38",
        "-15.99",
    ));
    relay.worker.enqueue_order("ord-1-ann", "t-1").await.unwrap();
    let report = relay.worker.consume_once(None).await.unwrap();
    assert_eq!(report.completed, 1);

    let cancellation = relay
        .store
        .get_receipt("t-1", &Entity::Order("ord-1-ann".into()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cancellation.previous_signature, sale.current_signature);
    assert_ne!(cancellation.current_signature, sale.current_signature);
}

#[tokio::test]
async fn correction_chains_but_hashes_diverge() {
    let relay = relay(MockTransport::acknowledging(), true);
    seed_profile(&relay, "t-1", "dev-1").await;
    let at = relay.clock.now();
    relay.source.insert_order(order_with(
        "t-1", "ord-2", OrderKind::Sale, at, "30.00", "1.50", "2.99", "34.49", "30.00",
    ));
    relay.worker.enqueue_order("ord-2", "t-1").await.unwrap();
    relay.worker.consume_once(None).await.unwrap();
    let sale = relay
        .store
        .get_receipt("t-1", &Entity::Order("ord-2".into()))
        .await
        .unwrap()
        .unwrap();

    relay.source.insert_order(order_with(
        "t-1",
        "ord-2-mod",
        OrderKind::Correction,
        at + Duration::minutes(5),
        "32.00",
        "1.60",
        "3.19",
        "36.79",
        "32.00",
    ));
    relay.worker.enqueue_order("ord-2-mod", "t-1").await.unwrap();
    relay.worker.consume_once(None).await.unwrap();

    let correction = relay
        .store
        .get_receipt("t-1", &Entity::Order("ord-2-mod".into()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(correction.previous_signature, sale.current_signature);
    assert_ne!(correction.canonical_hash, sale.canonical_hash);
}

#[tokio::test]
async fn duplicate_idempotency_key_cannot_complete_twice() {
    let relay = relay(MockTransport::acknowledging(), true);
    seed_profile(&relay, "t-1", "dev-1").await;
    let at = relay.clock.now();
    relay.source.insert_order(sale_order("t-1", "ord-1", at));
    let first = relay.worker.enqueue_order("ord-1", "t-1").await.unwrap();
    relay.worker.consume_once(None).await.unwrap();
    let committed = relay.store.get_item(first.id).await.unwrap();
    assert_eq!(committed.status, QueueStatus::Completed);

    // Manually forge a second item bearing the committed key.
    let mut forged = QueueItem::new("t-1", Entity::Order("ord-other".into()), at);
    forged.idempotency_key = committed.idempotency_key.clone();
    let err = relay.store.enqueue(&forged).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateIdempotencyKey(_)));

    let counts = relay.store.status_counts().await.unwrap();
    assert_eq!(counts.get("completed"), Some(&1));
}

#[tokio::test]
async fn network_disabled_completes_as_dry_run() {
    let relay = relay(MockTransport::acknowledging(), false);
    seed_profile(&relay, "t-1", "dev-1").await;
    relay
        .source
        .insert_order(sale_order("t-1", "ord-1", relay.clock.now()));
    let queued = relay.worker.enqueue_order("ord-1", "t-1").await.unwrap();
    let report = relay.worker.consume_once(None).await.unwrap();
    assert_eq!(report.completed, 1);

    let item = relay.store.get_item(queued.id).await.unwrap();
    assert_eq!(item.status, QueueStatus::Completed);
    assert_eq!(item.response_code.as_deref(), Some("NETWORK_DISABLED"));
    assert!(relay.transport.requests().is_empty());
    assert!(
        relay
            .store
            .get_receipt("t-1", &Entity::Order("ord-1".into()))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn missing_business_object_fails_non_retryably() {
    let relay = relay(MockTransport::acknowledging(), true);
    seed_profile(&relay, "t-1", "dev-1").await;
    let queued = relay.worker.enqueue_order("ghost", "t-1").await.unwrap();
    let report = relay.worker.consume_once(None).await.unwrap();
    assert_eq!(report.failed, 1);
    let item = relay.store.get_item(queued.id).await.unwrap();
    assert_eq!(item.status, QueueStatus::Failed);
    assert_eq!(item.retry_count, 0);
    assert!(relay.transport.requests().is_empty());
}

#[tokio::test]
async fn closing_rides_the_same_queue_to_the_closing_path() {
    let relay = relay(MockTransport::acknowledging(), true);
    seed_profile(&relay, "t-1", "dev-1").await;
    let at = relay.clock.now();
    relay.source.insert_closing(srm_core::ClosingSnapshot {
        closing_id: "fer-1".into(),
        tenant_id: "t-1".into(),
        branch_id: "b-1".into(),
        device_id: "dev-1".into(),
        timestamp: at,
        transaction_count: 42,
        gross_total: "1843.07".parse().unwrap(),
        gst: "80.12".parse().unwrap(),
        qst: "159.84".parse().unwrap(),
    });

    let queued = relay.worker.enqueue_closing("fer-1", "t-1").await.unwrap();
    let report = relay.worker.consume_once(None).await.unwrap();
    assert_eq!(report.completed, 1);

    let item = relay.store.get_item(queued.id).await.unwrap();
    assert_eq!(item.status, QueueStatus::Completed);
    assert_eq!(item.regulator_tx_id.as_deref(), Some("PSI-1"));

    let requests = relay.transport.requests();
    assert_eq!(requests[0].path, "/closing");
    let wire: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(wire["reqFer"]["nbTrans"], 42);
    assert!(wire["reqFer"]["signa"]["current"].as_str().unwrap().len() == 88);

    let receipt = relay
        .store
        .get_receipt("t-1", &Entity::Closing("fer-1".into()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(receipt.previous_signature, srm_core::SIGNATURE_SENTINEL);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn outbound_concurrency_never_exceeds_five() {
    let relay = relay(
        MockTransport::acknowledging().with_delay(std::time::Duration::from_millis(100)),
        true,
    );
    seed_profile(&relay, "t-1", "dev-1").await;
    let at = relay.clock.now();
    for i in 0..8 {
        let order_id = format!("ord-{i}");
        relay.source.insert_order(sale_order("t-1", &order_id, at));
        relay.worker.enqueue_order(&order_id, "t-1").await.unwrap();
    }

    let report = relay.worker.consume_once(None).await.unwrap();
    assert_eq!(report.processed, 8);
    assert_eq!(report.completed, 8);
    let peak = relay.transport.peak_in_flight();
    assert!(peak <= 5, "peak in-flight was {peak}");
    assert!(peak >= 2, "expected real fanout, saw {peak}");
}
