// SPDX-License-Identifier: MIT OR Apache-2.0
//! Circuit-breaker behavior across tenants: open on repeated
//! transient failures, hold during cooldown, half-open trial, and
//! per-tenant isolation.

mod common;

use common::{relay, sale_order, seed_profile};
use srm_client::MockTransport;
use srm_core::{CircuitState, Environment, Operation, QueueStatus, RegulatorResponse};
use srm_worker::Clock;

fn unavailable() -> RegulatorResponse {
    RegulatorResponse::from_http(500, "upstream unavailable".into())
}

#[tokio::test]
async fn breaker_opens_holds_and_closes_after_cooldown() {
    let transport = MockTransport::acknowledging();
    for _ in 0..5 {
        transport.push(unavailable());
    }
    let relay = relay(transport, true);
    seed_profile(&relay, "t-a", "dev-1").await;
    let at = relay.clock.now();

    for i in 0..5 {
        let order_id = format!("a-{i}");
        relay.source.insert_order(sale_order("t-a", &order_id, at));
        relay.worker.enqueue_order(&order_id, "t-a").await.unwrap();
        let report = relay.worker.consume_once(Some(1)).await.unwrap();
        assert_eq!(report.pending, 1, "attempt {i} should retry");
    }
    assert_eq!(relay.transport.requests().len(), 5);

    let breaker = relay
        .store
        .get_breaker(Environment::Development, "t-a", Operation::Transaction, at)
        .await
        .unwrap();
    assert_eq!(breaker.state, CircuitState::Open);
    assert_eq!(breaker.consecutive_failures, 5);

    // The sixth item is skipped while the breaker holds: no claim, no
    // wire traffic.
    relay.source.insert_order(sale_order("t-a", "a-6", at));
    let sixth = relay.worker.enqueue_order("a-6", "t-a").await.unwrap();
    let report = relay.worker.consume_once(None).await.unwrap();
    assert_eq!(report.completed, 0);
    assert!(report.processed >= 1);
    assert_eq!(relay.transport.requests().len(), 5);
    let item = relay.store.get_item(sixth.id).await.unwrap();
    assert_eq!(item.status, QueueStatus::Pending);
    assert_eq!(item.retry_count, 0);

    // After the cooldown the next attempt goes through and, on
    // success, closes the breaker with the failure counter zeroed.
    relay.clock.advance_secs(61);
    let report = relay.worker.consume_once(Some(1)).await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(relay.transport.requests().len(), 6);

    let breaker = relay
        .store
        .get_breaker(
            Environment::Development,
            "t-a",
            Operation::Transaction,
            relay.clock.now(),
        )
        .await
        .unwrap();
    assert_eq!(breaker.state, CircuitState::Closed);
    assert_eq!(breaker.consecutive_failures, 0);
}

#[tokio::test]
async fn one_tenants_open_breaker_does_not_pause_another() {
    let transport = MockTransport::acknowledging();
    for _ in 0..5 {
        transport.push(unavailable());
    }
    let relay = relay(transport, true);
    seed_profile(&relay, "t-a", "dev-1").await;
    seed_profile(&relay, "t-b", "dev-1").await;
    let at = relay.clock.now();

    for i in 0..5 {
        let order_id = format!("a-{i}");
        relay.source.insert_order(sale_order("t-a", &order_id, at));
        relay.worker.enqueue_order(&order_id, "t-a").await.unwrap();
        relay.worker.consume_once(Some(1)).await.unwrap();
    }

    // Tenant A is paused; tenant B sails through in the same batch.
    relay.source.insert_order(sale_order("t-a", "a-6", at));
    relay.source.insert_order(sale_order("t-b", "b-1", at));
    let a6 = relay.worker.enqueue_order("a-6", "t-a").await.unwrap();
    let b1 = relay.worker.enqueue_order("b-1", "t-b").await.unwrap();

    relay.worker.consume_once(None).await.unwrap();
    assert_eq!(
        relay.store.get_item(a6.id).await.unwrap().status,
        QueueStatus::Pending
    );
    assert_eq!(
        relay.store.get_item(b1.id).await.unwrap().status,
        QueueStatus::Completed
    );

    let b_breaker = relay
        .store
        .get_breaker(Environment::Development, "t-b", Operation::Transaction, at)
        .await
        .unwrap();
    assert_eq!(b_breaker.state, CircuitState::Closed);
}
