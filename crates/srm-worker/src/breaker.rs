// SPDX-License-Identifier: MIT OR Apache-2.0
//! Circuit-breaker gating and outcome recording.
//!
//! The breaker is tenant-scoped: the key is (environment, tenant,
//! operation), so one tenant's regulator trouble never pauses another
//! tenant's submissions.

use chrono::{DateTime, Utc};
use srm_core::{
    BREAKER_THRESHOLD, BreakerRecord, CircuitState, Environment, ErrorCode, Operation,
};
use srm_store::{Store, StoreError};

/// Whether an item may proceed past the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Gate {
    /// The breaker is closed (or a half-open trial is allowed).
    Proceed,
    /// The breaker is open and cooling down; leave the item pending.
    Hold,
}

/// Evaluate the breaker before claiming an item.
///
/// An open breaker whose cooldown has expired is atomically reset to
/// closed with zero failures — the half-open single trial: success
/// keeps it closed, another transient failure re-opens it.
pub(crate) async fn gate(
    store: &Store,
    environment: Environment,
    tenant_id: &str,
    operation: Operation,
    now: DateTime<Utc>,
) -> Result<Gate, StoreError> {
    let mut record = store.get_breaker(environment, tenant_id, operation, now).await?;
    match record.state {
        CircuitState::Closed | CircuitState::HalfOpen => Ok(Gate::Proceed),
        CircuitState::Open if record.is_holding(now) => Ok(Gate::Hold),
        CircuitState::Open => {
            record.state = CircuitState::Closed;
            record.consecutive_failures = 0;
            record.opened_at = None;
            record.updated_at = now;
            store.put_breaker(&record).await?;
            tracing::info!(
                tenant = tenant_id,
                operation = operation.as_str(),
                "breaker cooldown expired; allowing trial submission"
            );
            Ok(Gate::Proceed)
        }
    }
}

/// Fold one classified outcome into the breaker record.
///
/// Only transient unavailability moves the failure counter; reaching
/// the threshold opens the breaker. Non-retryable rejections leave the
/// breaker untouched.
pub(crate) async fn record_outcome(
    store: &Store,
    environment: Environment,
    tenant_id: &str,
    operation: Operation,
    code: ErrorCode,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let mut record = store.get_breaker(environment, tenant_id, operation, now).await?;
    match code {
        ErrorCode::Ok => {
            record.consecutive_failures = 0;
            record.state = CircuitState::Closed;
            record.opened_at = None;
        }
        ErrorCode::TempUnavailable => {
            record.consecutive_failures += 1;
            if record.consecutive_failures >= BREAKER_THRESHOLD {
                record.state = CircuitState::Open;
                record.opened_at = Some(now);
                tracing::warn!(
                    tenant = tenant_id,
                    operation = operation.as_str(),
                    failures = record.consecutive_failures,
                    "circuit breaker opened"
                );
            }
        }
        _ => return Ok(()),
    }
    record.updated_at = now;
    store.put_breaker(&record).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use srm_core::BREAKER_COOLDOWN_SECS;

    #[tokio::test]
    async fn five_transient_failures_open_the_breaker() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        for _ in 0..BREAKER_THRESHOLD {
            record_outcome(
                &store,
                Environment::Development,
                "t-1",
                Operation::Transaction,
                ErrorCode::TempUnavailable,
                now,
            )
            .await
            .unwrap();
        }
        let record = store
            .get_breaker(Environment::Development, "t-1", Operation::Transaction, now)
            .await
            .unwrap();
        assert_eq!(record.state, CircuitState::Open);

        assert_eq!(
            gate(&store, Environment::Development, "t-1", Operation::Transaction, now)
                .await
                .unwrap(),
            Gate::Hold
        );
    }

    #[tokio::test]
    async fn expired_cooldown_resets_for_a_trial() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        for _ in 0..BREAKER_THRESHOLD {
            record_outcome(
                &store,
                Environment::Development,
                "t-1",
                Operation::Transaction,
                ErrorCode::TempUnavailable,
                now,
            )
            .await
            .unwrap();
        }

        let later = now + Duration::seconds(BREAKER_COOLDOWN_SECS);
        assert_eq!(
            gate(&store, Environment::Development, "t-1", Operation::Transaction, later)
                .await
                .unwrap(),
            Gate::Proceed
        );
        let record = store
            .get_breaker(Environment::Development, "t-1", Operation::Transaction, later)
            .await
            .unwrap();
        assert_eq!(record.state, CircuitState::Closed);
        assert_eq!(record.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn rejections_do_not_move_the_counter() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        record_outcome(
            &store,
            Environment::Development,
            "t-1",
            Operation::Transaction,
            ErrorCode::InvalidSignature,
            now,
        )
        .await
        .unwrap();
        let record = store
            .get_breaker(Environment::Development, "t-1", Operation::Transaction, now)
            .await
            .unwrap();
        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(record.state, CircuitState::Closed);
    }
}
