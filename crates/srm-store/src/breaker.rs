// SPDX-License-Identifier: MIT OR Apache-2.0
//! Circuit-breaker collection, keyed by (environment, tenant,
//! operation).

use crate::{Store, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::params;
use srm_core::{BreakerRecord, CircuitState, Environment, Operation};

impl Store {
    /// Load the breaker record for a key, defaulting to a fresh closed
    /// record when none is stored yet. The durable row is the source
    /// of truth; callers must not cache across updates.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on query failure.
    pub async fn get_breaker(
        &self,
        environment: Environment,
        tenant_id: &str,
        operation: Operation,
        now: DateTime<Utc>,
    ) -> Result<BreakerRecord, StoreError> {
        let tenant = tenant_id.to_string();
        self.with_conn(move |conn| {
            let row = conn.query_row(
                "SELECT consecutive_failures, state, opened_at, updated_at \
                 FROM circuit_breakers \
                 WHERE environment = ?1 AND tenant_id = ?2 AND operation = ?3",
                params![environment.as_str(), tenant, operation.as_str()],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<DateTime<Utc>>>(2)?,
                        row.get::<_, DateTime<Utc>>(3)?,
                    ))
                },
            );
            match row {
                Ok((consecutive_failures, state, opened_at, updated_at)) => {
                    let state: CircuitState = state.parse().map_err(StoreError::Corrupt)?;
                    Ok(BreakerRecord {
                        environment,
                        tenant_id: tenant.clone(),
                        operation,
                        consecutive_failures,
                        state,
                        opened_at,
                        updated_at,
                    })
                }
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    Ok(BreakerRecord::closed(environment, tenant.clone(), operation, now))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    /// Upsert a breaker record (last-writer-wins).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on write failure.
    pub async fn put_breaker(&self, record: &BreakerRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO circuit_breakers \
                     (environment, tenant_id, operation, consecutive_failures, state, \
                      opened_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT (environment, tenant_id, operation) DO UPDATE SET \
                     consecutive_failures = excluded.consecutive_failures, \
                     state = excluded.state, \
                     opened_at = excluded.opened_at, \
                     updated_at = excluded.updated_at",
                params![
                    record.environment.as_str(),
                    record.tenant_id,
                    record.operation.as_str(),
                    record.consecutive_failures,
                    record.state.as_str(),
                    record.opened_at,
                    record.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
    }
}
