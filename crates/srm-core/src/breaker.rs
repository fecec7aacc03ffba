// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tenant-scoped circuit-breaker records.

use crate::profile::Environment;
use crate::queue::Operation;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Consecutive transient failures required to open a breaker.
pub const BREAKER_THRESHOLD: u32 = 5;

/// Seconds an open breaker holds before a half-open trial.
pub const BREAKER_COOLDOWN_SECS: i64 = 60;

/// Breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Submissions flow normally.
    Closed,
    /// Submissions for the key are paused until the cooldown expires.
    Open,
    /// One trial submission is allowed through.
    HalfOpen,
}

impl CircuitState {
    /// Stable lowercase label used in storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            "half_open" => Ok(Self::HalfOpen),
            other => Err(format!("unknown circuit state: {other}")),
        }
    }
}

/// One durable breaker record, keyed by (environment, tenant,
/// operation).
///
/// Tenant isolation is the point of the key: opening one tenant's
/// breaker pauses only that tenant's items in that environment.
/// Updates are last-writer-wins; transient over-counting is acceptable
/// because the threshold is a lower-bound trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerRecord {
    /// Environment component of the key.
    pub environment: Environment,
    /// Tenant component of the key.
    pub tenant_id: String,
    /// Operation component of the key.
    pub operation: Operation,
    /// Consecutive transient failures observed.
    pub consecutive_failures: u32,
    /// Current state.
    pub state: CircuitState,
    /// When the breaker last opened.
    pub opened_at: Option<DateTime<Utc>>,
    /// Last update.
    pub updated_at: DateTime<Utc>,
}

impl BreakerRecord {
    /// A fresh closed record for a key.
    #[must_use]
    pub fn closed(
        environment: Environment,
        tenant_id: impl Into<String>,
        operation: Operation,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            environment,
            tenant_id: tenant_id.into(),
            operation,
            consecutive_failures: 0,
            state: CircuitState::Closed,
            opened_at: None,
            updated_at: now,
        }
    }

    /// `true` while the breaker is open and its cooldown has not yet
    /// expired at `now`.
    #[must_use]
    pub fn is_holding(&self, now: DateTime<Utc>) -> bool {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                now - opened_at < Duration::seconds(BREAKER_COOLDOWN_SECS)
            }
            (CircuitState::Open, None) => true,
            _ => false,
        }
    }
}
