// SPDX-License-Identifier: MIT OR Apache-2.0
//! The seam to the ordering system.
//!
//! The relay never owns orders; it receives finalized snapshots
//! through this trait. The in-memory implementation backs tests and
//! dry runs.

use async_trait::async_trait;
use srm_core::{ClosingSnapshot, OrderSnapshot};
use std::collections::HashMap;
use std::sync::Mutex;

/// Read-only access to finalized business objects.
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// Fetch an order snapshot, if the ordering system knows it.
    async fn order(&self, tenant_id: &str, order_id: &str) -> Option<OrderSnapshot>;

    /// Fetch a closing snapshot, if the ordering system knows it.
    async fn closing(&self, tenant_id: &str, closing_id: &str) -> Option<ClosingSnapshot>;
}

/// In-memory [`EntitySource`].
#[derive(Debug, Default)]
pub struct MemoryEntitySource {
    orders: Mutex<HashMap<(String, String), OrderSnapshot>>,
    closings: Mutex<HashMap<(String, String), ClosingSnapshot>>,
}

impl MemoryEntitySource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an order snapshot.
    pub fn insert_order(&self, order: OrderSnapshot) {
        self.orders
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert((order.tenant_id.clone(), order.order_id.clone()), order);
    }

    /// Register a closing snapshot.
    pub fn insert_closing(&self, closing: ClosingSnapshot) {
        self.closings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(
                (closing.tenant_id.clone(), closing.closing_id.clone()),
                closing,
            );
    }
}

#[async_trait]
impl EntitySource for MemoryEntitySource {
    async fn order(&self, tenant_id: &str, order_id: &str) -> Option<OrderSnapshot> {
        self.orders
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&(tenant_id.to_string(), order_id.to_string()))
            .cloned()
    }

    async fn closing(&self, tenant_id: &str, closing_id: &str) -> Option<ClosingSnapshot> {
        self.closings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&(tenant_id.to_string(), closing_id.to_string()))
            .cloned()
    }
}
