// SPDX-License-Identifier: MIT OR Apache-2.0
//! Immutable order snapshots handed to the relay by the ordering system.

use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fiscal category of an order event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// A completed sale.
    Sale,
    /// A cancellation of a previously submitted sale (negated amounts).
    Cancellation,
    /// A correction replacing a previously submitted sale.
    Correction,
}

impl OrderKind {
    /// Regulator wire label for this category.
    #[must_use]
    pub fn wire_label(&self) -> &'static str {
        match self {
            Self::Sale => "ENR",
            Self::Cancellation => "ANN",
            Self::Correction => "MOD",
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sale => "sale",
            Self::Cancellation => "cancellation",
            Self::Correction => "correction",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OrderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sale" => Ok(Self::Sale),
            "cancellation" => Ok(Self::Cancellation),
            "correction" => Ok(Self::Correction),
            other => Err(format!("unknown order kind: {other}")),
        }
    }
}

/// How the order was paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Cash payment.
    Cash,
    /// Credit or debit card.
    Card,
    /// Any other settlement method.
    Other,
    /// No payment recorded (e.g. a cancellation).
    None,
}

impl PaymentMethod {
    /// Stable lowercase label used on the wire and in storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Card => "card",
            Self::Other => "other",
            Self::None => "none",
        }
    }
}

/// Where the order was consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// Consumed on premises.
    DineIn,
    /// Picked up by the customer.
    Takeout,
    /// Delivered to the customer.
    Delivery,
}

impl ServiceType {
    /// Stable lowercase label used on the wire and in storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DineIn => "dine_in",
            Self::Takeout => "takeout",
            Self::Delivery => "delivery",
        }
    }
}

/// A single itemised line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Menu-item description as printed on the receipt.
    pub description: String,
    /// Quantity sold.
    pub quantity: u32,
    /// Unit price.
    pub unit_price: Money,
    /// Line total (quantity × unit price, already computed upstream).
    pub line_total: Money,
}

/// An immutable snapshot of a finalized order.
///
/// The relay never computes prices or taxes — it receives the snapshot
/// fully totalled and treats every field as opaque business content to
/// be encoded, signed, and delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    /// Order identifier in the ordering system.
    pub order_id: String,
    /// Tenant (restaurant operator) identifier.
    pub tenant_id: String,
    /// Branch (location) identifier.
    pub branch_id: String,
    /// Point-of-sale device identifier.
    pub device_id: String,
    /// Fiscal category of the event.
    pub kind: OrderKind,
    /// When the order was finalized.
    pub timestamp: DateTime<Utc>,
    /// Itemised lines.
    pub lines: Vec<OrderLine>,
    /// Subtotal before taxes and tip.
    pub subtotal: Money,
    /// GST-equivalent tax component.
    pub gst: Money,
    /// QST-equivalent tax component.
    pub qst: Money,
    /// Tip amount.
    pub tip: Money,
    /// Grand total.
    pub total: Money,
    /// Settlement method.
    pub payment_method: PaymentMethod,
    /// Service type.
    pub service_type: ServiceType,
}

impl OrderSnapshot {
    /// Grand total in integer cents.
    #[must_use]
    pub fn total_cents(&self) -> i64 {
        self.total.cents()
    }

    /// Transaction timestamp in the regulator's compact `YYYYMMDDHHMMSS` form.
    #[must_use]
    pub fn compact_timestamp(&self) -> String {
        self.timestamp.format("%Y%m%d%H%M%S").to_string()
    }
}
