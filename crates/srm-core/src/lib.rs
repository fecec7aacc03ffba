// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Core domain model for the SRM relay.
//!
//! This crate defines the value objects shared by every other relay
//! crate — order snapshots, compliance profiles, queue items, receipts,
//! and audit entries — together with the canonical JSON encoder, the
//! wire-response classifier, and the retry backoff schedule.
//!
//! Nothing in here performs I/O. Persistence lives in `srm-store`,
//! networking in `srm-client`, and orchestration in `srm-worker`.

mod audit;
mod breaker;
mod canonical;
mod classify;
mod closing;
mod error;
mod money;
mod order;
mod profile;
mod queue;
mod receipt;

pub use audit::AuditEntry;
pub use breaker::{BREAKER_COOLDOWN_SECS, BREAKER_THRESHOLD, BreakerRecord, CircuitState};
pub use canonical::{canonical, canonical_hash};
pub use classify::{
    BACKOFF_BASE_SECS, BACKOFF_MAX_SECS, ClassifiedError, ErrorCode, RegulatorResponse,
    TransportError, WireError, backoff_ms, backoff_window, classify, exhausted_message,
    regulator_tx_id, sanitize_message, wire_errors,
};
pub use closing::ClosingSnapshot;
pub use error::{MoneyError, ProfileError, TimestampError};
pub use money::Money;
pub use order::{OrderKind, OrderLine, OrderSnapshot, PaymentMethod, ServiceType};
pub use profile::{ComplianceProfile, Environment};
pub use queue::{DEFAULT_MAX_RETRIES, Entity, Operation, QueueItem, QueueStatus};
pub use receipt::{
    HASH_LEN, PrintMode, QR_MAX_LEN, Receipt, SIGNATURE_LEN, SIGNATURE_SENTINEL, build_qr,
    normalize_compact_timestamp,
};
