// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared error types for the core domain.

/// Errors from parsing decimal monetary amounts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    /// The amount carries more than two fractional digits.
    #[error("amount '{0}' has more than two fractional digits")]
    TooManyDecimals(String),

    /// The amount is not a valid decimal number.
    #[error("invalid monetary amount '{0}'")]
    Invalid(String),
}

/// Errors from compliance-profile resolution and validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    /// No active profile exists for the requested triple.
    #[error("no active compliance profile for tenant '{tenant}' (branch: {branch:?}, device: {device:?})")]
    NotFound {
        /// Tenant identifier that was looked up.
        tenant: String,
        /// Branch identifier, when one was supplied.
        branch: Option<String>,
        /// Device identifier, when one was supplied.
        device: Option<String>,
    },

    /// The profile exists but fails validation.
    #[error("compliance profile invalid: {reason}")]
    Invalid {
        /// What failed validation.
        reason: String,
    },
}

/// Errors from compact-timestamp normalization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid compact timestamp '{0}' (expected YYYYMMDDHHMMSS)")]
pub struct TimestampError(pub String);
