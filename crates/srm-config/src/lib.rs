// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Environment configuration for the SRM relay.
//!
//! Every ambient input — base URL, environment tag, network and
//! storage gates, encryption key, production flag — is read once into
//! an immutable [`RelayConfig`] at startup and injected downward; the
//! pipeline never reads the environment directly.

use srm_core::Environment;
use std::path::PathBuf;

/// Errors from configuration loading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is absent.
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    /// A variable is present but unparseable.
    #[error("invalid value for {name}: {reason}")]
    InvalidVar {
        /// Variable name.
        name: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The encryption key is not exactly 32 bytes of hex.
    #[error("encryption key must be 64 hex characters (32 bytes)")]
    InvalidEncryptionKey,
}

/// Immutable relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Regulator base URL.
    pub base_url: String,
    /// Deployment environment tag.
    pub environment: Environment,
    /// When false, submissions complete as dry runs.
    pub network_enabled: bool,
    /// Gate for durable receipt writes.
    pub allow_storage_writes: bool,
    /// AES-256 key for the secret store, as 64 hex characters.
    pub encryption_key_hex: String,
    /// Production gate: blocks the admin surface and forces
    /// network-disabled for it.
    pub production: bool,
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Directory for the `files` receipt target.
    pub receipts_dir: PathBuf,
    /// Receipt persistence target: `files`, `storage`, or `none`.
    pub receipt_target: ReceiptTarget,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

/// Receipt persistence target selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptTarget {
    /// JSON documents under the receipts directory.
    Files,
    /// The durable receipts collection (gated by the allow-writes
    /// flag).
    Storage,
    /// Discard receipts.
    None,
}

/// Variable names, in one place.
mod vars {
    pub const BASE_URL: &str = "SRM_BASE_URL";
    pub const ENVIRONMENT: &str = "SRM_ENVIRONMENT";
    pub const NETWORK_ENABLED: &str = "SRM_NETWORK_ENABLED";
    pub const ALLOW_STORAGE_WRITES: &str = "SRM_ALLOW_STORAGE_WRITES";
    pub const ENCRYPTION_KEY: &str = "SRM_ENCRYPTION_KEY";
    pub const PRODUCTION: &str = "SRM_PRODUCTION";
    pub const DB_PATH: &str = "SRM_DB_PATH";
    pub const RECEIPTS_DIR: &str = "SRM_RECEIPTS_DIR";
    pub const RECEIPT_TARGET: &str = "SRM_RECEIPT_TARGET";
    pub const TIMEOUT_SECS: &str = "SRM_TIMEOUT_SECS";
}

impl RelayConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or
    /// malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary lookup function (the testable seam).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or
    /// malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = lookup(vars::BASE_URL).ok_or(ConfigError::MissingVar(vars::BASE_URL))?;
        let environment: Environment = lookup(vars::ENVIRONMENT)
            .ok_or(ConfigError::MissingVar(vars::ENVIRONMENT))?
            .parse()
            .map_err(|reason| ConfigError::InvalidVar {
                name: vars::ENVIRONMENT,
                reason,
            })?;

        let encryption_key_hex =
            lookup(vars::ENCRYPTION_KEY).ok_or(ConfigError::MissingVar(vars::ENCRYPTION_KEY))?;
        let decoded =
            hex::decode(encryption_key_hex.trim()).map_err(|_| ConfigError::InvalidEncryptionKey)?;
        if decoded.len() != 32 {
            return Err(ConfigError::InvalidEncryptionKey);
        }

        let network_enabled = parse_flag(&lookup, vars::NETWORK_ENABLED, false)?;
        let allow_storage_writes = parse_flag(&lookup, vars::ALLOW_STORAGE_WRITES, false)?;
        let production = parse_flag(&lookup, vars::PRODUCTION, false)?;

        let db_path = lookup(vars::DB_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("srm-relay.db"));
        let receipts_dir = lookup(vars::RECEIPTS_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("receipts"));

        let receipt_target = match lookup(vars::RECEIPT_TARGET).as_deref() {
            None | Some("storage") => ReceiptTarget::Storage,
            Some("files") => ReceiptTarget::Files,
            Some("none") => ReceiptTarget::None,
            Some(other) => {
                return Err(ConfigError::InvalidVar {
                    name: vars::RECEIPT_TARGET,
                    reason: format!("'{other}' is not one of files, storage, none"),
                });
            }
        };

        let timeout_secs = match lookup(vars::TIMEOUT_SECS) {
            None => 30,
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidVar {
                name: vars::TIMEOUT_SECS,
                reason: format!("'{raw}' is not a number of seconds"),
            })?,
        };

        Ok(Self {
            base_url,
            environment,
            network_enabled,
            allow_storage_writes,
            encryption_key_hex: encryption_key_hex.trim().to_string(),
            production,
            db_path,
            receipts_dir,
            receipt_target,
            timeout_secs,
        })
    }

    /// Whether the admin surface (enqueue / consume-once / queue /
    /// audit-logs) may run: always blocked in production.
    #[must_use]
    pub fn admin_allowed(&self) -> bool {
        !self.production
    }

    /// The network flag as seen by the admin surface; the production
    /// gate forces dry runs there.
    #[must_use]
    pub fn effective_network_enabled(&self) -> bool {
        self.network_enabled && !self.production
    }
}

fn parse_flag(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidVar {
                name,
                reason: format!("'{other}' is not a boolean"),
            }),
        },
    }
}
