// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Key-material handling for the SRM relay: encryption of PEM secrets
//! at rest and ECDSA-P-256 transaction signing.
//!
//! The secret store wraps AES-256-GCM with a `iv:tag:ciphertext` hex
//! wire format; the signer consumes a typed [`DeviceKeypair`] (never a
//! filesystem path) and produces the fixed-width signature envelope
//! that chains receipts together.

mod secret;
mod signer;

pub use secret::{SecretError, SecretStore};
pub use signer::{DeviceKeypair, SignError, SignatureEnvelope, sign_transaction};
