// SPDX-License-Identifier: MIT OR Apache-2.0
//! ECDSA-P-256 transaction signing and certificate fingerprinting.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint as _;
use p256::pkcs8::DecodePrivateKey as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use srm_core::{ComplianceProfile, canonical_hash};

/// Errors from keypair loading and signing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignError {
    /// The private-key PEM could not be parsed as a P-256 key.
    #[error("private key PEM is not a valid P-256 key")]
    InvalidPrivateKey,

    /// The certificate PEM could not be parsed.
    #[error("certificate PEM is not a valid X.509 certificate")]
    InvalidCertificate,

    /// The private key does not correspond to the certificate's
    /// public key.
    #[error("private key does not match the certificate's public key")]
    KeyCertificateMismatch,
}

/// A device's signing key and certificate, held as typed values.
///
/// The signer consumes this value object, never a filesystem path;
/// callers obtain the PEMs from the profile resolver, which decrypts
/// the private key on the way out of storage.
#[derive(Clone)]
pub struct DeviceKeypair {
    signing_key: SigningKey,
    certificate_der: Vec<u8>,
}

impl std::fmt::Debug for DeviceKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKeypair")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

impl DeviceKeypair {
    /// Load a keypair from private-key and certificate PEMs.
    ///
    /// Accepts PKCS#8 (`PRIVATE KEY`) and SEC1 (`EC PRIVATE KEY`)
    /// encodings for the key.
    ///
    /// # Errors
    ///
    /// Returns [`SignError::InvalidPrivateKey`] or
    /// [`SignError::InvalidCertificate`] when either PEM fails to parse.
    pub fn from_pem(private_key_pem: &str, certificate_pem: &str) -> Result<Self, SignError> {
        let secret = p256::SecretKey::from_pkcs8_pem(private_key_pem)
            .or_else(|_| p256::SecretKey::from_sec1_pem(private_key_pem))
            .map_err(|_| SignError::InvalidPrivateKey)?;
        let (_, pem) = x509_parser::pem::parse_x509_pem(certificate_pem.as_bytes())
            .map_err(|_| SignError::InvalidCertificate)?;
        if pem.label != "CERTIFICATE" {
            return Err(SignError::InvalidCertificate);
        }
        Ok(Self {
            signing_key: SigningKey::from(secret),
            certificate_der: pem.contents,
        })
    }

    /// Load the keypair carried by a resolved compliance profile.
    ///
    /// # Errors
    ///
    /// Propagates the PEM parse failures of [`DeviceKeypair::from_pem`].
    pub fn from_profile(profile: &ComplianceProfile) -> Result<Self, SignError> {
        Self::from_pem(&profile.private_key_pem, &profile.certificate_pem)
    }

    /// SHA-256 fingerprint of the certificate DER, as 64 lowercase hex
    /// characters.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.certificate_der);
        format!("{:x}", hasher.finalize())
    }

    /// Check that the private key signs what the certificate verifies.
    ///
    /// # Errors
    ///
    /// Returns [`SignError::InvalidCertificate`] when the certificate
    /// DER cannot be re-parsed and [`SignError::KeyCertificateMismatch`]
    /// when the certificate's subject public key differs from the
    /// signing key's.
    pub fn verify_consistency(&self) -> Result<(), SignError> {
        let (_, cert) = x509_parser::parse_x509_certificate(&self.certificate_der)
            .map_err(|_| SignError::InvalidCertificate)?;
        let cert_spk = cert
            .tbs_certificate
            .subject_pki
            .subject_public_key
            .data
            .as_ref()
            .to_vec();
        let own = self.signing_key.verifying_key().to_encoded_point(false);
        if cert_spk != own.as_bytes() {
            return Err(SignError::KeyCertificateMismatch);
        }
        Ok(())
    }

    /// Sign an arbitrary message, returning the fixed 64-byte
    /// signature base64-encoded (88 characters).
    #[must_use]
    pub fn sign_base64(&self, message: &[u8]) -> String {
        let signature: Signature = self.signing_key.sign(message);
        BASE64.encode(signature.to_bytes())
    }
}

/// The signature envelope injected into a regulator payload.
///
/// Field widths are a wire contract: `current` is always 88 base64
/// characters, `hash` and `certificate_fingerprint` 64 lowercase hex,
/// and `previous` either 88 base64 characters or the all-`=` sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEnvelope {
    /// Signature of the predecessor receipt, or the sentinel.
    #[serde(rename = "previous")]
    pub previous_signature: String,
    /// Signature over this payload's canonical hash.
    #[serde(rename = "current")]
    pub current_signature: String,
    /// Canonical payload hash.
    pub hash: String,
    /// Device certificate fingerprint.
    #[serde(rename = "certificate_fingerprint")]
    pub fingerprint: String,
    /// Compact transaction timestamp the signature covers.
    pub timestamp: String,
}

/// Sign a transaction payload.
///
/// The payload must *not* yet contain its signature envelope. The
/// canonical hash of the payload is computed, the hash's ASCII bytes
/// are signed with SHA-256/ECDSA-P-256, and the envelope is returned
/// for injection at the payload's designated location.
#[must_use]
pub fn sign_transaction(
    keypair: &DeviceKeypair,
    payload: &Value,
    previous_signature: &str,
    compact_timestamp: &str,
) -> SignatureEnvelope {
    let hash = canonical_hash(payload);
    let current_signature = keypair.sign_base64(hash.as_bytes());
    SignatureEnvelope {
        previous_signature: previous_signature.to_string(),
        current_signature,
        hash,
        fingerprint: keypair.fingerprint(),
        timestamp: compact_timestamp.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use srm_core::SIGNATURE_SENTINEL;

    fn generated() -> (String, String) {
        let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let params = rcgen::CertificateParams::new(vec!["pos-device.local".into()]).unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        (key_pair.serialize_pem(), cert.pem())
    }

    #[test]
    fn signature_envelope_has_contract_widths() {
        let (key_pem, cert_pem) = generated();
        let keypair = DeviceKeypair::from_pem(&key_pem, &cert_pem).unwrap();
        let payload = json!({"reqTrans": {"mont": {"apresTax": "18.38"}}});
        let env = sign_transaction(&keypair, &payload, SIGNATURE_SENTINEL, "20260314150926");
        assert_eq!(env.current_signature.len(), 88);
        assert_eq!(env.hash.len(), 64);
        assert_eq!(env.fingerprint.len(), 64);
        assert_eq!(env.previous_signature, SIGNATURE_SENTINEL);
    }

    #[test]
    fn consistent_pair_verifies() {
        let (key_pem, cert_pem) = generated();
        let keypair = DeviceKeypair::from_pem(&key_pem, &cert_pem).unwrap();
        keypair.verify_consistency().unwrap();
    }

    #[test]
    fn mismatched_pair_is_rejected() {
        let (_, cert_pem) = generated();
        let (other_key, _) = generated();
        let keypair = DeviceKeypair::from_pem(&other_key, &cert_pem).unwrap();
        assert_eq!(
            keypair.verify_consistency().unwrap_err(),
            SignError::KeyCertificateMismatch
        );
    }

    #[test]
    fn fingerprint_is_stable() {
        let (key_pem, cert_pem) = generated();
        let a = DeviceKeypair::from_pem(&key_pem, &cert_pem).unwrap();
        let b = DeviceKeypair::from_pem(&key_pem, &cert_pem).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn hash_depends_only_on_payload_content() {
        let (key_pem, cert_pem) = generated();
        let keypair = DeviceKeypair::from_pem(&key_pem, &cert_pem).unwrap();
        let a = sign_transaction(
            &keypair,
            &json!({"b": 1, "a": 2}),
            SIGNATURE_SENTINEL,
            "20260314150926",
        );
        let b = sign_transaction(
            &keypair,
            &json!({"a": 2, "b": 1}),
            SIGNATURE_SENTINEL,
            "20260314150926",
        );
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn bad_pems_are_rejected() {
        let (key_pem, cert_pem) = generated();
        assert_eq!(
            DeviceKeypair::from_pem("garbage", &cert_pem).unwrap_err(),
            SignError::InvalidPrivateKey
        );
        assert_eq!(
            DeviceKeypair::from_pem(&key_pem, "garbage").unwrap_err(),
            SignError::InvalidCertificate
        );
    }
}
