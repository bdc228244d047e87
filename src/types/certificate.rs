//! Member certificates and the material attached to signatures.
//!
//! A certificate binds a trust-framework member (identified by its directory
//! URL) to an Ed25519 public key, a set of role URLs, and a validity window,
//! and is itself signed by the framework's signing authority. Whether a
//! certificate chains to the configured root is decided by a
//! [`TrustResolver`](crate::trust::TrustResolver); this module only defines
//! the data and the primitive checks resolvers build on.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_digest_hex, to_canonical_bytes};

/// Error raised by certificate primitives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertificateError {
    /// The embedded public key is not a valid Ed25519 key encoding.
    #[error("certificate for `{subject}` carries a malformed public key")]
    MalformedPublicKey {
        /// Subject of the offending certificate.
        subject: String,
    },
    /// The issuer signature is not a valid Ed25519 signature encoding.
    #[error("certificate for `{subject}` carries a malformed issuer signature")]
    MalformedSignature {
        /// Subject of the offending certificate.
        subject: String,
    },
    /// The issuer signature does not verify under the given issuer key.
    #[error("issuer signature on certificate for `{subject}` does not verify")]
    IssuerSignatureInvalid {
        /// Subject of the offending certificate.
        subject: String,
    },
}

/// Identity fields of a certificate, signed by the issuing authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct TbsCertificate<'a> {
    application: &'a Option<String>,
    issuer: &'a str,
    not_after: &'a DateTime<Utc>,
    not_before: &'a DateTime<Utc>,
    public_key: &'a str,
    roles: &'a [String],
    serial: u64,
    subject: &'a str,
}

/// A trust-framework member certificate.
///
/// Immutable once issued. The `issuer_signature` covers the canonical bytes
/// of every other field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    /// Application registration URL, when the member declared one.
    pub application: Option<String>,
    /// Name of the issuing authority.
    pub issuer: String,
    /// End of the validity window (exclusive).
    pub not_after: DateTime<Utc>,
    /// Start of the validity window (inclusive).
    pub not_before: DateTime<Utc>,
    /// Hex-encoded Ed25519 public key of the member.
    pub public_key: String,
    /// Role URLs granted to the member under the framework.
    pub roles: Vec<String>,
    /// Serial number assigned by the issuer.
    pub serial: u64,
    /// Member directory URL identifying the organization.
    pub subject: String,
    /// Hex-encoded Ed25519 signature by the issuing authority.
    pub issuer_signature: String,
}

/// Inputs to certificate issuance.
#[derive(Debug, Clone)]
pub struct CertificateParams {
    /// Serial number assigned by the issuer.
    pub serial: u64,
    /// Member directory URL.
    pub subject: String,
    /// Name of the issuing authority.
    pub issuer: String,
    /// The member's public key.
    pub public_key: VerifyingKey,
    /// Role URLs granted to the member.
    pub roles: Vec<String>,
    /// Optional application registration URL.
    pub application: Option<String>,
    /// Start of the validity window.
    pub not_before: DateTime<Utc>,
    /// End of the validity window.
    pub not_after: DateTime<Utc>,
}

impl Certificate {
    /// Issue a certificate: sign the identity fields with the issuer's key.
    pub fn issue(params: CertificateParams, issuer_key: &SigningKey) -> Self {
        let public_key = hex::encode(params.public_key.as_bytes());
        let tbs = to_canonical_bytes(&TbsCertificate {
            application: &params.application,
            issuer: &params.issuer,
            not_after: &params.not_after,
            not_before: &params.not_before,
            public_key: &public_key,
            roles: &params.roles,
            serial: params.serial,
            subject: &params.subject,
        });
        let issuer_signature = hex::encode(issuer_key.sign(&tbs).to_bytes());
        Self {
            application: params.application,
            issuer: params.issuer,
            not_after: params.not_after,
            not_before: params.not_before,
            public_key,
            roles: params.roles,
            serial: params.serial,
            subject: params.subject,
            issuer_signature,
        }
    }

    /// Canonical bytes covered by the issuer signature.
    fn to_be_signed_bytes(&self) -> Vec<u8> {
        to_canonical_bytes(&TbsCertificate {
            application: &self.application,
            issuer: &self.issuer,
            not_after: &self.not_after,
            not_before: &self.not_before,
            public_key: &self.public_key,
            roles: &self.roles,
            serial: self.serial,
            subject: &self.subject,
        })
    }

    /// Decode the member's Ed25519 public key.
    pub fn verifying_key(&self) -> Result<VerifyingKey, CertificateError> {
        let malformed = || CertificateError::MalformedPublicKey {
            subject: self.subject.clone(),
        };
        let bytes: [u8; 32] = hex::decode(&self.public_key)
            .map_err(|_| malformed())?
            .try_into()
            .map_err(|_| malformed())?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| malformed())
    }

    /// Check the issuer signature under the given issuer public key.
    pub fn verify_issuer(&self, issuer_key: &VerifyingKey) -> Result<(), CertificateError> {
        let sig_bytes = hex::decode(&self.issuer_signature).map_err(|_| {
            CertificateError::MalformedSignature {
                subject: self.subject.clone(),
            }
        })?;
        let signature = Signature::from_slice(&sig_bytes).map_err(|_| {
            CertificateError::MalformedSignature {
                subject: self.subject.clone(),
            }
        })?;
        issuer_key
            .verify_strict(&self.to_be_signed_bytes(), &signature)
            .map_err(|_| CertificateError::IssuerSignatureInvalid {
                subject: self.subject.clone(),
            })
    }

    /// Whether the validity window covers the given instant.
    pub fn valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at < self.not_after
    }

    /// SHA-256 fingerprint of the full certificate, hex encoded.
    pub fn fingerprint(&self) -> String {
        canonical_digest_hex(self)
    }
}

/// Certificate material attached to a signature: either the certificate
/// itself (self-contained records) or a reference a trust resolver can look
/// up. The core never dereferences references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CertificateMaterial {
    /// Certificate carried inside the record.
    Embedded(Certificate),
    /// Opaque reference for a directory-backed resolver.
    Reference(String),
}

impl CertificateMaterial {
    /// Stable key identifying this material, for caching.
    pub fn cache_key(&self) -> String {
        match self {
            Self::Embedded(cert) => cert.fingerprint(),
            Self::Reference(reference) => reference.clone(),
        }
    }

    /// Best-effort signer name for diagnostics and graph labels.
    pub fn subject_hint(&self) -> &str {
        match self {
            Self::Embedded(cert) => &cert.subject,
            Self::Reference(reference) => reference,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    fn make_certificate(issuer_key: &SigningKey, member_key: &SigningKey) -> Certificate {
        let (not_before, not_after) = window();
        Certificate::issue(
            CertificateParams {
                serial: 6,
                subject: "https://directory.core.trust.ib1.org/member/237256".to_string(),
                issuer: "signing-issuer-ca".to_string(),
                public_key: member_key.verifying_key(),
                roles: vec![
                    "https://registry.core.trust.ib1.org/scheme/supply/role/energy-data-provider"
                        .to_string(),
                ],
                application: None,
                not_before,
                not_after,
            },
            issuer_key,
        )
    }

    #[test]
    fn test_issue_and_verify() {
        let issuer = make_key(1);
        let member = make_key(2);
        let cert = make_certificate(&issuer, &member);

        cert.verify_issuer(&issuer.verifying_key()).unwrap();
        assert_eq!(cert.verifying_key().unwrap(), member.verifying_key());
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let issuer = make_key(1);
        let other = make_key(3);
        let cert = make_certificate(&issuer, &make_key(2));

        let err = cert.verify_issuer(&other.verifying_key()).unwrap_err();
        assert!(matches!(err, CertificateError::IssuerSignatureInvalid { .. }));
    }

    #[test]
    fn test_tampered_subject_rejected() {
        let issuer = make_key(1);
        let mut cert = make_certificate(&issuer, &make_key(2));
        cert.subject = "https://directory.core.trust.ib1.org/member/999999".to_string();

        let err = cert.verify_issuer(&issuer.verifying_key()).unwrap_err();
        assert!(matches!(err, CertificateError::IssuerSignatureInvalid { .. }));
    }

    #[test]
    fn test_validity_window() {
        let cert = make_certificate(&make_key(1), &make_key(2));
        let (not_before, not_after) = window();

        assert!(cert.valid_at(not_before));
        assert!(cert.valid_at(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()));
        assert!(!cert.valid_at(not_after));
        assert!(!cert.valid_at(Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap()));
    }

    #[test]
    fn test_fingerprint_changes_on_tamper() {
        let cert = make_certificate(&make_key(1), &make_key(2));
        let mut tampered = cert.clone();
        tampered.serial = 7;
        assert_ne!(cert.fingerprint(), tampered.fingerprint());
    }

    #[test]
    fn test_material_round_trip() {
        let cert = make_certificate(&make_key(1), &make_key(2));
        let material = CertificateMaterial::Embedded(cert.clone());

        let encoded = serde_json::to_string(&material).unwrap();
        let decoded: CertificateMaterial = serde_json::from_str(&encoded).unwrap();
        assert_eq!(material, decoded);
        assert_eq!(material.cache_key(), cert.fingerprint());

        let reference =
            CertificateMaterial::Reference("https://directory.core.trust.ib1.org/member/1".into());
        assert_eq!(
            reference.subject_hint(),
            "https://directory.core.trust.ib1.org/member/1"
        );
    }
}
