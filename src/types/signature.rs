//! Signature records: one party's attestation over a set of steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::certificate::CertificateMaterial;
use super::step::StepId;

/// One party's cryptographic attestation over a contiguous set of steps.
///
/// Immutable once created. The Ed25519 signature covers the canonical bytes
/// of the steps named by `covered_step_ids`, in that exact order, together
/// with the record's trust framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRecord {
    /// The exact step IDs signed in this round, in covering order.
    pub covered_step_ids: Vec<StepId>,
    /// Hex-encoded Ed25519 signature over the covered canonical bytes.
    pub signature: String,
    /// Certificate material identifying the signing party.
    pub certificate: CertificateMaterial,
    /// When the signature was created.
    pub created_at: DateTime<Utc>,
}

impl SignatureRecord {
    /// Whether this signature covers the given step.
    pub fn covers(&self, id: &StepId) -> bool {
        self.covered_step_ids.contains(id)
    }
}

/// Outcome of verifying one signature, for audit reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureReport {
    /// Subject (member directory URL) of the resolved certificate.
    pub signer: String,
    /// Fingerprint of the resolved certificate.
    pub certificate_fingerprint: String,
    /// Role URLs granted to the signer.
    pub roles: Vec<String>,
    /// The step IDs the signature covers.
    pub covered_step_ids: Vec<StepId>,
    /// When the signature was created.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_covers() {
        let sig = SignatureRecord {
            covered_step_ids: vec![StepId::new("aa"), StepId::new("bb")],
            signature: "00".repeat(64),
            certificate: CertificateMaterial::Reference(
                "https://directory.core.trust.ib1.org/member/1".to_string(),
            ),
            created_at: Utc.with_ymd_and_hms(2024, 10, 21, 9, 9, 10).unwrap(),
        };
        assert!(sig.covers(&StepId::new("aa")));
        assert!(!sig.covers(&StepId::new("cc")));
    }

    #[test]
    fn test_wire_round_trip() {
        let sig = SignatureRecord {
            covered_step_ids: vec![StepId::new("aa")],
            signature: "11".repeat(64),
            certificate: CertificateMaterial::Reference(
                "https://directory.core.trust.ib1.org/member/2".to_string(),
            ),
            created_at: Utc.with_ymd_and_hms(2024, 10, 21, 9, 9, 10).unwrap(),
        };
        let encoded = serde_json::to_string(&sig).unwrap();
        let decoded: SignatureRecord = serde_json::from_str(&encoded).unwrap();
        assert_eq!(sig, decoded);
    }
}
