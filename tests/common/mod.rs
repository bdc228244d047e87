//! Shared fixtures: a test signing authority, member signers, and step
//! builders mirroring a metered-supply data chain.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use ed25519_dalek::{SigningKey, VerifyingKey};
use provenance_kernel::{Certificate, CertificateParams, InMemorySigner, StepId};
use rand::rngs::OsRng;
use serde_json::{json, Value};

pub const TRUST_FRAMEWORK: &str = "https://registry.core.trust.ib1.org/trust-framework";
pub const SCHEME: &str = "https://registry.core.trust.ib1.org/scheme/supply";

/// The framework's signing authority: issues member certificates.
pub struct TestAuthority {
    signing_key: SigningKey,
}

/// One framework member: a signer plus its issued certificate.
pub struct Member {
    pub signer: InMemorySigner,
    pub certificate: Certificate,
}

impl TestAuthority {
    pub fn new() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn root(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Issue a member certificate and build a signer around it.
    pub fn issue(&self, serial: u64, member_id: u32, role: &str) -> Member {
        self.issue_with_window(
            serial,
            member_id,
            role,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2124, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    /// Issue a member certificate with an explicit validity window.
    pub fn issue_with_window(
        &self,
        serial: u64,
        member_id: u32,
        role: &str,
        not_before: chrono::DateTime<Utc>,
        not_after: chrono::DateTime<Utc>,
    ) -> Member {
        let member_key = SigningKey::generate(&mut OsRng);
        let certificate = Certificate::issue(
            CertificateParams {
                serial,
                subject: format!("https://directory.core.trust.ib1.org/member/{member_id}"),
                issuer: "signing-issuer-ca".to_string(),
                public_key: member_key.verifying_key(),
                roles: vec![format!("{SCHEME}/role/{role}")],
                application: Some(format!(
                    "https://directory.core.trust.ib1.org/scheme/supply/application/{}",
                    member_id as u64 * 7
                )),
                not_before,
                not_after,
            },
            &self.signing_key,
        );
        let signer = InMemorySigner::new(member_key, certificate.clone())
            .expect("issued key matches its certificate");
        Member {
            signer,
            certificate,
        }
    }
}

pub fn permission_step(account: &str, timestamp: &str, expires: &str) -> Value {
    json!({
        "type": "permission",
        "scheme": SCHEME,
        "timestamp": timestamp,
        "account": account,
        "allows": {
            "licences": [format!("{SCHEME}/licence/metered-supply-data/2024-12-05")],
        },
        "expires": expires,
    })
}

pub fn origin_step(origin: &str) -> Value {
    json!({
        "type": "origin",
        "scheme": SCHEME,
        "sourceType": format!("{SCHEME}/source-type/Meter"),
        "origin": origin,
        "external": false,
        "supply:scheme": {
            "meteringPeriod": {"from": "2024-08-01Z", "to": "2024-09-01Z"},
        },
        "supply:assurance": {
            "missingData": format!("{SCHEME}/assurance/missing-data/Missing"),
        },
    })
}

pub fn transfer_step(
    of: &StepId,
    to_member: u32,
    permission: &StepId,
    transaction: &str,
) -> Value {
    json!({
        "type": "transfer",
        "scheme": SCHEME,
        "of": of.as_str(),
        "to": format!("https://directory.core.trust.ib1.org/member/{to_member}"),
        "standard": format!("{SCHEME}/standard/metered-supply-data/2024-12-05"),
        "licence": format!("{SCHEME}/licence/metered-supply-data/2024-12-05"),
        "service": "https://api.industrialmetering.example.com/meter-readings/0",
        "path": "/readings",
        "parameters": {"from": "2024-08-01Z", "to": "2024-09-01Z"},
        "permissions": [permission.as_str()],
        "transaction": transaction,
    })
}

pub fn receipt_step(transfer: &StepId) -> Value {
    json!({
        "type": "receipt",
        "transfer": transfer.as_str(),
    })
}

pub fn process_step(inputs: &[&StepId], permission: &StepId) -> Value {
    json!({
        "type": "process",
        "scheme": SCHEME,
        "inputs": inputs.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
        "process": format!("{SCHEME}/process/manufacture/2024-12-05"),
        "permissions": [permission.as_str()],
        "supply:assurance": {
            "missingData": format!("{SCHEME}/assurance/missing-data/Substituted"),
            "audit": format!("{SCHEME}/audit-standard/FS128983"),
        },
    })
}
