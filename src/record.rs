//! The provenance record: an append-only step DAG with incremental
//! multi-party signing.
//!
//! ## Lifecycle
//!
//! A record is created empty (root of a new chain) or seeded from an
//! attachment received from an upstream party (continuing a chain). It is
//! mutated only through [`Record::add_step`], [`Record::sign`], and
//! [`Record::add_record`]; it becomes eligible for transport through
//! [`Record::encoded`]. A record is closed for a party immediately after that
//! party signs, though further parties may still extend it.
//!
//! ## Invariants
//!
//! - Steps and signatures are immutable once created; the graph only grows.
//! - Every reference points at a step that was already visible when the
//!   referencing step was added — the DAG can hold no cycles.
//! - Every operation is atomic: on any failure the record is unchanged.
//! - The union of steps covered by any signature is a subset of the steps
//!   present at verification time (checked defensively during verify).

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::canonical::to_canonical_bytes;
use crate::codec::{self, Attachment, CodecError, ATTACHMENT_CONTAINER, ATTACHMENT_VERSION};
use crate::signing::{Signer, SignerError};
use crate::trust::{TrustError, TrustResolver};
use crate::types::signature::{SignatureRecord, SignatureReport};
use crate::types::step::{validate_fields, ReferenceRole, Step, StepError, StepId, StepKind};

/// Error raised by [`Record::sign`]. The record is left unchanged.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// No steps have been added since the last signature.
    #[error("nothing to sign: no steps added since the last signature")]
    NothingToSign,
    /// The signing backend failed; the caller may retry once it recovers.
    #[error("signing backend failed")]
    SigningBackend(#[from] SignerError),
}

/// Error raised by verification. Terminal for the attempt — an authenticity
/// failure must be surfaced, never silently ignored or retried.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// The cryptographic check failed: content was altered after signing, or
    /// the wrong key signed it.
    #[error("signature by `{signer}` does not match the covered step content")]
    SignatureMismatch {
        /// Subject of the certificate the signature claims.
        signer: String,
    },
    /// The trust resolver rejected the certificate's chain or validity.
    #[error("certificate for `{signer}` is not trusted: {reason}")]
    UntrustedCertificate {
        /// Subject of the rejected certificate.
        signer: String,
        /// The resolver's refusal reason.
        reason: String,
    },
    /// A covered step ID no longer resolves. Structurally impossible under
    /// the append-only model, but checked defensively.
    #[error("signature covers step `{id}`, which is missing from the graph")]
    MissingCoveredStep {
        /// The absent identifier.
        id: StepId,
    },
    /// The stored signature bytes are not a valid Ed25519 encoding.
    #[error("signature attributed to `{signer}` is not a valid Ed25519 signature encoding")]
    BadSignatureEncoding {
        /// Subject of the certificate the signature claims.
        signer: String,
    },
    /// The resolved certificate's public key is unusable.
    #[error("certificate for `{signer}` carries an unusable public key")]
    BadPublicKey {
        /// Subject of the offending certificate.
        signer: String,
    },
    /// The trust resolver itself failed (reference unresolvable, backend down).
    #[error("trust resolution failed")]
    Resolver(#[from] TrustError),
}

/// Error raised by [`Record::find_step`]. Recoverable by refining the pattern.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SearchError {
    /// No step matched.
    #[error("no step matches the given pattern")]
    StepNotFound,
    /// More than one step matched; the pattern must be refined.
    #[error("{0} steps match the given pattern")]
    AmbiguousStep(usize),
    /// The pattern itself was unusable.
    #[error("invalid search pattern: {reason}")]
    InvalidPattern {
        /// What was wrong with the pattern.
        reason: &'static str,
    },
}

/// Error raised by [`Record::add_record`]. Fatal to the merge; the record is
/// left unchanged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MergeError {
    /// A step ID from the other record already exists here.
    #[error("step `{0}` already exists in this record")]
    DuplicateStepId(StepId),
    /// The records belong to different trust frameworks.
    #[error("cannot merge trust framework `{theirs}` into `{ours}`")]
    TrustFrameworkMismatch {
        /// This record's framework.
        ours: String,
        /// The other record's framework.
        theirs: String,
    },
}

/// Canonical signing payload: the covered steps in covering order, with the
/// trust framework echoed in so two frameworks never produce confusable
/// signatures.
#[derive(Serialize)]
struct SignedPayload<'a> {
    steps: Vec<&'a Step>,
    #[serde(rename = "trustFramework")]
    trust_framework: &'a str,
}

/// A provenance record: the full visible step graph, every attached
/// signature, and the current party's pending (not yet signed) steps.
#[derive(Debug, Clone)]
pub struct Record {
    trust_framework: String,
    steps: Vec<Step>,
    index: BTreeMap<StepId, usize>,
    signatures: Vec<SignatureRecord>,
    pending: Vec<StepId>,
    record_id: Uuid,
}

impl Record {
    /// Create an empty record rooting a new chain.
    pub fn new(trust_framework: impl Into<String>) -> Self {
        Self {
            trust_framework: trust_framework.into(),
            steps: Vec::new(),
            index: BTreeMap::new(),
            signatures: Vec::new(),
            pending: Vec::new(),
            record_id: Uuid::new_v4(),
        }
    }

    /// Continue a chain from an attachment received from an upstream party.
    ///
    /// The attachment is structurally validated: envelope identity, step-ID
    /// recomputation, reference visibility, and signature coverage. Inherited
    /// steps are not pending — only steps this party adds will be covered by
    /// its signature.
    pub fn from_attachment(
        trust_framework: impl Into<String>,
        attachment: &Attachment,
    ) -> Result<Self, CodecError> {
        let trust_framework = trust_framework.into();
        codec::validate_attachment(attachment, &trust_framework)?;

        let mut index = BTreeMap::new();
        for (position, step) in attachment.steps.iter().enumerate() {
            index.insert(step.id().clone(), position);
        }

        let record = Self {
            trust_framework,
            steps: attachment.steps.clone(),
            index,
            signatures: attachment.signatures.clone(),
            pending: Vec::new(),
            record_id: Uuid::new_v4(),
        };
        debug!(
            record = %record.record_id,
            steps = record.steps.len(),
            signatures = record.signatures.len(),
            "record opened from attachment"
        );
        Ok(record)
    }

    /// The governing trust framework identifier.
    pub fn trust_framework(&self) -> &str {
        &self.trust_framework
    }

    /// Identifier correlating this in-memory instance in logs. Not serialized.
    pub fn record_id(&self) -> Uuid {
        self.record_id
    }

    /// All steps visible to this record, in visibility order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// All signatures visible to this record, in the order attached.
    pub fn signatures(&self) -> &[SignatureRecord] {
        &self.signatures
    }

    /// IDs of steps added by the current party and not yet signed.
    pub fn pending(&self) -> &[StepId] {
        &self.pending
    }

    /// Number of visible steps.
    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    /// Number of visible signatures.
    pub fn num_signatures(&self) -> usize {
        self.signatures.len()
    }

    /// Look up a step by ID.
    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.index.get(id).map(|&position| &self.steps[position])
    }

    /// Add a typed step to the graph.
    ///
    /// `step` is a JSON object whose `type` member names the kind; the
    /// remaining members are the kind-specific fields. Validation covers the
    /// closed kind set, required fields, reference resolution against the
    /// currently visible graph, and reference target kinds. Atomic: on any
    /// failure the graph is unchanged.
    pub fn add_step(&mut self, step: Value) -> Result<StepId, StepError> {
        let mut fields = match step {
            Value::Object(fields) => fields,
            _ => return Err(StepError::NotAnObject),
        };
        let kind = match fields.remove("type") {
            None => {
                return Err(StepError::MissingField {
                    field: "type".to_string(),
                })
            }
            Some(Value::String(name)) => {
                StepKind::from_str(&name).ok_or(StepError::InvalidStepKind(name))?
            }
            Some(_) => {
                return Err(StepError::MalformedField {
                    field: "type".to_string(),
                    expected: "a string",
                })
            }
        };

        let parsed = validate_fields(kind, &fields)?;
        for reference in &parsed {
            let target = self.step(&reference.id).ok_or_else(|| {
                StepError::UnresolvedReference {
                    field: reference.role.field_name(),
                    reference: reference.id.to_string(),
                }
            })?;
            let mismatch = |expected| StepError::WrongReferenceKind {
                field: reference.role.field_name(),
                reference: reference.id.to_string(),
                expected,
                found: target.kind(),
            };
            match reference.role {
                ReferenceRole::Of | ReferenceRole::Input => {
                    if target.kind() == StepKind::Permission {
                        return Err(mismatch("a data-bearing step"));
                    }
                }
                ReferenceRole::Transfer => {
                    if target.kind() != StepKind::Transfer {
                        return Err(mismatch("a transfer step"));
                    }
                }
                ReferenceRole::Permission => {
                    if target.kind() != StepKind::Permission {
                        return Err(mismatch("a permission step"));
                    }
                }
            }
        }

        if kind == StepKind::Transfer {
            if let Some(Value::String(transaction)) = fields.get("transaction") {
                let reused = self.steps.iter().any(|s| {
                    s.kind() == StepKind::Transfer
                        && s.field("transaction").and_then(Value::as_str)
                            == Some(transaction.as_str())
                });
                if reused {
                    return Err(StepError::DuplicateTransaction(transaction.clone()));
                }
            }
        }

        let sequence = self.steps.len() as u64;
        let references: Vec<StepId> = parsed.into_iter().map(|r| r.id).collect();
        let step = Step::new(kind, fields, references, sequence, &self.trust_framework);
        let id = step.id().clone();

        debug!(record = %self.record_id, kind = %kind, step = %id, "step added");
        self.index.insert(id.clone(), self.steps.len());
        self.steps.push(step);
        self.pending.push(id.clone());
        Ok(id)
    }

    /// Locate the unique step matching a partial field set.
    ///
    /// `pattern` is a JSON object: an optional `type` member constrains the
    /// kind, every other member must equal the step's field of the same name.
    /// Searches the whole visible graph, including merged and imported
    /// material.
    pub fn find_step(&self, pattern: &Value) -> Result<&Step, SearchError> {
        let pattern = match pattern {
            Value::Object(map) => map,
            _ => {
                return Err(SearchError::InvalidPattern {
                    reason: "pattern must be a JSON object",
                })
            }
        };
        let mut pattern = pattern.clone();
        let kind = match pattern.remove("type") {
            None => None,
            Some(Value::String(name)) => {
                Some(StepKind::from_str(&name).ok_or(SearchError::InvalidPattern {
                    reason: "unknown step kind in pattern",
                })?)
            }
            Some(_) => {
                return Err(SearchError::InvalidPattern {
                    reason: "`type` must be a string",
                })
            }
        };

        let mut matches = self.steps.iter().filter(|s| s.matches(kind, &pattern));
        let first = matches.next().ok_or(SearchError::StepNotFound)?;
        let extra = matches.count();
        if extra > 0 {
            return Err(SearchError::AmbiguousStep(extra + 1));
        }
        Ok(first)
    }

    /// Canonical bytes for a covered step set, in covering order.
    fn covered_canonical_bytes(&self, ids: &[StepId]) -> Result<Vec<u8>, StepId> {
        let mut steps = Vec::with_capacity(ids.len());
        for id in ids {
            steps.push(self.step(id).ok_or_else(|| id.clone())?);
        }
        Ok(to_canonical_bytes(&SignedPayload {
            steps,
            trust_framework: &self.trust_framework,
        }))
    }

    /// Sign every step added since the last signature (or since creation).
    ///
    /// Closes out exactly the pending set: canonicalizes it, passes the bytes
    /// to the signer, appends the resulting signature, and clears `pending` —
    /// all only after the signer succeeds, so a backend failure leaves the
    /// record unchanged. A party may add further steps and sign again,
    /// producing multiple batches before forwarding.
    pub async fn sign(&mut self, signer: &dyn Signer) -> Result<&SignatureRecord, SigningError> {
        if self.pending.is_empty() {
            return Err(SigningError::NothingToSign);
        }
        let canonical = self
            .covered_canonical_bytes(&self.pending)
            .expect("pending steps are always present in the arena");

        let attestation = signer.sign(&canonical).await?;
        let signature = SignatureRecord {
            covered_step_ids: self.pending.clone(),
            signature: hex::encode(&attestation.signature),
            certificate: attestation.certificate,
            created_at: Utc::now(),
        };
        info!(
            record = %self.record_id,
            signer = %signature.certificate.subject_hint(),
            steps = signature.covered_step_ids.len(),
            "record signed"
        );
        self.pending.clear();
        self.signatures.push(signature);
        Ok(self
            .signatures
            .last()
            .expect("a signature was just appended"))
    }

    /// Verify one signature: recompute the covered canonical bytes, check the
    /// Ed25519 signature against the resolved certificate's key, and consult
    /// the trust resolver. Side-effect-free.
    pub async fn verify_signature(
        &self,
        signature: &SignatureRecord,
        resolver: &dyn TrustResolver,
    ) -> Result<SignatureReport, VerificationError> {
        let canonical = self
            .covered_canonical_bytes(&signature.covered_step_ids)
            .map_err(|id| VerificationError::MissingCoveredStep { id })?;

        let certificate = match resolver
            .resolve(&signature.certificate, signature.created_at)
            .await
        {
            Ok(certificate) => certificate,
            Err(TrustError::Untrusted { subject, reason }) => {
                return Err(VerificationError::UntrustedCertificate {
                    signer: subject,
                    reason,
                })
            }
            Err(other) => return Err(VerificationError::Resolver(other)),
        };

        let key = certificate
            .verifying_key()
            .map_err(|_| VerificationError::BadPublicKey {
                signer: certificate.subject.clone(),
            })?;
        let raw = hex::decode(&signature.signature).map_err(|_| {
            VerificationError::BadSignatureEncoding {
                signer: certificate.subject.clone(),
            }
        })?;
        let decoded = ed25519_dalek::Signature::from_slice(&raw).map_err(|_| {
            VerificationError::BadSignatureEncoding {
                signer: certificate.subject.clone(),
            }
        })?;
        key.verify_strict(&canonical, &decoded)
            .map_err(|_| VerificationError::SignatureMismatch {
                signer: certificate.subject.clone(),
            })?;

        Ok(SignatureReport {
            signer: certificate.subject.clone(),
            certificate_fingerprint: certificate.fingerprint(),
            roles: certificate.roles.clone(),
            covered_step_ids: signature.covered_step_ids.clone(),
            created_at: signature.created_at,
        })
    }

    /// Verify every signature in the record, anywhere in the graph.
    ///
    /// All-or-nothing: the first failing signature raises. On success the
    /// per-signature reports are returned in attachment order. Repeatable any
    /// number of times.
    pub async fn verify(
        &self,
        resolver: &dyn TrustResolver,
    ) -> Result<Vec<SignatureReport>, VerificationError> {
        let mut reports = Vec::with_capacity(self.signatures.len());
        for signature in &self.signatures {
            reports.push(self.verify_signature(signature, resolver).await?);
        }
        info!(
            record = %self.record_id,
            signatures = reports.len(),
            "record verified"
        );
        Ok(reports)
    }

    /// Verify each signature independently, without short-circuiting.
    ///
    /// The enumerable form for callers needing a full report: one result per
    /// signature, in attachment order.
    pub async fn verify_signatures(
        &self,
        resolver: &dyn TrustResolver,
    ) -> Vec<Result<SignatureReport, VerificationError>> {
        let mut outcomes = Vec::with_capacity(self.signatures.len());
        for signature in &self.signatures {
            outcomes.push(self.verify_signature(signature, resolver).await);
        }
        outcomes
    }

    /// Union another independently built record into this one.
    ///
    /// Steps and signatures from `other` become visible here, unchanged;
    /// steps added afterwards may reference them. Requires the same trust
    /// framework and disjoint step IDs (content-derived, so a collision
    /// between unrelated records indicates identical content and position).
    /// Atomic: on error nothing is unioned. `other` is never mutated.
    pub fn add_record(&mut self, other: &Record) -> Result<(), MergeError> {
        if other.trust_framework != self.trust_framework {
            return Err(MergeError::TrustFrameworkMismatch {
                ours: self.trust_framework.clone(),
                theirs: other.trust_framework.clone(),
            });
        }
        for step in &other.steps {
            if self.index.contains_key(step.id()) {
                return Err(MergeError::DuplicateStepId(step.id().clone()));
            }
        }

        for step in &other.steps {
            self.index.insert(step.id().clone(), self.steps.len());
            self.steps.push(step.clone());
        }
        self.signatures.extend(other.signatures.iter().cloned());
        info!(
            record = %self.record_id,
            merged = %other.record_id,
            steps = other.steps.len(),
            signatures = other.signatures.len(),
            "record merged"
        );
        Ok(())
    }

    /// Encode the record into its portable attachment form.
    pub fn encoded(&self) -> Attachment {
        Attachment {
            container: ATTACHMENT_CONTAINER.to_string(),
            version: ATTACHMENT_VERSION,
            trust_framework: self.trust_framework.clone(),
            steps: self.steps.clone(),
            signatures: self.signatures.clone(),
        }
    }

    /// Fully expanded, human-auditable rendering. Never a signing input.
    pub fn decoded(&self) -> Value {
        codec::render_decoded(&self.trust_framework, &self.steps, &self.signatures)
    }

    /// Render the step graph as a Graphviz digraph, nodes grouped by the
    /// signature (hence organization) covering them.
    pub fn to_graphviz(&self) -> String {
        codec::render_graphviz(&self.steps, &self.signatures)
    }
}
