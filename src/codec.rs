//! Wire codec for provenance attachments, plus the diagnostic renderings.
//!
//! The attachment is the portable form of a record exchanged between
//! organizations: a versioned, self-describing envelope holding the step
//! graph and every signature with enough certificate information for a
//! downstream trust resolver to operate. It must round-trip exactly through
//! encode → transport → decode → verify.
//!
//! Decoding re-derives every step ID from content and re-extracts every
//! reference from fields, so an attachment whose IDs or edges were tampered
//! with is rejected before verification even begins. The human-auditable
//! rendering ([`render_decoded`]) and the graph export ([`render_graphviz`])
//! are read-only diagnostic surfaces, never re-ingested as input.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::certificate::CertificateMaterial;
use crate::types::signature::SignatureRecord;
use crate::types::step::{validate_fields, Step, StepId};

/// Container identifier marking the envelope as a provenance attachment.
pub const ATTACHMENT_CONTAINER: &str =
    "https://registry.core.trust.ib1.org/provenance-attachment";

/// Current attachment encoding version.
pub const ATTACHMENT_VERSION: u32 = 1;

/// Error raised while decoding or validating an attachment.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    /// The envelope does not identify itself as a provenance attachment.
    #[error("unsupported container `{0}`")]
    UnsupportedContainer(String),
    /// The envelope version is not understood.
    #[error("unsupported attachment version {0}")]
    UnsupportedVersion(u32),
    /// The attachment was produced under a different trust framework.
    #[error("attachment belongs to trust framework `{found}`, expected `{expected}`")]
    TrustFrameworkMismatch {
        /// Framework the record is being opened under.
        expected: String,
        /// Framework the attachment names.
        found: String,
    },
    /// A step's ID does not match its content — the step was substituted.
    #[error("step `{id}` does not match its content-derived identifier")]
    StepIdMismatch {
        /// The claimed identifier.
        id: StepId,
    },
    /// A step references an ID not visible at its position in the graph.
    #[error("step `{step}` references `{reference}`, which is not visible at that point")]
    UnresolvedReference {
        /// The referencing step.
        step: StepId,
        /// The unresolvable identifier.
        reference: StepId,
    },
    /// A signature covers a step ID absent from the graph.
    #[error("signature covers step `{id}`, which is not present in the attachment")]
    MissingCoveredStep {
        /// The absent identifier.
        id: StepId,
    },
    /// A step's structure does not survive re-validation.
    #[error("step `{step}` is malformed: {reason}")]
    Malformed {
        /// The offending step.
        step: StepId,
        /// Validator diagnostic.
        reason: String,
    },
}

/// The portable encoded form of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Container identifier ([`ATTACHMENT_CONTAINER`]).
    pub container: String,
    /// Encoding version ([`ATTACHMENT_VERSION`]).
    pub version: u32,
    /// Trust framework the record belongs to.
    pub trust_framework: String,
    /// The full step graph, in visibility order.
    pub steps: Vec<Step>,
    /// Every signature, in the order attached.
    pub signatures: Vec<SignatureRecord>,
}

/// Validate an attachment's structure before it seeds a record.
///
/// Checks, in order: envelope identity, trust framework, per-step ID
/// recomputation, per-step reference re-extraction and visibility, and
/// signature coverage.
pub(crate) fn validate_attachment(
    attachment: &Attachment,
    trust_framework: &str,
) -> Result<(), CodecError> {
    if attachment.container != ATTACHMENT_CONTAINER {
        return Err(CodecError::UnsupportedContainer(attachment.container.clone()));
    }
    if attachment.version != ATTACHMENT_VERSION {
        return Err(CodecError::UnsupportedVersion(attachment.version));
    }
    if attachment.trust_framework != trust_framework {
        return Err(CodecError::TrustFrameworkMismatch {
            expected: trust_framework.to_string(),
            found: attachment.trust_framework.clone(),
        });
    }

    let mut seen: BTreeSet<&StepId> = BTreeSet::new();
    for step in &attachment.steps {
        let computed = Step::derive_id(
            step.kind(),
            step.fields(),
            step.sequence(),
            trust_framework,
        );
        if &computed != step.id() {
            return Err(CodecError::StepIdMismatch {
                id: step.id().clone(),
            });
        }

        let parsed = validate_fields(step.kind(), step.fields()).map_err(|e| {
            CodecError::Malformed {
                step: step.id().clone(),
                reason: e.to_string(),
            }
        })?;
        let extracted: Vec<StepId> = parsed.into_iter().map(|r| r.id).collect();
        if extracted != step.references() {
            return Err(CodecError::Malformed {
                step: step.id().clone(),
                reason: "stored references do not match the step's fields".to_string(),
            });
        }

        for reference in step.references() {
            if !seen.contains(reference) {
                return Err(CodecError::UnresolvedReference {
                    step: step.id().clone(),
                    reference: reference.clone(),
                });
            }
        }
        seen.insert(step.id());
    }

    for signature in &attachment.signatures {
        for id in &signature.covered_step_ids {
            if !seen.contains(id) {
                return Err(CodecError::MissingCoveredStep { id: id.clone() });
            }
        }
    }

    Ok(())
}

/// Render the fully expanded, human-auditable form of a record.
///
/// Every step carries its covering signature's certificate metadata (when
/// embedded); never used as a signing input.
pub(crate) fn render_decoded(
    trust_framework: &str,
    steps: &[Step],
    signatures: &[SignatureRecord],
) -> Value {
    let rendered_steps: Vec<Value> = steps
        .iter()
        .map(|step| {
            let signed_by = signatures
                .iter()
                .find(|sig| sig.covers(step.id()))
                .map(|sig| match &sig.certificate {
                    CertificateMaterial::Embedded(cert) => json!({
                        "signer": cert.subject,
                        "certificateFingerprint": cert.fingerprint(),
                        "roles": cert.roles,
                        "signedAt": sig.created_at,
                    }),
                    CertificateMaterial::Reference(reference) => json!({
                        "signer": reference,
                        "signedAt": sig.created_at,
                    }),
                });
            json!({
                "id": step.id(),
                "kind": step.kind(),
                "sequence": step.sequence(),
                "fields": step.fields(),
                "references": step.references(),
                "signedBy": signed_by,
            })
        })
        .collect();

    let rendered_signatures: Vec<Value> = signatures
        .iter()
        .map(|sig| {
            json!({
                "coveredStepIds": sig.covered_step_ids,
                "createdAt": sig.created_at,
                "signature": sig.signature,
                "certificate": sig.certificate,
            })
        })
        .collect();

    json!({
        "trustFramework": trust_framework,
        "steps": rendered_steps,
        "signatures": rendered_signatures,
    })
}

/// Node fill colors, cycled per signature.
const PALETTE: [&str; 8] = [
    "#a0cbe8", "#ffbe7d", "#8cd17d", "#ff9d9a", "#b6992d", "#86bcb6", "#d4a6c8", "#f1ce63",
];

/// Render the step graph as a Graphviz digraph.
///
/// Nodes are grouped into one cluster per signature (hence per signing
/// organization) and colored accordingly; steps not yet covered by any
/// signature are left ungrouped and unfilled. Edges are drawn from each
/// referenced step to the step referencing it, following the direction of
/// data flow. Purely descriptive — no semantic validation.
pub(crate) fn render_graphviz(steps: &[Step], signatures: &[SignatureRecord]) -> String {
    let mut out = String::new();
    out.push_str("digraph provenance {\n");
    out.push_str("    rankdir=LR;\n");
    out.push_str("    node [shape=box, style=filled, fillcolor=white];\n");

    let mut clustered: BTreeSet<&StepId> = BTreeSet::new();
    for (index, signature) in signatures.iter().enumerate() {
        let color = PALETTE[index % PALETTE.len()];
        out.push_str(&format!("    subgraph cluster_{index} {{\n"));
        out.push_str(&format!(
            "        label=\"{}\";\n",
            signature.certificate.subject_hint()
        ));
        out.push_str("        color=gray;\n");
        for id in &signature.covered_step_ids {
            if let Some(step) = steps.iter().find(|s| s.id() == id) {
                out.push_str(&format!(
                    "        \"{}\" [label=\"{}\\n{}\", fillcolor=\"{}\"];\n",
                    id,
                    step.kind(),
                    id.short(),
                    color
                ));
                clustered.insert(id);
            }
        }
        out.push_str("    }\n");
    }

    for step in steps {
        if !clustered.contains(step.id()) {
            out.push_str(&format!(
                "    \"{}\" [label=\"{}\\n{}\"];\n",
                step.id(),
                step.kind(),
                step.id().short()
            ));
        }
    }

    for step in steps {
        for reference in step.references() {
            out.push_str(&format!("    \"{}\" -> \"{}\";\n", reference, step.id()));
        }
    }

    out.push_str("}\n");
    out
}
