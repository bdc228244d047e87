//! Step types for the provenance graph.
//!
//! A step is one immutable entry in the provenance DAG. Its identifier is
//! content-derived: the truncated SHA-256 of the step's canonical bytes plus
//! its insertion sequence, so a referenced step can never be silently
//! substituted after the fact, and structurally identical steps added twice
//! still get distinct IDs.

use std::fmt;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::canonical::canonical_digest_hex_truncated;

/// Number of digest bytes kept in a step ID.
const STEP_ID_BYTES: usize = 16;

/// Content-derived identifier of a step, unique within the full visible graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepId(String);

impl StepId {
    /// Wrap an identifier string (e.g. one read back from an attachment).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for diagnostics and graph labels.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }

    /// Check that this looks like a derived step ID.
    pub fn is_valid_format(&self) -> bool {
        self.0.len() == STEP_ID_BYTES * 2 && self.0.chars().all(|c| c.is_ascii_hexdigit())
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of a provenance step. Closed set: unknown kinds are a validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Consent recorded by an account holder.
    Permission,
    /// Where a unit of data came from.
    Origin,
    /// Data sent to another party.
    Transfer,
    /// Acknowledgement of a received transfer.
    Receipt,
    /// Processing combining one or more inputs.
    Process,
}

impl StepKind {
    /// Parse a step kind from its wire name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "permission" => Some(Self::Permission),
            "origin" => Some(Self::Origin),
            "transfer" => Some(Self::Transfer),
            "receipt" => Some(Self::Receipt),
            "process" => Some(Self::Process),
            _ => None,
        }
    }

    /// Wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permission => "permission",
            Self::Origin => "origin",
            Self::Transfer => "transfer",
            Self::Receipt => "receipt",
            Self::Process => "process",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error raised by step validation. The record is left unchanged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    /// The `type` member named a kind outside the closed set.
    #[error("unknown step kind `{0}`")]
    InvalidStepKind(String),
    /// Step input was not a JSON object.
    #[error("step fields must be a JSON object")]
    NotAnObject,
    /// A required field was absent.
    #[error("missing required field `{field}`")]
    MissingField {
        /// Name of the absent field.
        field: String,
    },
    /// A field was present but had the wrong shape.
    #[error("field `{field}` is malformed: expected {expected}")]
    MalformedField {
        /// Name of the malformed field.
        field: String,
        /// What the field should have been.
        expected: &'static str,
    },
    /// A permission's expiry did not fall strictly after its timestamp.
    #[error("`expires` must be strictly after `timestamp`")]
    ExpiryNotAfterTimestamp,
    /// A referenced step ID is not visible in the graph.
    #[error("reference `{reference}` in field `{field}` does not resolve to a visible step")]
    UnresolvedReference {
        /// Field the reference appeared in.
        field: &'static str,
        /// The unresolvable identifier.
        reference: String,
    },
    /// A reference resolved, but to a step of the wrong kind.
    #[error("reference `{reference}` in field `{field}` is a {found} step, expected {expected}")]
    WrongReferenceKind {
        /// Field the reference appeared in.
        field: &'static str,
        /// The offending identifier.
        reference: String,
        /// Kind the field requires.
        expected: &'static str,
        /// Kind actually found.
        found: StepKind,
    },
    /// A transfer reused a transaction identifier already visible in the graph.
    #[error("transaction `{0}` already appears on another transfer step")]
    DuplicateTransaction(String),
}

/// Role a reference plays in its step, driving per-kind target checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReferenceRole {
    /// `transfer.of`: the step being transferred; must not be a permission.
    Of,
    /// `receipt.transfer`: must point at a transfer step.
    Transfer,
    /// `process.inputs` entry; must not be a permission.
    Input,
    /// `permissions` entry; must point at a permission step.
    Permission,
}

impl ReferenceRole {
    pub(crate) fn field_name(&self) -> &'static str {
        match self {
            Self::Of => "of",
            Self::Transfer => "transfer",
            Self::Input => "inputs",
            Self::Permission => "permissions",
        }
    }
}

/// A reference extracted from validated fields, not yet resolved.
#[derive(Debug, Clone)]
pub(crate) struct ParsedReference {
    pub(crate) id: StepId,
    pub(crate) role: ReferenceRole,
}

/// One immutable entry in the provenance DAG.
///
/// `fields` preserves every submitted attribute (including scheme-namespaced
/// extension fields) so the wire form round-trips byte for byte. `references`
/// is derived from `fields` during validation and is checked against it again
/// on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    fields: Map<String, Value>,
    id: StepId,
    kind: StepKind,
    references: Vec<StepId>,
    sequence: u64,
}

impl Step {
    /// Build a step from validated fields, deriving its content-bound ID.
    pub(crate) fn new(
        kind: StepKind,
        fields: Map<String, Value>,
        references: Vec<StepId>,
        sequence: u64,
        trust_framework: &str,
    ) -> Self {
        let id = Self::derive_id(kind, &fields, sequence, trust_framework);
        Self {
            fields,
            id,
            kind,
            references,
            sequence,
        }
    }

    /// Derive the content-bound identifier for a step.
    ///
    /// The sequence number is part of the input, so identical fields added at
    /// different positions produce distinct IDs. The trust framework is echoed
    /// in, so two frameworks never produce confusable identifiers. Exposed so
    /// auditors can confirm the ID ↔ content binding of any step offline.
    pub fn derive_id(
        kind: StepKind,
        fields: &Map<String, Value>,
        sequence: u64,
        trust_framework: &str,
    ) -> StepId {
        #[derive(Serialize)]
        struct IdInput<'a> {
            fields: &'a Map<String, Value>,
            kind: StepKind,
            sequence: u64,
            #[serde(rename = "trustFramework")]
            trust_framework: &'a str,
        }

        StepId(canonical_digest_hex_truncated(
            &IdInput {
                fields,
                kind,
                sequence,
                trust_framework,
            },
            STEP_ID_BYTES,
        ))
    }

    /// The step's content-derived identifier.
    pub fn id(&self) -> &StepId {
        &self.id
    }

    /// The step's kind.
    pub fn kind(&self) -> StepKind {
        self.kind
    }

    /// Insertion sequence number in the originating record.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// All kind-specific fields, as submitted.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Look up a single field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// IDs of the steps this step depends on.
    pub fn references(&self) -> &[StepId] {
        &self.references
    }

    /// Superset match: does this step carry every field in `pattern` with an
    /// equal value (and the given kind, when one is constrained)?
    pub fn matches(&self, kind: Option<StepKind>, pattern: &Map<String, Value>) -> bool {
        if let Some(k) = kind {
            if self.kind != k {
                return false;
            }
        }
        pattern
            .iter()
            .all(|(name, want)| self.fields.get(name) == Some(want))
    }
}

/// Validate the kind-specific required fields and extract references.
///
/// This single exhaustive match is the only place per-kind structure is
/// defined: validation, reference extraction, and hence canonical encoding all
/// flow from it, so a new kind cannot silently bypass any of them.
pub(crate) fn validate_fields(
    kind: StepKind,
    fields: &Map<String, Value>,
) -> Result<Vec<ParsedReference>, StepError> {
    let mut references = Vec::new();

    match kind {
        StepKind::Permission => {
            require_str(fields, "scheme")?;
            let timestamp = require_timestamp(fields, "timestamp")?;
            require_str(fields, "account")?;
            let allows = require_object(fields, "allows")?;
            let licences = optional_str_array(allows, "allows", "licences")?;
            let processes = optional_str_array(allows, "allows", "processes")?;
            if licences + processes == 0 {
                return Err(StepError::MalformedField {
                    field: "allows".to_string(),
                    expected: "at least one licence or process entry",
                });
            }
            let expires = require_timestamp(fields, "expires")?;
            if expires <= timestamp {
                return Err(StepError::ExpiryNotAfterTimestamp);
            }
        }
        StepKind::Origin => {
            require_str(fields, "scheme")?;
            require_str(fields, "sourceType")?;
            require_str(fields, "origin")?;
            let external = require_bool(fields, "external")?;
            if external {
                require_str(fields, "originLicence")?;
            }
            require_assurance(fields)?;
        }
        StepKind::Transfer => {
            require_str(fields, "scheme")?;
            references.push(ParsedReference {
                id: StepId::new(require_str(fields, "of")?),
                role: ReferenceRole::Of,
            });
            require_str(fields, "to")?;
            require_str(fields, "standard")?;
            require_str(fields, "licence")?;
            require_str(fields, "service")?;
            require_str(fields, "path")?;
            require_object(fields, "parameters")?;
            for id in require_ref_array(fields, "permissions")? {
                references.push(ParsedReference {
                    id,
                    role: ReferenceRole::Permission,
                });
            }
            require_str(fields, "transaction")?;
        }
        StepKind::Receipt => {
            references.push(ParsedReference {
                id: StepId::new(require_str(fields, "transfer")?),
                role: ReferenceRole::Transfer,
            });
        }
        StepKind::Process => {
            require_str(fields, "scheme")?;
            let inputs = require_ref_array(fields, "inputs")?;
            if inputs.is_empty() {
                return Err(StepError::MalformedField {
                    field: "inputs".to_string(),
                    expected: "a non-empty array of step IDs",
                });
            }
            for id in inputs {
                references.push(ParsedReference {
                    id,
                    role: ReferenceRole::Input,
                });
            }
            require_str(fields, "process")?;
            for id in require_ref_array(fields, "permissions")? {
                references.push(ParsedReference {
                    id,
                    role: ReferenceRole::Permission,
                });
            }
            require_assurance(fields)?;
        }
    }

    Ok(references)
}

fn require_str<'a>(fields: &'a Map<String, Value>, name: &str) -> Result<&'a str, StepError> {
    match fields.get(name) {
        None => Err(StepError::MissingField {
            field: name.to_string(),
        }),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(StepError::MalformedField {
            field: name.to_string(),
            expected: "a string",
        }),
    }
}

fn require_bool(fields: &Map<String, Value>, name: &str) -> Result<bool, StepError> {
    match fields.get(name) {
        None => Err(StepError::MissingField {
            field: name.to_string(),
        }),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(StepError::MalformedField {
            field: name.to_string(),
            expected: "a boolean",
        }),
    }
}

fn require_object<'a>(
    fields: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a Map<String, Value>, StepError> {
    match fields.get(name) {
        None => Err(StepError::MissingField {
            field: name.to_string(),
        }),
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(StepError::MalformedField {
            field: name.to_string(),
            expected: "an object",
        }),
    }
}

fn require_timestamp(
    fields: &Map<String, Value>,
    name: &str,
) -> Result<DateTime<chrono::FixedOffset>, StepError> {
    let raw = require_str(fields, name)?;
    DateTime::parse_from_rfc3339(raw).map_err(|_| StepError::MalformedField {
        field: name.to_string(),
        expected: "an RFC 3339 timestamp",
    })
}

/// Count the entries of an optional string array inside a nested object.
fn optional_str_array(
    object: &Map<String, Value>,
    parent: &str,
    name: &str,
) -> Result<usize, StepError> {
    match object.get(name) {
        None => Ok(0),
        Some(Value::Array(items)) => {
            if items.iter().all(Value::is_string) {
                Ok(items.len())
            } else {
                Err(StepError::MalformedField {
                    field: format!("{parent}.{name}"),
                    expected: "an array of strings",
                })
            }
        }
        Some(_) => Err(StepError::MalformedField {
            field: format!("{parent}.{name}"),
            expected: "an array of strings",
        }),
    }
}

fn require_ref_array(fields: &Map<String, Value>, name: &str) -> Result<Vec<StepId>, StepError> {
    match fields.get(name) {
        None => Err(StepError::MissingField {
            field: name.to_string(),
        }),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(StepId::new(s.clone())),
                _ => Err(StepError::MalformedField {
                    field: name.to_string(),
                    expected: "an array of step IDs",
                }),
            })
            .collect(),
        Some(_) => Err(StepError::MalformedField {
            field: name.to_string(),
            expected: "an array of step IDs",
        }),
    }
}

/// Assurance metadata: an `assurance` object (optionally scheme-namespaced,
/// e.g. `supply:assurance`) carrying a `missingData` classification.
fn require_assurance(fields: &Map<String, Value>) -> Result<(), StepError> {
    let entry = fields
        .iter()
        .find(|(name, _)| *name == "assurance" || name.ends_with(":assurance"));
    let (name, value) = entry.ok_or(StepError::MissingField {
        field: "assurance".to_string(),
    })?;
    let object = value.as_object().ok_or(StepError::MalformedField {
        field: name.clone(),
        expected: "an object",
    })?;
    match object.get("missingData") {
        Some(Value::String(_)) => Ok(()),
        _ => Err(StepError::MalformedField {
            field: format!("{name}.missingData"),
            expected: "a missing-data classification string",
        }),
    }
}
