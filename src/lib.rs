//! # provenance-kernel
//!
//! Cryptographically verifiable provenance records for multi-party data
//! chains.
//!
//! Each organization in a shared trust framework appends typed steps to a
//! running [`Record`], signs its contribution, and forwards the encoded
//! [`Attachment`] to the next party; any recipient can later verify the
//! entire chain against a common root of trust without contacting the
//! originating parties.
//!
//! ## Core Contract
//!
//! 1. Steps form an append-only, content-addressed DAG — references must
//!    resolve at insertion time, and nothing is ever edited or removed
//! 2. Each `sign` call covers exactly the steps added since the party's last
//!    checkpoint, producing an immutable [`SignatureRecord`]
//! 3. `verify` recomputes canonical bytes for every signature's covered set
//!    and validates both the cryptography and the certificate chain
//!
//! ## Architecture
//!
//! ```text
//! add_step → Record (step arena + pending) → sign → Signer
//!                     ↓                                ↓
//!                  encoded() ←——— Attachment ———→ verify → TrustResolver
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Canonical encoding is byte-for-byte reproducible: sorted object keys,
//!   stable field order, no insignificant whitespace
//! - Step IDs are content-derived (truncated SHA-256 over canonical bytes +
//!   insertion sequence + trust framework), so a referenced step cannot be
//!   silently substituted
//! - Any change to a signed step's fields, presence, or ordering changes the
//!   covered bytes and fails verification

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canonical;
pub mod codec;
pub mod record;
pub mod signing;
pub mod trust;
pub mod types;

// Re-exports
pub use types::{
    Certificate, CertificateError, CertificateMaterial, CertificateParams, SignatureRecord,
    SignatureReport, Step, StepError, StepId, StepKind,
};
pub use canonical::{
    canonical_digest, canonical_digest_hex, to_canonical_bytes, CANONICAL_ENCODING_VERSION,
};
pub use codec::{Attachment, CodecError, ATTACHMENT_CONTAINER, ATTACHMENT_VERSION};
pub use record::{MergeError, Record, SearchError, SigningError, VerificationError};
pub use signing::{Attestation, FileSigner, InMemorySigner, Signer, SignerError};
pub use trust::{
    CacheConfig, CacheStats, CachedResolver, LocalDirectoryResolver, SelfContainedResolver,
    TrustError, TrustResolver,
};

/// Schema version for all provenance record types.
/// Increment on breaking changes to any schema type.
pub const PROVENANCE_SCHEMA_VERSION: &str = "1.0.0";
