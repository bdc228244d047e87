//! Canonical serialization for deterministic hashing and signing.
//!
//! This module provides functions to serialize data in a canonical, deterministic
//! format. The output bytes are the exact input to step-ID derivation and to
//! signature creation/verification, so any ambiguity here would break tamper
//! evidence.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: struct fields serialize in declaration order
//! - Stable map order: `serde_json::Map` is BTree-backed, so object keys are
//!   always sorted (the `preserve_order` feature must never be enabled)
//! - Stable Vec order: vectors serialize in index order
//! - No insignificant whitespace: compact JSON output
//!
//! ## What Canonical Bytes Feed
//!
//! | Consumer | Input |
//! |----------|-------|
//! | Step ID derivation | one step's fields + kind + sequence + trust framework |
//! | Signing | the covered step set + trust framework |
//! | Certificate fingerprints | the full certificate |

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Version of the canonical encoding specification.
///
/// Increment when the canonicalization algorithm changes. Changing this
/// invalidates every existing step ID and signature.
pub const CANONICAL_ENCODING_VERSION: &str = "1.0.0";

/// Serialize a value to canonical JSON bytes.
///
/// Produces identical output for identical input, independent of the
/// insertion order of any map-like fields.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("Canonical serialization failed")
}

/// Compute the SHA-256 digest of a serializable value's canonical bytes.
pub fn canonical_digest<T: Serialize>(value: &T) -> [u8; 32] {
    let bytes = to_canonical_bytes(value);
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hasher.finalize().into()
}

/// Compute the canonical SHA-256 digest and return it as a hex string.
pub fn canonical_digest_hex<T: Serialize>(value: &T) -> String {
    hex::encode(canonical_digest(value))
}

/// Compute a truncated canonical digest, hex encoded.
///
/// Used for step IDs: the first `n` bytes of the SHA-256 digest. `n` must be
/// at most 32.
pub fn canonical_digest_hex_truncated<T: Serialize>(value: &T, n: usize) -> String {
    hex::encode(&canonical_digest(value)[..n])
}
