//! Signing backends.
//!
//! The engine only depends on the [`Signer`] contract: given canonical bytes,
//! produce signature bytes plus the certificate material to attach. Key
//! storage policy lives entirely in the backend — the two provided here hold
//! key material in memory or load it from disk; a remote key-management
//! backend implements the same trait elsewhere.

use std::path::Path;

use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey};

use crate::types::certificate::{Certificate, CertificateMaterial};

/// Error raised by a signing backend.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    /// Key material could not be read.
    #[error("failed to read signing material from `{path}`: {source}")]
    Io {
        /// Path that failed to load.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Key material was readable but not a valid Ed25519 seed.
    #[error("signing key at `{path}` is not a hex-encoded 32-byte Ed25519 seed")]
    MalformedKey {
        /// Path of the offending key file.
        path: String,
    },
    /// The certificate file did not parse.
    #[error("certificate at `{path}` did not parse: {reason}")]
    MalformedCertificate {
        /// Path of the offending certificate file.
        path: String,
        /// Parser diagnostic.
        reason: String,
    },
    /// The signing key does not match the certificate's public key.
    #[error("signing key does not match the public key certified for `{subject}`")]
    KeyCertificateMismatch {
        /// Subject of the mismatched certificate.
        subject: String,
    },
    /// The backend failed (e.g. remote key service unavailable).
    #[error("signing backend failure: {0}")]
    Backend(String),
}

/// A produced signature plus the certificate material to attach with it.
#[derive(Debug, Clone)]
pub struct Attestation {
    /// Raw Ed25519 signature bytes.
    pub signature: Vec<u8>,
    /// Certificate material identifying the signer.
    pub certificate: CertificateMaterial,
}

/// Abstract signing contract.
///
/// Implementations must be safe for concurrent use; a failed call must leave
/// no trace in the record being signed (the engine only mutates state after
/// a successful return).
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign the given canonical bytes.
    async fn sign(&self, canonical: &[u8]) -> Result<Attestation, SignerError>;
}

/// Signer holding an Ed25519 key and certificate in memory.
#[derive(Debug)]
pub struct InMemorySigner {
    signing_key: SigningKey,
    certificate: Certificate,
    embed_certificate: bool,
}

impl InMemorySigner {
    /// Create a signer from a key and the matching member certificate.
    ///
    /// By default the certificate is embedded in produced signatures, making
    /// records self-contained.
    pub fn new(signing_key: SigningKey, certificate: Certificate) -> Result<Self, SignerError> {
        let certified = hex::encode(signing_key.verifying_key().as_bytes());
        if certified != certificate.public_key {
            return Err(SignerError::KeyCertificateMismatch {
                subject: certificate.subject.clone(),
            });
        }
        Ok(Self {
            signing_key,
            certificate,
            embed_certificate: true,
        })
    }

    /// Attach only a reference to the certificate (the signer's subject URL)
    /// instead of embedding it; recipients then need a directory-backed
    /// trust resolver.
    pub fn with_certificate_reference(mut self) -> Self {
        self.embed_certificate = false;
        self
    }

    /// The certificate this signer attests under.
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    fn material(&self) -> CertificateMaterial {
        if self.embed_certificate {
            CertificateMaterial::Embedded(self.certificate.clone())
        } else {
            CertificateMaterial::Reference(self.certificate.subject.clone())
        }
    }
}

#[async_trait]
impl Signer for InMemorySigner {
    async fn sign(&self, canonical: &[u8]) -> Result<Attestation, SignerError> {
        let signature = self.signing_key.sign(canonical);
        Ok(Attestation {
            signature: signature.to_bytes().to_vec(),
            certificate: self.material(),
        })
    }
}

/// Signer loading key material and certificate from disk.
///
/// The key file holds a hex-encoded 32-byte Ed25519 seed; the certificate
/// file holds the certificate as JSON.
#[derive(Debug)]
pub struct FileSigner {
    inner: InMemorySigner,
}

impl FileSigner {
    /// Load a signer from a key file and a certificate file.
    pub fn load(key_path: impl AsRef<Path>, cert_path: impl AsRef<Path>) -> Result<Self, SignerError> {
        let key_path = key_path.as_ref();
        let cert_path = cert_path.as_ref();

        let key_text = std::fs::read_to_string(key_path).map_err(|source| SignerError::Io {
            path: key_path.display().to_string(),
            source,
        })?;
        let seed: [u8; 32] = hex::decode(key_text.trim())
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| SignerError::MalformedKey {
                path: key_path.display().to_string(),
            })?;
        let signing_key = SigningKey::from_bytes(&seed);

        let cert_text = std::fs::read_to_string(cert_path).map_err(|source| SignerError::Io {
            path: cert_path.display().to_string(),
            source,
        })?;
        let certificate: Certificate =
            serde_json::from_str(&cert_text).map_err(|e| SignerError::MalformedCertificate {
                path: cert_path.display().to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            inner: InMemorySigner::new(signing_key, certificate)?,
        })
    }

    /// The certificate this signer attests under.
    pub fn certificate(&self) -> &Certificate {
        self.inner.certificate()
    }
}

#[async_trait]
impl Signer for FileSigner {
    async fn sign(&self, canonical: &[u8]) -> Result<Attestation, SignerError> {
        self.inner.sign(canonical).await
    }
}
