//! Trust resolution backends.
//!
//! The verification engine only depends on the [`TrustResolver`] contract:
//! given the certificate material attached to a signature and the instant the
//! signature was created, return the resolved certificate when it chains to a
//! configured trust root and its validity window covers that instant.
//!
//! Two resolvers cover the non-networked sourcing policies: certificates
//! embedded in the record itself, and a local subject→certificate directory.
//! [`CachedResolver`] decorates any resolver with an LRU cache for
//! high-throughput verification paths; resolution outcomes (including
//! refusals) are cached, so repeated verification of the same record does the
//! chain check once.

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use lru::LruCache;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::types::certificate::{Certificate, CertificateMaterial};

/// Error raised by trust resolution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrustError {
    /// The certificate does not chain to the root or is outside its window.
    #[error("certificate for `{subject}` is not trusted: {reason}")]
    Untrusted {
        /// Subject of the rejected certificate.
        subject: String,
        /// Why the resolver rejected it.
        reason: String,
    },
    /// The material is a reference this resolver cannot look up.
    #[error("certificate reference `{0}` cannot be resolved")]
    Unresolvable(String),
    /// The backend failed (e.g. directory service unavailable).
    #[error("trust backend failure: {0}")]
    Backend(String),
}

/// Abstract trust-resolution contract.
///
/// `at` is the instant the signature under scrutiny was created; resolvers
/// judge certificate validity at that instant, so records stay verifiable
/// after their signers' certificates expire.
#[async_trait]
pub trait TrustResolver: Send + Sync {
    /// Resolve certificate material to a trusted certificate, or refuse.
    async fn resolve(
        &self,
        material: &CertificateMaterial,
        at: DateTime<Utc>,
    ) -> Result<Certificate, TrustError>;
}

/// Check a certificate against the configured roots and its validity window.
fn check_chain(
    roots: &[VerifyingKey],
    certificate: &Certificate,
    at: DateTime<Utc>,
) -> Result<(), TrustError> {
    let chains = roots
        .iter()
        .any(|root| certificate.verify_issuer(root).is_ok());
    if !chains {
        return Err(TrustError::Untrusted {
            subject: certificate.subject.clone(),
            reason: "issuer signature does not chain to a configured root".to_string(),
        });
    }
    if !certificate.valid_at(at) {
        return Err(TrustError::Untrusted {
            subject: certificate.subject.clone(),
            reason: format!("not valid at {}", at.to_rfc3339()),
        });
    }
    Ok(())
}

/// Resolver for self-contained records: trusts only certificates embedded in
/// the record, validated against the configured root keys.
pub struct SelfContainedResolver {
    roots: Vec<VerifyingKey>,
}

impl SelfContainedResolver {
    /// Create a resolver trusting a single root key.
    pub fn new(root: VerifyingKey) -> Self {
        Self { roots: vec![root] }
    }

    /// Create a resolver trusting any of the given root keys.
    pub fn with_roots(roots: Vec<VerifyingKey>) -> Self {
        Self { roots }
    }
}

#[async_trait]
impl TrustResolver for SelfContainedResolver {
    async fn resolve(
        &self,
        material: &CertificateMaterial,
        at: DateTime<Utc>,
    ) -> Result<Certificate, TrustError> {
        match material {
            CertificateMaterial::Embedded(certificate) => {
                check_chain(&self.roots, certificate, at)?;
                Ok(certificate.clone())
            }
            CertificateMaterial::Reference(reference) => {
                Err(TrustError::Unresolvable(reference.clone()))
            }
        }
    }
}

/// Resolver backed by a local subject→certificate table.
///
/// Resolves reference material from the table and applies the same root
/// checks as [`SelfContainedResolver`]; embedded material is validated
/// directly. The networked equivalent (fetching from a member directory
/// service) implements the same trait outside this crate.
pub struct LocalDirectoryResolver {
    roots: Vec<VerifyingKey>,
    directory: BTreeMap<String, Certificate>,
}

impl LocalDirectoryResolver {
    /// Create an empty directory trusting a single root key.
    pub fn new(root: VerifyingKey) -> Self {
        Self {
            roots: vec![root],
            directory: BTreeMap::new(),
        }
    }

    /// Register a member certificate under its subject URL.
    pub fn add_certificate(&mut self, certificate: Certificate) {
        self.directory
            .insert(certificate.subject.clone(), certificate);
    }

    /// Number of registered certificates.
    pub fn len(&self) -> usize {
        self.directory.len()
    }

    /// Whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.directory.is_empty()
    }
}

#[async_trait]
impl TrustResolver for LocalDirectoryResolver {
    async fn resolve(
        &self,
        material: &CertificateMaterial,
        at: DateTime<Utc>,
    ) -> Result<Certificate, TrustError> {
        let certificate = match material {
            CertificateMaterial::Embedded(certificate) => certificate,
            CertificateMaterial::Reference(reference) => self
                .directory
                .get(reference)
                .ok_or_else(|| TrustError::Unresolvable(reference.clone()))?,
        };
        check_chain(&self.roots, certificate, at)?;
        Ok(certificate.clone())
    }
}

/// Configuration for the resolution cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache.
    pub max_entries: usize,
    /// Whether to enable the cache.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            enabled: true,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Current number of entries in the cache.
    pub len: usize,
    /// Maximum capacity of the cache.
    pub cap: usize,
}

type CacheKey = (String, i64);
type CacheValue = Result<Certificate, TrustError>;

/// Caching decorator over any trust resolver.
///
/// Keyed by certificate fingerprint (or reference URL) plus the validity
/// instant; any parameter change is a cache miss and a full resolution.
pub struct CachedResolver<R> {
    inner: R,
    cache: Option<Arc<RwLock<LruCache<CacheKey, CacheValue>>>>,
}

impl<R: TrustResolver> CachedResolver<R> {
    /// Wrap a resolver with the default cache configuration.
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, CacheConfig::default())
    }

    /// Wrap a resolver with a custom cache configuration.
    pub fn with_config(inner: R, config: CacheConfig) -> Self {
        let cache = if config.enabled {
            let size = NonZeroUsize::new(config.max_entries)
                .unwrap_or_else(|| NonZeroUsize::new(1).expect("1 is non-zero"));
            Some(Arc::new(RwLock::new(LruCache::new(size))))
        } else {
            None
        };
        Self { inner, cache }
    }

    /// Get cache statistics. `None` when caching is disabled.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| {
            let cache = cache.read();
            CacheStats {
                len: cache.len(),
                cap: cache.cap().get(),
            }
        })
    }

    /// Clear the resolution cache. Does nothing when caching is disabled.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.write().clear();
        }
    }
}

#[async_trait]
impl<R: TrustResolver> TrustResolver for CachedResolver<R> {
    async fn resolve(
        &self,
        material: &CertificateMaterial,
        at: DateTime<Utc>,
    ) -> Result<Certificate, TrustError> {
        let key = (material.cache_key(), at.timestamp());

        if let Some(cache) = &self.cache {
            if let Some(outcome) = cache.read().peek(&key) {
                return outcome.clone();
            }
        }

        let outcome = self.inner.resolve(material, at).await;

        if let Some(cache) = &self.cache {
            cache.write().put(key, outcome.clone());
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::certificate::CertificateParams;
    use chrono::TimeZone;
    use ed25519_dalek::SigningKey;

    fn make_key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn make_certificate(issuer: &SigningKey, member: &SigningKey, serial: u64) -> Certificate {
        Certificate::issue(
            CertificateParams {
                serial,
                subject: format!("https://directory.core.trust.ib1.org/member/{serial}"),
                issuer: "signing-issuer-ca".to_string(),
                public_key: member.verifying_key(),
                roles: vec![],
                application: None,
                not_before: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                not_after: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            },
            issuer,
        )
    }

    fn mid_window() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_self_contained_accepts_embedded() {
        let issuer = make_key(1);
        let cert = make_certificate(&issuer, &make_key(2), 6);
        let resolver = SelfContainedResolver::new(issuer.verifying_key());

        let resolved = resolver
            .resolve(&CertificateMaterial::Embedded(cert.clone()), mid_window())
            .await
            .unwrap();
        assert_eq!(resolved, cert);
    }

    #[tokio::test]
    async fn test_self_contained_rejects_foreign_root() {
        let cert = make_certificate(&make_key(1), &make_key(2), 6);
        let resolver = SelfContainedResolver::new(make_key(9).verifying_key());

        let err = resolver
            .resolve(&CertificateMaterial::Embedded(cert), mid_window())
            .await
            .unwrap_err();
        assert!(matches!(err, TrustError::Untrusted { .. }));
    }

    #[tokio::test]
    async fn test_self_contained_rejects_expired() {
        let issuer = make_key(1);
        let cert = make_certificate(&issuer, &make_key(2), 6);
        let resolver = SelfContainedResolver::new(issuer.verifying_key());

        let after_expiry = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap();
        let err = resolver
            .resolve(&CertificateMaterial::Embedded(cert), after_expiry)
            .await
            .unwrap_err();
        assert!(matches!(err, TrustError::Untrusted { .. }));
    }

    #[tokio::test]
    async fn test_self_contained_cannot_resolve_references() {
        let resolver = SelfContainedResolver::new(make_key(1).verifying_key());
        let err = resolver
            .resolve(
                &CertificateMaterial::Reference("https://example.com/member/1".to_string()),
                mid_window(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TrustError::Unresolvable(_)));
    }

    #[tokio::test]
    async fn test_directory_resolves_reference() {
        let issuer = make_key(1);
        let cert = make_certificate(&issuer, &make_key(2), 6);
        let mut resolver = LocalDirectoryResolver::new(issuer.verifying_key());
        resolver.add_certificate(cert.clone());

        let resolved = resolver
            .resolve(
                &CertificateMaterial::Reference(cert.subject.clone()),
                mid_window(),
            )
            .await
            .unwrap();
        assert_eq!(resolved, cert);

        let err = resolver
            .resolve(
                &CertificateMaterial::Reference("https://unknown.example.com/".to_string()),
                mid_window(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TrustError::Unresolvable(_)));
    }

    #[tokio::test]
    async fn test_cached_resolver_hits() {
        let issuer = make_key(1);
        let cert = make_certificate(&issuer, &make_key(2), 6);
        let resolver = CachedResolver::new(SelfContainedResolver::new(issuer.verifying_key()));

        let material = CertificateMaterial::Embedded(cert);
        resolver.resolve(&material, mid_window()).await.unwrap();
        assert_eq!(resolver.cache_stats().unwrap().len, 1);

        // Same material + instant resolves from cache.
        resolver.resolve(&material, mid_window()).await.unwrap();
        assert_eq!(resolver.cache_stats().unwrap().len, 1);

        resolver.clear_cache();
        assert_eq!(resolver.cache_stats().unwrap().len, 0);
    }

    #[tokio::test]
    async fn test_cached_resolver_caches_refusals() {
        let cert = make_certificate(&make_key(1), &make_key(2), 6);
        let resolver = CachedResolver::new(SelfContainedResolver::new(make_key(9).verifying_key()));

        let material = CertificateMaterial::Embedded(cert);
        assert!(resolver.resolve(&material, mid_window()).await.is_err());
        assert_eq!(resolver.cache_stats().unwrap().len, 1);
        assert!(resolver.resolve(&material, mid_window()).await.is_err());
    }

    #[tokio::test]
    async fn test_cache_disabled() {
        let issuer = make_key(1);
        let resolver = CachedResolver::with_config(
            SelfContainedResolver::new(issuer.verifying_key()),
            CacheConfig {
                max_entries: 100,
                enabled: false,
            },
        );
        assert!(resolver.cache_stats().is_none());
    }
}
