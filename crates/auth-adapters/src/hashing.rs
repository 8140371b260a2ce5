use std::sync::Arc;

use async_trait::async_trait;
use domains::{IdentityProvider, Result, VoterIdentity};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Unhashed session inputs as collected from the device and network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawIdentity {
    pub fingerprint: String,
    pub ip: String,
}

/// Where raw identity inputs come from (device APIs, request headers,
/// configuration).
#[async_trait]
pub trait RawIdentitySource: Send + Sync {
    async fn collect(&self) -> Result<RawIdentity>;
}

/// A fixed fingerprint and IP, e.g. from configuration.
pub struct StaticRawIdentity {
    raw: RawIdentity,
}

impl StaticRawIdentity {
    pub fn new(fingerprint: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            raw: RawIdentity {
                fingerprint: fingerprint.into(),
                ip: ip.into(),
            },
        }
    }
}

#[async_trait]
impl RawIdentitySource for StaticRawIdentity {
    async fn collect(&self) -> Result<RawIdentity> {
        Ok(self.raw.clone())
    }
}

/// One-way digest of identity inputs.
///
/// Without a salt this is plain SHA-256, which matches hashes computed on
/// clients. With a salt it is HMAC-SHA256 keyed by the salt, so digests
/// cannot be correlated across deployments.
pub struct IdentityHasher {
    salt: Option<SecretString>,
}

impl IdentityHasher {
    pub fn unsalted() -> Self {
        Self { salt: None }
    }

    /// An empty salt is treated as no salt.
    pub fn salted(salt: SecretString) -> Self {
        if salt.expose_secret().is_empty() {
            Self::unsalted()
        } else {
            Self { salt: Some(salt) }
        }
    }

    pub fn is_salted(&self) -> bool {
        self.salt.is_some()
    }

    /// Lowercase hex, 64 characters.
    pub fn digest(&self, value: &str) -> String {
        if let Some(salt) = &self.salt {
            // HMAC accepts keys of any length
            if let Ok(mut mac) = HmacSha256::new_from_slice(salt.expose_secret().as_bytes()) {
                mac.update(value.as_bytes());
                return hex::encode(mac.finalize().into_bytes());
            }
        }
        hex::encode(Sha256::digest(value.as_bytes()))
    }

    pub fn identity(&self, raw: &RawIdentity) -> VoterIdentity {
        VoterIdentity::new(self.digest(&raw.fingerprint), self.digest(&raw.ip))
    }
}

/// [`IdentityProvider`] that hashes whatever its source collects.
pub struct HashedIdentityProvider {
    source: Arc<dyn RawIdentitySource>,
    hasher: IdentityHasher,
}

impl HashedIdentityProvider {
    pub fn new(source: Arc<dyn RawIdentitySource>, hasher: IdentityHasher) -> Self {
        Self { source, hasher }
    }
}

#[async_trait]
impl IdentityProvider for HashedIdentityProvider {
    async fn resolve(&self) -> Result<VoterIdentity> {
        let raw = self.source.collect().await?;
        tracing::debug!(salted = self.hasher.is_salted(), "hashing voter identity");
        Ok(self.hasher.identity(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::validation::is_valid_hash;

    #[test]
    fn test_unsalted_is_plain_sha256() {
        let hasher = IdentityHasher::unsalted();
        assert_eq!(
            hasher.digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_salted_is_hmac() {
        let hasher = IdentityHasher::salted(SecretString::from("key".to_string()));
        assert!(hasher.is_salted());
        assert_eq!(
            hasher.digest("The quick brown fox jumps over the lazy dog"),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_empty_salt_means_unsalted() {
        let hasher = IdentityHasher::salted(SecretString::from(String::new()));
        assert!(!hasher.is_salted());
    }

    #[tokio::test]
    async fn test_provider_hashes_both_halves() {
        let provider = HashedIdentityProvider::new(
            Arc::new(StaticRawIdentity::new("device-123", "203.0.113.7")),
            IdentityHasher::unsalted(),
        );
        let identity = provider.resolve().await.unwrap();
        assert!(is_valid_hash(&identity.fingerprint_hash));
        assert!(is_valid_hash(&identity.ip_hash));
        assert_ne!(identity.fingerprint_hash, identity.ip_hash);
        assert_eq!(identity, provider.resolve().await.unwrap());
    }
}
