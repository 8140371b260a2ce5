//! Session identity with a short-lived cache.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use domains::{Clock, DomainError, IdentityProvider, Result, VoterIdentity};
use tokio::sync::Mutex;

/// How long a resolved identity is reused.
pub const DEFAULT_IDENTITY_TTL_SECS: i64 = 300;

/// Wraps an [`IdentityProvider`] so repeated votes and comments inside the
/// TTL do not hit the provider again. Concurrent callers share one lookup.
pub struct IdentityCache {
    provider: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    timeout: Duration,
    cached: Mutex<Option<(VoterIdentity, DateTime<Utc>)>>,
}

impl IdentityCache {
    pub fn new(provider: Arc<dyn IdentityProvider>, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider,
            clock,
            ttl: chrono::Duration::seconds(DEFAULT_IDENTITY_TTL_SECS),
            timeout: Duration::from_secs(10),
            cached: Mutex::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn identity(&self) -> Result<VoterIdentity> {
        let mut cached = self.cached.lock().await;
        let now = self.clock.now();
        if let Some((identity, at)) = cached.as_ref() {
            if now - *at < self.ttl {
                return Ok(identity.clone());
            }
        }

        let identity = match tokio::time::timeout(self.timeout, self.provider.resolve()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(DomainError::StorageUnavailable(
                    "identity lookup timed out".to_string(),
                ))
            }
        };
        tracing::debug!("voter identity refreshed");
        *cached = Some((identity.clone(), now));
        Ok(identity)
    }

    pub async fn clear(&self) {
        *self.cached.lock().await = None;
    }
}
