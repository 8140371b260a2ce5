use std::future::Future;
use std::time::Duration;

use domains::{DomainError, Result};

/// Runs a storage call under a deadline.
pub(crate) async fn bounded<T, F>(limit: Duration, op: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(op, timeout_ms = limit.as_millis() as u64, "storage call timed out");
            Err(DomainError::StorageUnavailable(format!(
                "{op} timed out after {}ms",
                limit.as_millis()
            )))
        }
    }
}
