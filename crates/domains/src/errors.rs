//! # DomainError
//!
//! Centralized error handling for the icewatch ecosystem.
//! Every port and service returns this type; adapters map their own
//! failures into `StorageUnavailable` / `LocationUnavailable`.

use thiserror::Error;
use uuid::Uuid;

use crate::models::VoteType;

/// The primary error type for all icewatch operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Coordinates outside [-90,90] / [-180,180], or not finite.
    #[error("invalid location: latitude {latitude}, longitude {longitude}")]
    InvalidLocation { latitude: f64, longitude: f64 },

    /// Comment empty after trimming or longer than the limit.
    #[error("invalid comment: {0}")]
    InvalidComment(String),

    /// The identity already holds a vote of this type on the report.
    #[error("you have already voted {0} on this report")]
    DuplicateVote(VoteType),

    /// The identity already flagged this comment.
    #[error("you already reported comment {0}")]
    DuplicateReportFlag(Uuid),

    /// Resource not found (e.g., Report, Comment)
    #[error("{0} not found with ID {1}")]
    NotFound(&'static str, Uuid),

    /// Underlying store unreachable, errored or timed out.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Geolocation failed. Callers degrade to "no location".
    #[error("location unavailable: {0}")]
    LocationUnavailable(String),

    /// Per-identity cooldown still running.
    #[error("too many requests: retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

impl DomainError {
    /// Validation and conflict errors are the caller's to fix; the rest are
    /// infrastructure failures.
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            DomainError::StorageUnavailable(_) | DomainError::LocationUnavailable(_)
        )
    }
}

/// A specialized Result type for icewatch logic.
pub type Result<T> = std::result::Result<T, DomainError>;
