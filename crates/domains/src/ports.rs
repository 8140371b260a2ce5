//! # Core Traits (Ports)
//!
//! Any adapter must implement these traits to be used by the binary.
//! Every method returns [`DomainError`](crate::DomainError); adapters map
//! their own failures to `StorageUnavailable` or `LocationUnavailable`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{
    Comment, CommentReport, Location, Report, StoreEvent, Vote, VoteChange, VoteTally, VoterIdentity,
};

/// Persistence contract for reports.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ReportRepository: Send + Sync {
    async fn insert_report(&self, report: &Report) -> Result<()>;
    async fn get_report(&self, id: Uuid) -> Result<Option<Report>>;

    /// Reports with `validity_expires_at > now`, newest `created_at` first.
    async fn list_active_reports(&self, now: DateTime<Utc>) -> Result<Vec<Report>>;
}

/// Persistence contract for votes.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait VoteRepository: Send + Sync {
    async fn find_vote(&self, report_id: Uuid, voter: &VoterIdentity) -> Result<Option<Vote>>;

    /// Applies `change` to the vote rows, recounts them, and writes the new
    /// counts plus the expiry from [`compute_expiry`](crate::validity::compute_expiry)
    /// evaluated at `now` to the report. All of it commits as one unit or
    /// not at all; concurrent calls for the same report are serialised.
    ///
    /// Fails with `NotFound` for an unknown report and with `DuplicateVote`
    /// when a `Cast` repeats the identity's current vote type. Neither
    /// failure leaves any write behind. Returns the stored report.
    async fn apply_vote(&self, report_id: Uuid, change: &VoteChange, now: DateTime<Utc>) -> Result<Report>;

    /// Live count of vote rows for the report, partitioned by type.
    async fn tally(&self, report_id: Uuid) -> Result<VoteTally>;
}

/// Persistence contract for comments and their abuse flags.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CommentRepository: Send + Sync {
    async fn insert_comment(&self, comment: &Comment) -> Result<()>;
    async fn get_comment(&self, id: Uuid) -> Result<Option<Comment>>;

    /// One page of comments, newest first, plus the total for the report.
    async fn list_comments(&self, report_id: Uuid, offset: u64, limit: u64) -> Result<(Vec<Comment>, u64)>;

    async fn delete_comment(&self, id: Uuid) -> Result<()>;

    async fn has_flagged(&self, comment_id: Uuid, voter: &VoterIdentity) -> Result<bool>;

    /// Records the flag and bumps `report_count`; returns the new count.
    async fn insert_flag(&self, flag: &CommentReport) -> Result<u32>;
}

/// Wall-clock source. Injected so expiry arithmetic is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Produces the user's current position, or fails.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Short label used in logs (e.g. "device", "ip-api").
    fn name(&self) -> String;
    async fn locate(&self) -> Result<Location>;
}

/// Supplies the hashed `(fingerprint, ip)` pair for the current session.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self) -> Result<VoterIdentity>;
}

/// What a change subscription yields.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeNotice {
    Event(StoreEvent),
    /// The subscriber fell behind and `n` events were dropped; consumers
    /// must resynchronise from a fresh snapshot.
    Missed(u64),
}

/// A live stream of storage change notifications.
#[async_trait]
pub trait ChangeSubscription: Send {
    /// Next notice, or `None` once the source is gone.
    async fn recv(&mut self) -> Option<ChangeNotice>;
}

/// Insert/update/delete notifications for reports and votes.
pub trait ChangeSource: Send + Sync {
    fn subscribe(&self) -> Box<dyn ChangeSubscription>;
}
