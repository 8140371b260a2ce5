//! # Domain Models
//!
//! These structs represent the core entities of icewatch.
//! We use UUID v7 for time-ordered, globally unique identification.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A `(latitude, longitude)` pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// A user-submitted sighting with a decaying time-to-live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: DateTime<Utc>,
    /// Recomputed on every vote mutation; the report is dead once `now`
    /// reaches it.
    pub validity_expires_at: DateTime<Utc>,
    /// Cached tally, always equal to the live `up` vote rows.
    pub upvote_count: u32,
    /// Cached tally, always equal to the live `down` vote rows.
    pub downvote_count: u32,
}

impl Report {
    pub fn location(&self) -> Location {
        Location::new(self.latitude, self.longitude)
    }

    /// Expiry is a read-time predicate, never a stored flag.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.validity_expires_at > now
    }

    pub fn tally(&self) -> VoteTally {
        VoteTally {
            up: self.upvote_count,
            down: self.downvote_count,
        }
    }
}

/// A report annotated for the "reports near you" warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportWithDistance {
    #[serde(flatten)]
    pub report: Report,
    pub distance_meters: f64,
    /// Share of upvotes in percent, 50 when nobody voted.
    pub probability: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Up,
    Down,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::Up => "up",
            VoteType::Down => "down",
        }
    }

    /// Accepts both the storage spelling (`up`) and the API spelling
    /// (`upvote`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "up" | "upvote" => Some(VoteType::Up),
            "down" | "downvote" => Some(VoteType::Down),
            _ => None,
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approximates one anonymous human: both halves are one-way digests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterIdentity {
    pub fingerprint_hash: String,
    pub ip_hash: String,
}

impl VoterIdentity {
    pub fn new(fingerprint_hash: impl Into<String>, ip_hash: impl Into<String>) -> Self {
        Self {
            fingerprint_hash: fingerprint_hash.into(),
            ip_hash: ip_hash.into(),
        }
    }
}

/// One live vote row. Unique per `(report_id, voter)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub id: Uuid,
    pub report_id: Uuid,
    pub voter: VoterIdentity,
    pub vote_type: VoteType,
    /// Time of the most recent cast or switch.
    pub created_at: DateTime<Utc>,
}

/// A change to one identity's vote on one report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteChange {
    /// Creates the row, or switches the existing one to `vote_type`.
    Cast { voter: VoterIdentity, vote_type: VoteType },
    /// Deletes the row if there is one.
    Remove { voter: VoterIdentity },
}

impl VoteChange {
    pub fn voter(&self) -> &VoterIdentity {
        match self {
            VoteChange::Cast { voter, .. } | VoteChange::Remove { voter } => voter,
        }
    }
}

/// Live vote counts for one report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub up: u32,
    pub down: u32,
}

impl VoteTally {
    pub fn count(votes: &[Vote]) -> Self {
        votes.iter().fold(Self::default(), |mut tally, vote| {
            match vote.vote_type {
                VoteType::Up => tally.up += 1,
                VoteType::Down => tally.down += 1,
            }
            tally
        })
    }
}

/// Result of every Vote Ledger mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOutcome {
    pub upvote_count: u32,
    pub downvote_count: u32,
    pub new_expiry: DateTime<Utc>,
}

/// Discussion attached to a report. Content is stored HTML-escaped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub report_id: Uuid,
    pub content: String,
    pub author: VoterIdentity,
    pub created_at: DateTime<Utc>,
    /// Number of abuse flags raised against this comment.
    pub report_count: u32,
}

/// An abuse flag. Unique per `(comment_id, voter)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentReport {
    pub id: Uuid,
    pub comment_id: Uuid,
    pub voter: VoterIdentity,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentPage {
    pub comments: Vec<Comment>,
    pub has_more: bool,
}

/// Change notification emitted by storage adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreEvent {
    ReportInserted(Report),
    ReportUpdated(Report),
    ReportDeleted { id: Uuid },
    VoteUpserted { report_id: Uuid },
    VoteDeleted { report_id: Uuid },
}
