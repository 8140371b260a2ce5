//! # Validity Engine
//!
//! Computes when a report stops being active from its creation time and
//! its current vote tally. The result is always recomputed from scratch
//! (never incrementally), so replaying the same tally yields the same
//! expiry.
//!
//! # Upvote bonus
//! The bonus is `min(upvotes * 20, 10)` minutes: one upvote already hits the
//! cap, so a report only ever gets 0 or 10 extra minutes. This literal
//! behaviour is kept for compatibility with existing clients.

use chrono::{DateTime, Duration, Utc};

use crate::models::VoteTally;

/// Lifetime of a report without any votes.
pub const BASE_VALIDITY_MINUTES: i64 = 60;

/// Extension granted per upvote, before capping.
pub const UPVOTE_EXTENSION_MINUTES: i64 = 20;

/// Maximum total bonus from upvotes.
pub const UPVOTE_BONUS_CAP_MINUTES: i64 = 10;

/// Upper bound for any report, measured from `created_at` (1h10).
pub const MAX_VALIDITY_CAP_MINUTES: i64 = 70;

/// Downvotes needed to trigger one time reduction.
pub const DOWNVOTES_PER_BATCH: u32 = 5;

/// Minutes removed per full batch of downvotes.
pub const MINUTES_PER_BATCH: i64 = 2;

pub fn upvote_bonus(upvotes: u32) -> Duration {
    let minutes = (i64::from(upvotes) * UPVOTE_EXTENSION_MINUTES).min(UPVOTE_BONUS_CAP_MINUTES);
    Duration::minutes(minutes)
}

pub fn downvote_penalty(downvotes: u32) -> Duration {
    let batches = i64::from(downvotes / DOWNVOTES_PER_BATCH);
    Duration::minutes(batches * MINUTES_PER_BATCH)
}

/// Expiry for a report created at `created_at` holding `tally`, evaluated
/// at `now`.
///
/// Bounded above by `created_at + MAX_VALIDITY_CAP_MINUTES` and below by
/// `now`: a heavily downvoted report expires immediately, but its timestamp
/// never moves into the past.
pub fn compute_expiry(created_at: DateTime<Utc>, tally: VoteTally, now: DateTime<Utc>) -> DateTime<Utc> {
    let base = created_at + Duration::minutes(BASE_VALIDITY_MINUTES);
    let raw = base + upvote_bonus(tally.up) - downvote_penalty(tally.down);
    let capped = raw.min(created_at + Duration::minutes(MAX_VALIDITY_CAP_MINUTES));
    capped.max(now)
}

/// Expiry of a freshly created report.
pub fn initial_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    compute_expiry(now, VoteTally::default(), now)
}

/// Share of upvotes in percent, rounded; 50 when nobody voted.
pub fn probability(tally: VoteTally) -> u8 {
    let total = tally.up + tally.down;
    if total == 0 {
        return 50;
    }
    ((f64::from(tally.up) / f64::from(total)) * 100.0).round() as u8
}

/// Whole minutes left before expiry, never negative.
pub fn time_remaining_minutes(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expires_at - now).num_minutes().max(0)
}

/// Remaining lifetime as a percentage of the maximum validity window.
pub fn time_remaining_progress(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    if expires_at <= now {
        return 0.0;
    }
    let minutes = time_remaining_minutes(expires_at, now) as f64;
    (minutes / MAX_VALIDITY_CAP_MINUTES as f64 * 100.0).clamp(0.0, 100.0)
}

/// Countdown as `m:ss`, `0:00` once expired.
pub fn format_time_remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if expires_at <= now {
        return "0:00".to_string();
    }
    let total_seconds = (expires_at - now).num_seconds();
    format!("{}:{:02}", total_seconds / 60, total_seconds % 60)
}
