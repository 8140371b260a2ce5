//! # Vote Ledger
//!
//! Enforces one live vote per `(report, identity)` and keeps each report's
//! cached counts and expiry in step with the live vote rows.
//!
//! Every mutation is a single [`VoteRepository::apply_vote`] call: the
//! store changes the vote row, recounts, recomputes expiry and persists
//! counts + expiry as one unit, serialised per report. A failure anywhere
//! in that sequence leaves nothing behind, so retrying is always safe.

use std::sync::Arc;
use std::time::Duration;

use domains::{Clock, Report, Result, VoteChange, VoteOutcome, VoteRepository, VoteType, VoterIdentity};
use tracing::{debug, info};
use uuid::Uuid;

use crate::bounded::bounded;
use crate::cooldown::{CooldownAction, Cooldowns};
use crate::DEFAULT_STORAGE_TIMEOUT;

pub struct VoteService {
    votes: Arc<dyn VoteRepository>,
    clock: Arc<dyn Clock>,
    cooldowns: Option<Arc<Cooldowns>>,
    storage_timeout: Duration,
}

impl VoteService {
    pub fn new(votes: Arc<dyn VoteRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            votes,
            clock,
            cooldowns: None,
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    pub fn with_cooldowns(mut self, cooldowns: Arc<Cooldowns>) -> Self {
        self.cooldowns = Some(cooldowns);
        self
    }

    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    /// Casts or switches a vote.
    ///
    /// Fails with `DuplicateVote` (and changes nothing) when the identity
    /// already holds a vote of the same type.
    pub async fn cast_vote(&self, report_id: Uuid, voter: &VoterIdentity, vote_type: VoteType) -> Result<VoteOutcome> {
        if let Some(cooldowns) = &self.cooldowns {
            cooldowns.try_acquire(CooldownAction::Vote, voter, self.clock.now())?;
        }

        let change = VoteChange::Cast {
            voter: voter.clone(),
            vote_type,
        };
        let stored = self.apply(report_id, &change).await.inspect_err(|e| {
            debug!(report_id = %report_id, vote_type = %vote_type, error = %e, "vote rejected");
        })?;
        debug!(report_id = %report_id, vote_type = %vote_type, "vote cast");
        Ok(Self::outcome(&stored))
    }

    /// Deletes the identity's vote if there is one. Removing a vote that
    /// does not exist is not an error; the tally is recomputed either way.
    pub async fn remove_vote(&self, report_id: Uuid, voter: &VoterIdentity) -> Result<VoteOutcome> {
        let change = VoteChange::Remove { voter: voter.clone() };
        let stored = self.apply(report_id, &change).await?;
        Ok(Self::outcome(&stored))
    }

    pub async fn get_vote(&self, report_id: Uuid, voter: &VoterIdentity) -> Result<Option<VoteType>> {
        let vote = bounded(self.storage_timeout, "find_vote", self.votes.find_vote(report_id, voter)).await?;
        Ok(vote.map(|v| v.vote_type))
    }

    async fn apply(&self, report_id: Uuid, change: &VoteChange) -> Result<Report> {
        let stored = bounded(
            self.storage_timeout,
            "apply_vote",
            self.votes.apply_vote(report_id, change, self.clock.now()),
        )
        .await?;

        info!(
            report_id = %stored.id,
            upvotes = stored.upvote_count,
            downvotes = stored.downvote_count,
            expires_at = %stored.validity_expires_at,
            "report validity recomputed"
        );
        Ok(stored)
    }

    fn outcome(report: &Report) -> VoteOutcome {
        VoteOutcome {
            upvote_count: report.upvote_count,
            downvote_count: report.downvote_count,
            new_expiry: report.validity_expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use domains::testing::ManualClock;
    use domains::{DomainError, MockVoteRepository, ReportRepository, VoteRepository, VoteTally};
    use storage_adapters::memory::InMemoryStore;

    struct Fixture {
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
        service: VoteService,
        report: Report,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::at_epoch());
        let now = clock.now();
        let report = Report {
            id: Uuid::now_v7(),
            latitude: 40.0,
            longitude: -73.0,
            created_at: now,
            validity_expires_at: now + ChronoDuration::minutes(60),
            upvote_count: 0,
            downvote_count: 0,
        };
        store.insert_report(&report).await.unwrap();
        let service = VoteService::new(store.clone(), clock.clone());
        Fixture {
            store,
            clock,
            service,
            report,
        }
    }

    fn voter(n: u32) -> VoterIdentity {
        VoterIdentity::new(format!("fp{n}"), format!("ip{n}"))
    }

    #[tokio::test]
    async fn test_first_upvote_extends_to_cap() {
        let f = fixture().await;
        let outcome = f.service.cast_vote(f.report.id, &voter(1), VoteType::Up).await.unwrap();
        assert_eq!(outcome.upvote_count, 1);
        assert_eq!(outcome.downvote_count, 0);
        assert_eq!(outcome.new_expiry, f.report.created_at + ChronoDuration::minutes(70));
    }

    #[tokio::test]
    async fn test_duplicate_vote_changes_nothing() {
        let f = fixture().await;
        let first = f.service.cast_vote(f.report.id, &voter(1), VoteType::Down).await.unwrap();
        let err = f.service.cast_vote(f.report.id, &voter(1), VoteType::Down).await.unwrap_err();
        assert_eq!(err, DomainError::DuplicateVote(VoteType::Down));

        let stored = f.store.get_report(f.report.id).await.unwrap().unwrap();
        assert_eq!(stored.downvote_count, first.downvote_count);
        assert_eq!(stored.validity_expires_at, first.new_expiry);
    }

    #[tokio::test]
    async fn test_switch_moves_one_count_each_way() {
        let f = fixture().await;
        f.service.cast_vote(f.report.id, &voter(1), VoteType::Up).await.unwrap();
        f.service.cast_vote(f.report.id, &voter(2), VoteType::Up).await.unwrap();

        let switched = f.service.cast_vote(f.report.id, &voter(1), VoteType::Down).await.unwrap();
        assert_eq!((switched.upvote_count, switched.downvote_count), (1, 1));
        assert_eq!(f.store.tally(f.report.id).await.unwrap(), VoteTally { up: 1, down: 1 });
        assert_eq!(f.service.get_vote(f.report.id, &voter(1)).await.unwrap(), Some(VoteType::Down));
    }

    #[tokio::test]
    async fn test_remove_missing_vote_is_noop() {
        let f = fixture().await;
        f.service.cast_vote(f.report.id, &voter(1), VoteType::Up).await.unwrap();
        let outcome = f.service.remove_vote(f.report.id, &voter(9)).await.unwrap();
        assert_eq!((outcome.upvote_count, outcome.downvote_count), (1, 0));
        assert_eq!(f.service.get_vote(f.report.id, &voter(9)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_vote_restores_base_validity() {
        let f = fixture().await;
        f.service.cast_vote(f.report.id, &voter(1), VoteType::Up).await.unwrap();
        let outcome = f.service.remove_vote(f.report.id, &voter(1)).await.unwrap();
        assert_eq!(outcome.upvote_count, 0);
        assert_eq!(outcome.new_expiry, f.report.created_at + ChronoDuration::minutes(60));
    }

    #[tokio::test]
    async fn test_heavy_downvotes_floor_at_now() {
        let f = fixture().await;
        f.clock.advance(ChronoDuration::minutes(45));
        let mut last = None;
        // 40 downvotes = 16 minutes of penalty, past the remaining 15
        for n in 0..40 {
            last = Some(f.service.cast_vote(f.report.id, &voter(n), VoteType::Down).await.unwrap());
        }
        let outcome = last.unwrap();
        assert_eq!(outcome.downvote_count, 40);
        assert_eq!(outcome.new_expiry, f.clock.now());
        let stored = f.store.get_report(f.report.id).await.unwrap().unwrap();
        assert!(!stored.is_active(f.clock.now()));
    }

    #[tokio::test]
    async fn test_unknown_report_is_not_found() {
        let f = fixture().await;
        let missing = Uuid::now_v7();
        let err = f.service.cast_vote(missing, &voter(1), VoteType::Up).await.unwrap_err();
        assert_eq!(err, DomainError::NotFound("report", missing));
    }

    #[tokio::test]
    async fn test_concurrent_votes_on_one_report_do_not_lose_updates() {
        let f = fixture().await;
        let service = Arc::new(f.service);
        let mut handles = Vec::new();
        for n in 0..50 {
            let service = service.clone();
            let id = f.report.id;
            let vote_type = if n % 2 == 0 { VoteType::Up } else { VoteType::Down };
            handles.push(tokio::spawn(async move { service.cast_vote(id, &voter(n), vote_type).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let stored = f.store.get_report(f.report.id).await.unwrap().unwrap();
        assert_eq!((stored.upvote_count, stored.downvote_count), (25, 25));
        assert_eq!(f.store.tally(f.report.id).await.unwrap(), stored.tally());
    }

    #[tokio::test]
    async fn test_cooldown_rejects_rapid_votes() {
        let f = fixture().await;
        let service = f.service.with_cooldowns(Arc::new(Cooldowns::default()));
        service.cast_vote(f.report.id, &voter(1), VoteType::Up).await.unwrap();
        let err = service.remove_vote(f.report.id, &voter(1)).await;
        assert!(err.is_ok(), "removal is not rate limited");
        let err = service.cast_vote(f.report.id, &voter(1), VoteType::Down).await.unwrap_err();
        assert!(matches!(err, DomainError::RateLimited { .. }));
        f.clock.advance(ChronoDuration::seconds(1));
        service.cast_vote(f.report.id, &voter(1), VoteType::Down).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_vote_write_can_be_retried() {
        let clock = Arc::new(ManualClock::at_epoch());
        let now = clock.now();
        let report_id = Uuid::now_v7();

        let mut votes = MockVoteRepository::new();
        let mut seq = mockall::Sequence::new();
        votes
            .expect_apply_vote()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(DomainError::StorageUnavailable("connection reset".into())));
        votes
            .expect_apply_vote()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |id, change, at| {
                assert!(matches!(change, VoteChange::Cast { vote_type: VoteType::Up, .. }));
                Ok(Report {
                    id,
                    latitude: 0.0,
                    longitude: 0.0,
                    created_at: now,
                    validity_expires_at: at + ChronoDuration::minutes(70),
                    upvote_count: 1,
                    downvote_count: 0,
                })
            });

        let service = VoteService::new(Arc::new(votes), clock);
        let err = service.cast_vote(report_id, &voter(1), VoteType::Up).await.unwrap_err();
        assert_eq!(err, DomainError::StorageUnavailable("connection reset".into()));

        let outcome = service.cast_vote(report_id, &voter(1), VoteType::Up).await.unwrap();
        assert_eq!(outcome.upvote_count, 1);
        assert_eq!(outcome.new_expiry, now + ChronoDuration::minutes(70));
    }

    #[tokio::test]
    async fn test_rejected_vote_keeps_counts_and_rows_in_step() {
        let f = fixture().await;
        f.service.cast_vote(f.report.id, &voter(1), VoteType::Up).await.unwrap();
        let missing = Uuid::now_v7();
        assert!(f.service.cast_vote(missing, &voter(1), VoteType::Up).await.is_err());
        assert!(f.service.cast_vote(f.report.id, &voter(1), VoteType::Up).await.is_err());

        let stored = f.store.get_report(f.report.id).await.unwrap().unwrap();
        assert_eq!(f.store.tally(f.report.id).await.unwrap(), stored.tally());
        assert_eq!(f.store.vote_count(), 1);
    }
}
