//! In-memory implementation of every storage port.
//!
//! All tables sit behind one mutex, so each trait call is atomic with
//! respect to the others. A vote change validates everything it needs
//! before touching a table, so a rejected change leaves no trace.
//! Mutations publish a [`StoreEvent`] after the lock is released.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domains::validity::compute_expiry;
use domains::{
    ChangeSource, ChangeSubscription, Comment, CommentReport, CommentRepository, DomainError, Report,
    ReportRepository, Result, StoreEvent, Vote, VoteChange, VoteRepository, VoteTally, VoterIdentity,
};
use uuid::Uuid;

use crate::changes::{ChangeBroadcaster, DEFAULT_EVENT_CAPACITY};
use crate::errors::StorageError;

#[derive(Default)]
struct Tables {
    reports: HashMap<Uuid, Report>,
    votes: HashMap<(Uuid, VoterIdentity), Vote>,
    comments: HashMap<Uuid, Comment>,
    flags: HashSet<(Uuid, VoterIdentity)>,
}

impl Tables {
    fn tally(&self, report_id: Uuid) -> VoteTally {
        let votes: Vec<Vote> = self
            .votes
            .values()
            .filter(|v| v.report_id == report_id)
            .cloned()
            .collect();
        VoteTally::count(&votes)
    }
}

pub struct InMemoryStore {
    tables: Mutex<Tables>,
    changes: ChangeBroadcaster,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// `capacity` bounds how far a change subscriber may lag before it is
    /// told to resynchronise.
    pub fn with_event_capacity(capacity: usize) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            changes: ChangeBroadcaster::new(capacity),
        }
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StorageError::Poisoned.into())
    }

    pub fn report_count(&self) -> usize {
        self.tables().map(|t| t.reports.len()).unwrap_or(0)
    }

    pub fn vote_count(&self) -> usize {
        self.tables().map(|t| t.votes.len()).unwrap_or(0)
    }

    pub fn comment_count(&self) -> usize {
        self.tables().map(|t| t.comments.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ReportRepository for InMemoryStore {
    async fn insert_report(&self, report: &Report) -> Result<()> {
        self.tables()?.reports.insert(report.id, report.clone());
        self.changes.publish(StoreEvent::ReportInserted(report.clone()));
        Ok(())
    }

    async fn get_report(&self, id: Uuid) -> Result<Option<Report>> {
        Ok(self.tables()?.reports.get(&id).cloned())
    }

    async fn list_active_reports(&self, now: DateTime<Utc>) -> Result<Vec<Report>> {
        let mut active: Vec<Report> = self
            .tables()?
            .reports
            .values()
            .filter(|r| r.is_active(now))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(active)
    }
}

#[async_trait]
impl VoteRepository for InMemoryStore {
    async fn find_vote(&self, report_id: Uuid, voter: &VoterIdentity) -> Result<Option<Vote>> {
        Ok(self.tables()?.votes.get(&(report_id, voter.clone())).cloned())
    }

    async fn apply_vote(&self, report_id: Uuid, change: &VoteChange, now: DateTime<Utc>) -> Result<Report> {
        let (vote_event, updated) = {
            let mut tables = self.tables()?;
            let created_at = tables
                .reports
                .get(&report_id)
                .map(|r| r.created_at)
                .ok_or(DomainError::NotFound("report", report_id))?;

            let key = (report_id, change.voter().clone());
            let vote_event = match change {
                VoteChange::Cast { voter, vote_type } => {
                    match tables.votes.get_mut(&key) {
                        Some(existing) if existing.vote_type == *vote_type => {
                            return Err(DomainError::DuplicateVote(*vote_type));
                        }
                        Some(existing) => {
                            existing.vote_type = *vote_type;
                            existing.created_at = now;
                        }
                        None => {
                            let vote = Vote {
                                id: Uuid::now_v7(),
                                report_id,
                                voter: voter.clone(),
                                vote_type: *vote_type,
                                created_at: now,
                            };
                            tables.votes.insert(key, vote);
                        }
                    }
                    Some(StoreEvent::VoteUpserted { report_id })
                }
                VoteChange::Remove { .. } => tables
                    .votes
                    .remove(&key)
                    .map(|_| StoreEvent::VoteDeleted { report_id }),
            };

            let tally = tables.tally(report_id);
            let report = tables
                .reports
                .get_mut(&report_id)
                .ok_or(DomainError::NotFound("report", report_id))?;
            report.upvote_count = tally.up;
            report.downvote_count = tally.down;
            report.validity_expires_at = compute_expiry(created_at, tally, now);
            (vote_event, report.clone())
        };

        if let Some(event) = vote_event {
            self.changes.publish(event);
        }
        self.changes.publish(StoreEvent::ReportUpdated(updated.clone()));
        Ok(updated)
    }

    async fn tally(&self, report_id: Uuid) -> Result<VoteTally> {
        Ok(self.tables()?.tally(report_id))
    }
}

#[async_trait]
impl CommentRepository for InMemoryStore {
    async fn insert_comment(&self, comment: &Comment) -> Result<()> {
        self.tables()?.comments.insert(comment.id, comment.clone());
        Ok(())
    }

    async fn get_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        Ok(self.tables()?.comments.get(&id).cloned())
    }

    async fn list_comments(&self, report_id: Uuid, offset: u64, limit: u64) -> Result<(Vec<Comment>, u64)> {
        let tables = self.tables()?;
        let mut comments: Vec<&Comment> = tables.comments.values().filter(|c| c.report_id == report_id).collect();
        comments.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        let total = comments.len() as u64;
        let page = comments
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn delete_comment(&self, id: Uuid) -> Result<()> {
        let mut tables = self.tables()?;
        tables.comments.remove(&id);
        tables.flags.retain(|(comment_id, _)| *comment_id != id);
        Ok(())
    }

    async fn has_flagged(&self, comment_id: Uuid, voter: &VoterIdentity) -> Result<bool> {
        Ok(self.tables()?.flags.contains(&(comment_id, voter.clone())))
    }

    async fn insert_flag(&self, flag: &CommentReport) -> Result<u32> {
        let mut tables = self.tables()?;
        let key = (flag.comment_id, flag.voter.clone());
        if tables.flags.contains(&key) {
            return Err(DomainError::DuplicateReportFlag(flag.comment_id));
        }
        let comment = tables
            .comments
            .get_mut(&flag.comment_id)
            .ok_or(DomainError::NotFound("comment", flag.comment_id))?;
        comment.report_count += 1;
        let count = comment.report_count;
        tables.flags.insert(key);
        Ok(count)
    }
}

impl ChangeSource for InMemoryStore {
    fn subscribe(&self) -> Box<dyn ChangeSubscription> {
        self.changes.subscribe()
    }
}
