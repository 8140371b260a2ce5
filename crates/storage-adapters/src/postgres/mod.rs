//! # PostgreSQL Store
//!
//! Maps the relational model to the `domains` types with runtime-checked
//! queries. A vote change runs in one transaction that first takes the
//! report row with `SELECT ... FOR UPDATE`, so concurrent changes to the
//! same report serialise across every instance sharing the database, and
//! the vote row, counts and expiry commit together.
//!
//! Change notifications come from database triggers (`pg_notify`), which
//! means writes made by other instances reach this one's subscribers too.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domains::validity::compute_expiry;
use domains::{
    ChangeSource, ChangeSubscription, Comment, CommentReport, CommentRepository, DomainError, Report,
    ReportRepository, Result, StoreEvent, Vote, VoteChange, VoteRepository, VoteTally, VoteType, VoterIdentity,
};
use sqlx::postgres::{PgConnection, PgListener, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::changes::ChangeBroadcaster;
use crate::errors::StorageError;

/// Channel the schema triggers notify on.
pub const CHANGE_CHANNEL: &str = "icewatch_changes";

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

fn db(err: sqlx::Error) -> DomainError {
    StorageError::Database(err).into()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(e) if e.is_unique_violation())
}

fn count(raw: i32) -> u32 {
    raw.max(0) as u32
}

const TALLY_SQL: &str = "SELECT COUNT(*) FILTER (WHERE vote_type = 'up') AS up, \
                                COUNT(*) FILTER (WHERE vote_type = 'down') AS down \
                         FROM votes WHERE report_id = $1";

async fn tally_on(conn: &mut PgConnection, report_id: Uuid) -> Result<VoteTally> {
    let row = sqlx::query(TALLY_SQL)
        .bind(report_id)
        .fetch_one(conn)
        .await
        .map_err(db)?;
    let up: i64 = row.try_get("up").map_err(db)?;
    let down: i64 = row.try_get("down").map_err(db)?;
    Ok(VoteTally {
        up: up.max(0) as u32,
        down: down.max(0) as u32,
    })
}

fn report_from_row(row: &PgRow) -> std::result::Result<Report, StorageError> {
    Ok(Report {
        id: row.try_get("id")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        created_at: row.try_get("created_at")?,
        validity_expires_at: row.try_get("validity_expires_at")?,
        upvote_count: count(row.try_get("upvote_count")?),
        downvote_count: count(row.try_get("downvote_count")?),
    })
}

fn voter_from_row(row: &PgRow) -> std::result::Result<VoterIdentity, StorageError> {
    Ok(VoterIdentity::new(
        row.try_get::<String, _>("fingerprint_hash")?,
        row.try_get::<String, _>("ip_hash")?,
    ))
}

fn vote_from_row(row: &PgRow) -> std::result::Result<Vote, StorageError> {
    let raw: String = row.try_get("vote_type")?;
    let vote_type = VoteType::parse(&raw).ok_or_else(|| StorageError::Decode(format!("vote_type {raw:?}")))?;
    Ok(Vote {
        id: row.try_get("id")?,
        report_id: row.try_get("report_id")?,
        voter: voter_from_row(row)?,
        vote_type,
        created_at: row.try_get("created_at")?,
    })
}

fn comment_from_row(row: &PgRow) -> std::result::Result<Comment, StorageError> {
    Ok(Comment {
        id: row.try_get("id")?,
        report_id: row.try_get("report_id")?,
        content: row.try_get("content")?,
        author: voter_from_row(row)?,
        created_at: row.try_get("created_at")?,
        report_count: count(row.try_get("report_count")?),
    })
}

pub struct PostgresStore {
    pool: PgPool,
    changes: ChangeBroadcaster,
}

impl PostgresStore {
    pub async fn connect(url: &str, max_connections: u32, acquire_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(db)?;
        info!(max_connections, "connected to postgres");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            changes: ChangeBroadcaster::default(),
        }
    }

    /// Creates tables, indexes and notification triggers if missing.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await.map_err(db)?;
        Ok(())
    }

    /// Starts relaying `pg_notify` payloads to local subscribers. The
    /// listener reconnects on its own; notifications sent while it is
    /// disconnected are lost, which the polling feed covers.
    pub async fn listen(&self) -> Result<JoinHandle<()>> {
        let mut listener = PgListener::connect_with(&self.pool).await.map_err(db)?;
        listener.listen(CHANGE_CHANNEL).await.map_err(db)?;
        let changes = self.changes.clone();

        Ok(tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => match serde_json::from_str::<StoreEvent>(notification.payload()) {
                        Ok(event) => changes.publish(event),
                        Err(e) => warn!(error = %e, "undecodable change notification"),
                    },
                    Err(e) => {
                        warn!(error = %e, "change listener error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }))
    }
}

#[async_trait]
impl ReportRepository for PostgresStore {
    async fn insert_report(&self, report: &Report) -> Result<()> {
        sqlx::query(
            "INSERT INTO reports (id, latitude, longitude, created_at, validity_expires_at, upvote_count, downvote_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(report.id)
        .bind(report.latitude)
        .bind(report.longitude)
        .bind(report.created_at)
        .bind(report.validity_expires_at)
        .bind(report.upvote_count as i32)
        .bind(report.downvote_count as i32)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn get_report(&self, id: Uuid) -> Result<Option<Report>> {
        let row = sqlx::query("SELECT * FROM reports WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        Ok(row.as_ref().map(report_from_row).transpose()?)
    }

    async fn list_active_reports(&self, now: DateTime<Utc>) -> Result<Vec<Report>> {
        let rows = sqlx::query("SELECT * FROM reports WHERE validity_expires_at > $1 ORDER BY created_at DESC")
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        Ok(rows.iter().map(report_from_row).collect::<std::result::Result<_, _>>()?)
    }
}

#[async_trait]
impl VoteRepository for PostgresStore {
    async fn find_vote(&self, report_id: Uuid, voter: &VoterIdentity) -> Result<Option<Vote>> {
        let row = sqlx::query("SELECT * FROM votes WHERE report_id = $1 AND fingerprint_hash = $2 AND ip_hash = $3")
            .bind(report_id)
            .bind(&voter.fingerprint_hash)
            .bind(&voter.ip_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        Ok(row.as_ref().map(vote_from_row).transpose()?)
    }

    /// Dropping the transaction on any early return rolls it back.
    async fn apply_vote(&self, report_id: Uuid, change: &VoteChange, now: DateTime<Utc>) -> Result<Report> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let created_at: DateTime<Utc> = sqlx::query("SELECT created_at FROM reports WHERE id = $1 FOR UPDATE")
            .bind(report_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?
            .ok_or(DomainError::NotFound("report", report_id))?
            .try_get("created_at")
            .map_err(db)?;

        let voter = change.voter();
        match change {
            VoteChange::Cast { vote_type, .. } => {
                let existing = sqlx::query(
                    "SELECT * FROM votes WHERE report_id = $1 AND fingerprint_hash = $2 AND ip_hash = $3",
                )
                .bind(report_id)
                .bind(&voter.fingerprint_hash)
                .bind(&voter.ip_hash)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db)?
                .as_ref()
                .map(vote_from_row)
                .transpose()?;

                match existing {
                    Some(vote) if vote.vote_type == *vote_type => {
                        return Err(DomainError::DuplicateVote(*vote_type));
                    }
                    Some(vote) => {
                        sqlx::query("UPDATE votes SET vote_type = $2, created_at = $3 WHERE id = $1")
                            .bind(vote.id)
                            .bind(vote_type.as_str())
                            .bind(now)
                            .execute(&mut *tx)
                            .await
                            .map_err(db)?;
                    }
                    None => {
                        let inserted = sqlx::query(
                            "INSERT INTO votes (id, report_id, fingerprint_hash, ip_hash, vote_type, created_at) \
                             VALUES ($1, $2, $3, $4, $5, $6)",
                        )
                        .bind(Uuid::now_v7())
                        .bind(report_id)
                        .bind(&voter.fingerprint_hash)
                        .bind(&voter.ip_hash)
                        .bind(vote_type.as_str())
                        .bind(now)
                        .execute(&mut *tx)
                        .await;
                        match inserted {
                            Ok(_) => {}
                            Err(e) if is_unique_violation(&e) => return Err(DomainError::DuplicateVote(*vote_type)),
                            Err(e) => return Err(db(e)),
                        }
                    }
                }
            }
            VoteChange::Remove { .. } => {
                sqlx::query("DELETE FROM votes WHERE report_id = $1 AND fingerprint_hash = $2 AND ip_hash = $3")
                    .bind(report_id)
                    .bind(&voter.fingerprint_hash)
                    .bind(&voter.ip_hash)
                    .execute(&mut *tx)
                    .await
                    .map_err(db)?;
            }
        }

        let tally = tally_on(&mut tx, report_id).await?;
        let row = sqlx::query(
            "UPDATE reports SET upvote_count = $2, downvote_count = $3, validity_expires_at = $4 \
             WHERE id = $1 RETURNING *",
        )
        .bind(report_id)
        .bind(tally.up as i32)
        .bind(tally.down as i32)
        .bind(compute_expiry(created_at, tally, now))
        .fetch_one(&mut *tx)
        .await
        .map_err(db)?;
        let report = report_from_row(&row)?;

        tx.commit().await.map_err(db)?;
        Ok(report)
    }

    async fn tally(&self, report_id: Uuid) -> Result<VoteTally> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        tally_on(&mut conn, report_id).await
    }
}

#[async_trait]
impl CommentRepository for PostgresStore {
    async fn insert_comment(&self, comment: &Comment) -> Result<()> {
        sqlx::query(
            "INSERT INTO comments (id, report_id, content, fingerprint_hash, ip_hash, created_at, report_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(comment.id)
        .bind(comment.report_id)
        .bind(&comment.content)
        .bind(&comment.author.fingerprint_hash)
        .bind(&comment.author.ip_hash)
        .bind(comment.created_at)
        .bind(comment.report_count as i32)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn get_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        let row = sqlx::query("SELECT * FROM comments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        Ok(row.as_ref().map(comment_from_row).transpose()?)
    }

    async fn list_comments(&self, report_id: Uuid, offset: u64, limit: u64) -> Result<(Vec<Comment>, u64)> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM comments WHERE report_id = $1")
            .bind(report_id)
            .fetch_one(&self.pool)
            .await
            .and_then(|row| row.try_get("total"))
            .map_err(db)?;

        let rows = sqlx::query(
            "SELECT * FROM comments WHERE report_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
        )
        .bind(report_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        let comments = rows.iter().map(comment_from_row).collect::<std::result::Result<_, _>>()?;
        Ok((comments, total.max(0) as u64))
    }

    async fn delete_comment(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(())
    }

    async fn has_flagged(&self, comment_id: Uuid, voter: &VoterIdentity) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM comment_reports WHERE comment_id = $1 AND fingerprint_hash = $2 AND ip_hash = $3",
        )
        .bind(comment_id)
        .bind(&voter.fingerprint_hash)
        .bind(&voter.ip_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        Ok(row.is_some())
    }

    /// Flag row and counter bump commit together.
    async fn insert_flag(&self, flag: &CommentReport) -> Result<u32> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let inserted = sqlx::query(
            "INSERT INTO comment_reports (id, comment_id, fingerprint_hash, ip_hash, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(flag.id)
        .bind(flag.comment_id)
        .bind(&flag.voter.fingerprint_hash)
        .bind(&flag.voter.ip_hash)
        .bind(flag.created_at)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(DomainError::DuplicateReportFlag(flag.comment_id)),
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                return Err(DomainError::NotFound("comment", flag.comment_id))
            }
            Err(e) => return Err(db(e)),
        }

        let row = sqlx::query("UPDATE comments SET report_count = report_count + 1 WHERE id = $1 RETURNING report_count")
            .bind(flag.comment_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?
            .ok_or(DomainError::NotFound("comment", flag.comment_id))?;
        let report_count: i32 = row.try_get("report_count").map_err(db)?;

        tx.commit().await.map_err(db)?;
        Ok(count(report_count))
    }
}

impl ChangeSource for PostgresStore {
    fn subscribe(&self) -> Box<dyn ChangeSubscription> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_payloads_decode() {
        let inserted = r#"{"id":"0191b0a4-7c00-7000-8000-000000000001","latitude":45.5,"longitude":-73.6,
            "created_at":"2025-01-01T12:00:00.123456+00:00","validity_expires_at":"2025-01-01T13:00:00.123456+00:00",
            "upvote_count":2,"downvote_count":0,"event":"report_inserted"}"#;
        match serde_json::from_str::<StoreEvent>(inserted).unwrap() {
            StoreEvent::ReportInserted(report) => {
                assert_eq!(report.upvote_count, 2);
                assert_eq!(report.latitude, 45.5);
            }
            other => panic!("unexpected {other:?}"),
        }

        let vote = r#"{"event":"vote_deleted","report_id":"0191b0a4-7c00-7000-8000-000000000001"}"#;
        assert!(matches!(
            serde_json::from_str::<StoreEvent>(vote).unwrap(),
            StoreEvent::VoteDeleted { .. }
        ));
    }

    #[test]
    fn test_schema_declares_notification_channel() {
        assert!(SCHEMA.contains(CHANGE_CHANNEL));
        assert!(SCHEMA.contains("UNIQUE (report_id, fingerprint_hash, ip_hash)"));
    }

    /// Needs a scratch database: `ICEWATCH_TEST_DATABASE_URL=postgres://... cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn test_round_trip_against_live_database() {
        let Ok(url) = std::env::var("ICEWATCH_TEST_DATABASE_URL") else {
            return;
        };
        let store = PostgresStore::connect(&url, 2, Duration::from_secs(5)).await.unwrap();
        store.ensure_schema().await.unwrap();

        let now = Utc::now();
        let report = Report {
            id: Uuid::now_v7(),
            latitude: 10.0,
            longitude: 20.0,
            created_at: now,
            validity_expires_at: now + chrono::Duration::minutes(60),
            upvote_count: 0,
            downvote_count: 0,
        };
        store.insert_report(&report).await.unwrap();

        let voter = VoterIdentity::new("fp-test", "ip-test");
        let up = VoteChange::Cast {
            voter: voter.clone(),
            vote_type: VoteType::Up,
        };
        let updated = store.apply_vote(report.id, &up, now).await.unwrap();
        assert_eq!(updated.upvote_count, 1);
        assert_eq!(updated.validity_expires_at - updated.created_at, chrono::Duration::minutes(70));
        assert!(matches!(
            store.apply_vote(report.id, &up, now).await,
            Err(DomainError::DuplicateVote(VoteType::Up))
        ));
        assert_eq!(store.tally(report.id).await.unwrap(), VoteTally { up: 1, down: 0 });

        let cleared = store
            .apply_vote(report.id, &VoteChange::Remove { voter: voter.clone() }, now)
            .await
            .unwrap();
        assert_eq!(cleared.tally(), VoteTally::default());
        assert!(store.find_vote(report.id, &voter).await.unwrap().is_none());

        let missing = Uuid::now_v7();
        assert!(matches!(
            store.apply_vote(missing, &up, now).await,
            Err(DomainError::NotFound("report", _))
        ));
        assert!(store.find_vote(missing, &voter).await.unwrap().is_none());
    }
}
