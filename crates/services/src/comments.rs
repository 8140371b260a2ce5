//! Comments on reports and community abuse flags.

use std::sync::Arc;
use std::time::Duration;

use domains::validation::{sanitize_comment, validate_comment};
use domains::{
    Clock, Comment, CommentPage, CommentReport, CommentRepository, DomainError, ReportRepository, Result,
    VoterIdentity,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bounded::bounded;
use crate::cooldown::{CooldownAction, Cooldowns};
use crate::DEFAULT_STORAGE_TIMEOUT;

/// Comments loaded per page.
pub const COMMENTS_PER_PAGE: u64 = 20;

/// Abuse flags after which a comment is removed.
pub const COMMENT_AUTO_DELETE_REPORT_THRESHOLD: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagOutcome {
    pub report_count: u32,
    /// True when this flag pushed the comment over the threshold.
    pub deleted: bool,
}

pub struct CommentService {
    comments: Arc<dyn CommentRepository>,
    reports: Arc<dyn ReportRepository>,
    clock: Arc<dyn Clock>,
    cooldowns: Option<Arc<Cooldowns>>,
    storage_timeout: Duration,
}

impl CommentService {
    pub fn new(comments: Arc<dyn CommentRepository>, reports: Arc<dyn ReportRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            comments,
            reports,
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

    pub async fn create_comment(&self, report_id: Uuid, author: &VoterIdentity, content: &str) -> Result<Comment> {
        let text = validate_comment(content)?;
        bounded(self.storage_timeout, "get_report", self.reports.get_report(report_id))
            .await?
            .ok_or(DomainError::NotFound("report", report_id))?;

        // rejected requests never consume the window
        let now = self.clock.now();
        if let Some(cooldowns) = &self.cooldowns {
            cooldowns.try_acquire(CooldownAction::Comment, author, now)?;
        }

        let comment = Comment {
            id: Uuid::now_v7(),
            report_id,
            content: sanitize_comment(text),
            author: author.clone(),
            created_at: now,
            report_count: 0,
        };
        bounded(self.storage_timeout, "insert_comment", self.comments.insert_comment(&comment)).await?;

        info!(comment_id = %comment.id, report_id = %report_id, "comment created");
        Ok(comment)
    }

    /// Page `page` (zero-based) of a report's comments, newest first.
    pub async fn list_comments(&self, report_id: Uuid, page: u64) -> Result<CommentPage> {
        let offset = page.saturating_mul(COMMENTS_PER_PAGE);
        let (comments, total) = bounded(
            self.storage_timeout,
            "list_comments",
            self.comments.list_comments(report_id, offset, COMMENTS_PER_PAGE),
        )
        .await?;
        Ok(CommentPage {
            has_more: total > offset + comments.len() as u64,
            comments,
        })
    }

    /// Flags a comment as abusive. One flag per identity; the comment is
    /// removed once it collects enough flags.
    pub async fn flag_comment(&self, comment_id: Uuid, voter: &VoterIdentity) -> Result<FlagOutcome> {
        bounded(self.storage_timeout, "get_comment", self.comments.get_comment(comment_id))
            .await?
            .ok_or(DomainError::NotFound("comment", comment_id))?;

        if bounded(self.storage_timeout, "has_flagged", self.comments.has_flagged(comment_id, voter)).await? {
            return Err(DomainError::DuplicateReportFlag(comment_id));
        }

        let flag = CommentReport {
            id: Uuid::now_v7(),
            comment_id,
            voter: voter.clone(),
            created_at: self.clock.now(),
        };
        let report_count = bounded(self.storage_timeout, "insert_flag", self.comments.insert_flag(&flag)).await?;

        let deleted = report_count >= COMMENT_AUTO_DELETE_REPORT_THRESHOLD;
        if deleted {
            bounded(self.storage_timeout, "delete_comment", self.comments.delete_comment(comment_id)).await?;
            warn!(comment_id = %comment_id, report_count, "comment removed after abuse reports");
        }
        Ok(FlagOutcome { report_count, deleted })
    }
}
