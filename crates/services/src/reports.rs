//! # Report Registry
//!
//! Aggregate root for reports. Creation validates coordinates and seeds the
//! expiry from the validity engine; reads filter on expiry at read time.
//! Nothing here ever deletes an expired report.

use std::sync::Arc;
use std::time::Duration;

use domains::geo::distance_between;
use domains::validation::validate_location;
use domains::validity::{initial_expiry, probability};
use domains::{Clock, DomainError, Report, ReportRepository, ReportWithDistance, Result, VoterIdentity};
use tracing::info;
use uuid::Uuid;

use crate::bounded::bounded;
use crate::cooldown::{CooldownAction, Cooldowns};
use crate::DEFAULT_STORAGE_TIMEOUT;

pub struct ReportService {
    reports: Arc<dyn ReportRepository>,
    clock: Arc<dyn Clock>,
    cooldowns: Option<Arc<Cooldowns>>,
    storage_timeout: Duration,
}

impl ReportService {
    pub fn new(reports: Arc<dyn ReportRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
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

    /// Creates a report at the given coordinates, valid for one hour.
    pub async fn create_report(&self, latitude: f64, longitude: f64) -> Result<Report> {
        let location = validate_location(latitude, longitude)?;
        let now = self.clock.now();

        let report = Report {
            id: Uuid::now_v7(),
            latitude: location.latitude,
            longitude: location.longitude,
            created_at: now,
            validity_expires_at: initial_expiry(now),
            upvote_count: 0,
            downvote_count: 0,
        };
        bounded(self.storage_timeout, "insert_report", self.reports.insert_report(&report)).await?;

        info!(report_id = %report.id, latitude, longitude, expires_at = %report.validity_expires_at, "report created");
        Ok(report)
    }

    /// Same as [`create_report`](Self::create_report), subject to the
    /// reporter's cooldown. Validation runs first so a typo does not burn
    /// the cooldown.
    pub async fn create_report_for(&self, reporter: &VoterIdentity, latitude: f64, longitude: f64) -> Result<Report> {
        validate_location(latitude, longitude)?;
        if let Some(cooldowns) = &self.cooldowns {
            cooldowns.try_acquire(CooldownAction::CreateReport, reporter, self.clock.now())?;
        }
        self.create_report(latitude, longitude).await
    }

    pub async fn get_report(&self, id: Uuid) -> Result<Report> {
        bounded(self.storage_timeout, "get_report", self.reports.get_report(id))
            .await?
            .ok_or(DomainError::NotFound("report", id))
    }

    /// Reports still inside their validity window, newest first.
    pub async fn list_active(&self) -> Result<Vec<Report>> {
        let now = self.clock.now();
        let mut reports = bounded(
            self.storage_timeout,
            "list_active_reports",
            self.reports.list_active_reports(now),
        )
        .await?;
        reports.retain(|r| r.is_active(now));
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reports)
    }

    /// Active reports within `radius_meters`, nearest first. Advisory only:
    /// creation is never blocked by nearby reports.
    pub async fn get_nearby(&self, latitude: f64, longitude: f64, radius_meters: f64) -> Result<Vec<ReportWithDistance>> {
        let origin = validate_location(latitude, longitude)?;
        let mut nearby: Vec<ReportWithDistance> = self
            .list_active()
            .await?
            .into_iter()
            .filter_map(|report| {
                let distance_meters = distance_between(origin, report.location());
                (distance_meters <= radius_meters).then(|| ReportWithDistance {
                    probability: probability(report.tally()),
                    distance_meters,
                    report,
                })
            })
            .collect();
        nearby.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
        Ok(nearby)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use domains::testing::ManualClock;
    use domains::{MockReportRepository, VoteChange, VoteRepository, VoteType};
    use storage_adapters::memory::InMemoryStore;

    fn setup() -> (Arc<InMemoryStore>, Arc<ManualClock>, ReportService) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::at_epoch());
        let service = ReportService::new(store.clone(), clock.clone());
        (store, clock, service)
    }

    #[tokio::test]
    async fn test_create_report_defaults() {
        let (_, clock, service) = setup();
        let report = service.create_report(45.5, -73.6).await.unwrap();
        assert_eq!(report.created_at, clock.now());
        assert_eq!(report.validity_expires_at, clock.now() + ChronoDuration::minutes(60));
        assert_eq!((report.upvote_count, report.downvote_count), (0, 0));
    }

    #[tokio::test]
    async fn test_invalid_location_writes_nothing() {
        let (store, _, service) = setup();
        let err = service.create_report(91.0, 0.0).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidLocation { .. }));
        assert_eq!(store.report_count(), 0);
    }

    #[tokio::test]
    async fn test_list_active_excludes_expired_and_orders_newest_first() {
        let (store, clock, service) = setup();
        let old = service.create_report(1.0, 1.0).await.unwrap();
        clock.advance(ChronoDuration::minutes(30));
        let newer = service.create_report(2.0, 2.0).await.unwrap();

        let active = service.list_active().await.unwrap();
        assert_eq!(active.iter().map(|r| r.id).collect::<Vec<_>>(), vec![newer.id, old.id]);

        // old expires at +60, exactly now: excluded
        clock.advance(ChronoDuration::minutes(30));
        let active = service.list_active().await.unwrap();
        assert_eq!(active.iter().map(|r| r.id).collect::<Vec<_>>(), vec![newer.id]);

        // still physically stored
        assert!(store.get_report(old.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_active_filters_even_if_repository_is_lax() {
        let clock = Arc::new(ManualClock::at_epoch());
        let now = clock.now();
        let expired = Report {
            id: Uuid::now_v7(),
            latitude: 0.0,
            longitude: 0.0,
            created_at: now - ChronoDuration::hours(2),
            validity_expires_at: now,
            upvote_count: 0,
            downvote_count: 0,
        };
        let mut repo = MockReportRepository::new();
        repo.expect_list_active_reports().returning(move |_| Ok(vec![expired.clone()]));

        let service = ReportService::new(Arc::new(repo), clock);
        assert!(service.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_nearby_within_radius_sorted() {
        let (store, _, service) = setup();
        let here = service.create_report(48.85660, 2.35220).await.unwrap();
        let close = service.create_report(48.85690, 2.35220).await.unwrap(); // ~33m
        service.create_report(48.86660, 2.35220).await.unwrap(); // ~1.1km
        for (n, vote_type) in [VoteType::Up, VoteType::Up, VoteType::Up, VoteType::Down].into_iter().enumerate() {
            let change = VoteChange::Cast {
                voter: VoterIdentity::new(format!("fp{n}"), format!("ip{n}")),
                vote_type,
            };
            store.apply_vote(close.id, &change, close.created_at).await.unwrap();
        }

        let nearby = service.get_nearby(48.85660, 2.35220, 50.0).await.unwrap();
        assert_eq!(nearby.len(), 2);
        assert_eq!(nearby[0].report.id, here.id);
        assert_eq!(nearby[1].report.id, close.id);
        assert_eq!(nearby[0].probability, 50);
        assert_eq!(nearby[1].probability, 75);
        assert!(nearby[1].distance_meters > 30.0 && nearby[1].distance_meters < 40.0);
    }

    #[tokio::test]
    async fn test_reporter_cooldown() {
        let (_, clock, service) = setup();
        let service = service.with_cooldowns(Arc::new(Cooldowns::default()));
        let reporter = VoterIdentity::new("fp", "ip");

        service.create_report_for(&reporter, 10.0, 10.0).await.unwrap();
        assert!(matches!(
            service.create_report_for(&reporter, 10.0, 10.0).await,
            Err(DomainError::RateLimited { .. })
        ));
        // invalid input does not consume the window
        clock.advance(ChronoDuration::seconds(60));
        assert!(service.create_report_for(&reporter, 100.0, 10.0).await.is_err());
        service.create_report_for(&reporter, 10.0, 10.0).await.unwrap();
    }
}
