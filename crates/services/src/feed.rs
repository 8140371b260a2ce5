//! # Report Feeds
//!
//! Two ways to learn about report changes behind one [`ReportFeed`] trait:
//! a push feed driven by storage change notifications and a polling feed
//! that re-reads the active set on an interval. [`CombinedFeed`] runs both,
//! and [`spawn_mirror`] folds any feed into a local [`ActiveReportSet`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domains::{ChangeNotice, ChangeSource, ChangeSubscription, Clock, DomainError, Report, StoreEvent};
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::reports::ReportService;
use crate::task::BackgroundTask;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Pause before retrying a failed snapshot on the push feed.
const SNAPSHOT_RETRY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    /// Replaces everything known so far.
    Snapshot(Vec<Report>),
    Upsert(Report),
    Remove(Uuid),
}

#[async_trait]
pub trait ReportFeed: Send {
    /// Next update, or `None` once the feed can produce nothing more.
    async fn next_update(&mut self) -> Option<FeedUpdate>;
}

/// Re-reads the active report list every tick. The first tick is immediate.
pub struct PollingFeed {
    reports: Arc<ReportService>,
    ticker: Interval,
}

impl PollingFeed {
    pub fn new(reports: Arc<ReportService>, every: Duration) -> Self {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { reports, ticker }
    }
}

#[async_trait]
impl ReportFeed for PollingFeed {
    async fn next_update(&mut self) -> Option<FeedUpdate> {
        loop {
            self.ticker.tick().await;
            match self.reports.list_active().await {
                Ok(reports) => return Some(FeedUpdate::Snapshot(reports)),
                Err(e) => warn!(error = %e, "report poll failed"),
            }
        }
    }
}

/// Follows storage change notifications. Starts with a snapshot and takes a
/// fresh one whenever the subscription reports dropped events.
pub struct PushFeed {
    reports: Arc<ReportService>,
    subscription: Box<dyn ChangeSubscription>,
    needs_snapshot: bool,
}

impl PushFeed {
    pub fn new(source: &dyn ChangeSource, reports: Arc<ReportService>) -> Self {
        Self {
            reports,
            subscription: source.subscribe(),
            needs_snapshot: true,
        }
    }

    /// Takes its own handle on the service so the caller's `&mut self`
    /// borrow is all that lives across the refetch.
    async fn translate(reports: Arc<ReportService>, event: StoreEvent) -> Option<FeedUpdate> {
        match event {
            StoreEvent::ReportInserted(report) | StoreEvent::ReportUpdated(report) => Some(FeedUpdate::Upsert(report)),
            StoreEvent::ReportDeleted { id } => Some(FeedUpdate::Remove(id)),
            StoreEvent::VoteUpserted { report_id } | StoreEvent::VoteDeleted { report_id } => {
                match reports.get_report(report_id).await {
                    Ok(report) => Some(FeedUpdate::Upsert(report)),
                    Err(DomainError::NotFound(..)) => Some(FeedUpdate::Remove(report_id)),
                    Err(e) => {
                        warn!(report_id = %report_id, error = %e, "could not refetch report after vote");
                        None
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ReportFeed for PushFeed {
    async fn next_update(&mut self) -> Option<FeedUpdate> {
        loop {
            if self.needs_snapshot {
                match self.reports.list_active().await {
                    Ok(reports) => {
                        self.needs_snapshot = false;
                        return Some(FeedUpdate::Snapshot(reports));
                    }
                    Err(e) => {
                        warn!(error = %e, "push feed snapshot failed");
                        tokio::time::sleep(SNAPSHOT_RETRY).await;
                        continue;
                    }
                }
            }

            match self.subscription.recv().await? {
                ChangeNotice::Missed(skipped) => {
                    warn!(skipped, "change stream lagged, resynchronising");
                    self.needs_snapshot = true;
                }
                ChangeNotice::Event(event) => {
                    if let Some(update) = Self::translate(self.reports.clone(), event).await {
                        return Some(update);
                    }
                }
            }
        }
    }
}

/// Push for latency, polling as a safety net. When the change stream
/// closes the feed carries on with polling alone.
pub struct CombinedFeed {
    push: Option<PushFeed>,
    poll: PollingFeed,
}

impl CombinedFeed {
    pub fn new(push: PushFeed, poll: PollingFeed) -> Self {
        Self { push: Some(push), poll }
    }
}

#[async_trait]
impl ReportFeed for CombinedFeed {
    async fn next_update(&mut self) -> Option<FeedUpdate> {
        loop {
            let pushed = match self.push.as_mut() {
                Some(push) => tokio::select! {
                    update = push.next_update() => update,
                    update = self.poll.next_update() => return update,
                },
                None => return self.poll.next_update().await,
            };
            match pushed {
                Some(update) => return Some(update),
                None => {
                    info!("change stream closed, continuing with polling only");
                    self.push = None;
                }
            }
        }
    }
}

/// Local copy of the reports that are still alive.
#[derive(Debug, Default)]
pub struct ActiveReportSet {
    reports: HashMap<Uuid, Report>,
}

impl ActiveReportSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an update and reports whether the set changed. Upserts
    /// carrying an already-expired report remove it.
    pub fn apply(&mut self, update: FeedUpdate, now: DateTime<Utc>) -> bool {
        match update {
            FeedUpdate::Snapshot(reports) => {
                let fresh: HashMap<Uuid, Report> = reports
                    .into_iter()
                    .filter(|r| r.is_active(now))
                    .map(|r| (r.id, r))
                    .collect();
                let changed = fresh != self.reports;
                self.reports = fresh;
                changed
            }
            FeedUpdate::Upsert(report) if report.is_active(now) => {
                let previous = self.reports.insert(report.id, report.clone());
                previous.as_ref() != Some(&report)
            }
            FeedUpdate::Upsert(report) => self.reports.remove(&report.id).is_some(),
            FeedUpdate::Remove(id) => self.reports.remove(&id).is_some(),
        }
    }

    /// Drops expired reports and returns how many went.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.reports.len();
        self.reports.retain(|_, r| r.is_active(now));
        before - self.reports.len()
    }

    /// Newest first.
    pub fn to_vec(&self) -> Vec<Report> {
        let mut reports: Vec<Report> = self.reports.values().cloned().collect();
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

/// Mirrors `feed` into a watch channel of active reports, sweeping expired
/// entries every `sweep_every`.
pub fn spawn_mirror(
    mut feed: Box<dyn ReportFeed>,
    clock: Arc<dyn Clock>,
    sweep_every: Duration,
) -> (watch::Receiver<Vec<Report>>, BackgroundTask) {
    let (tx, rx) = watch::channel(Vec::new());
    let task = BackgroundTask::spawn("report-mirror", move |mut stop| async move {
        let mut set = ActiveReportSet::new();
        let mut sweep = tokio::time::interval(sweep_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let changed = tokio::select! {
                _ = &mut stop => break,
                update = feed.next_update() => match update {
                    Some(update) => set.apply(update, clock.now()),
                    None => {
                        warn!("report feed ended");
                        break;
                    }
                },
                _ = sweep.tick() => {
                    let removed = set.prune(clock.now());
                    if removed > 0 {
                        debug!(removed, "expired reports swept");
                    }
                    removed > 0
                }
            };
            if changed {
                tx.send_replace(set.to_vec());
            }
        }
    });
    (rx, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use domains::testing::ManualClock;
    use domains::{VoteChange, VoteRepository, VoteType, VoterIdentity};
    use storage_adapters::memory::InMemoryStore;

    fn setup() -> (Arc<InMemoryStore>, Arc<ManualClock>, Arc<ReportService>) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::at_epoch());
        let service = Arc::new(ReportService::new(store.clone(), clock.clone()));
        (store, clock, service)
    }

    fn report_at(created_at: DateTime<Utc>, ttl_minutes: i64) -> Report {
        Report {
            id: Uuid::now_v7(),
            latitude: 0.0,
            longitude: 0.0,
            created_at,
            validity_expires_at: created_at + ChronoDuration::minutes(ttl_minutes),
            upvote_count: 0,
            downvote_count: 0,
        }
    }

    #[test]
    fn test_set_drops_expired_upserts() {
        let now = Utc::now();
        let mut set = ActiveReportSet::new();
        let live = report_at(now, 10);
        assert!(set.apply(FeedUpdate::Upsert(live.clone()), now));
        assert!(!set.apply(FeedUpdate::Upsert(live.clone()), now));

        let mut dead = live.clone();
        dead.validity_expires_at = now;
        assert!(set.apply(FeedUpdate::Upsert(dead), now));
        assert!(set.is_empty());
    }

    #[test]
    fn test_snapshot_replaces_and_prune_sweeps() {
        let now = Utc::now();
        let mut set = ActiveReportSet::new();
        set.apply(FeedUpdate::Upsert(report_at(now, 5)), now);

        let a = report_at(now - ChronoDuration::minutes(1), 3);
        let b = report_at(now, 30);
        assert!(set.apply(FeedUpdate::Snapshot(vec![a.clone(), b.clone()]), now));
        assert_eq!(set.to_vec().iter().map(|r| r.id).collect::<Vec<_>>(), vec![b.id, a.id]);

        assert_eq!(set.prune(now + ChronoDuration::minutes(2)), 1);
        assert_eq!(set.len(), 1);
        assert!(set.apply(FeedUpdate::Remove(b.id), now));
        assert!(!set.apply(FeedUpdate::Remove(b.id), now));
    }

    #[tokio::test]
    async fn test_push_feed_snapshot_then_events() {
        let (store, _, service) = setup();
        let existing = service.create_report(1.0, 1.0).await.unwrap();

        let mut feed = PushFeed::new(store.as_ref(), service.clone());
        assert_eq!(feed.next_update().await, Some(FeedUpdate::Snapshot(vec![existing.clone()])));

        let created = service.create_report(2.0, 2.0).await.unwrap();
        assert_eq!(feed.next_update().await, Some(FeedUpdate::Upsert(created.clone())));

        let up = VoteChange::Cast {
            voter: VoterIdentity::new("fp", "ip"),
            vote_type: VoteType::Up,
        };
        let updated = store.apply_vote(created.id, &up, created.created_at).await.unwrap();
        assert_eq!(updated.upvote_count, 1);
        assert_eq!(feed.next_update().await, Some(FeedUpdate::Upsert(updated)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_push_feed_runs_on_spawned_task() {
        let (store, _, service) = setup();
        let mut feed = PushFeed::new(store.as_ref(), service.clone());
        let consumer = tokio::spawn(async move {
            let first = feed.next_update().await;
            let second = feed.next_update().await;
            (first, second)
        });

        let report = service.create_report(6.0, 6.0).await.unwrap();
        let up = VoteChange::Cast {
            voter: VoterIdentity::new("fp", "ip"),
            vote_type: VoteType::Up,
        };
        store.apply_vote(report.id, &up, report.created_at).await.unwrap();

        let (first, second) = consumer.await.unwrap();
        assert!(matches!(first, Some(FeedUpdate::Snapshot(_))));
        match second {
            Some(FeedUpdate::Upsert(r)) => assert_eq!(r.id, report.id),
            Some(FeedUpdate::Snapshot(rs)) => assert!(rs.iter().any(|r| r.id == report.id)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_push_feed_resnapshots_after_lag() {
        let store = Arc::new(InMemoryStore::with_event_capacity(2));
        let clock = Arc::new(ManualClock::at_epoch());
        let service = Arc::new(ReportService::new(store.clone(), clock));

        let mut feed = PushFeed::new(store.as_ref(), service.clone());
        assert_eq!(feed.next_update().await, Some(FeedUpdate::Snapshot(vec![])));

        for n in 0..5 {
            service.create_report(n as f64, 0.0).await.unwrap();
        }
        match feed.next_update().await {
            Some(FeedUpdate::Snapshot(reports)) => assert_eq!(reports.len(), 5),
            other => panic!("expected resnapshot, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_feed_ticks() {
        let (_, _, service) = setup();
        let mut feed = PollingFeed::new(service.clone(), Duration::from_secs(10));
        assert_eq!(feed.next_update().await, Some(FeedUpdate::Snapshot(vec![])));

        let report = service.create_report(3.0, 3.0).await.unwrap();
        let started = tokio::time::Instant::now();
        assert_eq!(feed.next_update().await, Some(FeedUpdate::Snapshot(vec![report])));
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_combined_feed_delivers_changes() {
        let (store, _, service) = setup();
        let push = PushFeed::new(store.as_ref(), service.clone());
        let poll = PollingFeed::new(service.clone(), Duration::from_secs(10));
        let mut feed = CombinedFeed::new(push, poll);

        // both sources produce an initial snapshot
        assert!(matches!(feed.next_update().await, Some(FeedUpdate::Snapshot(_))));
        let report = service.create_report(4.0, 4.0).await.unwrap();
        let mut seen = false;
        for _ in 0..3 {
            match feed.next_update().await {
                Some(FeedUpdate::Upsert(r)) if r.id == report.id => seen = true,
                Some(FeedUpdate::Snapshot(rs)) if rs.iter().any(|r| r.id == report.id) => seen = true,
                _ => {}
            }
            if seen {
                break;
            }
        }
        assert!(seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mirror_sweeps_expired_reports() {
        let (store, clock, service) = setup();
        let report = service.create_report(5.0, 5.0).await.unwrap();

        let feed = PushFeed::new(store.as_ref(), service.clone());
        let (mut rx, task) = spawn_mirror(Box::new(feed), clock.clone(), Duration::from_secs(60));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().iter().map(|r| r.id).collect::<Vec<_>>(), vec![report.id]);

        clock.advance(ChronoDuration::minutes(61));
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_empty());

        task.shutdown().await;
    }
}
