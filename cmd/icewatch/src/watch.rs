//! # Proximity watch
//!
//! When `location.fixed` is configured the binary keeps a live mirror of
//! the active reports (push feed backed by polling), tracks the configured
//! position and runs the proximity monitor against both.

use std::sync::Arc;

use configs::AppConfig;
use domains::{ChangeSource, Clock, LocationProvider};
use services::feed::{spawn_mirror, CombinedFeed, PollingFeed, PushFeed};
use services::location::{FallbackLocator, FixedLocation, LocationTracker};
use services::proximity::spawn_monitor;
use services::{BackgroundTask, ReportService};
use tracing::{debug, info};

pub struct ProximityWatch {
    tasks: Vec<BackgroundTask>,
}

impl ProximityWatch {
    /// Returns `None` when no fixed location is configured.
    pub async fn start(
        config: &AppConfig,
        reports: Arc<ReportService>,
        changes: &dyn ChangeSource,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Option<Self>> {
        let Some(fixed) = config.location.fixed else {
            return Ok(None);
        };

        let feed = CombinedFeed::new(
            PushFeed::new(changes, reports.clone()),
            PollingFeed::new(reports, config.feed.poll_interval()),
        );
        let (reports_rx, mirror) = spawn_mirror(Box::new(feed), clock.clone(), config.feed.sweep_interval());

        let position: Arc<dyn LocationProvider> = Arc::new(FixedLocation::new(fixed.latitude, fixed.longitude)?);
        let locator = FallbackLocator::new(vec![position]).with_attempt_timeout(config.location.timeout());
        let (location_rx, tracker) = LocationTracker::new(Arc::new(locator))
            .with_interval(config.location.refresh_interval())
            .with_timeout(config.location.timeout())
            .spawn();

        let (mut temperature_rx, monitor) =
            spawn_monitor(location_rx, reports_rx, clock, config.proximity.update_interval());

        let reporter = BackgroundTask::spawn("temperature-log", move |mut stop| async move {
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    changed = temperature_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *temperature_rx.borrow_and_update();
                        debug!(
                            level = ?state.level,
                            value = state.value,
                            nearest_meters = ?state.nearest_distance,
                            "temperature"
                        );
                    }
                }
            }
        });

        info!(latitude = fixed.latitude, longitude = fixed.longitude, "proximity watch started");
        Ok(Some(Self {
            tasks: vec![reporter, monitor, tracker, mirror],
        }))
    }

    pub async fn stop(self) {
        for task in self.tasks {
            task.shutdown().await;
        }
    }
}
