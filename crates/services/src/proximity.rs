//! # Proximity Monitor
//!
//! Combines the user's location with the active report set into a
//! [`TemperatureState`]. Without a location the monitor is `Idle` and
//! always emits the idle state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use domains::geo::find_nearest;
use domains::temperature::classify;
use domains::{Clock, Location, Report, TemperatureState};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::task::BackgroundTask;

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MonitorState {
    Idle,
    Tracking(Location),
}

#[derive(Debug)]
pub struct ProximityMonitor {
    state: MonitorState,
    current: TemperatureState,
}

impl Default for ProximityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProximityMonitor {
    pub fn new() -> Self {
        Self {
            state: MonitorState::Idle,
            current: TemperatureState::idle(),
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Last emitted temperature.
    pub fn current(&self) -> TemperatureState {
        self.current
    }

    /// Feeds a location update (or its loss) and re-evaluates.
    pub fn on_location(&mut self, location: Option<Location>, reports: &[Report], now: DateTime<Utc>) -> TemperatureState {
        let next = match location {
            Some(location) => MonitorState::Tracking(location),
            None => MonitorState::Idle,
        };
        match (self.state, next) {
            (MonitorState::Idle, MonitorState::Tracking(_)) => info!("proximity tracking started"),
            (MonitorState::Tracking(_), MonitorState::Idle) => info!("location lost, proximity idle"),
            _ => {}
        }
        self.state = next;
        self.evaluate(reports, now)
    }

    /// Recomputes against `reports`, ignoring any that have expired.
    pub fn evaluate(&mut self, reports: &[Report], now: DateTime<Utc>) -> TemperatureState {
        let next = match self.state {
            MonitorState::Idle => TemperatureState::idle(),
            MonitorState::Tracking(location) => {
                let active: Vec<Report> = reports.iter().filter(|r| r.is_active(now)).cloned().collect();
                let nearest = find_nearest(location, &active);
                if let Some((report, distance)) = nearest {
                    debug!(report_id = %report.id, distance_m = distance, "nearest active report");
                }
                classify(nearest.map(|(_, distance)| distance))
            }
        };
        if next.level != self.current.level {
            info!(from = %self.current.level, to = %next.level, value = next.value, "temperature changed");
        }
        self.current = next;
        next
    }
}

/// Runs a monitor that re-evaluates whenever the location or the report set
/// changes, and at least every `every`.
pub fn spawn_monitor(
    mut location_rx: watch::Receiver<Option<Location>>,
    mut reports_rx: watch::Receiver<Vec<Report>>,
    clock: Arc<dyn Clock>,
    every: Duration,
) -> (watch::Receiver<TemperatureState>, BackgroundTask) {
    let (tx, rx) = watch::channel(TemperatureState::idle());
    let task = BackgroundTask::spawn("proximity-monitor", move |mut stop| async move {
        let mut monitor = ProximityMonitor::new();
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut location_open = true;
        let mut reports_open = true;
        loop {
            tokio::select! {
                _ = &mut stop => break,
                changed = location_rx.changed(), if location_open => location_open = changed.is_ok(),
                changed = reports_rx.changed(), if reports_open => reports_open = changed.is_ok(),
                _ = ticker.tick() => {}
            }
            let location = *location_rx.borrow_and_update();
            let reports = reports_rx.borrow_and_update().clone();
            let state = monitor.on_location(location, &reports, clock.now());
            tx.send_if_modified(|current| {
                if *current == state {
                    false
                } else {
                    *current = state;
                    true
                }
            });
        }
    });
    (rx, task)
}
