//! # Location
//!
//! Position sources for the proximity monitor. [`FallbackLocator`] chains
//! providers (device first, then IP lookups), [`FixedLocation`] serves a
//! configured position, and [`LocationTracker`] keeps a `watch` channel of the
//! latest fix fresh on an interval.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domains::validation::validate_location;
use domains::{DomainError, Location, LocationProvider, Result};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::task::BackgroundTask;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_LOCATE_TIMEOUT: Duration = Duration::from_secs(30);

/// A provider that always answers with the same coordinates.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation {
    location: Location,
}

impl FixedLocation {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        Ok(Self {
            location: validate_location(latitude, longitude)?,
        })
    }
}

#[async_trait]
impl LocationProvider for FixedLocation {
    fn name(&self) -> String {
        "fixed".to_string()
    }

    async fn locate(&self) -> Result<Location> {
        Ok(self.location)
    }
}

/// Tries each provider in order and returns the first valid fix.
pub struct FallbackLocator {
    providers: Vec<Arc<dyn LocationProvider>>,
    attempt_timeout: Duration,
}

impl FallbackLocator {
    pub fn new(providers: Vec<Arc<dyn LocationProvider>>) -> Self {
        Self {
            providers,
            attempt_timeout: DEFAULT_LOCATE_TIMEOUT,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }
}

#[async_trait]
impl LocationProvider for FallbackLocator {
    fn name(&self) -> String {
        let names: Vec<String> = self.providers.iter().map(|p| p.name()).collect();
        format!("fallback({})", names.join(","))
    }

    async fn locate(&self) -> Result<Location> {
        for provider in &self.providers {
            let outcome = tokio::time::timeout(self.attempt_timeout, provider.locate()).await;
            match outcome {
                Ok(Ok(location)) => match validate_location(location.latitude, location.longitude) {
                    Ok(valid) => {
                        debug!(provider = %provider.name(), "location acquired");
                        return Ok(valid);
                    }
                    Err(e) => warn!(provider = %provider.name(), error = %e, "provider returned bad coordinates"),
                },
                Ok(Err(e)) => warn!(provider = %provider.name(), error = %e, "location provider failed"),
                Err(_) => warn!(provider = %provider.name(), "location provider timed out"),
            }
        }
        Err(DomainError::LocationUnavailable(
            "all location providers failed".to_string(),
        ))
    }
}

/// Periodically asks a provider for the current position and publishes it.
/// A failed or timed-out refresh publishes `None`.
pub struct LocationTracker {
    provider: Arc<dyn LocationProvider>,
    interval: Duration,
    timeout: Duration,
}

impl LocationTracker {
    pub fn new(provider: Arc<dyn LocationProvider>) -> Self {
        Self {
            provider,
            interval: DEFAULT_REFRESH_INTERVAL,
            timeout: DEFAULT_LOCATE_TIMEOUT,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn refresh(&self) -> Option<Location> {
        match tokio::time::timeout(self.timeout, self.provider.locate()).await {
            Ok(Ok(location)) => Some(location),
            Ok(Err(e)) => {
                warn!(error = %e, "location refresh failed");
                None
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "location refresh timed out");
                None
            }
        }
    }

    /// Starts refreshing; the first attempt runs immediately.
    pub fn spawn(self) -> (watch::Receiver<Option<Location>>, BackgroundTask) {
        let (tx, rx) = watch::channel(None);
        let task = BackgroundTask::spawn("location-tracker", move |mut stop| async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {
                        let fix = self.refresh().await;
                        tx.send_if_modified(|current| {
                            if *current == fix {
                                false
                            } else {
                                *current = fix;
                                true
                            }
                        });
                    }
                }
            }
        });
        (rx, task)
    }
}
