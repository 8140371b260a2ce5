//! # icewatch
//!
//! Composition root: loads configuration, picks the storage backend, wires
//! the services into the HTTP API and optionally runs a proximity watch.

mod telemetry;
mod watch;
mod wiring;

use std::sync::Arc;

use anyhow::Context;
use api_adapters::web::{router, AppState};
use configs::AppConfig;
use domains::{Clock, SystemClock};
use services::cooldown::DEFAULT_PURGE_INTERVAL;
use services::{spawn_purger, CommentService, ReportService, VoteService};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    telemetry::init(&config.log);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let storage = wiring::open_storage(&config.storage).await?;
    let cooldowns = wiring::cooldowns(&config.rate_limit);
    let timeout = config.storage.timeout();

    let reports = Arc::new(
        ReportService::new(storage.reports.clone(), clock.clone())
            .with_cooldowns(cooldowns.clone())
            .with_storage_timeout(timeout),
    );
    let votes = Arc::new(
        VoteService::new(storage.votes.clone(), clock.clone())
            .with_cooldowns(cooldowns.clone())
            .with_storage_timeout(timeout),
    );
    let comments = Arc::new(
        CommentService::new(storage.comments.clone(), storage.reports.clone(), clock.clone())
            .with_cooldowns(cooldowns.clone())
            .with_storage_timeout(timeout),
    );
    let purger = spawn_purger(cooldowns, clock.clone(), DEFAULT_PURGE_INTERVAL);

    let watch = watch::ProximityWatch::start(&config, reports.clone(), storage.changes.as_ref(), clock.clone()).await?;

    let state = AppState::new(reports, votes, comments)
        .with_hasher(wiring::identity_hasher(&config.identity))
        .with_nearby_radius(config.proximity.nearby_radius_meters)
        .with_metrics_endpoint(config.server.metrics);

    let address = config.server.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!(%address, backend = ?config.storage.backend, "icewatch listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    if let Some(watch) = watch {
        watch.stop().await;
    }
    purger.shutdown().await;
    storage.close();
    info!("icewatch stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown requested");
}
