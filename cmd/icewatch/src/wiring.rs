//! Storage backend selection and the small builders `main` needs.

use std::sync::Arc;

use auth_adapters::IdentityHasher;
use chrono::Duration;
use configs::{IdentityConfig, RateLimitConfig, StorageBackend, StorageConfig};
use domains::{ChangeSource, CommentRepository, ReportRepository, VoteRepository};
use secrecy::{ExposeSecret, SecretString};
use services::{CooldownPolicy, Cooldowns};
use storage_adapters::InMemoryStore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Every port the services need, backed by one store.
pub struct Storage {
    pub reports: Arc<dyn ReportRepository>,
    pub votes: Arc<dyn VoteRepository>,
    pub comments: Arc<dyn CommentRepository>,
    pub changes: Arc<dyn ChangeSource>,
    listener: Option<JoinHandle<()>>,
}

impl Storage {
    fn from_store<S>(store: Arc<S>, listener: Option<JoinHandle<()>>) -> Self
    where
        S: ReportRepository + VoteRepository + CommentRepository + ChangeSource + 'static,
    {
        Self {
            reports: store.clone(),
            votes: store.clone(),
            comments: store.clone(),
            changes: store,
            listener,
        }
    }

    pub fn close(self) {
        if let Some(listener) = self.listener {
            listener.abort();
        }
    }
}

pub async fn open_storage(config: &StorageConfig) -> anyhow::Result<Storage> {
    match config.backend {
        StorageBackend::Memory => {
            warn!("using the in-memory store; data is lost on restart");
            let store = Arc::new(InMemoryStore::with_event_capacity(config.event_capacity));
            Ok(Storage::from_store(store, None))
        }
        StorageBackend::Postgres => open_postgres(config).await,
    }
}

#[cfg(feature = "db-postgres")]
async fn open_postgres(config: &StorageConfig) -> anyhow::Result<Storage> {
    use anyhow::Context;
    use storage_adapters::postgres::PostgresStore;

    let url = config
        .url
        .as_ref()
        .context("storage.url is required for the postgres backend")?;
    let store = PostgresStore::connect(url.expose_secret(), config.max_connections, config.timeout())
        .await
        .context("connecting to postgres")?;
    store.ensure_schema().await.context("creating schema")?;
    let listener = store.listen().await.context("subscribing to change notifications")?;
    info!("postgres store ready");
    Ok(Storage::from_store(Arc::new(store), Some(listener)))
}

#[cfg(not(feature = "db-postgres"))]
async fn open_postgres(_config: &StorageConfig) -> anyhow::Result<Storage> {
    anyhow::bail!("this build has no postgres support; rebuild with the `db-postgres` feature")
}

pub fn cooldowns(config: &RateLimitConfig) -> Arc<Cooldowns> {
    let policy = CooldownPolicy {
        report: Duration::seconds(config.report_cooldown_secs),
        vote: Duration::seconds(config.vote_cooldown_secs),
        comment: Duration::seconds(config.comment_cooldown_secs),
    };
    info!(?policy, "rate limits");
    Arc::new(Cooldowns::new(policy))
}

pub fn identity_hasher(config: &IdentityConfig) -> IdentityHasher {
    match &config.salt {
        Some(salt) => IdentityHasher::salted(SecretString::from(salt.expose_secret().to_owned())),
        None => IdentityHasher::unsalted(),
    }
}
