//! # services
//!
//! Application services composed from domain ports. Each service owns its
//! collaborators as `Arc<dyn Port>` so the binary decides which adapters run.
//!
//! - [`VoteService`]: the Vote Ledger (one vote per identity per report).
//! - [`ReportService`]: the Report Registry (create, list active, nearby).
//! - [`CommentService`]: comments and abuse flags.
//! - [`ProximityMonitor`]: turns location + active reports into a
//!   [`TemperatureState`](domains::TemperatureState).
//! - [`feed`]: push and polling report feeds behind one trait.
//! - [`IdentityCache`], [`location`], [`Cooldowns`]: session plumbing.

pub mod comments;
pub mod cooldown;
pub mod feed;
pub mod identity;
pub mod location;
pub mod proximity;
pub mod reports;
pub mod task;
pub mod votes;

mod bounded;

pub use comments::{CommentService, FlagOutcome};
pub use cooldown::{spawn_purger, CooldownAction, CooldownPolicy, Cooldowns};
pub use identity::IdentityCache;
pub use proximity::{MonitorState, ProximityMonitor};
pub use reports::ReportService;
pub use task::BackgroundTask;
pub use votes::VoteService;

/// Storage calls that take longer than this surface as `StorageUnavailable`.
pub const DEFAULT_STORAGE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
