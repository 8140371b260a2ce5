//! # configs
//!
//! Layered application settings, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. `config/default.toml`
//! 3. `config/local.toml` (optional, not committed)
//! 4. environment variables prefixed `ICEWATCH__`, with `__` between
//!    section and key (`ICEWATCH__SERVER__PORT=9000`)
//!
//! A `.env` file is loaded into the environment first when present.

mod errors;
mod settings;

pub use errors::ConfigError;
pub use settings::{
    AppConfig, FeedConfig, FixedLocationConfig, IdentityConfig, LocationConfig, LogConfig, LogFormat,
    ProximityConfig, RateLimitConfig, ServerConfig, StorageBackend, StorageConfig,
};
