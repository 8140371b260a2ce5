use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::errors::ConfigError;

pub const ENV_PREFIX: &str = "ICEWATCH";
pub const ENV_SEPARATOR: &str = "__";
/// Overrides the directory holding `default.toml` / `local.toml`.
pub const CONFIG_DIR_VAR: &str = "ICEWATCH_CONFIG_DIR";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub log: LogConfig,
    pub storage: StorageConfig,
    pub proximity: ProximityConfig,
    pub feed: FeedConfig,
    pub identity: IdentityConfig,
    pub location: LocationConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Serve Prometheus metrics on `/metrics`.
    pub metrics: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            metrics: true,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Human,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub url: Option<SecretString>,
    pub max_connections: u32,
    /// Deadline for every storage call, in milliseconds.
    pub timeout_ms: u64,
    /// Capacity of the change notification buffer per subscriber.
    pub event_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            url: None,
            max_connections: 10,
            timeout_ms: 5_000,
            event_capacity: 1024,
        }
    }
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    pub update_interval_secs: u64,
    /// Radius used by the "reports near you" check.
    pub nearby_radius_meters: f64,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 5,
            nearby_radius_meters: 50.0,
        }
    }
}

impl ProximityConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub poll_interval_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            sweep_interval_secs: 60,
        }
    }
}

impl FeedConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// HMAC key for identity digests. Unset means plain SHA-256.
    pub salt: Option<SecretString>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FixedLocationConfig {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub refresh_interval_secs: u64,
    pub timeout_secs: u64,
    /// When set, the binary also runs a proximity watch at this position.
    pub fixed: Option<FixedLocationConfig>,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 10,
            timeout_secs: 30,
            fixed: None,
        }
    }
}

impl LocationConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Cooldowns in seconds; 0 disables a check.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub report_cooldown_secs: i64,
    pub vote_cooldown_secs: i64,
    pub comment_cooldown_secs: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            report_cooldown_secs: 60,
            vote_cooldown_secs: 1,
            comment_cooldown_secs: 5,
        }
    }
}

impl AppConfig {
    /// Loads `.env`, then the layered sources from `$ICEWATCH_CONFIG_DIR`
    /// (default `config`).
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        let dir = std::env::var(CONFIG_DIR_VAR).unwrap_or_else(|_| "config".to_string());
        Self::load_from(Path::new(&dir))
    }

    pub fn load_from(dir: &Path) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(dir.join("default.toml")).required(false))
            .add_source(File::from(dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;
        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a single TOML document over the built-in defaults.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.backend == StorageBackend::Postgres {
            let has_url = self
                .storage
                .url
                .as_ref()
                .is_some_and(|url| !url.expose_secret().trim().is_empty());
            if !has_url {
                return Err(ConfigError::Invalid(
                    "storage.url is required for the postgres backend".to_string(),
                ));
            }
        }
        if self.storage.timeout_ms == 0 {
            return Err(ConfigError::Invalid("storage.timeout_ms must be positive".to_string()));
        }
        let intervals = [
            ("proximity.update_interval_secs", self.proximity.update_interval_secs),
            ("feed.poll_interval_secs", self.feed.poll_interval_secs),
            ("feed.sweep_interval_secs", self.feed.sweep_interval_secs),
            ("location.refresh_interval_secs", self.location.refresh_interval_secs),
            ("location.timeout_secs", self.location.timeout_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be positive")));
        }
        if let Some(fixed) = self.location.fixed {
            let in_range = (-90.0..=90.0).contains(&fixed.latitude) && (-180.0..=180.0).contains(&fixed.longitude);
            if !in_range {
                return Err(ConfigError::Invalid(format!(
                    "location.fixed ({}, {}) is out of range",
                    fixed.latitude, fixed.longitude
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.server.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.proximity.update_interval(), Duration::from_secs(5));
        assert_eq!(config.feed.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.feed.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.location.timeout(), Duration::from_secs(30));
        assert_eq!(config.rate_limit.report_cooldown_secs, 60);
        assert!(config.identity.salt.is_none());
        assert!(config.location.fixed.is_none());
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [server]
            port = 9000

            [log]
            format = "json"

            [location.fixed]
            latitude = 45.5
            longitude = -73.6
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.level, "info");
        assert_eq!(
            config.location.fixed,
            Some(FixedLocationConfig {
                latitude: 45.5,
                longitude: -73.6
            })
        );
    }

    #[test]
    fn test_postgres_requires_url() {
        let err = AppConfig::from_toml_str("[storage]\nbackend = \"postgres\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config =
            AppConfig::from_toml_str("[storage]\nbackend = \"postgres\"\nurl = \"postgres://localhost/icewatch\"\n")
                .unwrap();
        assert_eq!(
            config.storage.url.as_ref().map(|u| u.expose_secret().to_string()),
            Some("postgres://localhost/icewatch".to_string())
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(AppConfig::from_toml_str("[feed]\npoll_interval_secs = 0\n").is_err());
        assert!(AppConfig::from_toml_str("[location.fixed]\nlatitude = 95.0\nlongitude = 0.0\n").is_err());
        assert!(AppConfig::from_toml_str("[log]\nformat = \"xml\"\n").is_err());
    }

    #[test]
    fn test_secrets_are_redacted_in_debug() {
        let config = AppConfig::from_toml_str("[identity]\nsalt = \"pepper\"\n").unwrap();
        assert!(!format!("{config:?}").contains("pepper"));
    }

    #[test]
    fn test_load_from_missing_dir_uses_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/icewatch-config")).unwrap();
        assert_eq!(config.log.level, "info");
    }
}
