use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub claims: ClaimsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub seed: SeedConfig,
}

impl ApiConfig {
    pub fn load() -> Result<Self> {
        let configured_path =
            std::env::var("COUPON_API_CONFIG").unwrap_or_else(|_| "config/api.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );
        assert!(
            configured_path.len() < 4096,
            "Configuration path length exceeds hard limit"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("COUPON_API_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/api.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        // COUPON_API__CLAIMS__COOLDOWN_PERIOD_SECONDS=60 and friends
        builder = builder.add_source(
            Environment::with_prefix("COUPON_API")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        let config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize API configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.server.port > 0, "Server port must be greater than zero");
        if self.storage.backend == StorageBackend::Postgres {
            let database = self
                .database
                .as_ref()
                .context("[database] section is required for the postgres backend")?;
            database.ensure_bounds()?;
        }
        self.storage.ensure_bounds()?;
        self.claims.ensure_bounds()?;
        self.cache.ensure_bounds()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
    /// Mark the identity cookie `Secure`; enable behind TLS.
    #[serde(default)]
    pub secure_cookies: bool,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(self.port != 0, "HTTP port cannot be zero");
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "StorageConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        assert!(self.timeout_ms >= 100, "Storage timeout must be at least 100ms");
        assert!(
            self.timeout_ms <= 60_000,
            "Storage timeout cannot exceed 60 seconds"
        );
        Duration::from_millis(self.timeout_ms)
    }

    fn ensure_bounds(&self) -> Result<()> {
        ensure!(
            (100..=60_000).contains(&self.timeout_ms),
            "storage.timeout_ms must be between 100 and 60000"
        );
        Ok(())
    }

    const fn default_timeout_ms() -> u64 {
        2_000
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: Option<u32>,
}

impl DatabaseConfig {
    fn ensure_bounds(&self) -> Result<()> {
        ensure!(!self.url.is_empty(), "Database URL must be specified");
        ensure!(
            self.max_connections >= self.min_connections.unwrap_or(1),
            "Max connections must be >= min connections"
        );
        ensure!(self.max_connections <= 128, "Connection pool oversized");
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClaimsConfig {
    pub cooldown_period_seconds: u64,
    /// Maximum codes returned by the status endpoint.
    pub history_limit: u64,
    /// Claims older than this drop out of the status history.
    pub history_retention_days: u64,
    /// Also refuse a claim when the same IP claimed inside the window.
    pub ip_cooldown: bool,
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            cooldown_period_seconds: 3_600,
            history_limit: 10,
            history_retention_days: 7,
            ip_cooldown: false,
        }
    }
}

impl ClaimsConfig {
    pub fn history_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.history_retention_days as i64)
    }

    fn ensure_bounds(&self) -> Result<()> {
        ensure!(
            self.cooldown_period_seconds >= 1,
            "claims.cooldown_period_seconds must be positive"
        );
        ensure!(
            self.cooldown_period_seconds <= 365 * 86_400,
            "claims.cooldown_period_seconds cannot exceed one year"
        );
        ensure!(
            (1..=100).contains(&self.history_limit),
            "claims.history_limit must be between 1 and 100"
        );
        ensure!(
            self.history_retention_days <= 3_650,
            "claims.history_retention_days cannot exceed ten years"
        );
        ensure!(
            self.history_retention_days * 86_400 >= self.cooldown_period_seconds,
            "claims.history_retention_days must cover the cooldown period"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub users_max_capacity: u64,
    pub users_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            users_max_capacity: 100_000,
            users_ttl_seconds: 3_600,
        }
    }
}

impl CacheConfig {
    fn ensure_bounds(&self) -> Result<()> {
        ensure!(
            self.users_max_capacity >= 100,
            "User cache capacity must be at least 100"
        );
        ensure!(
            self.users_ttl_seconds <= 86_400,
            "User cache TTL cannot exceed one day"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SeedConfig {
    /// Coupon codes inserted at start-up when missing, in rotation order.
    pub coupons: Vec<String>,
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}
