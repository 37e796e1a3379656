use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};
use validator::Validate;

/// Default values for configuration
const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ALLOCATION_MAX_RETRIES: u32 = 4;
const DEFAULT_DEPLETED_RETENTION_DAYS: u32 = 90;
const DEFAULT_MIGRATION_SHELF_LIFE_DAYS: u32 = 730;
const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Engine tunables, loaded from defaults layered under `RXSTOCK_*`
/// environment overrides.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Deployment environment label (development, test, production).
    #[serde(default = "default_env")]
    pub environment: String,

    /// Logging level for the opt-in subscriber.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Bound on allocator re-plans when a concurrent writer invalidates a
    /// committed plan.
    #[serde(default = "default_allocation_max_retries")]
    #[validate(range(min = 1, max = 16))]
    pub allocation_max_retries: u32,

    /// How long depleted batch tombstones are kept before the GC pass may
    /// remove them. Zero prunes on the next pass.
    #[serde(default = "default_depleted_retention_days")]
    #[validate(range(max = 3650))]
    pub depleted_retention_days: u32,

    /// Synthetic shelf life given to legacy flat stock when it is migrated
    /// into its first batch.
    #[serde(default = "default_migration_shelf_life_days")]
    #[validate(range(min = 1, max = 3650))]
    pub migration_shelf_life_days: u32,

    /// Capacity of the engine event channel.
    #[serde(default = "default_event_buffer_size")]
    #[validate(range(min = 16))]
    pub event_buffer_size: usize,
}

fn default_env() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_allocation_max_retries() -> u32 {
    DEFAULT_ALLOCATION_MAX_RETRIES
}
fn default_depleted_retention_days() -> u32 {
    DEFAULT_DEPLETED_RETENTION_DAYS
}
fn default_migration_shelf_life_days() -> u32 {
    DEFAULT_MIGRATION_SHELF_LIFE_DAYS
}
fn default_event_buffer_size() -> usize {
    DEFAULT_EVENT_BUFFER_SIZE
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: default_env(),
            log_level: default_log_level(),
            allocation_max_retries: default_allocation_max_retries(),
            depleted_retention_days: default_depleted_retention_days(),
            migration_shelf_life_days: default_migration_shelf_life_days(),
            event_buffer_size: default_event_buffer_size(),
        }
    }
}

impl EngineConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn depleted_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.depleted_retention_days))
    }

    pub fn migration_shelf_life(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.migration_shelf_life_days))
    }
}

/// Loads engine configuration from built-in defaults and `RXSTOCK_*`
/// environment variables (e.g. `RXSTOCK_ALLOCATION_MAX_RETRIES=8`).
pub fn load_config() -> Result<EngineConfig, ConfigLoadError> {
    let config = Config::builder()
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .add_source(Environment::with_prefix("RXSTOCK"))
        .build()?;

    let engine_config: EngineConfig = config.try_deserialize()?;

    engine_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        e
    })?;

    info!(
        environment = %engine_config.environment,
        "configuration loaded"
    );
    Ok(engine_config)
}

/// Initializes tracing using the provided log level as the default filter.
/// `RUST_LOG`, when set and non-empty, wins over the configured level.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("rxstock={}", level);
    let filter_directive = std::env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.allocation_max_retries, 4);
        assert_eq!(cfg.migration_shelf_life_days, 730);
        assert!(!cfg.is_production());
    }

    #[test]
    fn out_of_range_retries_rejected() {
        let cfg = EngineConfig {
            allocation_max_retries: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = EngineConfig {
            allocation_max_retries: 64,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn retention_zero_is_allowed() {
        let cfg = EngineConfig {
            depleted_retention_days: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.depleted_retention(), chrono::Duration::zero());
    }
}
