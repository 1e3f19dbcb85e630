//! Configuration management
//!
//! Everything is read from the environment (a `.env` file is honoured via
//! `dotenvy`), falling back to the `DEFAULT_*` constants below.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::storage::config::StorageConfig;

// ============================================================================
// Staging Constants
// ============================================================================

/// Default local staging root holding one directory per entity.
pub const DEFAULT_BUNDLE_STORAGE_DIR: &str = "./output/bundles";

/// Default retention window for staged entities, in hours.
pub const DEFAULT_RETENTION_HOURS: u64 = 24;

/// Files the generator writes per entity (bundle + hospital + practitioner).
pub const DEFAULT_EXPECTED_FILE_COUNT: usize = 3;

// ============================================================================
// Load Constants
// ============================================================================

/// Default maximum number of objects loaded per ingestion cycle.
pub const DEFAULT_LOAD_BATCH_CAP: usize = 100;

/// Default bound on any single object-storage or warehouse call, in seconds.
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Database Constants
// ============================================================================

pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/synthflow";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Generator / Transform Constants
// ============================================================================

pub const DEFAULT_SYNTHEA_JAR: &str = "/opt/synthea/synthea-with-dependencies.jar";
pub const DEFAULT_SYNTHEA_OUTPUT_DIR: &str = "/opt/synthea/output";
pub const DEFAULT_SYNTHEA_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_DBT_PROJECT_DIR: &str = "/opt/synthflow/dbt";
pub const DEFAULT_DBT_TIMEOUT_SECS: u64 = 1800;

// ============================================================================
// Schedule Constants
// ============================================================================

pub const DEFAULT_GENERATE_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_UPLOAD_INTERVAL_SECS: u64 = 1800;
pub const DEFAULT_LOAD_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_TRANSFORM_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_SCHEDULE_RETRIES: u32 = 2;
pub const DEFAULT_SCHEDULE_RETRY_DELAY_SECS: u64 = 30;

/// Full pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub staging: StagingConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub load: LoadConfig,
    pub generator: GeneratorConfig,
    pub transform: TransformConfig,
    pub schedule: ScheduleConfig,
}

/// Local staging area
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    pub bundle_dir: PathBuf,
    pub retention_hours: u64,
    pub expected_file_count: usize,
    /// Parse every staged file as JSON before uploading it
    pub validate_before_upload: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Incremental warehouse load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    pub batch_cap: usize,
    pub remote_timeout_secs: u64,
}

/// External record generator (Synthea)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub java_bin: String,
    pub jar_path: PathBuf,
    pub output_dir: PathBuf,
    pub population: u32,
    pub timeout_secs: u64,
}

/// External transformation tool (dbt)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    pub dbt_bin: String,
    pub project_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub timeout_secs: u64,
}

/// Periodic execution of each cycle; an interval of 0 disables the job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub generate_interval_secs: u64,
    pub upload_interval_secs: u64,
    pub load_interval_secs: u64,
    pub transform_interval_secs: u64,
    pub retries: u32,
    pub retry_delay_secs: u64,
}

impl PipelineConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = PipelineConfig {
            staging: StagingConfig {
                bundle_dir: env_or("BUNDLE_STORAGE_DIR", DEFAULT_BUNDLE_STORAGE_DIR).into(),
                retention_hours: env_parse("RETENTION_HOURS", DEFAULT_RETENTION_HOURS),
                expected_file_count: env_parse("EXPECTED_FILE_COUNT", DEFAULT_EXPECTED_FILE_COUNT),
                validate_before_upload: env_parse("VALIDATE_BEFORE_UPLOAD", false),
            },
            storage: StorageConfig::from_env()?,
            database: DatabaseConfig {
                url: env_or("DATABASE_URL", DEFAULT_DATABASE_URL),
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_parse(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: env_parse(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_parse(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                ),
            },
            load: LoadConfig {
                batch_cap: env_parse("LOAD_BATCH_CAP", DEFAULT_LOAD_BATCH_CAP),
                remote_timeout_secs: env_parse("REMOTE_TIMEOUT_SECS", DEFAULT_REMOTE_TIMEOUT_SECS),
            },
            generator: GeneratorConfig {
                java_bin: env_or("SYNTHEA_JAVA_BIN", "java"),
                jar_path: env_or("SYNTHEA_JAR", DEFAULT_SYNTHEA_JAR).into(),
                output_dir: env_or("SYNTHEA_OUTPUT_DIR", DEFAULT_SYNTHEA_OUTPUT_DIR).into(),
                population: env_parse("SYNTHEA_POPULATION", 1),
                timeout_secs: env_parse("SYNTHEA_TIMEOUT_SECS", DEFAULT_SYNTHEA_TIMEOUT_SECS),
            },
            transform: {
                let project_dir = env_or("DBT_PROJECT_DIR", DEFAULT_DBT_PROJECT_DIR);
                TransformConfig {
                    dbt_bin: env_or("DBT_BIN", "dbt"),
                    profiles_dir: env_or("DBT_PROFILES_DIR", &project_dir).into(),
                    project_dir: project_dir.into(),
                    timeout_secs: env_parse("DBT_TIMEOUT_SECS", DEFAULT_DBT_TIMEOUT_SECS),
                }
            },
            schedule: ScheduleConfig {
                generate_interval_secs: env_parse(
                    "GENERATE_INTERVAL_SECS",
                    DEFAULT_GENERATE_INTERVAL_SECS,
                ),
                upload_interval_secs: env_parse("UPLOAD_INTERVAL_SECS", DEFAULT_UPLOAD_INTERVAL_SECS),
                load_interval_secs: env_parse("LOAD_INTERVAL_SECS", DEFAULT_LOAD_INTERVAL_SECS),
                transform_interval_secs: env_parse(
                    "TRANSFORM_INTERVAL_SECS",
                    DEFAULT_TRANSFORM_INTERVAL_SECS,
                ),
                retries: env_parse("SCHEDULE_RETRIES", DEFAULT_SCHEDULE_RETRIES),
                retry_delay_secs: env_parse(
                    "SCHEDULE_RETRY_DELAY_SECS",
                    DEFAULT_SCHEDULE_RETRY_DELAY_SECS,
                ),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.staging.retention_hours == 0 {
            anyhow::bail!("RETENTION_HOURS must be greater than 0");
        }

        if self.staging.expected_file_count == 0 {
            anyhow::bail!("EXPECTED_FILE_COUNT must be greater than 0");
        }

        if self.load.batch_cap == 0 {
            anyhow::bail!("LOAD_BATCH_CAP must be greater than 0");
        }

        if self.load.remote_timeout_secs == 0 {
            anyhow::bail!("REMOTE_TIMEOUT_SECS must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        // A run is staged as one entity keyed by its single patient bundle
        if self.generator.population != 1 {
            anyhow::bail!(
                "SYNTHEA_POPULATION must be 1 (got {}); each generation stages one patient",
                self.generator.population
            );
        }

        self.storage.validate()?;

        if self.load.remote_timeout_secs > self.schedule.load_interval_secs
            && self.schedule.load_interval_secs > 0
        {
            tracing::warn!(
                timeout_secs = self.load.remote_timeout_secs,
                interval_secs = self.schedule.load_interval_secs,
                "Remote timeout exceeds the load interval; load runs may be skipped"
            );
        }

        Ok(())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.staging.retention_hours * 3600)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.load.remote_timeout_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            staging: StagingConfig {
                bundle_dir: PathBuf::from(DEFAULT_BUNDLE_STORAGE_DIR),
                retention_hours: DEFAULT_RETENTION_HOURS,
                expected_file_count: DEFAULT_EXPECTED_FILE_COUNT,
                validate_before_upload: false,
            },
            storage: StorageConfig::default(),
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            load: LoadConfig {
                batch_cap: DEFAULT_LOAD_BATCH_CAP,
                remote_timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
            },
            generator: GeneratorConfig {
                java_bin: "java".to_string(),
                jar_path: PathBuf::from(DEFAULT_SYNTHEA_JAR),
                output_dir: PathBuf::from(DEFAULT_SYNTHEA_OUTPUT_DIR),
                population: 1,
                timeout_secs: DEFAULT_SYNTHEA_TIMEOUT_SECS,
            },
            transform: TransformConfig {
                dbt_bin: "dbt".to_string(),
                project_dir: PathBuf::from(DEFAULT_DBT_PROJECT_DIR),
                profiles_dir: PathBuf::from(DEFAULT_DBT_PROJECT_DIR),
                timeout_secs: DEFAULT_DBT_TIMEOUT_SECS,
            },
            schedule: ScheduleConfig {
                generate_interval_secs: DEFAULT_GENERATE_INTERVAL_SECS,
                upload_interval_secs: DEFAULT_UPLOAD_INTERVAL_SECS,
                load_interval_secs: DEFAULT_LOAD_INTERVAL_SECS,
                transform_interval_secs: DEFAULT_TRANSFORM_INTERVAL_SECS,
                retries: DEFAULT_SCHEDULE_RETRIES,
                retry_delay_secs: DEFAULT_SCHEDULE_RETRY_DELAY_SECS,
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.retention(), Duration::from_secs(24 * 3600));
        assert_eq!(config.load.batch_cap, 100);
    }

    #[test]
    fn test_validate_rejects_zero_batch_cap() {
        let mut config = PipelineConfig::default();
        config.load.batch_cap = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_pool_bounds() {
        let mut config = PipelineConfig::default();
        config.database.min_connections = 10;
        config.database.max_connections = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_single_patient_population() {
        let mut config = PipelineConfig::default();
        config.generator.population = 0;
        assert!(config.validate().is_err());

        config.generator.population = 5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("SYNTHEA_POPULATION must be 1"));

        config.generator.population = 1;
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn test_population_from_environment_is_validated() {
        std::env::set_var("SYNTHEA_POPULATION", "3");
        let result = PipelineConfig::load();
        std::env::remove_var("SYNTHEA_POPULATION");
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_load_reads_environment() {
        std::env::set_var("RETENTION_HOURS", "48");
        std::env::set_var("LOAD_BATCH_CAP", "25");
        std::env::set_var("DBT_PROJECT_DIR", "/srv/dbt");
        std::env::remove_var("DBT_PROFILES_DIR");

        let config = PipelineConfig::load().unwrap();
        assert_eq!(config.staging.retention_hours, 48);
        assert_eq!(config.load.batch_cap, 25);
        assert_eq!(config.transform.profiles_dir, PathBuf::from("/srv/dbt"));

        std::env::remove_var("RETENTION_HOURS");
        std::env::remove_var("LOAD_BATCH_CAP");
        std::env::remove_var("DBT_PROJECT_DIR");
    }

    #[test]
    #[serial]
    fn test_unparsable_values_fall_back_to_defaults() {
        std::env::set_var("LOAD_BATCH_CAP", "lots");
        let config = PipelineConfig::load().unwrap();
        assert_eq!(config.load.batch_cap, DEFAULT_LOAD_BATCH_CAP);
        std::env::remove_var("LOAD_BATCH_CAP");
    }
}
