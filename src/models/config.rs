use crate::models::config_validator::validate_config;
use crate::models::dump_format::DumpFormat;
use crate::models::error::{BackupError, Result};
use crate::models::schedule_record::BackupStrategy;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_CATALOG_FILE: &str = "backup_catalog.db";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub source_database: PathBuf,
    pub backup_directory: PathBuf,
    #[serde(default)]
    pub catalog_database: Option<PathBuf>,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default)]
    pub failed_retention_days: Option<u32>,
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
    #[serde(default)]
    pub dump_format: DumpFormat,
    #[serde(default = "bool_false")]
    pub verify_restore: bool,
    #[serde(default = "bool_true")]
    pub cleanup_after_backup: bool,
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_schedule_name")]
    pub name: String,
    #[serde(default)]
    pub backup_type: BackupStrategy,
    pub trigger: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default)]
    pub retention_days: Option<u32>,
    #[serde(default)]
    pub cleanup_interval: Option<String>,
}

const fn default_retention_days() -> u32 {
    30
}
const fn default_compression_level() -> u32 {
    6
}
const fn bool_false() -> bool {
    false
}
const fn bool_true() -> bool {
    true
}
fn default_max_threads() -> usize {
    num_cpus::get_physical()
}
fn default_schedule_name() -> String {
    "default".to_string()
}

impl Config {
    /// A config with defaults for everything except the two required paths.
    pub fn new(source_database: impl Into<PathBuf>, backup_directory: impl Into<PathBuf>) -> Self {
        Self {
            source_database: source_database.into(),
            backup_directory: backup_directory.into(),
            catalog_database: None,
            retention_days: default_retention_days(),
            failed_retention_days: None,
            compression_level: default_compression_level(),
            dump_format: DumpFormat::default(),
            verify_restore: false,
            cleanup_after_backup: true,
            max_threads: default_max_threads(),
            schedule: None,
        }
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.catalog_database
            .clone()
            .unwrap_or_else(|| self.backup_directory.join(DEFAULT_CATALOG_FILE))
    }

    /// Retention of the active schedule, falling back to the global value.
    pub fn effective_retention_days(&self) -> u32 {
        self.schedule
            .as_ref()
            .and_then(|s| s.retention_days)
            .unwrap_or(self.retention_days)
    }

    /// Default restore target for the configured source.
    pub fn default_restore_target(&self) -> PathBuf {
        let mut target = self.source_database.clone().into_os_string();
        target.push(".restored");
        PathBuf::from(target)
    }
}

pub fn setup_config(config_file: String) -> Result<Config> {
    let config_path = PathBuf::from(config_file);
    info!("Loading config from: {}", config_path.display());

    let config_str = fs::read_to_string(&config_path).map_err(|cause| {
        BackupError::ConfigRead {
            path: config_path.clone(),
            cause,
        }
    })?;

    let config: Config = serde_json::from_str(&config_str).map_err(|cause| {
        BackupError::ConfigParse {
            path: config_path,
            cause,
        }
    })?;

    validate_config(&config)?;

    Ok(config)
}
