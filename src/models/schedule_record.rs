use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backup strategy label carried by a schedule.
///
/// Only full dumps are produced. `Incremental` is accepted so existing
/// configurations keep loading, and runs as a full backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStrategy {
    #[default]
    Full,
    Incremental,
}

impl BackupStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStrategy::Full => "full",
            BackupStrategy::Incremental => "incremental",
        }
    }
}

impl fmt::Display for BackupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(BackupStrategy::Full),
            "incremental" => Ok(BackupStrategy::Incremental),
            other => Err(format!("unknown backup strategy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub name: String,
    pub backup_type: BackupStrategy,
    pub trigger_expression: String,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub retention_days: u32,
}
