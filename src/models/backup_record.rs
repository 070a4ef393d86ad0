use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What triggered a backup attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Manual,
    Scheduled,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Manual => "manual",
            BackupType::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(BackupType::Manual),
            "scheduled" => Ok(BackupType::Scheduled),
            other => Err(format!("unknown backup type '{}'", other)),
        }
    }
}

/// Final outcome of a backup attempt. A record is only ever written once the
/// attempt has reached one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "completed" => Ok(BackupStatus::Completed),
            "failed" => Ok(BackupStatus::Failed),
            other => Err(format!("unknown backup status '{}'", other)),
        }
    }
}

/// Structured metadata stored alongside every backup record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Size of the dump before compression
    pub original_size: u64,

    /// compressed / original, 0.0 when nothing was dumped
    pub compression_ratio: f64,

    /// Dump format label (binary or sql)
    #[serde(default)]
    pub dump_format: Option<String>,

    /// Strategy label of the schedule that produced the backup
    #[serde(default)]
    pub strategy: Option<String>,

    /// Error message for failed attempts
    #[serde(default)]
    pub error: Option<String>,

    /// Free-form caller options
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub backup_type: BackupType,
    pub file_path: String,
    pub file_size_bytes: u64,
    /// Hex SHA-256 of the compressed artifact; empty for failed attempts
    pub checksum: String,
    pub status: BackupStatus,
    pub duration_ms: u64,
    pub metadata: BackupMetadata,
}

impl BackupRecord {
    pub fn is_completed(&self) -> bool {
        self.status == BackupStatus::Completed
    }
}

/// Filters accepted by the catalog listing. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupFilter {
    pub backup_type: Option<BackupType>,
    pub status: Option<BackupStatus>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl BackupFilter {
    pub fn completed() -> Self {
        Self {
            status: Some(BackupStatus::Completed),
            ..Self::default()
        }
    }
}
