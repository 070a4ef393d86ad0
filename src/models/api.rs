use crate::models::backup_record::{BackupRecord, BackupType};
use crate::service::backup::BackupOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Request body for starting a backup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateBackupRequest {
    #[serde(default)]
    pub backup_type: Option<BackupType>,
    #[serde(flatten)]
    pub options: BackupOptions,
}

/// Request body for a restore. An empty object restores to the default target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreRequest {
    #[serde(default)]
    pub target_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResponse {
    pub backup_id: Option<String>,
    pub restored_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupListResponse {
    pub backups: Vec<BackupRecord>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphansResponse {
    pub orphans: Vec<String>,
}

/// Generic API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error kind
    pub error: String,
    pub details: Option<String>,
}
