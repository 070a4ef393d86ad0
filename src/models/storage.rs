use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogSummary {
    pub completed_count: u64,
    pub failed_count: u64,
    pub total_size_bytes: u64,
    pub oldest_completed: Option<String>,
    pub newest_completed: Option<String>,
    pub type_stats: Vec<BackupTypeStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupTypeStats {
    pub backup_type: String,
    pub count: u64,
    pub total_size_bytes: u64,
}

/// Result of a retention sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupSummary {
    pub deleted_count: usize,
    pub deleted_failed_count: usize,
    pub errors: Vec<CleanupFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupFailure {
    pub backup_id: String,
    pub kind: String,
    pub message: String,
}
