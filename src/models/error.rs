use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Failed to read config file '{path}': {cause}")]
    ConfigRead { path: PathBuf, cause: io::Error },

    #[error("Failed to parse config file '{path}': {cause}")]
    ConfigParse {
        path: PathBuf,
        cause: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Source database '{path}' failed validation: {reason}")]
    SourceValidation { path: PathBuf, reason: String },

    #[error("Failed to dump {stage}: {cause}")]
    Dump {
        stage: String,
        cause: rusqlite::Error,
    },

    #[error("Malformed dump stream: {0}")]
    DumpFormat(String),

    #[error("Compression failed: {0}")]
    Compression(io::Error),

    #[error("Checksum mismatch for '{path}': expected {expected}, found {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Failed to open or create catalog database '{path}': {cause}")]
    DatabaseConnection { path: String, cause: String },

    #[error("Catalog query failed for '{operation}': {cause}")]
    DatabaseQuery {
        operation: String,
        cause: rusqlite::Error,
    },

    #[error("Failed to write {table} for backup {id}: {cause}")]
    CatalogWrite {
        table: String,
        id: String,
        cause: rusqlite::Error,
    },

    #[error("Backup {0} was not found in the catalog")]
    BackupNotFound(String),

    #[error("Backup {0} did not complete and has no artifact")]
    NotCompleted(String),

    #[error("Restore failed: {0}")]
    Restore(String),

    #[error("Failed to clean up backup {id}: {cause}")]
    Cleanup { id: String, cause: io::Error },

    #[error("Backup was cancelled before its artifact was written")]
    Cancelled,

    #[error("Invalid trigger expression '{expression}': {reason}")]
    InvalidTrigger { expression: String, reason: String },

    #[error("Schedule '{0}' is disabled")]
    ScheduleDisabled(String),

    #[error("Scheduler is already running")]
    SchedulerAlreadyRunning,

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl BackupError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::ConfigRead { .. }
            | BackupError::ConfigParse { .. }
            | BackupError::ConfigInvalid(_) => "config",
            BackupError::SourceValidation { .. } => "source_validation",
            BackupError::Dump { .. } | BackupError::DumpFormat(_) => "dump",
            BackupError::Compression(_) => "compression",
            BackupError::ChecksumMismatch { .. } => "checksum_mismatch",
            BackupError::DatabaseConnection { .. } | BackupError::DatabaseQuery { .. } => {
                "catalog_read"
            }
            BackupError::CatalogWrite { .. } => "catalog_write",
            BackupError::BackupNotFound(_) => "not_found",
            BackupError::NotCompleted(_) => "not_completed",
            BackupError::Restore(_) => "restore",
            BackupError::Cleanup { .. } => "cleanup",
            BackupError::Cancelled => "cancelled",
            BackupError::InvalidTrigger { .. } => "invalid_trigger",
            BackupError::ScheduleDisabled(_) => "schedule_disabled",
            BackupError::SchedulerAlreadyRunning => "scheduler_running",
            BackupError::Task(_) => "task",
            BackupError::Io(_) => "io",
            BackupError::ThreadPool(_) => "thread_pool",
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
