use serde::{Deserialize, Serialize};

/// Notifications published by the engine to its subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BackupEvent {
    BackupCompleted {
        id: String,
        file_size_bytes: u64,
        duration_ms: u64,
        integrity_ok: bool,
    },
    BackupFailed {
        id: String,
        duration_ms: u64,
        kind: String,
        error: String,
    },
    RestoreCompleted {
        id: Option<String>,
        restored_path: String,
        duration_ms: u64,
    },
    CleanupCompleted {
        deleted_count: usize,
        failed_count: usize,
    },
}

impl BackupEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BackupEvent::BackupCompleted { .. } => "backup_completed",
            BackupEvent::BackupFailed { .. } => "backup_failed",
            BackupEvent::RestoreCompleted { .. } => "restore_completed",
            BackupEvent::CleanupCompleted { .. } => "cleanup_completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_is_tagged_by_name() {
        let event = BackupEvent::CleanupCompleted {
            deleted_count: 2,
            failed_count: 0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
        assert_eq!(json["deleted_count"], 2);
    }
}
