use crate::models::backup_record::BackupRecord;
use crate::models::error::{BackupError, Result};
use crate::models::storage::{CleanupFailure, CleanupSummary};
use crate::repo::sqlite::Catalog;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub fn cutoff(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(days))
}

/// Remove completed backups older than `retention_days` (file first, then
/// catalog rows), and failed attempts older than `failed_retention_days`
/// when that is set. A failure on one item is recorded and the sweep goes on.
pub fn sweep(
    catalog: &Catalog,
    retention_days: u32,
    failed_retention_days: Option<u32>,
    now: DateTime<Utc>,
) -> Result<CleanupSummary> {
    let mut summary = CleanupSummary::default();

    let expired = catalog.expired_backups(cutoff(now, retention_days))?;
    debug!(
        "{} completed backups older than {} days",
        expired.len(),
        retention_days
    );
    for record in &expired {
        match remove_backup(catalog, record) {
            Ok(()) => summary.deleted_count += 1,
            Err(e) => {
                warn!("Skipping cleanup of backup {}: {}", record.id, e);
                summary.errors.push(CleanupFailure {
                    backup_id: record.id.clone(),
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    if let Some(days) = failed_retention_days {
        for record in catalog.failed_backups_before(cutoff(now, days))? {
            match catalog.delete(&record.id) {
                Ok(_) => summary.deleted_failed_count += 1,
                Err(e) => {
                    warn!("Skipping cleanup of failed attempt {}: {}", record.id, e);
                    summary.errors.push(CleanupFailure {
                        backup_id: record.id.clone(),
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    if summary.deleted_count > 0 || summary.deleted_failed_count > 0 || !summary.errors.is_empty() {
        info!(
            "Retention sweep removed {} backups and {} failed attempts ({} errors)",
            summary.deleted_count,
            summary.deleted_failed_count,
            summary.errors.len()
        );
    }
    Ok(summary)
}

fn remove_backup(catalog: &Catalog, record: &BackupRecord) -> Result<()> {
    remove_artifact(&record.id, Path::new(&record.file_path))?;
    catalog.delete(&record.id)?;
    Ok(())
}

/// Delete an artifact file. A file that is already gone counts as deleted.
fn remove_artifact(id: &str, path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Deleted artifact {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(
                "Artifact {} of backup {} was already missing",
                path.display(),
                id
            );
            Ok(())
        }
        Err(cause) => Err(BackupError::Cleanup {
            id: id.to_string(),
            cause,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::backup_record::{BackupFilter, BackupMetadata, BackupStatus, BackupType};
    use crate::models::verification_record::VerificationRecord;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn add_backup(
        catalog: &Catalog,
        dir: &TempDir,
        id: &str,
        age: Duration,
        status: BackupStatus,
    ) -> String {
        let file_path = if status == BackupStatus::Completed {
            let path = dir.path().join(format!("backup-manual-{}.dump.gz", id));
            fs::write(&path, b"artifact").unwrap();
            path.to_string_lossy().to_string()
        } else {
            String::new()
        };
        catalog
            .record(&BackupRecord {
                id: id.to_string(),
                timestamp: now() - age,
                backup_type: BackupType::Manual,
                file_path: file_path.clone(),
                file_size_bytes: 8,
                checksum: String::new(),
                status,
                duration_ms: 1,
                metadata: BackupMetadata::default(),
            })
            .unwrap();
        if status == BackupStatus::Completed {
            catalog
                .record_verification(&VerificationRecord::passed(id, false))
                .unwrap();
        }
        file_path
    }

    fn ids(catalog: &Catalog) -> Vec<String> {
        let mut ids: Vec<String> = catalog
            .list(&BackupFilter::default())
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_boundary_is_strict() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let old = add_backup(&catalog, &dir, "old", Duration::days(8), BackupStatus::Completed);
        let edge = add_backup(&catalog, &dir, "edge", Duration::days(7), BackupStatus::Completed);
        let fresh = add_backup(&catalog, &dir, "fresh", Duration::hours(1), BackupStatus::Completed);

        let summary = sweep(&catalog, 7, None, now()).unwrap();

        assert_eq!(summary.deleted_count, 1);
        assert_eq!(ids(&catalog), vec!["edge", "fresh"]);
        assert!(!Path::new(&old).exists());
        assert!(Path::new(&edge).exists());
        assert!(Path::new(&fresh).exists());
        assert!(catalog.verifications("old").unwrap().is_empty());
    }

    #[test]
    fn test_missing_file_does_not_stop_sweep() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let first = add_backup(&catalog, &dir, "a", Duration::days(40), BackupStatus::Completed);
        add_backup(&catalog, &dir, "b", Duration::days(35), BackupStatus::Completed);
        fs::remove_file(first).unwrap();

        let summary = sweep(&catalog, 30, None, now()).unwrap();
        assert_eq!(summary.deleted_count, 2);
        assert!(summary.errors.is_empty());
        assert!(ids(&catalog).is_empty());
    }

    #[test]
    fn test_undeletable_file_keeps_its_rows() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        add_backup(&catalog, &dir, "ok", Duration::days(40), BackupStatus::Completed);
        // A non-empty directory in place of the artifact cannot be removed as a file
        let stuck = dir.path().join("stuck");
        fs::create_dir(&stuck).unwrap();
        fs::write(stuck.join("inner"), b"x").unwrap();
        catalog
            .record(&BackupRecord {
                id: "stuck".to_string(),
                timestamp: now() - Duration::days(50),
                backup_type: BackupType::Scheduled,
                file_path: stuck.to_string_lossy().to_string(),
                file_size_bytes: 1,
                checksum: String::new(),
                status: BackupStatus::Completed,
                duration_ms: 1,
                metadata: BackupMetadata::default(),
            })
            .unwrap();

        let summary = sweep(&catalog, 30, None, now()).unwrap();
        assert_eq!(summary.deleted_count, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].backup_id, "stuck");
        assert_eq!(summary.errors[0].kind, "cleanup");
        assert_eq!(ids(&catalog), vec!["stuck"]);
    }

    #[test]
    fn test_failed_attempts_kept_without_policy() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        add_backup(&catalog, &dir, "failed", Duration::days(90), BackupStatus::Failed);

        let summary = sweep(&catalog, 30, None, now()).unwrap();
        assert_eq!(summary.deleted_failed_count, 0);
        assert_eq!(ids(&catalog), vec!["failed"]);

        let summary = sweep(&catalog, 30, Some(7), now()).unwrap();
        assert_eq!(summary.deleted_failed_count, 1);
        assert!(ids(&catalog).is_empty());
    }
}
