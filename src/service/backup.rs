use crate::models::backup_record::{BackupMetadata, BackupRecord, BackupStatus, BackupType};
use crate::models::dump_format::DumpFormat;
use crate::models::error::{BackupError, Result};
use crate::models::schedule_record::BackupStrategy;
use crate::models::verification_record::VerificationRecord;
use crate::repo::sqlite::Catalog;
use crate::service::compress::{compress, compression_ratio};
use crate::service::dump::dump_database;
use crate::service::hash::hash_file;
use crate::service::validator::validate_source;
use crate::service::verify;
use crate::utils::directory::sync_dir;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::TempPath;

/// One lock per backup directory, shared by every engine in the process
static BACKUP_LOCKS: Lazy<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub fn backup_lock(backup_dir: &Path) -> Arc<tokio::sync::Mutex<()>> {
    let key = backup_dir
        .canonicalize()
        .unwrap_or_else(|_| backup_dir.to_path_buf());
    let mut locks = BACKUP_LOCKS.lock().unwrap_or_else(PoisonError::into_inner);
    locks.entry(key).or_default().clone()
}

/// Per-call overrides for a backup. Unset fields fall back to the config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupOptions {
    #[serde(default)]
    pub dump_format: Option<DumpFormat>,
    #[serde(default)]
    pub compression_level: Option<u32>,
    #[serde(default)]
    pub verify_restore: Option<bool>,
    #[serde(default)]
    pub strategy: Option<BackupStrategy>,
    /// Stored verbatim in the record metadata
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Everything one backup attempt needs, fixed before it starts.
#[derive(Debug, Clone)]
pub struct BackupPlan {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub backup_type: BackupType,
    pub source: PathBuf,
    pub backup_dir: PathBuf,
    pub format: DumpFormat,
    pub compression_level: u32,
    pub restore_test: bool,
    pub strategy: BackupStrategy,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BackupPlan {
    pub fn final_path(&self) -> PathBuf {
        self.backup_dir.join(artifact_file_name(
            self.backup_type,
            self.timestamp,
            &self.id,
            self.format,
        ))
    }

    fn metadata(&self) -> BackupMetadata {
        BackupMetadata {
            dump_format: Some(self.format.to_string()),
            strategy: Some(self.strategy.to_string()),
            options: self.extra.clone(),
            ..BackupMetadata::default()
        }
    }
}

/// `backup-{type}-{timestamp}-{id}.{ext}.gz` with `:` and `.` of the
/// timestamp replaced so the name is portable.
pub fn artifact_file_name(
    backup_type: BackupType,
    timestamp: DateTime<Utc>,
    id: &str,
    format: DumpFormat,
) -> String {
    let stamp = timestamp
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!(
        "backup-{}-{}-{}.{}.gz",
        backup_type,
        stamp,
        id,
        format.extension()
    )
}

/// A written and checksummed artifact still at its temporary path.
/// Dropping it deletes the file.
#[derive(Debug)]
pub struct PreparedArtifact {
    pub temp: TempPath,
    pub final_path: PathBuf,
    pub checksum: String,
    pub file_size: u64,
    pub original_size: u64,
    /// Outcome of the decompression round-trip (and restore test)
    pub round_trip: std::result::Result<(), String>,
    pub restore_tested: bool,
}

/// Polled by [`prepare`] between pipeline stages.
pub trait CancelCheck {
    fn is_cancelled(&self) -> bool;
}

impl CancelCheck for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

/// Cancellation state of one attempt: an explicit request, or the caller
/// having dropped the attempt.
#[derive(Debug, Clone, Default)]
pub struct AttemptCancel {
    pub requested: Arc<AtomicBool>,
    pub abandoned: Arc<AtomicBool>,
}

impl CancelCheck for AttemptCancel {
    fn is_cancelled(&self) -> bool {
        self.requested.is_cancelled() || self.abandoned.is_cancelled()
    }
}

/// Marks an attempt abandoned when dropped.
pub struct AbandonOnDrop(pub Arc<AtomicBool>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn check_cancel(cancel: &impl CancelCheck) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(BackupError::Cancelled);
    }
    Ok(())
}

/// Validate, dump, compress and write the artifact to a temporary file in
/// the backup directory, then hash the on-disk bytes and decompress them
/// again. Nothing is visible under the final name yet.
pub fn prepare(plan: &BackupPlan, cancel: &impl CancelCheck) -> Result<PreparedArtifact> {
    check_cancel(cancel)?;
    validate_source(&plan.source)?;

    check_cancel(cancel)?;
    let dump = dump_database(&plan.source, plan.format)?;

    check_cancel(cancel)?;
    let compressed = compress(&dump, plan.compression_level)?;
    debug!(
        "Backup {}: {} dump bytes compressed to {}",
        plan.id,
        dump.len(),
        compressed.len()
    );

    check_cancel(cancel)?;
    fs::create_dir_all(&plan.backup_dir)?;
    let mut file = tempfile::Builder::new()
        .prefix(".backup-")
        .suffix(".tmp")
        .tempfile_in(&plan.backup_dir)?;
    file.write_all(&compressed)?;
    file.as_file().sync_all()?;
    let temp = file.into_temp_path();

    let checksum = hash_file(&temp)?;
    let file_size = fs::metadata(&temp)?.len();
    let round_trip = verify::round_trip(&temp, plan.restore_test).map_err(|e| e.to_string());
    if let Err(e) = &round_trip {
        warn!("Backup {} failed its write-time check: {}", plan.id, e);
    }

    check_cancel(cancel)?;
    Ok(PreparedArtifact {
        temp,
        final_path: plan.final_path(),
        checksum,
        file_size,
        original_size: dump.len() as u64,
        round_trip,
        restore_tested: plan.restore_test,
    })
}

/// Rename the artifact to its final name and flush the directory.
pub fn publish(temp: TempPath, final_path: &Path) -> Result<()> {
    // persist hands the path back on failure; dropping it removes the file
    temp.persist(final_path).map_err(|e| BackupError::Io(e.error))?;
    if let Some(parent) = final_path.parent() {
        if let Err(e) = sync_dir(parent) {
            warn!("Could not sync directory {}: {}", parent.display(), e);
        }
    }
    Ok(())
}

/// Publish the artifact and write its catalog rows: the completed record
/// and its verification, together. A catalog failure leaves the file in
/// place with no record pointing at it.
pub fn finalize(
    catalog: &Catalog,
    plan: &BackupPlan,
    artifact: PreparedArtifact,
    duration_ms: u64,
) -> Result<(BackupRecord, VerificationRecord)> {
    let PreparedArtifact {
        temp,
        final_path,
        checksum,
        file_size,
        original_size,
        round_trip,
        restore_tested,
    } = artifact;

    publish(temp, &final_path)?;

    let record = BackupRecord {
        id: plan.id.clone(),
        timestamp: plan.timestamp,
        backup_type: plan.backup_type,
        file_path: final_path.to_string_lossy().to_string(),
        file_size_bytes: file_size,
        checksum,
        status: BackupStatus::Completed,
        duration_ms,
        metadata: BackupMetadata {
            original_size,
            compression_ratio: compression_ratio(original_size as usize, file_size as usize),
            ..plan.metadata()
        },
    };
    let verification = match round_trip {
        Ok(()) => VerificationRecord::passed(&record.id, restore_tested),
        Err(e) => VerificationRecord::failed(&record.id, restore_tested, e),
    };
    catalog.record_completed(&record, &verification)?;

    info!(
        "Backup {} completed: {} ({} bytes, integrity_ok={})",
        record.id, record.file_path, record.file_size_bytes, verification.integrity_ok
    );
    Ok((record, verification))
}

/// Audit record for an attempt that did not produce an artifact.
pub fn failed_record(plan: &BackupPlan, error: &BackupError, duration_ms: u64) -> BackupRecord {
    BackupRecord {
        id: plan.id.clone(),
        timestamp: plan.timestamp,
        backup_type: plan.backup_type,
        file_path: String::new(),
        file_size_bytes: 0,
        checksum: String::new(),
        status: BackupStatus::Failed,
        duration_ms,
        metadata: BackupMetadata {
            error: Some(error.to_string()),
            ..plan.metadata()
        },
    }
}
