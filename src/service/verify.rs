use crate::models::backup_record::BackupRecord;
use crate::models::error::{BackupError, Result};
use crate::models::verification_record::VerificationRecord;
use crate::service::compress::decompress;
use crate::service::dump::{self, disable_foreign_keys};
use crate::service::hash::hash_file;
use crate::service::validator::integrity_problems;
use log::{debug, warn};
use rusqlite::Connection;
use std::fs;
use std::path::Path;

/// Decompress the artifact at `path` and discard the result. With
/// `restore_test`, also replay it into a scratch database.
pub fn round_trip(path: &Path, restore_test: bool) -> Result<()> {
    let compressed = fs::read(path)?;
    let dump = decompress(&compressed)?;
    if restore_test {
        test_restore(&dump)?;
    }
    Ok(())
}

/// Replay a dump into an in-memory database and run the consistency check
/// on the result.
pub fn test_restore(dump_bytes: &[u8]) -> Result<()> {
    let restore_err = |e: rusqlite::Error| BackupError::Restore(format!("restore test: {}", e));

    let mut conn = Connection::open_in_memory().map_err(restore_err)?;
    disable_foreign_keys(&conn).map_err(restore_err)?;
    let tx = conn.transaction().map_err(restore_err)?;
    dump::replay(dump_bytes, &tx)?;
    tx.commit().map_err(restore_err)?;

    let problems = integrity_problems(&conn).map_err(restore_err)?;
    if !problems.is_empty() {
        return Err(BackupError::Restore(format!(
            "restored database failed integrity check: {}",
            problems.join("; ")
        )));
    }
    Ok(())
}

/// Recompute the digest of the file and compare it with `expected`.
pub fn check_checksum(path: &Path, expected: &str) -> Result<()> {
    let actual = hash_file(path)?;
    if actual != expected {
        return Err(BackupError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Audit a completed backup. Never fails: problems end up in the returned
/// record with `integrity_ok = false`.
pub fn verify_artifact(record: &BackupRecord, restore_test: bool) -> VerificationRecord {
    let path = Path::new(&record.file_path);

    let outcome = check_checksum(path, &record.checksum).and_then(|_| round_trip(path, restore_test));

    match outcome {
        Ok(()) => {
            debug!("Backup {} verified", record.id);
            VerificationRecord::passed(&record.id, restore_test)
        }
        Err(e) => {
            warn!("Backup {} failed verification: {}", record.id, e);
            // The restore test only runs once checksum and decompression pass
            let restore_tested = restore_test && matches!(e, BackupError::Restore(_));
            VerificationRecord::failed(&record.id, restore_tested, e.to_string())
        }
    }
}
