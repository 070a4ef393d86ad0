use crate::models::error::{BackupError, Result};
use crate::service::compress::decompress;
use crate::service::dump::{self, disable_foreign_keys};
use crate::service::validator::integrity_problems;
use crate::utils::directory::{parent_dir, resolve_path, sync_dir};
use log::{debug, info, warn};
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

fn restore_err(context: &str) -> impl Fn(String) -> BackupError + '_ {
    move |cause| BackupError::Restore(format!("{}: {}", context, cause))
}

/// Refuse targets that resolve to the live source database.
pub fn guard_target(target: &Path, live_source: &Path) -> Result<()> {
    if resolve_path(target) == resolve_path(live_source) {
        return Err(BackupError::Restore(format!(
            "refusing to restore over the live source database '{}'",
            live_source.display()
        )));
    }
    Ok(())
}

/// Restore the compressed dump at `artifact` into `target`.
///
/// The dump is replayed into a temporary file next to the target, which is
/// renamed over the target only after the replay committed and the result
/// passed the consistency check. On any error the target is left as it was.
pub fn restore_artifact(artifact: &Path, target: &Path, live_source: &Path) -> Result<PathBuf> {
    guard_target(target, live_source)?;

    let compressed = fs::read(artifact)
        .map_err(|e| e.to_string())
        .map_err(restore_err("read artifact"))?;
    let dump_bytes = decompress(&compressed)
        .map_err(|e| e.to_string())
        .map_err(restore_err("decompress artifact"))?;

    let parent = parent_dir(target);
    let temp = tempfile::Builder::new()
        .prefix(".restore-")
        .suffix(".tmp")
        .tempfile_in(&parent)
        .map_err(|e| e.to_string())
        .map_err(restore_err("create temporary database"))?;

    replay_into(temp.path(), &dump_bytes)?;

    temp.as_file()
        .sync_all()
        .map_err(|e| e.to_string())
        .map_err(restore_err("flush restored database"))?;
    temp.persist(target)
        .map_err(|e| e.error.to_string())
        .map_err(restore_err("publish restored database"))?;
    if let Err(e) = sync_dir(&parent) {
        warn!("Could not sync directory {}: {}", parent.display(), e);
    }

    info!(
        "Restored {} to {}",
        artifact.display(),
        target.display()
    );
    Ok(target.to_path_buf())
}

fn replay_into(path: &Path, dump_bytes: &[u8]) -> Result<()> {
    let sql_err = |context: &'static str| move |e: rusqlite::Error| restore_err(context)(e.to_string());

    let mut conn = Connection::open(path).map_err(sql_err("open temporary database"))?;
    disable_foreign_keys(&conn).map_err(sql_err("disable foreign keys"))?;
    let tx = conn.transaction().map_err(sql_err("begin replay"))?;
    dump::replay(dump_bytes, &tx).map_err(|e| match e {
        BackupError::Restore(_) => e,
        other => BackupError::Restore(other.to_string()),
    })?;
    tx.commit().map_err(sql_err("commit replay"))?;

    let problems = integrity_problems(&conn).map_err(sql_err("check restored database"))?;
    if !problems.is_empty() {
        return Err(BackupError::Restore(format!(
            "restored database failed integrity check: {}",
            problems.join("; ")
        )));
    }
    debug!("Replayed {} dump bytes into {}", dump_bytes.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dump_format::DumpFormat;
    use crate::service::compress::compress;
    use tempfile::TempDir;

    fn source_db(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("live.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE notes(id INTEGER PRIMARY KEY, body TEXT);
             INSERT INTO notes(body) VALUES ('first'), ('second');",
        )
        .unwrap();
        path
    }

    fn artifact(dir: &TempDir, source: &Path, format: DumpFormat) -> PathBuf {
        let dump_bytes = dump::dump_database(source, format).unwrap();
        let path = dir.path().join(format!("backup-manual-x.{}.gz", format.extension()));
        fs::write(&path, compress(&dump_bytes, 6).unwrap()).unwrap();
        path
    }

    fn count_notes(path: &Path) -> i64 {
        Connection::open(path)
            .unwrap()
            .query_row("SELECT COUNT(*) FROM notes", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_restore_creates_target() {
        let dir = TempDir::new().unwrap();
        let source = source_db(&dir);
        for format in [DumpFormat::Binary, DumpFormat::Sql] {
            let artifact = artifact(&dir, &source, format);
            let target = dir.path().join(format!("restored-{}.db", format));

            let restored = restore_artifact(&artifact, &target, &source).unwrap();
            assert_eq!(restored, target);
            assert_eq!(count_notes(&target), 2);
        }
    }

    #[test]
    fn test_restore_replaces_existing_target() {
        let dir = TempDir::new().unwrap();
        let source = source_db(&dir);
        let artifact = artifact(&dir, &source, DumpFormat::Binary);
        let target = dir.path().join("old.db");
        fs::write(&target, b"stale").unwrap();

        restore_artifact(&artifact, &target, &source).unwrap();
        assert_eq!(count_notes(&target), 2);
    }

    #[test]
    fn test_failed_replay_leaves_target_untouched() {
        let dir = TempDir::new().unwrap();
        let source = source_db(&dir);
        let broken = dir.path().join("broken.sql.gz");
        let sql = "CREATE TABLE a(x); INSERT INTO a VALUES (1); INSERT INTO missing VALUES (2);";
        fs::write(&broken, compress(sql.as_bytes(), 6).unwrap()).unwrap();

        let target = dir.path().join("keep.db");
        fs::write(&target, b"previous contents").unwrap();

        let err = restore_artifact(&broken, &target, &source).unwrap_err();
        assert_eq!(err.kind(), "restore");
        assert_eq!(fs::read(&target).unwrap(), b"previous contents");

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".restore-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_failed_replay_without_existing_target_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let source = source_db(&dir);
        let broken = dir.path().join("broken.dump.gz");
        fs::write(&broken, compress(b"RDBDUMP\x01\x01", 6).unwrap()).unwrap();

        let target = dir.path().join("never.db");
        assert!(restore_artifact(&broken, &target, &source).is_err());
        assert!(!target.exists());
    }

    #[test]
    fn test_live_source_is_refused() {
        let dir = TempDir::new().unwrap();
        let source = source_db(&dir);
        let artifact = artifact(&dir, &source, DumpFormat::Binary);
        let before = fs::read(&source).unwrap();

        let sneaky = dir.path().join(".").join("live.db");
        let err = restore_artifact(&artifact, &sneaky, &source).unwrap_err();
        assert!(err.to_string().contains("live source"));
        assert_eq!(fs::read(&source).unwrap(), before);
    }

    #[test]
    fn test_corrupt_artifact_is_restore_error() {
        let dir = TempDir::new().unwrap();
        let source = source_db(&dir);
        let bad = dir.path().join("bad.dump.gz");
        fs::write(&bad, b"garbage").unwrap();

        let err = restore_artifact(&bad, &dir.path().join("t.db"), &source).unwrap_err();
        assert_eq!(err.kind(), "restore");
    }
}
