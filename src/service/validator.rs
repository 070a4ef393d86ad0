use crate::models::error::{BackupError, Result};
use log::debug;
use rusqlite::{Connection, OpenFlags};
use std::fs;
use std::path::Path;

/// Open a database read-only, without creating it.
pub fn open_read_only(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

/// Run SQLite's consistency check and collect every reported problem.
pub fn integrity_problems(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("PRAGMA integrity_check")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let results = rows.collect::<rusqlite::Result<Vec<String>>>()?;

    Ok(if results.len() == 1 && results[0] == "ok" {
        Vec::new()
    } else {
        results
    })
}

/// Confirm the source database exists, is readable and passes
/// `PRAGMA integrity_check`. Nothing is written anywhere.
pub fn validate_source(path: &Path) -> Result<()> {
    let fail = |reason: String| BackupError::SourceValidation {
        path: path.to_path_buf(),
        reason,
    };

    let metadata = fs::metadata(path).map_err(|e| fail(format!("cannot stat file: {}", e)))?;
    if !metadata.is_file() {
        return Err(fail("not a regular file".to_string()));
    }

    // Surface permission problems as such rather than as an SQLite error.
    fs::File::open(path).map_err(|e| fail(format!("file is not readable: {}", e)))?;

    let conn = open_read_only(path).map_err(|e| fail(format!("cannot open database: {}", e)))?;
    let problems =
        integrity_problems(&conn).map_err(|e| fail(format!("integrity check failed to run: {}", e)))?;

    if !problems.is_empty() {
        return Err(fail(format!(
            "integrity check reported: {}",
            problems.join("; ")
        )));
    }

    debug!("Source database {} passed integrity check", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_valid_database_passes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ok.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE t(x); INSERT INTO t VALUES (1);")
            .unwrap();
        drop(conn);

        assert!(validate_source(&path).is_ok());
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let err = validate_source(&dir.path().join("missing.db")).unwrap_err();
        assert_eq!(err.kind(), "source_validation");
    }

    #[test]
    fn test_directory_fails() {
        let dir = TempDir::new().unwrap();
        let err = validate_source(dir.path()).unwrap_err();
        assert!(err.to_string().contains("not a regular file"));
    }

    #[test]
    fn test_non_database_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.db");
        fs::write(&path, vec![0x42u8; 8192]).unwrap();

        let err = validate_source(&path).unwrap_err();
        assert_eq!(err.kind(), "source_validation");
    }

    #[test]
    fn test_validation_does_not_create_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("never.db");
        let _ = validate_source(&path);
        assert!(!path.exists());
    }
}
