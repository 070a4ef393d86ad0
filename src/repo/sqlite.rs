use crate::models::backup_record::{BackupFilter, BackupMetadata, BackupRecord, BackupStatus};
use crate::models::error::{BackupError, Result};
use crate::models::schedule_record::ScheduleRecord;
use crate::models::storage::{BackupTypeStats, CatalogSummary};
use crate::models::verification_record::VerificationRecord;
use chrono::{DateTime, Utc};
use log::{debug, info};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

type DbPool = Pool<SqliteConnectionManager>;

const BACKUP_COLUMNS: &str =
    "id, timestamp, backup_type, file_path, file_size, checksum, status, duration, metadata";

const VERIFICATION_COLUMNS: &str = "backup_id, verification_date, verification_status, integrity_check, restore_test, error_message";

const SCHEDULE_COLUMNS: &str =
    "schedule_name, backup_type, trigger_expression, enabled, last_run, next_run, retention_days";

/// Durable store for backup history, verification results and schedules.
///
/// Cloning is cheap; clones share one connection pool.
#[derive(Clone)]
pub struct Catalog {
    pool: Arc<DbPool>,
    location: String,
}

impl Catalog {
    pub fn open(db_file: &str) -> Result<Catalog> {
        if db_file.is_empty() {
            return Err(BackupError::DatabaseConnection {
                path: db_file.to_string(),
                cause: "Catalog path cannot be empty".to_string(),
            });
        }

        info!("Initializing catalog connection pool: {}", db_file);

        let is_in_memory = db_file == ":memory:"
            || db_file.starts_with("file::memory:")
            || db_file.contains("mode=memory");
        let use_wal = !is_in_memory;

        let manager = SqliteConnectionManager::file(db_file).with_init(move |conn| {
            // synchronous = FULL: a committed catalog write survives power loss
            let mut pragmas = String::from(
                "PRAGMA busy_timeout = 5000;
                 PRAGMA synchronous = FULL;
                 PRAGMA foreign_keys = ON;",
            );

            if use_wal {
                pragmas.push_str(" PRAGMA journal_mode = WAL;");
            }

            conn.execute_batch(&pragmas)
        });

        // Pool size: num_physical_cpus + 7 for good mix of reads/writes
        let pool_size = num_cpus::get_physical() + 7;
        let pool = r2d2::Pool::builder()
            .max_size(pool_size as u32)
            .build(manager)
            .map_err(|e| BackupError::DatabaseConnection {
                path: db_file.to_string(),
                cause: e.to_string(),
            })?;

        debug!("Catalog pool created with {} connections", pool_size);

        let catalog = Catalog {
            pool: Arc::new(pool),
            location: db_file.to_string(),
        };
        catalog.setup_database()?;
        Ok(catalog)
    }

    /// Private in-memory catalog, shared by all connections of its pool.
    pub fn open_in_memory() -> Result<Catalog> {
        Catalog::open(&format!(
            "file:catalog-{}?mode=memory&cache=shared",
            Uuid::new_v4()
        ))
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn get_connection(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| BackupError::DatabaseConnection {
            path: self.location.clone(),
            cause: format!("Failed to get catalog connection from pool: {}", e),
        })
    }

    fn setup_database(&self) -> Result<()> {
        info!("Initializing catalog schema");
        let setup_queries = "BEGIN;

    CREATE TABLE IF NOT EXISTS backup_history(
        id            TEXT    not null
            constraint backup_history_pk
                primary key,
        timestamp     integer not null,
        backup_type   TEXT    not null,
        file_path     TEXT    not null,
        file_size     integer not null default 0,
        checksum      TEXT    not null default '',
        status        TEXT    not null,
        duration      integer not null default 0,
        metadata      TEXT    not null default '{}',
        constraint backup_history_type_check
            check (backup_type IN ('manual', 'scheduled')),
        constraint backup_history_status_check
            check (status IN ('completed', 'failed')));

    CREATE INDEX IF NOT EXISTS backup_history_timestamp_index
            on backup_history (timestamp DESC);

    CREATE INDEX IF NOT EXISTS backup_history_status_timestamp_index
            on backup_history (status, timestamp);

    CREATE TABLE IF NOT EXISTS backup_verification(
        id                  integer not null
            constraint backup_verification_pk
                primary key autoincrement,
        backup_id           TEXT    not null
            constraint backup_verification_backup_history_id_fk
                references backup_history (id),
        verification_date   integer not null,
        verification_status TEXT    not null,
        integrity_check     integer not null,
        restore_test        integer not null default 0,
        error_message       TEXT,
        constraint backup_verification_status_check
            check (verification_status IN ('success', 'failed')));

    CREATE INDEX IF NOT EXISTS backup_verification_backup_id_index
            on backup_verification (backup_id);

    CREATE TABLE IF NOT EXISTS backup_schedule(
        id                 integer not null
            constraint backup_schedule_pk
                primary key autoincrement,
        schedule_name      TEXT    not null,
        backup_type        TEXT    not null,
        trigger_expression TEXT    not null,
        enabled            integer not null default 1,
        last_run           integer,
        next_run           integer,
        retention_days     integer not null default 30,
        created_at         integer not null,
        constraint backup_schedule_name_key
            unique (schedule_name),
        constraint backup_schedule_retention_check
            check (retention_days >= 0));

    COMMIT;";

        let conn = self.get_connection()?;
        conn.execute_batch(setup_queries)
            .map_err(|cause| BackupError::DatabaseQuery {
                operation: "create tables".to_string(),
                cause,
            })?;
        debug!("Catalog schema initialized successfully");
        Ok(())
    }

    // ============================================================================
    // backup_history
    // ============================================================================

    /// Insert a finalized backup record. Returns once the row is committed.
    pub fn record(&self, record: &BackupRecord) -> Result<()> {
        let conn = self.get_connection()?;
        insert_record(&conn, record)?;
        debug!("Inserted backup record: {} ({})", record.id, record.status);
        Ok(())
    }

    /// Insert a completed record and its first verification in one
    /// transaction. Either both rows are committed or neither is.
    pub fn record_completed(
        &self,
        record: &BackupRecord,
        verification: &VerificationRecord,
    ) -> Result<()> {
        let mut conn = self.get_connection()?;
        let tx_err = |cause: rusqlite::Error| BackupError::CatalogWrite {
            table: "backup_history".to_string(),
            id: record.id.clone(),
            cause,
        };

        let tx = conn.transaction().map_err(tx_err)?;
        insert_record(&tx, record)?;
        insert_verification(&tx, verification)?;
        tx.commit().map_err(tx_err)?;

        debug!(
            "Inserted backup record {} with verification integrity_ok={}",
            record.id, verification.integrity_ok
        );
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<BackupRecord>> {
        let conn = self.get_connection()?;
        conn.query_row(
            &format!("SELECT {} FROM backup_history WHERE id = ?1", BACKUP_COLUMNS),
            [id],
            backup_from_row,
        )
        .optional()
        .map_err(|cause| BackupError::DatabaseQuery {
            operation: format!("get backup {}", id),
            cause,
        })
    }

    /// List backups newest first
    pub fn list(&self, filter: &BackupFilter) -> Result<Vec<BackupRecord>> {
        let conn = self.get_connection()?;

        let mut query = format!("SELECT {} FROM backup_history WHERE 1=1", BACKUP_COLUMNS);
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(backup_type) = filter.backup_type {
            query.push_str(" AND backup_type = ?");
            params.push(Box::new(backup_type.as_str()));
        }

        if let Some(status) = filter.status {
            query.push_str(" AND status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(since) = filter.since {
            query.push_str(" AND timestamp >= ?");
            params.push(Box::new(since.timestamp()));
        }

        // rowid breaks ties between backups taken within the same second
        query.push_str(" ORDER BY timestamp DESC, rowid DESC");

        if let Some(limit) = filter.limit {
            query.push_str(" LIMIT ?");
            params.push(Box::new(limit as i64));
        }

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        query_backups(&conn, &query, param_refs.as_slice(), "list backups")
    }

    /// Completed backups strictly older than `cutoff`, oldest first
    pub fn expired_backups(&self, cutoff: DateTime<Utc>) -> Result<Vec<BackupRecord>> {
        self.backups_before(BackupStatus::Completed, cutoff)
    }

    /// Failed attempts strictly older than `cutoff`, oldest first
    pub fn failed_backups_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<BackupRecord>> {
        self.backups_before(BackupStatus::Failed, cutoff)
    }

    fn backups_before(&self, status: BackupStatus, cutoff: DateTime<Utc>) -> Result<Vec<BackupRecord>> {
        let conn = self.get_connection()?;
        let query = format!(
            "SELECT {} FROM backup_history WHERE status = ?1 AND timestamp < ?2 ORDER BY timestamp ASC, rowid ASC",
            BACKUP_COLUMNS
        );
        query_backups(
            &conn,
            &query,
            &[&status.as_str() as &dyn rusqlite::ToSql, &cutoff.timestamp()],
            "select backups before cutoff",
        )
    }

    /// Delete a backup and its verification rows, verification rows first.
    /// Returns false if no backup with that id existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = self.get_connection()?;
        let write_err = |table: &str| {
            let table = table.to_string();
            move |cause: rusqlite::Error| BackupError::CatalogWrite {
                table,
                id: id.to_string(),
                cause,
            }
        };

        let tx = conn.transaction().map_err(write_err("backup_history"))?;
        let verifications = tx
            .execute("DELETE FROM backup_verification WHERE backup_id = ?1", [id])
            .map_err(write_err("backup_verification"))?;
        let deleted = tx
            .execute("DELETE FROM backup_history WHERE id = ?1", [id])
            .map_err(write_err("backup_history"))?;
        tx.commit().map_err(write_err("backup_history"))?;

        debug!(
            "Deleted backup {} ({} verification rows)",
            id, verifications
        );
        Ok(deleted > 0)
    }

    /// Every artifact path referenced by the catalog
    pub fn artifact_paths(&self) -> Result<HashSet<String>> {
        let conn = self.get_connection()?;
        let read_err = |cause: rusqlite::Error| BackupError::DatabaseQuery {
            operation: "list artifact paths".to_string(),
            cause,
        };
        let mut stmt = conn
            .prepare("SELECT file_path FROM backup_history WHERE file_path <> ''")
            .map_err(read_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(read_err)?;
        rows.collect::<rusqlite::Result<HashSet<String>>>()
            .map_err(read_err)
    }

    pub fn summary(&self) -> Result<CatalogSummary> {
        let conn = self.get_connection()?;
        let read_err = |operation: &str| {
            let operation = operation.to_string();
            move |cause: rusqlite::Error| BackupError::DatabaseQuery { operation, cause }
        };

        let (completed_count, failed_count, total_size): (i64, i64, i64) = conn
            .query_row(
                "SELECT
                     COALESCE(SUM(status = 'completed'), 0),
                     COALESCE(SUM(status = 'failed'), 0),
                     COALESCE(SUM(CASE WHEN status = 'completed' THEN file_size ELSE 0 END), 0)
                 FROM backup_history",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(read_err("summarize backups"))?;

        let (oldest, newest): (Option<i64>, Option<i64>) = conn
            .query_row(
                "SELECT MIN(timestamp), MAX(timestamp) FROM backup_history WHERE status = 'completed'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(read_err("completed backup range"))?;

        let mut stmt = conn
            .prepare(
                "SELECT backup_type, COUNT(*), COALESCE(SUM(file_size), 0)
                 FROM backup_history
                 WHERE status = 'completed'
                 GROUP BY backup_type
                 ORDER BY backup_type",
            )
            .map_err(read_err("per-type stats"))?;
        let type_stats = stmt
            .query_map([], |row| {
                Ok(BackupTypeStats {
                    backup_type: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                    total_size_bytes: row.get::<_, i64>(2)? as u64,
                })
            })
            .map_err(read_err("per-type stats"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(read_err("per-type stats"))?;

        Ok(CatalogSummary {
            completed_count: completed_count as u64,
            failed_count: failed_count as u64,
            total_size_bytes: total_size as u64,
            oldest_completed: oldest.map(|ts| from_epoch(ts).to_rfc3339()),
            newest_completed: newest.map(|ts| from_epoch(ts).to_rfc3339()),
            type_stats,
        })
    }

    // ============================================================================
    // backup_verification
    // ============================================================================

    pub fn record_verification(&self, verification: &VerificationRecord) -> Result<()> {
        let conn = self.get_connection()?;
        insert_verification(&conn, verification)?;
        debug!(
            "Recorded verification for {}: integrity_ok={}",
            verification.backup_id, verification.integrity_ok
        );
        Ok(())
    }

    /// Verification history of a backup, newest first
    pub fn verifications(&self, backup_id: &str) -> Result<Vec<VerificationRecord>> {
        let conn = self.get_connection()?;
        let read_err = |cause: rusqlite::Error| BackupError::DatabaseQuery {
            operation: format!("list verifications for {}", backup_id),
            cause,
        };

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM backup_verification WHERE backup_id = ?1 ORDER BY verification_date DESC, id DESC",
                VERIFICATION_COLUMNS
            ))
            .map_err(read_err)?;
        let rows = stmt
            .query_map([backup_id], verification_from_row)
            .map_err(read_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(read_err)
    }

    // ============================================================================
    // backup_schedule
    // ============================================================================

    /// Insert or update a schedule definition, keeping its run history.
    pub fn upsert_schedule(&self, schedule: &ScheduleRecord) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute(
            "INSERT INTO backup_schedule (schedule_name, backup_type, trigger_expression, enabled, last_run, next_run, retention_days, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (schedule_name) DO UPDATE SET
                 backup_type = excluded.backup_type,
                 trigger_expression = excluded.trigger_expression,
                 enabled = excluded.enabled,
                 retention_days = excluded.retention_days",
            (
                &schedule.name,
                schedule.backup_type.as_str(),
                &schedule.trigger_expression,
                schedule.enabled,
                schedule.last_run.map(|t| t.timestamp()),
                schedule.next_run.map(|t| t.timestamp()),
                schedule.retention_days,
                Utc::now().timestamp(),
            ),
        )
        .map_err(|cause| BackupError::CatalogWrite {
            table: "backup_schedule".to_string(),
            id: schedule.name.clone(),
            cause,
        })?;
        Ok(())
    }

    pub fn get_schedule(&self, name: &str) -> Result<Option<ScheduleRecord>> {
        let conn = self.get_connection()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM backup_schedule WHERE schedule_name = ?1",
                SCHEDULE_COLUMNS
            ),
            [name],
            schedule_from_row,
        )
        .optional()
        .map_err(|cause| BackupError::DatabaseQuery {
            operation: format!("get schedule {}", name),
            cause,
        })
    }

    pub fn list_schedules(&self) -> Result<Vec<ScheduleRecord>> {
        let conn = self.get_connection()?;
        let read_err = |cause: rusqlite::Error| BackupError::DatabaseQuery {
            operation: "list schedules".to_string(),
            cause,
        };
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM backup_schedule ORDER BY schedule_name",
                SCHEDULE_COLUMNS
            ))
            .map_err(read_err)?;
        let rows = stmt.query_map([], schedule_from_row).map_err(read_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(read_err)
    }

    pub fn update_schedule_runs(
        &self,
        name: &str,
        last_run: Option<DateTime<Utc>>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute(
            "UPDATE backup_schedule
             SET last_run = COALESCE(?1, last_run), next_run = ?2
             WHERE schedule_name = ?3",
            (
                last_run.map(|t| t.timestamp()),
                next_run.map(|t| t.timestamp()),
                name,
            ),
        )
        .map_err(|cause| BackupError::CatalogWrite {
            table: "backup_schedule".to_string(),
            id: name.to_string(),
            cause,
        })?;
        Ok(())
    }
}

fn query_backups(
    conn: &rusqlite::Connection,
    query: &str,
    params: &[&dyn rusqlite::ToSql],
    operation: &str,
) -> Result<Vec<BackupRecord>> {
    let read_err = |cause: rusqlite::Error| BackupError::DatabaseQuery {
        operation: operation.to_string(),
        cause,
    };

    let mut stmt = conn.prepare(query).map_err(read_err)?;
    let rows = stmt.query_map(params, backup_from_row).map_err(read_err)?;
    rows.collect::<rusqlite::Result<Vec<BackupRecord>>>()
        .map_err(read_err)
}

fn from_epoch(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn parse_column<T: std::str::FromStr<Err = String>>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    text.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn backup_from_row(row: &Row) -> rusqlite::Result<BackupRecord> {
    let metadata_text: String = row.get(8)?;
    let metadata: BackupMetadata = serde_json::from_str(&metadata_text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;

    Ok(BackupRecord {
        id: row.get(0)?,
        timestamp: from_epoch(row.get(1)?),
        backup_type: parse_column(row, 2)?,
        file_path: row.get(3)?,
        file_size_bytes: row.get::<_, i64>(4)? as u64,
        checksum: row.get(5)?,
        status: parse_column(row, 6)?,
        duration_ms: row.get::<_, i64>(7)? as u64,
        metadata,
    })
}

fn verification_from_row(row: &Row) -> rusqlite::Result<VerificationRecord> {
    Ok(VerificationRecord {
        backup_id: row.get(0)?,
        timestamp: from_epoch(row.get(1)?),
        verification_status: parse_column(row, 2)?,
        integrity_ok: row.get(3)?,
        restore_tested: row.get(4)?,
        error_message: row.get(5)?,
    })
}

fn schedule_from_row(row: &Row) -> rusqlite::Result<ScheduleRecord> {
    Ok(ScheduleRecord {
        name: row.get(0)?,
        backup_type: parse_column(row, 1)?,
        trigger_expression: row.get(2)?,
        enabled: row.get(3)?,
        last_run: row.get::<_, Option<i64>>(4)?.map(from_epoch),
        next_run: row.get::<_, Option<i64>>(5)?.map(from_epoch),
        retention_days: row.get(6)?,
    })
}

fn insert_record(conn: &Connection, record: &BackupRecord) -> Result<()> {
    let write_err = |cause: rusqlite::Error| BackupError::CatalogWrite {
        table: "backup_history".to_string(),
        id: record.id.clone(),
        cause,
    };

    let metadata = serde_json::to_string(&record.metadata)
        .map_err(|e| write_err(rusqlite::Error::ToSqlConversionFailure(Box::new(e))))?;

    conn.execute(
        "INSERT INTO backup_history (id, timestamp, backup_type, file_path, file_size, checksum, status, duration, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        (
            &record.id,
            record.timestamp.timestamp(),
            record.backup_type.as_str(),
            &record.file_path,
            record.file_size_bytes as i64,
            &record.checksum,
            record.status.as_str(),
            record.duration_ms as i64,
            metadata,
        ),
    )
    .map_err(write_err)?;
    Ok(())
}

fn insert_verification(conn: &Connection, verification: &VerificationRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO backup_verification (backup_id, verification_date, verification_status, integrity_check, restore_test, error_message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        (
            &verification.backup_id,
            verification.timestamp.timestamp(),
            verification.verification_status.as_str(),
            verification.integrity_ok,
            verification.restore_tested,
            &verification.error_message,
        ),
    )
    .map_err(|cause| BackupError::CatalogWrite {
        table: "backup_verification".to_string(),
        id: verification.backup_id.clone(),
        cause,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::backup_record::BackupType;
    use crate::models::schedule_record::BackupStrategy;
    use chrono::{Duration, TimeZone};

    fn test_record(id: &str, timestamp: DateTime<Utc>, status: BackupStatus) -> BackupRecord {
        BackupRecord {
            id: id.to_string(),
            timestamp,
            backup_type: BackupType::Manual,
            file_path: format!("/backups/{}.dump.gz", id),
            file_size_bytes: 1024,
            checksum: "abc123".to_string(),
            status,
            duration_ms: 15,
            metadata: BackupMetadata {
                original_size: 4096,
                compression_ratio: 0.25,
                ..BackupMetadata::default()
            },
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_setup_database_creates_schema() {
        let catalog = Catalog::open_in_memory().unwrap();

        let conn = catalog.get_connection().unwrap();
        for table in ["backup_history", "backup_verification", "backup_schedule"] {
            let result = conn.execute(&format!("SELECT 1 FROM {} WHERE 1=0", table), []);
            assert!(result.is_ok(), "missing table {}", table);
        }
    }

    #[test]
    fn test_record_and_get_round_trip() {
        let catalog = Catalog::open_in_memory().unwrap();
        let record = test_record("b1", at(0), BackupStatus::Completed);

        catalog.record(&record).unwrap();

        let retrieved = catalog.get("b1").unwrap().unwrap();
        assert_eq!(retrieved, record);
    }

    #[test]
    fn test_get_returns_none_for_missing() {
        let catalog = Catalog::open_in_memory().unwrap();
        assert!(catalog.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_id_is_a_catalog_write_error() {
        let catalog = Catalog::open_in_memory().unwrap();
        let record = test_record("dup", at(0), BackupStatus::Completed);
        catalog.record(&record).unwrap();

        let err = catalog.record(&record).unwrap_err();
        assert_eq!(err.kind(), "catalog_write");
    }

    #[test]
    fn test_list_sorted_newest_first_with_filters() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.record(&test_record("old", at(0), BackupStatus::Completed)).unwrap();
        catalog.record(&test_record("failed", at(10), BackupStatus::Failed)).unwrap();
        let mut scheduled = test_record("new", at(20), BackupStatus::Completed);
        scheduled.backup_type = BackupType::Scheduled;
        catalog.record(&scheduled).unwrap();

        let all = catalog.list(&BackupFilter::default()).unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "failed", "old"]);

        let completed = catalog.list(&BackupFilter::completed()).unwrap();
        assert_eq!(completed.len(), 2);

        let scheduled_only = catalog
            .list(&BackupFilter {
                backup_type: Some(BackupType::Scheduled),
                ..BackupFilter::default()
            })
            .unwrap();
        assert_eq!(scheduled_only.len(), 1);
        assert_eq!(scheduled_only[0].id, "new");

        let recent = catalog
            .list(&BackupFilter {
                since: Some(at(10)),
                limit: Some(1),
                ..BackupFilter::default()
            })
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "new");
    }

    #[test]
    fn test_same_second_backups_list_in_insert_order_reversed() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.record(&test_record("first", at(5), BackupStatus::Completed)).unwrap();
        catalog.record(&test_record("second", at(5), BackupStatus::Completed)).unwrap();

        let all = catalog.list(&BackupFilter::default()).unwrap();
        assert_eq!(all[0].id, "second");
        assert_eq!(all[1].id, "first");
    }

    #[test]
    fn test_delete_cascades_verifications() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.record(&test_record("b1", at(0), BackupStatus::Completed)).unwrap();
        catalog.record_verification(&VerificationRecord::passed("b1", false)).unwrap();
        catalog
            .record_verification(&VerificationRecord::failed("b1", false, "bad".to_string()))
            .unwrap();
        assert_eq!(catalog.verifications("b1").unwrap().len(), 2);

        assert!(catalog.delete("b1").unwrap());

        assert!(catalog.get("b1").unwrap().is_none());
        assert!(catalog.verifications("b1").unwrap().is_empty());
        assert!(!catalog.delete("b1").unwrap());
    }

    #[test]
    fn test_record_completed_is_all_or_nothing() {
        let catalog = Catalog::open_in_memory().unwrap();
        let record = test_record("b1", at(0), BackupStatus::Completed);

        let err = catalog
            .record_completed(&record, &VerificationRecord::passed("other", false))
            .unwrap_err();
        assert_eq!(err.kind(), "catalog_write");
        assert!(catalog.get("b1").unwrap().is_none());

        catalog
            .record_completed(&record, &VerificationRecord::passed("b1", false))
            .unwrap();
        assert_eq!(catalog.get("b1").unwrap(), Some(record));
        assert_eq!(catalog.verifications("b1").unwrap().len(), 1);
    }

    #[test]
    fn test_verification_requires_existing_backup() {
        let catalog = Catalog::open_in_memory().unwrap();
        let err = catalog
            .record_verification(&VerificationRecord::passed("ghost", false))
            .unwrap_err();
        assert_eq!(err.kind(), "catalog_write");
    }

    #[test]
    fn test_verifications_newest_first() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.record(&test_record("b1", at(0), BackupStatus::Completed)).unwrap();

        let mut first = VerificationRecord::passed("b1", false);
        first.timestamp = at(1);
        let mut second = VerificationRecord::failed("b1", true, "corrupt".to_string());
        second.timestamp = at(2);
        catalog.record_verification(&first).unwrap();
        catalog.record_verification(&second).unwrap();

        let history = catalog.verifications("b1").unwrap();
        assert!(!history[0].integrity_ok);
        assert!(history[0].restore_tested);
        assert_eq!(history[0].error_message.as_deref(), Some("corrupt"));
        assert!(history[1].integrity_ok);
    }

    #[test]
    fn test_expired_backups_uses_strict_cutoff() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.record(&test_record("older", at(0), BackupStatus::Completed)).unwrap();
        catalog.record(&test_record("boundary", at(10), BackupStatus::Completed)).unwrap();
        catalog.record(&test_record("failed", at(0), BackupStatus::Failed)).unwrap();

        let expired = catalog.expired_backups(at(10)).unwrap();
        let ids: Vec<&str> = expired.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["older"]);

        let failed = catalog.failed_backups_before(at(10)).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "failed");
    }

    #[test]
    fn test_summary_counts_by_status() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.record(&test_record("a", at(0), BackupStatus::Completed)).unwrap();
        catalog.record(&test_record("b", at(1), BackupStatus::Completed)).unwrap();
        catalog.record(&test_record("c", at(2), BackupStatus::Failed)).unwrap();

        let summary = catalog.summary().unwrap();
        assert_eq!(summary.completed_count, 2);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.total_size_bytes, 2048);
        assert_eq!(summary.type_stats.len(), 1);
        assert_eq!(summary.newest_completed, Some(at(1).to_rfc3339()));
    }

    #[test]
    fn test_schedule_upsert_keeps_run_history() {
        let catalog = Catalog::open_in_memory().unwrap();
        let schedule = ScheduleRecord {
            name: "nightly".to_string(),
            backup_type: BackupStrategy::Full,
            trigger_expression: "1d".to_string(),
            enabled: true,
            last_run: None,
            next_run: None,
            retention_days: 30,
        };
        catalog.upsert_schedule(&schedule).unwrap();
        catalog
            .update_schedule_runs("nightly", Some(at(0)), Some(at(0) + Duration::days(1)))
            .unwrap();

        let updated = ScheduleRecord {
            enabled: false,
            retention_days: 7,
            ..schedule
        };
        catalog.upsert_schedule(&updated).unwrap();

        let stored = catalog.get_schedule("nightly").unwrap().unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.retention_days, 7);
        assert_eq!(stored.last_run, Some(at(0)));
        assert_eq!(stored.next_run, Some(at(0) + Duration::days(1)));
        assert_eq!(catalog.list_schedules().unwrap().len(), 1);
    }

    #[test]
    fn test_artifact_paths_skip_empty() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.record(&test_record("a", at(0), BackupStatus::Completed)).unwrap();
        let mut failed = test_record("b", at(1), BackupStatus::Failed);
        failed.file_path = String::new();
        catalog.record(&failed).unwrap();

        let paths = catalog.artifact_paths().unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths.contains("/backups/a.dump.gz"));
    }

    #[test]
    fn test_file_catalog_persists_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("catalog.db");
        let path_str = path.to_str().unwrap();

        {
            let catalog = Catalog::open(path_str).unwrap();
            catalog.record(&test_record("kept", at(0), BackupStatus::Completed)).unwrap();
        }

        let reopened = Catalog::open(path_str).unwrap();
        assert!(reopened.get("kept").unwrap().is_some());
    }
}
