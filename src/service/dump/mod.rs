//! Serializes a database into a replayable stream and replays it back.
//!
//! Two formats share one extractor: the typed [`binary`] stream and plain
//! [`sql`] text. Replay detects which one it was given.

pub mod binary;
pub mod sql;

use crate::models::dump_format::DumpFormat;
use crate::models::error::{BackupError, Result};
use crate::service::validator::open_read_only;
use log::{debug, warn};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::path::Path;

/// Receives a database in extraction order: statements, then per table a
/// header followed by its rows.
pub trait DumpWriter {
    fn statement(&mut self, sql: &str);
    fn begin_table(&mut self, name: &str, columns: &[String]);
    fn row(&mut self, values: &[ValueRef<'_>]);
    fn finish(self) -> Vec<u8>;
}

/// Dump the database at `path`. The whole read happens in one transaction so
/// the result is a consistent snapshot.
pub fn dump_database(path: &Path, format: DumpFormat) -> Result<Vec<u8>> {
    let mut conn = open_read_only(path).map_err(dump_err("open source database"))?;
    let tx = conn.transaction().map_err(dump_err("begin read transaction"))?;

    let bytes = match format {
        DumpFormat::Binary => {
            let mut writer = binary::BinaryWriter::new();
            extract(&tx, &mut writer)?;
            writer.finish()
        }
        DumpFormat::Sql => {
            let mut writer = sql::SqlWriter::new();
            extract(&tx, &mut writer)?;
            writer.finish()
        }
    };

    debug!(
        "Dumped {} as {} ({} bytes)",
        path.display(),
        format,
        bytes.len()
    );
    Ok(bytes)
}

/// Which format a dump stream was written in
pub fn detect_format(bytes: &[u8]) -> DumpFormat {
    if binary::has_header(bytes) {
        DumpFormat::Binary
    } else {
        DumpFormat::Sql
    }
}

/// Replay a dump of either format into `conn`. The caller owns the
/// surrounding transaction.
pub fn replay(bytes: &[u8], conn: &Connection) -> Result<()> {
    match detect_format(bytes) {
        DumpFormat::Binary => binary::replay(bytes, conn),
        DumpFormat::Sql => {
            let text = std::str::from_utf8(bytes).map_err(|e| {
                BackupError::DumpFormat(format!("not a binary dump and not UTF-8 SQL: {}", e))
            })?;
            sql::replay(text, conn)
        }
    }
}

/// Replay writes rows in table creation order, which need not match
/// foreign key order, and the source may hold rows written with
/// enforcement off. Has no effect inside a transaction.
pub fn disable_foreign_keys(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = OFF")
}

/// Walk schema and data in a stable order: tables in creation order, each
/// followed by its rows, then sequences, then indexes, views and triggers.
pub fn extract<W: DumpWriter>(conn: &Connection, writer: &mut W) -> Result<()> {
    let user_version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(dump_err("read user_version"))?;
    if user_version != 0 {
        writer.statement(&format!("PRAGMA user_version = {}", user_version));
    }

    let tables = schema_entries(
        conn,
        "SELECT name, sql FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND sql IS NOT NULL
         ORDER BY rowid",
    )?;

    for (name, create_sql) in &tables {
        if create_sql.trim_start().to_uppercase().starts_with("CREATE VIRTUAL TABLE") {
            warn!("Skipping virtual table {} - not supported by dumps", name);
            continue;
        }
        writer.statement(create_sql);
        dump_rows(conn, name, writer)?;
    }

    let has_sequence: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence')",
            [],
            |row| row.get(0),
        )
        .map_err(dump_err("check sqlite_sequence"))?;
    if has_sequence {
        // Replayed inserts repopulate the table; reset it to the source counters.
        writer.statement("DELETE FROM sqlite_sequence");
        dump_rows(conn, "sqlite_sequence", writer)?;
    }

    let others = schema_entries(
        conn,
        "SELECT name, sql FROM sqlite_master
         WHERE type IN ('index', 'view', 'trigger') AND sql IS NOT NULL
         ORDER BY rowid",
    )?;
    for (_, create_sql) in &others {
        writer.statement(create_sql);
    }

    Ok(())
}

fn schema_entries(conn: &Connection, query: &str) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(query).map_err(dump_err("list schema"))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(dump_err("list schema"))?;
    rows.collect::<rusqlite::Result<Vec<(String, String)>>>()
        .map_err(dump_err("list schema"))
}

/// Names of the columns that accept inserts (generated columns excluded)
fn insertable_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let stage = format!("read columns of {}", table);
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", quote_identifier(table)))
        .map_err(dump_err(&stage))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(dump_err(&stage))?;
    rows.collect::<rusqlite::Result<Vec<String>>>()
        .map_err(dump_err(&stage))
}

fn dump_rows<W: DumpWriter>(conn: &Connection, table: &str, writer: &mut W) -> Result<()> {
    let columns = insertable_columns(conn, table)?;
    if columns.is_empty() {
        return Ok(());
    }
    writer.begin_table(table, &columns);

    let stage = format!("rows of {}", table);
    let column_list = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM {}",
            column_list,
            quote_identifier(table)
        ))
        .map_err(dump_err(&stage))?;

    let mut rows = stmt.query([]).map_err(dump_err(&stage))?;
    let mut count = 0u64;
    while let Some(row) = rows.next().map_err(dump_err(&stage))? {
        let values = (0..columns.len())
            .map(|i| row.get_ref(i))
            .collect::<rusqlite::Result<Vec<ValueRef<'_>>>>()
            .map_err(dump_err(&stage))?;
        writer.row(&values);
        count += 1;
    }

    debug!("Dumped {} rows from {}", count, table);
    Ok(())
}

pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn dump_err(stage: &str) -> impl Fn(rusqlite::Error) -> BackupError + '_ {
    move |cause| BackupError::Dump {
        stage: stage.to_string(),
        cause,
    }
}
