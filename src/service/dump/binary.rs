//! Length-prefixed typed dump stream.
//!
//! Layout: `RDBDUMP` magic, one version byte, then frames until an end tag.
//! Every length and integer is little-endian. Values keep their SQLite
//! storage class, so blobs and text with embedded NULs survive unchanged.

use super::{quote_identifier, DumpWriter};
use crate::models::error::{BackupError, Result};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection};

pub const MAGIC: &[u8; 7] = b"RDBDUMP";
pub const VERSION: u8 = 1;

const TAG_STATEMENT: u8 = 0x01;
const TAG_TABLE: u8 = 0x02;
const TAG_ROW: u8 = 0x03;
const TAG_END: u8 = 0xFF;

const VALUE_NULL: u8 = 0;
const VALUE_INTEGER: u8 = 1;
const VALUE_REAL: u8 = 2;
const VALUE_TEXT: u8 = 3;
const VALUE_BLOB: u8 = 4;

pub fn has_header(bytes: &[u8]) -> bool {
    bytes.starts_with(MAGIC)
}

pub struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(64 * 1024);
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        BinaryWriter { buf }
    }

    fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        self.buf.extend_from_slice(bytes);
    }
}

impl Default for BinaryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DumpWriter for BinaryWriter {
    fn statement(&mut self, sql: &str) {
        self.buf.push(TAG_STATEMENT);
        self.put_bytes(sql.as_bytes());
    }

    fn begin_table(&mut self, name: &str, columns: &[String]) {
        self.buf.push(TAG_TABLE);
        self.put_bytes(name.as_bytes());
        self.put_u32(columns.len() as u32);
        for column in columns {
            self.put_bytes(column.as_bytes());
        }
    }

    fn row(&mut self, values: &[ValueRef<'_>]) {
        self.buf.push(TAG_ROW);
        self.put_u32(values.len() as u32);
        for value in values {
            match value {
                ValueRef::Null => self.buf.push(VALUE_NULL),
                ValueRef::Integer(i) => {
                    self.buf.push(VALUE_INTEGER);
                    self.buf.extend_from_slice(&i.to_le_bytes());
                }
                ValueRef::Real(f) => {
                    self.buf.push(VALUE_REAL);
                    self.buf.extend_from_slice(&f.to_bits().to_le_bytes());
                }
                ValueRef::Text(t) => {
                    self.buf.push(VALUE_TEXT);
                    self.put_bytes(t);
                }
                ValueRef::Blob(b) => {
                    self.buf.push(VALUE_BLOB);
                    self.put_bytes(b);
                }
            }
        }
    }

    fn finish(mut self) -> Vec<u8> {
        self.buf.push(TAG_END);
        self.buf
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                BackupError::DumpFormat(format!("stream truncated at offset {}", self.pos))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = usize::try_from(self.u64()?)
            .map_err(|_| BackupError::DumpFormat("length exceeds address space".to_string()))?;
        self.take(len)
    }

    fn string(&mut self) -> Result<String> {
        let raw = self.bytes()?;
        String::from_utf8(raw.to_vec()).map_err(|e| {
            BackupError::DumpFormat(format!("invalid UTF-8 at offset {}: {}", self.pos, e))
        })
    }

    fn value(&mut self) -> Result<Value> {
        Ok(match self.u8()? {
            VALUE_NULL => Value::Null,
            VALUE_INTEGER => Value::Integer(self.u64()? as i64),
            VALUE_REAL => Value::Real(f64::from_bits(self.u64()?)),
            VALUE_TEXT => Value::Text(self.string()?),
            VALUE_BLOB => Value::Blob(self.bytes()?.to_vec()),
            other => {
                return Err(BackupError::DumpFormat(format!(
                    "unknown value tag {:#04x}",
                    other
                )))
            }
        })
    }
}

/// Pending insert for the table whose rows are being replayed
struct TableInsert {
    sql: String,
    columns: usize,
}

pub fn replay(bytes: &[u8], conn: &Connection) -> Result<()> {
    let mut reader = Reader { bytes, pos: 0 };
    if reader.take(MAGIC.len())? != MAGIC {
        return Err(BackupError::DumpFormat("missing dump header".to_string()));
    }
    let version = reader.u8()?;
    if version != VERSION {
        return Err(BackupError::DumpFormat(format!(
            "unsupported dump version {}",
            version
        )));
    }

    let mut current: Option<TableInsert> = None;
    loop {
        match reader.u8()? {
            TAG_STATEMENT => {
                let sql = reader.string()?;
                conn.execute_batch(&sql).map_err(|e| {
                    BackupError::Restore(format!("statement failed: {}: {}", e, sql))
                })?;
            }
            TAG_TABLE => {
                let name = reader.string()?;
                let count = reader.u32()? as usize;
                let mut columns = Vec::with_capacity(count);
                for _ in 0..count {
                    columns.push(quote_identifier(&reader.string()?));
                }
                let placeholders = (1..=count)
                    .map(|i| format!("?{}", i))
                    .collect::<Vec<_>>()
                    .join(", ");
                current = Some(TableInsert {
                    sql: format!(
                        "INSERT INTO {} ({}) VALUES ({})",
                        quote_identifier(&name),
                        columns.join(", "),
                        placeholders
                    ),
                    columns: count,
                });
            }
            TAG_ROW => {
                let table = current.as_ref().ok_or_else(|| {
                    BackupError::DumpFormat("row frame before any table frame".to_string())
                })?;
                let count = reader.u32()? as usize;
                if count != table.columns {
                    return Err(BackupError::DumpFormat(format!(
                        "row has {} values, table has {} columns",
                        count, table.columns
                    )));
                }
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(reader.value()?);
                }
                let mut stmt = conn
                    .prepare_cached(&table.sql)
                    .map_err(|e| BackupError::Restore(format!("prepare insert failed: {}", e)))?;
                stmt.execute(params_from_iter(values.iter()))
                    .map_err(|e| BackupError::Restore(format!("row insert failed: {}", e)))?;
            }
            TAG_END => {
                if reader.pos != bytes.len() {
                    return Err(BackupError::DumpFormat(format!(
                        "{} trailing bytes after end of dump",
                        bytes.len() - reader.pos
                    )));
                }
                return Ok(());
            }
            other => {
                return Err(BackupError::DumpFormat(format!(
                    "unknown frame tag {:#04x}",
                    other
                )))
            }
        }
    }
}
