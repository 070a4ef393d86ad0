//! Plain SQL text dump. Readable and portable, but text values containing
//! NUL bytes do not survive it; use the binary format for those.

use super::{quote_identifier, DumpWriter};
use crate::models::error::{BackupError, Result};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::fmt::Write;

pub struct SqlWriter {
    out: String,
    insert_prefix: String,
}

impl SqlWriter {
    pub fn new() -> Self {
        SqlWriter {
            out: String::from("-- RustyDbBackUp SQL dump\n"),
            insert_prefix: String::new(),
        }
    }
}

impl Default for SqlWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DumpWriter for SqlWriter {
    fn statement(&mut self, sql: &str) {
        self.out.push_str(sql.trim_end_matches(';'));
        self.out.push_str(";\n");
    }

    fn begin_table(&mut self, name: &str, columns: &[String]) {
        let columns = columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        self.insert_prefix = format!("INSERT INTO {} ({}) VALUES (", quote_identifier(name), columns);
    }

    fn row(&mut self, values: &[ValueRef<'_>]) {
        self.out.push_str(&self.insert_prefix);
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            push_literal(&mut self.out, value);
        }
        self.out.push_str(");\n");
    }

    fn finish(self) -> Vec<u8> {
        self.out.into_bytes()
    }
}

fn push_literal(out: &mut String, value: &ValueRef<'_>) {
    match value {
        ValueRef::Null => out.push_str("NULL"),
        ValueRef::Integer(i) => {
            let _ = write!(out, "{}", i);
        }
        ValueRef::Real(f) => out.push_str(&real_literal(*f)),
        ValueRef::Text(t) => {
            out.push('\'');
            out.push_str(&String::from_utf8_lossy(t).replace('\'', "''"));
            out.push('\'');
        }
        ValueRef::Blob(b) => {
            out.push_str("X'");
            out.push_str(&hex::encode(b));
            out.push('\'');
        }
    }
}

/// Float literal that SQLite reads back as REAL
fn real_literal(f: f64) -> String {
    if f.is_nan() {
        "NULL".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "9e999" } else { "-9e999" }.to_string()
    } else {
        // Debug keeps a fractional part or exponent, so 3.0 stays "3.0"
        format!("{:?}", f)
    }
}

pub fn replay(text: &str, conn: &Connection) -> Result<()> {
    conn.execute_batch(text)
        .map_err(|e| BackupError::Restore(format!("SQL replay failed: {}", e)))
}
