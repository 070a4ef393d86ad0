//! Compressed, checksummed backups of a single SQLite database, with a
//! durable catalog, retention, verified restores and a periodic scheduler.

pub mod engine;
pub mod models;
pub mod repo;
pub mod service;
pub mod utils;

pub use engine::BackupEngine;
