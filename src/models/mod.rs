pub mod api;
pub mod backup_record;
pub mod config;
pub mod config_validator;
pub mod dump_format;
pub mod error;
pub mod events;
pub mod schedule_record;
pub mod storage;
pub mod trigger;
pub mod verification_record;
