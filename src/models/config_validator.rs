use crate::models::config::{Config, ScheduleConfig};
use crate::models::error::{BackupError, Result};
use crate::models::schedule_record::BackupStrategy;
use crate::models::trigger::Trigger;
use log::{info, warn};
use std::fs;
use std::path::Path;

/// Validates the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    info!("Validating configuration...");

    validate_numeric_values(config)?;

    validate_source_database(&config.source_database)?;

    validate_backup_directory(&config.backup_directory)?;

    validate_catalog_path(config)?;

    if let Some(schedule) = &config.schedule {
        validate_schedule(schedule)?;
    }

    check_conflicting_flags(config)?;

    info!("Configuration validation passed");
    Ok(())
}

/// Validate numeric configuration values
fn validate_numeric_values(config: &Config) -> Result<()> {
    if config.compression_level > 9 {
        return Err(BackupError::ConfigInvalid(format!(
            "compression_level must be between 0 and 9, got {}",
            config.compression_level
        )));
    }

    if config.max_threads == 0 {
        return Err(BackupError::ConfigInvalid(
            "max_threads must be greater than 0".to_string(),
        ));
    }

    let cpu_count = num_cpus::get_physical();
    if config.max_threads > cpu_count * 2 {
        warn!(
            "max_threads ({}) is more than 2x the number of physical CPUs ({}). This may not improve performance.",
            config.max_threads, cpu_count
        );
    }

    Ok(())
}

/// The source is checked in depth before each backup; here only obvious
/// mistakes are rejected.
fn validate_source_database(source: &Path) -> Result<()> {
    if source.as_os_str().is_empty() {
        return Err(BackupError::ConfigInvalid(
            "source_database must not be empty".to_string(),
        ));
    }

    if source.exists() && !source.is_file() {
        return Err(BackupError::ConfigInvalid(format!(
            "source_database exists but is not a file: {}",
            source.display()
        )));
    }

    if !source.exists() {
        warn!(
            "Source database does not exist yet: {}. Backups will fail until it does.",
            source.display()
        );
    }

    Ok(())
}

/// Validate the backup directory, which is created on demand
fn validate_backup_directory(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Err(BackupError::ConfigInvalid(
            "backup_directory must not be empty".to_string(),
        ));
    }

    if dir.exists() {
        if !dir.is_dir() {
            return Err(BackupError::ConfigInvalid(format!(
                "Backup directory exists but is not a directory: {}",
                dir.display()
            )));
        }

        if let Err(e) = check_writable(dir) {
            return Err(BackupError::ConfigInvalid(format!(
                "Backup directory is not writable: {}\nError: {}",
                dir.display(),
                e
            )));
        }
        return Ok(());
    }

    let parent = existing_parent(dir).ok_or_else(|| {
        BackupError::ConfigInvalid(format!(
            "Backup directory has no existing parent: {}",
            dir.display()
        ))
    })?;

    if let Err(e) = check_writable(&parent) {
        return Err(BackupError::ConfigInvalid(format!(
            "Backup directory parent is not writable: {}\nError: {}",
            parent.display(),
            e
        )));
    }

    warn!(
        "Backup directory does not exist but will be created: {}",
        dir.display()
    );
    Ok(())
}

/// Validate catalog database file path
fn validate_catalog_path(config: &Config) -> Result<()> {
    let path = config.catalog_path();

    if path.exists() {
        if !path.is_file() {
            return Err(BackupError::ConfigInvalid(format!(
                "Catalog path exists but is not a file: {}",
                path.display()
            )));
        }

        if let Err(e) = fs::OpenOptions::new().read(true).write(true).open(&path) {
            return Err(BackupError::ConfigInvalid(format!(
                "Catalog file is not readable/writable: {}\nError: {}",
                path.display(),
                e
            )));
        }
        return Ok(());
    }

    // The catalog may live inside a backup directory that does not exist yet.
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() && !parent.starts_with(&config.backup_directory) {
            #[cfg(windows)]
            let suggestion = format!("mkdir \"{}\"", parent.display());
            #[cfg(not(windows))]
            let suggestion = format!("mkdir -p \"{}\"", parent.display());

            return Err(BackupError::ConfigInvalid(format!(
                "Catalog parent directory does not exist: {}\nSuggestion: Create the directory with: {}",
                path.display(),
                suggestion
            )));
        }
    }

    if path == config.source_database {
        return Err(BackupError::ConfigInvalid(
            "catalog_database must not be the source database".to_string(),
        ));
    }

    Ok(())
}

/// Validate schedule configuration
fn validate_schedule(schedule: &ScheduleConfig) -> Result<()> {
    if schedule.name.trim().is_empty() {
        return Err(BackupError::ConfigInvalid(
            "schedule name must not be empty".to_string(),
        ));
    }

    match Trigger::parse(&schedule.trigger) {
        Ok(_) => info!("Schedule validated: {}", schedule.trigger),
        Err(e) => {
            return Err(BackupError::ConfigInvalid(format!(
                "{}\nExamples: '6h' for every six hours, '0 0 2 * * *' for daily at 2am",
                e
            )));
        }
    }

    if let Some(cleanup) = &schedule.cleanup_interval {
        Trigger::parse(cleanup).map_err(|e| BackupError::ConfigInvalid(e.to_string()))?;
    }

    Ok(())
}

/// Check for questionable configuration combinations
fn check_conflicting_flags(config: &Config) -> Result<()> {
    if let Some(schedule) = &config.schedule {
        if schedule.backup_type == BackupStrategy::Incremental {
            warn!(
                "Schedule '{}' requests incremental backups; full backups will be taken instead",
                schedule.name
            );
        }
        if !schedule.enabled {
            info!(
                "Schedule '{}' is disabled - existing backups remain subject to retention",
                schedule.name
            );
        }
    }

    if config.verify_restore {
        info!("verify_restore is enabled - every backup will be test-restored, which doubles its cost");
    }

    if let Some(failed_days) = config.failed_retention_days {
        if failed_days > config.effective_retention_days() {
            warn!(
                "failed_retention_days ({}) is longer than retention_days ({}); failed attempts will outlive completed backups",
                failed_days,
                config.effective_retention_days()
            );
        }
    }

    Ok(())
}

fn existing_parent(path: &Path) -> Option<std::path::PathBuf> {
    let mut current = path.parent();
    while let Some(parent) = current {
        if parent.as_os_str().is_empty() {
            return Some(std::path::PathBuf::from("."));
        }
        if parent.exists() {
            return Some(parent.to_path_buf());
        }
        current = parent.parent();
    }
    None
}

/// Check if a directory is writable by attempting to create a temporary file
fn check_writable(path: &Path) -> std::io::Result<()> {
    let test_file = path.join(".rustydbbackup_write_test");

    fs::write(&test_file, b"test")?;

    fs::remove_file(&test_file)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_config(dir: &TempDir) -> Config {
        Config::new(dir.path().join("app.db"), dir.path().join("backups"))
    }

    #[test]
    fn test_check_writable_temp_dir() {
        let temp_dir = std::env::temp_dir();
        assert!(check_writable(&temp_dir).is_ok());
    }

    #[test]
    fn test_validate_config_passes_for_valid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = create_test_config(&temp_dir);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_rejects_compression_level_out_of_range() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = create_test_config(&temp_dir);
        config.compression_level = 10;

        let result = validate_numeric_values(&config);
        assert!(result.unwrap_err().to_string().contains("compression_level"));
    }

    #[test]
    fn test_rejects_zero_threads() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = create_test_config(&temp_dir);
        config.max_threads = 0;

        let result = validate_numeric_values(&config);
        assert!(result.unwrap_err().to_string().contains("max_threads"));
    }

    #[test]
    fn test_rejects_backup_directory_that_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("not_a_dir");
        fs::write(&file, b"x").unwrap();

        let mut config = create_test_config(&temp_dir);
        config.backup_directory = file;

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn test_rejects_source_that_is_a_directory() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = create_test_config(&temp_dir);
        config.source_database = temp_dir.path().to_path_buf();

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("not a file"));
    }

    #[test]
    fn test_rejects_invalid_trigger() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = create_test_config(&temp_dir);
        config.schedule = Some(ScheduleConfig {
            name: "nightly".to_string(),
            backup_type: BackupStrategy::Full,
            trigger: "every other tuesday".to_string(),
            enabled: true,
            retention_days: None,
            cleanup_interval: None,
        });

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("every other tuesday"));
    }

    #[test]
    fn test_rejects_catalog_in_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = create_test_config(&temp_dir);
        config.catalog_database = Some(temp_dir.path().join("nope").join("catalog.db"));

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("Catalog parent directory does not exist"));
    }
}
