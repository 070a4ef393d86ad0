mod api_routes;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use rusty_db_backup::engine::BackupEngine;
use rusty_db_backup::models::backup_record::{BackupFilter, BackupRecord, BackupStatus, BackupType};
use rusty_db_backup::models::config::{setup_config, Config};
use rusty_db_backup::models::dump_format::DumpFormat;
use rusty_db_backup::models::verification_record::VerificationRecord;
use rusty_db_backup::service::backup::BackupOptions;
use rusty_db_backup::service::scheduler::Scheduler;
use rusty_db_backup::utils::progress::{format_bytes, format_duration_ms, maybe_spinner};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

#[macro_use]
extern crate rocket;

fn build_rocket(engine: BackupEngine) -> rocket::Rocket<rocket::Build> {
    let scheduler = Scheduler::new(engine.clone());

    rocket::build().manage(engine).manage(scheduler).mount(
        "/api",
        routes![
            api_routes::health_check,
            api_routes::create_backup,
            api_routes::list_backups,
            api_routes::get_backup,
            api_routes::list_verifications,
            api_routes::verify_backup,
            api_routes::restore_backup,
            api_routes::cleanup,
            api_routes::orphans,
            api_routes::summary,
            api_routes::scheduler_status,
            api_routes::start_scheduler,
            api_routes::stop_scheduler,
            api_routes::backup_events,
        ],
    )
}

#[derive(Parser)]
#[command(name = "RustyDbBackUp")]
#[command(about = "Integrity-verified backups of a SQLite database", long_about = None)]
struct Cli {
    #[arg(
        short = 'c',
        long = "config",
        default_value = "config.json",
        env = "RUSTYDBBACKUP_CONFIG",
        global = true
    )]
    config_file: String,

    #[arg(
        short = 'l',
        long = "log-level",
        default_value = "info",
        env = "LOG_LEVEL",
        global = true
    )]
    log_level: String,

    #[arg(short = 'q', long = "quiet", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Take a backup now
    Backup {
        #[arg(long = "format")]
        format: Option<DumpFormat>,
        /// Replay the new artifact into a scratch database as part of the check
        #[arg(long = "verify-restore")]
        verify_restore: bool,
        #[arg(long = "scheduled")]
        scheduled: bool,
    },
    /// List backups, newest first
    List {
        #[arg(long = "type")]
        backup_type: Option<BackupType>,
        #[arg(long = "status")]
        status: Option<BackupStatus>,
        #[arg(short = 'n', long = "limit")]
        limit: Option<usize>,
    },
    /// Show one backup and its verification history
    Show { id: String },
    /// Re-check a backup's artifact
    Verify {
        id: String,
        #[arg(long = "restore-test")]
        restore_test: bool,
    },
    /// Verify every completed backup
    Audit {
        #[arg(long = "restore-test")]
        restore_test: bool,
    },
    /// Restore a backup by id or from an artifact file
    Restore {
        #[arg(long = "id", conflicts_with = "file", required_unless_present = "file")]
        id: Option<String>,
        #[arg(long = "file")]
        file: Option<PathBuf>,
        /// Defaults to `{source}.restored`
        #[arg(short = 't', long = "target")]
        target: Option<PathBuf>,
    },
    /// Apply the retention policy now
    Cleanup,
    /// List artifacts that have no catalog record
    Orphans,
    /// List configured schedules
    Schedules,
    /// Run the scheduler until Ctrl+C
    Run,
    /// Serve the HTTP API
    Serve {
        /// Start the scheduler along with the server
        #[arg(long = "with-scheduler")]
        with_scheduler: bool,
    },
    /// Check the configuration and exit
    Validate,
}

fn init_logging(level: &str) {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_secs()
        .init();
}

#[rocket::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging(&args.log_level);

    info!("RustyDbBackUp starting...");
    let config_file = args
        .config_file
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string();
    let config: Config = setup_config(config_file).context("Failed to load configuration")?;
    debug!("Loaded config: {:?}", &config);

    if let Command::Validate = args.command {
        info!("Configuration is valid.");
        return Ok(());
    }

    let engine = BackupEngine::new(config).context("Failed to open backup catalog")?;
    debug!("Catalog at {}", engine.catalog().location());
    let quiet = args.quiet;

    match args.command {
        Command::Backup {
            format,
            verify_restore,
            scheduled,
        } => {
            let backup_type = if scheduled {
                BackupType::Scheduled
            } else {
                BackupType::Manual
            };
            let options = BackupOptions {
                dump_format: format,
                verify_restore: verify_restore.then_some(true),
                ..BackupOptions::default()
            };
            let spinner = maybe_spinner(quiet, "Backing up database...");
            let result = engine.create_backup(backup_type, options).await;
            if let Some(spinner) = spinner {
                spinner.finish_and_clear();
            }
            let record = result.context("Backup failed")?;
            print_record(&record);
        }
        Command::List {
            backup_type,
            status,
            limit,
        } => {
            let filter = BackupFilter {
                backup_type,
                status,
                since: None,
                limit,
            };
            let records = engine.list_backups(filter).await?;
            if records.is_empty() {
                println!("No backups found");
            }
            for record in &records {
                print_record_line(record);
            }
        }
        Command::Show { id } => {
            let Some(record) = engine.get_backup_by_id(&id).await? else {
                bail!("Backup {} not found", id);
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
            for verification in engine.list_verifications(&id).await? {
                print_verification(&verification);
            }
        }
        Command::Verify { id, restore_test } => {
            let spinner = maybe_spinner(quiet, &format!("Verifying {}...", id));
            let result = engine.verify_backup(&id, restore_test).await;
            if let Some(spinner) = spinner {
                spinner.finish_and_clear();
            }
            let verification = result.context("Verification failed")?;
            print_verification(&verification);
            if !verification.integrity_ok {
                bail!("Backup {} failed verification", id);
            }
        }
        Command::Audit { restore_test } => {
            let spinner = maybe_spinner(quiet, "Auditing backups...");
            let result = engine.verify_all_backups(restore_test).await;
            if let Some(spinner) = spinner {
                spinner.finish_and_clear();
            }
            let verifications = result.context("Audit failed")?;
            let failed = verifications.iter().filter(|v| !v.integrity_ok).count();
            for verification in &verifications {
                print_verification(verification);
            }
            println!("{} verified, {} failed", verifications.len(), failed);
            if failed > 0 {
                bail!("{} backups failed verification", failed);
            }
        }
        Command::Restore { id, file, target } => {
            let spinner = maybe_spinner(quiet, "Restoring...");
            let result = match (id, file) {
                (Some(id), _) => engine.restore_from_backup(&id, target).await,
                (None, Some(file)) => engine.restore_from_file(&file, target).await,
                (None, None) => bail!("Either --id or --file is required"),
            };
            if let Some(spinner) = spinner {
                spinner.finish_and_clear();
            }
            let restored = result.context("Restore failed")?;
            println!("Restored to {}", restored.display());
        }
        Command::Cleanup => {
            let summary = engine.clean_old_backups().await?;
            println!(
                "Deleted {} backups and {} failed attempts",
                summary.deleted_count, summary.deleted_failed_count
            );
            for failure in &summary.errors {
                warn!("{} ({}): {}", failure.backup_id, failure.kind, failure.message);
            }
        }
        Command::Orphans => {
            let orphans = engine.find_orphans().await?;
            if orphans.is_empty() {
                println!("No orphaned artifacts");
            }
            for orphan in orphans {
                println!("{}", orphan.display());
            }
        }
        Command::Schedules => {
            for schedule in engine.list_schedules().await? {
                println!(
                    "{} [{}] trigger='{}' enabled={} retention={}d last_run={} next_run={}",
                    schedule.name,
                    schedule.backup_type,
                    schedule.trigger_expression,
                    schedule.enabled,
                    schedule.retention_days,
                    schedule
                        .last_run
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                    schedule
                        .next_run
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
        }
        Command::Run => run_scheduled(engine).await?,
        Command::Serve { with_scheduler } => {
            let rocket = build_rocket(engine);
            if with_scheduler {
                if let Some(scheduler) = rocket.state::<Scheduler>() {
                    scheduler.start().context("Failed to start scheduler")?;
                }
            }
            rocket.launch().await?;
        }
        Command::Validate => {}
    }

    Ok(())
}

async fn run_scheduled(engine: BackupEngine) -> Result<()> {
    let scheduler = Scheduler::new(engine);
    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();

    ctrlc::set_handler(move || {
        info!("Received shutdown signal, stopping scheduler...");
        signal.notify_one();
    })
    .context("Failed to set Ctrl+C handler")?;

    scheduler.start().context("Failed to start scheduler")?;
    shutdown.notified().await;
    scheduler.stop().await?;
    Ok(())
}

fn print_record_line(record: &BackupRecord) {
    println!(
        "{}  {}  {:<9}  {:<9}  {:>10}  {}",
        record.id,
        record.timestamp.to_rfc3339(),
        record.backup_type.as_str(),
        record.status.as_str(),
        format_bytes(record.file_size_bytes),
        format_duration_ms(record.duration_ms),
    );
}

fn print_record(record: &BackupRecord) {
    println!("Backup {} {}", record.id, record.status);
    println!("  file:     {}", record.file_path);
    println!("  size:     {}", format_bytes(record.file_size_bytes));
    println!("  checksum: {}", record.checksum);
    println!("  duration: {}", format_duration_ms(record.duration_ms));
}

fn print_verification(verification: &VerificationRecord) {
    println!(
        "{}  {}  {}  integrity_ok={} restore_tested={}{}",
        verification.backup_id,
        verification.timestamp.to_rfc3339(),
        verification.verification_status,
        verification.integrity_ok,
        verification.restore_tested,
        verification
            .error_message
            .as_ref()
            .map(|e| format!("  error: {}", e))
            .unwrap_or_default(),
    );
}
