use crate::models::backup_record::{BackupFilter, BackupRecord, BackupType};
use crate::models::config::Config;
use crate::models::error::{BackupError, Result};
use crate::models::events::BackupEvent;
use crate::models::schedule_record::{BackupStrategy, ScheduleRecord};
use crate::models::storage::{CatalogSummary, CleanupSummary};
use crate::models::verification_record::VerificationRecord;
use crate::repo::sqlite::Catalog;
use crate::service::backup::{
    self, backup_lock, AbandonOnDrop, AttemptCancel, BackupOptions, BackupPlan,
};
use crate::service::{restore, retention, verify};
use crate::utils::directory::get_artifacts_in_dir;
use chrono::{DateTime, SubsecRound, Utc};
use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 64;

/// Entry point for backup, verification, restore and retention.
///
/// Cloning is cheap: clones share the catalog, the event channel and the
/// cancel flag.
#[derive(Clone)]
pub struct BackupEngine {
    config: Arc<Config>,
    catalog: Catalog,
    events: broadcast::Sender<BackupEvent>,
    cancel: Arc<AtomicBool>,
}

/// Run blocking work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BackupError::Task(e.to_string()))?
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

impl BackupEngine {
    /// Create the backup directory if needed and open the catalog named by
    /// the config.
    pub fn new(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.backup_directory)?;
        let catalog = Catalog::open(&config.catalog_path().to_string_lossy())?;
        Self::with_catalog(config, catalog)
    }

    pub fn with_catalog(config: Config, catalog: Catalog) -> Result<Self> {
        if let Some(schedule) = &config.schedule {
            catalog.upsert_schedule(&ScheduleRecord {
                name: schedule.name.clone(),
                backup_type: schedule.backup_type,
                trigger_expression: schedule.trigger.clone(),
                enabled: schedule.enabled,
                last_run: None,
                next_run: None,
                retention_days: config.effective_retention_days(),
            })?;
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            config: Arc::new(config),
            catalog,
            events,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BackupEvent> {
        self.events.subscribe()
    }

    /// Abort the running backup attempt, or the next one if none is running.
    /// Takes effect between pipeline stages, before the artifact is published.
    pub fn request_cancel(&self) {
        info!("Backup cancellation requested");
        self.cancel.store(true, Ordering::SeqCst);
    }

    fn emit(&self, event: BackupEvent) {
        debug!("Event: {}", event.name());
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn plan(&self, backup_type: BackupType, options: BackupOptions) -> BackupPlan {
        let strategy = options.strategy.unwrap_or_else(|| {
            self.config
                .schedule
                .as_ref()
                .map(|s| s.backup_type)
                .unwrap_or_default()
        });
        BackupPlan {
            id: Uuid::new_v4().to_string(),
            // Catalog timestamps have second precision
            timestamp: Utc::now().trunc_subsecs(0),
            backup_type,
            source: self.config.source_database.clone(),
            backup_dir: self.config.backup_directory.clone(),
            format: options.dump_format.unwrap_or(self.config.dump_format),
            compression_level: options
                .compression_level
                .unwrap_or(self.config.compression_level),
            restore_test: options.verify_restore.unwrap_or(self.config.verify_restore),
            strategy,
            extra: options.extra,
        }
    }

    /// Take a full backup of the source database.
    ///
    /// Attempts on the same backup directory run one at a time. A failed
    /// attempt is recorded with `status = failed` and its error returned; a
    /// cancelled attempt leaves no record at all.
    pub async fn create_backup(
        &self,
        backup_type: BackupType,
        options: BackupOptions,
    ) -> Result<BackupRecord> {
        let guard = backup_lock(&self.config.backup_directory)
            .lock_owned()
            .await;

        let plan = self.plan(backup_type, options);
        if plan.strategy == BackupStrategy::Incremental {
            warn!("Incremental backups are not implemented, taking a full backup");
        }
        info!("Starting {} backup {}", backup_type, plan.id);
        let started = Instant::now();

        let cancel = AttemptCancel {
            requested: self.cancel.clone(),
            abandoned: Arc::new(AtomicBool::new(false)),
        };
        let _abandon = AbandonOnDrop(cancel.abandoned.clone());

        // The lock moves into the blocking task so a dropped attempt keeps
        // the directory until its temporary file is gone.
        let outcome = {
            let plan = plan.clone();
            let catalog = self.catalog.clone();
            blocking(move || {
                let _guard = guard;
                let artifact = backup::prepare(&plan, &cancel)?;
                backup::finalize(&catalog, &plan, artifact, elapsed_ms(started))
            })
            .await
        };
        self.cancel.store(false, Ordering::SeqCst);

        let result = match outcome {
            Ok((record, verification)) => {
                self.emit(BackupEvent::BackupCompleted {
                    id: record.id.clone(),
                    file_size_bytes: record.file_size_bytes,
                    duration_ms: record.duration_ms,
                    integrity_ok: verification.integrity_ok,
                });
                Ok(record)
            }
            Err(BackupError::Cancelled) => {
                info!("Backup {} cancelled", plan.id);
                return Err(BackupError::Cancelled);
            }
            Err(e) => {
                let duration_ms = elapsed_ms(started);
                error!("Backup {} failed: {}", plan.id, e);
                self.record_failure(&plan, &e, duration_ms).await;
                self.emit(BackupEvent::BackupFailed {
                    id: plan.id.clone(),
                    duration_ms,
                    kind: e.kind().to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        };

        if self.config.cleanup_after_backup {
            if let Err(e) = self.clean_old_backups().await {
                warn!("Retention sweep after backup {} failed: {}", plan.id, e);
            }
        }
        result
    }

    async fn record_failure(&self, plan: &BackupPlan, cause: &BackupError, duration_ms: u64) {
        if let BackupError::CatalogWrite { .. } = cause {
            warn!(
                "Catalog rejected backup {}; its artifact stays in {} as an orphan",
                plan.id,
                plan.backup_dir.display()
            );
            return;
        }

        let record = backup::failed_record(plan, cause, duration_ms);
        let catalog = self.catalog.clone();
        if let Err(e) = blocking(move || catalog.record(&record)).await {
            warn!("Could not record failed backup {}: {}", plan.id, e);
        }
    }

    pub async fn list_backups(&self, filter: BackupFilter) -> Result<Vec<BackupRecord>> {
        let catalog = self.catalog.clone();
        blocking(move || catalog.list(&filter)).await
    }

    pub async fn get_backup_by_id(&self, id: &str) -> Result<Option<BackupRecord>> {
        let catalog = self.catalog.clone();
        let id = id.to_string();
        blocking(move || catalog.get(&id)).await
    }

    async fn completed_backup(&self, id: &str) -> Result<BackupRecord> {
        let record = self
            .get_backup_by_id(id)
            .await?
            .ok_or_else(|| BackupError::BackupNotFound(id.to_string()))?;
        if !record.is_completed() {
            return Err(BackupError::NotCompleted(id.to_string()));
        }
        Ok(record)
    }

    /// Re-check a completed backup's artifact and record the outcome.
    /// A damaged artifact gives `integrity_ok = false`, not an error.
    pub async fn verify_backup(&self, id: &str, restore_test: bool) -> Result<VerificationRecord> {
        let record = self.completed_backup(id).await?;
        let catalog = self.catalog.clone();
        blocking(move || {
            let verification = verify::verify_artifact(&record, restore_test);
            catalog.record_verification(&verification)?;
            Ok(verification)
        })
        .await
    }

    /// Verify every completed backup in parallel.
    pub async fn verify_all_backups(&self, restore_test: bool) -> Result<Vec<VerificationRecord>> {
        let catalog = self.catalog.clone();
        let threads = self.config.max_threads.max(1);
        blocking(move || {
            let records = catalog.list(&BackupFilter::completed())?;
            info!("Auditing {} backups on {} threads", records.len(), threads);

            let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
            let verifications: Vec<VerificationRecord> = pool.install(|| {
                records
                    .par_iter()
                    .map(|record| verify::verify_artifact(record, restore_test))
                    .collect()
            });

            for verification in &verifications {
                catalog.record_verification(verification)?;
            }
            Ok(verifications)
        })
        .await
    }

    pub async fn list_verifications(&self, id: &str) -> Result<Vec<VerificationRecord>> {
        let catalog = self.catalog.clone();
        let id = id.to_string();
        blocking(move || catalog.verifications(&id)).await
    }

    /// Restore a cataloged backup to `target`, by default
    /// `{source}.restored`. The artifact's checksum is checked first.
    pub async fn restore_from_backup(&self, id: &str, target: Option<PathBuf>) -> Result<PathBuf> {
        let record = match self.completed_backup(id).await {
            Ok(record) => record,
            Err(e @ BackupError::BackupNotFound(_)) | Err(e @ BackupError::NotCompleted(_)) => {
                return Err(BackupError::Restore(e.to_string()))
            }
            Err(e) => return Err(e),
        };

        let artifact = PathBuf::from(&record.file_path);
        let checksum = record.checksum.clone();
        let restored = self
            .restore(Some(record.id), artifact, target, Some(checksum))
            .await?;
        Ok(restored)
    }

    /// Restore straight from an artifact file that may not be in the catalog.
    pub async fn restore_from_file(&self, artifact: &Path, target: Option<PathBuf>) -> Result<PathBuf> {
        self.restore(None, artifact.to_path_buf(), target, None)
            .await
    }

    async fn restore(
        &self,
        id: Option<String>,
        artifact: PathBuf,
        target: Option<PathBuf>,
        checksum: Option<String>,
    ) -> Result<PathBuf> {
        let target = target.unwrap_or_else(|| self.config.default_restore_target());
        let source = self.config.source_database.clone();
        let started = Instant::now();
        info!("Restoring {} to {}", artifact.display(), target.display());

        let restored = blocking(move || {
            if let Some(expected) = checksum {
                verify::check_checksum(&artifact, &expected)
                    .map_err(|e| BackupError::Restore(format!("artifact failed checksum check: {}", e)))?;
            }
            restore::restore_artifact(&artifact, &target, &source)
        })
        .await?;

        self.emit(BackupEvent::RestoreCompleted {
            id,
            restored_path: restored.to_string_lossy().to_string(),
            duration_ms: elapsed_ms(started),
        });
        Ok(restored)
    }

    /// Apply the retention policy as of now.
    pub async fn clean_old_backups(&self) -> Result<CleanupSummary> {
        self.clean_old_backups_at(Utc::now()).await
    }

    pub async fn clean_old_backups_at(&self, now: DateTime<Utc>) -> Result<CleanupSummary> {
        let catalog = self.catalog.clone();
        let retention_days = self.config.effective_retention_days();
        let failed_retention_days = self.config.failed_retention_days;

        let summary = blocking(move || {
            retention::sweep(&catalog, retention_days, failed_retention_days, now)
        })
        .await?;

        self.emit(BackupEvent::CleanupCompleted {
            deleted_count: summary.deleted_count + summary.deleted_failed_count,
            failed_count: summary.errors.len(),
        });
        Ok(summary)
    }

    /// Artifacts in the backup directory that no catalog record points to.
    pub async fn find_orphans(&self) -> Result<Vec<PathBuf>> {
        let catalog = self.catalog.clone();
        let dir = self.config.backup_directory.clone();
        blocking(move || {
            let known: HashSet<String> = catalog
                .artifact_paths()?
                .iter()
                .filter_map(|p| Path::new(p).file_name())
                .map(|name| name.to_string_lossy().to_string())
                .collect();

            Ok(get_artifacts_in_dir(&dir)
                .into_iter()
                .filter(|path| {
                    path.file_name()
                        .map(|name| !known.contains(name.to_string_lossy().as_ref()))
                        .unwrap_or(false)
                })
                .collect())
        })
        .await
    }

    pub async fn summary(&self) -> Result<CatalogSummary> {
        let catalog = self.catalog.clone();
        blocking(move || catalog.summary()).await
    }

    pub async fn list_schedules(&self) -> Result<Vec<ScheduleRecord>> {
        let catalog = self.catalog.clone();
        blocking(move || catalog.list_schedules()).await
    }

    pub(crate) async fn record_schedule_run(
        &self,
        name: &str,
        last_run: Option<DateTime<Utc>>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let catalog = self.catalog.clone();
        let name = name.to_string();
        blocking(move || catalog.update_schedule_runs(&name, last_run, next_run)).await
    }
}
