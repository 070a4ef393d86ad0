use crate::engine::BackupEngine;
use crate::models::backup_record::BackupType;
use crate::models::config::ScheduleConfig;
use crate::models::error::{BackupError, Result};
use crate::models::schedule_record::ScheduleRecord;
use crate::models::trigger::Trigger;
use crate::service::backup::BackupOptions;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct RunningLoop {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub schedule: Option<ScheduleRecord>,
}

/// Runs scheduled backups in the background. Stopped until [`start`] is
/// called; [`stop`] lets an in-flight backup finish.
///
/// [`start`]: Scheduler::start
/// [`stop`]: Scheduler::stop
pub struct Scheduler {
    engine: BackupEngine,
    state: Mutex<Option<RunningLoop>>,
}

impl Scheduler {
    pub fn new(engine: BackupEngine) -> Self {
        Self {
            engine,
            state: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|running| !running.handle.is_finished())
            .unwrap_or(false)
    }

    pub async fn status(&self) -> Result<SchedulerStatus> {
        let schedule = match &self.engine.config().schedule {
            Some(schedule) => {
                let catalog = self.engine.catalog().clone();
                let name = schedule.name.clone();
                tokio::task::spawn_blocking(move || catalog.get_schedule(&name))
                    .await
                    .map_err(|e| BackupError::Task(e.to_string()))??
            }
            None => None,
        };
        Ok(SchedulerStatus {
            running: self.is_running(),
            schedule,
        })
    }

    /// Begin periodic backups, starting with one right away. Must be called
    /// from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let schedule = self
            .engine
            .config()
            .schedule
            .clone()
            .ok_or_else(|| BackupError::ConfigInvalid("no schedule is configured".to_string()))?;
        if !schedule.enabled {
            return Err(BackupError::ScheduleDisabled(schedule.name));
        }
        let trigger = Trigger::parse(&schedule.trigger)?;
        let cleanup = schedule
            .cleanup_interval
            .as_deref()
            .map(Trigger::parse)
            .transpose()?;

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = state.as_ref() {
            if !running.handle.is_finished() {
                return Err(BackupError::SchedulerAlreadyRunning);
            }
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            self.engine.clone(),
            schedule,
            trigger,
            cleanup,
            stop_rx,
        ));
        *state = Some(RunningLoop { stop_tx, handle });
        Ok(())
    }

    /// Stop the periodic trigger and wait for the loop to exit. A backup
    /// already running is allowed to complete first.
    pub async fn stop(&self) -> Result<()> {
        let running = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match running {
            Some(running) => {
                let _ = running.stop_tx.send(true);
                running
                    .handle
                    .await
                    .map_err(|e| BackupError::Task(e.to_string()))?;
                info!("Scheduler stopped");
            }
            None => debug!("Scheduler is not running"),
        }
        Ok(())
    }
}

async fn run_loop(
    engine: BackupEngine,
    schedule: ScheduleConfig,
    trigger: Trigger,
    cleanup: Option<Trigger>,
    mut stop_rx: watch::Receiver<bool>,
) {
    info!(
        "Scheduler '{}' started with trigger '{}'",
        schedule.name, schedule.trigger
    );
    let mut next_cleanup = cleanup.as_ref().and_then(|t| t.next_after(Utc::now()));

    loop {
        let started = Utc::now();
        let options = BackupOptions {
            strategy: Some(schedule.backup_type),
            ..BackupOptions::default()
        };
        match engine.create_backup(BackupType::Scheduled, options).await {
            Ok(record) => debug!("Scheduled backup {} completed", record.id),
            // Already recorded as a failed attempt; the loop carries on
            Err(e) => warn!("Scheduled backup failed ({}): {}", e.kind(), e),
        }

        let next = trigger.next_after(Utc::now());
        if let Err(e) = engine
            .record_schedule_run(&schedule.name, Some(started), next)
            .await
        {
            warn!("Could not update schedule '{}': {}", schedule.name, e);
        }
        let Some(next) = next else {
            warn!("Trigger '{}' has no further fire times", schedule.trigger);
            return;
        };

        loop {
            let (wake, cleanup_due) = match next_cleanup {
                Some(at) if at < next => (at, true),
                _ => (next, false),
            };

            if !sleep_until(wake, &mut stop_rx).await {
                info!("Scheduler '{}' received stop signal", schedule.name);
                return;
            }
            if !cleanup_due {
                break;
            }

            if let Err(e) = engine.clean_old_backups().await {
                warn!("Scheduled cleanup failed: {}", e);
            }
            next_cleanup = cleanup.as_ref().and_then(|t| t.next_after(Utc::now()));
        }
    }
}

/// Sleep until `wake`. Returns false if a stop was signalled first.
async fn sleep_until(wake: DateTime<Utc>, stop_rx: &mut watch::Receiver<bool>) -> bool {
    if *stop_rx.borrow() {
        return false;
    }
    let delay = (wake - Utc::now()).to_std().unwrap_or_default();
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        changed = stop_rx.changed() => changed.is_ok() && !*stop_rx.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::backup_record::{BackupFilter, BackupStatus};
    use crate::models::config::Config;
    use rusqlite::Connection;
    use serial_test::serial;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn engine_with_schedule(dir: &TempDir, source: &Path, trigger: &str, enabled: bool) -> BackupEngine {
        let mut config = Config::new(source, dir.path().join("backups"));
        config.cleanup_after_backup = false;
        config.schedule = Some(ScheduleConfig {
            name: "test".to_string(),
            backup_type: Default::default(),
            trigger: trigger.to_string(),
            enabled,
            retention_days: None,
            cleanup_interval: Some("1s".to_string()),
        });
        BackupEngine::new(config).unwrap()
    }

    fn source_db(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("app.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE t(x); INSERT INTO t VALUES (1);")
            .unwrap();
        path
    }

    async fn wait_for_backups(engine: &BackupEngine, count: usize) -> Vec<crate::models::backup_record::BackupRecord> {
        for _ in 0..100 {
            let backups = engine.list_backups(BackupFilter::default()).await.unwrap();
            if backups.len() >= count {
                return backups;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("timed out waiting for {} backups", count);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[serial]
    async fn test_start_runs_immediately_and_stop_ends_loop() {
        let dir = TempDir::new().unwrap();
        let source = source_db(&dir);
        let engine = engine_with_schedule(&dir, &source, "1h", true);
        let scheduler = Scheduler::new(engine.clone());

        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        assert_eq!(
            scheduler.start().unwrap_err().kind(),
            "scheduler_running"
        );

        let backups = wait_for_backups(&engine, 1).await;
        assert_eq!(backups[0].backup_type, BackupType::Scheduled);

        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running());

        let status = scheduler.status().await.unwrap();
        let schedule = status.schedule.unwrap();
        assert!(schedule.last_run.is_some());
        assert!(schedule.next_run.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[serial]
    async fn test_failures_do_not_stop_the_loop() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with_schedule(&dir, &dir.path().join("gone.db"), "1s", true);
        let scheduler = Scheduler::new(engine.clone());

        scheduler.start().unwrap();
        let backups = wait_for_backups(&engine, 2).await;
        assert!(backups.iter().all(|b| b.status == BackupStatus::Failed));
        assert!(scheduler.is_running());

        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_schedule_does_not_start() {
        let dir = TempDir::new().unwrap();
        let source = source_db(&dir);
        let engine = engine_with_schedule(&dir, &source, "1h", false);
        let scheduler = Scheduler::new(engine);

        assert_eq!(scheduler.start().unwrap_err().kind(), "schedule_disabled");
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_missing_schedule_is_config_error() {
        let dir = TempDir::new().unwrap();
        let source = source_db(&dir);
        let engine = BackupEngine::new(Config::new(&source, dir.path().join("backups"))).unwrap();
        let scheduler = Scheduler::new(engine);

        assert_eq!(scheduler.start().unwrap_err().kind(), "config");
        // Stopping a stopped scheduler is a no-op
        scheduler.stop().await.unwrap();
    }
}
