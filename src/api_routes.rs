use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::tokio::select;
use rocket::tokio::sync::broadcast::error::RecvError;
use rocket::tokio::time::{interval, Duration};
use rocket::{
    response::stream::{Event, EventStream},
    State,
};
use rusty_db_backup::engine::BackupEngine;
use rusty_db_backup::models::api::*;
use rusty_db_backup::models::backup_record::{BackupFilter, BackupRecord, BackupStatus, BackupType};
use rusty_db_backup::models::error::BackupError;
use rusty_db_backup::models::storage::{CatalogSummary, CleanupSummary};
use rusty_db_backup::models::verification_record::VerificationRecord;
use rusty_db_backup::service::scheduler::{Scheduler, SchedulerStatus};

type ApiResult<T> = Result<Json<T>, (Status, Json<ErrorResponse>)>;

fn error_status(error: &BackupError) -> Status {
    match error.kind() {
        "not_found" => Status::NotFound,
        "not_completed" | "scheduler_running" | "schedule_disabled" | "cancelled" => {
            Status::Conflict
        }
        "config" | "invalid_trigger" => Status::BadRequest,
        "source_validation" | "restore" => Status::UnprocessableEntity,
        _ => Status::InternalServerError,
    }
}

fn api_error(error: BackupError) -> (Status, Json<ErrorResponse>) {
    (
        error_status(&error),
        Json(ErrorResponse {
            error: error.kind().to_string(),
            details: Some(error.to_string()),
        }),
    )
}

fn bad_request(details: String) -> (Status, Json<ErrorResponse>) {
    (
        Status::BadRequest,
        Json(ErrorResponse {
            error: "bad_request".to_string(),
            details: Some(details),
        }),
    )
}

/// POST /api/backups - Take a backup and return its record
#[post("/backups", format = "json", data = "<request>")]
pub async fn create_backup(
    request: Json<CreateBackupRequest>,
    engine: &State<BackupEngine>,
) -> ApiResult<BackupRecord> {
    let request = request.into_inner();
    let backup_type = request.backup_type.unwrap_or(BackupType::Manual);
    engine
        .create_backup(backup_type, request.options)
        .await
        .map(Json)
        .map_err(api_error)
}

/// GET /api/backups - List backups, newest first
#[get("/backups?<backup_type>&<status>&<since>&<limit>")]
pub async fn list_backups(
    backup_type: Option<String>,
    status: Option<String>,
    since: Option<String>,
    limit: Option<usize>,
    engine: &State<BackupEngine>,
) -> ApiResult<BackupListResponse> {
    let filter = BackupFilter {
        backup_type: backup_type
            .map(|t| t.parse::<BackupType>())
            .transpose()
            .map_err(bad_request)?,
        status: status
            .map(|s| s.parse::<BackupStatus>())
            .transpose()
            .map_err(bad_request)?,
        since: since
            .map(|s| chrono::DateTime::parse_from_rfc3339(&s).map(|t| t.with_timezone(&chrono::Utc)))
            .transpose()
            .map_err(|e| bad_request(format!("invalid 'since' timestamp: {}", e)))?,
        limit,
    };

    let backups = engine.list_backups(filter).await.map_err(api_error)?;
    let total = backups.len();
    Ok(Json(BackupListResponse { backups, total }))
}

/// GET /api/backups/<id> - One backup record
#[get("/backups/<id>")]
pub async fn get_backup(id: &str, engine: &State<BackupEngine>) -> ApiResult<BackupRecord> {
    match engine.get_backup_by_id(id).await.map_err(api_error)? {
        Some(record) => Ok(Json(record)),
        None => Err(api_error(BackupError::BackupNotFound(id.to_string()))),
    }
}

/// GET /api/backups/<id>/verifications - Verification history, newest first
#[get("/backups/<id>/verifications")]
pub async fn list_verifications(
    id: &str,
    engine: &State<BackupEngine>,
) -> ApiResult<Vec<VerificationRecord>> {
    engine
        .list_verifications(id)
        .await
        .map(Json)
        .map_err(api_error)
}

/// POST /api/backups/<id>/verify - Re-check a backup's artifact
#[post("/backups/<id>/verify?<restore_test>")]
pub async fn verify_backup(
    id: &str,
    restore_test: Option<bool>,
    engine: &State<BackupEngine>,
) -> ApiResult<VerificationRecord> {
    engine
        .verify_backup(id, restore_test.unwrap_or(false))
        .await
        .map(Json)
        .map_err(api_error)
}

/// POST /api/backups/<id>/restore - Restore a backup
#[post("/backups/<id>/restore", format = "json", data = "<request>")]
pub async fn restore_backup(
    id: &str,
    request: Json<RestoreRequest>,
    engine: &State<BackupEngine>,
) -> ApiResult<RestoreResponse> {
    let restored = engine
        .restore_from_backup(id, request.into_inner().target_path)
        .await
        .map_err(api_error)?;
    Ok(Json(RestoreResponse {
        backup_id: Some(id.to_string()),
        restored_path: restored.to_string_lossy().to_string(),
    }))
}

/// POST /api/cleanup - Apply the retention policy now
#[post("/cleanup")]
pub async fn cleanup(engine: &State<BackupEngine>) -> ApiResult<CleanupSummary> {
    engine.clean_old_backups().await.map(Json).map_err(api_error)
}

/// GET /api/orphans - Artifacts without a catalog record
#[get("/orphans")]
pub async fn orphans(engine: &State<BackupEngine>) -> ApiResult<OrphansResponse> {
    let orphans = engine.find_orphans().await.map_err(api_error)?;
    Ok(Json(OrphansResponse {
        orphans: orphans
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect(),
    }))
}

/// GET /api/summary - Catalog totals
#[get("/summary")]
pub async fn summary(engine: &State<BackupEngine>) -> ApiResult<CatalogSummary> {
    engine.summary().await.map(Json).map_err(api_error)
}

/// GET /api/scheduler - Scheduler state and schedule record
#[get("/scheduler")]
pub async fn scheduler_status(scheduler: &State<Scheduler>) -> ApiResult<SchedulerStatus> {
    scheduler.status().await.map(Json).map_err(api_error)
}

/// POST /api/scheduler/start
#[post("/scheduler/start")]
pub async fn start_scheduler(scheduler: &State<Scheduler>) -> ApiResult<SchedulerStatus> {
    scheduler.start().map_err(api_error)?;
    scheduler.status().await.map(Json).map_err(api_error)
}

/// POST /api/scheduler/stop - Waits for an in-flight backup to finish
#[post("/scheduler/stop")]
pub async fn stop_scheduler(scheduler: &State<Scheduler>) -> ApiResult<SchedulerStatus> {
    scheduler.stop().await.map_err(api_error)?;
    scheduler.status().await.map(Json).map_err(api_error)
}

/// GET /api/events - Server-Sent Events for backup, restore and cleanup
#[get("/events")]
pub fn backup_events(engine: &State<BackupEngine>) -> EventStream![] {
    let mut receiver = engine.subscribe();

    EventStream! {
        let mut interval = interval(Duration::from_secs(15));

        loop {
            select! {
                event = receiver.recv() => {
                    match event {
                        Ok(event) => {
                            yield Event::json(&event).event(event.name());
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            log::warn!("Event stream lagged, {} events dropped", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                _ = interval.tick() => {
                    // Send heartbeat to keep connection alive
                    yield Event::data("heartbeat");
                }
            }
        }
    }
}

/// GET /api/health - Health check endpoint
#[get("/health")]
pub fn health_check() -> &'static str {
    "OK"
}
