use axum::{extract::State, http::StatusCode, response::Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use super::AppState;
use crate::errors::CronError;
use crate::models::{RunOutcome, DEFAULT_TENANT};

const LIST_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ListRequest {
    pub tenant: Option<i64>,
    pub max: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub tenant: Option<i64>,
    pub timestamp: i64,
    /// Hashed action name, as handed out by the list endpoint
    pub action: String,
    /// Hash of the job's argument set
    pub instance: String,
    #[serde(default)]
    pub force: bool,
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Due events for a tenant, as (timestamp, action hash, instance hash)
/// triples an external runner feeds back into the run endpoint
pub async fn list_events(
    State(state): State<AppState>,
    Json(req): Json<ListRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let store = state.store.for_tenant(req.tenant.unwrap_or(DEFAULT_TENANT));
    let now = Utc::now().timestamp();

    match store.list_due(now, req.max.unwrap_or(LIST_LIMIT)).await {
        Ok(jobs) => {
            let events: Vec<Value> = jobs
                .iter()
                .map(|job| {
                    json!({
                        "timestamp": job.timestamp,
                        "action": job.action_hash,
                        "instance": job.instance_hash,
                    })
                })
                .collect();
            Ok(Json(json!({ "events": events })))
        }
        Err(e) => {
            error!("failed to list due events: {e}");
            Err(error_response(&e))
        }
    }
}

pub async fn run_event(
    State(state): State<AppState>,
    Json(req): Json<RunRequest>,
) -> Result<Json<RunOutcome>, (StatusCode, Json<Value>)> {
    let events = state.events.for_tenant(req.tenant.unwrap_or(DEFAULT_TENANT));

    match events
        .run(req.timestamp, &req.action, &req.instance, req.force)
        .await
    {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => {
            error!("run request failed: {e}");
            Err(error_response(&e))
        }
    }
}

fn error_response(e: &CronError) -> (StatusCode, Json<Value>) {
    let status = match e {
        CronError::InvalidQuery { .. } => StatusCode::BAD_REQUEST,
        CronError::JobNotFound { .. } => StatusCode::NOT_FOUND,
        CronError::AlreadyLocked { .. } | CronError::TooEarly { .. } => StatusCode::CONFLICT,
        CronError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        CronError::CallbackFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}
