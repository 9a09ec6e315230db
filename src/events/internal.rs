//! Internal housekeeping events owned by the service itself.
//!
//! Internal events bypass externally registered event filters and always
//! remain eligible to run, so tenant-level customization cannot starve the
//! service's own maintenance.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use super::registry::{ActionRegistry, JobCallback};
use crate::config::ExecutionConfig;
use crate::errors::CronError;
use crate::models::{JobArgs, JobFilters, JobStatus};
use crate::store::JobStore;

/// Recurring purge of old completed records; keeps the completed-status
/// window bounded
pub const PURGE_COMPLETED_ACTION: &str = "cron_fleet_purge_completed";

/// How often the janitor runs
pub const PURGE_INTERVAL_SECS: i64 = 3600;

pub const INTERNAL_ACTIONS: &[&str] = &[PURGE_COMPLETED_ACTION];

/// Whether an action belongs to the service's own housekeeping set
pub fn is_internal_event(action: &str) -> bool {
    INTERNAL_ACTIONS.contains(&action)
}

/// Janitor callback: deletes completed records older than the retention
/// window, across all tenants.
pub struct PurgeCompletedJobs {
    store: JobStore,
    retention_secs: i64,
}

impl PurgeCompletedJobs {
    pub fn new(store: JobStore, retention_secs: i64) -> Self {
        Self {
            store,
            retention_secs,
        }
    }
}

#[async_trait]
impl JobCallback for PurgeCompletedJobs {
    async fn invoke(&self, _args: &JobArgs) -> anyhow::Result<Value> {
        let cutoff = Utc::now().timestamp() - self.retention_secs;
        let purged = self.store.purge_completed_before(cutoff).await?;
        if purged > 0 {
            info!(purged, "purged completed job records");
        }
        Ok(json!({ "purged": purged }))
    }
}

/// Register callbacks for all internal actions
pub async fn register_internal_events(
    registry: &ActionRegistry,
    store: &JobStore,
    execution: &ExecutionConfig,
) {
    registry
        .register(
            PURGE_COMPLETED_ACTION,
            Arc::new(PurgeCompletedJobs::new(
                store.clone(),
                execution.completed_retention_secs,
            )),
        )
        .await;
}

/// Ensure a pending record exists for each recurring internal action.
/// Dedup keeps repeated seeding from piling up records.
pub async fn seed_internal_events(store: &JobStore) -> Result<(), CronError> {
    let filters = JobFilters {
        action: Some(PURGE_COMPLETED_ACTION.to_string()),
        status: Some(JobStatus::Pending),
        limit: Some(1),
        ..Default::default()
    };
    if store.list(&filters).await?.is_empty() {
        let args = JobArgs {
            args: Vec::new(),
            interval: Some(PURGE_INTERVAL_SECS),
            schedule: Some("hourly".to_string()),
        };
        store
            .create_or_update(
                Utc::now().timestamp() + PURGE_INTERVAL_SECS,
                PURGE_COMPLETED_ACTION,
                &args,
                None,
            )
            .await?;
    }
    Ok(())
}
