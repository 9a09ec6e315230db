//! Execution entry point and execution gate.
//!
//! `Events::run` resolves a job reference to a record, gates concurrent
//! execution through an optimistic lock claim, dispatches to the registered
//! callback, and records the outcome. At most one concurrent runner wins the
//! claim for a given record; everyone else observes `AlreadyLocked`.

pub mod internal;
pub mod registry;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::CronError;
use crate::models::{JobAttributes, JobRecord, JobStatus, RunOutcome};
use crate::store::JobStore;
pub use internal::is_internal_event;
pub use registry::{ActionRegistry, FnCallback, JobCallback};

/// Tolerated clock skew between the scheduler and a runner, seconds
const CLOCK_SKEW_TOLERANCE_SECS: i64 = 10;

/// Externally registered hook that can block tenant-defined actions from
/// being picked up by the coordination loop. Internal events bypass it.
pub trait EventFilter: Send + Sync {
    fn allows(&self, action: &str) -> bool;
}

#[derive(Clone)]
pub struct Events {
    store: JobStore,
    registry: Arc<ActionRegistry>,
    filter: Option<Arc<dyn EventFilter>>,
    max_execution_time: i64,
}

impl Events {
    pub fn new(store: JobStore, registry: Arc<ActionRegistry>, max_execution_time: i64) -> Self {
        Self {
            store,
            registry,
            filter: None,
            max_execution_time,
        }
    }

    pub fn with_filter(mut self, filter: Arc<dyn EventFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Derive an entry point scoped to another tenant's job store
    pub fn for_tenant(&self, tenant_id: i64) -> Self {
        Self {
            store: self.store.for_tenant(tenant_id),
            registry: self.registry.clone(),
            filter: self.filter.clone(),
            max_execution_time: self.max_execution_time,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Whether the coordination loop may pick up this action. Internal
    /// events are always eligible regardless of any registered filter.
    pub fn is_runnable(&self, action: &str) -> bool {
        internal::is_internal_event(action)
            || self.filter.as_ref().map_or(true, |f| f.allows(action))
    }

    /// Execute the job identified by its dedup key.
    ///
    /// With `force = false` the call fails with `TooEarly` for jobs still in
    /// the future and `AlreadyLocked` when another runner holds a live lock.
    /// `force = true` skips those gates (manual/administrative invocation)
    /// but still goes through the atomic claim.
    ///
    /// Callback failures are not errors of this function: the record is
    /// marked `failed` and the outcome carries the diagnostic detail.
    pub async fn run(
        &self,
        timestamp: i64,
        action_hash: &str,
        instance_hash: &str,
        force: bool,
    ) -> Result<RunOutcome, CronError> {
        let attrs = JobAttributes {
            timestamp: Some(timestamp),
            action_hash: Some(action_hash.to_string()),
            instance_hash: Some(instance_hash.to_string()),
            ..Default::default()
        };
        let job = self.store.get(&attrs).await?.ok_or_else(|| {
            CronError::job_not_found(format!("{timestamp}/{action_hash}/{instance_hash}"))
        })?;

        let now = Utc::now().timestamp();
        if !force {
            if job.timestamp > now + CLOCK_SKEW_TOLERANCE_SECS {
                return Err(CronError::TooEarly {
                    timestamp: job.timestamp,
                });
            }
            if job.status == JobStatus::Running && job.lock_expires_at >= now {
                return Err(CronError::AlreadyLocked { job_id: job.id });
            }
        }

        let lock_token = Uuid::new_v4().to_string();
        let claimed = self
            .store
            .claim(job.id, &lock_token, now, self.max_execution_time)
            .await?;
        if !claimed {
            return Err(CronError::AlreadyLocked { job_id: job.id });
        }

        let Some(callback) = self.registry.get(&job.action).await else {
            let message = format!("no registered callback for action '{}'", job.action);
            warn!(action = %job.action, job_id = job.id, "{message}");
            self.store.mark_failed(job.id, &message).await?;
            return Ok(failed_outcome(&job, message));
        };

        match callback.invoke(&job.args).await {
            Ok(output) => {
                self.store.mark_completed_by_id(job.id).await?;
                if job.args.is_recurring() {
                    self.schedule_successor(&job, now).await;
                }
                debug!(action = %job.action, job_id = job.id, "job completed");
                Ok(RunOutcome {
                    id: job.id,
                    action: job.action,
                    status: JobStatus::Completed,
                    output: Some(output),
                    error: None,
                })
            }
            Err(e) => {
                let error = CronError::callback_failure(job.action.as_str(), e.to_string());
                let detail = error.to_string();
                warn!(action = %job.action, job_id = job.id, "{detail}");
                self.store.mark_failed(job.id, &detail).await?;
                Ok(failed_outcome(&job, detail))
            }
        }
    }

    /// Create the successor pending record of a recurring job. Failure to
    /// reschedule is logged, never propagated into the run result.
    async fn schedule_successor(&self, job: &JobRecord, completed_at: i64) {
        let interval = job.args.interval.unwrap_or(0);
        let next = completed_at + interval;
        if let Err(e) = self
            .store
            .create_or_update(next, &job.action, &job.args, None)
            .await
        {
            warn!(
                action = %job.action,
                next_timestamp = next,
                "failed to reschedule recurring job: {e}"
            );
        }
    }
}

fn failed_outcome(job: &JobRecord, detail: String) -> RunOutcome {
    RunOutcome {
        id: job.id,
        action: job.action.clone(),
        status: JobStatus::Failed,
        output: None,
        error: Some(detail),
    }
}
