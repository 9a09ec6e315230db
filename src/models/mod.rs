use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::errors::CronError;

/// Tenant used when a caller does not name one explicitly
pub const DEFAULT_TENANT: i64 = 1;

/// A single scheduled unit of work: identity, schedule, payload, and
/// lifecycle status. The dedup key `(timestamp, action_hash, instance_hash)`
/// is unique among non-completed records of one tenant's store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    pub tenant_id: i64,
    /// Scheduled unix time, seconds
    pub timestamp: i64,
    /// Logical callback name
    pub action: String,
    /// md5 hex of `action`, compact secondary index
    pub action_hash: String,
    /// md5 hex of the canonical serialization of the argument list
    pub instance_hash: String,
    pub args: JobArgs,
    pub status: JobStatus,
    /// UUID set when a runner claims execution, empty otherwise
    pub lock_token: String,
    /// Unix seconds after which a stale lock is reclaimable
    pub lock_expires_at: i64,
    /// Diagnostic detail from the last failed run, empty otherwise
    pub detail: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Ordered argument payload plus optional recurrence descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobArgs {
    #[serde(default)]
    pub args: Vec<Value>,
    /// Recurrence interval in seconds; absent or zero means one-shot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<i64>,
    /// Human-readable recurrence label, e.g. "hourly"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

impl JobArgs {
    pub fn one_shot(args: Vec<Value>) -> Self {
        Self {
            args,
            interval: None,
            schedule: None,
        }
    }

    pub fn recurring(args: Vec<Value>, interval: i64) -> Self {
        Self {
            args,
            interval: Some(interval),
            schedule: None,
        }
    }

    /// Whether completion should schedule a successor record
    pub fn is_recurring(&self) -> bool {
        self.interval.map(|i| i > 0).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for JobStatus {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(CronError::invalid_query(format!(
                "unknown job status '{other}'"
            ))),
        }
    }
}

/// Attribute set accepted by `JobStore::get`: either `id`, or the
/// `(timestamp, instance_hash, action | action_hash)` combination with
/// exactly one of `action`/`action_hash` supplied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobAttributes {
    pub id: Option<i64>,
    pub timestamp: Option<i64>,
    pub instance_hash: Option<String>,
    pub action: Option<String>,
    pub action_hash: Option<String>,
}

/// Filters accepted by `JobStore::list`
#[derive(Debug, Clone, Default)]
pub struct JobFilters {
    pub status: Option<JobStatus>,
    pub action: Option<String>,
    pub timestamp_from: Option<i64>,
    pub timestamp_to: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl JobFilters {
    /// Stable signature used as the read-cache key
    pub(crate) fn cache_key(&self, tenant_id: i64) -> String {
        format!(
            "list:{}:{}:{}:{}:{}:{}:{}",
            tenant_id,
            self.status.map(|s| s.to_string()).unwrap_or_default(),
            self.action.as_deref().unwrap_or_default(),
            self.timestamp_from.unwrap_or(i64::MIN),
            self.timestamp_to.unwrap_or(i64::MAX),
            self.limit.unwrap_or(-1),
            self.offset.unwrap_or(0),
        )
    }
}

/// Result of `JobStore::create_or_update`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "result", content = "id")]
pub enum CreateResult {
    Created(i64),
    Updated(i64),
    /// Sentinel returned while creation suspension is active; nothing
    /// was persisted
    Suspended,
}

impl CreateResult {
    pub fn job_id(&self) -> Option<i64> {
        match self {
            CreateResult::Created(id) | CreateResult::Updated(id) => Some(*id),
            CreateResult::Suspended => None,
        }
    }
}

/// Result payload of a run attempt that made it past the execution gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub id: i64,
    pub action: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One host's liveness entry in the shared heartbeat table
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HostHeartbeat {
    pub host_id: String,
    pub last_seen: i64,
}

/// An independently-addressed unit of work partitioned across hosts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tenant {
    pub id: i64,
    pub url: String,
}
