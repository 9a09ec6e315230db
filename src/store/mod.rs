//! Job Store: persistence for scheduled jobs with dedup-on-identity,
//! creation suspension, and per-job lock bookkeeping.
//!
//! A `JobStore` is scoped to one tenant; `for_tenant` derives a store for
//! another tenant sharing the same process-wide suspension flag and read
//! cache. The dedup key `(timestamp, action_hash, instance_hash)` is unique
//! among non-completed records of a tenant.

mod cache;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use crate::database::Database;
use crate::errors::CronError;
use crate::models::{
    CreateResult, JobArgs, JobAttributes, JobFilters, JobRecord, JobStatus, DEFAULT_TENANT,
};
use cache::JobCache;

const DEFAULT_LIST_LIMIT: i64 = 100;

const JOB_COLUMNS: &str = "id, tenant_id, timestamp, action, action_hash, instance_hash, args, \
                           status, lock_token, lock_expires_at, detail, created_at, updated_at";

/// md5 hex of an action name, the compact secondary index the dedup key uses
pub fn hash_action(action: &str) -> String {
    format!("{:x}", md5::compute(action.as_bytes()))
}

/// md5 hex of the canonical serialization of a job's argument list
pub fn hash_instance(args: &JobArgs) -> String {
    let canonical = serde_json::to_string(&args.args).unwrap_or_default();
    format!("{:x}", md5::compute(canonical.as_bytes()))
}

/// State shared by every per-tenant view of the store: the process-wide
/// creation-suspension flag and the read cache.
struct StoreShared {
    suspended: AtomicBool,
    cache: JobCache,
}

#[derive(Clone)]
pub struct JobStore {
    db: Database,
    tenant_id: i64,
    shared: Arc<StoreShared>,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            tenant_id: DEFAULT_TENANT,
            shared: Arc::new(StoreShared {
                suspended: AtomicBool::new(false),
                cache: JobCache::new(),
            }),
        }
    }

    /// Derive a store scoped to another tenant. Suspension flag and cache
    /// stay shared across all views.
    pub fn for_tenant(&self, tenant_id: i64) -> Self {
        Self {
            db: self.db.clone(),
            tenant_id,
            shared: self.shared.clone(),
        }
    }

    pub fn tenant_id(&self) -> i64 {
        self.tenant_id
    }

    /// Register a job, deduplicating on `(timestamp, action_hash,
    /// instance_hash)` among non-completed records. Re-registration of an
    /// existing identity updates it in place, even while creation is
    /// suspended; only brand-new records are discarded during suspension.
    pub async fn create_or_update(
        &self,
        timestamp: i64,
        action: &str,
        args: &JobArgs,
        job_id: Option<i64>,
    ) -> Result<CreateResult, CronError> {
        let now = Utc::now().timestamp();
        let action_hash = hash_action(action);
        let instance_hash = hash_instance(args);
        let args_json = serde_json::to_string(args)
            .map_err(|e| CronError::invalid_query(format!("unserializable args: {e}")))?;

        if let Some(id) = job_id {
            let result = sqlx::query(
                "UPDATE jobs SET timestamp = ?, action = ?, action_hash = ?, instance_hash = ?, \
                 args = ?, updated_at = ? WHERE id = ? AND tenant_id = ?",
            )
            .bind(timestamp)
            .bind(action)
            .bind(&action_hash)
            .bind(&instance_hash)
            .bind(&args_json)
            .bind(now)
            .bind(id)
            .bind(self.tenant_id)
            .execute(&self.db.pool())
            .await?;

            if result.rows_affected() == 0 {
                return Err(CronError::job_not_found(format!("id {id}")));
            }
            self.shared.cache.invalidate_all().await;
            return Ok(CreateResult::Updated(id));
        }

        if let Some(existing_id) = self
            .find_by_dedup_key(timestamp, &action_hash, &instance_hash)
            .await?
        {
            sqlx::query(
                "UPDATE jobs SET timestamp = ?, args = ?, updated_at = ? \
                 WHERE id = ? AND tenant_id = ?",
            )
            .bind(timestamp)
            .bind(&args_json)
            .bind(now)
            .bind(existing_id)
            .bind(self.tenant_id)
            .execute(&self.db.pool())
            .await?;

            self.shared.cache.invalidate_all().await;
            return Ok(CreateResult::Updated(existing_id));
        }

        if self.creation_suspended() {
            debug!(action, "discarding job creation while suspended");
            return Ok(CreateResult::Suspended);
        }

        let result = sqlx::query(
            "INSERT INTO jobs (tenant_id, timestamp, action, action_hash, instance_hash, args, \
             status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(self.tenant_id)
        .bind(timestamp)
        .bind(action)
        .bind(&action_hash)
        .bind(&instance_hash)
        .bind(&args_json)
        .bind(JobStatus::Pending)
        .bind(now)
        .bind(now)
        .execute(&self.db.pool())
        .await?;

        self.shared.cache.invalidate_all().await;
        Ok(CreateResult::Created(result.last_insert_rowid()))
    }

    /// Resolve a job by id, or by `(timestamp, instance_hash, action |
    /// action_hash)` among non-completed records
    pub async fn get(&self, attrs: &JobAttributes) -> Result<Option<JobRecord>, CronError> {
        if let Some(id) = attrs.id {
            let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ? AND tenant_id = ?");
            let row = sqlx::query(&sql)
                .bind(id)
                .bind(self.tenant_id)
                .fetch_optional(&self.db.pool())
                .await?;
            return row.as_ref().map(map_job).transpose();
        }

        let timestamp = attrs
            .timestamp
            .ok_or_else(|| CronError::invalid_query("either id or timestamp is required"))?;
        let instance_hash = attrs
            .instance_hash
            .as_deref()
            .ok_or_else(|| CronError::invalid_query("instance_hash is required without id"))?;
        let action_hash = match (&attrs.action, &attrs.action_hash) {
            (Some(action), None) => hash_action(action),
            (None, Some(hash)) => hash.clone(),
            _ => {
                return Err(CronError::invalid_query(
                    "exactly one of action or action_hash is required",
                ))
            }
        };

        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE tenant_id = ? AND timestamp = ? \
             AND action_hash = ? AND instance_hash = ? AND status IN ('pending', 'running') \
             ORDER BY id ASC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(self.tenant_id)
            .bind(timestamp)
            .bind(&action_hash)
            .bind(instance_hash)
            .fetch_optional(&self.db.pool())
            .await?;
        row.as_ref().map(map_job).transpose()
    }

    /// List jobs matching the filters, soonest-due first. Runners depend on
    /// the ascending timestamp order to process due work in schedule order.
    pub async fn list(&self, filters: &JobFilters) -> Result<Vec<JobRecord>, CronError> {
        let key = filters.cache_key(self.tenant_id);
        if let Some(jobs) = self.shared.cache.get_jobs(&key).await {
            return Ok(jobs);
        }

        let mut sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE tenant_id = ?");
        if filters.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filters.action.is_some() {
            sql.push_str(" AND action = ?");
        }
        if filters.timestamp_from.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        if filters.timestamp_to.is_some() {
            sql.push_str(" AND timestamp <= ?");
        }
        sql.push_str(" ORDER BY timestamp ASC, id ASC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql).bind(self.tenant_id);
        if let Some(status) = filters.status {
            query = query.bind(status);
        }
        if let Some(action) = &filters.action {
            query = query.bind(action);
        }
        if let Some(from) = filters.timestamp_from {
            query = query.bind(from);
        }
        if let Some(to) = filters.timestamp_to {
            query = query.bind(to);
        }
        query = query
            .bind(filters.limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .bind(filters.offset.unwrap_or(0));

        let rows = query.fetch_all(&self.db.pool()).await?;
        let jobs = rows.iter().map(map_job).collect::<Result<Vec<_>, _>>()?;

        self.shared.cache.put_jobs(key, jobs.clone()).await;
        Ok(jobs)
    }

    /// Due jobs for a runner: pending, or running with an expired lock.
    /// Always reads through to storage; runners must not act on stale views.
    pub async fn list_due(&self, now: i64, limit: i64) -> Result<Vec<JobRecord>, CronError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE tenant_id = ? AND timestamp <= ? \
             AND (status = 'pending' OR (status = 'running' AND lock_expires_at < ?)) \
             ORDER BY timestamp ASC, id ASC LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(self.tenant_id)
            .bind(now)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.db.pool())
            .await?;
        rows.iter().map(map_job).collect()
    }

    /// Whether a non-completed record exists for the dedup key; returns its
    /// id when it does
    pub async fn exists(
        &self,
        timestamp: i64,
        action: &str,
        instance_hash: &str,
    ) -> Result<Option<i64>, CronError> {
        self.find_by_dedup_key(timestamp, &hash_action(action), instance_hash)
            .await
    }

    pub async fn count_by_status(&self, status: JobStatus) -> Result<i64, CronError> {
        let key = format!("count:{}:{}", self.tenant_id, status);
        if let Some(count) = self.shared.cache.get_count(&key).await {
            return Ok(count);
        }

        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM jobs WHERE tenant_id = ? AND status = ?",
        )
        .bind(self.tenant_id)
        .bind(status)
        .fetch_one(&self.db.pool())
        .await?;

        self.shared.cache.put_count(key, count).await;
        Ok(count)
    }

    /// Transition a job to `completed` by its dedup attributes, clearing the
    /// lock. Idempotent: completing an already-completed record is a no-op.
    pub async fn mark_completed(
        &self,
        timestamp: i64,
        action: &str,
        instance_hash: &str,
    ) -> Result<bool, CronError> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'completed', lock_token = '', lock_expires_at = 0, \
             updated_at = ? WHERE tenant_id = ? AND timestamp = ? AND action_hash = ? \
             AND instance_hash = ? AND status != 'completed'",
        )
        .bind(now)
        .bind(self.tenant_id)
        .bind(timestamp)
        .bind(hash_action(action))
        .bind(instance_hash)
        .execute(&self.db.pool())
        .await?;

        self.shared.cache.invalidate_all().await;
        Ok(result.rows_affected() > 0)
    }

    /// As `mark_completed`, resolved by record id
    pub async fn mark_completed_by_id(&self, id: i64) -> Result<bool, CronError> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'completed', lock_token = '', lock_expires_at = 0, \
             updated_at = ? WHERE id = ? AND tenant_id = ? AND status != 'completed'",
        )
        .bind(now)
        .bind(id)
        .bind(self.tenant_id)
        .execute(&self.db.pool())
        .await?;

        self.shared.cache.invalidate_all().await;
        Ok(result.rows_affected() > 0)
    }

    /// Transition a job to `failed`, clearing the lock and retaining the
    /// diagnostic detail from the callback
    pub async fn mark_failed(&self, id: i64, detail: &str) -> Result<bool, CronError> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', lock_token = '', lock_expires_at = 0, \
             detail = ?, updated_at = ? WHERE id = ? AND tenant_id = ?",
        )
        .bind(detail)
        .bind(now)
        .bind(id)
        .bind(self.tenant_id)
        .execute(&self.db.pool())
        .await?;

        self.shared.cache.invalidate_all().await;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically claim execution of a job: single-writer-wins compare-and-set
    /// on the status/lock pair. Succeeds for a pending record or a running
    /// record whose lock lease has lapsed.
    pub(crate) async fn claim(
        &self,
        id: i64,
        lock_token: &str,
        now: i64,
        lease_secs: i64,
    ) -> Result<bool, CronError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'running', lock_token = ?, lock_expires_at = ?, \
             updated_at = ? WHERE id = ? AND tenant_id = ? \
             AND (status = 'pending' OR (status = 'running' AND lock_expires_at < ?))",
        )
        .bind(lock_token)
        .bind(now + lease_secs)
        .bind(now)
        .bind(id)
        .bind(self.tenant_id)
        .bind(now)
        .execute(&self.db.pool())
        .await?;

        self.shared.cache.invalidate_all().await;
        Ok(result.rows_affected() == 1)
    }

    /// Delete completed records last touched before the cutoff. Spans all
    /// tenants; this is the janitor's bounded completed-record window.
    pub async fn purge_completed_before(&self, cutoff: i64) -> Result<u64, CronError> {
        let result = sqlx::query("DELETE FROM jobs WHERE status = 'completed' AND updated_at < ?")
            .bind(cutoff)
            .execute(&self.db.pool())
            .await?;

        self.shared.cache.invalidate_all().await;
        Ok(result.rows_affected())
    }

    /// Stop persisting new records. Intended for bounded bulk-maintenance
    /// windows; the caller is responsible for pairing with `resume_creation`.
    pub fn suspend_creation(&self) {
        self.shared.suspended.store(true, Ordering::SeqCst);
    }

    pub fn resume_creation(&self) {
        self.shared.suspended.store(false, Ordering::SeqCst);
    }

    pub fn creation_suspended(&self) -> bool {
        self.shared.suspended.load(Ordering::SeqCst)
    }

    /// Drop all cached read results
    pub async fn flush_cache(&self) {
        self.shared.cache.invalidate_all().await;
    }

    async fn find_by_dedup_key(
        &self,
        timestamp: i64,
        action_hash: &str,
        instance_hash: &str,
    ) -> Result<Option<i64>, CronError> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM jobs WHERE tenant_id = ? AND timestamp = ? AND action_hash = ? \
             AND instance_hash = ? AND status IN ('pending', 'running') ORDER BY id ASC LIMIT 1",
        )
        .bind(self.tenant_id)
        .bind(timestamp)
        .bind(action_hash)
        .bind(instance_hash)
        .fetch_optional(&self.db.pool())
        .await?;
        Ok(id)
    }
}

fn map_job(row: &SqliteRow) -> Result<JobRecord, CronError> {
    let args_raw: String = row.get("args");
    let args: JobArgs = serde_json::from_str(&args_raw).map_err(|e| {
        CronError::StoreUnavailable(sqlx::Error::ColumnDecode {
            index: "args".to_string(),
            source: Box::new(e),
        })
    })?;

    Ok(JobRecord {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        timestamp: row.get("timestamp"),
        action: row.get("action"),
        action_hash: row.get("action_hash"),
        instance_hash: row.get("instance_hash"),
        args,
        status: row.get("status"),
        lock_token: row.get("lock_token"),
        lock_expires_at: row.get("lock_expires_at"),
        detail: row.get("detail"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
