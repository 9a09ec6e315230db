//! Fleet coordinator: heartbeat registry of live hosts and the periodic
//! coordination cycle each host runs independently.
//!
//! There is no leader election. Every host refreshes its own heartbeat,
//! snapshots the live-host set, computes its tenant slice with the pure
//! partition function, and drives due jobs for those tenants. Storage errors
//! along the heartbeat/partition path degrade to full coverage instead of
//! halting; execution correctness is guaranteed by the execution gate, not
//! by partition agreement.

pub mod partition;

use chrono::Utc;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::database::Database;
use crate::errors::CronError;
use crate::events::Events;
use crate::models::{HostHeartbeat, Tenant};
pub use partition::GroupAssignment;

/// A host missing this many consecutive heartbeats is evicted from the table
pub const STALE_HEARTBEAT_FACTOR: i64 = 3;

pub struct FleetCoordinator {
    db: Database,
    host_id: String,
    heartbeat_interval: i64,
    tenants_per_group: i64,
    poll_limit: i64,
}

impl FleetCoordinator {
    pub fn new(db: Database, config: &CoordinatorConfig) -> Self {
        Self {
            db,
            host_id: config.resolved_host_id(),
            heartbeat_interval: config.heartbeat_interval,
            tenants_per_group: config.tenants_per_group,
            poll_limit: config.poll_limit,
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Evict hosts that missed three heartbeats, then record our own
    pub async fn heartbeat(&self, now: i64) -> Result<(), CronError> {
        let stale_before = now - STALE_HEARTBEAT_FACTOR * self.heartbeat_interval;
        sqlx::query("DELETE FROM host_heartbeats WHERE last_seen < ?")
            .bind(stale_before)
            .execute(&self.db.pool())
            .await?;

        sqlx::query(
            "INSERT INTO host_heartbeats (host_id, last_seen) VALUES (?, ?) \
             ON CONFLICT(host_id) DO UPDATE SET last_seen = excluded.last_seen",
        )
        .bind(&self.host_id)
        .bind(now)
        .execute(&self.db.pool())
        .await?;

        Ok(())
    }

    /// Live hosts in sorted order; the partition function requires a stable
    /// ordering so every host computes the same group layout
    pub async fn live_hosts(&self) -> Result<Vec<String>, CronError> {
        let rows = sqlx::query_as::<_, HostHeartbeat>(
            "SELECT host_id, last_seen FROM host_heartbeats ORDER BY host_id ASC",
        )
        .fetch_all(&self.db.pool())
        .await?;
        Ok(rows.into_iter().map(|h| h.host_id).collect())
    }

    /// Refresh our heartbeat and compute this host's group. Heartbeat or
    /// membership read failures fall back to serving every tenant.
    pub async fn assignment(&self, now: i64) -> GroupAssignment {
        if let Err(e) = self.heartbeat(now).await {
            warn!("heartbeat refresh failed, serving all tenants: {e}");
            return GroupAssignment::full_coverage();
        }

        match self.live_hosts().await {
            Ok(hosts) => partition::group_assignment(&hosts, &self.host_id, self.tenants_per_group),
            Err(e) => {
                warn!("live-host snapshot failed, serving all tenants: {e}");
                GroupAssignment::full_coverage()
            }
        }
    }

    /// The tenants this host is responsible for polling this cycle
    pub async fn tenant_slice(&self, now: i64) -> Result<Vec<Tenant>, CronError> {
        let assignment = self.assignment(now).await;
        let tenants =
            sqlx::query_as::<_, Tenant>("SELECT id, url FROM tenants ORDER BY id ASC")
                .fetch_all(&self.db.pool())
                .await?;

        Ok(tenants
            .into_iter()
            .filter(|t| assignment.covers(t.id))
            .collect())
    }

    /// Fleet discovery for an external runner: refresh the heartbeat and
    /// emit this host's slice
    pub async fn orchestrate_list(&self) -> Result<Vec<Tenant>, CronError> {
        self.tenant_slice(Utc::now().timestamp()).await
    }

    /// Run the coordination cycle forever, with a little jitter so hosts
    /// started together do not stay in lockstep
    pub async fn start(self, events: Events) {
        info!(
            host_id = %self.host_id,
            interval = self.heartbeat_interval,
            "starting fleet coordination loop"
        );

        loop {
            let base = self.heartbeat_interval.max(1) as u64;
            let jitter = fastrand::u64(0..base / 10 + 1);
            tokio::time::sleep(Duration::from_secs(base + jitter)).await;

            if let Err(e) = self.run_cycle(&events).await {
                error!("coordination cycle failed: {e}");
            }
        }
    }

    /// One cycle: compute the slice and drive each tenant's due jobs in
    /// schedule order. Contention outcomes are expected and skipped.
    pub async fn run_cycle(&self, events: &Events) -> Result<(), CronError> {
        let now = Utc::now().timestamp();
        let slice = self.tenant_slice(now).await?;
        debug!(tenants = slice.len(), "coordination cycle");

        for tenant in slice {
            let scoped = events.for_tenant(tenant.id);
            let due = scoped.store().list_due(now, self.poll_limit).await?;

            for job in due {
                if !scoped.is_runnable(&job.action) {
                    debug!(action = %job.action, tenant = tenant.id, "action blocked by filter");
                    continue;
                }

                match scoped
                    .run(job.timestamp, &job.action_hash, &job.instance_hash, false)
                    .await
                {
                    Ok(outcome) => {
                        debug!(
                            action = %job.action,
                            tenant = tenant.id,
                            status = %outcome.status,
                            "job executed"
                        );
                    }
                    Err(CronError::AlreadyLocked { .. })
                    | Err(CronError::TooEarly { .. })
                    | Err(CronError::JobNotFound { .. }) => {
                        // Another runner got there first
                        debug!(action = %job.action, tenant = tenant.id, "job skipped");
                    }
                    Err(e) => {
                        warn!(action = %job.action, tenant = tenant.id, "job run failed: {e}");
                    }
                }
            }
        }

        Ok(())
    }
}
