use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Notify;

use cron_fleet::config::{DatabaseConfig, ExecutionConfig};
use cron_fleet::database::Database;
use cron_fleet::errors::CronError;
use cron_fleet::events::internal::{
    register_internal_events, seed_internal_events, PURGE_COMPLETED_ACTION,
};
use cron_fleet::events::{is_internal_event, ActionRegistry, EventFilter, Events};
use cron_fleet::models::{JobArgs, JobAttributes, JobStatus};
use cron_fleet::store::{hash_action, hash_instance, JobStore};

const MAX_EXECUTION_TIME: i64 = 600;

async fn test_events() -> (Database, JobStore, Arc<ActionRegistry>, Events) {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: Some(1),
    };
    let database = Database::new(&config).await.unwrap();
    database.migrate().await.unwrap();
    let store = JobStore::new(database.clone());
    let registry = Arc::new(ActionRegistry::new());
    let events = Events::new(store.clone(), registry.clone(), MAX_EXECUTION_TIME);
    (database, store, registry, events)
}

async fn register_counter(registry: &ActionRegistry, action: &str) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let c = counter.clone();
    registry
        .register_fn(action, move |_args| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "ok": true }))
            }
        })
        .await;
    counter
}

#[tokio::test]
async fn running_a_due_job_completes_it() {
    let (_db, store, registry, events) = test_events().await;
    let counter = register_counter(&registry, "send_digest").await;
    let args = JobArgs::one_shot(vec![json!("x")]);
    let now = Utc::now().timestamp();

    store
        .create_or_update(now - 5, "send_digest", &args, None)
        .await
        .unwrap();

    let outcome = events
        .run(now - 5, &hash_action("send_digest"), &hash_instance(&args), false)
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.output, Some(json!({ "ok": true })));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(store.count_by_status(JobStatus::Completed).await.unwrap(), 1);
}

#[tokio::test]
async fn future_job_fails_too_early_unless_forced() {
    let (_db, store, registry, events) = test_events().await;
    register_counter(&registry, "send_digest").await;
    let args = JobArgs::default();
    let future = Utc::now().timestamp() + 3600;

    store
        .create_or_update(future, "send_digest", &args, None)
        .await
        .unwrap();

    let gated = events
        .run(future, &hash_action("send_digest"), &hash_instance(&args), false)
        .await;
    assert!(matches!(gated, Err(CronError::TooEarly { .. })));

    let forced = events
        .run(future, &hash_action("send_digest"), &hash_instance(&args), true)
        .await
        .unwrap();
    assert_eq!(forced.status, JobStatus::Completed);
}

#[tokio::test]
async fn unknown_identity_fails_with_job_not_found() {
    let (_db, _store, _registry, events) = test_events().await;

    let missing = events.run(123, "deadbeef", "deadbeef", false).await;
    assert!(matches!(missing, Err(CronError::JobNotFound { .. })));
}

#[tokio::test]
async fn concurrent_runs_race_for_the_lock_and_one_wins() {
    let (_db, store, registry, events) = test_events().await;
    let gate = Arc::new(Notify::new());
    let release = gate.clone();

    registry
        .register_fn("slow_action", move |_args| {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                Ok(json!({ "done": true }))
            }
        })
        .await;

    let args = JobArgs::default();
    let now = Utc::now().timestamp();
    store
        .create_or_update(now - 5, "slow_action", &args, None)
        .await
        .unwrap();

    let action_hash = hash_action("slow_action");
    let instance = hash_instance(&args);

    let winner_events = events.clone();
    let winner_hash = action_hash.clone();
    let winner_instance = instance.clone();
    let winner = tokio::spawn(async move {
        winner_events
            .run(now - 5, &winner_hash, &winner_instance, false)
            .await
    });

    // Give the first runner time to claim the lock and park in the callback
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

    let loser = events.run(now - 5, &action_hash, &instance, false).await;
    assert!(matches!(loser, Err(CronError::AlreadyLocked { .. })));

    release.notify_one();
    let outcome = winner.await.unwrap().unwrap();
    assert_eq!(outcome.status, JobStatus::Completed);
}

#[tokio::test]
async fn expired_lock_is_reclaimable() {
    let (db, store, registry, events) = test_events().await;
    register_counter(&registry, "stuck_action").await;
    let args = JobArgs::default();
    let now = Utc::now().timestamp();

    store
        .create_or_update(now - 100, "stuck_action", &args, None)
        .await
        .unwrap();

    // Simulate a runner that claimed the job and died past its lease
    sqlx::query(
        "UPDATE jobs SET status = 'running', lock_token = 'dead-runner', lock_expires_at = ?",
    )
    .bind(now - 10)
    .execute(&db.pool())
    .await
    .unwrap();

    let outcome = events
        .run(now - 100, &hash_action("stuck_action"), &hash_instance(&args), false)
        .await
        .unwrap();
    assert_eq!(outcome.status, JobStatus::Completed);
}

#[tokio::test]
async fn recurring_completion_schedules_a_successor() {
    let (_db, store, registry, events) = test_events().await;
    register_counter(&registry, "hourly_sync").await;
    let args = JobArgs::recurring(vec![json!("payload")], 300);
    let now = Utc::now().timestamp();

    store
        .create_or_update(now - 5, "hourly_sync", &args, None)
        .await
        .unwrap();

    let outcome = events
        .run(now - 5, &hash_action("hourly_sync"), &hash_instance(&args), false)
        .await
        .unwrap();
    assert_eq!(outcome.status, JobStatus::Completed);

    let successor = store
        .get(&JobAttributes {
            timestamp: Some(Utc::now().timestamp() + 300),
            instance_hash: Some(hash_instance(&args)),
            action: Some("hourly_sync".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    // Completion time is "now" within a small window
    let successor = match successor {
        Some(job) => job,
        None => {
            let pending = store
                .list(&cron_fleet::models::JobFilters {
                    status: Some(JobStatus::Pending),
                    ..Default::default()
                })
                .await
                .unwrap();
            assert_eq!(pending.len(), 1);
            pending.into_iter().next().unwrap()
        }
    };

    assert_eq!(successor.action, "hourly_sync");
    assert_eq!(successor.args, args);
    assert_eq!(successor.status, JobStatus::Pending);
    let expected = now + 300;
    assert!(
        (successor.timestamp - expected).abs() <= 5,
        "successor at {} not within tolerance of {}",
        successor.timestamp,
        expected
    );
}

#[tokio::test]
async fn callback_failure_marks_the_record_failed() {
    let (_db, store, registry, events) = test_events().await;
    registry
        .register_fn("broken_action", |_args| async move {
            anyhow::bail!("disk on fire")
        })
        .await;

    let args = JobArgs::default();
    let now = Utc::now().timestamp();
    store
        .create_or_update(now - 5, "broken_action", &args, None)
        .await
        .unwrap();

    let outcome = events
        .run(now - 5, &hash_action("broken_action"), &hash_instance(&args), false)
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("disk on fire"));

    let record = store
        .get(&JobAttributes {
            id: Some(outcome.id),
            ..Default::default()
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.detail.contains("disk on fire"));
    assert!(record.lock_token.is_empty());
}

#[tokio::test]
async fn unregistered_action_fails_without_crashing() {
    let (_db, store, _registry, events) = test_events().await;
    let args = JobArgs::default();
    let now = Utc::now().timestamp();

    store
        .create_or_update(now - 5, "ghost_action", &args, None)
        .await
        .unwrap();

    let outcome = events
        .run(now - 5, &hash_action("ghost_action"), &hash_instance(&args), false)
        .await
        .unwrap();
    assert_eq!(outcome.status, JobStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("no registered callback"));
}

#[tokio::test]
async fn status_counts_reflect_a_mixed_run_history() {
    let (_db, store, registry, events) = test_events().await;
    register_counter(&registry, "good_action").await;
    registry
        .register_fn("bad_action", |_args| async move { anyhow::bail!("boom") })
        .await;

    let now = Utc::now().timestamp();
    for i in 0..3 {
        let args = JobArgs::one_shot(vec![json!(i)]);
        store
            .create_or_update(now - 5, "good_action", &args, None)
            .await
            .unwrap();
        events
            .run(now - 5, &hash_action("good_action"), &hash_instance(&args), false)
            .await
            .unwrap();
    }

    let bad_args = JobArgs::default();
    store
        .create_or_update(now - 5, "bad_action", &bad_args, None)
        .await
        .unwrap();
    events
        .run(now - 5, &hash_action("bad_action"), &hash_instance(&bad_args), false)
        .await
        .unwrap();

    store
        .create_or_update(now + 3600, "good_action", &JobArgs::default(), None)
        .await
        .unwrap();

    assert_eq!(store.count_by_status(JobStatus::Completed).await.unwrap(), 3);
    assert_eq!(store.count_by_status(JobStatus::Failed).await.unwrap(), 1);
    assert_eq!(store.count_by_status(JobStatus::Pending).await.unwrap(), 1);
}

struct DenyAll;

impl EventFilter for DenyAll {
    fn allows(&self, _action: &str) -> bool {
        false
    }
}

#[tokio::test]
async fn internal_events_bypass_external_filters() {
    let (_db, _store, _registry, events) = test_events().await;
    let events = events.with_filter(Arc::new(DenyAll));

    assert!(is_internal_event(PURGE_COMPLETED_ACTION));
    assert!(!is_internal_event("tenant_action"));

    assert!(events.is_runnable(PURGE_COMPLETED_ACTION));
    assert!(!events.is_runnable("tenant_action"));
}

#[tokio::test]
async fn janitor_purges_old_completed_records() {
    let (db, store, registry, events) = test_events().await;
    let execution = ExecutionConfig {
        max_execution_time_secs: MAX_EXECUTION_TIME,
        completed_retention_secs: 3600,
    };
    register_internal_events(&registry, &store, &execution).await;
    seed_internal_events(&store).await.unwrap();

    // Seeding is idempotent: a second call must not add a duplicate
    seed_internal_events(&store).await.unwrap();
    let purge_jobs = store
        .list(&cron_fleet::models::JobFilters {
            action: Some(PURGE_COMPLETED_ACTION.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(purge_jobs.len(), 1);

    let now = Utc::now().timestamp();
    let args = JobArgs::default();
    store.create_or_update(now - 100, "finished", &args, None).await.unwrap();
    store
        .mark_completed(now - 100, "finished", &hash_instance(&args))
        .await
        .unwrap();
    sqlx::query("UPDATE jobs SET updated_at = ? WHERE action = 'finished'")
        .bind(now - 7200)
        .execute(&db.pool())
        .await
        .unwrap();

    // Pull the purge job forward and run it through the gate
    let purge = purge_jobs.into_iter().next().unwrap();
    store
        .create_or_update(now - 1, PURGE_COMPLETED_ACTION, &purge.args, Some(purge.id))
        .await
        .unwrap();
    let outcome = events
        .run(
            now - 1,
            &hash_action(PURGE_COMPLETED_ACTION),
            &hash_instance(&purge.args),
            false,
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.output, Some(json!({ "purged": 1 })));
    assert_eq!(store.count_by_status(JobStatus::Completed).await.unwrap(), 1);

    // Recurring janitor reschedules itself
    let pending = store
        .list(&cron_fleet::models::JobFilters {
            action: Some(PURGE_COMPLETED_ACTION.to_string()),
            status: Some(JobStatus::Pending),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
}
