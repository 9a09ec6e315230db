use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use cron_fleet::config::{CoordinatorConfig, DatabaseConfig};
use cron_fleet::coordinator::{FleetCoordinator, GroupAssignment};
use cron_fleet::database::Database;
use cron_fleet::events::{ActionRegistry, Events};
use cron_fleet::models::{JobArgs, JobStatus};
use cron_fleet::store::JobStore;

async fn test_database() -> Database {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: Some(1),
    };
    let database = Database::new(&config).await.unwrap();
    database.migrate().await.unwrap();
    database
}

fn coordinator_for(db: &Database, host_id: &str) -> FleetCoordinator {
    let config = CoordinatorConfig {
        host_id: Some(host_id.to_string()),
        heartbeat_interval: 60,
        tenants_per_group: 2,
        poll_limit: 100,
    };
    FleetCoordinator::new(db.clone(), &config)
}

async fn insert_host(db: &Database, host_id: &str, last_seen: i64) {
    sqlx::query("INSERT INTO host_heartbeats (host_id, last_seen) VALUES (?, ?)")
        .bind(host_id)
        .bind(last_seen)
        .execute(&db.pool())
        .await
        .unwrap();
}

async fn insert_tenant(db: &Database, id: i64) {
    sqlx::query("INSERT INTO tenants (id, url) VALUES (?, ?)")
        .bind(id)
        .bind(format!("https://site-{id}.example.com"))
        .execute(&db.pool())
        .await
        .unwrap();
}

#[tokio::test]
async fn heartbeat_evicts_stale_hosts_and_records_self() {
    let db = test_database().await;
    let now = Utc::now().timestamp();

    // 3 missed heartbeats at interval 60 → stale past 180s
    insert_host(&db, "dead-host", now - 300).await;
    insert_host(&db, "live-host", now - 60).await;

    let coordinator = coordinator_for(&db, "this-host");
    coordinator.heartbeat(now).await.unwrap();

    let hosts = coordinator.live_hosts().await.unwrap();
    assert_eq!(hosts, vec!["live-host".to_string(), "this-host".to_string()]);
}

#[tokio::test]
async fn heartbeat_refresh_is_an_upsert() {
    let db = test_database().await;
    let now = Utc::now().timestamp();
    let coordinator = coordinator_for(&db, "this-host");

    coordinator.heartbeat(now - 30).await.unwrap();
    coordinator.heartbeat(now).await.unwrap();

    let hosts = coordinator.live_hosts().await.unwrap();
    assert_eq!(hosts, vec!["this-host".to_string()]);
}

#[tokio::test]
async fn small_fleet_serves_every_tenant() {
    let db = test_database().await;
    let now = Utc::now().timestamp();
    for id in 0..6 {
        insert_tenant(&db, id).await;
    }
    // Two live hosts form one group, below the partition threshold
    insert_host(&db, "other-host", now).await;

    let coordinator = coordinator_for(&db, "this-host");
    let slice = coordinator.tenant_slice(now).await.unwrap();
    assert_eq!(slice.len(), 6);
}

#[tokio::test]
async fn four_hosts_split_tenants_by_parity() {
    let db = test_database().await;
    let now = Utc::now().timestamp();
    for id in 0..6 {
        insert_tenant(&db, id).await;
    }
    for host in ["b", "c", "d"] {
        insert_host(&db, host, now).await;
    }

    let coordinator = coordinator_for(&db, "a");
    let slice = coordinator.tenant_slice(now).await.unwrap();

    // sorted hosts [a, b, c, d], a is index 0 → group 0 → even tenants
    let ids: Vec<i64> = slice.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![0, 2, 4]);
}

#[tokio::test]
async fn every_tenant_is_covered_across_the_fleet() {
    let db = test_database().await;
    let now = Utc::now().timestamp();
    for id in 0..10 {
        insert_tenant(&db, id).await;
    }
    let fleet = ["a", "b", "c", "d", "e"];
    for host in fleet {
        insert_host(&db, host, now).await;
    }

    let mut covered = std::collections::HashSet::new();
    for host in fleet {
        let coordinator = coordinator_for(&db, host);
        for tenant in coordinator.tenant_slice(now).await.unwrap() {
            covered.insert(tenant.id);
        }
    }
    assert_eq!(covered.len(), 10);
}

#[tokio::test]
async fn storage_failure_degrades_to_full_coverage() {
    let db = test_database().await;
    let now = Utc::now().timestamp();
    // Four live hosts would normally partition into two groups
    for host in ["b", "c", "d"] {
        insert_host(&db, host, now).await;
    }

    let coordinator = coordinator_for(&db, "a");
    assert_ne!(coordinator.assignment(now).await, GroupAssignment::full_coverage());

    // Once the store is unreachable the heartbeat refresh fails and the
    // host falls back to serving every tenant
    db.pool().close().await;
    assert_eq!(coordinator.assignment(now).await, GroupAssignment::full_coverage());
}

#[tokio::test]
async fn orchestrate_list_emits_id_and_url() {
    let db = test_database().await;
    insert_tenant(&db, 7).await;

    let coordinator = coordinator_for(&db, "solo-host");
    let tenants = coordinator.orchestrate_list().await.unwrap();

    assert_eq!(tenants.len(), 1);
    assert_eq!(tenants[0].id, 7);
    assert_eq!(tenants[0].url, "https://site-7.example.com");

    let line = serde_json::to_value(&tenants[0]).unwrap();
    assert_eq!(line, json!({ "id": 7, "url": "https://site-7.example.com" }));
}

#[tokio::test]
async fn run_cycle_executes_due_jobs_across_the_slice() {
    let db = test_database().await;
    let now = Utc::now().timestamp();
    insert_tenant(&db, 1).await;
    insert_tenant(&db, 2).await;

    let store = JobStore::new(db.clone());
    let registry = Arc::new(ActionRegistry::new());
    let counter = Arc::new(AtomicUsize::new(0));
    let c = counter.clone();
    registry
        .register_fn("tenant_job", move |_args| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(json!({}))
            }
        })
        .await;
    let events = Events::new(store.clone(), registry, 600);

    let args = JobArgs::default();
    store
        .for_tenant(1)
        .create_or_update(now - 10, "tenant_job", &args, None)
        .await
        .unwrap();
    store
        .for_tenant(2)
        .create_or_update(now - 10, "tenant_job", &args, None)
        .await
        .unwrap();
    // Not yet due; must survive the cycle untouched
    store
        .for_tenant(1)
        .create_or_update(now + 3600, "tenant_job", &args, None)
        .await
        .unwrap();

    let coordinator = coordinator_for(&db, "solo-host");
    coordinator.run_cycle(&events).await.unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(
        store.for_tenant(1).count_by_status(JobStatus::Completed).await.unwrap(),
        1
    );
    assert_eq!(
        store.for_tenant(2).count_by_status(JobStatus::Completed).await.unwrap(),
        1
    );
    assert_eq!(
        store.for_tenant(1).count_by_status(JobStatus::Pending).await.unwrap(),
        1
    );
}
