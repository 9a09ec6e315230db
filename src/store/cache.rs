//! Short-lived read cache for `list`/`count` results.
//!
//! Entries are keyed by the filter signature and expire after a few seconds;
//! any write through the store invalidates everything. An explicit flush
//! exists for operator recovery from stale-cache symptoms.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::models::JobRecord;

const CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Clone)]
enum Cached {
    Jobs(Vec<JobRecord>),
    Count(i64),
}

struct CacheEntry {
    cached_at: Instant,
    value: Cached,
}

#[derive(Default)]
pub(crate) struct JobCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl JobCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn get_jobs(&self, key: &str) -> Option<Vec<JobRecord>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.cached_at.elapsed() < CACHE_TTL => match &entry.value {
                Cached::Jobs(jobs) => Some(jobs.clone()),
                Cached::Count(_) => None,
            },
            _ => None,
        }
    }

    pub(crate) async fn get_count(&self, key: &str) -> Option<i64> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.cached_at.elapsed() < CACHE_TTL => match &entry.value {
                Cached::Count(count) => Some(*count),
                Cached::Jobs(_) => None,
            },
            _ => None,
        }
    }

    pub(crate) async fn put_jobs(&self, key: String, jobs: Vec<JobRecord>) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CacheEntry {
                cached_at: Instant::now(),
                value: Cached::Jobs(jobs),
            },
        );
    }

    pub(crate) async fn put_count(&self, key: String, count: i64) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CacheEntry {
                cached_at: Instant::now(),
                value: Cached::Count(count),
            },
        );
    }

    pub(crate) async fn invalidate_all(&self) {
        self.entries.write().await.clear();
    }
}
