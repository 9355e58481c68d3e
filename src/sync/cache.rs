use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use super::client::{Annotation, Listing, RemoteError, Scope};

/// How long a listing may be served from cache.
pub const CACHE_TTL: TimeDelta = TimeDelta::seconds(60);

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for tests and replay.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(start)))
    }

    pub fn advance(&self, by: TimeDelta) {
        if let Ok(mut now) = self.0.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.0.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub scope_key: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(flatten)]
    pub listing: Listing,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now - self.fetched_at < CACHE_TTL && now >= self.fetched_at
    }
}

/// Persistable cache state: one entry and one invalidation stamp per scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTable {
    #[serde(default)]
    entries: HashMap<String, CacheEntry>,
    #[serde(default)]
    invalidated: HashMap<String, DateTime<Utc>>,
}

impl CacheTable {
    pub fn entry(&self, scope_key: &str) -> Option<&CacheEntry> {
        self.entries.get(scope_key)
    }

    pub fn invalidated_at(&self, scope_key: &str) -> Option<DateTime<Utc>> {
        self.invalidated.get(scope_key).copied()
    }

    /// True if `scope_key` was invalidated after `fetched_at`, which makes a
    /// snapshot taken at `fetched_at` unsafe to apply.
    pub fn invalidated_since(&self, scope_key: &str, fetched_at: DateTime<Utc>) -> bool {
        self.invalidated_at(scope_key).is_some_and(|at| at > fetched_at)
    }

    fn insert(&mut self, entry: CacheEntry) {
        if self.invalidated_since(&entry.scope_key, entry.fetched_at) {
            return;
        }
        self.entries.insert(entry.scope_key.clone(), entry);
    }

    fn invalidate(&mut self, scope_key: &str, at: DateTime<Utc>) {
        self.entries.remove(scope_key);
        let stamp = self.invalidated.entry(scope_key.to_string()).or_insert(at);
        if *stamp < at {
            *stamp = at;
        }
    }

    /// Fold `other` into `self`: the newest invalidation and the newest entry
    /// per scope win, and entries older than their invalidation are dropped.
    pub fn merge(&mut self, other: &CacheTable) {
        for (key, at) in &other.invalidated {
            self.invalidate(key, *at);
        }
        for entry in other.entries.values() {
            let newer = self
                .entries
                .get(&entry.scope_key)
                .is_none_or(|mine| mine.fetched_at < entry.fetched_at);
            if newer {
                self.insert(entry.clone());
            }
        }
        let invalidated = &self.invalidated;
        self.entries.retain(|key, e| {
            invalidated.get(key).is_none_or(|at| e.fetched_at >= *at)
        });
    }

    /// Drop expired entries and invalidation stamps nobody can race anymore.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|_, e| e.is_fresh(now));
        self.invalidated.retain(|_, at| now - *at < CACHE_TTL);
    }
}

/// A listing together with when it was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub fetched_at: DateTime<Utc>,
    pub listing: Listing,
    pub from_cache: bool,
}

impl Snapshot {
    pub fn annotations(&self) -> &[Annotation] {
        &self.listing.annotations
    }
}

/// TTL-bounded memo of `list_annotations` results, keyed by scope.
pub struct AnnotationCache<K = SystemClock> {
    table: CacheTable,
    clock: K,
}

impl AnnotationCache<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for AnnotationCache<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clock> AnnotationCache<K> {
    pub fn with_clock(clock: K) -> Self {
        Self {
            table: CacheTable::default(),
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn table(&self) -> &CacheTable {
        &self.table
    }

    /// Take in state written by other invocations.
    pub fn absorb(&mut self, table: &CacheTable) {
        self.table.merge(table);
    }

    pub async fn get_or_fetch<F, Fut>(&mut self, scope: &Scope, fetch: F) -> Result<Snapshot, RemoteError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Listing, RemoteError>>,
    {
        let key = scope.key();
        let now = self.clock.now();
        if let Some(entry) = self.table.entry(&key).filter(|e| e.is_fresh(now)) {
            log::debug!("Annotation cache hit for {} (age {}s)", key, (now - entry.fetched_at).num_seconds());
            return Ok(Snapshot {
                fetched_at: entry.fetched_at,
                listing: entry.listing.clone(),
                from_cache: true,
            });
        }

        log::debug!("Annotation cache miss for {}", key);
        let listing = fetch().await?;
        // Stamp with the time the request started so an invalidation that
        // lands while the request is in flight still wins.
        self.table.insert(CacheEntry {
            scope_key: key,
            fetched_at: now,
            listing: listing.clone(),
        });
        Ok(Snapshot {
            fetched_at: now,
            listing,
            from_cache: false,
        })
    }

    pub fn invalidate(&mut self, scope: &Scope) {
        let now = self.clock.now();
        self.table.invalidate(&scope.key(), now);
    }
}
