// Entry Cache
//
// Generic key-value store combining LRU eviction with TTL expiration.
// Holds schema descriptions keyed by database identity, but knows nothing
// about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::clock::{elapsed_between, to_chrono, Clock, SystemClock};

/// Cached value with expiry and recency metadata
///
/// Recency and access bookkeeping are atomics so a hit only needs the
/// shared read lock.
#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
    ttl: Duration,
    /// Last access as milliseconds since the epoch
    last_accessed_ms: AtomicI64,
    /// Monotonic token, higher is more recent
    recency: AtomicU64,
    access_count: AtomicU64,
}

impl<V> CacheEntry<V> {
    fn new(value: V, now: DateTime<Utc>, ttl: Duration, token: u64) -> Self {
        Self {
            value,
            inserted_at: now,
            ttl,
            last_accessed_ms: AtomicI64::new(now.timestamp_millis()),
            recency: AtomicU64::new(token),
            access_count: AtomicU64::new(0),
        }
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.inserted_at
            .checked_add_signed(to_chrono(self.ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    fn touch(&self, now: DateTime<Utc>, token: u64) {
        self.recency.fetch_max(token, Ordering::AcqRel);
        self.last_accessed_ms
            .fetch_max(now.timestamp_millis(), Ordering::AcqRel);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    fn recency(&self) -> u64 {
        self.recency.load(Ordering::Acquire)
    }

    fn last_accessed(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_accessed_ms.load(Ordering::Acquire))
            .unwrap_or(self.inserted_at)
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    insertions: AtomicU64,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses, expired reads included
    pub misses: u64,
    /// Entries removed to respect capacity
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    pub insertions: u64,
    /// Current number of entries
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Read-only view of one entry for operational tooling
#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot<K> {
    pub key: K,
    pub inserted_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub age_secs: u64,
    pub ttl_secs: u64,
    pub remaining_secs: u64,
    pub access_count: u64,
    pub expired: bool,
}

/// Age and freshness of an entry, read without touching recency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStatus {
    pub age: Duration,
    pub expired: bool,
}

/// Entry in its durable form
///
/// Keeps the original insertion time and TTL so a restored entry expires
/// when it would have without the restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry<K, V> {
    pub key: K,
    pub value: V,
    pub inserted_at: DateTime<Utc>,
    pub ttl_ms: u64,
    pub last_accessed: DateTime<Utc>,
}

/// Thread-safe cache with LRU eviction and TTL expiration
///
/// Features:
/// - Lazy expiry on `get`, proactive expiry with `sweep`
/// - Never holds more than `capacity` entries
/// - Hits share a read lock; inserts, evictions and expirations take the
///   write lock, so every operation is atomic with respect to the others
/// - Hit/miss/eviction statistics
pub struct EntryCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    capacity: usize,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    next_token: AtomicU64,
    counters: CacheCounters,
}

impl<K, V> EntryCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache using the system clock
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of entries (at least 1)
    /// * `default_ttl` - TTL applied when `put` is given none
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self::with_clock(capacity, default_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            default_ttl,
            clock,
            next_token: AtomicU64::new(1),
            counters: CacheCounters::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    fn token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::AcqRel)
    }

    /// Get a value if present and not expired
    ///
    /// A hit marks the entry as most recently used. An expired entry is
    /// removed and counted as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        {
            let entries = self.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    entry.touch(now, self.token());
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Expired under the read lock; re-check under the write lock since a
        // concurrent put may have replaced it.
        let mut entries = self.write();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.touch(now, self.token());
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Cache entry expired on access");
                None
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace a value
    ///
    /// Resets the entry's TTL and recency. When the key is new and the cache
    /// is full, least recently used entries are evicted one at a time until
    /// there is room.
    pub fn put(&self, key: K, value: V, ttl: Option<Duration>) {
        let now = self.clock.now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut entries = self.write();

        if !entries.contains_key(&key) {
            while entries.len() >= self.capacity {
                if !self.evict_lru(&mut entries) {
                    break;
                }
            }
        }

        entries.insert(key, CacheEntry::new(value, now, ttl, self.token()));
        self.counters.insertions.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Cached entry (cache size: {})", entries.len());
    }

    /// Evict the least recently used entry
    fn evict_lru(&self, entries: &mut HashMap<K, CacheEntry<V>>) -> bool {
        let victim = entries
            .iter()
            .min_by_key(|(_, entry)| entry.recency())
            .map(|(key, _)| key.clone());

        match victim {
            Some(key) => {
                entries.remove(&key);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Evicted least recently used cache entry");
                true
            }
            None => false,
        }
    }

    /// Remove an entry; returns whether it was present
    pub fn invalidate(&self, key: &K) -> bool {
        self.write().remove(key).is_some()
    }

    /// Remove all expired entries, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();

        if removed > 0 {
            self.counters
                .expirations
                .fetch_add(removed as u64, Ordering::Relaxed);
            tracing::info!("Swept {} expired cache entries", removed);
        }
        removed
    }

    /// Clear all cache entries, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut entries = self.write();
        let count = entries.len();
        entries.clear();
        tracing::info!("Cleared {} cache entries", count);
        count
    }

    /// Current number of entries, expired ones not yet removed included
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age and freshness of an entry without counting a hit or touching recency
    pub fn status(&self, key: &K) -> Option<EntryStatus> {
        let now = self.clock.now();
        self.read().get(key).map(|entry| EntryStatus {
            age: elapsed_between(entry.inserted_at, now),
            expired: entry.is_expired(now),
        })
    }

    /// Whether a non-expired entry exists; no hit is counted
    pub fn contains_fresh(&self, key: &K) -> bool {
        self.status(key).is_some_and(|status| !status.expired)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            insertions: self.counters.insertions.load(Ordering::Relaxed),
            entries: self.len(),
            capacity: self.capacity,
        }
    }

    /// Snapshot of all entries, most recently used first
    pub fn entries(&self) -> Vec<EntrySnapshot<K>> {
        let now = self.clock.now();
        let entries = self.read();
        let mut snapshots: Vec<(u64, EntrySnapshot<K>)> = entries
            .iter()
            .map(|(key, entry)| {
                let remaining = elapsed_between(now, entry.expires_at());
                (
                    entry.recency(),
                    EntrySnapshot {
                        key: key.clone(),
                        inserted_at: entry.inserted_at,
                        last_accessed: entry.last_accessed(),
                        age_secs: elapsed_between(entry.inserted_at, now).as_secs(),
                        ttl_secs: entry.ttl.as_secs(),
                        remaining_secs: remaining.as_secs(),
                        access_count: entry.access_count.load(Ordering::Relaxed),
                        expired: entry.is_expired(now),
                    },
                )
            })
            .collect();
        snapshots.sort_by(|a, b| b.0.cmp(&a.0));
        snapshots.into_iter().map(|(_, snapshot)| snapshot).collect()
    }

    /// Fresh entries in durable form, least recently used first
    pub fn export(&self) -> Vec<PersistedEntry<K, V>> {
        let now = self.clock.now();
        let entries = self.read();
        let mut exported: Vec<(u64, PersistedEntry<K, V>)> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| {
                (
                    entry.recency(),
                    PersistedEntry {
                        key: key.clone(),
                        value: entry.value.clone(),
                        inserted_at: entry.inserted_at,
                        ttl_ms: entry.ttl.as_millis() as u64,
                        last_accessed: entry.last_accessed(),
                    },
                )
            })
            .collect();
        exported.sort_by_key(|(recency, _)| *recency);
        exported.into_iter().map(|(_, entry)| entry).collect()
    }

    /// Load persisted entries, keeping their original insertion time and TTL
    ///
    /// Entries already expired are skipped. Entries are inserted in
    /// last-access order so recency survives the round trip; capacity is
    /// enforced as for `put`. Returns the number restored.
    pub fn restore(&self, persisted: Vec<PersistedEntry<K, V>>) -> usize {
        let now = self.clock.now();
        let mut persisted = persisted;
        persisted.sort_by_key(|entry| entry.last_accessed);

        let mut entries = self.write();
        let mut restored = 0;
        for item in persisted {
            let entry = CacheEntry {
                value: item.value,
                inserted_at: item.inserted_at,
                ttl: Duration::from_millis(item.ttl_ms),
                last_accessed_ms: AtomicI64::new(item.last_accessed.timestamp_millis()),
                recency: AtomicU64::new(self.token()),
                access_count: AtomicU64::new(0),
            };
            if entry.is_expired(now) {
                continue;
            }
            if !entries.contains_key(&item.key) {
                while entries.len() >= self.capacity {
                    if !self.evict_lru(&mut entries) {
                        break;
                    }
                }
            }
            entries.insert(item.key, entry);
            restored += 1;
        }

        if restored > 0 {
            tracing::info!("Restored {} cache entries", restored);
        }
        restored
    }
}
