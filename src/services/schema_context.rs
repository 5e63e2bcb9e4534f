// Schema Context Coordinator
//
// Serves budgeted schema descriptions from the cache and runs at most one
// discovery per database identity. Discoveries run in spawned tasks shared by
// every waiter, so a caller giving up never cancels work others depend on.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::SchemaError;
use crate::models::{DatabaseIdentity, SchemaDescription};
use crate::services::budget::{BudgetedDescription, ContextBudgeter};
use crate::services::discovery::SchemaProber;
use crate::services::entry_cache::{CacheStats, EntryCache, EntrySnapshot};
use crate::services::summarizer::{SchemaSummarizer, SemanticEnricher};
use crate::storage::SqliteStorage;

type DiscoveryResult = Result<Arc<SchemaDescription>, SchemaError>;
type SharedDiscovery = Shared<BoxFuture<'static, DiscoveryResult>>;

/// Lifecycle of one database identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaState {
    /// Never requested
    Idle,
    Discovering,
    Ready,
    /// Known, but its description expired, was invalidated or failed
    Stale,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackedIdentity {
    /// Reported through `display`
    #[serde(skip_serializing)]
    pub identity: DatabaseIdentity,
    pub display: String,
    pub state: SchemaState,
    pub age_secs: Option<u64>,
}

/// Discovery runs tagged with the generation that started them
#[derive(Default)]
struct Discoveries {
    pending: HashMap<DatabaseIdentity, (u64, SharedDiscovery)>,
    /// Detached by invalidation but still running; a new run for the same
    /// identity waits for these to finish
    draining: HashMap<DatabaseIdentity, (u64, SharedDiscovery)>,
}

struct ContextInner {
    cache: EntryCache<DatabaseIdentity, Arc<SchemaDescription>>,
    prober: SchemaProber,
    summarizer: SchemaSummarizer,
    enricher: Option<Arc<dyn SemanticEnricher>>,
    budgeter: ContextBudgeter,
    ttl: Duration,
    discoveries: Mutex<Discoveries>,
    /// Recently requested identities, oldest first, at most `known_limit`
    known: Mutex<VecDeque<DatabaseIdentity>>,
    known_limit: usize,
    next_generation: AtomicU64,
}

impl ContextInner {
    fn discoveries(&self) -> MutexGuard<'_, Discoveries> {
        self.discoveries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn known(&self) -> MutexGuard<'_, VecDeque<DatabaseIdentity>> {
        self.known.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn track(&self, identity: &DatabaseIdentity) {
        let mut known = self.known();
        if let Some(position) = known.iter().position(|k| k == identity) {
            known.remove(position);
        }
        known.push_back(identity.clone());
        while known.len() > self.known_limit {
            known.pop_front();
        }
    }

    async fn discover(&self, identity: &DatabaseIdentity) -> DiscoveryResult {
        let facts = self.prober.discover(identity).await.map_err(|e| {
            tracing::error!("Schema discovery for {} failed: {}", identity, e);
            SchemaError::from(e)
        })?;

        let description = self
            .summarizer
            .summarize(identity, &facts, self.enricher.as_deref())
            .await;
        tracing::info!(
            "Schema description for {} ready (enrichment: {:?})",
            identity,
            description.enrichment
        );
        Ok(Arc::new(description))
    }

    /// Body of the spawned discovery task
    ///
    /// Starts only after `previous`, a detached run for the same identity,
    /// has finished. The result is cached only while this run is still the
    /// registered one; an invalidation during discovery leaves the cache
    /// untouched.
    async fn discover_and_store(
        &self,
        identity: DatabaseIdentity,
        generation: u64,
        previous: Option<SharedDiscovery>,
    ) -> DiscoveryResult {
        if let Some(previous) = previous {
            tracing::debug!("Waiting for detached discovery of {} to finish", identity);
            let _ = previous.await;
        }
        let result = self.discover(&identity).await;

        let mut discoveries = self.discoveries();
        let registered = |slots: &HashMap<DatabaseIdentity, (u64, SharedDiscovery)>| {
            slots.get(&identity).map(|(g, _)| *g) == Some(generation)
        };
        if registered(&discoveries.pending) {
            if let Ok(description) = &result {
                self.cache
                    .put(identity.clone(), Arc::clone(description), Some(self.ttl));
            }
            discoveries.pending.remove(&identity);
        } else {
            tracing::debug!("Discarding superseded discovery result for {}", identity);
            if registered(&discoveries.draining) {
                discoveries.draining.remove(&identity);
            }
        }
        result
    }
}

/// Coordinator in front of the prober, summarizer, cache and budgeter
#[derive(Clone)]
pub struct SchemaContextService {
    inner: Arc<ContextInner>,
}

impl SchemaContextService {
    pub fn new(
        cache: EntryCache<DatabaseIdentity, Arc<SchemaDescription>>,
        prober: SchemaProber,
        summarizer: SchemaSummarizer,
        enricher: Option<Arc<dyn SemanticEnricher>>,
        budgeter: ContextBudgeter,
    ) -> Self {
        let ttl = cache.default_ttl();
        let known_limit = cache.capacity();
        Self {
            inner: Arc::new(ContextInner {
                cache,
                prober,
                summarizer,
                enricher,
                budgeter,
                ttl,
                discoveries: Mutex::new(Discoveries::default()),
                known: Mutex::new(VecDeque::new()),
                known_limit,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Budgeted schema description for `identity`
    ///
    /// Served from the cache when fresh, otherwise produced by a discovery
    /// shared with any concurrent caller. `force_refresh` bypasses the cache
    /// but still joins a discovery already in flight.
    pub async fn get_context(
        &self,
        identity: &DatabaseIdentity,
        max_size: usize,
        force_refresh: bool,
    ) -> Result<BudgetedDescription, SchemaError> {
        self.inner.track(identity);

        let cached = if force_refresh {
            None
        } else {
            self.inner.cache.get(identity)
        };

        let description = match cached {
            Some(description) => {
                tracing::debug!("Schema cache hit for {}", identity);
                description
            }
            None => {
                tracing::debug!("Schema cache miss for {} (forced: {})", identity, force_refresh);
                self.join_or_start(identity, force_refresh).await?
            }
        };

        self.inner.budgeter.fit(&description, max_size)
    }

    fn join_or_start(&self, identity: &DatabaseIdentity, force_refresh: bool) -> SharedDiscovery {
        let mut discoveries = self.inner.discoveries();
        if let Some((_, discovery)) = discoveries.pending.get(identity) {
            tracing::debug!("Joining in-flight discovery for {}", identity);
            return discovery.clone();
        }

        // A discovery may have completed between the cache miss and taking
        // the pending lock.
        if !force_refresh && self.inner.cache.contains_fresh(identity) {
            if let Some(description) = self.inner.cache.get(identity) {
                return futures::future::ready(Ok(description)).boxed().shared();
            }
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let previous = discoveries
            .draining
            .get(identity)
            .map(|(_, discovery)| discovery.clone());
        let inner = Arc::clone(&self.inner);
        let task_identity = identity.clone();
        let handle = tokio::spawn(async move {
            inner
                .discover_and_store(task_identity, generation, previous)
                .await
        });

        let discovery = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(SchemaError::Unavailable(format!("discovery task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        discoveries
            .pending
            .insert(identity.clone(), (generation, discovery.clone()));
        discovery
    }

    /// Drop the cached description; the next request rediscovers
    ///
    /// A discovery in flight is detached: its waiters still get its result,
    /// but it is not cached, and the next discovery for the identity starts
    /// once it has finished.
    pub fn invalidate(&self, identity: &DatabaseIdentity) -> bool {
        let detached = {
            let mut discoveries = self.inner.discoveries();
            match discoveries.pending.remove(identity) {
                Some(run) => {
                    discoveries.draining.insert(identity.clone(), run);
                    true
                }
                None => false,
            }
        };
        let removed = self.inner.cache.invalidate(identity);
        if removed || detached {
            self.inner.track(identity);
        }
        tracing::info!(
            "Invalidated schema for {} (cached: {}, in flight: {})",
            identity,
            removed,
            detached
        );
        removed || detached
    }

    /// Drop every cached description and detach every discovery in flight
    pub fn invalidate_all(&self) -> usize {
        let detached = {
            let mut discoveries = self.inner.discoveries();
            let pending = std::mem::take(&mut discoveries.pending);
            let count = pending.len();
            discoveries.draining.extend(pending);
            count
        };
        let cleared = self.inner.cache.clear();
        tracing::info!(
            "Invalidated all schemas ({} cached, {} in flight)",
            cleared,
            detached
        );
        cleared + detached
    }

    pub fn state(&self, identity: &DatabaseIdentity) -> SchemaState {
        if self.inner.discoveries().pending.contains_key(identity) {
            SchemaState::Discovering
        } else if self.inner.cache.contains_fresh(identity) {
            SchemaState::Ready
        } else if self.inner.cache.status(identity).is_some()
            || self.inner.known().contains(identity)
        {
            SchemaState::Stale
        } else {
            SchemaState::Idle
        }
    }

    /// Cached, in-flight and recently requested identities, sorted
    pub fn tracked_identities(&self) -> Vec<TrackedIdentity> {
        let mut identities: BTreeSet<DatabaseIdentity> =
            self.inner.known().iter().cloned().collect();
        identities.extend(self.inner.discoveries().pending.keys().cloned());
        identities.extend(self.inner.cache.entries().into_iter().map(|entry| entry.key));

        identities
            .into_iter()
            .map(|identity| TrackedIdentity {
                display: identity.to_string(),
                state: self.state(&identity),
                age_secs: self.inner.cache.status(&identity).map(|s| s.age.as_secs()),
                identity,
            })
            .collect()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn cache_entries(&self) -> Vec<EntrySnapshot<DatabaseIdentity>> {
        self.inner.cache.entries()
    }

    /// Drop expired cache entries
    pub fn sweep(&self) -> usize {
        self.inner.cache.sweep()
    }

    /// Write the fresh cache entries to `storage`
    pub async fn persist(&self, storage: &SqliteStorage) -> rusqlite::Result<usize> {
        let entries: Vec<_> = self
            .inner
            .cache
            .export()
            .into_iter()
            .map(|entry| crate::services::entry_cache::PersistedEntry {
                key: entry.key,
                value: entry.value.as_ref().clone(),
                inserted_at: entry.inserted_at,
                ttl_ms: entry.ttl_ms,
                last_accessed: entry.last_accessed,
            })
            .collect();
        let saved = storage.save_entries(&entries).await?;
        tracing::info!("Persisted {} schema descriptions", saved);
        Ok(saved)
    }

    /// Load persisted descriptions; they expire at their original time
    pub async fn restore(&self, storage: &SqliteStorage) -> rusqlite::Result<usize> {
        let loaded = storage.load_entries().await?;
        let entries: Vec<_> = loaded
            .into_iter()
            .map(|entry| crate::services::entry_cache::PersistedEntry {
                key: entry.key,
                value: Arc::new(entry.value),
                inserted_at: entry.inserted_at,
                ttl_ms: entry.ttl_ms,
                last_accessed: entry.last_accessed,
            })
            .collect();

        for entry in &entries {
            self.inner.track(&entry.key);
        }
        Ok(self.inner.cache.restore(entries))
    }

    /// Identities whose cached description is older than `age`
    pub fn identities_older_than(&self, age: Duration) -> Vec<DatabaseIdentity> {
        self.inner
            .cache
            .entries()
            .into_iter()
            .filter(|entry| !entry.expired && entry.age_secs >= age.as_secs())
            .map(|entry| entry.key)
            .collect()
    }
}
