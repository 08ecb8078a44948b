//! De-duplicating future cache
//!
//! Every cache tier of the engine (raster handles, metadata, decoded tiles) is a
//! [`FutureCache`]: an LRU map from key to a *shared in-flight computation*
//! rather than to a finished value. The first caller for a key spawns the
//! producer and stores its shared future immediately; every later caller for
//! the same key, including those arriving while the producer is still running,
//! awaits that same future. N concurrent identical requests therefore trigger
//! exactly one production.
//!
//! Entries are bounded by count (least recently used evicted first, a `get`
//! counts as use) and by age (an entry older than the TTL is dropped on the
//! next lookup and produced again).
//!
//! Failed productions are removed as soon as they complete. Callers already
//! awaiting the failed future observe the same error; the next call retries.
//!
//! Producers run as spawned tokio tasks, so a caller abandoning its request
//! never cancels work other waiters depend on.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::config::CacheConfig;
use crate::error::{Result, TileError};

/// A pending-or-resolved production shared by all callers of one key
pub type SharedResult<V> = Shared<BoxFuture<'static, Result<V>>>;

struct Slot<V> {
    future: SharedResult<V>,
    inserted_at: Instant,
    generation: u64,
}

struct State<K, V> {
    entries: LruCache<K, Slot<V>>,
    next_generation: u64,
}

/// LRU + TTL cache of shared futures
pub struct FutureCache<K, V> {
    name: &'static str,
    ttl: Duration,
    capacity: usize,
    state: Arc<Mutex<State<K, V>>>,
}

impl<K, V> FutureCache<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache. `name` only labels log events.
    ///
    /// A zero capacity is raised to one; [`crate::ReaderConfig::validate`]
    /// rejects it before the engine gets here.
    #[must_use]
    pub fn new(name: &'static str, config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            ttl: config.ttl,
            capacity: capacity.get(),
            state: Arc::new(Mutex::new(State {
                entries: LruCache::new(capacity),
                next_generation: 0,
            })),
        }
    }

    /// Return the cached production for `key`, starting `producer` on a miss.
    ///
    /// `producer` is only invoked when no live entry exists; it must build the
    /// future without blocking.
    pub async fn get_or_insert_with<F, Fut>(&self, key: K, producer: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let future = self.lookup_or_start(key, producer);
        future.await
    }

    fn lookup_or_start<F, Fut>(&self, key: K, producer: F) -> SharedResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let mut state = self.lock();
        let now = Instant::now();

        if let Some(slot) = state.entries.get(&key) {
            if now.duration_since(slot.inserted_at) < self.ttl {
                trace!(cache = self.name, ?key, "cache hit");
                return slot.future.clone();
            }
        }
        if state.entries.pop(&key).is_some() {
            trace!(cache = self.name, ?key, "cache entry expired");
        }

        let generation = state.next_generation;
        state.next_generation += 1;

        // The spawned task needs the lock to drop a failed entry, so it cannot
        // observe the map before the slot below is inserted.
        let task = tokio::spawn(produce_and_settle(
            producer(),
            Arc::clone(&self.state),
            key.clone(),
            generation,
            self.name,
        ));

        let cleanup_state = Arc::clone(&self.state);
        let cleanup_key = key.clone();
        let name = self.name;
        let future = async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => {
                    remove_generation(&cleanup_state, &cleanup_key, generation);
                    warn!(cache = name, key = ?cleanup_key, error = %join_error, "producer task aborted");
                    Err(TileError::decode(
                        &format!("{cleanup_key:?}"),
                        format!("producer task failed: {join_error}"),
                    ))
                }
            }
        }
        .boxed()
        .shared();

        trace!(cache = self.name, ?key, "cache miss");
        let slot = Slot {
            future: future.clone(),
            inserted_at: now,
            generation,
        };
        if let Some((evicted, _)) = state.entries.push(key, slot) {
            trace!(cache = self.name, key = ?evicted, "evicted least recently used entry");
        }
        future
    }

    /// True when a live (unexpired) entry exists. Does not count as use.
    pub fn contains(&self, key: &K) -> bool {
        let state = self.lock();
        state
            .entries
            .peek(key)
            .is_some_and(|slot| slot.inserted_at.elapsed() < self.ttl)
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drop every entry older than the TTL, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        self.invalidate_where(|_| true, true)
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.lock().entries.pop(key).is_some()
    }

    /// Drop every entry whose key matches `predicate`
    pub fn invalidate_matching(&self, predicate: impl Fn(&K) -> bool) -> usize {
        self.invalidate_where(predicate, false)
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    fn invalidate_where(&self, predicate: impl Fn(&K) -> bool, expired_only: bool) -> usize {
        let mut state = self.lock();
        let stale: Vec<K> = state
            .entries
            .iter()
            .filter(|(key, slot)| {
                predicate(key) && (!expired_only || slot.inserted_at.elapsed() >= self.ttl)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            state.entries.pop(key);
        }
        stale.len()
    }

    fn lock(&self) -> MutexGuard<'_, State<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn produce_and_settle<K, V, Fut>(
    production: Fut,
    state: Arc<Mutex<State<K, V>>>,
    key: K,
    generation: u64,
    name: &'static str,
) -> Result<V>
where
    K: Hash + Eq + Debug,
    Fut: Future<Output = Result<V>>,
{
    let result = production.await;
    if let Err(error) = &result {
        warn!(cache = name, ?key, kind = error.kind(), %error, "production failed, dropping entry");
        remove_generation(&state, &key, generation);
    }
    result
}

/// Remove `key` only if it still holds the production started as `generation`
fn remove_generation<K: Hash + Eq, V>(state: &Mutex<State<K, V>>, key: &K, generation: u64) {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    if state
        .entries
        .peek(key)
        .is_some_and(|slot| slot.generation == generation)
    {
        state.entries.pop(key);
    }
}
