//! Signature-keyed pool registry and configuration
//!
//! One pool per call signature, created on first use. The registry holds
//! its entries weakly — a signature nobody else references is purged, and
//! a pool nobody references is recreated on next lookup — plus a bounded
//! LRU of strong references so recently used pools survive even when no
//! consumer happens to hold them. Overflowing the LRU evicts the least
//! recently used pool, the explicit stand-in for eviction under memory
//! pressure; outstanding handles are unaffected because they pin their
//! magazines, not the pool.
//!
//! The registry is an ordinary value constructed once at startup with its
//! backend and passed by reference to call sites.

use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};

use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::pool::CallbackPool;
use crate::signature::{CallSignature, SignatureId};
use crate::trampoline::TrampolineBackend;

const DEFAULT_MAGAZINE_CAPACITY: usize = 200;
const DEFAULT_MAX_CACHED_POOLS: usize = 64;

/// Tuning knobs for a [`PoolRegistry`]
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Slots per magazine
    pub magazine_capacity: usize,
    /// Pools kept alive by the registry's strong cache
    pub max_cached_pools: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            magazine_capacity: DEFAULT_MAGAZINE_CAPACITY,
            max_cached_pools: DEFAULT_MAX_CACHED_POOLS,
        }
    }
}

struct PoolEntry {
    signature: Weak<CallSignature>,
    pool: Weak<CallbackPool>,
}

struct RegistryState {
    entries: FxHashMap<SignatureId, PoolEntry>,
    // Strong level: recently used pools stay alive without a consumer.
    recent: LruCache<SignatureId, Arc<CallbackPool>>,
}

/// Maps call signatures to their pools
pub struct PoolRegistry {
    backend: Arc<dyn TrampolineBackend>,
    config: PoolConfig,
    state: Mutex<RegistryState>,
}

impl PoolRegistry {
    /// Create a registry with default configuration
    pub fn new(backend: Arc<dyn TrampolineBackend>) -> Self {
        Self::with_config(backend, PoolConfig::default())
    }

    /// Create a registry with explicit configuration
    pub fn with_config(backend: Arc<dyn TrampolineBackend>, config: PoolConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_cached_pools).unwrap_or(NonZeroUsize::MIN);
        PoolRegistry {
            backend,
            config,
            state: Mutex::new(RegistryState {
                entries: FxHashMap::default(),
                recent: LruCache::new(cap),
            }),
        }
    }

    /// Look up the pool for `signature`, creating it if none is live.
    ///
    /// Guarded by one mutex over the whole map, so two pools are never
    /// created for the same signature concurrently. The mutex is separate
    /// from every pool's own lock.
    pub fn get_or_create_pool(&self, signature: &Arc<CallSignature>) -> Arc<CallbackPool> {
        let evicted;
        let pool;
        {
            let mut state = self.state.lock();
            state
                .entries
                .retain(|_, entry| entry.signature.strong_count() > 0);
            pool = match state
                .entries
                .get(&signature.id())
                .and_then(|entry| entry.pool.upgrade())
            {
                Some(existing) => existing,
                None => {
                    let created = CallbackPool::new(
                        signature.clone(),
                        self.backend.clone(),
                        self.config.magazine_capacity,
                    );
                    state.entries.insert(
                        signature.id(),
                        PoolEntry {
                            signature: Arc::downgrade(signature),
                            pool: Arc::downgrade(&created),
                        },
                    );
                    created
                }
            };
            // Dropping an evicted pool can release native resources; keep
            // that outside the registry lock.
            evicted = state.recent.push(signature.id(), pool.clone());
        }
        drop(evicted);
        pool
    }

    /// Number of signatures with a live pool
    pub fn pool_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .values()
            .filter(|entry| entry.pool.strong_count() > 0)
            .count()
    }

    /// The configuration this registry was built with
    pub fn config(&self) -> PoolConfig {
        self.config
    }
}
