//! Constraint result cache.
//!
//! Memoizes `(schedule, constraint, slot) -> result` with lazy TTL expiry and strict LRU
//! eviction. All bookkeeping (entries, recency index, per-constraint index and
//! counters) sits behind one mutex so concurrent `get`/`set` calls from the
//! evaluation pool update recency and size atomically.

use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::CacheConfig;
use crate::models::{ConstraintResult, ScheduleFingerprint, ScheduleSlot, UnifiedConstraint};

/// Deterministic key over the schedule's content, constraint identity
/// (id + version) and every slot field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(u64);

impl CacheKey {
    pub fn new(
        schedule: ScheduleFingerprint,
        constraint: &UnifiedConstraint,
        slot: &ScheduleSlot,
    ) -> Self {
        let mut hasher = FxHasher::default();
        schedule.hash(&mut hasher);
        constraint.id.hash(&mut hasher);
        constraint.metadata.version.hash(&mut hasher);
        slot.hash(&mut hasher);
        Self(hasher.finish())
    }
}

struct CacheEntry {
    constraint_id: String,
    result: ConstraintResult,
    /// `None` when the TTL is too large to represent; the entry never expires.
    expires_at: Option<Instant>,
    /// Logical access time; also the entry's key in the recency index.
    last_access: u64,
}

#[derive(Default)]
struct CacheState {
    entries: FxHashMap<CacheKey, CacheEntry>,
    /// Access tick -> key, oldest first.
    recency: BTreeMap<u64, CacheKey>,
    by_constraint: FxHashMap<String, FxHashSet<CacheKey>>,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, key: CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(&key)?;
        self.recency.remove(&entry.last_access);
        if let Some(keys) = self.by_constraint.get_mut(&entry.constraint_id) {
            keys.remove(&key);
            if keys.is_empty() {
                self.by_constraint.remove(&entry.constraint_id);
            }
        }
        Some(entry)
    }

    fn evict_lru(&mut self) -> bool {
        let Some(key) = self.recency.values().next().copied() else {
            return false;
        };
        self.remove(key);
        self.evictions += 1;
        true
    }

    fn lookup(&mut self, key: CacheKey, now: Instant) -> Option<ConstraintResult> {
        let expired = match self.entries.get(&key) {
            None => {
                self.misses += 1;
                return None;
            }
            Some(entry) => entry.expires_at.is_some_and(|at| now >= at),
        };
        if expired {
            self.remove(key);
            self.expirations += 1;
            self.misses += 1;
            return None;
        }

        let tick = self.tick();
        let entry = self.entries.get_mut(&key)?;
        self.recency.remove(&entry.last_access);
        entry.last_access = tick;
        self.recency.insert(tick, key);
        self.hits += 1;
        Some(entry.result.clone())
    }

    fn insert(
        &mut self,
        key: CacheKey,
        constraint_id: &str,
        result: ConstraintResult,
        expires_at: Option<Instant>,
        max_size: usize,
    ) {
        if max_size == 0 {
            return;
        }
        // Replacing an entry counts as an access, not an insertion
        self.remove(key);
        while self.entries.len() >= max_size {
            if !self.evict_lru() {
                break;
            }
        }
        let tick = self.tick();
        self.recency.insert(tick, key);
        self.by_constraint
            .entry(constraint_id.to_string())
            .or_default()
            .insert(key);
        self.entries.insert(
            key,
            CacheEntry {
                constraint_id: constraint_id.to_string(),
                result,
                expires_at,
                last_access: tick,
            },
        );
    }
}

/// Counters and sizing of the cache.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
    pub max_size: usize,
    /// hits / (hits + misses), 0.0 before any lookup.
    pub hit_rate: f64,
}

/// Thread-safe constraint result cache.
pub struct ConstraintCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl ConstraintCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        // Bookkeeping stays consistent even if a holder panicked mid-lookup
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a cached result. Expired entries are dropped and reported absent.
    pub fn get(
        &self,
        schedule: ScheduleFingerprint,
        constraint: &UnifiedConstraint,
        slot: &ScheduleSlot,
    ) -> Option<ConstraintResult> {
        let key = CacheKey::new(schedule, constraint, slot);
        self.state().lookup(key, Instant::now())
    }

    /// Store a result with the default TTL.
    pub fn set(
        &self,
        schedule: ScheduleFingerprint,
        constraint: &UnifiedConstraint,
        slot: &ScheduleSlot,
        result: ConstraintResult,
    ) {
        self.set_with_ttl(schedule, constraint, slot, result, self.config.default_ttl);
    }

    pub fn set_with_ttl(
        &self,
        schedule: ScheduleFingerprint,
        constraint: &UnifiedConstraint,
        slot: &ScheduleSlot,
        result: ConstraintResult,
        ttl: Duration,
    ) {
        let key = CacheKey::new(schedule, constraint, slot);
        let expires_at = Instant::now().checked_add(ttl);
        self.state()
            .insert(key, &constraint.id, result, expires_at, self.config.max_size);
    }

    /// Drop every entry of a constraint. Returns the number of entries removed.
    pub fn invalidate(&self, constraint_id: &str) -> usize {
        let mut state = self.state();
        let keys: Vec<CacheKey> = state
            .by_constraint
            .get(constraint_id)
            .map(|keys| keys.iter().copied().collect())
            .unwrap_or_default();
        for key in &keys {
            state.remove(*key);
        }
        keys.len()
    }

    /// Remove all entries. Counters are kept.
    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.recency.clear();
        state.by_constraint.clear();
    }

    /// Look up many pairs under a single lock; absent entries are `None`, in order.
    pub fn get_multiple(
        &self,
        schedule: ScheduleFingerprint,
        pairs: &[(&UnifiedConstraint, &ScheduleSlot)],
    ) -> Vec<Option<ConstraintResult>> {
        let now = Instant::now();
        let mut state = self.state();
        pairs
            .iter()
            .map(|(constraint, slot)| state.lookup(CacheKey::new(schedule, constraint, slot), now))
            .collect()
    }

    /// Bulk pre-population with the default TTL. Returns the number of entries stored.
    pub fn warm_up<'a, I>(&self, schedule: ScheduleFingerprint, entries: I) -> usize
    where
        I: IntoIterator<Item = (&'a UnifiedConstraint, &'a ScheduleSlot, ConstraintResult)>,
    {
        let expires_at = Instant::now().checked_add(self.config.default_ttl);
        let mut state = self.state();
        let mut stored = 0;
        for (constraint, slot, result) in entries {
            let key = CacheKey::new(schedule, constraint, slot);
            state.insert(key, &constraint.id, result, expires_at, self.config.max_size);
            stored += 1;
        }
        stored
    }

    /// Proactively evict the least recently used share of entries.
    ///
    /// Returns the number of entries evicted.
    pub fn handle_memory_pressure(&self) -> usize {
        let mut state = self.state();
        let ratio = self.config.pressure_eviction_ratio.clamp(0.0, 1.0);
        let target = (state.entries.len() as f64 * ratio).ceil() as usize;
        let mut evicted = 0;
        while evicted < target && state.evict_lru() {
            evicted += 1;
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        let lookups = state.hits + state.misses;
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations,
            size: state.entries.len(),
            max_size: self.config.max_size,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        }
    }

    /// Zero the hit/miss/eviction counters.
    pub fn reset_stats(&self) {
        let mut state = self.state();
        state.hits = 0;
        state.misses = 0;
        state.evictions = 0;
        state.expirations = 0;
    }
}

impl Default for ConstraintCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
