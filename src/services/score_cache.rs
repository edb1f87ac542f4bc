use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;
use serde::Serialize;
use tracing::debug;

use crate::config::DEFAULT_CACHE_CAPACITY;

/// Memoized scoring functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScoreFunction {
    Compatibility,
    SharedAvailability,
}

impl ScoreFunction {
    pub fn as_str(self) -> &'static str {
        match self {
            ScoreFunction::Compatibility => "compatibility",
            ScoreFunction::SharedAvailability => "shared_availability",
        }
    }
}

/// Cache identity built from the scoring function and the pair it scored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScoreCacheKey {
    function: ScoreFunction,
    therapist_id: String,
    client_id: String,
}

impl ScoreCacheKey {
    pub fn new(
        function: ScoreFunction,
        therapist_id: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            function,
            therapist_id: therapist_id.into(),
            client_id: client_id.into(),
        }
    }

    pub fn compatibility(therapist_id: &str, client_id: &str) -> Self {
        Self::new(ScoreFunction::Compatibility, therapist_id, client_id)
    }

    pub fn function(&self) -> ScoreFunction {
        self.function
    }

    pub fn therapist_id(&self) -> &str {
        &self.therapist_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl fmt::Display for ScoreCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}_{}",
            self.function.as_str(),
            self.therapist_id,
            self.client_id
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Process-local memo of pair scores. Entries live until `clear` or until LRU
/// eviction at capacity; there is no time-based expiry.
pub struct ScoreCache {
    entries: Mutex<LruCache<ScoreCacheKey, f64>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ScoreCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .or(NonZeroUsize::new(DEFAULT_CACHE_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &ScoreCacheKey) -> Option<f64> {
        let found = self.lock().get(key).copied();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn insert(&self, key: ScoreCacheKey, value: f64) {
        self.lock().put(key, value);
    }

    /// Returns the cached value or computes, stores and returns it. The
    /// computation runs outside the lock; when two workers race on one key
    /// the first stored value wins.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: &ScoreCacheKey,
        compute: impl FnOnce() -> Result<f64, E>,
    ) -> Result<f64, E> {
        if let Some(value) = self.get(key) {
            debug!(target: "engine::cache", cache_key = %key, "cache hit");
            return Ok(value);
        }

        let computed = compute()?;
        let mut entries = self.lock();
        let value = *entries.get_or_insert(key.clone(), || computed);
        debug!(target: "engine::cache", cache_key = %key, "cached score");
        Ok(value)
    }

    /// Drops every entry and resets the counters; returns how many entries
    /// were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let removed = entries.len();
        entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        debug!(target: "engine::cache", removed, "score cache cleared");
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<ScoreCacheKey, f64>> {
        // A panic while holding the lock cannot leave a half-written f64.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ScoreCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl fmt::Debug for ScoreCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScoreCache").field("stats", &self.stats()).finish()
    }
}
