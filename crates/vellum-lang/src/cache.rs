//! Compiled template cache.
//!
//! Entries are keyed by source hash and stamped with the compiler version
//! that produced them. The cache never compiles: callers resolve a miss by
//! compiling and calling [`TemplateCache::put`]. Concurrent misses on the
//! same key may both insert; the last write wins.
use crate::compiler::{CompiledTemplate, CompilerVersion};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    template: Arc<CompiledTemplate>,
    inserted_at: Instant,
    last_access: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

fn pack(version: CompilerVersion) -> u64 {
    (u64::from(version.compiler) << 32)
        | (u64::from(version.registry) << 16)
        | u64::from(version.rules)
}

#[derive(Debug)]
pub struct TemplateCache {
    entries: DashMap<String, Entry>,
    capacity: usize,
    ttl: Option<Duration>,
    version: AtomicU64,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TemplateCache {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity),
            capacity,
            ttl,
            version: AtomicU64::new(pack(CompilerVersion::CURRENT)),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn is_expired(&self, entry: &Entry) -> bool {
        self.ttl
            .is_some_and(|ttl| entry.inserted_at.elapsed() >= ttl)
    }

    /// Returns the entry only if it was compiled by `version` and has not
    /// expired. Stale entries are dropped on the way out.
    pub fn get(&self, source_hash: &str, version: CompilerVersion) -> Option<Arc<CompiledTemplate>> {
        let stale = match self.entries.get(source_hash) {
            None => false,
            Some(entry) if entry.template.compiler_version() != version => true,
            Some(entry) if self.is_expired(&entry) => true,
            Some(entry) => {
                entry.last_access.store(self.tick(), Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(source_hash, "template cache hit");
                return Some(Arc::clone(&entry.template));
            }
        };

        if stale && self.entries.remove(source_hash).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(source_hash, stale, "template cache miss");
        None
    }

    /// Stores a compiled template. Writing a template from a different
    /// compiler version first empties the cache.
    pub fn put(&self, template: Arc<CompiledTemplate>) {
        let version = template.compiler_version();
        let previous = self.version.swap(pack(version), Ordering::AcqRel);

        if previous != pack(version) {
            let dropped = self.entries.len();
            self.entries.clear();
            self.evictions.fetch_add(dropped as u64, Ordering::Relaxed);
            tracing::info!(%version, dropped, "compiler version changed, template cache cleared");
        }

        if self.capacity == 0 {
            return;
        }

        let key = template.source_hash().to_string();
        while self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            if !self.evict_least_recent() {
                break;
            }
        }

        self.entries.insert(
            key,
            Entry {
                template,
                inserted_at: Instant::now(),
                last_access: AtomicU64::new(self.tick()),
            },
        );
    }

    fn evict_least_recent(&self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.last_access.load(Ordering::Relaxed))
            .map(|entry| entry.key().clone());

        match oldest {
            Some(key) => {
                let removed = self.entries.remove(&key).is_some();
                if removed {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(source_hash = %key, "template cache evicted");
                }
                removed
            }
            None => false,
        }
    }

    /// Drops the entry for a source that was edited.
    pub fn invalidate(&self, source_hash: &str) -> bool {
        self.entries.remove(source_hash).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.entries.len(),
            capacity: self.capacity,
        }
    }
}
