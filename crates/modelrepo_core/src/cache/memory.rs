//! In-process cache pool.
//!
//! # Responsibility
//! - Store cache payloads in a concurrent map shared by many loaders.
//! - Expire entries after an optional TTL and count hits/misses.
//!
//! # Invariants
//! - Expired entries are reported as misses and removed lazily.
//! - Concurrent saves to one key are last-write-wins.

use super::{validate_key, CacheItem, CachePool, CacheResult};
use dashmap::DashMap;
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: String,
    stored_at: Instant,
}

/// Hit/miss counters for one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub saves: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// `CachePool` backed by a `DashMap`.
#[derive(Debug, Default)]
pub struct MemoryCachePool {
    entries: DashMap<String, CacheEntry>,
    ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    saves: AtomicU64,
}

impl MemoryCachePool {
    /// Creates a pool whose entries never expire.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
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
            saves: self.saves.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        self.ttl
            .is_some_and(|ttl| entry.stored_at.elapsed() > ttl)
    }
}

impl CachePool for MemoryCachePool {
    fn get_item(&self, key: &str) -> CacheResult<CacheItem> {
        validate_key(key)?;

        let payload = match self.entries.get(key) {
            Some(entry) if !self.is_expired(&entry) => Some(entry.payload.clone()),
            Some(_) => None,
            None => None,
        };

        match payload {
            Some(payload) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(CacheItem::hit(key, payload))
            }
            None => {
                // Drop any expired entry; the map guard above is released.
                self.entries
                    .remove_if(key, |_, entry| self.is_expired(entry));
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(CacheItem::miss(key))
            }
        }
    }

    fn save(&self, item: CacheItem) -> CacheResult<()> {
        validate_key(item.key())?;

        let Some(payload) = item.get() else {
            debug!(
                "event=cache_save module=cache status=skipped reason=empty_item key={}",
                item.key()
            );
            return Ok(());
        };

        self.entries.insert(
            item.key().to_string(),
            CacheEntry {
                payload: payload.to_string(),
                stored_at: Instant::now(),
            },
        );
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn delete_item(&self, key: &str) -> CacheResult<bool> {
        validate_key(key)?;
        Ok(self.entries.remove(key).is_some())
    }

    fn clear(&self) -> CacheResult<()> {
        self.entries.clear();
        Ok(())
    }
}
