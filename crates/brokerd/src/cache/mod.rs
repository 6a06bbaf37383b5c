//! Connection cache: get-or-create over the handle registry keyed by a
//! secret-excluding fingerprint.
//!
//! Every fingerprint owns a slot with its own lock. Concurrent callers with
//! the same fingerprint serialise on that slot, so the factory runs at most
//! once; different fingerprints never contend. An entry is reused only while
//! its TTL holds and its handle is still live in the registry.
//!
//! Invalidation empties a slot but leaves it mapped, so a caller already
//! waiting on it and a newcomer still share one lock. Only the maintenance
//! purge unmaps slots, and only ones nobody else holds.

mod fingerprint;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::expiry::Expiry;
use crate::registry::{HandleId, HandleKind, HandleRegistry};

pub use self::fingerprint::{ConnectionSpec, Fingerprint};

const CACHE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::cache");

/// A cached connection.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Key the entry was stored under.
    pub fingerprint: Fingerprint,
    /// Registry handle of the connection.
    pub handle_id: HandleId,
    /// Creation time, the start of the TTL.
    pub created_at: Instant,
}

/// Result of [`ConnectionCache::get_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLookup {
    /// Connection handle to use.
    pub handle_id: HandleId,
    /// `true` when an existing connection was reused.
    pub cached: bool,
}

/// Counters exposed through the admin surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Live entries.
    pub entries: usize,
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that created a connection.
    pub misses: u64,
    /// Entries dropped by invalidation or expiry.
    pub evictions: u64,
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Fingerprint-keyed cache of connection handles.
#[derive(Debug)]
pub struct ConnectionCache {
    registry: Arc<HandleRegistry>,
    expiry: Expiry,
    slots: Mutex<HashMap<Fingerprint, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ConnectionCache {
    /// Creates a cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(registry: Arc<HandleRegistry>, ttl: Duration) -> Self {
        Self {
            registry,
            expiry: Expiry::new(ttl),
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns the cached handle for `fingerprint`, or creates one with
    /// `factory`.
    ///
    /// A stale entry (expired, or whose handle has gone) is replaced; an
    /// expired handle is destroyed first.
    ///
    /// # Errors
    ///
    /// Propagates the factory error; nothing is cached then.
    pub fn get_or_create<E, F>(
        &self,
        fingerprint: &Fingerprint,
        factory: F,
    ) -> Result<CacheLookup, E>
    where
        F: FnOnce() -> Result<HandleId, E>,
    {
        let slot = self.slot(fingerprint);
        let mut entry = lock(&slot);

        if let Some(existing) = entry.as_ref()
            && self.is_usable(existing, Instant::now())
        {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(
                target: CACHE_TARGET,
                fingerprint = %fingerprint,
                handle = %existing.handle_id,
                "cache hit"
            );
            return Ok(CacheLookup {
                handle_id: existing.handle_id.clone(),
                cached: true,
            });
        }
        if let Some(stale) = entry.take() {
            self.retire(&stale);
        }

        let handle_id = factory()?;
        self.misses.fetch_add(1, Ordering::Relaxed);
        *entry = Some(CacheEntry {
            fingerprint: fingerprint.clone(),
            handle_id: handle_id.clone(),
            created_at: Instant::now(),
        });
        debug!(
            target: CACHE_TARGET,
            fingerprint = %fingerprint,
            handle = %handle_id,
            "cache miss; connection stored"
        );
        Ok(CacheLookup {
            handle_id,
            cached: false,
        })
    }

    /// Drops the entry for `fingerprint` and destroys its handle.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        let slot = lock(&self.slots).get(fingerprint).map(Arc::clone);
        let Some(slot) = slot else {
            return false;
        };
        let removed = lock(&slot).take();
        removed.is_some_and(|entry| {
            self.retire(&entry);
            true
        })
    }

    /// Drops whichever entry points at `handle_id` and destroys the handle.
    pub fn invalidate_handle(&self, handle_id: &HandleId) -> bool {
        let slots: Vec<(Fingerprint, Slot)> = lock(&self.slots)
            .iter()
            .map(|(fingerprint, slot)| (fingerprint.clone(), Arc::clone(slot)))
            .collect();
        for (fingerprint, slot) in slots {
            let mut entry = lock(&slot);
            if entry
                .as_ref()
                .is_some_and(|cached| &cached.handle_id == handle_id)
            {
                if let Some(cached) = entry.take() {
                    self.retire(&cached);
                }
                info!(
                    target: CACHE_TARGET,
                    fingerprint = %fingerprint,
                    handle = %handle_id,
                    "cached connection invalidated"
                );
                return true;
            }
        }
        false
    }

    /// Removes expired or orphaned entries. Busy slots are skipped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let slots: Vec<(Fingerprint, Slot)> = lock(&self.slots)
            .iter()
            .map(|(fingerprint, slot)| (fingerprint.clone(), Arc::clone(slot)))
            .collect();
        let mut purged = 0;
        for (fingerprint, slot) in slots {
            let Ok(mut entry) = slot.try_lock() else {
                continue;
            };
            let stale = match entry.as_ref() {
                Some(cached) => !self.is_usable(cached, now),
                None => true,
            };
            if !stale {
                continue;
            }
            if let Some(cached) = entry.take() {
                self.retire(&cached);
                purged += 1;
            }
            self.unmap_if_unshared(&fingerprint, &slot);
        }
        purged
    }

    /// Unmaps an empty slot. Called with the slot locked; a count of two
    /// means only the map and the caller hold it, and nobody can clone it
    /// from the map while the map lock is held.
    fn unmap_if_unshared(&self, fingerprint: &Fingerprint, slot: &Slot) {
        let mut slots = lock(&self.slots);
        if slots
            .get(fingerprint)
            .is_some_and(|mapped| Arc::ptr_eq(mapped, slot))
            && Arc::strong_count(slot) == 2
        {
            slots.remove(fingerprint);
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let slots: Vec<Slot> = lock(&self.slots).values().map(Arc::clone).collect();
        let entries = slots
            .iter()
            .filter(|slot| slot.try_lock().map(|entry| entry.is_some()).unwrap_or(true))
            .count();
        CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn slot(&self, fingerprint: &Fingerprint) -> Slot {
        Arc::clone(
            lock(&self.slots)
                .entry(fingerprint.clone())
                .or_insert_with(|| Arc::new(Mutex::new(None))),
        )
    }

    fn is_usable(&self, entry: &CacheEntry, now: Instant) -> bool {
        !self.expiry.is_expired(entry.created_at, now)
            && self
                .registry
                .contains(&entry.handle_id, HandleKind::Connection)
    }

    fn retire(&self, entry: &CacheEntry) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        if self
            .registry
            .destroy_kind(&entry.handle_id, HandleKind::Connection)
        {
            debug!(
                target: CACHE_TARGET,
                fingerprint = %entry.fingerprint,
                handle = %entry.handle_id,
                "cached connection closed"
            );
        }
    }
}

// Entries are replaced wholesale, never partially mutated.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests;
