//! Ownership of server-side objects referenced by opaque handle IDs.
//!
//! Clients never see live objects: they receive a [`HandleId`] and name it in
//! later calls. The registry owns every payload. Each handle carries its own
//! lock, held for the whole of a [`HandleRegistry::with_handle`] closure, so
//! operations on one handle are linearised while different handles proceed
//! in parallel. Destroying a handle that is in use waits for the user to
//! finish.

mod errors;
mod handle;

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{
    Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError,
};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::expiry::Expiry;

pub use self::errors::RegistryError;
pub use self::handle::{HandleId, HandleKind};

pub(crate) const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

type Payload = Box<dyn Any + Send>;

struct HandleSlot {
    kind: HandleKind,
    last_used: Mutex<Instant>,
    payload: Mutex<Option<Payload>>,
}

impl HandleSlot {
    fn new(kind: HandleKind, payload: Payload) -> Self {
        Self {
            kind,
            last_used: Mutex::new(Instant::now()),
            payload: Mutex::new(Some(payload)),
        }
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn last_used(&self) -> Instant {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Point-in-time registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Live handles.
    pub live: usize,
    /// Live handles grouped by kind.
    pub by_kind: BTreeMap<HandleKind, usize>,
    /// Handles created since startup.
    pub created: u64,
    /// Handles destroyed since startup, including sweeps.
    pub destroyed: u64,
}

/// Concurrent map from handle IDs to owned payloads.
#[derive(Default)]
pub struct HandleRegistry {
    slots: RwLock<HashMap<HandleId, Arc<HandleSlot>>>,
    counters: Mutex<(u64, u64)>,
}

impl std::fmt::Debug for HandleRegistry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HandleRegistry")
            .field("live", &self.len())
            .finish()
    }
}

impl HandleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `payload` under a freshly generated ID.
    pub fn create<T>(&self, kind: HandleKind, payload: T) -> HandleId
    where
        T: Any + Send,
    {
        let id = HandleId::generate();
        self.write_slots()
            .insert(id.clone(), Arc::new(HandleSlot::new(kind, Box::new(payload))));
        self.count_created();
        debug!(target: REGISTRY_TARGET, handle = %id, %kind, "handle created");
        id
    }

    /// Builds the payload with `factory` and registers it on success.
    ///
    /// The factory runs before any registry lock is taken.
    pub fn create_with<T, E, F>(&self, kind: HandleKind, factory: F) -> Result<HandleId, E>
    where
        T: Any + Send,
        F: FnOnce() -> Result<T, E>,
    {
        let payload = factory()?;
        Ok(self.create(kind, payload))
    }

    /// Runs `operation` with exclusive access to the payload behind `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] when the handle is absent, has
    /// been destroyed, or holds a different kind or payload type. A handle
    /// whose previous user panicked is destroyed and reported as
    /// [`RegistryError::Poisoned`].
    pub fn with_handle<T, R, F>(
        &self,
        id: &HandleId,
        kind: HandleKind,
        operation: F,
    ) -> Result<R, RegistryError>
    where
        T: Any + Send,
        F: FnOnce(&mut T) -> R,
    {
        let slot = self.lookup(id, kind)?;
        let mut guard = match slot.payload.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let payload = poisoned.into_inner().take();
                self.evict_poisoned(id, &slot, payload);
                return Err(RegistryError::poisoned(id));
            }
        };
        let payload = guard
            .as_mut()
            .and_then(|payload| payload.downcast_mut::<T>())
            .ok_or_else(|| RegistryError::not_found(id, kind))?;
        slot.touch();
        let result = operation(payload);
        slot.touch();
        Ok(result)
    }

    /// Removes the handle and returns its payload.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] when the handle is absent or its
    /// kind or payload type differs; the handle is left untouched then.
    pub fn take<T>(&self, id: &HandleId, kind: HandleKind) -> Result<T, RegistryError>
    where
        T: Any + Send,
    {
        let slot = {
            let mut slots = self.write_slots();
            match slots.get(id) {
                Some(slot) if slot.kind == kind => {}
                _ => return Err(RegistryError::not_found(id, kind)),
            }
            slots
                .remove(id)
                .ok_or_else(|| RegistryError::not_found(id, kind))?
        };
        let mut guard = slot.payload.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(payload) = guard.take() else {
            return Err(RegistryError::not_found(id, kind));
        };
        match payload.downcast::<T>() {
            Ok(payload) => {
                self.count_destroyed(1);
                Ok(*payload)
            }
            Err(payload) => {
                // Type mismatch: put the handle back as it was.
                *guard = Some(payload);
                drop(guard);
                self.write_slots().insert(id.clone(), slot);
                Err(RegistryError::not_found(id, kind))
            }
        }
    }

    /// Destroys the handle, dropping its payload. Returns `false` when nothing
    /// was registered under `id`.
    pub fn destroy(&self, id: &HandleId) -> bool {
        let removed = self.write_slots().remove(id);
        let Some(slot) = removed else {
            return false;
        };
        // Waits for any in-flight user of the handle.
        let payload = slot
            .payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let destroyed = payload.is_some();
        drop(payload);
        if destroyed {
            self.count_destroyed(1);
            debug!(target: REGISTRY_TARGET, handle = %id, kind = %slot.kind, "handle destroyed");
        }
        destroyed
    }

    /// Destroys the handle only when it has the expected kind, including a
    /// poisoned one.
    pub fn destroy_kind(&self, id: &HandleId, kind: HandleKind) -> bool {
        let registered = self
            .read_slots()
            .get(id)
            .is_some_and(|slot| slot.kind == kind);
        registered && self.destroy(id)
    }

    /// Whether a usable handle of `kind` exists under `id`. Poisoned handles
    /// do not count.
    #[must_use]
    pub fn contains(&self, id: &HandleId, kind: HandleKind) -> bool {
        self.read_slots()
            .get(id)
            .is_some_and(|slot| slot.kind == kind && !slot.payload.is_poisoned())
    }

    /// Number of live handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_slots().len()
    }

    /// Whether no handles are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts handles idle for longer than `max_idle`, and every poisoned
    /// handle regardless of age.
    ///
    /// Handles currently in use are skipped. Returns the number evicted.
    pub fn sweep(&self, max_idle: Duration) -> usize {
        let expiry = Expiry::new(max_idle);
        let now = Instant::now();
        let mut evicted = Vec::new();
        {
            let mut slots = self.write_slots();
            slots.retain(|id, slot| {
                let poisoned = slot.payload.is_poisoned();
                if !poisoned && !expiry.is_expired(slot.last_used(), now) {
                    return true;
                }
                let mut guard = match slot.payload.try_lock() {
                    Ok(guard) => guard,
                    Err(TryLockError::Poisoned(guard)) => guard.into_inner(),
                    Err(TryLockError::WouldBlock) => return true,
                };
                if let Some(payload) = guard.take() {
                    debug!(
                        target: REGISTRY_TARGET,
                        handle = %id,
                        kind = %slot.kind,
                        poisoned,
                        "handle swept"
                    );
                    evicted.push(payload);
                }
                false
            });
        }
        let count = evicted.len();
        // Payload destructors run outside the map lock.
        drop(evicted);
        self.count_destroyed(count);
        count
    }

    /// Destroys every handle. Used at shutdown.
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self.write_slots().drain().collect();
        let mut destroyed = 0;
        for (_, slot) in drained {
            let payload = slot
                .payload
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if payload.is_some() {
                destroyed += 1;
            }
        }
        self.count_destroyed(destroyed);
        destroyed
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut by_kind = BTreeMap::new();
        let live = {
            let slots = self.read_slots();
            for slot in slots.values() {
                *by_kind.entry(slot.kind).or_insert(0) += 1;
            }
            slots.len()
        };
        let (created, destroyed) = *self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        RegistryStats {
            live,
            by_kind,
            created,
            destroyed,
        }
    }

    fn lookup(&self, id: &HandleId, kind: HandleKind) -> Result<Arc<HandleSlot>, RegistryError> {
        match self.read_slots().get(id) {
            Some(slot) if slot.kind == kind => Ok(Arc::clone(slot)),
            _ => Err(RegistryError::not_found(id, kind)),
        }
    }

    /// Unregisters `slot` after a user panicked with it locked. The map entry
    /// is only removed while it still points at the same slot.
    fn evict_poisoned(&self, id: &HandleId, slot: &Arc<HandleSlot>, payload: Option<Payload>) {
        {
            let mut slots = self.write_slots();
            if slots.get(id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
                slots.remove(id);
            }
        }
        if payload.is_some() {
            warn!(
                target: REGISTRY_TARGET,
                handle = %id,
                kind = %slot.kind,
                "handle destroyed after a panic during use"
            );
            drop(payload);
            self.count_destroyed(1);
        }
    }

    fn count_created(&self) {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .0 += 1;
    }

    fn count_destroyed(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .1 += u64::try_from(count).unwrap_or(u64::MAX);
    }

    // The map only ever sees single inserts and removes, so a panic while the
    // lock was held cannot leave it half-updated.
    fn read_slots(&self) -> RwLockReadGuard<'_, HashMap<HandleId, Arc<HandleSlot>>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slots(&self) -> RwLockWriteGuard<'_, HashMap<HandleId, Arc<HandleSlot>>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests;
