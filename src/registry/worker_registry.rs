//! # Worker Registry
//!
//! Concurrency-safe directory of workers keyed by [`WorkerIdentity`]; the single
//! source of truth for whether a worker exists.
//!
//! ## Slots
//!
//! Every identity known to the registry occupies one slot in one of three states:
//!
//! - **Reserved**: admitted by [`WorkerRegistry::reserve`], still being provisioned
//! - **Active**: committed, visible to [`WorkerRegistry::get`]
//! - **Removing**: removal in progress; hidden from lookups but still holding
//!   the identity and a capacity slot
//!
//! Capacity and uniqueness are decided under the same lock, so concurrent
//! admissions can never exceed the configured ceiling or register an identity twice.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::worker::{WorkerHandle, WorkerIdentity};

/// Registry operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Worker already exists: {id}")]
    AlreadyExists { id: String },

    #[error("Worker not found: {id}")]
    NotFound { id: String },

    #[error("Worker capacity of {limit} reached")]
    CapacityExceeded { limit: usize },
}

enum Slot<H> {
    Reserved,
    Active(Arc<H>),
    Removing(Arc<H>),
}

/// Directory of workers with reserve-then-commit admission
pub struct WorkerRegistry<H = WorkerHandle> {
    slots: Mutex<HashMap<WorkerIdentity, Slot<H>>>,
}

impl<H> Default for WorkerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> std::fmt::Debug for WorkerRegistry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("occupied", &self.occupied())
            .field("active", &self.count())
            .finish()
    }
}

impl<H> WorkerRegistry<H> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Register a handle directly, without a capacity check
    pub fn add(&self, identity: WorkerIdentity, handle: H) -> Result<Arc<H>, RegistryError> {
        let mut slots = self.slots.lock();
        if slots.contains_key(&identity) {
            return Err(RegistryError::AlreadyExists {
                id: identity.to_string(),
            });
        }
        let handle = Arc::new(handle);
        slots.insert(identity, Slot::Active(Arc::clone(&handle)));
        Ok(handle)
    }

    /// Admit an identity for provisioning.
    ///
    /// Capacity is checked before uniqueness: at the ceiling every creation
    /// fails with `CapacityExceeded`, duplicates included.
    pub fn reserve(
        &self,
        identity: &WorkerIdentity,
        max_workers: usize,
    ) -> Result<Reservation<'_, H>, RegistryError> {
        let mut slots = self.slots.lock();
        if slots.len() + 1 > max_workers {
            return Err(RegistryError::CapacityExceeded { limit: max_workers });
        }
        if slots.contains_key(identity) {
            return Err(RegistryError::AlreadyExists {
                id: identity.to_string(),
            });
        }
        slots.insert(identity.clone(), Slot::Reserved);
        debug!(worker_id = %identity, occupied = slots.len(), "Worker slot reserved");

        Ok(Reservation {
            registry: self,
            identity: identity.clone(),
            committed: false,
        })
    }

    /// Hide a live worker from lookups and hand back its handle for teardown
    pub fn begin_removal(&self, id: &str) -> Result<Arc<H>, RegistryError> {
        let mut slots = self.slots.lock();
        let handle = match slots.get(id) {
            Some(Slot::Active(handle)) => Arc::clone(handle),
            _ => return Err(RegistryError::NotFound { id: id.to_string() }),
        };
        if let Some(slot) = slots.get_mut(id) {
            *slot = Slot::Removing(Arc::clone(&handle));
        }
        Ok(handle)
    }

    /// Release the identity of a live or removing worker
    pub fn remove(&self, id: &str) -> Result<Arc<H>, RegistryError> {
        let mut slots = self.slots.lock();
        match slots.get(id) {
            Some(Slot::Active(_)) | Some(Slot::Removing(_)) => {}
            _ => return Err(RegistryError::NotFound { id: id.to_string() }),
        }
        match slots.remove(id) {
            Some(Slot::Active(handle)) | Some(Slot::Removing(handle)) => Ok(handle),
            _ => Err(RegistryError::NotFound { id: id.to_string() }),
        }
    }

    /// Release the identity only while it still belongs to `handle`
    pub fn remove_exact(&self, id: &str, handle: &Arc<H>) -> bool {
        let mut slots = self.slots.lock();
        let owned = match slots.get(id) {
            Some(Slot::Active(current)) | Some(Slot::Removing(current)) => {
                Arc::ptr_eq(current, handle)
            }
            _ => false,
        };
        if owned {
            slots.remove(id);
        }
        owned
    }

    /// Handle of a live worker
    pub fn get(&self, id: &str) -> Option<Arc<H>> {
        match self.slots.lock().get(id) {
            Some(Slot::Active(handle)) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    /// Number of live workers
    pub fn count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Active(_)))
            .count()
    }

    /// Slots counted against capacity: live, reserved and removing
    pub fn occupied(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether the identity occupies a slot in any state
    pub fn contains(&self, id: &str) -> bool {
        self.slots.lock().contains_key(id)
    }

    /// Sorted identities of live workers
    pub fn identities(&self) -> Vec<WorkerIdentity> {
        let mut ids: Vec<WorkerIdentity> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Active(_)))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Live workers with their handles, sorted by identity
    pub fn snapshot(&self) -> Vec<(WorkerIdentity, Arc<H>)> {
        let mut entries: Vec<(WorkerIdentity, Arc<H>)> = self
            .slots
            .lock()
            .iter()
            .filter_map(|(id, slot)| match slot {
                Slot::Active(handle) => Some((id.clone(), Arc::clone(handle))),
                _ => None,
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    fn release(&self, identity: &WorkerIdentity) {
        let mut slots = self.slots.lock();
        if matches!(slots.get(identity), Some(Slot::Reserved)) {
            slots.remove(identity);
            debug!(worker_id = %identity, "Worker reservation released");
        }
    }

    fn commit_reserved(&self, identity: &WorkerIdentity, handle: Arc<H>) {
        let mut slots = self.slots.lock();
        slots.insert(identity.clone(), Slot::Active(handle));
    }
}

/// An admitted but not yet registered worker.
///
/// Dropping it uncommitted frees the slot.
#[must_use = "an uncommitted reservation is released when dropped"]
pub struct Reservation<'a, H = WorkerHandle> {
    registry: &'a WorkerRegistry<H>,
    identity: WorkerIdentity,
    committed: bool,
}

impl<H> Reservation<'_, H> {
    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    /// Make the worker visible to lookups
    pub fn commit(mut self, handle: H) -> Arc<H> {
        let handle = Arc::new(handle);
        self.registry
            .commit_reserved(&self.identity, Arc::clone(&handle));
        self.committed = true;
        handle
    }
}

impl<H> Drop for Reservation<'_, H> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.release(&self.identity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn id(raw: &str) -> WorkerIdentity {
        WorkerIdentity::new(raw).unwrap()
    }

    #[test]
    fn test_add_get_remove() {
        let registry: WorkerRegistry<u32> = WorkerRegistry::new();
        registry.add(id("w1"), 1).unwrap();

        assert_eq!(registry.get("w1").as_deref(), Some(&1));
        assert!(matches!(
            registry.add(id("w1"), 2),
            Err(RegistryError::AlreadyExists { .. })
        ));
        assert_eq!(registry.count(), 1);

        assert_eq!(*registry.remove("w1").unwrap(), 1);
        assert!(registry.get("w1").is_none());
        assert!(matches!(
            registry.remove("w1"),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_reservation_hidden_until_commit() {
        let registry: WorkerRegistry<u32> = WorkerRegistry::new();
        let reservation = registry.reserve(&id("w1"), 10).unwrap();

        assert!(registry.get("w1").is_none());
        assert!(registry.contains("w1"));
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.occupied(), 1);
        assert!(matches!(
            registry.reserve(&id("w1"), 10),
            Err(RegistryError::AlreadyExists { .. })
        ));

        reservation.commit(7);
        assert_eq!(registry.get("w1").as_deref(), Some(&7));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_dropped_reservation_frees_slot() {
        let registry: WorkerRegistry<u32> = WorkerRegistry::new();
        {
            let _reservation = registry.reserve(&id("w1"), 1).unwrap();
            assert!(matches!(
                registry.reserve(&id("w2"), 1),
                Err(RegistryError::CapacityExceeded { limit: 1 })
            ));
        }
        assert_eq!(registry.occupied(), 0);
        assert!(registry.reserve(&id("w2"), 1).is_ok());
    }

    #[test]
    fn test_capacity_checked_before_duplicate() {
        let registry: WorkerRegistry<u32> = WorkerRegistry::new();
        registry.reserve(&id("w1"), 1).unwrap().commit(1);
        assert!(matches!(
            registry.reserve(&id("w1"), 1),
            Err(RegistryError::CapacityExceeded { limit: 1 })
        ));
    }

    #[test]
    fn test_removing_entry_keeps_identity_but_hides_handle() {
        let registry: WorkerRegistry<u32> = WorkerRegistry::new();
        registry.add(id("w1"), 1).unwrap();

        assert_eq!(*registry.begin_removal("w1").unwrap(), 1);
        assert!(registry.get("w1").is_none());
        assert!(registry.identities().is_empty());
        assert!(matches!(
            registry.reserve(&id("w1"), 10),
            Err(RegistryError::AlreadyExists { .. })
        ));
        assert!(matches!(
            registry.begin_removal("w1"),
            Err(RegistryError::NotFound { .. })
        ));

        registry.remove("w1").unwrap();
        assert!(registry.reserve(&id("w1"), 10).is_ok());
    }

    #[test]
    fn test_remove_exact_ignores_newer_registration() {
        let registry: WorkerRegistry<u32> = WorkerRegistry::new();
        let old = registry.add(id("w1"), 1).unwrap();
        registry.remove("w1").unwrap();
        let current = registry.add(id("w1"), 2).unwrap();

        assert!(!registry.remove_exact("w1", &old));
        assert!(registry.get("w1").is_some());
        assert!(registry.remove_exact("w1", &current));
        assert!(!registry.contains("w1"));
    }

    #[test]
    fn test_remove_does_not_touch_reservations() {
        let registry: WorkerRegistry<u32> = WorkerRegistry::new();
        let _reservation = registry.reserve(&id("w1"), 10).unwrap();
        assert!(matches!(
            registry.remove("w1"),
            Err(RegistryError::NotFound { .. })
        ));
        assert!(registry.contains("w1"));
    }

    #[test]
    fn test_concurrent_reserve_same_identity_single_winner() {
        let registry: WorkerRegistry<usize> = WorkerRegistry::new();
        let winners = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for n in 0..16 {
                let registry = &registry;
                let winners = &winners;
                scope.spawn(move || {
                    if let Ok(reservation) = registry.reserve(&id("shared"), 100) {
                        reservation.commit(n);
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_concurrent_reserve_never_exceeds_capacity() {
        let registry: WorkerRegistry<usize> = WorkerRegistry::new();

        std::thread::scope(|scope| {
            for n in 0..32 {
                let registry = &registry;
                scope.spawn(move || {
                    if let Ok(reservation) = registry.reserve(&id(&format!("w{n}")), 5) {
                        reservation.commit(n);
                    }
                });
            }
        });

        assert_eq!(registry.count(), 5);
        assert_eq!(registry.identities().len(), 5);
    }

    #[test]
    fn test_identities_sorted() {
        let registry: WorkerRegistry<u32> = WorkerRegistry::new();
        for name in ["b", "c", "a"] {
            registry.add(id(name), 0).unwrap();
        }
        let names: Vec<String> = registry
            .identities()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(registry.snapshot().len(), 3);
    }
}
