//! State store
//!
//! Holds the last attributes observed from the remote API for every managed
//! resource. Reads come from memory; every write goes through to the backend
//! immediately so a crash mid-apply loses at most the operation in flight.

use crate::error::Result;
use crate::types::{PriorState, ResourceAddress};
use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

/// Durable medium behind a [`StateStore`]
///
/// The format is up to the implementation; the store only needs to load
/// everything once and persist single entries (or tombstones) afterwards.
pub trait StateBackend: Send + Sync {
    /// Load all entries
    fn load(&self) -> Result<BTreeMap<ResourceAddress, PriorState>>;

    /// Persist one entry; `None` removes it
    fn save(&self, address: &ResourceAddress, entry: Option<&PriorState>) -> Result<()>;
}

/// Backend that keeps nothing beyond the process
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<ResourceAddress, PriorState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with pre-existing entries
    pub fn with_entries(entries: BTreeMap<ResourceAddress, PriorState>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }
}

impl StateBackend for MemoryBackend {
    fn load(&self) -> Result<BTreeMap<ResourceAddress, PriorState>> {
        Ok(match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        })
    }

    fn save(&self, address: &ResourceAddress, entry: Option<&PriorState>) -> Result<()> {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        match entry {
            Some(state) => entries.insert(address.clone(), state.clone()),
            None => entries.remove(address),
        };
        Ok(())
    }
}

/// Prior state for every managed resource
pub struct StateStore {
    entries: RwLock<BTreeMap<ResourceAddress, PriorState>>,
    backend: Box<dyn StateBackend>,
}

impl StateStore {
    /// Load all entries from the backend.
    pub fn open(backend: Box<dyn StateBackend>) -> Result<Self> {
        let entries = backend.load()?;
        log::debug!("Loaded {} state entries", entries.len());
        Ok(Self {
            entries: RwLock::new(entries),
            backend,
        })
    }

    /// Empty in-memory store
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            backend: Box::new(MemoryBackend::new()),
        }
    }

    pub fn get(&self, address: &ResourceAddress) -> Option<PriorState> {
        self.read().get(address).cloned()
    }

    /// Record attributes observed from the remote API.
    ///
    /// Never call this with desired or unconfirmed values.
    pub fn put(&self, address: &ResourceAddress, state: PriorState) -> Result<()> {
        self.backend.save(address, Some(&state))?;
        self.write().insert(address.clone(), state);
        Ok(())
    }

    pub fn delete(&self, address: &ResourceAddress) -> Result<()> {
        self.backend.save(address, None)?;
        self.write().remove(address);
        Ok(())
    }

    /// Snapshot of all entries, ordered by address
    pub fn entries(&self) -> Vec<(ResourceAddress, PriorState)> {
        self.read()
            .iter()
            .map(|(a, s)| (a.clone(), s.clone()))
            .collect()
    }

    pub fn addresses(&self) -> Vec<ResourceAddress> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<ResourceAddress, PriorState>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<ResourceAddress, PriorState>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}
