use std::collections::HashMap;
use std::time::Duration;

use log::debug;
use parking_lot::RwLock;
use thiserror::Error;

use crate::flag::FlagSnapshot;
use crate::validation::{
    find_dependency_cycle, validate_snapshot, ValidationError, ValidationErrors,
};

/// Failure to reach the persistent flag store.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("flag store unavailable: {0}")]
    Unavailable(String),
    #[error("flag store did not answer within {0:?}")]
    Timeout(Duration),
}

/// FlagStore is the interface to the persistence layer that owns flag definitions.
///
/// Implementations are expected to bound their own latency and report a [StoreError::Timeout]
/// rather than block the caller indefinitely. A flag that does not exist is `Ok(None)`, never an
/// error.
pub trait FlagStore: Send + Sync {
    /// Retrieve the snapshot of the flag called `name`.
    fn snapshot(&self, name: &str) -> Result<Option<FlagSnapshot>, StoreError>;

    /// Retrieve snapshots of every known flag.
    fn snapshots(&self) -> Result<Vec<FlagSnapshot>, StoreError>;
}

/// An in-memory [FlagStore] with a validating write path.
///
/// Writes never touch any engine's cache; callers that want the new definition served
/// immediately must invalidate it themselves.
#[derive(Default)]
pub struct MemoryStore {
    flags: RwLock<HashMap<String, FlagSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from `flags`, validating each of them against the others.
    pub fn with_flags<I>(flags: I) -> Result<Self, ValidationErrors>
    where
        I: IntoIterator<Item = FlagSnapshot>,
    {
        let store = Self::new();
        for flag in flags {
            store.upsert(flag)?;
        }
        Ok(store)
    }

    /// Inserts or replaces a flag after validating it, including for dependency cycles through the
    /// flags already stored. Returns the previous definition.
    pub fn upsert(&self, flag: FlagSnapshot) -> Result<Option<FlagSnapshot>, ValidationErrors> {
        let mut flags = self.flags.write();
        Self::check(&flag, &flags)?;
        debug!("storing flag {}", flag.name);
        Ok(flags.insert(flag.name.clone(), flag))
    }

    /// Applies `update` to the stored flag called `name` and validates the result. Returns false
    /// if there is no such flag. A rejected update leaves the stored flag unchanged.
    pub fn update<F>(&self, name: &str, update: F) -> Result<bool, ValidationErrors>
    where
        F: FnOnce(&mut FlagSnapshot),
    {
        let mut flags = self.flags.write();
        let mut flag = match flags.get(name) {
            Some(flag) => flag.clone(),
            None => return Ok(false),
        };
        update(&mut flag);
        if flag.name != name {
            return Err(ValidationErrors(vec![ValidationError::InvalidName(flag.name)]));
        }
        Self::check(&flag, &flags)?;
        flags.insert(flag.name.clone(), flag);
        Ok(true)
    }

    pub fn remove(&self, name: &str) -> Option<FlagSnapshot> {
        self.flags.write().remove(name)
    }

    fn check(
        flag: &FlagSnapshot,
        others: &HashMap<String, FlagSnapshot>,
    ) -> Result<(), ValidationErrors> {
        let mut errors = match validate_snapshot(flag) {
            Ok(()) => vec![],
            Err(ValidationErrors(errors)) => errors,
        };

        if !errors.contains(&ValidationError::SelfDependency) {
            if let Some(cycle) = find_dependency_cycle(flag, others) {
                errors.push(ValidationError::DependencyCycle(cycle));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(errors))
        }
    }
}

impl FlagStore for MemoryStore {
    fn snapshot(&self, name: &str) -> Result<Option<FlagSnapshot>, StoreError> {
        Ok(self.flags.read().get(name).cloned())
    }

    fn snapshots(&self) -> Result<Vec<FlagSnapshot>, StoreError> {
        Ok(self.flags.read().values().cloned().collect())
    }
}
