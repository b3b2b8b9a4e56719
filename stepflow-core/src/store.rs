//! Store contract and the in-memory implementation.
//!
//! The engine only talks to a [`Store`]. Every accessor returns an owned
//! copy, so callers can never corrupt the stored value by mutating what
//! they got back. The single conditional write is
//! [`Store::save_instance_if_version_matches`].

use crate::definition::Definition;
use crate::instance::Instance;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

/// Failures of the storage medium itself. Never retried by the engine.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("data corruption: {0}")]
    Corruption(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Result of a conditional instance save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The stored version differs from the expected one. `actual` is `None`
    /// when no instance is stored under that id.
    Conflict { actual: Option<u64> },
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveOutcome::Saved)
    }
}

/// Storage contract consumed by the engine.
pub trait Store: Send + Sync {
    fn load_definition(&self, id: &str) -> Result<Option<Definition>, StoreError>;

    fn load_all_definitions(&self) -> Result<Vec<Definition>, StoreError>;

    /// Upserts by id, with no existence check.
    fn save_definition(&self, definition: &Definition) -> Result<(), StoreError>;

    /// Stores `definition` only if no definition with its id exists, as one
    /// atomic step. Returns the already stored definition otherwise.
    fn insert_definition(
        &self,
        definition: &Definition,
    ) -> Result<Option<Definition>, StoreError>;

    fn load_instance(&self, id: &str) -> Result<Option<Instance>, StoreError>;

    /// Atomically replaces the stored instance if its version equals
    /// `expected_version`. An `expected_version` of 0 means "insert only if
    /// no instance with this id exists".
    fn save_instance_if_version_matches(
        &self,
        instance: &Instance,
        expected_version: u64,
    ) -> Result<SaveOutcome, StoreError>;
}

/// Concurrent in-memory store.
///
/// Conditional saves go through the map's entry API, which holds the shard
/// lock for the key while the version is compared and the value replaced.
#[derive(Debug, Default)]
pub struct MemoryStore {
    definitions: DashMap<String, Definition>,
    instances: DashMap<String, Instance>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

impl Store for MemoryStore {
    fn load_definition(&self, id: &str) -> Result<Option<Definition>, StoreError> {
        Ok(self.definitions.get(id).map(|r| r.value().clone()))
    }

    fn load_all_definitions(&self) -> Result<Vec<Definition>, StoreError> {
        Ok(self
            .definitions
            .iter()
            .map(|r| r.value().clone())
            .collect())
    }

    fn save_definition(&self, definition: &Definition) -> Result<(), StoreError> {
        self.definitions
            .insert(definition.id.clone(), definition.clone());
        Ok(())
    }

    fn insert_definition(
        &self,
        definition: &Definition,
    ) -> Result<Option<Definition>, StoreError> {
        match self.definitions.entry(definition.id.clone()) {
            Entry::Occupied(entry) => Ok(Some(entry.get().clone())),
            Entry::Vacant(entry) => {
                entry.insert(definition.clone());
                Ok(None)
            }
        }
    }

    fn load_instance(&self, id: &str) -> Result<Option<Instance>, StoreError> {
        Ok(self.instances.get(id).map(|r| r.value().clone()))
    }

    fn save_instance_if_version_matches(
        &self,
        instance: &Instance,
        expected_version: u64,
    ) -> Result<SaveOutcome, StoreError> {
        match self.instances.entry(instance.id.clone()) {
            Entry::Occupied(mut entry) => {
                let actual = entry.get().version;
                if actual != expected_version {
                    return Ok(SaveOutcome::Conflict {
                        actual: Some(actual),
                    });
                }
                entry.insert(instance.clone());
            }
            Entry::Vacant(entry) => {
                if expected_version != 0 {
                    return Ok(SaveOutcome::Conflict { actual: None });
                }
                entry.insert(instance.clone());
            }
        }
        Ok(SaveOutcome::Saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{DefinitionRequest, State, Transition};
    use crate::validator::Validator;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    fn definition() -> Definition {
        Validator::default()
            .validate(
                DefinitionRequest::new("order")
                    .with_state(State::initial("created"))
                    .with_state(State::terminal("paid"))
                    .with_transition(Transition::new("pay", ["created"], "paid")),
            )
            .unwrap()
    }

    #[test]
    fn test_definition_roundtrip() {
        let store = MemoryStore::new();
        let def = definition();
        store.save_definition(&def).unwrap();
        store.save_definition(&def).unwrap();

        assert_eq!(store.load_definition("order").unwrap(), Some(def));
        assert_eq!(store.load_all_definitions().unwrap().len(), 1);
        assert!(store.load_definition("missing").unwrap().is_none());
    }

    #[test]
    fn test_insert_definition_keeps_first() {
        let store = MemoryStore::new();
        let first = definition();
        assert_eq!(store.insert_definition(&first).unwrap(), None);

        let mut second = definition();
        second.transitions[0].enabled = false;
        assert_eq!(store.insert_definition(&second).unwrap(), Some(first.clone()));
        assert_eq!(store.load_definition("order").unwrap(), Some(first));
    }

    #[test]
    fn test_insert_requires_version_zero() {
        let store = MemoryStore::new();
        let instance = Instance::start("i-1", &definition()).unwrap();

        assert_eq!(
            store.save_instance_if_version_matches(&instance, 1).unwrap(),
            SaveOutcome::Conflict { actual: None }
        );
        assert!(store
            .save_instance_if_version_matches(&instance, 0)
            .unwrap()
            .is_saved());
        // A second insert under the same id conflicts.
        assert_eq!(
            store.save_instance_if_version_matches(&instance, 0).unwrap(),
            SaveOutcome::Conflict { actual: Some(1) }
        );
    }

    #[test]
    fn test_conditional_update() {
        let store = MemoryStore::new();
        let def = definition();
        let instance = Instance::start("i-1", &def).unwrap();
        store.save_instance_if_version_matches(&instance, 0).unwrap();

        let mut next = instance.clone();
        next.apply(def.transition("pay").unwrap());

        assert_eq!(
            store.save_instance_if_version_matches(&next, 7).unwrap(),
            SaveOutcome::Conflict { actual: Some(1) }
        );
        assert_eq!(store.load_instance("i-1").unwrap().unwrap().version, 1);

        assert!(store
            .save_instance_if_version_matches(&next, 1)
            .unwrap()
            .is_saved());
        let stored = store.load_instance("i-1").unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.current_state, "paid");
    }

    #[test]
    fn test_returned_values_are_copies() {
        let store = MemoryStore::new();
        let instance = Instance::start("i-1", &definition()).unwrap();
        store.save_instance_if_version_matches(&instance, 0).unwrap();

        let mut copy = store.load_instance("i-1").unwrap().unwrap();
        copy.current_state = "tampered".into();
        copy.version = 99;

        let stored = store.load_instance("i-1").unwrap().unwrap();
        assert_eq!(stored.current_state, "created");
        assert_eq!(stored.version, 1);
    }

    #[test]
    fn test_concurrent_saves_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let def = definition();
        let instance = Instance::start("i-1", &def).unwrap();
        store.save_instance_if_version_matches(&instance, 0).unwrap();

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let store = store.clone();
                let barrier = barrier.clone();
                let wins = wins.clone();
                let mut next = instance.clone();
                next.apply(def.transition("pay").unwrap());
                std::thread::spawn(move || {
                    barrier.wait();
                    if store
                        .save_instance_if_version_matches(&next, 1)
                        .unwrap()
                        .is_saved()
                    {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(store.load_instance("i-1").unwrap().unwrap().version, 2);
    }
}
