//! Snapshot store shared by the poller (writer) and HTTP readers.
//!
//! The table always holds exactly the configured endpoint keys, and each
//! entry always holds exactly the expected variable names. Writers replace
//! a whole endpoint entry at once; readers get a deep copy of the table.
//! A reader therefore sees an endpoint either entirely before or entirely
//! after a write.
//!
//! # Panic-Free Guarantees
//!
//! A poisoned lock is recovered with `PoisonError::into_inner`. Writes are
//! a single map insert, so a panicking holder cannot leave a torn entry.

use std::sync::{Mutex, MutexGuard, PoisonError};

use opcbridge_core::{EndpointKey, EndpointValues, Snapshot, VariableSet};
use thiserror::Error;
use tracing::trace;

/// Errors from snapshot writes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// The key was not configured at startup
    #[error("Unknown endpoint: {key}")]
    UnknownEndpoint { key: EndpointKey },
}

/// Coarse-locked `endpoint -> variable -> value` table.
#[derive(Debug)]
pub struct SnapshotStore {
    expected: VariableSet,
    table: Mutex<Snapshot>,
}

impl SnapshotStore {
    /// Creates the store with every key seeded to all-zero.
    pub fn new<'a, I>(keys: I, expected: VariableSet) -> Self
    where
        I: IntoIterator<Item = &'a EndpointKey>,
    {
        let zeroed = expected.zeroed();
        let table = keys
            .into_iter()
            .map(|key| (key.clone(), zeroed.clone()))
            .collect();

        Self {
            expected,
            table: Mutex::new(table),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The variable names every entry contains.
    pub fn expected(&self) -> &VariableSet {
        &self.expected
    }

    /// Atomically overwrites the entry for `key`.
    ///
    /// `values` is projected onto the expected set first: expected names
    /// it lacks are published as zero, names outside the set are dropped.
    pub fn replace(&self, key: &EndpointKey, values: &EndpointValues) -> Result<(), SnapshotError> {
        let entry = self.expected.normalize(values);

        let mut table = self.lock();
        match table.get_mut(key) {
            Some(slot) => {
                *slot = entry;
                trace!(endpoint = %key, "Snapshot entry replaced");
                Ok(())
            }
            None => Err(SnapshotError::UnknownEndpoint { key: key.clone() }),
        }
    }

    /// Resets the entry for `key` to all-zero.
    pub fn reset(&self, key: &EndpointKey) -> Result<(), SnapshotError> {
        self.replace(key, &EndpointValues::new())
    }

    /// Deep copy of the full table.
    pub fn read_all(&self) -> Snapshot {
        self.lock().clone()
    }

    /// Copy of one entry.
    pub fn get(&self, key: &EndpointKey) -> Option<EndpointValues> {
        self.lock().get(key).cloned()
    }

    /// Number of endpoints in the table.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
