//! Per-endpoint health, published next to the snapshot.
//!
//! The snapshot reports an unreachable endpoint as zeros, which looks the
//! same as a genuine zero reading. The status board tells them apart.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use opcbridge_core::{EndpointKey, EndpointRegistry};
use serde::{Deserialize, Serialize};

/// Health of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStatus {
    /// Target as configured
    pub target: String,
    pub connected: bool,
    /// Number of expected variables currently resolved to handles
    pub resolved: usize,
    /// Size of the expected variable set
    pub expected: usize,
    /// Time of the last fully successful read
    pub last_success: Option<DateTime<Utc>>,
    /// Most recent failure, cleared on success
    pub last_error: Option<String>,
    /// Failed read cycles since the last success
    pub consecutive_failures: u32,
}

impl EndpointStatus {
    fn new(target: String, expected: usize) -> Self {
        Self {
            target,
            connected: false,
            resolved: 0,
            expected,
            last_success: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }
}

/// Coarse-locked table of [`EndpointStatus`].
#[derive(Debug)]
pub struct StatusBoard {
    table: Mutex<BTreeMap<EndpointKey, EndpointStatus>>,
}

impl StatusBoard {
    pub fn new(registry: &EndpointRegistry, expected: usize) -> Self {
        let table = registry
            .iter()
            .map(|e| {
                (
                    e.key.clone(),
                    EndpointStatus::new(e.target.to_string(), expected),
                )
            })
            .collect();
        Self {
            table: Mutex::new(table),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<EndpointKey, EndpointStatus>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `f` to the entry for `key`. Unknown keys are ignored.
    pub fn update<F>(&self, key: &EndpointKey, f: F)
    where
        F: FnOnce(&mut EndpointStatus),
    {
        if let Some(status) = self.lock().get_mut(key) {
            f(status);
        }
    }

    /// Records a connection (or reconnection) with `resolved` handles.
    pub fn record_connected(&self, key: &EndpointKey, resolved: usize) {
        self.update(key, |s| {
            s.connected = true;
            s.resolved = resolved;
        });
    }

    /// Records a completed read cycle.
    pub fn record_success(&self, key: &EndpointKey, resolved: usize) {
        self.update(key, |s| {
            s.connected = true;
            s.resolved = resolved;
            s.last_success = Some(Utc::now());
            s.last_error = None;
            s.consecutive_failures = 0;
        });
    }

    /// Records a failed cycle; `connected` is the session state afterwards.
    pub fn record_failure(&self, key: &EndpointKey, connected: bool, error: impl ToString) {
        self.update(key, |s| {
            s.connected = connected;
            if !connected {
                s.resolved = 0;
            }
            s.last_error = Some(error.to_string());
            s.consecutive_failures = s.consecutive_failures.saturating_add(1);
        });
    }

    /// Records an orderly disconnect.
    pub fn record_disconnected(&self, key: &EndpointKey) {
        self.update(key, |s| {
            s.connected = false;
            s.resolved = 0;
        });
    }

    pub fn get(&self, key: &EndpointKey) -> Option<EndpointStatus> {
        self.lock().get(key).cloned()
    }

    /// Copy of every entry.
    pub fn read_all(&self) -> BTreeMap<EndpointKey, EndpointStatus> {
        self.lock().clone()
    }
}
