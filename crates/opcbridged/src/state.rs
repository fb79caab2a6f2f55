//! Process-scoped bridge state.
//!
//! Created at startup, shared by the poller (writer) and the HTTP layer
//! (reader), dropped at shutdown. Cloning is cheap.

use std::sync::Arc;

use opcbridge_core::{BridgeConfig, ConfigResult, EndpointRegistry, VariableSet};

use crate::snapshot::SnapshotStore;
use crate::status::StatusBoard;

#[derive(Debug, Clone)]
pub struct BridgeState {
    pub snapshot: Arc<SnapshotStore>,
    pub status: Arc<StatusBoard>,
}

impl BridgeState {
    pub fn new(registry: &EndpointRegistry, expected: VariableSet) -> Self {
        let status = StatusBoard::new(registry, expected.len());
        let snapshot = SnapshotStore::new(registry.keys(), expected);
        Self {
            snapshot: Arc::new(snapshot),
            status: Arc::new(status),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> ConfigResult<Self> {
        Ok(Self::new(&config.registry()?, config.variable_set()?))
    }
}
