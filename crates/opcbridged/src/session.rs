//! One protocol session per endpoint.
//!
//! A session has two states, Disconnected and Connected. Reconnection is
//! lazy: the next `read_once` after a failure tries to connect again, so
//! there is no watchdog and no permanent failure state.
//!
//! ```text
//!                  connect ok
//!   Disconnected ─────────────▶ Connected ──┐ read ok
//!        ▲                         │  ▲     │
//!        │  read failed /          │  └─────┘
//!        └──── disconnect() ───────┘
//! ```
//!
//! Every failure is caught here and turned into a log line, a state
//! transition and a zeroed snapshot entry. Nothing propagates to the
//! poller.
//!
//! # Panic-Free Guarantees
//!
//! No `.unwrap()` or `.expect()`. Snapshot writes for the session's own key
//! cannot fail; the error branch only logs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use opcbridge_core::{
    ConnectionTarget, Endpoint, EndpointKey, EndpointValues, RoundingRule, VariableName,
};
use opcbridge_protocol::{AddressSpace, ClientError, ClientResult, Connector};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::resolver::{HandleMap, Resolver};
use crate::state::BridgeState;

/// Errors caught at the session boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Target unreachable or handshake failed
    #[error("Connection to {target} failed: {source}")]
    Connection {
        target: String,
        #[source]
        source: ClientError,
    },

    /// Hierarchy walk failed (a missing node is not an error)
    #[error("Resolution failed: {reason}")]
    Resolution { reason: String },

    /// Value read failed on a live connection
    #[error("Reading {variable} failed: {source}")]
    Read {
        variable: VariableName,
        #[source]
        source: ClientError,
    },
}

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
}

/// Settings shared by every session of one bridge.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub resolver: Arc<Resolver>,
    pub rounding: RoundingRule,
    /// Bound on connect, each read and close
    pub io_timeout: Duration,
}

/// Runs `fut` with a deadline, mapping expiry to `ClientError::Timeout`.
async fn bounded<T, F>(operation: &str, after: Duration, fut: F) -> ClientResult<T>
where
    F: Future<Output = ClientResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout {
            operation: operation.to_string(),
            after,
        }),
    }
}

pub struct Session {
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    state: BridgeState,
    connection: Option<Box<dyn AddressSpace>>,
    handles: HandleMap,
}

impl Session {
    pub fn new(
        endpoint: Endpoint,
        connector: Arc<dyn Connector>,
        config: SessionConfig,
        state: BridgeState,
    ) -> Self {
        Self {
            endpoint,
            connector,
            config,
            state,
            connection: None,
            handles: HandleMap::new(),
        }
    }

    pub fn key(&self) -> &EndpointKey {
        &self.endpoint.key
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.endpoint.target
    }

    pub fn state(&self) -> SessionState {
        if self.connection.is_some() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    /// Handles resolved on the current connection.
    pub fn handles(&self) -> &HandleMap {
        &self.handles
    }

    fn zero_entry(&self) {
        if let Err(e) = self.state.snapshot.reset(self.key()) {
            warn!(endpoint = %self.key(), error = %e, "Failed to reset snapshot entry");
        }
    }

    /// Makes sure the session is connected.
    ///
    /// Returns true if already connected. Otherwise connects, resolves the
    /// expected variables and seeds the snapshot entry with zeros. Returns
    /// false if the connection could not be established.
    pub async fn ensure_ready(&mut self) -> bool {
        if self.connection.is_some() {
            return true;
        }

        self.handles.clear();
        self.zero_entry();

        let connected = bounded(
            "Connect",
            self.config.io_timeout,
            self.connector.connect(&self.endpoint.target),
        )
        .await
        .map_err(|source| SessionError::Connection {
            target: self.endpoint.target.to_string(),
            source,
        });

        let connection = match connected {
            Ok(connection) => connection,
            Err(e) => {
                warn!(endpoint = %self.key(), error = %e, "Connection attempt failed");
                self.state.status.record_failure(self.key(), false, &e);
                return false;
            }
        };

        info!(endpoint = %self.key(), target = %self.endpoint.target, "Connected");
        self.handles = self.resolve(&*connection).await;
        self.connection = Some(connection);
        self.state
            .status
            .record_connected(self.key(), self.handles.len());
        true
    }

    /// Runs the resolver; a resolution error leaves an empty map.
    async fn resolve(&self, connection: &dyn AddressSpace) -> HandleMap {
        match self.config.resolver.resolve(connection, self.key()).await {
            Ok(handles) => handles,
            Err(e) => {
                warn!(endpoint = %self.key(), error = %e, "Variable resolution failed");
                self.state.status.record_failure(self.key(), true, &e);
                HandleMap::new()
            }
        }
    }

    /// One read cycle: connect if needed, read every resolved variable and
    /// publish the result as one whole-entry replace.
    ///
    /// Any read failure abandons the cycle, drops the connection and zeroes
    /// the entry. Partial reads are never published.
    pub async fn read_once(&mut self) {
        if !self.ensure_ready().await {
            return;
        }

        // Retried only when nothing resolved; a partial map stays partial
        // until the next reconnect.
        if self.handles.is_empty() {
            if let Some(connection) = self.connection.as_deref() {
                let handles = self.resolve(connection).await;
                self.handles = handles;
            }
            if self.handles.is_empty() {
                debug!(endpoint = %self.key(), "No variables resolved, skipping read");
                return;
            }
        }

        let result = match self.connection.as_deref() {
            Some(connection) => self.read_values(connection).await,
            None => return,
        };

        match result {
            Ok(values) => {
                if let Err(e) = self.state.snapshot.replace(self.key(), &values) {
                    warn!(endpoint = %self.key(), error = %e, "Failed to publish values");
                    return;
                }
                self.state
                    .status
                    .record_success(self.key(), self.handles.len());
                debug!(endpoint = %self.key(), values = values.len(), "Read cycle complete");
            }
            Err(e) => {
                warn!(endpoint = %self.key(), error = %e, "Read failed, dropping connection");
                self.disconnect().await;
                self.zero_entry();
                self.state.status.record_failure(self.key(), false, &e);
            }
        }
    }

    async fn read_values(
        &self,
        connection: &dyn AddressSpace,
    ) -> Result<EndpointValues, SessionError> {
        let mut values = EndpointValues::new();
        for (name, handle) in &self.handles {
            let read = |source| SessionError::Read {
                variable: name.clone(),
                source,
            };

            let raw = bounded("Read", self.config.io_timeout, connection.read_value(handle))
                .await
                .map_err(read)?;
            let numeric = raw.to_numeric().ok_or_else(|| {
                read(ClientError::NonNumeric {
                    node: handle.to_string(),
                    kind: raw.type_name().to_string(),
                })
            })?;

            values.insert(name.clone(), self.config.rounding.apply(name, numeric));
        }
        Ok(values)
    }

    /// Tears down the connection if there is one. Idempotent; teardown
    /// errors are logged, never returned.
    pub async fn disconnect(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        self.handles.clear();

        if let Err(e) = bounded("Close", self.config.io_timeout, connection.close()).await {
            debug!(endpoint = %self.key(), error = %e, "Error while closing connection");
        }
        self.state.status.record_disconnected(self.key());
        info!(endpoint = %self.key(), "Disconnected");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("handles", &self.handles.len())
            .finish()
    }
}
