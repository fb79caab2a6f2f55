//! Capability traits for address-space clients.
//!
//! # Panic-Free Guarantees
//!
//! Implementations must report every failure as a [`ClientError`]; the
//! session layer turns those into state transitions and zeroed values.

use std::time::Duration;

use async_trait::async_trait;
use opcbridge_core::ConnectionTarget;
use thiserror::Error;

use crate::node::{NodeHandle, NodeValue};

/// Errors raised by protocol clients.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Target could not be reached (refused, DNS, no route)
    #[error("Server unreachable at {target}: {reason}")]
    Unreachable { target: String, reason: String },

    /// Transport opened but the session handshake failed
    #[error("Handshake with {target} failed: {reason}")]
    Handshake { target: String, reason: String },

    /// No client knows how to speak this scheme
    #[error("Unsupported target scheme: {scheme}")]
    UnsupportedScheme { scheme: String },

    /// The connection is no longer usable
    #[error("Connection closed")]
    Closed,

    /// Node id unknown to the server
    #[error("Node not found: {node}")]
    NodeNotFound { node: String },

    /// Server answered with a bad status code
    #[error("{operation} failed with status {status}")]
    BadStatus { operation: String, status: String },

    /// Value is not numeric and cannot be published
    #[error("Node {node} holds a non-numeric value ({kind})")]
    NonNumeric { node: String, kind: String },

    /// Write to a node that does not accept writes
    #[error("Node {node} is not writable")]
    NotWritable { node: String },

    /// Operation did not complete in time
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Browse and value access on one live connection.
///
/// Nodes are addressed by [`NodeHandle`]s obtained from [`root`] and
/// [`children`]; handles are only valid on the connection that produced them.
///
/// [`root`]: AddressSpace::root
/// [`children`]: AddressSpace::children
#[async_trait]
pub trait AddressSpace: Send + Sync {
    /// The root node of the hierarchy.
    async fn root(&self) -> ClientResult<NodeHandle>;

    /// Hierarchical children of a node, in server order.
    async fn children(&self, node: &NodeHandle) -> ClientResult<Vec<NodeHandle>>;

    /// Display name text of a node.
    async fn display_name(&self, node: &NodeHandle) -> ClientResult<String>;

    /// Current value of a variable node.
    async fn read_value(&self, node: &NodeHandle) -> ClientResult<NodeValue>;

    /// Writes a new value to a variable node.
    async fn write_value(&self, node: &NodeHandle, value: NodeValue) -> ClientResult<()>;

    /// Tears the connection down. Further calls fail with [`ClientError::Closed`].
    async fn close(&self) -> ClientResult<()>;
}

/// Opens connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &ConnectionTarget) -> ClientResult<Box<dyn AddressSpace>>;
}
