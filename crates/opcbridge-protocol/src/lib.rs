//! opcbridge Protocol - Address-space client capability
//!
//! The daemon never talks to a concrete protocol client. It depends on the
//! two traits defined here:
//! - [`Connector`] - opens a connection to a [`ConnectionTarget`]
//! - [`AddressSpace`] - browses nodes and reads/writes values on that connection
//!
//! Implementations:
//! - [`memory`] - in-process address space (tests and `sim://` targets)
//! - `opc_tcp` - OPC UA binary over TCP (cargo feature `opcua`)
//!
//! [`ConnectionTarget`]: opcbridge_core::ConnectionTarget

pub mod client;
pub mod memory;
pub mod node;

#[cfg(feature = "opcua")]
pub mod opc_tcp;

pub use client::{AddressSpace, ClientError, ClientResult, Connector};
pub use memory::{MemoryConnector, MemoryServer};
pub use node::{NodeHandle, NodeValue};

#[cfg(feature = "opcua")]
pub use opc_tcp::OpcTcpConnector;
