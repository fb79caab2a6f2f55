//! opcbridge Core - Shared types for the OPC UA polling bridge
//!
//! This crate provides the domain types shared between the protocol
//! adapters and the daemon (opcbridged): endpoint identities, variable
//! names and values, the snapshot shape and the deployment configuration.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod variable;

// Re-exports for convenience
pub use config::{BridgeConfig, HttpConfig, LayoutConfig, PollerConfig, VariablesConfig};
pub use endpoint::{ConnectionTarget, Endpoint, EndpointKey, EndpointRegistry};
pub use error::{ConfigError, ConfigResult};
pub use variable::{EndpointValues, RoundingRule, Snapshot, VariableName, VariableSet, VariableValue};
