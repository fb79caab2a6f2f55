//! opcbridge Daemon - OPC UA poller and snapshot server
//!
//! This crate provides the runtime of the bridge:
//! - `session` - one connection per endpoint, with lazy reconnect
//! - `resolver` - finds the expected variables in a server's hierarchy
//! - `poller` - drives every session's read cycle on a fixed period
//! - `snapshot` - the coarse-locked table published to HTTP readers
//! - `status` - per-endpoint health alongside the snapshot
//! - `server` - the HTTP surface (axum)
//! - `connector` - picks a protocol client by target scheme
//! - `simulate` - in-process servers for `sim://` targets
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      opcbridged daemon                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐  read_once  ┌─────────────────────┐    │
//! │  │     Poller      │────────────▶│  Session (per key)  │    │
//! │  │ (interval task) │             │  connect/resolve/   │    │
//! │  └─────────────────┘             │  read               │    │
//! │                                  └──────────┬──────────┘    │
//! │                                             │ replace       │
//! │                                             ▼               │
//! │  ┌─────────────────┐  read_all   ┌─────────────────────┐    │
//! │  │   HttpServer    │────────────▶│   SnapshotStore     │    │
//! │  │    (axum)       │             │   (one mutex)       │    │
//! │  └─────────────────┘             └─────────────────────┘    │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Protocol failures become state transitions and zeroed values
//! - Lock poisoning is recovered, never propagated

pub mod connector;
pub mod poller;
pub mod resolver;
pub mod server;
pub mod session;
pub mod simulate;
pub mod snapshot;
pub mod state;
pub mod status;
