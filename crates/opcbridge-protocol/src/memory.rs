//! In-process address space.
//!
//! A [`MemoryServer`] holds a node tree shaped like a real OPC UA server
//! (Root -> Objects, Types, Views) and hands out [`AddressSpace`]
//! connections to it. Faults can be injected to exercise reconnection:
//! - [`MemoryServer::set_reachable`] - refuse new connections
//! - [`MemoryServer::drop_connections`] - invalidate every open connection
//! - [`MemoryServer::set_fail_reads`] - fail value reads on live connections
//!
//! # Panic-Free Guarantees
//!
//! Lock poisoning is recovered with `PoisonError::into_inner`; every
//! mutation completes before the guard drops, so the tree is never torn.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use opcbridge_core::ConnectionTarget;
use tracing::debug;

use crate::client::{AddressSpace, ClientError, ClientResult, Connector};
use crate::node::{NodeHandle, NodeValue};

/// Namespace index for nodes added by the application.
const APP_NAMESPACE: u16 = 2;

/// Well-known ids of the standard folders (namespace 0).
const ROOT_ID: &str = "i=84";
const OBJECTS_ID: &str = "i=85";
const TYPES_ID: &str = "i=86";
const VIEWS_ID: &str = "i=87";

#[derive(Debug)]
struct MemoryNode {
    name: String,
    children: Vec<NodeHandle>,
    value: Option<NodeValue>,
    writable: bool,
}

#[derive(Debug)]
struct ServerState {
    nodes: HashMap<NodeHandle, MemoryNode>,
    next_id: u32,
    reachable: bool,
    fail_reads: bool,
    /// Bumped by `drop_connections`; connections from older generations are dead
    generation: u64,
    connects: u64,
}

/// A shared, mutable in-memory address space.
///
/// Cloning yields another handle to the same server.
#[derive(Debug, Clone)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    /// Creates a server with only the standard folders.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        let folder = |name: &str, children: Vec<NodeHandle>| MemoryNode {
            name: name.to_string(),
            children,
            value: None,
            writable: false,
        };

        nodes.insert(
            NodeHandle::new(ROOT_ID),
            folder(
                "Root",
                vec![
                    NodeHandle::new(OBJECTS_ID),
                    NodeHandle::new(TYPES_ID),
                    NodeHandle::new(VIEWS_ID),
                ],
            ),
        );
        nodes.insert(NodeHandle::new(OBJECTS_ID), folder("Objects", Vec::new()));
        nodes.insert(NodeHandle::new(TYPES_ID), folder("Types", Vec::new()));
        nodes.insert(NodeHandle::new(VIEWS_ID), folder("Views", Vec::new()));

        Self {
            state: Arc::new(Mutex::new(ServerState {
                nodes,
                next_id: 1,
                reachable: true,
                fail_reads: false,
                generation: 0,
                connects: 0,
            })),
        }
    }

    /// Creates a server with the factory layout:
    /// `Objects/Factory/{TemperatureSensors, SystemInfo}`.
    ///
    /// `sensors` go under TemperatureSensors, `counters` under SystemInfo.
    /// Sensors are writable.
    pub fn factory(sensors: &[(&str, f64)], counters: &[(&str, i64)]) -> Self {
        let server = Self::new();
        let factory = server.add_object(&server.objects(), "Factory");

        let temps = server.add_object(&factory, "TemperatureSensors");
        for (name, value) in sensors {
            let node = server.add_variable(&temps, name, NodeValue::Float(*value));
            server.set_writable(&node, true);
        }

        let info = server.add_object(&factory, "SystemInfo");
        for (name, value) in counters {
            server.add_variable(&info, name, NodeValue::Int(*value));
        }

        server
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The Objects folder, first child of Root.
    pub fn objects(&self) -> NodeHandle {
        NodeHandle::new(OBJECTS_ID)
    }

    fn add_node(&self, parent: &NodeHandle, name: &str, value: Option<NodeValue>) -> NodeHandle {
        let mut state = self.lock();
        let handle = NodeHandle::new(format!("ns={};i={}", APP_NAMESPACE, state.next_id));
        state.next_id += 1;

        state.nodes.insert(
            handle.clone(),
            MemoryNode {
                name: name.to_string(),
                children: Vec::new(),
                value,
                writable: false,
            },
        );
        if let Some(parent) = state.nodes.get_mut(parent) {
            parent.children.push(handle.clone());
        }
        handle
    }

    /// Adds an object node under `parent`.
    pub fn add_object(&self, parent: &NodeHandle, name: &str) -> NodeHandle {
        self.add_node(parent, name, None)
    }

    /// Adds a variable node under `parent`.
    pub fn add_variable(&self, parent: &NodeHandle, name: &str, value: NodeValue) -> NodeHandle {
        self.add_node(parent, name, Some(value))
    }

    /// Removes a node and its subtree. Handles to it become stale.
    pub fn remove(&self, node: &NodeHandle) {
        let mut state = self.lock();
        let mut pending = vec![node.clone()];
        while let Some(handle) = pending.pop() {
            if let Some(removed) = state.nodes.remove(&handle) {
                pending.extend(removed.children);
            }
        }
        for remaining in state.nodes.values_mut() {
            remaining.children.retain(|c| c != node);
        }
    }

    pub fn set_writable(&self, node: &NodeHandle, writable: bool) {
        if let Some(n) = self.lock().nodes.get_mut(node) {
            n.writable = writable;
        }
    }

    /// Server-side update; bypasses the writable flag.
    pub fn set_value(&self, node: &NodeHandle, value: NodeValue) {
        if let Some(n) = self.lock().nodes.get_mut(node) {
            n.value = Some(value);
        }
    }

    /// Server-side update by display name (first match).
    pub fn set_value_by_name(&self, name: &str, value: NodeValue) -> bool {
        let mut state = self.lock();
        match state
            .nodes
            .values_mut()
            .find(|n| n.name == name && n.value.is_some())
        {
            Some(node) => {
                node.value = Some(value);
                true
            }
            None => false,
        }
    }

    /// Current value by display name (first variable match).
    pub fn value_by_name(&self, name: &str) -> Option<NodeValue> {
        self.lock()
            .nodes
            .values()
            .find(|n| n.name == name && n.value.is_some())
            .and_then(|n| n.value.clone())
    }

    /// Finds a node by display name.
    pub fn find(&self, name: &str) -> Option<NodeHandle> {
        self.lock()
            .nodes
            .iter()
            .find(|(_, n)| n.name == name)
            .map(|(h, _)| h.clone())
    }

    /// When false, new connections are refused.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// When true, value reads fail on otherwise live connections.
    pub fn set_fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Kills every open connection, as a server restart would.
    pub fn drop_connections(&self) {
        self.lock().generation += 1;
    }

    /// Number of successful connects so far.
    pub fn connection_count(&self) -> u64 {
        self.lock().connects
    }

    /// Opens a connection.
    pub fn connect(&self, target: &str) -> ClientResult<MemoryConnection> {
        let mut state = self.lock();
        if !state.reachable {
            return Err(ClientError::Unreachable {
                target: target.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        state.connects += 1;
        Ok(MemoryConnection {
            server: self.clone(),
            generation: state.generation,
            closed: Mutex::new(false),
        })
    }
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

/// One connection to a [`MemoryServer`].
#[derive(Debug)]
pub struct MemoryConnection {
    server: MemoryServer,
    generation: u64,
    closed: Mutex<bool>,
}

impl MemoryConnection {
    /// Locks the server, failing if this connection is dead.
    fn live(&self) -> ClientResult<MutexGuard<'_, ServerState>> {
        if *self.closed.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(ClientError::Closed);
        }
        let state = self.server.lock();
        if state.generation != self.generation {
            return Err(ClientError::Closed);
        }
        Ok(state)
    }
}

fn not_found(node: &NodeHandle) -> ClientError {
    ClientError::NodeNotFound {
        node: node.to_string(),
    }
}

#[async_trait]
impl AddressSpace for MemoryConnection {
    async fn root(&self) -> ClientResult<NodeHandle> {
        self.live()?;
        Ok(NodeHandle::new(ROOT_ID))
    }

    async fn children(&self, node: &NodeHandle) -> ClientResult<Vec<NodeHandle>> {
        let state = self.live()?;
        state
            .nodes
            .get(node)
            .map(|n| n.children.clone())
            .ok_or_else(|| not_found(node))
    }

    async fn display_name(&self, node: &NodeHandle) -> ClientResult<String> {
        let state = self.live()?;
        state
            .nodes
            .get(node)
            .map(|n| n.name.clone())
            .ok_or_else(|| not_found(node))
    }

    async fn read_value(&self, node: &NodeHandle) -> ClientResult<NodeValue> {
        let state = self.live()?;
        if state.fail_reads {
            return Err(ClientError::BadStatus {
                operation: "Read".to_string(),
                status: "BadCommunicationError".to_string(),
            });
        }
        let n = state.nodes.get(node).ok_or_else(|| not_found(node))?;
        n.value.clone().ok_or_else(|| ClientError::BadStatus {
            operation: "Read".to_string(),
            status: "BadAttributeIdInvalid".to_string(),
        })
    }

    async fn write_value(&self, node: &NodeHandle, value: NodeValue) -> ClientResult<()> {
        let mut state = self.live()?;
        let n = state.nodes.get_mut(node).ok_or_else(|| not_found(node))?;
        if !n.writable || n.value.is_none() {
            return Err(ClientError::NotWritable {
                node: node.to_string(),
            });
        }
        n.value = Some(value);
        Ok(())
    }

    async fn close(&self) -> ClientResult<()> {
        let mut closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(ClientError::Closed);
        }
        *closed = true;
        Ok(())
    }
}

/// Connects targets to in-memory servers by exact target string.
///
/// Targets without a registered server are unreachable.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    servers: Arc<Mutex<HashMap<String, MemoryServer>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `server` as the one answering at `target`.
    pub fn register(&self, target: &ConnectionTarget, server: MemoryServer) {
        self.servers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.as_str().to_string(), server);
    }

    pub fn server(&self, target: &ConnectionTarget) -> Option<MemoryServer> {
        self.servers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target.as_str())
            .cloned()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, target: &ConnectionTarget) -> ClientResult<Box<dyn AddressSpace>> {
        let server = self.server(target).ok_or_else(|| ClientError::Unreachable {
            target: target.to_string(),
            reason: "no server listening".to_string(),
        })?;
        let connection = server.connect(target.as_str())?;
        debug!(target = %target, "In-memory connection opened");
        Ok(Box::new(connection))
    }
}
