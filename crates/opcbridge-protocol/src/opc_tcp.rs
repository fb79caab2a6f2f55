//! OPC UA binary (`opc.tcp://`) client.
//!
//! Wraps the synchronous session API of the `opcua` crate. Every call runs
//! on tokio's blocking pool so the poller task never blocks a runtime
//! worker. Sessions are anonymous with security mode None, which is what
//! the factory simulators expose.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use ::opcua::client::prelude::*;
use ::opcua::sync::RwLock;
use async_trait::async_trait;
use opcbridge_core::ConnectionTarget;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::client::{AddressSpace, ClientError, ClientResult, Connector};
use crate::node::{NodeHandle, NodeValue};

const APPLICATION_NAME: &str = "opcbridge";
const APPLICATION_URI: &str = "urn:opcbridge:client";

fn bad_status(operation: &str, status: StatusCode) -> ClientError {
    ClientError::BadStatus {
        operation: operation.to_string(),
        status: format!("{status:?}"),
    }
}

fn parse_node_id(node: &NodeHandle) -> ClientResult<NodeId> {
    NodeId::from_str(node.as_str()).map_err(|_| ClientError::NodeNotFound {
        node: node.to_string(),
    })
}

fn handle_of(node_id: &NodeId) -> NodeHandle {
    NodeHandle::new(node_id.to_string())
}

fn from_variant(node: &NodeHandle, variant: Variant) -> ClientResult<NodeValue> {
    let value = match variant {
        Variant::Boolean(b) => NodeValue::Bool(b),
        Variant::SByte(v) => NodeValue::Int(i64::from(v)),
        Variant::Byte(v) => NodeValue::UInt(u64::from(v)),
        Variant::Int16(v) => NodeValue::Int(i64::from(v)),
        Variant::UInt16(v) => NodeValue::UInt(u64::from(v)),
        Variant::Int32(v) => NodeValue::Int(i64::from(v)),
        Variant::UInt32(v) => NodeValue::UInt(u64::from(v)),
        Variant::Int64(v) => NodeValue::Int(v),
        Variant::UInt64(v) => NodeValue::UInt(v),
        Variant::Float(v) => NodeValue::Float(f64::from(v)),
        Variant::Double(v) => NodeValue::Float(v),
        Variant::String(s) => NodeValue::Text(s.as_ref().to_string()),
        other => {
            return Err(ClientError::NonNumeric {
                node: node.to_string(),
                kind: format!("{other:?}"),
            })
        }
    };
    Ok(value)
}

fn to_variant(value: NodeValue) -> Variant {
    match value {
        NodeValue::Float(v) => Variant::Double(v),
        NodeValue::Int(v) => Variant::Int64(v),
        NodeValue::UInt(v) => Variant::UInt64(v),
        NodeValue::Bool(b) => Variant::Boolean(b),
        NodeValue::Text(s) => Variant::String(UAString::from(s)),
    }
}

/// Opens anonymous OPC UA sessions.
#[derive(Debug, Clone, Default)]
pub struct OpcTcpConnector;

impl OpcTcpConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Hands a blocking result to the waiting caller.
///
/// When the caller has stopped waiting (its connect timeout fired) the
/// value is passed to `abandon` instead, so nothing is left half-open.
fn deliver<T>(
    tx: oneshot::Sender<ClientResult<T>>,
    result: ClientResult<T>,
    abandon: impl FnOnce(T),
) {
    if let Err(Ok(value)) = tx.send(result) {
        abandon(value);
    }
}

/// Blocking half of `connect`.
fn open_session(url: &str) -> ClientResult<Arc<RwLock<Session>>> {
    let mut client = ClientBuilder::new()
        .application_name(APPLICATION_NAME)
        .application_uri(APPLICATION_URI)
        .product_uri(APPLICATION_URI)
        .pki_dir(std::env::temp_dir().join("opcbridge-pki"))
        .create_sample_keypair(true)
        .trust_server_certs(true)
        .session_retry_limit(0)
        .client()
        .ok_or_else(|| ClientError::Handshake {
            target: url.to_string(),
            reason: "invalid client configuration".to_string(),
        })?;

    let endpoint: EndpointDescription = (
        url,
        SecurityPolicy::None.to_str(),
        MessageSecurityMode::None,
        UserTokenPolicy::anonymous(),
    )
        .into();

    client
        .connect_to_endpoint(endpoint, IdentityToken::Anonymous)
        .map_err(|status| ClientError::Unreachable {
            target: url.to_string(),
            reason: format!("{status:?}"),
        })
}

#[async_trait]
impl Connector for OpcTcpConnector {
    async fn connect(&self, target: &ConnectionTarget) -> ClientResult<Box<dyn AddressSpace>> {
        let url = target.as_str().to_string();
        let (tx, rx) = oneshot::channel();

        tokio::task::spawn_blocking(move || {
            let result = open_session(&url);
            deliver(tx, result, |session| {
                debug!(target = %url, "Connect finished after the caller gave up, closing session");
                session.read().disconnect();
            });
        });

        let session = rx.await.map_err(|_| ClientError::Handshake {
            target: target.to_string(),
            reason: "connect task ended without a result".to_string(),
        })??;

        debug!(target = %target, "OPC UA session established");
        Ok(Box::new(OpcTcpConnection {
            session,
            names: Mutex::new(HashMap::new()),
        }))
    }
}

/// One OPC UA session.
pub struct OpcTcpConnection {
    session: Arc<RwLock<Session>>,
    /// Display names learned while browsing
    names: Mutex<HashMap<NodeHandle, String>>,
}

impl OpcTcpConnection {
    /// Runs a blocking session call on the blocking pool.
    async fn blocking<T, F>(&self, operation: &'static str, f: F) -> ClientResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> ClientResult<T> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let guard = session.read();
            f(&guard)
        })
        .await
        .map_err(|e| ClientError::BadStatus {
            operation: operation.to_string(),
            status: e.to_string(),
        })?
    }

    fn remember_names(&self, names: Vec<(NodeHandle, String)>) {
        let mut cache = self.names.lock().unwrap_or_else(PoisonError::into_inner);
        cache.extend(names);
    }

    fn cached_name(&self, node: &NodeHandle) -> Option<String> {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node)
            .cloned()
    }
}

#[async_trait]
impl AddressSpace for OpcTcpConnection {
    async fn root(&self) -> ClientResult<NodeHandle> {
        Ok(handle_of(&NodeId::from(&ObjectId::RootFolder)))
    }

    async fn children(&self, node: &NodeHandle) -> ClientResult<Vec<NodeHandle>> {
        let node_id = parse_node_id(node)?;

        let children = self
            .blocking("Browse", move |session| {
                let description = BrowseDescription {
                    node_id,
                    browse_direction: BrowseDirection::Forward,
                    reference_type_id: ReferenceTypeId::HierarchicalReferences.into(),
                    include_subtypes: true,
                    node_class_mask: 0,
                    result_mask: BrowseDescriptionResultMask::all().bits(),
                };

                let results = session
                    .browse(&[description])
                    .map_err(|status| bad_status("Browse", status))?
                    .unwrap_or_default();

                let references = results
                    .into_iter()
                    .next()
                    .and_then(|r| r.references)
                    .unwrap_or_default();

                Ok(references
                    .into_iter()
                    .map(|r| {
                        (
                            handle_of(&r.node_id.node_id),
                            r.display_name.text.as_ref().to_string(),
                        )
                    })
                    .collect::<Vec<_>>())
            })
            .await?;

        let handles = children.iter().map(|(h, _)| h.clone()).collect();
        self.remember_names(children);
        Ok(handles)
    }

    async fn display_name(&self, node: &NodeHandle) -> ClientResult<String> {
        if let Some(name) = self.cached_name(node) {
            return Ok(name);
        }

        let node_id = parse_node_id(node)?;
        let handle = node.clone();
        let name = self
            .blocking("Read", move |session| {
                let value = read_attribute(session, node_id, AttributeId::DisplayName)?;
                match value {
                    Some(Variant::LocalizedText(text)) => Ok(text.text.as_ref().to_string()),
                    _ => Err(ClientError::BadStatus {
                        operation: "Read".to_string(),
                        status: format!("no display name for {handle}"),
                    }),
                }
            })
            .await?;

        self.remember_names(vec![(node.clone(), name.clone())]);
        Ok(name)
    }

    async fn read_value(&self, node: &NodeHandle) -> ClientResult<NodeValue> {
        let node_id = parse_node_id(node)?;
        let handle = node.clone();
        self.blocking("Read", move |session| {
            match read_attribute(session, node_id, AttributeId::Value)? {
                Some(variant) => from_variant(&handle, variant),
                None => Err(ClientError::BadStatus {
                    operation: "Read".to_string(),
                    status: "empty value".to_string(),
                }),
            }
        })
        .await
    }

    async fn write_value(&self, node: &NodeHandle, value: NodeValue) -> ClientResult<()> {
        let node_id = parse_node_id(node)?;
        let handle = node.clone();
        self.blocking("Write", move |session| {
            let write = WriteValue {
                node_id,
                attribute_id: AttributeId::Value as u32,
                index_range: UAString::null(),
                value: DataValue::value_only(to_variant(value)),
            };
            let results = session
                .write(&[write])
                .map_err(|status| bad_status("Write", status))?;
            match results.into_iter().next() {
                Some(status) if status.is_good() => Ok(()),
                Some(status) if status == StatusCode::BadNotWritable => {
                    Err(ClientError::NotWritable {
                        node: handle.to_string(),
                    })
                }
                Some(status) => Err(bad_status("Write", status)),
                None => Err(ClientError::BadStatus {
                    operation: "Write".to_string(),
                    status: "no result".to_string(),
                }),
            }
        })
        .await
    }

    async fn close(&self) -> ClientResult<()> {
        self.blocking("Disconnect", |session| {
            if !session.is_connected() {
                warn!("Disconnect on a session that already lost its connection");
            }
            session.disconnect();
            Ok(())
        })
        .await
    }
}

/// Reads one attribute of one node.
fn read_attribute(
    session: &Session,
    node_id: NodeId,
    attribute: AttributeId,
) -> ClientResult<Option<Variant>> {
    let request = ReadValueId {
        node_id,
        attribute_id: attribute as u32,
        index_range: UAString::null(),
        data_encoding: QualifiedName::null(),
    };

    let values = session
        .read(&[request], TimestampsToReturn::Neither, 0.0)
        .map_err(|status| bad_status("Read", status))?;

    let data_value = values.into_iter().next().ok_or_else(|| ClientError::BadStatus {
        operation: "Read".to_string(),
        status: "no result".to_string(),
    })?;

    if let Some(status) = data_value.status {
        if status.is_bad() {
            return Err(bad_status("Read", status));
        }
    }
    Ok(data_value.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_variant_numeric_kinds() {
        let node = NodeHandle::new("ns=2;i=10");
        assert_eq!(from_variant(&node, Variant::Double(21.5)).unwrap(), NodeValue::Float(21.5));
        assert_eq!(from_variant(&node, Variant::Float(1.5)).unwrap(), NodeValue::Float(1.5));
        assert_eq!(from_variant(&node, Variant::Int32(-7)).unwrap(), NodeValue::Int(-7));
        assert_eq!(from_variant(&node, Variant::UInt16(42)).unwrap(), NodeValue::UInt(42));
        assert_eq!(from_variant(&node, Variant::Boolean(true)).unwrap(), NodeValue::Bool(true));
        assert_eq!(
            from_variant(&node, Variant::String(UAString::from("on"))).unwrap(),
            NodeValue::Text("on".to_string())
        );
    }

    #[test]
    fn test_from_variant_rejects_other_kinds() {
        let node = NodeHandle::new("ns=2;i=10");
        match from_variant(&node, Variant::Empty) {
            Err(ClientError::NonNumeric { node, .. }) => assert_eq!(node, "ns=2;i=10"),
            other => panic!("expected NonNumeric, got {other:?}"),
        }
    }

    #[test]
    fn test_to_variant() {
        assert_eq!(to_variant(NodeValue::Float(30.0)), Variant::Double(30.0));
        assert_eq!(to_variant(NodeValue::Int(500)), Variant::Int64(500));
        assert_eq!(to_variant(NodeValue::UInt(5)), Variant::UInt64(5));
        assert_eq!(to_variant(NodeValue::Bool(false)), Variant::Boolean(false));
    }

    #[test]
    fn test_parse_node_id() {
        let id = parse_node_id(&NodeHandle::new("ns=2;i=10")).unwrap();
        assert_eq!(id, NodeId::new(2, 10u32));
        assert_eq!(parse_node_id(&handle_of(&id)).unwrap(), id);

        let root = NodeId::from(&ObjectId::RootFolder);
        assert_eq!(parse_node_id(&handle_of(&root)).unwrap(), root);

        match parse_node_id(&NodeHandle::new("not a node id")) {
            Err(ClientError::NodeNotFound { node }) => assert_eq!(node, "not a node id"),
            other => panic!("expected NodeNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_deliver_to_waiting_caller() {
        let (tx, mut rx) = oneshot::channel();
        let mut abandoned = false;
        deliver(tx, Ok(7), |_| abandoned = true);

        assert!(!abandoned);
        assert_eq!(rx.try_recv().unwrap(), Ok(7));
    }

    #[test]
    fn test_deliver_after_caller_gave_up() {
        let (tx, rx) = oneshot::channel::<ClientResult<u32>>();
        drop(rx);

        let mut abandoned = None;
        deliver(tx, Ok(7), |value| abandoned = Some(value));
        assert_eq!(abandoned, Some(7));

        // Failed connects have nothing to clean up
        let (tx, rx) = oneshot::channel::<ClientResult<u32>>();
        drop(rx);
        let mut called = false;
        deliver(tx, Err(ClientError::Closed), |_| called = true);
        assert!(!called);
    }
}
