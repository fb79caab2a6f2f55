//! Connector dispatch by target scheme.
//!
//! `sim://` targets go to the in-process address spaces, `opc.tcp://`
//! targets to the OPC UA client when the `opcua` feature is enabled.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use opcbridge_core::ConnectionTarget;
use opcbridge_protocol::{AddressSpace, ClientError, ClientResult, Connector, MemoryConnector};

/// Scheme of in-process simulated endpoints.
pub const SIM_SCHEME: &str = "sim";

/// Scheme of OPC UA binary endpoints.
pub const OPC_TCP_SCHEME: &str = "opc.tcp";

/// Routes each connect to the connector registered for the target's scheme.
#[derive(Clone, Default)]
pub struct SchemeConnector {
    by_scheme: HashMap<String, Arc<dyn Connector>>,
}

impl SchemeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `connector` for `scheme`, replacing any previous one.
    pub fn with(mut self, scheme: &str, connector: Arc<dyn Connector>) -> Self {
        self.by_scheme.insert(scheme.to_ascii_lowercase(), connector);
        self
    }

    /// `sim` backed by `memory`, plus `opc.tcp` when built with `opcua`.
    pub fn standard(memory: MemoryConnector) -> Self {
        let connector = Self::new().with(SIM_SCHEME, Arc::new(memory));

        #[cfg(feature = "opcua")]
        let connector = connector.with(
            OPC_TCP_SCHEME,
            Arc::new(opcbridge_protocol::OpcTcpConnector::new()),
        );

        connector
    }

    pub fn supports(&self, scheme: &str) -> bool {
        self.by_scheme.contains_key(&scheme.to_ascii_lowercase())
    }
}

impl std::fmt::Debug for SchemeConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<&str> = self.by_scheme.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        f.debug_struct("SchemeConnector")
            .field("schemes", &schemes)
            .finish()
    }
}

#[async_trait]
impl Connector for SchemeConnector {
    async fn connect(&self, target: &ConnectionTarget) -> ClientResult<Box<dyn AddressSpace>> {
        match self.by_scheme.get(target.scheme()) {
            Some(connector) => connector.connect(target).await,
            None => Err(ClientError::UnsupportedScheme {
                scheme: target.scheme().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcbridge_protocol::MemoryServer;

    #[tokio::test]
    async fn test_routes_sim_targets_to_memory() {
        let memory = MemoryConnector::new();
        let target = ConnectionTarget::parse("sim://line-a:4840/").unwrap();
        memory.register(&target, MemoryServer::new());

        let connector = SchemeConnector::standard(memory);
        assert!(connector.supports("sim"));
        assert!(connector.supports("SIM"));

        let space = connector.connect(&target).await.unwrap();
        assert_eq!(space.root().await.unwrap().as_str(), "i=84");
    }

    #[tokio::test]
    async fn test_unknown_scheme_is_rejected() {
        let connector = SchemeConnector::standard(MemoryConnector::new());
        let target = ConnectionTarget::parse("modbus://plc:502/").unwrap();

        match connector.connect(&target).await {
            Err(err) => assert_eq!(
                err,
                ClientError::UnsupportedScheme {
                    scheme: "modbus".to_string()
                }
            ),
            Ok(_) => panic!("modbus should not be routable"),
        }
    }

    #[cfg(feature = "opcua")]
    #[test]
    fn test_default_endpoints_are_routable() {
        let connector = SchemeConnector::standard(MemoryConnector::new());
        let config = opcbridge_core::BridgeConfig::default();
        for endpoint in &config.endpoints {
            assert!(
                connector.supports(endpoint.target.scheme()),
                "{} has no client",
                endpoint.key
            );
        }
    }

    #[cfg(not(feature = "opcua"))]
    #[test]
    fn test_opc_tcp_requires_feature() {
        let connector = SchemeConnector::standard(MemoryConnector::new());
        assert!(!connector.supports(OPC_TCP_SCHEME));
    }
}
