//! Endpoint identities and connection targets.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use url::{Host, Url};

use crate::error::{ConfigError, ConfigResult};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Short identifier for a monitored server (e.g. "Server_4840").
///
/// Set at startup and stable for the process lifetime. Used as the outer
/// key of the snapshot JSON.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointKey(String);

impl EndpointKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EndpointKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EndpointKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for EndpointKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Connection Target
// ============================================================================

/// Network address of one address-space server.
///
/// Parsed from `scheme://host[:port][/path]`, for example
/// `opc.tcp://localhost:4840/freeopcua/server/`. The configured text is kept
/// so the target can be handed verbatim to protocol clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConnectionTarget {
    scheme: String,
    host: String,
    port: u16,
    path: String,
    raw: String,
}

impl ConnectionTarget {
    /// Port assumed when the target omits one (OPC UA registered port).
    pub const DEFAULT_PORT: u16 = 4840;

    /// Parses a target string.
    ///
    /// Userinfo, query and fragment are accepted and ignored; the client
    /// still receives the full configured text.
    pub fn parse(raw: &str) -> ConfigResult<Self> {
        let invalid = |reason: String| ConfigError::InvalidTarget {
            target: raw.to_string(),
            reason,
        };

        let trimmed = raw.trim();
        let url = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(invalid("empty host".to_string())),
        };

        let port = url.port().unwrap_or(Self::DEFAULT_PORT);
        if port == 0 {
            return Err(invalid("port must be between 1 and 65535".to_string()));
        }

        let path = match url.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };

        Ok(Self {
            scheme: url.scheme().to_string(),
            host,
            port,
            path,
            raw: trimmed.to_string(),
        })
    }

    /// Protocol scheme, lowercased (e.g. "opc.tcp").
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path component, always starting with '/'.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The target exactly as configured.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for ConnectionTarget {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ConnectionTarget {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ConnectionTarget> for String {
    fn from(target: ConnectionTarget) -> Self {
        target.raw
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

// ============================================================================
// Endpoint Registry
// ============================================================================

/// One monitored server: its key and where to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub key: EndpointKey,
    pub target: ConnectionTarget,
}

impl Endpoint {
    pub fn new(key: impl Into<EndpointKey>, target: ConnectionTarget) -> Self {
        Self {
            key: key.into(),
            target,
        }
    }
}

/// Static, ordered mapping from endpoint key to connection target.
///
/// Built once at startup. Iteration order is the configured order, which
/// is also the order the poller visits sessions in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRegistry {
    endpoints: Vec<Endpoint>,
}

impl EndpointRegistry {
    /// Builds a registry, rejecting an empty list and duplicate keys.
    pub fn new(endpoints: Vec<Endpoint>) -> ConfigResult<Self> {
        if endpoints.is_empty() {
            return Err(ConfigError::InvalidFieldValue {
                field: "endpoints".to_string(),
                value: "[]".to_string(),
                expected: "at least one endpoint".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for endpoint in &endpoints {
            if !seen.insert(endpoint.key.clone()) {
                return Err(ConfigError::DuplicateEndpoint {
                    key: endpoint.key.to_string(),
                });
            }
        }

        Ok(Self { endpoints })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &EndpointKey> {
        self.endpoints.iter().map(|e| &e.key)
    }

    /// Looks up the target for a key.
    pub fn target(&self, key: &EndpointKey) -> Option<&ConnectionTarget> {
        self.endpoints
            .iter()
            .find(|e| &e.key == key)
            .map(|e| &e.target)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl<'a> IntoIterator for &'a EndpointRegistry {
    type Item = &'a Endpoint;
    type IntoIter = std::slice::Iter<'a, Endpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.endpoints.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_opc_tcp_target() {
        let target = ConnectionTarget::parse("opc.tcp://localhost:4840/freeopcua/server/").unwrap();
        assert_eq!(target.scheme(), "opc.tcp");
        assert_eq!(target.host(), "localhost");
        assert_eq!(target.port(), 4840);
        assert_eq!(target.path(), "/freeopcua/server/");
        assert_eq!(target.as_str(), "opc.tcp://localhost:4840/freeopcua/server/");
    }

    #[test]
    fn test_parse_target_defaults() {
        let target = ConnectionTarget::parse("sim://line-a").unwrap();
        assert_eq!(target.scheme(), "sim");
        assert_eq!(target.host(), "line-a");
        assert_eq!(target.port(), ConnectionTarget::DEFAULT_PORT);
        assert_eq!(target.path(), "/");
    }

    #[test]
    fn test_parse_ipv6_target() {
        let target = ConnectionTarget::parse("opc.tcp://[::1]:4841/newserver/opcua/").unwrap();
        assert_eq!(target.host(), "::1");
        assert_eq!(target.port(), 4841);
    }

    #[test]
    fn test_parse_target_rejects_garbage() {
        assert!(ConnectionTarget::parse("localhost:4840").is_err());
        assert!(ConnectionTarget::parse("://localhost:4840").is_err());
        assert!(ConnectionTarget::parse("opc.tcp://:4840/").is_err());
        assert!(ConnectionTarget::parse("opc.tcp://host:notaport/").is_err());
        assert!(ConnectionTarget::parse("opc.tcp://host:0/").is_err());
        assert!(ConnectionTarget::parse("opc.tcp://[::1/").is_err());
        assert!(ConnectionTarget::parse("opc.tcp://plc local:4840/").is_err());
    }

    #[test]
    fn test_parse_target_with_userinfo() {
        let target =
            ConnectionTarget::parse("opc.tcp://operator@plc.local:4840/server/").unwrap();
        assert_eq!(target.host(), "plc.local");
        assert_eq!(target.port(), 4840);
        assert_eq!(target.path(), "/server/");
        assert_eq!(target.as_str(), "opc.tcp://operator@plc.local:4840/server/");
    }

    #[test]
    fn test_parse_target_with_query() {
        let target = ConnectionTarget::parse("opc.tcp://plc.local:4840?timeout=5").unwrap();
        assert_eq!(target.host(), "plc.local");
        assert_eq!(target.port(), 4840);
        assert_eq!(target.path(), "/");
        assert_eq!(target.as_str(), "opc.tcp://plc.local:4840?timeout=5");
    }

    #[test]
    fn test_parse_target_scheme_is_lowercased() {
        let target = ConnectionTarget::parse("OPC.TCP://10.0.0.5:4841/").unwrap();
        assert_eq!(target.scheme(), "opc.tcp");
        assert_eq!(target.host(), "10.0.0.5");
        assert_eq!(target.port(), 4841);
    }

    #[test]
    fn test_target_serde_as_string() {
        let target = ConnectionTarget::parse("opc.tcp://localhost:4841/newserver/opcua/").unwrap();
        let json = serde_json::to_string(&target).unwrap();
        assert_eq!(json, "\"opc.tcp://localhost:4841/newserver/opcua/\"");

        let back: ConnectionTarget = serde_json::from_str(&json).unwrap();
        assert_eq!(back, target);

        let bad: Result<ConnectionTarget, _> = serde_json::from_str("\"nonsense\"");
        assert!(bad.is_err());
    }

    fn endpoint(key: &str, port: u16) -> Endpoint {
        let target = ConnectionTarget::parse(&format!("opc.tcp://localhost:{port}/")).unwrap();
        Endpoint::new(key, target)
    }

    #[test]
    fn test_registry_preserves_order() {
        let registry =
            EndpointRegistry::new(vec![endpoint("Server_4841", 4841), endpoint("Server_4840", 4840)])
                .unwrap();
        let keys: Vec<&str> = registry.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["Server_4841", "Server_4840"]);
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.target(&EndpointKey::from("Server_4840")).map(|t| t.port()),
            Some(4840)
        );
        assert!(registry.target(&EndpointKey::from("missing")).is_none());
    }

    #[test]
    fn test_registry_rejects_duplicates_and_empty() {
        let err = EndpointRegistry::new(vec![endpoint("A", 1), endpoint("A", 2)]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::DuplicateEndpoint {
                key: "A".to_string()
            }
        );
        assert!(EndpointRegistry::new(Vec::new()).is_err());
    }
}
