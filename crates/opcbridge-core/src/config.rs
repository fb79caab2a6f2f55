//! Deployment configuration.
//!
//! Loaded once at startup from TOML and immutable afterwards. Every section
//! is optional; defaults describe the two-server factory deployment:
//!
//! ```toml
//! [http]
//! bind = "0.0.0.0:8000"
//!
//! [poller]
//! interval_ms = 2000
//!
//! [variables]
//! expected = ["Sensor1_Temperature", "Sensor2_Temperature", "Uptime", "TotalProduction"]
//!
//! [[endpoints]]
//! key = "Server_4840"
//! target = "opc.tcp://localhost:4840/freeopcua/server/"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::endpoint::{ConnectionTarget, Endpoint, EndpointRegistry};
use crate::error::{ConfigError, ConfigResult};
use crate::variable::{RoundingRule, VariableSet};

/// Default HTTP bind address.
pub const DEFAULT_BIND: &str = "0.0.0.0:8000";

/// Default poll period in milliseconds.
pub const DEFAULT_INTERVAL_MS: u64 = 2000;

/// Default bound on a single connect or read, in milliseconds.
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 5000;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub http: HttpConfig,
    pub poller: PollerConfig,
    pub layout: LayoutConfig,
    pub variables: VariablesConfig,
    pub endpoints: Vec<Endpoint>,
}

/// HTTP surface settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub bind: String,
    /// Origins allowed by CORS (the dashboard dev server by default)
    pub cors_origins: Vec<String>,
}

/// Polling cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollerConfig {
    pub interval_ms: u64,
    pub io_timeout_ms: u64,
}

/// Where variables live in each server's hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutConfig {
    /// Display name of the container object under the objects folder
    pub container: String,
    /// Display names of the groups inside the container holding variables
    pub groups: Vec<String>,
}

/// Which variables to publish and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VariablesConfig {
    pub expected: Vec<String>,
    pub round_marker: String,
    pub round_decimals: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            poller: PollerConfig::default(),
            layout: LayoutConfig::default(),
            variables: VariablesConfig::default(),
            endpoints: default_endpoints(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            cors_origins: vec![
                "http://localhost".to_string(),
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            container: "Factory".to_string(),
            groups: vec!["TemperatureSensors".to_string(), "SystemInfo".to_string()],
        }
    }
}

impl Default for VariablesConfig {
    fn default() -> Self {
        let rule = RoundingRule::default();
        Self {
            expected: vec![
                "Sensor1_Temperature".to_string(),
                "Sensor2_Temperature".to_string(),
                "Uptime".to_string(),
                "TotalProduction".to_string(),
            ],
            round_marker: rule.marker,
            round_decimals: rule.decimals,
        }
    }
}

fn default_endpoints() -> Vec<Endpoint> {
    [
        ("Server_4840", "opc.tcp://localhost:4840/freeopcua/server/"),
        ("Server_4841", "opc.tcp://localhost:4841/newserver/opcua/"),
    ]
    .into_iter()
    .filter_map(|(key, target)| {
        ConnectionTarget::parse(target)
            .ok()
            .map(|target| Endpoint::new(key, target))
    })
    .collect()
}

impl BridgeConfig {
    /// Reads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config = Self::from_toml_str(&content)?;
        debug!(
            path = %path.display(),
            endpoints = config.endpoints.len(),
            "Loaded config file"
        );
        Ok(config)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: BridgeConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the configuration back to TOML.
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        self.registry()?;
        self.variable_set()?;

        if self.poller.interval_ms == 0 {
            return Err(ConfigError::InvalidFieldValue {
                field: "poller.interval_ms".to_string(),
                value: "0".to_string(),
                expected: "a positive number of milliseconds".to_string(),
            });
        }
        if self.poller.io_timeout_ms == 0 {
            return Err(ConfigError::InvalidFieldValue {
                field: "poller.io_timeout_ms".to_string(),
                value: "0".to_string(),
                expected: "a positive number of milliseconds".to_string(),
            });
        }
        if self.layout.container.is_empty() {
            return Err(ConfigError::InvalidFieldValue {
                field: "layout.container".to_string(),
                value: "\"\"".to_string(),
                expected: "a display name".to_string(),
            });
        }
        if self.layout.groups.is_empty() {
            return Err(ConfigError::InvalidFieldValue {
                field: "layout.groups".to_string(),
                value: "[]".to_string(),
                expected: "at least one group name".to_string(),
            });
        }

        Ok(())
    }

    /// Builds the endpoint registry.
    pub fn registry(&self) -> ConfigResult<EndpointRegistry> {
        EndpointRegistry::new(self.endpoints.clone())
    }

    /// Builds the expected variable set.
    pub fn variable_set(&self) -> ConfigResult<VariableSet> {
        VariableSet::new(self.variables.expected.iter().cloned())
    }

    pub fn rounding(&self) -> RoundingRule {
        RoundingRule::new(
            self.variables.round_marker.clone(),
            self.variables.round_decimals,
        )
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.poller.interval_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.poller.io_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.interval(), Duration::from_secs(2));
        assert_eq!(config.variable_set().unwrap().len(), 4);
        assert_eq!(config.rounding(), RoundingRule::new("Temperature", 2));
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [http]
            bind = "127.0.0.1:9000"
            cors_origins = []

            [poller]
            interval_ms = 500

            [variables]
            expected = ["Sensor1_Temperature", "Sensor2_Temperature", "Sensor3_Temperature", "TotalProduction"]

            [[endpoints]]
            key = "Line_A"
            target = "opc.tcp://10.0.0.5:4840/freeopcua/server/"
        "#;

        let config = BridgeConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.http.bind, "127.0.0.1:9000");
        assert!(config.http.cors_origins.is_empty());
        assert_eq!(config.interval(), Duration::from_millis(500));
        assert_eq!(config.poller.io_timeout_ms, DEFAULT_IO_TIMEOUT_MS);
        assert_eq!(config.layout, LayoutConfig::default());

        let registry = config.registry().unwrap();
        assert_eq!(registry.len(), 1);
        let keys: Vec<&str> = registry.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["Line_A"]);

        let set = config.variable_set().unwrap();
        assert!(set.contains("Sensor3_Temperature"));
        assert!(!set.contains("Uptime"));
    }

    #[test]
    fn test_rejects_invalid_configs() {
        let bad_target = r#"
            [[endpoints]]
            key = "A"
            target = "localhost"
        "#;
        assert!(matches!(
            BridgeConfig::from_toml_str(bad_target),
            Err(ConfigError::Parse { .. })
        ));

        let duplicate = r#"
            [[endpoints]]
            key = "A"
            target = "opc.tcp://localhost:4840/"
            [[endpoints]]
            key = "A"
            target = "opc.tcp://localhost:4841/"
        "#;
        assert!(matches!(
            BridgeConfig::from_toml_str(duplicate),
            Err(ConfigError::DuplicateEndpoint { .. })
        ));

        let zero_interval = "[poller]\ninterval_ms = 0\n";
        assert!(matches!(
            BridgeConfig::from_toml_str(zero_interval),
            Err(ConfigError::InvalidFieldValue { .. })
        ));

        let unknown_field = "[poller]\nperiod = 3\n";
        assert!(matches!(
            BridgeConfig::from_toml_str(unknown_field),
            Err(ConfigError::Parse { .. })
        ));

        let no_endpoints = "endpoints = []\n";
        assert!(BridgeConfig::from_toml_str(no_endpoints).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[poller]\ninterval_ms = 250").unwrap();

        let config = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(config.interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_load_missing_file() {
        let err = BridgeConfig::load("/nonexistent/opcbridge.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = BridgeConfig::default();
        let rendered = config.to_toml_string().unwrap();
        assert_eq!(BridgeConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
