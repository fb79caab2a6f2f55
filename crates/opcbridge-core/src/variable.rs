//! Variable names, values and the snapshot shape.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::endpoint::EndpointKey;
use crate::error::{ConfigError, ConfigResult};

/// Values of one endpoint, keyed by variable name.
pub type EndpointValues = BTreeMap<VariableName, VariableValue>;

/// Latest known values across all endpoints.
///
/// Serializes as `{ "Server_4840": { "Sensor1_Temperature": 21.57, ... } }`.
pub type Snapshot = BTreeMap<EndpointKey, EndpointValues>;

// ============================================================================
// Variable Name
// ============================================================================

/// Display name of a variable in a server's address space
/// (e.g. "Sensor1_Temperature", "Uptime").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableName(String);

impl VariableName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VariableName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for VariableName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for VariableName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Variable Value
// ============================================================================

/// A numeric reading.
///
/// Serialized as a bare JSON number. Integer counters stay integers so
/// `Uptime` renders as `42`, not `42.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Integer(i64),
    Float(f64),
}

impl VariableValue {
    /// The placeholder for unknown or unread values.
    pub const ZERO: VariableValue = VariableValue::Float(0.0);

    pub fn as_f64(&self) -> f64 {
        match *self {
            VariableValue::Integer(i) => i as f64,
            VariableValue::Float(f) => f,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.as_f64() == 0.0
    }
}

impl Default for VariableValue {
    fn default() -> Self {
        Self::ZERO
    }
}

impl From<f64> for VariableValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for VariableValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableValue::Integer(i) => write!(f, "{i}"),
            VariableValue::Float(v) => write!(f, "{v}"),
        }
    }
}

// ============================================================================
// Rounding
// ============================================================================

/// Rounds floating readings whose name contains a marker.
///
/// With the default marker "Temperature", sensor readings are published
/// with two decimals while counters pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundingRule {
    pub marker: String,
    pub decimals: u32,
}

impl RoundingRule {
    pub fn new(marker: impl Into<String>, decimals: u32) -> Self {
        Self {
            marker: marker.into(),
            decimals,
        }
    }

    /// Returns true if readings of `name` get rounded.
    pub fn applies_to(&self, name: &VariableName) -> bool {
        !self.marker.is_empty() && name.as_str().contains(&self.marker)
    }

    /// Applies the rule to one reading.
    pub fn apply(&self, name: &VariableName, value: VariableValue) -> VariableValue {
        match value {
            VariableValue::Float(v) if self.applies_to(name) => {
                VariableValue::Float(round_to(v, self.decimals))
            }
            other => other,
        }
    }
}

impl Default for RoundingRule {
    fn default() -> Self {
        Self::new("Temperature", 2)
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals.min(15) as i32);
    (value * factor).round() / factor
}

// ============================================================================
// Expected Variable Set
// ============================================================================

/// The closed, per-deployment set of variable names to publish.
///
/// Every endpoint's snapshot entry contains exactly these names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableSet {
    names: Vec<VariableName>,
}

impl VariableSet {
    /// Builds the set, rejecting an empty list and duplicates.
    pub fn new<I, N>(names: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = N>,
        N: Into<VariableName>,
    {
        let names: Vec<VariableName> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(ConfigError::InvalidFieldValue {
                field: "variables.expected".to_string(),
                value: "[]".to_string(),
                expected: "at least one variable name".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateVariable {
                    name: name.to_string(),
                });
            }
        }

        Ok(Self { names })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.as_str() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableName> {
        self.names.iter()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// An entry with every expected name set to zero.
    pub fn zeroed(&self) -> EndpointValues {
        self.names
            .iter()
            .map(|n| (n.clone(), VariableValue::ZERO))
            .collect()
    }

    /// Projects `values` onto the expected set.
    ///
    /// Names outside the set are dropped, expected names without a value
    /// are filled with zero.
    pub fn normalize(&self, values: &EndpointValues) -> EndpointValues {
        self.names
            .iter()
            .map(|n| {
                let value = values.get(n).copied().unwrap_or(VariableValue::ZERO);
                (n.clone(), value)
            })
            .collect()
    }

    /// Expected names for which `present` has no entry, in configured order.
    pub fn missing<'a, F>(&'a self, present: F) -> Vec<&'a VariableName>
    where
        F: Fn(&VariableName) -> bool,
    {
        self.names.iter().filter(|n| !present(n)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected() -> VariableSet {
        VariableSet::new([
            "Sensor1_Temperature",
            "Sensor2_Temperature",
            "Uptime",
            "TotalProduction",
        ])
        .unwrap()
    }

    #[test]
    fn test_value_serializes_as_bare_number() {
        let mut values = EndpointValues::new();
        values.insert("Sensor1_Temperature".into(), VariableValue::Float(21.57));
        values.insert("Uptime".into(), VariableValue::Integer(42));

        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"{"Sensor1_Temperature":21.57,"Uptime":42}"#);
    }

    #[test]
    fn test_value_deserializes_integer_and_float() {
        let v: VariableValue = serde_json::from_str("42").unwrap();
        assert_eq!(v, VariableValue::Integer(42));
        let v: VariableValue = serde_json::from_str("0.0").unwrap();
        assert_eq!(v, VariableValue::Float(0.0));
    }

    #[test]
    fn test_zero_value() {
        assert!(VariableValue::ZERO.is_zero());
        assert!(VariableValue::Integer(0).is_zero());
        assert!(!VariableValue::Integer(3).is_zero());
        assert_eq!(VariableValue::default(), VariableValue::ZERO);
    }

    #[test]
    fn test_rounding_rule_temperature_only() {
        let rule = RoundingRule::default();
        let temp = VariableName::from("Sensor1_Temperature");
        let uptime = VariableName::from("Uptime");

        assert_eq!(rule.apply(&temp, 21.567.into()), VariableValue::Float(21.57));
        assert_eq!(rule.apply(&temp, 35.0.into()), VariableValue::Float(35.0));
        assert_eq!(rule.apply(&uptime, 42i64.into()), VariableValue::Integer(42));
        assert_eq!(rule.apply(&uptime, 1.23456.into()), VariableValue::Float(1.23456));
        // Integer temperatures are not turned into floats
        assert_eq!(rule.apply(&temp, 30i64.into()), VariableValue::Integer(30));
    }

    #[test]
    fn test_rounding_rule_empty_marker_disables() {
        let rule = RoundingRule::new("", 2);
        let temp = VariableName::from("Sensor1_Temperature");
        assert_eq!(rule.apply(&temp, 21.567.into()), VariableValue::Float(21.567));
    }

    #[test]
    fn test_variable_set_zeroed() {
        let set = expected();
        let zeroed = set.zeroed();
        assert_eq!(zeroed.len(), 4);
        assert!(zeroed.values().all(VariableValue::is_zero));
    }

    #[test]
    fn test_variable_set_normalize() {
        let set = expected();
        let mut values = EndpointValues::new();
        values.insert("Uptime".into(), VariableValue::Integer(7));
        values.insert("Sensor3_Temperature".into(), VariableValue::Float(1.0));

        let normalized = set.normalize(&values);
        assert_eq!(normalized.len(), 4);
        assert_eq!(normalized.get("Uptime"), Some(&VariableValue::Integer(7)));
        assert_eq!(normalized.get("TotalProduction"), Some(&VariableValue::ZERO));
        assert!(normalized.get("Sensor3_Temperature").is_none());
    }

    #[test]
    fn test_variable_set_missing() {
        let set = expected();
        let missing = set.missing(|n| n.as_str() != "Uptime");
        assert_eq!(missing, vec![&VariableName::from("Uptime")]);
    }

    #[test]
    fn test_variable_set_validation() {
        assert!(VariableSet::new(Vec::<String>::new()).is_err());
        let err = VariableSet::new(["Uptime", "Uptime"]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::DuplicateVariable {
                name: "Uptime".to_string()
            }
        );
        assert!(expected().contains("Uptime"));
        assert!(!expected().contains("Sensor3_Temperature"));
    }
}
