//! Node handles and raw values as seen on the wire.

use std::fmt;

use opcbridge_core::VariableValue;

/// Opaque, connection-scoped reference to a node.
///
/// Wraps the node id text (e.g. "ns=2;i=10"). Handles obtained on one
/// connection must not be reused after reconnecting; the server may have
/// restarted with a different address space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeHandle(String);

impl NodeHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A value as returned by a server, before it is published.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    Float(f64),
    Int(i64),
    UInt(u64),
    Bool(bool),
    Text(String),
}

impl NodeValue {
    /// Converts to a publishable number.
    ///
    /// Booleans map to 0/1. Unsigned values beyond `i64::MAX` degrade to
    /// floats. Text and non-finite floats (NaN, infinities) have no JSON
    /// number form and yield `None`.
    pub fn to_numeric(&self) -> Option<VariableValue> {
        match self {
            NodeValue::Float(f) if f.is_finite() => Some(VariableValue::Float(*f)),
            NodeValue::Float(_) => None,
            NodeValue::Int(i) => Some(VariableValue::Integer(*i)),
            NodeValue::UInt(u) => Some(
                i64::try_from(*u)
                    .map(VariableValue::Integer)
                    .unwrap_or(VariableValue::Float(*u as f64)),
            ),
            NodeValue::Bool(b) => Some(VariableValue::Integer(i64::from(*b))),
            NodeValue::Text(_) => None,
        }
    }

    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeValue::Float(f) if f.is_finite() => "float",
            NodeValue::Float(_) => "non-finite float",
            NodeValue::Int(_) => "int",
            NodeValue::UInt(_) => "uint",
            NodeValue::Bool(_) => "bool",
            NodeValue::Text(_) => "text",
        }
    }
}

impl From<f64> for NodeValue {
    fn from(v: f64) -> Self {
        NodeValue::Float(v)
    }
}

impl From<i64> for NodeValue {
    fn from(v: i64) -> Self {
        NodeValue::Int(v)
    }
}

impl From<bool> for NodeValue {
    fn from(v: bool) -> Self {
        NodeValue::Bool(v)
    }
}

impl From<VariableValue> for NodeValue {
    fn from(v: VariableValue) -> Self {
        match v {
            VariableValue::Integer(i) => NodeValue::Int(i),
            VariableValue::Float(f) => NodeValue::Float(f),
        }
    }
}
