//! Dynamic values read from instrumented host objects.
//!
//! Host types expose their state to the engine through [`Traceable`]; every
//! read produces an owned [`Value`]. Nested host objects travel as
//! [`Value::Object`] so path resolution can keep descending into them.

use std::any::type_name;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::ids::InstanceId;

/// Keyword arguments of a call segment. Values are always strings.
pub type Kwargs = BTreeMap<String, String>;

/// Capability interface implemented by every host type the engine can read.
///
/// All lookups are infallible: a missing field or operation is `None`, never
/// an error.
pub trait Traceable: Send + Sync {
    /// Attribute access.
    ///
    /// Nested hosts without a [`Traceable::content_identity`] are identified
    /// by the `Arc` they travel in. Return them as clones of an `Arc` the
    /// host keeps (see [`Value::shared`]); wrapping a fresh object on every
    /// read makes each read a new entity.
    fn field(&self, name: &str) -> Option<Value>;

    /// Invoke a keyword-only operation. `None` when no such operation exists.
    fn invoke(&self, _name: &str, _kwargs: &Kwargs) -> Option<Value> {
        None
    }

    /// Mapping-like hosts resolve segments through [`Traceable::key`] instead
    /// of [`Traceable::field`].
    fn is_mapping(&self) -> bool {
        false
    }

    fn key(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Filename of the configuration this instance was built from.
    ///
    /// Defaults to reading `config.filename`.
    fn config_filename(&self) -> Option<String> {
        let config = self.field("config")?;
        match config.child("filename")? {
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Stable content identity, when the host can provide one. Objects that
    /// return `None` are treated as unhashable.
    fn content_identity(&self) -> Option<String> {
        None
    }

    fn is_truthy(&self) -> bool {
        true
    }

    fn type_name(&self) -> &'static str {
        type_name::<Self>()
    }
}

/// A host whose operations are traced as activities.
///
/// Sessions are keyed on [`Instrumented::instance_id`], so one instance keeps
/// its session wherever it is moved, and a new instance always opens a new one.
pub trait Instrumented: Traceable {
    fn instance_id(&self) -> &InstanceId;
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(Arc<dyn Traceable>),
}

impl Value {
    /// Wrap a freshly built host object.
    ///
    /// Every call creates a new `Arc`, hence a new entity unless the object
    /// implements [`Traceable::content_identity`]. For state that is read
    /// repeatedly, keep the `Arc` on the host and use [`Value::shared`].
    #[must_use]
    pub fn object<T: Traceable + 'static>(object: T) -> Self {
        Self::Object(Arc::new(object))
    }

    /// Share a host object the caller already holds.
    #[must_use]
    pub fn shared<T: Traceable + 'static>(object: &Arc<T>) -> Self {
        Self::Object(Arc::clone(object) as Arc<dyn Traceable>)
    }

    /// Python-style truthiness: null, `false`, zero, and empty strings or
    /// containers are falsy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Object(object) => object.is_truthy(),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Single-step lookup: map key for maps and mapping hosts, attribute for
    /// other objects. Scalars have no children.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<Value> {
        match self {
            Value::Map(map) => map.get(name).cloned(),
            Value::Object(object) if object.is_mapping() => object.key(name),
            Value::Object(object) => object.field(name),
            _ => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Value::Float(x) => f.debug_tuple("Float").field(x).finish(),
            Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Map(map) => f.debug_tuple("Map").field(map).finish(),
            Value::Object(object) => f.debug_tuple("Object").field(&object.type_name()).finish(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// The stringified form used for generic identities and for ids built from
/// explicit `id` paths.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            Value::List(_) | Value::Map(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
            Value::Object(object) => match object.content_identity() {
                Some(identity) => f.write_str(&identity),
                None => write!(f, "<{}>", object.type_name()),
            },
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Str(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
            Value::Object(_) => serializer.collect_str(self),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Map(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float))
                .unwrap_or_else(|| Value::Str(n.to_string())),
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
