//! Evaluates schema paths against live host objects.
//!
//! Resolution never fails: a missing field, key, or operation yields `None`.
//! Two compatibility rules apply, both backed by the fallback [`Namespace`]:
//!
//! - once an intermediate segment resolves to nothing, the *next* segment name
//!   is looked up in the namespace and returned immediately;
//! - a falsy final value is replaced by the namespace entry for the leaf name
//!   (disabled with `options.empty_value_fallback = false`).

use std::collections::BTreeMap;

use lineage_config::{PathExpr, Segment};
use lineage_types::{PROV_PREFIX, Traceable, Value};

use crate::identity::HASH_TYPE;

/// Named constants consulted when a path runs out of context.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    constants: BTreeMap<String, Value>,
}

impl Namespace {
    /// The engine's own constants (`PROV_PREFIX`, `HASH_TYPE`).
    #[must_use]
    pub fn with_engine_constants() -> Self {
        let mut ns = Self::default();
        ns.insert("PROV_PREFIX", PROV_PREFIX);
        ns.insert("HASH_TYPE", HASH_TYPE);
        ns
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.constants.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.constants.get(name)
    }
}

/// Starting point of a resolution.
#[derive(Clone, Copy)]
pub enum Root<'a> {
    /// The instrumented instance, borrowed for the duration of the call.
    Instance(&'a dyn Traceable),
    /// A value obtained earlier, e.g. one member of a collection.
    Value(&'a Value),
}

pub struct PathResolver<'a> {
    namespace: &'a Namespace,
    empty_value_fallback: bool,
}

impl<'a> PathResolver<'a> {
    #[must_use]
    pub fn new(namespace: &'a Namespace, empty_value_fallback: bool) -> Self {
        Self {
            namespace,
            empty_value_fallback,
        }
    }

    #[must_use]
    pub fn resolve(&self, root: Root<'_>, path: &PathExpr) -> Option<Value> {
        let Some((first, rest)) = path.segments().split_first() else {
            return match root {
                Root::Value(value) if !value.is_null() => Some(value.clone()),
                _ => None,
            };
        };

        let mut current = match root {
            Root::Instance(object) => step_object(object, first),
            Root::Value(Value::Null) => return self.constant(first.name()),
            Root::Value(value) => step_value(value, first),
        };

        for segment in rest {
            let Some(value) = current else {
                return self.constant(segment.name());
            };
            current = step_value(&value, segment);
        }

        if self.empty_value_fallback && !current.as_ref().is_some_and(Value::is_truthy) {
            return path.leaf().and_then(|leaf| self.constant(leaf));
        }
        current
    }

    fn constant(&self, name: &str) -> Option<Value> {
        self.namespace.get(name).cloned()
    }
}

fn step_value(value: &Value, segment: &Segment) -> Option<Value> {
    let next = match value {
        Value::Map(map) => match segment {
            Segment::Name(name) => map.get(name).cloned(),
            Segment::Call { .. } => None,
        },
        Value::Object(object) => step_object(object.as_ref(), segment),
        _ => None,
    };
    next.filter(|value| !value.is_null())
}

fn step_object(object: &dyn Traceable, segment: &Segment) -> Option<Value> {
    let value = match segment {
        Segment::Name(name) if object.is_mapping() => object.key(name),
        Segment::Name(name) => object.field(name),
        Segment::Call { .. } if object.is_mapping() => None,
        Segment::Call { name, kwargs } => object.invoke(name, kwargs),
    };
    value.filter(|value| !value.is_null())
}
