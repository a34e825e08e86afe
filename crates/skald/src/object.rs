//! Public value mirror.
//!
//! [`Object`] is what crosses the embedding boundary: host function
//! arguments and results, `set_var`/`get_var`, and the final value of
//! an execution. Containers are mirrored structurally (deep copies);
//! values with no structural mirror (functions, classes, instances,
//! iterators) cross as their rendered representation.

use std::fmt;

use num_bigint::BigInt;

use crate::exception::RunResult;
use crate::interp::Interp;
use crate::value::{MapData, Value, format_real};

#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Void,
    Null,
    Bool(bool),
    Int(i64),
    BigInt(BigInt),
    Real(f64),
    Char(char),
    Str(String),
    List(Vec<Object>),
    /// Insertion-ordered key/value pairs.
    Map(Vec<(Object, Object)>),
    /// Rendered form of a value without a structural mirror.
    Repr(String),
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("void"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::BigInt(b) => write!(f, "{b}"),
            Self::Real(r) => f.write_str(&format_real(*r)),
            Self::Char(c) => write!(f, "{c}"),
            Self::Str(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(pairs) => {
                f.write_str("{")?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            Self::Repr(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Object {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Object {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Object {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for Object {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Object {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl TryFrom<&Object> for i64 {
    type Error = String;

    fn try_from(value: &Object) -> Result<Self, Self::Error> {
        match value {
            Object::Int(i) => Ok(*i),
            other => Err(format!("expected Int, got {other}")),
        }
    }
}

impl TryFrom<&Object> for bool {
    type Error = String;

    fn try_from(value: &Object) -> Result<Self, Self::Error> {
        match value {
            Object::Bool(b) => Ok(*b),
            other => Err(format!("expected Bool, got {other}")),
        }
    }
}

impl TryFrom<&Object> for f64 {
    type Error = String;

    fn try_from(value: &Object) -> Result<Self, Self::Error> {
        match value {
            Object::Real(r) => Ok(*r),
            Object::Int(i) => Ok(*i as f64),
            other => Err(format!("expected Real, got {other}")),
        }
    }
}

impl TryFrom<&Object> for String {
    type Error = String;

    fn try_from(value: &Object) -> Result<Self, Self::Error> {
        match value {
            Object::Str(s) => Ok(s.clone()),
            other => Err(format!("expected String, got {other}")),
        }
    }
}

/// Converts a host value into a runtime value. Containers become fresh
/// runtime containers.
pub(crate) fn value_from_object(object: &Object) -> Value {
    match object {
        Object::Void => Value::Void,
        Object::Null => Value::Null,
        Object::Bool(b) => Value::Bool(*b),
        Object::Int(i) => Value::Int(*i),
        Object::BigInt(b) => Value::from_big(b.clone()),
        Object::Real(r) => Value::Real(*r),
        Object::Char(c) => Value::Char(*c),
        Object::Str(s) => Value::str(s),
        Object::List(items) => Value::list(items.iter().map(value_from_object).collect()),
        Object::Map(pairs) => {
            let mut map = MapData::default();
            for (key, value) in pairs {
                let key = value_from_object(key);
                if let Some(hashed) = key.hash_key() {
                    map.insert(hashed, (key, value_from_object(value)));
                }
            }
            Value::Map(std::rc::Rc::new(std::cell::RefCell::new(map)))
        }
        Object::Repr(s) => Value::str(s),
    }
}

const MIRROR_DEPTH_LIMIT: usize = 32;

/// Mirrors a runtime value out to the host.
pub(crate) fn object_from_value(interp: &mut Interp, value: &Value) -> RunResult<Object> {
    object_from_value_at(interp, value, 0)
}

fn object_from_value_at(interp: &mut Interp, value: &Value, depth: usize) -> RunResult<Object> {
    if depth > MIRROR_DEPTH_LIMIT {
        return Ok(Object::Repr("...".to_owned()));
    }
    Ok(match value {
        Value::Void => Object::Void,
        Value::Null => Object::Null,
        Value::Bool(b) => Object::Bool(*b),
        Value::Int(i) => Object::Int(*i),
        Value::Big(b) => Object::BigInt(b.as_ref().clone()),
        Value::Real(r) => Object::Real(*r),
        Value::Char(c) => Object::Char(*c),
        Value::Str(s) => Object::Str(s.to_string()),
        Value::List(list) => {
            let items = list.borrow().clone();
            let mut out = Vec::with_capacity(items.len());
            for item in &items {
                out.push(object_from_value_at(interp, item, depth + 1)?);
            }
            Object::List(out)
        }
        Value::Map(map) => {
            let pairs: Vec<(Value, Value)> = map.borrow().values().cloned().collect();
            let mut out = Vec::with_capacity(pairs.len());
            for (key, mapped) in &pairs {
                out.push((
                    object_from_value_at(interp, key, depth + 1)?,
                    object_from_value_at(interp, mapped, depth + 1)?,
                ));
            }
            Object::Map(out)
        }
        Value::Set(set) => {
            let items: Vec<Value> = set.borrow().values().cloned().collect();
            let mut out = Vec::with_capacity(items.len());
            for item in &items {
                out.push(object_from_value_at(interp, item, depth + 1)?);
            }
            Object::List(out)
        }
        other => Object::Repr(interp.display_value(other)?),
    })
}
