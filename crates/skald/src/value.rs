//! The runtime value universe.
//!
//! `Value` is a tagged handle: scalars are stored inline, everything
//! mutable or sizeable sits behind `Rc`. Cloning a `Value` clones a
//! handle, never the payload, which is what lets arguments, scope slots
//! and container elements share identity.
//!
//! The class of a value never changes after construction: scalars and
//! built-in containers map to fixed [`ClassId`]s, instances and
//! exceptions carry theirs inline.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::args::Arguments;
use crate::builtins::iter::IterValue;
use crate::class::{Arity, ClassId, UserFn, classes};
use crate::exception::{ExceptionValue, RunResult};
use crate::interp::Interp;

/// Insertion-ordered map payload. Keys are hashed [`MapKey`]s; the
/// original key value is kept alongside the mapped value so iteration
/// yields what the program inserted.
pub(crate) type MapData = IndexMap<MapKey, (Value, Value), ahash::RandomState>;
/// Set payload: hashed key plus the original element.
pub(crate) type SetData = IndexMap<MapKey, Value, ahash::RandomState>;

#[derive(Debug, Clone)]
pub(crate) enum Value {
    Void,
    Null,
    Bool(bool),
    /// Machine-word integer. Overflow promotes storage to `Big`; the
    /// class stays `Int` either way.
    Int(i64),
    /// Integer too large for an `i64`. Results that fit back into an
    /// `i64` are re-narrowed on construction, so a `Big` never holds a
    /// small value.
    Big(Rc<BigInt>),
    Real(f64),
    Char(char),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<MapData>>),
    Set(Rc<RefCell<SetData>>),
    Range(Rc<RangeValue>),
    Regex(Rc<RegexValue>),
    Function(Rc<FunctionValue>),
    Class(ClassId),
    Instance(Rc<InstanceValue>),
    Exception(Rc<ExceptionValue>),
    Iterator(Rc<RefCell<IterValue>>),
}

/// Closed or half-open numeric range, with an optional step set via the
/// `step` method. Bounds are `Int` or `Real` values.
#[derive(Debug)]
pub(crate) struct RangeValue {
    pub start: Value,
    pub end: Value,
    pub inclusive: bool,
    pub step: Value,
}

#[derive(Debug)]
pub(crate) struct RegexValue {
    pub pattern: Rc<str>,
    pub flags: Rc<str>,
    pub re: regex::Regex,
}

/// Callable value: script functions and lambdas, bound methods produced
/// by member access, host functions and external (suspending) ones.
///
/// A bound method stores only the receiver and the selector; resolution
/// happens again at call time so the arity bucket is chosen against the
/// actual arguments and redefinitions are honoured.
pub(crate) enum FunctionValue {
    User(Rc<UserFn>),
    Bound {
        recv: Value,
        name: Rc<str>,
    },
    Host(HostFn),
    /// Declared by the embedder without an in-process body; calling it
    /// suspends the execution.
    External { name: Rc<str>, arity: Arity },
}

pub(crate) struct HostFn {
    pub name: Rc<str>,
    pub arity: Arity,
    pub body: Box<dyn Fn(&mut Interp, &Arguments) -> RunResult<Value>>,
}

impl std::fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(func) => write!(f, "fun {}", func.name),
            Self::Bound { name, .. } => write!(f, "bound fun {name}"),
            Self::Host(host) => write!(f, "host fun {}", host.name),
            Self::External { name, .. } => write!(f, "external fun {name}"),
        }
    }
}

/// A user-class instance: its class id plus the field slot vector laid
/// out by the class (parent fields first).
#[derive(Debug)]
pub(crate) struct InstanceValue {
    pub class: ClassId,
    pub fields: RefCell<Vec<Value>>,
}

/// Hashable key form of a value. Only scalars and strings are hashable;
/// containers, functions and instances are rejected at the call site.
/// `Int` and `Real` keys stay distinct even when numerically equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum MapKey {
    Null,
    Bool(bool),
    Int(i64),
    Big(Rc<BigInt>),
    /// IEEE bits with negative zero normalised, so `0.0` and `-0.0`
    /// land on one key.
    Real(u64),
    Char(char),
    Str(Rc<str>),
}

impl Value {
    /// The class of the value. Never changes after construction.
    pub fn class_id(&self) -> ClassId {
        match self {
            Self::Void => classes::VOID,
            Self::Null => classes::NULL,
            Self::Bool(_) => classes::BOOL,
            Self::Int(_) | Self::Big(_) => classes::INT,
            Self::Real(_) => classes::REAL,
            Self::Char(_) => classes::CHAR,
            Self::Str(_) => classes::STRING,
            Self::List(_) => classes::LIST,
            Self::Map(_) => classes::MAP,
            Self::Set(_) => classes::SET,
            Self::Range(_) => classes::RANGE,
            Self::Regex(_) => classes::REGEX,
            Self::Function(_) => classes::FUNCTION,
            Self::Class(_) => classes::CLASS,
            Self::Iterator(_) => classes::ITERATOR,
            Self::Instance(inst) => inst.class,
            Self::Exception(exc) => exc.class,
        }
    }

    pub fn from_big(big: BigInt) -> Self {
        match big.to_i64() {
            Some(small) => Self::Int(small),
            None => Self::Big(Rc::new(big)),
        }
    }

    pub fn str(s: impl AsRef<str>) -> Self {
        Self::Str(Rc::from(s.as_ref()))
    }

    pub fn list(values: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(values)))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&Rc<str>> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Rc<RefCell<Vec<Self>>>> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Rc<RefCell<MapData>>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Structural/identity equality: the default `equals` semantics.
    ///
    /// Numbers and strings compare by content across storage kinds;
    /// ranges and regexes are immutable and compare structurally;
    /// containers, functions, instances and exceptions compare by
    /// reference identity. User-defined `equals` overrides are honoured
    /// one level up, in [`Interp::values_equal`].
    pub fn sl_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Void, Self::Void) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Big(a), Self::Big(b)) => a == b,
            // A Big never holds an i64-sized value, so Int vs Big is
            // always unequal.
            (Self::Int(_), Self::Big(_)) | (Self::Big(_), Self::Int(_)) => false,
            (Self::Real(a), Self::Real(b)) => a == b,
            (Self::Int(a), Self::Real(b)) | (Self::Real(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Big(a), Self::Real(b)) | (Self::Real(b), Self::Big(a)) => {
                a.to_f64().is_some_and(|a| a == *b)
            }
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Map(a), Self::Map(b)) => Rc::ptr_eq(a, b),
            (Self::Set(a), Self::Set(b)) => Rc::ptr_eq(a, b),
            (Self::Range(a), Self::Range(b)) => {
                a.inclusive == b.inclusive
                    && a.start.sl_eq(&b.start)
                    && a.end.sl_eq(&b.end)
                    && a.step.sl_eq(&b.step)
            }
            (Self::Regex(a), Self::Regex(b)) => a.pattern == b.pattern && a.flags == b.flags,
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Class(a), Self::Class(b)) => a == b,
            (Self::Instance(a), Self::Instance(b)) => Rc::ptr_eq(a, b),
            (Self::Exception(a), Self::Exception(b)) => Rc::ptr_eq(a, b),
            (Self::Iterator(a), Self::Iterator(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Total-ish ordering for built-in comparable values. `Ok(None)`
    /// means the pair is numerically incomparable (a NaN operand);
    /// ordering operators treat that as false.
    pub fn sl_cmp(&self, other: &Self) -> Option<Option<Ordering>> {
        Some(match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Big(a), Self::Big(b)) => Some(a.as_ref().cmp(b.as_ref())),
            (Self::Int(a), Self::Big(b)) => Some(BigInt::from(*a).cmp(b.as_ref())),
            (Self::Big(a), Self::Int(b)) => Some(a.as_ref().cmp(&BigInt::from(*b))),
            (Self::Real(a), Self::Real(b)) => a.partial_cmp(b),
            (Self::Int(a), Self::Real(b)) => (*a as f64).partial_cmp(b),
            (Self::Real(a), Self::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Big(a), Self::Real(b)) => a.to_f64().and_then(|a| a.partial_cmp(b)),
            (Self::Real(a), Self::Big(b)) => b.to_f64().and_then(|b| a.partial_cmp(&b)),
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::Char(a), Self::Char(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => return None,
        })
    }

    /// Hashable key form, or `None` for unhashable values.
    pub fn hash_key(&self) -> Option<MapKey> {
        Some(match self {
            Self::Null => MapKey::Null,
            Self::Bool(b) => MapKey::Bool(*b),
            Self::Int(i) => MapKey::Int(*i),
            Self::Big(b) => MapKey::Big(Rc::clone(b)),
            Self::Real(r) => {
                let normalised = if *r == 0.0 { 0.0 } else { *r };
                MapKey::Real(normalised.to_bits())
            }
            Self::Char(c) => MapKey::Char(*c),
            Self::Str(s) => MapKey::Str(Rc::clone(s)),
            _ => return None,
        })
    }

    /// Scalar rendering without dispatch; containers and instances are
    /// rendered by [`Interp::display_value`], which recurses and may
    /// call a user `toString`.
    pub fn scalar_display(&self) -> Option<String> {
        Some(match self {
            Self::Void => "void".to_owned(),
            Self::Null => "null".to_owned(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Big(b) => b.to_string(),
            Self::Real(r) => format_real(*r),
            Self::Char(c) => c.to_string(),
            Self::Str(s) => s.to_string(),
            _ => return None,
        })
    }
}

/// Formats a `Real` the way the language prints it: always with a
/// decimal point or exponent, so `Int` and `Real` render differently.
pub(crate) fn format_real(value: f64) -> String {
    let mut buffer = ryu::Buffer::new();
    buffer.format(value).to_owned()
}

/// Escapes a string for `inspect` output.
pub(crate) fn quote_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_compare_across_storage_kinds() {
        assert!(Value::Int(3).sl_eq(&Value::Real(3.0)));
        assert!(!Value::Int(3).sl_eq(&Value::Real(3.5)));
        let big = BigInt::from(i64::MAX) + 1;
        assert!(matches!(Value::from_big(big), Value::Big(_)));
        assert!(matches!(Value::from_big(BigInt::from(7)), Value::Int(7)));
    }

    #[test]
    fn nan_is_unequal_to_itself() {
        let nan = Value::Real(f64::NAN);
        assert!(!nan.sl_eq(&nan));
        assert_eq!(nan.sl_cmp(&Value::Real(1.0)), Some(None));
    }

    #[test]
    fn lists_compare_by_identity() {
        let a = Value::list(vec![Value::Int(1)]);
        let b = Value::list(vec![Value::Int(1)]);
        assert!(!a.sl_eq(&b));
        assert!(a.sl_eq(&a.clone()));
    }

    #[test]
    fn zero_keys_collapse() {
        assert_eq!(
            Value::Real(0.0).hash_key(),
            Value::Real(-0.0).hash_key()
        );
    }

    #[test]
    fn containers_are_unhashable() {
        assert!(Value::list(vec![]).hash_key().is_none());
    }

    #[test]
    fn real_display_keeps_the_point() {
        assert_eq!(format_real(1.0), "1.0");
        assert_eq!(format_real(2.5), "2.5");
    }
}
