//! Runtime error channel: exceptions, control-flow signals, suspension.
//!
//! Everything the evaluator can do besides produce a value travels as a
//! [`RunError`]: a catchable SL exception, a `break`/`continue`/`return`
//! signal consumed by the matching construct, a cooperative suspension
//! carrying the pending external call, or an internal fault that user
//! code can never observe as a catchable value.

use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use strum::{Display, EnumString, IntoStaticStr};

use crate::class::{ClassId, classes};
use crate::source::Pos;
use crate::value::Value;

/// Result type for everything the evaluator does.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// Built-in exception kinds.
///
/// Each kind is backed by a built-in class at a fixed [`ClassId`], so
/// exception values constructed deep inside value operations need no
/// registry access. `StackOverflow`, `Cancelled` and `Internal` do not
/// descend from `Exception`: the generic `catch (e: Exception)` never
/// matches them, though the first two can still be named explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ExcType {
    /// Base class of every user-catchable exception.
    Exception,
    /// Unknown name, wrong arity, missing member.
    ResolutionError,
    /// Divide by zero and numeric domain errors.
    ArithmeticError,
    IndexError,
    KeyError,
    /// Member access through `null`.
    NullAccess,
    /// Type mismatch in built-in dispatch.
    CastError,
    IllegalArgument,
    /// Recursion limit exceeded; uncatchable by `Exception`.
    StackOverflow,
    /// Cooperative cancellation; catchable only by name.
    Cancelled,
    /// A bug in the runtime; never caught by user code.
    Internal,
}

impl ExcType {
    pub(crate) const ALL: [Self; 11] = [
        Self::Exception,
        Self::ResolutionError,
        Self::ArithmeticError,
        Self::IndexError,
        Self::KeyError,
        Self::NullAccess,
        Self::CastError,
        Self::IllegalArgument,
        Self::StackOverflow,
        Self::Cancelled,
        Self::Internal,
    ];

    fn index(self) -> u32 {
        Self::ALL
            .iter()
            .position(|t| *t == self)
            .expect("every variant is listed in ALL") as u32
    }

    /// The fixed registry id of the class backing this kind.
    pub(crate) fn class_id(self) -> ClassId {
        ClassId(classes::EXC_BASE.0 + self.index())
    }

    /// The kind backing a built-in exception class id, if any.
    pub(crate) fn from_class_id(class: ClassId) -> Option<Self> {
        let index = class.0.checked_sub(classes::EXC_BASE.0)? as usize;
        Self::ALL.get(index).copied()
    }

    /// The parent class installed for this kind. Kinds outside the
    /// `Exception` hierarchy have none, which is what keeps them out of
    /// reach of the generic handler.
    pub(crate) fn parent_class(self) -> Option<ClassId> {
        match self {
            Self::Exception | Self::StackOverflow | Self::Cancelled | Self::Internal => None,
            _ => Some(Self::Exception.class_id()),
        }
    }

    /// Whether `catch (e: handler)` with this handler kind matches a
    /// raised exception of kind `self`.
    #[must_use]
    pub fn is_subclass_of(self, handler: Self) -> bool {
        if self == handler {
            return true;
        }
        match handler {
            Self::Exception => !matches!(self, Self::StackOverflow | Self::Cancelled | Self::Internal),
            _ => false,
        }
    }

    /// Builds an in-flight exception with the given message.
    pub(crate) fn raise<T>(self, message: impl Into<String>) -> RunResult<T> {
        Err(self.error(message))
    }

    pub(crate) fn error(self, message: impl Into<String>) -> RunError {
        RunError::Exc(Box::new(ExceptionRaise {
            exc: Rc::new(ExceptionValue::new(self.class_id(), message.into(), None)),
        }))
    }
}

/// One captured stack-trace entry: the function name and the position
/// of the last statement executed in that frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function: String,
    pub pos: Pos,
}

/// The runtime exception payload, shared by reference. The stack is
/// filled in frame by frame while the raise unwinds.
#[derive(Debug)]
pub(crate) struct ExceptionValue {
    pub class: ClassId,
    pub message: Rc<str>,
    pub cause: Option<Value>,
    pub stack: RefCell<Vec<StackFrame>>,
}

impl ExceptionValue {
    pub fn new(class: ClassId, message: impl Into<String>, cause: Option<Value>) -> Self {
        let message: String = message.into();
        Self {
            class,
            message: Rc::from(message.as_str()),
            cause,
            stack: RefCell::new(Vec::new()),
        }
    }
}

/// An exception in flight.
#[derive(Debug)]
pub(crate) struct ExceptionRaise {
    pub exc: Rc<ExceptionValue>,
}

impl ExceptionRaise {
    pub fn new(exc: Rc<ExceptionValue>) -> Self {
        Self { exc }
    }

    /// Appends an unwound frame to the captured stack.
    pub fn push_frame(&self, function: &str, pos: Pos) {
        self.exc.stack.borrow_mut().push(StackFrame {
            function: function.to_owned(),
            pos,
        });
    }
}

/// A pending control-flow outcome travelling up to the construct that
/// consumes it.
#[derive(Debug)]
pub(crate) enum Signal {
    Break { label: Option<Rc<str>> },
    Continue { label: Option<Rc<str>> },
    Return(Value),
}

impl Signal {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Break { .. } => "break",
            Self::Continue { .. } => "continue",
            Self::Return(_) => "return",
        }
    }
}

/// An external host call the evaluator suspended on.
#[derive(Debug)]
pub(crate) struct PendingCall {
    pub name: Rc<str>,
    pub args: Vec<Value>,
    pub pos: Pos,
}

#[derive(Debug)]
pub(crate) enum RunError {
    /// Catchable SL exception (or `Cancelled`/`StackOverflow`, which
    /// only a named handler matches).
    Exc(Box<ExceptionRaise>),
    /// `break`/`continue`/`return` on its way to the matching construct.
    Signal(Signal),
    /// Cooperative suspension at an external call site.
    Suspend(Box<PendingCall>),
    /// Runtime bug; surfaces to the embedder, never to user code.
    Internal(Cow<'static, str>),
}

impl RunError {
    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(message.into())
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exc(raise) => write!(f, "exception: {}", raise.exc.message),
            Self::Signal(signal) => write!(f, "unconsumed {} signal", signal.describe()),
            Self::Suspend(call) => write!(f, "suspended at external call '{}'", call.name),
            Self::Internal(message) => write!(f, "internal error: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_matches_user_catchable_kinds() {
        assert!(ExcType::KeyError.is_subclass_of(ExcType::Exception));
        assert!(ExcType::ArithmeticError.is_subclass_of(ExcType::Exception));
        assert!(ExcType::Exception.is_subclass_of(ExcType::Exception));
    }

    #[test]
    fn uncatchable_kinds_escape_the_generic_handler() {
        assert!(!ExcType::Cancelled.is_subclass_of(ExcType::Exception));
        assert!(!ExcType::Internal.is_subclass_of(ExcType::Exception));
        assert!(!ExcType::StackOverflow.is_subclass_of(ExcType::Exception));
        assert!(ExcType::Cancelled.is_subclass_of(ExcType::Cancelled));
    }

    #[test]
    fn class_ids_follow_declaration_order() {
        assert_eq!(ExcType::Exception.class_id(), classes::EXCEPTION);
        assert_eq!(
            ExcType::Internal.class_id().0,
            classes::BUILTIN_COUNT - 1,
            "Internal is the last built-in class"
        );
    }

    #[test]
    fn kind_names_round_trip_through_strum() {
        use std::str::FromStr;
        let name: &'static str = ExcType::KeyError.into();
        assert_eq!(name, "KeyError");
        assert_eq!(ExcType::from_str("KeyError").unwrap(), ExcType::KeyError);
    }
}
