//! Call arguments: an immutable, shareable argument pack plus the
//! pooled builder that call sites fill positionally.
//!
//! Most calls pass at most two arguments, so the payload uses dedicated
//! small shapes before falling back to a `Vec`. The builder hands its
//! backing vector back to a thread-local pool on freeze; argument
//! values themselves are never copied, only their handles move.

use std::cell::RefCell;
use std::rc::Rc;

use crate::exception::{ExcType, RunResult};
use crate::value::Value;

#[derive(Debug)]
enum ArgsPayload {
    Empty,
    One(Value),
    Two([Value; 2]),
    Many(Vec<Value>),
}

#[derive(Debug)]
struct ArgsData {
    payload: ArgsPayload,
    /// Whether the final argument was written as a trailing block
    /// (`f(x) { ... }`); control-flow-like callees inspect this.
    tail_block: bool,
}

/// Immutable argument pack. Cloning shares the payload.
#[derive(Debug, Clone)]
pub(crate) struct Arguments(Rc<ArgsData>);

impl Arguments {
    pub fn empty() -> Self {
        Self(Rc::new(ArgsData {
            payload: ArgsPayload::Empty,
            tail_block: false,
        }))
    }

    pub fn of(values: Vec<Value>) -> Self {
        let mut builder = ArgsBuilder::acquire(false);
        for value in values {
            builder.push(value);
        }
        builder.freeze()
    }

    pub fn one(value: Value) -> Self {
        Self(Rc::new(ArgsData {
            payload: ArgsPayload::One(value),
            tail_block: false,
        }))
    }

    pub fn len(&self) -> usize {
        match &self.0.payload {
            ArgsPayload::Empty => 0,
            ArgsPayload::One(_) => 1,
            ArgsPayload::Two(_) => 2,
            ArgsPayload::Many(values) => values.len(),
        }
    }

    pub fn tail_block(&self) -> bool {
        self.0.tail_block
    }

    pub fn as_slice(&self) -> &[Value] {
        match &self.0.payload {
            ArgsPayload::Empty => &[],
            ArgsPayload::One(value) => std::slice::from_ref(value),
            ArgsPayload::Two(pair) => pair,
            ArgsPayload::Many(values) => values,
        }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.as_slice().get(index)
    }

    /// Requires zero arguments, in the style of the built-in methods.
    pub fn check_empty(&self, name: &str) -> RunResult<()> {
        if self.len() == 0 {
            Ok(())
        } else {
            ExcType::ResolutionError.raise(format!(
                "{name}() takes no arguments ({} given)",
                self.len()
            ))
        }
    }

    /// Requires exactly one argument and returns it.
    pub fn exactly_one(&self, name: &str) -> RunResult<&Value> {
        match self.as_slice() {
            [value] => Ok(value),
            other => ExcType::ResolutionError.raise(format!(
                "{name}() takes exactly one argument ({} given)",
                other.len()
            )),
        }
    }

    /// Requires exactly two arguments.
    pub fn exactly_two(&self, name: &str) -> RunResult<(&Value, &Value)> {
        match self.as_slice() {
            [a, b] => Ok((a, b)),
            other => ExcType::ResolutionError.raise(format!(
                "{name}() takes exactly 2 arguments ({} given)",
                other.len()
            )),
        }
    }

    /// One required argument plus an optional second.
    pub fn one_or_two(&self, name: &str) -> RunResult<(&Value, Option<&Value>)> {
        match self.as_slice() {
            [a] => Ok((a, None)),
            [a, b] => Ok((a, Some(b))),
            other => ExcType::ResolutionError.raise(format!(
                "{name}() takes 1 or 2 arguments ({} given)",
                other.len()
            )),
        }
    }

    /// Zero arguments or a single one.
    pub fn at_most_one(&self, name: &str) -> RunResult<Option<&Value>> {
        match self.as_slice() {
            [] => Ok(None),
            [value] => Ok(Some(value)),
            other => ExcType::ResolutionError.raise(format!(
                "{name}() takes at most one argument ({} given)",
                other.len()
            )),
        }
    }
}

const BUILDER_POOL_LIMIT: usize = 16;

thread_local! {
    static BUILDER_POOL: RefCell<Vec<Vec<Value>>> = const { RefCell::new(Vec::new()) };
}

/// Reusable positional accumulator for one call site evaluation.
pub(crate) struct ArgsBuilder {
    values: Vec<Value>,
    tail_block: bool,
    pooled: bool,
}

impl ArgsBuilder {
    /// Acquires a builder, reusing a pooled backing vector when the
    /// `arg_builder` flag is on.
    pub fn acquire(pooled: bool) -> Self {
        let values = if pooled {
            BUILDER_POOL.with_borrow_mut(|pool| pool.pop()).unwrap_or_default()
        } else {
            Vec::new()
        };
        Self {
            values,
            tail_block: false,
            pooled,
        }
    }

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn mark_tail_block(&mut self) {
        self.tail_block = true;
    }

    /// Freezes the accumulated values into an immutable pack and
    /// returns the backing vector to the pool.
    pub fn freeze(mut self) -> Arguments {
        let payload = match self.values.len() {
            0 => ArgsPayload::Empty,
            1 => ArgsPayload::One(self.values.pop().expect("length checked")),
            2 => {
                let b = self.values.pop().expect("length checked");
                let a = self.values.pop().expect("length checked");
                ArgsPayload::Two([a, b])
            }
            _ => ArgsPayload::Many(self.values.drain(..).collect()),
        };
        if self.pooled {
            let mut values = std::mem::take(&mut self.values);
            values.clear();
            BUILDER_POOL.with_borrow_mut(|pool| {
                if pool.len() < BUILDER_POOL_LIMIT {
                    pool.push(values);
                }
            });
        }
        Arguments(Rc::new(ArgsData {
            payload,
            tail_block: self.tail_block,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_shapes() {
        assert_eq!(Arguments::empty().len(), 0);
        let one = Arguments::one(Value::Int(1));
        assert_eq!(one.len(), 1);
        assert!(matches!(one.get(0), Some(Value::Int(1))));
        let two = Arguments::of(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(two.as_slice().len(), 2);
    }

    #[test]
    fn builder_preserves_identity() {
        let shared = Value::list(vec![Value::Int(1)]);
        let mut builder = ArgsBuilder::acquire(true);
        builder.push(shared.clone());
        let args = builder.freeze();
        assert!(args.get(0).unwrap().sl_eq(&shared));
    }

    #[test]
    fn arity_helpers_report_counts() {
        let args = Arguments::of(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert!(args.exactly_one("size").is_err());
        assert!(args.check_empty("size").is_err());
        assert!(args.one_or_two("get").is_err());
    }

    #[test]
    fn tail_block_flag_survives_freeze() {
        let mut builder = ArgsBuilder::acquire(false);
        builder.push(Value::Int(1));
        builder.mark_tail_block();
        assert!(builder.freeze().tail_block());
    }
}
