//! Operator semantics: the numeric tower and the binary dispatch
//! protocol.
//!
//! `Int` arithmetic stays on `i64` until it overflows, then promotes
//! the storage to a big integer; any big result that fits back into an
//! `i64` re-narrows. Mixed `Int`/`Real` operations produce `Real`.
//! Integer division truncates toward zero and a zero divisor raises
//! `ArithmeticError`.
//!
//! The monomorphic fast path below is used when `primitive_fastops` is
//! on; with the flag off the same functions run as the host `plus`/
//! `minus`/… methods installed on the numeric classes, so both routes
//! produce identical results by construction.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::ast::BinOp;
use crate::exception::{ExcType, RunResult};
use crate::interp::Interp;
use crate::value::Value;

/// Borrowed numeric operand view.
enum Num<'a> {
    Int(i64),
    Big(&'a BigInt),
    Real(f64),
}

fn numeric(value: &Value) -> Option<Num<'_>> {
    match value {
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Big(b) => Some(Num::Big(b)),
        Value::Real(r) => Some(Num::Real(*r)),
        _ => None,
    }
}

fn as_f64(n: &Num<'_>) -> Option<f64> {
    match n {
        Num::Int(i) => Some(*i as f64),
        Num::Big(b) => b.to_f64(),
        Num::Real(r) => Some(*r),
    }
}

/// Applies an arithmetic operator to two numeric values. Returns
/// `None` when either operand is not numeric so the caller can fall
/// back to protocol dispatch.
pub(crate) fn numeric_binary(op: BinOp, lhs: &Value, rhs: &Value) -> Option<RunResult<Value>> {
    let l = numeric(lhs)?;
    let r = numeric(rhs)?;
    Some(apply_numeric(op, &l, &r))
}

fn apply_numeric(op: BinOp, l: &Num<'_>, r: &Num<'_>) -> RunResult<Value> {
    // Any Real operand forces the whole operation into Real.
    if matches!(l, Num::Real(_)) || matches!(r, Num::Real(_)) {
        let (Some(a), Some(b)) = (as_f64(l), as_f64(r)) else {
            return ExcType::ArithmeticError.raise("number too large for real arithmetic");
        };
        return real_binary(op, a, b);
    }
    match (l, r) {
        (Num::Int(a), Num::Int(b)) => int_binary(op, *a, *b),
        (Num::Int(a), Num::Big(b)) => big_binary(op, &BigInt::from(*a), b),
        (Num::Big(a), Num::Int(b)) => big_binary(op, a, &BigInt::from(*b)),
        (Num::Big(a), Num::Big(b)) => big_binary(op, a, b),
        _ => unreachable!("real operands were handled above"),
    }
}

fn int_binary(op: BinOp, a: i64, b: i64) -> RunResult<Value> {
    let overflowed = |f: fn(&BigInt, &BigInt) -> BigInt| {
        Ok(Value::from_big(f(&BigInt::from(a), &BigInt::from(b))))
    };
    match op {
        BinOp::Add => a
            .checked_add(b)
            .map_or_else(|| overflowed(|a, b| a + b), |v| Ok(Value::Int(v))),
        BinOp::Sub => a
            .checked_sub(b)
            .map_or_else(|| overflowed(|a, b| a - b), |v| Ok(Value::Int(v))),
        BinOp::Mul => a
            .checked_mul(b)
            .map_or_else(|| overflowed(|a, b| a * b), |v| Ok(Value::Int(v))),
        BinOp::Div => {
            if b == 0 {
                ExcType::ArithmeticError.raise("division by zero")
            } else {
                // i64::MIN / -1 is the one overflowing division.
                a.checked_div(b)
                    .map_or_else(|| overflowed(|a, b| a / b), |v| Ok(Value::Int(v)))
            }
        }
        BinOp::Rem => {
            if b == 0 {
                ExcType::ArithmeticError.raise("remainder by zero")
            } else {
                a.checked_rem(b)
                    .map_or_else(|| overflowed(|a, b| a % b), |v| Ok(Value::Int(v)))
            }
        }
        BinOp::Pow => int_pow(&BigInt::from(a), b),
        _ => ExcType::CastError.raise(format!("'{}' is not an arithmetic operator", op.symbol())),
    }
}

fn big_binary(op: BinOp, a: &BigInt, b: &BigInt) -> RunResult<Value> {
    match op {
        BinOp::Add => Ok(Value::from_big(a + b)),
        BinOp::Sub => Ok(Value::from_big(a - b)),
        BinOp::Mul => Ok(Value::from_big(a * b)),
        BinOp::Div => {
            if b.is_zero() {
                ExcType::ArithmeticError.raise("division by zero")
            } else {
                Ok(Value::from_big(a / b))
            }
        }
        BinOp::Rem => {
            if b.is_zero() {
                ExcType::ArithmeticError.raise("remainder by zero")
            } else {
                Ok(Value::from_big(a % b))
            }
        }
        BinOp::Pow => match b.to_i64() {
            Some(exp) => int_pow(a, exp),
            None => ExcType::ArithmeticError.raise("exponent too large"),
        },
        _ => ExcType::CastError.raise(format!("'{}' is not an arithmetic operator", op.symbol())),
    }
}

fn int_pow(base: &BigInt, exp: i64) -> RunResult<Value> {
    if exp < 0 {
        let Some(base) = base.to_f64() else {
            return ExcType::ArithmeticError.raise("number too large for real arithmetic");
        };
        return Ok(Value::Real(base.powi(i32::try_from(exp).unwrap_or(i32::MIN))));
    }
    let Ok(exp) = u32::try_from(exp) else {
        return ExcType::ArithmeticError.raise("exponent too large");
    };
    Ok(Value::from_big(base.pow(exp)))
}

fn real_binary(op: BinOp, a: f64, b: f64) -> RunResult<Value> {
    match op {
        BinOp::Add => Ok(Value::Real(a + b)),
        BinOp::Sub => Ok(Value::Real(a - b)),
        BinOp::Mul => Ok(Value::Real(a * b)),
        BinOp::Div => {
            if b == 0.0 {
                ExcType::ArithmeticError.raise("division by zero")
            } else {
                Ok(Value::Real(a / b))
            }
        }
        BinOp::Rem => {
            if b == 0.0 {
                ExcType::ArithmeticError.raise("remainder by zero")
            } else {
                Ok(Value::Real(a % b))
            }
        }
        BinOp::Pow => Ok(Value::Real(a.powf(b))),
        _ => ExcType::CastError.raise(format!("'{}' is not an arithmetic operator", op.symbol())),
    }
}

/// Unary minus across the numeric tower.
pub(crate) fn numeric_neg(value: &Value) -> Option<RunResult<Value>> {
    Some(match value {
        Value::Int(i) => Ok(i
            .checked_neg()
            .map_or_else(|| Value::from_big(-BigInt::from(*i)), Value::Int)),
        Value::Big(b) => Ok(Value::from_big(-b.as_ref().clone())),
        Value::Real(r) => Ok(Value::Real(-r)),
        _ => return None,
    })
}

/// Absolute value, shared by the `abs` methods on `Int` and `Real`.
pub(crate) fn numeric_abs(value: &Value) -> Option<Value> {
    Some(match value {
        Value::Int(i) => i
            .checked_abs()
            .map_or_else(|| Value::from_big(BigInt::from(*i).abs()), Value::Int),
        Value::Big(b) => Value::from_big(b.abs()),
        Value::Real(r) => Value::Real(r.abs()),
        _ => return None,
    })
}

impl Interp<'_> {
    /// Full binary operator evaluation: equality and ordering through
    /// the comparison protocol, arithmetic through the fast path or the
    /// selector protocol.
    pub(crate) fn binary(&mut self, op: BinOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
        match op {
            BinOp::Eq => Ok(Value::Bool(self.values_equal(lhs, rhs)?)),
            BinOp::Ne => Ok(Value::Bool(!self.values_equal(lhs, rhs)?)),
            BinOp::Lt => self.ordering(op, lhs, rhs, |o| o == Ordering::Less),
            BinOp::Le => self.ordering(op, lhs, rhs, |o| o != Ordering::Greater),
            BinOp::Gt => self.ordering(op, lhs, rhs, |o| o == Ordering::Greater),
            BinOp::Ge => self.ordering(op, lhs, rhs, |o| o != Ordering::Less),
            _ => self.arithmetic(op, lhs, rhs),
        }
    }

    fn ordering(
        &mut self,
        op: BinOp,
        lhs: &Value,
        rhs: &Value,
        accept: fn(Ordering) -> bool,
    ) -> RunResult<Value> {
        match self.compare_values(lhs, rhs, op.symbol())? {
            Some(ord) => Ok(Value::Bool(accept(ord))),
            // A NaN operand: unordered, every ordering test is false.
            None => Ok(Value::Bool(false)),
        }
    }

    fn arithmetic(&mut self, op: BinOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
        if self.flags.primitive_fastops
            && let Some(result) = numeric_binary(op, lhs, rhs)
        {
            return result;
        }
        // String concatenation and list concatenation keep their fast
        // shapes too; the selector protocol reaches the same code.
        if self.flags.primitive_fastops && op == BinOp::Add {
            if let Value::Str(a) = lhs {
                let rendered = self.display_value(rhs)?;
                return Ok(Value::str(format!("{a}{rendered}")));
            }
            if let (Value::List(a), Value::List(b)) = (lhs, rhs) {
                let mut joined = a.borrow().clone();
                joined.extend(b.borrow().iter().cloned());
                return Ok(Value::list(joined));
            }
        }
        self.dispatch_binary(op, lhs, rhs)
    }

    /// Selector-protocol path for arithmetic operators: dispatch on the
    /// left operand; when its class does not implement the selector at
    /// all, retry the mirrored selector on the right operand.
    pub(crate) fn dispatch_binary(&mut self, op: BinOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
        let selector = op.selector();
        let left_class = lhs.class_id();
        if self.registry.borrow().has_selector(left_class, selector) {
            return self.dispatch(lhs, selector, crate::args::Arguments::one(rhs.clone()));
        }
        if let Some(mirrored) = op.right_selector() {
            let right_class = rhs.class_id();
            if self.registry.borrow().has_selector(right_class, mirrored) {
                return self.dispatch(rhs, mirrored, crate::args::Arguments::one(lhs.clone()));
            }
        }
        ExcType::CastError.raise(format!(
            "operator '{}' is not defined for {} and {}",
            op.symbol(),
            self.class_name(left_class),
            self.class_name(rhs.class_id()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    fn int(v: i64) -> Value {
        Value::Int(v)
    }

    #[test]
    fn int_arithmetic_stays_int() {
        let result = numeric_binary(BinOp::Add, &int(2), &int(3)).unwrap().unwrap();
        assert!(matches!(result, Value::Int(5)));
        let result = numeric_binary(BinOp::Div, &int(7), &int(2)).unwrap().unwrap();
        assert!(matches!(result, Value::Int(3)));
        let result = numeric_binary(BinOp::Div, &int(-7), &int(2)).unwrap().unwrap();
        assert!(matches!(result, Value::Int(-3)), "division truncates toward zero");
    }

    #[test]
    fn overflow_promotes_to_big() {
        let result = numeric_binary(BinOp::Add, &int(i64::MAX), &int(1))
            .unwrap()
            .unwrap();
        assert!(matches!(result, Value::Big(_)));
        // And narrows back down when the value fits again.
        let Value::Big(big) = &result else { unreachable!() };
        let narrowed = numeric_binary(BinOp::Sub, &Value::Big(Rc::clone(big)), &int(1))
            .unwrap()
            .unwrap();
        assert!(matches!(narrowed, Value::Int(i64::MAX)));
    }

    #[test]
    fn mixed_operands_produce_real() {
        let result = numeric_binary(BinOp::Mul, &int(2), &Value::Real(1.5))
            .unwrap()
            .unwrap();
        assert!(matches!(result, Value::Real(r) if (r - 3.0).abs() < f64::EPSILON));
    }

    #[test]
    fn division_by_zero_raises() {
        assert!(numeric_binary(BinOp::Div, &int(1), &int(0)).unwrap().is_err());
        assert!(
            numeric_binary(BinOp::Div, &Value::Real(1.0), &Value::Real(0.0))
                .unwrap()
                .is_err()
        );
    }

    #[test]
    fn pow_shapes() {
        let result = numeric_binary(BinOp::Pow, &int(2), &int(10)).unwrap().unwrap();
        assert!(matches!(result, Value::Int(1024)));
        let result = numeric_binary(BinOp::Pow, &int(2), &int(-1)).unwrap().unwrap();
        assert!(matches!(result, Value::Real(r) if (r - 0.5).abs() < f64::EPSILON));
    }

    #[test]
    fn negation_at_the_boundary() {
        let result = numeric_neg(&int(i64::MIN)).unwrap().unwrap();
        assert!(matches!(result, Value::Big(_)));
    }
}
