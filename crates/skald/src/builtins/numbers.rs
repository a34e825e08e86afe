//! Methods on `Int`, `Real` and `Char`.
//!
//! The arithmetic selectors here are the slow-path twins of the
//! `primitive_fastops` shortcuts: both route into [`ops`], so flag
//! settings cannot change results.

use num_traits::ToPrimitive;

use crate::args::Arguments;
use crate::ast::BinOp;
use crate::exception::{ExcType, RunResult};
use crate::interp::Interp;
use crate::ops;
use crate::value::Value;

fn arith(interp: &mut Interp, op: BinOp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let rhs = args.exactly_one(op.selector())?;
    match ops::numeric_binary(op, recv, rhs) {
        Some(result) => result,
        None => ExcType::CastError.raise(format!(
            "operator '{}' is not defined for {} and {}",
            op.symbol(),
            interp.class_name(recv.class_id()),
            interp.class_name(rhs.class_id()),
        )),
    }
}

pub(crate) fn num_plus(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    arith(interp, BinOp::Add, recv, args)
}

pub(crate) fn num_minus(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    arith(interp, BinOp::Sub, recv, args)
}

pub(crate) fn num_times(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    arith(interp, BinOp::Mul, recv, args)
}

pub(crate) fn num_div(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    arith(interp, BinOp::Div, recv, args)
}

pub(crate) fn num_rem(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    arith(interp, BinOp::Rem, recv, args)
}

pub(crate) fn num_pow(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    arith(interp, BinOp::Pow, recv, args)
}

pub(crate) fn num_abs(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("abs")?;
    ops::numeric_abs(recv).ok_or_else(|| ExcType::CastError.error("abs needs a number"))
}

pub(crate) fn int_to_real(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("toReal")?;
    match recv {
        Value::Int(i) => Ok(Value::Real(*i as f64)),
        Value::Big(b) => match b.to_f64() {
            Some(r) => Ok(Value::Real(r)),
            None => ExcType::ArithmeticError.raise("number too large for Real"),
        },
        _ => ExcType::CastError.raise("toReal needs an Int"),
    }
}

pub(crate) fn int_to_char(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("toChar")?;
    let Value::Int(code) = recv else {
        return ExcType::CastError.raise("toChar needs an Int");
    };
    u32::try_from(*code)
        .ok()
        .and_then(char::from_u32)
        .map(Value::Char)
        .ok_or_else(|| ExcType::IllegalArgument.error(format!("{code} is not a valid char code")))
}

pub(crate) fn real_to_int(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("toInt")?;
    let Value::Real(r) = recv else {
        return ExcType::CastError.raise("toInt needs a Real");
    };
    if r.is_nan() || r.is_infinite() {
        return ExcType::ArithmeticError.raise("cannot convert NaN or infinity to Int");
    }
    let truncated = r.trunc();
    if truncated >= i64::MIN as f64 && truncated <= i64::MAX as f64 {
        Ok(Value::Int(truncated as i64))
    } else {
        ExcType::ArithmeticError.raise("Real value out of Int range")
    }
}

fn real_unary(recv: &Value, name: &str, f: fn(f64) -> f64) -> RunResult<Value> {
    match recv {
        Value::Real(r) => Ok(Value::Real(f(*r))),
        _ => ExcType::CastError.raise(format!("{name} needs a Real")),
    }
}

pub(crate) fn real_floor(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("floor")?;
    real_unary(recv, "floor", f64::floor)
}

pub(crate) fn real_ceil(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("ceil")?;
    real_unary(recv, "ceil", f64::ceil)
}

pub(crate) fn real_round(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("round")?;
    real_unary(recv, "round", f64::round)
}

pub(crate) fn real_is_nan(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("isNaN")?;
    match recv {
        Value::Real(r) => Ok(Value::Bool(r.is_nan())),
        _ => ExcType::CastError.raise("isNaN needs a Real"),
    }
}

pub(crate) fn char_code(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("code")?;
    match recv {
        Value::Char(c) => Ok(Value::Int(i64::from(u32::from(*c)))),
        _ => ExcType::CastError.raise("code needs a Char"),
    }
}
