//! Methods on `Range`.

use std::rc::Rc;

use crate::args::Arguments;
use crate::exception::{ExcType, RunResult};
use crate::interp::Interp;
use crate::value::{RangeValue, Value};

fn want_range<'a>(recv: &'a Value, name: &str) -> RunResult<&'a Rc<RangeValue>> {
    match recv {
        Value::Range(range) => Ok(range),
        _ => ExcType::CastError.raise(format!("{name} needs a Range")),
    }
}

/// Whether a number falls within the range bounds. The step does not
/// participate: `contains` answers the interval question.
pub(crate) fn range_contains(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let value = args.exactly_one("contains")?;
    let range = want_range(recv, "contains")?;
    let (Some(Some(lower)), Some(Some(upper))) =
        (value.sl_cmp(&range.start), value.sl_cmp(&range.end))
    else {
        // Non-numeric values and NaN are never contained.
        return Ok(Value::Bool(false));
    };
    let above_start = lower != std::cmp::Ordering::Less;
    let below_end = if range.inclusive {
        upper != std::cmp::Ordering::Greater
    } else {
        upper == std::cmp::Ordering::Less
    };
    Ok(Value::Bool(above_start && below_end))
}

pub(crate) fn range_iterator(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("iterator")?;
    crate::builtins::iter::make_iter(recv)
        .ok_or_else(|| ExcType::CastError.error("iterator needs a Range"))
}

/// A new range with the given non-zero step.
pub(crate) fn range_step(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let step = args.exactly_one("step")?;
    let range = want_range(recv, "step")?;
    match step {
        Value::Int(0) => ExcType::ArithmeticError.raise("range step must not be zero"),
        Value::Real(r) if *r == 0.0 => {
            ExcType::ArithmeticError.raise("range step must not be zero")
        }
        Value::Int(_) | Value::Real(_) => Ok(Value::Range(Rc::new(RangeValue {
            start: range.start.clone(),
            end: range.end.clone(),
            inclusive: range.inclusive,
            step: step.clone(),
        }))),
        _ => ExcType::CastError.raise("range step must be Int or Real"),
    }
}

/// Walks the same elements backwards. Only integer ranges reverse; the
/// last reachable element becomes the new start.
pub(crate) fn range_reversed(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("reversed")?;
    let range = want_range(recv, "reversed")?;
    let (Value::Int(start), Value::Int(end), Value::Int(step)) =
        (&range.start, &range.end, &range.step)
    else {
        return ExcType::CastError.raise("only integer ranges can be reversed");
    };
    let (start, end, step) = (*start, *end, *step);
    if step == 0 {
        return ExcType::ArithmeticError.raise("range step must not be zero");
    }
    let limit = if range.inclusive { end } else { end - step.signum() };
    // Empty range: reversing yields another empty range.
    if (step > 0 && limit < start) || (step < 0 && limit > start) {
        return Ok(Value::Range(Rc::new(RangeValue {
            start: Value::Int(limit),
            end: Value::Int(start),
            inclusive: false,
            step: Value::Int(-step),
        })));
    }
    let span = limit - start;
    let last = start + (span / step) * step;
    Ok(Value::Range(Rc::new(RangeValue {
        start: Value::Int(last),
        end: Value::Int(start),
        inclusive: true,
        step: Value::Int(-step),
    })))
}

pub(crate) fn range_to_list(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("toList")?;
    let range = want_range(recv, "toList")?;
    let Some(mut iter) =
        crate::builtins::iter::range_iter(&range.start, &range.end, &range.step, range.inclusive)
    else {
        return ExcType::CastError.raise("toList needs a numeric Range");
    };
    let mut out = Vec::new();
    while let Some(item) = iter.next() {
        out.push(item);
    }
    Ok(Value::list(out))
}

pub(crate) fn range_size(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("size")?;
    let range = want_range(recv, "size")?;
    let (Value::Int(start), Value::Int(end), Value::Int(step)) =
        (&range.start, &range.end, &range.step)
    else {
        return ExcType::CastError.raise("size needs an integer Range");
    };
    if *step == 0 {
        return ExcType::ArithmeticError.raise("range step must not be zero");
    }
    let limit = if range.inclusive {
        *end
    } else {
        *end - step.signum()
    };
    let span = limit - *start;
    let count = if (span >= 0) == (*step > 0) || span == 0 {
        span / *step + 1
    } else {
        0
    };
    Ok(Value::Int(count.max(0)))
}

pub(crate) fn range_start(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("start")?;
    Ok(want_range(recv, "start")?.start.clone())
}

pub(crate) fn range_end(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("end")?;
    Ok(want_range(recv, "end")?.end.clone())
}

/// Used by `Iterator.toList` and collection constructors as well.
pub(crate) fn iterator_has_next(
    _interp: &mut Interp,
    recv: &Value,
    args: &Arguments,
) -> RunResult<Value> {
    args.check_empty("hasNext")?;
    match recv {
        Value::Iterator(iter) => Ok(Value::Bool(iter.borrow().has_next())),
        _ => ExcType::CastError.raise("hasNext needs an Iterator"),
    }
}

pub(crate) fn iterator_next(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("next")?;
    match recv {
        Value::Iterator(iter) => {
            let next = iter.borrow_mut().next();
            next.ok_or_else(|| ExcType::IndexError.error("iterator is exhausted"))
        }
        _ => ExcType::CastError.raise("next needs an Iterator"),
    }
}

pub(crate) fn iterator_to_list(
    _interp: &mut Interp,
    recv: &Value,
    args: &Arguments,
) -> RunResult<Value> {
    args.check_empty("toList")?;
    match recv {
        Value::Iterator(iter) => {
            let mut out = Vec::new();
            loop {
                let next = iter.borrow_mut().next();
                match next {
                    Some(item) => out.push(item),
                    None => return Ok(Value::list(out)),
                }
            }
        }
        _ => ExcType::CastError.raise("toList needs an Iterator"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_range(start: i64, end: i64, inclusive: bool, step: i64) -> Value {
        Value::Range(Rc::new(RangeValue {
            start: Value::Int(start),
            end: Value::Int(end),
            inclusive,
            step: Value::Int(step),
        }))
    }

    fn with_interp<T>(f: impl FnOnce(&mut Interp) -> T) -> T {
        let mut tracer = crate::tracer::NoopTracer;
        let registry = Rc::new(std::cell::RefCell::new(crate::builtins::install()));
        let mut interp = Interp::new(
            registry,
            crate::resource::RuntimeFlags::default(),
            crate::resource::ResourceLimits::default(),
            &mut tracer,
            Rc::new(std::cell::RefCell::new(ahash::AHashMap::default())),
            None,
        );
        f(&mut interp)
    }

    #[test]
    fn reversed_walks_the_same_elements() {
        let range = int_range(1, 6, false, 2); // 1, 3, 5
        let reversed =
            with_interp(|interp| range_reversed(interp, &range, &Arguments::empty()).unwrap());
        let Value::Range(reversed) = reversed else {
            panic!("expected a range");
        };
        assert!(matches!(reversed.start, Value::Int(5)));
        assert!(matches!(reversed.end, Value::Int(1)));
        assert!(matches!(reversed.step, Value::Int(-2)));
        assert!(reversed.inclusive);
    }

    #[test]
    fn contains_checks_bounds() {
        let range = int_range(1, 5, true, 1);
        let result =
            with_interp(|interp| range_contains(interp, &range, &Arguments::one(Value::Int(5))));
        assert!(matches!(result.unwrap(), Value::Bool(true)));
        let half_open = int_range(1, 5, false, 1);
        let result = with_interp(|interp| {
            range_contains(interp, &half_open, &Arguments::one(Value::Int(5)))
        });
        assert!(matches!(result.unwrap(), Value::Bool(false)));
    }

    #[test]
    fn step_zero_is_rejected() {
        let range = int_range(1, 5, true, 1);
        let result =
            with_interp(|interp| range_step(interp, &range, &Arguments::one(Value::Int(0))));
        assert!(result.is_err());
    }
}
