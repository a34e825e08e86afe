//! Methods on `List`.
//!
//! Lists are mutable and shared by handle. Methods that call back into
//! script code (`sort` with a comparator, `map`, `filter`, `each`)
//! take a snapshot of the elements first so the callback can mutate
//! the receiver without invalidating iteration.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use crate::args::Arguments;
use crate::exception::{ExcType, RunResult};
use crate::interp::Interp;
use crate::source::Pos;
use crate::value::Value;

fn want_list<'a>(recv: &'a Value, name: &str) -> RunResult<&'a Rc<RefCell<Vec<Value>>>> {
    recv.as_list()
        .ok_or_else(|| ExcType::CastError.error(format!("{name} needs a List")))
}

pub(crate) fn list_add(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let value = args.exactly_one("add")?;
    want_list(recv, "add")?.borrow_mut().push(value.clone());
    Ok(Value::Void)
}

pub(crate) fn list_add_all(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let source = args.exactly_one("addAll")?.clone();
    let list = Rc::clone(want_list(recv, "addAll")?);
    let items = interp.collect_iterable(&source)?;
    list.borrow_mut().extend(items);
    Ok(Value::Void)
}

/// Removes the first element equal to the argument; `true` if found.
pub(crate) fn list_remove(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let needle = args.exactly_one("remove")?.clone();
    let list = Rc::clone(want_list(recv, "remove")?);
    let snapshot = list.borrow().clone();
    for (i, item) in snapshot.iter().enumerate() {
        if interp.values_equal(item, &needle)? {
            list.borrow_mut().remove(i);
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

pub(crate) fn list_remove_at(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let index = args.exactly_one("removeAt")?;
    let list = want_list(recv, "removeAt")?;
    let len = list.borrow().len();
    let idx = Interp::list_index(index, len)?;
    Ok(list.borrow_mut().remove(idx))
}

pub(crate) fn list_size(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("size")?;
    Ok(Value::Int(want_list(recv, "size")?.borrow().len() as i64))
}

pub(crate) fn list_is_empty(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("isEmpty")?;
    Ok(Value::Bool(want_list(recv, "isEmpty")?.borrow().is_empty()))
}

pub(crate) fn list_contains(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let needle = args.exactly_one("contains")?.clone();
    let snapshot = want_list(recv, "contains")?.borrow().clone();
    for item in &snapshot {
        if interp.values_equal(item, &needle)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

pub(crate) fn list_index_of(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let needle = args.exactly_one("indexOf")?.clone();
    let snapshot = want_list(recv, "indexOf")?.borrow().clone();
    for (i, item) in snapshot.iter().enumerate() {
        if interp.values_equal(item, &needle)? {
            return Ok(Value::Int(i as i64));
        }
    }
    Ok(Value::Int(-1))
}

pub(crate) fn list_get(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let index = args.exactly_one("get")?;
    let list = want_list(recv, "get")?.borrow();
    let idx = Interp::list_index(index, list.len())?;
    Ok(list[idx].clone())
}

pub(crate) fn list_set(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let (index, value) = args.exactly_two("set")?;
    let mut list = want_list(recv, "set")?.borrow_mut();
    let len = list.len();
    let idx = Interp::list_index(index, len)?;
    list[idx] = value.clone();
    Ok(Value::Void)
}

/// `slice(start)` / `slice(start, end)`, end exclusive, negative
/// indices counted from the end, both clamped.
pub(crate) fn list_slice(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let (start, end) = args.one_or_two("slice")?;
    let list = want_list(recv, "slice")?.borrow();
    let len = list.len() as i64;
    let Value::Int(start) = start else {
        return ExcType::CastError.raise("slice indices must be Int");
    };
    let end = match end {
        None => len,
        Some(Value::Int(end)) => *end,
        Some(_) => return ExcType::CastError.raise("slice indices must be Int"),
    };
    let clamp = |index: i64| -> usize {
        let adjusted = if index < 0 { index + len } else { index };
        adjusted.clamp(0, len) as usize
    };
    let start = clamp(*start);
    let end = clamp(end).max(start);
    Ok(Value::list(list[start..end].to_vec()))
}

pub(crate) fn list_first(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("first")?;
    want_list(recv, "first")?
        .borrow()
        .first()
        .cloned()
        .ok_or_else(|| ExcType::IndexError.error("first on an empty list"))
}

pub(crate) fn list_last(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("last")?;
    want_list(recv, "last")?
        .borrow()
        .last()
        .cloned()
        .ok_or_else(|| ExcType::IndexError.error("last on an empty list"))
}

pub(crate) fn list_clear(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("clear")?;
    want_list(recv, "clear")?.borrow_mut().clear();
    Ok(Value::Void)
}

pub(crate) fn list_join(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let sep = match args.at_most_one("join")? {
        None => ", ".to_owned(),
        Some(Value::Str(sep)) => sep.to_string(),
        Some(_) => return ExcType::CastError.raise("join separator must be a String"),
    };
    let snapshot = want_list(recv, "join")?.borrow().clone();
    let mut out = String::new();
    for (i, item) in snapshot.iter().enumerate() {
        if i > 0 {
            out.push_str(&sep);
        }
        out.push_str(&interp.display_value(item)?);
    }
    Ok(Value::str(out))
}

pub(crate) fn list_to_list(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("toList")?;
    Ok(Value::list(want_list(recv, "toList")?.borrow().clone()))
}

pub(crate) fn list_iterator(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("iterator")?;
    crate::builtins::iter::make_iter(recv)
        .ok_or_else(|| ExcType::CastError.error("iterator needs a List"))
}

pub(crate) fn list_plus(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let rhs = args.exactly_one("plus")?;
    let lhs = want_list(recv, "plus")?;
    let Value::List(rhs) = rhs else {
        return ExcType::CastError.raise("can only concatenate a List to a List");
    };
    let mut joined = lhs.borrow().clone();
    joined.extend(rhs.borrow().iter().cloned());
    Ok(Value::list(joined))
}

/// In-place stable sort; an optional comparator returns a negative,
/// zero or positive Int. Returns the receiver for chaining.
pub(crate) fn list_sort(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let comparator = args.at_most_one("sort")?.cloned();
    let list = Rc::clone(want_list(recv, "sort")?);
    let items = list.borrow().clone();
    let sorted = merge_sort(interp, items, comparator.as_ref())?;
    *list.borrow_mut() = sorted;
    Ok(recv.clone())
}

/// Stable merge sort tolerating fallible comparisons (user comparator
/// or `compareTo` dispatch can raise).
fn merge_sort(
    interp: &mut Interp,
    mut items: Vec<Value>,
    comparator: Option<&Value>,
) -> RunResult<Vec<Value>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(interp, items, comparator)?;
    let right = merge_sort(interp, right, comparator)?;

    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut l = left.into_iter().peekable();
    let mut r = right.into_iter().peekable();
    loop {
        match (l.peek(), r.peek()) {
            (Some(a), Some(b)) => {
                if compare(interp, a, b, comparator)? == Ordering::Greater {
                    out.push(r.next().expect("peeked"));
                } else {
                    out.push(l.next().expect("peeked"));
                }
            }
            (Some(_), None) => out.push(l.next().expect("peeked")),
            (None, Some(_)) => out.push(r.next().expect("peeked")),
            (None, None) => return Ok(out),
        }
    }
}

fn compare(
    interp: &mut Interp,
    a: &Value,
    b: &Value,
    comparator: Option<&Value>,
) -> RunResult<Ordering> {
    match comparator {
        Some(f) => {
            let result =
                interp.call_value(f, Arguments::of(vec![a.clone(), b.clone()]), Pos::START)?;
            match result {
                Value::Int(i) => Ok(i.cmp(&0)),
                _ => ExcType::CastError.raise("sort comparator must return Int"),
            }
        }
        // Unordered pairs (NaN) sort as equal; callers filter NaNs
        // when they need a meaningful order.
        None => Ok(interp.compare_values(a, b, "sort")?.unwrap_or(Ordering::Equal)),
    }
}

pub(crate) fn list_map(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let f = args.exactly_one("map")?.clone();
    let snapshot = want_list(recv, "map")?.borrow().clone();
    let mut out = Vec::with_capacity(snapshot.len());
    for item in snapshot {
        out.push(interp.call_value(&f, Arguments::one(item), Pos::START)?);
    }
    Ok(Value::list(out))
}

pub(crate) fn list_filter(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let predicate = args.exactly_one("filter")?.clone();
    let snapshot = want_list(recv, "filter")?.borrow().clone();
    let mut out = Vec::new();
    for item in snapshot {
        let keep = interp.call_value(&predicate, Arguments::one(item.clone()), Pos::START)?;
        let keep = interp.expect_bool(&keep, "filter predicate result")?;
        if keep {
            out.push(item);
        }
    }
    Ok(Value::list(out))
}

pub(crate) fn list_each(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let f = args.exactly_one("each")?.clone();
    let snapshot = want_list(recv, "each")?.borrow().clone();
    for item in snapshot {
        interp.call_value(&f, Arguments::one(item), Pos::START)?;
    }
    Ok(Value::Void)
}
