//! Methods on `Map` and `Set`.
//!
//! Both are insertion ordered. Updating an existing key keeps its
//! position; removing uses a shifting removal so that re-inserting the
//! key later appends it at the end, which is the observable ordering
//! contract.

use std::cell::RefCell;
use std::rc::Rc;

use crate::args::Arguments;
use crate::exception::{ExcType, RunResult};
use crate::interp::Interp;
use crate::value::{MapData, SetData, Value};

fn want_map<'a>(recv: &'a Value, name: &str) -> RunResult<&'a Rc<RefCell<MapData>>> {
    recv.as_map()
        .ok_or_else(|| ExcType::CastError.error(format!("{name} needs a Map")))
}

fn want_set<'a>(recv: &'a Value, name: &str) -> RunResult<&'a Rc<RefCell<SetData>>> {
    match recv {
        Value::Set(set) => Ok(set),
        _ => ExcType::CastError.raise(format!("{name} needs a Set")),
    }
}

/// `get(key)` yields `null` for a missing key; indexing raises
/// `KeyError` instead.
pub(crate) fn map_get(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let key = args.exactly_one("get")?;
    let hashed = interp.map_key(key)?;
    let map = want_map(recv, "get")?.borrow();
    Ok(map.get(&hashed).map_or(Value::Null, |(_, v)| v.clone()))
}

pub(crate) fn map_get_or_default(
    interp: &mut Interp,
    recv: &Value,
    args: &Arguments,
) -> RunResult<Value> {
    let (key, fallback) = args.exactly_two("getOrDefault")?;
    let hashed = interp.map_key(key)?;
    let map = want_map(recv, "getOrDefault")?.borrow();
    Ok(map
        .get(&hashed)
        .map_or_else(|| fallback.clone(), |(_, v)| v.clone()))
}

pub(crate) fn map_set(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let (key, value) = args.exactly_two("set")?;
    let hashed = interp.map_key(key)?;
    want_map(recv, "set")?
        .borrow_mut()
        .insert(hashed, (key.clone(), value.clone()));
    Ok(Value::Void)
}

/// Removes a key, returning the removed value or `null`. The shifting
/// removal keeps the order of the remaining entries, so a later
/// re-insert lands at the end.
pub(crate) fn map_remove(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let key = args.exactly_one("remove")?;
    let hashed = interp.map_key(key)?;
    let removed = want_map(recv, "remove")?.borrow_mut().shift_remove(&hashed);
    Ok(removed.map_or(Value::Null, |(_, v)| v))
}

pub(crate) fn map_contains_key(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let key = args.exactly_one("containsKey")?;
    let hashed = interp.map_key(key)?;
    Ok(Value::Bool(
        want_map(recv, "containsKey")?.borrow().contains_key(&hashed),
    ))
}

pub(crate) fn map_size(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("size")?;
    Ok(Value::Int(want_map(recv, "size")?.borrow().len() as i64))
}

pub(crate) fn map_is_empty(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("isEmpty")?;
    Ok(Value::Bool(want_map(recv, "isEmpty")?.borrow().is_empty()))
}

pub(crate) fn map_clear(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("clear")?;
    want_map(recv, "clear")?.borrow_mut().clear();
    Ok(Value::Void)
}

/// Keys in insertion order, as an iterator over a snapshot.
pub(crate) fn map_keys(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("keys")?;
    let keys: Vec<Value> = want_map(recv, "keys")?
        .borrow()
        .values()
        .map(|(key, _)| key.clone())
        .collect();
    Ok(Value::Iterator(Rc::new(RefCell::new(
        crate::builtins::iter::IterValue::Items {
            items: keys,
            index: 0,
        },
    ))))
}

pub(crate) fn map_values(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("values")?;
    let values: Vec<Value> = want_map(recv, "values")?
        .borrow()
        .values()
        .map(|(_, value)| value.clone())
        .collect();
    Ok(Value::Iterator(Rc::new(RefCell::new(
        crate::builtins::iter::IterValue::Items {
            items: values,
            index: 0,
        },
    ))))
}

/// Entries as `[key, value]` pairs.
pub(crate) fn map_iterator(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("iterator")?;
    crate::builtins::iter::make_iter(recv)
        .ok_or_else(|| ExcType::CastError.error("iterator needs a Map"))
}

// ---- Set ----------------------------------------------------------

/// Adds an element; `true` when it was not present yet.
pub(crate) fn set_add(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let value = args.exactly_one("add")?;
    let hashed = interp.map_key(value)?;
    let inserted = want_set(recv, "add")?
        .borrow_mut()
        .insert(hashed, value.clone())
        .is_none();
    Ok(Value::Bool(inserted))
}

pub(crate) fn set_remove(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let value = args.exactly_one("remove")?;
    let hashed = interp.map_key(value)?;
    let removed = want_set(recv, "remove")?
        .borrow_mut()
        .shift_remove(&hashed)
        .is_some();
    Ok(Value::Bool(removed))
}

pub(crate) fn set_contains(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let value = args.exactly_one("contains")?;
    let hashed = interp.map_key(value)?;
    Ok(Value::Bool(
        want_set(recv, "contains")?.borrow().contains_key(&hashed),
    ))
}

pub(crate) fn set_size(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("size")?;
    Ok(Value::Int(want_set(recv, "size")?.borrow().len() as i64))
}

pub(crate) fn set_is_empty(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("isEmpty")?;
    Ok(Value::Bool(want_set(recv, "isEmpty")?.borrow().is_empty()))
}

pub(crate) fn set_iterator(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("iterator")?;
    crate::builtins::iter::make_iter(recv)
        .ok_or_else(|| ExcType::CastError.error("iterator needs a Set"))
}

pub(crate) fn set_to_list(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("toList")?;
    let items: Vec<Value> = want_set(recv, "toList")?.borrow().values().cloned().collect();
    Ok(Value::list(items))
}
