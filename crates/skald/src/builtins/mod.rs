//! Built-in classes and their method tables.
//!
//! `install` creates every built-in class in the fixed id order the
//! rest of the runtime relies on (see `class::classes`), then fills in
//! the method tables. Built-ins go through the same dispatch protocol
//! as user methods; nothing here bypasses it.

pub(crate) mod iter;
mod list;
mod map;
mod numbers;
mod range;
mod regex;
mod string;

use std::rc::Rc;

use crate::args::Arguments;
use crate::class::{Arity, Callable, ClassDef, ClassId, ClassRegistry, HostMethod, MethodDef, classes};
use crate::exception::{ExcType, RunResult};
use crate::interp::Interp;
use crate::value::Value;

/// Creates the registry with every built-in class installed.
pub(crate) fn install() -> ClassRegistry {
    let mut registry = ClassRegistry::new();

    // Order must match the constants in `class::classes`.
    for name in [
        "Void", "Null", "Bool", "Int", "Real", "Char", "String", "List", "Map", "Set", "Range",
        "Regex", "Function", "Class", "Iterator",
    ] {
        registry.define(ClassDef::new(Rc::from(name), None));
    }
    for exc in ExcType::ALL {
        let name: &'static str = exc.into();
        let id = registry.define(ClassDef::new(Rc::from(name), exc.parent_class()));
        debug_assert_eq!(id, exc.class_id());
    }
    debug_assert_eq!(
        registry.get(classes::ITERATOR).name.as_ref(),
        "Iterator",
        "built-in id order must match class::classes"
    );

    install_numbers(&mut registry);
    install_string(&mut registry);
    install_list(&mut registry);
    install_map(&mut registry);
    install_range(&mut registry);
    install_regex(&mut registry);
    install_iterator(&mut registry);
    install_class_meta(&mut registry);

    registry
}

/// The names bound in every fresh root scope: each built-in class
/// under its own name, so scripts can reference `Exception`, extend
/// `String`, or construct `Set()`.
pub(crate) fn class_bindings(registry: &ClassRegistry) -> Vec<(Rc<str>, Value)> {
    let mut bindings = Vec::with_capacity(classes::BUILTIN_COUNT as usize);
    for index in 0..classes::BUILTIN_COUNT {
        let id = ClassId(index);
        bindings.push((Rc::clone(&registry.get(id).name), Value::Class(id)));
    }
    bindings
}

fn method(registry: &mut ClassRegistry, class: ClassId, name: &str, arity: Arity, f: HostMethod) {
    registry.get_mut(class).add_method(MethodDef {
        name: Rc::from(name),
        arity,
        callable: Callable::Host(f),
        doc: None,
    });
}

fn install_numbers(registry: &mut ClassRegistry) {
    for class in [classes::INT, classes::REAL] {
        method(registry, class, "plus", Arity::Exact(1), numbers::num_plus);
        method(registry, class, "minus", Arity::Exact(1), numbers::num_minus);
        method(registry, class, "times", Arity::Exact(1), numbers::num_times);
        method(registry, class, "div", Arity::Exact(1), numbers::num_div);
        method(registry, class, "rem", Arity::Exact(1), numbers::num_rem);
        method(registry, class, "pow", Arity::Exact(1), numbers::num_pow);
        method(registry, class, "abs", Arity::Exact(0), numbers::num_abs);
    }
    method(registry, classes::INT, "toReal", Arity::Exact(0), numbers::int_to_real);
    method(registry, classes::INT, "toChar", Arity::Exact(0), numbers::int_to_char);
    method(registry, classes::REAL, "toInt", Arity::Exact(0), numbers::real_to_int);
    method(registry, classes::REAL, "floor", Arity::Exact(0), numbers::real_floor);
    method(registry, classes::REAL, "ceil", Arity::Exact(0), numbers::real_ceil);
    method(registry, classes::REAL, "round", Arity::Exact(0), numbers::real_round);
    method(registry, classes::REAL, "isNaN", Arity::Exact(0), numbers::real_is_nan);
    method(registry, classes::CHAR, "code", Arity::Exact(0), numbers::char_code);
}

fn install_string(registry: &mut ClassRegistry) {
    let class = classes::STRING;
    method(registry, class, "length", Arity::Exact(0), string::str_length);
    method(registry, class, "size", Arity::Exact(0), string::str_length);
    method(registry, class, "isEmpty", Arity::Exact(0), string::str_is_empty);
    method(registry, class, "charAt", Arity::Exact(1), string::str_char_at);
    method(registry, class, "substring", Arity::AtLeast(1), string::str_substring);
    method(registry, class, "split", Arity::Exact(1), string::str_split);
    method(registry, class, "replace", Arity::Exact(2), string::str_replace);
    method(registry, class, "matches", Arity::Exact(1), string::str_matches);
    method(registry, class, "format", Arity::Any, string::str_format);
    method(registry, class, "toUpper", Arity::Exact(0), string::str_to_upper);
    method(registry, class, "toLower", Arity::Exact(0), string::str_to_lower);
    method(registry, class, "trim", Arity::Exact(0), string::str_trim);
    method(registry, class, "startsWith", Arity::Exact(1), string::str_starts_with);
    method(registry, class, "endsWith", Arity::Exact(1), string::str_ends_with);
    method(registry, class, "contains", Arity::Exact(1), string::str_contains);
    method(registry, class, "indexOf", Arity::Exact(1), string::str_index_of);
    method(registry, class, "toInt", Arity::Exact(0), string::str_to_int);
    method(registry, class, "toReal", Arity::Exact(0), string::str_to_real);
    method(registry, class, "plus", Arity::Exact(1), string::str_plus);
    method(registry, class, "times", Arity::Exact(1), string::str_times);
    method(registry, class, "iterator", Arity::Exact(0), string::str_iterator);
}

fn install_list(registry: &mut ClassRegistry) {
    let class = classes::LIST;
    method(registry, class, "add", Arity::Exact(1), list::list_add);
    method(registry, class, "addAll", Arity::Exact(1), list::list_add_all);
    method(registry, class, "remove", Arity::Exact(1), list::list_remove);
    method(registry, class, "removeAt", Arity::Exact(1), list::list_remove_at);
    method(registry, class, "size", Arity::Exact(0), list::list_size);
    method(registry, class, "isEmpty", Arity::Exact(0), list::list_is_empty);
    method(registry, class, "contains", Arity::Exact(1), list::list_contains);
    method(registry, class, "indexOf", Arity::Exact(1), list::list_index_of);
    method(registry, class, "get", Arity::Exact(1), list::list_get);
    method(registry, class, "set", Arity::Exact(2), list::list_set);
    method(registry, class, "slice", Arity::AtLeast(1), list::list_slice);
    method(registry, class, "first", Arity::Exact(0), list::list_first);
    method(registry, class, "last", Arity::Exact(0), list::list_last);
    method(registry, class, "clear", Arity::Exact(0), list::list_clear);
    method(registry, class, "join", Arity::AtLeast(0), list::list_join);
    method(registry, class, "toList", Arity::Exact(0), list::list_to_list);
    method(registry, class, "iterator", Arity::Exact(0), list::list_iterator);
    method(registry, class, "plus", Arity::Exact(1), list::list_plus);
    method(registry, class, "sort", Arity::AtLeast(0), list::list_sort);
    method(registry, class, "map", Arity::Exact(1), list::list_map);
    method(registry, class, "filter", Arity::Exact(1), list::list_filter);
    method(registry, class, "each", Arity::Exact(1), list::list_each);
}

fn install_map(registry: &mut ClassRegistry) {
    let class = classes::MAP;
    method(registry, class, "get", Arity::Exact(1), map::map_get);
    method(registry, class, "getOrDefault", Arity::Exact(2), map::map_get_or_default);
    method(registry, class, "set", Arity::Exact(2), map::map_set);
    method(registry, class, "remove", Arity::Exact(1), map::map_remove);
    method(registry, class, "containsKey", Arity::Exact(1), map::map_contains_key);
    method(registry, class, "size", Arity::Exact(0), map::map_size);
    method(registry, class, "isEmpty", Arity::Exact(0), map::map_is_empty);
    method(registry, class, "clear", Arity::Exact(0), map::map_clear);
    method(registry, class, "keys", Arity::Exact(0), map::map_keys);
    method(registry, class, "values", Arity::Exact(0), map::map_values);
    method(registry, class, "iterator", Arity::Exact(0), map::map_iterator);

    let class = classes::SET;
    method(registry, class, "add", Arity::Exact(1), map::set_add);
    method(registry, class, "remove", Arity::Exact(1), map::set_remove);
    method(registry, class, "contains", Arity::Exact(1), map::set_contains);
    method(registry, class, "size", Arity::Exact(0), map::set_size);
    method(registry, class, "isEmpty", Arity::Exact(0), map::set_is_empty);
    method(registry, class, "iterator", Arity::Exact(0), map::set_iterator);
    method(registry, class, "toList", Arity::Exact(0), map::set_to_list);
}

fn install_range(registry: &mut ClassRegistry) {
    let class = classes::RANGE;
    method(registry, class, "contains", Arity::Exact(1), range::range_contains);
    method(registry, class, "iterator", Arity::Exact(0), range::range_iterator);
    method(registry, class, "step", Arity::Exact(1), range::range_step);
    method(registry, class, "reversed", Arity::Exact(0), range::range_reversed);
    method(registry, class, "toList", Arity::Exact(0), range::range_to_list);
    method(registry, class, "size", Arity::Exact(0), range::range_size);
    method(registry, class, "start", Arity::Exact(0), range::range_start);
    method(registry, class, "end", Arity::Exact(0), range::range_end);
}

fn install_regex(registry: &mut ClassRegistry) {
    let class = classes::REGEX;
    method(registry, class, "pattern", Arity::Exact(0), regex::regex_pattern);
    method(registry, class, "matches", Arity::Exact(1), regex::regex_matches);
    method(registry, class, "find", Arity::Exact(1), regex::regex_find);
    method(registry, class, "findAll", Arity::Exact(1), regex::regex_find_all);
    method(registry, class, "replace", Arity::Exact(2), regex::regex_replace);
}

fn install_iterator(registry: &mut ClassRegistry) {
    let class = classes::ITERATOR;
    method(registry, class, "hasNext", Arity::Exact(0), range::iterator_has_next);
    method(registry, class, "next", Arity::Exact(0), range::iterator_next);
    method(registry, class, "toList", Arity::Exact(0), range::iterator_to_list);
}

fn install_class_meta(registry: &mut ClassRegistry) {
    method(registry, classes::CLASS, "values", Arity::Exact(0), class_values);
}

/// `SomeEnum.values()`: the declared constants in order.
fn class_values(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("values")?;
    let Value::Class(id) = recv else {
        return ExcType::CastError.raise("values needs a class receiver");
    };
    let constants: Vec<Value> = interp
        .registry
        .borrow()
        .get(*id)
        .enum_constants
        .iter()
        .map(|(_, value)| value.clone())
        .collect();
    if constants.is_empty() {
        return ExcType::CastError.raise(format!(
            "{} is not an enum",
            interp.class_name(*id)
        ));
    }
    Ok(Value::list(constants))
}
