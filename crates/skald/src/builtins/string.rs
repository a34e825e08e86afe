//! Methods on `String`.
//!
//! Indices are character indices, not byte offsets; strings are
//! immutable, so every transforming method allocates a new value.

use std::rc::Rc;

use crate::args::Arguments;
use crate::exception::{ExcType, RunResult};
use crate::interp::Interp;
use crate::value::Value;

fn want_str<'a>(recv: &'a Value, name: &str) -> RunResult<&'a Rc<str>> {
    recv.as_str()
        .ok_or_else(|| ExcType::CastError.error(format!("{name} needs a String")))
}

fn want_str_arg<'a>(value: &'a Value, name: &str) -> RunResult<&'a Rc<str>> {
    value
        .as_str()
        .ok_or_else(|| ExcType::CastError.error(format!("{name} expects a String argument")))
}

pub(crate) fn str_length(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("length")?;
    let s = want_str(recv, "length")?;
    Ok(Value::Int(s.chars().count() as i64))
}

pub(crate) fn str_is_empty(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("isEmpty")?;
    let s = want_str(recv, "isEmpty")?;
    Ok(Value::Bool(s.is_empty()))
}

pub(crate) fn str_char_at(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let index = args.exactly_one("charAt")?;
    let s = want_str(recv, "charAt")?;
    let count = s.chars().count();
    let idx = Interp::list_index(index, count)?;
    Ok(Value::Char(s.chars().nth(idx).expect("index checked")))
}

/// `substring(start)` / `substring(start, end)` in char indices; the
/// end is exclusive and clamped.
pub(crate) fn str_substring(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let (start, end) = args.one_or_two("substring")?;
    let s = want_str(recv, "substring")?;
    let count = s.chars().count();
    let Value::Int(start) = start else {
        return ExcType::CastError.raise("substring indices must be Int");
    };
    let end = match end {
        None => count as i64,
        Some(Value::Int(end)) => *end,
        Some(_) => return ExcType::CastError.raise("substring indices must be Int"),
    };
    let start = normalise(*start, count);
    let end = normalise(end, count).max(start);
    let out: String = s.chars().skip(start).take(end - start).collect();
    Ok(Value::str(out))
}

fn normalise(index: i64, len: usize) -> usize {
    let adjusted = if index < 0 { index + len as i64 } else { index };
    adjusted.clamp(0, len as i64) as usize
}

pub(crate) fn str_split(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let sep = args.exactly_one("split")?;
    let s = want_str(recv, "split")?;
    let sep = want_str_arg(sep, "split")?;
    if sep.is_empty() {
        return ExcType::IllegalArgument.raise("split separator must not be empty");
    }
    let parts = s.split(&**sep).map(Value::str).collect();
    Ok(Value::list(parts))
}

/// `replace(old, new)` with a plain-string or regex pattern.
pub(crate) fn str_replace(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let (pattern, replacement) = args.exactly_two("replace")?;
    let s = want_str(recv, "replace")?;
    let replacement = want_str_arg(replacement, "replace")?;
    match pattern {
        Value::Str(old) => Ok(Value::str(s.replace(&**old, replacement))),
        Value::Regex(regex) => Ok(Value::str(
            regex.re.replace_all(s, &**replacement).into_owned(),
        )),
        _ => ExcType::CastError.raise("replace expects a String or Regex pattern"),
    }
}

/// Whole-string match against a regex (or a string pattern compiled
/// on the fly).
pub(crate) fn str_matches(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let pattern = args.exactly_one("matches")?;
    let s = want_str(recv, "matches")?.to_string();
    let (pattern, flags) = match pattern {
        Value::Regex(regex) => (Rc::clone(&regex.pattern), Rc::clone(&regex.flags)),
        Value::Str(pattern) => (Rc::clone(pattern), Rc::from("")),
        _ => return ExcType::CastError.raise("matches expects a Regex or String"),
    };
    let anchored: Rc<str> = Rc::from(format!("^(?:{pattern})$").as_str());
    let compiled = interp.make_regex(&anchored, &flags)?;
    let Value::Regex(regex) = compiled else {
        unreachable!("make_regex returns a regex");
    };
    Ok(Value::Bool(regex.re.is_match(&s)))
}

/// `%s`/`%d`/`%f`/`%%` formatting, positional.
pub(crate) fn str_format(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let template = want_str(recv, "format")?.to_string();
    let mut out = String::with_capacity(template.len());
    let mut supplied = args.as_slice().iter();
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s') => {
                let value = supplied
                    .next()
                    .ok_or_else(|| ExcType::IllegalArgument.error("format: not enough arguments"))?;
                out.push_str(&interp.display_value(value)?);
            }
            Some('d') => {
                let value = supplied
                    .next()
                    .ok_or_else(|| ExcType::IllegalArgument.error("format: not enough arguments"))?;
                match value {
                    Value::Int(_) | Value::Big(_) => out.push_str(&interp.display_value(value)?),
                    _ => return ExcType::CastError.raise("format: %d expects an Int"),
                }
            }
            Some('f') => {
                let value = supplied
                    .next()
                    .ok_or_else(|| ExcType::IllegalArgument.error("format: not enough arguments"))?;
                match value {
                    Value::Real(r) => out.push_str(&crate::value::format_real(*r)),
                    Value::Int(i) => out.push_str(&crate::value::format_real(*i as f64)),
                    _ => return ExcType::CastError.raise("format: %f expects a number"),
                }
            }
            Some(other) => {
                return ExcType::IllegalArgument
                    .raise(format!("format: unknown directive '%{other}'"));
            }
            None => {
                return ExcType::IllegalArgument.raise("format: dangling '%'");
            }
        }
    }
    Ok(Value::str(out))
}

pub(crate) fn str_to_upper(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("toUpper")?;
    Ok(Value::str(want_str(recv, "toUpper")?.to_uppercase()))
}

pub(crate) fn str_to_lower(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("toLower")?;
    Ok(Value::str(want_str(recv, "toLower")?.to_lowercase()))
}

pub(crate) fn str_trim(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("trim")?;
    Ok(Value::str(want_str(recv, "trim")?.trim()))
}

pub(crate) fn str_starts_with(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let prefix = args.exactly_one("startsWith")?;
    let s = want_str(recv, "startsWith")?;
    Ok(Value::Bool(s.starts_with(&**want_str_arg(prefix, "startsWith")?)))
}

pub(crate) fn str_ends_with(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let suffix = args.exactly_one("endsWith")?;
    let s = want_str(recv, "endsWith")?;
    Ok(Value::Bool(s.ends_with(&**want_str_arg(suffix, "endsWith")?)))
}

pub(crate) fn str_contains(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let needle = args.exactly_one("contains")?;
    let s = want_str(recv, "contains")?;
    match needle {
        Value::Str(needle) => Ok(Value::Bool(s.contains(&**needle))),
        Value::Char(c) => Ok(Value::Bool(s.contains(*c))),
        _ => ExcType::CastError.raise("contains expects a String or Char"),
    }
}

/// First occurrence as a char index, or `-1`.
pub(crate) fn str_index_of(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let needle = args.exactly_one("indexOf")?;
    let s = want_str(recv, "indexOf")?;
    let needle = want_str_arg(needle, "indexOf")?;
    match s.find(&**needle) {
        Some(byte) => Ok(Value::Int(s[..byte].chars().count() as i64)),
        None => Ok(Value::Int(-1)),
    }
}

pub(crate) fn str_to_int(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("toInt")?;
    let s = want_str(recv, "toInt")?;
    let trimmed = s.trim();
    match trimmed.parse::<i64>() {
        Ok(value) => Ok(Value::Int(value)),
        Err(_) => match num_bigint::BigInt::parse_bytes(trimmed.as_bytes(), 10) {
            Some(big) => Ok(Value::from_big(big)),
            None => ExcType::IllegalArgument.raise(format!("'{s}' is not an Int")),
        },
    }
}

pub(crate) fn str_to_real(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("toReal")?;
    let s = want_str(recv, "toReal")?;
    s.trim()
        .parse::<f64>()
        .map(Value::Real)
        .map_err(|_| ExcType::IllegalArgument.error(format!("'{s}' is not a Real")))
}

/// Concatenation: the right operand renders through `toString`.
pub(crate) fn str_plus(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let rhs = args.exactly_one("plus")?;
    let s = want_str(recv, "plus")?;
    let rendered = interp.display_value(rhs)?;
    Ok(Value::str(format!("{s}{rendered}")))
}

/// `"ab" * 3`: repetition.
pub(crate) fn str_times(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let count = args.exactly_one("times")?;
    let s = want_str(recv, "times")?;
    let Value::Int(count) = count else {
        return ExcType::CastError.raise("string repetition count must be Int");
    };
    if *count < 0 {
        return ExcType::IllegalArgument.raise("string repetition count must not be negative");
    }
    Ok(Value::str(s.repeat(*count as usize)))
}

pub(crate) fn str_iterator(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("iterator")?;
    crate::builtins::iter::make_iter(recv)
        .ok_or_else(|| ExcType::CastError.error("iterator needs a String"))
}
