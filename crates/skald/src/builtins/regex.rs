//! Methods on `Regex`.

use std::rc::Rc;

use crate::args::Arguments;
use crate::exception::{ExcType, RunResult};
use crate::interp::Interp;
use crate::value::{RegexValue, Value};

fn want_regex<'a>(recv: &'a Value, name: &str) -> RunResult<&'a Rc<RegexValue>> {
    match recv {
        Value::Regex(regex) => Ok(regex),
        _ => ExcType::CastError.raise(format!("{name} needs a Regex")),
    }
}

fn want_str_arg(value: &Value, name: &str) -> RunResult<Rc<str>> {
    value
        .as_str()
        .cloned()
        .ok_or_else(|| ExcType::CastError.error(format!("{name} expects a String argument")))
}

pub(crate) fn regex_pattern(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    args.check_empty("pattern")?;
    Ok(Value::Str(Rc::clone(&want_regex(recv, "pattern")?.pattern)))
}

/// Whole-string match.
pub(crate) fn regex_matches(interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let subject = args.exactly_one("matches")?;
    let regex = want_regex(recv, "matches")?;
    let subject = want_str_arg(subject, "matches")?;
    let anchored: Rc<str> = Rc::from(format!("^(?:{})$", regex.pattern).as_str());
    let flags = Rc::clone(&regex.flags);
    let compiled = interp.make_regex(&anchored, &flags)?;
    let Value::Regex(compiled) = compiled else {
        unreachable!("make_regex returns a regex");
    };
    Ok(Value::Bool(compiled.re.is_match(&subject)))
}

/// First match, or `null`.
pub(crate) fn regex_find(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let subject = args.exactly_one("find")?;
    let regex = want_regex(recv, "find")?;
    let subject = want_str_arg(subject, "find")?;
    Ok(regex
        .re
        .find(&subject)
        .map_or(Value::Null, |m| Value::str(m.as_str())))
}

/// Every non-overlapping match.
pub(crate) fn regex_find_all(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let subject = args.exactly_one("findAll")?;
    let regex = want_regex(recv, "findAll")?;
    let subject = want_str_arg(subject, "findAll")?;
    let matches = regex
        .re
        .find_iter(&subject)
        .map(|m| Value::str(m.as_str()))
        .collect();
    Ok(Value::list(matches))
}

/// Replaces every match; `$1`-style group references work in the
/// replacement.
pub(crate) fn regex_replace(_interp: &mut Interp, recv: &Value, args: &Arguments) -> RunResult<Value> {
    let (subject, replacement) = args.exactly_two("replace")?;
    let regex = want_regex(recv, "replace")?;
    let subject = want_str_arg(subject, "replace")?;
    let replacement = want_str_arg(replacement, "replace")?;
    Ok(Value::str(
        regex.re.replace_all(&subject, &*replacement).into_owned(),
    ))
}
