//! Cooperative suspension: external functions yield a `HostCall`, the
//! host resumes with a result (or a raise, or cancellation), and the
//! suspended statement replays with the memoised results.

use pretty_assertions::assert_eq;
use skald::{GlobalScope, Object, RunProgress, Script};

fn scope_with_fetch() -> GlobalScope {
    let mut scope = GlobalScope::new();
    scope.add_external_function("fetch", 1);
    scope
}

fn expect_call(progress: RunProgress) -> skald::HostCall {
    match progress {
        RunProgress::HostCall(call) => call,
        RunProgress::Complete(value) => panic!("expected a host call, got {value:?}"),
    }
}

fn expect_complete(progress: RunProgress) -> Object {
    match progress {
        RunProgress::Complete(value) => value,
        RunProgress::HostCall(call) => panic!("expected completion, got call to {}", call.name()),
    }
}

#[test]
fn external_calls_suspend_and_resume() {
    let mut scope = scope_with_fetch();
    let script = Script::compile("val a = fetch(1)\nval b = fetch(2)\na + b", "s.sk").unwrap();

    let call = expect_call(script.start(&mut scope).unwrap());
    assert_eq!(call.name(), "fetch");
    assert_eq!(call.args(), &[Object::Int(1)]);

    let call = expect_call(call.resume(&mut scope, Object::Int(10)).unwrap());
    assert_eq!(call.args(), &[Object::Int(2)]);

    let result = expect_complete(call.resume(&mut scope, Object::Int(20)).unwrap());
    assert_eq!(result, Object::Int(30));
}

#[test]
fn two_suspensions_in_one_statement_replay_in_order() {
    let mut scope = scope_with_fetch();
    let script = Script::compile("fetch(1) + fetch(2)", "s.sk").unwrap();

    let call = expect_call(script.start(&mut scope).unwrap());
    assert_eq!(call.args(), &[Object::Int(1)]);
    // Resuming replays; the first call consumes the memoised result
    // and the second suspends.
    let call = expect_call(call.resume(&mut scope, Object::Int(100)).unwrap());
    assert_eq!(call.args(), &[Object::Int(2)]);
    let result = expect_complete(call.resume(&mut scope, Object::Int(11)).unwrap());
    assert_eq!(result, Object::Int(111));
}

#[test]
fn statements_before_the_suspension_never_rerun() {
    // The counter host function records how often earlier statements
    // actually executed.
    use std::cell::Cell;
    use std::rc::Rc;

    let count = Rc::new(Cell::new(0));
    let seen = Rc::clone(&count);
    let mut scope = scope_with_fetch();
    scope.add_function("bump", 0, move |_| {
        seen.set(seen.get() + 1);
        Ok(Object::Void)
    });
    let script = Script::compile("bump()\nval a = fetch(1)\na", "s.sk").unwrap();

    let call = expect_call(script.start(&mut scope).unwrap());
    let result = expect_complete(call.resume(&mut scope, Object::Int(5)).unwrap());
    assert_eq!(result, Object::Int(5));
    assert_eq!(count.get(), 1, "bump() ran exactly once");
}

#[test]
fn resume_raise_surfaces_as_a_catchable_exception() {
    let mut scope = scope_with_fetch();
    let script = Script::compile(
        "try { fetch(1) } catch(e: KeyError) { \"caught: \" + e.message }",
        "s.sk",
    )
    .unwrap();

    let call = expect_call(script.start(&mut scope).unwrap());
    let result = expect_complete(call.resume_raise(&mut scope, "KeyError", "nope").unwrap());
    assert_eq!(result, Object::Str("caught: nope".to_owned()));
}

#[test]
fn cancellation_raises_cancelled_at_the_suspension_point() {
    let mut scope = scope_with_fetch();
    let script = Script::compile(
        "try { fetch(1) } catch(e: Cancelled) { \"stopped\" }",
        "s.sk",
    )
    .unwrap();
    let call = expect_call(script.start(&mut scope).unwrap());
    let result = expect_complete(call.cancel(&mut scope).unwrap());
    assert_eq!(result, Object::Str("stopped".to_owned()));
}

#[test]
fn the_generic_handler_does_not_catch_cancelled() {
    let mut scope = scope_with_fetch();
    let script = Script::compile(
        "try { fetch(1) } catch(e: Exception) { \"swallowed\" }",
        "s.sk",
    )
    .unwrap();
    let call = expect_call(script.start(&mut scope).unwrap());
    let err = call.cancel(&mut scope).unwrap_err();
    assert_eq!(err.exception.kind, "Cancelled");
}

#[test]
fn execute_rejects_external_calls() {
    let mut scope = scope_with_fetch();
    let script = Script::compile("fetch(1)", "s.sk").unwrap();
    let err = script.execute(&mut scope).unwrap_err();
    assert!(err.exception.message.contains("start()"));
}

#[test]
fn suspension_inside_a_loop_resumes_mid_iteration() {
    let mut scope = scope_with_fetch();
    let script = Script::compile(
        "var total = 0\nfor (i in 1..3) { total = total + fetch(i) }\ntotal",
        "s.sk",
    )
    .unwrap();

    let mut progress = script.start(&mut scope).unwrap();
    let mut served = Vec::new();
    loop {
        match progress {
            RunProgress::HostCall(call) => {
                let n = i64::try_from(&call.args()[0]).unwrap();
                served.push(n);
                progress = call.resume(&mut scope, Object::Int(n * 10)).unwrap();
            }
            RunProgress::Complete(value) => {
                assert_eq!(value, Object::Int(60));
                break;
            }
        }
    }
    assert_eq!(served, vec![1, 2, 3]);
}
