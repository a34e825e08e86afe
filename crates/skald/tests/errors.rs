//! Error taxonomy, exception machinery and compile-time failures.

use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use skald::{GlobalScope, Object, Script, TraceEvent, Tracer};

fn eval(src: &str) -> Object {
    GlobalScope::new()
        .eval(src)
        .unwrap_or_else(|err| panic!("eval failed for {src:?}: {err}"))
}

fn eval_err(src: &str) -> skald::Error {
    GlobalScope::new()
        .eval(src)
        .expect_err("expected evaluation to fail")
}

fn exec_err(src: &str) -> skald::ExecutionError {
    match eval_err(src) {
        skald::Error::Execution(err) => err,
        skald::Error::Compile(err) => panic!("expected a runtime error, got {err}"),
    }
}

#[test]
fn arithmetic_errors() {
    assert_eq!(exec_err("1 / 0").exception.kind, "ArithmeticError");
    assert_eq!(exec_err("1 % 0").exception.kind, "ArithmeticError");
    assert_eq!(exec_err("1.0 / 0.0").exception.kind, "ArithmeticError");
    assert_eq!(
        eval("try { 1 / 0 } catch(e: ArithmeticError) { -1 }"),
        Object::Int(-1)
    );
    assert_eq!(
        eval("try { 1 / 0 } catch(e: Exception) { -2 }"),
        Object::Int(-2)
    );
}

#[test]
fn container_errors() {
    assert_eq!(exec_err("[1, 2][5]").exception.kind, "IndexError");
    assert_eq!(exec_err("[1, 2][-5]").exception.kind, "IndexError");
    assert_eq!(exec_err("val m = {\"a\": 1}; m[\"b\"]").exception.kind, "KeyError");
    assert_eq!(exec_err("val x = null; x.size()").exception.kind, "NullAccess");
    assert_eq!(exec_err("if (1) 2").exception.kind, "CastError");
    assert_eq!(exec_err("val m = {}; m[[1]] = 2").exception.kind, "CastError");
}

#[test]
fn resolution_errors() {
    assert_eq!(exec_err("nope + 1").exception.kind, "ResolutionError");
    assert_eq!(exec_err("\"a\".frobnicate()").exception.kind, "ResolutionError");
    assert_eq!(exec_err("val x = 1; x = 2").exception.kind, "ResolutionError");
    assert_eq!(
        exec_err("fun f(a) { a }; f(1, 2, 3)").exception.kind,
        "ResolutionError"
    );
}

#[test]
fn range_step_zero_raises() {
    assert_eq!(exec_err("(1..5).step(0)").exception.kind, "ArithmeticError");
}

#[test]
fn uncaught_exceptions_carry_a_stack_trace() {
    let src = "fun inner() { throw Exception(\"boom\") }\n\
               fun outer() { inner() }\n\
               outer()";
    let err = {
        let mut scope = GlobalScope::new();
        let script = Script::compile(src, "trace.sk").unwrap();
        script.execute(&mut scope).unwrap_err()
    };
    assert_eq!(err.exception.kind, "Exception");
    assert_eq!(err.exception.message, "boom");
    let functions: Vec<&str> = err
        .exception
        .stack
        .iter()
        .map(|frame| frame.function.as_str())
        .collect();
    assert_eq!(functions, vec!["inner", "outer", "<main>"]);
    assert!(err.trace.contains("trace.sk:"), "trace: {}", err.trace);
}

#[test]
fn stack_overflow_is_not_a_plain_exception() {
    // Runs on a thread with a larger stack: the interpreter's own call-depth
    // guard needs more native stack than the default test-thread allotment
    // to trip before the real stack is exhausted.
    std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(|| {
            let src = "fun f() { f() }\n\
                       try { f() } catch(e: Exception) { \"caught\" }";
            assert_eq!(exec_err(src).exception.kind, "StackOverflow");

            let src = "fun f() { f() }\n\
                       try { f() } catch(e: StackOverflow) { \"depth\" }";
            assert_eq!(eval(src), Object::Str("depth".to_owned()));
        })
        .unwrap()
        .join()
        .unwrap();
}

#[test]
fn finally_runs_exactly_once_per_entry() {
    let src = "var log = []\n\
               fun f() { try { log.add(1); return 10 } finally { log.add(2) } }\n\
               val r = f()\n\
               log.add(3)\n\
               \"${r}:${log}\"";
    assert_eq!(eval(src), Object::Str("10:[1, 2, 3]".to_owned()));
}

#[test]
fn finally_runs_on_every_exit_path() {
    // Normal completion, caught exception, and exception in flight.
    let src = "var n = 0\n\
               try { 1 } finally { n = n + 1 }\n\
               try { throw Exception(\"x\") } catch(e: Exception) { } finally { n = n + 10 }\n\
               try {\n\
                   try { throw Exception(\"y\") } finally { n = n + 100 }\n\
               } catch(e: Exception) { }\n\
               n";
    assert_eq!(eval(src), Object::Int(111));
}

#[test]
fn finally_runs_when_break_leaves_the_try() {
    let src = "var n = 0\n\
               while(true) { try { break } finally { n = n + 1 } }\n\
               n";
    assert_eq!(eval(src), Object::Int(1));
}

#[test]
fn a_raising_finally_replaces_the_in_flight_exception() {
    let src = "try {\n\
                   try { throw Exception(\"a\") } finally { throw Exception(\"b\") }\n\
               } catch(e: Exception) { e.message }";
    assert_eq!(eval(src), Object::Str("b".to_owned()));
}

#[test]
fn cause_chains_are_preserved() {
    let src = "val inner = Exception(\"root cause\")\n\
               try { throw Exception(\"outer\", inner) } catch(e: Exception) { e.cause.message }";
    assert_eq!(eval(src), Object::Str("root cause".to_owned()));
}

#[test]
fn catches_select_by_class() {
    let src = "try { [1][5] } catch(e: KeyError) { \"key\" } catch(e: IndexError) { \"index\" }";
    assert_eq!(eval(src), Object::Str("index".to_owned()));
}

#[test]
fn rethrow_from_a_catch_clause() {
    let src = "try {\n\
                   try { throw Exception(\"first\") } catch(e: Exception) { throw Exception(\"second\") }\n\
               } catch(e: Exception) { e.message }";
    assert_eq!(eval(src), Object::Str("second".to_owned()));
}

#[test]
fn lex_errors_carry_positions() {
    let err = Script::compile("val s = \"unterminated", "bad.sk").unwrap_err();
    let skald::CompileError::Lex(lex) = &err else {
        panic!("expected a lex error, got {err}");
    };
    assert!(lex.message.contains("unterminated string"));
    assert_eq!(lex.pos.line, 1);
}

#[test]
fn parse_errors_report_the_expected_set() {
    let err = Script::compile("val = 1", "bad.sk").unwrap_err();
    let skald::CompileError::Parse(parse) = &err else {
        panic!("expected a parse error, got {err}");
    };
    assert_eq!(parse.expected.as_deref(), Some("variable name"));
}

#[test]
fn batch_compilation_collects_errors() {
    let errors = Script::compile_batch("val = 1\nval ok = 2\nfun (){}\n", "bad.sk").unwrap_err();
    assert_eq!(errors.len(), 2);
}

#[test]
fn whitespace_reformatting_preserves_meaning() {
    let compact = "var s=0;var i=0;while(i<10){s=s+i;i=i+1};s";
    let airy = "var s = 0\nvar i = 0\nwhile (i < 10) {\n    s = s + i\n    i = i + 1\n}\ns";
    assert_eq!(eval(compact), eval(airy));
}

#[test]
fn host_errors_surface_with_their_kind() {
    let mut scope = GlobalScope::new();
    scope.add_function("lookup", 1, |_args| {
        Err(skald::HostError::with_kind("KeyError", "no such entry"))
    });
    let result = scope
        .eval("try { lookup(1) } catch(e: KeyError) { e.message }")
        .unwrap();
    assert_eq!(result, Object::Str("no such entry".to_owned()));
}

#[derive(Default)]
struct SharedTracer {
    lines: Rc<RefCell<Vec<String>>>,
}

impl Tracer for SharedTracer {
    fn event(&mut self, event: &TraceEvent<'_>) {
        let line = match event {
            TraceEvent::Call { name, .. } => format!("call {name}"),
            TraceEvent::Return { name, .. } => format!("return {name}"),
            TraceEvent::Raise { kind, .. } => format!("raise {kind}"),
            TraceEvent::Suspend { name, .. } => format!("suspend {name}"),
            TraceEvent::Resume { name } => format!("resume {name}"),
        };
        self.lines.borrow_mut().push(line);
    }
}

#[test]
fn the_tracer_observes_calls_and_raises() {
    let lines = Rc::new(RefCell::new(Vec::new()));
    let mut scope = GlobalScope::new();
    scope.set_tracer(Box::new(SharedTracer {
        lines: Rc::clone(&lines),
    }));
    let src = "fun f() { throw Exception(\"x\") }\n\
               try { f() } catch(e: Exception) { }";
    scope.eval(src).unwrap();
    let lines = lines.borrow();
    assert!(lines.contains(&"call f".to_owned()), "{lines:?}");
    assert!(lines.contains(&"raise Exception".to_owned()), "{lines:?}");
}
