//! Embedding API: root scopes, compiled scripts, execution and
//! cooperative suspension.
//!
//! A [`GlobalScope`] is a root scope with the built-ins installed plus
//! everything the embedder adds: host functions, external (suspending)
//! functions, variables and the module-provider capability hook.
//!
//! [`Script::execute`] runs to completion. [`Script::start`] runs
//! until the first external call and hands control back to the host as
//! a [`HostCall`]; `resume` memoises the host result and replays the
//! deterministic execution, consuming every memoised host-boundary
//! outcome in call order — so host-visible effects happen exactly
//! once, while internal state is reconstructed bit for bit.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use ahash::AHashMap;

use crate::args::Arguments;
use crate::ast::Node;
use crate::builtins;
use crate::class::{Arity, ClassRegistry};
use crate::exception::{ExcType, ExceptionValue, RunError, RunResult, StackFrame};
use crate::interp::{ExtOutcome, Interp, ModuleProvider};
use crate::lex::{LexError, lex};
use crate::object::{Object, object_from_value, value_from_object};
use crate::parse::{ParseError, parse, parse_batch};
use crate::resource::{ResourceLimits, RuntimeFlags};
use crate::scope::{self, Scope};
use crate::source::{Pos, Source};
use crate::tracer::{NoopTracer, Tracer};
use crate::value::{FunctionValue, HostFn, RegexValue, Value};

/// Compile-time failure from [`Script::compile`].
#[derive(Debug, Clone)]
pub enum CompileError {
    Lex(LexError),
    Parse(ParseError),
}

impl CompileError {
    pub fn pos(&self) -> Pos {
        match self {
            Self::Lex(err) => err.pos,
            Self::Parse(err) => err.pos,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lex(err) => write!(f, "lex error: {err}"),
            Self::Parse(err) => write!(f, "parse error: {err}"),
        }
    }
}

impl std::error::Error for CompileError {}

/// The SL exception surfaced to the embedder: kind (class name),
/// message, captured stack and optional cause chain.
#[derive(Debug, Clone)]
pub struct Exception {
    pub kind: String,
    pub message: String,
    pub stack: Vec<StackFrame>,
    pub cause: Option<Box<Exception>>,
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A failed execution: the exception plus the rendered multi-line
/// stack trace (`file:line:col` per frame).
#[derive(Debug, Clone)]
pub struct ExecutionError {
    pub exception: Exception,
    pub trace: String,
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.exception, self.trace)
    }
}

impl std::error::Error for ExecutionError {}

/// Either failure of the convenience `eval` path.
#[derive(Debug)]
pub enum Error {
    Compile(CompileError),
    Execution(ExecutionError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile(err) => write!(f, "{err}"),
            Self::Execution(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<CompileError> for Error {
    fn from(err: CompileError) -> Self {
        Self::Compile(err)
    }
}

impl From<ExecutionError> for Error {
    fn from(err: ExecutionError) -> Self {
        Self::Execution(err)
    }
}

/// Failure reported by a host function. The kind names a built-in
/// exception kind (`"KeyError"`, …); unknown kinds raise as plain
/// `Exception`.
#[derive(Debug, Clone)]
pub struct HostError {
    pub kind: Option<String>,
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: None,
            message: message.into(),
        }
    }

    pub fn with_kind(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            message: message.into(),
        }
    }

    fn into_run_error(self) -> RunError {
        let kind = self
            .kind
            .as_deref()
            .and_then(|name| ExcType::from_str(name).ok())
            .unwrap_or(ExcType::Exception);
        kind.error(self.message)
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Some(kind) => write!(f, "{kind}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for HostError {}

/// A root scope with the built-ins installed.
pub struct GlobalScope {
    scope: Scope,
    registry: Rc<RefCell<ClassRegistry>>,
    flags: RuntimeFlags,
    limits: ResourceLimits,
    tracer: Box<dyn Tracer>,
    regex_cache: Rc<RefCell<AHashMap<(Rc<str>, Rc<str>), Rc<RegexValue>>>>,
    module_provider: Option<Rc<ModuleProvider>>,
}

impl Default for GlobalScope {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalScope {
    #[must_use]
    pub fn new() -> Self {
        Self::with_flags(RuntimeFlags::default(), ResourceLimits::default())
    }

    /// A scope with explicit optimisation flags and limits. Flags only
    /// change performance; any observable difference is a bug.
    #[must_use]
    pub fn with_flags(flags: RuntimeFlags, limits: ResourceLimits) -> Self {
        let registry = Rc::new(RefCell::new(builtins::install()));
        let scope = Scope::new_root();
        for (name, value) in builtins::class_bindings(&registry.borrow()) {
            scope.declare(&name, value, false);
        }
        Self {
            scope,
            registry,
            flags,
            limits,
            tracer: Box::new(NoopTracer),
            regex_cache: Rc::new(RefCell::new(AHashMap::default())),
            module_provider: None,
        }
    }

    /// Installs a host-provided callable. Calls run inline (no
    /// suspension); failures surface as SL exceptions.
    pub fn add_function(
        &mut self,
        name: &str,
        arity: usize,
        f: impl Fn(&[Object]) -> Result<Object, HostError> + 'static,
    ) {
        let fn_name: Rc<str> = Rc::from(name);
        let body = {
            let f = Box::new(f);
            move |interp: &mut Interp, args: &Arguments| -> RunResult<Value> {
                let mut objects = Vec::with_capacity(args.len());
                for value in args.as_slice() {
                    objects.push(object_from_value(interp, value)?);
                }
                match f(&objects) {
                    Ok(object) => Ok(value_from_object(&object)),
                    Err(err) => Err(err.into_run_error()),
                }
            }
        };
        let function = Value::Function(Rc::new(FunctionValue::Host(HostFn {
            name: Rc::clone(&fn_name),
            arity: Arity::Exact(arity as u8),
            body: Box::new(body),
        })));
        self.scope.declare(&fn_name, function, false);
    }

    /// Declares an external function: calling it suspends the
    /// execution and yields a [`HostCall`] to the embedder.
    pub fn add_external_function(&mut self, name: &str, arity: usize) {
        let fn_name: Rc<str> = Rc::from(name);
        let function = Value::Function(Rc::new(FunctionValue::External {
            name: Rc::clone(&fn_name),
            arity: Arity::Exact(arity as u8),
        }));
        self.scope.declare(&fn_name, function, false);
    }

    /// Binds (or rebinds) a mutable variable in the root scope.
    pub fn set_var(&mut self, name: &str, value: Object) {
        let value = value_from_object(&value);
        if let Some((depth, slot)) = self.scope.lookup(name) {
            if self.scope.set_at(depth, slot, value.clone()) {
                return;
            }
        }
        self.scope.declare(&Rc::from(name), value, true);
    }

    pub fn get_var(&mut self, name: &str) -> Option<Object> {
        let (depth, slot) = self.scope.lookup(name)?;
        let value = self.scope.get_at(depth, slot)?;
        let mut interp = self.interp();
        object_from_value(&mut interp, &value).ok()
    }

    pub fn set_tracer(&mut self, tracer: Box<dyn Tracer>) {
        self.tracer = tracer;
    }

    /// Installs the capability hook consulted by `import`.
    pub fn set_module_provider(
        &mut self,
        provider: impl Fn(&str) -> Option<Vec<(String, Object)>> + 'static,
    ) {
        self.module_provider = Some(Rc::new(provider));
    }

    /// Convenience: compile and execute in one step.
    pub fn eval(&mut self, source: &str) -> Result<Object, Error> {
        let script = Script::compile(source, "<eval>")?;
        Ok(script.execute(self)?)
    }

    fn interp(&mut self) -> Interp<'_> {
        Interp::new(
            Rc::clone(&self.registry),
            self.flags,
            self.limits,
            self.tracer.as_mut(),
            Rc::clone(&self.regex_cache),
            self.module_provider.clone(),
        )
    }
}

/// A compiled program: the source buffer plus the executable tree.
#[derive(Debug)]
pub struct Script {
    source: Source,
    statements: Rc<Vec<Node>>,
}

impl Script {
    /// Parses source text, stopping at the first error.
    pub fn compile(text: &str, label: &str) -> Result<Self, CompileError> {
        let tokens = lex(text).map_err(CompileError::Lex)?;
        let statements = parse(tokens).map_err(CompileError::Parse)?;
        Ok(Self {
            source: Source::new(label, text),
            statements: Rc::new(statements),
        })
    }

    /// Batch mode: collects every top-level parse error instead of
    /// stopping at the first.
    pub fn compile_batch(text: &str, label: &str) -> Result<Self, Vec<CompileError>> {
        let tokens = lex(text).map_err(|err| vec![CompileError::Lex(err)])?;
        let statements = parse_batch(tokens)
            .map_err(|errs| errs.into_iter().map(CompileError::Parse).collect::<Vec<_>>())?;
        Ok(Self {
            source: Source::new(label, text),
            statements: Rc::new(statements),
        })
    }

    #[must_use]
    pub fn label(&self) -> &str {
        self.source.label()
    }

    /// Runs to completion. A call to an external function is an error
    /// here; use [`Script::start`] for suspendable execution.
    pub fn execute(&self, scope: &mut GlobalScope) -> Result<Object, ExecutionError> {
        match self.start(scope)? {
            RunProgress::Complete(value) => Ok(value),
            RunProgress::HostCall(call) => Err(ExecutionError {
                exception: Exception {
                    kind: "Internal".to_owned(),
                    message: format!(
                        "external function '{}' called under execute(); use start()",
                        call.name
                    ),
                    stack: Vec::new(),
                    cause: None,
                },
                trace: String::new(),
            }),
        }
    }

    /// Starts a suspendable execution.
    pub fn start(&self, scope: &mut GlobalScope) -> Result<RunProgress, ExecutionError> {
        let execution = Execution {
            statements: Rc::clone(&self.statements),
            source: self.source.clone(),
            root_snapshot: scope.scope.slot_values(),
            ext_results: Vec::new(),
            cancelled: false,
        };
        execution.advance(scope)
    }
}

/// Progress of a suspendable execution.
#[derive(Debug)]
pub enum RunProgress {
    Complete(Object),
    HostCall(HostCall),
}

/// A suspended execution waiting for the result of an external call.
#[derive(Debug)]
pub struct HostCall {
    name: String,
    args: Vec<Object>,
    execution: Execution,
}

impl HostCall {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn args(&self) -> &[Object] {
        &self.args
    }

    /// Supplies the call's result and resumes.
    pub fn resume(
        mut self,
        scope: &mut GlobalScope,
        value: Object,
    ) -> Result<RunProgress, ExecutionError> {
        self.execution
            .ext_results
            .push(ExtOutcome::Value(value_from_object(&value)));
        self.execution.advance(scope)
    }

    /// Makes the pending call site raise instead. `kind` names a
    /// built-in exception kind; unknown kinds raise as `Exception`.
    pub fn resume_raise(
        mut self,
        scope: &mut GlobalScope,
        kind: &str,
        message: &str,
    ) -> Result<RunProgress, ExecutionError> {
        let kind = ExcType::from_str(kind).unwrap_or(ExcType::Exception);
        self.execution
            .ext_results
            .push(ExtOutcome::Raise(kind, message.to_owned()));
        self.execution.advance(scope)
    }

    /// Cancels the execution: the pending suspension point raises
    /// `Cancelled`, which only a handler naming it can catch.
    pub fn cancel(mut self, scope: &mut GlobalScope) -> Result<RunProgress, ExecutionError> {
        self.execution.cancelled = true;
        self.execution.advance(scope)
    }
}

/// The retained state of a suspended run.
///
/// Resuming replays the whole program against a fresh module frame,
/// consuming memoised host-boundary outcomes (host-function results
/// and external-call results) in call order. Execution is
/// deterministic, so the replay reconstructs the exact internal state
/// of the suspended run while every host-visible effect happens
/// exactly once. Root-scope slots are restored from the snapshot taken
/// at `start` so assignments to host bindings replay identically.
#[derive(Debug)]
struct Execution {
    statements: Rc<Vec<Node>>,
    source: Source,
    root_snapshot: Vec<Value>,
    ext_results: Vec<ExtOutcome>,
    cancelled: bool,
}

impl Execution {
    fn advance(mut self, scope: &mut GlobalScope) -> Result<RunProgress, ExecutionError> {
        scope.scope.restore_slot_values(&self.root_snapshot);
        let frame = scope::borrow_frame(
            Some(scope.scope.clone()),
            Arguments::empty(),
            Value::Void,
            Pos::START,
            false,
        );
        let registry = Rc::clone(&scope.registry);

        let mut interp = scope.interp();
        interp.ext.results = std::mem::take(&mut self.ext_results);
        interp.ext.cursor = 0;
        interp.ext.cancel = self.cancelled;

        let mut last = Value::Void;
        let mut failed = None;
        for statement in self.statements.iter() {
            frame.set_pos(statement.pos);
            match interp.eval(statement, &frame) {
                Ok(value) => last = value,
                Err(err) => {
                    failed = Some(err);
                    break;
                }
            }
        }
        let ext_results = std::mem::take(&mut interp.ext.results);

        match failed {
            None => {
                let object = object_from_value(&mut interp, &last)
                    .map_err(|err| wrap_error(err, &frame, &self.source, &registry))?;
                Ok(RunProgress::Complete(object))
            }
            Some(RunError::Suspend(call)) => {
                let mut args = Vec::with_capacity(call.args.len());
                for value in &call.args {
                    args.push(
                        object_from_value(&mut interp, value)
                            .map_err(|err| wrap_error(err, &frame, &self.source, &registry))?,
                    );
                }
                self.ext_results = ext_results;
                Ok(RunProgress::HostCall(HostCall {
                    name: call.name.to_string(),
                    args,
                    execution: self,
                }))
            }
            Some(err) => Err(wrap_error(err, &frame, &self.source, &registry)),
        }
    }
}

/// Wraps a terminal runtime error for the embedder, rendering the
/// multi-line `file:line:col` stack trace.
fn wrap_error(
    err: RunError,
    frame: &Scope,
    source: &Source,
    registry: &Rc<RefCell<ClassRegistry>>,
) -> ExecutionError {
    let exception = match err {
        RunError::Exc(raise) => {
            raise.push_frame("<main>", frame.pos());
            public_exception(&raise.exc, registry)
        }
        RunError::Signal(signal) => Exception {
            kind: "Internal".to_owned(),
            message: format!("unconsumed '{}' signal at top level", signal.describe()),
            stack: vec![StackFrame {
                function: "<main>".to_owned(),
                pos: frame.pos(),
            }],
            cause: None,
        },
        RunError::Suspend(call) => Exception {
            kind: "Internal".to_owned(),
            message: format!("unexpected suspension at '{}'", call.name),
            stack: Vec::new(),
            cause: None,
        },
        RunError::Internal(message) => Exception {
            kind: "Internal".to_owned(),
            message: message.into_owned(),
            stack: vec![StackFrame {
                function: "<main>".to_owned(),
                pos: frame.pos(),
            }],
            cause: None,
        },
    };
    let mut trace = String::new();
    for frame in &exception.stack {
        trace.push_str(&format!(
            "  at {} ({}:{}:{})\n",
            frame.function,
            source.label(),
            frame.pos.line,
            frame.pos.column
        ));
    }
    ExecutionError { exception, trace }
}

fn public_exception(
    exc: &Rc<ExceptionValue>,
    registry: &Rc<RefCell<ClassRegistry>>,
) -> Exception {
    let kind = registry.borrow().get(exc.class).name.to_string();
    let cause = match &exc.cause {
        Some(Value::Exception(cause)) => Some(Box::new(public_exception(cause, registry))),
        _ => None,
    };
    Exception {
        kind,
        message: exc.message.to_string(),
        stack: exc.stack.borrow().clone(),
        cause,
    }
}
