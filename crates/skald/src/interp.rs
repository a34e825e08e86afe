//! Execution context and the dispatch protocol.
//!
//! An [`Interp`] lives for one execution (or one replay of a suspended
//! execution). It threads the class registry, flags, limits, tracer
//! and host-boundary replay state through the evaluator; the lexical
//! state itself lives in [`Scope`] frames passed explicitly.
//!
//! Dispatch follows one protocol everywhere: resolve the receiver's
//! class, look the selector up the parent chain, invoke with a fresh
//! frame whose parent is the callee's defining scope. No built-in
//! bypasses it; the fast paths are flag-gated shortcuts to identical
//! results.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::rc::Rc;

use ahash::AHashMap;

use crate::args::Arguments;
use crate::class::{Callable, ClassId, ClassRegistry, FieldDef, UserFn, classes};
use crate::exception::{ExcType, ExceptionValue, PendingCall, RunError, RunResult, Signal};
use crate::ic::{FieldIc, IndexIc};
use crate::resource::{ResourceLimits, RuntimeFlags};
use crate::scope::{self, Scope};
use crate::source::Pos;
use crate::tracer::{TraceEvent, Tracer};
use crate::value::{
    FunctionValue, InstanceValue, MapData, MapKey, RangeValue, RegexValue, SetData, Value,
    quote_str,
};

/// Module-provider hook: receives the dotted import path and returns
/// the module's bindings, or `None` to deny/miss. Capability policy
/// for `import` lives entirely in this hook.
pub(crate) type ModuleProvider = dyn Fn(&str) -> Option<Vec<(String, crate::object::Object)>>;

/// Result of one memoised host-boundary call, replayed on resume.
#[derive(Debug, Clone)]
pub(crate) enum ExtOutcome {
    Value(Value),
    Raise(ExcType, String),
}

/// Host-boundary replay state for the current (re-)execution.
#[derive(Debug, Default)]
pub(crate) struct ExtState {
    pub results: Vec<ExtOutcome>,
    pub cursor: usize,
    pub cancel: bool,
}

const REGEX_CACHE_LIMIT: usize = 256;
const DISPLAY_DEPTH_LIMIT: usize = 16;

pub(crate) struct Interp<'a> {
    pub registry: Rc<RefCell<ClassRegistry>>,
    pub flags: RuntimeFlags,
    pub limits: ResourceLimits,
    pub tracer: &'a mut dyn Tracer,
    pub regex_cache: Rc<RefCell<AHashMap<(Rc<str>, Rc<str>), Rc<RegexValue>>>>,
    pub module_provider: Option<Rc<ModuleProvider>>,
    pub ext: ExtState,
    /// Current script call depth, checked against the recursion limit
    /// before a frame is created.
    pub depth: usize,
}

impl<'a> Interp<'a> {
    pub fn new(
        registry: Rc<RefCell<ClassRegistry>>,
        flags: RuntimeFlags,
        limits: ResourceLimits,
        tracer: &'a mut dyn Tracer,
        regex_cache: Rc<RefCell<AHashMap<(Rc<str>, Rc<str>), Rc<RegexValue>>>>,
        module_provider: Option<Rc<ModuleProvider>>,
    ) -> Self {
        Self {
            registry,
            flags,
            limits,
            tracer,
            regex_cache,
            module_provider,
            ext: ExtState::default(),
            depth: 0,
        }
    }

    pub fn class_name(&self, id: ClassId) -> Rc<str> {
        Rc::clone(&self.registry.borrow().get(id).name)
    }

    pub fn class_version(&self, id: ClassId) -> u32 {
        self.registry.borrow().get(id).version
    }

    // ---- calling ---------------------------------------------------

    /// Calls any callable value.
    pub fn call_value(&mut self, callee: &Value, args: Arguments, pos: Pos) -> RunResult<Value> {
        match callee {
            Value::Function(function) => match function.as_ref() {
                FunctionValue::User(f) => self.call_user(&Rc::clone(f), None, args, pos),
                FunctionValue::Bound { recv, name } => {
                    let recv = recv.clone();
                    self.dispatch(&recv, name, args)
                }
                FunctionValue::Host(host) => {
                    if !host.arity.accepts(args.len()) {
                        return ExcType::ResolutionError.raise(format!(
                            "{}() does not take {} arguments",
                            host.name,
                            args.len()
                        ));
                    }
                    self.host_call(host, &args)
                }
                FunctionValue::External { name, arity } => {
                    if !arity.accepts(args.len()) {
                        return ExcType::ResolutionError.raise(format!(
                            "{}() does not take {} arguments",
                            name,
                            args.len()
                        ));
                    }
                    self.external_call(&Rc::clone(name), &args, pos)
                }
            },
            Value::Class(id) => self.instantiate(*id, &args, pos),
            other => {
                let class = other.class_id();
                if self.registry.borrow().has_selector(class, "call") {
                    self.dispatch(other, "call", args)
                } else {
                    ExcType::CastError
                        .raise(format!("{} is not callable", self.class_name(class)))
                }
            }
        }
    }

    /// Calls a script function. `this` overrides the lexical `this`
    /// captured from the defining scope (method calls pass the
    /// receiver here).
    pub fn call_user(
        &mut self,
        f: &Rc<UserFn>,
        this: Option<Value>,
        args: Arguments,
        pos: Pos,
    ) -> RunResult<Value> {
        if self.depth >= self.limits.max_recursion_depth {
            return ExcType::StackOverflow.raise(format!(
                "maximum call depth of {} exceeded",
                self.limits.max_recursion_depth
            ));
        }
        let this = this.unwrap_or_else(|| f.scope.this());
        let frame = scope::borrow_frame(
            Some(f.scope.clone()),
            args.clone(),
            this,
            pos,
            self.flags.scope_pool,
        );
        self.depth += 1;
        self.tracer.event(&TraceEvent::Call {
            name: &f.name,
            pos,
            depth: self.depth,
        });

        let result = self.bind_and_run(f, &args, &frame);
        self.depth -= 1;

        let outcome = match result {
            Ok(value) => {
                self.tracer.event(&TraceEvent::Return {
                    name: &f.name,
                    depth: self.depth + 1,
                });
                Ok(value)
            }
            Err(RunError::Signal(Signal::Return(value))) => {
                self.tracer.event(&TraceEvent::Return {
                    name: &f.name,
                    depth: self.depth + 1,
                });
                Ok(value)
            }
            Err(RunError::Signal(signal)) => ExcType::ResolutionError.raise(format!(
                "'{}' outside of a loop",
                signal.describe()
            )),
            Err(RunError::Exc(raise)) => {
                raise.push_frame(&f.name, frame.pos());
                Err(RunError::Exc(raise))
            }
            Err(other) => Err(other),
        };
        scope::release_frame(frame, self.flags.scope_pool);
        outcome
    }

    fn bind_and_run(&mut self, f: &Rc<UserFn>, args: &Arguments, frame: &Scope) -> RunResult<Value> {
        if args.len() > f.params.len() {
            return ExcType::ResolutionError.raise(format!(
                "{}() takes at most {} arguments ({} given)",
                f.name,
                f.params.len(),
                args.len()
            ));
        }
        for (i, param) in f.params.iter().enumerate() {
            let value = match args.get(i) {
                Some(value) => value.clone(),
                None => match &param.default {
                    Some(thunk) => self.eval(thunk, frame)?,
                    None => {
                        return ExcType::ResolutionError.raise(format!(
                            "{}() missing argument '{}'",
                            f.name, param.name
                        ));
                    }
                },
            };
            frame.declare(&param.name, value, true);
        }
        self.eval(&f.body, frame)
    }

    /// Invokes a resolved method table entry on a receiver.
    pub fn call_callable(
        &mut self,
        callable: &Callable,
        recv: &Value,
        args: Arguments,
        pos: Pos,
    ) -> RunResult<Value> {
        match callable {
            Callable::Host(f) => f(self, recv, &args),
            Callable::User(f) => self.call_user(&Rc::clone(f), Some(recv.clone()), args, pos),
        }
    }

    /// Full dispatch: selector lookup along the receiver's class chain,
    /// then invocation. The method-call IC in the evaluator caches the
    /// outcome of exactly this resolution.
    pub fn dispatch(&mut self, recv: &Value, name: &str, args: Arguments) -> RunResult<Value> {
        let class = recv.class_id();
        let resolved = {
            let registry = self.registry.borrow();
            registry
                .lookup_method(class, name, args.len())
                .map(|(def_class, idx)| registry.get(def_class).method(idx).callable.clone())
        };
        match resolved {
            Some(callable) => self.call_callable(&callable, recv, args, Pos::START),
            None => self.method_fallback(recv, name, &args),
        }
    }

    /// Selectors every value answers even without a table entry, then
    /// the resolution error. `compareTo` here uses the structural
    /// comparison directly, so a class without its own `compareTo`
    /// cannot re-enter dispatch.
    pub fn method_fallback(&mut self, recv: &Value, name: &str, args: &Arguments) -> RunResult<Value> {
        match (name, args.len()) {
            ("toString", 0) => return Ok(Value::str(self.display_value(recv)?)),
            ("inspect", 0) => return Ok(Value::str(self.inspect_value(recv)?)),
            ("equals", 1) => {
                let other = args.get(0).expect("arity checked");
                return Ok(Value::Bool(self.values_equal(recv, other)?));
            }
            ("compareTo", 1) => {
                let other = args.get(0).expect("arity checked");
                match recv.sl_cmp(other) {
                    Some(Some(ordering)) => {
                        return Ok(Value::Int(match ordering {
                            Ordering::Less => -1,
                            Ordering::Equal => 0,
                            Ordering::Greater => 1,
                        }));
                    }
                    Some(None) => {
                        return ExcType::ArithmeticError.raise("values are unordered");
                    }
                    None => {}
                }
            }
            _ => {}
        }
        let class = recv.class_id();
        let class_name = self.class_name(class);
        if self.registry.borrow().has_selector(class, name) {
            ExcType::ResolutionError.raise(format!(
                "wrong number of arguments for {class_name}.{name} ({} given)",
                args.len()
            ))
        } else {
            ExcType::ResolutionError.raise(format!("{class_name} has no member '{name}'"))
        }
    }

    // ---- host boundary & cancellation -----------------------------

    /// Consumes the next memoised host-boundary outcome, if the replay
    /// has not caught up with live execution yet.
    fn replay_outcome(&mut self) -> Option<RunResult<Value>> {
        if self.ext.cursor < self.ext.results.len() {
            let outcome = self.ext.results[self.ext.cursor].clone();
            self.ext.cursor += 1;
            Some(match outcome {
                ExtOutcome::Value(value) => Ok(value),
                ExtOutcome::Raise(kind, message) => Err(kind.error(message)),
            })
        } else {
            None
        }
    }

    /// A host-function call site. Every host-boundary outcome is
    /// memoised so that a later suspension replays it instead of
    /// re-invoking the host: host-visible effects happen exactly once.
    pub fn host_call(
        &mut self,
        host: &crate::value::HostFn,
        args: &Arguments,
    ) -> RunResult<Value> {
        if let Some(outcome) = self.replay_outcome() {
            return outcome;
        }
        let result = (host.body)(self, args);
        match &result {
            Ok(value) => {
                self.ext.results.push(ExtOutcome::Value(value.clone()));
                self.ext.cursor += 1;
            }
            Err(RunError::Exc(raise)) => {
                if let Some(kind) = ExcType::from_class_id(raise.exc.class) {
                    self.ext
                        .results
                        .push(ExtOutcome::Raise(kind, raise.exc.message.to_string()));
                    self.ext.cursor += 1;
                }
            }
            Err(_) => {}
        }
        result
    }

    /// An external call site: consumes the next memoised result during
    /// replay, otherwise suspends.
    pub fn external_call(&mut self, name: &Rc<str>, args: &Arguments, pos: Pos) -> RunResult<Value> {
        if let Some(outcome) = self.replay_outcome() {
            self.tracer.event(&TraceEvent::Resume { name });
            return outcome;
        }
        if self.ext.cancel {
            return ExcType::Cancelled.raise("execution cancelled by the host");
        }
        self.tracer.event(&TraceEvent::Suspend { name, pos });
        Err(RunError::Suspend(Box::new(PendingCall {
            name: Rc::clone(name),
            args: args.as_slice().to_vec(),
            pos,
        })))
    }

    // ---- instantiation --------------------------------------------

    pub fn instantiate(&mut self, class_id: ClassId, args: &Arguments, pos: Pos) -> RunResult<Value> {
        let (is_enum, is_exception, name) = {
            let registry = self.registry.borrow();
            let def = registry.get(class_id);
            (
                !def.enum_constants.is_empty(),
                registry.is_exception_class(class_id),
                Rc::clone(&def.name),
            )
        };
        if is_enum {
            return ExcType::CastError.raise(format!("enum {name} cannot be instantiated"));
        }
        if is_exception {
            return self.instantiate_exception(class_id, &name, args);
        }
        if class_id.0 < classes::BUILTIN_COUNT {
            return self.instantiate_builtin(class_id, &name, args);
        }

        // The chain is applied root-first so parent fields initialise
        // before subclass thunks that may read them through `this`.
        let mut chain = Vec::new();
        let total_fields = {
            let registry = self.registry.borrow();
            let mut current = Some(class_id);
            while let Some(id) = current {
                chain.push(id);
                current = registry.get(id).parent;
            }
            registry.get(class_id).fields.len()
        };
        chain.reverse();

        let leaf_ctor_params = self.registry.borrow().get(class_id).ctor_params;
        if args.len() > leaf_ctor_params {
            return ExcType::ResolutionError.raise(format!(
                "{name}() takes at most {leaf_ctor_params} arguments ({} given)",
                args.len()
            ));
        }

        let instance = Rc::new(InstanceValue {
            class: class_id,
            fields: RefCell::new(vec![Value::Void; total_fields]),
        });
        let this = Value::Instance(Rc::clone(&instance));

        for id in chain {
            let (own_start, own_fields, ctor_params, decl_scope) = {
                let registry = self.registry.borrow();
                let def = registry.get(id);
                let own_start = def
                    .parent
                    .map_or(0, |parent| registry.get(parent).fields.len());
                let own_fields: Vec<FieldDef> = def.fields[own_start..].to_vec();
                (own_start, own_fields, def.ctor_params, def.decl_scope.clone())
            };
            let Some(decl_scope) = decl_scope else {
                continue;
            };
            let frame = scope::borrow_frame(
                Some(decl_scope),
                Arguments::empty(),
                this.clone(),
                pos,
                self.flags.scope_pool,
            );
            let mut failed = None;
            for (i, field) in own_fields.iter().enumerate() {
                let value = if id == class_id && i < ctor_params {
                    match args.get(i) {
                        Some(value) => Ok(value.clone()),
                        None => match &field.default {
                            Some(thunk) => self.eval(thunk, &frame),
                            None => ExcType::ResolutionError.raise(format!(
                                "{name}() missing argument '{}'",
                                field.name
                            )),
                        },
                    }
                } else {
                    match &field.default {
                        Some(thunk) => self.eval(thunk, &frame),
                        None => ExcType::IllegalArgument.raise(format!(
                            "parent class of {name} requires constructor argument '{}'",
                            field.name
                        )),
                    }
                };
                match value {
                    Ok(value) => instance.fields.borrow_mut()[own_start + i] = value,
                    Err(err) => {
                        failed = Some(err);
                        break;
                    }
                }
            }
            scope::release_frame(frame, self.flags.scope_pool);
            if let Some(err) = failed {
                return Err(err);
            }
        }
        Ok(this)
    }

    /// `List()`, `Map()` and `Set()` are the constructible built-ins;
    /// `List` and `Set` also accept a single iterable.
    fn instantiate_builtin(
        &mut self,
        class_id: ClassId,
        name: &Rc<str>,
        args: &Arguments,
    ) -> RunResult<Value> {
        match class_id {
            classes::LIST => match args.as_slice() {
                [] => Ok(Value::list(Vec::new())),
                [source] => Ok(Value::list(self.collect_iterable(source)?)),
                _ => ExcType::ResolutionError.raise("List() takes at most one argument"),
            },
            classes::MAP => {
                args.check_empty("Map")?;
                Ok(Value::Map(Rc::new(RefCell::new(MapData::default()))))
            }
            classes::SET => {
                let mut set = SetData::default();
                if let Some(source) = args.at_most_one("Set")? {
                    for item in self.collect_iterable(source)? {
                        let key = self.map_key(&item)?;
                        set.insert(key, item);
                    }
                }
                Ok(Value::Set(Rc::new(RefCell::new(set))))
            }
            _ => ExcType::CastError.raise(format!("{name} cannot be constructed directly")),
        }
    }

    /// Drains an iterable into a vector, driving the dynamic
    /// `hasNext`/`next` protocol for user iterators.
    pub fn collect_iterable(&mut self, value: &Value) -> RunResult<Vec<Value>> {
        let iterator = self.iterator_for(value)?;
        let mut out = Vec::new();
        match iterator {
            Value::Iterator(iter) => loop {
                let next = iter.borrow_mut().next();
                match next {
                    Some(item) => out.push(item),
                    None => return Ok(out),
                }
            },
            custom => loop {
                let has_next = self.dispatch(&custom, "hasNext", Arguments::empty())?;
                if !self.expect_bool(&has_next, "hasNext()")? {
                    return Ok(out);
                }
                out.push(self.dispatch(&custom, "next", Arguments::empty())?);
            },
        }
    }

    fn instantiate_exception(
        &mut self,
        class_id: ClassId,
        name: &Rc<str>,
        args: &Arguments,
    ) -> RunResult<Value> {
        if args.len() > 2 {
            return ExcType::ResolutionError.raise(format!(
                "{name}() takes at most 2 arguments ({} given)",
                args.len()
            ));
        }
        let message = match args.get(0) {
            Some(value) => self.display_value(value)?,
            None => name.to_string(),
        };
        let cause = match args.get(1) {
            Some(value @ Value::Exception(_)) => Some(value.clone()),
            Some(_) => {
                return ExcType::CastError.raise("exception cause must be an Exception");
            }
            None => None,
        };
        Ok(Value::Exception(Rc::new(ExceptionValue::new(
            class_id, message, cause,
        ))))
    }

    // ---- equality, ordering, rendering ----------------------------

    /// Equality with user `equals` overrides honoured on instances;
    /// everything else uses the structural/identity rules.
    pub fn values_equal(&mut self, lhs: &Value, rhs: &Value) -> RunResult<bool> {
        if let Value::Instance(inst) = lhs {
            let user_equals = {
                let registry = self.registry.borrow();
                registry
                    .lookup_method(inst.class, "equals", 1)
                    .map(|(def_class, idx)| registry.get(def_class).method(idx).callable.clone())
            };
            if let Some(callable) = user_equals {
                let result =
                    self.call_callable(&callable, lhs, Arguments::one(rhs.clone()), Pos::START)?;
                return result.as_bool().map_or_else(
                    || ExcType::CastError.raise("equals must return Bool"),
                    Ok,
                );
            }
        }
        Ok(lhs.sl_eq(rhs))
    }

    /// Ordering comparison; `Ok(None)` is the unordered (NaN) case.
    pub fn compare_values(
        &mut self,
        lhs: &Value,
        rhs: &Value,
        op: &str,
    ) -> RunResult<Option<Ordering>> {
        if let Some(ordering) = lhs.sl_cmp(rhs) {
            return Ok(ordering);
        }
        if let Value::Instance(_) = lhs {
            let result = self.dispatch(lhs, "compareTo", Arguments::one(rhs.clone()))?;
            return match result {
                Value::Int(i) => Ok(Some(i.cmp(&0))),
                _ => ExcType::CastError.raise("compareTo must return Int"),
            };
        }
        ExcType::CastError.raise(format!(
            "cannot compare {} and {} with '{op}'",
            self.class_name(lhs.class_id()),
            self.class_name(rhs.class_id()),
        ))
    }

    /// `toString` protocol: scalars render directly, containers
    /// recurse, instances may override `toString`.
    pub fn display_value(&mut self, value: &Value) -> RunResult<String> {
        self.render(value, false, 0)
    }

    /// `inspect` protocol: like display, but strings and chars are
    /// quoted so container contents stay unambiguous.
    pub fn inspect_value(&mut self, value: &Value) -> RunResult<String> {
        self.render(value, true, 0)
    }

    fn render(&mut self, value: &Value, inspect: bool, depth: usize) -> RunResult<String> {
        if depth > DISPLAY_DEPTH_LIMIT {
            return Ok("...".to_owned());
        }
        match value {
            Value::Str(s) if inspect => Ok(quote_str(s)),
            Value::Char(c) if inspect => Ok(format!("'{c}'")),
            Value::List(list) => {
                let items = list.borrow().clone();
                let mut out = String::from("[");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&self.render(item, true, depth + 1)?);
                }
                out.push(']');
                Ok(out)
            }
            Value::Map(map) => {
                let pairs: Vec<(Value, Value)> = map.borrow().values().cloned().collect();
                let mut out = String::from("{");
                for (i, (key, mapped)) in pairs.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&self.render(key, true, depth + 1)?);
                    out.push_str(": ");
                    out.push_str(&self.render(mapped, true, depth + 1)?);
                }
                out.push('}');
                Ok(out)
            }
            Value::Set(set) => {
                let items: Vec<Value> = set.borrow().values().cloned().collect();
                let mut out = String::from("Set(");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&self.render(item, true, depth + 1)?);
                }
                out.push(')');
                Ok(out)
            }
            Value::Range(range) => {
                let start = self.render(&range.start, inspect, depth + 1)?;
                let end = self.render(&range.end, inspect, depth + 1)?;
                let op = if range.inclusive { ".." } else { "..<" };
                if matches!(range.step, Value::Int(1)) {
                    Ok(format!("{start}{op}{end}"))
                } else {
                    let step = self.render(&range.step, inspect, depth + 1)?;
                    Ok(format!("{start}{op}{end} step {step}"))
                }
            }
            Value::Regex(regex) => Ok(format!("/{}/{}", regex.pattern, regex.flags)),
            Value::Function(function) => Ok(match function.as_ref() {
                FunctionValue::User(f) => format!("fun {}", f.name),
                FunctionValue::Bound { name, .. } => format!("fun {name}"),
                FunctionValue::Host(host) => format!("fun {}", host.name),
                FunctionValue::External { name, .. } => format!("fun {name}"),
            }),
            Value::Class(id) => Ok(self.class_name(*id).to_string()),
            Value::Iterator(_) => Ok("<iterator>".to_owned()),
            Value::Exception(exc) => Ok(format!(
                "{}: {}",
                self.class_name(exc.class),
                exc.message
            )),
            Value::Instance(inst) => {
                // Enum constants render as their bare name.
                let enum_name = {
                    let registry = self.registry.borrow();
                    if registry.get(inst.class).enum_constants.is_empty() {
                        None
                    } else {
                        match inst.fields.borrow().first() {
                            Some(Value::Str(name)) => Some(name.to_string()),
                            _ => None,
                        }
                    }
                };
                if let Some(name) = enum_name {
                    return Ok(name);
                }
                let user_to_string = {
                    let registry = self.registry.borrow();
                    registry
                        .lookup_method(inst.class, "toString", 0)
                        .map(|(def_class, idx)| {
                            registry.get(def_class).method(idx).callable.clone()
                        })
                };
                if let Some(callable) = user_to_string {
                    let rendered =
                        self.call_callable(&callable, value, Arguments::empty(), Pos::START)?;
                    return match rendered {
                        Value::Str(s) => Ok(s.to_string()),
                        _ => ExcType::CastError.raise("toString must return String"),
                    };
                }
                let (class_name, field_names) = {
                    let registry = self.registry.borrow();
                    let def = registry.get(inst.class);
                    let names: Vec<Rc<str>> =
                        def.fields.iter().map(|f| Rc::clone(&f.name)).collect();
                    (Rc::clone(&def.name), names)
                };
                let fields = inst.fields.borrow().clone();
                let mut out = format!("{class_name}(");
                for (i, (field_name, field_value)) in
                    field_names.iter().zip(fields.iter()).enumerate()
                {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(field_name);
                    out.push_str(": ");
                    out.push_str(&self.render(field_value, true, depth + 1)?);
                }
                out.push(')');
                Ok(out)
            }
            scalar => Ok(scalar
                .scalar_display()
                .expect("non-scalar variants handled above")),
        }
    }

    // ---- member & index protocols ---------------------------------

    /// Member read: instance fields first (through the field PIC), then
    /// built-in views (exception payloads, enum constants), then a
    /// bound method, then `ResolutionError`.
    pub fn get_member(
        &mut self,
        recv: &Value,
        name: &Rc<str>,
        ic: Option<&Cell<FieldIc>>,
    ) -> RunResult<Value> {
        match recv {
            Value::Null => {
                ExcType::NullAccess.raise(format!("member '{name}' accessed on null"))
            }
            Value::Instance(inst) => {
                let class = inst.class;
                let version = self.class_version(class);
                if self.flags.field_pic
                    && let Some(cell) = ic
                {
                    let mut cache = cell.get();
                    if let Some(slot) = cache.lookup(class, version) {
                        cell.set(cache);
                        return Ok(inst.fields.borrow()[slot as usize].clone());
                    }
                }
                let field = self.registry.borrow().get(class).field_index(name);
                if let Some(slot) = field {
                    if self.flags.field_pic
                        && let Some(cell) = ic
                    {
                        let mut cache = cell.get();
                        cache.insert(class, version, slot as u32, self.flags.pic_capacity());
                        cell.set(cache);
                    }
                    return Ok(inst.fields.borrow()[slot].clone());
                }
                self.member_fallback(recv, name)
            }
            Value::Exception(exc) => match &**name {
                "message" => Ok(Value::Str(Rc::clone(&exc.message))),
                "cause" => Ok(exc.cause.clone().unwrap_or(Value::Null)),
                "stackTrace" => {
                    let frames = exc
                        .stack
                        .borrow()
                        .iter()
                        .map(|frame| Value::str(format!("{} at {}", frame.function, frame.pos)))
                        .collect();
                    Ok(Value::list(frames))
                }
                _ => self.member_fallback(recv, name),
            },
            Value::Class(id) => {
                let constant = self.registry.borrow().get(*id).enum_constant(name).cloned();
                if let Some(constant) = constant {
                    return Ok(constant);
                }
                if &**name == "name" {
                    return Ok(Value::Str(self.class_name(*id)));
                }
                self.member_fallback(recv, name)
            }
            other => self.member_fallback(other, name),
        }
    }

    fn member_fallback(&mut self, recv: &Value, name: &Rc<str>) -> RunResult<Value> {
        let class = recv.class_id();
        if self.registry.borrow().has_selector(class, name) {
            return Ok(Value::Function(Rc::new(FunctionValue::Bound {
                recv: recv.clone(),
                name: Rc::clone(name),
            })));
        }
        ExcType::ResolutionError.raise(format!(
            "{} has no member '{name}'",
            self.class_name(class)
        ))
    }

    /// Member write; only instance fields are assignable.
    pub fn set_member(
        &mut self,
        recv: &Value,
        name: &Rc<str>,
        value: Value,
        ic: Option<&Cell<FieldIc>>,
    ) -> RunResult<()> {
        match recv {
            Value::Null => {
                ExcType::NullAccess.raise(format!("member '{name}' assigned on null"))
            }
            Value::Instance(inst) => {
                let class = inst.class;
                let version = self.class_version(class);
                let resolved = {
                    let registry = self.registry.borrow();
                    let def = registry.get(class);
                    def.field_index(name)
                        .map(|slot| (slot, def.fields[slot].mutable))
                };
                match resolved {
                    Some((_, false)) => ExcType::ResolutionError.raise(format!(
                        "cannot reassign val field '{name}' of {}",
                        self.class_name(class)
                    )),
                    Some((slot, true)) => {
                        if self.flags.field_pic
                            && let Some(cell) = ic
                        {
                            let mut cache = cell.get();
                            if cache.lookup(class, version).is_none() {
                                cache.insert(class, version, slot as u32, self.flags.pic_capacity());
                            }
                            cell.set(cache);
                        }
                        inst.fields.borrow_mut()[slot] = value;
                        Ok(())
                    }
                    None => ExcType::ResolutionError.raise(format!(
                        "{} has no field '{name}'",
                        self.class_name(class)
                    )),
                }
            }
            other => ExcType::CastError.raise(format!(
                "cannot assign members on {}",
                self.class_name(other.class_id())
            )),
        }
    }

    /// Index read with the `get` selector as the generic fallback.
    pub fn index_get(
        &mut self,
        recv: &Value,
        index: &Value,
        ic: Option<&Cell<IndexIc>>,
    ) -> RunResult<Value> {
        self.observe_index(recv, ic);
        match recv {
            Value::Null => ExcType::NullAccess.raise("indexed access on null"),
            Value::List(list) => {
                let list = list.borrow();
                let idx = Self::list_index(index, list.len())?;
                Ok(list[idx].clone())
            }
            Value::Str(s) => {
                let count = s.chars().count();
                let idx = Self::list_index(index, count)?;
                Ok(Value::Char(s.chars().nth(idx).expect("index checked")))
            }
            Value::Map(map) => {
                let key = self.map_key(index)?;
                let entry = map.borrow().get(&key).map(|(_, v)| v.clone());
                match entry {
                    Some(value) => Ok(value),
                    None => {
                        let rendered = self.inspect_value(index)?;
                        ExcType::KeyError.raise(format!("key {rendered} not found"))
                    }
                }
            }
            other => {
                let class = other.class_id();
                if self.registry.borrow().has_selector(class, "get") {
                    self.dispatch(other, "get", Arguments::one(index.clone()))
                } else {
                    ExcType::CastError
                        .raise(format!("{} is not indexable", self.class_name(class)))
                }
            }
        }
    }

    /// Index write with the `set` selector as the generic fallback.
    pub fn index_set(
        &mut self,
        recv: &Value,
        index: &Value,
        value: Value,
        ic: Option<&Cell<IndexIc>>,
    ) -> RunResult<()> {
        self.observe_index(recv, ic);
        match recv {
            Value::Null => ExcType::NullAccess.raise("indexed assignment on null"),
            Value::List(list) => {
                let mut list = list.borrow_mut();
                let len = list.len();
                let idx = Self::list_index(index, len)?;
                list[idx] = value;
                Ok(())
            }
            Value::Map(map) => {
                let key = self.map_key(index)?;
                map.borrow_mut().insert(key, (index.clone(), value));
                Ok(())
            }
            other => {
                let class = other.class_id();
                if self.registry.borrow().has_selector(class, "set") {
                    self.dispatch(other, "set", Arguments::of(vec![index.clone(), value]))?;
                    Ok(())
                } else {
                    ExcType::CastError.raise(format!(
                        "{} does not support index assignment",
                        self.class_name(class)
                    ))
                }
            }
        }
    }

    fn observe_index(&self, recv: &Value, ic: Option<&Cell<IndexIc>>) {
        if !self.flags.field_pic {
            return;
        }
        if let Some(cell) = ic {
            let shape = match recv {
                Value::List(_) => IndexIc::List,
                Value::Map(_) => IndexIc::Map,
                Value::Str(_) => IndexIc::Str,
                _ => IndexIc::Mega,
            };
            cell.set(cell.get().observe(shape));
        }
    }

    /// Resolves a (possibly negative) index against a length.
    pub fn list_index(index: &Value, len: usize) -> RunResult<usize> {
        let Value::Int(raw) = index else {
            return ExcType::CastError.raise("index must be Int");
        };
        let resolved = if *raw < 0 {
            // Negative indices count from the end.
            *raw + len as i64
        } else {
            *raw
        };
        if resolved < 0 || resolved as usize >= len {
            return ExcType::IndexError.raise(format!(
                "index {raw} out of range (size {len})"
            ));
        }
        Ok(resolved as usize)
    }

    /// Hashable key or `CastError`.
    pub fn map_key(&mut self, value: &Value) -> RunResult<MapKey> {
        match value.hash_key() {
            Some(key) => Ok(key),
            None => ExcType::CastError.raise(format!(
                "{} is not usable as a key",
                self.class_name(value.class_id())
            )),
        }
    }

    /// `Bool` condition or `CastError`.
    pub fn expect_bool(&mut self, value: &Value, what: &str) -> RunResult<bool> {
        value.as_bool().map_or_else(
            || {
                ExcType::CastError.raise(format!(
                    "{what} must be Bool, got {}",
                    self.class_name(value.class_id())
                ))
            },
            Ok,
        )
    }

    // ---- ranges & regexes -----------------------------------------

    pub fn make_range(&mut self, start: Value, end: Value, inclusive: bool) -> RunResult<Value> {
        if !matches!(start, Value::Int(_) | Value::Real(_))
            || !matches!(end, Value::Int(_) | Value::Real(_))
        {
            return ExcType::CastError.raise("range bounds must be Int or Real");
        }
        Ok(Value::Range(Rc::new(RangeValue {
            start,
            end,
            inclusive,
            step: Value::Int(1),
        })))
    }

    /// Compiles (or re-uses) a regex. The cache is keyed by
    /// `(pattern, flags)` and bounded; disabling it only costs time.
    pub fn make_regex(&mut self, pattern: &Rc<str>, flags: &Rc<str>) -> RunResult<Value> {
        if self.flags.regex_cache {
            let cached = self
                .regex_cache
                .borrow()
                .get(&(Rc::clone(pattern), Rc::clone(flags)))
                .cloned();
            if let Some(regex) = cached {
                return Ok(Value::Regex(regex));
            }
        }
        let mut builder = regex::RegexBuilder::new(pattern);
        for flag in flags.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                'U' => builder.swap_greed(true),
                other => {
                    return ExcType::IllegalArgument.raise(format!("unknown regex flag '{other}'"));
                }
            };
        }
        let compiled = builder
            .build()
            .map_err(|err| ExcType::IllegalArgument.error(format!("invalid regex: {err}")))?;
        let regex = Rc::new(RegexValue {
            pattern: Rc::clone(pattern),
            flags: Rc::clone(flags),
            re: compiled,
        });
        if self.flags.regex_cache {
            let mut cache = self.regex_cache.borrow_mut();
            if cache.len() < REGEX_CACHE_LIMIT {
                cache.insert((Rc::clone(pattern), Rc::clone(flags)), Rc::clone(&regex));
            }
        }
        Ok(Value::Regex(regex))
    }

    /// Obtains an iterator for a `for` loop or collection constructor:
    /// built-ins get the internal iterator, instances go through the
    /// `iterator` selector.
    pub fn iterator_for(&mut self, value: &Value) -> RunResult<Value> {
        if let Value::Iterator(_) = value {
            return Ok(value.clone());
        }
        if let Some(iter) = crate::builtins::iter::make_iter(value) {
            return Ok(iter);
        }
        let class = value.class_id();
        if self.registry.borrow().has_selector(class, "iterator") {
            return self.dispatch(value, "iterator", Arguments::empty());
        }
        ExcType::CastError.raise(format!("{} is not iterable", self.class_name(class)))
    }
}
