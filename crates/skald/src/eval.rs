//! Tree-walking evaluation of AST nodes.
//!
//! Control flow signals (`break`/`continue`/`return`) travel in the
//! error channel and are consumed by the matching construct; anything
//! that reaches a function boundary unconsumed is an error. Suspension
//! (`RunError::Suspend`) passes through every construct untouched —
//! including `finally` blocks, because a suspended execution is
//! replayed, not exited.

use std::cell::Cell;
use std::rc::Rc;

use crate::args::ArgsBuilder;
use crate::ast::{AssignTarget, FnDef, LogicOp, Node, NodeKind, TplPart, UnOp};
use crate::class::{Arity, Callable, ClassDef, FieldDef, MethodDef, UserFn, Param};
use crate::exception::{ExcType, ExceptionRaise, RunError, RunResult, Signal};
use crate::ic::SlotIc;
use crate::interp::Interp;
use crate::ops;
use crate::scope::{self, Scope};
use crate::tracer::TraceEvent;
use crate::value::{FunctionValue, InstanceValue, MapData, Value};

/// Loop body outcome after signal handling.
enum LoopFlow {
    Normal,
    Exit,
}

fn label_matches(signal: &Option<Rc<str>>, own: Option<&Rc<str>>) -> bool {
    match signal {
        // An unlabelled signal stops at the innermost loop.
        None => true,
        Some(wanted) => own.is_some_and(|label| label == wanted),
    }
}

impl Interp<'_> {
    pub(crate) fn eval(&mut self, node: &Node, scope: &Scope) -> RunResult<Value> {
        match &node.kind {
            NodeKind::Literal(value) => Ok(value.clone()),
            NodeKind::StrTemplate(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TplPart::Text(text) => out.push_str(text),
                        TplPart::Expr(expr) => {
                            let value = self.eval(expr, scope)?;
                            out.push_str(&self.display_value(&value)?);
                        }
                    }
                }
                Ok(Value::str(out))
            }
            NodeKind::RegexLit { pattern, flags } => self.make_regex(pattern, flags),
            NodeKind::ListLit(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, scope)?);
                }
                Ok(Value::list(values))
            }
            NodeKind::MapLit(pairs) => {
                let mut map = MapData::default();
                for (key_node, value_node) in pairs {
                    let key = self.eval(key_node, scope)?;
                    let value = self.eval(value_node, scope)?;
                    let hashed = self.map_key(&key)?;
                    map.insert(hashed, (key, value));
                }
                Ok(Value::Map(Rc::new(std::cell::RefCell::new(map))))
            }
            NodeKind::RangeLit {
                start,
                end,
                inclusive,
            } => {
                let start = self.eval(start, scope)?;
                let end = self.eval(end, scope)?;
                self.make_range(start, end, *inclusive)
            }
            NodeKind::Lambda(def) => Ok(self.close_over(def, scope)),
            NodeKind::Ident { name, ic } => match self.resolve_slot(name, ic, scope) {
                Some((depth, slot)) => scope
                    .get_at(depth, slot)
                    .ok_or_else(|| RunError::internal("resolved slot vanished")),
                None => ExcType::ResolutionError.raise(format!("unknown name '{name}'")),
            },
            NodeKind::This => Ok(scope.this()),
            NodeKind::Assign { target, op, value } => self.eval_assign(target, *op, value, scope),
            NodeKind::Unary { op, expr } => {
                let operand = self.eval(expr, scope)?;
                match op {
                    UnOp::Neg => match ops::numeric_neg(&operand) {
                        Some(result) => result,
                        None => ExcType::CastError.raise(format!(
                            "cannot negate {}",
                            self.class_name(operand.class_id())
                        )),
                    },
                    UnOp::Not => {
                        let b = self.expect_bool(&operand, "operand of '!'")?;
                        Ok(Value::Bool(!b))
                    }
                }
            }
            NodeKind::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs, scope)?;
                let rhs = self.eval(rhs, scope)?;
                self.binary(*op, &lhs, &rhs)
            }
            NodeKind::Logic { op, lhs, rhs } => {
                let left = self.eval(lhs, scope)?;
                let left = self.expect_bool(&left, "logical operand")?;
                match (op, left) {
                    (LogicOp::And, false) => Ok(Value::Bool(false)),
                    (LogicOp::Or, true) => Ok(Value::Bool(true)),
                    _ => {
                        let right = self.eval(rhs, scope)?;
                        let right = self.expect_bool(&right, "logical operand")?;
                        Ok(Value::Bool(right))
                    }
                }
            }
            NodeKind::Elvis { lhs, rhs } => {
                let left = self.eval(lhs, scope)?;
                if left.is_null() {
                    self.eval(rhs, scope)
                } else {
                    Ok(left)
                }
            }
            NodeKind::Member {
                recv,
                name,
                safe,
                ic,
            } => {
                let recv = self.eval(recv, scope)?;
                if *safe && recv.is_null() {
                    return Ok(Value::Null);
                }
                self.get_member(&recv, name, Some(ic))
            }
            NodeKind::Index { recv, index, ic } => {
                let recv = self.eval(recv, scope)?;
                let index = self.eval(index, scope)?;
                self.index_get(&recv, &index, Some(ic))
            }
            NodeKind::Call {
                callee,
                args,
                tail_block,
            } => {
                let callee = self.eval(callee, scope)?;
                let args = self.eval_args(args, *tail_block, scope)?;
                self.call_value(&callee, args, node.pos)
            }
            NodeKind::MethodCall {
                recv,
                name,
                args,
                tail_block,
                safe,
                ic,
            } => {
                let recv = self.eval(recv, scope)?;
                if recv.is_null() {
                    if *safe {
                        return Ok(Value::Null);
                    }
                    return ExcType::NullAccess.raise(format!("method '{name}' called on null"));
                }
                let args = self.eval_args(args, *tail_block, scope)?;

                let class = recv.class_id();
                let version = self.class_version(class);
                if self.flags.method_pic {
                    let mut cache = ic.get();
                    let hit = cache.lookup(class, version);
                    ic.set(cache);
                    if let Some((def_class, idx)) = hit {
                        let callable = self
                            .registry
                            .borrow()
                            .get(def_class)
                            .method(idx)
                            .callable
                            .clone();
                        return self.call_callable(&callable, &recv, args, node.pos);
                    }
                }
                let resolved = {
                    let registry = self.registry.borrow();
                    registry
                        .lookup_method(class, name, args.len())
                        .map(|(def_class, idx)| {
                            (def_class, idx, registry.get(def_class).method(idx).callable.clone())
                        })
                };
                match resolved {
                    Some((def_class, idx, callable)) => {
                        if self.flags.method_pic {
                            let mut cache = ic.get();
                            cache.insert(class, version, def_class, idx, self.flags.pic_capacity());
                            ic.set(cache);
                        }
                        self.call_callable(&callable, &recv, args, node.pos)
                    }
                    None => {
                        // An instance field holding a callable is
                        // invocable through method syntax.
                        if let Value::Instance(inst) = &recv {
                            let field = self.registry.borrow().get(class).field_index(name);
                            if let Some(slot) = field {
                                let callee = inst.fields.borrow()[slot].clone();
                                return self.call_value(&callee, args, node.pos);
                            }
                        }
                        self.method_fallback(&recv, name, &args)
                    }
                }
            }
            NodeKind::Block { body, scoped } => {
                if *scoped {
                    let frame = scope::borrow_frame(
                        Some(scope.clone()),
                        scope.args(),
                        scope.this(),
                        node.pos,
                        self.flags.scope_pool,
                    );
                    let result = self.eval_block_body(body, &frame);
                    scope::release_frame(frame, self.flags.scope_pool);
                    result
                } else {
                    self.eval_block_body(body, scope)
                }
            }
            NodeKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.eval(cond, scope)?;
                if self.expect_bool(&cond, "'if' condition")? {
                    self.eval(then_branch, scope)
                } else if let Some(else_branch) = else_branch {
                    self.eval(else_branch, scope)
                } else {
                    Ok(Value::Void)
                }
            }
            NodeKind::While { label, cond, body } => {
                loop {
                    let value = self.eval(cond, scope)?;
                    if !self.expect_bool(&value, "'while' condition")? {
                        break;
                    }
                    match self.run_loop_body(body, scope, label.as_ref())? {
                        LoopFlow::Normal => {}
                        LoopFlow::Exit => break,
                    }
                }
                Ok(Value::Void)
            }
            NodeKind::DoWhile { label, body, cond } => {
                loop {
                    match self.run_loop_body(body, scope, label.as_ref())? {
                        LoopFlow::Normal => {}
                        LoopFlow::Exit => break,
                    }
                    let value = self.eval(cond, scope)?;
                    if !self.expect_bool(&value, "'do' condition")? {
                        break;
                    }
                }
                Ok(Value::Void)
            }
            NodeKind::For {
                label,
                var,
                iterable,
                body,
            } => self.eval_for(label.as_ref(), var, iterable, body, scope),
            NodeKind::Break { label } => Err(RunError::Signal(Signal::Break {
                label: label.clone(),
            })),
            NodeKind::Continue { label } => Err(RunError::Signal(Signal::Continue {
                label: label.clone(),
            })),
            NodeKind::Return { value } => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Void,
                };
                Err(RunError::Signal(Signal::Return(value)))
            }
            NodeKind::Throw { value } => {
                let value = self.eval(value, scope)?;
                match value {
                    Value::Exception(exc) => {
                        // A rethrown exception captures a fresh stack.
                        exc.stack.borrow_mut().clear();
                        let kind = self.class_name(exc.class);
                        self.tracer.event(&TraceEvent::Raise {
                            kind: &kind,
                            message: &exc.message,
                            pos: node.pos,
                        });
                        Err(RunError::Exc(Box::new(ExceptionRaise::new(exc))))
                    }
                    other => ExcType::CastError.raise(format!(
                        "only Exception values can be thrown, got {}",
                        self.class_name(other.class_id())
                    )),
                }
            }
            NodeKind::Try {
                body,
                catches,
                finally,
            } => {
                let outcome = match self.eval(body, scope) {
                    Err(RunError::Exc(raise)) => self.run_catches(raise, catches, scope),
                    other => other,
                };
                // A suspension is not an exit; the execution replays.
                if matches!(outcome, Err(RunError::Suspend(_))) {
                    return outcome;
                }
                if let Some(finally) = finally {
                    // `finally` runs on every exit path; if it raises
                    // (or signals), that outcome replaces the prior one.
                    self.eval(finally, scope)?;
                }
                outcome
            }
            NodeKind::Decl {
                name,
                mutable,
                init,
            } => {
                let value = self.eval(init, scope)?;
                scope.declare(name, value, *mutable);
                Ok(Value::Void)
            }
            NodeKind::FunDecl(def) => {
                let function = self.close_over(def, scope);
                scope.declare(&def.name, function, false);
                Ok(Value::Void)
            }
            NodeKind::ExtMethodDecl { type_name, def } => {
                self.eval_ext_method(type_name, def, scope)
            }
            NodeKind::ClassDecl(def) => self.eval_class_decl(def, scope),
            NodeKind::EnumDecl {
                name,
                constants,
                methods,
                doc,
            } => self.eval_enum_decl(name, constants, methods, doc.clone(), scope),
            NodeKind::Import { path } => {
                let Some(provider) = self.module_provider.clone() else {
                    return ExcType::ResolutionError
                        .raise(format!("cannot import '{path}': no module provider installed"));
                };
                match provider(path) {
                    Some(bindings) => {
                        for (binding_name, object) in bindings {
                            let value = crate::object::value_from_object(&object);
                            scope.declare(&Rc::from(binding_name.as_str()), value, false);
                        }
                        Ok(Value::Void)
                    }
                    None => ExcType::ResolutionError
                        .raise(format!("module '{path}' is not available")),
                }
            }
        }
    }

    /// Statement sequence: tracks the current position on the frame
    /// and yields the value of the last statement.
    fn eval_block_body(&mut self, body: &[Node], scope: &Scope) -> RunResult<Value> {
        let mut result = Value::Void;
        for statement in body {
            scope.set_pos(statement.pos);
            result = self.eval(statement, scope)?;
        }
        Ok(result)
    }

    fn close_over(&self, def: &Rc<FnDef>, scope: &Scope) -> Value {
        Value::Function(Rc::new(FunctionValue::User(Rc::new(UserFn {
            name: Rc::clone(&def.name),
            params: Rc::clone(&def.params),
            body: Rc::clone(&def.body),
            scope: scope.clone(),
            doc: def.doc.clone(),
        }))))
    }

    fn eval_args(
        &mut self,
        args: &[Node],
        tail_block: bool,
        scope: &Scope,
    ) -> RunResult<crate::args::Arguments> {
        let mut builder = ArgsBuilder::acquire(self.flags.arg_builder);
        for arg in args {
            builder.push(self.eval(arg, scope)?);
        }
        if tail_block {
            builder.mark_tail_block();
        }
        Ok(builder.freeze())
    }

    /// Identifier resolution with the local-slot cache. A hit is
    /// verified against the target frame's name table, so structural
    /// drift can never alias a different variable.
    fn resolve_slot(
        &mut self,
        name: &Rc<str>,
        ic: &Cell<SlotIc>,
        scope: &Scope,
    ) -> Option<(u32, u16)> {
        if self.flags.local_slot_pic {
            let cached = ic.get();
            if !cached.is_empty()
                && cached.epoch == scope::shape_epoch()
                && scope
                    .name_at(cached.depth, cached.slot)
                    .is_some_and(|found| &found == name)
            {
                return Some((cached.depth, cached.slot));
            }
        }
        let resolved = scope.lookup(name)?;
        if self.flags.local_slot_pic {
            ic.set(SlotIc {
                epoch: scope::shape_epoch(),
                depth: resolved.0,
                slot: resolved.1,
            });
        }
        Some(resolved)
    }

    fn eval_assign(
        &mut self,
        target: &AssignTarget,
        op: Option<crate::ast::BinOp>,
        value: &Node,
        scope: &Scope,
    ) -> RunResult<Value> {
        match target {
            AssignTarget::Name { name, ic } => {
                let Some((depth, slot)) = self.resolve_slot(name, ic, scope) else {
                    return ExcType::ResolutionError
                        .raise(format!("cannot assign to unknown name '{name}'"));
                };
                let new_value = match op {
                    None => self.eval(value, scope)?,
                    Some(op) => {
                        let current = scope
                            .get_at(depth, slot)
                            .ok_or_else(|| RunError::internal("resolved slot vanished"))?;
                        let rhs = self.eval(value, scope)?;
                        self.binary(op, &current, &rhs)?
                    }
                };
                if !scope.set_at(depth, slot, new_value.clone()) {
                    return ExcType::ResolutionError
                        .raise(format!("cannot reassign immutable binding '{name}'"));
                }
                Ok(new_value)
            }
            AssignTarget::Member { recv, name, ic } => {
                let recv = self.eval(recv, scope)?;
                let new_value = match op {
                    None => self.eval(value, scope)?,
                    Some(op) => {
                        let current = self.get_member(&recv, name, Some(ic))?;
                        let rhs = self.eval(value, scope)?;
                        self.binary(op, &current, &rhs)?
                    }
                };
                self.set_member(&recv, name, new_value.clone(), Some(ic))?;
                Ok(new_value)
            }
            AssignTarget::Index { recv, index, ic } => {
                let recv = self.eval(recv, scope)?;
                let index = self.eval(index, scope)?;
                let new_value = match op {
                    None => self.eval(value, scope)?,
                    Some(op) => {
                        let current = self.index_get(&recv, &index, Some(ic))?;
                        let rhs = self.eval(value, scope)?;
                        self.binary(op, &current, &rhs)?
                    }
                };
                self.index_set(&recv, &index, new_value.clone(), Some(ic))?;
                Ok(new_value)
            }
        }
    }

    fn run_loop_body(
        &mut self,
        body: &Node,
        scope: &Scope,
        label: Option<&Rc<str>>,
    ) -> RunResult<LoopFlow> {
        match self.eval(body, scope) {
            Ok(_) => Ok(LoopFlow::Normal),
            Err(RunError::Signal(Signal::Break { label: wanted }))
                if label_matches(&wanted, label) =>
            {
                Ok(LoopFlow::Exit)
            }
            Err(RunError::Signal(Signal::Continue { label: wanted }))
                if label_matches(&wanted, label) =>
            {
                Ok(LoopFlow::Normal)
            }
            Err(other) => Err(other),
        }
    }

    fn eval_for(
        &mut self,
        label: Option<&Rc<str>>,
        var: &Rc<str>,
        iterable: &Node,
        body: &Node,
        scope: &Scope,
    ) -> RunResult<Value> {
        let pos = iterable.pos;
        let source = self.eval(iterable, scope)?;

        // Integer ranges drive a plain counter when the flag is on.
        if self.flags.range_fast_iter
            && let Value::Range(range) = &source
            && let (Value::Int(start), Value::Int(end), Value::Int(step)) =
                (&range.start, &range.end, &range.step)
        {
            let (start, end, step, inclusive) = (*start, *end, *step, range.inclusive);
            if step == 0 {
                return ExcType::ArithmeticError.raise("range step must not be zero");
            }
            let mut current = start;
            loop {
                let in_bounds = if step > 0 {
                    if inclusive { current <= end } else { current < end }
                } else if inclusive {
                    current >= end
                } else {
                    current > end
                };
                if !in_bounds {
                    break;
                }
                match self.run_iteration(var, Value::Int(current), body, scope, label, pos)? {
                    LoopFlow::Normal => {}
                    LoopFlow::Exit => break,
                }
                let Some(next) = current.checked_add(step) else {
                    break;
                };
                current = next;
            }
            return Ok(Value::Void);
        }

        let iterator = self.iterator_for(&source)?;
        match iterator {
            Value::Iterator(iter) => loop {
                let next = iter.borrow_mut().next();
                let Some(item) = next else {
                    return Ok(Value::Void);
                };
                match self.run_iteration(var, item, body, scope, label, pos)? {
                    LoopFlow::Normal => {}
                    LoopFlow::Exit => return Ok(Value::Void),
                }
            },
            // A user-defined iterator drives the hasNext/next protocol.
            custom => loop {
                let has_next = self.dispatch(&custom, "hasNext", crate::args::Arguments::empty())?;
                if !self.expect_bool(&has_next, "hasNext()")? {
                    return Ok(Value::Void);
                }
                let item = self.dispatch(&custom, "next", crate::args::Arguments::empty())?;
                match self.run_iteration(var, item, body, scope, label, pos)? {
                    LoopFlow::Normal => {}
                    LoopFlow::Exit => return Ok(Value::Void),
                }
            },
        }
    }

    /// One `for` iteration: a fresh frame binding the loop variable.
    fn run_iteration(
        &mut self,
        var: &Rc<str>,
        item: Value,
        body: &Node,
        scope: &Scope,
        label: Option<&Rc<str>>,
        pos: crate::source::Pos,
    ) -> RunResult<LoopFlow> {
        let frame = scope::borrow_frame(
            Some(scope.clone()),
            scope.args(),
            scope.this(),
            pos,
            self.flags.scope_pool,
        );
        frame.declare(var, item, false);
        let flow = self.run_loop_body(body, &frame, label);
        scope::release_frame(frame, self.flags.scope_pool);
        flow
    }

    fn run_catches(
        &mut self,
        raise: Box<ExceptionRaise>,
        catches: &[crate::ast::CatchClause],
        scope: &Scope,
    ) -> RunResult<Value> {
        let exc_class = raise.exc.class;
        for clause in catches {
            let handler = match &clause.class_name {
                None => ExcType::Exception.class_id(),
                Some(name) => {
                    let Some((depth, slot)) = scope.lookup(name) else {
                        return ExcType::ResolutionError
                            .raise(format!("unknown exception class '{name}'"));
                    };
                    match scope.get_at(depth, slot) {
                        Some(Value::Class(id)) => id,
                        _ => {
                            return ExcType::CastError
                                .raise(format!("'{name}' is not a class"));
                        }
                    }
                }
            };
            if self.registry.borrow().is_subclass(exc_class, handler) {
                let frame = scope::borrow_frame(
                    Some(scope.clone()),
                    scope.args(),
                    scope.this(),
                    clause.body.pos,
                    self.flags.scope_pool,
                );
                frame.declare(
                    &clause.binding,
                    Value::Exception(Rc::clone(&raise.exc)),
                    false,
                );
                let result = self.eval(&clause.body, &frame);
                scope::release_frame(frame, self.flags.scope_pool);
                return result;
            }
        }
        Err(RunError::Exc(raise))
    }

    fn eval_ext_method(
        &mut self,
        type_name: &Rc<str>,
        def: &Rc<FnDef>,
        scope: &Scope,
    ) -> RunResult<Value> {
        let Some((depth, slot)) = scope.lookup(type_name) else {
            return ExcType::ResolutionError.raise(format!("unknown class '{type_name}'"));
        };
        let Some(Value::Class(class_id)) = scope.get_at(depth, slot) else {
            return ExcType::CastError.raise(format!("'{type_name}' is not a class"));
        };
        let method = MethodDef {
            name: Rc::clone(&def.name),
            arity: arity_of(&def.params),
            callable: Callable::User(Rc::new(UserFn {
                name: Rc::clone(&def.name),
                params: Rc::clone(&def.params),
                body: Rc::clone(&def.body),
                scope: scope.clone(),
                doc: def.doc.clone(),
            })),
            doc: def.doc.clone(),
        };
        // add_method bumps the class version, which is what invalidates
        // every inline cache that resolved through this class.
        self.registry.borrow_mut().get_mut(class_id).add_method(method);
        Ok(Value::Void)
    }

    fn eval_class_decl(
        &mut self,
        def: &Rc<crate::ast::ClassDeclDef>,
        scope: &Scope,
    ) -> RunResult<Value> {
        let parent = match &def.parent {
            None => None,
            Some(name) => {
                let Some((depth, slot)) = scope.lookup(name) else {
                    return ExcType::ResolutionError.raise(format!("unknown class '{name}'"));
                };
                match scope.get_at(depth, slot) {
                    Some(Value::Class(id)) => Some(id),
                    _ => {
                        return ExcType::CastError.raise(format!("'{name}' is not a class"));
                    }
                }
            }
        };

        let parent_is_exception = parent
            .is_some_and(|id| self.registry.borrow().is_exception_class(id));
        if parent_is_exception && (!def.ctor_params.is_empty() || !def.fields.is_empty()) {
            return ExcType::CastError
                .raise("exception classes carry a message and cause, not fields");
        }

        let mut class = ClassDef::new(Rc::clone(&def.name), parent);
        if let Some(parent_id) = parent {
            class.fields = self.registry.borrow().get(parent_id).fields.clone();
        }
        for param in &def.ctor_params {
            class.push_field(FieldDef {
                name: Rc::clone(&param.name),
                mutable: param.mutable,
                default: param.default.clone(),
            });
        }
        class.ctor_params = def.ctor_params.len();
        for field in &def.fields {
            class.push_field(FieldDef {
                name: Rc::clone(&field.name),
                mutable: field.mutable,
                default: Some(Rc::clone(&field.init)),
            });
        }
        for method in &def.methods {
            class.add_method(MethodDef {
                name: Rc::clone(&method.name),
                arity: arity_of(&method.params),
                callable: Callable::User(Rc::new(UserFn {
                    name: Rc::clone(&method.name),
                    params: Rc::clone(&method.params),
                    body: Rc::clone(&method.body),
                    scope: scope.clone(),
                    doc: method.doc.clone(),
                })),
                doc: method.doc.clone(),
            });
        }
        class.decl_scope = Some(scope.clone());
        class.doc = def.doc.clone();

        let id = self.registry.borrow_mut().define(class);
        scope.declare(&def.name, Value::Class(id), false);
        Ok(Value::Void)
    }

    fn eval_enum_decl(
        &mut self,
        name: &Rc<str>,
        constants: &[Rc<str>],
        methods: &[Rc<FnDef>],
        doc: Option<Rc<str>>,
        scope: &Scope,
    ) -> RunResult<Value> {
        let mut class = ClassDef::new(Rc::clone(name), None);
        class.push_field(FieldDef {
            name: Rc::from("name"),
            mutable: false,
            default: None,
        });
        class.push_field(FieldDef {
            name: Rc::from("ordinal"),
            mutable: false,
            default: None,
        });
        for method in methods {
            class.add_method(MethodDef {
                name: Rc::clone(&method.name),
                arity: arity_of(&method.params),
                callable: Callable::User(Rc::new(UserFn {
                    name: Rc::clone(&method.name),
                    params: Rc::clone(&method.params),
                    body: Rc::clone(&method.body),
                    scope: scope.clone(),
                    doc: method.doc.clone(),
                })),
                doc: method.doc.clone(),
            });
        }
        class.decl_scope = Some(scope.clone());
        class.doc = doc;

        let id = self.registry.borrow_mut().define(class);
        let entries: Vec<(Rc<str>, Value)> = constants
            .iter()
            .enumerate()
            .map(|(ordinal, constant)| {
                let instance = Value::Instance(Rc::new(InstanceValue {
                    class: id,
                    fields: std::cell::RefCell::new(vec![
                        Value::Str(Rc::clone(constant)),
                        Value::Int(ordinal as i64),
                    ]),
                }));
                (Rc::clone(constant), instance)
            })
            .collect();
        self.registry.borrow_mut().get_mut(id).enum_constants = entries;
        scope.declare(name, Value::Class(id), false);
        Ok(Value::Void)
    }
}

/// Arity bucket for a script function: exact when every parameter is
/// required, at-least otherwise.
pub(crate) fn arity_of(params: &[Param]) -> Arity {
    let required = params.iter().take_while(|p| p.default.is_none()).count();
    if required == params.len() {
        Arity::Exact(params.len() as u8)
    } else {
        Arity::AtLeast(required as u8)
    }
}
