//! Class registry: the owner of every class and method table.
//!
//! Classes are referred to by stable [`ClassId`] indices into the
//! registry rather than by pointer. Method bodies close over the class
//! they belong to through the id, which keeps the object graph acyclic
//! under reference counting. Built-in classes occupy fixed low ids so
//! value-to-class mapping needs no lookup.
//!
//! Every mutation of a class (method redefinition, extension method,
//! added field) bumps its `version` counter. Inline caches store the
//! version they observed and treat any mismatch as a miss, which is the
//! entire invalidation protocol: writers bump, readers revalidate.

use std::rc::Rc;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::args::Arguments;
use crate::ast::Node;
use crate::exception::{ExcType, RunResult};
use crate::interp::Interp;
use crate::scope::Scope;
use crate::value::Value;

/// Stable index of a class in the [`ClassRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub(crate) u32);

impl ClassId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Fixed ids of the built-in classes, in registry installation order.
pub(crate) mod classes {
    use super::ClassId;

    pub const VOID: ClassId = ClassId(0);
    pub const NULL: ClassId = ClassId(1);
    pub const BOOL: ClassId = ClassId(2);
    pub const INT: ClassId = ClassId(3);
    pub const REAL: ClassId = ClassId(4);
    pub const CHAR: ClassId = ClassId(5);
    pub const STRING: ClassId = ClassId(6);
    pub const LIST: ClassId = ClassId(7);
    pub const MAP: ClassId = ClassId(8);
    pub const SET: ClassId = ClassId(9);
    pub const RANGE: ClassId = ClassId(10);
    pub const REGEX: ClassId = ClassId(11);
    pub const FUNCTION: ClassId = ClassId(12);
    pub const CLASS: ClassId = ClassId(13);
    pub const ITERATOR: ClassId = ClassId(14);
    pub const EXCEPTION: ClassId = ClassId(15);

    /// First exception-kind class; the rest follow in `ExcType` order.
    pub const EXC_BASE: ClassId = EXCEPTION;
    /// Number of built-in classes installed by `builtins::install`.
    pub const BUILTIN_COUNT: u32 = 26;
}

/// Host-implemented method: receiver plus frozen arguments.
pub(crate) type HostMethod = fn(&mut Interp, &Value, &Arguments) -> RunResult<Value>;

/// The callable payload of a method table entry.
#[derive(Clone)]
pub(crate) enum Callable {
    /// Built-in method on a built-in class.
    Host(HostMethod),
    /// Function defined in script code (methods, extension methods).
    User(Rc<UserFn>),
}

impl std::fmt::Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host(_) => f.write_str("Callable::Host"),
            Self::User(func) => write!(f, "Callable::User({})", func.name),
        }
    }
}

/// A function defined in script code: named functions, methods and
/// lambdas. The defining scope is captured by shared ownership.
#[derive(Debug)]
pub(crate) struct UserFn {
    pub name: Rc<str>,
    pub params: Rc<[Param]>,
    pub body: Rc<Node>,
    /// Lexical scope the function closes over.
    pub scope: Scope,
    pub doc: Option<Rc<str>>,
}

#[derive(Debug, Clone)]
pub(crate) struct Param {
    pub name: Rc<str>,
    /// Default-value thunk, evaluated in the callee frame when the
    /// argument is missing.
    pub default: Option<Rc<Node>>,
}

/// How many positional arguments a method accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Arity {
    Exact(u8),
    AtLeast(u8),
    Any,
}

impl Arity {
    pub fn accepts(self, argc: usize) -> bool {
        match self {
            Self::Exact(n) => argc == n as usize,
            Self::AtLeast(n) => argc >= n as usize,
            Self::Any => true,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MethodDef {
    pub name: Rc<str>,
    pub arity: Arity,
    pub callable: Callable,
    pub doc: Option<Rc<str>>,
}

/// Field descriptor. Instance layouts list parent fields first, so a
/// subclass extends its parent's slot vector.
#[derive(Debug, Clone)]
pub(crate) struct FieldDef {
    pub name: Rc<str>,
    pub mutable: bool,
    /// Default-value thunk from the class body; `None` for primary
    /// constructor parameters, which must be supplied at call time.
    pub default: Option<Rc<Node>>,
}

#[derive(Debug)]
pub(crate) struct ClassDef {
    pub name: Rc<str>,
    pub parent: Option<ClassId>,
    /// Complete instance layout, inherited fields first.
    pub fields: Vec<FieldDef>,
    /// Number of leading fields bound from constructor arguments.
    pub ctor_params: usize,
    methods: Vec<MethodDef>,
    by_name: AHashMap<Rc<str>, SmallVec<[u32; 1]>>,
    /// Enum constants in declaration order; empty for normal classes.
    pub enum_constants: Vec<(Rc<str>, Value)>,
    /// Scope the class body was evaluated in; field default thunks run
    /// in a child of this scope. `None` for built-ins.
    pub decl_scope: Option<Scope>,
    pub doc: Option<Rc<str>>,
    /// Monotone counter bumped on any method/field mutation; inline
    /// caches are valid only while their recorded version matches.
    pub version: u32,
}

impl ClassDef {
    pub fn new(name: Rc<str>, parent: Option<ClassId>) -> Self {
        Self {
            name,
            parent,
            fields: Vec::new(),
            ctor_params: 0,
            methods: Vec::new(),
            by_name: AHashMap::new(),
            enum_constants: Vec::new(),
            decl_scope: None,
            doc: None,
            version: 0,
        }
    }

    /// Adds or redefines a method and bumps the class version.
    ///
    /// Redefinition replaces an existing entry with the same name and
    /// arity bucket in place, so method indices cached before the bump
    /// stay in range (the version check discards them anyway).
    pub fn add_method(&mut self, def: MethodDef) {
        self.version += 1;
        if let Some(indices) = self.by_name.get(&def.name) {
            for &idx in indices {
                if self.methods[idx as usize].arity == def.arity {
                    self.methods[idx as usize] = def;
                    return;
                }
            }
        }
        let idx = u32::try_from(self.methods.len()).expect("method table overflow");
        self.by_name.entry(Rc::clone(&def.name)).or_default().push(idx);
        self.methods.push(def);
    }

    /// Selects a method by name and argument count. Prefers an exact
    /// arity bucket, then falls back to a variadic one.
    pub fn find_method(&self, name: &str, argc: usize) -> Option<u32> {
        let indices = self.by_name.get(name)?;
        let mut fallback = None;
        for &idx in indices {
            match self.methods[idx as usize].arity {
                Arity::Exact(n) if n as usize == argc => return Some(idx),
                arity if arity.accepts(argc) => fallback = Some(idx),
                _ => {}
            }
        }
        fallback
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn method(&self, idx: u32) -> &MethodDef {
        &self.methods[idx as usize]
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| &*f.name == name)
    }

    pub fn push_field(&mut self, field: FieldDef) {
        self.version += 1;
        self.fields.push(field);
    }

    pub fn enum_constant(&self, name: &str) -> Option<&Value> {
        self.enum_constants
            .iter()
            .find_map(|(n, v)| (&**n == name).then_some(v))
    }
}

/// Owner of all class definitions for one root scope.
#[derive(Debug)]
pub(crate) struct ClassRegistry {
    classes: Vec<ClassDef>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self {
            classes: Vec::with_capacity(classes::BUILTIN_COUNT as usize),
        }
    }

    pub fn define(&mut self, def: ClassDef) -> ClassId {
        let id = ClassId(u32::try_from(self.classes.len()).expect("class registry overflow"));
        self.classes.push(def);
        id
    }

    pub fn get(&self, id: ClassId) -> &ClassDef {
        &self.classes[id.index()]
    }

    pub fn get_mut(&mut self, id: ClassId) -> &mut ClassDef {
        &mut self.classes[id.index()]
    }

    pub fn by_name(&self, name: &str) -> Option<ClassId> {
        self.classes
            .iter()
            .position(|c| &*c.name == name)
            .map(|i| ClassId(i as u32))
    }

    /// Walks the parent chain; `a` is a subclass of `b` if `b` appears
    /// on it (including `a == b`).
    pub fn is_subclass(&self, a: ClassId, b: ClassId) -> bool {
        let mut current = Some(a);
        while let Some(id) = current {
            if id == b {
                return true;
            }
            current = self.get(id).parent;
        }
        false
    }

    /// Resolves a selector on a class, walking the parent chain.
    /// Returns the defining class and the method index within it.
    pub fn lookup_method(&self, class: ClassId, name: &str, argc: usize) -> Option<(ClassId, u32)> {
        let mut current = Some(class);
        while let Some(id) = current {
            let def = self.get(id);
            if let Some(idx) = def.find_method(name, argc) {
                return Some((id, idx));
            }
            current = def.parent;
        }
        None
    }

    /// Whether any class on the chain defines the selector at all,
    /// regardless of arity. Used for operator-protocol fallbacks.
    pub fn has_selector(&self, class: ClassId, name: &str) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            let def = self.get(id);
            if def.has_method(name) {
                return true;
            }
            current = def.parent;
        }
        false
    }

    /// Whether the class descends from the built-in `Exception`, i.e.
    /// instances of it are throwable and carry exception payloads.
    pub fn is_exception_class(&self, class: ClassId) -> bool {
        self.is_subclass(class, ExcType::Exception.class_id())
    }
}
