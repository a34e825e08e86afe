//! Executable AST.
//!
//! Every node carries the position it was parsed at. Nodes that
//! dispatch dynamically (identifiers, member access, method calls,
//! indexing) own their inline-cache state in `Cell`s; the tree itself
//! is immutable after parsing.

use std::cell::Cell;
use std::rc::Rc;

use crate::class::Param;
use crate::ic::{FieldIc, IndexIc, MethodIc, SlotIc};
use crate::source::Pos;
use crate::value::Value;

#[derive(Debug)]
pub(crate) struct Node {
    pub kind: NodeKind,
    pub pos: Pos,
}

impl Node {
    pub fn new(kind: NodeKind, pos: Pos) -> Self {
        Self { kind, pos }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    /// The selector the operator dispatches through on the left
    /// operand.
    pub fn selector(self) -> &'static str {
        match self {
            Self::Add => "plus",
            Self::Sub => "minus",
            Self::Mul => "times",
            Self::Div => "div",
            Self::Rem => "rem",
            Self::Pow => "pow",
            Self::Eq | Self::Ne => "equals",
            Self::Lt | Self::Le | Self::Gt | Self::Ge => "compareTo",
        }
    }

    /// Selector for the symmetric retry on the right operand.
    pub fn right_selector(self) -> Option<&'static str> {
        Some(match self {
            Self::Add => "plusRight",
            Self::Sub => "minusRight",
            Self::Mul => "timesRight",
            Self::Div => "divRight",
            Self::Rem => "remRight",
            Self::Pow => "powRight",
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Pow => "**",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogicOp {
    And,
    Or,
}

/// One piece of an interpolated string literal.
#[derive(Debug)]
pub(crate) enum TplPart {
    Text(Rc<str>),
    Expr(Box<Node>),
}

/// A function literal or declaration body shared with the closures
/// created from it.
#[derive(Debug)]
pub(crate) struct FnDef {
    pub name: Rc<str>,
    pub params: Rc<[Param]>,
    pub body: Rc<Node>,
    pub doc: Option<Rc<str>>,
}

#[derive(Debug)]
pub(crate) struct CatchClause {
    pub binding: Rc<str>,
    /// Exception class name; `None` catches any `Exception`.
    pub class_name: Option<Rc<str>>,
    pub body: Node,
}

/// Primary-constructor parameter of a class declaration. Each becomes
/// a field bound from the constructor arguments.
#[derive(Debug)]
pub(crate) struct CtorParam {
    pub name: Rc<str>,
    pub mutable: bool,
    pub default: Option<Rc<Node>>,
}

/// `val`/`var` field in a class body, with its default-value thunk.
#[derive(Debug)]
pub(crate) struct FieldDecl {
    pub name: Rc<str>,
    pub mutable: bool,
    pub init: Rc<Node>,
}

#[derive(Debug)]
pub(crate) struct ClassDeclDef {
    pub name: Rc<str>,
    pub parent: Option<Rc<str>>,
    pub ctor_params: Vec<CtorParam>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<Rc<FnDef>>,
    pub doc: Option<Rc<str>>,
}

#[derive(Debug)]
pub(crate) enum AssignTarget {
    Name {
        name: Rc<str>,
        ic: Cell<SlotIc>,
    },
    Member {
        recv: Box<Node>,
        name: Rc<str>,
        ic: Cell<FieldIc>,
    },
    Index {
        recv: Box<Node>,
        index: Box<Node>,
        ic: Cell<IndexIc>,
    },
}

#[derive(Debug)]
pub(crate) enum NodeKind {
    /// Scalar literal (numbers, strings without interpolation, chars,
    /// booleans, `null`, `void`).
    Literal(Value),
    /// String literal with interpolation segments.
    StrTemplate(Vec<TplPart>),
    RegexLit {
        pattern: Rc<str>,
        flags: Rc<str>,
    },
    ListLit(Vec<Node>),
    MapLit(Vec<(Node, Node)>),
    RangeLit {
        start: Box<Node>,
        end: Box<Node>,
        inclusive: bool,
    },
    Lambda(Rc<FnDef>),
    Ident {
        name: Rc<str>,
        ic: Cell<SlotIc>,
    },
    This,
    Assign {
        target: AssignTarget,
        /// `Some` for compound assignment (`+=` and friends).
        op: Option<BinOp>,
        value: Box<Node>,
    },
    Unary {
        op: UnOp,
        expr: Box<Node>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Logic {
        op: LogicOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Elvis {
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Member {
        recv: Box<Node>,
        name: Rc<str>,
        safe: bool,
        ic: Cell<FieldIc>,
    },
    Index {
        recv: Box<Node>,
        index: Box<Node>,
        ic: Cell<IndexIc>,
    },
    Call {
        callee: Box<Node>,
        args: Vec<Node>,
        tail_block: bool,
    },
    MethodCall {
        recv: Box<Node>,
        name: Rc<str>,
        args: Vec<Node>,
        tail_block: bool,
        safe: bool,
        ic: Cell<MethodIc>,
    },
    Block {
        body: Vec<Node>,
        /// Whether the block introduces its own scope frame. Function
        /// bodies reuse the call frame.
        scoped: bool,
    },
    If {
        cond: Box<Node>,
        then_branch: Box<Node>,
        else_branch: Option<Box<Node>>,
    },
    While {
        label: Option<Rc<str>>,
        cond: Box<Node>,
        body: Box<Node>,
    },
    DoWhile {
        label: Option<Rc<str>>,
        body: Box<Node>,
        cond: Box<Node>,
    },
    For {
        label: Option<Rc<str>>,
        var: Rc<str>,
        iterable: Box<Node>,
        body: Box<Node>,
    },
    Break {
        label: Option<Rc<str>>,
    },
    Continue {
        label: Option<Rc<str>>,
    },
    Return {
        value: Option<Box<Node>>,
    },
    Throw {
        value: Box<Node>,
    },
    Try {
        body: Box<Node>,
        catches: Vec<CatchClause>,
        finally: Option<Box<Node>>,
    },
    /// `val`/`var` declaration.
    Decl {
        name: Rc<str>,
        mutable: bool,
        init: Box<Node>,
    },
    FunDecl(Rc<FnDef>),
    /// `fun Type.name(...) { ... }`: registers a method on an existing
    /// class and bumps its version.
    ExtMethodDecl {
        type_name: Rc<str>,
        def: Rc<FnDef>,
    },
    ClassDecl(Rc<ClassDeclDef>),
    EnumDecl {
        name: Rc<str>,
        constants: Vec<Rc<str>>,
        methods: Vec<Rc<FnDef>>,
        doc: Option<Rc<str>>,
    },
    Import {
        path: Rc<str>,
    },
}
