//! Recursive-descent parser.
//!
//! Statements are newline- or `;`-separated. Expressions use
//! precedence climbing, low to high: assignment, elvis, `||`, `&&`,
//! equality, comparison, range, additive, multiplicative, unary
//! prefix, power, postfix, primary.
//!
//! A `{` in expression position is disambiguated by lookahead: `{}`
//! and `{ key: value }` are map literals, everything else is a lambda
//! (`{ a, b -> body }`, or a block lambda with the implicit `it`
//! parameter). A `{` directly after a call or a member name is a
//! trailing block: `f(x) { ... }` parses as `f(x, { ... })` with the
//! tail-block flag set on the built arguments.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::ast::{
    AssignTarget, BinOp, CatchClause, ClassDeclDef, CtorParam, FieldDecl, FnDef, LogicOp, Node,
    NodeKind, TplPart, UnOp,
};
use crate::class::Param;
use crate::ic::{FieldIc, IndexIc, MethodIc, SlotIc};
use crate::source::Pos;
use crate::token::{Kw, Seg, TokKind, Token};
use crate::value::Value;

/// Grammatical failure with the token set that would have been
/// accepted, when known.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub pos: Pos,
    pub message: String,
    pub expected: Option<String>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.pos, self.message)?;
        if let Some(expected) = &self.expected {
            write!(f, " (expected {expected})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

type ParseResult<T> = Result<T, ParseError>;

/// Guard against pathologically nested expressions blowing the parser
/// stack.
const MAX_NESTING_DEPTH: u32 = 200;

/// Parses a token stream into the statements of a program, stopping at
/// the first error.
pub(crate) fn parse(tokens: Vec<Token>) -> ParseResult<Vec<Node>> {
    Parser::new(tokens).parse_program()
}

/// Batch mode: collects every top-level error, recovering by skipping
/// to the next statement separator.
pub(crate) fn parse_batch(tokens: Vec<Token>) -> Result<Vec<Node>, Vec<ParseError>> {
    let mut parser = Parser::new(tokens);
    let mut nodes = Vec::new();
    let mut errors = Vec::new();
    loop {
        parser.skip_separators();
        if parser.at_eof() {
            break;
        }
        match parser.parse_statement() {
            Ok(node) => nodes.push(node),
            Err(err) => {
                errors.push(err);
                parser.recover_to_separator();
            }
        }
    }
    if errors.is_empty() { Ok(nodes) } else { Err(errors) }
}

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
    depth: u32,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            cursor: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.cursor)
            .unwrap_or_else(|| self.tokens.last().expect("token stream ends with Eof"))
    }

    fn peek_kind(&self) -> &TokKind {
        &self.peek().kind
    }

    fn peek_at(&self, offset: usize) -> &TokKind {
        self.tokens
            .get(self.cursor + offset)
            .map_or(&TokKind::Eof, |t| &t.kind)
    }

    fn pos(&self) -> Pos {
        self.peek().pos
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.cursor].clone();
        if self.cursor + 1 < self.tokens.len() {
            self.cursor += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokKind::Eof)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            pos: self.pos(),
            message: message.into(),
            expected: None,
        }
    }

    fn expected(&self, what: &str) -> ParseError {
        ParseError {
            pos: self.pos(),
            message: format!("unexpected {}", self.peek_kind().describe()),
            expected: Some(what.to_owned()),
        }
    }

    fn eat(&mut self, f: impl Fn(&TokKind) -> bool) -> bool {
        if f(self.peek_kind()) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, what: &str, f: impl Fn(&TokKind) -> bool) -> ParseResult<Token> {
        if f(self.peek_kind()) {
            Ok(self.advance())
        } else {
            Err(self.expected(what))
        }
    }

    fn expect_kw(&mut self, kw: Kw) -> ParseResult<Token> {
        self.expect(kw.as_str(), |k| matches!(k, TokKind::Kw(other) if *other == kw))
    }

    fn expect_ident(&mut self, what: &str) -> ParseResult<Rc<str>> {
        match self.peek_kind() {
            TokKind::Ident(name) => {
                let name = Rc::clone(name);
                self.advance();
                Ok(name)
            }
            _ => Err(self.expected(what)),
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek_kind(), TokKind::Newline) {
            self.advance();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek_kind(), TokKind::Newline | TokKind::Semi) {
            self.advance();
        }
    }

    fn recover_to_separator(&mut self) {
        while !matches!(self.peek_kind(), TokKind::Newline | TokKind::Semi | TokKind::Eof) {
            self.advance();
        }
    }

    fn enter(&mut self) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(self.error("expression nesting too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // ---- program & statements -------------------------------------

    fn parse_program(&mut self) -> ParseResult<Vec<Node>> {
        let mut nodes = Vec::new();
        loop {
            self.skip_separators();
            if self.at_eof() {
                return Ok(nodes);
            }
            nodes.push(self.parse_statement()?);
            self.expect_statement_end()?;
        }
    }

    fn expect_statement_end(&mut self) -> ParseResult<()> {
        match self.peek_kind() {
            TokKind::Newline | TokKind::Semi => {
                self.advance();
                Ok(())
            }
            TokKind::Eof | TokKind::RBrace => Ok(()),
            _ => Err(self.expected("end of statement")),
        }
    }

    /// Collects a run of `///` doc lines into one attached string.
    fn take_doc(&mut self) -> Option<Rc<str>> {
        let mut lines: Vec<Rc<str>> = Vec::new();
        loop {
            match self.peek_kind() {
                TokKind::Doc(text) => {
                    lines.push(Rc::clone(text));
                    self.advance();
                }
                TokKind::Newline => {
                    if lines.is_empty() {
                        return None;
                    }
                    self.advance();
                }
                _ => break,
            }
        }
        if lines.is_empty() {
            None
        } else {
            Some(Rc::from(lines.join("\n")))
        }
    }

    fn parse_statement(&mut self) -> ParseResult<Node> {
        let doc = self.take_doc();
        let pos = self.pos();
        match self.peek_kind() {
            TokKind::Kw(Kw::Val) => self.parse_decl(false),
            TokKind::Kw(Kw::Var) => self.parse_decl(true),
            TokKind::Kw(Kw::Fun) => self.parse_fun(doc),
            TokKind::Kw(Kw::Class) => self.parse_class(doc),
            TokKind::Kw(Kw::Enum) => self.parse_enum(doc),
            TokKind::Kw(Kw::Import) => self.parse_import(),
            TokKind::Kw(Kw::While) => self.parse_while(None),
            TokKind::Kw(Kw::Do) => self.parse_do_while(None),
            TokKind::Kw(Kw::For) => self.parse_for(None),
            TokKind::Kw(Kw::Break) => {
                self.advance();
                let label = self.parse_label_ref()?;
                Ok(Node::new(NodeKind::Break { label }, pos))
            }
            TokKind::Kw(Kw::Continue) => {
                self.advance();
                let label = self.parse_label_ref()?;
                Ok(Node::new(NodeKind::Continue { label }, pos))
            }
            TokKind::Kw(Kw::Return) => {
                self.advance();
                let value = if matches!(
                    self.peek_kind(),
                    TokKind::Newline | TokKind::Semi | TokKind::RBrace | TokKind::Eof
                ) {
                    None
                } else {
                    Some(Box::new(self.parse_expr()?))
                };
                Ok(Node::new(NodeKind::Return { value }, pos))
            }
            TokKind::Kw(Kw::Throw) => {
                self.advance();
                let value = Box::new(self.parse_expr()?);
                Ok(Node::new(NodeKind::Throw { value }, pos))
            }
            TokKind::LBrace => self.parse_block(),
            // `name@ while ...`: a loop label.
            TokKind::Ident(_) if matches!(self.peek_at(1), TokKind::At) => {
                let label = self.expect_ident("label")?;
                self.advance();
                match self.peek_kind() {
                    TokKind::Kw(Kw::While) => self.parse_while(Some(label)),
                    TokKind::Kw(Kw::Do) => self.parse_do_while(Some(label)),
                    TokKind::Kw(Kw::For) => self.parse_for(Some(label)),
                    _ => Err(self.expected("'while', 'do' or 'for' after label")),
                }
            }
            _ => self.parse_expr(),
        }
    }

    fn parse_label_ref(&mut self) -> ParseResult<Option<Rc<str>>> {
        if self.eat(|k| matches!(k, TokKind::At)) {
            Ok(Some(self.expect_ident("label name")?))
        } else {
            Ok(None)
        }
    }

    fn parse_decl(&mut self, mutable: bool) -> ParseResult<Node> {
        let pos = self.pos();
        self.advance();
        let name = self.expect_ident("variable name")?;
        self.expect("'='", |k| matches!(k, TokKind::Assign))?;
        let init = Box::new(self.parse_expr()?);
        Ok(Node::new(NodeKind::Decl { name, mutable, init }, pos))
    }

    fn parse_fun(&mut self, doc: Option<Rc<str>>) -> ParseResult<Node> {
        let pos = self.pos();
        self.expect_kw(Kw::Fun)?;
        let first = self.expect_ident("function name")?;
        // `fun Type.name(...)` declares an extension method.
        let (type_name, name) = if self.eat(|k| matches!(k, TokKind::Dot)) {
            let method = self.expect_ident("method name")?;
            (Some(first), method)
        } else {
            (None, first)
        };
        let params = self.parse_params()?;
        let body = Rc::new(self.parse_function_body()?);
        let def = Rc::new(FnDef {
            name,
            params,
            body,
            doc,
        });
        let kind = match type_name {
            Some(type_name) => NodeKind::ExtMethodDecl { type_name, def },
            None => NodeKind::FunDecl(def),
        };
        Ok(Node::new(kind, pos))
    }

    fn parse_params(&mut self) -> ParseResult<Rc<[Param]>> {
        self.expect("'('", |k| matches!(k, TokKind::LParen))?;
        let mut params = Vec::new();
        loop {
            if self.eat(|k| matches!(k, TokKind::RParen)) {
                break;
            }
            let name = self.expect_ident("parameter name")?;
            let default = if self.eat(|k| matches!(k, TokKind::Assign)) {
                Some(Rc::new(self.parse_expr()?))
            } else {
                None
            };
            params.push(Param { name, default });
            if !self.eat(|k| matches!(k, TokKind::Comma)) {
                self.expect("')'", |k| matches!(k, TokKind::RParen))?;
                break;
            }
        }
        Ok(Rc::from(params))
    }

    /// Function bodies share the call frame, so the block is unscoped.
    fn parse_function_body(&mut self) -> ParseResult<Node> {
        let pos = self.pos();
        self.expect("'{'", |k| matches!(k, TokKind::LBrace))?;
        let body = self.parse_statements_until_rbrace()?;
        Ok(Node::new(NodeKind::Block { body, scoped: false }, pos))
    }

    fn parse_block(&mut self) -> ParseResult<Node> {
        let pos = self.pos();
        self.expect("'{'", |k| matches!(k, TokKind::LBrace))?;
        let body = self.parse_statements_until_rbrace()?;
        Ok(Node::new(NodeKind::Block { body, scoped: true }, pos))
    }

    fn parse_statements_until_rbrace(&mut self) -> ParseResult<Vec<Node>> {
        let mut body = Vec::new();
        loop {
            self.skip_separators();
            if self.eat(|k| matches!(k, TokKind::RBrace)) {
                return Ok(body);
            }
            if self.at_eof() {
                return Err(self.expected("'}'"));
            }
            body.push(self.parse_statement()?);
            match self.peek_kind() {
                TokKind::Newline | TokKind::Semi => {
                    self.advance();
                }
                TokKind::RBrace => {}
                _ => return Err(self.expected("end of statement or '}'")),
            }
        }
    }

    fn parse_class(&mut self, doc: Option<Rc<str>>) -> ParseResult<Node> {
        let pos = self.pos();
        self.expect_kw(Kw::Class)?;
        let name = self.expect_ident("class name")?;

        let mut ctor_params = Vec::new();
        if self.eat(|k| matches!(k, TokKind::LParen)) {
            loop {
                if self.eat(|k| matches!(k, TokKind::RParen)) {
                    break;
                }
                let mutable = if self.eat(|k| matches!(k, TokKind::Kw(Kw::Var))) {
                    true
                } else {
                    self.eat(|k| matches!(k, TokKind::Kw(Kw::Val)));
                    false
                };
                let param_name = self.expect_ident("constructor parameter")?;
                let default = if self.eat(|k| matches!(k, TokKind::Assign)) {
                    Some(Rc::new(self.parse_expr()?))
                } else {
                    None
                };
                ctor_params.push(CtorParam {
                    name: param_name,
                    mutable,
                    default,
                });
                if !self.eat(|k| matches!(k, TokKind::Comma)) {
                    self.expect("')'", |k| matches!(k, TokKind::RParen))?;
                    break;
                }
            }
        }

        let parent = if self.eat(|k| matches!(k, TokKind::Colon)) {
            Some(self.expect_ident("parent class name")?)
        } else {
            None
        };

        let mut fields = Vec::new();
        let mut methods = Vec::new();
        if self.eat(|k| matches!(k, TokKind::LBrace)) {
            loop {
                self.skip_separators();
                if self.eat(|k| matches!(k, TokKind::RBrace)) {
                    break;
                }
                let member_doc = self.take_doc();
                match self.peek_kind() {
                    TokKind::Kw(kw @ (Kw::Val | Kw::Var)) => {
                        let mutable = *kw == Kw::Var;
                        self.advance();
                        let field_name = self.expect_ident("field name")?;
                        self.expect("'='", |k| matches!(k, TokKind::Assign))?;
                        let init = Rc::new(self.parse_expr()?);
                        fields.push(FieldDecl {
                            name: field_name,
                            mutable,
                            init,
                        });
                    }
                    TokKind::Kw(Kw::Fun) => {
                        self.expect_kw(Kw::Fun)?;
                        let method_name = self.expect_ident("method name")?;
                        let params = self.parse_params()?;
                        let body = Rc::new(self.parse_function_body()?);
                        methods.push(Rc::new(FnDef {
                            name: method_name,
                            params,
                            body,
                            doc: member_doc,
                        }));
                    }
                    _ => return Err(self.expected("'val', 'var', 'fun' or '}'")),
                }
            }
        }

        Ok(Node::new(
            NodeKind::ClassDecl(Rc::new(ClassDeclDef {
                name,
                parent,
                ctor_params,
                fields,
                methods,
                doc,
            })),
            pos,
        ))
    }

    fn parse_enum(&mut self, doc: Option<Rc<str>>) -> ParseResult<Node> {
        let pos = self.pos();
        self.expect_kw(Kw::Enum)?;
        let name = self.expect_ident("enum name")?;
        self.expect("'{'", |k| matches!(k, TokKind::LBrace))?;
        let mut constants = Vec::new();
        let mut methods = Vec::new();
        loop {
            self.skip_separators();
            if self.eat(|k| matches!(k, TokKind::RBrace)) {
                break;
            }
            match self.peek_kind() {
                TokKind::Kw(Kw::Fun) => {
                    self.expect_kw(Kw::Fun)?;
                    let method_name = self.expect_ident("method name")?;
                    let params = self.parse_params()?;
                    let body = Rc::new(self.parse_function_body()?);
                    methods.push(Rc::new(FnDef {
                        name: method_name,
                        params,
                        body,
                        doc: None,
                    }));
                }
                TokKind::Ident(_) => {
                    constants.push(self.expect_ident("enum constant")?);
                    self.eat(|k| matches!(k, TokKind::Comma));
                }
                _ => return Err(self.expected("enum constant, 'fun' or '}'")),
            }
        }
        Ok(Node::new(
            NodeKind::EnumDecl {
                name,
                constants,
                methods,
                doc,
            },
            pos,
        ))
    }

    fn parse_import(&mut self) -> ParseResult<Node> {
        let pos = self.pos();
        self.expect_kw(Kw::Import)?;
        let mut path = String::from(&*self.expect_ident("module path")?);
        while self.eat(|k| matches!(k, TokKind::Dot)) {
            path.push('.');
            path.push_str(&self.expect_ident("module path segment")?);
        }
        Ok(Node::new(NodeKind::Import { path: Rc::from(path.as_str()) }, pos))
    }

    fn parse_while(&mut self, label: Option<Rc<str>>) -> ParseResult<Node> {
        let pos = self.pos();
        self.expect_kw(Kw::While)?;
        self.expect("'('", |k| matches!(k, TokKind::LParen))?;
        let cond = Box::new(self.parse_expr()?);
        self.expect("')'", |k| matches!(k, TokKind::RParen))?;
        self.skip_newlines();
        let body = Box::new(self.parse_loop_body()?);
        Ok(Node::new(NodeKind::While { label, cond, body }, pos))
    }

    fn parse_do_while(&mut self, label: Option<Rc<str>>) -> ParseResult<Node> {
        let pos = self.pos();
        self.expect_kw(Kw::Do)?;
        self.skip_newlines();
        let body = Box::new(self.parse_loop_body()?);
        self.skip_newlines();
        self.expect_kw(Kw::While)?;
        self.expect("'('", |k| matches!(k, TokKind::LParen))?;
        let cond = Box::new(self.parse_expr()?);
        self.expect("')'", |k| matches!(k, TokKind::RParen))?;
        Ok(Node::new(NodeKind::DoWhile { label, body, cond }, pos))
    }

    fn parse_for(&mut self, label: Option<Rc<str>>) -> ParseResult<Node> {
        let pos = self.pos();
        self.expect_kw(Kw::For)?;
        self.expect("'('", |k| matches!(k, TokKind::LParen))?;
        let var = self.expect_ident("loop variable")?;
        self.expect_kw(Kw::In)?;
        let iterable = Box::new(self.parse_expr()?);
        self.expect("')'", |k| matches!(k, TokKind::RParen))?;
        self.skip_newlines();
        let body = Box::new(self.parse_loop_body()?);
        Ok(Node::new(
            NodeKind::For {
                label,
                var,
                iterable,
                body,
            },
            pos,
        ))
    }

    fn parse_loop_body(&mut self) -> ParseResult<Node> {
        if matches!(self.peek_kind(), TokKind::LBrace) {
            self.parse_block()
        } else {
            self.parse_statement()
        }
    }

    fn parse_branch(&mut self) -> ParseResult<Node> {
        self.skip_newlines();
        if matches!(self.peek_kind(), TokKind::LBrace) {
            self.parse_block()
        } else {
            self.parse_statement()
        }
    }

    // ---- expressions ----------------------------------------------

    fn parse_expr(&mut self) -> ParseResult<Node> {
        self.enter()?;
        let result = self.parse_assign();
        self.leave();
        result
    }

    fn parse_assign(&mut self) -> ParseResult<Node> {
        let lhs = self.parse_elvis()?;
        let op = match self.peek_kind() {
            TokKind::Assign => None,
            TokKind::PlusAssign => Some(BinOp::Add),
            TokKind::MinusAssign => Some(BinOp::Sub),
            TokKind::StarAssign => Some(BinOp::Mul),
            TokKind::SlashAssign => Some(BinOp::Div),
            TokKind::PercentAssign => Some(BinOp::Rem),
            _ => return Ok(lhs),
        };
        let pos = lhs.pos;
        self.advance();
        let target = Self::into_assign_target(lhs)?;
        let value = Box::new(self.parse_assign()?);
        Ok(Node::new(NodeKind::Assign { target, op, value }, pos))
    }

    fn into_assign_target(node: Node) -> ParseResult<AssignTarget> {
        let pos = node.pos;
        match node.kind {
            NodeKind::Ident { name, .. } => Ok(AssignTarget::Name {
                name,
                ic: Cell::new(SlotIc::EMPTY),
            }),
            NodeKind::Member { recv, name, safe, .. } => {
                if safe {
                    Err(ParseError {
                        pos,
                        message: "cannot assign through '?.'".to_owned(),
                        expected: None,
                    })
                } else {
                    Ok(AssignTarget::Member {
                        recv,
                        name,
                        ic: Cell::new(FieldIc::EMPTY),
                    })
                }
            }
            NodeKind::Index { recv, index, .. } => Ok(AssignTarget::Index {
                recv,
                index,
                ic: Cell::new(IndexIc::Empty),
            }),
            _ => Err(ParseError {
                pos,
                message: "invalid assignment target".to_owned(),
                expected: None,
            }),
        }
    }

    fn parse_elvis(&mut self) -> ParseResult<Node> {
        let lhs = self.parse_or()?;
        if self.eat(|k| matches!(k, TokKind::Elvis)) {
            let pos = lhs.pos;
            let rhs = self.parse_elvis()?;
            Ok(Node::new(
                NodeKind::Elvis {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            ))
        } else {
            Ok(lhs)
        }
    }

    fn parse_or(&mut self) -> ParseResult<Node> {
        let mut lhs = self.parse_and()?;
        while self.eat(|k| matches!(k, TokKind::OrOr)) {
            let pos = lhs.pos;
            let rhs = self.parse_and()?;
            lhs = Node::new(
                NodeKind::Logic {
                    op: LogicOp::Or,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            );
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ParseResult<Node> {
        let mut lhs = self.parse_equality()?;
        while self.eat(|k| matches!(k, TokKind::AndAnd)) {
            let pos = lhs.pos;
            let rhs = self.parse_equality()?;
            lhs = Node::new(
                NodeKind::Logic {
                    op: LogicOp::And,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            );
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> ParseResult<Node> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek_kind() {
                TokKind::EqEq => BinOp::Eq,
                TokKind::NotEq => BinOp::Ne,
                _ => return Ok(lhs),
            };
            self.advance();
            let pos = lhs.pos;
            let rhs = self.parse_comparison()?;
            lhs = Node::new(
                NodeKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            );
        }
    }

    fn parse_comparison(&mut self) -> ParseResult<Node> {
        let mut lhs = self.parse_range()?;
        loop {
            let op = match self.peek_kind() {
                TokKind::Lt => BinOp::Lt,
                TokKind::Le => BinOp::Le,
                TokKind::Gt => BinOp::Gt,
                TokKind::Ge => BinOp::Ge,
                _ => return Ok(lhs),
            };
            self.advance();
            let pos = lhs.pos;
            let rhs = self.parse_range()?;
            lhs = Node::new(
                NodeKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            );
        }
    }

    fn parse_range(&mut self) -> ParseResult<Node> {
        let lhs = self.parse_additive()?;
        let inclusive = match self.peek_kind() {
            TokKind::DotDot => true,
            TokKind::DotDotLt => false,
            _ => return Ok(lhs),
        };
        let pos = lhs.pos;
        self.advance();
        let rhs = self.parse_additive()?;
        Ok(Node::new(
            NodeKind::RangeLit {
                start: Box::new(lhs),
                end: Box::new(rhs),
                inclusive,
            },
            pos,
        ))
    }

    fn parse_additive(&mut self) -> ParseResult<Node> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokKind::Plus => BinOp::Add,
                TokKind::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let pos = lhs.pos;
            let rhs = self.parse_multiplicative()?;
            lhs = Node::new(
                NodeKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            );
        }
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Node> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokKind::Star => BinOp::Mul,
                TokKind::Slash => BinOp::Div,
                TokKind::Percent => BinOp::Rem,
                _ => return Ok(lhs),
            };
            self.advance();
            let pos = lhs.pos;
            let rhs = self.parse_unary()?;
            lhs = Node::new(
                NodeKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            );
        }
    }

    fn parse_unary(&mut self) -> ParseResult<Node> {
        self.enter()?;
        let result = (|| {
            let pos = self.pos();
            let op = match self.peek_kind() {
                TokKind::Minus => Some(UnOp::Neg),
                TokKind::Not => Some(UnOp::Not),
                _ => None,
            };
            if let Some(op) = op {
                self.advance();
                let expr = Box::new(self.parse_unary()?);
                Ok(Node::new(NodeKind::Unary { op, expr }, pos))
            } else {
                self.parse_power()
            }
        })();
        self.leave();
        result
    }

    fn parse_power(&mut self) -> ParseResult<Node> {
        let lhs = self.parse_postfix()?;
        if self.eat(|k| matches!(k, TokKind::StarStar)) {
            let pos = lhs.pos;
            // Right associative; the exponent may itself be signed.
            let rhs = self.parse_unary()?;
            Ok(Node::new(
                NodeKind::Binary {
                    op: BinOp::Pow,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            ))
        } else {
            Ok(lhs)
        }
    }

    fn parse_postfix(&mut self) -> ParseResult<Node> {
        let mut node = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokKind::LParen => {
                    let pos = node.pos;
                    let (args, tail_block) = self.parse_call_args()?;
                    node = Node::new(
                        NodeKind::Call {
                            callee: Box::new(node),
                            args,
                            tail_block,
                        },
                        pos,
                    );
                }
                TokKind::LBracket => {
                    let pos = node.pos;
                    self.advance();
                    let index = Box::new(self.parse_expr()?);
                    self.expect("']'", |k| matches!(k, TokKind::RBracket))?;
                    node = Node::new(
                        NodeKind::Index {
                            recv: Box::new(node),
                            index,
                            ic: Cell::new(IndexIc::Empty),
                        },
                        pos,
                    );
                }
                TokKind::Dot | TokKind::SafeDot => {
                    let safe = matches!(self.peek_kind(), TokKind::SafeDot);
                    let pos = node.pos;
                    self.advance();
                    let name = self.expect_ident("member name")?;
                    match self.peek_kind() {
                        TokKind::LParen => {
                            let (args, tail_block) = self.parse_call_args()?;
                            node = Node::new(
                                NodeKind::MethodCall {
                                    recv: Box::new(node),
                                    name,
                                    args,
                                    tail_block,
                                    safe,
                                    ic: Cell::new(MethodIc::EMPTY),
                                },
                                pos,
                            );
                        }
                        // `xs.map { it * 2 }`: a lone trailing block is
                        // the whole argument list.
                        TokKind::LBrace => {
                            let block = self.parse_lambda_literal()?;
                            node = Node::new(
                                NodeKind::MethodCall {
                                    recv: Box::new(node),
                                    name,
                                    args: vec![block],
                                    tail_block: true,
                                    safe,
                                    ic: Cell::new(MethodIc::EMPTY),
                                },
                                pos,
                            );
                        }
                        _ => {
                            node = Node::new(
                                NodeKind::Member {
                                    recv: Box::new(node),
                                    name,
                                    safe,
                                    ic: Cell::new(FieldIc::EMPTY),
                                },
                                pos,
                            );
                        }
                    }
                }
                _ => return Ok(node),
            }
        }
    }

    /// Parses `( args )` plus an optional trailing block.
    fn parse_call_args(&mut self) -> ParseResult<(Vec<Node>, bool)> {
        self.expect("'('", |k| matches!(k, TokKind::LParen))?;
        let mut args = Vec::new();
        loop {
            if self.eat(|k| matches!(k, TokKind::RParen)) {
                break;
            }
            args.push(self.parse_expr()?);
            if !self.eat(|k| matches!(k, TokKind::Comma)) {
                self.expect("')'", |k| matches!(k, TokKind::RParen))?;
                break;
            }
        }
        // `f(x) { ... }` appends the block as the last argument. The
        // lexer emits no newline between `)` and `{` on the same line,
        // so this cannot swallow a block on the following line.
        let tail_block = if matches!(self.peek_kind(), TokKind::LBrace) {
            args.push(self.parse_lambda_literal()?);
            true
        } else {
            false
        };
        Ok((args, tail_block))
    }

    fn parse_primary(&mut self) -> ParseResult<Node> {
        self.enter()?;
        let result = self.parse_primary_inner();
        self.leave();
        result
    }

    fn parse_primary_inner(&mut self) -> ParseResult<Node> {
        let pos = self.pos();
        let kind = match self.peek_kind() {
            TokKind::Int(v) => {
                let v = *v;
                self.advance();
                NodeKind::Literal(Value::Int(v))
            }
            TokKind::Big(_) => {
                let TokKind::Big(big) = self.advance().kind else {
                    unreachable!("peeked variant");
                };
                NodeKind::Literal(Value::from_big(*big))
            }
            TokKind::Real(v) => {
                let v = *v;
                self.advance();
                NodeKind::Literal(Value::Real(v))
            }
            TokKind::CharLit(c) => {
                let c = *c;
                self.advance();
                NodeKind::Literal(Value::Char(c))
            }
            TokKind::Str(_) => {
                let TokKind::Str(segs) = self.advance().kind else {
                    unreachable!("peeked variant");
                };
                return self.build_string(segs, pos);
            }
            TokKind::Regex { .. } => {
                let TokKind::Regex { pattern, flags } = self.advance().kind else {
                    unreachable!("peeked variant");
                };
                NodeKind::RegexLit {
                    pattern: Rc::from(pattern.as_str()),
                    flags: Rc::from(flags.as_str()),
                }
            }
            TokKind::Kw(Kw::True) => {
                self.advance();
                NodeKind::Literal(Value::Bool(true))
            }
            TokKind::Kw(Kw::False) => {
                self.advance();
                NodeKind::Literal(Value::Bool(false))
            }
            TokKind::Kw(Kw::Null) => {
                self.advance();
                NodeKind::Literal(Value::Null)
            }
            TokKind::Kw(Kw::Void) => {
                self.advance();
                NodeKind::Literal(Value::Void)
            }
            TokKind::Kw(Kw::This) => {
                self.advance();
                NodeKind::This
            }
            TokKind::Kw(Kw::If) => return self.parse_if(),
            TokKind::Kw(Kw::Try) => return self.parse_try(),
            TokKind::Ident(_) => {
                let name = self.expect_ident("expression")?;
                NodeKind::Ident {
                    name,
                    ic: Cell::new(SlotIc::EMPTY),
                }
            }
            TokKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect("')'", |k| matches!(k, TokKind::RParen))?;
                return Ok(inner);
            }
            TokKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                loop {
                    if self.eat(|k| matches!(k, TokKind::RBracket)) {
                        break;
                    }
                    items.push(self.parse_expr()?);
                    if !self.eat(|k| matches!(k, TokKind::Comma)) {
                        self.expect("']'", |k| matches!(k, TokKind::RBracket))?;
                        break;
                    }
                }
                NodeKind::ListLit(items)
            }
            TokKind::LBrace => return self.parse_brace_expr(),
            _ => return Err(self.expected("expression")),
        };
        Ok(Node::new(kind, pos))
    }

    fn build_string(&mut self, segs: Vec<Seg>, pos: Pos) -> ParseResult<Node> {
        // A literal without interpolation stays a plain value.
        if segs.len() == 1
            && let Seg::Text(text) = &segs[0]
        {
            return Ok(Node::new(NodeKind::Literal(Value::str(text)), pos));
        }
        let mut parts = Vec::with_capacity(segs.len());
        for seg in segs {
            match seg {
                Seg::Text(text) => parts.push(TplPart::Text(Rc::from(text.as_str()))),
                Seg::Expr(mut tokens) => {
                    let end_pos = tokens.last().map_or(pos, |t| t.pos);
                    tokens.push(Token {
                        kind: TokKind::Eof,
                        pos: end_pos,
                    });
                    let mut sub = Parser::new(tokens);
                    sub.skip_newlines();
                    let expr = sub.parse_expr()?;
                    sub.skip_newlines();
                    if !sub.at_eof() {
                        return Err(sub.expected("end of interpolated expression"));
                    }
                    parts.push(TplPart::Expr(Box::new(expr)));
                }
            }
        }
        Ok(Node::new(NodeKind::StrTemplate(parts), pos))
    }

    /// `{` in expression position: map literal or lambda.
    fn parse_brace_expr(&mut self) -> ParseResult<Node> {
        let pos = self.pos();
        // Map literal when empty or when a `key:` pair opens the brace.
        let is_map = match self.peek_at(1) {
            TokKind::RBrace => true,
            TokKind::Ident(_)
            | TokKind::Str(_)
            | TokKind::Int(_)
            | TokKind::Big(_)
            | TokKind::CharLit(_)
            | TokKind::Kw(Kw::True | Kw::False | Kw::Null) => {
                matches!(self.peek_at(2), TokKind::Colon)
            }
            _ => false,
        };
        if is_map {
            self.advance();
            let mut pairs = Vec::new();
            loop {
                self.skip_newlines();
                if self.eat(|k| matches!(k, TokKind::RBrace)) {
                    break;
                }
                let key = self.parse_map_key()?;
                self.expect("':'", |k| matches!(k, TokKind::Colon))?;
                let value = self.parse_expr()?;
                pairs.push((key, value));
                if !self.eat(|k| matches!(k, TokKind::Comma)) {
                    self.skip_newlines();
                    self.expect("'}'", |k| matches!(k, TokKind::RBrace))?;
                    break;
                }
            }
            Ok(Node::new(NodeKind::MapLit(pairs), pos))
        } else {
            self.parse_lambda_literal()
        }
    }

    /// Map keys in literal position: a bare identifier is a string key.
    fn parse_map_key(&mut self) -> ParseResult<Node> {
        let pos = self.pos();
        if let TokKind::Ident(name) = self.peek_kind() {
            let key = Value::Str(Rc::clone(name));
            self.advance();
            return Ok(Node::new(NodeKind::Literal(key), pos));
        }
        self.parse_expr()
    }

    /// Parses `{ a, b -> body }` or a block lambda `{ body }`. A block
    /// lambda gets the implicit `it` parameter (defaulting to `void`)
    /// so single-argument callers like `map` can pass through it.
    fn parse_lambda_literal(&mut self) -> ParseResult<Node> {
        let pos = self.pos();
        self.expect("'{'", |k| matches!(k, TokKind::LBrace))?;
        self.skip_newlines();

        let explicit_params = self.try_parse_lambda_params();
        let params: Rc<[Param]> = match explicit_params {
            Some(names) => names
                .into_iter()
                .map(|name| Param { name, default: None })
                .collect::<Vec<_>>()
                .into(),
            None => {
                let it = Param {
                    name: Rc::from("it"),
                    default: Some(Rc::new(Node::new(NodeKind::Literal(Value::Void), pos))),
                };
                Rc::from(vec![it])
            }
        };

        let body_pos = self.pos();
        let body = self.parse_statements_until_rbrace()?;
        let def = FnDef {
            name: Rc::from("<lambda>"),
            params,
            body: Rc::new(Node::new(NodeKind::Block { body, scoped: false }, body_pos)),
            doc: None,
        };
        Ok(Node::new(NodeKind::Lambda(Rc::new(def)), pos))
    }

    /// Tries to read `a, b ->` at the start of a lambda. Restores the
    /// cursor when the tokens are not a parameter list.
    fn try_parse_lambda_params(&mut self) -> Option<Vec<Rc<str>>> {
        let saved = self.cursor;
        let mut names = Vec::new();
        if matches!(self.peek_kind(), TokKind::Arrow) {
            self.advance();
            return Some(names);
        }
        loop {
            match self.peek_kind() {
                TokKind::Ident(name) => {
                    names.push(Rc::clone(name));
                    self.advance();
                }
                _ => {
                    self.cursor = saved;
                    return None;
                }
            }
            match self.peek_kind() {
                TokKind::Comma => {
                    self.advance();
                }
                TokKind::Arrow => {
                    self.advance();
                    return Some(names);
                }
                _ => {
                    self.cursor = saved;
                    return None;
                }
            }
        }
    }

    fn parse_if(&mut self) -> ParseResult<Node> {
        let pos = self.pos();
        self.expect_kw(Kw::If)?;
        self.expect("'('", |k| matches!(k, TokKind::LParen))?;
        let cond = Box::new(self.parse_expr()?);
        self.expect("')'", |k| matches!(k, TokKind::RParen))?;
        let then_branch = Box::new(self.parse_branch()?);
        // Look past separators for `else`; back off if it is absent so
        // the newline still terminates this statement.
        let saved = self.cursor;
        self.skip_separators();
        let else_branch = if self.eat(|k| matches!(k, TokKind::Kw(Kw::Else))) {
            Some(Box::new(self.parse_branch()?))
        } else {
            self.cursor = saved;
            None
        };
        Ok(Node::new(
            NodeKind::If {
                cond,
                then_branch,
                else_branch,
            },
            pos,
        ))
    }

    fn parse_try(&mut self) -> ParseResult<Node> {
        let pos = self.pos();
        self.expect_kw(Kw::Try)?;
        self.skip_newlines();
        let body = Box::new(self.parse_block()?);
        let mut catches = Vec::new();
        loop {
            let saved = self.cursor;
            self.skip_separators();
            if !matches!(self.peek_kind(), TokKind::Kw(Kw::Catch)) {
                self.cursor = saved;
                break;
            }
            self.expect_kw(Kw::Catch)?;
            self.expect("'('", |k| matches!(k, TokKind::LParen))?;
            let binding = self.expect_ident("exception binding")?;
            let class_name = if self.eat(|k| matches!(k, TokKind::Colon)) {
                Some(self.expect_ident("exception class")?)
            } else {
                None
            };
            self.expect("')'", |k| matches!(k, TokKind::RParen))?;
            self.skip_newlines();
            let catch_body = self.parse_block()?;
            catches.push(CatchClause {
                binding,
                class_name,
                body: catch_body,
            });
        }
        let saved = self.cursor;
        self.skip_separators();
        let finally = if self.eat(|k| matches!(k, TokKind::Kw(Kw::Finally))) {
            self.skip_newlines();
            Some(Box::new(self.parse_block()?))
        } else {
            self.cursor = saved;
            None
        };
        if catches.is_empty() && finally.is_none() {
            return Err(ParseError {
                pos,
                message: "'try' needs at least one 'catch' or a 'finally'".to_owned(),
                expected: None,
            });
        }
        Ok(Node::new(
            NodeKind::Try {
                body,
                catches,
                finally,
            },
            pos,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lex::lex;

    fn parse_src(src: &str) -> Vec<Node> {
        parse(lex(src).unwrap()).unwrap()
    }

    fn parse_err(src: &str) -> ParseError {
        parse(lex(src).unwrap()).unwrap_err()
    }

    #[test]
    fn precedence_shapes() {
        let nodes = parse_src("1 + 2 * 3");
        let NodeKind::Binary { op, rhs, .. } = &nodes[0].kind else {
            panic!("expected binary node");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(
            rhs.kind,
            NodeKind::Binary { op: BinOp::Mul, .. }
        ));
    }

    #[test]
    fn assignment_targets() {
        let nodes = parse_src("a = 1; a.b = 2; a[0] = 3; a += 4");
        assert!(matches!(
            &nodes[0].kind,
            NodeKind::Assign { target: AssignTarget::Name { .. }, op: None, .. }
        ));
        assert!(matches!(
            &nodes[1].kind,
            NodeKind::Assign { target: AssignTarget::Member { .. }, .. }
        ));
        assert!(matches!(
            &nodes[2].kind,
            NodeKind::Assign { target: AssignTarget::Index { .. }, .. }
        ));
        assert!(matches!(
            &nodes[3].kind,
            NodeKind::Assign { op: Some(BinOp::Add), .. }
        ));
    }

    #[test]
    fn trailing_block_becomes_last_argument() {
        let nodes = parse_src("f(1) { it }");
        let NodeKind::Call { args, tail_block, .. } = &nodes[0].kind else {
            panic!("expected call node");
        };
        assert!(*tail_block);
        assert_eq!(args.len(), 2);
        assert!(matches!(args[1].kind, NodeKind::Lambda(_)));
    }

    #[test]
    fn method_trailing_block_without_parens() {
        let nodes = parse_src("xs.map { it }");
        let NodeKind::MethodCall { name, args, tail_block, .. } = &nodes[0].kind else {
            panic!("expected method call");
        };
        assert_eq!(&**name, "map");
        assert!(*tail_block);
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn map_literal_vs_lambda() {
        let nodes = parse_src("val m = {\"a\": 1}");
        let NodeKind::Decl { init, .. } = &nodes[0].kind else {
            panic!("expected declaration");
        };
        assert!(matches!(init.kind, NodeKind::MapLit(_)));

        let nodes = parse_src("val f = { x -> x }");
        let NodeKind::Decl { init, .. } = &nodes[0].kind else {
            panic!("expected declaration");
        };
        assert!(matches!(init.kind, NodeKind::Lambda(_)));

        let nodes = parse_src("val e = {}");
        let NodeKind::Decl { init, .. } = &nodes[0].kind else {
            panic!("expected declaration");
        };
        assert!(matches!(&init.kind, NodeKind::MapLit(pairs) if pairs.is_empty()));
    }

    #[test]
    fn labelled_loops() {
        let nodes = parse_src("outer@ while(true) { break@outer }");
        let NodeKind::While { label, .. } = &nodes[0].kind else {
            panic!("expected while");
        };
        assert_eq!(label.as_deref(), Some("outer"));
    }

    #[test]
    fn class_with_fields_and_methods() {
        let nodes = parse_src("class C { var x = 0; fun inc() { this.x = this.x + 1 } }");
        let NodeKind::ClassDecl(def) = &nodes[0].kind else {
            panic!("expected class declaration");
        };
        assert_eq!(def.fields.len(), 1);
        assert_eq!(def.methods.len(), 1);
    }

    #[test]
    fn extension_method_declaration() {
        let nodes = parse_src("fun String.shout() { this }");
        assert!(matches!(
            &nodes[0].kind,
            NodeKind::ExtMethodDecl { type_name, .. } if &**type_name == "String"
        ));
    }

    #[test]
    fn doc_comment_attaches_to_declaration() {
        let nodes = parse_src("/// doubles a number\n/// quickly\nfun f(x) { x * 2 }");
        let NodeKind::FunDecl(def) = &nodes[0].kind else {
            panic!("expected function declaration");
        };
        assert_eq!(def.doc.as_deref(), Some("doubles a number\nquickly"));
    }

    #[test]
    fn interpolated_string_parses_segments() {
        let nodes = parse_src(r#""hello ${1 + 2}""#);
        let NodeKind::StrTemplate(parts) = &nodes[0].kind else {
            panic!("expected template");
        };
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn error_carries_expected_set() {
        let err = parse_err("val = 3");
        assert_eq!(err.expected.as_deref(), Some("variable name"));
    }

    #[test]
    fn batch_mode_collects_multiple_errors() {
        let tokens = lex("val = 1\nval x = 2\nfun (){}\n").unwrap();
        let errors = parse_batch(tokens).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn depth_guard_rejects_pathological_nesting() {
        // Runs on a thread with a larger stack: the pathological input
        // nests deeply enough, across the full expression-precedence
        // call chain, to exceed the default test-thread stack before
        // the depth guard has a chance to return its error.
        std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| {
                let mut src = String::new();
                for _ in 0..500 {
                    src.push('(');
                }
                src.push('1');
                for _ in 0..500 {
                    src.push(')');
                }
                let err = parse_err(&src);
                assert!(err.message.contains("nesting too deep"));
            })
            .unwrap()
            .join()
            .unwrap();
    }

    #[test]
    fn safe_member_assignment_is_rejected() {
        let err = parse_err("a?.b = 1");
        assert!(err.message.contains("cannot assign"));
    }
}
