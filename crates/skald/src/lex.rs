//! Hand-written lexer.
//!
//! Produces the token stream consumed by the parser. Statement
//! separation is newline based: a newline becomes a [`TokKind::Newline`]
//! token unless it follows a token that cannot end a statement (binary
//! operator, comma, open bracket), appears inside parentheses or square
//! brackets, or is escaped with a trailing backslash.
//!
//! String literals are lexed completely here, including interpolation:
//! `${ expr }` switches into a nested expression mode terminated by the
//! matching `}`. The nesting is purely lexical; the collected tokens are
//! handed to the parser as [`Seg::Expr`] segments.
//!
//! Regex literals (`/pattern/flags`) are disambiguated from division by
//! the preceding token: a `/` can only start a regex where no operand
//! just ended.

use std::fmt;
use std::rc::Rc;

use num_bigint::BigInt;

use crate::source::Pos;
use crate::token::{Kw, Seg, TokKind, Token};

/// Tokenisation failure: unterminated literal, unknown character,
/// malformed escape or number.
#[derive(Debug, Clone)]
pub struct LexError {
    pub pos: Pos,
    pub message: String,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.pos, self.message)
    }
}

impl std::error::Error for LexError {}

type LexResult<T> = Result<T, LexError>;

/// Tokenises a complete source buffer. The returned stream always ends
/// with a single [`TokKind::Eof`] token.
pub(crate) fn lex(text: &str) -> LexResult<Vec<Token>> {
    let mut lexer = Lexer::new(text);
    let mut out = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let eof = matches!(token.kind, TokKind::Eof);
        out.push(token);
        if eof {
            return Ok(out);
        }
    }
}

struct Lexer<'a> {
    src: &'a str,
    /// Current byte position.
    pos: usize,
    line: u32,
    column: u32,
    /// Nesting depth of `(` and `[`; newlines inside are absorbed.
    group_depth: u32,
    /// Whether the previously produced token can end an operand.
    prev_ends_operand: bool,
    /// Whether a newline right after the previous token is absorbed.
    prev_absorbs_newline: bool,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            column: 1,
            group_depth: 0,
            prev_ends_operand: false,
            // A newline before the first token is meaningless.
            prev_absorbs_newline: true,
        }
    }

    fn here(&self) -> Pos {
        Pos {
            offset: self.pos as u32,
            line: self.line,
            column: self.column,
        }
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        LexError {
            pos: self.here(),
            message: message.into(),
        }
    }

    fn error_at(&self, pos: Pos, message: impl Into<String>) -> LexError {
        LexError {
            pos,
            message: message.into(),
        }
    }

    fn current(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.current()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.current() == Some(c) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Produces the next token, handling whitespace, comments, line
    /// continuations and newline-as-separator on the way.
    fn next_token(&mut self) -> LexResult<Token> {
        loop {
            match self.current() {
                None => return Ok(self.token(self.here(), TokKind::Eof)),
                Some(' ' | '\t' | '\r') => {
                    self.advance();
                }
                Some('\\') if self.peek(1) == Some('\n')
                    || (self.peek(1) == Some('\r') && self.peek(2) == Some('\n')) =>
                {
                    // Line continuation: suppress the newline entirely.
                    self.advance();
                    while self.current() != Some('\n') {
                        self.advance();
                    }
                    self.advance();
                }
                Some('\n') => {
                    let pos = self.here();
                    self.advance();
                    if self.group_depth == 0 && !self.prev_absorbs_newline {
                        return Ok(self.token(pos, TokKind::Newline));
                    }
                }
                Some('/') if self.peek(1) == Some('/') => {
                    if self.peek(2) == Some('/') {
                        return self.lex_doc_comment();
                    }
                    while !matches!(self.current(), None | Some('\n')) {
                        self.advance();
                    }
                }
                Some('/') if self.peek(1) == Some('*') => {
                    self.skip_block_comment()?;
                }
                Some(_) => return self.lex_token(),
            }
        }
    }

    fn token(&mut self, pos: Pos, kind: TokKind) -> Token {
        self.prev_ends_operand = kind.ends_operand();
        self.prev_absorbs_newline = absorbs_newline(&kind);
        Token { kind, pos }
    }

    fn skip_block_comment(&mut self) -> LexResult<()> {
        let start = self.here();
        self.advance();
        self.advance();
        let mut depth = 1u32;
        loop {
            match self.current() {
                None => return Err(self.error_at(start, "unterminated block comment")),
                Some('/') if self.peek(1) == Some('*') => {
                    self.advance();
                    self.advance();
                    depth += 1;
                }
                Some('*') if self.peek(1) == Some('/') => {
                    self.advance();
                    self.advance();
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }

    /// A `///` line. Consecutive doc lines are joined by the parser.
    fn lex_doc_comment(&mut self) -> LexResult<Token> {
        let pos = self.here();
        self.advance();
        self.advance();
        self.advance();
        if self.current() == Some(' ') {
            self.advance();
        }
        let start = self.pos;
        while !matches!(self.current(), None | Some('\n')) {
            self.advance();
        }
        let text: Rc<str> = Rc::from(&self.src[start..self.pos]);
        Ok(self.token(pos, TokKind::Doc(text)))
    }

    fn lex_token(&mut self) -> LexResult<Token> {
        let pos = self.here();
        let c = self.current().expect("caller checked for end of input");
        if c.is_ascii_digit() {
            let kind = self.lex_number()?;
            return Ok(self.token(pos, kind));
        }
        if c == '_' || c.is_alphabetic() {
            let kind = self.lex_ident();
            return Ok(self.token(pos, kind));
        }
        let kind = match c {
            '"' => {
                self.advance();
                self.lex_string(pos)?
            }
            '\'' => {
                self.advance();
                self.lex_char(pos)?
            }
            '/' if !self.prev_ends_operand => {
                self.advance();
                self.lex_regex(pos)?
            }
            _ => self.lex_operator(pos)?,
        };
        Ok(self.token(pos, kind))
    }

    fn lex_operator(&mut self, pos: Pos) -> LexResult<TokKind> {
        let c = self.advance().expect("caller checked for end of input");
        let kind = match c {
            '(' => {
                self.group_depth += 1;
                TokKind::LParen
            }
            ')' => {
                self.group_depth = self.group_depth.saturating_sub(1);
                TokKind::RParen
            }
            '[' => {
                self.group_depth += 1;
                TokKind::LBracket
            }
            ']' => {
                self.group_depth = self.group_depth.saturating_sub(1);
                TokKind::RBracket
            }
            '{' => TokKind::LBrace,
            '}' => TokKind::RBrace,
            ',' => TokKind::Comma,
            ':' => TokKind::Colon,
            ';' => TokKind::Semi,
            '@' => TokKind::At,
            '.' => {
                if self.eat('.') {
                    if self.eat('<') {
                        TokKind::DotDotLt
                    } else {
                        TokKind::DotDot
                    }
                } else {
                    TokKind::Dot
                }
            }
            '?' => {
                if self.eat('.') {
                    TokKind::SafeDot
                } else if self.eat(':') {
                    TokKind::Elvis
                } else {
                    return Err(self.error_at(pos, "unexpected character '?'"));
                }
            }
            '+' => {
                if self.eat('=') {
                    TokKind::PlusAssign
                } else {
                    TokKind::Plus
                }
            }
            '-' => {
                if self.eat('>') {
                    TokKind::Arrow
                } else if self.eat('=') {
                    TokKind::MinusAssign
                } else {
                    TokKind::Minus
                }
            }
            '*' => {
                if self.eat('*') {
                    TokKind::StarStar
                } else if self.eat('=') {
                    TokKind::StarAssign
                } else {
                    TokKind::Star
                }
            }
            '/' => {
                if self.eat('=') {
                    TokKind::SlashAssign
                } else {
                    TokKind::Slash
                }
            }
            '%' => {
                if self.eat('=') {
                    TokKind::PercentAssign
                } else {
                    TokKind::Percent
                }
            }
            '=' => {
                if self.eat('=') {
                    TokKind::EqEq
                } else {
                    TokKind::Assign
                }
            }
            '!' => {
                if self.eat('=') {
                    TokKind::NotEq
                } else {
                    TokKind::Not
                }
            }
            '<' => {
                if self.eat('=') {
                    TokKind::Le
                } else {
                    TokKind::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    TokKind::Ge
                } else {
                    TokKind::Gt
                }
            }
            '&' => {
                if self.eat('&') {
                    TokKind::AndAnd
                } else {
                    return Err(self.error_at(pos, "unexpected character '&'"));
                }
            }
            '|' => {
                if self.eat('|') {
                    TokKind::OrOr
                } else {
                    return Err(self.error_at(pos, "unexpected character '|'"));
                }
            }
            other => {
                return Err(self.error_at(pos, format!("unknown character {other:?}")));
            }
        };
        Ok(kind)
    }

    fn lex_ident(&mut self) -> TokKind {
        let start = self.pos;
        while let Some(c) = self.current() {
            if c == '_' || c.is_alphanumeric() {
                self.advance();
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];
        match Kw::from_ident(text) {
            Some(kw) => TokKind::Kw(kw),
            None => TokKind::Ident(Rc::from(text)),
        }
    }

    /// Numeric literal: `_` separators, `0x`/`0o`/`0b` prefixes and
    /// `e±N` exponents. Decimal integers that do not fit in an `i64`
    /// become big-integer literals.
    fn lex_number(&mut self) -> LexResult<TokKind> {
        let pos = self.here();
        if self.current() == Some('0') {
            let radix = match self.peek(1) {
                Some('x' | 'X') => Some(16),
                Some('o' | 'O') => Some(8),
                Some('b' | 'B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.advance();
                self.advance();
                let mut digits = String::new();
                while let Some(c) = self.current() {
                    if c == '_' {
                        self.advance();
                    } else if c.is_digit(radix) {
                        digits.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
                if digits.is_empty() {
                    return Err(self.error_at(pos, "missing digits after radix prefix"));
                }
                return Ok(parse_int_digits(&digits, radix));
            }
        }

        let mut digits = String::new();
        self.take_digits(&mut digits);

        let mut is_real = false;
        // A `.` only begins a fraction when a digit follows; `1..3` is a
        // range expression over integer literals.
        if self.current() == Some('.')
            && self.peek(1).is_some_and(|c| c.is_ascii_digit())
        {
            is_real = true;
            digits.push('.');
            self.advance();
            self.take_digits(&mut digits);
        }
        if matches!(self.current(), Some('e' | 'E')) {
            let after_sign = match self.peek(1) {
                Some('+' | '-') => self.peek(2),
                other => other,
            };
            if after_sign.is_some_and(|c| c.is_ascii_digit()) {
                is_real = true;
                digits.push('e');
                self.advance();
                if let Some(sign @ ('+' | '-')) = self.current() {
                    digits.push(sign);
                    self.advance();
                }
                self.take_digits(&mut digits);
            }
        }

        if is_real {
            let value: f64 = digits
                .parse()
                .map_err(|_| self.error_at(pos, format!("malformed number literal '{digits}'")))?;
            Ok(TokKind::Real(value))
        } else {
            Ok(parse_int_digits(&digits, 10))
        }
    }

    fn take_digits(&mut self, out: &mut String) {
        while let Some(c) = self.current() {
            if c == '_' {
                self.advance();
            } else if c.is_ascii_digit() {
                out.push(c);
                self.advance();
            } else {
                break;
            }
        }
    }

    fn lex_char(&mut self, pos: Pos) -> LexResult<TokKind> {
        let c = match self.current() {
            None | Some('\n') => return Err(self.error_at(pos, "unterminated char literal")),
            Some('\\') => {
                self.advance();
                self.lex_escape()?
            }
            Some('\'') => return Err(self.error_at(pos, "empty char literal")),
            Some(c) => {
                self.advance();
                c
            }
        };
        if !self.eat('\'') {
            return Err(self.error_at(pos, "unterminated char literal"));
        }
        Ok(TokKind::CharLit(c))
    }

    fn lex_escape(&mut self) -> LexResult<char> {
        let pos = self.here();
        let Some(c) = self.advance() else {
            return Err(self.error_at(pos, "unterminated escape sequence"));
        };
        Ok(match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            '\\' => '\\',
            '"' => '"',
            '\'' => '\'',
            '$' => '$',
            'u' => {
                if !self.eat('{') {
                    return Err(self.error_at(pos, "expected '{' after \\u"));
                }
                let start = self.pos;
                while self.current().is_some_and(|c| c.is_ascii_hexdigit()) {
                    self.advance();
                }
                let digits = &self.src[start..self.pos];
                if !self.eat('}') {
                    return Err(self.error_at(pos, "unterminated \\u{...} escape"));
                }
                u32::from_str_radix(digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.error_at(pos, "invalid unicode escape"))?
            }
            other => {
                return Err(self.error_at(pos, format!("unknown escape '\\{other}'")));
            }
        })
    }

    /// The opening quote has been consumed.
    fn lex_string(&mut self, pos: Pos) -> LexResult<TokKind> {
        let mut segs = Vec::new();
        let mut text = String::new();
        loop {
            match self.current() {
                None | Some('\n') => {
                    return Err(self.error_at(pos, "unterminated string literal"));
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    text.push(self.lex_escape()?);
                }
                Some('$') if self.peek(1) == Some('{') => {
                    if !text.is_empty() {
                        segs.push(Seg::Text(std::mem::take(&mut text)));
                    }
                    self.advance();
                    self.advance();
                    segs.push(Seg::Expr(self.lex_interpolation(pos)?));
                }
                Some('$') if self.peek(1).is_some_and(|c| c == '_' || c.is_alphabetic()) => {
                    if !text.is_empty() {
                        segs.push(Seg::Text(std::mem::take(&mut text)));
                    }
                    self.advance();
                    let ident_pos = self.here();
                    let kind = self.lex_ident();
                    match kind {
                        TokKind::Ident(_) => {
                            segs.push(Seg::Expr(vec![Token {
                                kind,
                                pos: ident_pos,
                            }]));
                        }
                        TokKind::Kw(Kw::This) => {
                            segs.push(Seg::Expr(vec![Token {
                                kind,
                                pos: ident_pos,
                            }]));
                        }
                        _ => {
                            return Err(self.error_at(
                                ident_pos,
                                "keyword cannot be interpolated; use ${...}",
                            ));
                        }
                    }
                }
                Some(c) => {
                    self.advance();
                    text.push(c);
                }
            }
        }
        if !text.is_empty() || segs.is_empty() {
            segs.push(Seg::Text(text));
        }
        Ok(TokKind::Str(segs))
    }

    /// Lexes the tokens of a `${ ... }` segment up to the matching
    /// closing brace. Brace tracking is token based, so nested lambdas
    /// and map literals inside the interpolation work.
    fn lex_interpolation(&mut self, string_pos: Pos) -> LexResult<Vec<Token>> {
        let saved_depth = self.group_depth;
        // Newlines inside an interpolation never terminate statements.
        self.group_depth += 1;
        self.prev_ends_operand = false;
        self.prev_absorbs_newline = true;

        let mut brace_depth = 1u32;
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            match token.kind {
                TokKind::LBrace => brace_depth += 1,
                TokKind::RBrace => {
                    brace_depth -= 1;
                    if brace_depth == 0 {
                        break;
                    }
                }
                TokKind::Eof => {
                    return Err(self.error_at(string_pos, "unterminated string interpolation"));
                }
                _ => {}
            }
            tokens.push(token);
        }
        self.group_depth = saved_depth;
        Ok(tokens)
    }

    /// The opening `/` has been consumed.
    fn lex_regex(&mut self, pos: Pos) -> LexResult<TokKind> {
        let mut pattern = String::new();
        loop {
            match self.current() {
                None | Some('\n') => return Err(self.error_at(pos, "unterminated regex literal")),
                Some('/') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        Some('/') => {
                            pattern.push('/');
                            self.advance();
                        }
                        Some(c) => {
                            // Other escapes are passed through for the
                            // regex engine to interpret.
                            pattern.push('\\');
                            pattern.push(c);
                            self.advance();
                        }
                        None => {
                            return Err(self.error_at(pos, "unterminated regex literal"));
                        }
                    }
                }
                Some(c) => {
                    pattern.push(c);
                    self.advance();
                }
            }
        }
        let mut flags = String::new();
        while let Some(c @ ('i' | 'm' | 's' | 'x' | 'U')) = self.current() {
            flags.push(c);
            self.advance();
        }
        Ok(TokKind::Regex { pattern, flags })
    }
}

/// Whether a newline directly after this token is absorbed instead of
/// producing a statement separator.
fn absorbs_newline(kind: &TokKind) -> bool {
    matches!(
        kind,
        TokKind::LParen
            | TokKind::LBracket
            | TokKind::LBrace
            | TokKind::Comma
            | TokKind::Colon
            | TokKind::Semi
            | TokKind::Newline
            | TokKind::At
            | TokKind::Dot
            | TokKind::SafeDot
            | TokKind::Elvis
            | TokKind::Arrow
            | TokKind::Assign
            | TokKind::PlusAssign
            | TokKind::MinusAssign
            | TokKind::StarAssign
            | TokKind::SlashAssign
            | TokKind::PercentAssign
            | TokKind::Plus
            | TokKind::Minus
            | TokKind::Star
            | TokKind::Slash
            | TokKind::Percent
            | TokKind::StarStar
            | TokKind::EqEq
            | TokKind::NotEq
            | TokKind::Lt
            | TokKind::Le
            | TokKind::Gt
            | TokKind::Ge
            | TokKind::AndAnd
            | TokKind::OrOr
            | TokKind::Not
            | TokKind::DotDot
            | TokKind::DotDotLt
            | TokKind::Doc(_)
    )
}

fn parse_int_digits(digits: &str, radix: u32) -> TokKind {
    match i64::from_str_radix(digits, radix) {
        Ok(value) => TokKind::Int(value),
        Err(_) => {
            let big = BigInt::parse_bytes(digits.as_bytes(), radix)
                .expect("digits were validated during lexing");
            TokKind::Big(Box::new(big))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokKind> {
        lex(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn simple_tokens() {
        let ks = kinds("val x = 1 + 2");
        assert!(matches!(ks[0], TokKind::Kw(Kw::Val)));
        assert!(matches!(&ks[1], TokKind::Ident(n) if &**n == "x"));
        assert!(matches!(ks[2], TokKind::Assign));
        assert!(matches!(ks[3], TokKind::Int(1)));
        assert!(matches!(ks[4], TokKind::Plus));
        assert!(matches!(ks[5], TokKind::Int(2)));
        assert!(matches!(ks[6], TokKind::Eof));
    }

    #[test]
    fn newline_separates_statements() {
        let ks = kinds("a\nb");
        assert!(matches!(ks[1], TokKind::Newline));
        assert_eq!(ks.len(), 4);
    }

    #[test]
    fn newline_after_operator_is_absorbed() {
        let ks = kinds("a +\nb");
        assert!(!ks.iter().any(|k| matches!(k, TokKind::Newline)));
    }

    #[test]
    fn newline_inside_parens_is_absorbed() {
        let ks = kinds("f(a,\n  b\n)");
        assert!(!ks.iter().any(|k| matches!(k, TokKind::Newline)));
    }

    #[test]
    fn backslash_joins_lines() {
        let ks = kinds("a \\\nb");
        assert!(!ks.iter().any(|k| matches!(k, TokKind::Newline)));
        assert_eq!(ks.len(), 3);
    }

    #[test]
    fn numeric_forms() {
        assert!(matches!(kinds("1_000_000")[0], TokKind::Int(1_000_000)));
        assert!(matches!(kinds("0xFF")[0], TokKind::Int(255)));
        assert!(matches!(kinds("0b1010")[0], TokKind::Int(10)));
        assert!(matches!(kinds("0o17")[0], TokKind::Int(15)));
        assert!(matches!(kinds("1.5")[0], TokKind::Real(v) if (v - 1.5).abs() < f64::EPSILON));
        assert!(matches!(kinds("2e3")[0], TokKind::Real(v) if (v - 2000.0).abs() < f64::EPSILON));
        assert!(matches!(kinds("123456789012345678901234567890")[0], TokKind::Big(_)));
    }

    #[test]
    fn range_is_not_a_fraction() {
        let ks = kinds("1..3");
        assert!(matches!(ks[0], TokKind::Int(1)));
        assert!(matches!(ks[1], TokKind::DotDot));
        assert!(matches!(ks[2], TokKind::Int(3)));
    }

    #[test]
    fn string_interpolation_segments() {
        let ks = kinds(r#""hello ${1 + 2}""#);
        let TokKind::Str(segs) = &ks[0] else {
            panic!("expected string token");
        };
        assert_eq!(segs.len(), 2);
        assert!(matches!(&segs[0], Seg::Text(t) if t == "hello "));
        let Seg::Expr(tokens) = &segs[1] else {
            panic!("expected expression segment");
        };
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn dollar_ident_shorthand() {
        let ks = kinds(r#""x is $x!""#);
        let TokKind::Str(segs) = &ks[0] else {
            panic!("expected string token");
        };
        assert_eq!(segs.len(), 3);
        assert!(matches!(&segs[2], Seg::Text(t) if t == "!"));
    }

    #[test]
    fn nested_interpolation_braces() {
        let ks = kinds(r#""${ {"a": 1}["a"] }""#);
        let TokKind::Str(segs) = &ks[0] else {
            panic!("expected string token");
        };
        assert_eq!(segs.len(), 1);
    }

    #[test]
    fn regex_vs_division() {
        // After an operand `/` is division.
        let ks = kinds("a / b");
        assert!(matches!(ks[1], TokKind::Slash));
        // At operand position it starts a regex literal.
        let ks = kinds("val r = /ab+c/i");
        assert!(matches!(
            &ks[3],
            TokKind::Regex { pattern, flags } if pattern == "ab+c" && flags == "i"
        ));
    }

    #[test]
    fn doc_comment_token() {
        let ks = kinds("/// adds one\nfun f() { }");
        assert!(matches!(&ks[0], TokKind::Doc(text) if &**text == "adds one"));
        assert!(matches!(ks[1], TokKind::Kw(Kw::Fun)));
    }

    #[test]
    fn unterminated_string_fails() {
        let err = lex("\"abc").unwrap_err();
        assert!(err.message.contains("unterminated string"));
    }

    #[test]
    fn unknown_character_fails() {
        let err = lex("a # b").unwrap_err();
        assert!(err.message.contains("unknown character"));
    }

    #[test]
    fn positions_track_lines() {
        let tokens = lex("a\nbb").unwrap();
        assert_eq!(tokens[0].pos.line, 1);
        assert_eq!(tokens[2].pos.line, 2);
        assert_eq!(tokens[2].pos.column, 1);
    }
}
