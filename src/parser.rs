//! Hand-written CEL parser (SPEC_FULL.md §4.9, §6.1).
//!
//! Replaces the teacher's `lalrpop`-generated `grammar::ExprParser` with a
//! lexer plus a recursive-descent/Pratt parser over CEL's real surface
//! grammar: identifiers, literals, `.`/`[]`/call postfixes, unary and binary
//! operators at CEL precedence, `?:`, and list/map/message literals. Macro
//! calls (`all`/`exists`/`exists_one`/`map`/`filter`/`has`) are recognized at
//! the call site and lowered straight to `Comprehension`/`Select` nodes via
//! `comprehension.rs`, never left as ordinary `Call`s for the planner to
//! special-case.

use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use crate::ast::{Entry, Expr, ExprId, IdGenerator, Kind, ListElem, Literal, Node, ParsedAst, SourceInfo};
use crate::comprehension;

/// Parser knobs (§6.1 input: "source text plus parse options").
#[derive(Clone, Debug)]
pub struct ParseOptions {
    pub max_recursion_depth: u32,
    pub enable_macros: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions { max_recursion_depth: 64, enable_macros: true }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseErrorKind {
    Syntax,
    /// Parser cancellation on recursion overflow (§6.1: "surfaced as
    /// `invalid_argument`" from the host's perspective).
    RecursionLimit,
}

#[derive(Clone, Debug)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for ParseError {}

pub trait Parser {
    fn parse(&self, source: &str, options: &ParseOptions) -> Result<ParsedAst, ParseError>;
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Null,
    True,
    False,
    Int(i64),
    Uint(u64),
    Double(f64),
    Str(String),
    Bytes(Vec<u8>),
    Ident(String),
    Dot,
    QuestionDot,
    Comma,
    Colon,
    Question,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    In,
    Eof,
}

struct Spanned {
    token: Token,
    line: u32,
    col: u32,
}

struct Lexer<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer { src, chars: src.char_indices().peekable(), line: 1, col: 1 }
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        let next = self.chars.next();
        if let Some((_, c)) = next {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        next
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError { kind: ParseErrorKind::Syntax, message: message.into(), line: self.line, col: self.col }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    if matches!(ahead.peek(), Some((_, '/'))) {
                        while !matches!(self.peek_char(), Some('\n') | None) {
                            self.bump();
                        }
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> Result<Spanned, ParseError> {
        self.skip_trivia();
        let (line, col) = (self.line, self.col);
        let tok = match self.peek_char() {
            None => Token::Eof,
            Some(c) if c.is_ascii_digit() => self.lex_number()?,
            Some('b') if self.is_bytes_prefix() => self.lex_bytes()?,
            Some(c) if is_ident_start(c) => self.lex_ident_or_keyword(),
            Some('"') | Some('\'') => self.lex_string()?,
            Some(_) => self.lex_operator()?,
        };
        Ok(Spanned { token: tok, line, col })
    }

    fn is_bytes_prefix(&self) -> bool {
        let mut ahead = self.chars.clone();
        matches!(ahead.next(), Some((_, 'b'))) && matches!(ahead.peek(), Some((_, '"')) | Some((_, '\'')))
    }

    fn lex_number(&mut self) -> Result<Token, ParseError> {
        let start = self.chars.peek().map(|(i, _)| *i).unwrap_or(self.src.len());
        let mut is_double = false;
        while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if matches!(self.peek_char(), Some('.')) {
            let mut ahead = self.chars.clone();
            ahead.next();
            if matches!(ahead.peek(), Some((_, c)) if c.is_ascii_digit()) {
                is_double = true;
                self.bump();
                while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        if matches!(self.peek_char(), Some('e') | Some('E')) {
            is_double = true;
            self.bump();
            if matches!(self.peek_char(), Some('+') | Some('-')) {
                self.bump();
            }
            while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        let unsigned = matches!(self.peek_char(), Some('u') | Some('U'));
        let end = self.chars.peek().map(|(i, _)| *i).unwrap_or(self.src.len());
        let text = &self.src[start..end];
        if unsigned {
            self.bump();
        }
        if is_double {
            text.parse::<f64>().map(Token::Double).map_err(|_| self.err("invalid floating point literal"))
        } else if unsigned {
            text.parse::<u64>().map(Token::Uint).map_err(|_| self.err("invalid unsigned integer literal"))
        } else {
            text.parse::<i64>().map(Token::Int).map_err(|_| self.err("invalid integer literal"))
        }
    }

    fn lex_ident_or_keyword(&mut self) -> Token {
        let start = self.chars.peek().map(|(i, _)| *i).unwrap_or(self.src.len());
        while matches!(self.peek_char(), Some(c) if is_ident_continue(c)) {
            self.bump();
        }
        let end = self.chars.peek().map(|(i, _)| *i).unwrap_or(self.src.len());
        let text = &self.src[start..end];
        match text {
            "null" => Token::Null,
            "true" => Token::True,
            "false" => Token::False,
            "in" => Token::In,
            _ => Token::Ident(text.to_string()),
        }
    }

    fn lex_string(&mut self) -> Result<Token, ParseError> {
        let s = self.lex_quoted()?;
        Ok(Token::Str(s))
    }

    fn lex_bytes(&mut self) -> Result<Token, ParseError> {
        self.bump(); // consume 'b'
        let s = self.lex_quoted()?;
        Ok(Token::Bytes(s.into_bytes()))
    }

    fn lex_quoted(&mut self) -> Result<String, ParseError> {
        let quote = match self.bump() {
            Some((_, c)) => c,
            None => return Err(self.err("unterminated string literal")),
        };
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.err("unterminated string literal")),
                Some((_, c)) if c == quote => break,
                Some((_, '\\')) => match self.bump() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, 'r')) => out.push('\r'),
                    Some((_, '\\')) => out.push('\\'),
                    Some((_, c)) if c == quote => out.push(quote),
                    Some((_, c)) => out.push(c),
                    None => return Err(self.err("unterminated escape sequence")),
                },
                Some((_, c)) => out.push(c),
            }
        }
        Ok(out)
    }

    fn lex_operator(&mut self) -> Result<Token, ParseError> {
        let (_, c) = self.bump().unwrap();
        let tok = match c {
            '.' => {
                if matches!(self.peek_char(), Some('?')) {
                    self.bump();
                    Token::QuestionDot
                } else {
                    Token::Dot
                }
            }
            ',' => Token::Comma,
            ':' => Token::Colon,
            '?' => Token::Question,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '!' => {
                if matches!(self.peek_char(), Some('=')) {
                    self.bump();
                    Token::NotEq
                } else {
                    Token::Bang
                }
            }
            '<' => {
                if matches!(self.peek_char(), Some('=')) {
                    self.bump();
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if matches!(self.peek_char(), Some('=')) {
                    self.bump();
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '=' => {
                if matches!(self.peek_char(), Some('=')) {
                    self.bump();
                    Token::EqEq
                } else {
                    return Err(self.err("unexpected '='"));
                }
            }
            '&' => {
                if matches!(self.peek_char(), Some('&')) {
                    self.bump();
                    Token::AndAnd
                } else {
                    return Err(self.err("unexpected '&'"));
                }
            }
            '|' => {
                if matches!(self.peek_char(), Some('|')) {
                    self.bump();
                    Token::OrOr
                } else {
                    return Err(self.err("unexpected '|'"));
                }
            }
            other => return Err(self.err(format!("unexpected character '{}'", other))),
        };
        Ok(tok)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

const MACRO_NAMES: &[&str] = &["all", "exists", "exists_one", "map", "filter"];

struct State<'a> {
    lexer: Lexer<'a>,
    current: Spanned,
    ids: IdGenerator,
    source_info: SourceInfo,
    options: &'a ParseOptions,
    depth: u32,
}

impl<'a> State<'a> {
    fn new(src: &'a str, options: &'a ParseOptions) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(src);
        let current = lexer.next_token()?;
        Ok(State { lexer, current, ids: IdGenerator::new(), source_info: SourceInfo::default(), options, depth: 0 })
    }

    fn advance(&mut self) -> Result<Spanned, ParseError> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn expect(&mut self, token: Token) -> Result<(), ParseError> {
        if self.current.token == token {
            self.advance()?;
            Ok(())
        } else {
            Err(ParseError {
                kind: ParseErrorKind::Syntax,
                message: format!("expected {:?}, found {:?}", token, self.current.token),
                line: self.current.line,
                col: self.current.col,
            })
        }
    }

    fn mk(&mut self, line: u32, col: u32, kind: Kind) -> Node<Expr> {
        let id = self.ids.next_id();
        self.source_info.positions.insert(id, (line, col));
        Expr::new(id, kind)
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > self.options.max_recursion_depth {
            return Err(ParseError {
                kind: ParseErrorKind::RecursionLimit,
                message: "expression nesting exceeds max_recursion_depth".to_string(),
                line: self.current.line,
                col: self.current.col,
            });
        }
        Ok(())
    }

    fn exit(&mut self) {
        self.depth -= 1;
    }

    // ternary ::= or ( '?' ternary ':' ternary )?
    fn parse_ternary(&mut self) -> Result<Node<Expr>, ParseError> {
        self.enter()?;
        let (line, col) = (self.current.line, self.current.col);
        let cond = self.parse_or()?;
        let result = if self.current.token == Token::Question {
            self.advance()?;
            let then_branch = self.parse_ternary()?;
            self.expect(Token::Colon)?;
            let else_branch = self.parse_ternary()?;
            Ok(self.mk(line, col, Kind::Call { target: None, function: "_?_:_".to_string(), args: vec![cond, then_branch, else_branch] }))
        } else {
            Ok(cond)
        };
        self.exit();
        result
    }

    fn parse_or(&mut self) -> Result<Node<Expr>, ParseError> {
        let (line, col) = (self.current.line, self.current.col);
        let mut lhs = self.parse_and()?;
        while self.current.token == Token::OrOr {
            self.advance()?;
            let rhs = self.parse_and()?;
            lhs = self.mk(line, col, Kind::Call { target: None, function: "_||_".to_string(), args: vec![lhs, rhs] });
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Node<Expr>, ParseError> {
        let (line, col) = (self.current.line, self.current.col);
        let mut lhs = self.parse_relation()?;
        while self.current.token == Token::AndAnd {
            self.advance()?;
            let rhs = self.parse_relation()?;
            lhs = self.mk(line, col, Kind::Call { target: None, function: "_&&_".to_string(), args: vec![lhs, rhs] });
        }
        Ok(lhs)
    }

    fn parse_relation(&mut self) -> Result<Node<Expr>, ParseError> {
        let (line, col) = (self.current.line, self.current.col);
        let lhs = self.parse_addition()?;
        let function = match self.current.token {
            Token::Lt => "_<_",
            Token::Le => "_<=_",
            Token::Gt => "_>_",
            Token::Ge => "_>=_",
            Token::EqEq => "_==_",
            Token::NotEq => "_!=_",
            Token::In => "@in",
            _ => return Ok(lhs),
        };
        self.advance()?;
        let rhs = self.parse_addition()?;
        Ok(self.mk(line, col, Kind::Call { target: None, function: function.to_string(), args: vec![lhs, rhs] }))
    }

    fn parse_addition(&mut self) -> Result<Node<Expr>, ParseError> {
        let (line, col) = (self.current.line, self.current.col);
        let mut lhs = self.parse_mult()?;
        loop {
            let function = match self.current.token {
                Token::Plus => "_+_",
                Token::Minus => "_-_",
                _ => break,
            };
            self.advance()?;
            let rhs = self.parse_mult()?;
            lhs = self.mk(line, col, Kind::Call { target: None, function: function.to_string(), args: vec![lhs, rhs] });
        }
        Ok(lhs)
    }

    fn parse_mult(&mut self) -> Result<Node<Expr>, ParseError> {
        let (line, col) = (self.current.line, self.current.col);
        let mut lhs = self.parse_unary()?;
        loop {
            let function = match self.current.token {
                Token::Star => "_*_",
                Token::Slash => "_/_",
                Token::Percent => "_%_",
                _ => break,
            };
            self.advance()?;
            let rhs = self.parse_unary()?;
            lhs = self.mk(line, col, Kind::Call { target: None, function: function.to_string(), args: vec![lhs, rhs] });
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Node<Expr>, ParseError> {
        let (line, col) = (self.current.line, self.current.col);
        match self.current.token {
            Token::Minus => {
                self.advance()?;
                let operand = self.parse_unary()?;
                Ok(self.mk(line, col, Kind::Call { target: None, function: "-_".to_string(), args: vec![operand] }))
            }
            Token::Bang => {
                self.advance()?;
                let operand = self.parse_unary()?;
                Ok(self.mk(line, col, Kind::Call { target: None, function: "!_".to_string(), args: vec![operand] }))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Node<Expr>, ParseError> {
        let (line, col) = (self.current.line, self.current.col);
        let mut expr = self.parse_primary()?;
        loop {
            match self.current.token {
                Token::Dot => {
                    self.advance()?;
                    expr = self.parse_field_or_call(expr, false, line, col)?;
                }
                Token::QuestionDot => {
                    self.advance()?;
                    expr = self.parse_field_or_call(expr, true, line, col)?;
                }
                Token::LBracket => {
                    self.advance()?;
                    let index = self.parse_ternary()?;
                    self.expect(Token::RBracket)?;
                    expr = self.mk(line, col, Kind::Call { target: None, function: "_[_]".to_string(), args: vec![expr, index] });
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_field_or_call(&mut self, target: Node<Expr>, optional: bool, line: u32, col: u32) -> Result<Node<Expr>, ParseError> {
        let name = match self.advance()?.token {
            Token::Ident(name) => name,
            other => {
                return Err(ParseError { kind: ParseErrorKind::Syntax, message: format!("expected field name, found {:?}", other), line, col })
            }
        };
        if self.current.token == Token::LParen {
            self.advance()?;
            let args = self.parse_call_args()?;
            if self.options.enable_macros && !optional && MACRO_NAMES.contains(&name.as_str()) {
                if let Some(node) = self.try_build_macro(&target, &name, &args, line, col)? {
                    return Ok(node);
                }
            }
            if let Kind::Ident(base) = &target.kind {
                if base == "optional" {
                    return Ok(self.mk(line, col, Kind::Call { target: None, function: format!("optional.{}", name), args }));
                }
            }
            return Ok(self.mk(line, col, Kind::Call { target: Some(target), function: name, args }));
        }
        Ok(self.mk(line, col, Kind::Select { operand: target, field: name, test_only: false, optional }))
    }

    /// Lowers `range.macro(iterVar, body)` straight to a `Comprehension` node
    /// via `comprehension.rs`. Falls back to an ordinary call (returns
    /// `Ok(None)`) when the shape doesn't match a macro invocation, so a
    /// host-registered function named e.g. `map` with a different arity
    /// still parses as a plain call.
    fn try_build_macro(&mut self, target: &Node<Expr>, name: &str, args: &[Node<Expr>], line: u32, col: u32) -> Result<Option<Node<Expr>>, ParseError> {
        let (iter_var, body) = match (name, args.len()) {
            ("exists_one", 2) | ("all", 2) | ("exists", 2) | ("map", 2) | ("filter", 2) => {
                let iter_var = match &args[0].kind {
                    Kind::Ident(n) => n.clone(),
                    _ => return Ok(None),
                };
                (iter_var, args[1].clone())
            }
            _ => return Ok(None),
        };
        let node = match name {
            "all" => comprehension::all(&mut self.ids, iter_var, target.clone(), body),
            "exists" => comprehension::exists(&mut self.ids, iter_var, target.clone(), body),
            "exists_one" => comprehension::exists_one(&mut self.ids, iter_var, target.clone(), body),
            "map" => comprehension::map(&mut self.ids, iter_var, target.clone(), body),
            "filter" => comprehension::filter(&mut self.ids, iter_var, target.clone(), body),
            _ => return Ok(None),
        };
        self.source_info.positions.insert(node.id, (line, col));
        Ok(Some(node))
    }

    fn parse_call_args(&mut self) -> Result<Vec<Node<Expr>>, ParseError> {
        let mut args = Vec::new();
        if self.current.token != Token::RParen {
            loop {
                args.push(self.parse_ternary()?);
                if self.current.token == Token::Comma {
                    self.advance()?;
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Node<Expr>, ParseError> {
        let (line, col) = (self.current.line, self.current.col);
        let tok = self.advance()?.token;
        match tok {
            Token::Null => Ok(self.mk(line, col, Kind::Const(Literal::Null))),
            Token::True => Ok(self.mk(line, col, Kind::Const(Literal::Bool(true)))),
            Token::False => Ok(self.mk(line, col, Kind::Const(Literal::Bool(false)))),
            Token::Int(v) => Ok(self.mk(line, col, Kind::Const(Literal::Int(v)))),
            Token::Uint(v) => Ok(self.mk(line, col, Kind::Const(Literal::Uint(v)))),
            Token::Double(v) => Ok(self.mk(line, col, Kind::Const(Literal::Double(v)))),
            Token::Str(s) => Ok(self.mk(line, col, Kind::Const(Literal::String(s)))),
            Token::Bytes(b) => Ok(self.mk(line, col, Kind::Const(Literal::Bytes(b)))),
            Token::Ident(name) if name == "has" && self.current.token == Token::LParen => self.parse_has_macro(line, col),
            Token::Ident(name) => Ok(self.mk(line, col, Kind::Ident(name))),
            Token::LParen => {
                let inner = self.parse_ternary()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => self.parse_list_literal(line, col),
            Token::LBrace => self.parse_map_literal(line, col),
            other => Err(ParseError { kind: ParseErrorKind::Syntax, message: format!("unexpected token {:?}", other), line, col }),
        }
    }

    /// `has(e.f)`: the function-style presence-test macro. The argument must
    /// itself be a field selection; it is rewritten in place to
    /// `test_only = true` rather than evaluated and then tested.
    fn parse_has_macro(&mut self, line: u32, col: u32) -> Result<Node<Expr>, ParseError> {
        self.advance()?; // consume '('
        let arg = self.parse_ternary()?;
        self.expect(Token::RParen)?;
        match &arg.kind {
            Kind::Select { operand, field, optional, .. } => {
                Ok(self.mk(line, col, Kind::Select { operand: operand.clone(), field: field.clone(), test_only: true, optional: *optional }))
            }
            _ => Err(ParseError { kind: ParseErrorKind::Syntax, message: "has() argument must be a field selection".to_string(), line, col }),
        }
    }

    fn parse_list_literal(&mut self, line: u32, col: u32) -> Result<Node<Expr>, ParseError> {
        let mut elems = Vec::new();
        if self.current.token != Token::RBracket {
            loop {
                let optional = if self.current.token == Token::Question {
                    self.advance()?;
                    true
                } else {
                    false
                };
                let value = self.parse_ternary()?;
                elems.push(ListElem { value, optional });
                if self.current.token == Token::Comma {
                    self.advance()?;
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RBracket)?;
        Ok(self.mk(line, col, Kind::CreateList(elems)))
    }

    fn parse_map_literal(&mut self, line: u32, col: u32) -> Result<Node<Expr>, ParseError> {
        let entries = self.parse_entries()?;
        self.expect(Token::RBrace)?;
        Ok(self.mk(line, col, Kind::CreateStruct { type_name: None, entries }))
    }

    fn parse_entries(&mut self) -> Result<Vec<Entry>, ParseError> {
        let mut entries = Vec::new();
        if self.current.token != Token::RBrace {
            loop {
                let optional = if self.current.token == Token::Question {
                    self.advance()?;
                    true
                } else {
                    false
                };
                let key = self.parse_ternary()?;
                self.expect(Token::Colon)?;
                let value = self.parse_ternary()?;
                entries.push(Entry { key, value, optional });
                if self.current.token == Token::Comma {
                    self.advance()?;
                } else {
                    break;
                }
            }
        }
        Ok(entries)
    }
}

#[derive(Default)]
pub struct CelParser;

impl Parser for CelParser {
    fn parse(&self, source: &str, options: &ParseOptions) -> Result<ParsedAst, ParseError> {
        let mut state = State::new(source, options)?;
        let root = state.parse_ternary()?;
        if state.current.token != Token::Eof {
            return Err(ParseError {
                kind: ParseErrorKind::Syntax,
                message: format!("unexpected trailing token {:?}", state.current.token),
                line: state.current.line,
                col: state.current.col,
            });
        }
        Ok(ParsedAst { root, source_info: state.source_info })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Node<Expr> {
        CelParser.parse(src, &ParseOptions::default()).unwrap().root
    }

    fn call(function: &str, args: Vec<Node<Expr>>) -> Kind {
        Kind::Call { target: None, function: function.to_string(), args }
    }

    #[test]
    fn parses_integer_literal() {
        assert_eq!(parse("42").kind, Kind::Const(Literal::Int(42)));
    }

    #[test]
    fn parses_parenthesized_literal() {
        assert_eq!(parse("(42)").kind, Kind::Const(Literal::Int(42)));
    }

    #[test]
    fn parses_identifier() {
        assert_eq!(parse("foo").kind, Kind::Ident("foo".to_string()));
    }

    #[test]
    fn respects_precedence_of_addition_and_multiplication() {
        let expr = parse("1 + 2 * 3");
        match &expr.kind {
            Kind::Call { function, args, .. } => {
                assert_eq!(function, "_+_");
                assert_eq!(args[0].kind, Kind::Const(Literal::Int(1)));
                assert_eq!(args[1].kind, call("_*_", vec![Expr::new(0, Kind::Const(Literal::Int(2))), Expr::new(0, Kind::Const(Literal::Int(3)))]));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn relational_binds_looser_than_arithmetic() {
        let expr = parse("3 + 4 < 3 * 4");
        match &expr.kind {
            Kind::Call { function, .. } => assert_eq!(function, "_<_"),
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn parses_field_select_and_index() {
        let expr = parse("a.b[0]");
        match &expr.kind {
            Kind::Call { function, args, .. } => {
                assert_eq!(function, "_[_]");
                match &args[0].kind {
                    Kind::Select { field, .. } => assert_eq!(field, "b"),
                    other => panic!("expected select, got {:?}", other),
                }
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn parses_optional_select() {
        let expr = parse("a.?b");
        match &expr.kind {
            Kind::Select { optional, test_only, .. } => {
                assert!(*optional);
                assert!(!test_only);
            }
            other => panic!("expected select, got {:?}", other),
        }
    }

    #[test]
    fn parses_has_macro_as_test_only_select() {
        let expr = parse("has(a.b)");
        match &expr.kind {
            Kind::Select { field, test_only, .. } => {
                assert_eq!(field, "b");
                assert!(*test_only);
            }
            other => panic!("expected select, got {:?}", other),
        }
    }

    #[test]
    fn parses_all_macro_into_comprehension() {
        let expr = parse("[1, 2, 3].all(x, x > 0)");
        assert!(matches!(expr.kind, Kind::Comprehension { .. }));
    }

    #[test]
    fn parses_optional_namespace_functions() {
        let expr = parse("optional.of(1)");
        match &expr.kind {
            Kind::Call { target, function, .. } => {
                assert!(target.is_none());
                assert_eq!(function, "optional.of");
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn parses_ternary_and_list_map_literals() {
        let expr = parse("true ? [1, 2] : {'a': 1}");
        match &expr.kind {
            Kind::Call { function, args, .. } => {
                assert_eq!(function, "_?_:_");
                assert!(matches!(args[1].kind, Kind::CreateList(_)));
                assert!(matches!(args[2].kind, Kind::CreateStruct { .. }));
            }
            other => panic!("expected ternary call, got {:?}", other),
        }
    }

    #[test]
    fn parses_optional_list_and_map_entries() {
        let expr = parse("[?x, 1]");
        match &expr.kind {
            Kind::CreateList(elems) => {
                assert!(elems[0].optional);
                assert!(!elems[1].optional);
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn recursion_limit_is_enforced() {
        let mut src = String::new();
        for _ in 0..200 {
            src.push_str("(");
        }
        src.push('1');
        for _ in 0..200 {
            src.push(')');
        }
        let options = ParseOptions { max_recursion_depth: 10, enable_macros: true };
        let err = CelParser.parse(&src, &options).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::RecursionLimit);
    }
}
