//! Abstract syntax tree for CEL expressions.
//!
//! Keeps the teacher's `Rc`-based node aliasing scheme (`Node<T>`, `Seq<T>`,
//! `Map<T>`, `AList<T>`) but replaces the dashboard-specific `Expr` variants
//! with CEL's: constants, identifiers, field selection, calls (optionally
//! with a receiver target), list/struct construction, and comprehensions.
//! Every node carries a stable id, used by the planner, the trace listener,
//! and diagnostics to refer back to source positions.

use std::collections::HashMap;
use std::rc::Rc;

// Abstract over various memory management strategies.
pub type Node<T> = Rc<T>;
pub type Seq<T> = Vec<Node<T>>;
pub type AList<T> = Vec<(String, Node<T>)>;
pub type Map<T> = HashMap<String, Node<T>>;

pub type ExprId = i64;

/// A literal constant, directly embeddable in the AST.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

/// One entry of a map/struct literal; `optional` marks entries built with
/// the `?key: value` optional-entry syntax (SPEC_FULL.md §4.2.1).
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub key: Node<Expr>,
    pub value: Node<Expr>,
    pub optional: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListElem {
    pub value: Node<Expr>,
    pub optional: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Kind {
    Const(Literal),
    Ident(String),
    /// `operand.field`. `test_only` marks the `has()` macro form, which
    /// checks presence without fetching the value. `optional` marks the
    /// `operand.?field` chaining form, which yields `optional(value)`
    /// instead of erroring when the field is absent.
    Select { operand: Node<Expr>, field: String, test_only: bool, optional: bool },
    /// A function or method call. `target` is `Some` for receiver-style
    /// calls (`a.f(b)`); every CEL operator (`_+_`, `_&&_`, `_?_:_`, `_[_]`,
    /// `@in`, ...) is modeled as a call resolved through the function
    /// registry, never as a fixed opcode.
    Call { target: Option<Node<Expr>>, function: String, args: Seq<Expr> },
    CreateList(Vec<ListElem>),
    CreateStruct { type_name: Option<String>, entries: Vec<Entry> },
    Comprehension {
        iter_var: String,
        accu_var: String,
        range: Node<Expr>,
        accu_init: Node<Expr>,
        loop_cond: Node<Expr>,
        loop_step: Node<Expr>,
        result: Node<Expr>,
    },
}

/// An AST node: a stable id plus its kind. The planner, trace listener and
/// diagnostics all key off `id`, never off structural identity — two
/// syntactically identical subexpressions at different source positions
/// get different ids.
#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub id: ExprId,
    pub kind: Kind,
}

impl Expr {
    pub fn new(id: ExprId, kind: Kind) -> Node<Expr> {
        Rc::new(Expr { id, kind })
    }
}

/// Maps node ids back to source positions for diagnostics (§6.1
/// "source-info map").
#[derive(Clone, Debug, Default)]
pub struct SourceInfo {
    pub positions: HashMap<ExprId, (u32, u32)>,
}

#[derive(Clone, Debug)]
pub struct ParsedAst {
    pub root: Node<Expr>,
    pub source_info: SourceInfo,
}

/// A checked AST: every node id has an inferred type plus the checker's
/// issue list (§6.2).
#[derive(Clone, Debug)]
pub struct CheckedAst {
    pub parsed: ParsedAst,
    pub types: HashMap<ExprId, crate::typechecker::CelType>,
    pub issues: Vec<crate::typechecker::TypeCheckIssue>,
}

#[derive(Default)]
pub struct IdGenerator {
    next: ExprId,
}

impl IdGenerator {
    pub fn new() -> Self {
        IdGenerator { next: 0 }
    }

    pub fn next_id(&mut self) -> ExprId {
        self.next += 1;
        self.next
    }
}
