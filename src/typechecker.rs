//! Minimal CEL type checker (SPEC_FULL.md §4.9, §6.2).
//!
//! Keeps the teacher's recursive-AST-walk shape (one `eval_*` method per
//! `Expr` variant, `Env<T>`-backed lexical scoping for comprehension
//! variables) but retargets it at CEL's kind set instead of the dashboard's
//! five scalar/point/lambda types, and swaps "fail on the first mismatch"
//! for "narrow what you can, fall back to `dyn`, and record an issue" —
//! this checker only needs to hand the planner *a* type per node (§2 item
//! 9: "minimal inference ... `dyn` fallback for anything it cannot narrow"),
//! not to reject an ill-typed program outright.

use std::collections::HashMap;

use crate::ast::{CheckedAst, Entry, Expr, ExprId, Kind, ListElem, Literal, Node, ParsedAst};
use crate::env::Env;

/// CEL's type lattice, richer than the bare `TypeTag` kind tag used at
/// runtime: list/map/optional carry their element types, and `Dyn` is the
/// checker's "don't know, ask the evaluator" escape hatch.
#[derive(Clone, Debug, PartialEq)]
pub enum CelType {
    Dyn,
    Null,
    Bool,
    Int,
    Uint,
    Double,
    String,
    Bytes,
    Duration,
    Timestamp,
    List(Box<CelType>),
    Map(Box<CelType>, Box<CelType>),
    Struct(String),
    Type,
    Optional(Box<CelType>),
}

impl CelType {
    fn is_numeric(&self) -> bool {
        matches!(self, CelType::Int | CelType::Uint | CelType::Double | CelType::Dyn)
    }
}

/// One function's declared signature, as supplied by the host's type
/// environment (§6.2: "function signatures"). `target: None` means a free
/// function; `Some(_)` means a receiver-style call.
#[derive(Clone, Debug)]
pub struct FunctionSignature {
    pub target: Option<CelType>,
    pub args: Vec<CelType>,
    pub result: CelType,
}

/// Diagnostic severity (§6.2: "a single issue carries severity, source
/// position, and a message").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Clone, Debug)]
pub struct TypeCheckIssue {
    pub severity: Severity,
    pub node: ExprId,
    pub message: String,
}

/// Variable names -> declared types, function names -> declared signatures
/// (§6.2 input). Variable scoping reuses the teacher's `Env<T>` chain so
/// that entering a comprehension's iter/accu scope is exactly
/// `Env::chain(&self.vars)`, the same way the teacher chained a fresh scope
/// per block.
pub struct TypeEnv {
    vars: Node<Env<CelType>>,
    functions: HashMap<String, Vec<FunctionSignature>>,
}

impl TypeEnv {
    pub fn new() -> Self {
        TypeEnv { vars: Node::new(Env::root()), functions: HashMap::new() }
    }

    pub fn declare_var(&self, name: impl Into<String>, ty: CelType) {
        self.vars.define(&name.into(), &Node::new(ty));
    }

    pub fn declare_fn(&mut self, name: impl Into<String>, sig: FunctionSignature) {
        self.functions.entry(name.into()).or_default().push(sig);
    }

    fn lookup_var(&self, name: &str) -> Option<CelType> {
        self.vars.get(&name.to_string()).map(|n| (*n).clone())
    }

    fn lookup_fns(&self, name: &str) -> &[FunctionSignature] {
        self.functions.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn chained(&self) -> TypeEnv {
        TypeEnv { vars: Node::new(Env::chain(&self.vars)), functions: HashMap::new() }
    }
}

impl Default for TypeEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Pre-populates a `TypeEnv` with signatures for the standard overload set
/// `registry::standard_registry` registers, so a host that only wants
/// sensible `dyn` fallbacks for its own functions doesn't also have to
/// redeclare `_+_`/`size`/... by hand.
pub fn standard_type_env() -> TypeEnv {
    let mut env = TypeEnv::new();
    let numeric = [CelType::Int, CelType::Uint, CelType::Double];
    for name in ["_+_", "_-_", "_*_", "_/_"] {
        for n in &numeric {
            env.declare_fn(name, FunctionSignature { target: None, args: vec![n.clone(), n.clone()], result: n.clone() });
        }
    }
    env.declare_fn("_%_", FunctionSignature { target: None, args: vec![CelType::Int, CelType::Int], result: CelType::Int });
    for name in ["_<_", "_<=_", "_>_", "_>=_", "_==_", "_!=_", "_&&_", "_||_"] {
        env.declare_fn(name, FunctionSignature { target: None, args: vec![CelType::Dyn, CelType::Dyn], result: CelType::Bool });
    }
    env.declare_fn("!_", FunctionSignature { target: None, args: vec![CelType::Bool], result: CelType::Bool });
    env.declare_fn("-_", FunctionSignature { target: None, args: vec![CelType::Dyn], result: CelType::Dyn });
    env.declare_fn("size", FunctionSignature { target: None, args: vec![CelType::Dyn], result: CelType::Int });
    env.declare_fn("type", FunctionSignature { target: None, args: vec![CelType::Dyn], result: CelType::Type });
    env
}

/// The type-checker interface the evaluator consumes (§6.2). `check` always
/// returns a `CheckedAst`, even when issues are non-empty: a checker-level
/// `Error` issue means "the planner will see `dyn` here", not "stop".
pub trait TypeChecker {
    fn check(&self, parsed: ParsedAst, env: &TypeEnv) -> CheckedAst;
}

#[derive(Default)]
pub struct RecursiveTypeChecker;

impl TypeChecker for RecursiveTypeChecker {
    fn check(&self, parsed: ParsedAst, env: &TypeEnv) -> CheckedAst {
        let mut ctx = Checker { types: HashMap::new(), issues: Vec::new() };
        let root = parsed.root.clone();
        ctx.eval(&root, env);
        CheckedAst { parsed, types: ctx.types, issues: ctx.issues }
    }
}

struct Checker {
    types: HashMap<ExprId, CelType>,
    issues: Vec<TypeCheckIssue>,
}

impl Checker {
    fn record(&mut self, node: ExprId, ty: CelType) -> CelType {
        self.types.insert(node, ty.clone());
        ty
    }

    fn issue(&mut self, node: ExprId, severity: Severity, message: impl Into<String>) {
        self.issues.push(TypeCheckIssue { severity, node, message: message.into() });
    }

    fn eval(&mut self, expr: &Node<Expr>, env: &TypeEnv) -> CelType {
        let ty = match &expr.kind {
            Kind::Const(lit) => literal_type(lit),
            Kind::Ident(name) => self.eval_ident(expr.id, name, env),
            Kind::Select { operand, field, test_only, optional } => {
                self.eval_select(expr.id, operand, field, *test_only, *optional, env)
            }
            Kind::Call { target, function, args } => self.eval_call(expr.id, target.as_ref(), function, args, env),
            Kind::CreateList(elems) => self.eval_list(elems, env),
            Kind::CreateStruct { type_name, entries } => self.eval_struct(type_name.as_deref(), entries, env),
            Kind::Comprehension { iter_var, accu_var, range, accu_init, loop_cond, loop_step, result } => {
                self.eval_comprehension(expr.id, iter_var, accu_var, range, accu_init, loop_cond, loop_step, result, env)
            }
        };
        self.record(expr.id, ty)
    }

    fn eval_ident(&mut self, node: ExprId, name: &str, env: &TypeEnv) -> CelType {
        match env.lookup_var(name) {
            Some(ty) => ty,
            None => {
                // Not every identifier a host's activation resolves is
                // predeclared (e.g. ad hoc JSON activations in the demo
                // binary); this is informational, not an error.
                self.issue(node, Severity::Warning, format!("undeclared variable '{}', assuming dyn", name));
                CelType::Dyn
            }
        }
    }

    fn eval_select(&mut self, node: ExprId, operand: &Node<Expr>, field: &str, test_only: bool, optional: bool, env: &TypeEnv) -> CelType {
        let operand_ty = self.eval(operand, env);
        if test_only {
            return CelType::Bool;
        }
        let field_ty = match &operand_ty {
            CelType::Map(_, v) => (**v).clone(),
            CelType::Struct(_) | CelType::Dyn => CelType::Dyn,
            other => {
                self.issue(node, Severity::Error, format!("'{}' is not selectable on {:?}", field, other));
                CelType::Dyn
            }
        };
        if optional { CelType::Optional(Box::new(field_ty)) } else { field_ty }
    }

    fn eval_call(&mut self, node: ExprId, target: Option<&Node<Expr>>, function: &str, args: &[Node<Expr>], env: &TypeEnv) -> CelType {
        let target_ty = target.map(|t| self.eval(t, env));
        let arg_tys: Vec<CelType> = args.iter().map(|a| self.eval(a, env)).collect();

        if function == "_?_:_" && arg_tys.len() == 3 {
            if !matches!(arg_tys[0], CelType::Bool | CelType::Dyn) {
                self.issue(node, Severity::Error, "ternary condition must be bool");
            }
            return narrow(vec![arg_tys[1].clone(), arg_tys[2].clone()]);
        }
        if (function == "_&&_" || function == "_||_") && arg_tys.len() == 2 {
            return CelType::Bool;
        }
        if function == "_[_]" && arg_tys.len() == 2 {
            return match &arg_tys[0] {
                CelType::List(elem) => (**elem).clone(),
                CelType::Map(_, v) => (**v).clone(),
                CelType::Dyn => CelType::Dyn,
                other => {
                    self.issue(node, Severity::Error, format!("cannot index into {:?}", other));
                    CelType::Dyn
                }
            };
        }

        for sig in env.lookup_fns(function) {
            let target_ok = match (&sig.target, &target_ty) {
                (None, None) => true,
                (Some(expect), Some(got)) => compatible(expect, got),
                _ => false,
            };
            if target_ok && sig.args.len() == arg_tys.len() && sig.args.iter().zip(arg_tys.iter()).all(|(e, g)| compatible(e, g)) {
                return sig.result.clone();
            }
        }
        self.issue(node, Severity::Warning, format!("no declared signature for '{}', assuming dyn", function));
        CelType::Dyn
    }

    fn eval_list(&mut self, elems: &[ListElem], env: &TypeEnv) -> CelType {
        let tys: Vec<CelType> = elems.iter().map(|e| self.eval(&e.value, env)).collect();
        CelType::List(Box::new(narrow(tys)))
    }

    fn eval_struct(&mut self, type_name: Option<&str>, entries: &[Entry], env: &TypeEnv) -> CelType {
        let mut key_tys = Vec::with_capacity(entries.len());
        let mut val_tys = Vec::with_capacity(entries.len());
        for e in entries {
            key_tys.push(self.eval(&e.key, env));
            val_tys.push(self.eval(&e.value, env));
        }
        match type_name {
            None => CelType::Map(Box::new(narrow(key_tys)), Box::new(narrow(val_tys))),
            Some(name) => CelType::Struct(name.to_string()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn eval_comprehension(
        &mut self,
        node: ExprId,
        iter_var: &str,
        accu_var: &str,
        range: &Node<Expr>,
        accu_init: &Node<Expr>,
        loop_cond: &Node<Expr>,
        loop_step: &Node<Expr>,
        result: &Node<Expr>,
        env: &TypeEnv,
    ) -> CelType {
        let range_ty = self.eval(range, env);
        let accu_ty = self.eval(accu_init, env);
        let elem_ty = match &range_ty {
            CelType::List(elem) => (**elem).clone(),
            CelType::Map(k, _) => (**k).clone(),
            CelType::Dyn => CelType::Dyn,
            other => {
                self.issue(node, Severity::Error, format!("cannot iterate over {:?}", other));
                CelType::Dyn
            }
        };
        let inner = env.chained();
        inner.declare_var(iter_var, elem_ty);
        inner.declare_var(accu_var, accu_ty);
        self.eval(loop_cond, &inner);
        self.eval(loop_step, &inner);
        self.eval(result, &inner)
    }
}

fn literal_type(lit: &Literal) -> CelType {
    match lit {
        Literal::Null => CelType::Null,
        Literal::Bool(_) => CelType::Bool,
        Literal::Int(_) => CelType::Int,
        Literal::Uint(_) => CelType::Uint,
        Literal::Double(_) => CelType::Double,
        Literal::String(_) => CelType::String,
        Literal::Bytes(_) => CelType::Bytes,
    }
}

/// Collapses a set of element/branch types to their common type, the way
/// the teacher's `TypeChecker::narrow` deduped a `Seq<TypeTag>`: identical
/// types narrow to that type, anything else (including an empty list) falls
/// back to `Dyn` rather than fabricating a union type this checker doesn't
/// model.
fn narrow(types: Vec<CelType>) -> CelType {
    let mut iter = types.into_iter();
    let first = match iter.next() {
        Some(t) => t,
        None => return CelType::Dyn,
    };
    if iter.all(|t| t == first) { first } else { CelType::Dyn }
}

fn compatible(expected: &CelType, got: &CelType) -> bool {
    if matches!(expected, CelType::Dyn) || matches!(got, CelType::Dyn) {
        return true;
    }
    if expected.is_numeric() && got.is_numeric() {
        return true;
    }
    expected == got
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{IdGenerator, ParsedAst, SourceInfo};

    fn parsed(root: Node<Expr>) -> ParsedAst {
        ParsedAst { root, source_info: SourceInfo::default() }
    }

    #[test]
    fn literal_types_are_direct() {
        let mut ids = IdGenerator::new();
        let e = Expr::new(ids.next_id(), Kind::Const(Literal::Int(42)));
        let checked = RecursiveTypeChecker.check(parsed(e.clone()), &TypeEnv::new());
        assert_eq!(checked.types[&e.id], CelType::Int);
        assert!(checked.issues.is_empty());
    }

    #[test]
    fn undeclared_ident_warns_and_falls_back_to_dyn() {
        let mut ids = IdGenerator::new();
        let e = Expr::new(ids.next_id(), Kind::Ident("x".to_string()));
        let checked = RecursiveTypeChecker.check(parsed(e.clone()), &TypeEnv::new());
        assert_eq!(checked.types[&e.id], CelType::Dyn);
        assert_eq!(checked.issues.len(), 1);
        assert_eq!(checked.issues[0].severity, Severity::Warning);
    }

    #[test]
    fn declared_ident_keeps_its_type() {
        let mut ids = IdGenerator::new();
        let e = Expr::new(ids.next_id(), Kind::Ident("x".to_string()));
        let env = TypeEnv::new();
        env.declare_var("x", CelType::Int);
        let checked = RecursiveTypeChecker.check(parsed(e.clone()), &env);
        assert_eq!(checked.types[&e.id], CelType::Int);
        assert!(checked.issues.is_empty());
    }

    #[test]
    fn list_literal_narrows_homogeneous_elements() {
        let mut ids = IdGenerator::new();
        let items = vec![
            ListElem { value: Expr::new(ids.next_id(), Kind::Const(Literal::Int(1))), optional: false },
            ListElem { value: Expr::new(ids.next_id(), Kind::Const(Literal::Int(2))), optional: false },
        ];
        let e = Expr::new(ids.next_id(), Kind::CreateList(items));
        let checked = RecursiveTypeChecker.check(parsed(e.clone()), &TypeEnv::new());
        assert_eq!(checked.types[&e.id], CelType::List(Box::new(CelType::Int)));
    }

    #[test]
    fn mixed_list_literal_falls_back_to_dyn_elem() {
        let mut ids = IdGenerator::new();
        let items = vec![
            ListElem { value: Expr::new(ids.next_id(), Kind::Const(Literal::Int(1))), optional: false },
            ListElem { value: Expr::new(ids.next_id(), Kind::Const(Literal::String("x".to_string()))), optional: false },
        ];
        let e = Expr::new(ids.next_id(), Kind::CreateList(items));
        let checked = RecursiveTypeChecker.check(parsed(e.clone()), &TypeEnv::new());
        assert_eq!(checked.types[&e.id], CelType::List(Box::new(CelType::Dyn)));
    }

    #[test]
    fn arithmetic_call_resolves_declared_signature() {
        let mut ids = IdGenerator::new();
        let lhs = Expr::new(ids.next_id(), Kind::Const(Literal::Int(1)));
        let rhs = Expr::new(ids.next_id(), Kind::Const(Literal::Int(2)));
        let call = Expr::new(ids.next_id(), Kind::Call { target: None, function: "_+_".to_string(), args: vec![lhs, rhs] });
        let checked = RecursiveTypeChecker.check(parsed(call.clone()), &standard_type_env());
        assert_eq!(checked.types[&call.id], CelType::Int);
    }

    #[test]
    fn comprehension_binds_iter_var_in_inner_scope() {
        let mut ids = IdGenerator::new();
        let range = Expr::new(
            ids.next_id(),
            Kind::CreateList(vec![ListElem { value: Expr::new(ids.next_id(), Kind::Const(Literal::Int(1))), optional: false }]),
        );
        let accu_init = Expr::new(ids.next_id(), Kind::Const(Literal::Bool(true)));
        let loop_cond = Expr::new(ids.next_id(), Kind::Ident("__result__".to_string()));
        let loop_step = Expr::new(ids.next_id(), Kind::Ident("__result__".to_string()));
        let iter_ref = Expr::new(ids.next_id(), Kind::Ident("x".to_string()));
        let comp = Expr::new(
            ids.next_id(),
            Kind::Comprehension {
                iter_var: "x".to_string(),
                accu_var: "__result__".to_string(),
                range,
                accu_init,
                loop_cond,
                loop_step,
                result: iter_ref.clone(),
            },
        );
        let checked = RecursiveTypeChecker.check(parsed(comp.clone()), &TypeEnv::new());
        assert_eq!(checked.types[&comp.id], CelType::Int);
        assert_eq!(checked.types[&iter_ref.id], CelType::Int);
    }
}
