//! Program builder / planner (SPEC_FULL.md §4.3).
//!
//! Ported from `eval/compiler/flat_expr_builder_extensions.cc`'s
//! `Subexpression`/`ProgramBuilder`: a subexpression tree mirroring the
//! checked AST, where each subexpression is in one of three states (tree,
//! flattened, recursive) until `flatten_main` walks it with an explicit
//! stack into a single linear step vector. Per design note §9, the C++
//! version's parent/child raw pointers are replaced with arena indices into
//! `ProgramBuilder::arena`.

use std::rc::Rc;

use crate::ast::{CheckedAst, Expr, ExprId, Kind, Literal, Node};
use crate::attribute::Qualifier;
use crate::options::EvaluatorOptions;
use crate::value::Value;

pub type SubexprId = usize;

/// One compiled loop: the five sub-programs of a `Comprehension` node plus
/// the comprehension-slot indices the frame threads the iter/accu variables
/// through (SPEC_FULL.md §3.6, §4.6).
#[derive(Debug)]
pub struct CompiledLoop {
    pub node: ExprId,
    pub iter_var: Rc<String>,
    pub accu_var: Rc<String>,
    pub iter_slot: usize,
    pub accu_slot: usize,
    pub range: Vec<Step>,
    pub accu_init: Vec<Step>,
    pub loop_cond: Vec<Step>,
    pub loop_step: Vec<Step>,
    pub result: Vec<Step>,
}

/// One flattened instruction (SPEC_FULL.md §3.3).
#[derive(Debug)]
pub enum Step {
    Const(Value, ExprId),
    Ident { name: Rc<String>, node: ExprId },
    /// A reference to the active comprehension's iteration variable,
    /// resolved to its slot at plan time (§3.6, §9).
    IterVarRef(usize, ExprId),
    /// A reference to the active comprehension's accumulator variable.
    AccuVarRef(usize, ExprId),
    Select { field: Rc<String>, test_only: bool, optional: bool, node: ExprId },
    Index { node: ExprId },
    Call { has_target: bool, function: Rc<String>, argc: usize, node: ExprId },
    CreateList { optional: Rc<Vec<bool>>, node: ExprId },
    CreateStruct { type_name: Option<Rc<String>>, keys: Rc<Vec<Option<String>>>, optional: Rc<Vec<bool>>, node: ExprId },
    /// Peeks the top of stack (the already-evaluated lhs of `&&`). If
    /// short-circuiting is enabled and it is concretely `false`, jumps
    /// `offset` steps forward (past the rhs and the combine call),
    /// leaving `false` as the sole result (traced under `node`, the `&&`
    /// expression's own id, since the combine `Call` step is skipped).
    /// Otherwise falls through without tracing (the combine `Call` step
    /// traces `node` itself once it runs).
    JumpIfFalse { offset: isize, node: ExprId },
    /// Dual of `JumpIfFalse`, used for `_||_`.
    JumpIfTrue { offset: isize, node: ExprId },
    /// Pops the ternary condition. `Bool(true)` falls through into the
    /// then-branch; `Bool(false)` jumps `to_else` steps forward; anything
    /// else (error/unknown/ill-typed) is pushed back as the result, traced
    /// under `node`, and jumps `to_end` steps forward, skipping both
    /// branches.
    TernaryBranch { to_else: isize, to_end: isize, node: ExprId },
    /// Unconditional jump, used after a then-branch to skip the else-branch.
    /// Pure control flow: never an AST node, never traced.
    Jump(isize),
    Comprehension(Box<CompiledLoop>),
}

enum Element {
    Child(SubexprId),
    Step(Step),
}

enum State {
    Tree(Vec<Element>),
    Flattened(Vec<Step>),
    Recursive,
}

struct Subexpression {
    #[allow(dead_code)]
    node: ExprId,
    parent: Option<SubexprId>,
    state: State,
}

impl Subexpression {
    fn is_flattened(&self) -> bool {
        matches!(self.state, State::Flattened(_))
    }

    fn elements(&mut self) -> &mut Vec<Element> {
        match &mut self.state {
            State::Tree(v) => v,
            _ => panic!("elements() on a non-tree subexpression"),
        }
    }
}

/// Arena-indexed builder; see design note §9 ("arena-allocated nodes
/// addressed by index" in place of cyclic parent/child pointers).
pub struct ProgramBuilder {
    arena: Vec<Subexpression>,
    current: Option<SubexprId>,
    root: Option<SubexprId>,
}

impl ProgramBuilder {
    fn new() -> Self {
        ProgramBuilder { arena: Vec::new(), current: None, root: None }
    }

    fn enter(&mut self, node: ExprId) -> SubexprId {
        let id = self.arena.len();
        self.arena.push(Subexpression { node, parent: self.current, state: State::Tree(Vec::new()) });
        if let Some(parent) = self.current {
            self.arena[parent].elements().push(Element::Child(id));
        } else {
            self.root = Some(id);
        }
        self.current = Some(id);
        id
    }

    fn exit(&mut self) {
        let id = self.current.expect("exit() with no current subexpression");
        self.current = self.arena[id].parent;
    }

    fn add_step(&mut self, step: Step) {
        let id = self.current.expect("add_step() with no current subexpression");
        self.arena[id].elements().push(Element::Step(step));
    }

    fn len(&self) -> usize {
        let id = self.current.expect("len() with no current subexpression");
        match &self.arena[id].state {
            State::Tree(v) => v.len(),
            _ => panic!("len() on a non-tree subexpression"),
        }
    }

    /// Replaces the element at `index` of the *current* subexpression.
    fn patch(&mut self, index: usize, step: Step) {
        let id = self.current.expect("patch() with no current subexpression");
        self.arena[id].elements()[index] = Element::Step(step);
    }

    /// The full step count a subexpression (recursively) expands to,
    /// without mutating it.
    fn compute_size(&self, id: SubexprId) -> usize {
        match &self.arena[id].state {
            State::Flattened(steps) => steps.len(),
            State::Recursive => 1,
            State::Tree(elements) => elements
                .iter()
                .map(|e| match e {
                    Element::Child(c) => self.compute_size(*c),
                    Element::Step(_) => 1,
                })
                .sum(),
        }
    }

    /// Sums the sizes of the elements strictly between `base` and `target`
    /// (both element indices of the current subexpression), with a sign
    /// flip for backward offsets — ported from
    /// `Subexpression::CalculateOffset`.
    fn calculate_offset(&self, base: usize, target: usize) -> isize {
        let id = self.current.expect("calculate_offset() with no current subexpression");
        let elements = match &self.arena[id].state {
            State::Tree(v) => v,
            _ => panic!("calculate_offset() on a non-tree subexpression"),
        };
        let (lo, hi, sign) = if target <= base {
            (target, base, -1isize)
        } else {
            (base, target, 1isize)
        };
        let mut sum = 0usize;
        for i in (lo + 1)..hi {
            sum += match &elements[i] {
                Element::Child(c) => self.compute_size(*c),
                Element::Step(_) => 1,
            };
        }
        sign * sum as isize
    }

    /// Expands the whole tree rooted at `root` into one linear step vector,
    /// using an explicit (subexpr, resume-index) stack so the recursion
    /// depth of the *source expression* never grows the native call stack
    /// (SPEC_FULL.md §4.3).
    fn flatten_main(&mut self) -> Vec<Step> {
        let root = match self.root.take() {
            Some(r) => r,
            None => return Vec::new(),
        };
        let mut flat = Vec::new();
        let mut stack = vec![(root, 0usize)];
        while let Some((id, offset)) = stack.pop() {
            if self.arena[id].is_flattened() {
                if let State::Flattened(steps) = std::mem::replace(&mut self.arena[id].state, State::Flattened(Vec::new())) {
                    flat.extend(steps);
                }
                continue;
            }
            let size = match &self.arena[id].state {
                State::Tree(v) => v.len(),
                _ => unreachable!(),
            };
            let mut i = offset;
            let mut resumed = false;
            while i < size {
                let is_child = matches!(&self.arena[id].elements_ref()[i], Element::Child(_));
                if is_child {
                    let child = match &self.arena[id].elements_ref()[i] {
                        Element::Child(c) => *c,
                        _ => unreachable!(),
                    };
                    stack.push((id, i + 1));
                    stack.push((child, 0));
                    resumed = true;
                    break;
                } else {
                    let taken = std::mem::replace(&mut self.arena[id].elements()[i], Element::Child(usize::MAX));
                    if let Element::Step(step) = taken {
                        flat.push(step);
                    }
                    i += 1;
                }
            }
            if !resumed {
                self.arena[id].state = State::Tree(Vec::new());
            }
        }
        flat
    }
}

impl Subexpression {
    fn elements_ref(&self) -> &Vec<Element> {
        match &self.state {
            State::Tree(v) => v,
            _ => panic!("elements_ref() on a non-tree subexpression"),
        }
    }
}

/// A planned program. §4.3 describes a recursive form a whole expression
/// could collapse to as a direct step; this implementation always plans the
/// flat form (the only form every scenario in SPEC_FULL.md §8 exercises),
/// so `EvaluatorOptions` carries no recursive-collapse toggle to configure a
/// mode that does not exist.
pub struct Program {
    pub steps: Vec<Step>,
    pub root: ExprId,
    /// Total number of comprehension slots allocated across the whole
    /// program; the frame preallocates its slot array to this size.
    pub slot_count: usize,
}

/// One nested comprehension's name-to-slot binding, innermost last. Only
/// ever consulted at plan time: the AST keeps the CEL-surface variable
/// name, but an `Ident` that resolves to a comprehension variable is
/// rewritten to a slot reference here (design note §9).
#[derive(Clone)]
struct ScopeEntry {
    iter_name: Rc<String>,
    iter_slot: usize,
    accu_name: Rc<String>,
    accu_slot: usize,
}

pub struct Planner<'a> {
    options: &'a EvaluatorOptions,
    builder: ProgramBuilder,
    next_slot: usize,
    scope: Vec<ScopeEntry>,
}

impl<'a> Planner<'a> {
    pub fn new(options: &'a EvaluatorOptions) -> Self {
        Planner { options, builder: ProgramBuilder::new(), next_slot: 0, scope: Vec::new() }
    }

    pub fn plan(checked: &CheckedAst, options: &'a EvaluatorOptions) -> Program {
        let mut planner = Planner::new(options);
        let root = checked.parsed.root.id;
        planner.walk(&checked.parsed.root);
        let steps = planner.builder.flatten_main();
        Program { steps, root, slot_count: planner.next_slot }
    }

    fn alloc_slot(&mut self) -> usize {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    /// Resolves a surface identifier against the active comprehension
    /// scopes (innermost first), falling back to a plain activation
    /// lookup when it names neither an iter nor an accu variable.
    fn resolve_ident(&self, name: &str, node: ExprId) -> Step {
        for entry in self.scope.iter().rev() {
            if *entry.iter_name == *name {
                return Step::IterVarRef(entry.iter_slot, node);
            }
            if *entry.accu_name == *name {
                return Step::AccuVarRef(entry.accu_slot, node);
            }
        }
        Step::Ident { name: Rc::new(name.to_string()), node }
    }

    fn walk(&mut self, expr: &Node<Expr>) {
        self.builder.enter(expr.id);
        match &expr.kind {
            Kind::Const(lit) => self.builder.add_step(Step::Const(literal_value(lit), expr.id)),
            Kind::Ident(name) => {
                let step = self.resolve_ident(name, expr.id);
                self.builder.add_step(step);
            }
            Kind::Select { operand, field, test_only, optional } => {
                self.walk(operand);
                self.builder.add_step(Step::Select {
                    field: Rc::new(field.clone()),
                    test_only: *test_only,
                    optional: *optional,
                    node: expr.id,
                });
            }
            Kind::Call { target, function, args } => {
                self.plan_call(expr.id, target.as_ref(), function, args);
            }
            Kind::CreateList(elems) => {
                for e in elems {
                    self.walk(&e.value);
                }
                let optional = Rc::new(elems.iter().map(|e| e.optional).collect());
                self.builder.add_step(Step::CreateList { optional, node: expr.id });
            }
            Kind::CreateStruct { type_name, entries } => {
                let mut keys = Vec::with_capacity(entries.len());
                let mut optional = Vec::with_capacity(entries.len());
                for e in entries {
                    // Only plain string-literal keys are resolved at plan
                    // time (the common case: map/struct literals); a
                    // non-constant key is planned as a value step and
                    // matched at runtime by the CreateStruct step instead.
                    keys.push(const_string_key(&e.key));
                    if keys.last().unwrap().is_none() {
                        self.walk(&e.key);
                    }
                    self.walk(&e.value);
                    optional.push(e.optional);
                }
                self.builder.add_step(Step::CreateStruct {
                    type_name: type_name.clone().map(Rc::new),
                    keys: Rc::new(keys),
                    optional: Rc::new(optional),
                    node: expr.id,
                });
            }
            Kind::Comprehension { iter_var, accu_var, range, accu_init, loop_cond, loop_step, result } => {
                self.plan_comprehension(expr.id, iter_var, accu_var, range, accu_init, loop_cond, loop_step, result);
            }
        }
        self.builder.exit();
    }

    fn plan_call(&mut self, node: ExprId, target: Option<&Node<Expr>>, function: &str, args: &[Node<Expr>]) {
        match function {
            "_&&_" if self.options.short_circuiting && args.len() == 2 => {
                self.plan_and(node, &args[0], &args[1]);
                return;
            }
            "_||_" if self.options.short_circuiting && args.len() == 2 => {
                self.plan_or(node, &args[0], &args[1]);
                return;
            }
            "_?_:_" if self.options.short_circuiting && args.len() == 3 => {
                self.plan_ternary(node, &args[0], &args[1], &args[2]);
                return;
            }
            // `_[_]` extends the attribute trail like a field select (§4.8),
            // so it gets its own step rather than the generic trail-resetting
            // Call path, even though `registry.rs` also carries ordinary
            // `_[_]` overloads for hosts that dispatch it directly.
            "_[_]" if args.len() == 2 => {
                self.walk(&args[0]);
                self.walk(&args[1]);
                self.builder.add_step(Step::Index { node });
                return;
            }
            _ => {}
        }
        if let Some(t) = target {
            self.walk(t);
        }
        for a in args {
            self.walk(a);
        }
        self.builder.add_step(Step::Call {
            has_target: target.is_some(),
            function: Rc::new(function.to_string()),
            argc: args.len(),
            node,
        });
    }

    fn plan_and(&mut self, node: ExprId, lhs: &Node<Expr>, rhs: &Node<Expr>) {
        self.walk(lhs);
        let base = self.builder.len();
        self.builder.add_step(Step::JumpIfFalse { offset: 0, node });
        self.walk(rhs);
        self.builder.add_step(Step::Call { has_target: false, function: Rc::new("_&&_".to_string()), argc: 2, node });
        let target = self.builder.len();
        let offset = self.builder.calculate_offset(base, target);
        self.builder.patch(base, Step::JumpIfFalse { offset, node });
    }

    fn plan_or(&mut self, node: ExprId, lhs: &Node<Expr>, rhs: &Node<Expr>) {
        self.walk(lhs);
        let base = self.builder.len();
        self.builder.add_step(Step::JumpIfTrue { offset: 0, node });
        self.walk(rhs);
        self.builder.add_step(Step::Call { has_target: false, function: Rc::new("_||_".to_string()), argc: 2, node });
        let target = self.builder.len();
        let offset = self.builder.calculate_offset(base, target);
        self.builder.patch(base, Step::JumpIfTrue { offset, node });
    }

    fn plan_ternary(&mut self, node: ExprId, cond: &Node<Expr>, then_: &Node<Expr>, else_: &Node<Expr>) {
        self.walk(cond);
        let base = self.builder.len();
        self.builder.add_step(Step::TernaryBranch { to_else: 0, to_end: 0, node });
        self.walk(then_);
        let after_then = self.builder.len();
        self.builder.add_step(Step::Jump(0));
        let else_start = self.builder.len();
        self.walk(else_);
        let end = self.builder.len();

        let to_else = self.builder.calculate_offset(base, else_start);
        let to_end = self.builder.calculate_offset(base, end);
        self.builder.patch(base, Step::TernaryBranch { to_else, to_end, node });
        let jump_offset = self.builder.calculate_offset(after_then, end);
        self.builder.patch(after_then, Step::Jump(jump_offset));
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_comprehension(
        &mut self,
        node: ExprId,
        iter_var: &str,
        accu_var: &str,
        range: &Node<Expr>,
        accu_init: &Node<Expr>,
        loop_cond: &Node<Expr>,
        loop_step: &Node<Expr>,
        result: &Node<Expr>,
    ) {
        let iter_slot = self.alloc_slot();
        let accu_slot = self.alloc_slot();
        let iter_name = Rc::new(iter_var.to_string());
        let accu_name = Rc::new(accu_var.to_string());

        // `range`/`accu_init` are evaluated before the iter/accu variables
        // come into scope.
        let range_steps = self.plan_sub(range);
        let accu_init_steps = self.plan_sub(accu_init);

        self.scope.push(ScopeEntry {
            iter_name: iter_name.clone(),
            iter_slot,
            accu_name: accu_name.clone(),
            accu_slot,
        });
        let loop_cond_steps = self.plan_sub(loop_cond);
        let loop_step_steps = self.plan_sub(loop_step);
        let result_steps = self.plan_sub(result);
        self.scope.pop();

        let compiled = CompiledLoop {
            node,
            iter_var: iter_name,
            accu_var: accu_name,
            iter_slot,
            accu_slot,
            range: range_steps,
            accu_init: accu_init_steps,
            loop_cond: loop_cond_steps,
            loop_step: loop_step_steps,
            result: result_steps,
        };
        self.builder.add_step(Step::Comprehension(Box::new(compiled)));
    }

    /// Plans one of a comprehension's five sub-expressions as its own
    /// self-contained flat program (it never shares jump offsets with the
    /// parent program), inheriting the current identifier scope so nested
    /// references to an enclosing comprehension's iter/accu vars still
    /// resolve to their slots.
    fn plan_sub(&mut self, expr: &Node<Expr>) -> Vec<Step> {
        let mut sub = Planner {
            options: self.options,
            builder: ProgramBuilder::new(),
            next_slot: self.next_slot,
            scope: self.scope.clone(),
        };
        sub.walk(expr);
        let steps = sub.builder.flatten_main();
        self.next_slot = sub.next_slot;
        steps
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Uint(u) => Value::Uint(*u),
        Literal::Double(d) => Value::Double(*d),
        Literal::String(s) => Value::String(Rc::new(s.clone())),
        Literal::Bytes(b) => Value::Bytes(Rc::new(b.clone())),
    }
}

fn const_string_key(expr: &Node<Expr>) -> Option<String> {
    match &expr.kind {
        Kind::Const(Literal::String(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Turns a runtime list/map index into an attribute qualifier, used by the
/// `Select`/`Index` steps when extending the attribute trail (§4.8).
pub fn qualifier_for_index(v: &Value) -> Option<Qualifier> {
    match v {
        Value::Int(i) => Some(Qualifier::Index(*i)),
        Value::String(s) => Some(Qualifier::Key((**s).clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CheckedAst, Expr, IdGenerator, Kind, Literal, ParsedAst, SourceInfo};
    use std::collections::HashMap;

    fn ident(ids: &mut IdGenerator, name: &str) -> Node<Expr> {
        Expr::new(ids.next_id(), Kind::Ident(name.to_string()))
    }

    fn checked(root: Node<Expr>) -> CheckedAst {
        CheckedAst { parsed: ParsedAst { root, source_info: SourceInfo::default() }, types: HashMap::new(), issues: Vec::new() }
    }

    /// "Program size accounting" (SPEC_FULL.md §8): `ComputeSize` on a tree
    /// equals the length of the vector its flattening produces.
    #[test]
    fn compute_size_matches_flattened_length() {
        let mut b = ProgramBuilder::new();
        b.enter(1);
        b.add_step(Step::Const(Value::Int(1), 1));
        b.enter(2);
        b.add_step(Step::Const(Value::Int(2), 2));
        b.exit();
        b.add_step(Step::Const(Value::Int(3), 1));
        b.exit();
        let root = b.root.unwrap();
        let expected = b.compute_size(root);
        let flat = b.flatten_main();
        assert_eq!(flat.len(), expected);
    }

    #[test]
    fn and_plans_a_jump_that_skips_the_rhs_and_combine_on_skip() {
        let mut ids = IdGenerator::new();
        let a = ident(&mut ids, "a");
        let b = ident(&mut ids, "b");
        let call = Expr::new(ids.next_id(), Kind::Call { target: None, function: "_&&_".to_string(), args: vec![a, b] });

        let options = EvaluatorOptions::default();
        let program = Planner::plan(&checked(call), &options);

        assert_eq!(program.steps.len(), 4);
        match &program.steps[1] {
            Step::JumpIfFalse { offset, .. } => {
                // jumping from just after the JumpIfFalse step (index 2)
                // by `offset` must land exactly past the final Call step.
                let landing = (2 + offset) as usize;
                assert_eq!(landing, program.steps.len());
            }
            other => panic!("expected JumpIfFalse, got {:?}", other),
        }
        assert!(matches!(&program.steps[3], Step::Call { function, .. } if function.as_str() == "_&&_"));
    }

    #[test]
    fn ternary_plans_else_and_end_offsets() {
        let mut ids = IdGenerator::new();
        let cond = ident(&mut ids, "c");
        let then_ = Expr::new(ids.next_id(), Kind::Const(Literal::Int(1)));
        let else_ = Expr::new(ids.next_id(), Kind::Const(Literal::Int(2)));
        let call = Expr::new(ids.next_id(), Kind::Call { target: None, function: "_?_:_".to_string(), args: vec![cond, then_, else_] });

        let options = EvaluatorOptions::default();
        let program = Planner::plan(&checked(call), &options);

        // [Ident(c), TernaryBranch, Const(1), Jump, Const(2)]
        assert_eq!(program.steps.len(), 5);
        match &program.steps[1] {
            Step::TernaryBranch { to_else, to_end, .. } => {
                assert_eq!((2 + to_else) as usize, 4);
                assert_eq!((2 + to_end) as usize, 5);
            }
            other => panic!("expected TernaryBranch, got {:?}", other),
        }
        match &program.steps[3] {
            Step::Jump(offset) => assert_eq!((4 + offset) as usize, 5),
            other => panic!("expected Jump, got {:?}", other),
        }
    }

    #[test]
    fn comprehension_allocates_two_fresh_slots() {
        let mut ids = IdGenerator::new();
        let range = Expr::new(ids.next_id(), Kind::CreateList(Vec::new()));
        let accu_init = Expr::new(ids.next_id(), Kind::Const(Literal::Bool(true)));
        let loop_cond = ident(&mut ids, "__result__");
        let loop_step = ident(&mut ids, "__result__");
        let result = ident(&mut ids, "__result__");
        let comp = Expr::new(ids.next_id(), Kind::Comprehension {
            iter_var: "x".to_string(),
            accu_var: "__result__".to_string(),
            range,
            accu_init,
            loop_cond,
            loop_step,
            result,
        });

        let options = EvaluatorOptions::default();
        let program = Planner::plan(&checked(comp), &options);
        assert_eq!(program.slot_count, 2);
        assert_eq!(program.steps.len(), 1);
        assert!(matches!(&program.steps[0], Step::Comprehension(_)));
    }
}
