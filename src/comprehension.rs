//! Comprehension macro expansion (SPEC_FULL.md §4.6, §8 scenario 2).
//!
//! CEL's `all`/`exists`/`exists_one`/`map`/`filter` macros are sugar over
//! the single `Comprehension` AST kind; this module is where a parser or
//! test harness builds that expansion, grounded on the structure implied by
//! `extensions/comprehensions_v2_functions.h` and the `TraceTest` fixture in
//! `evaluator_core_test.cc` (an `all()` over a three-element list lowers to
//! exactly one `Comprehension` node with a `_&&_`-chained loop condition).

use crate::ast::{Entry, Expr, IdGenerator, Kind, ListElem, Literal, Node};

const ACCU_VAR: &str = "__result__";

fn ident(ids: &mut IdGenerator, name: impl Into<String>) -> Node<Expr> {
    Expr::new(ids.next_id(), Kind::Ident(name.into()))
}

fn lit_bool(ids: &mut IdGenerator, b: bool) -> Node<Expr> {
    Expr::new(ids.next_id(), Kind::Const(Literal::Bool(b)))
}

fn call(ids: &mut IdGenerator, function: impl Into<String>, args: Vec<Node<Expr>>) -> Node<Expr> {
    Expr::new(ids.next_id(), Kind::Call { target: None, function: function.into(), args })
}

/// `range.all(iter_var, predicate)`.
pub fn all(ids: &mut IdGenerator, iter_var: impl Into<String>, range: Node<Expr>, predicate: Node<Expr>) -> Node<Expr> {
    let iter_var = iter_var.into();
    let accu = ident(ids, ACCU_VAR);
    let loop_step = call(ids, "_&&_", vec![accu.clone(), predicate]);
    Expr::new(ids.next_id(), Kind::Comprehension {
        iter_var,
        accu_var: ACCU_VAR.to_string(),
        range,
        accu_init: lit_bool(ids, true),
        loop_cond: accu.clone(),
        loop_step,
        result: accu,
    })
}

/// `range.exists(iter_var, predicate)`.
pub fn exists(ids: &mut IdGenerator, iter_var: impl Into<String>, range: Node<Expr>, predicate: Node<Expr>) -> Node<Expr> {
    let iter_var = iter_var.into();
    let accu = ident(ids, ACCU_VAR);
    let not_accu = call(ids, "!_", vec![accu.clone()]);
    let loop_cond = not_accu;
    let loop_step = call(ids, "_||_", vec![accu.clone(), predicate]);
    Expr::new(ids.next_id(), Kind::Comprehension {
        iter_var,
        accu_var: ACCU_VAR.to_string(),
        range,
        accu_init: lit_bool(ids, false),
        loop_cond,
        loop_step,
        result: accu,
    })
}

/// `range.exists_one(iter_var, predicate)`: exactly one element matches.
pub fn exists_one(ids: &mut IdGenerator, iter_var: impl Into<String>, range: Node<Expr>, predicate: Node<Expr>) -> Node<Expr> {
    let iter_var = iter_var.into();
    let accu = ident(ids, ACCU_VAR);
    let one = Expr::new(ids.next_id(), Kind::Const(Literal::Int(1)));
    let incremented = call(ids, "_+_", vec![accu.clone(), one.clone()]);
    let loop_step = Expr::new(ids.next_id(), Kind::Call {
        target: None,
        function: "_?_:_".to_string(),
        args: vec![predicate, incremented, accu.clone()],
    });
    let accu_init = Expr::new(ids.next_id(), Kind::Const(Literal::Int(0)));
    let two = Expr::new(ids.next_id(), Kind::Const(Literal::Int(2)));
    let loop_cond = call(ids, "_<_", vec![accu.clone(), two]);
    let result = call(ids, "_==_", vec![accu, one]);
    Expr::new(ids.next_id(), Kind::Comprehension {
        iter_var,
        accu_var: ACCU_VAR.to_string(),
        range,
        accu_init,
        loop_cond,
        loop_step,
        result,
    })
}

/// `range.map(iter_var, transform)`: accumulates a new list.
pub fn map(ids: &mut IdGenerator, iter_var: impl Into<String>, range: Node<Expr>, transform: Node<Expr>) -> Node<Expr> {
    let iter_var = iter_var.into();
    let accu = ident(ids, ACCU_VAR);
    let elem = ListElem { value: transform, optional: false };
    let appended = Expr::new(ids.next_id(), Kind::Call {
        target: None,
        function: "_+_".to_string(),
        args: vec![accu.clone(), Expr::new(ids.next_id(), Kind::CreateList(vec![elem]))],
    });
    Expr::new(ids.next_id(), Kind::Comprehension {
        iter_var,
        accu_var: ACCU_VAR.to_string(),
        range,
        accu_init: Expr::new(ids.next_id(), Kind::CreateList(Vec::new())),
        loop_cond: lit_bool(ids, true),
        loop_step: appended,
        result: accu,
    })
}

/// `range.filter(iter_var, predicate)`: accumulates the elements for which
/// `predicate` holds.
pub fn filter(ids: &mut IdGenerator, iter_var: impl Into<String>, range: Node<Expr>, predicate: Node<Expr>) -> Node<Expr> {
    let iter_var_name = iter_var.into();
    let accu = ident(ids, ACCU_VAR);
    let elem_ident = ident(ids, iter_var_name.clone());
    let elem = ListElem { value: elem_ident, optional: false };
    let appended = Expr::new(ids.next_id(), Kind::Call {
        target: None,
        function: "_+_".to_string(),
        args: vec![accu.clone(), Expr::new(ids.next_id(), Kind::CreateList(vec![elem]))],
    });
    let loop_step = Expr::new(ids.next_id(), Kind::Call {
        target: None,
        function: "_?_:_".to_string(),
        args: vec![predicate, appended, accu.clone()],
    });
    Expr::new(ids.next_id(), Kind::Comprehension {
        iter_var: iter_var_name,
        accu_var: ACCU_VAR.to_string(),
        range,
        accu_init: Expr::new(ids.next_id(), Kind::CreateList(Vec::new())),
        loop_cond: lit_bool(ids, true),
        loop_step,
        result: accu,
    })
}

/// Used by `CreateStruct`'s optional-entry sugar elsewhere; kept here since
/// it shares the "macro expansion" role of this module.
pub fn optional_entry(key: Node<Expr>, value: Node<Expr>) -> Entry {
    Entry { key, value, optional: true }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;

    fn range_123(ids: &mut IdGenerator) -> Node<Expr> {
        let elems = (1..=3)
            .map(|n| ListElem { value: Expr::new(ids.next_id(), Kind::Const(Literal::Int(n))), optional: false })
            .collect();
        Expr::new(ids.next_id(), Kind::CreateList(elems))
    }

    fn gt_zero(ids: &mut IdGenerator, iter_var: &str) -> Node<Expr> {
        let x = ident(ids, iter_var);
        let zero = Expr::new(ids.next_id(), Kind::Const(Literal::Int(0)));
        call(ids, "_>_", vec![x, zero])
    }

    #[test]
    fn all_lowers_to_a_comprehension_with_true_init_and_and_step() {
        let mut ids = IdGenerator::new();
        let range = range_123(&mut ids);
        let pred = gt_zero(&mut ids, "x");
        let node = all(&mut ids, "x", range, pred);
        match &node.kind {
            Kind::Comprehension { iter_var, accu_var, accu_init, loop_step, .. } => {
                assert_eq!(iter_var, "x");
                assert_eq!(accu_var, ACCU_VAR);
                assert_eq!(accu_init.kind, Kind::Const(Literal::Bool(true)));
                assert!(matches!(&loop_step.kind, Kind::Call { function, .. } if function == "_&&_"));
            }
            other => panic!("expected Comprehension, got {:?}", other),
        }
    }

    #[test]
    fn exists_lowers_with_false_init_and_or_step() {
        let mut ids = IdGenerator::new();
        let range = range_123(&mut ids);
        let pred = gt_zero(&mut ids, "x");
        let node = exists(&mut ids, "x", range, pred);
        match &node.kind {
            Kind::Comprehension { accu_init, loop_step, loop_cond, .. } => {
                assert_eq!(accu_init.kind, Kind::Const(Literal::Bool(false)));
                assert!(matches!(&loop_step.kind, Kind::Call { function, .. } if function == "_||_"));
                assert!(matches!(&loop_cond.kind, Kind::Call { function, .. } if function == "!_"));
            }
            other => panic!("expected Comprehension, got {:?}", other),
        }
    }

    #[test]
    fn exists_one_counts_matches_and_compares_to_one() {
        let mut ids = IdGenerator::new();
        let range = range_123(&mut ids);
        let pred = gt_zero(&mut ids, "x");
        let node = exists_one(&mut ids, "x", range, pred);
        match &node.kind {
            Kind::Comprehension { accu_init, result, .. } => {
                assert_eq!(accu_init.kind, Kind::Const(Literal::Int(0)));
                assert!(matches!(&result.kind, Kind::Call { function, .. } if function == "_==_"));
            }
            other => panic!("expected Comprehension, got {:?}", other),
        }
    }

    #[test]
    fn exists_one_loop_cond_depends_on_the_accumulator_so_it_can_exit_early() {
        let mut ids = IdGenerator::new();
        let range = range_123(&mut ids);
        let pred = gt_zero(&mut ids, "x");
        let node = exists_one(&mut ids, "x", range, pred);
        match &node.kind {
            Kind::Comprehension { loop_cond, .. } => {
                assert!(matches!(&loop_cond.kind, Kind::Call { function, args, .. }
                    if function == "_<_" && matches!(&args[0].kind, Kind::Ident(name) if name == ACCU_VAR)));
            }
            other => panic!("expected Comprehension, got {:?}", other),
        }
    }

    #[test]
    fn map_accumulates_into_a_list_starting_empty() {
        let mut ids = IdGenerator::new();
        let range = range_123(&mut ids);
        let transform = gt_zero(&mut ids, "x");
        let node = map(&mut ids, "x", range, transform);
        match &node.kind {
            Kind::Comprehension { accu_init, .. } => {
                assert_eq!(accu_init.kind, Kind::CreateList(Vec::new()));
            }
            other => panic!("expected Comprehension, got {:?}", other),
        }
    }

    #[test]
    fn filter_guards_the_append_with_a_ternary() {
        let mut ids = IdGenerator::new();
        let range = range_123(&mut ids);
        let pred = gt_zero(&mut ids, "x");
        let node = filter(&mut ids, "x", range, pred);
        match &node.kind {
            Kind::Comprehension { loop_step, .. } => {
                assert!(matches!(&loop_step.kind, Kind::Call { function, .. } if function == "_?_:_"));
            }
            other => panic!("expected Comprehension, got {:?}", other),
        }
    }
}
