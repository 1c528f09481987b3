//! End-to-end pipeline tests: source text through the parser, type checker,
//! planner and evaluator, the way a host actually drives this crate.
//! Grounded on `evaluator_core_test.cc`'s whole-expression fixtures and the
//! `navicore-cem3` convention of a `tests/` directory for pipeline-level
//! coverage, keeping unit tests inline per source file.

use std::cell::Cell;
use std::rc::Rc;

use cel_engine::activation::Activation;
use cel_engine::ast::{CheckedAst, Expr, ExprId, IdGenerator, Kind, ListElem, Literal, ParsedAst, SourceInfo};
use cel_engine::comprehension;
use cel_engine::evaluator::Evaluator;
use cel_engine::options::EvaluatorOptions;
use cel_engine::parser::{CelParser, ParseOptions, Parser};
use cel_engine::planner::Planner;
use cel_engine::registry::standard_registry;
use cel_engine::trace::Listener;
use cel_engine::typechecker::{standard_type_env, RecursiveTypeChecker, TypeChecker, TypeEnv};
use cel_engine::value::{CelError, Error, Value};

fn root_activation() -> Activation {
    Activation::root(Rc::new(standard_registry()))
}

fn eval_in(source: &str, env: &TypeEnv, activation: &Activation) -> Result<Value, Error> {
    let parsed = CelParser.parse(source, &ParseOptions::default()).expect("parse");
    let checked = RecursiveTypeChecker.check(parsed, env);
    let options = EvaluatorOptions::default();
    let program = Planner::plan(&checked, &options);
    Evaluator::new(&options).evaluate(&program, activation)
}

fn eval(source: &str, activation: &Activation) -> Result<Value, Error> {
    eval_in(source, &standard_type_env(), activation)
}

#[test]
fn arithmetic_honors_precedence() {
    let activation = root_activation();
    assert_eq!(eval("1 + 2 * 3", &activation), Ok(Value::Int(7)));
}

#[test]
fn all_macro_over_a_list_of_positives_is_true() {
    let activation = root_activation();
    assert_eq!(eval("[1, 2, 3].all(x, x > 0)", &activation), Ok(Value::Bool(true)));
}

#[test]
fn all_macro_short_circuits_on_the_first_failure() {
    let activation = root_activation();
    assert_eq!(eval("[1, -2, 3].all(x, x > 0)", &activation), Ok(Value::Bool(false)));
}

/// Counts how many times a specific node id reaches the listener, to verify
/// `all()` stops evaluating its predicate once the accumulator has gone
/// false (§8 "Short-circuit respects laziness").
struct NodeHitCounter {
    node: ExprId,
    hits: Cell<usize>,
}

impl Listener for NodeHitCounter {
    fn on_value(&self, node: ExprId, _value: &Value) {
        if node == self.node {
            self.hits.set(self.hits.get() + 1);
        }
    }
}

#[test]
fn all_macro_evaluates_the_predicate_at_most_twice_for_three_elements() {
    // Built directly (bypassing the parser) so the predicate's node id is
    // known up front for the listener to key on.
    let mut ids = IdGenerator::new();
    let range = Expr::new(
        ids.next_id(),
        Kind::CreateList(
            [1, -2, 3]
                .iter()
                .map(|n| ListElem { value: Expr::new(ids.next_id(), Kind::Const(Literal::Int(*n))), optional: false })
                .collect(),
        ),
    );
    let x = Expr::new(ids.next_id(), Kind::Ident("x".to_string()));
    let zero = Expr::new(ids.next_id(), Kind::Const(Literal::Int(0)));
    let predicate = Expr::new(ids.next_id(), Kind::Call { target: None, function: "_>_".to_string(), args: vec![x, zero] });
    let predicate_id = predicate.id;
    let root = comprehension::all(&mut ids, "x", range, predicate);

    let checked = CheckedAst {
        parsed: ParsedAst { root, source_info: SourceInfo::default() },
        types: std::collections::HashMap::new(),
        issues: Vec::new(),
    };
    let options = EvaluatorOptions::default();
    let program = Planner::plan(&checked, &options);
    let activation = root_activation();
    let counter = NodeHitCounter { node: predicate_id, hits: Cell::new(0) };

    let result = Evaluator::new(&options).trace(&program, &activation, &counter);
    assert_eq!(result, Ok(Value::Bool(false)));
    assert!(counter.hits.get() <= 2, "predicate ran {} times, expected at most 2", counter.hits.get());
}

#[test]
fn optional_select_on_a_map_unwraps_a_present_field() {
    let activation = root_activation();
    assert_eq!(
        eval("{'k': 'v'}.?k", &activation),
        Ok(Value::Optional(Some(Rc::new(Value::String(Rc::new("v".to_string()))))))
    );
}

#[test]
fn optional_select_on_a_map_is_empty_for_a_missing_field() {
    let activation = root_activation();
    assert_eq!(eval("{'k': 'v'}.?missing", &activation), Ok(Value::Optional(None)));
}

#[test]
fn optional_or_prefers_the_left_when_present() {
    let activation = root_activation();
    assert_eq!(
        eval("optional.of('abc').or(optional.of('def'))", &activation),
        Ok(Value::Optional(Some(Rc::new(Value::String(Rc::new("abc".to_string()))))))
    );
}

#[test]
fn optional_or_value_unwraps_to_the_fallback_when_empty() {
    let activation = root_activation();
    assert_eq!(
        eval("optional.none().orValue('z')", &activation),
        Ok(Value::String(Rc::new("z".to_string())))
    );
}

#[test]
fn declared_unknown_short_circuits_with_and_to_concrete_false() {
    let mut activation = root_activation();
    activation.declare_unknown("a");
    assert_eq!(eval_in("a && false", &TypeEnv::new(), &activation), Ok(Value::Bool(false)));
}

#[test]
fn declared_unknown_survives_or_when_the_other_side_is_false() {
    let mut activation = root_activation();
    activation.declare_unknown("a");
    match eval_in("a || false", &TypeEnv::new(), &activation) {
        Ok(Value::Unknown(set)) => assert!(set.contains("a")),
        other => panic!("expected an unknown value, got {:?}", other),
    }
}

#[test]
fn size_adds_across_a_list_and_a_string() {
    let activation = root_activation();
    assert_eq!(eval("size([1, 2, 3]) + size('abc')", &activation), Ok(Value::Int(6)));
}

#[test]
fn division_by_zero_is_a_first_class_error_value_not_a_host_error() {
    let activation = root_activation();
    assert_eq!(eval("1 / 0", &activation), Ok(Value::error(CelError::DivideByZero)));
}

#[test]
fn an_error_dominates_a_surrounding_arithmetic_expression() {
    let activation = root_activation();
    assert_eq!(eval("1 + (1 / 0)", &activation), Ok(Value::error(CelError::DivideByZero)));
}
