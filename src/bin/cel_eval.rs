//! `cel-eval`: a command-line CEL evaluator (SPEC_FULL.md §2 item 13, §6).
//!
//! Replaces the teacher's `preview.rs` (render one dashboard frame to PNG)
//! with the CEL-native equivalent: parse an expression, type-check it
//! against a JSON-typed activation, plan it, evaluate it, and print the
//! result. `clap` is carried over unchanged from the teacher's CLI-parsing
//! choice.

use std::collections::BTreeMap;
use std::fs;
use std::rc::Rc;

use clap::Parser as ClapParser;

use cel_engine::activation::Activation;
use cel_engine::evaluator::Evaluator;
use cel_engine::options::EvaluatorOptions;
use cel_engine::parser::{CelParser, ParseOptions, Parser as CelParserTrait};
use cel_engine::planner::Planner;
use cel_engine::registry::standard_registry;
use cel_engine::typechecker::{standard_type_env, RecursiveTypeChecker, TypeChecker};
use cel_engine::value::{MapValue, Value};

#[derive(ClapParser)]
#[command(name = "cel-eval", about = "Evaluate a CEL expression against a JSON-object activation")]
struct Cli {
    /// The CEL expression to evaluate.
    expression: String,

    /// Path to a JSON file whose top-level object binds variable names to
    /// values. Omit for an empty activation.
    #[arg(long)]
    activation: Option<String>,
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let parsed = match CelParser.parse(&cli.expression, &ParseOptions::default()) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("parse error: {}", e);
            std::process::exit(1);
        }
    };

    let type_env = standard_type_env();
    let checked = RecursiveTypeChecker.check(parsed, &type_env);
    for issue in &checked.issues {
        eprintln!("{:?}: {}", issue.severity, issue.message);
    }

    let options = EvaluatorOptions::default();
    let program = Planner::plan(&checked, &options);

    let registry = Rc::new(standard_registry());
    let activation = Activation::root(registry);
    if let Some(path) = &cli.activation {
        let text = fs::read_to_string(path).expect("couldn't read activation file");
        let json: serde_json::Value = serde_json::from_str(&text).expect("invalid JSON in activation file");
        if let serde_json::Value::Object(map) = json {
            for (name, value) in map {
                activation.bind(name, json_to_value(&value));
            }
        }
    }

    let evaluator = Evaluator::new(&options);
    match evaluator.evaluate(&program, &activation) {
        Ok(value) => println!("{}", value),
        Err(e) => {
            eprintln!("evaluation error: {}", e);
            std::process::exit(1);
        }
    }
}

/// A minimal JSON-to-`Value` bridge for activation literals, mirroring the
/// dynamic-JSON convention `serde_json` examples use elsewhere in the pack:
/// JSON numbers become `Double` unless they parse losslessly as `i64`.
fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::String(Rc::new(s.clone())),
        serde_json::Value::Array(items) => Value::List(Rc::new(items.iter().map(json_to_value).collect())),
        serde_json::Value::Object(entries) => {
            let mut map = MapValue::new();
            let ordered: BTreeMap<&String, &serde_json::Value> = entries.iter().collect();
            for (k, v) in ordered {
                map.insert(Value::String(Rc::new(k.clone())), json_to_value(v)).expect("map key collision");
            }
            Value::Map(Rc::new(map))
        }
    }
}
