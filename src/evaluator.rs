//! Step-interpretation loop (SPEC_FULL.md §4.5).
//!
//! Ties `Program` (planner.rs), `Frame` (frame.rs), `Activation`/
//! `FunctionRegistry` (activation.rs/registry.rs) and `Listener` (trace.rs)
//! together, generalized from the teacher's `VM::run` dispatch loop: fetch
//! the step at the instruction pointer, advance, execute, repeat until the
//! step vector is exhausted. The "recursive mode" half of §4.5 is not
//! implemented — see `planner::Program`'s doc comment — so this module only
//! ever drives the flat step-vector form.

use std::rc::Rc;
use std::sync::Arc;

use crate::activation::{Activation, Resolution};
use crate::attribute::{AttributeTrail, Qualifier};
use crate::descriptor::{FieldDescriptor, SimpleDescriptor, StructValue};
use crate::frame::Frame;
use crate::options::EvaluatorOptions;
use crate::planner::{CompiledLoop, Program, Step};
use crate::trace::{Listener, NullListener};
use crate::value::{CelError, Error, MapValue, Result, Value};

pub struct Evaluator<'a> {
    options: &'a EvaluatorOptions,
}

impl<'a> Evaluator<'a> {
    pub fn new(options: &'a EvaluatorOptions) -> Self {
        Evaluator { options }
    }

    /// §6.4 `evaluate(program, activation, arena) -> Value`. There is no
    /// separate arena parameter here: this crate's struct/message model
    /// (descriptor.rs) needs no bump allocator, since decoding real
    /// protobuf messages is out of scope (§1, §6.6).
    pub fn evaluate(&self, program: &Program, activation: &Activation) -> Result<Value> {
        self.run(program, activation, &NullListener)
    }

    /// §6.4 `trace(program, activation, arena, listener) -> Value`.
    pub fn trace(&self, program: &Program, activation: &Activation, listener: &dyn Listener) -> Result<Value> {
        self.run(program, activation, listener)
    }

    fn run(&self, program: &Program, activation: &Activation, listener: &dyn Listener) -> Result<Value> {
        let mut frame = Frame::new(activation, self.options, program.slot_count);
        exec_steps(&mut frame, &program.steps, listener)?;
        frame.finish()
    }
}

/// Drives one flat step vector against `frame` to completion. Used both for
/// the top-level program and, recursively, for a comprehension's five
/// sub-programs (each its own self-contained step vector, per planner.rs).
fn exec_steps(frame: &mut Frame, steps: &[Step], listener: &dyn Listener) -> Result<()> {
    let mut pc: isize = 0;
    while (pc as usize) < steps.len() {
        pc = exec_step(frame, &steps[pc as usize], pc, listener)?;
    }
    Ok(())
}

/// Runs `steps` as an isolated sub-program: saves the current stack depth,
/// executes, then pops exactly the one value it must have produced.
fn run_sub(frame: &mut Frame, steps: &[Step], listener: &dyn Listener) -> Result<(Value, AttributeTrail)> {
    let depth_before = frame.len();
    exec_steps(frame, steps, listener)?;
    if frame.len() != depth_before + 1 {
        return Err(Error::StackUnderflow);
    }
    Ok(frame.pop(1)?.pop().unwrap())
}

fn trace_push(frame: &mut Frame, node: crate::ast::ExprId, value: Value, trail: AttributeTrail, listener: &dyn Listener) -> Result<()> {
    if !matches!(value, Value::Opaque(_)) {
        listener.on_value(node, &value);
    }
    frame.push(value, trail)
}

/// Executes a single step, returning the program counter to resume at.
/// `pc` is the index of `step` itself; non-jump steps simply continue at
/// `pc + 1`.
fn exec_step(frame: &mut Frame, step: &Step, pc: isize, listener: &dyn Listener) -> Result<isize> {
    match step {
        Step::Const(v, node) => {
            trace_push(frame, *node, v.clone(), AttributeTrail::empty(), listener)?;
            Ok(pc + 1)
        }

        Step::Ident { name, node } => {
            let (value, trail) = match frame.activation.resolve(name, frame.options.enable_missing_attribute_errors) {
                Resolution::Value(v) => (v, AttributeTrail::rooted((**name).clone())),
                Resolution::Unknown => (Value::unknown_of((**name).clone()), AttributeTrail::rooted((**name).clone())),
                Resolution::Missing => (Value::error(CelError::MissingAttribute((**name).clone())), AttributeTrail::empty()),
            };
            trace_push(frame, *node, value, trail, listener)?;
            Ok(pc + 1)
        }

        Step::IterVarRef(slot, node) => {
            let (value, trail) = frame.get_slot(*slot)?;
            trace_push(frame, *node, value, trail, listener)?;
            Ok(pc + 1)
        }

        Step::AccuVarRef(slot, node) => {
            let (value, trail) = frame.get_slot(*slot)?;
            trace_push(frame, *node, value, trail, listener)?;
            Ok(pc + 1)
        }

        Step::Select { field, test_only, optional, node } => {
            let (operand, trail) = frame.pop(1)?.pop().unwrap();
            let (value, out_trail) = exec_select(frame, &operand, &trail, field, *test_only, *optional)?;
            trace_push(frame, *node, value, out_trail, listener)?;
            Ok(pc + 1)
        }

        Step::Index { node } => {
            let mut popped = frame.pop(2)?.into_iter();
            let (operand, trail) = popped.next().unwrap();
            let (index, _) = popped.next().unwrap();
            let (value, out_trail) = exec_index(frame, &operand, &trail, &index)?;
            trace_push(frame, *node, value, out_trail, listener)?;
            Ok(pc + 1)
        }

        Step::Call { has_target, function, argc, node } => {
            let total = argc + if *has_target { 1 } else { 0 };
            let mut popped = frame.pop(total)?.into_iter().map(|(v, _)| v);
            let target = if *has_target { Some(popped.next().unwrap()) } else { None };
            let args: Vec<Value> = popped.collect();
            let result = frame.activation.registry().dispatch(function, target.as_ref(), &args);
            trace_push(frame, *node, result, AttributeTrail::empty(), listener)?;
            Ok(pc + 1)
        }

        Step::CreateList { optional, node } => {
            let elems = frame.pop(optional.len())?;
            let values: Vec<Value> = elems.into_iter().map(|(v, _)| v).collect();
            let result = build_list(&values, optional);
            trace_push(frame, *node, result, AttributeTrail::empty(), listener)?;
            Ok(pc + 1)
        }

        Step::CreateStruct { type_name, keys, optional, node } => {
            let dynamic_count = keys.iter().filter(|k| k.is_none()).count();
            let popped = frame.pop(dynamic_count + keys.len())?;
            let type_name_str = type_name.as_ref().map(|s| s.as_str());
            let result = build_struct(type_name_str, keys, optional, popped)?;
            trace_push(frame, *node, result, AttributeTrail::empty(), listener)?;
            Ok(pc + 1)
        }

        Step::JumpIfFalse { offset, node } => {
            let (v, _) = frame.peek()?.clone();
            if let Value::Bool(false) = v {
                frame.pop(1)?;
                trace_push(frame, *node, Value::Bool(false), AttributeTrail::empty(), listener)?;
                Ok(pc + 1 + offset)
            } else {
                Ok(pc + 1)
            }
        }

        Step::JumpIfTrue { offset, node } => {
            let (v, _) = frame.peek()?.clone();
            if let Value::Bool(true) = v {
                frame.pop(1)?;
                trace_push(frame, *node, Value::Bool(true), AttributeTrail::empty(), listener)?;
                Ok(pc + 1 + offset)
            } else {
                Ok(pc + 1)
            }
        }

        Step::TernaryBranch { to_else, to_end, node } => {
            let (cond, _) = frame.pop(1)?.pop().unwrap();
            match cond {
                Value::Bool(true) => Ok(pc + 1),
                Value::Bool(false) => Ok(pc + 1 + to_else),
                other => {
                    trace_push(frame, *node, other, AttributeTrail::empty(), listener)?;
                    Ok(pc + 1 + to_end)
                }
            }
        }

        Step::Jump(offset) => Ok(pc + 1 + offset),

        Step::Comprehension(compiled) => {
            run_comprehension(frame, compiled, listener)?;
            Ok(pc + 1)
        }
    }
}

fn exec_select(frame: &mut Frame, operand: &Value, trail: &AttributeTrail, field: &str, test_only: bool, optional: bool) -> Result<(Value, AttributeTrail)> {
    if operand.is_error() || operand.is_unknown() {
        return Ok((operand.clone(), AttributeTrail::empty()));
    }
    // `.?field` chaining on the result of an earlier optional select: unwrap
    // a present value and keep going, short-circuit on an absent one.
    if let Value::Optional(inner) = operand {
        if !optional {
            return Ok((Value::error(CelError::BadCast { from: operand.kind(), to: operand.kind() }), AttributeTrail::empty()));
        }
        return match inner {
            None => Ok((Value::Optional(None), AttributeTrail::empty())),
            Some(v) => exec_select(frame, v, trail, field, test_only, optional),
        };
    }

    let extended = trail.step(Qualifier::Field(field.to_string()));
    if matches!(frame.options.unknown_processing, crate::options::UnknownProcessing::AttributeOnly | crate::options::UnknownProcessing::AttributeAndFunction)
        && !extended.is_empty()
        && frame.activation.is_unknown_attribute(&extended.attribute().unwrap().render())
    {
        return Ok((Value::unknown_of(extended.attribute().unwrap().render()), extended));
    }

    let found = match operand {
        Value::Struct(s) => s.get(field),
        Value::Map(m) => m.get(&Value::String(Rc::new(field.to_string()))).cloned(),
        _ => return Ok((Value::error(CelError::NoMatchingOverload("_.field".into())), AttributeTrail::empty())),
    };

    if test_only {
        return Ok((Value::Bool(found.is_some()), AttributeTrail::empty()));
    }
    match found {
        Some(v) if optional => Ok((Value::Optional(Some(Rc::new(v))), AttributeTrail::empty())),
        Some(v) => Ok((v, extended)),
        None if optional => Ok((Value::Optional(None), AttributeTrail::empty())),
        None => Ok((Value::error(CelError::FieldNotFound(field.to_string())), AttributeTrail::empty())),
    }
}

fn exec_index(frame: &mut Frame, operand: &Value, trail: &AttributeTrail, index: &Value) -> Result<(Value, AttributeTrail)> {
    if operand.is_error() || operand.is_unknown() {
        return Ok((operand.clone(), AttributeTrail::empty()));
    }
    if index.is_error() || index.is_unknown() {
        return Ok((index.clone(), AttributeTrail::empty()));
    }
    let qualifier = crate::planner::qualifier_for_index(index);
    let extended = match &qualifier {
        Some(q) => trail.step(q.clone()),
        None => AttributeTrail::empty(),
    };
    if matches!(frame.options.unknown_processing, crate::options::UnknownProcessing::AttributeOnly | crate::options::UnknownProcessing::AttributeAndFunction)
        && !extended.is_empty()
        && frame.activation.is_unknown_attribute(&extended.attribute().unwrap().render())
    {
        return Ok((Value::unknown_of(extended.attribute().unwrap().render()), extended));
    }
    let result = frame.activation.registry().dispatch("_[_]", None, &[operand.clone(), index.clone()]);
    Ok((result, extended))
}

/// Builds a list literal, honoring `?e` optional elements (present values
/// unwrap in, absent ones are omitted) and error/unknown dominance across
/// every element (§4.7: "all other operators").
fn build_list(values: &[Value], optional: &[bool]) -> Value {
    if let Some(dominant) = dominance(values.iter()) {
        return dominant;
    }
    let mut out = Vec::with_capacity(values.len());
    for (v, opt) in values.iter().zip(optional.iter()) {
        if *opt {
            match v {
                Value::Optional(Some(inner)) => out.push((**inner).clone()),
                Value::Optional(None) => {}
                other => return Value::error(CelError::BadCast { from: other.kind(), to: other.kind() }),
            }
        } else {
            out.push(v.clone());
        }
    }
    Value::List(Rc::new(out))
}

fn build_struct(type_name: Option<&str>, keys: &[Option<String>], optional: &[bool], popped: Vec<(Value, AttributeTrail)>) -> Result<Value> {
    let values: Vec<Value> = popped.into_iter().map(|(v, _)| v).collect();
    if let Some(dominant) = dominance(values.iter()) {
        return Ok(dominant);
    }
    let mut cursor = 0usize;
    let mut entries: Vec<(Value, Value, bool)> = Vec::with_capacity(keys.len());
    for (i, key_slot) in keys.iter().enumerate() {
        let key = match key_slot {
            Some(s) => Value::String(Rc::new(s.clone())),
            None => {
                let k = values[cursor].clone();
                cursor += 1;
                k
            }
        };
        let value = values[cursor].clone();
        cursor += 1;
        entries.push((key, value, optional[i]));
    }

    match type_name {
        None => {
            let mut map = MapValue::new();
            for (key, value, opt) in entries {
                if opt {
                    match value {
                        Value::Optional(Some(inner)) => map.insert(key, (*inner).clone())?,
                        Value::Optional(None) => {}
                        other => return Ok(Value::error(CelError::BadCast { from: other.kind(), to: other.kind() })),
                    }
                } else {
                    map.insert(key, value)?;
                }
            }
            Ok(Value::Map(Rc::new(map)))
        }
        Some(name) => {
            let mut fields = std::collections::HashMap::new();
            let mut field_descs = Vec::with_capacity(entries.len());
            for (key, value, opt) in entries {
                let field_name = match &key {
                    Value::String(s) => (**s).clone(),
                    other => return Ok(Value::error(CelError::BadKeyType(other.kind()))),
                };
                let resolved = if opt {
                    match value {
                        Value::Optional(Some(inner)) => Some((*inner).clone()),
                        Value::Optional(None) => None,
                        other => return Ok(Value::error(CelError::BadCast { from: other.kind(), to: other.kind() })),
                    }
                } else {
                    Some(value)
                };
                if let Some(v) = resolved {
                    field_descs.push(FieldDescriptor { name: field_name.clone(), number: 0, default: Value::Null });
                    fields.insert(field_name, v);
                }
            }
            let descriptor: Arc<dyn crate::descriptor::Descriptor + Send + Sync> =
                Arc::new(SimpleDescriptor { type_name: name.to_string(), fields: field_descs });
            Ok(Value::Struct(Rc::new(StructValue { descriptor, fields })))
        }
    }
}

/// First matching error wins; unknowns (when no error is present) merge
/// into their union — the shared rule for every operator other than
/// `_&&_`/`_||_`/`_?_:_` (§4.7), used here for list/struct construction and
/// comprehension range evaluation, none of which are short-circuiting.
fn dominance<'a>(values: impl Iterator<Item = &'a Value>) -> Option<Value> {
    let values: Vec<&Value> = values.collect();
    for v in &values {
        if v.is_error() {
            return Some((*v).clone());
        }
    }
    let mut merged: Option<std::collections::BTreeSet<String>> = None;
    for v in &values {
        if let Value::Unknown(set) = v {
            merged = Some(match merged {
                None => (**set).clone(),
                Some(mut acc) => {
                    acc.extend(set.iter().cloned());
                    acc
                }
            });
        }
    }
    merged.map(|set| Value::Unknown(Rc::new(set)))
}

/// Renders a map key for an attribute qualifier: unquoted for strings
/// (`k`, not `"k"`), `Display` for everything else.
fn key_label(v: &Value) -> String {
    match v {
        Value::String(s) => (**s).clone(),
        other => other.to_string(),
    }
}

/// Runs a comprehension's five sub-programs against the iteration sequence
/// produced by `range` (§4.6): evaluate range, evaluate accu-init, push an
/// iter-frame, loop while `loop_cond` holds (charging the iteration budget
/// once per entry), then evaluate `result` and pop the iter-frame.
fn run_comprehension(frame: &mut Frame, compiled: &CompiledLoop, listener: &dyn Listener) -> Result<()> {
    let (range_value, range_trail) = run_sub(frame, &compiled.range, listener)?;
    if range_value.is_error() || range_value.is_unknown() {
        frame.push_value(range_value)?;
        return Ok(());
    }

    let items: Vec<(Value, Qualifier)> = match &range_value {
        Value::List(l) => l.iter().cloned().enumerate().map(|(i, v)| (v, Qualifier::Index(i as i64))).collect(),
        Value::Map(m) => m.iter().map(|(k, _)| (k.clone(), Qualifier::Key(key_label(k)))).collect(),
        other => {
            frame.push_value(Value::error(CelError::NoMatchingOverload(format!("@iterable on {:?}", other.kind()))))?;
            return Ok(());
        }
    };

    let (accu_value, accu_trail) = run_sub(frame, &compiled.accu_init, listener)?;
    if accu_value.is_error() || accu_value.is_unknown() {
        frame.push_value(accu_value)?;
        return Ok(());
    }
    frame.set_slot(compiled.accu_slot, accu_value, accu_trail)?;

    frame.push_iter_frame(compiled.iter_slot, compiled.accu_slot);
    let mut short_circuit: Option<Value> = None;
    for (item, qualifier) in items {
        frame.tick_iteration_budget()?;
        let item_trail = range_trail.step(qualifier);
        frame.set_slot(compiled.iter_slot, item, item_trail)?;

        let (cond, _) = run_sub(frame, &compiled.loop_cond, listener)?;
        match cond {
            Value::Bool(true) => {}
            Value::Bool(false) => break,
            other => {
                short_circuit = Some(other);
                break;
            }
        }

        let (next_accu, _) = run_sub(frame, &compiled.loop_step, listener)?;
        frame.set_slot(compiled.accu_slot, next_accu, AttributeTrail::empty())?;
    }

    let result = match short_circuit {
        Some(v) => v,
        None => run_sub(frame, &compiled.result, listener)?.0,
    };
    frame.clear_slot(compiled.iter_slot)?;
    frame.clear_slot(compiled.accu_slot)?;
    frame.pop_iter_frame()?;
    frame.push_value(result)?;
    Ok(())
}
