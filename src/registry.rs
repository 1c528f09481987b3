//! Function registry with overload dispatch (SPEC_FULL.md §4.2, §4.2.1).
//!
//! Where the teacher's VM dispatches on a fixed `Opcode` tag via a `match`,
//! CEL calls are open and name-keyed: every operator (`_+_`, `_&&_`, ...) is
//! just another registered function. This module generalizes that "dispatch
//! on a tag, whitelist falls through to a typed error" idiom from a closed
//! opcode switch into an open, per-name overload table.

use std::collections::HashMap;
use std::rc::Rc;

use regex::Regex;

use crate::value::{CelError, MapValue, TypeTag, Value, NANOS_PER_SEC};

/// An argument-kind pattern for one overload. `Any` matches every kind,
/// including Optional/Error/Unknown (dominance is handled by the caller
/// before dispatch ever sees those, per §4.7).
#[derive(Clone, Debug)]
pub enum ArgKind {
    Any,
    Kind(TypeTag),
    Optional,
}

impl ArgKind {
    fn matches(&self, v: &Value) -> bool {
        match self {
            ArgKind::Any => true,
            ArgKind::Optional => matches!(v, Value::Optional(_)),
            ArgKind::Kind(t) => v.kind() == *t && !matches!(v, Value::Optional(_) | Value::Error(_) | Value::Unknown(_)),
        }
    }
}

/// First matching error wins; unknowns (when no error is present) are
/// merged into their union (§4.7 "Unknown dominance", §8 testable property).
fn dominance(target: Option<&Value>, args: &[Value]) -> Option<Value> {
    let all = target.into_iter().chain(args.iter());
    for v in all.clone() {
        if v.is_error() {
            return Some(v.clone());
        }
    }
    let mut merged: Option<std::collections::BTreeSet<String>> = None;
    for v in all {
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

pub type OverloadFn = Rc<dyn Fn(Option<&Value>, &[Value]) -> Value>;

pub struct Overload {
    pub id: String,
    pub target: Option<ArgKind>,
    pub args: Vec<ArgKind>,
    pub body: OverloadFn,
}

#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Vec<Overload>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registration is additive and first-match-wins: if two overloads of
    /// the same name both match a call's dynamic argument kinds, the one
    /// registered first is used. This tie-break is stable and user-visible
    /// (§4.2).
    pub fn register(&mut self, name: impl Into<String>, overload: Overload) {
        self.functions.entry(name.into()).or_default().push(overload);
    }

    pub fn find_overloads(&self, name: &str) -> &[Overload] {
        self.functions.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Dispatches a call. Returns a CEL `Error` value (never a host fault)
    /// when no overload's argument-kind pattern matches — "no matching
    /// overload" is a first-class CEL error, not an engine bug.
    ///
    /// Error/unknown dominance (SPEC_FULL.md §4.7) is enforced here, once,
    /// for every function except the short-circuiting trio: those three
    /// have their own dominance rules (a value's own truthiness can
    /// override the presence of an error/unknown on the other side) and
    /// are registered with an `ArgKind::Any` condition/operand slot so an
    /// error or unknown condition reaches the body (which short-circuits to
    /// itself) instead of falling through to "no matching overload".
    pub fn dispatch(&self, name: &str, target: Option<&Value>, args: &[Value]) -> Value {
        if !matches!(name, "_&&_" | "_||_" | "_?_:_") {
            if let Some(dominant) = dominance(target, args) {
                return dominant;
            }
        }
        for overload in self.find_overloads(name) {
            let target_ok = match (&overload.target, target) {
                (None, None) => true,
                (Some(k), Some(v)) => k.matches(v),
                _ => false,
            };
            if !target_ok || overload.args.len() != args.len() {
                continue;
            }
            if overload.args.iter().zip(args.iter()).all(|(k, v)| k.matches(v)) {
                return (overload.body)(target, args);
            }
        }
        Value::error(CelError::NoMatchingOverload(name.to_string()))
    }
}

/// Builds a registry pre-populated with the standard overload set described
/// in SPEC_FULL.md §4.2.1: arithmetic, comparisons, `size`, string
/// functions, type conversions, `type()`, list/map indexing + `in`, and the
/// `optional_type` extension family.
pub fn standard_registry() -> FunctionRegistry {
    let mut r = FunctionRegistry::new();

    macro_rules! arith {
        ($name:expr, $method:ident) => {
            r.register($name, Overload {
                id: format!("{}_num", $name),
                target: None,
                args: vec![ArgKind::Any, ArgKind::Any],
                body: Rc::new(|_t, a| {
                    a[0].$method(&a[1]).unwrap_or_else(|e| Value::error(e.into()))
                }),
            });
        };
    }
    arith!("_+_", add);
    arith!("_-_", sub);
    arith!("_*_", mul);
    arith!("_/_", div);
    arith!("_%_", modulo);

    // `_&&_`/`_||_` implement the full truth table themselves (§4.7):
    // falsy/truthy dominance can override an error/unknown on the other
    // side, so these bypass the generic dominance pre-check in `dispatch`.
    r.register("_&&_", Overload {
        id: "logical_and".into(), target: None, args: vec![ArgKind::Any, ArgKind::Any],
        body: Rc::new(|_t, a| logical_combine(&a[0], &a[1], false)),
    });
    r.register("_||_", Overload {
        id: "logical_or".into(), target: None, args: vec![ArgKind::Any, ArgKind::Any],
        body: Rc::new(|_t, a| logical_combine(&a[0], &a[1], true)),
    });

    r.register("-_", Overload {
        id: "neg".into(), target: None, args: vec![ArgKind::Any],
        body: Rc::new(|_t, a| a[0].neg().unwrap_or_else(|e| Value::error(e.into()))),
    });
    r.register("!_", Overload {
        id: "not".into(), target: None, args: vec![ArgKind::Any],
        body: Rc::new(|_t, a| a[0].not().unwrap_or_else(|e| Value::error(e.into()))),
    });

    macro_rules! cmp {
        ($name:expr, $op:expr) => {
            r.register($name, Overload {
                id: format!("cmp{}", $name), target: None,
                args: vec![ArgKind::Any, ArgKind::Any],
                body: Rc::new(move |_t, a| {
                    match a[0].cel_cmp(&a[1]) {
                        Some(ord) => Value::Bool($op(ord)),
                        None => Value::error(CelError::NoMatchingOverload($name.to_string())),
                    }
                }),
            });
        };
    }
    cmp!("_<_", |o: std::cmp::Ordering| o.is_lt());
    cmp!("_<=_", |o: std::cmp::Ordering| o.is_le());
    cmp!("_>_", |o: std::cmp::Ordering| o.is_gt());
    cmp!("_>=_", |o: std::cmp::Ordering| o.is_ge());

    r.register("_==_", Overload {
        id: "eq".into(), target: None, args: vec![ArgKind::Any, ArgKind::Any],
        body: Rc::new(|_t, a| Value::Bool(a[0].cel_eq(&a[1]).unwrap_or(false))),
    });
    r.register("_!=_", Overload {
        id: "ne".into(), target: None, args: vec![ArgKind::Any, ArgKind::Any],
        body: Rc::new(|_t, a| Value::Bool(!a[0].cel_eq(&a[1]).unwrap_or(true))),
    });

    r.register("size", Overload {
        id: "size".into(), target: None, args: vec![ArgKind::Any],
        body: Rc::new(|_t, a| a[0].size().map(Value::Int).unwrap_or_else(|e| Value::error(e.into()))),
    });

    r.register("contains", Overload {
        id: "str_contains".into(), target: Some(ArgKind::Kind(TypeTag::String)),
        args: vec![ArgKind::Kind(TypeTag::String)],
        body: Rc::new(|t, a| match (t_string(t.unwrap()), t_string(&a[0])) {
            (Some(s), Some(sub)) => Value::Bool(s.contains(sub.as_str())),
            _ => Value::error(CelError::NoMatchingOverload("contains".into())),
        }),
    });
    r.register("startsWith", Overload {
        id: "str_starts_with".into(), target: Some(ArgKind::Kind(TypeTag::String)),
        args: vec![ArgKind::Kind(TypeTag::String)],
        body: Rc::new(|t, a| match (t_string(t.unwrap()), t_string(&a[0])) {
            (Some(s), Some(p)) => Value::Bool(s.starts_with(p.as_str())),
            _ => Value::error(CelError::NoMatchingOverload("startsWith".into())),
        }),
    });
    r.register("endsWith", Overload {
        id: "str_ends_with".into(), target: Some(ArgKind::Kind(TypeTag::String)),
        args: vec![ArgKind::Kind(TypeTag::String)],
        body: Rc::new(|t, a| match (t_string(t.unwrap()), t_string(&a[0])) {
            (Some(s), Some(p)) => Value::Bool(s.ends_with(p.as_str())),
            _ => Value::error(CelError::NoMatchingOverload("endsWith".into())),
        }),
    });
    r.register("matches", Overload {
        id: "str_matches".into(), target: Some(ArgKind::Kind(TypeTag::String)),
        args: vec![ArgKind::Kind(TypeTag::String)],
        body: Rc::new(|t, a| match (t_string(t.unwrap()), t_string(&a[0])) {
            (Some(s), Some(pattern)) => match Regex::new(&pattern) {
                Ok(re) => Value::Bool(re.is_match(&s)),
                Err(e) => Value::error(CelError::RegexCompile(e.to_string())),
            },
            _ => Value::error(CelError::NoMatchingOverload("matches".into())),
        }),
    });

    r.register("int", Overload {
        id: "to_int".into(), target: None, args: vec![ArgKind::Any],
        body: Rc::new(|_t, a| match &a[0] {
            Value::Int(i) => Value::Int(*i),
            Value::Uint(u) => Value::Int(*u as i64),
            Value::Double(d) => Value::Int(*d as i64),
            Value::Bool(b) => Value::Int(*b as i64),
            Value::String(s) => s.parse().map(Value::Int).unwrap_or_else(|_| Value::error(CelError::BadCast { from: TypeTag::String, to: TypeTag::Int })),
            v => Value::error(CelError::BadCast { from: v.kind(), to: TypeTag::Int }),
        }),
    });
    r.register("double", Overload {
        id: "to_double".into(), target: None, args: vec![ArgKind::Any],
        body: Rc::new(|_t, a| match &a[0] {
            Value::Int(i) => Value::Double(*i as f64),
            Value::Uint(u) => Value::Double(*u as f64),
            Value::Double(d) => Value::Double(*d),
            Value::String(s) => s.parse().map(Value::Double).unwrap_or_else(|_| Value::error(CelError::BadCast { from: TypeTag::String, to: TypeTag::Double })),
            v => Value::error(CelError::BadCast { from: v.kind(), to: TypeTag::Double }),
        }),
    });
    r.register("string", Overload {
        id: "to_string".into(), target: None, args: vec![ArgKind::Any],
        body: Rc::new(|_t, a| Value::String(Rc::new(a[0].to_string()))),
    });
    r.register("uint", Overload {
        id: "to_uint".into(), target: None, args: vec![ArgKind::Any],
        body: Rc::new(|_t, a| match &a[0] {
            Value::Uint(u) => Value::Uint(*u),
            Value::Int(i) if *i >= 0 => Value::Uint(*i as u64),
            Value::Double(d) if *d >= 0.0 => Value::Uint(*d as u64),
            Value::String(s) => s.parse().map(Value::Uint).unwrap_or_else(|_| Value::error(CelError::BadCast { from: TypeTag::String, to: TypeTag::Uint })),
            v => Value::error(CelError::BadCast { from: v.kind(), to: TypeTag::Uint }),
        }),
    });
    r.register("bool", Overload {
        id: "to_bool".into(), target: None, args: vec![ArgKind::Any],
        body: Rc::new(|_t, a| match &a[0] {
            Value::Bool(b) => Value::Bool(*b),
            Value::String(s) => match s.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::error(CelError::BadCast { from: TypeTag::String, to: TypeTag::Bool }),
            },
            v => Value::error(CelError::BadCast { from: v.kind(), to: TypeTag::Bool }),
        }),
    });
    r.register("bytes", Overload {
        id: "to_bytes".into(), target: None, args: vec![ArgKind::Any],
        body: Rc::new(|_t, a| match &a[0] {
            Value::Bytes(b) => Value::Bytes(b.clone()),
            Value::String(s) => Value::Bytes(Rc::new(s.as_bytes().to_vec())),
            v => Value::error(CelError::BadCast { from: v.kind(), to: TypeTag::Bytes }),
        }),
    });
    r.register("duration", Overload {
        id: "to_duration".into(), target: None, args: vec![ArgKind::Any],
        body: Rc::new(|_t, a| match &a[0] {
            Value::Duration(d) => Value::Duration(*d),
            Value::String(s) => parse_duration(s).map(Value::Duration).unwrap_or_else(|| Value::error(CelError::BadCast { from: TypeTag::String, to: TypeTag::Duration })),
            v => Value::error(CelError::BadCast { from: v.kind(), to: TypeTag::Duration }),
        }),
    });
    r.register("timestamp", Overload {
        id: "to_timestamp".into(), target: None, args: vec![ArgKind::Any],
        body: Rc::new(|_t, a| match &a[0] {
            Value::Timestamp(t) => Value::Timestamp(*t),
            Value::String(s) => parse_timestamp(s).map(Value::Timestamp).unwrap_or_else(|| Value::error(CelError::BadCast { from: TypeTag::String, to: TypeTag::Timestamp })),
            v => Value::error(CelError::BadCast { from: v.kind(), to: TypeTag::Timestamp }),
        }),
    });
    r.register("type", Overload {
        id: "type_of".into(), target: None, args: vec![ArgKind::Any],
        body: Rc::new(|_t, a| Value::Type(a[0].kind())),
    });

    r.register("_[_]", Overload {
        id: "index_list".into(), target: None, args: vec![ArgKind::Kind(TypeTag::List), ArgKind::Kind(TypeTag::Int)],
        body: Rc::new(|_t, a| match (&a[0], &a[1]) {
            (Value::List(l), Value::Int(i)) => l.get(*i as usize).cloned().unwrap_or_else(|| Value::error(CelError::IndexOutOfRange(*i))),
            _ => Value::error(CelError::NoMatchingOverload("_[_]".into())),
        }),
    });
    r.register("_[_]", Overload {
        id: "index_map".into(), target: None, args: vec![ArgKind::Kind(TypeTag::Map), ArgKind::Any],
        body: Rc::new(|_t, a| match &a[0] {
            Value::Map(m) => m.get(&a[1]).cloned().unwrap_or_else(|| Value::error(CelError::KeyNotFound)),
            _ => Value::error(CelError::NoMatchingOverload("_[_]".into())),
        }),
    });

    r.register("_?_:_", Overload {
        id: "ternary".into(), target: None, args: vec![ArgKind::Any, ArgKind::Any, ArgKind::Any],
        body: Rc::new(|_t, a| match &a[0] {
            Value::Bool(true) => a[1].clone(),
            Value::Bool(false) => a[2].clone(),
            Value::Error(_) | Value::Unknown(_) => a[0].clone(),
            _ => Value::error(CelError::NoMatchingOverload("_?_:_".into())),
        }),
    });

    r.register("@in", Overload {
        id: "in_list".into(), target: None, args: vec![ArgKind::Any, ArgKind::Kind(TypeTag::List)],
        body: Rc::new(|_t, a| match &a[1] {
            Value::List(l) => Value::Bool(l.iter().any(|v| v.cel_eq(&a[0]) == Some(true))),
            _ => Value::error(CelError::NoMatchingOverload("@in".into())),
        }),
    });
    r.register("@in", Overload {
        id: "in_map".into(), target: None, args: vec![ArgKind::Any, ArgKind::Kind(TypeTag::Map)],
        body: Rc::new(|_t, a| match &a[1] {
            Value::Map(m) => Value::Bool(m.get(&a[0]).is_some()),
            _ => Value::error(CelError::NoMatchingOverload("@in".into())),
        }),
    });

    register_optional_functions(&mut r);

    r
}

/// Shared truth table for `_&&_` (`is_or = false`) and `_||_`
/// (`is_or = true`), SPEC_FULL.md §4.7: a concrete dominant value (`false`
/// for and, `true` for or) wins outright, a concrete non-dominant value
/// defers entirely to the other side, and when neither side is concrete
/// the result is the union of unknowns if any, else the first error.
fn logical_combine(a: &Value, b: &Value, is_or: bool) -> Value {
    let dominant = Value::Bool(is_or);
    let non_dominant = Value::Bool(!is_or);
    if *a == dominant || *b == dominant {
        return dominant;
    }
    if *a == non_dominant {
        return coerce_bool_or_error(b, if is_or { "_||_" } else { "_&&_" });
    }
    if *b == non_dominant {
        return coerce_bool_or_error(a, if is_or { "_||_" } else { "_&&_" });
    }
    dominance(None, &[a.clone(), b.clone()])
        .unwrap_or_else(|| Value::error(CelError::NoMatchingOverload(if is_or { "_||_".into() } else { "_&&_".into() })))
}

fn coerce_bool_or_error(v: &Value, name: &str) -> Value {
    match v {
        Value::Bool(_) | Value::Error(_) | Value::Unknown(_) => v.clone(),
        _ => Value::error(CelError::NoMatchingOverload(name.to_string())),
    }
}

fn t_string(v: &Value) -> Option<Rc<String>> {
    match v {
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Go-style duration literal: a sequence of `(number)(unit)` pairs with an
/// optional leading sign, e.g. `"1h2m3s"`, `"300ms"`, `"-1.5h"`. Backs the
/// `duration(_)` conversion (§4.2.1).
fn parse_duration(s: &str) -> Option<i64> {
    let mut chars = s.chars().peekable();
    let neg = if chars.peek() == Some(&'-') { chars.next(); true } else { false };
    let mut total: i64 = 0;
    let mut any = false;
    loop {
        let mut num = String::new();
        while matches!(chars.peek(), Some(c) if c.is_ascii_digit() || *c == '.') {
            num.push(chars.next().unwrap());
        }
        if num.is_empty() {
            break;
        }
        let mut unit = String::new();
        while matches!(chars.peek(), Some(c) if c.is_alphabetic() || *c == '\u{b5}') {
            unit.push(chars.next().unwrap());
        }
        let value: f64 = num.parse().ok()?;
        let mult: f64 = match unit.as_str() {
            "ns" => 1.0,
            "us" | "\u{b5}s" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60_000_000_000.0,
            "h" => 3_600_000_000_000.0,
            _ => return None,
        };
        total = total.checked_add((value * mult) as i64)?;
        any = true;
    }
    if !any || chars.peek().is_some() {
        return None;
    }
    Some(if neg { -total } else { total })
}

/// Days since the Unix epoch for a proleptic-Gregorian civil date, via
/// Howard Hinnant's well-known `days_from_civil` algorithm. Backs
/// `parse_timestamp` below.
fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

/// RFC 3339 timestamp: `YYYY-MM-DDTHH:MM:SS[.fraction](Z|+HH:MM|-HH:MM)`.
/// Backs the `timestamp(_)` conversion (§4.2.1).
fn parse_timestamp(s: &str) -> Option<i64> {
    if s.len() < 20 {
        return None;
    }
    let year: i64 = s.get(0..4)?.parse().ok()?;
    if s.get(4..5)? != "-" {
        return None;
    }
    let month: i64 = s.get(5..7)?.parse().ok()?;
    if s.get(7..8)? != "-" {
        return None;
    }
    let day: i64 = s.get(8..10)?.parse().ok()?;
    if !matches!(s.get(10..11), Some("T") | Some("t")) {
        return None;
    }
    let hour: i64 = s.get(11..13)?.parse().ok()?;
    if s.get(13..14)? != ":" {
        return None;
    }
    let minute: i64 = s.get(14..16)?.parse().ok()?;
    if s.get(16..17)? != ":" {
        return None;
    }
    let second: i64 = s.get(17..19)?.parse().ok()?;
    let mut rest = &s[19..];
    let mut nanos: i64 = 0;
    if rest.starts_with('.') {
        let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let frac = &rest[1..end];
        let padded = format!("{:0<9}", frac);
        nanos = padded.get(..9)?.parse().ok()?;
        rest = &rest[end..];
    }
    let offset_secs: i64 = if rest == "Z" || rest == "z" {
        0
    } else if rest.len() == 6 && (rest.starts_with('+') || rest.starts_with('-')) {
        let sign = if rest.starts_with('-') { -1 } else { 1 };
        let oh: i64 = rest.get(1..3)?.parse().ok()?;
        let om: i64 = rest.get(4..6)?.parse().ok()?;
        sign * (oh * 3600 + om * 60)
    } else {
        return None;
    };
    let days = days_from_civil(year, month, day);
    let secs = days.checked_mul(86400)?.checked_add(hour * 3600 + minute * 60 + second)?.checked_sub(offset_secs)?;
    secs.checked_mul(NANOS_PER_SEC)?.checked_add(nanos)
}

/// The `optional_type` extension family, grounded on
/// `checker/optional_test.cc` and `extensions/comprehensions_v2_functions.h`.
fn register_optional_functions(r: &mut FunctionRegistry) {
    r.register("optional.of", Overload {
        id: "optional_of".into(), target: None, args: vec![ArgKind::Any],
        body: Rc::new(|_t, a| Value::Optional(Some(Rc::new(a[0].clone())))),
    });
    r.register("optional.none", Overload {
        id: "optional_none".into(), target: None, args: vec![],
        body: Rc::new(|_t, _a| Value::Optional(None)),
    });
    r.register("optional.ofNonZeroValue", Overload {
        id: "optional_of_non_zero".into(), target: None, args: vec![ArgKind::Any],
        body: Rc::new(|_t, a| {
            let is_zero = match &a[0] {
                Value::Int(0) | Value::Uint(0) => true,
                Value::Double(d) if *d == 0.0 => true,
                Value::String(s) if s.is_empty() => true,
                Value::Bytes(b) if b.is_empty() => true,
                Value::Bool(false) => true,
                _ => false,
            };
            if is_zero { Value::Optional(None) } else { Value::Optional(Some(Rc::new(a[0].clone()))) }
        }),
    });
    r.register("hasValue", Overload {
        id: "optional_has_value".into(), target: Some(ArgKind::Optional), args: vec![],
        body: Rc::new(|t, _a| Value::Bool(matches!(t, Some(Value::Optional(Some(_)))))),
    });
    r.register("value", Overload {
        id: "optional_value".into(), target: Some(ArgKind::Optional), args: vec![],
        body: Rc::new(|t, _a| match t {
            Some(Value::Optional(Some(v))) => (**v).clone(),
            _ => Value::error(CelError::Custom("optional.value() called on empty optional".into())),
        }),
    });
    r.register("or", Overload {
        id: "optional_or".into(), target: Some(ArgKind::Optional), args: vec![ArgKind::Optional],
        body: Rc::new(|t, a| match t {
            Some(Value::Optional(Some(v))) => Value::Optional(Some(v.clone())),
            _ => a[0].clone(),
        }),
    });
    r.register("orValue", Overload {
        id: "optional_or_value".into(), target: Some(ArgKind::Optional), args: vec![ArgKind::Any],
        body: Rc::new(|t, a| match t {
            Some(Value::Optional(Some(v))) => (**v).clone(),
            _ => a[0].clone(),
        }),
    });
}

pub fn empty_map() -> Value {
    Value::Map(Rc::new(MapValue::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_registered_overload_wins_on_ambiguous_match() {
        let mut r = FunctionRegistry::new();
        r.register("f", Overload {
            id: "first".into(), target: None, args: vec![ArgKind::Any],
            body: Rc::new(|_t, _a| Value::String(Rc::new("first".to_string()))),
        });
        r.register("f", Overload {
            id: "second".into(), target: None, args: vec![ArgKind::Any],
            body: Rc::new(|_t, _a| Value::String(Rc::new("second".to_string()))),
        });
        let result = r.dispatch("f", None, &[Value::Int(1)]);
        assert_eq!(result, Value::String(Rc::new("first".to_string())));
    }

    #[test]
    fn dispatch_of_unknown_function_is_a_no_matching_overload_error() {
        let r = standard_registry();
        let result = r.dispatch("nope", None, &[Value::Int(1)]);
        assert_eq!(result, Value::error(CelError::NoMatchingOverload("nope".to_string())));
    }

    #[test]
    fn error_argument_dominates_ordinary_calls() {
        let r = standard_registry();
        let err = Value::error(CelError::DivideByZero);
        let result = r.dispatch("_+_", None, &[err.clone(), Value::Int(1)]);
        assert_eq!(result, err);
    }

    #[test]
    fn unknown_arguments_merge_into_their_union() {
        let r = standard_registry();
        let result = r.dispatch("_+_", None, &[Value::unknown_of("a"), Value::unknown_of("b")]);
        match result {
            Value::Unknown(set) => assert_eq!(set.len(), 2),
            other => panic!("expected unknown, got {:?}", other),
        }
    }

    #[test]
    fn logical_and_short_circuits_on_concrete_false_even_with_an_error_present() {
        let r = standard_registry();
        let result = r.dispatch("_&&_", None, &[Value::Bool(false), Value::error(CelError::DivideByZero)]);
        assert_eq!(result, Value::Bool(false));
    }

    #[test]
    fn logical_and_of_true_and_error_is_the_error() {
        let r = standard_registry();
        let err = Value::error(CelError::DivideByZero);
        let result = r.dispatch("_&&_", None, &[Value::Bool(true), err.clone()]);
        assert_eq!(result, err);
    }

    #[test]
    fn logical_or_short_circuits_on_concrete_true() {
        let r = standard_registry();
        let result = r.dispatch("_||_", None, &[Value::Bool(true), Value::error(CelError::DivideByZero)]);
        assert_eq!(result, Value::Bool(true));
    }

    #[test]
    fn optional_or_value_falls_back_on_empty() {
        let r = standard_registry();
        let result = r.dispatch("orValue", Some(&Value::Optional(None)), &[Value::String(Rc::new("z".to_string()))]);
        assert_eq!(result, Value::String(Rc::new("z".to_string())));
    }

    #[test]
    fn ternary_with_error_condition_propagates_the_error_instead_of_no_matching_overload() {
        let r = standard_registry();
        let err = Value::error(CelError::DivideByZero);
        let result = r.dispatch("_?_:_", None, &[err.clone(), Value::Int(1), Value::Int(2)]);
        assert_eq!(result, err);
    }

    #[test]
    fn ternary_with_unknown_condition_propagates_the_unknown() {
        let r = standard_registry();
        let unk = Value::unknown_of("cond");
        let result = r.dispatch("_?_:_", None, &[unk.clone(), Value::Int(1), Value::Int(2)]);
        assert_eq!(result, unk);
    }

    #[test]
    fn uint_conversion_rejects_negative_int() {
        let r = standard_registry();
        let result = r.dispatch("uint", None, &[Value::Int(-1)]);
        assert_eq!(result, Value::error(CelError::BadCast { from: TypeTag::Int, to: TypeTag::Uint }));
    }

    #[test]
    fn uint_conversion_from_string() {
        let r = standard_registry();
        let result = r.dispatch("uint", None, &[Value::String(Rc::new("42".to_string()))]);
        assert_eq!(result, Value::Uint(42));
    }

    #[test]
    fn bool_conversion_from_string_literals() {
        let r = standard_registry();
        assert_eq!(r.dispatch("bool", None, &[Value::String(Rc::new("true".to_string()))]), Value::Bool(true));
        assert_eq!(
            r.dispatch("bool", None, &[Value::String(Rc::new("nope".to_string()))]),
            Value::error(CelError::BadCast { from: TypeTag::String, to: TypeTag::Bool })
        );
    }

    #[test]
    fn bytes_conversion_from_string_is_utf8_bytes() {
        let r = standard_registry();
        let result = r.dispatch("bytes", None, &[Value::String(Rc::new("ab".to_string()))]);
        assert_eq!(result, Value::Bytes(Rc::new(vec![b'a', b'b'])));
    }

    #[test]
    fn duration_conversion_parses_compound_literal() {
        let r = standard_registry();
        let result = r.dispatch("duration", None, &[Value::String(Rc::new("1h2m3s".to_string()))]);
        assert_eq!(result, Value::Duration(3600 * NANOS_PER_SEC + 120 * NANOS_PER_SEC + 3 * NANOS_PER_SEC));
    }

    #[test]
    fn duration_conversion_rejects_unknown_unit() {
        let r = standard_registry();
        let result = r.dispatch("duration", None, &[Value::String(Rc::new("1y".to_string()))]);
        assert_eq!(result, Value::error(CelError::BadCast { from: TypeTag::String, to: TypeTag::Duration }));
    }

    #[test]
    fn timestamp_conversion_parses_rfc3339_utc() {
        let r = standard_registry();
        let result = r.dispatch("timestamp", None, &[Value::String(Rc::new("1970-01-01T00:00:00Z".to_string()))]);
        assert_eq!(result, Value::Timestamp(0));
    }

    #[test]
    fn timestamp_conversion_honors_offset() {
        let r = standard_registry();
        let result = r.dispatch("timestamp", None, &[Value::String(Rc::new("1970-01-01T01:00:00+01:00".to_string()))]);
        assert_eq!(result, Value::Timestamp(0));
    }

    #[test]
    fn timestamp_conversion_rejects_malformed_input() {
        let r = standard_registry();
        let result = r.dispatch("timestamp", None, &[Value::String(Rc::new("not-a-timestamp".to_string()))]);
        assert_eq!(result, Value::error(CelError::BadCast { from: TypeTag::String, to: TypeTag::Timestamp }));
    }
}
