//! The CEL value universe.
//!
//! Mirrors the tagged-union/whitelisted-operator style of the original
//! bytecode VM's `Value`/`TypeTag`, generalized from a handful of graphics
//! scalar kinds to the full CEL kind set: Null, Bool, Int, Uint, Double,
//! String, Bytes, Duration, Timestamp, List, Map, Struct, Type, Optional,
//! Error, Unknown and Opaque.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use enumflags2::BitFlags;

use crate::descriptor::StructValue;

/// One second in nanoseconds, used to bound Duration/Timestamp.
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// +-10000 years, expressed in nanoseconds, per CEL's duration bounds.
pub const MAX_DURATION_NANOS: i64 = 10_000 * 365 * 24 * 3600 * NANOS_PER_SEC;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(Rc<String>),
    Bytes(Rc<Vec<u8>>),
    Duration(i64),
    Timestamp(i64),
    List(Rc<Vec<Value>>),
    Map(Rc<MapValue>),
    Struct(Rc<StructValue>),
    Type(TypeTag),
    Optional(Option<Rc<Value>>),
    Error(Rc<CelError>),
    Unknown(Rc<BTreeSet<String>>),
    /// Evaluator-private optimization marker. Never observable by a host.
    Opaque(&'static str),
}

/// An ordered map keyed by CEL values. Insertion order is preserved
/// regardless of key kind (Open Question 3, see DESIGN.md): `Int(1)` and
/// `Uint(1)` collide on insert because they compare equal under `eq`.
#[derive(Clone, Debug, Default)]
pub struct MapValue {
    entries: Vec<(Value, Value)>,
}

impl MapValue {
    pub fn new() -> Self {
        MapValue { entries: Vec::new() }
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<()> {
        if !key.is_valid_map_key() {
            return Err(Error::KeyTypeError(key.kind()));
        }
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| k.cel_eq(&key) == Some(true)) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
        Ok(())
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k.cel_eq(key) == Some(true)).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }
}

impl PartialEq for MapValue {
    fn eq(&self, other: &Self) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        self.entries.iter().all(|(k, v)| other.get(k).map(|ov| ov.cel_eq(v) == Some(true)).unwrap_or(false))
    }
}

/// A first-class CEL error value (distinct from `EvalError`, which is a
/// host-observable status rather than a language value).
#[derive(Clone, Debug, PartialEq)]
pub enum CelError {
    DivideByZero,
    Overflow,
    NoMatchingOverload(String),
    BadCast { from: TypeTag, to: TypeTag },
    FieldNotFound(String),
    IndexOutOfRange(i64),
    KeyNotFound,
    BadKeyType(TypeTag),
    RegexCompile(String),
    MissingAttribute(String),
    Custom(String),
}

impl fmt::Display for CelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CelError::DivideByZero => write!(f, "division by zero"),
            CelError::Overflow => write!(f, "arithmetic overflow"),
            CelError::NoMatchingOverload(name) => write!(f, "no matching overload for '{}'", name),
            CelError::BadCast { from, to } => write!(f, "cannot cast {:?} to {:?}", from, to),
            CelError::FieldNotFound(name) => write!(f, "no such field '{}'", name),
            CelError::IndexOutOfRange(i) => write!(f, "index {} out of range", i),
            CelError::KeyNotFound => write!(f, "key not found"),
            CelError::BadKeyType(t) => write!(f, "invalid map key type {:?}", t),
            CelError::RegexCompile(msg) => write!(f, "invalid regex: {}", msg),
            CelError::MissingAttribute(name) => write!(f, "missing attribute '{}'", name),
            CelError::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

/// Bitflag-compatible kind tag, mirroring the teacher's `TypeTag` bitset so
/// the function registry can declare overload signatures as kind sets.
#[derive(enumflags2::BitFlags, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TypeTag {
    Null      = 0b0_0000_0000_0001,
    Bool      = 0b0_0000_0000_0010,
    Int       = 0b0_0000_0000_0100,
    Uint      = 0b0_0000_0000_1000,
    Double    = 0b0_0000_0001_0000,
    String    = 0b0_0000_0010_0000,
    Bytes     = 0b0_0000_0100_0000,
    Duration  = 0b0_0000_1000_0000,
    Timestamp = 0b0_0001_0000_0000,
    List      = 0b0_0010_0000_0000,
    Map       = 0b0_0100_0000_0000,
    Struct    = 0b0_1000_0000_0000,
    TypeType  = 0b1_0000_0000_0000,
}

pub type TypeSet = BitFlags<TypeTag>;

pub type Result<T> = core::result::Result<T, Error>;

/// Host-observable evaluation fault. Distinct from `Value::Error`, which is
/// a CEL-level value that propagates through operators rather than aborting
/// evaluation (see SPEC_FULL.md §7).
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    StackUnderflow,
    StackOverflow,
    IllegalAddr(usize),
    TypeError { expect: TypeSet, got: TypeTag },
    TypeMismatch(TypeTag, TypeTag),
    KeyTypeError(TypeTag),
    IterationBudgetExceeded,
    RecursionDepthExceeded,
    NoSuchSlot(usize),
    NoIterFrame,
    /// Arithmetic overflow in a checked operator body. Distinct from the
    /// `CelError::Overflow` *value* the registry converts this into: this
    /// variant only exists transiently inside `operator!` bodies.
    Overflow,
    DivideByZero,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::StackUnderflow => write!(f, "operand stack underflow"),
            Error::StackOverflow => write!(f, "operand stack overflow"),
            Error::IllegalAddr(a) => write!(f, "illegal program address {}", a),
            Error::TypeError { expect, got } => write!(f, "expected one of {:?}, got {:?}", expect, got),
            Error::TypeMismatch(a, b) => write!(f, "type mismatch: {:?} vs {:?}", a, b),
            Error::KeyTypeError(t) => write!(f, "invalid map key type {:?}", t),
            Error::IterationBudgetExceeded => write!(f, "comprehension iteration budget exceeded"),
            Error::RecursionDepthExceeded => write!(f, "planner recursion depth exceeded"),
            Error::NoSuchSlot(i) => write!(f, "no such comprehension slot {}", i),
            Error::NoIterFrame => write!(f, "no active iteration frame"),
            Error::Overflow => write!(f, "arithmetic overflow"),
            Error::DivideByZero => write!(f, "division by zero"),
        }
    }
}

impl std::error::Error for Error {}

/// Converts a host-observable arithmetic fault into the first-class CEL
/// error value that propagates through operators (§7). Only `operator!`
/// bodies ever produce an `Error::Overflow`/`TypeMismatch`/`TypeError`
/// that needs this conversion; other `Error` variants are host faults and
/// are never routed through `Value::error`.
impl From<Error> for CelError {
    fn from(e: Error) -> CelError {
        match e {
            Error::Overflow => CelError::Overflow,
            Error::DivideByZero => CelError::DivideByZero,
            Error::TypeMismatch(a, b) => CelError::BadCast { from: a, to: b },
            Error::TypeError { got, .. } => CelError::BadCast { from: got, to: got },
            other => CelError::Custom(other.to_string()),
        }
    }
}

fn expected(expect: TypeSet, got: &Value) -> Error {
    Error::TypeError { expect, got: got.kind() }
}

fn type_mismatch(a: &Value, b: &Value) -> Error {
    Error::TypeMismatch(a.kind(), b.kind())
}

fn checked_div_i64(a: i64, b: i64) -> Result<i64> {
    if b == 0 { return Err(Error::DivideByZero); }
    a.checked_div(b).ok_or(Error::Overflow)
}

fn checked_div_u64(a: u64, b: u64) -> Result<u64> {
    if b == 0 { return Err(Error::DivideByZero); }
    a.checked_div(b).ok_or(Error::Overflow)
}

fn checked_rem_i64(a: i64, b: i64) -> Result<i64> {
    if b == 0 { return Err(Error::DivideByZero); }
    a.checked_rem(b).ok_or(Error::Overflow)
}

fn checked_rem_u64(a: u64, b: u64) -> Result<u64> {
    if b == 0 { return Err(Error::DivideByZero); }
    a.checked_rem(b).ok_or(Error::Overflow)
}

/// Factors out the whitelist-pattern boilerplate for arithmetic/relational
/// operator methods, same shape as the teacher's `operator!` macro: anything
/// not in the match table is a typed runtime error, never a panic.
macro_rules! operator {
    (un $name:ident ($expect:expr) { $( $p:pat => $e:expr ),+ $(,)? } ) => {
        pub fn $name(&self) -> Result<Value> {
            use Value::*;
            match self {
                $($p => Ok($e)),+ ,
                value => Err(expected($expect, value))
            }
        }
    };

    (bin $name:ident { $( $p:pat => $e:expr ),+ $(,)? } ) => {
        pub fn $name(&self, other: &Value) -> Result<Value> {
            use Value::*;
            #[allow(unreachable_patterns)]
            match (self, other) {
                $($p => Ok($e)),+ ,
                (a, b) => Err(type_mismatch(a, b))
            }
        }
    };
}

impl Value {
    pub fn kind(&self) -> TypeTag {
        match self {
            Value::Null => TypeTag::Null,
            Value::Bool(_) => TypeTag::Bool,
            Value::Int(_) => TypeTag::Int,
            Value::Uint(_) => TypeTag::Uint,
            Value::Double(_) => TypeTag::Double,
            Value::String(_) => TypeTag::String,
            Value::Bytes(_) => TypeTag::Bytes,
            Value::Duration(_) => TypeTag::Duration,
            Value::Timestamp(_) => TypeTag::Timestamp,
            Value::List(_) => TypeTag::List,
            Value::Map(_) => TypeTag::Map,
            Value::Struct(_) => TypeTag::Struct,
            Value::Type(_) => TypeTag::TypeType,
            // Optional/Error/Unknown/Opaque are not part of the core kind
            // lattice used for overload matching; they are handled before
            // dispatch reaches a TypeTag-keyed table (see registry.rs).
            Value::Optional(_) => TypeTag::TypeType,
            Value::Error(_) => TypeTag::TypeType,
            Value::Unknown(_) => TypeTag::TypeType,
            Value::Opaque(_) => TypeTag::TypeType,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Value::Unknown(_))
    }

    pub fn is_valid_map_key(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::Uint(_) | Value::String(_))
    }

    pub fn error(e: CelError) -> Value {
        Value::Error(Rc::new(e))
    }

    pub fn unknown_of(attr: impl Into<String>) -> Value {
        let mut set = BTreeSet::new();
        set.insert(attr.into());
        Value::Unknown(Rc::new(set))
    }

    /// Merges two unknown sets, used when a non-short-circuit operator sees
    /// unknowns on both sides (§4.7 unknown dominance).
    pub fn merge_unknown(a: &Rc<BTreeSet<String>>, b: &Rc<BTreeSet<String>>) -> Value {
        let mut merged = (**a).clone();
        merged.extend(b.iter().cloned());
        Value::Unknown(Rc::new(merged))
    }

    /// CEL equality. Returns `None` when either side is error/unknown — the
    /// caller is responsible for dominance propagation before calling this.
    pub fn cel_eq(&self, other: &Value) -> Option<bool> {
        use Value::*;
        Some(match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Uint(a), Uint(b)) => a == b,
            (Double(a), Double(b)) => a == b,
            (Int(a), Uint(b)) | (Uint(b), Int(a)) => *a >= 0 && (*a as u64) == *b,
            (Int(a), Double(b)) | (Double(b), Int(a)) => (*a as f64) == *b,
            (Uint(a), Double(b)) | (Double(b), Uint(a)) => (*a as f64) == *b,
            (String(a), String(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Duration(a), Duration(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            (List(a), List(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.cel_eq(y) == Some(true))
            }
            (Map(a), Map(b)) => a == b,
            (Type(a), Type(b)) => a == b,
            (Optional(a), Optional(b)) => match (a, b) {
                (None, None) => true,
                (Some(x), Some(y)) => x.cel_eq(y) == Some(true),
                _ => false,
            },
            (Error(_), _) | (_, Error(_)) | (Unknown(_), _) | (_, Unknown(_)) => return None,
            // Mismatched comparable kinds: CEL defines equality as false,
            // never as an error (only ordering comparisons on incomparable
            // kinds are an error).
            _ => false,
        })
    }

    /// Ordering for `<`/`<=`/`>`/`>=`. `None` means "incomparable kinds",
    /// which callers turn into `Error::NoMatchingOverload`.
    pub fn cel_cmp(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Int(a), Int(b)) => a.partial_cmp(b),
            (Uint(a), Uint(b)) => a.partial_cmp(b),
            (Double(a), Double(b)) => a.partial_cmp(b),
            // Open Question 1 (DESIGN.md): cross-kind numeric comparisons
            // always widen to f64 rather than erroring at the edges of the
            // exactly-representable range.
            (Int(a), Uint(b)) => (*a as f64).partial_cmp(&(*b as f64)),
            (Uint(a), Int(b)) => (*a as f64).partial_cmp(&(*b as f64)),
            (Int(a), Double(b)) => (*a as f64).partial_cmp(b),
            (Double(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (Uint(a), Double(b)) => (*a as f64).partial_cmp(b),
            (Double(a), Uint(b)) => a.partial_cmp(&(*b as f64)),
            (String(a), String(b)) => a.partial_cmp(b),
            (Bytes(a), Bytes(b)) => a.partial_cmp(b),
            (Duration(a), Duration(b)) => a.partial_cmp(b),
            (Timestamp(a), Timestamp(b)) => a.partial_cmp(b),
            (Bool(a), Bool(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    operator! { bin add {
        (Int(a), Int(b)) => Int(a.checked_add(*b).ok_or(Error::Overflow)?),
        (Uint(a), Uint(b)) => Uint(a.checked_add(*b).ok_or(Error::Overflow)?),
        (Double(a), Double(b)) => Double(a + b),
        (String(a), String(b)) => String(Rc::new(format!("{}{}", a, b))),
        (Bytes(a), Bytes(b)) => Bytes(Rc::new(a.iter().chain(b.iter()).copied().collect())),
        (List(a), List(b)) => List(Rc::new(a.iter().chain(b.iter()).cloned().collect())),
        (Duration(a), Duration(b)) => Duration(a + b),
        (Timestamp(a), Duration(b)) => Timestamp(a + b),
        (Duration(a), Timestamp(b)) => Timestamp(a + b),
    } }

    operator! { bin sub {
        (Int(a), Int(b)) => Int(a.checked_sub(*b).ok_or(Error::Overflow)?),
        (Uint(a), Uint(b)) => Uint(a.checked_sub(*b).ok_or(Error::Overflow)?),
        (Double(a), Double(b)) => Double(a - b),
        (Duration(a), Duration(b)) => Duration(a - b),
        (Timestamp(a), Duration(b)) => Timestamp(a - b),
        (Timestamp(a), Timestamp(b)) => Duration(a - b),
    } }

    operator! { bin mul {
        (Int(a), Int(b)) => Int(a.checked_mul(*b).ok_or(Error::Overflow)?),
        (Uint(a), Uint(b)) => Uint(a.checked_mul(*b).ok_or(Error::Overflow)?),
        (Double(a), Double(b)) => Double(a * b),
    } }

    operator! { bin div {
        (Int(a), Int(b)) => Int(checked_div_i64(*a, *b)?),
        (Uint(a), Uint(b)) => Uint(checked_div_u64(*a, *b)?),
        (Double(a), Double(b)) => Double(a / b),
    } }

    operator! { bin modulo {
        (Int(a), Int(b)) => Int(checked_rem_i64(*a, *b)?),
        (Uint(a), Uint(b)) => Uint(checked_rem_u64(*a, *b)?),
    } }

    operator! { un neg (TypeTag::Int | TypeTag::Double) {
        Int(a) => Int(a.checked_neg().ok_or(Error::Overflow)?),
        Double(a) => Double(-a),
    } }

    operator! { un not (TypeTag::Bool.into()) {
        Bool(a) => Bool(!a),
    } }

    pub fn size(&self) -> Result<i64> {
        Ok(match self {
            Value::String(s) => s.chars().count() as i64,
            Value::Bytes(b) => b.len() as i64,
            Value::List(l) => l.len() as i64,
            Value::Map(m) => m.len() as i64,
            v => return Err(expected(
                TypeTag::String | TypeTag::Bytes | TypeTag::List | TypeTag::Map,
                v,
            )),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Uint(u) => write!(f, "{}u", u),
            Value::Double(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "bytes({})", b.len()),
            Value::Duration(d) => write!(f, "duration({}ns)", d),
            Value::Timestamp(t) => write!(f, "timestamp({}ns)", t),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Struct(s) => write!(f, "{}{{...}}", s.descriptor.type_name()),
            Value::Type(t) => write!(f, "type({:?})", t),
            Value::Optional(Some(v)) => write!(f, "optional({})", v),
            Value::Optional(None) => write!(f, "optional.none()"),
            Value::Error(e) => write!(f, "error({})", e),
            Value::Unknown(attrs) => write!(f, "unknown({:?})", attrs),
            Value::Opaque(tag) => write!(f, "opaque({})", tag),
        }
    }
}

lazy_static::lazy_static! {
    /// Process-wide immutable singletons (§9): safe to publish without
    /// further synchronization once initialized, since nothing ever
    /// mutates them afterward.
    pub static ref EMPTY_LIST: Value = Value::List(Rc::new(Vec::new()));
    pub static ref EMPTY_MAP: Value = Value::Map(Rc::new(MapValue::new()));
    pub static ref NONE: Value = Value::Optional(None);
}

pub fn type_token(tag: TypeTag) -> Value {
    Value::Type(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_add_overflows_to_error() {
        assert_eq!(Value::Int(i64::MAX).add(&Value::Int(1)), Err(Error::Overflow));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert_eq!(Value::Int(1).div(&Value::Int(0)), Err(Error::DivideByZero));
        assert_eq!(Value::Uint(1).div(&Value::Uint(0)), Err(Error::DivideByZero));
    }

    #[test]
    fn string_concat_and_list_concat() {
        let a = Value::String(Rc::new("ab".to_string()));
        let b = Value::String(Rc::new("cd".to_string()));
        assert_eq!(a.add(&b), Ok(Value::String(Rc::new("abcd".to_string()))));

        let l1 = Value::List(Rc::new(vec![Value::Int(1)]));
        let l2 = Value::List(Rc::new(vec![Value::Int(2)]));
        assert_eq!(l1.add(&l2), Ok(Value::List(Rc::new(vec![Value::Int(1), Value::Int(2)]))));
    }

    #[test]
    fn cross_kind_equality_by_mathematical_value() {
        assert_eq!(Value::Int(3).cel_eq(&Value::Uint(3)), Some(true));
        assert_eq!(Value::Int(-1).cel_eq(&Value::Uint(1)), Some(false));
        assert_eq!(Value::Int(2).cel_eq(&Value::Double(2.0)), Some(true));
        assert_eq!(Value::Int(2).cel_eq(&Value::Double(2.5)), Some(false));
        assert_eq!(Value::Double(f64::NAN).cel_eq(&Value::Double(f64::NAN)), Some(false));
    }

    #[test]
    fn mismatched_kind_equality_is_false_not_error() {
        assert_eq!(Value::Int(1).cel_eq(&Value::String(Rc::new("1".to_string()))), Some(false));
    }

    #[test]
    fn error_equality_is_undefined() {
        let e = Value::error(CelError::DivideByZero);
        assert_eq!(e.cel_eq(&Value::Int(1)), None);
    }

    #[test]
    fn ordering_widens_cross_kind_numerics_to_double() {
        assert_eq!(Value::Int(1).cel_cmp(&Value::Uint(2)), Some(Ordering::Less));
        assert_eq!(Value::Uint(5).cel_cmp(&Value::Double(5.0)), Some(Ordering::Equal));
        assert_eq!(Value::Bool(true).cel_cmp(&Value::Int(1)), None);
    }

    #[test]
    fn size_of_string_counts_chars_not_bytes() {
        let s = Value::String(Rc::new("héllo".to_string()));
        assert_eq!(s.size(), Ok(5));
    }

    #[test]
    fn size_of_unsupported_kind_is_a_type_error() {
        assert!(matches!(Value::Int(1).size(), Err(Error::TypeError { .. })));
    }

    #[test]
    fn map_insert_collides_across_int_and_uint_keys() {
        let mut m = MapValue::new();
        m.insert(Value::Int(1), Value::String(Rc::new("first".to_string()))).unwrap();
        m.insert(Value::Uint(1), Value::String(Rc::new("second".to_string()))).unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m.get(&Value::Int(1)), Some(&Value::String(Rc::new("second".to_string()))));
    }

    #[test]
    fn map_rejects_non_hashable_key_kinds() {
        let mut m = MapValue::new();
        let err = m.insert(Value::List(Rc::new(vec![])), Value::Null).unwrap_err();
        assert_eq!(err, Error::KeyTypeError(TypeTag::List));
    }
}
