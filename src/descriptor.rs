//! Minimal struct/message descriptor model.
//!
//! The real protobuf descriptor/reflection subsystem is out of scope
//! (SPEC_FULL.md §1, §3.1.1): this module supplies just enough of its shape
//! — a descriptor trait, field lookup by name or number, and a pool the host
//! populates once at startup — for `Value::Struct` to exist and be evaluated
//! against, without pulling in a real protobuf crate.

use std::collections::HashMap;
use std::sync::Arc;

use crate::value::Value;

#[derive(Clone, Debug)]
pub struct FieldDescriptor {
    pub name: String,
    pub number: i32,
    pub default: Value,
}

/// Borrowed for the lifetime of an evaluation; the engine never mutates a
/// descriptor or the pool that owns it (§5).
pub trait Descriptor: std::fmt::Debug {
    fn type_name(&self) -> &str;
    fn fields(&self) -> &[FieldDescriptor];

    fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields().iter().find(|f| f.name == name)
    }

    fn field_by_number(&self, number: i32) -> Option<&FieldDescriptor> {
        self.fields().iter().find(|f| f.number == number)
    }
}

#[derive(Debug)]
pub struct SimpleDescriptor {
    pub type_name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl Descriptor for SimpleDescriptor {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }
}

#[derive(Clone, Debug)]
pub struct StructValue {
    pub descriptor: Arc<dyn Descriptor + Send + Sync>,
    pub fields: HashMap<String, Value>,
}

impl StructValue {
    pub fn get(&self, name: &str) -> Option<Value> {
        self.fields.get(name).cloned().or_else(|| {
            self.descriptor.field_by_name(name).map(|f| f.default.clone())
        })
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name) || self.descriptor.field_by_name(name).is_some()
    }
}

impl PartialEq for StructValue {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor.type_name() == other.descriptor.type_name() && self.fields == other.fields
    }
}

/// Name-keyed, in-memory substitute for cel-cpp's descriptor pool. The host
/// populates this once and hands a borrowed reference to each evaluation;
/// the engine only ever reads it (§5, DESIGN.md "Struct/descriptor model").
#[derive(Default, Debug)]
pub struct DescriptorPool {
    descriptors: HashMap<String, Arc<dyn Descriptor + Send + Sync>>,
}

impl DescriptorPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: Arc<dyn Descriptor + Send + Sync>) {
        self.descriptors.insert(descriptor.type_name().to_string(), descriptor);
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn Descriptor + Send + Sync>> {
        self.descriptors.get(type_name).cloned()
    }
}
