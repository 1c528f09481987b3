//! Runtime binding from names to values and functions (SPEC_FULL.md §3.4,
//! §6.3).
//!
//! Generalized from the teacher's `Env<T>` scope chain (`root`/`chain`/
//! `get`/`define`/`import`): an `Activation` is a flat, single-level version
//! of that same "define, then look up, falling through to a parent"
//! pattern, specialized to CEL's three-way resolution outcome (concrete
//! value / declared-unknown / missing-required).

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::registry::FunctionRegistry;
use crate::value::Value;

/// The outcome of resolving a name against an activation.
pub enum Resolution {
    Value(Value),
    Unknown,
    Missing,
}

/// A single named binding. Kept as a closure-like provider rather than a
/// plain value so hosts can plug in lazy/host-backed variables, mirroring
/// how `Env<T>::get` returns a cloned `Rc` rather than forcing eager
/// construction of every binding up front.
pub trait Provider {
    fn resolve(&self) -> Value;
}

impl Provider for Value {
    fn resolve(&self) -> Value {
        self.clone()
    }
}

pub struct Activation {
    scope: RefCell<std::collections::HashMap<String, Rc<dyn Provider>>>,
    parent: Option<Rc<Activation>>,
    /// Attribute patterns declared unknown for this evaluation (§6.3).
    unknown_patterns: HashSet<String>,
    /// Attribute patterns that must be present, else a missing-attribute
    /// error value is produced (requires `enable_missing_attribute_errors`).
    required_patterns: HashSet<String>,
    /// The function registry snapshot this activation resolves calls
    /// against (§3.4: "a mapping from names to lazily-resolvable inputs
    /// plus a function-registry reference"). `None` on a chained scope,
    /// which defers to its root.
    registry: Option<Rc<FunctionRegistry>>,
}

impl Activation {
    pub fn root(registry: Rc<FunctionRegistry>) -> Activation {
        Activation {
            scope: RefCell::new(std::collections::HashMap::new()),
            parent: None,
            unknown_patterns: HashSet::new(),
            required_patterns: HashSet::new(),
            registry: Some(registry),
        }
    }

    pub fn chain(parent: &Rc<Activation>) -> Activation {
        Activation {
            scope: RefCell::new(std::collections::HashMap::new()),
            parent: Some(parent.clone()),
            unknown_patterns: HashSet::new(),
            required_patterns: HashSet::new(),
            registry: None,
        }
    }

    /// The function registry reachable from this activation, walking to
    /// the root if this is a chained scope.
    pub fn registry(&self) -> &FunctionRegistry {
        match &self.registry {
            Some(r) => r,
            None => self.parent.as_ref().expect("activation chain has no root registry").registry(),
        }
    }

    pub fn find_overloads(&self, name: &str) -> &[crate::registry::Overload] {
        self.registry().find_overloads(name)
    }

    pub fn bind(&self, name: impl Into<String>, value: Value) {
        self.scope.borrow_mut().insert(name.into(), Rc::new(value));
    }

    pub fn bind_provider(&self, name: impl Into<String>, provider: Rc<dyn Provider>) {
        self.scope.borrow_mut().insert(name.into(), provider);
    }

    pub fn declare_unknown(&mut self, pattern: impl Into<String>) {
        self.unknown_patterns.insert(pattern.into());
    }

    pub fn require(&mut self, pattern: impl Into<String>) {
        self.required_patterns.insert(pattern.into());
    }

    /// Resolves a name anywhere in the scope chain, checking unknown and
    /// missing patterns before falling through to the parent activation —
    /// the same walk-to-parent shape as `Env<T>::get`.
    ///
    /// `enable_missing_attribute_errors` (§6.5) governs only the
    /// `required`-pattern branch: with it on, an absent required attribute
    /// is promoted to a `Missing` error, per the option's documented
    /// meaning. With it off, the same absent required attribute resolves as
    /// `Unknown` instead — required-but-unset is a softer signal than a
    /// plain undeclared identifier, which always falls through to
    /// `Missing` regardless of the option.
    pub fn resolve(&self, name: &str, enable_missing_attribute_errors: bool) -> Resolution {
        if self.unknown_patterns.contains(name) {
            return Resolution::Unknown;
        }
        if let Some(provider) = self.scope.borrow().get(name) {
            return Resolution::Value(provider.resolve());
        }
        if let Some(parent) = &self.parent {
            return parent.resolve(name, enable_missing_attribute_errors);
        }
        if self.required_patterns.contains(name) {
            return if enable_missing_attribute_errors { Resolution::Missing } else { Resolution::Unknown };
        }
        Resolution::Missing
    }

    pub fn is_unknown_attribute(&self, attribute: &str) -> bool {
        self.unknown_patterns.iter().any(|p| attribute == p || attribute.starts_with(&format!("{}.", p)))
            || self.parent.as_ref().map(|p| p.is_unknown_attribute(attribute)).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::FunctionRegistry;

    #[test]
    fn required_and_absent_with_errors_enabled_is_missing() {
        let mut activation = Activation::root(Rc::new(FunctionRegistry::new()));
        activation.require("x");
        assert!(matches!(activation.resolve("x", true), Resolution::Missing));
    }

    #[test]
    fn required_and_absent_with_errors_disabled_is_unknown_not_missing() {
        let mut activation = Activation::root(Rc::new(FunctionRegistry::new()));
        activation.require("x");
        assert!(matches!(activation.resolve("x", false), Resolution::Unknown));
    }

    #[test]
    fn plain_undeclared_identifier_is_always_missing_regardless_of_the_option() {
        let activation = Activation::root(Rc::new(FunctionRegistry::new()));
        assert!(matches!(activation.resolve("y", true), Resolution::Missing));
        assert!(matches!(activation.resolve("y", false), Resolution::Missing));
    }
}
