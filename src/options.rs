//! Per-evaluation options (SPEC_FULL.md §6.5).
//!
//! Generalized from the teacher's `config.rs` deserializable ADTs: where the
//! dashboard's config described gauge/screen layout, `EvaluatorOptions`
//! describes how the planner and evaluator should behave. Kept as a
//! `serde::Deserialize` struct so a host can load it from the same kind of
//! `ron`/JSON config file the teacher loaded its dashboard layout from.

use serde::Deserialize;

/// How aggressively unknown attributes are detected (§4.8, §6.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum UnknownProcessing {
    /// Unknown values never appear; unresolvable attributes are errors.
    Disabled,
    /// Select/index steps check the unknown-pattern set.
    AttributeOnly,
    /// As above, plus function calls may themselves report unknowns.
    AttributeAndFunction,
}

impl Default for UnknownProcessing {
    fn default() -> Self {
        UnknownProcessing::Disabled
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluatorOptions {
    pub short_circuiting: bool,
    pub unknown_processing: UnknownProcessing,
    pub enable_missing_attribute_errors: bool,
    /// `None` means unbounded.
    pub comprehension_iteration_limit: Option<u64>,
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        EvaluatorOptions {
            short_circuiting: true,
            unknown_processing: UnknownProcessing::Disabled,
            enable_missing_attribute_errors: false,
            comprehension_iteration_limit: None,
        }
    }
}
