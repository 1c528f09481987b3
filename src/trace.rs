//! Trace listener (SPEC_FULL.md §4.5, §8 "Trace completeness").
//!
//! Generalized from `util.rs`'s `trace!` macro (a `cfg(test)`-only println)
//! into a proper `Listener` trait with a `tracing`-backed default — the
//! teacher's diagnostics story has no production logging path, so this
//! crate borrows the pattern from `navicore-cem3`, which carries
//! `tracing`/`tracing-subscriber` for exactly this ambient concern.

use crate::ast::ExprId;
use crate::value::Value;

/// A borrowed callback invoked synchronously after every step that pushes
/// a new top-of-stack value. Opaque values never reach a listener — they
/// are evaluator-private and would only confuse a host (§4.5).
pub trait Listener {
    fn on_value(&self, node: ExprId, value: &Value);
}

/// Default listener: logs each step result at `trace` level through the
/// crate's `tracing` subscriber, mirroring the teacher's `trace!` macro
/// idiom but routed through a real logging facade instead of `println!`.
#[derive(Default)]
pub struct TracingListener;

impl Listener for TracingListener {
    fn on_value(&self, node: ExprId, value: &Value) {
        tracing::trace!(node_id = node, %value, "step evaluated");
    }
}

/// No-op listener used by `Evaluator::evaluate` (as opposed to
/// `Evaluator::trace`), so the hot path never pays for formatting unused
/// trace output.
pub struct NullListener;

impl Listener for NullListener {
    fn on_value(&self, _node: ExprId, _value: &Value) {}
}
