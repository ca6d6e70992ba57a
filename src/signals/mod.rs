//! Signal Graph.
//!
//! Value, Intersection and Effect nodes over scope slots.
//!
//! - [`spec`] - compiled, per-template wiring ([`GraphSpec`], [`EffectAction`])
//! - [`graph`] - per-session wave engine ([`SignalGraph`])
//!
//! The graph is write-driven: nothing is recomputed on read. A write marks a
//! Value node dirty, readiness flows outward, and the caller drains effects
//! one at a time.

pub mod graph;
pub mod spec;

pub use graph::{PendingWrite, ReadyEffect, SignalFlags, SignalGraph};
pub use spec::{
    CustomFn, Derive, DeriveFn, EffectAction, EffectContext, GraphBuilder, GraphSpec, SignalKind,
    SignalNode, SignalRef,
};
