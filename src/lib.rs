//! # spark-hydrate
//!
//! Fine-grained reactive rendering runtime with walk-code hydration.
//!
//! A compiled template is static markup plus a compact walk code that
//! addresses every dynamic position in it. The same walk code is used three
//! ways:
//!
//! - **render**: instantiate the template, bind the walked nodes, write the
//!   output with hydration markers and the scope snapshot
//! - **hydrate**: walk the served output instead of rendering it, recover the
//!   same addresses and attach the signal graph to them
//! - **update**: on a slot write, fire the dependent effects and mutate exactly
//!   the bound nodes they name
//!
//! ## Architecture
//!
//! ```text
//! Template ─► Renderer ─► OutputSink ─► Hydrator ─► Session
//!                                                     │ write
//!                               ScopeStore ◄──────────┤
//!                               SignalGraph ─► Update Engine ─► Mutation
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Core ids, slot keys and values
//! - [`walk`] - Walk code parsing and interpretation
//! - [`tree`] - Output document arena, markup reader and writer
//! - [`engine`] - Scope store and template registry
//! - [`signals`] - Compiled signal wiring and the wave engine
//! - [`primitives`] - The compiled template boundary
//! - [`renderer`] - Server render, sinks and out-of-order chunks
//! - [`pipeline`] - Sessions: mount, hydrate and update

pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod primitives;
pub mod renderer;
pub mod signals;
pub mod tree;
pub mod types;
pub mod walk;

// Re-export commonly used items
pub use types::*;

pub use config::RuntimeConfig;
pub use error::{Result, RuntimeError, SinkError};

pub use engine::{ScopeStore, StoreSnapshot, TemplateRegistry};

pub use signals::{EffectAction, EffectContext, GraphSpec, SignalGraph, SignalRef};

pub use primitives::{AsyncSection, Template, TemplateBuilder};

pub use renderer::{MemorySink, OutputSink, Renderer, SinkEvent, WriterSink};

pub use pipeline::{hydrate, mount, HydrateFailure, Hydrated, Hydrator, MountHandle, Mutation, Session};

pub use tree::Document;
pub use walk::{WalkOp, WalkProgram};
