//! Renderer - the server side of the pipeline.
//!
//! Rendering mounts a template into a fresh [`Session`](crate::pipeline::Session),
//! writes the marked-up shell, streams late sections as they resolve and ends
//! the stream with the fragments hydration needs.
//!
//! The renderer knows nothing about the transport. Everything goes through an
//! [`OutputSink`].

pub mod reorder;
pub mod render;
pub mod sink;

pub use render::{Renderer, CALLS_TYPE, CONTEXT_TYPE, SCOPES_TYPE};
pub use reorder::{CHUNK_ATTR, REORDER_TYPE};
pub use sink::{MemorySink, OutputSink, SessionSink, SinkEvent, WriterSink};
