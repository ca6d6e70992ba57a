//! Output tree.
//!
//! The renderer builds output as a [`Document`] and serializes it with
//! markers; the hydrator reads markup back into a [`Document`] of the same
//! shape; the update engine mutates single nodes of it.
//!
//! - [`node`] - arena of nodes with free-list reuse
//! - [`parse`] - strict, marker-aware reader
//! - [`serialize`] - writer, with or without markers
//! - [`cursor`] - walk cursor over a document

pub mod cursor;
pub mod escape;
pub mod node;
pub mod parse;
pub mod serialize;

pub use cursor::{CursorMode, DocCursor};
pub use node::{Binding, Document, Node, NodeFlags, NodeKind};
pub use parse::parse;
pub use serialize::{inner_markup, outer_markup, Markers};
