//! Walk Code Protocol.
//!
//! A walk code is a compact instruction string compiled once per template.
//! It is parsed into a [`WalkProgram`] at registration and then interpreted
//! against an output cursor to find every dynamic position of a template
//! instance.
//!
//! # Phases
//!
//! ```text
//! render:  fresh fragment ──interpret──► bindings ──► markers in markup
//! hydrate: parsed markup  ──interpret──► bindings ──► checked against markers
//! update:  bindings (stored as #i slots) ──► node-local mutation
//! ```
//!
//! Both phases must produce the same address sequence for the same static
//! template. That is the only reason the protocol exists.

mod codes;
mod interpret;

pub use codes::{WalkOp, WalkProgram};
pub use interpret::{interpret, BindKind, WalkCursor, WalkError, WalkFrame, WalkSlot};
