//! Runtime engine - scope storage and the template registry.
//!
//! - [`ScopeStore`]: arena of scopes, indexed by monotonically assigned ids
//! - [`TemplateRegistry`]: compiled templates by id, with hot reload
//!
//! # Architecture
//!
//! Scopes are NOT objects with owning links. They are indices into one table:
//!
//! ```text
//! Scope 0: root     (parent=None, #0=node 4, #1=scope 1, count=5)
//! Scope 1: child    (parent=0,    #0=node 9, label="hi")
//! Scope 2: branch   (parent=0,    #0=node 12)
//! ```
//!
//! Parent links are plain ids used for inherited lookups. Destroying a scope
//! removes every scope whose parent chain leads to it.

mod registry;
mod scope;

pub use registry::TemplateRegistry;
pub use scope::{Scope, ScopeRecord, ScopeSnapshot, ScopeStore, StoreSnapshot, DEFAULT_ID_LIMIT};
