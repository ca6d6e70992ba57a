//! Reactive Pipeline
//!
//! Everything that happens inside one [`Session`]:
//!
//! ```text
//! mount ──► instantiate (walk + bind) ──► setup writes ──► drain ──► mutations
//!                                                             ▲
//! hydrate ─► parse ─► reorder ─► load snapshot ─► walk + bind ┘ (on later writes)
//! ```
//!
//! ## Key Design Principles
//!
//! - **Explicit session**: no ambient state. A session owns its document,
//!   scope store and signal graph.
//! - **Walk once**: node addresses are recovered by walking a template once per
//!   instance, at mount or at hydration. Updates never walk.
//! - **Pinpoint mutations**: an effect mutates the one node its walk slot names.

pub mod hydrate;
pub mod mount;
pub mod session;
pub mod update;

pub use hydrate::{hydrate, HydrateFailure, Hydrated, Hydrator};
pub use mount::{mount, mount_with, MountHandle};
pub use session::{InstanceRecord, Session};
pub use update::Mutation;
