//! Compiled templates.
//!
//! A [`Template`] is the runtime's view of one compiled template: static
//! markup, walk code, signal wiring and setup. Templates are built with
//! [`TemplateBuilder`] and registered in a
//! [`TemplateRegistry`](crate::engine::TemplateRegistry).

pub mod template;

pub use template::{AsyncSection, Loader, SetupFn, Template, TemplateBuilder};
