//! Template Registry - compiled templates by id.
//!
//! Templates are shared behind `Rc`. A session resolves a template once per
//! instance and keeps that `Rc`, so reloading a template affects new
//! instances only.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::error::{Result, RuntimeError};
use crate::primitives::Template;

#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, Rc<Template>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new template. Ids must be unique; use [`reload`](Self::reload) to swap.
    pub fn register(&mut self, template: Template) -> Result<Rc<Template>> {
        if self.templates.contains_key(template.id()) {
            return Err(RuntimeError::InvalidTemplate {
                template: template.id().to_owned(),
                reason: "already registered".to_owned(),
            });
        }
        debug!(template = template.id(), "template registered");
        let template = Rc::new(template);
        self.templates
            .insert(template.id().to_owned(), Rc::clone(&template));
        Ok(template)
    }

    /// Replace a registered template. Live instances keep the version they started with.
    pub fn reload(&mut self, template: Template) -> Result<Rc<Template>> {
        if !self.templates.contains_key(template.id()) {
            return Err(RuntimeError::UnknownTemplate(template.id().to_owned()));
        }
        debug!(template = template.id(), "template reloaded");
        let template = Rc::new(template);
        self.templates
            .insert(template.id().to_owned(), Rc::clone(&template));
        Ok(template)
    }

    pub fn get(&self, id: &str) -> Result<Rc<Template>> {
        self.templates
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownTemplate(id.to_owned()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}
