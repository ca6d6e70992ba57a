//! Hydrator - re-attaches a live session to rendered output.
//!
//! Hydration parses the served markup, places late chunks, loads the scope
//! snapshot and then, for every hydrate call in document order, runs the
//! template's walk over the existing nodes. Nothing is rendered and no setup
//! runs: the walk only recovers addresses and the graph is attached to them.
//! Custom effects are the exception. They run once per attached instance,
//! and whatever they write settles in one drain at the end.
//!
//! The render context comes from the served context script unless the
//! hydrator was given one with [`Hydrator::with_context`].
//!
//! # Mismatches
//!
//! A walk that disagrees with the markup is a structural mismatch. In strict
//! mode it fails the whole hydration. Otherwise only the affected instance is
//! given up: it is logged, reported in [`Hydrated::failures`], and (with
//! `recover_mismatch`) rendered fresh from its snapshot data in place.

use std::collections::HashSet;
use std::rc::Rc;

use tracing::{debug, instrument, warn};

use super::mount::BoundFrames;
use super::session::{InstanceRecord, Session};
use crate::config::RuntimeConfig;
use crate::engine::{ScopeSnapshot, ScopeStore, StoreSnapshot, TemplateRegistry};
use crate::error::{Result, RuntimeError};
use crate::primitives::Template;
use crate::signals::EffectAction;
use crate::renderer::{reorder, CALLS_TYPE, CONTEXT_TYPE, REORDER_TYPE, SCOPES_TYPE};
use crate::tree::{self, CursorMode, DocCursor, Document, NodeKind};
use crate::types::{NodeId, ScopeId, TemplateId, Value};
use crate::walk::interpret;

/// An instance that could not be hydrated.
#[derive(Debug)]
pub struct HydrateFailure {
    pub scope: ScopeId,
    pub template: TemplateId,
    pub error: RuntimeError,
    /// Re-rendered from its snapshot data.
    pub recovered: bool,
}

#[derive(Debug)]
pub struct Hydrated {
    pub session: Session,
    pub failures: Vec<HydrateFailure>,
}

pub struct Hydrator {
    registry: TemplateRegistry,
    config: RuntimeConfig,
    context: Option<Value>,
}

impl Hydrator {
    pub fn new(registry: TemplateRegistry) -> Self {
        Self::with_config(registry, RuntimeConfig::default())
    }

    pub fn with_config(registry: TemplateRegistry, config: RuntimeConfig) -> Self {
        Self {
            registry,
            config,
            context: None,
        }
    }

    /// Use `context` instead of the one written into the served output.
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    #[instrument(skip(self, markup), fields(bytes = markup.len()))]
    pub fn hydrate(&self, markup: &str) -> Result<Hydrated> {
        let mut document = tree::parse(markup)?;
        let placed = reorder::apply(&mut document)?;

        let calls = take_script(&mut document, CALLS_TYPE);
        let scopes = take_script(&mut document, SCOPES_TYPE);
        let served_context = take_script(&mut document, CONTEXT_TYPE);
        while take_script(&mut document, REORDER_TYPE).is_some() {}

        let calls: Vec<(TemplateId, ScopeId)> = match calls {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };
        let mut store = ScopeStore::with_id_limit(self.config.max_scope_id);
        if let Some(json) = scopes {
            store.load_all(StoreSnapshot::from_json(&json)?)?;
        }
        let context = match (&self.context, served_context) {
            (Some(context), _) => context.clone(),
            (None, Some(json)) => serde_json::from_str(&json)?,
            (None, None) => Value::Null,
        };
        debug!(calls = calls.len(), scopes = store.len(), placed, "hydration input read");

        let mut session = Session::from_parts(self.registry.clone(), self.config.clone(), document, store)
            .with_context(context);
        let mut failures = Vec::new();

        for (template, scope) in calls {
            if !session.store.contains(scope) || session.graph.is_attached(scope) {
                debug!(template = %template, scope = %scope, "hydrate call skipped");
                continue;
            }
            match session.attach_instance(&template, scope) {
                Ok(()) => debug!(template = %template, scope = %scope, "instance hydrated"),
                Err(error) if error.is_structural() && !self.config.strict_hydration => {
                    warn!(template = %template, scope = %scope, %error, "hydration mismatch");
                    let recovered = self.config.recover_mismatch && session.recover_instance(&template, scope)?;
                    failures.push(HydrateFailure {
                        scope,
                        template,
                        error,
                        recovered,
                    });
                }
                Err(error) => return Err(error),
            }
        }
        if !session.graph.is_idle() {
            session.drain()?;
        }

        Ok(Hydrated { session, failures })
    }
}

/// Hydrate with the default configuration.
pub fn hydrate(registry: TemplateRegistry, markup: &str) -> Result<Hydrated> {
    Hydrator::new(registry).hydrate(markup)
}

impl Session {
    /// Recover the addresses of one rendered instance and attach its graph.
    fn attach_instance(&mut self, template_id: &str, scope: ScopeId) -> Result<()> {
        let template = self.registry.get(template_id)?;
        let node = self
            .document
            .find_instance(scope)
            .ok_or_else(|| RuntimeError::StructuralMismatch {
                template: template_id.to_owned(),
                position: 0,
                reason: format!("no instance marker for scope {scope}"),
            })?;

        let frame = interpret(
            template.walks(),
            &mut DocCursor::new(&mut self.document, node, CursorMode::Recover),
        )
        .map_err(|err| err.in_template(template.id()))?;

        let mut bound = BoundFrames::new();
        let mut claimed = HashSet::new();
        self.bind_frame(CursorMode::Recover, &template, scope, frame, &mut bound, &mut claimed)?;
        self.verify_markers(&template, node, &claimed)?;

        self.attach_frames(&bound);
        for (frame_scope, frame_template) in &bound {
            for (_, action) in frame_template.graph().effects() {
                if let EffectAction::Custom(run) = action {
                    self.run_custom(*frame_scope, run);
                }
            }
        }
        self.instances.insert(
            scope,
            InstanceRecord {
                template,
                node,
                input: Value::Null,
            },
        );
        Ok(())
    }

    /// Every bound node of the instance must have been reached by the walk.
    fn verify_markers(&self, template: &Template, instance: NodeId, claimed: &HashSet<NodeId>) -> Result<()> {
        let mut stack: Vec<NodeId> = self.document.children(instance).to_vec();
        let mut position = 0;
        while let Some(node) = stack.pop() {
            if matches!(self.document.kind(node), Some(NodeKind::Instance(_))) {
                continue;
            }
            if let Some(binding) = self.document.binding(node) {
                if !claimed.contains(&node) {
                    return Err(RuntimeError::StructuralMismatch {
                        template: template.id().to_owned(),
                        position,
                        reason: format!(
                            "marker for scope {} #{} was not reached by the walk",
                            binding.scope, binding.slot
                        ),
                    });
                }
                position += 1;
            }
            stack.extend(self.document.children(node).iter().copied());
        }
        Ok(())
    }

    /// Replace a mismatching instance with a fresh render of its snapshot data.
    ///
    /// The scope keeps its id and data slots. Embedded children and branches
    /// are created anew. Returns `false` when there is no instance to replace.
    fn recover_instance(&mut self, template_id: &str, scope: ScopeId) -> Result<bool> {
        let template = self.registry.get(template_id)?;
        let Some(node) = self.document.find_instance(scope) else {
            return Ok(false);
        };
        let (Some(container), Some(index)) = (self.document.parent(node), self.document.index_in(node)) else {
            return Ok(false);
        };

        let data = self.store.data_slots(scope);
        let parent = self.store.parent(scope);
        self.document.remove_subtree(node);
        for removed in self.store.destroy(scope) {
            self.forget(removed);
        }
        self.store.load(ScopeSnapshot {
            id: scope,
            parent,
            slots: Default::default(),
        })?;

        self.instantiate(Rc::clone(&template), scope, container, index, &Value::Null)?;
        for (key, value) in data {
            self.graph.write(&mut self.store, scope, key, value)?;
        }
        self.drain()?;
        debug!(template = template.id(), scope = %scope, "instance re-rendered");
        Ok(true)
    }
}

/// Remove the first `<script type=...>` of the given type and return its text.
fn take_script(doc: &mut Document, script_type: &str) -> Option<String> {
    let script = doc.descendants(doc.root()).into_iter().find(|&id| {
        doc.node(id)
            .is_some_and(|node| node.tag() == Some("script") && node.attr("type") == Some(script_type))
    })?;
    let text = doc.text_content(script);
    doc.remove_subtree(script);
    Some(text)
}
