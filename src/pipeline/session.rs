//! Render Session - the explicit context threaded through render, hydrate
//! and update.
//!
//! A session owns one output document, one scope store and one signal graph.
//! Nothing survives a session except what was serialized into its output.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use futures::future::LocalBoxFuture;

use super::update::Mutation;
use crate::config::RuntimeConfig;
use crate::engine::{ScopeStore, TemplateRegistry};
use crate::error::{Result, RuntimeError};
use crate::primitives::Template;
use crate::signals::SignalGraph;
use crate::tree::{inner_markup, Document, Markers};
use crate::types::{NodeId, ScopeId, SlotKey, TemplateId, Value};

/// A mounted template instance: the scope that owns an instance node.
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub template: Rc<Template>,
    pub node: NodeId,
    pub input: Value,
}

/// Where a deferred section lands once its loader resolves.
#[derive(Debug, Clone)]
pub(crate) struct SectionTarget {
    pub id: u32,
    pub owner: ScopeId,
    /// Walk slot of the region in the owner's frame.
    pub slot: u32,
    pub region: NodeId,
    pub branch: String,
}

pub(crate) struct PendingSection {
    pub target: SectionTarget,
    pub future: LocalBoxFuture<'static, std::result::Result<Value, String>>,
}

pub struct Session {
    pub(crate) registry: TemplateRegistry,
    pub(crate) config: RuntimeConfig,
    pub(crate) document: Document,
    pub(crate) store: ScopeStore,
    pub(crate) graph: SignalGraph,
    /// Template bound to every frame scope, embedded children included.
    pub(crate) frames: HashMap<ScopeId, Rc<Template>>,
    pub(crate) instances: HashMap<ScopeId, InstanceRecord>,
    pub(crate) mutations: Vec<Mutation>,
    /// Scopes created during the current drain; their initial content is not a mutation.
    pub(crate) fresh: HashSet<ScopeId>,
    pub(crate) context: Value,
    pub(crate) sections: Vec<PendingSection>,
    pub(crate) next_section: u32,
}

impl Session {
    pub fn new(registry: TemplateRegistry, config: RuntimeConfig) -> Self {
        Self::from_parts(registry, config, Document::new(), ScopeStore::new())
    }

    pub(crate) fn from_parts(
        registry: TemplateRegistry,
        config: RuntimeConfig,
        document: Document,
        store: ScopeStore,
    ) -> Self {
        Self {
            registry,
            config,
            document,
            store,
            graph: SignalGraph::new(),
            frames: HashMap::new(),
            instances: HashMap::new(),
            mutations: Vec::new(),
            fresh: HashSet::new(),
            context: Value::Null,
            sections: Vec::new(),
            next_section: 0,
        }
    }

    /// Read-only context passed to every setup function.
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn store(&self) -> &ScopeStore {
        &self.store
    }

    pub fn graph(&self) -> &SignalGraph {
        &self.graph
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn context(&self) -> &Value {
        &self.context
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Registry used for instances created from now on.
    pub fn registry_mut(&mut self) -> &mut TemplateRegistry {
        &mut self.registry
    }

    /// Output mutations applied so far, oldest first.
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn take_mutations(&mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.mutations)
    }

    pub fn instance(&self, scope: ScopeId) -> Option<&InstanceRecord> {
        self.instances.get(&scope)
    }

    /// Template bound to a frame scope.
    pub fn frame_template(&self, scope: ScopeId) -> Option<&Rc<Template>> {
        self.frames.get(&scope)
    }

    /// `(template, scope)` for every mounted instance, in document order.
    pub fn hydrate_calls(&self) -> Vec<(TemplateId, ScopeId)> {
        self.document
            .instances_in_order()
            .into_iter()
            .filter_map(|(scope, _)| {
                self.instances
                    .get(&scope)
                    .map(|record| (record.template.id().to_owned(), scope))
            })
            .collect()
    }

    /// Visible markup of the whole document.
    pub fn html(&self) -> String {
        inner_markup(&self.document, self.document.root(), Markers::Omit)
    }

    /// Markup with hydration markers.
    pub fn markup(&self) -> String {
        inner_markup(&self.document, self.document.root(), Markers::Emit)
    }

    /// Node bound at walk slot `#slot` of `scope`.
    pub fn node_slot(&self, scope: ScopeId, slot: u32) -> Result<NodeId> {
        let node = self
            .store
            .get(scope, &SlotKey::Index(slot))?
            .as_node()
            .filter(|&node| self.document.node(node).is_some());
        node.ok_or_else(|| self.mismatch(scope, slot as usize, format!("slot #{slot} does not hold a live node")))
    }

    /// Scope of the embedded child bound at walk slot `#slot` of `scope`.
    pub fn child_slot(&self, scope: ScopeId, slot: u32) -> Result<ScopeId> {
        let child = self
            .store
            .get(scope, &SlotKey::Index(slot))?
            .as_scope()
            .filter(|&child| self.store.contains(child));
        child.ok_or_else(|| self.mismatch(scope, slot as usize, format!("slot #{slot} does not hold a live scope")))
    }

    pub(crate) fn mismatch(&self, scope: ScopeId, position: usize, reason: String) -> RuntimeError {
        RuntimeError::StructuralMismatch {
            template: self
                .frames
                .get(&scope)
                .map_or_else(|| format!("scope {scope}"), |t| t.id().to_owned()),
            position,
            reason,
        }
    }

    pub fn has_pending_sections(&self) -> bool {
        !self.sections.is_empty()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("scopes", &self.store.len())
            .field("nodes", &self.document.len())
            .field("instances", &self.instances.len())
            .field("mutations", &self.mutations.len())
            .field("pending_sections", &self.sections.len())
            .finish_non_exhaustive()
    }
}
