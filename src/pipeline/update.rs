//! Update Engine - applies fired effects to the output document.
//!
//! Every effect names the walk slot it mutates, so an update is always a
//! pinpoint change to one bound node. Nothing is diffed; the only comparison
//! is against the node's current content, so rewriting an unchanged value is
//! not a mutation.
//!
//! Applied mutations are recorded in [`Session::mutations`]. Content created
//! for a scope during the same drain (a freshly mounted branch, say) is part
//! of that scope's first render and is not recorded separately.

use std::rc::Rc;

use tracing::{instrument, trace};

use super::session::Session;
use crate::error::{Result, RuntimeError};
use crate::signals::{CustomFn, EffectAction, EffectContext, ReadyEffect};
use crate::tree::{self, inner_markup, Markers, NodeKind};
use crate::types::{NodeAddress, NodeId, ScopeId, SlotKey, Value};

/// One output change, addressed by child-index path from the document root.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Text { target: NodeAddress, text: String },
    Html { target: NodeAddress, html: String },
    SetAttr {
        target: NodeAddress,
        name: String,
        value: String,
    },
    RemoveAttr { target: NodeAddress, name: String },
    /// A branch instance was mounted into the region at `target`.
    Insert {
        target: NodeAddress,
        template: String,
        scope: ScopeId,
    },
    /// The branch instance owned by `scope` was removed from `target`.
    Remove { target: NodeAddress, scope: ScopeId },
}

impl Mutation {
    pub fn target(&self) -> &NodeAddress {
        match self {
            Self::Text { target, .. }
            | Self::Html { target, .. }
            | Self::SetAttr { target, .. }
            | Self::RemoveAttr { target, .. }
            | Self::Insert { target, .. }
            | Self::Remove { target, .. } => target,
        }
    }
}

impl Session {
    // =========================================================================
    // Writes
    // =========================================================================

    /// Write a slot and run every wave it causes.
    pub fn write(&mut self, scope: ScopeId, key: impl Into<SlotKey>, value: impl Into<Value>) -> Result<()> {
        self.write_deferred(scope, key, value)?;
        self.drain()
    }

    /// Write a slot without draining. Call [`drain`](Self::drain) to apply.
    pub fn write_deferred(
        &mut self,
        scope: ScopeId,
        key: impl Into<SlotKey>,
        value: impl Into<Value>,
    ) -> Result<()> {
        if !self.store.contains(scope) {
            return Err(RuntimeError::UnknownScope(scope));
        }
        self.graph
            .write(&mut self.store, scope, key.into(), value.into())
    }

    /// Write several slots as one burst, then drain once.
    pub fn batch<K, V>(&mut self, writes: impl IntoIterator<Item = (ScopeId, K, V)>) -> Result<()>
    where
        K: Into<SlotKey>,
        V: Into<Value>,
    {
        for (scope, key, value) in writes {
            self.write_deferred(scope, key, value)?;
        }
        self.drain()
    }

    // =========================================================================
    // Draining
    // =========================================================================

    /// Fire ready effects until the graph is idle.
    ///
    /// Writes held back during a wave start the next one, up to
    /// `max_waves` waves per drain. A failing effect drops whatever was still
    /// queued.
    #[instrument(level = "trace", skip(self), fields(wave = self.graph.wave()))]
    pub fn drain(&mut self) -> Result<()> {
        let result = self.run_waves();
        if result.is_err() {
            self.graph.abort_wave();
        }
        self.fresh.clear();
        result
    }

    fn run_waves(&mut self) -> Result<()> {
        let mut waves = 0;
        loop {
            while let Some(effect) = self.graph.next_effect(&mut self.store)? {
                self.apply_effect(&effect)?;
            }
            self.graph.finish_wave();
            waves += 1;

            if !self.graph.has_pending() {
                return Ok(());
            }
            if waves >= self.config.max_waves {
                return Err(RuntimeError::WaveLimit(waves));
            }
            self.graph.start_pending_wave(&mut self.store)?;
        }
    }

    // =========================================================================
    // Effects
    // =========================================================================

    fn apply_effect(&mut self, effect: &ReadyEffect) -> Result<()> {
        let Some(action) = effect.action().cloned() else {
            return Ok(());
        };
        let scope = effect.scope;

        match action {
            EffectAction::Text { node, from } => {
                let text = self.read(scope, &from)?.to_text();
                let target = self.node_slot(scope, node)?;
                self.apply_text(scope, target, &text);
            }
            EffectAction::Html { node, from } => {
                let html = self.read(scope, &from)?.to_text();
                let target = self.node_slot(scope, node)?;
                self.apply_html(scope, target, &html)?;
            }
            EffectAction::Attr { node, name, from } => {
                let value = self.read(scope, &from)?;
                let target = self.node_slot(scope, node)?;
                self.apply_attr(scope, target, &name, &value);
            }
            EffectAction::Conditional { node, from, branch } => {
                let value = self.read(scope, &from)?;
                self.apply_conditional(scope, node, &branch, value)?;
            }
            EffectAction::Child { frame, inputs } => {
                let child = self.child_slot(scope, frame)?;
                for (from, to) in inputs {
                    let value = self.read(scope, &from)?;
                    self.graph.write(&mut self.store, child, to, value)?;
                }
            }
            EffectAction::Custom(run) => self.run_custom(scope, &run),
        }
        Ok(())
    }

    /// Run a custom effect against `scope`. Its writes land in the next wave.
    pub(crate) fn run_custom(&mut self, scope: ScopeId, run: &CustomFn) {
        let mut ctx = EffectContext::new(scope, &self.store);
        run(&mut ctx);
        for (target, key, value) in ctx.into_queued() {
            self.graph.queue(target, key, value);
        }
    }

    /// Slot value visible from `scope`, inherited through parents.
    fn read(&self, scope: ScopeId, key: &SlotKey) -> Result<Value> {
        self.store
            .lookup(scope, key)
            .cloned()
            .ok_or_else(|| RuntimeError::UnboundSlot {
                scope,
                key: key.clone(),
            })
    }

    fn apply_text(&mut self, scope: ScopeId, target: NodeId, text: &str) {
        if let Some(NodeKind::Text(current)) = self.document.kind(target) {
            if current == text {
                return;
            }
            self.document.set_text(target, text);
        } else {
            if self.plain_text(target).as_deref() == Some(text) {
                return;
            }
            self.document.replace_with_text(target, text);
        }
        let target = self.document.address(target);
        self.record(
            scope,
            Mutation::Text {
                target,
                text: text.to_owned(),
            },
        );
    }

    /// Content of a container holding nothing but one text node.
    fn plain_text(&self, id: NodeId) -> Option<String> {
        match self.document.children(id) {
            [] => Some(String::new()),
            [only] => match self.document.kind(*only) {
                Some(NodeKind::Text(text)) => Some(text.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    fn apply_html(&mut self, scope: ScopeId, target: NodeId, html: &str) -> Result<()> {
        let parsed = tree::parse(html)?;
        let incoming = inner_markup(&parsed, parsed.root(), Markers::Omit);
        if inner_markup(&self.document, target, Markers::Omit) == incoming {
            return Ok(());
        }
        self.document.clear_children(target);
        self.document
            .clone_children_from(&parsed, parsed.root(), target);
        let target = self.document.address(target);
        self.record(
            scope,
            Mutation::Html {
                target,
                html: incoming,
            },
        );
        Ok(())
    }

    fn apply_attr(&mut self, scope: ScopeId, target: NodeId, name: &str, value: &Value) {
        let wanted = match value {
            Value::Null | Value::Bool(false) => None,
            Value::Bool(true) => Some(String::new()),
            other => Some(other.to_text()),
        };
        if self.document.attr(target, name) == wanted.as_deref() {
            return;
        }
        let address = self.document.address(target);
        let mutation = match wanted {
            Some(value) => {
                self.document.set_attr(target, name, &value);
                Mutation::SetAttr {
                    target: address,
                    name: name.to_owned(),
                    value,
                }
            }
            None => {
                self.document.remove_attr(target, name);
                Mutation::RemoveAttr {
                    target: address,
                    name: name.to_owned(),
                }
            }
        };
        self.record(scope, mutation);
    }

    fn apply_conditional(&mut self, scope: ScopeId, node: u32, branch: &str, value: Value) -> Result<()> {
        let region = self.node_slot(scope, node)?;
        let key = SlotKey::branch(node);
        let mounted = self
            .store
            .try_get(scope, &key)
            .and_then(Value::as_scope)
            .filter(|&child| self.store.contains(child));

        match (value.is_truthy(), mounted) {
            (true, None) => {
                let template = self.registry.get(branch)?;
                let child = self.store.create_scope(Some(scope));
                self.store.set(scope, key, Value::Scope(child))?;
                self.document.clear_children(region);
                self.instantiate(Rc::clone(&template), child, region, 0, &value)?;
                let target = self.document.address(region);
                self.record(
                    scope,
                    Mutation::Insert {
                        target,
                        template: template.id().to_owned(),
                        scope: child,
                    },
                );
            }
            (true, Some(child)) => {
                if self.instances.contains_key(&child) {
                    self.write_setup(child, value)?;
                }
            }
            (false, Some(child)) => {
                let target = self.document.address(region);
                self.teardown(child);
                self.document.clear_children(region);
                self.store.set(scope, key, Value::Null)?;
                self.record(scope, Mutation::Remove { target, scope: child });
            }
            (false, None) => {}
        }
        Ok(())
    }

    fn record(&mut self, scope: ScopeId, mutation: Mutation) {
        if self.fresh.contains(&scope) {
            return;
        }
        trace!(scope = %scope, target = %mutation.target(), ?mutation, "mutation");
        self.mutations.push(mutation);
    }
}
