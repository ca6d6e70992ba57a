//! Mount API - instantiating templates into a session.
//!
//! Instantiation is shared by every path that creates output:
//!
//! 1. allocate an instance node and clone the template's static fragment
//! 2. walk it (placeholders become regions) and bind every walk slot
//! 3. attach signal graphs for the instance and its embedded children
//! 4. write setup results through the graph (children first, then the root)
//!
//! Instantiation never drains. The caller decides when the wave runs, so a
//! branch mounted from inside an effect joins the wave already in progress.
//!
//! # Example
//!
//! ```ignore
//! let mut handle = spark_hydrate::pipeline::mount(registry, "counter", input)?;
//! handle.write("count", Value::from(5))?;
//! handle.update(Value::from([("count", Value::from(6))]))?;
//! handle.unmount()?;
//! ```

use std::collections::HashSet;
use std::rc::Rc;

use futures::executor::block_on;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tracing::debug;

use super::session::{InstanceRecord, PendingSection, SectionTarget, Session};
use crate::config::RuntimeConfig;
use crate::engine::TemplateRegistry;
use crate::error::{Result, RuntimeError};
use crate::primitives::Template;
use crate::tree::{Binding, CursorMode, DocCursor, NodeFlags, NodeKind};
use crate::types::{NodeId, ScopeId, SlotKey, Value};
use crate::walk::{interpret, WalkFrame, WalkSlot};

/// Frames bound by one walk: `(scope, template)`, children before their parent.
pub(crate) type BoundFrames = Vec<(ScopeId, Rc<Template>)>;

impl Session {
    // =========================================================================
    // Instantiate
    // =========================================================================

    /// Create an instance of `template` owned by `scope` at `container[index]`.
    pub(crate) fn instantiate(
        &mut self,
        template: Rc<Template>,
        scope: ScopeId,
        container: NodeId,
        index: usize,
        input: &Value,
    ) -> Result<NodeId> {
        let node = self.document.alloc(NodeKind::Instance(scope));
        self.document.insert(container, index, node);
        let fragment = template.fragment();
        self.document
            .clone_children_from(fragment, fragment.root(), node);

        let frame = interpret(
            template.walks(),
            &mut DocCursor::new(&mut self.document, node, CursorMode::Instantiate),
        )
        .map_err(|err| err.in_template(template.id()))?;

        let mut bound = BoundFrames::new();
        let mut claimed = HashSet::new();
        self.bind_frame(CursorMode::Instantiate, &template, scope, frame, &mut bound, &mut claimed)?;
        self.attach_frames(&bound);
        self.instances.insert(
            scope,
            InstanceRecord {
                template: Rc::clone(&template),
                node,
                input: input.clone(),
            },
        );

        for (frame_scope, frame_template) in &bound {
            self.fresh.insert(*frame_scope);
            let frame_input = if *frame_scope == scope { input } else { &Value::Null };
            for (key, value) in frame_template.setup_slots(frame_input, &self.context) {
                self.graph.write(&mut self.store, *frame_scope, key, value)?;
            }
        }
        for (frame_scope, frame_template) in &bound {
            self.start_sections(frame_template, *frame_scope)?;
        }

        debug!(template = template.id(), scope = %scope, frames = bound.len(), "instance created");
        Ok(node)
    }

    /// Bind the slots of one walk frame to `scope`, recursing into child frames.
    ///
    /// Instantiate mode records bindings on the nodes and creates child scopes.
    /// Recover mode checks the bindings the markers left on the nodes and reads
    /// child scopes from the loaded snapshot.
    pub(crate) fn bind_frame(
        &mut self,
        mode: CursorMode,
        template: &Rc<Template>,
        scope: ScopeId,
        frame: WalkFrame<NodeId>,
        bound: &mut BoundFrames,
        claimed: &mut HashSet<NodeId>,
    ) -> Result<()> {
        let mismatch = |position: usize, reason: String| RuntimeError::StructuralMismatch {
            template: template.id().to_owned(),
            position,
            reason,
        };
        let mut children = template.children().iter();

        for (i, slot) in frame.slots.into_iter().enumerate() {
            let key = SlotKey::Index(i as u32);
            let expected = Binding {
                scope,
                slot: i as u32,
            };
            match slot {
                WalkSlot::Node { node, .. } => {
                    match mode {
                        CursorMode::Instantiate => self.document.bind(node, expected),
                        CursorMode::Recover => {
                            let found = self.document.binding(node);
                            if found != Some(expected) {
                                return Err(mismatch(
                                    i,
                                    format!("walk reached a node marked {found:?}, expected scope {scope} #{i}"),
                                ));
                            }
                        }
                    }
                    claimed.insert(node);
                    self.store.set(scope, key, Value::Node(node))?;
                }
                WalkSlot::Child(child_frame) => {
                    let child_id = children
                        .next()
                        .ok_or_else(|| mismatch(i, "child frame without a child template".to_owned()))?;
                    let child_template = self.registry.get(child_id)?;
                    let child = match mode {
                        CursorMode::Instantiate => {
                            let child = self.store.create_scope(Some(scope));
                            self.store.set(scope, key, Value::Scope(child))?;
                            child
                        }
                        CursorMode::Recover => self
                            .store
                            .try_get(scope, &key)
                            .and_then(Value::as_scope)
                            .filter(|&child| self.store.contains(child))
                            .ok_or_else(|| mismatch(i, format!("snapshot has no child scope at #{i}")))?,
                    };
                    self.bind_frame(mode, &child_template, child, child_frame, bound, claimed)?;
                }
            }
        }

        bound.push((scope, Rc::clone(template)));
        Ok(())
    }

    pub(crate) fn attach_frames(&mut self, bound: &BoundFrames) {
        for (scope, template) in bound {
            self.graph.attach(*scope, Rc::clone(template.graph()));
            self.frames.insert(*scope, Rc::clone(template));
        }
    }

    // =========================================================================
    // Mount / Unmount
    // =========================================================================

    /// Mount a template at the end of the document and settle its first wave.
    pub fn mount(&mut self, template_id: &str, input: Value) -> Result<ScopeId> {
        let template = self.registry.get(template_id)?;
        let scope = self.store.create_scope(None);
        let root = self.document.root();
        let index = self.document.children(root).len();
        self.instantiate(template, scope, root, index, &input)?;
        self.drain()?;
        Ok(scope)
    }

    /// Remove a mounted instance and destroy its scopes.
    pub fn unmount(&mut self, scope: ScopeId) -> Result<()> {
        if !self.instances.contains_key(&scope) {
            return Err(RuntimeError::UnknownScope(scope));
        }
        self.teardown(scope);
        Ok(())
    }

    /// Drop an instance's output and every scope below it.
    pub(crate) fn teardown(&mut self, scope: ScopeId) {
        if let Some(node) = self.document.find_instance(scope) {
            self.document.remove_subtree(node);
        }
        for removed in self.store.destroy(scope) {
            self.forget(removed);
        }
    }

    /// Forget runtime wiring for a scope without touching the store.
    pub(crate) fn forget(&mut self, scope: ScopeId) {
        self.graph.detach(scope);
        self.frames.remove(&scope);
        self.instances.remove(&scope);
        self.sections.retain(|section| section.target.owner != scope);
    }

    /// Re-run an instance's setup with a new input, in one wave.
    pub fn update_input(&mut self, scope: ScopeId, input: Value) -> Result<()> {
        self.write_setup(scope, input)?;
        self.drain()
    }

    pub(crate) fn write_setup(&mut self, scope: ScopeId, input: Value) -> Result<()> {
        let record = self
            .instances
            .get_mut(&scope)
            .ok_or(RuntimeError::UnknownScope(scope))?;
        record.input = input.clone();
        let template = Rc::clone(&record.template);
        for (key, value) in template.setup_slots(&input, &self.context) {
            self.graph.write(&mut self.store, scope, key, value)?;
        }
        Ok(())
    }

    // =========================================================================
    // Deferred sections
    // =========================================================================

    fn start_sections(&mut self, template: &Template, scope: ScopeId) -> Result<()> {
        if template.sections().is_empty() {
            return Ok(());
        }
        let input = self
            .instances
            .get(&scope)
            .map(|record| record.input.clone())
            .unwrap_or_default();

        for section in template.sections() {
            let region = self.node_slot(scope, section.node)?;
            let id = self.next_section;
            self.next_section += 1;

            let placeholder = self.document.alloc(NodeKind::Comment(format!("?{id}")));
            self.document.clear_children(region);
            self.document.append(region, placeholder);
            self.document.set_flag(region, NodeFlags::PENDING, true);

            debug!(section = id, branch = %section.branch, scope = %scope, "section deferred");
            self.sections.push(PendingSection {
                target: SectionTarget {
                    id,
                    owner: scope,
                    slot: section.node,
                    region,
                    branch: section.branch.clone(),
                },
                future: (section.loader)(&input),
            });
        }
        Ok(())
    }

    /// Resolve every deferred section in completion order.
    ///
    /// Sections started by a filled branch join the same queue. `on_filled`
    /// runs after each branch is mounted, with the section id and the new
    /// instance node.
    pub fn resolve_sections(
        &mut self,
        mut on_filled: impl FnMut(&mut Session, u32, NodeId) -> Result<()>,
    ) -> Result<()> {
        let mut queue = FuturesUnordered::new();
        loop {
            for section in self.sections.drain(..) {
                let PendingSection { target, future } = section;
                queue.push(future.map(move |result| (target, result)).boxed_local());
            }
            let Some((target, result)) = block_on(queue.next()) else {
                return Ok(());
            };
            let value = result.map_err(|reason| RuntimeError::AsyncSection {
                section: target.id,
                reason,
            })?;
            if let Some(node) = self.fill_section(&target, value)? {
                on_filled(self, target.id, node)?;
            }
        }
    }

    fn fill_section(&mut self, target: &SectionTarget, value: Value) -> Result<Option<NodeId>> {
        if !self.store.contains(target.owner) || self.document.node(target.region).is_none() {
            debug!(section = target.id, "section owner gone");
            return Ok(None);
        }
        let template = self.registry.get(&target.branch)?;
        self.document.clear_children(target.region);
        self.document
            .set_flag(target.region, NodeFlags::PENDING, false);

        let scope = self.store.create_scope(Some(target.owner));
        self.store
            .set(target.owner, SlotKey::branch(target.slot), Value::Scope(scope))?;
        let node = self.instantiate(template, scope, target.region, 0, &value)?;
        self.drain()?;
        debug!(section = target.id, scope = %scope, "section filled");
        Ok(Some(node))
    }
}

// =============================================================================
// Mount Handle
// =============================================================================

/// A client-side mounted template and the session that owns it.
#[derive(Debug)]
pub struct MountHandle {
    session: Session,
    root: ScopeId,
}

impl MountHandle {
    pub fn scope(&self) -> ScopeId {
        self.root
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Write a slot of the root scope and run the resulting waves.
    pub fn write(&mut self, key: impl Into<SlotKey>, value: impl Into<Value>) -> Result<()> {
        self.session.write(self.root, key.into(), value.into())
    }

    /// Rewrite the root template's inputs.
    pub fn update(&mut self, input: Value) -> Result<()> {
        self.session.update_input(self.root, input)
    }

    pub fn html(&self) -> String {
        self.session.html()
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    pub fn unmount(mut self) -> Result<Session> {
        self.session.unmount(self.root)?;
        Ok(self.session)
    }
}

/// Mount a template into a fresh client-side session, with no server output.
///
/// Deferred sections are resolved before this returns.
pub fn mount(registry: TemplateRegistry, template_id: &str, input: Value) -> Result<MountHandle> {
    mount_with(registry, RuntimeConfig::default(), Value::Null, template_id, input)
}

pub fn mount_with(
    registry: TemplateRegistry,
    config: RuntimeConfig,
    context: Value,
    template_id: &str,
    input: Value,
) -> Result<MountHandle> {
    let mut session = Session::new(registry, config).with_context(context);
    let root = session.mount(template_id, input)?;
    session.resolve_sections(|_, _, _| Ok(()))?;
    Ok(MountHandle { session, root })
}
