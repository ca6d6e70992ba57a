//! Compiled signal wiring for one template.
//!
//! A [`GraphSpec`] is built once per template from the dependency structure
//! the template compiler worked out ahead of time. Nodes are registered in
//! dependency order (an input always exists before its consumer), so the
//! registration index doubles as a topological order.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::engine::ScopeStore;
use crate::error::Result;
use crate::types::{ScopeId, SlotKey, Value};

/// Index of a node within its [`GraphSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalRef(pub u32);

impl SignalRef {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

pub type DeriveFn = Rc<dyn Fn(&[Value]) -> Value>;
pub type CustomFn = Rc<dyn Fn(&mut EffectContext<'_>)>;

/// Computation attached to an intersection; the result is stored in `key`
/// before the intersection's dependents fire.
#[derive(Clone)]
pub struct Derive {
    pub key: SlotKey,
    pub compute: DeriveFn,
}

impl fmt::Debug for Derive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derive").field("key", &self.key).finish_non_exhaustive()
    }
}

// =============================================================================
// Effect actions
// =============================================================================

/// The mutation an effect applies, fixed when the template was compiled.
///
/// `node` and `frame` are walk slot indices of the scope the effect runs in.
#[derive(Clone)]
pub enum EffectAction {
    /// Replace the text of a bound text node or region (escaped).
    Text { node: u32, from: SlotKey },
    /// Replace the content of a region with trusted markup.
    Html { node: u32, from: SlotKey },
    /// Set an attribute; null or `false` removes it, `true` sets it empty.
    Attr { node: u32, name: String, from: SlotKey },
    /// Mount `branch` into a region while `from` is truthy.
    Conditional { node: u32, from: SlotKey, branch: String },
    /// Forward parent slots into an embedded child's scope.
    Child {
        frame: u32,
        inputs: Vec<(SlotKey, SlotKey)>,
    },
    /// Application side effect. Writes it makes run in the next wave.
    Custom(CustomFn),
}

impl EffectAction {
    pub fn text(node: u32, from: impl Into<SlotKey>) -> Self {
        Self::Text {
            node,
            from: from.into(),
        }
    }

    pub fn html(node: u32, from: impl Into<SlotKey>) -> Self {
        Self::Html {
            node,
            from: from.into(),
        }
    }

    pub fn attr(node: u32, name: impl Into<String>, from: impl Into<SlotKey>) -> Self {
        Self::Attr {
            node,
            name: name.into(),
            from: from.into(),
        }
    }

    pub fn conditional(node: u32, from: impl Into<SlotKey>, branch: impl Into<String>) -> Self {
        Self::Conditional {
            node,
            from: from.into(),
            branch: branch.into(),
        }
    }

    pub fn child<K: Into<SlotKey>>(frame: u32, inputs: impl IntoIterator<Item = (K, K)>) -> Self {
        Self::Child {
            frame,
            inputs: inputs
                .into_iter()
                .map(|(from, to)| (from.into(), to.into()))
                .collect(),
        }
    }

    pub fn custom(f: impl Fn(&mut EffectContext<'_>) + 'static) -> Self {
        Self::Custom(Rc::new(f))
    }
}

impl fmt::Debug for EffectAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text { node, from } => write!(f, "Text(#{node} <- {from})"),
            Self::Html { node, from } => write!(f, "Html(#{node} <- {from})"),
            Self::Attr { node, name, from } => write!(f, "Attr(#{node}.{name} <- {from})"),
            Self::Conditional { node, from, branch } => {
                write!(f, "Conditional(#{node} <- {from} ? {branch})")
            }
            Self::Child { frame, inputs } => write!(f, "Child(#{frame}, {inputs:?})"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// What a custom effect sees: its scope's slots, read-only, plus a write queue.
pub struct EffectContext<'a> {
    scope: ScopeId,
    store: &'a ScopeStore,
    queued: Vec<(ScopeId, SlotKey, Value)>,
}

impl<'a> EffectContext<'a> {
    pub(crate) fn new(scope: ScopeId, store: &'a ScopeStore) -> Self {
        Self {
            scope,
            store,
            queued: Vec::new(),
        }
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn get(&self, key: impl Into<SlotKey>) -> Result<&Value> {
        self.store.get(self.scope, &key.into())
    }

    /// Inherited read through the parent chain.
    pub fn lookup(&self, key: impl Into<SlotKey>) -> Option<&Value> {
        self.store.lookup(self.scope, &key.into())
    }

    /// Queue a write to this scope for the next wave.
    pub fn set(&mut self, key: impl Into<SlotKey>, value: impl Into<Value>) {
        self.queued.push((self.scope, key.into(), value.into()));
    }

    pub fn set_in(&mut self, scope: ScopeId, key: impl Into<SlotKey>, value: impl Into<Value>) {
        self.queued.push((scope, key.into(), value.into()));
    }

    pub(crate) fn into_queued(self) -> Vec<(ScopeId, SlotKey, Value)> {
        self.queued
    }
}

// =============================================================================
// Nodes
// =============================================================================

/// The three node kinds the compiler emits.
#[derive(Debug, Clone)]
pub enum SignalKind {
    /// Wraps one scope slot.
    Value { key: SlotKey },
    /// Fires once all inputs have arrived.
    Intersection {
        inputs: SmallVec<[SignalRef; 4]>,
        derive: Option<Derive>,
    },
    /// Leaf that applies output mutation.
    Effect {
        inputs: SmallVec<[SignalRef; 4]>,
        action: EffectAction,
    },
}

#[derive(Debug, Clone)]
pub struct SignalNode {
    pub kind: SignalKind,
    pub dependents: SmallVec<[SignalRef; 4]>,
}

/// Immutable signal wiring shared by every instance of a template.
#[derive(Debug, Clone, Default)]
pub struct GraphSpec {
    nodes: Vec<SignalNode>,
    by_key: HashMap<SlotKey, SignalRef>,
}

impl GraphSpec {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, signal: SignalRef) -> Option<&SignalNode> {
        self.nodes.get(signal.index())
    }

    /// Value node wrapping `key`, if any consumer exists for it.
    pub fn signal_for(&self, key: &SlotKey) -> Option<SignalRef> {
        self.by_key.get(key).copied()
    }

    pub fn action(&self, signal: SignalRef) -> Option<&EffectAction> {
        match self.node(signal).map(|n| &n.kind) {
            Some(SignalKind::Effect { action, .. }) => Some(action),
            _ => None,
        }
    }

    pub fn effects(&self) -> impl Iterator<Item = (SignalRef, &EffectAction)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, node)| match &node.kind {
                SignalKind::Effect { action, .. } => Some((SignalRef(i as u32), action)),
                _ => None,
            })
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Registers nodes in dependency order.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<SignalNode>,
    by_key: HashMap<SlotKey, SignalRef>,
    error: Option<String>,
}

impl GraphBuilder {
    fn push(&mut self, kind: SignalKind) -> SignalRef {
        let signal = SignalRef(self.nodes.len() as u32);
        let inputs: SmallVec<[SignalRef; 4]> = match &kind {
            SignalKind::Value { .. } => SmallVec::new(),
            SignalKind::Intersection { inputs, .. } | SignalKind::Effect { inputs, .. } => {
                inputs.clone()
            }
        };
        for input in inputs {
            let problem = match self.nodes.get_mut(input.index()) {
                Some(SignalNode {
                    kind: SignalKind::Effect { .. },
                    ..
                }) => Some(format!("node {} depends on effect {}", signal.0, input.0)),
                Some(node) => {
                    if !node.dependents.contains(&signal) {
                        node.dependents.push(signal);
                    }
                    None
                }
                None => Some(format!("node {} depends on unknown node {}", signal.0, input.0)),
            };
            if let Some(reason) = problem {
                self.fail(reason);
            }
        }
        self.nodes.push(SignalNode {
            kind,
            dependents: SmallVec::new(),
        });
        signal
    }

    fn fail(&mut self, reason: String) {
        self.error.get_or_insert(reason);
    }

    /// Value node for `key`. Asking twice returns the same node.
    pub fn value(&mut self, key: impl Into<SlotKey>) -> SignalRef {
        let key = key.into();
        if let Some(&signal) = self.by_key.get(&key) {
            return signal;
        }
        let signal = self.push(SignalKind::Value { key: key.clone() });
        self.by_key.insert(key, signal);
        signal
    }

    /// Intersection over two or more distinct inputs.
    pub fn intersection(&mut self, inputs: &[SignalRef]) -> SignalRef {
        let inputs = dedup(inputs);
        if inputs.len() < 2 {
            self.fail(format!("intersection needs at least 2 inputs, got {}", inputs.len()));
        }
        self.push(SignalKind::Intersection {
            inputs,
            derive: None,
        })
    }

    /// Intersection whose derived result lands in `key`.
    pub fn derived(
        &mut self,
        inputs: &[SignalRef],
        key: impl Into<SlotKey>,
        compute: impl Fn(&[Value]) -> Value + 'static,
    ) -> SignalRef {
        let signal = self.intersection(inputs);
        if let Some(SignalNode {
            kind: SignalKind::Intersection { derive, .. },
            ..
        }) = self.nodes.get_mut(signal.index())
        {
            *derive = Some(Derive {
                key: key.into(),
                compute: Rc::new(compute),
            });
        }
        signal
    }

    pub fn effect(&mut self, inputs: &[SignalRef], action: EffectAction) -> SignalRef {
        let inputs = dedup(inputs);
        if inputs.is_empty() {
            self.fail("effect without inputs".to_owned());
        }
        self.push(SignalKind::Effect { inputs, action })
    }

    pub fn build(self) -> std::result::Result<GraphSpec, String> {
        match self.error {
            Some(reason) => Err(reason),
            None => Ok(GraphSpec {
                nodes: self.nodes,
                by_key: self.by_key,
            }),
        }
    }
}

fn dedup(inputs: &[SignalRef]) -> SmallVec<[SignalRef; 4]> {
    let mut out: SmallVec<[SignalRef; 4]> = SmallVec::new();
    for &input in inputs {
        if !out.contains(&input) {
            out.push(input);
        }
    }
    out
}
