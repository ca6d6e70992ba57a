//! Runtime signal graph: waves over attached [`GraphSpec`]s.
//!
//! # Waves
//!
//! A wave starts with one or more writes and ends when no ready node is left.
//! Ready nodes sit in one ordered queue keyed by `(scope, signal)`, so within a
//! scope nodes fire in registration order (which is dependency order) and
//! independent effects fire in the order they were registered.
//!
//! ```text
//! write ─► Value (DIRTY) ─► Intersection (all inputs arrived?) ─► Effect
//!                      └──────────────────────────────────────► Effect
//! ```
//!
//! The queue is drained step by step through [`SignalGraph::next_effect`]
//! rather than by recursion, so depth of the output tree never becomes depth
//! of the call stack. The caller applies each returned effect.
//!
//! Writes that would touch a node which already fired in the current wave
//! are held back and start the next wave.

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use bitflags::bitflags;
use smallvec::SmallVec;
use tracing::trace;

use super::spec::{EffectAction, GraphSpec, SignalKind, SignalRef};
use crate::engine::ScopeStore;
use crate::error::Result;
use crate::types::{ScopeId, SlotKey, Value};

bitflags! {
    /// Per-wave node state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SignalFlags: u8 {
        /// Written in this wave.
        const DIRTY = 1 << 0;
        /// Waiting in the ready queue.
        const QUEUED = 1 << 1;
        /// Already fired in this wave.
        const FIRED = 1 << 2;
    }
}

/// A write held for the next wave.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub scope: ScopeId,
    pub key: SlotKey,
    pub value: Value,
}

/// An effect whose inputs have settled.
#[derive(Debug, Clone)]
pub struct ReadyEffect {
    pub scope: ScopeId,
    pub signal: SignalRef,
    spec: Rc<GraphSpec>,
}

impl ReadyEffect {
    pub fn action(&self) -> Option<&EffectAction> {
        self.spec.action(self.signal)
    }
}

type Key = (ScopeId, SignalRef);

/// Live propagation state for every attached scope.
#[derive(Debug, Default)]
pub struct SignalGraph {
    attached: HashMap<ScopeId, Rc<GraphSpec>>,
    /// Intersection inputs seen so far. Kept across waves until complete.
    arrivals: HashMap<Key, SmallVec<[SignalRef; 4]>>,
    flags: HashMap<Key, SignalFlags>,
    ready: BTreeSet<Key>,
    pending: Vec<PendingWrite>,
    wave: u64,
    fired: usize,
}

impl SignalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Attachment
    // -------------------------------------------------------------------------

    /// Wire a scope to its template's signal graph. Arrival state starts empty.
    pub fn attach(&mut self, scope: ScopeId, spec: Rc<GraphSpec>) {
        trace!(scope = %scope, nodes = spec.len(), "graph attached");
        self.attached.insert(scope, spec);
    }

    /// Forget a scope and everything queued for it.
    pub fn detach(&mut self, scope: ScopeId) {
        self.attached.remove(&scope);
        self.arrivals.retain(|(s, _), _| *s != scope);
        self.flags.retain(|(s, _), _| *s != scope);
        self.ready.retain(|(s, _)| *s != scope);
        self.pending.retain(|write| write.scope != scope);
    }

    pub fn is_attached(&self, scope: ScopeId) -> bool {
        self.attached.contains_key(&scope)
    }

    pub fn spec(&self, scope: ScopeId) -> Option<&Rc<GraphSpec>> {
        self.attached.get(&scope)
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Store a value and mark its Value node dirty for the current wave.
    ///
    /// A key with no Value node is stored and goes no further.
    pub fn write(&mut self, store: &mut ScopeStore, scope: ScopeId, key: SlotKey, value: Value) -> Result<()> {
        let signal = self
            .attached
            .get(&scope)
            .and_then(|spec| spec.signal_for(&key).map(|signal| (signal, spec.clone())));

        let Some((signal, spec)) = signal else {
            trace!(scope = %scope, key = %key, "write without consumer");
            return store.set(scope, key, value);
        };

        if self.has_fired(scope, signal, &spec) {
            trace!(scope = %scope, key = %key, "write held for next wave");
            self.pending.push(PendingWrite { scope, key, value });
            return Ok(());
        }

        store.set(scope, key, value)?;
        let flags = self.flags.entry((scope, signal)).or_default();
        flags.insert(SignalFlags::DIRTY | SignalFlags::QUEUED);
        self.ready.insert((scope, signal));
        Ok(())
    }

    /// Hold a write for the next wave.
    pub fn queue(&mut self, scope: ScopeId, key: SlotKey, value: Value) {
        self.pending.push(PendingWrite { scope, key, value });
    }

    fn has_fired(&self, scope: ScopeId, signal: SignalRef, spec: &GraphSpec) -> bool {
        let fired = |s: SignalRef| {
            self.flags
                .get(&(scope, s))
                .is_some_and(|f| f.contains(SignalFlags::FIRED))
        };
        fired(signal)
            || spec
                .node(signal)
                .is_some_and(|node| node.dependents.iter().any(|&d| fired(d)))
    }

    // -------------------------------------------------------------------------
    // Draining
    // -------------------------------------------------------------------------

    /// Settle queued nodes in order until an effect is ready to apply.
    ///
    /// Value and Intersection nodes are settled here; effects are handed back
    /// to the caller. `None` means the wave has nothing left to fire.
    pub fn next_effect(&mut self, store: &mut ScopeStore) -> Result<Option<ReadyEffect>> {
        while let Some((scope, signal)) = self.ready.pop_first() {
            let Some(spec) = self.attached.get(&scope).cloned() else {
                continue;
            };
            let Some(node) = spec.node(signal) else {
                continue;
            };

            let flags = self.flags.entry((scope, signal)).or_default();
            flags.remove(SignalFlags::QUEUED);
            flags.insert(SignalFlags::FIRED);
            self.fired += 1;

            match &node.kind {
                SignalKind::Value { key } => {
                    trace!(scope = %scope, signal = signal.0, key = %key, "value settled");
                }
                SignalKind::Intersection { inputs, derive } => {
                    trace!(scope = %scope, signal = signal.0, "intersection fired");
                    if let Some(derive) = derive {
                        let values: Vec<Value> = inputs
                            .iter()
                            .map(|&input| signal_value(store, scope, &spec, input))
                            .collect();
                        store.set(scope, derive.key.clone(), (derive.compute)(&values))?;
                    }
                }
                SignalKind::Effect { .. } => {
                    trace!(scope = %scope, signal = signal.0, "effect fired");
                    return Ok(Some(ReadyEffect {
                        scope,
                        signal,
                        spec: spec.clone(),
                    }));
                }
            }
            self.propagate(scope, &spec, signal);
        }
        Ok(None)
    }

    fn propagate(&mut self, scope: ScopeId, spec: &GraphSpec, from: SignalRef) {
        let Some(node) = spec.node(from) else {
            return;
        };
        for &dependent in &node.dependents {
            match spec.node(dependent).map(|n| &n.kind) {
                Some(SignalKind::Intersection { inputs, .. }) => {
                    let arrived = self.arrivals.entry((scope, dependent)).or_default();
                    if !arrived.contains(&from) {
                        arrived.push(from);
                    }
                    if arrived.len() >= inputs.len() {
                        self.arrivals.remove(&(scope, dependent));
                        self.enqueue(scope, dependent);
                    }
                }
                Some(SignalKind::Effect { .. }) => self.enqueue(scope, dependent),
                Some(SignalKind::Value { .. }) | None => {}
            }
        }
    }

    fn enqueue(&mut self, scope: ScopeId, signal: SignalRef) {
        let flags = self.flags.entry((scope, signal)).or_default();
        if flags.intersects(SignalFlags::FIRED | SignalFlags::QUEUED) {
            return;
        }
        flags.insert(SignalFlags::QUEUED);
        self.ready.insert((scope, signal));
    }

    /// Close the current wave: clear per-wave flags. Arrival sets persist.
    pub fn finish_wave(&mut self) -> usize {
        let fired = std::mem::take(&mut self.fired);
        if fired > 0 {
            trace!(wave = self.wave, fired, "wave finished");
        }
        self.flags.clear();
        self.wave += 1;
        fired
    }

    /// Drop everything in flight after a failed effect.
    pub fn abort_wave(&mut self) {
        self.ready.clear();
        self.flags.clear();
        self.pending.clear();
        self.fired = 0;
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Start the next wave from the held writes.
    pub fn start_pending_wave(&mut self, store: &mut ScopeStore) -> Result<()> {
        for write in std::mem::take(&mut self.pending) {
            self.write(store, write.scope, write.key, write.value)?;
        }
        Ok(())
    }

    pub fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.pending.is_empty()
    }

    /// Number of waves finished so far.
    pub fn wave(&self) -> u64 {
        self.wave
    }

    /// Inputs an intersection has seen since it last fired.
    pub fn arrivals(&self, scope: ScopeId, signal: SignalRef) -> usize {
        self.arrivals.get(&(scope, signal)).map_or(0, SmallVec::len)
    }
}

/// Current value of a node: a Value's slot, or a derived intersection's result.
fn signal_value(store: &ScopeStore, scope: ScopeId, spec: &GraphSpec, signal: SignalRef) -> Value {
    let key = match spec.node(signal).map(|n| &n.kind) {
        Some(SignalKind::Value { key }) => key,
        Some(SignalKind::Intersection {
            derive: Some(derive),
            ..
        }) => &derive.key,
        _ => return Value::Null,
    };
    store.try_get(scope, key).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::spec::EffectAction;

    /// Drain one wave and report fired effects as (scope, signal).
    fn drain(graph: &mut SignalGraph, store: &mut ScopeStore) -> Vec<(ScopeId, SignalRef)> {
        let mut fired = Vec::new();
        while let Some(effect) = graph.next_effect(store).unwrap() {
            fired.push((effect.scope, effect.signal));
        }
        graph.finish_wave();
        fired
    }

    fn setup(spec: GraphSpec) -> (SignalGraph, ScopeStore, ScopeId) {
        let mut store = ScopeStore::new();
        let scope = store.create_scope(None);
        let mut graph = SignalGraph::new();
        graph.attach(scope, Rc::new(spec));
        (graph, store, scope)
    }

    #[test]
    fn test_coalesced_writes_fire_once_with_latest_value() {
        let mut builder = GraphSpec::builder();
        let count = builder.value("count");
        let effect = builder.effect(&[count], EffectAction::text(0, "count"));
        let (mut graph, mut store, scope) = setup(builder.build().unwrap());

        graph.write(&mut store, scope, "count".into(), Value::from(1)).unwrap();
        graph.write(&mut store, scope, "count".into(), Value::from(2)).unwrap();
        assert_eq!(drain(&mut graph, &mut store), vec![(scope, effect)]);
        assert_eq!(store.get(scope, &"count".into()).unwrap(), &Value::from(2));
    }

    #[test]
    fn test_intersection_waits_for_every_input() {
        let mut builder = GraphSpec::builder();
        let x = builder.value("x");
        let y = builder.value("y");
        let both = builder.derived(&[x, y], "sum", |values| {
            Value::from(values.iter().filter_map(Value::as_int).sum::<i64>())
        });
        let effect = builder.effect(&[both], EffectAction::text(0, "sum"));
        let (mut graph, mut store, scope) = setup(builder.build().unwrap());

        graph.write(&mut store, scope, "x".into(), Value::from(2)).unwrap();
        assert!(drain(&mut graph, &mut store).is_empty());
        assert_eq!(graph.arrivals(scope, both), 1);

        graph.write(&mut store, scope, "y".into(), Value::from(3)).unwrap();
        assert_eq!(drain(&mut graph, &mut store), vec![(scope, effect)]);
        assert_eq!(store.get(scope, &"sum".into()).unwrap(), &Value::from(5));
        assert_eq!(graph.arrivals(scope, both), 0);

        // both in one burst: exactly one firing
        graph.write(&mut store, scope, "x".into(), Value::from(1)).unwrap();
        graph.write(&mut store, scope, "y".into(), Value::from(1)).unwrap();
        assert_eq!(drain(&mut graph, &mut store), vec![(scope, effect)]);
    }

    #[test]
    fn test_independent_effects_fire_in_registration_order() {
        let mut builder = GraphSpec::builder();
        let a = builder.value("a");
        let b = builder.value("b");
        let first = builder.effect(&[b], EffectAction::text(0, "b"));
        let second = builder.effect(&[a], EffectAction::text(1, "a"));
        let (mut graph, mut store, scope) = setup(builder.build().unwrap());

        graph.write(&mut store, scope, "a".into(), Value::from(1)).unwrap();
        graph.write(&mut store, scope, "b".into(), Value::from(1)).unwrap();
        assert_eq!(
            drain(&mut graph, &mut store),
            vec![(scope, first), (scope, second)]
        );
    }

    #[test]
    fn test_write_without_value_node_only_stores() {
        let (mut graph, mut store, scope) = setup(GraphSpec::default());
        graph.write(&mut store, scope, "note".into(), Value::from("x")).unwrap();
        assert!(drain(&mut graph, &mut store).is_empty());
        assert_eq!(store.get(scope, &"note".into()).unwrap(), &Value::from("x"));
    }

    #[test]
    fn test_write_after_fire_waits_for_next_wave() {
        let mut builder = GraphSpec::builder();
        let count = builder.value("count");
        builder.effect(&[count], EffectAction::text(0, "count"));
        let (mut graph, mut store, scope) = setup(builder.build().unwrap());

        graph.write(&mut store, scope, "count".into(), Value::from(1)).unwrap();
        assert!(graph.next_effect(&mut store).unwrap().is_some());
        graph.write(&mut store, scope, "count".into(), Value::from(2)).unwrap();
        assert_eq!(store.get(scope, &"count".into()).unwrap(), &Value::from(1));
        assert!(graph.next_effect(&mut store).unwrap().is_none());
        graph.finish_wave();

        assert!(graph.has_pending());
        graph.start_pending_wave(&mut store).unwrap();
        assert_eq!(drain(&mut graph, &mut store).len(), 1);
        assert_eq!(store.get(scope, &"count".into()).unwrap(), &Value::from(2));
    }
}
