//! Scope Store - arena of reactive state containers.
//!
//! Scopes are indices into a growable table, the same way components are
//! indices into parallel arrays. A scope's parent is a plain index used only
//! for inherited lookups; ownership stays with whoever created the scope.
//!
//! The store is a pure data container: `set` never propagates anything.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RuntimeError};
use crate::types::{ScopeId, SlotKey, Value};

// =============================================================================
// Scope
// =============================================================================

/// One scope record.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub id: ScopeId,
    pub parent: Option<ScopeId>,
    pub slots: IndexMap<SlotKey, Value>,
}

/// Serializable form of one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeSnapshot {
    pub id: ScopeId,
    #[serde(default)]
    pub parent: Option<ScopeId>,
    #[serde(default)]
    pub slots: IndexMap<SlotKey, Value>,
}

impl ScopeSnapshot {
    /// Drop node references; they only mean something in the document that made them.
    pub fn without_nodes(mut self) -> Self {
        self.slots.retain(|_, value| !matches!(value, Value::Node(_)));
        self
    }
}

/// One scope entry in a [`StoreSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeRecord {
    #[serde(default)]
    pub parent: Option<ScopeId>,
    #[serde(default)]
    pub slots: IndexMap<SlotKey, Value>,
}

/// Every scope of a session, keyed by id: the embedded hydrate-scope payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreSnapshot(pub BTreeMap<ScopeId, ScopeRecord>);

impl StoreSnapshot {
    pub fn without_nodes(mut self) -> Self {
        for record in self.0.values_mut() {
            record.slots.retain(|_, value| !matches!(value, Value::Node(_)));
        }
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// =============================================================================
// Store
// =============================================================================

/// Highest scope id a store accepts from a snapshot unless told otherwise.
pub const DEFAULT_ID_LIMIT: u32 = 1 << 20;

/// Arena of scopes with monotonic ids.
#[derive(Debug)]
pub struct ScopeStore {
    scopes: Vec<Option<Scope>>,
    next_id: u32,
    /// Loaded ids must stay below this; the table is indexed by id.
    id_limit: u32,
}

impl Default for ScopeStore {
    fn default() -> Self {
        Self::with_id_limit(DEFAULT_ID_LIMIT)
    }
}

impl ScopeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects snapshot ids at or above `limit`.
    pub fn with_id_limit(limit: u32) -> Self {
        Self {
            scopes: Vec::new(),
            next_id: 0,
            id_limit: limit,
        }
    }

    /// Create an empty scope. Ids are never reused within a store.
    pub fn create_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.next_id);
        self.next_id += 1;
        self.put(Scope {
            id,
            parent,
            slots: IndexMap::new(),
        });
        debug!(scope = %id, parent = ?parent, "scope created");
        id
    }

    fn put(&mut self, scope: Scope) {
        let index = scope.id.index();
        if self.scopes.len() <= index {
            self.scopes.resize_with(index + 1, || None);
        }
        self.scopes[index] = Some(scope);
    }

    pub fn contains(&self, scope: ScopeId) -> bool {
        self.scope(scope).is_some()
    }

    pub fn scope(&self, scope: ScopeId) -> Option<&Scope> {
        self.scopes.get(scope.index()).and_then(Option::as_ref)
    }

    fn scope_mut(&mut self, scope: ScopeId) -> Result<&mut Scope> {
        self.scopes
            .get_mut(scope.index())
            .and_then(Option::as_mut)
            .ok_or(RuntimeError::UnknownScope(scope))
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scope(scope).and_then(|s| s.parent)
    }

    /// Id the next `create_scope` will hand out.
    pub fn next_id(&self) -> ScopeId {
        ScopeId(self.next_id)
    }

    pub fn len(&self) -> usize {
        self.scopes.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> impl Iterator<Item = ScopeId> + '_ {
        self.scopes.iter().flatten().map(|s| s.id)
    }

    // -------------------------------------------------------------------------
    // Slots
    // -------------------------------------------------------------------------

    /// Read a slot. Fails with `UnboundSlot` if nothing wrote it yet.
    pub fn get(&self, scope: ScopeId, key: &SlotKey) -> Result<&Value> {
        let record = self.scope(scope).ok_or(RuntimeError::UnknownScope(scope))?;
        record.slots.get(key).ok_or_else(|| RuntimeError::UnboundSlot {
            scope,
            key: key.clone(),
        })
    }

    pub fn try_get(&self, scope: ScopeId, key: &SlotKey) -> Option<&Value> {
        self.scope(scope).and_then(|s| s.slots.get(key))
    }

    /// Write a slot, overwriting in place. Keys are never removed.
    pub fn set(&mut self, scope: ScopeId, key: SlotKey, value: Value) -> Result<()> {
        self.scope_mut(scope)?.slots.insert(key, value);
        Ok(())
    }

    /// Read through the parent chain for an inherited binding.
    pub fn lookup(&self, scope: ScopeId, key: &SlotKey) -> Option<&Value> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let record = self.scope(id)?;
            if let Some(value) = record.slots.get(key) {
                return Some(value);
            }
            current = record.parent;
        }
        None
    }

    /// Named slots of a scope, the ones application logic wrote.
    pub fn data_slots(&self, scope: ScopeId) -> Vec<(SlotKey, Value)> {
        self.scope(scope)
            .map(|s| {
                s.slots
                    .iter()
                    .filter(|(key, value)| {
                        matches!(key, SlotKey::Name(name) if !name.starts_with('#'))
                            && !value.is_reference()
                    })
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Remove a scope and every scope below it. Returns the removed ids,
    /// the given scope first.
    pub fn destroy(&mut self, scope: ScopeId) -> Vec<ScopeId> {
        let mut removed = Vec::new();
        let mut stack = vec![scope];
        while let Some(id) = stack.pop() {
            let Some(slot) = self.scopes.get_mut(id.index()) else {
                continue;
            };
            if slot.take().is_none() {
                continue;
            }
            removed.push(id);
            stack.extend(
                self.scopes
                    .iter()
                    .flatten()
                    .filter(|s| s.parent == Some(id))
                    .map(|s| s.id),
            );
        }
        if !removed.is_empty() {
            debug!(scope = %scope, count = removed.len(), "scopes destroyed");
        }
        removed
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    pub fn dump(&self, scope: ScopeId) -> Result<ScopeSnapshot> {
        let record = self.scope(scope).ok_or(RuntimeError::UnknownScope(scope))?;
        Ok(ScopeSnapshot {
            id: record.id,
            parent: record.parent,
            slots: record.slots.clone(),
        })
    }

    /// Restore one scope under its recorded id.
    ///
    /// Snapshot ids come from served markup, so an id outside the store's
    /// limit is a `Snapshot` error rather than a table of that size.
    pub fn load(&mut self, snapshot: ScopeSnapshot) -> Result<ScopeId> {
        let id = snapshot.id;
        let next = id
            .0
            .checked_add(1)
            .filter(|_| id.0 < self.id_limit)
            .ok_or_else(|| invalid_snapshot(format!("scope id {id} is out of range (limit {})", self.id_limit)))?;
        self.next_id = self.next_id.max(next);
        self.put(Scope {
            id,
            parent: snapshot.parent,
            slots: snapshot.slots,
        });
        Ok(id)
    }

    pub fn dump_all(&self) -> StoreSnapshot {
        StoreSnapshot(
            self.scopes
                .iter()
                .flatten()
                .map(|s| {
                    (
                        s.id,
                        ScopeRecord {
                            parent: s.parent,
                            slots: s.slots.clone(),
                        },
                    )
                })
                .collect(),
        )
    }

    /// Restore every scope of a snapshot. New ids continue above the highest loaded id.
    pub fn load_all(&mut self, snapshot: StoreSnapshot) -> Result<()> {
        let count = snapshot.0.len();
        for (id, record) in snapshot.0 {
            self.load(ScopeSnapshot {
                id,
                parent: record.parent,
                slots: record.slots,
            })?;
        }
        debug!(count, next = %self.next_id(), "scopes loaded");
        Ok(())
    }
}

fn invalid_snapshot(reason: String) -> RuntimeError {
    RuntimeError::Snapshot(serde_json::Error::custom(reason))
}
