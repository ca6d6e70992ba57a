//! Core types for spark-hydrate.
//!
//! These types define the foundation that everything builds on.
//! They flow through the scope store, the signal graph and the output tree,
//! and define what the serializer and the hydrator agree on.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

// =============================================================================
// Identifiers
// =============================================================================

/// Identity of one scope, unique within a render session.
///
/// Ids are assigned monotonically and never reused. After hydration the
/// counter continues above the highest id found in the embedded snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(pub u32);

impl ScopeId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a node in a [`Document`](crate::tree::Document) arena.
///
/// Node ids are stable for the lifetime of the node. They are only
/// meaningful inside the document that allocated them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Registry key of a compiled template, as written into hydrate calls.
pub type TemplateId = String;

// =============================================================================
// Node Address
// =============================================================================

/// Logical address of a node: child indices from the document root.
///
/// Unlike [`NodeId`], an address is comparable across documents. A node
/// found by a walk over freshly rendered output and the node found by the
/// same walk over re-parsed output have equal addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NodeAddress(SmallVec<[u32; 8]>);

impl NodeAddress {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_path(path: &[u32]) -> Self {
        Self(SmallVec::from_slice(path))
    }

    pub fn path(&self) -> &[u32] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn push(&mut self, index: u32) {
        self.0.push(index);
    }

    pub(crate) fn reverse(&mut self) {
        self.0.reverse();
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for index in &self.0 {
            write!(f, "/{index}")?;
        }
        Ok(())
    }
}

// =============================================================================
// Slot Key
// =============================================================================

/// Key of one slot in a scope: a name, or a small integer.
///
/// Integer keys hold walk bindings (`#0`, `#1`, ...): the node reference or
/// child scope reference found at that walk step. Named keys hold template
/// state. In serialized snapshots an index key is written as `#<n>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum SlotKey {
    Name(String),
    Index(u32),
}

impl SlotKey {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    pub const fn index(index: u32) -> Self {
        Self::Index(index)
    }

    /// Slot holding the scope of the branch mounted in region `#node`.
    pub fn branch(node: u32) -> Self {
        Self::Name(format!("#branch/{node}"))
    }

    pub const fn is_index(&self) -> bool {
        matches!(self, Self::Index(_))
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(index) => write!(f, "#{index}"),
        }
    }
}

impl From<SlotKey> for String {
    fn from(key: SlotKey) -> Self {
        match key {
            SlotKey::Name(name) => name,
            SlotKey::Index(index) => format!("#{index}"),
        }
    }
}

impl From<String> for SlotKey {
    fn from(text: String) -> Self {
        match text.strip_prefix('#') {
            Some(digits) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
                match digits.parse() {
                    Ok(index) => Self::Index(index),
                    Err(_) => Self::Name(text),
                }
            }
            _ => Self::Name(text),
        }
    }
}

impl From<&str> for SlotKey {
    fn from(text: &str) -> Self {
        Self::from(text.to_owned())
    }
}

impl From<u32> for SlotKey {
    fn from(index: u32) -> Self {
        Self::Index(index)
    }
}

// =============================================================================
// Value
// =============================================================================

/// Opaque payload stored in a scope slot.
///
/// Plain data maps onto JSON directly. Node and scope references are written
/// as `{"$node": n}` and `{"$scope": n}` so they survive a snapshot round trip.
/// Map keys starting with `$` are written with one extra `$`, so a user map
/// never takes the shape of a reference.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    #[serde(with = "node_ref")]
    Node(NodeId),
    #[serde(with = "scope_ref")]
    Scope(ScopeId),
    #[serde(with = "escaped_map")]
    Map(IndexMap<String, Value>),
}

impl Value {
    /// Truthiness used by conditional regions: null, false, 0, NaN and "" are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0 && !f.is_nan(),
            Self::Str(s) => !s.is_empty(),
            Self::List(_) | Self::Map(_) | Self::Node(_) | Self::Scope(_) => true,
        }
    }

    /// Text form written into text regions (before escaping).
    pub fn to_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Str(s) => s.clone(),
            Self::List(items) => items
                .iter()
                .map(Value::to_text)
                .collect::<Vec<_>>()
                .join(","),
            Self::Map(_) => "[object]".to_owned(),
            Self::Node(id) => id.to_string(),
            Self::Scope(id) => format!("scope {id}"),
        }
    }

    /// Field of a map value, or null.
    pub fn field(&self, name: &str) -> Value {
        match self {
            Self::Map(map) => map.get(name).cloned().unwrap_or_default(),
            _ => Self::Null,
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_scope(&self) -> Option<ScopeId> {
        match self {
            Self::Scope(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this value refers into a live document or store.
    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::Node(_) | Self::Scope(_))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl<K: Into<String>, const N: usize> From<[(K, Value); N]> for Value {
    fn from(entries: [(K, Value); N]) -> Self {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

mod node_ref {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::NodeId;

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Tagged {
        #[serde(rename = "$node")]
        node: u32,
    }

    pub fn serialize<S: Serializer>(id: &NodeId, serializer: S) -> Result<S::Ok, S::Error> {
        Tagged { node: id.0 }.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NodeId, D::Error> {
        Tagged::deserialize(deserializer).map(|tagged| NodeId(tagged.node))
    }
}

mod scope_ref {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::ScopeId;

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Tagged {
        #[serde(rename = "$scope")]
        scope: u32,
    }

    pub fn serialize<S: Serializer>(id: &ScopeId, serializer: S) -> Result<S::Ok, S::Error> {
        Tagged { scope: id.0 }.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ScopeId, D::Error> {
        Tagged::deserialize(deserializer).map(|tagged| ScopeId(tagged.scope))
    }
}

mod escaped_map {
    use std::borrow::Cow;

    use indexmap::IndexMap;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Value;

    pub fn serialize<S: Serializer>(
        map: &IndexMap<String, Value>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(map.iter().map(|(key, value)| (escape(key), value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<IndexMap<String, Value>, D::Error> {
        let raw = IndexMap::<String, Value>::deserialize(deserializer)?;
        Ok(raw.into_iter().map(|(key, value)| (unescape(key), value)).collect())
    }

    fn escape(key: &str) -> Cow<'_, str> {
        if key.starts_with('$') {
            Cow::Owned(format!("${key}"))
        } else {
            Cow::Borrowed(key)
        }
    }

    fn unescape(key: String) -> String {
        match key.strip_prefix('$') {
            Some(rest) => rest.to_owned(),
            None => key,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
