//! Output node arena.
//!
//! Nodes live in a flat `Vec` and refer to each other by [`NodeId`]. Freed
//! slots go to a free list and are reused, the same way component indices are
//! pooled. A node's id is stable for as long as the node is alive.

use std::collections::HashMap;

use bitflags::bitflags;
use indexmap::IndexMap;

use crate::types::{NodeAddress, NodeId, ScopeId};

// =============================================================================
// Node
// =============================================================================

bitflags! {
    /// Per-node state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        /// Slot is on the free list.
        const FREED = 1 << 0;
        /// Region is waiting for an out-of-order chunk.
        const PENDING = 1 << 1;
    }
}

/// A walk binding recorded on a node: slot `#slot` of `scope`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Binding {
    pub scope: ScopeId,
    pub slot: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    /// Boundary of one template instance owned by a scope.
    Instance(ScopeId),
    Element {
        tag: String,
        attrs: IndexMap<String, String>,
    },
    Text(String),
    Comment(String),
    /// Replaceable dynamic content. Walks never enter a region.
    Region,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub binding: Option<Binding>,
    pub flags: NodeFlags,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            binding: None,
            flags: NodeFlags::empty(),
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self.kind, NodeKind::Element { .. })
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        match &self.kind {
            NodeKind::Element { attrs, .. } => attrs.get(name).map(String::as_str),
            _ => None,
        }
    }
}

// =============================================================================
// Document
// =============================================================================

/// A tree of output nodes under a single root.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    root: NodeId,
    instances: HashMap<ScopeId, NodeId>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(NodeKind::Root)],
            free: Vec::new(),
            root: NodeId(0),
            instances: HashMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children(self.root).is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes
            .get(id.index())
            .filter(|node| !node.flags.contains(NodeFlags::FREED))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes
            .get_mut(id.index())
            .filter(|node| !node.flags.contains(NodeFlags::FREED))
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).map(|node| &node.kind)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map_or(&[], |node| node.children.as_slice())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|node| node.parent)
    }

    /// Position of `id` among its parent's children.
    pub fn index_in(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|&child| child == id)
    }

    // -------------------------------------------------------------------------
    // Allocation
    // -------------------------------------------------------------------------

    /// Allocate a detached node, reusing a freed slot when one exists.
    pub fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let scope = match kind {
            NodeKind::Instance(scope) => Some(scope),
            _ => None,
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.nodes[id.index()] = Node::new(kind);
                id
            }
            None => {
                let id = NodeId(self.nodes.len() as u32);
                self.nodes.push(Node::new(kind));
                id
            }
        };
        if let Some(scope) = scope {
            self.instances.insert(scope, id);
        }
        id
    }

    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        let index = self.children(parent).len();
        self.insert(parent, index, child);
    }

    /// Insert a detached node at `index` (clamped) under `parent`.
    pub fn insert(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        let Some(node) = self.node_mut(parent) else {
            return;
        };
        let index = index.min(node.children.len());
        node.children.insert(index, child);
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
    }

    /// Unlink a node from its parent without freeing it.
    pub fn detach(&mut self, child: NodeId) {
        let Some(parent) = self.parent(child) else {
            return;
        };
        if let Some(node) = self.node_mut(parent) {
            node.children.retain(|&c| c != child);
        }
        if let Some(node) = self.node_mut(child) {
            node.parent = None;
        }
    }

    /// Detach a node and free it together with all its descendants.
    pub fn remove_subtree(&mut self, id: NodeId) {
        if id == self.root {
            self.clear_children(id);
            return;
        }
        self.detach(id);
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.node_mut(current) else {
                continue;
            };
            stack.extend(node.children.drain(..));
            node.flags = NodeFlags::FREED;
            node.binding = None;
            node.parent = None;
            if let NodeKind::Instance(scope) = node.kind {
                if self.instances.get(&scope) == Some(&current) {
                    self.instances.remove(&scope);
                }
            }
            self.free.push(current);
        }
    }

    pub fn clear_children(&mut self, id: NodeId) {
        let children: Vec<NodeId> = self.children(id).to_vec();
        for child in children {
            self.remove_subtree(child);
        }
    }

    /// Deep-copy the children of `src_parent` in `src` under `dst_parent`.
    ///
    /// Bindings are not copied; they belong to the scope that binds them.
    pub fn clone_children_from(&mut self, src: &Document, src_parent: NodeId, dst_parent: NodeId) {
        for &child in src.children(src_parent) {
            let Some(node) = src.node(child) else {
                continue;
            };
            let copy = self.alloc(node.kind.clone());
            self.append(dst_parent, copy);
            self.clone_children_from(src, child, copy);
        }
    }

    // -------------------------------------------------------------------------
    // Content
    // -------------------------------------------------------------------------

    pub fn set_kind(&mut self, id: NodeId, kind: NodeKind) {
        if let Some(node) = self.node_mut(id) {
            node.kind = kind;
        }
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) {
        if let Some(Node {
            kind: NodeKind::Text(content),
            ..
        }) = self.node_mut(id)
        {
            content.clear();
            content.push_str(text);
        }
    }

    /// Replace all children of `id` with a single text node (none if empty).
    pub fn replace_with_text(&mut self, id: NodeId, text: &str) {
        self.clear_children(id);
        if !text.is_empty() {
            let node = self.alloc(NodeKind::Text(text.to_owned()));
            self.append(id, node);
        }
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(Node {
            kind: NodeKind::Element { attrs, .. },
            ..
        }) = self.node_mut(id)
        {
            attrs.insert(name.to_owned(), value.to_owned());
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> bool {
        match self.node_mut(id) {
            Some(Node {
                kind: NodeKind::Element { attrs, .. },
                ..
            }) => attrs.shift_remove(name).is_some(),
            _ => false,
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id).and_then(|node| node.attr(name))
    }

    /// Concatenated text of `id` and its descendants.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match self.kind(id) {
            Some(NodeKind::Text(text)) => out.push_str(text),
            Some(NodeKind::Comment(_)) | None => {}
            Some(_) => {
                for &child in self.children(id) {
                    self.collect_text(child, out);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Bindings and flags
    // -------------------------------------------------------------------------

    pub fn bind(&mut self, id: NodeId, binding: Binding) {
        if let Some(node) = self.node_mut(id) {
            node.binding = Some(binding);
        }
    }

    pub fn binding(&self, id: NodeId) -> Option<Binding> {
        self.node(id).and_then(|node| node.binding)
    }

    pub fn set_flag(&mut self, id: NodeId, flag: NodeFlags, on: bool) {
        if let Some(node) = self.node_mut(id) {
            node.flags.set(flag, on);
        }
    }

    pub fn has_flag(&self, id: NodeId, flag: NodeFlags) -> bool {
        self.node(id).is_some_and(|node| node.flags.contains(flag))
    }

    // -------------------------------------------------------------------------
    // Addressing
    // -------------------------------------------------------------------------

    /// Path of child indices from the root.
    pub fn address(&self, id: NodeId) -> NodeAddress {
        let mut address = NodeAddress::root();
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            let index = self
                .children(parent)
                .iter()
                .position(|&child| child == current)
                .unwrap_or_default();
            address.push(index as u32);
            current = parent;
        }
        address.reverse();
        address
    }

    pub fn resolve(&self, address: &NodeAddress) -> Option<NodeId> {
        address.path().iter().try_fold(self.root, |node, &index| {
            self.children(node).get(index as usize).copied()
        })
    }

    pub fn find_instance(&self, scope: ScopeId) -> Option<NodeId> {
        self.instances.get(&scope).copied()
    }

    /// All nodes under `id` (excluded) in document pre-order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    /// Instance boundaries in document order.
    pub fn instances_in_order(&self) -> Vec<(ScopeId, NodeId)> {
        self.descendants(self.root)
            .into_iter()
            .filter_map(|id| match self.kind(id) {
                Some(NodeKind::Instance(scope)) => Some((*scope, id)),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(tag: &str) -> NodeKind {
        NodeKind::Element {
            tag: tag.to_owned(),
            attrs: IndexMap::new(),
        }
    }

    #[test]
    fn test_alloc_and_reuse() {
        let mut doc = Document::new();
        let root = doc.root();
        let a = doc.alloc(element("div"));
        doc.append(root, a);
        let b = doc.alloc(NodeKind::Text("x".into()));
        doc.append(a, b);
        assert_eq!(doc.len(), 3);

        doc.remove_subtree(a);
        assert!(doc.node(a).is_none());
        assert!(doc.node(b).is_none());
        assert_eq!(doc.len(), 1);

        let c = doc.alloc(NodeKind::Comment(String::new()));
        assert!(c == a || c == b);
    }

    #[test]
    fn test_address_and_resolve() {
        let mut doc = Document::new();
        let root = doc.root();
        let div = doc.alloc(element("div"));
        let p = doc.alloc(element("p"));
        let text = doc.alloc(NodeKind::Text("hi".into()));
        doc.append(root, div);
        doc.append(root, p);
        doc.append(p, text);

        let address = doc.address(text);
        assert_eq!(address.path(), &[1, 0]);
        assert_eq!(doc.resolve(&address), Some(text));
        assert_eq!(doc.text_content(root), "hi");
    }

    #[test]
    fn test_instance_index_follows_lifecycle() {
        let mut doc = Document::new();
        let root = doc.root();
        let instance = doc.alloc(NodeKind::Instance(ScopeId(4)));
        doc.append(root, instance);
        assert_eq!(doc.find_instance(ScopeId(4)), Some(instance));
        assert_eq!(doc.instances_in_order(), vec![(ScopeId(4), instance)]);

        doc.remove_subtree(instance);
        assert_eq!(doc.find_instance(ScopeId(4)), None);
    }

    #[test]
    fn test_attrs_and_text_replacement() {
        let mut doc = Document::new();
        let root = doc.root();
        let button = doc.alloc(element("button"));
        doc.append(root, button);

        doc.set_attr(button, "data-sum", "3");
        assert_eq!(doc.attr(button, "data-sum"), Some("3"));
        assert!(doc.remove_attr(button, "data-sum"));
        assert!(!doc.remove_attr(button, "data-sum"));

        doc.replace_with_text(button, "5");
        assert_eq!(doc.text_content(button), "5");
        doc.replace_with_text(button, "");
        assert!(doc.children(button).is_empty());
    }
}
