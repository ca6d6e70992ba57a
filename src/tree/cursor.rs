//! Walk cursor over a [`Document`].

use super::node::{Document, NodeKind};
use crate::types::NodeId;
use crate::walk::WalkCursor;

/// What `replace` does to the node under the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    /// Fresh template fragment: convert the `<!>` placeholder into a region.
    Instantiate,
    /// Previously rendered output: the node must already be a region.
    Recover,
}

/// Cursor rooted at one instance node.
pub struct DocCursor<'d> {
    doc: &'d mut Document,
    root: NodeId,
    container: NodeId,
    index: usize,
    mode: CursorMode,
}

impl<'d> DocCursor<'d> {
    /// Position on the first child of `root`.
    pub fn new(doc: &'d mut Document, root: NodeId, mode: CursorMode) -> Self {
        Self {
            doc,
            root,
            container: root,
            index: 0,
            mode,
        }
    }

    fn len(&self, container: NodeId) -> usize {
        self.doc.children(container).len()
    }
}

impl WalkCursor for DocCursor<'_> {
    type Node = NodeId;

    fn current(&self) -> Option<NodeId> {
        self.doc.children(self.container).get(self.index).copied()
    }

    fn claim_region(&mut self, node: NodeId) -> Result<(), String> {
        let kind = self.doc.kind(node);
        if matches!(kind, Some(NodeKind::Region)) {
            return Ok(());
        }
        let placeholder = matches!(kind, Some(NodeKind::Comment(text)) if text.is_empty());
        match self.mode {
            CursorMode::Instantiate if placeholder => {
                self.doc.set_kind(node, NodeKind::Region);
                Ok(())
            }
            CursorMode::Instantiate => Err(format!(
                "expected a placeholder comment, found {}",
                describe(self.doc.kind(node))
            )),
            CursorMode::Recover => Err(format!(
                "expected a region, found {}",
                describe(self.doc.kind(node))
            )),
        }
    }

    fn step_next(&mut self) -> bool {
        let Some(node) = self.current() else {
            return false;
        };
        let enter = matches!(self.doc.kind(node), Some(NodeKind::Element { .. }))
            && !self.doc.children(node).is_empty();
        if enter {
            self.container = node;
            self.index = 0;
            return true;
        }

        self.index += 1;
        while self.index >= self.len(self.container) && self.container != self.root {
            let Some(parent) = self.doc.parent(self.container) else {
                break;
            };
            self.index = self.doc.index_in(self.container).map_or(0, |i| i + 1);
            self.container = parent;
        }
        true
    }

    fn step_over(&mut self) -> bool {
        if self.current().is_none() {
            return false;
        }
        self.index += 1;
        true
    }

    fn ascend(&mut self) -> bool {
        if self.container == self.root {
            return false;
        }
        let (Some(parent), Some(index)) = (
            self.doc.parent(self.container),
            self.doc.index_in(self.container),
        ) else {
            return false;
        };
        self.index = index;
        self.container = parent;
        true
    }
}

fn describe(kind: Option<&NodeKind>) -> String {
    match kind {
        Some(NodeKind::Element { tag, .. }) => format!("<{tag}>"),
        Some(NodeKind::Text(_)) => "text".to_owned(),
        Some(NodeKind::Comment(text)) => format!("comment `{text}`"),
        Some(NodeKind::Region) => "region".to_owned(),
        Some(NodeKind::Instance(scope)) => format!("instance of scope {scope}"),
        Some(NodeKind::Root) => "root".to_owned(),
        None => "nothing".to_owned(),
    }
}
