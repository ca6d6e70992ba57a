//! Out-of-order chunks and the reorder script.
//!
//! A deferred section renders as a `<!--?N-->` placeholder in the shell. Its
//! content arrives later as `<template data-spark-chunk="N">`, and the reorder
//! script lists the chunk ids in the order they were written. Applying the
//! script moves every listed chunk into its placeholder.
//!
//! Applying is idempotent: a chunk that was already moved has no template and
//! no placeholder left, so its id is skipped.

use tracing::trace;

use crate::error::Result;
use crate::tree::{self, inner_markup, Document, Markers, NodeKind};
use crate::types::NodeId;

pub const REORDER_TYPE: &str = "application/x-spark-reorder";
pub const CHUNK_ATTR: &str = "data-spark-chunk";

/// Wrap a late section's markup for placement by id.
pub fn chunk(id: u32, markup: &str) -> String {
    format!("<template {CHUNK_ATTR}=\"{id}\">{markup}</template>")
}

/// Reorder script naming `ids` in placement order.
pub fn script(ids: &[u32]) -> String {
    let ids: Vec<String> = ids.iter().map(u32::to_string).collect();
    let json = serde_json::to_string(&ids).unwrap_or_else(|_| "[]".to_owned());
    format!("<script type=\"{REORDER_TYPE}\">{json}</script>")
}

/// Apply every reorder script in `doc`. Returns the number of chunks moved.
///
/// The scripts themselves stay in place.
pub fn apply(doc: &mut Document) -> Result<usize> {
    let scripts: Vec<NodeId> = doc
        .descendants(doc.root())
        .into_iter()
        .filter(|&id| {
            doc.node(id)
                .is_some_and(|node| node.tag() == Some("script") && node.attr("type") == Some(REORDER_TYPE))
        })
        .collect();

    let mut moved = 0;
    for script in scripts {
        let ids: Vec<String> = serde_json::from_str(doc.text_content(script).trim())?;
        for id in ids {
            if move_chunk(doc, &id) {
                moved += 1;
            }
        }
    }
    Ok(moved)
}

/// Parse markup, apply its reorder scripts and serialize it again.
pub fn apply_markup(markup: &str) -> Result<String> {
    let mut doc = tree::parse(markup)?;
    apply(&mut doc)?;
    Ok(inner_markup(&doc, doc.root(), Markers::Emit))
}

fn move_chunk(doc: &mut Document, id: &str) -> bool {
    let placeholder_text = format!("?{id}");
    let mut chunk = None;
    let mut placeholder = None;
    for node in doc.descendants(doc.root()) {
        match doc.kind(node) {
            Some(NodeKind::Element { tag, attrs }) if tag == "template" && attrs.get(CHUNK_ATTR).map(String::as_str) == Some(id) => {
                chunk = Some(node);
            }
            Some(NodeKind::Comment(text)) if *text == placeholder_text => placeholder = Some(node),
            _ => {}
        }
    }

    let (Some(chunk), Some(placeholder)) = (chunk, placeholder) else {
        trace!(chunk = id, "chunk already placed");
        return false;
    };
    let (Some(parent), Some(index)) = (doc.parent(placeholder), doc.index_in(placeholder)) else {
        return false;
    };

    let children = doc.children(chunk).to_vec();
    for (offset, child) in children.into_iter().enumerate() {
        doc.insert(parent, index + offset, child);
    }
    doc.remove_subtree(placeholder);
    doc.remove_subtree(chunk);
    trace!(chunk = id, "chunk placed");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_script_format() {
        assert_eq!(
            script(&[2, 0]),
            r#"<script type="application/x-spark-reorder">["2","0"]</script>"#
        );
        assert_eq!(chunk(1, "<p>x</p>"), r#"<template data-spark-chunk="1"><p>x</p></template>"#);
    }

    #[test]
    fn test_chunks_land_in_placeholders() {
        let markup = format!(
            "<main><!--?0--><hr><!--?1--></main>{}{}{}",
            chunk(1, "<b>second</b>"),
            chunk(0, "<i>first</i>"),
            script(&[1, 0])
        );
        let placed = apply_markup(&markup).unwrap();
        assert!(placed.starts_with("<main><i>first</i><hr><b>second</b></main>"));
    }

    #[test]
    fn test_nested_chunk_after_its_parent() {
        let markup = format!(
            "<div><!--?0--></div>{}{}{}",
            chunk(0, "<p><!--?1--></p>"),
            chunk(1, "inner"),
            script(&[0, 1])
        );
        assert!(apply_markup(&markup).unwrap().starts_with("<div><p>inner</p></div>"));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let markup = format!(
            "<div><!--?0--></div>{}{}{}",
            chunk(0, "<p>late</p>"),
            script(&[0]),
            script(&[0])
        );
        let mut doc = tree::parse(&markup).unwrap();
        assert_eq!(apply(&mut doc).unwrap(), 1);
        assert_eq!(apply(&mut doc).unwrap(), 0);
        assert!(inner_markup(&doc, doc.root(), Markers::Emit).starts_with("<div><p>late</p></div>"));
    }
}
