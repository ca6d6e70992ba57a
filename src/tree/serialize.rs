//! Markup writer.
//!
//! With [`Markers::Emit`] every binding, region and instance boundary is
//! written as a comment marker so the reader can rebuild the exact same tree.
//! [`Markers::Omit`] writes the plain visible markup.

use std::fmt::Write as _;

use super::escape::{escape_attr, escape_text};
use super::node::{Binding, Document, NodeKind};
use crate::types::NodeId;

/// Elements written without a closing tag.
pub(crate) const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Elements whose content is written and read verbatim.
pub(crate) const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markers {
    Emit,
    Omit,
}

/// Markup of `id` itself.
pub fn outer_markup(doc: &Document, id: NodeId, markers: Markers) -> String {
    let mut out = String::new();
    write_node(doc, id, markers, false, &mut out);
    out
}

/// Markup of the children of `id`.
pub fn inner_markup(doc: &Document, id: NodeId, markers: Markers) -> String {
    let mut out = String::new();
    write_children(doc, id, markers, false, &mut out);
    out
}

fn write_children(doc: &Document, id: NodeId, markers: Markers, raw: bool, out: &mut String) {
    for &child in doc.children(id) {
        write_node(doc, child, markers, raw, out);
    }
}

fn write_node(doc: &Document, id: NodeId, markers: Markers, raw: bool, out: &mut String) {
    let Some(node) = doc.node(id) else {
        return;
    };
    let emit = markers == Markers::Emit;

    match &node.kind {
        NodeKind::Root => write_children(doc, id, markers, false, out),
        NodeKind::Instance(scope) => {
            if emit {
                let _ = write!(out, "<!--^{scope}-->");
            }
            write_children(doc, id, markers, false, out);
            if emit {
                let _ = write!(out, "<!--/^{scope}-->");
            }
        }
        NodeKind::Region => {
            match (emit, node.binding) {
                (true, Some(binding)) => write_marker(out, '[', binding),
                (true, None) => out.push_str("<!--[-->"),
                _ => {}
            }
            write_children(doc, id, markers, false, out);
            if emit {
                out.push_str("<!--]-->");
            }
        }
        NodeKind::Text(text) => {
            if raw {
                out.push_str(text);
            } else {
                out.push_str(&escape_text(text));
            }
            if let (true, Some(binding)) = (emit, node.binding) {
                write_marker(out, '#', binding);
            }
        }
        NodeKind::Comment(text) => {
            let _ = write!(out, "<!--{text}-->");
            if let (true, Some(binding)) = (emit, node.binding) {
                write_marker(out, '@', binding);
            }
        }
        NodeKind::Element { tag, attrs } => {
            out.push('<');
            out.push_str(tag);
            for (name, value) in attrs {
                let _ = write!(out, " {name}=\"{}\"", escape_attr(value));
            }
            out.push('>');
            if !VOID_ELEMENTS.contains(&tag.as_str()) {
                let raw = RAW_TEXT_ELEMENTS.contains(&tag.as_str());
                write_children(doc, id, markers, raw, out);
                let _ = write!(out, "</{tag}>");
            }
            if let (true, Some(binding)) = (emit, node.binding) {
                write_marker(out, '@', binding);
            }
        }
    }
}

fn write_marker(out: &mut String, sigil: char, binding: Binding) {
    let _ = write!(out, "<!--{sigil}{} #{}-->", binding.scope, binding.slot);
}
