//! Marker-aware markup reader.
//!
//! Reads what [`serialize`](super::serialize) writes, plus template markup
//! (where `<!>` stands for an empty placeholder comment). Marker comments are
//! consumed and turned back into regions, instances and bindings, so a
//! written-then-read tree has the same shape as the tree that was written.
//!
//! The reader is strict: a close tag that does not match, or a marker that
//! closes the wrong thing, is an error rather than something to repair.

use super::escape::decode_entities;
use super::node::{Binding, Document, NodeKind};
use super::serialize::{RAW_TEXT_ELEMENTS, VOID_ELEMENTS};
use crate::error::{Result, RuntimeError};
use crate::types::{NodeId, ScopeId};

/// Read markup into a fresh document.
pub fn parse(markup: &str) -> Result<Document> {
    let mut reader = Reader::new(markup);
    reader.run()?;
    Ok(reader.doc)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Open {
    Root,
    Element,
    Region,
    Instance(ScopeId),
}

struct Reader<'a> {
    src: &'a str,
    pos: usize,
    doc: Document,
    stack: Vec<(NodeId, Open)>,
}

impl<'a> Reader<'a> {
    fn new(src: &'a str) -> Self {
        let doc = Document::new();
        let root = doc.root();
        Self {
            src,
            pos: 0,
            doc,
            stack: vec![(root, Open::Root)],
        }
    }

    fn error(&self, reason: impl Into<String>) -> RuntimeError {
        RuntimeError::Markup {
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn container(&self) -> NodeId {
        self.stack.last().map_or(self.doc.root(), |&(node, _)| node)
    }

    fn push_child(&mut self, kind: NodeKind) -> NodeId {
        let node = self.doc.alloc(kind);
        let container = self.container();
        self.doc.append(container, node);
        node
    }

    fn run(&mut self) -> Result<()> {
        while self.pos < self.src.len() {
            let rest = self.rest();
            if rest.starts_with("<!--") {
                self.comment()?;
            } else if rest.starts_with("<!>") {
                self.pos += 3;
                self.push_child(NodeKind::Comment(String::new()));
            } else if rest.starts_with("</") {
                self.close_tag()?;
            } else if rest.starts_with("<!") {
                // doctype or other declaration
                let end = rest.find('>').ok_or_else(|| self.error("unterminated declaration"))?;
                self.pos += end + 1;
            } else if rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
                self.open_tag()?;
            } else {
                self.text();
            }
        }

        match self.stack.as_slice() {
            [(_, Open::Root)] => Ok(()),
            _ => Err(self.error("unclosed element, region or instance at end of input")),
        }
    }

    fn text(&mut self) {
        let rest = self.rest();
        // a '<' that does not start markup is part of the text
        let mut end = rest.len();
        let mut search = rest.chars().next().map_or(0, char::len_utf8);
        while let Some(found) = rest[search..].find('<') {
            let at = search + found;
            let tail = &rest[at + 1..];
            if tail.starts_with(|c: char| c.is_ascii_alphabetic() || c == '/' || c == '!') {
                end = at;
                break;
            }
            search = at + 1;
        }
        let text = decode_entities(&rest[..end]);
        self.pos += end;
        self.push_child(NodeKind::Text(text));
    }

    fn comment(&mut self) -> Result<()> {
        let src = self.src;
        let body_start = self.pos + 4;
        let end = src[body_start..]
            .find("-->")
            .ok_or_else(|| self.error("unterminated comment"))?;
        let body = &src[body_start..body_start + end];
        let marker_pos = self.pos;
        self.pos = body_start + end + 3;

        if let Some(scope) = body.strip_prefix('^').and_then(parse_scope) {
            let node = self.push_child(NodeKind::Instance(scope));
            self.stack.push((node, Open::Instance(scope)));
        } else if let Some(scope) = body.strip_prefix("/^").and_then(parse_scope) {
            match self.stack.last() {
                Some(&(_, Open::Instance(open))) if open == scope => {
                    self.stack.pop();
                }
                _ => {
                    self.pos = marker_pos;
                    return Err(self.error(format!("instance end for scope {scope} does not match")));
                }
            }
        } else if let Some(rest) = body.strip_prefix('[').filter(|r| r.is_empty() || parse_binding(r).is_some()) {
            let node = self.push_child(NodeKind::Region);
            if let Some(binding) = parse_binding(rest) {
                self.doc.bind(node, binding);
            }
            self.stack.push((node, Open::Region));
        } else if body == "]" {
            match self.stack.last() {
                Some(&(_, Open::Region)) => {
                    self.stack.pop();
                }
                _ => {
                    self.pos = marker_pos;
                    return Err(self.error("region end without an open region"));
                }
            }
        } else if let Some(binding) = body.strip_prefix('@').and_then(parse_binding) {
            let container = self.container();
            let previous = self.doc.children(container).last().copied();
            match previous {
                Some(node)
                    if matches!(
                        self.doc.kind(node),
                        Some(NodeKind::Element { .. } | NodeKind::Comment(_))
                    ) && self.doc.binding(node).is_none() =>
                {
                    self.doc.bind(node, binding);
                }
                _ => {
                    self.pos = marker_pos;
                    return Err(self.error("node marker without a preceding element or comment"));
                }
            }
        } else if let Some(binding) = body.strip_prefix('#').and_then(parse_binding) {
            let container = self.container();
            let previous = self.doc.children(container).last().copied();
            let text = match previous {
                Some(node)
                    if matches!(self.doc.kind(node), Some(NodeKind::Text(_)))
                        && self.doc.binding(node).is_none() =>
                {
                    node
                }
                // empty text does not survive serialization
                _ => self.push_child(NodeKind::Text(String::new())),
            };
            self.doc.bind(text, binding);
        } else {
            self.push_child(NodeKind::Comment(body.to_owned()));
        }
        Ok(())
    }

    fn open_tag(&mut self) -> Result<()> {
        let start = self.pos;
        self.pos += 1;
        let name_len = self
            .rest()
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == ':'))
            .unwrap_or(self.rest().len());
        let tag = self.rest()[..name_len].to_ascii_lowercase();
        self.pos += name_len;

        let mut attrs = indexmap::IndexMap::new();
        let self_closing = loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.is_empty() {
                self.pos = start;
                return Err(self.error(format!("unterminated <{tag}> tag")));
            }
            if let Some(after) = rest.strip_prefix("/>") {
                self.pos = self.src.len() - after.len();
                break true;
            }
            if rest.starts_with('>') {
                self.pos += 1;
                break false;
            }
            let (name, value) = self.attribute()?;
            attrs.insert(name, value);
        };

        let node = self.push_child(NodeKind::Element {
            tag: tag.clone(),
            attrs,
        });

        if self_closing || VOID_ELEMENTS.contains(&tag.as_str()) {
            return Ok(());
        }

        if RAW_TEXT_ELEMENTS.contains(&tag.as_str()) {
            let close = format!("</{tag}");
            let end = find_ignore_case(self.rest(), &close)
                .ok_or_else(|| self.error(format!("unterminated <{tag}> content")))?;
            let content = &self.rest()[..end];
            if !content.is_empty() {
                let text = self.doc.alloc(NodeKind::Text(content.to_owned()));
                self.doc.append(node, text);
            }
            self.pos += end;
            self.stack.push((node, Open::Element));
            return self.close_tag();
        }

        self.stack.push((node, Open::Element));
        Ok(())
    }

    fn attribute(&mut self) -> Result<(String, String)> {
        let rest = self.rest();
        let name_len = rest
            .find(|c: char| c.is_ascii_whitespace() || c == '=' || c == '>' || c == '/')
            .unwrap_or(rest.len());
        if name_len == 0 {
            return Err(self.error("malformed attribute"));
        }
        let name = rest[..name_len].to_ascii_lowercase();
        self.pos += name_len;
        self.skip_whitespace();

        if !self.rest().starts_with('=') {
            return Ok((name, String::new()));
        }
        self.pos += 1;
        self.skip_whitespace();

        let rest = self.rest();
        let value = match rest.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let end = rest[1..]
                    .find(quote)
                    .ok_or_else(|| self.error(format!("unterminated value for `{name}`")))?;
                self.pos += end + 2;
                &rest[1..=end]
            }
            _ => {
                let end = rest
                    .find(|c: char| c.is_ascii_whitespace() || c == '>')
                    .unwrap_or(rest.len());
                self.pos += end;
                &rest[..end]
            }
        };
        Ok((name, decode_entities(value)))
    }

    fn close_tag(&mut self) -> Result<()> {
        let rest = self.rest();
        let end = rest.find('>').ok_or_else(|| self.error("unterminated close tag"))?;
        let name = rest[2..end].trim().to_ascii_lowercase();

        let matches = match self.stack.last() {
            Some(&(node, Open::Element)) => self.doc.node(node).and_then(|n| n.tag()) == Some(name.as_str()),
            _ => false,
        };
        if !matches {
            return Err(self.error(format!("unexpected </{name}>")));
        }
        self.stack.pop();
        self.pos += end + 1;
        Ok(())
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start_matches(|c: char| c.is_ascii_whitespace());
        self.pos += rest.len() - trimmed.len();
    }
}

fn parse_scope(text: &str) -> Option<ScopeId> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok().map(ScopeId)
}

/// `"S #i"`
fn parse_binding(text: &str) -> Option<Binding> {
    let (scope, slot) = text.split_once(" #")?;
    let scope = parse_scope(scope)?;
    if slot.is_empty() || !slot.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(Binding {
        scope,
        slot: slot.parse().ok()?,
    })
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}
