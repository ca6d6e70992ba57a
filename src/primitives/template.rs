//! Compiled template - the boundary with the template compiler.
//!
//! A template is what the compiler hands the runtime: static markup, a walk
//! code addressing every dynamic position in it, the signal wiring, and a
//! setup function producing initial slot values from an input.
//!
//! # Example
//!
//! ```
//! use spark_hydrate::primitives::Template;
//! use spark_hydrate::signals::EffectAction;
//!
//! let mut counter = Template::builder("counter", "<div><!></div>", "D%");
//! let count = counter.value("count");
//! counter.effect(&[count], EffectAction::text(0, "count"));
//! counter.setup(|input, _ctx| vec![("count".into(), input.field("count"))]);
//! let counter = counter.build().unwrap();
//!
//! assert_eq!(counter.walks().to_string(), "next(1), replace");
//! ```

use std::fmt;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use tracing::debug;

use crate::error::{Result, RuntimeError};
use crate::signals::{EffectAction, GraphBuilder, GraphSpec, SignalRef};
use crate::tree::{self, CursorMode, DocCursor, Document};
use crate::types::{NodeId, SlotKey, Value};
use crate::walk::{interpret, BindKind, WalkFrame, WalkProgram, WalkSlot};

/// Initial slot values from `(input, context)`.
pub type SetupFn = Rc<dyn Fn(&Value, &Value) -> Vec<(SlotKey, Value)>>;

/// Produces the input of a deferred section's branch.
pub type Loader = Rc<dyn Fn(&Value) -> LocalBoxFuture<'static, std::result::Result<Value, String>>>;

/// A region whose content arrives later than the rest of the page.
#[derive(Clone)]
pub struct AsyncSection {
    /// Walk slot of the region (bound with `replace`).
    pub node: u32,
    /// Template mounted into the region once the loader resolves.
    pub branch: String,
    pub loader: Loader,
}

impl fmt::Debug for AsyncSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSection")
            .field("node", &self.node)
            .field("branch", &self.branch)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Template
// =============================================================================

pub struct Template {
    id: String,
    markup: String,
    walks: WalkProgram,
    fragment: Document,
    graph: Rc<GraphSpec>,
    setup: Option<SetupFn>,
    children: Vec<String>,
    sections: Vec<AsyncSection>,
}

impl Template {
    /// Start a template from its static markup and walk code.
    ///
    /// # Arguments
    /// * `id` - Registry key, written into hydrate-call fragments
    /// * `markup` - Static output with `<!>` at every replaceable position
    /// * `walks` - Walk code string for `markup`
    pub fn builder(
        id: impl Into<String>,
        markup: impl Into<String>,
        walks: impl Into<String>,
    ) -> TemplateBuilder {
        TemplateBuilder {
            id: id.into(),
            markup: markup.into(),
            walks: walks.into(),
            graph: GraphSpec::builder(),
            setup: None,
            children: Vec::new(),
            sections: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn walks(&self) -> &WalkProgram {
        &self.walks
    }

    /// Parsed static markup, cloned into every new instance.
    pub fn fragment(&self) -> &Document {
        &self.fragment
    }

    pub fn graph(&self) -> &Rc<GraphSpec> {
        &self.graph
    }

    /// Templates of the embedded children, in `beginChild` order.
    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn sections(&self) -> &[AsyncSection] {
        &self.sections
    }

    /// Run setup. A template without setup starts with no data slots.
    pub fn setup_slots(&self, input: &Value, context: &Value) -> Vec<(SlotKey, Value)> {
        self.setup
            .as_ref()
            .map(|setup| setup(input, context))
            .unwrap_or_default()
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("id", &self.id)
            .field("markup", &self.markup)
            .field("walks", &self.walks.encode())
            .field("signals", &self.graph.len())
            .field("children", &self.children)
            .field("sections", &self.sections)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Builder
// =============================================================================

pub struct TemplateBuilder {
    id: String,
    markup: String,
    walks: String,
    graph: GraphBuilder,
    setup: Option<SetupFn>,
    children: Vec<String>,
    sections: Vec<AsyncSection>,
}

impl TemplateBuilder {
    pub fn value(&mut self, key: impl Into<SlotKey>) -> SignalRef {
        self.graph.value(key)
    }

    pub fn intersection(&mut self, inputs: &[SignalRef]) -> SignalRef {
        self.graph.intersection(inputs)
    }

    pub fn derived(
        &mut self,
        inputs: &[SignalRef],
        key: impl Into<SlotKey>,
        compute: impl Fn(&[Value]) -> Value + 'static,
    ) -> SignalRef {
        self.graph.derived(inputs, key, compute)
    }

    pub fn effect(&mut self, inputs: &[SignalRef], action: EffectAction) -> SignalRef {
        self.graph.effect(inputs, action)
    }

    /// Declare the template of the next embedded child frame.
    pub fn child(&mut self, template: impl Into<String>) -> &mut Self {
        self.children.push(template.into());
        self
    }

    pub fn section(
        &mut self,
        node: u32,
        branch: impl Into<String>,
        loader: impl Fn(&Value) -> LocalBoxFuture<'static, std::result::Result<Value, String>> + 'static,
    ) -> &mut Self {
        self.sections.push(AsyncSection {
            node,
            branch: branch.into(),
            loader: Rc::new(loader),
        });
        self
    }

    pub fn setup(&mut self, f: impl Fn(&Value, &Value) -> Vec<(SlotKey, Value)> + 'static) -> &mut Self {
        self.setup = Some(Rc::new(f));
        self
    }

    /// Parse markup and walk code and check that they agree.
    ///
    /// The walk is dry-run over the static markup, and every effect and
    /// section index is checked against the kind of slot it names.
    pub fn build(self) -> Result<Template> {
        let id = self.id;
        let invalid = |reason: String| RuntimeError::InvalidTemplate {
            template: id.clone(),
            reason,
        };

        let walks = WalkProgram::parse(&self.walks)?;
        let fragment = tree::parse(&self.markup)?;
        let graph = self.graph.build().map_err(&invalid)?;

        if walks.child_frames() != self.children.len() {
            return Err(invalid(format!(
                "walk code opens {} child frames but {} child templates are declared",
                walks.child_frames(),
                self.children.len()
            )));
        }

        let mut scratch = fragment.clone();
        let root = scratch.root();
        let frame = interpret(&walks, &mut DocCursor::new(&mut scratch, root, CursorMode::Instantiate))
            .map_err(|err| err.in_template(&id))?;

        for (_, action) in graph.effects() {
            check_action(&scratch, &frame, action).map_err(&invalid)?;
        }
        for section in &self.sections {
            match frame.slots.get(section.node as usize) {
                Some(WalkSlot::Node {
                    kind: BindKind::Replace,
                    ..
                }) => {}
                _ => {
                    return Err(invalid(format!(
                        "section slot #{} is not a replaced region",
                        section.node
                    )));
                }
            }
        }

        debug!(template = %id, walks = %walks, signals = graph.len(), "template compiled");

        Ok(Template {
            id,
            markup: self.markup,
            walks,
            fragment,
            graph: Rc::new(graph),
            setup: self.setup,
            children: self.children,
            sections: self.sections,
        })
    }
}

fn check_action(doc: &Document, frame: &WalkFrame<NodeId>, action: &EffectAction) -> std::result::Result<(), String> {
    let slot = |index: u32| frame.slots.get(index as usize);
    match action {
        EffectAction::Text { node, .. } => match slot(*node) {
            Some(&WalkSlot::Node { node: target, kind }) => {
                // text replaces the children of a `get` element
                let overwritten = kind == BindKind::Get
                    && doc.node(target).is_some_and(|n| n.is_element())
                    && bound_nodes(frame).into_iter().any(|other| is_inside(doc, other, target));
                if overwritten {
                    Err(format!("text effect on #{node} would overwrite bound descendants"))
                } else {
                    Ok(())
                }
            }
            _ => Err(format!("effect targets #{node}, which is not a bound node")),
        },
        EffectAction::Attr { node, .. } => match slot(*node) {
            Some(&WalkSlot::Node { node: target, .. }) if doc.node(target).is_some_and(|n| n.is_element()) => Ok(()),
            _ => Err(format!("attribute effect targets #{node}, which is not a bound element")),
        },
        EffectAction::Html { node, .. } | EffectAction::Conditional { node, .. } => match slot(*node) {
            Some(WalkSlot::Node {
                kind: BindKind::Replace,
                ..
            }) => Ok(()),
            _ => Err(format!("effect targets #{node}, which is not a replaced region")),
        },
        EffectAction::Child { frame: index, .. } => match slot(*index) {
            Some(WalkSlot::Child(_)) => Ok(()),
            _ => Err(format!("effect targets #{index}, which is not a child frame")),
        },
        EffectAction::Custom(_) => Ok(()),
    }
}

/// Every node bound by `frame` and its embedded child frames.
fn bound_nodes(frame: &WalkFrame<NodeId>) -> Vec<NodeId> {
    let mut nodes = Vec::new();
    for slot in &frame.slots {
        match slot {
            WalkSlot::Node { node, .. } => nodes.push(*node),
            WalkSlot::Child(child) => nodes.extend(bound_nodes(child)),
        }
    }
    nodes
}

/// Whether `node` is a strict descendant of `ancestor`.
fn is_inside(doc: &Document, node: NodeId, ancestor: NodeId) -> bool {
    let mut current = doc.parent(node);
    while let Some(id) = current {
        if id == ancestor {
            return true;
        }
        current = doc.parent(id);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_counter() {
        let mut builder = Template::builder("counter", "<div><!></div>", "D%");
        let count = builder.value("count");
        builder.effect(&[count], EffectAction::text(0, "count"));
        builder.setup(|input, _| vec![("count".into(), input.field("count"))]);
        let template = builder.build().unwrap();

        assert_eq!(template.id(), "counter");
        assert_eq!(template.graph().len(), 2);
        let input = Value::from([("count", Value::from(3))]);
        assert_eq!(
            template.setup_slots(&input, &Value::Null),
            vec![(SlotKey::name("count"), Value::from(3))]
        );
    }

    #[test]
    fn test_walk_must_fit_markup() {
        let err = Template::builder("broken", "<div></div>", "D%").build().unwrap_err();
        assert!(matches!(err, RuntimeError::StructuralMismatch { .. }));

        let err = Template::builder("bad-code", "<div></div>", "D!").build().unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidWalkCode { .. }));
    }

    #[test]
    fn test_effect_slot_kinds_are_checked() {
        let mut builder = Template::builder("attr", "<button></button><!>", " b%");
        let x = builder.value("x");
        builder.effect(&[x], EffectAction::html(0, "x"));
        let err = builder.build().unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidTemplate { .. }));
    }

    #[test]
    fn test_text_effect_cannot_overwrite_bound_descendants() {
        // `#0` is the <p>, `#1` the text inside it
        let mut builder = Template::builder("label", "<p> </p>", " D ");
        let x = builder.value("x");
        builder.effect(&[x], EffectAction::text(0, "x"));
        let err = builder.build().unwrap_err();
        assert!(err.to_string().contains("bound descendants"));

        // a lone `get` element may have its text replaced
        let mut builder = Template::builder("label", "<p> </p>", " ");
        let x = builder.value("x");
        builder.effect(&[x], EffectAction::text(0, "x"));
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_attr_effect_needs_an_element() {
        let mut builder = Template::builder("anchor", "<div></div><!>", "b ");
        let x = builder.value("x");
        builder.effect(&[x], EffectAction::attr(0, "title", "x"));
        let err = builder.build().unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidTemplate { .. }));
    }

    #[test]
    fn test_child_count_must_match_frames() {
        let err = Template::builder("parent", "<h1><!></h1><p><!></p>", "D%l/D%&")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("child frames"));
    }
}
