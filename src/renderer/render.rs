//! Renderer - one-shot server render into an [`OutputSink`].
//!
//! # Output layout
//!
//! ```text
//! shell markup (with markers)        write, flush
//! <template data-spark-chunk=N>...   write, flush    one per late section
//! reorder script                     \
//! hydrate-call fragment               \
//! hydrate-scope fragment              / end(tail)
//! render context (when not null)     /
//! ```
//!
//! The session stays live after rendering, so a caller may keep applying
//! writes to it as if it had been mounted on the client.

use tracing::{debug, instrument};

use super::reorder;
use super::sink::{OutputSink, SessionSink};
use crate::config::RuntimeConfig;
use crate::engine::TemplateRegistry;
use crate::error::Result;
use crate::pipeline::Session;
use crate::tree::escape::escape_script_json;
use crate::tree::{outer_markup, Markers};
use crate::types::{ScopeId, Value};

pub const CALLS_TYPE: &str = "application/x-spark-calls";
pub const SCOPES_TYPE: &str = "application/x-spark-scopes";
pub const CONTEXT_TYPE: &str = "application/x-spark-context";

pub struct Renderer {
    registry: TemplateRegistry,
    config: RuntimeConfig,
}

impl Renderer {
    pub fn new(registry: TemplateRegistry) -> Self {
        Self::with_config(registry, RuntimeConfig::default())
    }

    pub fn with_config(registry: TemplateRegistry, config: RuntimeConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TemplateRegistry {
        &mut self.registry
    }

    /// Render `template_id` with `input` and stream it to `sink`.
    ///
    /// # Arguments
    /// * `input` - Passed to the root template's setup
    /// * `context` - Read-only value passed to every setup in the session
    /// * `sink` - Receives the markup; `end` is called exactly once on success
    #[instrument(skip(self, input, context, sink))]
    pub fn render<S: OutputSink>(&self, template_id: &str, input: Value, context: Value, sink: S) -> Result<Session> {
        let mut sink = SessionSink::new(sink);
        let mut session = Session::new(self.registry.clone(), self.config.clone()).with_context(context);
        session.mount(template_id, input)?;

        sink.write(&session.markup())?;
        if self.config.flush_after_shell {
            sink.flush()?;
        }

        let emit_events = self.config.emit_events;
        let mut late = Vec::new();
        session.resolve_sections(|session, id, node| {
            let markup = outer_markup(session.document(), node, Markers::Emit);
            sink.write(&reorder::chunk(id, &markup))?;
            if emit_events {
                sink.emit("late-chunk", &[Value::from(i64::from(id))])?;
            }
            sink.flush()?;
            late.push(id);
            Ok(())
        })?;

        let mut tail = String::new();
        if !late.is_empty() {
            tail.push_str(&reorder::script(&late));
        }

        let calls = session.hydrate_calls();
        if emit_events {
            for (template, scope) in &calls {
                sink.emit(
                    "hydrate-call",
                    &[Value::from(template.as_str()), Value::Scope(*scope)],
                )?;
            }
        }
        tail.push_str(&calls_fragment(&calls)?);
        tail.push_str(&scopes_fragment(&session)?);
        if self.config.serialize_context && !matches!(session.context(), Value::Null) {
            tail.push_str(&context_fragment(session.context())?);
        }
        sink.end(Some(&tail))?;

        debug!(
            template = template_id,
            scopes = session.store().len(),
            late = late.len(),
            "render finished"
        );
        Ok(session)
    }
}

fn calls_fragment(calls: &[(String, ScopeId)]) -> Result<String> {
    let json = serde_json::to_string(calls)?;
    Ok(format!(
        "<script type=\"{CALLS_TYPE}\">{}</script>",
        escape_script_json(&json)
    ))
}

/// Every live scope, node references stripped.
fn scopes_fragment(session: &Session) -> Result<String> {
    let json = session.store().dump_all().without_nodes().to_json()?;
    Ok(format!(
        "<script type=\"{SCOPES_TYPE}\">{}</script>",
        escape_script_json(&json)
    ))
}

fn context_fragment(context: &Value) -> Result<String> {
    let json = serde_json::to_string(context)?;
    Ok(format!(
        "<script type=\"{CONTEXT_TYPE}\">{}</script>",
        escape_script_json(&json)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Template;
    use crate::renderer::MemorySink;
    use crate::signals::EffectAction;
    use pretty_assertions::assert_eq;

    fn counter() -> TemplateRegistry {
        let mut builder = Template::builder("counter", "<div><!></div>", "D%");
        let count = builder.value("count");
        builder.effect(&[count], EffectAction::text(0, "count"));
        builder.setup(|input, _| vec![("count".into(), input.field("count"))]);
        let mut registry = TemplateRegistry::new();
        registry.register(builder.build().unwrap()).unwrap();
        registry
    }

    #[test]
    fn test_render_counter() {
        let renderer = Renderer::new(counter());
        let mut sink = MemorySink::new();
        let input = Value::from([("count", Value::from(0))]);
        renderer.render("counter", input, Value::Null, &mut sink).unwrap();

        assert_eq!(
            sink.output(),
            concat!(
                "<!--^0--><div><!--[0 #0-->0<!--]--></div><!--/^0-->",
                r#"<script type="application/x-spark-calls">[["counter",0]]</script>"#,
                r#"<script type="application/x-spark-scopes">{"0":{"parent":null,"slots":{"count":0}}}</script>"#,
            )
        );
        assert_eq!(sink.log(), vec!["write", "flush", "emit:hydrate-call", "end"]);
    }

    #[test]
    fn test_render_without_events_or_flush() {
        let config = RuntimeConfig {
            flush_after_shell: false,
            emit_events: false,
            ..RuntimeConfig::default()
        };
        let renderer = Renderer::with_config(counter(), config);
        let mut sink = MemorySink::new();
        renderer
            .render("counter", Value::from([("count", Value::from(1))]), Value::Null, &mut sink)
            .unwrap();
        assert_eq!(sink.log(), vec!["write", "end"]);
    }

    #[test]
    fn test_context_is_written_after_the_scopes() {
        let context = Value::from([("title", Value::from("</script>"))]);
        let mut sink = MemorySink::new();
        Renderer::new(counter())
            .render("counter", Value::Null, context.clone(), &mut sink)
            .unwrap();
        let output = sink.output();
        assert!(output.ends_with(
            r#"<script type="application/x-spark-context">{"title":"\u003c/script>"}</script>"#
        ));

        let config = RuntimeConfig {
            serialize_context: false,
            ..RuntimeConfig::default()
        };
        let mut sink = MemorySink::new();
        Renderer::with_config(counter(), config)
            .render("counter", Value::Null, context, &mut sink)
            .unwrap();
        assert!(!sink.output().contains(CONTEXT_TYPE));
    }

    #[test]
    fn test_sink_rejection_propagates() {
        let renderer = Renderer::new(counter());
        let err = renderer
            .render("counter", Value::Null, Value::Null, MemorySink::rejecting_after(0))
            .unwrap_err();
        assert!(matches!(err, crate::error::RuntimeError::Sink(_)));
    }
}
