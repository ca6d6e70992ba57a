//! Streaming render: sink contract, late sections and the reorder script.

mod common;

use common::{init_tracing, obj, registry, render, render_with};
use futures::FutureExt;
use pretty_assertions::assert_eq;
use spark_hydrate::renderer::reorder;
use spark_hydrate::{
    Hydrator, MemorySink, Renderer, RuntimeConfig, RuntimeError, ScopeId, SinkError, Template, Value,
};

#[test]
fn test_late_sections_stream_in_completion_order() {
    let (sink, session) = render("page", Value::Null);

    assert_eq!(
        sink.log(),
        vec![
            "write",
            "flush",
            "write",
            "emit:late-chunk",
            "flush",
            "write",
            "emit:late-chunk",
            "flush",
            "emit:hydrate-call",
            "emit:hydrate-call",
            "emit:hydrate-call",
            "end",
        ]
    );
    assert_eq!(
        sink.emitted("late-chunk"),
        vec![&[Value::from(1)][..], &[Value::from(0)][..]]
    );
    assert_eq!(session.html(), "<main><p>slow</p><p>fast</p></main>");
}

#[test]
fn test_shell_holds_placeholders() {
    let (sink, _) = render("page", Value::Null);
    let shell = match &sink.events()[0] {
        spark_hydrate::SinkEvent::Write(chunk) => chunk.clone(),
        other => panic!("expected the shell first, got {other:?}"),
    };
    assert_eq!(
        shell,
        "<!--^0--><main><!--[0 #0--><!--?0--><!--]--><!--[0 #1--><!--?1--><!--]--></main><!--/^0-->"
    );
    assert!(sink.output().contains(&reorder::script(&[1, 0])));
}

#[test]
fn test_reorder_restores_document_order() {
    let (sink, session) = render("page", Value::Null);
    let placed = reorder::apply_markup(&sink.output()).unwrap();
    assert!(placed.starts_with(&session.markup()));

    // applying twice changes nothing
    assert_eq!(reorder::apply_markup(&placed).unwrap(), placed);
}

#[test]
fn test_hydrate_streamed_output() {
    let (sink, rendered) = render("page", Value::Null);
    let hydrated = Hydrator::new(registry()).hydrate(&sink.output()).unwrap();

    assert!(hydrated.failures.is_empty());
    let mut session = hydrated.session;
    assert_eq!(session.html(), rendered.html());
    assert_eq!(
        session.hydrate_calls(),
        vec![
            ("page".to_owned(), ScopeId(0)),
            ("item".to_owned(), ScopeId(2)),
            ("item".to_owned(), ScopeId(1)),
        ]
    );

    session.write(ScopeId(1), "label", "quick").unwrap();
    assert_eq!(session.html(), "<main><p>slow</p><p>quick</p></main>");
}

#[test]
fn test_render_context_reaches_every_setup() {
    let context = obj([("title", Value::from("Hello"))]);
    let (sink, session) = render_with(
        "toggle",
        obj([("open", Value::from(true))]),
        context,
        RuntimeConfig::default(),
    );
    assert_eq!(session.html(), "<section><p>Hello</p></section>");
    assert!(sink.output().contains(r#""title":"Hello""#));
}

#[test]
fn test_snapshot_has_no_node_references() {
    let (sink, _) = render("card", obj([("a", Value::from(1)), ("b", Value::from(2))]));
    let output = sink.output();
    assert!(!output.contains("$node"));
    assert!(output.contains(r##""#1":{"$scope":1}"##));
}

// =============================================================================
// Sink errors
// =============================================================================

#[test]
fn test_rejected_shell_write() {
    init_tracing();
    let renderer = Renderer::new(registry());
    let err = renderer
        .render("counter", Value::Null, Value::Null, MemorySink::rejecting_after(0))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Sink(SinkError::Rejected(_))));
}

#[test]
fn test_rejected_late_chunk() {
    let renderer = Renderer::new(registry());
    let mut sink = MemorySink::rejecting_after(1);
    let err = renderer
        .render("page", Value::Null, Value::Null, &mut sink)
        .unwrap_err();

    assert!(matches!(err, RuntimeError::Sink(_)));
    assert!(!sink.is_ended());
    assert_eq!(sink.log(), vec!["write", "flush"]);
}

#[test]
fn test_failed_loader_is_reported() {
    let mut registry = registry();
    let mut broken = Template::builder("broken", "<div><!></div>", "D%");
    broken.section(0, "item", |_| async { Err::<Value, String>("backend down".to_owned()) }.boxed_local());
    registry.register(broken.build().unwrap()).unwrap();

    let err = Renderer::new(registry)
        .render("broken", Value::Null, Value::Null, MemorySink::new())
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::AsyncSection { section: 0, reason } if reason == "backend down"
    ));
}

#[test]
fn test_render_of_unknown_template() {
    let err = Renderer::new(registry())
        .render("nope", Value::Null, Value::Null, MemorySink::new())
        .unwrap_err();
    assert!(matches!(err, RuntimeError::UnknownTemplate(_)));
}
