//! Render → hydrate → update scenarios through the public API.

mod common;

use common::{obj, registry, render, render_with, round_trip};
use pretty_assertions::assert_eq;
use spark_hydrate::renderer::SCOPES_TYPE;
use spark_hydrate::{Hydrator, Mutation, NodeAddress, RuntimeConfig, RuntimeError, ScopeId, Value};

// =============================================================================
// Counter
// =============================================================================

#[test]
fn test_counter_write_is_one_text_mutation() {
    let (_, rendered) = render("counter", obj([("count", Value::from(0))]));
    let rendered_address = rendered
        .document()
        .address(rendered.node_slot(ScopeId(0), 0).unwrap());

    let mut session = round_trip("counter", obj([("count", Value::from(0))])).session;
    let bound = session.node_slot(ScopeId(0), 0).unwrap();
    assert_eq!(session.document().address(bound), rendered_address);

    session.write(ScopeId(0), "count", 5).unwrap();

    assert_eq!(
        session.mutations(),
        &[Mutation::Text {
            target: rendered_address,
            text: "5".to_owned(),
        }]
    );
    assert_eq!(session.html(), "<div>5</div>");
}

#[test]
fn test_unchanged_write_is_not_a_mutation() {
    let mut session = round_trip("counter", obj([("count", Value::from(3))])).session;
    session.write(ScopeId(0), "count", 3).unwrap();
    assert!(session.mutations().is_empty());

    session.write(ScopeId(0), "count", 4).unwrap();
    session.write(ScopeId(0), "count", 4).unwrap();
    assert_eq!(session.mutations().len(), 1);
}

#[test]
fn test_hydration_does_not_mutate_or_rerun_setup() {
    let (sink, rendered) = render("counter", obj([("count", Value::from(7))]));
    let hydrated = Hydrator::new(registry()).hydrate(&sink.output()).unwrap();

    assert!(hydrated.failures.is_empty());
    assert!(hydrated.session.mutations().is_empty());
    assert_eq!(hydrated.session.html(), rendered.html());
    assert_eq!(
        hydrated.session.store().get(ScopeId(0), &"count".into()).unwrap(),
        &Value::from(7)
    );
}

#[test]
fn test_escaped_text_survives_the_round_trip() {
    let (sink, _) = render("counter", obj([("count", Value::from("a<b & c"))]));
    assert!(sink.output().contains("a&lt;b &amp; c"));

    let session = Hydrator::new(registry()).hydrate(&sink.output()).unwrap().session;
    assert_eq!(session.html(), "<div>a&lt;b &amp; c</div>");
    assert_eq!(
        session.store().get(ScopeId(0), &"count".into()).unwrap(),
        &Value::from("a<b & c")
    );
}

// =============================================================================
// Intersections
// =============================================================================

#[test]
fn test_intersection_after_hydration_waits_for_both_inputs() {
    let mut session = round_trip("pair", obj([("x", Value::from(1)), ("y", Value::from(2))])).session;
    assert_eq!(session.html(), r#"<button data-sum="3">1</button>3"#);

    session.write(ScopeId(0), "x", 5).unwrap();
    assert_eq!(session.html(), r#"<button data-sum="3">5</button>3"#);
    assert_eq!(session.mutations().len(), 1);

    // same value for y still counts as an arrival
    session.write(ScopeId(0), "y", 2).unwrap();
    assert_eq!(session.html(), r#"<button data-sum="7">5</button>7"#);

    let mutations = session.take_mutations();
    assert_eq!(mutations.len(), 3);
    assert!(matches!(
        &mutations[1],
        Mutation::SetAttr { name, value, .. } if name == "data-sum" && value == "7"
    ));
    assert!(matches!(&mutations[2], Mutation::Text { text, .. } if text == "7"));
}

#[test]
fn test_both_inputs_in_one_burst_fire_once() {
    let mut session = round_trip("pair", obj([("x", Value::from(1)), ("y", Value::from(1))])).session;
    session
        .batch([(ScopeId(0), "x", Value::from(2)), (ScopeId(0), "y", Value::from(3))])
        .unwrap();

    let attrs = session
        .mutations()
        .iter()
        .filter(|m| matches!(m, Mutation::SetAttr { .. }))
        .count();
    assert_eq!(attrs, 1);
    assert_eq!(session.html(), r#"<button data-sum="5">2</button>5"#);
}

// =============================================================================
// Conditionals and embedded children
// =============================================================================

#[test]
fn test_conditional_branch_after_hydration() {
    let hydrated = round_trip("toggle", obj([("open", Value::from(true))]));
    assert!(hydrated.failures.is_empty());
    let mut session = hydrated.session;
    assert_eq!(session.html(), "<section><p>banner</p></section>");
    assert!(session.graph().is_attached(ScopeId(1)));

    session.write(ScopeId(0), "open", false).unwrap();
    assert_eq!(session.html(), "<section></section>");
    assert!(!session.store().contains(ScopeId(1)));

    session.write(ScopeId(0), "open", true).unwrap();
    assert_eq!(session.html(), "<section><p>banner</p></section>");

    let region = NodeAddress::from_path(&[0, 0, 0]);
    assert_eq!(
        session.mutations(),
        &[
            Mutation::Remove {
                target: region.clone(),
                scope: ScopeId(1),
            },
            Mutation::Insert {
                target: region,
                template: "banner".to_owned(),
                scope: ScopeId(2),
            },
        ]
    );
}

#[test]
fn test_embedded_child_receives_forwarded_slots() {
    let input = obj([
        ("title", Value::from("Totals")),
        ("a", Value::from(1)),
        ("b", Value::from(2)),
    ]);
    let hydrated = round_trip("card", input);
    assert!(hydrated.failures.is_empty());
    let mut session = hydrated.session;
    assert_eq!(session.html(), "<h1>Totals</h1><div>Counts: 1,2</div>");

    let child = session.child_slot(ScopeId(0), 1).unwrap();
    assert_eq!(session.store().parent(child), Some(ScopeId(0)));

    session.write(ScopeId(0), "a", 5).unwrap();
    assert_eq!(session.html(), "<h1>Totals</h1><div>Counts: 5,2</div>");
    assert_eq!(
        session.mutations(),
        &[Mutation::Text {
            target: NodeAddress::from_path(&[0, 1, 1]),
            text: "5".to_owned(),
        }]
    );
}

// =============================================================================
// Placeholders
// =============================================================================

#[test]
fn test_comment_text_and_region_slots_survive_hydration() {
    let input = obj([("label", Value::from("hi")), ("count", Value::from(5))]);
    let (sink, rendered) = render("anchor", input.clone());
    assert!(sink.output().contains("<!----><!--@0 #0-->"));

    let hydrated = round_trip("anchor", input);
    assert!(hydrated.failures.is_empty());
    let mut session = hydrated.session;
    for slot in 0..3 {
        let node = session.node_slot(ScopeId(0), slot).unwrap();
        let expected = rendered.node_slot(ScopeId(0), slot).unwrap();
        assert_eq!(
            session.document().address(node),
            rendered.document().address(expected)
        );
    }
    assert_eq!(session.html(), "<div></div><!----><p>hi</p>5");

    session.write(ScopeId(0), "label", "yo").unwrap();
    session.write(ScopeId(0), "count", 6).unwrap();
    assert_eq!(session.html(), "<div></div><!----><p>yo</p>6");
    assert_eq!(session.mutations().len(), 2);
}

// =============================================================================
// Render context
// =============================================================================

#[test]
fn test_branch_mounted_after_hydration_sees_the_render_context() {
    let context = obj([("title", Value::from("Hello"))]);
    let (sink, _) = render_with(
        "toggle",
        obj([("open", Value::from(false))]),
        context,
        RuntimeConfig::default(),
    );
    let mut session = Hydrator::new(registry()).hydrate(&sink.output()).unwrap().session;
    assert_eq!(session.context().field("title"), Value::from("Hello"));

    session.write(ScopeId(0), "open", true).unwrap();
    assert_eq!(session.html(), "<section><p>Hello</p></section>");
}

#[test]
fn test_hydrator_context_overrides_the_served_one() {
    let (sink, _) = render_with(
        "toggle",
        obj([("open", Value::from(false))]),
        obj([("title", Value::from("Hello"))]),
        RuntimeConfig::default(),
    );
    let mut session = Hydrator::new(registry())
        .with_context(obj([("title", Value::from("Hi"))]))
        .hydrate(&sink.output())
        .unwrap()
        .session;

    session.write(ScopeId(0), "open", true).unwrap();
    assert_eq!(session.html(), "<section><p>Hi</p></section>");
}

#[test]
fn test_unserialized_context_falls_back_to_defaults() {
    let config = RuntimeConfig {
        serialize_context: false,
        ..RuntimeConfig::default()
    };
    let (sink, _) = render_with(
        "toggle",
        obj([("open", Value::from(false))]),
        obj([("title", Value::from("Hello"))]),
        config,
    );
    let mut session = Hydrator::new(registry()).hydrate(&sink.output()).unwrap().session;

    session.write(ScopeId(0), "open", true).unwrap();
    assert_eq!(session.html(), "<section><p>banner</p></section>");
}

// =============================================================================
// Mismatches
// =============================================================================

fn corrupted_toggle() -> String {
    let (sink, _) = render("toggle", obj([("open", Value::from(true))]));
    let served = sink.output();
    let corrupted = served.replace("<!--[1 #0-->banner<!--]-->", "banner");
    assert_ne!(served, corrupted);
    corrupted
}

#[test]
fn test_mismatch_is_isolated_and_recovered() {
    let hydrated = Hydrator::new(registry()).hydrate(&corrupted_toggle()).unwrap();

    assert_eq!(hydrated.failures.len(), 1);
    let failure = &hydrated.failures[0];
    assert_eq!(failure.scope, ScopeId(1));
    assert_eq!(failure.template, "banner");
    assert!(failure.recovered);
    assert!(matches!(failure.error, RuntimeError::StructuralMismatch { .. }));

    let mut session = hydrated.session;
    assert_eq!(session.html(), "<section><p>banner</p></section>");
    assert!(session.graph().is_attached(ScopeId(0)));
    assert!(session.graph().is_attached(ScopeId(1)));

    session.write(ScopeId(0), "open", false).unwrap();
    assert_eq!(session.html(), "<section></section>");
}

#[test]
fn test_mismatch_without_recovery_leaves_siblings_live() {
    let config = RuntimeConfig {
        recover_mismatch: false,
        ..RuntimeConfig::default()
    };
    let hydrated = Hydrator::with_config(registry(), config)
        .hydrate(&corrupted_toggle())
        .unwrap();

    assert_eq!(hydrated.failures.len(), 1);
    assert!(!hydrated.failures[0].recovered);
    assert!(hydrated.session.graph().is_attached(ScopeId(0)));
    assert!(!hydrated.session.graph().is_attached(ScopeId(1)));
}

#[test]
fn test_strict_hydration_fails_fast() {
    let config = RuntimeConfig {
        strict_hydration: true,
        ..RuntimeConfig::default()
    };
    let err = Hydrator::with_config(registry(), config)
        .hydrate(&corrupted_toggle())
        .unwrap_err();
    assert!(err.is_structural());
}

#[test]
fn test_unknown_template_in_calls_is_an_error() {
    let (sink, _) = render("counter", obj([("count", Value::from(1))]));
    let served = sink.output().replace(r#"[["counter",0]]"#, r#"[["missing",0]]"#);
    let err = Hydrator::new(registry()).hydrate(&served).unwrap_err();
    assert!(matches!(err, RuntimeError::UnknownTemplate(id) if id == "missing"));
}

/// Swap the embedded scope snapshot of served counter output for `snapshot`.
fn with_snapshot(snapshot: &str) -> String {
    let (sink, _) = render("counter", obj([("count", Value::from(1))]));
    let served = sink.output();
    let open = format!(r#"<script type="{SCOPES_TYPE}">"#);
    let start = served.find(&open).unwrap() + open.len();
    let end = start + served[start..].find("</script>").unwrap();
    format!("{}{snapshot}{}", &served[..start], &served[end..])
}

#[test]
fn test_out_of_range_snapshot_ids_are_errors() {
    for id in ["4294967295", "4000000000", "2000000"] {
        let served = with_snapshot(&format!(r#"{{"{id}":{{"parent":null,"slots":{{}}}}}}"#));
        let err = Hydrator::new(registry()).hydrate(&served).unwrap_err();
        assert!(matches!(err, RuntimeError::Snapshot(_)), "id {id}: {err}");
    }

    let config = RuntimeConfig {
        max_scope_id: 1,
        ..RuntimeConfig::default()
    };
    let served = with_snapshot(r#"{"0":{"parent":null,"slots":{"count":1}},"1":{"parent":0,"slots":{}}}"#);
    let err = Hydrator::with_config(registry(), config).hydrate(&served).unwrap_err();
    assert!(matches!(err, RuntimeError::Snapshot(_)));
}
