//! Shared templates and helpers for the scenario tests.
//!
//! The templates here are what a compiler would emit for small components:
//! static markup, a walk code and the signal wiring.

#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};

use futures::FutureExt;

use spark_hydrate::signals::EffectAction;
use spark_hydrate::{
    Hydrated, Hydrator, MemorySink, Renderer, RuntimeConfig, Session, Template, TemplateRegistry,
    Value,
};

static INIT: Once = Once::new();

/// Route `tracing` output to the test harness when `RUST_LOG` is set.
pub fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_none() {
        return;
    }
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// =============================================================================
// Templates
// =============================================================================

/// `<div>{count}</div>`
pub fn counter() -> Template {
    let mut t = Template::builder("counter", "<div><!></div>", "D%");
    let count = t.value("count");
    t.effect(&[count], EffectAction::text(0, "count"));
    t.setup(|input, _| vec![("count".into(), input.field("count"))]);
    t.build().unwrap()
}

/// `<button data-sum={x + y}>{x}</button>{x + y}`
///
/// Slots: `#0` button, `#1` its text, `#2` the trailing region.
pub fn pair() -> Template {
    let mut t = Template::builder("pair", "<button> </button><!>", " D l%b");
    let x = t.value("x");
    let y = t.value("y");
    t.effect(&[x], EffectAction::text(1, "x"));
    let sum = t.derived(&[x, y], "sum", |values| {
        Value::from(values.iter().filter_map(Value::as_int).sum::<i64>())
    });
    t.effect(&[sum], EffectAction::attr(0, "data-sum", "sum"));
    t.effect(&[sum], EffectAction::text(2, "sum"));
    t.setup(|input, _| {
        vec![
            ("x".into(), input.field("x")),
            ("y".into(), input.field("y")),
        ]
    });
    t.build().unwrap()
}

/// `<section>{open && <Banner/>}</section>`
pub fn toggle() -> Template {
    let mut t = Template::builder("toggle", "<section><!></section>", "D%");
    let open = t.value("open");
    t.effect(&[open], EffectAction::conditional(0, "open", "banner"));
    t.setup(|input, _| vec![("open".into(), input.field("open"))]);
    t.build().unwrap()
}

/// `<p>{title}</p>`, reading `title` from the render context.
pub fn banner() -> Template {
    let mut t = Template::builder("banner", "<p><!></p>", "D%");
    let title = t.value("title");
    t.effect(&[title], EffectAction::text(0, "title"));
    t.setup(|_, ctx| {
        let title = match ctx.field("title") {
            Value::Null => Value::from("banner"),
            title => title,
        };
        vec![("title".into(), title)]
    });
    t.build().unwrap()
}

/// `Counts: {a},{b}` as an embedded component.
pub fn counts() -> Template {
    let mut t = Template::builder("counts", "Counts: <!>,<!>", "b%c%");
    let a = t.value("a");
    let b = t.value("b");
    t.effect(&[a], EffectAction::text(0, "a"));
    t.effect(&[b], EffectAction::text(1, "b"));
    t.build().unwrap()
}

/// `<h1>{title}</h1><div><Counts a={a} b={b}/></div>`
pub fn card() -> Template {
    let mut t = Template::builder("card", "<h1><!></h1><div>Counts: <!>,<!></div>", "D%l/Db%c%&");
    let title = t.value("title");
    let a = t.value("a");
    let b = t.value("b");
    t.effect(&[title], EffectAction::text(0, "title"));
    t.effect(&[a, b], EffectAction::child(1, [("a", "a"), ("b", "b")]));
    t.child("counts");
    t.setup(|input, _| {
        vec![
            ("title".into(), input.field("title")),
            ("a".into(), input.field("a")),
            ("b".into(), input.field("b")),
        ]
    });
    t.build().unwrap()
}

/// `<main>{await slow}{await fast}</main>`
///
/// The first section takes more polls than the second, so it completes last.
pub fn page() -> Template {
    let mut t = Template::builder("page", "<main><!><!></main>", "D%b%");
    t.section(0, "item", |_| {
        Delay::new(4, Value::from([("label", Value::from("slow"))])).boxed_local()
    });
    t.section(1, "item", |_| {
        Delay::new(1, Value::from([("label", Value::from("fast"))])).boxed_local()
    });
    t.build().unwrap()
}

/// `<p>{label}</p>`, the branch of each page section.
pub fn item() -> Template {
    let mut t = Template::builder("item", "<p><!></p>", "D%");
    let label = t.value("label");
    t.effect(&[label], EffectAction::text(0, "label"));
    t.setup(|input, _| vec![("label".into(), input.field("label"))]);
    t.build().unwrap()
}

/// `<div></div><!--anchor--><p>{label}</p>{count}`
///
/// Slots: `#0` the anchor comment, `#1` the text inside `<p>`, `#2` the region.
pub fn anchor() -> Template {
    let mut t = Template::builder("anchor", "<div></div><!><p> </p><!>", "b bD l%");
    let label = t.value("label");
    let count = t.value("count");
    t.effect(&[label], EffectAction::text(1, "label"));
    t.effect(&[count], EffectAction::text(2, "count"));
    t.setup(|input, _| {
        vec![
            ("label".into(), input.field("label")),
            ("count".into(), input.field("count")),
        ]
    });
    t.build().unwrap()
}

pub fn registry() -> TemplateRegistry {
    let mut registry = TemplateRegistry::new();
    for template in [counter(), pair(), toggle(), banner(), counts(), card(), page(), item(), anchor()] {
        registry.register(template).unwrap();
    }
    registry
}

// =============================================================================
// Futures
// =============================================================================

/// Resolves after being polled `polls` more times, waking itself each time.
pub struct Delay {
    polls: u32,
    value: Option<Value>,
}

impl Delay {
    pub fn new(polls: u32, value: Value) -> Self {
        Self {
            polls,
            value: Some(value),
        }
    }
}

impl Future for Delay {
    type Output = Result<Value, String>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.polls == 0 {
            return Poll::Ready(self.value.take().ok_or_else(|| "polled after completion".to_owned()));
        }
        self.polls -= 1;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

// =============================================================================
// Round trips
// =============================================================================

/// Render `template` into a memory sink and return the sink with the live session.
pub fn render(template: &str, input: Value) -> (MemorySink, Session) {
    render_with(template, input, Value::Null, RuntimeConfig::default())
}

pub fn render_with(template: &str, input: Value, context: Value, config: RuntimeConfig) -> (MemorySink, Session) {
    init_tracing();
    let mut sink = MemorySink::new();
    let session = Renderer::with_config(registry(), config)
        .render(template, input, context, &mut sink)
        .unwrap();
    (sink, session)
}

/// Render, then hydrate the served output.
pub fn round_trip(template: &str, input: Value) -> Hydrated {
    let (sink, _) = render(template, input);
    Hydrator::new(registry()).hydrate(&sink.output()).unwrap()
}

pub fn obj<const N: usize>(fields: [(&str, Value); N]) -> Value {
    Value::from(fields)
}
