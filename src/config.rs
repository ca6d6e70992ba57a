//! Runtime configuration.
//!
//! Defaults suit production rendering. Overrides come from a JSON document
//! or from `SPARK_HYDRATE_*` environment variables.

use serde::{Deserialize, Serialize};

use crate::engine::DEFAULT_ID_LIMIT;
use crate::error::Result;

/// Knobs shared by the renderer, hydrator and update engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Bound on chained waves in one drain (custom effects may queue writes).
    pub max_waves: usize,
    /// Fail the whole hydrate call on the first structural mismatch.
    pub strict_hydration: bool,
    /// Re-render a mismatching instance from its snapshot data.
    pub recover_mismatch: bool,
    /// Call `flush()` once the synchronous shell is written.
    pub flush_after_shell: bool,
    /// Mirror hydrate calls and late chunks as sink events.
    pub emit_events: bool,
    /// Write the render context into the output for the hydrator.
    pub serialize_context: bool,
    /// Scope ids at or above this are rejected when loading a served snapshot.
    pub max_scope_id: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_waves: 64,
            strict_hydration: false,
            recover_mismatch: true,
            flush_after_shell: true,
            emit_events: true,
            serialize_context: true,
            max_scope_id: DEFAULT_ID_LIMIT,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Defaults overlaid with `SPARK_HYDRATE_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Overlay values found through `lookup`. Unparseable values are ignored.
    ///
    /// # Arguments
    /// * `lookup` - Resolves a variable name such as `SPARK_HYDRATE_MAX_WAVES`
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(waves) = lookup("SPARK_HYDRATE_MAX_WAVES").and_then(|v| v.trim().parse().ok()) {
            self.max_waves = waves;
        }
        let flag = |name: &str| lookup(name).and_then(|v| parse_flag(&v));
        if let Some(on) = flag("SPARK_HYDRATE_STRICT") {
            self.strict_hydration = on;
        }
        if let Some(on) = flag("SPARK_HYDRATE_RECOVER") {
            self.recover_mismatch = on;
        }
        if let Some(on) = flag("SPARK_HYDRATE_FLUSH_AFTER_SHELL") {
            self.flush_after_shell = on;
        }
        if let Some(on) = flag("SPARK_HYDRATE_EMIT_EVENTS") {
            self.emit_events = on;
        }
        if let Some(on) = flag("SPARK_HYDRATE_SERIALIZE_CONTEXT") {
            self.serialize_context = on;
        }
        if let Some(limit) = lookup("SPARK_HYDRATE_MAX_SCOPE_ID").and_then(|v| v.trim().parse().ok()) {
            self.max_scope_id = limit;
        }
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
