//! Error taxonomy for render, hydrate and update sessions.
//!
//! Every error is surfaced synchronously to the caller of the operation that
//! detected it. Nothing here is retried internally.

use std::io;

use thiserror::Error;

use crate::types::{ScopeId, SlotKey};

/// Errors raised by the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A slot was read before anything wrote it.
    #[error("slot {key} of scope {scope} was read before it was written")]
    UnboundSlot { scope: ScopeId, key: SlotKey },

    /// A scope id that the store never created, or already destroyed.
    #[error("scope {0} does not exist")]
    UnknownScope(ScopeId),

    /// Output shape disagrees with the compiled template.
    #[error("structural mismatch in template `{template}` at walk step {position}: {reason}")]
    StructuralMismatch {
        template: String,
        position: usize,
        reason: String,
    },

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("sink end() called more than once in one session")]
    MultipleEndCalls,

    #[error("invalid walk code at byte {offset}: {reason}")]
    InvalidWalkCode { offset: usize, reason: String },

    #[error("template `{0}` is not registered")]
    UnknownTemplate(String),

    #[error("unreadable markup at byte {offset}: {reason}")]
    Markup { offset: usize, reason: String },

    #[error("scope snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("effects kept writing after {0} waves")]
    WaveLimit(usize),

    #[error("async section {section} failed: {reason}")]
    AsyncSection { section: u32, reason: String },

    /// A template definition that cannot be used as compiled.
    #[error("template `{template}`: {reason}")]
    InvalidTemplate { template: String, reason: String },
}

impl RuntimeError {
    /// Whether hydration can isolate this error to one instance.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::StructuralMismatch { .. } | Self::UnboundSlot { .. } | Self::UnknownScope(_)
        )
    }
}

/// Errors produced by an output sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink rejected output: {0}")]
    Rejected(String),

    #[error("sink is closed")]
    Closed,

    #[error("sink i/o: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_error_converts() {
        let err: RuntimeError = SinkError::Closed.into();
        assert!(matches!(err, RuntimeError::Sink(SinkError::Closed)));
        assert_eq!(err.to_string(), "sink is closed");
    }

    #[test]
    fn test_unbound_slot_message() {
        let err = RuntimeError::UnboundSlot {
            scope: ScopeId(3),
            key: SlotKey::Index(1),
        };
        assert_eq!(
            err.to_string(),
            "slot #1 of scope 3 was read before it was written"
        );
        assert!(err.is_structural());
        assert!(!RuntimeError::MultipleEndCalls.is_structural());
    }
}
