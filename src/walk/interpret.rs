//! Walk interpreter.
//!
//! Runs a [`WalkProgram`] against any [`WalkCursor`]. The renderer and the
//! hydrator use the same interpreter over different cursors, which is what
//! makes the two phases find the same nodes.

use tracing::trace;

use crate::error::RuntimeError;

use super::codes::{WalkOp, WalkProgram};

// =============================================================================
// Cursor
// =============================================================================

/// A position over an output tree that a walk can move.
///
/// The cursor sits on a slot inside a container. The slot may be one past the
/// last child, in which case [`current`](WalkCursor::current) is `None`.
pub trait WalkCursor {
    type Node: Copy;

    /// Node under the cursor.
    fn current(&self) -> Option<Self::Node>;

    /// Turn `node` into (or confirm it is) a replaceable region.
    fn claim_region(&mut self, node: Self::Node) -> Result<(), String>;

    /// One step in document pre-order, entering elements but not regions.
    /// Never climbs above the walk root. `false` if no node is under the cursor.
    fn step_next(&mut self) -> bool;

    /// One sibling forward. `false` if no node is under the cursor.
    fn step_over(&mut self) -> bool;

    /// Move to the container itself. `false` at the walk root.
    fn ascend(&mut self) -> bool;
}

// =============================================================================
// Frames
// =============================================================================

/// How a node was bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindKind {
    Get,
    Replace,
}

/// One numbered binding of a frame. Slot `i` of a frame is stored under key `#i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkSlot<N> {
    Node { node: N, kind: BindKind },
    Child(WalkFrame<N>),
}

/// Bindings produced for one template instance (or one embedded child).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkFrame<N> {
    pub slots: Vec<WalkSlot<N>>,
}

impl<N> Default for WalkFrame<N> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<N: Copy> WalkFrame<N> {
    /// Every bound node, depth first, in walk order.
    pub fn nodes(&self) -> Vec<N> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect(&self, out: &mut Vec<N>) {
        for slot in &self.slots {
            match slot {
                WalkSlot::Node { node, .. } => out.push(*node),
                WalkSlot::Child(frame) => frame.collect(out),
            }
        }
    }
}

/// Walk failure at instruction `step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkError {
    pub step: usize,
    pub reason: String,
}

impl WalkError {
    pub fn in_template(self, template: &str) -> RuntimeError {
        RuntimeError::StructuralMismatch {
            template: template.to_owned(),
            position: self.step,
            reason: self.reason,
        }
    }
}

// =============================================================================
// Interpret
// =============================================================================

/// Run `program` from the cursor's current position.
///
/// Any instruction that needs a node where there is none, or a move the
/// cursor cannot make, is cursor exhaustion and fails the whole walk.
pub fn interpret<C: WalkCursor>(
    program: &WalkProgram,
    cursor: &mut C,
) -> Result<WalkFrame<C::Node>, WalkError> {
    let mut stack: Vec<WalkFrame<C::Node>> = vec![WalkFrame::default()];

    for (step, op) in program.ops().iter().enumerate() {
        let fail = |reason: String| WalkError { step, reason };
        trace!(step, %op, "walk");

        match *op {
            WalkOp::Get | WalkOp::Replace => {
                let node = cursor
                    .current()
                    .ok_or_else(|| fail(format!("cursor exhausted before {op}")))?;
                let kind = if *op == WalkOp::Replace {
                    cursor.claim_region(node).map_err(fail)?;
                    BindKind::Replace
                } else {
                    BindKind::Get
                };
                push_slot(&mut stack, WalkSlot::Node { node, kind });
            }
            WalkOp::Next(n) => {
                for _ in 0..n {
                    if !cursor.step_next() {
                        return Err(fail(format!("cursor exhausted during {op}")));
                    }
                }
            }
            WalkOp::Over(n) => {
                for _ in 0..n {
                    if !cursor.step_over() {
                        return Err(fail(format!("cursor exhausted during {op}")));
                    }
                }
            }
            WalkOp::Out(n) => {
                for _ in 0..n {
                    if !cursor.ascend() {
                        return Err(fail(format!("{op} climbs above the walk root")));
                    }
                }
                if !cursor.step_over() {
                    return Err(fail(format!("cursor exhausted during {op}")));
                }
            }
            WalkOp::BeginChild => stack.push(WalkFrame::default()),
            WalkOp::EndChild => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| fail("endChild without beginChild".to_owned()))?;
                if stack.is_empty() {
                    return Err(fail("endChild without beginChild".to_owned()));
                }
                push_slot(&mut stack, WalkSlot::Child(frame));
            }
        }
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(frame), true) => Ok(frame),
        _ => Err(WalkError {
            step: program.len(),
            reason: "beginChild left open".to_owned(),
        }),
    }
}

fn push_slot<N>(stack: &mut [WalkFrame<N>], slot: WalkSlot<N>) {
    if let Some(frame) = stack.last_mut() {
        frame.slots.push(slot);
    }
}
