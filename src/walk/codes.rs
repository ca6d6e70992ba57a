//! Walk code alphabet and the parsed instruction array.
//!
//! One byte per instruction. Counts for `next`, `over` and `out` are packed
//! into the byte itself; larger counts are prefixed with multiplier digits.
//!
//! ```text
//! ' '        get
//! '%'        replace
//! '&'        endChild
//! '/'        beginChild
//! 'C'..='['  next(0..=24)
//! 'a'..='j'  over(0..=9)
//! 'k'..='t'  out(0..=9)
//! 'u'..='~'  multiplier digit 0..=9   (n = m * range + r)
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::RuntimeError;

const GET: u8 = b' ';
const REPLACE: u8 = b'%';
const END_CHILD: u8 = b'&';
const BEGIN_CHILD: u8 = b'/';
const NEXT: u8 = b'C';
const OVER: u8 = b'a';
const OUT: u8 = b'k';
const MULTIPLIER: u8 = b'u';

const NEXT_RANGE: u32 = 25;
const OVER_RANGE: u32 = 10;
const OUT_RANGE: u32 = 10;
const DIGIT_RANGE: u32 = 10;

/// One traversal primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WalkOp {
    Get,
    Replace,
    Next(u32),
    Over(u32),
    Out(u32),
    BeginChild,
    EndChild,
}

impl fmt::Display for WalkOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("get"),
            Self::Replace => f.write_str("replace"),
            Self::Next(n) => write!(f, "next({n})"),
            Self::Over(n) => write!(f, "over({n})"),
            Self::Out(n) => write!(f, "out({n})"),
            Self::BeginChild => f.write_str("beginChild"),
            Self::EndChild => f.write_str("endChild"),
        }
    }
}

/// A walk code parsed once at template registration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WalkProgram {
    ops: Box<[WalkOp]>,
}

impl WalkProgram {
    /// Parse a walk code string.
    ///
    /// Rejects unknown bytes, a multiplier with no instruction after it,
    /// a multiplier in front of an op that takes no count, and unbalanced
    /// `beginChild`/`endChild` pairs.
    pub fn parse(code: &str) -> Result<Self, RuntimeError> {
        let mut ops = Vec::with_capacity(code.len());
        let mut multiplier: Option<(usize, u32)> = None;
        let mut depth = 0usize;

        for (offset, byte) in code.bytes().enumerate() {
            let invalid = |reason: &str| RuntimeError::InvalidWalkCode {
                offset,
                reason: reason.to_owned(),
            };

            let pending = multiplier;
            let counted = |base: u8, range: u32| -> Result<u32, RuntimeError> {
                let r = u32::from(byte - base);
                match pending {
                    Some((_, m)) => m
                        .checked_mul(range)
                        .and_then(|v| v.checked_add(r))
                        .ok_or_else(|| invalid("count overflows")),
                    None => Ok(r),
                }
            };

            let op = match byte {
                MULTIPLIER..=b'~' => {
                    let digit = u32::from(byte - MULTIPLIER);
                    let (start, m) = pending.unwrap_or((offset, 0));
                    let m = m
                        .checked_mul(DIGIT_RANGE)
                        .and_then(|v| v.checked_add(digit))
                        .ok_or_else(|| invalid("multiplier overflows"))?;
                    multiplier = Some((start, m));
                    continue;
                }
                NEXT..=b'[' => WalkOp::Next(counted(NEXT, NEXT_RANGE)?),
                OVER..=b'j' => WalkOp::Over(counted(OVER, OVER_RANGE)?),
                OUT..=b't' => WalkOp::Out(counted(OUT, OUT_RANGE)?),
                _ if pending.is_some() => {
                    return Err(invalid("multiplier must precede next, over or out"));
                }
                GET => WalkOp::Get,
                REPLACE => WalkOp::Replace,
                BEGIN_CHILD => {
                    depth += 1;
                    WalkOp::BeginChild
                }
                END_CHILD => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| invalid("endChild without beginChild"))?;
                    WalkOp::EndChild
                }
                _ => return Err(invalid(&format!("unknown instruction byte {byte:#04x}"))),
            };
            multiplier = None;
            ops.push(op);
        }

        if let Some((offset, _)) = multiplier {
            return Err(RuntimeError::InvalidWalkCode {
                offset,
                reason: "dangling multiplier".to_owned(),
            });
        }
        if depth != 0 {
            return Err(RuntimeError::InvalidWalkCode {
                offset: code.len(),
                reason: format!("{depth} beginChild left open"),
            });
        }

        Ok(Self {
            ops: ops.into_boxed_slice(),
        })
    }

    pub fn from_ops(ops: impl IntoIterator<Item = WalkOp>) -> Self {
        Self {
            ops: ops.into_iter().collect(),
        }
    }

    pub fn ops(&self) -> &[WalkOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of top-level child frames (`beginChild` at depth 0).
    pub fn child_frames(&self) -> usize {
        let mut depth = 0usize;
        let mut frames = 0;
        for op in self.ops.iter() {
            match op {
                WalkOp::BeginChild => {
                    if depth == 0 {
                        frames += 1;
                    }
                    depth += 1;
                }
                WalkOp::EndChild => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
        frames
    }

    /// Encode back into the compact string form.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.ops.len());
        for op in self.ops.iter() {
            match *op {
                WalkOp::Get => out.push(GET as char),
                WalkOp::Replace => out.push(REPLACE as char),
                WalkOp::BeginChild => out.push(BEGIN_CHILD as char),
                WalkOp::EndChild => out.push(END_CHILD as char),
                WalkOp::Next(n) => encode_counted(&mut out, NEXT, NEXT_RANGE, n),
                WalkOp::Over(n) => encode_counted(&mut out, OVER, OVER_RANGE, n),
                WalkOp::Out(n) => encode_counted(&mut out, OUT, OUT_RANGE, n),
            }
        }
        out
    }
}

fn encode_counted(out: &mut String, base: u8, range: u32, n: u32) {
    let m = n / range;
    if m > 0 {
        for digit in m.to_string().bytes() {
            out.push((MULTIPLIER + (digit - b'0')) as char);
        }
    }
    // n % range < range <= 25, fits the byte range
    out.push((base + (n % range) as u8) as char);
}

impl FromStr for WalkProgram {
    type Err = RuntimeError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        Self::parse(code)
    }
}

impl fmt::Display for WalkProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, op) in self.ops.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{op}")?;
        }
        Ok(())
    }
}
