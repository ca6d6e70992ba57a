//! Output sinks.
//!
//! The runtime writes through [`OutputSink`] and never assumes anything about
//! the transport behind it. [`SessionSink`] wraps a sink for one render session
//! and enforces the end-once contract.

use std::io::Write;

use tracing::trace;

use crate::error::{Result, RuntimeError, SinkError};
use crate::types::Value;

// =============================================================================
// OutputSink
// =============================================================================

pub trait OutputSink {
    fn write(&mut self, chunk: &str) -> std::result::Result<(), SinkError>;

    /// Advisory boundary: everything written so far may be sent.
    fn flush(&mut self) -> std::result::Result<(), SinkError> {
        Ok(())
    }

    /// Terminate the stream, optionally with a last chunk.
    fn end(&mut self, last: Option<&str>) -> std::result::Result<(), SinkError>;

    /// Out-of-band event. Not part of the markup stream.
    fn emit(&mut self, _event: &str, _payload: &[Value]) -> std::result::Result<(), SinkError> {
        Ok(())
    }
}

impl<S: OutputSink + ?Sized> OutputSink for &mut S {
    fn write(&mut self, chunk: &str) -> std::result::Result<(), SinkError> {
        (**self).write(chunk)
    }

    fn flush(&mut self) -> std::result::Result<(), SinkError> {
        (**self).flush()
    }

    fn end(&mut self, last: Option<&str>) -> std::result::Result<(), SinkError> {
        (**self).end(last)
    }

    fn emit(&mut self, event: &str, payload: &[Value]) -> std::result::Result<(), SinkError> {
        (**self).emit(event, payload)
    }
}

// =============================================================================
// SessionSink
// =============================================================================

/// One session's view of a sink: `end` exactly once, nothing after it.
#[derive(Debug)]
pub struct SessionSink<S> {
    inner: S,
    ended: bool,
}

impl<S: OutputSink> SessionSink<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, ended: false }
    }

    pub fn write(&mut self, chunk: &str) -> Result<()> {
        self.open()?;
        trace!(bytes = chunk.len(), "sink write");
        Ok(self.inner.write(chunk)?)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.open()?;
        Ok(self.inner.flush()?)
    }

    pub fn end(&mut self, last: Option<&str>) -> Result<()> {
        if self.ended {
            return Err(RuntimeError::MultipleEndCalls);
        }
        self.ended = true;
        Ok(self.inner.end(last)?)
    }

    pub fn emit(&mut self, event: &str, payload: &[Value]) -> Result<()> {
        self.open()?;
        Ok(self.inner.emit(event, payload)?)
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn open(&self) -> Result<()> {
        if self.ended {
            return Err(SinkError::Closed.into());
        }
        Ok(())
    }
}

// =============================================================================
// MemorySink
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Write(String),
    Flush,
    End(Option<String>),
    Emit { event: String, payload: Vec<Value> },
}

/// Records every sink call in order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Vec<SinkEvent>,
    /// Reject writes once this many have been accepted.
    accept: Option<usize>,
    writes: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that rejects every write after the first `n`.
    pub fn rejecting_after(n: usize) -> Self {
        Self {
            accept: Some(n),
            ..Self::default()
        }
    }

    pub fn events(&self) -> &[SinkEvent] {
        &self.events
    }

    /// Everything written, `end`'s last chunk included.
    pub fn output(&self) -> String {
        let mut out = String::new();
        for event in &self.events {
            match event {
                SinkEvent::Write(chunk) | SinkEvent::End(Some(chunk)) => out.push_str(chunk),
                _ => {}
            }
        }
        out
    }

    /// Compact call log: `write`, `flush`, `end`, `emit:<event>`.
    pub fn log(&self) -> Vec<String> {
        self.events
            .iter()
            .map(|event| match event {
                SinkEvent::Write(_) => "write".to_owned(),
                SinkEvent::Flush => "flush".to_owned(),
                SinkEvent::End(_) => "end".to_owned(),
                SinkEvent::Emit { event, .. } => format!("emit:{event}"),
            })
            .collect()
    }

    pub fn emitted(&self, name: &str) -> Vec<&[Value]> {
        self.events
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Emit { event, payload } if event == name => Some(payload.as_slice()),
                _ => None,
            })
            .collect()
    }

    pub fn is_ended(&self) -> bool {
        self.events.iter().any(|e| matches!(e, SinkEvent::End(_)))
    }
}

impl OutputSink for MemorySink {
    fn write(&mut self, chunk: &str) -> std::result::Result<(), SinkError> {
        if self.is_ended() {
            return Err(SinkError::Closed);
        }
        if self.accept.is_some_and(|n| self.writes >= n) {
            return Err(SinkError::Rejected(format!("write #{} refused", self.writes + 1)));
        }
        self.writes += 1;
        self.events.push(SinkEvent::Write(chunk.to_owned()));
        Ok(())
    }

    fn flush(&mut self) -> std::result::Result<(), SinkError> {
        self.events.push(SinkEvent::Flush);
        Ok(())
    }

    fn end(&mut self, last: Option<&str>) -> std::result::Result<(), SinkError> {
        if self.is_ended() {
            return Err(SinkError::Closed);
        }
        self.events.push(SinkEvent::End(last.map(str::to_owned)));
        Ok(())
    }

    fn emit(&mut self, event: &str, payload: &[Value]) -> std::result::Result<(), SinkError> {
        self.events.push(SinkEvent::Emit {
            event: event.to_owned(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

// =============================================================================
// WriterSink
// =============================================================================

/// Streams output into any [`std::io::Write`]. Events are logged, not written.
#[derive(Debug)]
pub struct WriterSink<W: Write> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> OutputSink for WriterSink<W> {
    fn write(&mut self, chunk: &str) -> std::result::Result<(), SinkError> {
        self.writer.write_all(chunk.as_bytes())?;
        Ok(())
    }

    fn flush(&mut self) -> std::result::Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }

    fn end(&mut self, last: Option<&str>) -> std::result::Result<(), SinkError> {
        if let Some(last) = last {
            self.writer.write_all(last.as_bytes())?;
        }
        self.writer.flush()?;
        Ok(())
    }

    fn emit(&mut self, event: &str, payload: &[Value]) -> std::result::Result<(), SinkError> {
        trace!(event, ?payload, "sink event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_end_twice_is_an_error() {
        let mut sink = SessionSink::new(MemorySink::new());
        sink.write("<p>").unwrap();
        sink.end(Some("</p>")).unwrap();

        assert!(matches!(sink.end(None), Err(RuntimeError::MultipleEndCalls)));
        assert!(matches!(
            sink.write("late"),
            Err(RuntimeError::Sink(SinkError::Closed))
        ));
        assert_eq!(sink.into_inner().output(), "<p></p>");
    }

    #[test]
    fn test_memory_sink_log() {
        let mut sink = MemorySink::new();
        sink.write("a").unwrap();
        sink.flush().unwrap();
        sink.emit("late-chunk", &[Value::from(0)]).unwrap();
        sink.end(None).unwrap();

        assert_eq!(sink.log(), vec!["write", "flush", "emit:late-chunk", "end"]);
        assert_eq!(sink.emitted("late-chunk"), vec![&[Value::from(0)][..]]);
    }

    #[test]
    fn test_rejecting_sink() {
        let mut sink = SessionSink::new(MemorySink::rejecting_after(1));
        sink.write("ok").unwrap();
        let err = sink.write("no").unwrap_err();
        assert!(matches!(err, RuntimeError::Sink(SinkError::Rejected(_))));
    }

    #[test]
    fn test_writer_sink() {
        let mut sink = WriterSink::new(Vec::new());
        sink.write("<a>").unwrap();
        sink.end(Some("</a>")).unwrap();
        assert_eq!(sink.into_inner(), b"<a></a>".to_vec());
    }
}
