//! The span data model (§3).
//!
//! A `Span` is mutable while in flight (attributes/events may still be
//! added, status may still change) and immutable once ended -- enforced by
//! convention here rather than the type system: the wrap engine and stream
//! adapter are the only code that holds a `Span` before calling
//! [`Span::end`], and everything downstream of `end` (the processor chain,
//! the exporter) only ever receives `&Span` or an owned, already-ended one.

use std::time::SystemTime;

use opentelemetry::trace::{SpanId, TraceId};

use crate::attributes::Attributes;

/// Mirrors the five OTel span kinds named in §3; `internal` is the default
/// for wraps that don't specify one (e.g. a tool execution).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Internal,
    Client,
    Server,
    Producer,
    Consumer,
}

impl SpanKind {
    pub(crate) fn as_otlp_i32(self) -> i32 {
        match self {
            SpanKind::Internal => 1,
            SpanKind::Server => 2,
            SpanKind::Client => 3,
            SpanKind::Producer => 4,
            SpanKind::Consumer => 5,
        }
    }
}

/// Terminal status of a span (§3, §4.5 step 6).
#[derive(Debug, Clone, PartialEq)]
pub enum SpanStatus {
    Unset,
    Ok,
    Error { message: Option<String> },
}

/// A timestamped, named, attributed event recorded on a span (§3).
#[derive(Debug, Clone)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: SystemTime,
    pub attributes: Attributes,
}

/// A link to another span's id. Reserved, unused by the core (§3).
#[derive(Debug, Clone)]
pub struct SpanLink {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

/// The atomic telemetry record (§3).
#[derive(Debug, Clone)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    /// `SpanId::INVALID` for a root span.
    pub parent_span_id: SpanId,
    pub name: String,
    pub kind: SpanKind,
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
    pub status: SpanStatus,
    pub attributes: Attributes,
    pub events: Vec<SpanEvent>,
    pub links: Vec<SpanLink>,
}

impl Span {
    pub fn new_root(name: impl Into<String>, kind: SpanKind, trace_id: TraceId, span_id: SpanId) -> Self {
        Span {
            trace_id,
            span_id,
            parent_span_id: SpanId::INVALID,
            name: name.into(),
            kind,
            start_time: SystemTime::now(),
            end_time: None,
            status: SpanStatus::Unset,
            attributes: Attributes::new(),
            events: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn new_child(
        name: impl Into<String>,
        kind: SpanKind,
        trace_id: TraceId,
        span_id: SpanId,
        parent_span_id: SpanId,
    ) -> Self {
        Span {
            trace_id,
            span_id,
            parent_span_id,
            name: name.into(),
            kind,
            start_time: SystemTime::now(),
            end_time: None,
            status: SpanStatus::Unset,
            attributes: Attributes::new(),
            events: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn merge_attributes(&mut self, attrs: Attributes) {
        self.attributes.extend(attrs);
    }

    pub fn add_event(&mut self, event: SpanEvent) {
        self.events.push(event);
    }

    /// End the span now with the given status. A no-op if already ended
    /// (the invariant "ended spans are never re-opened" means a second call
    /// simply doesn't move the end time).
    pub fn end(&mut self, status: SpanStatus) {
        self.end_with_timestamp(status, SystemTime::now());
    }

    pub fn end_with_timestamp(&mut self, status: SpanStatus, timestamp: SystemTime) {
        if self.end_time.is_some() {
            return;
        }
        self.status = status;
        self.end_time = Some(timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_timestamp_is_never_before_start() {
        let mut span = Span::new_root("session", SpanKind::Internal, TraceId::from_bytes([1; 16]), SpanId::from_bytes([1; 8]));
        span.end(SpanStatus::Ok);
        assert!(span.end_time.unwrap() >= span.start_time);
    }

    #[test]
    fn ending_twice_keeps_first_end_time() {
        let mut span = Span::new_root("session", SpanKind::Internal, TraceId::from_bytes([1; 16]), SpanId::from_bytes([1; 8]));
        span.end(SpanStatus::Ok);
        let first_end = span.end_time;
        std::thread::sleep(std::time::Duration::from_millis(5));
        span.end(SpanStatus::Error { message: Some("too late".into()) });
        assert_eq!(span.end_time, first_end);
        assert_eq!(span.status, SpanStatus::Ok);
    }
}
