//! Trace capability.
//!
//! Spans are opened with [`Tracer::start_span`] and recorded into a [`SpanSink`] when their [`SpanHandle`] is dropped.
//! [`trace_outcome`] replays an entire outcome tree as nested spans, laying each parent's children out one after
//! another on the simulated timeline.

use std::{
    fmt,
    sync::Arc,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use rand::Rng;
use tracing::debug;

use crate::{attributes::Attributes, outcome::Outcome};

/// Identifiers and start time of a span.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceContext {
    /// The 128-bit trace ID, shared by every span of a request.
    pub trace_id: u128,

    /// The 64-bit span ID.
    pub span_id: u64,

    /// The parent span ID, or `None` for the root span.
    pub parent_span_id: Option<u64>,

    /// Start time of the span, in nanoseconds since the Unix epoch.
    pub start_time_ns: u64,
}

impl TraceContext {
    /// Creates a new root context starting at `start_time_ns`.
    pub fn new_root<R: Rng + ?Sized>(rng: &mut R, start_time_ns: u64) -> Self {
        Self {
            trace_id: rng.random(),
            span_id: rng.random(),
            parent_span_id: None,
            start_time_ns,
        }
    }

    /// Creates a child context that starts `offset_ns` after this one.
    pub fn child<R: Rng + ?Sized>(&self, rng: &mut R, offset_ns: u64) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: rng.random(),
            parent_span_id: Some(self.span_id),
            start_time_ns: self.start_time_ns.saturating_add(offset_ns),
        }
    }

    /// Returns the trace ID as a 32-character lowercase hex string.
    pub fn trace_id_hex(&self) -> String {
        format!("{:032x}", self.trace_id)
    }

    /// Returns the span ID as a 16-character lowercase hex string.
    pub fn span_id_hex(&self) -> String {
        format!("{:016x}", self.span_id)
    }
}

/// Returns the current time in nanoseconds since the Unix epoch.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Converts a timestamp in fractional seconds to nanoseconds, clamping negative values to zero.
pub fn secs_to_ns(secs: f64) -> u64 {
    (secs.max(0.0) * 1e9) as u64
}

/// A span that has been closed.
#[derive(Clone, Debug, PartialEq)]
pub struct FinishedSpan {
    /// Span name.
    pub name: String,

    /// Service tag.
    pub service: String,

    /// Identifiers and start time.
    pub context: TraceContext,

    /// Duration, in nanoseconds.
    pub duration_ns: u64,

    /// Whether the span was marked as an error.
    pub error: bool,

    /// Span attributes.
    pub attributes: Attributes,
}

/// A destination for finished spans.
pub trait SpanSink: Send + Sync {
    /// Records a finished span.
    fn record(&self, span: FinishedSpan);
}

/// A span sink that discards every span.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSpanSink;

impl SpanSink for NoopSpanSink {
    fn record(&self, _span: FinishedSpan) {}
}

/// A span sink that emits one debug event per finished span.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSpanSink;

impl SpanSink for LogSpanSink {
    fn record(&self, span: FinishedSpan) {
        debug!(
            trace_id = %span.context.trace_id_hex(),
            span_id = %span.context.span_id_hex(),
            parent_span_id = ?span.context.parent_span_id.map(|id| format!("{:016x}", id)),
            name = %span.name,
            service = %span.service,
            duration_ms = span.duration_ns as f64 / 1_000_000.0,
            error = span.error,
            attributes = ?span.attributes,
            "Finished span."
        );
    }
}

/// Opens spans and hands them to a [`SpanSink`] once they close.
#[derive(Clone)]
pub struct Tracer {
    sink: Arc<dyn SpanSink>,
}

impl Tracer {
    /// Creates a new `Tracer` recording into `sink`.
    pub fn new(sink: Arc<dyn SpanSink>) -> Self {
        Self { sink }
    }

    /// Creates a `Tracer` that discards every span.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopSpanSink))
    }

    /// Opens a span with the given identifiers.
    ///
    /// The span is recorded when the returned handle is dropped.
    pub fn start_span<N, S>(&self, name: N, service: S, context: TraceContext) -> SpanHandle
    where
        N: Into<String>,
        S: Into<String>,
    {
        SpanHandle {
            sink: Arc::clone(&self.sink),
            name: name.into(),
            service: service.into(),
            context,
            attributes: Attributes::new(),
            error: false,
            duration_ns: None,
            started: Instant::now(),
        }
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

/// An open span.
///
/// Dropping the handle closes the span. Unless a duration was set explicitly, the span's duration is the wall-clock
/// time elapsed since it was opened.
pub struct SpanHandle {
    sink: Arc<dyn SpanSink>,
    name: String,
    service: String,
    context: TraceContext,
    attributes: Attributes,
    error: bool,
    duration_ns: Option<u64>,
    started: Instant,
}

impl SpanHandle {
    /// Returns the identifiers of this span.
    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    /// Sets an attribute on the span.
    pub fn set_attribute<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: ToString,
    {
        self.attributes.insert(key, value);
    }

    /// Marks the span as errored, or not.
    pub fn set_error(&mut self, error: bool) {
        self.error = error;
    }

    /// Overrides the recorded duration of the span.
    pub fn set_duration_ns(&mut self, duration_ns: u64) {
        self.duration_ns = Some(duration_ns);
    }
}

impl Drop for SpanHandle {
    fn drop(&mut self) {
        let duration_ns = self
            .duration_ns
            .unwrap_or_else(|| self.started.elapsed().as_nanos() as u64);

        self.sink.record(FinishedSpan {
            name: std::mem::take(&mut self.name),
            service: std::mem::take(&mut self.service),
            context: self.context,
            duration_ns,
            error: self.error,
            attributes: std::mem::take(&mut self.attributes),
        });
    }
}

/// Replays an outcome tree as spans, with `root` as the context of the top-level span.
///
/// Each outcome becomes one span carrying its attributes, its status code, and its derived error flag. Children are
/// recorded before their parent, since a parent span only closes once all of its children have.
pub fn trace_outcome<R: Rng + ?Sized>(tracer: &Tracer, rng: &mut R, outcome: &Outcome, root: TraceContext) {
    let mut span = tracer.start_span(outcome.kind.span_name(), outcome.service.as_str(), root);
    for (key, value) in outcome.attributes.iter() {
        span.set_attribute(key, value);
    }
    span.set_attribute("operation.kind", outcome.kind);
    span.set_attribute("status_code", outcome.status_code);
    span.set_error(outcome.errored());
    span.set_duration_ns(ms_to_ns(outcome.latency_ms));

    let mut offset_ns = 0;
    for child in &outcome.children {
        let context = root.child(rng, offset_ns);
        trace_outcome(tracer, rng, child, context);
        offset_ns += ms_to_ns(child.latency_ms);
    }
}

fn ms_to_ns(ms: f64) -> u64 {
    (ms.max(0.0) * 1_000_000.0) as u64
}
