//! Metrics capability.

use std::{
    fmt::Write as _,
    net::{Ipv4Addr, UdpSocket},
};

use tracing::debug;

use crate::{
    attributes::Attributes,
    error::{ErrorContext as _, GenericError},
    outcome::{OperationKind, Outcome},
};

/// Counter of simulated requests.
pub const REQUESTS: &str = "mirage.requests";

/// Histogram of simulated request latency, in milliseconds.
pub const REQUEST_DURATION: &str = "mirage.request.duration";

/// Counter of simulated requests that errored.
pub const REQUEST_ERRORS: &str = "mirage.requests.errors";

/// Counter of simulated dependency calls.
pub const DEPENDENCY_CALLS: &str = "mirage.dependency.calls";

/// Histogram of simulated dependency latency, in milliseconds.
pub const DEPENDENCY_DURATION: &str = "mirage.dependency.duration";

/// Gauge of workers currently running.
pub const WORKERS_ACTIVE: &str = "mirage.workers.active";

/// A destination for metrics.
///
/// Tags are `key:value` strings.
pub trait MetricsSink: Send + Sync {
    /// Increments a counter by one.
    fn increment(&self, name: &str, tags: &[String]);

    /// Records a value into a histogram.
    fn histogram(&self, name: &str, value: f64, tags: &[String]);

    /// Sets a gauge.
    fn gauge(&self, name: &str, value: f64, tags: &[String]);
}

/// A metrics sink that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &str, _tags: &[String]) {}

    fn histogram(&self, _name: &str, _value: f64, _tags: &[String]) {}

    fn gauge(&self, _name: &str, _value: f64, _tags: &[String]) {}
}

/// A metrics sink that sends DogStatsD datagrams over UDP.
///
/// Sends are fire-and-forget: a datagram that cannot be sent is dropped, and the failure is only logged at debug level.
#[derive(Debug)]
pub struct DogStatsDSink {
    socket: UdpSocket,
}

impl DogStatsDSink {
    /// Creates a new `DogStatsDSink` sending to `addr` (`host:port`).
    ///
    /// # Errors
    ///
    /// If the socket cannot be bound, or the address cannot be resolved, an error is returned.
    pub fn connect(addr: &str) -> Result<Self, GenericError> {
        // The socket has to be bound before it can be connected.
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).error_context("Failed to bind UDP socket.")?;
        socket
            .connect(addr)
            .with_error_context(|| format!("Failed to connect to DogStatsD target '{}'.", addr))?;
        socket
            .set_nonblocking(true)
            .error_context("Failed to set DogStatsD socket as non-blocking.")?;

        Ok(Self { socket })
    }

    fn send(&self, name: &str, value: f64, metric_type: &str, tags: &[String]) {
        let payload = format_metric(name, value, metric_type, tags);
        if let Err(e) = self.socket.send(payload.as_bytes()) {
            debug!(error = %e, metric = name, "Failed to send metric.");
        }
    }
}

impl MetricsSink for DogStatsDSink {
    fn increment(&self, name: &str, tags: &[String]) {
        self.send(name, 1.0, "c", tags);
    }

    fn histogram(&self, name: &str, value: f64, tags: &[String]) {
        self.send(name, value, "h", tags);
    }

    fn gauge(&self, name: &str, value: f64, tags: &[String]) {
        self.send(name, value, "g", tags);
    }
}

/// Formats a single metric in the DogStatsD wire format: `name:value|type|#tag1,tag2`.
fn format_metric(name: &str, value: f64, metric_type: &str, tags: &[String]) -> String {
    let mut payload = String::with_capacity(name.len() + 16 + tags.iter().map(|t| t.len() + 1).sum::<usize>());
    let _ = write!(payload, "{}:{}|{}", name, value, metric_type);
    if !tags.is_empty() {
        payload.push_str("|#");
        payload.push_str(&tags.join(","));
    }
    payload
}

/// Emits the per-request metrics for a simulated request, along with one set of dependency metrics per dependency call
/// in the tree.
pub fn record_request(metrics: &dyn MetricsSink, endpoint: &str, method: &str, outcome: &Outcome) {
    let tags = Attributes::new()
        .with("endpoint", endpoint)
        .with("method", method)
        .with("service", &outcome.service)
        .with("status_code", outcome.status_code)
        .to_tags();

    metrics.increment(REQUESTS, &tags);
    metrics.histogram(REQUEST_DURATION, outcome.latency_ms, &tags);
    if outcome.errored() {
        metrics.increment(REQUEST_ERRORS, &tags);
    }

    outcome.walk(&mut |node, _| {
        if !is_dependency(node.kind) {
            return;
        }

        let tags = Attributes::new()
            .with("dependency", &node.service)
            .with("kind", node.kind)
            .with("status_code", node.status_code)
            .to_tags();
        metrics.increment(DEPENDENCY_CALLS, &tags);
        metrics.histogram(DEPENDENCY_DURATION, node.latency_ms, &tags);
    });
}

fn is_dependency(kind: OperationKind) -> bool {
    matches!(
        kind,
        OperationKind::DbQuery | OperationKind::CacheOp | OperationKind::ServiceCall | OperationKind::ExternalCall
    )
}
