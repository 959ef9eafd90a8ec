//! Simulated operation outcomes.

use std::fmt;

use crate::attributes::Attributes;

/// The type of a simulated operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// An inbound HTTP request; the root of every simulated request.
    HttpRequest,

    /// An authentication step, or one authentication attempt within it.
    AuthStep,

    /// The business logic of the service handling a request.
    BusinessStep,

    /// A database query.
    DbQuery,

    /// A cache operation.
    CacheOp,

    /// An HTTP call to an internal service.
    ServiceCall,

    /// A call to a third-party API.
    ExternalCall,

    /// The terminal rejection of a request that failed authentication.
    Rejection,
}

impl OperationKind {
    /// Returns the span name used for operations of this kind.
    pub const fn span_name(self) -> &'static str {
        match self {
            OperationKind::HttpRequest => "web.request",
            OperationKind::AuthStep => "auth.verify",
            OperationKind::BusinessStep => "business.process",
            OperationKind::DbQuery => "database.query",
            OperationKind::CacheOp => "cache.operation",
            OperationKind::ServiceCall => "http.request",
            OperationKind::ExternalCall => "external.api",
            OperationKind::Rejection => "request.rejected",
        }
    }

    /// Returns the lowest status code considered an error for this kind.
    ///
    /// Client-facing operations treat any 4xx as an error; internal operations only treat 5xx as one.
    pub const fn error_threshold(self) -> u16 {
        match self {
            OperationKind::HttpRequest
            | OperationKind::AuthStep
            | OperationKind::ExternalCall
            | OperationKind::Rejection => 400,
            OperationKind::BusinessStep
            | OperationKind::DbQuery
            | OperationKind::CacheOp
            | OperationKind::ServiceCall => 500,
        }
    }

    /// Returns a short, stable name for the kind, suitable for tags.
    pub const fn as_str(self) -> &'static str {
        match self {
            OperationKind::HttpRequest => "http-request",
            OperationKind::AuthStep => "auth-step",
            OperationKind::BusinessStep => "business-step",
            OperationKind::DbQuery => "db-query",
            OperationKind::CacheOp => "cache-op",
            OperationKind::ServiceCall => "service-call",
            OperationKind::ExternalCall => "external-call",
            OperationKind::Rejection => "rejection",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of simulating one operation, with any nested operations it performed.
///
/// Whether an outcome is errored is never stored: it is derived from the outcome's own status code and from its
/// children, so a tree can never disagree with itself.
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    /// Operation type.
    pub kind: OperationKind,

    /// Service that performed the operation.
    pub service: String,

    /// Status code, using HTTP status families for every kind.
    pub status_code: u16,

    /// Simulated duration, in milliseconds.
    pub latency_ms: f64,

    /// Human-readable summary.
    pub message: String,

    /// Free-form annotations.
    pub attributes: Attributes,

    /// Nested operations, in the order they were performed.
    pub children: Vec<Outcome>,
}

impl Outcome {
    /// Creates a leaf outcome with no attributes.
    pub fn new<S, M>(kind: OperationKind, service: S, status_code: u16, latency_ms: f64, message: M) -> Self
    where
        S: Into<String>,
        M: Into<String>,
    {
        Self {
            kind,
            service: service.into(),
            status_code,
            latency_ms: latency_ms.max(0.0),
            message: message.into(),
            attributes: Attributes::new(),
            children: Vec::new(),
        }
    }

    /// Replaces the attributes of this outcome.
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Appends a child outcome.
    pub fn with_child(mut self, child: Outcome) -> Self {
        self.children.push(child);
        self
    }

    /// Returns `true` if this operation's own status code is an error for its kind.
    pub fn failed(&self) -> bool {
        self.status_code >= self.kind.error_threshold()
    }

    /// Returns `true` if this operation failed, or if any child failed fatally.
    pub fn errored(&self) -> bool {
        self.failed() || self.children.iter().any(Outcome::is_fatal)
    }

    /// Returns `true` if this outcome is an error severe enough to flip its parent to an error.
    ///
    /// Only server-side (5xx) errors propagate upwards: a rejected third-party call or a failed SAML attempt that was
    /// recovered from is recorded, but does not fail the operation that made it.
    pub fn is_fatal(&self) -> bool {
        self.status_code >= 500 && self.errored()
    }

    /// Visits this outcome and every descendant, depth-first, parents before children.
    pub fn walk<'a, F>(&'a self, f: &mut F)
    where
        F: FnMut(&'a Outcome, usize),
    {
        self.walk_inner(0, f);
    }

    fn walk_inner<'a, F>(&'a self, depth: usize, f: &mut F)
    where
        F: FnMut(&'a Outcome, usize),
    {
        f(self, depth);
        for child in &self.children {
            child.walk_inner(depth + 1, f);
        }
    }
}
