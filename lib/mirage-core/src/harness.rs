//! Concurrent load generation.

use std::{
    any::Any,
    fmt,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::FutureExt as _;
use rand::{rngs::StdRng, Rng, SeedableRng as _};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    batch::{BatchDeliverer, DeliveryStats},
    encoder::RecordEncoder,
    error::{ConfigError, InvalidInterval, ZeroValue},
    failure::{FailureModel, FailureRates},
    metrics::{self, MetricsSink, NoopMetrics},
    outcome::Outcome,
    simulator::CallGraphSimulator,
    synth::OutcomeSynthesizer,
    topology::{ENDPOINTS, HTTP_METHODS, PRODUCTIVITY_ENDPOINTS},
    tracer::{now_ns, secs_to_ns, trace_outcome, TraceContext, Tracer},
    transport::Transport,
};

/// Maximum backdating applied to flat workload timestamps, in seconds.
const FLAT_TIMESTAMP_JITTER_SECS: f64 = 10.0;

/// Shape of the generated requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Workload {
    /// Full call graphs for the web application: authentication, business logic, and dependencies.
    #[default]
    CallGraph,

    /// Single, flat requests against the productivity tool.
    Flat,
}

impl Workload {
    /// Returns the name of the workload.
    pub const fn as_str(self) -> &'static str {
        match self {
            Workload::CallGraph => "call-graph",
            Workload::Flat => "flat",
        }
    }

    /// Returns the attribute key identities are recorded under.
    pub const fn identity_key(self) -> &'static str {
        match self {
            Workload::CallGraph => "user.id",
            Workload::Flat => "customer.id",
        }
    }

    /// Returns the endpoints requests are issued against.
    pub const fn endpoints(self) -> &'static [&'static str] {
        match self {
            Workload::CallGraph => ENDPOINTS,
            Workload::Flat => PRODUCTIVITY_ENDPOINTS,
        }
    }

    /// Returns the identity at position `n` (starting from 1) of the pool.
    pub fn identity(self, n: usize) -> String {
        match self {
            Workload::CallGraph => format!("user_{}", n),
            Workload::Flat => format!("cust_{:04}", n),
        }
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load harness configuration.
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    /// Number of concurrent workers.
    pub workers: usize,

    /// Requests issued by each worker.
    pub requests_per_worker: usize,

    /// Pause between two requests of the same worker.
    pub interval: Duration,

    /// Number of distinct identities requests are issued as.
    pub identity_pool_size: usize,

    /// Records per batch.
    pub batch_size: usize,

    /// Maximum age of a batch before it is flushed on the next record.
    pub flush_interval: Duration,

    /// Upper bound on a single batch send.
    pub send_timeout: Duration,

    /// Shape of the generated requests.
    pub workload: Workload,

    /// Seed for reproducible runs. Each worker derives its own generator from it.
    pub seed: Option<u64>,

    /// Base failure rates.
    pub rates: FailureRates,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            requests_per_worker: 100,
            interval: Duration::from_millis(100),
            identity_pool_size: 50,
            batch_size: 10,
            flush_interval: Duration::from_secs(5),
            send_timeout: Duration::from_secs(10),
            workload: Workload::default(),
            seed: None,
            rates: FailureRates::default(),
        }
    }
}

impl HarnessConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// If a count that must be positive is zero, or a failure rate is outside of `[0.0, 1.0]`, an error is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("workers", self.workers),
            ("batch_size", self.batch_size),
            ("identity_pool_size", self.identity_pool_size),
        ];
        for (setting, value) in counts {
            if value == 0 {
                return ZeroValue { setting }.fail();
            }
        }

        self.rates.validate()
    }
}

/// Parses an interval: `<n>ms`, `<n>s` (fractional seconds allowed), or a bare number of milliseconds.
///
/// # Errors
///
/// If the input matches none of those forms, an error is returned.
pub fn parse_interval(input: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| InvalidInterval { input, reason }.build();

    let trimmed = input.trim();
    if let Some(millis) = trimmed.strip_suffix("ms") {
        millis
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| invalid("expected a whole number of milliseconds"))
    } else if let Some(secs) = trimmed.strip_suffix('s') {
        let secs = secs
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid("expected a number of seconds"))?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(invalid("seconds must be a finite, non-negative number"));
        }
        Duration::try_from_secs_f64(secs).map_err(|_| invalid("seconds out of range"))
    } else {
        trimmed
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| invalid("expected `<n>ms`, `<n>s`, or a bare number of milliseconds"))
    }
}

/// Counters for a single worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Worker index.
    pub worker_id: usize,

    /// Requests simulated.
    pub requests: u64,

    /// Requests that completed with a non-error status.
    pub successful: u64,

    /// Requests that completed with a 4xx status.
    pub client_errors: u64,

    /// Requests that completed with a 5xx status.
    pub server_errors: u64,

    /// Delivery counters.
    pub delivery: DeliveryStats,

    /// Whether the worker stopped early because the run was cancelled.
    pub cancelled: bool,
}

impl WorkerReport {
    /// Returns the number of requests that errored.
    pub fn errors(&self) -> u64 {
        self.client_errors + self.server_errors
    }

    fn record_panic(&mut self) {
        self.requests += 1;
        self.server_errors += 1;
    }

    fn record(&mut self, outcome: &Outcome) {
        self.requests += 1;
        if outcome.status_code >= 500 {
            self.server_errors += 1;
        } else if outcome.status_code >= 400 {
            self.client_errors += 1;
        } else {
            self.successful += 1;
        }
    }
}

/// Aggregate counters for a run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HarnessReport {
    /// Reports of every worker that completed, ordered by worker index.
    pub workers: Vec<WorkerReport>,

    /// Workers that panicked before reporting.
    pub failed_workers: usize,
}

impl HarnessReport {
    /// Returns the sum of every worker's counters.
    pub fn totals(&self) -> WorkerReport {
        let mut totals = WorkerReport::default();
        for worker in &self.workers {
            totals.requests += worker.requests;
            totals.successful += worker.successful;
            totals.client_errors += worker.client_errors;
            totals.server_errors += worker.server_errors;
            totals.delivery.merge(&worker.delivery);
            totals.cancelled |= worker.cancelled;
        }
        totals
    }
}

/// Runs a pool of workers, each issuing simulated requests and delivering their records.
///
/// Workers share nothing but the transport, the tracer, and the metrics sink: each owns its random number generator,
/// its outcome trees, and its batch. Within a worker, requests are strictly sequential.
pub struct LoadHarness {
    config: HarnessConfig,
    simulator: CallGraphSimulator,
    transport: Arc<dyn Transport>,
    tracer: Tracer,
    metrics: Arc<dyn MetricsSink>,
}

impl LoadHarness {
    /// Creates a new `LoadHarness` delivering through `transport`.
    ///
    /// Spans and metrics are discarded unless a tracer or metrics sink is set.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, an error is returned.
    pub fn new(config: HarnessConfig, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        config.validate()?;

        let simulator = CallGraphSimulator::new(OutcomeSynthesizer::new(FailureModel::new(config.rates.clone())));
        Ok(Self {
            config,
            simulator,
            transport,
            tracer: Tracer::noop(),
            metrics: Arc::new(NoopMetrics),
        })
    }

    /// Sets the tracer spans are recorded with.
    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = tracer;
        self
    }

    /// Sets the sink metrics are emitted to.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Runs every worker to completion, or until `cancel` is triggered, and returns the aggregate report.
    ///
    /// Cancellation is cooperative: each worker checks for it before starting a request, and while waiting between
    /// requests. A cancelled worker still flushes its partial batch before reporting.
    pub async fn run(&self, cancel: CancellationToken) -> HarnessReport {
        info!(
            workers = self.config.workers,
            requests_per_worker = self.config.requests_per_worker,
            interval = ?self.config.interval,
            batch_size = self.config.batch_size,
            identities = self.config.identity_pool_size,
            workload = %self.config.workload,
            "Starting load generation."
        );

        let active = Arc::new(AtomicUsize::new(0));
        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.workers {
            let worker = Worker {
                id: worker_id,
                config: self.config.clone(),
                simulator: self.simulator.clone(),
                encoder: RecordEncoder::new(self.config.workload.identity_key()),
                deliverer: BatchDeliverer::new(
                    Arc::clone(&self.transport),
                    self.config.batch_size,
                    self.config.flush_interval,
                    self.config.send_timeout,
                ),
                tracer: self.tracer.clone(),
                metrics: Arc::clone(&self.metrics),
                active: Arc::clone(&active),
                rng: worker_rng(self.config.seed, worker_id),
            };
            workers.spawn(worker.run(cancel.clone()));
        }

        let mut report = HarnessReport::default();
        while let Some(result) = workers.join_next().await {
            match result {
                Ok(worker) => report.workers.push(worker),
                Err(e) => {
                    error!(error = %e, "Worker failed before completing.");
                    report.failed_workers += 1;
                }
            }
        }
        report.workers.sort_by_key(|w| w.worker_id);
        report
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

fn worker_rng(seed: Option<u64>, worker_id: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(worker_id as u64)),
        None => StdRng::from_os_rng(),
    }
}

struct Worker {
    id: usize,
    config: HarnessConfig,
    simulator: CallGraphSimulator,
    encoder: RecordEncoder,
    deliverer: BatchDeliverer,
    tracer: Tracer,
    metrics: Arc<dyn MetricsSink>,
    active: Arc<AtomicUsize>,
    rng: StdRng,
}

impl Worker {
    async fn run(mut self, cancel: CancellationToken) -> WorkerReport {
        let mut report = WorkerReport {
            worker_id: self.id,
            ..Default::default()
        };
        self.set_active(self.active.fetch_add(1, Ordering::Relaxed) + 1);

        for i in 0..self.config.requests_per_worker {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match AssertUnwindSafe(self.issue_request()).catch_unwind().await {
                Ok(outcome) => report.record(&outcome),
                Err(panic) => {
                    error!(
                        worker = self.id,
                        error = panic_message(panic.as_ref()),
                        "Request panicked. Counting it as a server error."
                    );
                    report.record_panic();
                }
            }

            if i + 1 < self.config.requests_per_worker {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.config.interval) => {}
                }
            }
        }

        self.deliverer.flush().await;
        report.delivery = self.deliverer.stats();
        self.set_active(self.active.fetch_sub(1, Ordering::Relaxed) - 1);

        info!(
            "Worker {} completed: {}/{} requests successful, {}/{} records delivered.",
            self.id, report.successful, report.requests, report.delivery.sent, report.delivery.attempted
        );
        info!(
            "Worker {} errors: {} total ({} client, {} server).",
            self.id,
            report.errors(),
            report.client_errors,
            report.server_errors
        );

        report
    }

    async fn issue_request(&mut self) -> Outcome {
        let workload = self.config.workload;
        let identity = workload.identity(self.rng.random_range(1..=self.config.identity_pool_size));
        let endpoints = workload.endpoints();
        let endpoint = endpoints[self.rng.random_range(0..endpoints.len())];
        let method = HTTP_METHODS[self.rng.random_range(0..HTTP_METHODS.len())];

        let now = now_ns() as f64 / 1e9;
        let (mut outcome, timestamp) = match workload {
            Workload::CallGraph => (
                self.simulator
                    .simulate_request(&mut self.rng, &identity, endpoint, method, now),
                now,
            ),
            Workload::Flat => {
                let timestamp = now - self.rng.random_range(0.0..FLAT_TIMESTAMP_JITTER_SECS);
                let outcome = self.simulator.synthesizer().synthesize_request(
                    &mut self.rng,
                    &identity,
                    endpoint,
                    method,
                    timestamp,
                );
                (outcome, timestamp)
            }
        };

        debug!(
            worker = self.id,
            identity = %identity,
            endpoint,
            method,
            status_code = outcome.status_code,
            latency_ms = outcome.latency_ms,
            "Simulated request."
        );

        let context = TraceContext::new_root(&mut self.rng, secs_to_ns(timestamp));
        if workload == Workload::Flat {
            outcome.attributes.insert("trace.id", context.trace_id_hex());
            outcome.attributes.insert("span.id", context.span_id_hex());
            outcome.attributes.insert("timestamp", timestamp);
        }
        trace_outcome(&self.tracer, &mut self.rng, &outcome, context);
        metrics::record_request(self.metrics.as_ref(), endpoint, method, &outcome);

        let record = self.encoder.encode(&outcome, &identity, &context, timestamp);
        self.deliverer.add(record).await;

        outcome
    }

    fn set_active(&self, active: usize) {
        self.metrics.gauge(metrics::WORKERS_ACTIVE, active as f64, &[]);
    }
}
