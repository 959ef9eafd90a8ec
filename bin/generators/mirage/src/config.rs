use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, ValueEnum};
use mirage_core::{
    encoder::ResourceConfig,
    failure::FailureRates,
    harness::{parse_interval, HarnessConfig, Workload},
    transport::{HttpTransportConfig, DEFAULT_ENDPOINT},
};

/// Generates synthetic request telemetry with deterministic, injectable failures.
#[derive(Clone, Debug, Parser)]
#[command(about)]
pub struct Cli {
    /// Number of requests issued by each worker.
    #[arg(long, env = "MIRAGE_REQUESTS", default_value_t = 100)]
    pub requests: usize,

    /// Number of concurrent workers.
    #[arg(long, env = "MIRAGE_WORKERS", default_value_t = 5)]
    pub workers: usize,

    /// Pause between two requests of the same worker.
    ///
    /// Accepts `<n>ms`, `<n>s` (fractional seconds allowed), or a bare number of milliseconds.
    #[arg(long, env = "MIRAGE_INTERVAL", default_value = "100ms", value_parser = parse_interval)]
    pub interval: Duration,

    /// Number of records delivered per batch.
    #[arg(long, env = "MIRAGE_BATCH_SIZE", default_value_t = 10)]
    pub batch_size: usize,

    /// Maximum age of a partially-filled batch before it is flushed.
    #[arg(long, env = "MIRAGE_FLUSH_INTERVAL", default_value = "5s", value_parser = parse_interval)]
    pub flush_interval: Duration,

    /// Number of distinct identities to issue requests as.
    #[arg(long, env = "MIRAGE_IDENTITIES", default_value_t = 50)]
    pub identities: usize,

    /// Base database failure rate.
    #[arg(long, env = "MIRAGE_DB_FAILURE_RATE", default_value_t = 0.05)]
    pub db_failure_rate: f64,

    /// Base payment failure rate.
    #[arg(long, env = "MIRAGE_PAYMENT_FAILURE_RATE", default_value_t = 0.03)]
    pub payment_failure_rate: f64,

    /// Base TLS handshake failure rate.
    #[arg(long, env = "MIRAGE_TLS_FAILURE_RATE", default_value_t = 0.02)]
    pub tls_failure_rate: f64,

    /// Base internal service failure rate.
    #[arg(long, env = "MIRAGE_SERVICE_FAILURE_RATE", default_value_t = 0.05)]
    pub service_failure_rate: f64,

    /// Base external API failure rate.
    #[arg(long, env = "MIRAGE_EXTERNAL_API_FAILURE_RATE", default_value_t = 0.08)]
    pub external_api_failure_rate: f64,

    /// Base SAML authentication failure rate.
    #[arg(long, env = "MIRAGE_SAML_FAILURE_RATE", default_value_t = 0.01)]
    pub saml_failure_rate: f64,

    /// Base email/password authentication failure rate.
    #[arg(long, env = "MIRAGE_EMAIL_FAILURE_RATE", default_value_t = 0.01)]
    pub email_failure_rate: f64,

    /// Shape of the generated requests.
    #[arg(long, env = "MIRAGE_WORKLOAD", value_enum, default_value_t = WorkloadArg::CallGraph)]
    pub workload: WorkloadArg,

    /// Seed for reproducible runs.
    #[arg(long, env = "MIRAGE_SEED")]
    pub seed: Option<u64>,

    /// Upper bound on a single batch send.
    #[arg(long, env = "MIRAGE_SEND_TIMEOUT", default_value = "10s", value_parser = parse_interval)]
    pub send_timeout: Duration,

    /// Endpoint to deliver OTLP/JSON logs to.
    #[arg(long, env = "MIRAGE_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Bucket name, used to derive `Basic` credentials.
    #[arg(long, env = "FT_BUCKET")]
    pub bucket: Option<String>,

    /// Password, used to derive `Basic` credentials.
    #[arg(long, env = "FT_BASIC_AUTH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Pre-encoded `Basic` credentials. Takes precedence over the bucket and password.
    #[arg(long, env = "FT_DEMO_BASIC_AUTH_HEADER", hide_env_values = true)]
    pub auth_header: Option<String>,

    /// Log batches instead of delivering them.
    #[arg(long, env = "MIRAGE_DRY_RUN")]
    pub dry_run: bool,

    /// DogStatsD address (`host:port`) to send metrics to. Metrics are discarded when unset.
    #[arg(long, env = "MIRAGE_STATSD_ADDR")]
    pub statsd_addr: Option<String>,
}

/// Shape of the generated requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum WorkloadArg {
    /// Full call graphs: authentication, business logic, and dependencies.
    CallGraph,

    /// Single, flat requests against the productivity tool.
    Flat,
}

impl From<WorkloadArg> for Workload {
    fn from(value: WorkloadArg) -> Self {
        match value {
            WorkloadArg::CallGraph => Workload::CallGraph,
            WorkloadArg::Flat => Workload::Flat,
        }
    }
}

impl Cli {
    /// Returns the base failure rates.
    pub fn failure_rates(&self) -> FailureRates {
        FailureRates {
            database: self.db_failure_rate,
            payment: self.payment_failure_rate,
            tls: self.tls_failure_rate,
            cache: 0.0,
            http_dependency: self.service_failure_rate,
            external_api: self.external_api_failure_rate,
            auth_saml: self.saml_failure_rate,
            auth_email: self.email_failure_rate,
        }
    }

    /// Returns the load harness configuration.
    pub fn harness_config(&self) -> HarnessConfig {
        HarnessConfig {
            workers: self.workers,
            requests_per_worker: self.requests,
            interval: self.interval,
            identity_pool_size: self.identities,
            batch_size: self.batch_size,
            flush_interval: self.flush_interval,
            send_timeout: self.send_timeout,
            workload: self.workload.into(),
            seed: self.seed,
            rates: self.failure_rates(),
        }
    }

    /// Returns the HTTP transport configuration.
    pub fn transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            endpoint: self.endpoint.clone(),
            basic_auth: self.basic_auth(),
            timeout: self.send_timeout,
            resource: ResourceConfig::default(),
        }
    }

    /// Returns the base64-encoded `Basic` credentials to deliver with, if any.
    ///
    /// An explicit header wins. Otherwise, credentials are derived from the bucket and password when both are set.
    pub fn basic_auth(&self) -> Option<String> {
        if let Some(header) = self.auth_header.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
            return Some(header.strip_prefix("Basic ").unwrap_or(header).to_string());
        }

        match (self.bucket.as_deref(), self.password.as_deref()) {
            (Some(bucket), Some(password)) => Some(STANDARD.encode(format!("{}:{}", bucket, password))),
            _ => None,
        }
    }
}
