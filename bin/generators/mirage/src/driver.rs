//! Driver for wiring and running the load harness.

use std::sync::Arc;

use mirage_core::{
    error::{ErrorContext as _, GenericError},
    generic_error,
    harness::{HarnessReport, LoadHarness},
    metrics::{DogStatsDSink, MetricsSink, NoopMetrics},
    tracer::{LogSpanSink, Tracer},
    transport::{HttpTransport, LogTransport, Transport},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Cli;

/// The driver that wires the concrete capabilities into the load harness and runs it.
pub struct Driver {
    cli: Cli,
}

impl Driver {
    /// Creates a new driver with the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, an error is returned.
    pub fn new(cli: Cli) -> Result<Self, GenericError> {
        cli.harness_config()
            .validate()
            .error_context("Invalid configuration.")?;

        Ok(Self { cli })
    }

    /// Runs the load harness until every worker completes, or until interrupted.
    pub async fn run(self) -> Result<(), GenericError> {
        let transport: Arc<dyn Transport> = if self.cli.dry_run {
            info!("Dry run requested. Batches will be logged rather than delivered.");
            Arc::new(LogTransport)
        } else {
            let config = self.cli.transport_config();
            if config.basic_auth.is_none() {
                warn!("No credentials configured. Batches will be delivered without an Authorization header.");
            }

            let transport = HttpTransport::new(config)?;
            info!("Delivering logs to {}.", transport.endpoint());
            Arc::new(transport)
        };

        let metrics: Arc<dyn MetricsSink> = match self.cli.statsd_addr.as_deref() {
            Some(addr) => {
                let sink = DogStatsDSink::connect(addr)?;
                info!("Sending metrics to DogStatsD at {}.", addr);
                Arc::new(sink)
            }
            None => Arc::new(NoopMetrics),
        };

        let harness = LoadHarness::new(self.cli.harness_config(), transport)
            .error_context("Invalid configuration.")?
            .with_tracer(Tracer::new(Arc::new(LogSpanSink)))
            .with_metrics(metrics);

        let cancel = CancellationToken::new();
        tokio::spawn(stop_on_ctrl_c(cancel.clone()));

        let report = harness.run(cancel).await;
        log_summary(&report);

        if report.failed_workers > 0 {
            return Err(generic_error!("{} worker(s) failed before completing.", report.failed_workers));
        }

        Ok(())
    }
}

async fn stop_on_ctrl_c(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => {
                info!("Received Ctrl-C. Stopping workers after their current request...");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C. Run can only be stopped by completing."),
        },
        _ = cancel.cancelled() => {}
    }
}

fn log_summary(report: &HarnessReport) {
    let totals = report.totals();

    if totals.cancelled {
        info!("Telemetry generation interrupted.");
    } else {
        info!("Telemetry generation completed.");
    }

    info!(
        "Simulated {} requests across {} workers: {} successful, {} errors ({} client, {} server).",
        totals.requests,
        report.workers.len(),
        totals.successful,
        totals.errors(),
        totals.client_errors,
        totals.server_errors
    );
    info!(
        "Delivered {}/{} records in {} batches ({} batches dropped).",
        totals.delivery.sent, totals.delivery.attempted, totals.delivery.batches_sent, totals.delivery.batches_failed
    );
}
