//! Mirage - a synthetic request telemetry generator.
//!
//! Mirage simulates users hitting a small web application: every request authenticates, runs business logic, and
//! calls a fixed set of dependencies, any of which can fail according to deterministic, time- and identity-driven
//! failure rules. Each request is emitted as a trace, a set of metrics, and an OTLP log record delivered in batches to
//! an HTTP endpoint.

#![deny(warnings)]
#![deny(missing_docs)]

use clap::Parser as _;
use mirage_core::error::GenericError;
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

mod config;
use self::config::Cli;

mod driver;
use self::driver::Driver;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(true)
        .with_target(true)
        .init();

    match run(cli).await {
        Ok(()) => info!("mirage stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<(), GenericError> {
    info!("mirage starting...");

    let driver = Driver::new(cli)?;
    driver.run().await
}
