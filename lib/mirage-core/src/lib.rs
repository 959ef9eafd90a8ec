//! Synthetic request telemetry generation.
//!
//! Simulates requests flowing through a fixed service topology, injects deterministic failures, and emits the results
//! as spans, metrics, and OTLP log records.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod attributes;
pub mod batch;
pub mod encoder;
pub mod error;
pub mod failure;
pub mod harness;
pub mod metrics;
pub mod outcome;
pub mod saml;
pub mod simulator;
pub mod synth;
pub mod topology;
pub mod tracer;
pub mod transport;
