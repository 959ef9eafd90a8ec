//! Error types.
//!
//! Simulated failures are never errors: they travel through the engine as [`Outcome`][crate::outcome::Outcome]
//! data. The types here cover the two conditions that are genuinely exceptional: invalid configuration, which is
//! fatal at startup, and transport failures, which are absorbed at the delivery boundary.

use std::{fmt::Display, time::Duration};

use snafu::Snafu;

/// A generic, contextual error.
pub type GenericError = anyhow::Error;

/// Constructs a [`GenericError`] from a string literal, a format string with arguments, or an existing error value.
#[macro_export]
macro_rules! generic_error {
    ($msg:literal $(,)?) => { $crate::error::_anyhow!($msg) };
    ($err:expr $(,)?) => { $crate::error::_anyhow!($err) };
    ($fmt:expr, $($arg:tt)*) => { $crate::error::_anyhow!($fmt, $($arg)*) };
}

#[doc(hidden)]
pub use anyhow::anyhow as _anyhow;

mod private {
    pub trait Sealed {}

    impl<T, E> Sealed for Result<T, E> {}
}

/// Extension trait for attaching context to fallible results.
///
/// Wraps `anyhow::Context` so that its methods do not collide with `snafu::ResultExt` when both are in scope.
pub trait ErrorContext<T, E>: private::Sealed {
    /// Wraps the error value with additional context.
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static;

    /// Wraps the error value with additional context that is only evaluated if an error occurred.
    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T, E> for Result<T, E>
where
    Result<T, E>: anyhow::Context<T, E>,
{
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
    {
        <Self as anyhow::Context<T, E>>::context(self, context)
    }

    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        <Self as anyhow::Context<T, E>>::with_context(self, f)
    }
}

/// Invalid engine configuration.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum ConfigError {
    /// A failure rate was outside of `[0.0, 1.0]`.
    #[snafu(display("failure rate for '{}' must be within [0.0, 1.0], got {}", component, rate))]
    RateOutOfRange {
        /// Component the rate applies to.
        component: &'static str,

        /// The offending rate.
        rate: f64,
    },

    /// A count that must be non-zero was zero.
    #[snafu(display("'{}' must be greater than zero", setting))]
    ZeroValue {
        /// Name of the setting.
        setting: &'static str,
    },

    /// An interval string could not be parsed.
    #[snafu(display("invalid interval '{}': {}", input, reason))]
    InvalidInterval {
        /// The raw input.
        input: String,

        /// Why parsing failed.
        reason: String,
    },
}

/// Failure to deliver a batch of records.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum TransportError {
    /// The request could not be completed.
    #[snafu(display("request to '{}' failed: {}", endpoint, source))]
    Request {
        /// Target endpoint.
        endpoint: String,

        /// Underlying client error.
        source: reqwest::Error,
    },

    /// The endpoint answered with something other than `200 OK`.
    #[snafu(display("endpoint '{}' responded with status {}: {}", endpoint, status, body))]
    UnexpectedStatus {
        /// Target endpoint.
        endpoint: String,

        /// Response status code.
        status: u16,

        /// Response body, possibly empty.
        body: String,
    },

    /// The send did not complete within the configured timeout.
    #[snafu(display("send did not complete within {:?}", timeout))]
    TimedOut {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The payload could not be serialized.
    #[snafu(display("failed to serialize payload: {}", source))]
    Serialize {
        /// Underlying serialization error.
        source: serde_json::Error,
    },
}
