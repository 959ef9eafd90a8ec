//! Deterministic failure injection.

use std::fmt;

use chrono::{Local, TimeZone as _, Timelike as _};
use md5::{Digest as _, Md5};

use crate::error::{ConfigError, RateOutOfRange};

/// A simulated dependency kind subject to failure injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    /// Relational database.
    Database,

    /// Payment processor.
    Payment,

    /// TLS/network layer.
    Tls,

    /// In-memory cache.
    Cache,

    /// Internal HTTP service dependency.
    HttpDependency,

    /// Third-party API.
    ExternalApi,

    /// SAML single sign-on attempt.
    AuthSaml,

    /// Email/password fallback authentication.
    AuthEmail,
}

impl Component {
    /// All components, in declaration order.
    pub const ALL: [Component; 8] = [
        Component::Database,
        Component::Payment,
        Component::Tls,
        Component::Cache,
        Component::HttpDependency,
        Component::ExternalApi,
        Component::AuthSaml,
        Component::AuthEmail,
    ];

    /// Returns the stable name of the component, as used in hash inputs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Component::Database => "database",
            Component::Payment => "payment",
            Component::Tls => "tls",
            Component::Cache => "cache",
            Component::HttpDependency => "http-dependency",
            Component::ExternalApi => "external-api",
            Component::AuthSaml => "auth-saml",
            Component::AuthEmail => "auth-email",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base failure rates, per component, each within `[0.0, 1.0]`.
#[derive(Clone, Debug, PartialEq)]
pub struct FailureRates {
    /// Database failure rate.
    pub database: f64,

    /// Payment processor failure rate.
    pub payment: f64,

    /// TLS handshake failure rate.
    pub tls: f64,

    /// Cache failure rate.
    ///
    /// Cache operations never fail a request, so this only matters to callers consulting the model directly.
    pub cache: f64,

    /// Internal service dependency failure rate.
    pub http_dependency: f64,

    /// External API failure rate.
    pub external_api: f64,

    /// SAML authentication failure rate.
    pub auth_saml: f64,

    /// Email/password fallback failure rate.
    pub auth_email: f64,
}

impl FailureRates {
    /// Returns a set of rates where nothing ever fails outside of the override windows.
    pub fn none() -> Self {
        Self {
            database: 0.0,
            payment: 0.0,
            tls: 0.0,
            cache: 0.0,
            http_dependency: 0.0,
            external_api: 0.0,
            auth_saml: 0.0,
            auth_email: 0.0,
        }
    }

    /// Returns the base rate for the given component.
    pub fn rate_for(&self, component: Component) -> f64 {
        match component {
            Component::Database => self.database,
            Component::Payment => self.payment,
            Component::Tls => self.tls,
            Component::Cache => self.cache,
            Component::HttpDependency => self.http_dependency,
            Component::ExternalApi => self.external_api,
            Component::AuthSaml => self.auth_saml,
            Component::AuthEmail => self.auth_email,
        }
    }

    /// Validates that every rate is within `[0.0, 1.0]`.
    ///
    /// # Errors
    ///
    /// If any rate is out of range, or not a number, an error is returned naming the component.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for component in Component::ALL {
            let rate = self.rate_for(component);
            if !(0.0..=1.0).contains(&rate) {
                return RateOutOfRange {
                    component: component.as_str(),
                    rate,
                }
                .fail();
            }
        }

        Ok(())
    }
}

impl Default for FailureRates {
    fn default() -> Self {
        Self {
            database: 0.05,
            payment: 0.03,
            tls: 0.02,
            cache: 0.0,
            http_dependency: 0.05,
            external_api: 0.08,
            auth_saml: 0.01,
            auth_email: 0.01,
        }
    }
}

/// Decides whether a component should misbehave for a given identity at a given time.
///
/// Decisions are a pure function of the component, the identity, and the local hour (and, for TLS, the minute) of the
/// timestamp: asking twice always gives the same answer, while different identities and hours spread uniformly over
/// `[0.0, 1.0)`. A few time/identity windows override the base rates:
///
/// - database: identities ending in `1` fail 50% of the time during the 09:00 hour
/// - payment: identities ending in `5` fail 40% of the time during the 14:00 hour
/// - tls: everyone sees three times the base rate during the first five minutes of every hour
#[derive(Clone, Debug)]
pub struct FailureModel {
    rates: FailureRates,
}

impl FailureModel {
    /// Creates a new `FailureModel` with the given base rates.
    pub fn new(rates: FailureRates) -> Self {
        Self { rates }
    }

    /// Returns `true` if `component` should fail for `identity` at `timestamp_secs` (seconds since the Unix epoch).
    pub fn should_fail(&self, component: Component, identity: &str, timestamp_secs: f64) -> bool {
        let (hour, minute) = local_hour_and_minute(timestamp_secs);
        let value = hash_value(component, identity, hour);

        match component {
            Component::Database if identity.ends_with('1') && hour == 9 => value < 0.5,
            Component::Payment if identity.ends_with('5') && hour == 14 => value < 0.4,
            Component::Tls if minute < 5 => value < self.rates.tls * 3.0,
            _ => value < self.rates.rate_for(component),
        }
    }
}

/// Maps `(component, identity, hour)` onto `[0.0, 1.0)` in steps of 0.001.
///
/// The full 128-bit MD5 digest of `"<identity>:<hour>:<component>"` is interpreted as a big-endian integer and reduced
/// modulo 1000.
pub fn hash_value(component: Component, identity: &str, hour: u32) -> f64 {
    let digest = Md5::new()
        .chain_update(identity.as_bytes())
        .chain_update(b":")
        .chain_update(hour.to_string().as_bytes())
        .chain_update(b":")
        .chain_update(component.as_str().as_bytes())
        .finalize();

    let value = u128::from_be_bytes(digest.into());
    (value % 1000) as f64 / 1000.0
}

/// Returns the local hour (`0..=23`) and minute (`0..=59`) of the given Unix timestamp.
pub fn local_hour_and_minute(timestamp_secs: f64) -> (u32, u32) {
    let secs = timestamp_secs.floor() as i64;
    match Local.timestamp_opt(secs, 0).earliest() {
        Some(dt) => (dt.hour(), dt.minute()),
        // Only reachable for timestamps far outside of chrono's supported range.
        None => (0, 0),
    }
}
