//! Per-operation outcome synthesis.

use rand::Rng;

use crate::{
    attributes::Attributes,
    failure::{Component, FailureModel},
    outcome::{OperationKind, Outcome},
    saml::{saml_assertion, KNOWN_BAD_IDENTITY},
};

const SUCCESS_CODES: &[u16] = &[200, 201, 204];
const SERVICE_ERROR_CODES: &[u16] = &[500, 502, 503, 504];
const EXTERNAL_ERROR_CODES: &[u16] = &[400, 401, 429, 500, 502, 503];
const TLS_ERROR_CODES: &[u16] = &[502, 503, 504];

const PRODUCTIVITY_SERVICE: &str = "productivity-service";
const PRODUCTIVITY_BASE_URL: &str = "https://productivity-tool.example.com";

/// Fraction of database failures in the flat workload that surface as server errors rather than missing records.
const DB_SERVER_ERROR_SHARE: f64 = 0.7;

/// Cache hit ratio.
const CACHE_HIT_RATE: f64 = 0.8;

fn pick<R: Rng + ?Sized>(rng: &mut R, codes: &[u16]) -> u16 {
    codes[rng.random_range(0..codes.len())]
}

fn request_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{:08x}", rng.random::<u32>())
}

/// Synthesizes the outcome of individual operations.
///
/// Every decision about whether an operation fails goes through the [`FailureModel`], keyed by the identity making the
/// request and the time of the request. The random number generator only shapes the details: latencies, which error
/// code is reported, cache hits, and so on.
#[derive(Clone, Debug)]
pub struct OutcomeSynthesizer {
    model: FailureModel,
}

impl OutcomeSynthesizer {
    /// Creates a new `OutcomeSynthesizer` backed by the given failure model.
    pub fn new(model: FailureModel) -> Self {
        Self { model }
    }

    /// Synthesizes a single, flat request outcome for the productivity tool workload.
    ///
    /// TLS failures take precedence over database failures, which take precedence over payment failures. Payment
    /// failures only apply to `POST`/`PUT` requests against the projects endpoint.
    pub fn synthesize_request<R: Rng + ?Sized>(
        &self, rng: &mut R, identity: &str, endpoint: &str, method: &str, now: f64,
    ) -> Outcome {
        let request_id = request_id(rng);

        let db_fails = self.model.should_fail(Component::Database, identity, now);
        let payment_fails = self.model.should_fail(Component::Payment, identity, now);
        let tls_fails = self.model.should_fail(Component::Tls, identity, now);
        let payment_applies = endpoint == "/api/v1/projects" && matches!(method, "POST" | "PUT");

        let mut failure_attrs = Attributes::new();
        let (status_code, message) = if tls_fails {
            failure_attrs.insert("component.failed", "tls");
            failure_attrs.insert("network.error", "handshake_failure");
            failure_attrs.insert("tls.version", "1.3");
            failure_attrs.insert(
                "network.client_ip",
                format!("192.168.{}.{}", rng.random_range(0..=255u8), rng.random_range(0..=255u8)),
            );
            (
                pick(rng, TLS_ERROR_CODES),
                format!("TLS handshake failed for customer {} on request {}", identity, request_id),
            )
        } else if db_fails {
            let server_error = rng.random_bool(DB_SERVER_ERROR_SHARE);
            failure_attrs.insert("component.failed", "database");
            failure_attrs.insert(
                "database.error",
                if server_error { "connection_timeout" } else { "record_not_found" },
            );
            failure_attrs.insert("database.host", format!("db-{}.internal", rng.random_range(1..=5)));
            if server_error {
                (
                    500,
                    format!("Database connection timeout for customer {} on request {}", identity, request_id),
                )
            } else {
                (
                    404,
                    format!(
                        "Resource not found in database for customer {} on request {}",
                        identity, request_id
                    ),
                )
            }
        } else if payment_fails && payment_applies {
            let status = pick(rng, &[400, 402]);
            failure_attrs.insert("component.failed", "payment_processor");
            failure_attrs.insert(
                "payment.error",
                if status == 402 { "insufficient_funds" } else { "invalid_payment_details" },
            );
            failure_attrs.insert("payment.provider", "stripe");
            failure_attrs.insert("payment.transaction_id", format!("tx_{:010x}", rng.random::<u64>() >> 24));
            (
                status,
                format!("Payment processing failed for customer {} on request {}", identity, request_id),
            )
        } else {
            (
                pick(rng, SUCCESS_CODES),
                format!(
                    "Successfully processed {} request to {} for customer {}",
                    method, endpoint, identity
                ),
            )
        };

        let base_ms = match endpoint {
            "/api/v1/search" => rng.random_range(200.0..800.0),
            "/api/v1/analytics" => rng.random_range(300.0..900.0),
            "/api/v1/documents" => rng.random_range(100.0..400.0),
            _ => rng.random_range(50.0..200.0),
        };
        let latency_ms = if status_code >= 500 {
            base_ms * rng.random_range(3.0..10.0)
        } else if status_code >= 400 {
            base_ms * rng.random_range(1.0..2.5)
        } else {
            base_ms
        };

        let mut attributes = Attributes::new()
            .with("customer.id", identity)
            .with("http.method", method)
            .with("http.url", format!("{}{}", PRODUCTIVITY_BASE_URL, endpoint))
            .with("http.status_code", status_code)
            .with("http.response_time_ms", latency_ms as u64)
            .with("service.name", PRODUCTIVITY_SERVICE)
            .with("request.id", request_id);
        attributes.extend(&failure_attrs);

        Outcome::new(
            OperationKind::HttpRequest,
            PRODUCTIVITY_SERVICE,
            status_code,
            latency_ms,
            message,
        )
        .with_attributes(attributes)
    }

    /// Synthesizes a SAML authentication attempt.
    ///
    /// The known-bad identity always fails, and presents a corrupted assertion.
    pub fn saml_attempt<R: Rng + ?Sized>(&self, rng: &mut R, identity: &str, now: f64) -> Outcome {
        let known_bad = identity == KNOWN_BAD_IDENTITY;
        let fails = known_bad || self.model.should_fail(Component::AuthSaml, identity, now);

        let mut attributes = Attributes::new()
            .with("auth.method", "saml")
            .with("user.id", identity)
            .with("auth.saml.assertion", saml_assertion(identity, now, known_bad));

        let (status_code, message) = if !fails {
            (200, format!("SAML assertion accepted for {}", identity))
        } else if known_bad {
            attributes.insert("error.msg", "Malformed SAML assertion");
            (401, format!("Malformed SAML assertion presented by {}", identity))
        } else {
            attributes.insert("error.msg", "SAML provider rejected the assertion");
            (401, format!("SAML authentication rejected for {}", identity))
        };

        Outcome::new(
            OperationKind::AuthStep,
            "auth-service",
            status_code,
            rng.random_range(5.0..15.0),
            message,
        )
        .with_attributes(attributes)
    }

    /// Synthesizes an email/password fallback authentication attempt.
    pub fn email_attempt<R: Rng + ?Sized>(&self, rng: &mut R, identity: &str, now: f64) -> Outcome {
        let fails = self.model.should_fail(Component::AuthEmail, identity, now);

        let mut attributes = Attributes::new().with("auth.method", "password").with("user.id", identity);
        let (status_code, message) = if fails {
            attributes.insert("error.msg", "Invalid credentials");
            (401, format!("Email/password authentication rejected for {}", identity))
        } else {
            (200, format!("Email/password authentication accepted for {}", identity))
        };

        Outcome::new(
            OperationKind::AuthStep,
            "auth-service",
            status_code,
            rng.random_range(5.0..15.0),
            message,
        )
        .with_attributes(attributes)
    }

    /// Synthesizes a database query against `table`.
    ///
    /// A failed query behaves like a raised exception: it reports a 500 and is always fatal to the request.
    pub fn database<R: Rng + ?Sized>(&self, rng: &mut R, identity: &str, table: &str, method: &str, now: f64) -> Outcome {
        let operation = if method == "GET" { "SELECT" } else { "INSERT" };
        let fails = self.model.should_fail(Component::Database, identity, now);

        let mut attributes = Attributes::new()
            .with("db.system", "postgresql")
            .with("db.name", "webapp_db")
            .with("db.statement", format!("{} FROM {}", operation, table))
            .with("db.table", table)
            .with("db.rows_affected", rng.random_range(1..=10))
            .with("component", "postgresql");

        let (status_code, message) = if fails {
            attributes.insert("error.msg", "Connection timeout");
            attributes.insert("error.type", "DatabaseError");
            (500, "Database connection timeout".to_string())
        } else {
            (200, format!("DB {} completed", operation))
        };

        Outcome::new(
            OperationKind::DbQuery,
            "postgresql",
            status_code,
            rng.random_range(10.0..100.0),
            message,
        )
        .with_attributes(attributes)
    }

    /// Synthesizes a cache lookup for `key`.
    ///
    /// Cache operations never fail; they only record whether the lookup hit.
    pub fn cache<R: Rng + ?Sized>(&self, rng: &mut R, key: &str) -> Outcome {
        let hit = rng.random_bool(CACHE_HIT_RATE);

        let mut attributes = Attributes::new()
            .with("cache.operation", "get")
            .with("cache.key", key)
            .with("component", "redis")
            .with("db.type", "redis")
            .with("cache.hit", hit);
        if !hit {
            attributes.insert("cache.miss", true);
        }

        Outcome::new(
            OperationKind::CacheOp,
            "redis",
            200,
            rng.random_range(1.0..5.0),
            if hit { "Cache hit" } else { "Cache miss" },
        )
        .with_attributes(attributes)
    }

    /// Synthesizes a health-check call to the internal service `name`.
    pub fn service_call<R: Rng + ?Sized>(&self, rng: &mut R, identity: &str, name: &str, now: f64) -> Outcome {
        let fails = self.model.should_fail(Component::HttpDependency, identity, now);
        let status_code = if fails {
            pick(rng, SERVICE_ERROR_CODES)
        } else {
            pick(rng, SUCCESS_CODES)
        };

        let mut attributes = Attributes::new()
            .with("http.method", "GET")
            .with("http.url", format!("http://{}:8080/health", name))
            .with("component", "requests")
            .with("span.kind", "client")
            .with("http.status_code", status_code);

        let message = if fails {
            attributes.insert("error.msg", format!("HTTP {} error", status_code));
            format!("HTTP {} error calling {}", status_code, name)
        } else {
            format!("{} responded {}", name, status_code)
        };

        Outcome::new(
            OperationKind::ServiceCall,
            name,
            status_code,
            rng.random_range(50.0..300.0),
            message,
        )
        .with_attributes(attributes)
    }

    /// Synthesizes a call to the third-party API `name`.
    ///
    /// The call fails at the external API rate with any of the usual third-party error codes.
    pub fn external_call<R: Rng + ?Sized>(&self, rng: &mut R, identity: &str, name: &str, now: f64) -> Outcome {
        let mut attributes = Attributes::new()
            .with("http.method", "POST")
            .with("http.url", format!("https://{}.example.com/api/v1/process", name))
            .with("component", "http_client")
            .with("span.kind", "client")
            .with("external.service", name);

        let status_code = if self.model.should_fail(Component::ExternalApi, identity, now) {
            let status = pick(rng, EXTERNAL_ERROR_CODES);
            attributes.insert("error.msg", format!("External API error: {}", status));
            status
        } else {
            200
        };
        attributes.insert("http.status_code", status_code);

        let message = match attributes.get("error.msg") {
            Some(error) => format!("{} call failed: {}", name, error),
            None => format!("{} call succeeded", name),
        };

        Outcome::new(
            OperationKind::ExternalCall,
            name,
            status_code,
            rng.random_range(100.0..500.0),
            message,
        )
        .with_attributes(attributes)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Local, TimeZone as _};
    use rand::{rngs::StdRng, SeedableRng as _};

    use super::*;
    use crate::failure::FailureRates;

    fn local_ts(hour: u32, minute: u32) -> f64 {
        Local
            .with_ymd_and_hms(2024, 3, 4, hour, minute, 0)
            .earliest()
            .expect("valid local time")
            .timestamp() as f64
    }

    fn synth(rates: FailureRates) -> OutcomeSynthesizer {
        OutcomeSynthesizer::new(FailureModel::new(rates))
    }

    fn always(component: Component) -> FailureRates {
        let mut rates = FailureRates::none();
        match component {
            Component::Database => rates.database = 1.0,
            Component::Payment => rates.payment = 1.0,
            Component::Tls => rates.tls = 1.0,
            Component::Cache => rates.cache = 1.0,
            Component::HttpDependency => rates.http_dependency = 1.0,
            Component::ExternalApi => rates.external_api = 1.0,
            Component::AuthSaml => rates.auth_saml = 1.0,
            Component::AuthEmail => rates.auth_email = 1.0,
        }
        rates
    }

    #[test]
    fn flat_request_success() {
        let mut rng = StdRng::seed_from_u64(7);
        let outcome = synth(FailureRates::none()).synthesize_request(
            &mut rng,
            "cust_0002",
            "/api/v1/search",
            "GET",
            local_ts(11, 30),
        );

        assert!(SUCCESS_CODES.contains(&outcome.status_code));
        assert!(!outcome.errored());
        assert!((200.0..800.0).contains(&outcome.latency_ms));
        assert_eq!(outcome.attributes.get("customer.id"), Some("cust_0002"));
        assert_eq!(
            outcome.attributes.get("http.url"),
            Some("https://productivity-tool.example.com/api/v1/search")
        );
        assert!(!outcome.attributes.contains("component.failed"));
    }

    #[test]
    fn flat_request_tls_takes_precedence() {
        let mut rates = always(Component::Tls);
        rates.database = 1.0;

        let mut rng = StdRng::seed_from_u64(1);
        let outcome =
            synth(rates).synthesize_request(&mut rng, "cust_0003", "/api/v1/tasks", "GET", local_ts(11, 30));

        assert!(TLS_ERROR_CODES.contains(&outcome.status_code));
        assert_eq!(outcome.attributes.get("component.failed"), Some("tls"));
        assert!(outcome.latency_ms >= 150.0);
    }

    #[test]
    fn flat_request_payment_only_for_project_writes() {
        let synth = synth(always(Component::Payment));
        let mut rng = StdRng::seed_from_u64(3);

        let write = synth.synthesize_request(&mut rng, "cust_0004", "/api/v1/projects", "POST", local_ts(11, 30));
        assert!(matches!(write.status_code, 400 | 402));
        assert_eq!(write.attributes.get("payment.provider"), Some("stripe"));

        let read = synth.synthesize_request(&mut rng, "cust_0004", "/api/v1/projects", "GET", local_ts(11, 30));
        assert!(SUCCESS_CODES.contains(&read.status_code));
    }

    #[test]
    fn flat_request_database_failure() {
        let synth = synth(always(Component::Database));
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..50 {
            let outcome = synth.synthesize_request(&mut rng, "cust_0006", "/api/v1/teams", "PUT", local_ts(11, 30));
            match outcome.status_code {
                500 => assert_eq!(outcome.attributes.get("database.error"), Some("connection_timeout")),
                404 => assert_eq!(outcome.attributes.get("database.error"), Some("record_not_found")),
                other => panic!("unexpected status {}", other),
            }
            assert!(outcome.errored());
        }
    }

    #[test]
    fn known_bad_identity_always_fails_saml() {
        let mut rng = StdRng::seed_from_u64(5);
        let outcome = synth(FailureRates::none()).saml_attempt(&mut rng, KNOWN_BAD_IDENTITY, local_ts(11, 30));

        assert_eq!(outcome.status_code, 401);
        assert!(outcome.errored());
        assert!(!outcome.is_fatal());
        assert!(outcome.attributes.get("auth.saml.assertion").unwrap().contains('%'));
    }

    #[test]
    fn database_failure_is_fatal() {
        let mut rng = StdRng::seed_from_u64(9);
        let outcome = synth(always(Component::Database)).database(&mut rng, "user_2", "orders", "POST", local_ts(11, 30));

        assert_eq!(outcome.status_code, 500);
        assert!(outcome.is_fatal());
        assert_eq!(outcome.attributes.get("db.statement"), Some("INSERT FROM orders"));
        assert!((10.0..100.0).contains(&outcome.latency_ms));
    }

    #[test]
    fn cache_never_fails() {
        let synth = synth(always(Component::Cache));
        let mut rng = StdRng::seed_from_u64(13);

        for _ in 0..100 {
            let outcome = synth.cache(&mut rng, "/api/users:user_2");
            assert_eq!(outcome.status_code, 200);
            assert!(!outcome.errored());
            assert!((1.0..5.0).contains(&outcome.latency_ms));
            let hit = outcome.attributes.get("cache.hit") == Some("true");
            assert_eq!(outcome.attributes.contains("cache.miss"), !hit);
        }
    }

    #[test]
    fn service_call_failures_are_server_errors() {
        let synth = synth(always(Component::HttpDependency));
        let mut rng = StdRng::seed_from_u64(17);

        for _ in 0..50 {
            let outcome = synth.service_call(&mut rng, "user_2", "search-service", local_ts(11, 30));
            assert!(SERVICE_ERROR_CODES.contains(&outcome.status_code));
            assert!(outcome.is_fatal());
            assert!((50.0..300.0).contains(&outcome.latency_ms));
        }
    }

    #[test]
    fn external_call_failure_codes() {
        let synth = synth(always(Component::ExternalApi));
        let mut rng = StdRng::seed_from_u64(19);

        for _ in 0..50 {
            let outcome = synth.external_call(&mut rng, "user_2", "warehouse-api", local_ts(11, 30));
            assert!(EXTERNAL_ERROR_CODES.contains(&outcome.status_code));
            assert!(outcome.errored());
            assert_eq!(outcome.is_fatal(), outcome.status_code >= 500);
            assert!((100.0..500.0).contains(&outcome.latency_ms));
        }
    }

    #[test]
    fn external_call_only_follows_external_api_rate() {
        let mut rates = always(Component::Tls);
        rates.payment = 1.0;
        let synth = synth(rates);
        let mut rng = StdRng::seed_from_u64(23);

        for _ in 0..20 {
            let outcome = synth.external_call(&mut rng, "user_2", "external-payment-api", local_ts(11, 30));
            assert_eq!(outcome.status_code, 200);
            assert!(!outcome.errored());
            assert!(!outcome.attributes.contains("error.msg"));
        }
    }

    #[test]
    fn saml_base_rate_applies_to_ordinary_identities() {
        let mut rng = StdRng::seed_from_u64(29);
        let outcome = synth(always(Component::AuthSaml)).saml_attempt(&mut rng, "user_2", local_ts(11, 30));

        assert_eq!(outcome.status_code, 401);
        assert!(outcome.errored());
        assert_eq!(
            outcome.attributes.get("error.msg"),
            Some("SAML provider rejected the assertion")
        );

        let assertion = outcome.attributes.get("auth.saml.assertion").unwrap();
        assert!(!assertion.contains('%'));
        assert_eq!(assertion, saml_assertion("user_2", local_ts(11, 30), false));

        let outcome = synth(FailureRates::none()).saml_attempt(&mut rng, "user_2", local_ts(11, 30));
        assert_eq!(outcome.status_code, 200);
        assert!(!outcome.attributes.contains("error.msg"));
    }
}
