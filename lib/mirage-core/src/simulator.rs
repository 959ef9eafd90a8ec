//! Call graph simulation.

use rand::Rng;

use crate::{
    attributes::Attributes,
    outcome::{OperationKind, Outcome},
    synth::OutcomeSynthesizer,
    topology::{dependencies_of, service_for_endpoint, table_for_endpoint, Dependency},
};

/// Service name of the request entry point.
pub const ENTRY_SERVICE: &str = "webapp";

const WEBAPP_BASE_URL: &str = "https://webapp.example.com";

/// Expands a single request into a tree of nested operations.
///
/// Every request starts with authentication: a SAML attempt, falling back to email/password if SAML fails. A request
/// that fails both is rejected with a 401 and its business logic never runs. Otherwise, the business step of the
/// service owning the endpoint calls each of that service's dependencies in order. The first fatal dependency failure
/// (a database error, or any 5xx) stops the remaining calls and fails the request with a 500; any other dependency
/// failure is only noted on the business step.
#[derive(Clone, Debug)]
pub struct CallGraphSimulator {
    synth: OutcomeSynthesizer,
}

impl CallGraphSimulator {
    /// Creates a new `CallGraphSimulator`.
    pub fn new(synth: OutcomeSynthesizer) -> Self {
        Self { synth }
    }

    /// Returns the synthesizer used for individual operations.
    pub fn synthesizer(&self) -> &OutcomeSynthesizer {
        &self.synth
    }

    /// Simulates a request from `identity` to `endpoint`, returning the root outcome.
    ///
    /// The root always has exactly two children: the authentication step, followed by either the business step or, if
    /// authentication failed, a terminal rejection.
    pub fn simulate_request<R: Rng + ?Sized>(
        &self, rng: &mut R, identity: &str, endpoint: &str, method: &str, now: f64,
    ) -> Outcome {
        let request_id = format!("{:08x}", rng.random::<u32>());
        let mut attributes = Attributes::new()
            .with("user.id", identity)
            .with("request.id", &request_id)
            .with("http.method", method)
            .with("http.url", format!("{}{}", WEBAPP_BASE_URL, endpoint))
            .with("span.kind", "server");

        let auth = self.authenticate(rng, identity, now);
        let overhead_ms = rng.random_range(1.0..3.0);

        let (status_code, message, second) = if auth.errored() {
            attributes.insert("error.msg", "Authentication failed");
            let rejection = Outcome::new(
                OperationKind::Rejection,
                ENTRY_SERVICE,
                401,
                0.0,
                format!("Rejected unauthenticated request {} from {}", request_id, identity),
            )
            .with_attributes(Attributes::new().with("error.msg", "Authentication failed"));

            (
                401,
                format!("Authentication failed for {} on request {}", identity, request_id),
                rejection,
            )
        } else {
            let business = self.business(rng, identity, endpoint, method, now);
            if business.is_fatal() {
                let cause = business.attributes.get("error.msg").unwrap_or("dependency failure").to_string();
                attributes.insert("error.msg", &cause);
                (
                    500,
                    format!("Request {} to {} {} failed: {}", request_id, method, endpoint, cause),
                    business,
                )
            } else {
                let status = if method == "GET" { 200 } else { 201 };
                (
                    status,
                    format!("Processed {} {} for {}", method, endpoint, identity),
                    business,
                )
            }
        };
        attributes.insert("http.status_code", status_code);

        let latency_ms = auth.latency_ms + second.latency_ms + overhead_ms;
        Outcome::new(OperationKind::HttpRequest, ENTRY_SERVICE, status_code, latency_ms, message)
            .with_attributes(attributes)
            .with_child(auth)
            .with_child(second)
    }

    fn authenticate<R: Rng + ?Sized>(&self, rng: &mut R, identity: &str, now: f64) -> Outcome {
        let mut attributes = Attributes::new().with("user.id", identity).with("component", "auth");
        let mut children = Vec::with_capacity(2);

        let saml = self.synth.saml_attempt(rng, identity, now);
        let authenticated_by = if saml.failed() {
            children.push(saml);
            let email = self.synth.email_attempt(rng, identity, now);
            let accepted = !email.failed();
            children.push(email);
            attributes.insert("auth.fallback", "password");
            accepted.then_some("password")
        } else {
            children.push(saml);
            Some("saml")
        };

        let status_code = match authenticated_by {
            Some(method) => {
                attributes.insert("auth.method", method);
                200
            }
            None => {
                attributes.insert("error.msg", "Invalid token");
                401
            }
        };

        let latency_ms = children.iter().map(|c| c.latency_ms).sum::<f64>() + rng.random_range(0.5..2.0);
        let message = if status_code == 200 {
            format!("Authenticated {}", identity)
        } else {
            format!("Could not authenticate {}", identity)
        };

        let mut auth = Outcome::new(OperationKind::AuthStep, "auth-service", status_code, latency_ms, message)
            .with_attributes(attributes);
        auth.children = children;
        auth
    }

    fn business<R: Rng + ?Sized>(&self, rng: &mut R, identity: &str, endpoint: &str, method: &str, now: f64) -> Outcome {
        let service = service_for_endpoint(endpoint);
        let mut attributes = Attributes::new().with("endpoint", endpoint).with("service.name", service);
        let mut children = Vec::new();
        let mut fatal = false;

        for name in dependencies_of(service) {
            let dependency = Dependency::classify(name);
            let child = match dependency {
                Dependency::Database => {
                    self.synth
                        .database(rng, identity, table_for_endpoint(endpoint), method, now)
                }
                Dependency::Cache => self.synth.cache(rng, &format!("{}:{}", endpoint, identity)),
                Dependency::Service(name) => self.synth.service_call(rng, identity, name, now),
                Dependency::ExternalApi(name) => self.synth.external_call(rng, identity, name, now),
            };

            if child.is_fatal() {
                let cause = match dependency {
                    Dependency::Database => child
                        .attributes
                        .get("error.msg")
                        .unwrap_or("Database connection timeout")
                        .to_string(),
                    Dependency::ExternalApi(name) => format!("External API {} failed", name),
                    _ => format!("Dependency {} failed", name),
                };
                attributes.insert("error.msg", cause);
                attributes.insert("dependency.failed", dependency.name());
                children.push(child);
                fatal = true;
                break;
            }

            if child.failed() {
                attributes.insert("error.msg", format!("External API {} failed", dependency.name()));
                attributes.insert("dependency.degraded", dependency.name());
            }
            children.push(child);
        }

        let status_code = if fatal { 500 } else { 200 };
        let latency_ms = children.iter().map(|c| c.latency_ms).sum::<f64>() + rng.random_range(1.0..5.0);
        let message = if fatal {
            format!("{} failed handling {} {}", service, method, endpoint)
        } else {
            format!("{} handled {} {}", service, method, endpoint)
        };

        let mut business = Outcome::new(OperationKind::BusinessStep, service, status_code, latency_ms, message)
            .with_attributes(attributes);
        business.children = children;
        business
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Local, TimeZone as _};
    use rand::{rngs::StdRng, SeedableRng as _};

    use super::*;
    use crate::{
        failure::{FailureModel, FailureRates},
        saml::KNOWN_BAD_IDENTITY,
        topology::ENDPOINTS,
    };

    fn local_ts(hour: u32, minute: u32) -> f64 {
        Local
            .with_ymd_and_hms(2024, 5, 6, hour, minute, 0)
            .earliest()
            .expect("valid local time")
            .timestamp() as f64
    }

    fn simulator(rates: FailureRates) -> CallGraphSimulator {
        CallGraphSimulator::new(OutcomeSynthesizer::new(FailureModel::new(rates)))
    }

    fn any_fatal_dependency(root: &Outcome) -> bool {
        root.children
            .iter()
            .find(|c| c.kind == OperationKind::BusinessStep)
            .map(|business| business.children.iter().any(Outcome::is_fatal))
            .unwrap_or(false)
    }

    #[test]
    fn healthy_get_request() {
        let mut rng = StdRng::seed_from_u64(42);
        let root = simulator(FailureRates::none()).simulate_request(&mut rng, "user_1", "/api/users", "GET", local_ts(11, 30));

        assert_eq!(root.status_code, 200);
        assert!(!root.errored());
        assert_eq!(root.children.len(), 2);
        assert!(root.children.iter().all(|c| !c.errored()));

        let auth = &root.children[0];
        assert_eq!(auth.kind, OperationKind::AuthStep);
        assert_eq!(auth.attributes.get("auth.method"), Some("saml"));

        let business = &root.children[1];
        assert_eq!(business.kind, OperationKind::BusinessStep);
        assert_eq!(business.service, "user-service");
        let kinds: Vec<_> = business.children.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![OperationKind::DbQuery, OperationKind::CacheOp]);
        assert!(business.children.iter().all(|c| !c.errored()));
    }

    #[test]
    fn healthy_write_request_is_created() {
        let mut rng = StdRng::seed_from_u64(42);
        let root =
            simulator(FailureRates::none()).simulate_request(&mut rng, "user_2", "/api/orders", "POST", local_ts(11, 30));
        assert_eq!(root.status_code, 201);
        assert_eq!(root.children[1].children.len(), 3);
    }

    #[test]
    fn auth_failure_short_circuits() {
        let rates = FailureRates {
            auth_email: 1.0,
            ..FailureRates::none()
        };
        let mut rng = StdRng::seed_from_u64(1);
        let root = simulator(rates).simulate_request(&mut rng, KNOWN_BAD_IDENTITY, "/api/orders", "GET", local_ts(11, 30));

        assert_eq!(root.status_code, 401);
        assert!(root.errored());
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].kind, OperationKind::AuthStep);
        assert_eq!(root.children[0].children.len(), 2);
        assert_eq!(root.children[1].kind, OperationKind::Rejection);
        assert!(root.children[1].children.is_empty());
        assert!(root.children.iter().all(|c| c.kind != OperationKind::BusinessStep));
    }

    #[test]
    fn email_fallback_recovers() {
        let mut rng = StdRng::seed_from_u64(1);
        let root = simulator(FailureRates::none()).simulate_request(
            &mut rng,
            KNOWN_BAD_IDENTITY,
            "/api/users",
            "GET",
            local_ts(11, 30),
        );

        let auth = &root.children[0];
        assert_eq!(auth.status_code, 200);
        assert_eq!(auth.attributes.get("auth.method"), Some("password"));
        assert!(auth.children[0].errored());
        assert!(!auth.errored());
        assert_eq!(root.status_code, 200);
    }

    #[test]
    fn database_failure_stops_dependency_evaluation() {
        let rates = FailureRates {
            database: 1.0,
            ..FailureRates::none()
        };
        let mut rng = StdRng::seed_from_u64(3);
        let root = simulator(rates).simulate_request(&mut rng, "user_2", "/api/orders", "PUT", local_ts(11, 30));

        assert_eq!(root.status_code, 500);
        let business = &root.children[1];
        assert_eq!(business.status_code, 500);
        assert_eq!(business.children.len(), 1);
        assert_eq!(business.children[0].kind, OperationKind::DbQuery);
        assert_eq!(business.attributes.get("dependency.failed"), Some("database"));
    }

    #[test]
    fn external_client_errors_do_not_fail_the_request() {
        // External API errors are 4xx or 5xx; only 4xx should leave the root successful.
        let rates = FailureRates {
            external_api: 1.0,
            ..FailureRates::none()
        };
        let sim = simulator(rates);
        let mut rng = StdRng::seed_from_u64(5);

        let mut saw_client_error = false;
        for _ in 0..100 {
            let root = sim.simulate_request(&mut rng, "user_2", "/api/inventory", "GET", local_ts(11, 30));
            let business = &root.children[1];
            let api = business.children.last().unwrap();
            assert_eq!(api.kind, OperationKind::ExternalCall);

            if api.status_code < 500 {
                saw_client_error = true;
                assert_eq!(root.status_code, 200);
                assert!(!root.errored());
                assert_eq!(business.attributes.get("dependency.degraded"), Some("warehouse-api"));
            } else {
                assert_eq!(root.status_code, 500);
            }
        }
        assert!(saw_client_error);
    }

    #[test]
    fn root_errored_iff_fatal_dependency() {
        let rates = FailureRates {
            database: 0.2,
            http_dependency: 0.2,
            external_api: 0.3,
            tls: 0.05,
            payment: 0.1,
            ..FailureRates::none()
        };
        let sim = simulator(rates);
        let mut rng = StdRng::seed_from_u64(99);

        for i in 0..2000 {
            let identity = format!("user_{}", (i % 97) + 100);
            let endpoint = ENDPOINTS[i % ENDPOINTS.len()];
            let hour = (i % 24) as u32;
            let root = sim.simulate_request(&mut rng, &identity, endpoint, "GET", local_ts(hour, 30));

            // Authentication never fails with these rates, so errors can only come from dependencies.
            assert_eq!(root.errored(), any_fatal_dependency(&root), "identity={} endpoint={}", identity, endpoint);
            assert_eq!(root.status_code == 500, root.errored());

            // Nothing is evaluated past the first fatal dependency.
            let business = &root.children[1];
            if let Some(pos) = business.children.iter().position(Outcome::is_fatal) {
                assert_eq!(pos, business.children.len() - 1);
            }
        }
    }

    #[test]
    fn latency_covers_children() {
        let mut rng = StdRng::seed_from_u64(8);
        let root =
            simulator(FailureRates::default()).simulate_request(&mut rng, "user_4", "/api/orders", "GET", local_ts(11, 30));

        root.walk(&mut |outcome, _| {
            let children: f64 = outcome.children.iter().map(|c| c.latency_ms).sum();
            assert!(outcome.latency_ms >= children);
        });
    }
}
