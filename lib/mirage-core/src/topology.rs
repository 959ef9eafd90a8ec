//! Static model of the simulated system.
//!
//! Everything here is a fixed lookup table: which endpoints exist, which service handles each endpoint, which
//! dependencies each service calls (in order), and which table backs each endpoint.

/// Endpoints served by the simulated web application.
pub const ENDPOINTS: &[&str] = &[
    "/api/users",
    "/api/orders",
    "/api/products",
    "/api/inventory",
    "/api/payments",
    "/api/analytics",
    "/api/search",
    "/api/recommendations",
];

/// Endpoints served by the simulated productivity tool (flat workload).
pub const PRODUCTIVITY_ENDPOINTS: &[&str] = &[
    "/api/v1/documents",
    "/api/v1/workspaces",
    "/api/v1/users",
    "/api/v1/teams",
    "/api/v1/projects",
    "/api/v1/tasks",
    "/api/v1/comments",
    "/api/v1/notifications",
    "/api/v1/search",
    "/api/v1/analytics",
];

/// HTTP methods requests are issued with.
pub const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE"];

/// Service that handles requests for endpoints with no explicit mapping.
pub const FALLBACK_SERVICE: &str = "web-service";

/// Table used by endpoints with no explicit mapping.
pub const FALLBACK_TABLE: &str = "data";

const SERVICES: &[(&str, &[&str])] = &[
    ("user-service", &["database", "cache"]),
    ("order-service", &["database", "payment-service", "inventory-service"]),
    ("product-service", &["database", "search-service"]),
    ("payment-service", &["external-payment-api"]),
    ("inventory-service", &["database", "warehouse-api"]),
    ("analytics-service", &["database", "data-warehouse"]),
    ("search-service", &["elasticsearch"]),
    ("recommendation-service", &["ml-service", "database"]),
];

const FALLBACK_DEPENDENCIES: &[&str] = &["database"];

const ENDPOINT_ROUTES: &[(&str, &str, &str)] = &[
    ("/api/users", "user-service", "users"),
    ("/api/orders", "order-service", "orders"),
    ("/api/products", "product-service", "products"),
    ("/api/inventory", "inventory-service", "inventory"),
    ("/api/payments", "payment-service", "transactions"),
    ("/api/analytics", "analytics-service", "events"),
    ("/api/search", "search-service", "search_index"),
    ("/api/recommendations", "recommendation-service", "user_preferences"),
];

/// How a dependency is reached, derived from its name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dependency<'a> {
    /// The relational database.
    Database,

    /// The cache.
    Cache,

    /// An internal service, called over HTTP (`*-service`, and any name with no recognized suffix).
    Service(&'a str),

    /// A third-party API (`*-api`).
    ExternalApi(&'a str),
}

impl<'a> Dependency<'a> {
    /// Classifies a dependency by name.
    pub fn classify(name: &'a str) -> Self {
        match name {
            "database" => Dependency::Database,
            "cache" => Dependency::Cache,
            name if name.ends_with("-api") => Dependency::ExternalApi(name),
            name => Dependency::Service(name),
        }
    }

    /// Returns the name of the dependency.
    pub fn name(&self) -> &'a str {
        match self {
            Dependency::Database => "database",
            Dependency::Cache => "cache",
            Dependency::Service(name) | Dependency::ExternalApi(name) => name,
        }
    }
}

/// Returns the service that handles the given endpoint.
pub fn service_for_endpoint(endpoint: &str) -> &'static str {
    ENDPOINT_ROUTES
        .iter()
        .find(|(route, _, _)| *route == endpoint)
        .map(|(_, service, _)| *service)
        .unwrap_or(FALLBACK_SERVICE)
}

/// Returns the database table backing the given endpoint.
pub fn table_for_endpoint(endpoint: &str) -> &'static str {
    ENDPOINT_ROUTES
        .iter()
        .find(|(route, _, _)| *route == endpoint)
        .map(|(_, _, table)| *table)
        .unwrap_or(FALLBACK_TABLE)
}

/// Returns the ordered dependency list of the given service.
pub fn dependencies_of(service: &str) -> &'static [&'static str] {
    SERVICES
        .iter()
        .find(|(name, _)| *name == service)
        .map(|(_, deps)| *deps)
        .unwrap_or(FALLBACK_DEPENDENCIES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_endpoint_is_routed() {
        for endpoint in ENDPOINTS {
            assert_ne!(service_for_endpoint(endpoint), FALLBACK_SERVICE);
            assert_ne!(table_for_endpoint(endpoint), FALLBACK_TABLE);
        }
    }

    #[test]
    fn unknown_endpoint_falls_back() {
        assert_eq!(service_for_endpoint("/nope"), "web-service");
        assert_eq!(table_for_endpoint("/nope"), "data");
        assert_eq!(dependencies_of("web-service"), &["database"]);
    }

    #[test]
    fn dependency_order_is_preserved() {
        assert_eq!(
            dependencies_of("order-service"),
            &["database", "payment-service", "inventory-service"]
        );
    }

    #[test]
    fn classification() {
        assert_eq!(Dependency::classify("database"), Dependency::Database);
        assert_eq!(Dependency::classify("cache"), Dependency::Cache);
        assert_eq!(
            Dependency::classify("warehouse-api"),
            Dependency::ExternalApi("warehouse-api")
        );
        assert_eq!(Dependency::classify("ml-service"), Dependency::Service("ml-service"));
        assert_eq!(Dependency::classify("elasticsearch"), Dependency::Service("elasticsearch"));
    }
}
