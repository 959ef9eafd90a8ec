//! Log record encoding.
//!
//! Records are produced in the OTLP/JSON logs shape, and wrapped into a [`LogsPayload`] envelope at delivery time.

use serde::Serialize;

use crate::{
    attributes::{AnyValue, Attributes, KeyValue},
    outcome::Outcome,
    tracer::TraceContext,
};

/// Severity number of `INFO` records.
pub const SEVERITY_INFO: u8 = 9;

/// Severity number of `ERROR` records.
pub const SEVERITY_ERROR: u8 = 17;

/// Name of the instrumentation scope records are emitted under.
pub const SCOPE_NAME: &str = "http-request-logger";

/// A log record, ready to be delivered.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedRecord {
    /// Timestamp, in nanoseconds since the Unix epoch.
    pub time_unix_nano: u64,

    /// OTLP severity number.
    pub severity_number: u8,

    /// Severity text.
    pub severity_text: &'static str,

    /// Record body.
    pub body: AnyValue,

    /// Record attributes, in order.
    pub attributes: Vec<KeyValue>,

    /// Always zero: attributes are never dropped.
    pub dropped_attributes_count: u32,

    /// Trace ID, as 32 lowercase hex characters.
    pub trace_id: String,

    /// Span ID, as 16 lowercase hex characters.
    pub span_id: String,

    /// Parent span ID, as 16 lowercase hex characters.
    ///
    /// Kept for correlation only; it is not part of the wire format.
    #[serde(skip)]
    pub parent_span_id: Option<String>,
}

impl EncodedRecord {
    /// Returns the value of the given attribute, if present.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.as_str())
    }
}

/// Converts outcomes into log records.
///
/// The record's attributes are the outcome's attributes, in order, followed by any of the fixed identity, status, and
/// service fields that the outcome did not already carry.
#[derive(Clone, Debug)]
pub struct RecordEncoder {
    identity_key: &'static str,
}

impl RecordEncoder {
    /// Creates a new `RecordEncoder` that records the identity under `identity_key`.
    pub fn new(identity_key: &'static str) -> Self {
        Self { identity_key }
    }

    /// Encodes `outcome` as a log record.
    pub fn encode(&self, outcome: &Outcome, identity: &str, context: &TraceContext, timestamp_secs: f64) -> EncodedRecord {
        let (severity_number, severity_text) = severity_for(outcome.status_code);

        let mut attributes = outcome.attributes.clone();
        attributes.insert_if_absent(self.identity_key, identity);
        attributes.insert_if_absent("http.status_code", outcome.status_code);
        attributes.insert_if_absent("service.name", &outcome.service);

        EncodedRecord {
            time_unix_nano: (timestamp_secs.max(0.0) * 1e9) as u64,
            severity_number,
            severity_text,
            body: AnyValue::string(outcome.message.as_str()),
            attributes: attributes.to_otlp(),
            dropped_attributes_count: 0,
            trace_id: context.trace_id_hex(),
            span_id: context.span_id_hex(),
            parent_span_id: context.parent_span_id.map(|id| format!("{:016x}", id)),
        }
    }
}

/// Maps a status code to an OTLP severity.
///
/// Client errors are logged at `ERROR`, same as server errors.
pub const fn severity_for(status_code: u16) -> (u8, &'static str) {
    if status_code >= 400 {
        (SEVERITY_ERROR, "ERROR")
    } else {
        (SEVERITY_INFO, "INFO")
    }
}

/// Attributes describing the emitting resource.
#[derive(Clone, Debug)]
pub struct ResourceConfig {
    /// Service name.
    pub service_name: String,

    /// Service version.
    pub service_version: String,

    /// Deployment environment.
    pub environment: String,
}

impl ResourceConfig {
    fn to_attributes(&self) -> Attributes {
        Attributes::new()
            .with("service.name", &self.service_name)
            .with("service.version", &self.service_version)
            .with("deployment.environment", &self.environment)
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            service_name: "productivity-tool".to_string(),
            service_version: "2.0.0".to_string(),
            environment: "demo".to_string(),
        }
    }
}

/// An OTLP/JSON logs export request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsPayload<'a> {
    resource_logs: [ResourceLogs<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceLogs<'a> {
    resource: Resource,
    scope_logs: [ScopeLogs<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Resource {
    attributes: Vec<KeyValue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScopeLogs<'a> {
    scope: Scope,
    log_records: &'a [EncodedRecord],
}

#[derive(Debug, Serialize)]
struct Scope {
    name: &'static str,
}

impl<'a> LogsPayload<'a> {
    /// Wraps `records` into a single resource/scope envelope.
    pub fn new(resource: &ResourceConfig, records: &'a [EncodedRecord]) -> Self {
        Self {
            resource_logs: [ResourceLogs {
                resource: Resource {
                    attributes: resource.to_attributes().to_otlp(),
                },
                scope_logs: [ScopeLogs {
                    scope: Scope { name: SCOPE_NAME },
                    log_records: records,
                }],
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::outcome::OperationKind;

    fn context() -> TraceContext {
        TraceContext {
            trace_id: 0xabc,
            span_id: 0x12,
            parent_span_id: None,
            start_time_ns: 0,
        }
    }

    fn outcome(status_code: u16) -> Outcome {
        Outcome::new(OperationKind::HttpRequest, "webapp", status_code, 12.0, "Processed GET /api/users").with_attributes(
            Attributes::new()
                .with("zeta", "1")
                .with("alpha", "2")
                .with("middle", "3"),
        )
    }

    #[test]
    fn severity_mapping() {
        let encoder = RecordEncoder::new("user.id");
        assert_eq!(encoder.encode(&outcome(500), "user_1", &context(), 1.0).severity_number, 17);
        assert_eq!(encoder.encode(&outcome(404), "user_1", &context(), 1.0).severity_number, 17);
        assert_eq!(encoder.encode(&outcome(200), "user_1", &context(), 1.0).severity_number, 9);
        assert_eq!(encoder.encode(&outcome(201), "user_1", &context(), 1.0).severity_text, "INFO");
    }

    #[test]
    fn record_wire_shape() {
        let record = RecordEncoder::new("user.id").encode(&outcome(500), "user_1", &context(), 1_700_000_000.0);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(
            json,
            json!({
                "timeUnixNano": 1_700_000_000_000_000_000u64,
                "severityNumber": 17,
                "severityText": "ERROR",
                "body": {"stringValue": "Processed GET /api/users"},
                "attributes": [
                    {"key": "zeta", "value": {"stringValue": "1"}},
                    {"key": "alpha", "value": {"stringValue": "2"}},
                    {"key": "middle", "value": {"stringValue": "3"}},
                    {"key": "user.id", "value": {"stringValue": "user_1"}},
                    {"key": "http.status_code", "value": {"stringValue": "500"}},
                    {"key": "service.name", "value": {"stringValue": "webapp"}},
                ],
                "droppedAttributesCount": 0,
                "traceId": "00000000000000000000000000000abc",
                "spanId": "0000000000000012",
            })
        );
    }

    #[test]
    fn outcome_attributes_take_precedence() {
        let outcome = outcome(200).with_attributes(Attributes::new().with("service.name", "user-service"));
        let record = RecordEncoder::new("customer.id").encode(&outcome, "cust_0001", &context(), 1.0);

        assert_eq!(record.attribute("service.name"), Some("user-service"));
        assert_eq!(record.attribute("customer.id"), Some("cust_0001"));
        assert_eq!(record.attributes[0].key, "service.name");
    }

    #[test]
    fn payload_envelope() {
        let record = RecordEncoder::new("user.id").encode(&outcome(200), "user_1", &context(), 1.0);
        let records = vec![record];
        let json = serde_json::to_value(LogsPayload::new(&ResourceConfig::default(), &records)).unwrap();

        let resource_logs = &json["resourceLogs"];
        assert_eq!(resource_logs.as_array().unwrap().len(), 1);
        assert_eq!(
            resource_logs[0]["resource"]["attributes"],
            json!([
                {"key": "service.name", "value": {"stringValue": "productivity-tool"}},
                {"key": "service.version", "value": {"stringValue": "2.0.0"}},
                {"key": "deployment.environment", "value": {"stringValue": "demo"}},
            ])
        );
        let scope_logs = &resource_logs[0]["scopeLogs"][0];
        assert_eq!(scope_logs["scope"], json!({"name": "http-request-logger"}));
        assert_eq!(scope_logs["logRecords"].as_array().unwrap().len(), 1);
        assert_eq!(scope_logs["logRecords"][0]["spanId"], "0000000000000012");
    }
}
