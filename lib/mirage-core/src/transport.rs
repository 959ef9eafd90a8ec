//! Log delivery transports.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    Client, StatusCode,
};
use snafu::ResultExt as _;
use tracing::{debug, info};

use crate::{
    encoder::{EncodedRecord, LogsPayload, ResourceConfig},
    error::{ErrorContext as _, GenericError, Request, Serialize, TimedOut, TransportError, UnexpectedStatus},
};

/// Default endpoint logs are delivered to.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:4318/v1/logs";

/// A destination for batches of log records.
///
/// Implementations must be safe to share between workers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a batch of records.
    ///
    /// # Errors
    ///
    /// If the batch was not accepted, an error is returned. The batch is not retried.
    async fn send(&self, records: &[EncodedRecord]) -> Result<(), TransportError>;
}

/// HTTP transport configuration.
#[derive(Clone, Debug)]
pub struct HttpTransportConfig {
    /// Endpoint to POST batches to.
    pub endpoint: String,

    /// Base64-encoded `Basic` credentials, if any.
    pub basic_auth: Option<String>,

    /// Upper bound on a single send, including connecting and reading the response.
    pub timeout: Duration,

    /// Resource attributes attached to every batch.
    pub resource: ResourceConfig,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            basic_auth: None,
            timeout: Duration::from_secs(10),
            resource: ResourceConfig::default(),
        }
    }
}

/// Delivers batches as OTLP/JSON over HTTP.
///
/// A batch is only considered delivered if the endpoint responds with `200 OK`. The underlying client is pooled, and a
/// single transport is shared by every worker.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// Creates a new `HttpTransport`.
    ///
    /// # Errors
    ///
    /// If the HTTP client cannot be built, an error is returned.
    pub fn new(config: HttpTransportConfig) -> Result<Self, GenericError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .error_context("Failed to build HTTP client.")?;

        Ok(Self { client, config })
    }

    /// Returns the configured endpoint.
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, records: &[EncodedRecord]) -> Result<(), TransportError> {
        let payload = LogsPayload::new(&self.config.resource, records);
        let body = serde_json::to_vec(&payload).context(Serialize)?;

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(credentials) = &self.config.basic_auth {
            request = request.header(AUTHORIZATION, format!("Basic {}", credentials));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return TimedOut {
                    timeout: self.config.timeout,
                }
                .fail()
            }
            Err(e) => {
                return Err(e).context(Request {
                    endpoint: &self.config.endpoint,
                })
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return UnexpectedStatus {
                endpoint: &self.config.endpoint,
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        debug!(records = records.len(), endpoint = %self.config.endpoint, "Delivered batch.");
        Ok(())
    }
}

/// A transport that only logs what it would have sent.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn send(&self, records: &[EncodedRecord]) -> Result<(), TransportError> {
        let errors = records.iter().filter(|r| r.severity_text == "ERROR").count();
        info!(records = records.len(), errors, "Dry run: would deliver batch.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt as _, AsyncWriteExt as _},
        net::TcpListener,
        task::JoinHandle,
    };

    use super::*;

    /// Accepts a single connection, answers it with `status_line`, and returns the raw request.
    async fn one_shot_server(status_line: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/v1/logs", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }

            let response = format!("HTTP/1.1 {}\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok", status_line);
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (endpoint, handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let content_length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        body.len() >= content_length
    }

    fn transport(endpoint: String) -> HttpTransport {
        HttpTransport::new(HttpTransportConfig {
            endpoint,
            basic_auth: Some("YnVja2V0OnNlY3JldA==".to_string()),
            timeout: Duration::from_secs(5),
            resource: ResourceConfig::default(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn delivers_json_with_basic_auth() {
        let (endpoint, server) = one_shot_server("200 OK").await;
        transport(endpoint).send(&[]).await.unwrap();

        let request = server.await.unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /v1/logs HTTP/1.1"));
        assert!(lower.contains("authorization: basic "));
        assert!(request.contains("YnVja2V0OnNlY3JldA=="));
        assert!(lower.contains("content-type: application/json"));
        assert!(request.contains(r#""scopeLogs""#));
    }

    #[tokio::test]
    async fn non_200_is_a_failure() {
        let (endpoint, server) = one_shot_server("202 Accepted").await;
        let error = transport(endpoint).send(&[]).await.unwrap_err();
        server.await.unwrap();

        assert!(matches!(error, TransportError::UnexpectedStatus { status: 202, .. }));
    }

    #[tokio::test]
    async fn log_transport_always_succeeds() {
        assert!(LogTransport.send(&[]).await.is_ok());
    }
}
