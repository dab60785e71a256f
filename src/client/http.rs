//! SPARQL 1.1 Protocol client with retries and circuit breaking.
//!
//! All requests are HTTP POSTs against `{endpoint}/{dataset}/query` or
//! `{endpoint}/{dataset}/update`. Each call resolves its effective timeout
//! (bounded by the configured maximum), consults the breaker, runs the
//! retry loop with exponential backoff and jitter, and records the outcome.
//! Dropping an in-flight call releases the connection and leaves breaker
//! state untouched.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::client::{
    BindingRow, ConstructResult, HealthStatus, RdfClient, ResponseStats, SelectResult,
    UpdateResult,
};
use crate::client::breaker::CircuitBreaker;
use crate::config::{AclConfig, RetryPolicy, TimeoutConfig};
use crate::error::{AclError, Result};

const SPARQL_QUERY_CONTENT_TYPE: &str = "application/sparql-query";
const SPARQL_UPDATE_CONTENT_TYPE: &str = "application/sparql-update";
const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";
const TURTLE: &str = "text/turtle";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Query,
    Update,
}

impl Operation {
    fn path_suffix(&self) -> &'static str {
        match self {
            Operation::Query => "query",
            Operation::Update => "update",
        }
    }
}

/// Production [`RdfClient`] speaking the SPARQL 1.1 Protocol.
#[derive(Debug)]
pub struct FusekiClient {
    endpoint: String,
    dataset: String,
    auth: Option<(String, String)>,
    trace_header: String,
    timeout: TimeoutConfig,
    retry: RetryPolicy,
    record_timeout_only: bool,
    breaker: CircuitBreaker,
    http: reqwest::Client,
}

impl FusekiClient {
    /// Build a client from the validated configuration.
    pub fn new(config: &AclConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AclError::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            dataset: config.dataset.trim_matches('/').to_string(),
            auth: config
                .auth
                .as_ref()
                .map(|a| (a.username.clone(), a.password.clone())),
            trace_header: config.trace_header.clone(),
            timeout: config.timeout.clone(),
            retry: config.retries.clone(),
            record_timeout_only: config.circuit_breaker.record_timeout_only,
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            http,
        })
    }

    /// Breaker handle, exposed for health reporting.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn execute(
        &self,
        operation: Operation,
        body: &str,
        accept: &str,
        content_type: &str,
        timeout: Option<Duration>,
        trace_id: Option<&str>,
    ) -> Result<(u16, String, f64)> {
        self.breaker.check()?;

        let url = format!(
            "{}/{}/{}",
            self.endpoint,
            self.dataset,
            operation.path_suffix()
        );
        let resolved_timeout = self.timeout.resolve(timeout);
        let max_attempts = self.retry.max_attempts.max(1);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let start = Instant::now();
            let mut request = self
                .http
                .post(&url)
                .header(reqwest::header::ACCEPT, accept)
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .timeout(resolved_timeout)
                .body(body.to_string());
            if let Some((user, password)) = &self.auth {
                request = request.basic_auth(user, Some(password));
            }
            if let Some(trace) = trace_id {
                request = request.header(self.trace_header.as_str(), trace);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let text = match response.text().await {
                        Ok(text) => text,
                        Err(e) => {
                            self.record_transport_failure(e.is_timeout());
                            if attempt >= max_attempts {
                                return Err(connect_error(&url, &e, trace_id));
                            }
                            self.sleep_before_retry(attempt).await;
                            continue;
                        }
                    };
                    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

                    if status >= 400 {
                        self.record_status_failure(status);
                        if self.retry.is_retryable_status(status) && attempt < max_attempts {
                            warn!(
                                status,
                                attempt,
                                url = url.as_str(),
                                "retrying store request"
                            );
                            self.sleep_before_retry(attempt).await;
                            continue;
                        }
                        return Err(map_status(status, text, trace_id));
                    }

                    self.breaker.record_success();
                    debug!(
                        status,
                        duration_ms,
                        url = url.as_str(),
                        "store request completed"
                    );
                    return Ok((status, text, duration_ms));
                }
                Err(e) => {
                    self.record_transport_failure(e.is_timeout());
                    if attempt >= max_attempts {
                        return Err(connect_error(&url, &e, trace_id));
                    }
                    warn!(
                        error = %e,
                        attempt,
                        url = url.as_str(),
                        "transport error, retrying"
                    );
                    self.sleep_before_retry(attempt).await;
                }
            }
        }
    }

    /// Whether an HTTP status counts toward the breaker. Server errors and
    /// the retryable statuses count; plain client errors never do.
    fn record_status_failure(&self, status: u16) {
        if self.record_timeout_only {
            return;
        }
        if status >= 500 || self.retry.is_retryable_status(status) {
            self.breaker.record_failure();
        }
    }

    fn record_transport_failure(&self, was_timeout: bool) {
        if !self.record_timeout_only || was_timeout {
            self.breaker.record_failure();
        }
    }

    async fn sleep_before_retry(&self, attempt: u32) {
        let mut delay = self.retry.backoff_delay(attempt);
        if self.retry.jitter_seconds > 0.0 {
            let jitter: f64 = rand::thread_rng().gen_range(0.0..self.retry.jitter_seconds);
            delay += Duration::from_secs_f64(jitter);
        }
        tokio::time::sleep(delay).await;
    }
}

fn connect_error(url: &str, err: &reqwest::Error, trace_id: Option<&str>) -> AclError {
    AclError::FusekiConnect {
        message: format!("{url}: {err}"),
        trace_id: trace_id.map(str::to_string),
    }
}

fn map_status(status: u16, body: String, trace_id: Option<&str>) -> AclError {
    let mut message = body;
    message.truncate(1024);
    let trace_id = trace_id.map(str::to_string);
    match status {
        400 => AclError::BadRequest { message, trace_id },
        401 => AclError::Unauthenticated { message, trace_id },
        403 => AclError::Forbidden { message, trace_id },
        404 => AclError::NotFound { message, trace_id },
        _ => AclError::FusekiQuery {
            status,
            message,
            trace_id,
        },
    }
}

#[async_trait]
impl RdfClient for FusekiClient {
    async fn select(
        &self,
        query: &str,
        timeout: Option<Duration>,
        trace_id: Option<&str>,
    ) -> Result<SelectResult> {
        let (status, body, duration_ms) = self
            .execute(
                Operation::Query,
                query,
                SPARQL_RESULTS_JSON,
                SPARQL_QUERY_CONTENT_TYPE,
                timeout,
                trace_id,
            )
            .await?;

        let parsed: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            AclError::FusekiQuery {
                status,
                message: format!("unparseable SELECT response: {e}"),
                trace_id: trace_id.map(str::to_string),
            }
        })?;
        let vars = parsed
            .pointer("/head/vars")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let bindings: Vec<BindingRow> = parsed
            .pointer("/results/bindings")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| AclError::FusekiQuery {
                status,
                message: format!("unparseable SELECT bindings: {e}"),
                trace_id: trace_id.map(str::to_string),
            })?
            .unwrap_or_default();

        Ok(SelectResult {
            vars,
            bindings,
            stats: ResponseStats {
                status,
                duration_ms,
            },
        })
    }

    async fn construct(
        &self,
        query: &str,
        timeout: Option<Duration>,
        trace_id: Option<&str>,
    ) -> Result<ConstructResult> {
        let (status, body, duration_ms) = self
            .execute(
                Operation::Query,
                query,
                TURTLE,
                SPARQL_QUERY_CONTENT_TYPE,
                timeout,
                trace_id,
            )
            .await?;
        Ok(ConstructResult {
            turtle: body,
            stats: ResponseStats {
                status,
                duration_ms,
            },
        })
    }

    async fn update(
        &self,
        update: &str,
        timeout: Option<Duration>,
        trace_id: Option<&str>,
    ) -> Result<UpdateResult> {
        let (status, _body, duration_ms) = self
            .execute(
                Operation::Update,
                update,
                SPARQL_RESULTS_JSON,
                SPARQL_UPDATE_CONTENT_TYPE,
                timeout,
                trace_id,
            )
            .await?;
        Ok(UpdateResult {
            status,
            duration_ms,
        })
    }

    async fn health(&self) -> Result<HealthStatus> {
        // Deliberately no I/O: liveness without query load.
        Ok(HealthStatus {
            ok: self.breaker.state() != crate::client::CircuitState::Open,
            backend: "fuseki".to_string(),
            dataset: self.dataset.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;

    fn client(config: AclConfig) -> FusekiClient {
        FusekiClient::new(&config).unwrap()
    }

    #[test]
    fn status_mapping_covers_the_taxonomy() {
        assert_eq!(map_status(400, "x".into(), None).kind(), "BadRequest");
        assert_eq!(map_status(401, "x".into(), None).kind(), "Unauthenticated");
        assert_eq!(map_status(403, "x".into(), None).kind(), "Forbidden");
        assert_eq!(map_status(404, "x".into(), None).kind(), "NotFound");
        assert_eq!(map_status(503, "x".into(), None).kind(), "FusekiQueryError");
        assert!(map_status(503, "x".into(), None).is_retryable());
        assert!(!map_status(422, "x".into(), None).is_retryable());
    }

    #[test]
    fn status_failures_respect_record_timeout_only() {
        let c = client(AclConfig {
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: 30.0,
                record_timeout_only: true,
            },
            ..AclConfig::default()
        });
        c.record_status_failure(503);
        assert_eq!(c.breaker().state(), crate::client::CircuitState::Closed);
        c.record_transport_failure(true);
        assert_eq!(c.breaker().state(), crate::client::CircuitState::Open);
    }

    #[test]
    fn plain_client_errors_do_not_trip_the_breaker() {
        let c = client(AclConfig {
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: 30.0,
                record_timeout_only: false,
            },
            ..AclConfig::default()
        });
        c.record_status_failure(404);
        assert_eq!(c.breaker().state(), crate::client::CircuitState::Closed);
        c.record_status_failure(503);
        assert_eq!(c.breaker().state(), crate::client::CircuitState::Open);
    }

    #[tokio::test]
    async fn open_breaker_fails_fast_without_contacting_the_server() {
        // Endpoint is a closed port; if the breaker did not gate the call,
        // the request would fail with a connect error instead.
        let c = client(AclConfig {
            endpoint: "http://127.0.0.1:9".into(),
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: 300.0,
                record_timeout_only: false,
            },
            ..AclConfig::default()
        });
        c.breaker().record_failure();
        let err = c
            .select("SELECT * WHERE { ?s ?p ?o }", None, Some("t-1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "FusekiCircuitOpen");
    }

    #[tokio::test]
    async fn health_reports_without_io() {
        let c = client(AclConfig::default());
        let health = c.health().await.unwrap();
        assert!(health.ok);
        assert_eq!(health.backend, "fuseki");
        assert_eq!(health.dataset, "sf");
    }

    /// Minimal one-connection-per-response HTTP fixture for retry tests.
    async fn serve_responses(
        responses: Vec<(u16, &'static str)>,
    ) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 65536];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status} Test\r\ncontent-type: application/sparql-results+json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (addr, handle)
    }

    fn fast_retry_config(endpoint: String, max_attempts: u32) -> AclConfig {
        AclConfig {
            endpoint,
            retries: crate::config::RetryPolicy {
                max_attempts,
                backoff_seconds: 0.01,
                backoff_multiplier: 1.0,
                jitter_seconds: 0.0,
                retryable_status_codes: None,
            },
            ..AclConfig::default()
        }
    }

    #[tokio::test]
    async fn retry_recovers_when_success_arrives_within_max_attempts() {
        let ok_body = r#"{"head":{"vars":["s"]},"results":{"bindings":[]}}"#;
        let (addr, server) =
            serve_responses(vec![(503, ""), (503, ""), (200, ok_body)]).await;

        let c = client(fast_retry_config(format!("http://{addr}"), 3));
        let result = c
            .select("SELECT * WHERE { ?s ?p ?o }", None, Some("t-retry"))
            .await
            .unwrap();
        assert_eq!(result.stats.status, 200);
        assert_eq!(result.vars, vec!["s".to_string()]);
        assert!(result.bindings.is_empty());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn retry_exhaustion_surfaces_the_final_status() {
        let (addr, server) = serve_responses(vec![(503, ""), (503, "")]).await;

        let c = client(fast_retry_config(format!("http://{addr}"), 2));
        let err = c
            .select("SELECT * WHERE { ?s ?p ?o }", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "FusekiQueryError");
        assert_eq!(err.http_status_hint(), 503);
        assert!(err.is_retryable());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn non_retryable_status_fails_on_first_attempt() {
        let (addr, server) = serve_responses(vec![(400, "syntax error")]).await;

        let c = client(fast_retry_config(format!("http://{addr}"), 3));
        let err = c
            .select("SELECT * WHERE {", None, Some("t-bad"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "BadRequest");
        assert_eq!(err.trace_id(), Some("t-bad"));
        server.await.unwrap();
    }
}
