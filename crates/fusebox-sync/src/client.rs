//! Controller HTTP query client with bounded retry.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::Value;
use smol_str::SmolStr;

use crate::error::QueryError;
use crate::status::{AttemptOutcome, StatusEvent, StatusSink, TracingStatusSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMethod {
    Get,
    Post,
}

/// A single controller request.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub host: SmolStr,
    pub port: u16,
    pub path: String,
    pub method: QueryMethod,
    pub body: Option<Value>,
}

impl QueryRequest {
    #[must_use]
    pub fn get(host: impl Into<SmolStr>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
            method: QueryMethod::Get,
            body: None,
        }
    }

    #[must_use]
    pub fn post(host: impl Into<SmolStr>, port: u16, path: impl Into<String>, body: Value) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
            method: QueryMethod::Post,
            body: Some(body),
        }
    }

    #[must_use]
    pub fn target(&self) -> SmolStr {
        SmolStr::new(format!("{}:{}", self.host, self.port))
    }

    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.path)
    }
}

/// Raw request/response exchange with a controller.
pub trait ControllerTransport: Send + Sync {
    /// Send the request and return the response body text.
    fn send(&self, request: &QueryRequest) -> Result<String, QueryError>;
}

/// `ureq` backed transport.
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport").finish_non_exhaustive()
    }
}

impl HttpTransport {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .build();
        Self { agent }
    }
}

impl ControllerTransport for HttpTransport {
    fn send(&self, request: &QueryRequest) -> Result<String, QueryError> {
        let url = request.url();
        let response = match request.method {
            QueryMethod::Get => self.agent.get(&url).call(),
            QueryMethod::Post => {
                let body = request
                    .body
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_else(|| "{}".to_string());
                self.agent
                    .post(&url)
                    .set("Content-Type", "application/json")
                    .send_string(&body)
            }
        };
        // The controller reports application failures in the body, even
        // alongside an error status, so the body is classified either way.
        let response = match response {
            Ok(response) | Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(err)) => {
                return Err(QueryError::Transport(format!("{url}: {err}").into()));
            }
        };
        response
            .into_string()
            .map_err(|err| QueryError::Transport(format!("{url}: read body: {err}").into()))
    }
}

/// Parse a response body and reject `{success:false}` envelopes.
pub fn classify_response(body: &str) -> Result<Value, QueryError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| QueryError::Parse(format!("invalid JSON: {err}").into()))?;
    if value.get("success").and_then(Value::as_bool) == Some(false) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("controller reported success=false");
        return Err(QueryError::Application(message.into()));
    }
    Ok(value)
}

/// Fixed backoff ladder; attempts = delays + 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    #[must_use]
    pub fn from_millis(delays: &[u64]) -> Self {
        Self::new(delays.iter().copied().map(Duration::from_millis).collect())
    }

    #[must_use]
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    /// Status polling: 1s, 5s, 30s.
    #[must_use]
    pub fn status_default() -> Self {
        Self::from_millis(&[1_000, 5_000, 30_000])
    }

    /// Table fetches: 1s, 5s.
    #[must_use]
    pub fn tables_default() -> Self {
        Self::from_millis(&[1_000, 5_000])
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        u32::try_from(self.delays.len()).unwrap_or(u32::MAX - 1) + 1
    }

    /// Delay before the attempt following `attempt` (1-based), if any remain.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        let index = usize::try_from(attempt).ok()?.checked_sub(1)?;
        self.delays.get(index).copied()
    }

    #[must_use]
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

/// Issues controller requests, classifies responses and retries.
#[derive(Clone)]
pub struct QueryClient {
    transport: Arc<dyn ControllerTransport>,
    sink: Arc<dyn StatusSink>,
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient").finish_non_exhaustive()
    }
}

impl QueryClient {
    #[must_use]
    pub fn new(transport: Arc<dyn ControllerTransport>) -> Self {
        Self {
            transport,
            sink: Arc::new(TracingStatusSink),
        }
    }

    #[must_use]
    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn status_sink(&self) -> &Arc<dyn StatusSink> {
        &self.sink
    }

    /// Run the request through the retry ladder, surfacing the last failure.
    pub fn query(&self, request: &QueryRequest, policy: &RetryPolicy) -> Result<Value, QueryError> {
        let max_attempts = policy.max_attempts();
        let mut attempt = 1;
        loop {
            let result = self
                .transport
                .send(request)
                .and_then(|body| classify_response(&body));
            match result {
                Ok(value) => {
                    self.report(request, attempt, max_attempts, AttemptOutcome::Succeeded);
                    return Ok(value);
                }
                Err(error) => match policy.delay_after(attempt) {
                    Some(delay) => {
                        self.report(
                            request,
                            attempt,
                            max_attempts,
                            AttemptOutcome::Retrying {
                                error,
                                delay,
                            },
                        );
                        if !delay.is_zero() {
                            thread::sleep(delay);
                        }
                        attempt += 1;
                    }
                    None => {
                        self.report(
                            request,
                            attempt,
                            max_attempts,
                            AttemptOutcome::Exhausted {
                                error: error.clone(),
                            },
                        );
                        return Err(error);
                    }
                },
            }
        }
    }

    /// Like [`QueryClient::query`], but resolves to `None` once retries are
    /// exhausted. The failure has already been reported to the status sink.
    pub fn query_or_sentinel(&self, request: &QueryRequest, policy: &RetryPolicy) -> Option<Value> {
        self.query(request, policy).ok()
    }

    fn report(&self, request: &QueryRequest, attempt: u32, max_attempts: u32, outcome: AttemptOutcome) {
        self.sink.report(&StatusEvent::QueryAttempt {
            target: request.target(),
            path: request.path.as_str().into(),
            attempt,
            max_attempts,
            outcome,
        });
    }
}
