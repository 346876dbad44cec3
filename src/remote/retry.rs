//! Bounded retries around a [`Transport`].

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use super::{ApiRequest, Method, RemoteError, RemoteResult, Transport, TransportError};

/// How often and how patiently a call is attempted.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    pub max_attempts: usize,
    /// Delay before the second attempt; doubled for each further attempt.
    pub initial_backoff: Duration,
    /// Upper bound on the delay between attempts.
    pub max_backoff: Duration,
    /// Bound on a single attempt.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_backoff)
    }
}

/// Issues requests through a transport, retrying transient failures.
///
/// # Example
///
/// ```no_run
/// use resultsync::remote::{HttpTransport, Method, RemoteCaller, RetryPolicy};
///
/// # async fn demo(transport: HttpTransport) -> resultsync::remote::RemoteResult<()> {
/// let caller = RemoteCaller::new(transport, RetryPolicy::default());
/// let run = caller.call(Method::Get, "test/runs/42", None).await?;
/// println!("{}", run["state"]);
/// # Ok(())
/// # }
/// ```
pub struct RemoteCaller<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: Transport> RemoteCaller<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sends a JSON request.
    pub async fn call(&self, method: Method, path: &str, body: Option<Value>) -> RemoteResult<Value> {
        let mut request = ApiRequest::new(method, path);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(&request).await
    }

    /// Sends a request, attempting it at most `max_attempts` times.
    ///
    /// Only transient failures are retried. The terminal error carries the
    /// method, path and body of the request.
    pub async fn send(&self, request: &ApiRequest) -> RemoteResult<Value> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = tokio::time::timeout(self.policy.request_timeout, self.transport.send(request))
                .await
                .unwrap_or(Err(TransportError::Timeout(self.policy.request_timeout)));

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_transient() {
                return Err(RemoteError::Rejected {
                    method: request.method,
                    path: request.path.clone(),
                    body: request.body.as_ref().map(Value::to_string),
                    source: error,
                });
            }

            if attempt >= max_attempts {
                return Err(RemoteError::Exhausted {
                    method: request.method,
                    path: request.path.clone(),
                    body: request.body.as_ref().map(Value::to_string),
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.policy.backoff(attempt);
            warn!(
                "{} {} attempt {}/{} failed: {}; retrying in {:?}",
                request.method, request.path, attempt, max_attempts, error, delay
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            debug!("{} {} attempt {}", request.method, request.path, attempt + 1);
        }
    }
}
