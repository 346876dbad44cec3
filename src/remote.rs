//! Remote test-management access.
//!
//! Layers, innermost first:
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ TestManagementApi (DevOpsClient)              │  typed operations
//! ├───────────────────────────────────────────────┤
//! │ RemoteCaller                                  │  timeout + retry
//! ├───────────────────────────────────────────────┤
//! │ Transport (HttpTransport)                     │  one HTTP exchange
//! └───────────────────────────────────────────────┘
//! ```
//!
//! A [`Transport`] performs exactly one request and classifies failures as
//! transient or not. [`RemoteCaller`] bounds each attempt with a timeout and
//! retries transient failures with exponential backoff. [`DevOpsClient`]
//! builds Azure DevOps requests and extracts the fields the pipeline needs.
//!
//! The pipeline depends only on [`TestManagementApi`], so tests replace the
//! whole stack with an in-memory fake.

pub mod devops;
pub mod http;
pub mod retry;
pub mod steps;

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

pub use devops::DevOpsClient;
pub use http::HttpTransport;
pub use retry::{RemoteCaller, RetryPolicy};

use crate::format::Outcome;

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// HTTP method of a remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body encoding. Work item updates must be sent as JSON Patch documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    JsonPatch,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::JsonPatch => "application/json-patch+json",
        }
    }
}

/// One remote operation, relative to the project API root.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub content_type: ContentType,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            content_type: ContentType::Json,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    /// Attaches a JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self.content_type = ContentType::Json;
        self
    }

    /// Attaches a JSON Patch body.
    pub fn json_patch(mut self, body: Value) -> Self {
        self.body = Some(body);
        self.content_type = ContentType::JsonPatch;
        self
    }
}

/// Failure of a single transport attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Connection problems and 408/429/5xx responses.
    #[error("{0}")]
    Transient(String),

    /// The attempt did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The service refused the request; repeating it will not help.
    #[error("HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The response body was not JSON.
    #[error("invalid response body: {0}")]
    InvalidBody(String),

    /// The HTTP client could not be set up from the settings.
    #[error("client setup failed: {0}")]
    Setup(String),
}

impl TransportError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_) | TransportError::Timeout(_))
    }
}

/// Performs one request against the remote service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request and returns the decoded body (`Null` when empty).
    async fn send(&self, request: &ApiRequest) -> Result<Value, TransportError>;
}

/// Terminal remote failure, after retries where they apply.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Every attempt failed transiently.
    #[error("{method} {path} failed after {attempts} attempt(s): {source}{}", body_suffix(.body))]
    Exhausted {
        method: Method,
        path: String,
        body: Option<String>,
        attempts: usize,
        #[source]
        source: TransportError,
    },

    /// The service rejected the request.
    #[error("{method} {path} was rejected: {source}{}", body_suffix(.body))]
    Rejected {
        method: Method,
        path: String,
        body: Option<String>,
        #[source]
        source: TransportError,
    },

    /// The response lacks a field the operation depends on.
    #[error("{method} {path} returned an unexpected response: {reason}")]
    UnexpectedResponse {
        method: Method,
        path: String,
        reason: String,
    },

    /// A request body could not be built.
    #[error("failed to encode {what}: {reason}")]
    Encode { what: &'static str, reason: String },
}

fn body_suffix(body: &Option<String>) -> String {
    match body {
        Some(body) => format!(" (request body: {})", body),
        None => String::new(),
    }
}

/// A named remote entity such as a suite or a test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedRef {
    pub id: u64,
    pub name: String,
}

impl NamedRef {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdRef {
    pub id: String,
}

/// One entry of the batched run results.
///
/// Serializes to the shape the test results endpoint expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseResult {
    #[serde(skip)]
    pub test_suite_id: u64,
    pub test_case: IdRef,
    pub test_point: IdRef,
    pub test_case_title: String,
    pub outcome: Outcome,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl CaseResult {
    pub fn new(
        test_suite_id: u64,
        test_case_id: u64,
        test_point_id: u64,
        title: impl Into<String>,
        outcome: Outcome,
    ) -> Self {
        Self {
            test_suite_id,
            test_case: IdRef {
                id: test_case_id.to_string(),
            },
            test_point: IdRef {
                id: test_point_id.to_string(),
            },
            test_case_title: title.into(),
            outcome,
            state: "Completed",
            stack_trace: None,
        }
    }

    pub fn with_stack_trace(mut self, trace: Option<String>) -> Self {
        self.stack_trace = trace;
        self
    }

    pub fn test_case_id(&self) -> &str {
        &self.test_case.id
    }
}

/// Operations the publishing pipeline needs from the test-management system.
///
/// Plan-level identifiers are bound at construction; suites and cases are
/// addressed by the numeric IDs returned from earlier calls.
#[async_trait]
pub trait TestManagementApi: Send + Sync {
    /// Creates an automated test run and returns its ID.
    async fn create_run(&self, name: &str) -> RemoteResult<u64>;

    /// Lists the direct child suites of `parent_suite`.
    async fn child_suites(&self, parent_suite: u64) -> RemoteResult<Vec<NamedRef>>;

    /// Creates a static suite under `parent_suite`.
    async fn create_suite(&self, parent_suite: u64, name: &str) -> RemoteResult<u64>;

    /// Lists the test cases contained in a suite.
    async fn suite_test_cases(&self, suite: u64) -> RemoteResult<Vec<NamedRef>>;

    /// Creates a test case work item and adds it to `suite`.
    async fn create_test_case(&self, suite: u64, title: &str) -> RemoteResult<u64>;

    /// Replaces the steps of a test case.
    async fn set_test_steps(&self, test_case: u64, steps: &[String]) -> RemoteResult<()>;

    /// Issue identifiers already linked to a test case as `TestedBy`.
    async fn linked_issues(&self, test_case: u64) -> RemoteResult<BTreeSet<String>>;

    /// Links an issue to a test case.
    async fn link_issue(&self, test_case: u64, issue: &str) -> RemoteResult<()>;

    /// Test point binding `test_case` to `suite`, if any.
    async fn test_point(&self, suite: u64, test_case: u64) -> RemoteResult<Option<u64>>;

    /// Submits results against a run in one request.
    async fn publish_results(&self, run: u64, results: &[CaseResult]) -> RemoteResult<()>;

    /// Marks a run as completed.
    async fn complete_run(&self, run: u64) -> RemoteResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_case_result_wire_shape() {
        let result = CaseResult::new(3, 11, 21, "Refund", Outcome::Failed)
            .with_stack_trace(Some("boom".into()));

        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "testCase": {"id": "11"},
                "testPoint": {"id": "21"},
                "testCaseTitle": "Refund",
                "outcome": "Failed",
                "state": "Completed",
                "stackTrace": "boom"
            })
        );
    }

    #[test]
    fn test_passed_result_omits_stack_trace() {
        let value = serde_json::to_value(CaseResult::new(1, 2, 3, "Pay", Outcome::Passed)).unwrap();
        assert!(value.get("stackTrace").is_none());
    }

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Transient("HTTP 503".into()).is_transient());
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(
            !TransportError::Rejected {
                status: 404,
                message: "not found".into()
            }
            .is_transient()
        );
        assert!(!TransportError::InvalidBody("<html>".into()).is_transient());
    }

    #[test]
    fn test_exhausted_error_names_request() {
        let err = RemoteError::Exhausted {
            method: Method::Post,
            path: "test/runs".into(),
            body: Some(r#"{"name":"nightly"}"#.into()),
            attempts: 3,
            source: TransportError::Transient("HTTP 503".into()),
        };
        let message = err.to_string();
        assert!(message.contains("POST test/runs failed after 3 attempt(s)"));
        assert!(message.contains(r#"{"name":"nightly"}"#));
    }
}
