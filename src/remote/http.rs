//! HTTP transport for the Azure DevOps REST API.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, info};

use super::{ApiRequest, Method, Transport, TransportError};
use crate::config::RemoteSettings;

/// Sends requests to `{base_url}/{organization}/{project}/_apis/{path}`.
///
/// Authenticates with HTTP Basic `user:token` and pins the API version via
/// the `Accept` header.
pub struct HttpTransport {
    client: reqwest::Client,
    api_root: String,
}

impl HttpTransport {
    /// Builds a transport for the configured project.
    pub fn new(settings: &RemoteSettings) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        let credentials = STANDARD.encode(format!("{}:{}", settings.user_name, settings.token));
        let mut auth = HeaderValue::from_str(&format!("Basic {}", credentials))
            .map_err(|e| TransportError::Setup(format!("invalid credentials header: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let accept = HeaderValue::from_str(&format!("application/json; api-version={}", settings.api_version))
            .map_err(|e| TransportError::Setup(format!("invalid api version: {}", e)))?;
        headers.insert(ACCEPT, accept);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Setup(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_root: api_root(settings),
        })
    }

    /// Absolute URL for a path relative to the project API root.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_root, path)
    }
}

/// `{base_url}/{organization}/{project}/_apis/`
pub fn api_root(settings: &RemoteSettings) -> String {
    format!(
        "{}/{}/{}/_apis/",
        settings.base_url, settings.organization, settings.project
    )
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<Value, TransportError> {
        let url = self.url(&request.path);
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
        };

        let mut builder = self
            .client
            .request(method, &url)
            .header(CONTENT_TYPE, request.content_type.as_str());
        builder = match &request.body {
            Some(body) => builder.body(body.to_string()),
            // Some endpoints (adding a case to a suite) take no body at all.
            None if request.method == Method::Post => builder.body(""),
            None => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Transient(format!("request error: {}", e)))?;

        let status = response.status();
        info!("Request: {} {} {}", request.method, url, status.as_u16());

        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Transient(format!("read error: {}", e)))?;

        classify(status, text)
    }
}

/// Maps a response to its JSON body or a transport error.
///
/// 408, 429 and 5xx are transient; any other failure status is a rejection.
/// An empty success body is `Null`.
fn classify(status: StatusCode, text: String) -> Result<Value, TransportError> {
    if !status.is_success() {
        let code = status.as_u16();
        let message = if text.is_empty() {
            status.to_string()
        } else {
            text
        };
        return if code == 408 || code == 429 || status.is_server_error() {
            Err(TransportError::Transient(format!("HTTP {}: {}", code, message)))
        } else {
            Err(TransportError::Rejected {
                status: code,
                message,
            })
        };
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    debug!("Response body: {} bytes", text.len());
    serde_json::from_str(&text).map_err(|e| TransportError::InvalidBody(e.to_string()))
}
