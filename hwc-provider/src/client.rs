//! HTTP client for HuaweiCloud service APIs
//!
//! Every service lives on its own host (`https://rds.<region>.myhuaweicloud.com`, ...), so
//! requests name the service and the client resolves the host from an endpoint template.

use std::time::Duration;

use async_trait::async_trait;
use hwc_core::waiter::ApiError;
use log::{debug, trace};
use reqwest::Method;
use serde_json::Value;

/// Default endpoint template; `{service}` and `{region}` are substituted per request
pub const DEFAULT_ENDPOINT_TEMPLATE: &str = "https://{service}.{region}.myhuaweicloud.com";

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying the IAM token
pub const AUTH_HEADER: &str = "X-Auth-Token";

/// Connection settings for [`HttpClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub region: String,
    pub project_id: String,
    pub token: String,
    pub endpoint_template: String,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(
        region: impl Into<String>,
        project_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            project_id: project_id.into(),
            token: token.into(),
            endpoint_template: DEFAULT_ENDPOINT_TEMPLATE.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Send every service to a fixed or templated endpoint (e.g. a proxy or test server)
    pub fn with_endpoint(mut self, endpoint_template: impl Into<String>) -> Self {
        self.endpoint_template = endpoint_template.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Transport used by the provider and the status probes
///
/// Paths are absolute (`/v3/{project_id}/instances`) with placeholders already rendered.
/// Non-2xx responses come back as [`ApiError`] carrying the HTTP status and the service's
/// error code, so callers can tell not-found and transitional rejections apart.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Project the client is scoped to
    fn project_id(&self) -> &str;

    /// Send one request and decode the JSON response (`Value::Null` for an empty body)
    async fn send(
        &self,
        method: Method,
        service: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError>;

    async fn get(&self, service: &str, path: &str) -> Result<Value, ApiError> {
        self.send(Method::GET, service, path, None).await
    }

    async fn post(&self, service: &str, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.send(Method::POST, service, path, Some(body)).await
    }

    async fn put(&self, service: &str, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.send(Method::PUT, service, path, Some(body)).await
    }

    async fn patch(&self, service: &str, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.send(Method::PATCH, service, path, Some(body)).await
    }

    async fn delete(&self, service: &str, path: &str) -> Result<Value, ApiError> {
        self.send(Method::DELETE, service, path, None).await
    }
}

/// reqwest-backed [`ApiClient`] authenticating with an IAM token
pub struct HttpClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::new(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Base URL for a service
    pub fn base_url(&self, service: &str) -> String {
        self.config
            .endpoint_template
            .replace("{service}", service)
            .replace("{region}", &self.config.region)
            .trim_end_matches('/')
            .to_string()
    }
}

#[async_trait]
impl ApiClient for HttpClient {
    fn project_id(&self) -> &str {
        &self.config.project_id
    }

    async fn send(
        &self,
        method: Method,
        service: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base_url(service), path);
        debug!("{} {}", method, url);

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(AUTH_HEADER, &self.config.token);
        if let Some(body) = body {
            trace!("request body: {}", body);
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::new(format!("{} {} failed: {}", method, url, e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::new(format!("failed to read response from {}: {}", url, e)))?;

        if !status.is_success() {
            debug!("{} {} -> {}", method, url, status);
            return Err(parse_error(status.as_u16(), &text));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ApiError::new(format!("invalid JSON from {}: {}", url, e)))
    }
}

/// Map an error response onto [`ApiError`]
///
/// Services disagree on the envelope: most use `{"error_code", "error_msg"}`, some nest it
/// as `{"error": {"code", "message"}}` and DNS uses `{"code", "message"}`.
pub fn parse_error(status: u16, body: &str) -> ApiError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let field = |pointers: &[&str]| {
        parsed.as_ref().and_then(|v| {
            pointers
                .iter()
                .find_map(|p| v.pointer(p).and_then(Value::as_str).map(str::to_string))
        })
    };

    let code = field(&["/error_code", "/error/code", "/code"]);
    let message = field(&["/error_msg", "/error/message", "/message"])
        .unwrap_or_else(|| match body.trim() {
            "" => format!("request failed with HTTP {}", status),
            raw => raw.to_string(),
        });

    let err = ApiError::new(message).with_status(status);
    match code {
        Some(code) => err.with_code(code),
        None => err,
    }
}
