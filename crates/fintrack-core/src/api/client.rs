//! API client for communicating with the fintrack REST backend.
//!
//! This module provides the `ApiClient` struct, the request/response types it
//! passes around, and the `ResponseInterceptor` hook used to recover from
//! failed responses.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Mints a new access token (and optionally a rotated refresh token)
pub const REFRESH_ENDPOINT: &str = "/api/auth/token/refresh/";

/// Returns the full record of the authenticated user
pub const IDENTITY_ENDPOINT: &str = "/api/user-data/";

/// Invalidates a refresh token server-side
pub const LOGOUT_ENDPOINT: &str = "/api/auth/logout/";

/// Username/password login
pub const LOGIN_ENDPOINT: &str = "/api/auth/login/";

/// Google OAuth authorization code exchange
pub const GOOGLE_LOGIN_ENDPOINT: &str = "/api/auth/google/";

/// Demo account login
pub const DEMO_LOGIN_ENDPOINT: &str = "/api/auth/demo/";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Request / Response
// ============================================================================

/// A request to the backend, kept around so it can be resubmitted.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the client's base URL, e.g. `/api/user-data/`
    pub path: String,
    pub body: Option<serde_json::Value>,
    /// Explicit bearer token; overrides the client's default when set
    pub bearer: Option<String>,
    /// One-shot marker set once the request has been resubmitted after a refresh
    pub retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            bearer: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Attach a JSON body
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

/// A fully buffered backend response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Turn a non-2xx response into the matching `ApiError`
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_status(self.status, &self.body))
        }
    }
}

/// Hook invoked by `ApiClient::send` for every non-successful response.
///
/// The interceptor receives the original request and response and returns the
/// response the caller should see: either the original one unchanged, or the
/// result of a recovery attempt.
#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
    async fn intercept(
        &self,
        client: &ApiClient,
        request: ApiRequest,
        response: ApiResponse,
    ) -> Result<ApiResponse, ApiError>;
}

// ============================================================================
// Client
// ============================================================================

/// API client for the fintrack backend.
/// Clone is cheap and clones share the default bearer token and interceptor.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Arc<str>,
    bearer: Arc<RwLock<Option<String>>>,
    interceptor: Arc<RwLock<Option<Arc<dyn ResponseInterceptor>>>>,
}

impl ApiClient {
    /// Create a new API client with the default request timeout
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url: String = base_url.into();

        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            bearer: Arc::new(RwLock::new(None)),
            interceptor: Arc::new(RwLock::new(None)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Set or clear the bearer token sent with every request
    pub fn set_bearer_token(&self, token: Option<String>) {
        *self.bearer.write().expect("Failed to acquire bearer lock") = token;
    }

    pub fn bearer_token(&self) -> Option<String> {
        self.bearer.read().expect("Failed to acquire bearer lock").clone()
    }

    /// Register the interceptor consulted for failed responses, replacing any previous one
    pub fn set_interceptor(&self, interceptor: Arc<dyn ResponseInterceptor>) {
        *self.interceptor.write().expect("Failed to acquire interceptor lock") = Some(interceptor);
    }

    pub fn clear_interceptor(&self) {
        *self.interceptor.write().expect("Failed to acquire interceptor lock") = None;
    }

    pub fn has_interceptor(&self) -> bool {
        self.interceptor.read().expect("Failed to acquire interceptor lock").is_some()
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn auth_headers(&self, request: &ApiRequest) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        let token = request.bearer.clone().or_else(|| self.bearer_token());
        if let Some(token) = token {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
        Ok(headers)
    }

    /// Send a request without consulting the interceptor.
    /// Non-2xx responses are returned as `Ok`; only transport failures are errors.
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path))
            .headers(self.auth_headers(request)?);
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(method = %request.method, path = %request.path, status = status.as_u16(), "API response");

        Ok(ApiResponse::new(status, body))
    }

    /// Send a request, giving the registered interceptor a chance to recover
    /// from a non-successful response.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let response = self.execute(&request).await?;
        if response.is_success() {
            return Ok(response);
        }

        let interceptor = self
            .interceptor
            .read()
            .expect("Failed to acquire interceptor lock")
            .clone();
        match interceptor {
            Some(interceptor) => interceptor.intercept(self, request, response).await,
            None => Ok(response),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(path)).await?.error_for_status()?.json()
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(ApiRequest::post(path).json(body)?)
            .await?
            .error_for_status()?
            .json()
    }
}
