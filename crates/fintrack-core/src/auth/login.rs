use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::api::{ApiClient, ApiError, DEMO_LOGIN_ENDPOINT, GOOGLE_LOGIN_ENDPOINT, LOGIN_ENDPOINT};

/// Access/refresh credential pair issued by the backend
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

// Tokens stay out of logs
impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Body returned by every login endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    #[serde(default)]
    pub user: Value,
}

/// Login endpoints of the backend.
#[derive(Clone)]
pub struct AuthApi {
    client: ApiClient,
}

impl AuthApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn login_with_password(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let body = json!({ "username": username, "password": password });
        let response: LoginResponse = self.client.post_json(LOGIN_ENDPOINT, &body).await?;
        info!(username = username, "Logged in with password");
        Ok(response)
    }

    /// Exchange a Google OAuth authorization code for a session
    pub async fn login_with_google(&self, code: &str) -> Result<LoginResponse, ApiError> {
        let body = json!({ "code": code });
        let response: LoginResponse = self.client.post_json(GOOGLE_LOGIN_ENDPOINT, &body).await?;
        info!("Logged in with Google");
        Ok(response)
    }

    pub async fn demo_login(&self) -> Result<LoginResponse, ApiError> {
        let response: LoginResponse = self.client.post_json(DEMO_LOGIN_ENDPOINT, &json!({})).await?;
        info!("Logged in to demo account");
        Ok(response)
    }
}
