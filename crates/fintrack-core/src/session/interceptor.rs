use std::sync::Weak;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::api::{ApiClient, ApiError, ApiRequest, ApiResponse, ResponseInterceptor};

use super::manager::{Inner, SessionManager};

/// Recovers from 401 responses by refreshing the access token and
/// resubmitting the request once.
///
/// Recovery is skipped for auth endpoints, for requests already retried, and
/// when there is no refresh token; in those cases, and when the refresh itself
/// fails, the original response is returned unchanged.
pub(crate) struct RefreshInterceptor {
    session: Weak<Inner>,
}

impl RefreshInterceptor {
    pub(crate) fn new(session: Weak<Inner>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ResponseInterceptor for RefreshInterceptor {
    async fn intercept(
        &self,
        client: &ApiClient,
        request: ApiRequest,
        response: ApiResponse,
    ) -> Result<ApiResponse, ApiError> {
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        if request.retried {
            debug!(path = %request.path, "Request already retried, not refreshing again");
            return Ok(response);
        }
        let Some(inner) = self.session.upgrade() else {
            return Ok(response);
        };
        if inner.is_auth_endpoint(&request.path) {
            debug!(path = %request.path, "401 from auth endpoint, skipping refresh");
            return Ok(response);
        }

        let session = SessionManager::from_inner(inner);
        if session.refresh_token().is_none() {
            return Ok(response);
        }

        let mut retry = request;
        retry.retried = true;
        match session.refresh_access_token().await {
            Ok(token) => {
                retry.bearer = Some(token);
                debug!(method = %retry.method, path = %retry.path, "Retrying request after token refresh");
                client.execute(&retry).await
            }
            Err(e) => {
                warn!(path = %retry.path, error = %e, "Refresh failed, returning original 401");
                Ok(response)
            }
        }
    }
}
