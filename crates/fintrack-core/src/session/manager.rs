//! The session manager: bootstrap, login/logout, and silent token refresh.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{
    ApiClient, ApiError, ApiRequest, GOOGLE_LOGIN_ENDPOINT, IDENTITY_ENDPOINT, LOGIN_ENDPOINT,
    LOGOUT_ENDPOINT, REFRESH_ENDPOINT,
};
use crate::auth::{AuthApi, LoginResponse, TokenPair};
use crate::store::{StoreError, TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY};

use super::error::RefreshFailure;
use super::interceptor::RefreshInterceptor;
use super::state::{SessionSnapshot, SessionState, SessionStatus};
use super::SessionError;

/// Endpoints whose 401 responses must never trigger a refresh.
/// Matched as substrings of the request path.
const DEFAULT_AUTH_ENDPOINTS: [&str; 4] = [
    REFRESH_ENDPOINT,
    LOGIN_ENDPOINT,
    LOGOUT_ENDPOINT,
    GOOGLE_LOGIN_ENDPOINT,
];

type RefreshResult = Result<String, RefreshFailure>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
    /// Present only when the backend rotates refresh tokens
    #[serde(default)]
    refresh: Option<String>,
}

pub(crate) struct Inner {
    api: ApiClient,
    store: Arc<dyn TokenStore>,
    state: RwLock<SessionState>,
    status_tx: watch::Sender<SessionStatus>,
    refresh_in_flight: Mutex<Option<SharedRefresh>>,
    bootstrap_started: AtomicBool,
    auth_endpoints: Vec<String>,
}

impl Inner {
    pub(crate) fn is_auth_endpoint(&self, path: &str) -> bool {
        self.auth_endpoints.iter().any(|endpoint| path.contains(endpoint.as_str()))
    }
}

/// Owns the current session and keeps the shared `ApiClient` authenticated.
/// Clone is cheap; clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a manager and hydrate it from `store`.
    ///
    /// The session starts in `SessionStatus::Unknown` until `bootstrap` has
    /// validated the persisted tokens against the backend.
    pub fn new(api: ApiClient, store: Arc<dyn TokenStore>) -> Self {
        Self::with_auth_endpoints(api, store, Vec::new())
    }

    /// Like `new`, with extra path patterns excluded from refresh-and-retry
    pub fn with_auth_endpoints(
        api: ApiClient,
        store: Arc<dyn TokenStore>,
        extra_auth_endpoints: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut state = hydrate(store.as_ref());
        state.loading = true;

        let mut auth_endpoints: Vec<String> = DEFAULT_AUTH_ENDPOINTS.iter().map(|e| e.to_string()).collect();
        for endpoint in extra_auth_endpoints {
            if !auth_endpoints.contains(&endpoint) {
                auth_endpoints.push(endpoint);
            }
        }

        api.set_bearer_token(state.access_token.clone());
        let (status_tx, _) = watch::channel(state.status());

        Self {
            inner: Arc::new(Inner {
                api,
                store,
                state: RwLock::new(state),
                status_tx,
                refresh_in_flight: Mutex::new(None),
                bootstrap_started: AtomicBool::new(false),
                auth_endpoints,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    /// The shared client. Requests sent through it carry the current access
    /// token and, once `start` has been called, are retried after a refresh on 401.
    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    // ===== Lifecycle =====

    /// Register the refresh-and-retry interceptor on the shared client
    pub fn start(&self) {
        let interceptor = RefreshInterceptor::new(Arc::downgrade(&self.inner));
        self.inner.api.set_interceptor(Arc::new(interceptor));
        debug!("Session interceptor registered");
    }

    /// Unregister the interceptor. Safe to call when not started.
    pub fn stop(&self) {
        self.inner.api.clear_interceptor();
        debug!("Session interceptor removed");
    }

    pub fn is_started(&self) -> bool {
        self.inner.api.has_interceptor()
    }

    // ===== Read access =====

    pub fn snapshot(&self) -> SessionSnapshot {
        self.read_state().snapshot()
    }

    pub fn status(&self) -> SessionStatus {
        self.read_state().status()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read_state().user.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.read_state().loading
    }

    pub fn user(&self) -> Option<Value> {
        self.read_state().user.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read_state().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read_state().refresh_token.clone()
    }

    /// Watch status transitions. Only changes are published.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, SessionState> {
        self.inner.state.read().expect("Failed to acquire session lock")
    }

    /// Apply a mutation under the write lock, then sync the bearer header and
    /// publish the status before the lock is released.
    fn mutate<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.inner.state.write().expect("Failed to acquire session lock");
        let result = f(&mut state);

        if self.inner.api.bearer_token() != state.access_token {
            self.inner.api.set_bearer_token(state.access_token.clone());
        }
        let status = state.status();
        self.inner.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });

        result
    }

    // ===== Bootstrap =====

    /// Validate the persisted session against the backend.
    ///
    /// Runs once per manager; later calls wait for the first one to finish.
    /// `loading` turns false when this completes, whatever the outcome.
    pub async fn bootstrap(&self) -> SessionStatus {
        if self.inner.bootstrap_started.swap(true, Ordering::SeqCst) {
            return self.wait_until_decided().await;
        }

        self.validate_persisted_session().await;

        self.mutate(|state| {
            state.loading = false;
            state.status()
        })
    }

    async fn wait_until_decided(&self) -> SessionStatus {
        let mut rx = self.subscribe();
        let status = match rx.wait_for(|status| *status != SessionStatus::Unknown).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        status
    }

    async fn validate_persisted_session(&self) {
        let Some(access_token) = self.access_token() else {
            if self.refresh_token().is_some() || self.is_authenticated() {
                self.clear_local("incomplete persisted session");
            }
            debug!("No persisted session");
            return;
        };

        match self.fetch_identity(&access_token).await {
            Ok(user) => {
                self.store_fresh_user(user);
                info!("Restored persisted session");
                return;
            }
            Err(e) => warn!(error = %e, "Identity check with persisted token failed"),
        }

        if self.refresh_token().is_none() {
            self.clear_local("identity check failed without refresh token");
            return;
        }

        // A failed refresh has already cleared the session
        let access_token = match self.refresh_access_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Bootstrap refresh failed");
                return;
            }
        };

        match self.fetch_identity(&access_token).await {
            Ok(user) => {
                self.store_fresh_user(user);
                info!("Restored persisted session after token refresh");
            }
            Err(e) => {
                warn!(error = %e, "Identity check failed after refresh");
                self.logout().await;
            }
        }
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<Value, ApiError> {
        let request = ApiRequest::get(IDENTITY_ENDPOINT).bearer(access_token);
        self.inner.api.execute(&request).await?.error_for_status()?.json()
    }

    fn store_fresh_user(&self, user: Value) {
        if let Err(e) = self.update_user(user) {
            warn!(error = %e, "Failed to persist refreshed user record");
        }
    }

    // ===== Mutations =====

    /// Install a new session from a successful authentication call.
    ///
    /// All three values are persisted first; if that fails the keys already
    /// written are rolled back and the in-memory session is left untouched.
    /// Readers never observe a partial update.
    pub fn login(&self, tokens: TokenPair, user: Value) -> Result<(), SessionError> {
        let serialized_user = serde_json::to_string(&user).map_err(StoreError::from)?;

        self.mutate(|state| -> Result<(), SessionError> {
            if let Err(e) = self.persist_session(&tokens, &serialized_user) {
                warn!(error = %e, "Failed to persist new session, restoring previous values");
                self.restore_persisted(state);
                return Err(e.into());
            }

            state.access_token = Some(tokens.access);
            state.refresh_token = Some(tokens.refresh);
            state.user = Some(user);
            Ok(())
        })?;

        info!("Session established");
        Ok(())
    }

    fn persist_session(&self, tokens: &TokenPair, serialized_user: &str) -> Result<(), StoreError> {
        let store = self.inner.store.as_ref();
        store.set(ACCESS_TOKEN_KEY, &tokens.access)?;
        store.set(REFRESH_TOKEN_KEY, &tokens.refresh)?;
        store.set(USER_KEY, serialized_user)
    }

    /// Write the in-memory session back to the store
    fn restore_persisted(&self, state: &SessionState) {
        let user = state.user.as_ref().map(Value::to_string);
        let previous = [
            (ACCESS_TOKEN_KEY, state.access_token.as_deref()),
            (REFRESH_TOKEN_KEY, state.refresh_token.as_deref()),
            (USER_KEY, user.as_deref()),
        ];

        let store = self.inner.store.as_ref();
        for (key, value) in previous {
            let result = match value {
                Some(value) => store.set(key, value),
                None => store.remove(key),
            };
            if let Err(e) = result {
                warn!(key = key, error = %e, "Failed to restore persisted session value");
            }
        }
    }

    /// Replace the user record without touching the tokens
    pub fn update_user(&self, user: Value) -> Result<(), SessionError> {
        let serialized_user = serde_json::to_string(&user).map_err(StoreError::from)?;

        self.mutate(|state| -> Result<(), SessionError> {
            self.inner.store.set(USER_KEY, &serialized_user)?;
            state.user = Some(user);
            Ok(())
        })
    }

    /// Re-fetch the user record from the backend and store it
    pub async fn refresh_user(&self) -> Result<Value, SessionError> {
        let user: Value = self.inner.api.get_json(IDENTITY_ENDPOINT).await?;
        self.update_user(user.clone())?;
        Ok(user)
    }

    /// End the session.
    ///
    /// Local state is cleared before the server is contacted, so dropping the
    /// returned future never leaves the session in place. The server-side
    /// invalidation is best effort and its failure is only logged. Calling
    /// this without a session is harmless.
    pub async fn logout(&self) {
        let (access_token, refresh_token) = {
            let state = self.read_state();
            (state.access_token.clone(), state.refresh_token.clone())
        };
        self.clear_local("logout");

        match self.invalidate_remote(access_token, refresh_token).await {
            Ok(()) => debug!("Refresh token invalidated server-side"),
            Err(e) => warn!(error = %e, "Server-side logout failed"),
        }
    }

    /// The bearer is passed explicitly since the client default is already cleared
    async fn invalidate_remote(
        &self,
        access_token: Option<String>,
        refresh_token: Option<String>,
    ) -> Result<(), ApiError> {
        let mut request = ApiRequest::post(LOGOUT_ENDPOINT).json(&json!({ "refresh": refresh_token }))?;
        if let Some(token) = access_token {
            request = request.bearer(token);
        }
        self.inner.api.execute(&request).await?.error_for_status()?;
        Ok(())
    }

    /// Drop the session locally: persisted keys, memory, and the bearer header
    fn clear_local(&self, reason: &str) {
        self.mutate(|state| {
            if let Err(e) = self.inner.store.clear_session() {
                warn!(error = %e, "Failed to clear persisted session");
            }
            state.clear();
        });
        info!(reason = reason, "Session cleared");
    }

    // ===== Login flows =====

    pub async fn login_with_password(&self, username: &str, password: &str) -> Result<Value, SessionError> {
        let response = self.auth_api().login_with_password(username, password).await?;
        self.complete_login(response).await
    }

    pub async fn login_with_google(&self, code: &str) -> Result<Value, SessionError> {
        let response = self.auth_api().login_with_google(code).await?;
        self.complete_login(response).await
    }

    pub async fn demo_login(&self) -> Result<Value, SessionError> {
        let response = self.auth_api().demo_login().await?;
        self.complete_login(response).await
    }

    fn auth_api(&self) -> AuthApi {
        AuthApi::new(self.inner.api.clone())
    }

    /// Fetch the user record first if the login response omitted it, so the
    /// session is installed in one step.
    async fn complete_login(&self, response: LoginResponse) -> Result<Value, SessionError> {
        let user = if response.user.is_null() {
            self.fetch_identity(&response.tokens.access).await?
        } else {
            response.user
        };
        self.login(response.tokens, user.clone())?;
        Ok(user)
    }

    // ===== Silent refresh =====

    /// Mint a new access token with the refresh token.
    ///
    /// At most one refresh call is in flight per manager: concurrent callers
    /// join the pending attempt and all observe its outcome. On failure the
    /// session is cleared.
    pub async fn refresh_access_token(&self) -> Result<String, SessionError> {
        let pending = {
            let mut slot = self
                .inner
                .refresh_in_flight
                .lock()
                .expect("Failed to acquire refresh lock");

            match slot.as_ref() {
                Some(pending) => {
                    debug!("Joining in-flight token refresh");
                    pending.clone()
                }
                None => {
                    let Some(refresh_token) = self.refresh_token() else {
                        drop(slot);
                        self.clear_local("refresh requested without refresh token");
                        return Err(SessionError::Unauthenticated);
                    };
                    let pending = run_refresh(Arc::downgrade(&self.inner), refresh_token)
                        .boxed()
                        .shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        pending.await.map_err(SessionError::from)
    }

    /// Apply a successful refresh, unless the session changed while the call was in flight
    fn apply_refresh(&self, used_refresh_token: &str, response: RefreshResponse) -> RefreshResult {
        self.mutate(|state| {
            if state.refresh_token.as_deref() != Some(used_refresh_token) {
                debug!("Session changed during refresh, discarding result");
                return state.access_token.clone().ok_or(RefreshFailure::Unauthenticated);
            }

            let store = self.inner.store.as_ref();
            if let Err(e) = store.set(ACCESS_TOKEN_KEY, &response.access) {
                warn!(error = %e, "Failed to persist refreshed access token");
            }
            if let Some(ref rotated) = response.refresh {
                if let Err(e) = store.set(REFRESH_TOKEN_KEY, rotated) {
                    warn!(error = %e, "Failed to persist rotated refresh token");
                }
                state.refresh_token = Some(rotated.clone());
            }
            state.access_token = Some(response.access.clone());
            Ok(response.access)
        })
    }

    /// Clear the session after a rejected refresh, unless it was replaced meanwhile
    fn fail_refresh(&self, used_refresh_token: &str, reason: String) -> RefreshResult {
        let cleared = self.mutate(|state| {
            if state.refresh_token.as_deref() != Some(used_refresh_token) {
                return false;
            }
            if let Err(e) = self.inner.store.clear_session() {
                warn!(error = %e, "Failed to clear persisted session");
            }
            state.clear();
            true
        });
        if cleared {
            info!(reason = "token refresh failed", "Session cleared");
        }
        Err(RefreshFailure::Rejected(reason))
    }
}

/// Body of the shared refresh future.
///
/// Holds only a weak handle to the session so an abandoned attempt does not
/// keep the manager alive, and empties the in-flight slot when done.
async fn run_refresh(inner: Weak<Inner>, refresh_token: String) -> RefreshResult {
    let result = perform_refresh(&inner, &refresh_token).await;
    if let Some(inner) = inner.upgrade() {
        inner
            .refresh_in_flight
            .lock()
            .expect("Failed to acquire refresh lock")
            .take();
    }
    result
}

async fn perform_refresh(inner: &Weak<Inner>, refresh_token: &str) -> RefreshResult {
    let api = match inner.upgrade() {
        Some(inner) => inner.api.clone(),
        None => return Err(RefreshFailure::Unauthenticated),
    };

    debug!("Refreshing access token");
    let outcome = match ApiRequest::post(REFRESH_ENDPOINT).json(&json!({ "refresh": refresh_token })) {
        Ok(request) => match api.execute(&request).await {
            Ok(response) => response
                .error_for_status()
                .and_then(|response| response.json::<RefreshResponse>()),
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    };

    let Some(inner) = inner.upgrade() else {
        return Err(RefreshFailure::Unauthenticated);
    };
    let session = SessionManager::from_inner(inner);

    match outcome {
        Ok(response) => {
            let rotated = response.refresh.is_some();
            let result = session.apply_refresh(refresh_token, response);
            if result.is_ok() {
                info!(rotated = rotated, "Access token refreshed");
            }
            result
        }
        Err(e) => {
            warn!(error = %e, "Token refresh rejected");
            session.fail_refresh(refresh_token, e.to_string())
        }
    }
}

/// Read the persisted session. Storage errors and a corrupt user record
/// degrade to an empty value rather than failing construction.
fn hydrate(store: &dyn TokenStore) -> SessionState {
    let read = |key: &str| match store.get(key) {
        Ok(value) => value,
        Err(e) => {
            warn!(key = key, error = %e, "Failed to read persisted session value");
            None
        }
    };

    let user = read(USER_KEY).and_then(|raw| match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Null) => None,
        Ok(user) => Some(user),
        Err(e) => {
            warn!(error = %e, "Ignoring corrupt persisted user record");
            None
        }
    });

    SessionState {
        user,
        access_token: read(ACCESS_TOKEN_KEY),
        refresh_token: read(REFRESH_TOKEN_KEY),
        loading: false,
    }
}
