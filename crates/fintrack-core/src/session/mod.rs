//! Session lifecycle for the signed-in user.
//!
//! This module provides:
//! - `SessionManager`: owns the user record and token pair, keeps the shared
//!   `ApiClient` authenticated, and refreshes expired access tokens
//! - `SessionSnapshot` / `SessionStatus`: consistent read-only views of the session
//! - `SessionError`: failures surfaced by session operations
//!
//! A session starts `Unknown` while the persisted tokens are validated, then
//! settles into `Authenticated` or `Anonymous`. Concurrent refresh attempts
//! share a single network call; requests that fail with 401 are retried once
//! after a successful refresh.

pub mod error;
mod interceptor;
pub mod manager;
pub mod state;

pub use error::SessionError;
pub use manager::SessionManager;
pub use state::{SessionSnapshot, SessionStatus};
