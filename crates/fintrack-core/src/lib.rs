//! Core library for the fintrack personal finance client.
//!
//! This crate owns everything the client needs to talk to the fintrack
//! backend on behalf of a signed-in user:
//!
//! - `ApiClient`: shared HTTP client with a default bearer token and a
//!   pluggable response interceptor
//! - `SessionManager`: the session lifecycle (bootstrap, login, logout,
//!   silent token refresh and retry-after-refresh)
//! - `TokenStore`: persistent storage for the token pair and user record
//! - `Config`: on-disk configuration with environment overrides

pub mod api;
pub mod auth;
pub mod config;
pub mod session;
pub mod store;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, ResponseInterceptor};
pub use auth::{AuthApi, LoginResponse, TokenPair};
pub use config::{Config, StorageKind};
pub use session::{SessionError, SessionManager, SessionSnapshot, SessionStatus};
pub use store::{FileStore, KeyringStore, MemoryStore, StoreError, TokenStore};
