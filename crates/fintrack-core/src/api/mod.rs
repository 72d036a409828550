//! REST API client module for the fintrack backend.
//!
//! This module provides the `ApiClient` used for every backend call. The
//! client carries a shared default bearer token and an optional
//! `ResponseInterceptor` that gets a chance to recover from failed
//! responses (the session layer uses it for refresh-and-retry on 401).

pub mod client;
pub mod error;

pub use client::{
    ApiClient, ApiRequest, ApiResponse, ResponseInterceptor, DEMO_LOGIN_ENDPOINT,
    GOOGLE_LOGIN_ENDPOINT, IDENTITY_ENDPOINT, LOGIN_ENDPOINT, LOGOUT_ENDPOINT, REFRESH_ENDPOINT,
};
pub use error::ApiError;
