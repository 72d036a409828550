//! Authentication calls that produce a fresh session.
//!
//! Each login flow (credentials, Google OAuth code exchange, demo account)
//! returns a `LoginResponse` carrying the token pair and the user record,
//! which is what `SessionManager::login` consumes.

pub mod login;

pub use login::{AuthApi, LoginResponse, TokenPair};
