use thiserror::Error;

use crate::api::ApiError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Not authenticated - no refresh token available")]
    Unauthenticated,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error(transparent)]
    Request(#[from] ApiError),

    #[error("Failed to persist session: {0}")]
    Storage(#[from] StoreError),
}

/// Outcome shared by every waiter of a single refresh attempt.
/// Kept `Clone` so one result can be handed to all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RefreshFailure {
    Unauthenticated,
    Rejected(String),
}

impl From<RefreshFailure> for SessionError {
    fn from(failure: RefreshFailure) -> Self {
        match failure {
            RefreshFailure::Unauthenticated => SessionError::Unauthenticated,
            RefreshFailure::Rejected(reason) => SessionError::RefreshFailed(reason),
        }
    }
}
