//! Persistent storage for the session's token pair and user record.
//!
//! The session layer only needs a tiny synchronous key-value interface, so
//! each backend implements `TokenStore`:
//!
//! - `FileStore`: JSON file in the user cache directory
//! - `KeyringStore`: OS keychain via `keyring`
//! - `MemoryStore`: process-local, used for tests and throwaway sessions

pub mod error;
pub mod file;
pub mod keychain;
pub mod memory;

pub use error::StoreError;
pub use file::FileStore;
pub use keychain::KeyringStore;
pub use memory::MemoryStore;

/// Key holding the access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Key holding the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Key holding the JSON-serialized user record
pub const USER_KEY: &str = "user";

/// All keys owned by a session; removed together on logout
pub const SESSION_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY];

pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Remove every session key, attempting all of them even if one fails
    fn clear_session(&self) -> Result<(), StoreError> {
        let mut first_err = None;
        for key in SESSION_KEYS {
            if let Err(e) = self.remove(key) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
