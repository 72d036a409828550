use std::fmt;

use serde_json::Value;

/// Externally observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Persisted session not yet validated
    Unknown,
    Authenticated,
    Anonymous,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Unknown => "unknown",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::Anonymous => "anonymous",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable session state behind the manager's lock
#[derive(Default)]
pub(crate) struct SessionState {
    pub user: Option<Value>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub loading: bool,
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        if self.loading {
            SessionStatus::Unknown
        } else if self.user.is_some() {
            SessionStatus::Authenticated
        } else {
            SessionStatus::Anonymous
        }
    }

    pub fn clear(&mut self) {
        self.user = None;
        self.access_token = None;
        self.refresh_token = None;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            user: self.user.clone(),
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            loading: self.loading,
        }
    }
}

/// A consistent copy of the session taken under a single lock
#[derive(Clone, PartialEq)]
pub struct SessionSnapshot {
    pub user: Option<Value>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub loading: bool,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn status(&self) -> SessionStatus {
        if self.loading {
            SessionStatus::Unknown
        } else if self.is_authenticated() {
            SessionStatus::Authenticated
        } else {
            SessionStatus::Anonymous
        }
    }
}

impl fmt::Debug for SessionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSnapshot")
            .field("user", &self.user)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("loading", &self.loading)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_transitions() {
        let mut state = SessionState {
            loading: true,
            ..Default::default()
        };
        assert_eq!(state.status(), SessionStatus::Unknown);

        state.loading = false;
        assert_eq!(state.status(), SessionStatus::Anonymous);

        state.user = Some(json!({ "id": 1 }));
        state.access_token = Some("a1".to_string());
        state.refresh_token = Some("r1".to_string());
        assert_eq!(state.status(), SessionStatus::Authenticated);
        assert!(state.snapshot().is_authenticated());

        state.clear();
        assert_eq!(state.status(), SessionStatus::Anonymous);
        assert!(state.snapshot().access_token.is_none());
    }

    #[test]
    fn test_snapshot_debug_redacts_tokens() {
        let snapshot = SessionSnapshot {
            user: None,
            access_token: Some("secret-access".to_string()),
            refresh_token: Some("secret-refresh".to_string()),
            loading: false,
        };
        let debug = format!("{:?}", snapshot);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SessionStatus::Authenticated.to_string(), "authenticated");
        assert_eq!(SessionStatus::Unknown.as_str(), "unknown");
    }
}
