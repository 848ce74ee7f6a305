use thiserror::Error;

/// Failures of the session lifecycle.
///
/// `Clone` because one refresh result is handed to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Sign in rejected (status {status})")]
    Authentication { status: u16 },

    #[error("Session expired: {reason}")]
    SessionExpired { reason: String },

    #[error("Sign up rejected (status {status})")]
    Registration { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Credential storage error: {0}")]
    Storage(String),
}

impl AuthError {
    pub(crate) fn expired(reason: impl Into<String>) -> Self {
        AuthError::SessionExpired {
            reason: reason.into(),
        }
    }

    pub(crate) fn storage(err: anyhow::Error) -> Self {
        AuthError::Storage(format!("{:#}", err))
    }

    /// Whether the user has to sign in again
    pub fn requires_sign_in(&self) -> bool {
        matches!(self, AuthError::SessionExpired { .. })
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Network(err.to_string())
    }
}
