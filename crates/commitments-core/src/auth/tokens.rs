use serde::{Deserialize, Serialize};

/// Access/refresh credentials issued by the authentication service.
///
/// Both fields are non-empty; use [`TokenPair::new`] or [`TokenPair::validate`]
/// before storing a pair that came off the wire.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Option<Self> {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
        .validate()
    }

    /// Reject pairs with a blank field
    pub fn validate(self) -> Option<Self> {
        if self.access_token.trim().is_empty() || self.refresh_token.trim().is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

// Tokens are bearer credentials, keep them out of logs.
impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Registration payload for `POST /users/signup`
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpData {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshTokenBody<'a> {
    pub refresh_token: &'a str,
}
