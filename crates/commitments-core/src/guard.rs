//! Access decisions for protected views.
//!
//! Front-ends ask these before rendering a protected page and follow the
//! redirect when access is refused.

use tracing::debug;

use crate::auth::SessionManager;

pub const SIGN_IN_PATH: &str = "/auth/signin";
pub const HOME_PATH: &str = "/";

/// Prefix of the sign-in/sign-up/verification pages
const AUTH_PREFIX: &str = "/auth";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    Redirect(&'static str),
}

impl Access {
    pub fn is_granted(&self) -> bool {
        matches!(self, Access::Granted)
    }
}

/// Verify the session is still alive, rotating tokens as a side effect
pub async fn require_session(session: &SessionManager) -> Access {
    if session.is_authenticated().await {
        Access::Granted
    } else {
        debug!("Session check failed, redirecting to sign in");
        Access::Redirect(SIGN_IN_PATH)
    }
}

/// Path-level check: signed-out users only see the auth pages, signed-in
/// users are sent home from them
pub fn route_access(path: &str, has_access_token: bool) -> Access {
    let is_auth_page = path.starts_with(AUTH_PREFIX);
    match (has_access_token, is_auth_page) {
        (false, false) => Access::Redirect(SIGN_IN_PATH),
        (true, true) => Access::Redirect(HOME_PATH),
        _ => Access::Granted,
    }
}
