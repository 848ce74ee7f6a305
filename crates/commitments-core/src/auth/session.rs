//! Session lifecycle against the remote authentication service.
//!
//! `SessionManager` owns the only path that mutates the credential store.
//! Every mutation happens under one lock together with a session epoch:
//! sign-in and sign-out start a new epoch, and a refresh only writes its
//! result back if the epoch it started in is still current.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use tracing::{debug, info, warn};

use super::tokens::RefreshTokenBody;
use super::{AuthError, CredentialStore, Credentials, SignUpData, TokenPair};

const SIGN_IN_PATH: &str = "/auth/signin";
const SIGN_OUT_PATH: &str = "/auth/signout";
const REFRESH_PATH: &str = "/auth/refresh-token";
const SIGN_UP_PATH: &str = "/users/signup";

type RefreshFuture = Shared<BoxFuture<'static, Result<TokenPair, AuthError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Refreshing,
}

struct SessionInner {
    epoch: u64,
    in_flight: Option<RefreshFuture>,
}

impl SessionInner {
    /// Start a new session epoch; any refresh still running belongs to the old one
    fn begin_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.in_flight = None;
        self.epoch
    }
}

fn lock(inner: &Mutex<SessionInner>) -> MutexGuard<'_, SessionInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Shared session context. Clone is cheap; clones share tokens and the
/// in-flight refresh.
#[derive(Clone)]
pub struct SessionManager {
    client: Client,
    base_url: Arc<str>,
    store: Arc<dyn CredentialStore>,
    inner: Arc<Mutex<SessionInner>>,
}

impl SessionManager {
    pub fn new(client: Client, base_url: &str, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            store,
            inner: Arc::new(Mutex::new(SessionInner {
                epoch: 0,
                in_flight: None,
            })),
        }
    }

    /// HTTP client shared with the request dispatcher
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn store(&self) -> Arc<dyn CredentialStore> {
        Arc::clone(&self.store)
    }

    pub fn access_token(&self) -> Option<String> {
        self.store.access_token()
    }

    pub fn state(&self) -> SessionState {
        let inner = lock(&self.inner);
        if inner.in_flight.is_some() {
            SessionState::Refreshing
        } else if self.store.refresh_token().is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Register a new account. Stored tokens are not touched.
    pub async fn sign_up(&self, data: &SignUpData) -> Result<(), AuthError> {
        let response = self
            .client
            .post(self.url(SIGN_UP_PATH))
            .json(data)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Sign up rejected");
            return Err(AuthError::Registration {
                status: status.as_u16(),
            });
        }
        info!(email = %data.email, "Account registered");
        Ok(())
    }

    /// Exchange credentials for a token pair and store it.
    ///
    /// The new epoch is taken when the call starts. If a sign-out or another
    /// sign-in is requested before the server answers, the tokens are dropped
    /// and the call fails with [`AuthError::SessionExpired`].
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<TokenPair, AuthError> {
        let epoch = lock(&self.inner).begin_epoch();

        let response = self
            .client
            .post(self.url(SIGN_IN_PATH))
            .json(credentials)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Sign in rejected");
            return Err(AuthError::Authentication {
                status: status.as_u16(),
            });
        }

        let tokens: TokenPair = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(format!("sign in response: {}", e)))?;
        let tokens = tokens
            .validate()
            .ok_or_else(|| AuthError::InvalidResponse("sign in returned an empty token".into()))?;

        {
            let inner = lock(&self.inner);
            if inner.epoch != epoch {
                warn!(epoch, current = inner.epoch, "Discarding sign in superseded by a later request");
                return Err(AuthError::expired("session changed during sign in"));
            }
            self.store.save(&tokens).map_err(AuthError::storage)?;
        }
        info!(email = %credentials.email, "Signed in");
        Ok(tokens)
    }

    /// Notify the server (best effort) and drop the local tokens.
    ///
    /// The notification outcome is ignored. Local tokens are cleared afterwards
    /// unless a sign-in was requested while the notification was in flight.
    /// A sign-in requested before this call can no longer store its tokens.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let (epoch, refresh_token) = {
            let mut inner = lock(&self.inner);
            (inner.begin_epoch(), self.store.refresh_token())
        };

        if let Some(refresh_token) = refresh_token {
            let result = self
                .client
                .post(self.url(SIGN_OUT_PATH))
                .json(&RefreshTokenBody {
                    refresh_token: &refresh_token,
                })
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    debug!("Server acknowledged sign out");
                }
                Ok(response) => {
                    warn!(status = response.status().as_u16(), "Server rejected sign out, clearing locally");
                }
                Err(e) => {
                    warn!(error = %e, "Sign out notification failed, clearing locally");
                }
            }
        }

        let mut inner = lock(&self.inner);
        if inner.epoch != epoch {
            debug!("Sign in requested during sign out, leaving its session alone");
            return Ok(());
        }
        // Refreshes started during the notification must not write back
        inner.begin_epoch();
        self.store.clear().map_err(AuthError::storage)?;
        info!("Signed out");
        Ok(())
    }

    /// Rotate the token pair.
    ///
    /// Concurrent callers share one network call and receive the same result.
    /// The refresh runs as its own task, so it completes and updates the store
    /// even if every caller stops waiting. Any failure clears the stored tokens
    /// and is reported as [`AuthError::SessionExpired`].
    pub async fn refresh_tokens(&self) -> Result<TokenPair, AuthError> {
        let pending = {
            let mut inner = lock(&self.inner);
            if let Some(pending) = inner.in_flight.clone() {
                debug!("Joining in-flight token refresh");
                pending
            } else {
                let Some(refresh_token) = self.store.refresh_token() else {
                    return Err(AuthError::expired("no refresh token stored"));
                };
                let pending = self.spawn_refresh(refresh_token, inner.epoch);
                inner.in_flight = Some(pending.clone());
                pending
            }
        };

        pending.await
    }

    fn spawn_refresh(&self, refresh_token: String, epoch: u64) -> RefreshFuture {
        debug!(epoch, "Starting token refresh");
        let client = self.client.clone();
        let url = self.url(REFRESH_PATH);
        let store = Arc::clone(&self.store);
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn({
            let inner = Arc::clone(&inner);
            async move {
                let outcome = request_refresh(&client, &url, &refresh_token).await;
                settle_refresh(&inner, store.as_ref(), epoch, outcome)
            }
        });

        task.map(move |joined| {
            joined.unwrap_or_else(|e| {
                let mut inner = lock(&inner);
                if inner.epoch == epoch {
                    inner.in_flight = None;
                }
                Err(AuthError::expired(format!("refresh task failed: {}", e)))
            })
        })
        .boxed()
        .shared()
    }

    /// Liveness check used by route guards.
    ///
    /// Returns `false` without touching the network when no refresh token is
    /// stored; otherwise rotates the tokens and reports whether that worked.
    pub async fn is_authenticated(&self) -> bool {
        if self.store.refresh_token().is_none() {
            debug!("No refresh token stored");
            return false;
        }
        match self.refresh_tokens().await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Session check failed");
                false
            }
        }
    }
}

async fn request_refresh(
    client: &Client,
    url: &str,
    refresh_token: &str,
) -> Result<TokenPair, AuthError> {
    let response = client
        .post(url)
        .json(&RefreshTokenBody { refresh_token })
        .send()
        .await
        .map_err(|e| AuthError::expired(format!("refresh request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::expired(format!(
            "refresh rejected with status {}",
            status.as_u16()
        )));
    }

    let tokens: TokenPair = response
        .json()
        .await
        .map_err(|e| AuthError::expired(format!("malformed refresh response: {}", e)))?;
    tokens
        .validate()
        .ok_or_else(|| AuthError::expired("refresh returned an empty token"))
}

/// Apply a finished refresh to the store, unless the session moved on
fn settle_refresh(
    inner: &Mutex<SessionInner>,
    store: &dyn CredentialStore,
    epoch: u64,
    outcome: Result<TokenPair, AuthError>,
) -> Result<TokenPair, AuthError> {
    let mut inner = lock(inner);
    if inner.epoch != epoch {
        warn!(epoch, current = inner.epoch, "Discarding refresh that outlived its session");
        return Err(AuthError::expired("session changed during refresh"));
    }
    inner.in_flight = None;

    let err = match outcome {
        Ok(tokens) => match store.save(&tokens) {
            Ok(()) => {
                info!("Tokens refreshed");
                return Ok(tokens);
            }
            // The server has rotated the pair; the stored refresh token is dead
            Err(e) => AuthError::expired(format!("failed to store refreshed tokens: {:#}", e)),
        },
        Err(err) => err,
    };

    warn!(error = %err, "Token refresh failed, clearing session");
    if let Err(e) = store.clear() {
        warn!(error = %e, "Failed to clear tokens after refresh failure");
    }
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn pair(access: &str, refresh: &str) -> TokenPair {
        TokenPair::new(access, refresh).expect("valid test pair")
    }

    fn session_with(base_url: &str, tokens: Option<TokenPair>) -> (SessionManager, Arc<MemoryCredentialStore>) {
        let store = Arc::new(match tokens {
            Some(t) => MemoryCredentialStore::with_tokens(t),
            None => MemoryCredentialStore::new(),
        });
        let session = SessionManager::new(Client::new(), base_url, store.clone());
        (session, store)
    }

    #[tokio::test]
    async fn test_sign_in_stores_tokens() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/signin")
            .match_body(Matcher::Json(json!({ "email": "a@b.com", "password": "x" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accessToken":"AT1","refreshToken":"RT1"}"#)
            .create_async()
            .await;

        let (session, store) = session_with(&server.url(), None);
        let tokens = session
            .sign_in(&Credentials::new("a@b.com", "x"))
            .await
            .expect("sign in should succeed");

        mock.assert_async().await;
        assert_eq!(tokens, pair("AT1", "RT1"));
        assert_eq!(store.access_token().as_deref(), Some("AT1"));
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_sign_in_rejected_leaves_state_unchanged() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/signin")
            .with_status(401)
            .create_async()
            .await;

        let (session, store) = session_with(&server.url(), None);
        let err = session
            .sign_in(&Credentials::new("a@b.com", "wrong"))
            .await
            .unwrap_err();

        assert_eq!(err, AuthError::Authentication { status: 401 });
        assert!(store.tokens().is_none());
        assert_eq!(session.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_sign_in_rejects_empty_tokens() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/signin")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accessToken":"","refreshToken":"RT1"}"#)
            .create_async()
            .await;

        let (session, store) = session_with(&server.url(), None);
        let err = session
            .sign_in(&Credentials::new("a@b.com", "x"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::InvalidResponse(_)));
        assert!(store.tokens().is_none());
    }

    #[tokio::test]
    async fn test_sign_up_does_not_touch_tokens() {
        let mut server = Server::new_async().await;
        let ok = server
            .mock("POST", "/users/signup")
            .match_body(Matcher::PartialJson(json!({ "firstName": "Ada", "email": "ada@example.com" })))
            .with_status(201)
            .create_async()
            .await;

        let (session, store) = session_with(&server.url(), Some(pair("AT0", "RT0")));
        let data = SignUpData {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            password: "pw".to_string(),
        };
        session.sign_up(&data).await.expect("sign up should succeed");
        ok.assert_async().await;
        assert_eq!(store.tokens(), Some(pair("AT0", "RT0")));
    }

    #[tokio::test]
    async fn test_sign_up_rejected() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/users/signup")
            .with_status(409)
            .create_async()
            .await;

        let (session, _store) = session_with(&server.url(), None);
        let data = SignUpData {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            password: "pw".to_string(),
        };
        let err = session.sign_up(&data).await.unwrap_err();
        assert_eq!(err, AuthError::Registration { status: 409 });
    }

    #[tokio::test]
    async fn test_sign_out_notifies_and_clears() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/signout")
            .match_body(Matcher::Json(json!({ "refreshToken": "RT1" })))
            .with_status(204)
            .create_async()
            .await;

        let (session, store) = session_with(&server.url(), Some(pair("AT1", "RT1")));
        session.sign_out().await.expect("sign out should succeed");

        mock.assert_async().await;
        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_clears_when_server_rejects() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/signout")
            .with_status(500)
            .create_async()
            .await;

        let (session, store) = session_with(&server.url(), Some(pair("AT1", "RT1")));
        session.sign_out().await.expect("sign out should succeed");
        assert!(store.tokens().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_without_tokens_skips_network() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/signout")
            .expect(0)
            .create_async()
            .await;

        let (session, store) = session_with(&server.url(), None);
        session.sign_out().await.expect("sign out should succeed");
        mock.assert_async().await;
        assert!(store.tokens().is_none());
    }

    #[tokio::test]
    async fn test_refresh_without_token_is_expired() {
        let (session, _store) = session_with("http://127.0.0.1:1", None);
        let err = session.refresh_tokens().await.unwrap_err();
        assert!(err.requires_sign_in());
    }

    #[tokio::test]
    async fn test_refresh_rotates_tokens() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh-token")
            .match_body(Matcher::Json(json!({ "refreshToken": "RT1" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accessToken":"AT2","refreshToken":"RT2"}"#)
            .create_async()
            .await;

        let (session, store) = session_with(&server.url(), Some(pair("AT1", "RT1")));
        let tokens = session.refresh_tokens().await.expect("refresh should succeed");

        mock.assert_async().await;
        assert_eq!(tokens, pair("AT2", "RT2"));
        assert_eq!(store.tokens(), Some(pair("AT2", "RT2")));
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_sequential_refreshes_each_hit_network() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accessToken":"AT2","refreshToken":"RT2"}"#)
            .expect(2)
            .create_async()
            .await;

        let (session, _store) = session_with(&server.url(), Some(pair("AT1", "RT1")));
        session.refresh_tokens().await.expect("first refresh");
        session.refresh_tokens().await.expect("second refresh");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_malformed_body_clears_session() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/refresh-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .create_async()
            .await;

        let (session, store) = session_with(&server.url(), Some(pair("AT1", "RT1")));
        let err = session.refresh_tokens().await.unwrap_err();
        assert!(err.requires_sign_in());
        assert!(store.tokens().is_none());
    }

    #[tokio::test]
    async fn test_is_authenticated_with_valid_refresh() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/refresh-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accessToken":"AT2","refreshToken":"RT2"}"#)
            .create_async()
            .await;

        let (session, store) = session_with(&server.url(), Some(pair("AT1", "RT1")));
        assert!(session.is_authenticated().await);
        assert_eq!(store.access_token().as_deref(), Some("AT2"));
    }

    #[test]
    fn test_stale_refresh_is_discarded() {
        let store = MemoryCredentialStore::with_tokens(pair("AT1", "RT1"));
        let inner = Mutex::new(SessionInner {
            epoch: 3,
            in_flight: None,
        });

        let result = settle_refresh(&inner, &store, 2, Ok(pair("AT2", "RT2")));
        assert!(result.unwrap_err().requires_sign_in());
        assert_eq!(store.tokens(), Some(pair("AT1", "RT1")));

        let result = settle_refresh(&inner, &store, 3, Ok(pair("AT2", "RT2")));
        assert_eq!(result.unwrap(), pair("AT2", "RT2"));
        assert_eq!(store.tokens(), Some(pair("AT2", "RT2")));
    }

    #[test]
    fn test_failed_refresh_in_current_epoch_clears() {
        let store = MemoryCredentialStore::with_tokens(pair("AT1", "RT1"));
        let inner = Mutex::new(SessionInner {
            epoch: 0,
            in_flight: None,
        });

        let result = settle_refresh(&inner, &store, 0, Err(AuthError::expired("rejected")));
        assert!(result.is_err());
        assert!(store.tokens().is_none());
    }

    /// Store whose writes always fail, e.g. a full disk
    struct ReadOnlyStore(MemoryCredentialStore);

    impl CredentialStore for ReadOnlyStore {
        fn save(&self, _tokens: &TokenPair) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        fn clear(&self) -> anyhow::Result<()> {
            self.0.clear()
        }

        fn tokens(&self) -> Option<TokenPair> {
            self.0.tokens()
        }
    }

    #[tokio::test]
    async fn test_refresh_expires_session_when_save_fails() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/refresh-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accessToken":"AT2","refreshToken":"RT2"}"#)
            .create_async()
            .await;

        let store = Arc::new(ReadOnlyStore(MemoryCredentialStore::with_tokens(pair("AT1", "RT1"))));
        let session = SessionManager::new(Client::new(), &server.url(), store.clone());

        let err = session.refresh_tokens().await.unwrap_err();
        match &err {
            AuthError::SessionExpired { reason } => assert!(reason.contains("disk full")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(store.tokens().is_none());
        assert_eq!(session.state(), SessionState::Unauthenticated);
    }
}
