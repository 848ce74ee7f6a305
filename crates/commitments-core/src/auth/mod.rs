//! Authentication module for managing user sessions and credentials.
//!
//! This module provides:
//! - `CredentialStore`: persistence for the access/refresh token pair
//!   (memory, JSON file, or OS keychain)
//! - `SessionManager`: sign-in, sign-up, sign-out and single-flight token
//!   refresh against the remote authentication service

pub mod credentials;
pub mod error;
pub mod session;
pub mod tokens;

pub use credentials::{
    CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore,
};
pub use error::AuthError;
pub use session::{SessionManager, SessionState};
pub use tokens::{Credentials, SignUpData, TokenPair};
