//! Client core for the commitment tracker.
//!
//! Holds everything a front-end needs to talk to the commitment tracker
//! REST API:
//!
//! - [`auth`]: token storage and the session lifecycle (sign-in, sign-out,
//!   single-flight token refresh)
//! - [`api`]: the authenticated request dispatcher and typed resource calls
//! - [`models`]: resource types
//! - [`guard`]: access decisions for protected views
//! - [`config`]: configuration file and environment overrides

pub mod api;
pub mod auth;
pub mod config;
pub mod guard;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthError, CredentialStore, SessionManager, SessionState, TokenPair};
pub use config::Config;
