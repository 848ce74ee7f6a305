//! REST API client module for the commitment tracker service.
//!
//! This module provides the `ApiClient` request dispatcher, which attaches
//! the stored access token to every call, and typed methods for the
//! commitment, task, user, role, status, category, notification and report
//! endpoints.

pub mod client;
pub mod error;
pub mod resources;

pub use client::ApiClient;
pub use error::ApiError;
pub use resources::{CommitmentQuery, DEFAULT_PAGE_SIZE};
