//! Authenticated request dispatcher for the commitment tracker REST API.
//!
//! Every resource call goes through [`ApiClient::fetch`], which attaches the
//! stored access token as a bearer credential and normalises the response.
//! The dispatcher never refreshes tokens or retries on its own; callers that
//! see [`ApiError::Unauthorized`] decide whether to refresh via the session.

use std::sync::Arc;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::ApiError;
use crate::auth::{CredentialStore, SessionManager};

/// API client for the commitment tracker.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Arc<str>,
    store: Arc<dyn CredentialStore>,
}

impl ApiClient {
    pub fn new(client: Client, base_url: &str, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            store,
        }
    }

    /// Dispatcher sharing the session's connection pool and credential store
    pub fn for_session(session: &SessionManager) -> Self {
        Self::new(session.client(), session.base_url(), session.store())
    }

    fn url(&self, endpoint: &str) -> Result<Url, ApiError> {
        let raw = format!("{}{}", self.base_url, endpoint);
        Url::parse(&raw).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", raw, e)))
    }

    /// URL for `segments` under the base URL with `query` appended.
    /// reqwest's `Url` percent-encodes each segment and query pair.
    pub(crate) fn endpoint_url(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Url, ApiError> {
        let mut url = self.url("")?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(format!("{}: cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Default JSON content type, bearer token when signed in, then caller
    /// headers, which replace defaults of the same name
    fn request_headers(&self, extra: Option<HeaderMap>) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Some(token) = self.store.access_token() {
            headers.insert(
                header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }

        if let Some(extra) = extra {
            let mut last = None;
            for (name, value) in extra {
                match name {
                    Some(name) => {
                        headers.insert(name.clone(), value);
                        last = Some(name);
                    }
                    // Further values of a multi-valued caller header
                    None => {
                        if let Some(name) = &last {
                            headers.append(name.clone(), value);
                        }
                    }
                }
            }
        }
        Ok(headers)
    }

    /// Send an authenticated request.
    ///
    /// Returns `None` for `204 No Content`, for success responses without a
    /// JSON content type, and for empty bodies. Any non-2xx status is an error.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
        headers: Option<HeaderMap>,
    ) -> Result<Option<T>, ApiError> {
        let url = self.url(endpoint)?;
        self.fetch_url(method, url, body, headers).await
    }

    /// [`fetch`](Self::fetch) against an already built URL
    pub(crate) async fn fetch_url<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        headers: Option<HeaderMap>,
    ) -> Result<Option<T>, ApiError> {
        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .headers(self.request_headers(headers)?);
        if let Some(body) = body {
            let bytes = serde_json::to_vec(body)
                .map_err(|e| ApiError::InvalidBody(e.to_string()))?;
            request = request.body(bytes);
        }

        debug!(method = %method, url = %url, "Sending API request");
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(url = %url, status = status.as_u16(), "API request failed");
            return Err(ApiError::from_status(status, &body));
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let is_json = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(is_json_content_type)
            .unwrap_or(false);
        if !is_json {
            debug!(url = %url, "Response is not JSON, ignoring body");
            return Ok(None);
        }

        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", url, e)))
    }

    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Option<T>, ApiError> {
        self.fetch(Method::GET, endpoint, None, None).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<Option<T>, ApiError> {
        self.send_json(Method::POST, self.url(endpoint)?, body).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<Option<T>, ApiError> {
        self.send_json(Method::PUT, self.url(endpoint)?, body).await
    }

    pub(crate) async fn send_json<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        url: Url,
        body: &B,
    ) -> Result<Option<T>, ApiError> {
        let body = to_body(body)?;
        self.fetch_url(method, url, Some(&body), None).await
    }

    pub async fn delete(&self, endpoint: &str) -> Result<(), ApiError> {
        self.fetch::<Value>(Method::DELETE, endpoint, None, None)
            .await
            .map(|_| ())
    }
}

fn to_body<B: Serialize>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::InvalidBody(e.to_string()))
}

/// `application/json` and structured `+json` media types
fn is_json_content_type(value: &str) -> bool {
    let essence = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

/// Unwrap a body the endpoint is expected to return
pub(crate) fn required<T>(value: Option<T>, endpoint: &str) -> Result<T, ApiError> {
    value.ok_or_else(|| ApiError::InvalidResponse(format!("{}: empty response", endpoint)))
}
