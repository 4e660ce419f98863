//! HTTP transport used for polling.
//!
//! The poller only needs a conditional GET, so the transport is a small trait
//! with an [`octocrab`]-backed implementation for production use.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use octocrab::Octocrab;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors raised by the HTTP transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request did not complete in time.
    #[error("Request timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// A request header could not be encoded.
    #[error("Invalid header '{name}': {message}")]
    InvalidHeader { name: String, message: String },

    /// GitHub client error.
    #[error("GitHub API error: {0}")]
    GitHubError(#[from] octocrab::Error),
}

/// A GET request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Absolute request URL.
    pub url: String,

    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,

    /// Upper bound on the time the request may take.
    pub timeout: Duration,
}

/// A response to an [`HttpRequest`].
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,

    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,

    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// Looks up a header value, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Performs GET requests.
pub trait HttpClient: Send + Sync {
    /// Sends `request` and returns the response, whatever its status.
    ///
    /// Implementations must give up once `request.timeout` has elapsed.
    fn get(
        &self,
        request: &HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send;
}

/// [`HttpClient`] backed by an [`Octocrab`] instance.
///
/// Authentication is carried in the request headers, so the client itself is
/// built without credentials.
#[derive(Clone)]
pub struct OctocrabClient {
    octocrab: Octocrab,
}

impl OctocrabClient {
    /// Builds a client with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying client cannot be constructed.
    pub fn new() -> Result<Self, octocrab::Error> {
        Ok(Self {
            octocrab: Octocrab::builder().build()?,
        })
    }

    /// Wraps an existing client.
    pub fn from_octocrab(octocrab: Octocrab) -> Self {
        Self { octocrab }
    }

    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let headers = build_header_map(&request.headers)?;
        let response = self
            .octocrab
            ._get_with_headers(request.url.as_str(), Some(headers))
            .await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        let body = if status == 304 {
            String::new()
        } else {
            self.octocrab.body_to_string(response).await?
        };

        debug!(url = %request.url, status, "GET completed");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl HttpClient for OctocrabClient {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        tokio::time::timeout(request.timeout, self.send(request))
            .await
            .map_err(|_| TransportError::Timeout {
                timeout_secs: request.timeout.as_secs(),
            })?
    }
}

fn build_header_map(headers: &[(String, String)]) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| TransportError::InvalidHeader {
                name: name.clone(),
                message: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| TransportError::InvalidHeader {
            name: name.clone(),
            message: e.to_string(),
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}
