//! Wire layer
//!
//! The rest of the crate talks to the Bulgur server through the [`Transport`]
//! trait: a single `send` that takes a fully built [`HttpRequest`] and returns
//! the status and raw body. Authentication, retry and classification all live
//! above this line, so tests can swap in a scripted transport and the
//! production build uses [`ReqwestTransport`].
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │        AuthManager / RequestPipeline         │
//! └──────────────────────────────────────────────┘
//!                       │ HttpRequest
//!                       ▼
//! ┌──────────────────────────────────────────────┐
//! │              Transport trait                 │
//! └──────────────────────────────────────────────┘
//!            │                        │
//!            ▼                        ▼
//!    ReqwestTransport          scripted test double
//! ```

pub mod reqwest_transport;
pub mod types;

pub use reqwest_transport::ReqwestTransport;
pub use types::*;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::error::ValidationError;

/// Upload progress callback: `(bytes_done, bytes_total)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Failures below HTTP: nothing came back from the server.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("request failed: {0}")]
    Other(String),
    #[error("failed to read upload source {path}: {reason}")]
    Source { path: PathBuf, reason: String },
}

/// Where the bytes of an uploaded file come from.
#[derive(Clone)]
pub enum PartSource {
    Bytes(Bytes),
    File(PathBuf),
}

impl fmt::Debug for PartSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartSource::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            PartSource::File(p) => write!(f, "File({})", p.display()),
        }
    }
}

/// One multipart field carrying a file.
#[derive(Debug, Clone)]
pub struct UploadPart {
    pub field: String,
    pub file_name: String,
    pub size: u64,
    pub source: PartSource,
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart(Vec<UploadPart>),
}

/// A fully resolved request, ready for the wire.
#[derive(Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub progress: Option<ProgressFn>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            progress: None,
        }
    }

    /// Attach the raw access token. Bulgur reads it from the `authorization`
    /// header without a scheme prefix.
    pub fn with_authorization(mut self, token: &str) -> Result<Self, TransportError> {
        let mut value = HeaderValue::from_str(token)
            .map_err(|e| TransportError::Other(format!("invalid token header: {}", e)))?;
        value.set_sensitive(true);
        self.headers.insert(http::header::AUTHORIZATION, value);
        Ok(self)
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressFn>) -> Self {
        self.progress = progress;
        self
    }

    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.body, RequestBody::Multipart(_))
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("authorized", &self.headers.contains_key(http::header::AUTHORIZATION))
            .field("body", &self.body)
            .finish()
    }
}

/// Status and raw body of a completed exchange.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Validate the body against `T`'s schema.
    pub fn parse<T: Schema>(&self) -> Result<T, ValidationError> {
        parse_payload(&self.body)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// A response payload with a declared shape. `check` runs after
/// deserialization for constraints serde cannot express.
pub trait Schema: DeserializeOwned {
    fn check(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Decode and validate a payload. Failures never panic and never leak a
/// partially valid value.
pub fn parse_payload<T: Schema>(body: &[u8]) -> Result<T, ValidationError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ValidationError::Empty);
    }
    let value: T =
        serde_json::from_slice(body).map_err(|e| ValidationError::Malformed(e.to_string()))?;
    value.check()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_header_is_raw_token() {
        let url = Url::parse("https://bulgur.example.com/api/stats").unwrap();
        let request = HttpRequest::new(Method::HEAD, url)
            .with_authorization("abc123")
            .unwrap();
        assert_eq!(request.authorization(), Some("abc123"));
        let debug = format!("{:?}", request);
        assert!(!debug.contains("abc123"));
    }

    #[test]
    fn test_authorization_rejects_control_chars() {
        let url = Url::parse("https://bulgur.example.com/").unwrap();
        assert!(HttpRequest::new(Method::GET, url)
            .with_authorization("bad\ntoken")
            .is_err());
    }

    #[test]
    fn test_parse_payload_empty() {
        let result: Result<PathTokenResponse, _> = parse_payload(b"  ");
        assert_eq!(result.unwrap_err(), ValidationError::Empty);
    }
}
