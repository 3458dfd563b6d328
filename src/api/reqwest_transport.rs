// Production transport over reqwest
// Multipart uploads stream from memory or disk and report byte progress as
// the body is pulled by the connection, not after the request completes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, TryStreamExt};
use reqwest::multipart::{Form, Part};
use tracing::{debug, warn};

use super::{
    HttpRequest, HttpResponse, PartSource, ProgressFn, RequestBody, Transport, TransportError,
    UploadPart,
};
use crate::config::ClientConfig;

const CHUNK_SIZE: usize = 64 * 1024;

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Self {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .default_headers(headers)
            .user_agent(concat!("bulgur-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build configured HTTP client, using defaults: {}", e);
                reqwest::Client::new()
            });
        Self { client }
    }

    /// Wrap an already configured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

/// Shared byte counter for every part of one request.
#[derive(Clone)]
struct ProgressCounter {
    sent: Arc<AtomicU64>,
    total: u64,
    callback: Option<ProgressFn>,
}

impl ProgressCounter {
    fn tick(&self, len: usize) {
        let done = self.sent.fetch_add(len as u64, Ordering::Relaxed) + len as u64;
        if let Some(cb) = &self.callback {
            cb(done.min(self.total), self.total);
        }
    }
}

async fn part_body(part: &UploadPart, counter: ProgressCounter) -> Result<reqwest::Body, TransportError> {
    match &part.source {
        PartSource::Bytes(bytes) => {
            let chunks: Vec<Result<Bytes, std::io::Error>> = (0..bytes.len())
                .step_by(CHUNK_SIZE)
                .map(|start| Ok(bytes.slice(start..(start + CHUNK_SIZE).min(bytes.len()))))
                .collect();
            let body = stream::iter(chunks).inspect_ok(move |chunk| counter.tick(chunk.len()));
            Ok(reqwest::Body::wrap_stream(body))
        }
        PartSource::File(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|e| TransportError::Source {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            let body = tokio_util::io::ReaderStream::with_capacity(file, CHUNK_SIZE)
                .inspect_ok(move |chunk| counter.tick(chunk.len()));
            Ok(reqwest::Body::wrap_stream(body))
        }
    }
}

async fn build_form(parts: Vec<UploadPart>, progress: Option<ProgressFn>) -> Result<Form, TransportError> {
    let counter = ProgressCounter {
        sent: Arc::new(AtomicU64::new(0)),
        total: parts.iter().map(|p| p.size).sum(),
        callback: progress,
    };
    let mut form = Form::new();
    for part in parts {
        let body = part_body(&part, counter.clone()).await?;
        let file_part = Part::stream_with_length(body, part.size).file_name(part.file_name);
        form = form.part(part.field, file_part);
    }
    Ok(form)
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        debug!("{} {}", request.method, request.url);
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart(parts) => builder.multipart(build_form(parts, request.progress).await?),
        };

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(map_reqwest_error)?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use std::sync::Mutex;
    use url::Url;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport() -> ReqwestTransport {
        ReqwestTransport::new(&ClientConfig::default())
    }

    #[tokio::test]
    async fn test_sends_raw_authorization_header() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/api/stats"))
            .and(header("authorization", "token-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/api/stats", server.uri())).unwrap();
        let request = HttpRequest::new(Method::HEAD, url)
            .with_authorization("token-1")
            .unwrap();
        let response = transport().send(request).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_multipart_progress_reaches_total() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/storage/testuser/docs"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let payload = Bytes::from(vec![7u8; 200 * 1024]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressFn = Arc::new(move |done, total| {
            sink.lock().unwrap().push((done, total));
        });
        let url = Url::parse(&format!("{}/storage/testuser/docs", server.uri())).unwrap();
        let request = HttpRequest::new(Method::PUT, url)
            .with_body(RequestBody::Multipart(vec![UploadPart {
                field: "a.bin".into(),
                file_name: "a.bin".into(),
                size: payload.len() as u64,
                source: PartSource::Bytes(payload.clone()),
            }]))
            .with_progress(Some(progress));

        let response = transport().send(request).await.unwrap();
        assert!(response.is_success());

        let seen = seen.lock().unwrap();
        assert!(seen.len() > 1);
        assert_eq!(seen.last().copied(), Some((payload.len() as u64, payload.len() as u64)));
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[tokio::test]
    async fn test_missing_source_file() {
        let url = Url::parse("http://127.0.0.1:9/storage/testuser").unwrap();
        let request = HttpRequest::new(Method::PUT, url).with_body(RequestBody::Multipart(vec![UploadPart {
            field: "gone".into(),
            file_name: "gone".into(),
            size: 1,
            source: PartSource::File("/definitely/not/here".into()),
        }]));
        let err = transport().send(request).await.unwrap_err();
        assert!(matches!(err, TransportError::Source { .. }));
    }

    #[tokio::test]
    async fn test_configured_timeout_applies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/testuser"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let config = ClientConfig {
            request_timeout_secs: 1,
            ..Default::default()
        };
        let url = Url::parse(&format!("{}/storage/testuser", server.uri())).unwrap();
        let err = ReqwestTransport::new(&config)
            .send(HttpRequest::new(Method::GET, url))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let url = Url::parse("http://127.0.0.1:9/api/stats").unwrap();
        let result = transport().send(HttpRequest::new(Method::HEAD, url)).await;
        assert!(result.is_err());
    }
}
