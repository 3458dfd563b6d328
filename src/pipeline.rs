//! Request pipeline
//!
//! One authenticated HTTP exchange with a bounded re-authentication retry.
//! [`RequestPipeline::do_request`] never retries by itself: on a 401 it
//! refreshes once and tells the caller to try again with
//! [`RequestOutcome::NeedsRetryAfterReauth`]. [`RequestPipeline::send`] is
//! that caller loop, capped at a single retry that is not allowed to refresh
//! again.

use std::sync::Arc;

use http::{Method, StatusCode};
use tracing::{debug, warn};

use crate::api::{HttpRequest, HttpResponse, ProgressFn, RequestBody, StorageAction, Transport, UploadPart};
use crate::error::{self, BError};
use crate::paths;
use crate::session_manager::AuthManager;

/// Which server route a request targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `/storage/{path}`
    Storage(String),
    /// A fixed API route such as `/api/stats`.
    Api(&'static [&'static str]),
}

impl Endpoint {
    pub fn storage(path: &str) -> Self {
        Endpoint::Storage(paths::normalize(path))
    }
}

/// Everything needed to (re)build one request.
#[derive(Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub endpoint: Endpoint,
    pub json: Option<serde_json::Value>,
    pub form: Option<Vec<UploadPart>>,
    pub progress: Option<ProgressFn>,
}

impl RequestSpec {
    pub fn new(method: Method, endpoint: Endpoint) -> Self {
        Self {
            method,
            endpoint,
            json: None,
            form: None,
            progress: None,
        }
    }

    pub fn with_json(mut self, json: serde_json::Value) -> Self {
        self.json = Some(json);
        self
    }

    pub fn with_action(self, action: &StorageAction) -> Result<Self, BError> {
        let json = serde_json::to_value(action).map_err(|e| BError::unexpected(e.to_string()))?;
        Ok(self.with_json(json))
    }

    pub fn with_form(mut self, parts: Vec<UploadPart>) -> Self {
        self.form = Some(parts);
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }
}

#[derive(Debug)]
pub enum RequestOutcome {
    Completed(HttpResponse),
    /// The token was refreshed after a 401; issue the request again.
    NeedsRetryAfterReauth,
}

pub struct RequestPipeline {
    auth: Arc<AuthManager>,
    transport: Arc<dyn Transport>,
}

impl RequestPipeline {
    pub fn new(auth: Arc<AuthManager>, transport: Arc<dyn Transport>) -> Self {
        Self { auth, transport }
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    /// Perform the request once. A 401 triggers at most one refresh.
    pub async fn do_request(&self, spec: &RequestSpec) -> Result<RequestOutcome, BError> {
        self.execute(spec, true).await
    }

    /// Perform the request, retrying once after a successful re-authentication.
    pub async fn send(&self, spec: &RequestSpec) -> Result<HttpResponse, BError> {
        match self.do_request(spec).await? {
            RequestOutcome::Completed(response) => Ok(response),
            RequestOutcome::NeedsRetryAfterReauth => {
                debug!("Retrying {} {:?} after re-authentication", spec.method, spec.endpoint);
                match self.execute(spec, false).await? {
                    RequestOutcome::Completed(response) => Ok(response),
                    RequestOutcome::NeedsRetryAfterReauth => {
                        Err(BError::unauthorized("You are not authorized to do this action."))
                    }
                }
            }
        }
    }

    async fn execute(&self, spec: &RequestSpec, allow_reauth: bool) -> Result<RequestOutcome, BError> {
        let session = self.auth.ensure_ready().await;
        let site = session.site.as_ref().ok_or_else(BError::missing_auth)?;

        let body = match (&spec.json, &spec.form) {
            (Some(_), Some(_)) => return Err(BError::data_and_form_data()),
            (Some(json), None) => RequestBody::Json(json.clone()),
            (None, Some(parts)) => RequestBody::Multipart(parts.clone()),
            (None, None) => RequestBody::Empty,
        };

        let url = match &spec.endpoint {
            Endpoint::Storage(path) => paths::storage_url(site, path)?,
            Endpoint::Api(route) => paths::endpoint_url(site, route, "")?,
        };

        let used_token = session.access_token().map(str::to_owned);
        let mut request = HttpRequest::new(spec.method.clone(), url);
        if let Some(token) = &used_token {
            request = request.with_authorization(token).map_err(|e| {
                warn!("Stored access token is unusable: {}", e);
                BError::missing_auth()
            })?;
        }
        let request = request.with_body(body).with_progress(spec.progress.clone());

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| error::classify_transport(&e))?;
        debug!("{} {:?} -> {}", spec.method, spec.endpoint, response.status);

        if response.status == StatusCode::UNAUTHORIZED && allow_reauth {
            if let Some(token) = used_token {
                if self.auth.refresh_after_unauthorized(&token).await {
                    return Ok(RequestOutcome::NeedsRetryAfterReauth);
                }
            }
        }
        Ok(RequestOutcome::Completed(response))
    }
}

/// Turn a non-2xx response into a classified error.
pub fn expect_success(response: HttpResponse) -> Result<HttpResponse, BError> {
    match error::classify_status(response.status) {
        Some(err) => Err(err),
        None => Ok(response),
    }
}
