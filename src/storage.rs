//! Storage operations
//!
//! Folder reads go through the [`FolderCache`](crate::cache::FolderCache);
//! every successful mutation invalidates the listing of the folder that
//! contains the mutated path.

use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use tracing::debug;
use url::Url;

use crate::api::{FolderEntry, FolderResults, HttpResponse, PathTokenResponse, StorageAction};
use crate::cache::{is_cacheable, sort_entries, CacheKey, Listing};
use crate::error::{self, BError};
use crate::events::SyncEvent;
use crate::paths;
use crate::pipeline::{expect_success, Endpoint, RequestPipeline, RequestSpec};
use crate::session_manager::Session;
use crate::state::AppState;

#[derive(Clone)]
pub struct StorageClient {
    state: Arc<AppState>,
    pipeline: Arc<RequestPipeline>,
}

fn cache_key(session: &Session, folder: &str) -> Option<CacheKey> {
    let token = session.access_token()?;
    let site = session.site.as_ref()?;
    Some(CacheKey::new(Method::GET, folder, token, site.as_str()))
}

impl StorageClient {
    pub fn new(state: Arc<AppState>, pipeline: Arc<RequestPipeline>) -> Self {
        Self { state, pipeline }
    }

    // ============ Folder listings ============

    /// The listing of `path`, from cache when fresh.
    pub async fn read_folder(&self, path: &str) -> Listing {
        let session = self.pipeline.auth().ensure_ready().await;
        let folder = paths::normalize(path);
        let key = cache_key(&session, &folder).ok_or_else(BError::missing_auth)?;
        if let Some(hit) = self.state.cache().lookup(&key) {
            debug!("Cache hit for {:?}", key);
            return hit;
        }
        self.fetch_folder(key).await
    }

    /// Fetch `path` from the server even if a fresh listing is cached.
    pub async fn refresh_folder(&self, path: &str) -> Listing {
        let session = self.pipeline.auth().ensure_ready().await;
        let key = cache_key(&session, &paths::normalize(path)).ok_or_else(BError::missing_auth)?;
        self.fetch_folder(key).await
    }

    async fn fetch_folder(&self, key: CacheKey) -> Listing {
        let seq = self.state.cache().begin_fetch(&key);
        let result = self.load_folder(&key.path).await.map(Arc::new);
        if !is_cacheable(&result) {
            debug!("Not caching {:?}: no usable response", key);
            return result;
        }
        if self.state.cache().complete_fetch(&key, seq, result.clone()) {
            self.state.events().publish(SyncEvent::FolderChanged { path: key.path.clone() });
        }
        result
    }

    async fn load_folder(&self, folder: &str) -> Result<Vec<FolderEntry>, BError> {
        let spec = RequestSpec::new(Method::GET, Endpoint::storage(folder));
        let response = self.pipeline.send(&spec).await?;
        match response.status {
            s if s.is_success() => {
                let mut results: FolderResults = response
                    .parse()
                    .map_err(|e| BError::load_folder_failed(folder, e))?;
                sort_entries(&mut results.entries);
                Ok(results.entries)
            }
            StatusCode::UNAUTHORIZED => Err(BError::unauthorized(
                "You are not authorized to view this folder",
            )),
            StatusCode::NOT_FOUND => Err(BError::not_found("This folder does not exist.")),
            s if s.is_server_error() => Err(BError::server_error(s)),
            s => Err(BError::load_folder_failed(folder, format!("unexpected status {}", s))),
        }
    }

    /// Mark the listing of `path` stale and refetch it in the background if
    /// one was cached.
    pub fn invalidate_folder(&self, path: &str) {
        let folder = paths::normalize(path);
        let Some(key) = cache_key(&self.state.session(), &folder) else {
            return;
        };
        let had_value = self.state.cache().invalidate(&key);
        self.state.events().publish(SyncEvent::FolderInvalidated { path: folder });
        if !had_value {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let this = self.clone();
            handle.spawn(async move {
                let _ = this.fetch_folder(key).await;
            });
        }
    }

    // ============ Mutations ============

    async fn mutate(&self, method: Method, path: &str, action: Option<StorageAction>) -> Result<HttpResponse, BError> {
        let mut spec = RequestSpec::new(method, Endpoint::storage(path));
        if let Some(action) = action {
            spec = spec.with_action(&action)?;
        }
        expect_success(self.pipeline.send(&spec).await?)
    }

    pub async fn create_folder(&self, path: &str) -> Result<(), BError> {
        self.mutate(Method::POST, path, Some(StorageAction::CreateFolder)).await?;
        self.invalidate_folder(&paths::parent(path));
        Ok(())
    }

    pub async fn delete_path(&self, path: &str) -> Result<(), BError> {
        self.mutate(Method::DELETE, path, None).await?;
        self.invalidate_folder(&paths::parent(path));
        Ok(())
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<(), BError> {
        let action = StorageAction::Move {
            new_path: paths::normalize(to),
        };
        self.mutate(Method::POST, from, Some(action)).await?;
        let (from_parent, to_parent) = (paths::parent(from), paths::parent(to));
        self.invalidate_folder(&from_parent);
        if to_parent != from_parent {
            self.invalidate_folder(&to_parent);
        }
        Ok(())
    }

    /// Move several paths one after the other, stopping at the first failure.
    pub async fn rename_many(&self, moves: &[(String, String)]) -> Result<(), BError> {
        for (from, to) in moves {
            self.rename(from, to).await?;
        }
        Ok(())
    }

    // ============ Lookups ============

    /// `HEAD /storage/{path}`. A 404 is an answer, not an error.
    pub async fn path_exists(&self, path: &str) -> Result<bool, BError> {
        let spec = RequestSpec::new(Method::HEAD, Endpoint::storage(path));
        let response = self.pipeline.send(&spec).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        match error::classify_status(response.status) {
            Some(err) => Err(err),
            None => Ok(true),
        }
    }

    /// A token granting access to `path` without the user's credentials.
    pub async fn path_token(&self, path: &str) -> Result<String, BError> {
        let response = self
            .mutate(Method::POST, path, Some(StorageAction::MakePathToken))
            .await?;
        let parsed: PathTokenResponse = response
            .parse()
            .map_err(|e| BError::unexpected(format!("Malformed path token response: {}", e)))?;
        Ok(parsed.token)
    }

    /// `{site}/storage/{path}?token={path token}`
    pub async fn download_url(&self, path: &str) -> Result<Url, BError> {
        let token = self.path_token(path).await?;
        let site = self.state.session().site.ok_or_else(BError::missing_auth)?;
        let mut url = paths::storage_url(&site, path)?;
        url.query_pairs_mut().append_pair("token", &token);
        Ok(url)
    }

    pub async fn file_contents(&self, path: &str) -> Result<Bytes, BError> {
        let spec = RequestSpec::new(Method::GET, Endpoint::storage(path));
        let response = expect_success(self.pipeline.send(&spec).await?)?;
        Ok(response.body)
    }
}
