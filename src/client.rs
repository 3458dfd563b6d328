//! Client facade
//!
//! Wires every component over one shared [`AppState`]. Front-ends hold a
//! `Client`, call its async methods and subscribe to its events.

use std::future::Future;
use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::{broadcast, watch};

use crate::api::{ReqwestTransport, Transport};
use crate::cache::Listing;
use crate::config::ClientConfig;
use crate::credential_store::{open_backend, CredentialError, CredentialStore, KeyValueStore};
use crate::error::BError;
use crate::events::{Screen, SyncEvent};
use crate::pipeline::RequestPipeline;
use crate::session_manager::{AuthManager, LogoutOptions, Session, SessionState};
use crate::state::AppState;
use crate::storage::StorageClient;
use crate::transfer_pool::{UploadFile, UploadOrchestrator, UploadSummary};

pub struct Client {
    config: ClientConfig,
    state: Arc<AppState>,
    auth: Arc<AuthManager>,
    pipeline: Arc<RequestPipeline>,
    storage: StorageClient,
    uploads: UploadOrchestrator,
}

impl Client {
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>, backend: Arc<dyn KeyValueStore>) -> Self {
        let state = Arc::new(AppState::new());
        let credentials = CredentialStore::new(backend, config.persist_key.clone());
        let auth = Arc::new(AuthManager::new(state.clone(), transport.clone(), credentials));
        let pipeline = Arc::new(RequestPipeline::new(auth.clone(), transport));
        let storage = StorageClient::new(state.clone(), pipeline.clone());
        let uploads = UploadOrchestrator::new(
            state.clone(),
            pipeline.clone(),
            storage.clone(),
            config.max_concurrent_uploads as usize,
        );
        Self {
            config,
            state,
            auth,
            pipeline,
            storage,
            uploads,
        }
    }

    /// Production wiring: reqwest transport and the configured credential backend.
    pub fn from_config(config: ClientConfig) -> Result<Self, CredentialError> {
        let transport = Arc::new(ReqwestTransport::new(&config));
        let backend = open_backend(&config)?;
        Ok(Self::new(config, transport, backend))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    pub fn pipeline(&self) -> &Arc<RequestPipeline> {
        &self.pipeline
    }

    pub fn storage(&self) -> &StorageClient {
        &self.storage
    }

    pub fn uploads(&self) -> &UploadOrchestrator {
        &self.uploads
    }

    pub fn session(&self) -> Session {
        self.state.session()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.state.events().subscribe()
    }

    pub fn watch_session(&self) -> watch::Receiver<Session> {
        self.state.watch_session()
    }

    /// Report which screen the UI is showing; logout uses it to decide
    /// whether to redirect.
    pub fn set_screen(&self, screen: Screen) {
        self.state.set_screen(screen);
    }

    pub async fn initialize(&self) -> SessionState {
        self.auth.initialize().await
    }

    /// Log in against `site`, or the configured site when `None`.
    pub async fn login(&self, username: &str, password: SecretString, site: Option<&str>) -> Result<String, BError> {
        let site = site.or(self.config.site.as_deref()).unwrap_or_default();
        self.auth.login(username, password, site).await
    }

    pub fn logout(&self, options: LogoutOptions) {
        self.auth.logout(options);
    }

    pub async fn read_folder(&self, path: &str) -> Listing {
        self.storage.read_folder(path).await
    }

    pub async fn upload(&self, path: &str, files: Vec<UploadFile>) -> UploadSummary {
        self.uploads.upload(path, files).await
    }

    /// Run an operation and publish its error, if any, to subscribers.
    pub async fn run_reported<T, F>(&self, operation: F) -> Option<T>
    where
        F: Future<Output = Result<T, BError>>,
    {
        match operation.await {
            Ok(value) => Some(value),
            Err(error) => {
                self.state.events().publish(SyncEvent::Error { error });
                None
            }
        }
    }
}
