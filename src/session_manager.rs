//! Session Manager - authentication lifecycle
//!
//! Owns the session state machine:
//!
//! ```text
//! Uninitialized ──initialize()──▶ Authenticating ──▶ Authenticated
//!                                        │                 │
//!                                        ▼                 │ logout / failed refresh
//!      login() ◀──────────────────── LoggedOut ◀───────────┘
//! ```
//!
//! A refresh swaps tokens in place and never passes back through
//! `Authenticating`. Everything that needs a token waits for a settled
//! session first (see [`AuthManager::ensure_ready`]).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use http::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::{
    HttpRequest, LoginRequest, LoginResponse, RefreshRequest, RequestBody, Transport,
};
use crate::credential_store::{CredentialStore, PersistedAuth};
use crate::error::{self, BError};
use crate::events::{Screen, SyncEvent};
use crate::paths;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Uninitialized,
    Authenticating,
    Authenticated,
    LoggedOut,
}

impl SessionState {
    pub fn is_settled(self) -> bool {
        matches!(self, SessionState::Authenticated | SessionState::LoggedOut)
    }
}

/// Both tokens or neither.
#[derive(Clone)]
pub struct Tokens {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
}

#[derive(Clone, Default)]
pub struct Session {
    pub state: SessionState,
    pub username: Option<String>,
    pub tokens: Option<Tokens>,
    pub site: Option<Url>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    fn logged_out() -> Self {
        Self {
            state: SessionState::LoggedOut,
            ..Self::default()
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|t| t.access_token.expose_secret())
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("username", &self.username)
            .field("has_tokens", &self.tokens.is_some())
            .field("site", &self.site.as_ref().map(Url::as_str))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogoutOptions {
    /// Stay put if the UI is already on the login screen.
    pub no_redirect: bool,
}

pub struct AuthManager {
    state: Arc<AppState>,
    transport: Arc<dyn Transport>,
    credentials: CredentialStore,
    /// Serializes refreshes triggered by concurrent 401s.
    refresh_gate: Mutex<()>,
    /// Bumped whenever the session is replaced or a login starts. A refresh
    /// only applies its outcome if this did not move while it was awaiting.
    generation: AtomicU64,
}

impl AuthManager {
    pub fn new(state: Arc<AppState>, transport: Arc<dyn Transport>, credentials: CredentialStore) -> Self {
        Self {
            state,
            transport,
            credentials,
            refresh_gate: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn session(&self) -> Session {
        self.state.session()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Restore the persisted session. Only the first call on an
    /// `Uninitialized` session does any work; later calls wait for the
    /// session to settle and report it.
    pub async fn initialize(&self) -> SessionState {
        let claimed = self.state.modify_session(|s| {
            if s.state != SessionState::Uninitialized {
                return false;
            }
            s.state = SessionState::Authenticating;
            true
        });
        if !claimed {
            return self.settled().await.state;
        }
        self.state.announce_session();
        self.restore().await
    }

    async fn restore(&self) -> SessionState {
        let Some(record) = self.credentials.load() else {
            debug!("No persisted session");
            self.reset(false);
            return SessionState::LoggedOut;
        };
        let site = match paths::parse_site(&record.site) {
            Ok(site) => site,
            Err(e) => {
                warn!("Persisted session has an unusable site: {}", e);
                self.reset(true);
                return SessionState::LoggedOut;
            }
        };

        if !record.is_expired(Utc::now()) && self.probe(&site, &record.access_token).await {
            info!("Restored session for {}", record.username);
            self.install_record(record, &site);
            return SessionState::Authenticated;
        }

        debug!("Persisted access token rejected, refreshing");
        match self.refresh(&record.username, &record.refresh_token, site.as_str()).await {
            Ok(_) => SessionState::Authenticated,
            Err(e) => {
                warn!("Could not restore session: {}", e);
                self.session().state
            }
        }
    }

    /// Liveness probe: an authenticated HEAD that must come back 2xx.
    async fn probe(&self, site: &Url, access_token: &SecretString) -> bool {
        let Ok(url) = paths::endpoint_url(site, &["api", "stats"], "") else {
            return false;
        };
        let Ok(request) = HttpRequest::new(Method::HEAD, url).with_authorization(access_token.expose_secret()) else {
            return false;
        };
        match self.transport.send(request).await {
            Ok(response) => response.is_success(),
            Err(e) => {
                debug!("Liveness probe failed: {}", e);
                false
            }
        }
    }

    pub async fn login(&self, username: &str, password: SecretString, site: &str) -> Result<String, BError> {
        self.bump_generation();
        self.state.modify_session(|s| {
            s.state = SessionState::Authenticating;
            true
        });
        self.state.announce_session();

        let result = async {
            let site = paths::parse_site(site)?;
            let body = LoginRequest {
                username: username.to_string(),
                password,
            };
            let response = self.exchange(&site, "login", &body).await?;
            Ok::<_, BError>((site, response))
        }
        .await;

        match result {
            Ok((site, response)) => {
                info!("Logged in as {}", username);
                self.install(username, response, &site);
                Ok(username.to_string())
            }
            Err(e) => {
                warn!("Login failed: {}", e);
                self.reset(true);
                Err(e)
            }
        }
    }

    /// Trade the refresh token for new tokens. Tokens are replaced in place; a
    /// failure logs the session out. If a login or logout replaced the session
    /// while the exchange was in flight, the outcome is dropped and the newer
    /// session is left untouched.
    pub async fn refresh(&self, username: &str, refresh_token: &SecretString, site: &str) -> Result<String, BError> {
        let generation = self.generation();
        let result = async {
            let site = paths::parse_site(site)?;
            let body = RefreshRequest {
                username: username.to_string(),
                refresh_token: refresh_token.clone(),
            };
            let response = self.exchange(&site, "refresh", &body).await?;
            Ok::<_, BError>((site, response))
        }
        .await;

        if self.generation() != generation {
            debug!("Session for {} was replaced while refreshing, discarding the outcome", username);
            return Err(BError::missing_auth());
        }
        match result {
            Ok((site, response)) => {
                debug!("Refreshed tokens for {}", username);
                self.install(username, response, &site);
                Ok(username.to_string())
            }
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                self.logout(LogoutOptions { no_redirect: true });
                Err(e)
            }
        }
    }

    /// Called by the request pipeline after a 401. Returns whether the caller
    /// should retry. Concurrent callers that were rejected with the same token
    /// share one refresh.
    pub async fn refresh_after_unauthorized(&self, used_token: &str) -> bool {
        let _gate = self.refresh_gate.lock().await;
        let session = self.session();
        let (Some(username), Some(tokens), Some(site)) = (session.username, session.tokens, session.site) else {
            return false;
        };
        if tokens.access_token.expose_secret() != used_token {
            debug!("Token already refreshed by a concurrent request");
            return true;
        }
        self.refresh(&username, &tokens.refresh_token, site.as_str())
            .await
            .is_ok()
    }

    pub fn logout(&self, options: LogoutOptions) {
        self.bump_generation();
        if let Err(e) = self.credentials.clear() {
            warn!("Failed to delete persisted credentials: {}", e);
        }
        self.state.cache().clear();
        self.state.replace_session(Session::logged_out());
        self.state.announce_session();
        info!("Logged out");

        if !(options.no_redirect && self.state.screen() == Screen::Login) {
            self.state.set_screen(Screen::Login);
            self.state.events().publish(SyncEvent::Navigate { screen: Screen::Login });
        }
    }

    /// Wait until the session is `Authenticated` or `LoggedOut`. Never
    /// resolves on its own while the session is `Uninitialized`.
    pub async fn settled(&self) -> Session {
        let mut rx = self.state.watch_session();
        let settled = rx.wait_for(|s| s.state.is_settled()).await.map(|s| s.clone());
        settled.unwrap_or_else(|_| self.session())
    }

    /// Initialize if needed, then wait for a settled session.
    pub async fn ensure_ready(&self) -> Session {
        self.initialize().await;
        self.settled().await
    }

    // ============ Internal Helpers ============

    async fn exchange(&self, site: &Url, endpoint: &str, body: &impl Serialize) -> Result<LoginResponse, BError> {
        let url = paths::endpoint_url(site, &["auth", endpoint], "")?;
        let json = serde_json::to_value(body).map_err(|e| BError::unexpected(e.to_string()))?;
        let request = HttpRequest::new(Method::POST, url).with_body(RequestBody::Json(json));
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| error::classify_transport(&e))?;
        if let Some(err) = error::classify_login_status(response.status) {
            return Err(err);
        }
        response.parse::<LoginResponse>().map_err(|e| {
            warn!("Malformed {} response: {}", endpoint, e);
            BError::login_failed()
        })
    }

    fn install(&self, username: &str, response: LoginResponse, site: &Url) {
        let expires_at = response
            .valid_for_seconds
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
        let record = PersistedAuth {
            username: username.to_string(),
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            site: site.to_string(),
            expires_at,
        };
        self.install_record(record, site);
    }

    fn install_record(&self, record: PersistedAuth, site: &Url) {
        if let Err(e) = self.credentials.save(&record) {
            warn!("Failed to persist credentials: {}", e);
        }
        self.bump_generation();
        self.state.cache().retain_token(record.access_token.expose_secret());
        self.state.replace_session(Session {
            state: SessionState::Authenticated,
            username: Some(record.username),
            tokens: Some(Tokens {
                access_token: record.access_token,
                refresh_token: record.refresh_token,
            }),
            site: Some(site.clone()),
            expires_at: record.expires_at,
        });
        self.state.announce_session();
    }

    fn reset(&self, clear_persisted: bool) {
        if clear_persisted {
            if let Err(e) = self.credentials.clear() {
                warn!("Failed to delete persisted credentials: {}", e);
            }
        }
        self.bump_generation();
        self.state.replace_session(Session::logged_out());
        self.state.announce_session();
    }
}
