//! Error classification
//!
//! Every failure that reaches a caller of this crate is a [`BError`]: a
//! `{code, title, description}` triple that can be shown to the user and
//! copied verbatim into a bug report. The set of kinds is closed
//! ([`ErrorKind`]) and classification is a pure function of the transport
//! outcome, the HTTP status and the payload shape.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::TransportError;

/// The closed taxonomy of user-visible failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NetworkFailure,
    MissingAuth,
    SiteUnset,
    BadCredentials,
    LoginFailed,
    Unauthorized,
    NotFound,
    LoadFolderFailed,
    ServerError,
    UnexpectedError,
    DataAndFormDataConflict,
}

impl ErrorKind {
    /// Stable machine-readable code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NetworkFailure => "network_failure",
            ErrorKind::MissingAuth => "missing_auth",
            ErrorKind::SiteUnset => "site_unset",
            ErrorKind::BadCredentials => "login_bad",
            ErrorKind::LoginFailed => "login_failed",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::LoadFolderFailed => "load_folder_failed",
            ErrorKind::ServerError => "server_error",
            ErrorKind::UnexpectedError => "unexpected_error",
            ErrorKind::DataAndFormDataConflict => "data_and_form_data",
        }
    }

    fn default_title(&self) -> &'static str {
        match self {
            ErrorKind::NetworkFailure => "Failed to connect to the server",
            ErrorKind::MissingAuth => "Authentication Data Missing",
            ErrorKind::SiteUnset => "Internal Error (site unset)",
            ErrorKind::BadCredentials => "Bad username or password",
            ErrorKind::LoginFailed => "Failed to log in or reauthenticate",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::NotFound => "Not found",
            ErrorKind::LoadFolderFailed => "Failed to load folder",
            ErrorKind::ServerError => "Internal server error",
            ErrorKind::UnexpectedError => "Unexpected error",
            ErrorKind::DataAndFormDataConflict => "Internal Implementation Error",
        }
    }
}

/// A structured, user-displayable error. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{title}: {description}")]
pub struct BError {
    #[serde(skip)]
    kind: ErrorKind,
    code: String,
    title: String,
    description: String,
}

impl BError {
    pub fn new(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code().to_string(),
            title: kind.default_title().to_string(),
            description: description.into(),
        }
    }

    pub fn with_title(kind: ErrorKind, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code().to_string(),
            title: title.into(),
            description: description.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    // ============ Constructors for the fixed messages ============

    pub fn network_failure(detail: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::NetworkFailure,
            format!("Make sure you have an internet connection. ({})", detail),
        )
    }

    pub fn missing_auth() -> Self {
        Self::new(
            ErrorKind::MissingAuth,
            "The saved session data may have been corrupted. Please log in again.",
        )
    }

    pub fn site_unset(detail: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::SiteUnset,
            format!(
                "An internal error has occurred, please send a bug report if you are seeing this. ({})",
                detail
            ),
        )
    }

    pub fn bad_credentials() -> Self {
        Self::new(
            ErrorKind::BadCredentials,
            "The username or password you tried to use is incorrect.",
        )
    }

    pub fn login_failed() -> Self {
        Self::new(
            ErrorKind::LoginFailed,
            "You may be trying to log in with the wrong password, the server may be having internal issues, or your account may have been deleted.",
        )
    }

    pub fn unauthorized(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, description)
    }

    pub fn not_found(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, description)
    }

    pub fn load_folder_failed(path: &str, reason: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::LoadFolderFailed,
            format!("Unable to load {}: {}", path, reason),
        )
    }

    pub fn server_error(status: StatusCode) -> Self {
        Self::new(
            ErrorKind::ServerError,
            format!("There was an error in the server. ({})", status_text(status)),
        )
    }

    pub fn unexpected(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnexpectedError, description)
    }

    pub fn unexpected_status(status: StatusCode) -> Self {
        Self::new(
            ErrorKind::UnexpectedError,
            format!("An unexpected error occurred. ({})", status_text(status)),
        )
    }

    pub fn data_and_form_data() -> Self {
        Self::new(
            ErrorKind::DataAndFormDataConflict,
            "Both the data and the form data fields have been provided for the request.",
        )
    }
}

fn status_text(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} - {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

/// A payload that failed schema validation at the response boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("response body was empty")]
    Empty,
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

// ============ Classification ============

/// The transport produced no response at all.
pub fn classify_transport(err: &TransportError) -> BError {
    match err {
        TransportError::Source { .. } => BError::unexpected(err.to_string()),
        _ => BError::network_failure(err),
    }
}

/// Generic status classification used by call sites that have no special
/// meaning for a status. Returns `None` for 2xx.
pub fn classify_status(status: StatusCode) -> Option<BError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::UNAUTHORIZED => {
            BError::unauthorized("You are not authorized to do this action.")
        }
        StatusCode::NOT_FOUND => BError::not_found("The requested path does not exist."),
        s if s.is_server_error() => BError::server_error(s),
        s => BError::unexpected_status(s),
    })
}

/// Status classification for the login and refresh endpoints.
pub fn classify_login_status(status: StatusCode) -> Option<BError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::BAD_REQUEST => BError::bad_credentials(),
        s if s.is_server_error() => BError::server_error(s),
        _ => BError::login_failed(),
    })
}
