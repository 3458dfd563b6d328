//! Shared wire types
//!
//! Request bodies sent to the Bulgur server and the response payloads this
//! client accepts. Every response type implements [`Schema`] so it is checked
//! at the boundary and reaches callers fully typed.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};

use super::Schema;
use crate::error::ValidationError;

/// The body of a mutating `POST /storage/{path}`. Exactly one per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum StorageAction {
    MakePathToken,
    Move { new_path: String },
    CreateFolder,
}

/// One row of a folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    pub name: String,
    pub is_file: bool,
    pub size: u64,
}

impl FolderEntry {
    pub fn folder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_file: false,
            size: 0,
        }
    }

    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            is_file: true,
            size,
        }
    }
}

/// `GET /storage/{path}` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FolderResults {
    pub entries: Vec<FolderEntry>,
}

impl Schema for FolderResults {
    fn check(&self) -> Result<(), ValidationError> {
        if let Some(bad) = self
            .entries
            .iter()
            .find(|e| e.name.is_empty() || e.name.contains('/'))
        {
            return Err(ValidationError::InvalidField {
                field: "entries.name",
                reason: format!("{:?} is not a valid entry name", bad.name),
            });
        }
        Ok(())
    }
}

pub(crate) fn expose<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// `POST /auth/login` body.
#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub username: String,
    #[serde(serialize_with = "expose")]
    pub password: SecretString,
}

/// `POST /auth/refresh` body.
#[derive(Debug, Serialize)]
pub struct RefreshRequest {
    pub username: String,
    #[serde(serialize_with = "expose")]
    pub refresh_token: SecretString,
}

/// Login and refresh share one response shape.
#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    #[serde(default)]
    pub valid_for_seconds: Option<u64>,
}

impl Schema for LoginResponse {
    fn check(&self) -> Result<(), ValidationError> {
        if self.access_token.expose_secret().is_empty() {
            return Err(ValidationError::InvalidField {
                field: "access_token",
                reason: "empty".to_string(),
            });
        }
        if self.refresh_token.expose_secret().is_empty() {
            return Err(ValidationError::InvalidField {
                field: "refresh_token",
                reason: "empty".to_string(),
            });
        }
        Ok(())
    }
}

/// `MakePathToken` response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PathTokenResponse {
    pub token: String,
}

impl Schema for PathTokenResponse {
    fn check(&self) -> Result<(), ValidationError> {
        if self.token.is_empty() {
            return Err(ValidationError::InvalidField {
                field: "token",
                reason: "empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::parse_payload;

    #[test]
    fn test_storage_action_tags() {
        assert_eq!(
            serde_json::to_value(StorageAction::CreateFolder).unwrap(),
            serde_json::json!({"action": "CreateFolder"})
        );
        assert_eq!(
            serde_json::to_value(StorageAction::MakePathToken).unwrap(),
            serde_json::json!({"action": "MakePathToken"})
        );
        assert_eq!(
            serde_json::to_value(StorageAction::Move {
                new_path: "testuser/b".into()
            })
            .unwrap(),
            serde_json::json!({"action": "Move", "new_path": "testuser/b"})
        );
    }

    #[test]
    fn test_login_request_exposes_password_only_on_wire() {
        let req = LoginRequest {
            username: "testuser".into(),
            password: SecretString::from("hunter2"),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["password"], "hunter2");
        assert!(!format!("{:?}", req).contains("hunter2"));
    }

    #[test]
    fn test_folder_results_schema() {
        let ok: FolderResults = parse_payload(
            br#"{"entries":[{"name":"a.txt","is_file":true,"size":10},{"name":"docs","is_file":false,"size":0}]}"#,
        )
        .unwrap();
        assert_eq!(ok.entries.len(), 2);

        let missing = parse_payload::<FolderResults>(br#"{"entries":[{"name":"a"}]}"#);
        assert!(matches!(missing, Err(ValidationError::Malformed(_))));

        let negative =
            parse_payload::<FolderResults>(br#"{"entries":[{"name":"a","is_file":true,"size":-1}]}"#);
        assert!(negative.is_err());

        let slash = parse_payload::<FolderResults>(
            br#"{"entries":[{"name":"a/b","is_file":true,"size":1}]}"#,
        );
        assert!(matches!(slash, Err(ValidationError::InvalidField { .. })));
    }

    #[test]
    fn test_login_response_schema() {
        let ok: LoginResponse = parse_payload(
            br#"{"access_token":"a","refresh_token":"r","valid_for_seconds":3600}"#,
        )
        .unwrap();
        assert_eq!(ok.valid_for_seconds, Some(3600));
        assert!(parse_payload::<LoginResponse>(br#"{"access_token":"a"}"#).is_err());
        assert!(
            parse_payload::<LoginResponse>(br#"{"access_token":"","refresh_token":"r"}"#).is_err()
        );
    }
}
