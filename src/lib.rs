// Bulgur Sync - authenticated storage client for Bulgur Cloud
// Session lifecycle, cached folder listings and bounded parallel uploads

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod events;
pub mod paths;
pub mod pipeline;
pub mod session_manager;
pub mod state;
pub mod storage;
pub mod transfer_pool;

pub use api::{FolderEntry, HttpRequest, HttpResponse, StorageAction, Transport, TransportError};
pub use client::Client;
pub use config::ClientConfig;
pub use error::{BError, ErrorKind};
pub use events::{Screen, SyncEvent};
pub use session_manager::{LogoutOptions, Session, SessionState};
pub use transfer_pool::{UploadFile, UploadSummary, UploadTask};
