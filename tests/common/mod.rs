#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bulgur_sync::api::{HttpRequest, HttpResponse, RequestBody, Transport, TransportError};
use bulgur_sync::credential_store::{KeyValueStore, MemoryStore};
use bulgur_sync::{Client, ClientConfig};
use http::{Method, StatusCode};
use serde_json::json;

pub const SITE: &str = "http://bulgur.test";

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
    pub json: Option<serde_json::Value>,
    pub upload_fields: Vec<String>,
}

pub enum Reply {
    Status(u16),
    Json(u16, serde_json::Value),
    Body(u16, &'static str),
    Fail,
}

type Handler = Box<dyn Fn(&Recorded) -> Reply + Send + Sync>;

/// Scripted in-memory server. Multipart requests report progress in two
/// halves with a pause between them so concurrent uploads overlap.
pub struct MockTransport {
    handler: Handler,
    requests: Mutex<Vec<Recorded>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    upload_delay: Duration,
    route_delays: Mutex<Vec<(String, Duration)>>,
}

impl MockTransport {
    pub fn new(handler: impl Fn(&Recorded) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Self::with_delay(Duration::from_millis(20), handler)
    }

    pub fn with_delay(upload_delay: Duration, handler: impl Fn(&Recorded) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            upload_delay,
            route_delays: Mutex::new(Vec::new()),
        })
    }

    /// Hold every request to `path` for `delay` before answering.
    pub fn delay_route(&self, path: &str, delay: Duration) {
        self.route_delays.lock().unwrap().push((path.to_string(), delay));
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    pub fn peak_uploads(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let (json, parts) = match &request.body {
            RequestBody::Json(v) => (Some(v.clone()), Vec::new()),
            RequestBody::Multipart(parts) => (None, parts.clone()),
            RequestBody::Empty => (None, Vec::new()),
        };
        let recorded = Recorded {
            method: request.method.clone(),
            path: request.url.path().to_string(),
            authorization: request.authorization().map(str::to_owned),
            json,
            upload_fields: parts.iter().map(|p| p.field.clone()).collect(),
        };
        self.requests.lock().unwrap().push(recorded.clone());

        let route_delay = self
            .route_delays
            .lock()
            .unwrap()
            .iter()
            .find(|(path, _)| *path == recorded.path)
            .map(|(_, delay)| *delay);
        if let Some(delay) = route_delay {
            tokio::time::sleep(delay).await;
        }

        if request.is_multipart() {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let total: u64 = parts.iter().map(|p| p.size).sum();
            if let Some(progress) = &request.progress {
                progress(total / 2, total);
            }
            tokio::time::sleep(self.upload_delay).await;
            if let Some(progress) = &request.progress {
                progress(total, total);
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        } else {
            tokio::task::yield_now().await;
        }

        match (self.handler)(&recorded) {
            Reply::Status(code) => Ok(HttpResponse::new(status(code), "")),
            Reply::Json(code, value) => Ok(HttpResponse::new(status(code), value.to_string())),
            Reply::Body(code, body) => Ok(HttpResponse::new(status(code), body)),
            Reply::Fail => Err(TransportError::Connect("connection refused".into())),
        }
    }
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap()
}

pub fn tokens(access: &str, refresh: &str) -> serde_json::Value {
    json!({"access_token": access, "refresh_token": refresh, "valid_for_seconds": 3600})
}

/// A small stateful server: `testuser`/`secret`, one valid token at a time,
/// and a folder tree that reacts to create, delete, move and upload.
pub struct FakeServer {
    pub valid_token: Mutex<String>,
    pub refreshes: AtomicUsize,
    pub folders: Mutex<BTreeMap<String, Vec<(String, bool, u64)>>>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        let mut folders = BTreeMap::new();
        folders.insert("testuser".to_string(), vec![("docs".to_string(), false, 0)]);
        folders.insert("testuser/docs".to_string(), vec![]);
        Arc::new(Self {
            valid_token: Mutex::new("access-1".to_string()),
            refreshes: AtomicUsize::new(0),
            folders: Mutex::new(folders),
        })
    }

    fn storage_path(path: &str) -> Option<String> {
        path.strip_prefix("/storage/").map(|p| p.trim_end_matches('/').to_string())
    }

    fn split(path: &str) -> (String, String) {
        match path.rfind('/') {
            Some(i) => (path[..i].to_string(), path[i + 1..].to_string()),
            None => (String::new(), path.to_string()),
        }
    }

    pub fn handle(&self, req: &Recorded) -> Reply {
        match (req.method.as_str(), req.path.as_str()) {
            ("POST", "/auth/login") => {
                let body = req.json.clone().unwrap_or_default();
                if body["username"] == "testuser" && body["password"] == "secret" {
                    Reply::Json(200, tokens(&self.valid_token.lock().unwrap(), "refresh-1"))
                } else {
                    Reply::Status(400)
                }
            }
            ("POST", "/auth/refresh") => {
                let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 2;
                let token = format!("access-{}", n);
                *self.valid_token.lock().unwrap() = token.clone();
                Reply::Json(200, tokens(&token, "refresh-1"))
            }
            _ => {
                if req.authorization.as_deref() != Some(self.valid_token.lock().unwrap().as_str()) {
                    return Reply::Status(401);
                }
                if req.path == "/api/stats" {
                    return Reply::Status(200);
                }
                let Some(path) = Self::storage_path(&req.path) else {
                    return Reply::Status(404);
                };
                self.storage(req, &path)
            }
        }
    }

    fn storage(&self, req: &Recorded, path: &str) -> Reply {
        let mut folders = self.folders.lock().unwrap();
        match req.method.as_str() {
            "GET" => match folders.get(path) {
                Some(entries) => Reply::Json(
                    200,
                    json!({"entries": entries.iter().map(|(name, is_file, size)| json!({"name": name, "is_file": is_file, "size": size})).collect::<Vec<_>>()}),
                ),
                None => Reply::Status(404),
            },
            "HEAD" => {
                let (parent, name) = Self::split(path);
                let exists = folders.contains_key(path)
                    || folders.get(&parent).is_some_and(|e| e.iter().any(|(n, _, _)| *n == name));
                Reply::Status(if exists { 200 } else { 404 })
            }
            "PUT" => match folders.get_mut(path) {
                Some(entries) => {
                    for field in &req.upload_fields {
                        entries.push((field.clone(), true, 1));
                    }
                    Reply::Status(200)
                }
                None => Reply::Status(404),
            },
            "DELETE" => {
                let (parent, name) = Self::split(path);
                folders.remove(path);
                if let Some(entries) = folders.get_mut(&parent) {
                    entries.retain(|(n, _, _)| *n != name);
                }
                Reply::Status(200)
            }
            "POST" => {
                let body = req.json.clone().unwrap_or_default();
                match body["action"].as_str() {
                    Some("CreateFolder") => {
                        let (parent, name) = Self::split(path);
                        folders.entry(parent).or_default().push((name, false, 0));
                        folders.insert(path.to_string(), vec![]);
                        Reply::Status(200)
                    }
                    Some("Move") => {
                        let new_path = body["new_path"].as_str().unwrap_or_default().to_string();
                        let (from_parent, from_name) = Self::split(path);
                        let (to_parent, to_name) = Self::split(&new_path);
                        let mut moved = None;
                        if let Some(entries) = folders.get_mut(&from_parent) {
                            if let Some(i) = entries.iter().position(|(n, _, _)| *n == from_name) {
                                moved = Some(entries.remove(i));
                            }
                        }
                        match moved {
                            Some((_, is_file, size)) => {
                                folders.entry(to_parent).or_default().push((to_name, is_file, size));
                                Reply::Status(200)
                            }
                            None => Reply::Status(404),
                        }
                    }
                    Some("MakePathToken") => Reply::Json(200, json!({"token": "path-token-1"})),
                    _ => Reply::Status(400),
                }
            }
            _ => Reply::Status(405),
        }
    }
}

pub fn memory_backend() -> Arc<dyn KeyValueStore> {
    Arc::new(MemoryStore::new())
}

pub fn client_with(transport: Arc<MockTransport>, backend: Arc<dyn KeyValueStore>) -> Client {
    let config = ClientConfig {
        site: Some(SITE.to_string()),
        ..Default::default()
    };
    Client::new(config, transport, backend)
}

/// Fake server, transport and a client logged in as `testuser`.
pub async fn logged_in() -> (Client, Arc<MockTransport>, Arc<FakeServer>) {
    let server = FakeServer::new();
    let handler_server = server.clone();
    let transport = MockTransport::new(move |req| handler_server.handle(req));
    let client = client_with(transport.clone(), memory_backend());
    client
        .login("testuser", "secret".to_string().into(), None)
        .await
        .unwrap();
    (client, transport, server)
}
