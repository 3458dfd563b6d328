// Bulgur Sync Upload Pool
// Semaphore-bounded upload engine with per-file progress tracking

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use futures_util::future::join_all;
use http::Method;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::api::{PartSource, ProgressFn, UploadPart};
use crate::config::DEFAULT_CONCURRENT_UPLOADS;
use crate::error::BError;
use crate::events::SyncEvent;
use crate::paths;
use crate::pipeline::{expect_success, Endpoint, RequestPipeline, RequestSpec};
use crate::state::AppState;
use crate::storage::StorageClient;

/// Progress of one file in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadTask {
    pub id: u64,
    pub name: String,
    pub total_bytes: u64,
    pub bytes_done: u64,
}

/// Every upload task currently visible to the UI.
#[derive(Default)]
pub struct UploadTracker {
    tasks: Mutex<BTreeMap<u64, UploadTask>>,
    next_id: AtomicU64,
}

impl UploadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, UploadTask>> {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn register(&self, name: &str, total_bytes: u64) -> UploadTask {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = UploadTask {
            id,
            name: name.to_string(),
            total_bytes,
            bytes_done: 0,
        };
        self.lock().insert(id, task.clone());
        task
    }

    /// Update one task; other tasks are never touched.
    pub fn progress(&self, id: u64, bytes_done: u64, total_bytes: u64) -> Option<UploadTask> {
        let mut tasks = self.lock();
        let task = tasks.get_mut(&id)?;
        task.bytes_done = bytes_done.min(total_bytes);
        task.total_bytes = total_bytes;
        Some(task.clone())
    }

    pub fn remove(&self, id: u64) -> Option<UploadTask> {
        self.lock().remove(&id)
    }

    pub fn get(&self, id: u64) -> Option<UploadTask> {
        self.lock().get(&id).cloned()
    }

    /// Tasks in registration order.
    pub fn snapshot(&self) -> Vec<UploadTask> {
        self.lock().values().cloned().collect()
    }
}

/// A file accepted for upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub size: u64,
    source: PartSource,
}

impl UploadFile {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            source: PartSource::Bytes(data),
        }
    }

    /// Streamed from disk at send time; only the size is read now.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"))?;
        Ok(Self {
            name,
            size: metadata.len(),
            source: PartSource::File(path.to_path_buf()),
        })
    }

    fn part(&self) -> UploadPart {
        UploadPart {
            field: self.name.clone(),
            file_name: self.name.clone(),
            size: self.size,
            source: self.source.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadError {
    pub name: String,
    pub error: BError,
}

/// Result of a batch. Per-file failures do not fail the batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadSummary {
    pub uploaded: Vec<String>,
    pub errors: Vec<UploadError>,
    pub duration_ms: u64,
}

impl UploadSummary {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Clone)]
pub struct UploadOrchestrator {
    state: Arc<AppState>,
    pipeline: Arc<RequestPipeline>,
    storage: StorageClient,
    limit: Arc<Semaphore>,
}

impl UploadOrchestrator {
    pub fn new(state: Arc<AppState>, pipeline: Arc<RequestPipeline>, storage: StorageClient, max_concurrent: usize) -> Self {
        let permits = if max_concurrent == 0 {
            DEFAULT_CONCURRENT_UPLOADS as usize
        } else {
            max_concurrent
        };
        Self {
            state,
            pipeline,
            storage,
            limit: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Upload `files` into the folder `path`. The batch runs on its own task,
    /// so dropping the returned future does not stop it.
    pub async fn upload(&self, path: &str, files: Vec<UploadFile>) -> UploadSummary {
        let this = self.clone();
        let folder = paths::normalize(path);
        let handle = tokio::spawn(async move { this.run_batch(folder, files).await });
        match handle.await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Upload batch task failed: {}", e);
                UploadSummary {
                    errors: vec![UploadError {
                        name: String::new(),
                        error: BError::unexpected(e.to_string()),
                    }],
                    ..Default::default()
                }
            }
        }
    }

    async fn run_batch(&self, folder: String, files: Vec<UploadFile>) -> UploadSummary {
        let start = Instant::now();
        let tracker = self.state.uploads();

        let admitted: Vec<(UploadTask, UploadFile)> = files
            .into_iter()
            .map(|file| {
                let task = tracker.register(&file.name, file.size);
                self.publish_progress(&task);
                (task, file)
            })
            .collect();
        info!("Uploading {} file(s) to {}", admitted.len(), folder);

        let results = join_all(
            admitted
                .into_iter()
                .map(|(task, file)| self.upload_one(&folder, task, file)),
        )
        .await;

        // Final consistency pass for the whole batch
        self.storage.invalidate_folder(&folder);

        let mut summary = UploadSummary::default();
        for (name, result) in results {
            match result {
                Ok(()) => summary.uploaded.push(name),
                Err(error) => summary.errors.push(UploadError { name, error }),
            }
        }
        summary.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Upload batch to {} done: {} ok, {} failed in {} ms",
            folder,
            summary.uploaded.len(),
            summary.errors.len(),
            summary.duration_ms
        );
        summary
    }

    async fn upload_one(&self, folder: &str, task: UploadTask, file: UploadFile) -> (String, Result<(), BError>) {
        let result = self.send_file(folder, &task, &file).await;

        let tracker = self.state.uploads();
        if let Some(zeroed) = tracker.progress(task.id, 0, 0) {
            self.publish_progress(&zeroed);
        }
        tracker.remove(task.id);
        self.state.events().publish(SyncEvent::UploadFinished {
            id: task.id,
            name: task.name.clone(),
        });

        if let Err(error) = &result {
            warn!("Upload of {} failed: {}", task.name, error);
            self.state.events().publish(SyncEvent::Error { error: error.clone() });
        }
        (task.name, result)
    }

    async fn send_file(&self, folder: &str, task: &UploadTask, file: &UploadFile) -> Result<(), BError> {
        let _permit = self
            .limit
            .acquire()
            .await
            .map_err(|_| BError::unexpected("upload pool closed"))?;
        debug!("Admitted {} ({} bytes)", task.name, task.total_bytes);

        let completed = Arc::new(AtomicBool::new(false));
        let progress: ProgressFn = {
            let state = self.state.clone();
            let storage = self.storage.clone();
            let completed = completed.clone();
            let folder = folder.to_string();
            let id = task.id;
            Arc::new(move |done, total| {
                if let Some(updated) = state.uploads().progress(id, done, total) {
                    state.events().publish(progress_event(&updated));
                }
                if done == total && !completed.swap(true, Ordering::SeqCst) {
                    storage.invalidate_folder(&folder);
                }
            })
        };

        let spec = RequestSpec::new(Method::PUT, Endpoint::storage(folder))
            .with_form(vec![file.part()])
            .with_progress(progress.clone());
        expect_success(self.pipeline.send(&spec).await?)?;

        // Empty files produce no body chunks, so no progress tick ever fires.
        if !completed.load(Ordering::SeqCst) {
            progress(task.total_bytes, task.total_bytes);
        }
        Ok(())
    }

    fn publish_progress(&self, task: &UploadTask) {
        self.state.events().publish(progress_event(task));
    }
}

fn progress_event(task: &UploadTask) -> SyncEvent {
    SyncEvent::UploadProgress {
        id: task.id,
        name: task.name.clone(),
        bytes_done: task.bytes_done,
        total_bytes: task.total_bytes,
    }
}
