//! Download task of a single reading-order item.

use bridge_traits::download::{
    DownloadExtension, DownloadFuture, DownloadKind, DownloadProvider, DownloadRequest,
};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use core_runtime::logging::{redact_if_sensitive, strip_path};
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::reading_order::{ReadingOrder, ReadingOrderId, ReadingOrderItem};
use crate::status::{DownloadStatus, DownloadStatusChange, StatusChannel};

enum TaskState {
    Idle,
    Running {
        attempt: u64,
        token: CancellationToken,
    },
}

struct TaskInner {
    order: Arc<ReadingOrder>,
    index: usize,
    output_path: PathBuf,
    provider: Arc<dyn DownloadProvider>,
    extensions: Vec<Arc<dyn DownloadExtension>>,
    channel: StatusChannel,
    runtime: Handle,
    attempts: AtomicU64,
    state: Mutex<TaskState>,
}

/// Owns the download lifecycle of one reading-order item.
///
/// Cloning is cheap; clones drive the same task.
#[derive(Clone)]
pub struct ItemDownloadTask {
    inner: Arc<TaskInner>,
}

impl ItemDownloadTask {
    pub(crate) fn new(
        order: Arc<ReadingOrder>,
        index: usize,
        output_path: PathBuf,
        provider: Arc<dyn DownloadProvider>,
        extensions: Vec<Arc<dyn DownloadExtension>>,
        channel: StatusChannel,
        runtime: Handle,
    ) -> Self {
        let inner = TaskInner {
            order,
            index,
            output_path,
            provider,
            extensions,
            channel,
            runtime,
            attempts: AtomicU64::new(0),
            state: Mutex::new(TaskState::Idle),
        };

        if inner.output_path.is_file() {
            *inner.item().status_cell() = DownloadStatus::Downloaded;
            debug!(
                item = %inner.item().id(),
                file = %file_name(&inner.output_path),
                "Found previously downloaded item"
            );
        }

        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn item_id(&self) -> &ReadingOrderId {
        self.inner.item().id()
    }

    pub fn index(&self) -> usize {
        self.inner.index
    }

    /// Location of the downloaded media.
    pub fn output_path(&self) -> &Path {
        &self.inner.output_path
    }

    pub fn status(&self) -> DownloadStatus {
        self.inner.item().download_status()
    }

    /// Download progress in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        self.status().progress()
    }

    /// Starts the download.
    ///
    /// Does nothing if the item is already downloaded. If a download is
    /// already running, its current status is broadcast again.
    #[instrument(skip(self), fields(item = %self.item_id()))]
    pub fn fetch(&self) {
        let inner = &self.inner;
        let item = inner.item();

        let mut state = inner.state.lock();
        let attempt;
        let token;
        {
            let mut status = item.status_cell();
            match &*status {
                DownloadStatus::Downloaded => {
                    debug!("Already downloaded");
                    return;
                }
                DownloadStatus::Downloading { .. } => {
                    debug!("Download in progress, rebroadcasting status");
                    inner.publish(status.clone());
                    return;
                }
                _ => {}
            }

            if let Some(parent) = inner.output_path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!(error = %e, "Cannot create download directory");
                    *status = DownloadStatus::Failed {
                        cause: "io".to_string(),
                        message: e.to_string(),
                    };
                    inner.publish(status.clone());
                    return;
                }
            }

            attempt = inner.attempts.fetch_add(1, Ordering::Relaxed) + 1;
            token = CancellationToken::new();
            *state = TaskState::Running {
                attempt,
                token: token.clone(),
            };
            *status = DownloadStatus::Downloading { progress: 0.0 };
            inner.publish(status.clone());
        }
        drop(state);

        let request = inner.request(Arc::downgrade(inner), attempt);
        info!(
            attempt,
            uri = %redact_if_sensitive("uri", request.uri()),
            "Starting download"
        );
        let transfer = inner.transport(request);

        let task = Arc::clone(inner);
        inner.runtime.spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => Err(BridgeError::Cancelled),
                result = transfer => result,
            };
            task.complete(attempt, outcome);
        });
    }

    /// Cancels a running download and discards partial data.
    ///
    /// Returns `false` (and does nothing) if no download was running.
    #[instrument(skip(self), fields(item = %self.item_id()))]
    pub fn cancel(&self) -> bool {
        let mut state = self.inner.state.lock();
        self.inner.cancel_locked(&mut state)
    }

    /// Removes the downloaded media and returns the item to `NotDownloaded`.
    ///
    /// A running download is cancelled first. Failed and expired items are
    /// reset so they can be fetched again.
    #[instrument(skip(self), fields(item = %self.item_id()))]
    pub fn delete(&self) {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if inner.cancel_locked(&mut state) {
            return;
        }

        let mut status = inner.item().status_cell();
        match &*status {
            DownloadStatus::Downloaded => {
                remove_file_if_present(&inner.output_path);
                info!("Deleted downloaded item");
            }
            DownloadStatus::Failed { .. } | DownloadStatus::Expired { .. } => {
                debug!("Clearing failed download");
            }
            DownloadStatus::NotDownloaded | DownloadStatus::Downloading { .. } => {
                debug!("Nothing to delete");
                return;
            }
        }
        *status = DownloadStatus::NotDownloaded;
        inner.publish(status.clone());
    }
}

impl fmt::Debug for ItemDownloadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemDownloadTask")
            .field("item", self.item_id())
            .field("index", &self.inner.index)
            .field("status", &self.status().name())
            .finish()
    }
}

impl TaskInner {
    fn item(&self) -> &ReadingOrderItem {
        &self.order[self.index]
    }

    fn publish(&self, status: DownloadStatus) {
        let item = self.item();
        self.channel.publish(DownloadStatusChange {
            item_id: item.id().clone(),
            index: self.index,
            status,
        });
    }

    fn request(&self, weak: Weak<TaskInner>, attempt: u64) -> DownloadRequest {
        let item = self.item();
        DownloadRequest::new(item.id().as_str(), item.link(), self.output_path.clone())
            .kind(DownloadKind::Chapter)
            .on_progress(Arc::new(move |fraction| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_progress(attempt, fraction);
                }
            }))
    }

    fn transport(&self, request: DownloadRequest) -> DownloadFuture {
        for extension in &self.extensions {
            if let Some(future) = extension.on_download_link(Arc::clone(&self.provider), &request) {
                debug!(extension = extension.name(), "Extension took over download");
                return future;
            }
        }

        let provider = Arc::clone(&self.provider);
        Box::pin(async move { provider.download(request).await })
    }

    fn on_progress(&self, attempt: u64, fraction: f64) {
        let state = self.state.lock();
        if !matches!(&*state, TaskState::Running { attempt: current, .. } if *current == attempt) {
            return;
        }

        let mut status = self.item().status_cell();
        if let DownloadStatus::Downloading { progress } = &*status {
            if fraction > *progress {
                *status = DownloadStatus::Downloading { progress: fraction };
                self.publish(status.clone());
            }
        }
    }

    fn complete(&self, attempt: u64, outcome: BridgeResult<()>) {
        let mut state = self.state.lock();
        if !matches!(&*state, TaskState::Running { attempt: current, .. } if *current == attempt) {
            debug!(attempt, "Ignoring completion of superseded download");
            return;
        }
        *state = TaskState::Idle;

        let next = match outcome {
            Ok(()) => {
                info!(item = %self.item().id(), "Download finished");
                DownloadStatus::Downloaded
            }
            Err(e) if e.is_cancelled() => {
                info!(item = %self.item().id(), "Download cancelled by provider");
                remove_file_if_present(&self.output_path);
                DownloadStatus::NotDownloaded
            }
            Err(e) => {
                remove_file_if_present(&self.output_path);
                let cause = error_cause(&e).to_string();
                let message = e.to_string();
                if self.item().link().expires {
                    warn!(item = %self.item().id(), error = %message, "Download link expired");
                    DownloadStatus::Expired { cause, message }
                } else {
                    warn!(item = %self.item().id(), error = %message, "Download failed");
                    DownloadStatus::Failed { cause, message }
                }
            }
        };

        let mut status = self.item().status_cell();
        *status = next;
        self.publish(status.clone());
    }

    fn cancel_locked(&self, state: &mut TaskState) -> bool {
        let TaskState::Running { token, attempt } = std::mem::replace(state, TaskState::Idle) else {
            debug!("No download running");
            return false;
        };

        token.cancel();
        remove_file_if_present(&self.output_path);

        let mut status = self.item().status_cell();
        *status = DownloadStatus::NotDownloaded;
        self.publish(status.clone());
        info!(attempt, "Download cancelled");
        true
    }
}

fn error_cause(error: &BridgeError) -> &'static str {
    match error {
        BridgeError::NotAvailable(_) => "not_available",
        BridgeError::OperationFailed(_) => "operation_failed",
        BridgeError::Cancelled => "cancelled",
        BridgeError::Io(_) => "io",
    }
}

fn file_name(path: &Path) -> String {
    strip_path(&path.to_string_lossy()).to_string()
}

fn remove_file_if_present(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(file = %file_name(path), "Removed download file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(file = %file_name(path), error = %e, "Failed to remove download file"),
    }
}
