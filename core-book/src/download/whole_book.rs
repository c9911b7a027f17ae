//! Aggregate download task over every item of a book.

use tracing::{info, instrument};

use super::task::ItemDownloadTask;
use crate::status::DownloadStatus;

/// Fans `fetch`/`cancel`/`delete` out to every item and aggregates their
/// status.
#[derive(Debug, Clone)]
pub struct WholeBookDownloadTask {
    book_id: String,
    tasks: Vec<ItemDownloadTask>,
}

impl WholeBookDownloadTask {
    pub(crate) fn new(book_id: impl Into<String>, tasks: Vec<ItemDownloadTask>) -> Self {
        Self {
            book_id: book_id.into(),
            tasks,
        }
    }

    pub fn tasks(&self) -> &[ItemDownloadTask] {
        &self.tasks
    }

    #[instrument(skip(self), fields(book = %self.book_id))]
    pub fn fetch(&self) {
        info!(items = self.tasks.len(), "Fetching whole book");
        for task in &self.tasks {
            task.fetch();
        }
    }

    /// Cancels every running item download. Returns how many were running.
    #[instrument(skip(self), fields(book = %self.book_id))]
    pub fn cancel(&self) -> usize {
        self.tasks.iter().filter(|task| task.cancel()).count()
    }

    #[instrument(skip(self), fields(book = %self.book_id))]
    pub fn delete(&self) {
        info!(items = self.tasks.len(), "Deleting whole book");
        for task in &self.tasks {
            task.delete();
        }
    }

    /// Arithmetic mean of the per-item progress values.
    pub fn progress(&self) -> f64 {
        if self.tasks.is_empty() {
            return 0.0;
        }
        let total: f64 = self.tasks.iter().map(|task| task.progress()).sum();
        total / self.tasks.len() as f64
    }

    /// Aggregated status: `Downloaded` when every item is, `Downloading`
    /// (with the mean progress) while any item is, `Failed` when any item
    /// failed or expired, `NotDownloaded` otherwise.
    pub fn status(&self) -> DownloadStatus {
        let statuses: Vec<DownloadStatus> = self.tasks.iter().map(|task| task.status()).collect();

        if !statuses.is_empty() && statuses.iter().all(DownloadStatus::is_downloaded) {
            return DownloadStatus::Downloaded;
        }

        if statuses.iter().any(DownloadStatus::is_downloading) {
            let total: f64 = statuses.iter().map(DownloadStatus::progress).sum();
            return DownloadStatus::Downloading {
                progress: total / statuses.len() as f64,
            };
        }

        let failures: Vec<String> = statuses
            .iter()
            .filter_map(|status| match status {
                DownloadStatus::Failed { message, .. } | DownloadStatus::Expired { message, .. } => {
                    Some(message.clone())
                }
                _ => None,
            })
            .collect();
        if !failures.is_empty() {
            return DownloadStatus::Failed {
                cause: format!("{} item(s) failed", failures.len()),
                message: failures.join("; "),
            };
        }

        DownloadStatus::NotDownloaded
    }
}
