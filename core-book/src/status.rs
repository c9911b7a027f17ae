//! Download status of a reading-order item and the channel that broadcasts
//! its transitions.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::reading_order::ReadingOrderId;

/// Buffer of the status broadcast channel, per subscriber.
pub const STATUS_CHANNEL_CAPACITY: usize = 256;

/// Download state of one reading-order item.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownloadStatus {
    #[default]
    NotDownloaded,
    /// Transfer in flight; `progress` is in `[0, 1]`.
    Downloading { progress: f64 },
    Downloaded,
    /// Generic failure. Retrying with the same link may succeed.
    Failed { cause: String, message: String },
    /// The link outlived its validity window. A fresh manifest is needed
    /// before retrying.
    Expired { cause: String, message: String },
}

impl DownloadStatus {
    pub fn is_downloaded(&self) -> bool {
        matches!(self, DownloadStatus::Downloaded)
    }

    pub fn is_downloading(&self) -> bool {
        matches!(self, DownloadStatus::Downloading { .. })
    }

    /// Progress contribution of this status: 1 when downloaded, the transfer
    /// fraction while downloading, 0 otherwise.
    pub fn progress(&self) -> f64 {
        match self {
            DownloadStatus::Downloaded => 1.0,
            DownloadStatus::Downloading { progress } => *progress,
            _ => 0.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DownloadStatus::NotDownloaded => "not_downloaded",
            DownloadStatus::Downloading { .. } => "downloading",
            DownloadStatus::Downloaded => "downloaded",
            DownloadStatus::Failed { .. } => "failed",
            DownloadStatus::Expired { .. } => "expired",
        }
    }
}

/// A status transition of one item, as broadcast to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadStatusChange {
    pub item_id: ReadingOrderId,
    pub index: usize,
    pub status: DownloadStatus,
}

pub type StatusReceiver = broadcast::Receiver<DownloadStatusChange>;

/// Sender side of the book-wide status channel.
#[derive(Debug, Clone)]
pub(crate) struct StatusChannel {
    sender: broadcast::Sender<DownloadStatusChange>,
}

impl StatusChannel {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub(crate) fn publish(&self, change: DownloadStatusChange) {
        // No subscribers is not an error.
        let _ = self.sender.send(change);
    }

    pub(crate) fn subscribe(&self) -> StatusReceiver {
        self.sender.subscribe()
    }
}
