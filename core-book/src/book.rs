//! # Audio Book
//!
//! The open book: its reading order, one download task per item, the
//! whole-book aggregate, and the channels the playback engine listens to.
//!
//! ## Usage
//!
//! ```ignore
//! use core_book::{AudioBook, Manifest};
//!
//! let book = AudioBook::open(&manifest, &config)?;
//! let mut changes = book.subscribe_status();
//!
//! book.download_task(0).unwrap().fetch();
//! while let Ok(change) = changes.recv().await {
//!     println!("{} -> {}", change.item_id, change.status.name());
//! }
//! ```

use core_runtime::config::PlayerConfig;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::download::{item_output_path, ItemDownloadTask, WholeBookDownloadTask};
use crate::error::{BookError, Result};
use crate::manifest::Manifest;
use crate::reading_order::{ReadingOrder, ReadingOrderItem};
use crate::status::{DownloadStatus, StatusChannel, StatusReceiver};

const MANIFEST_CHANNEL_CAPACITY: usize = 16;

/// Notification that a replacement manifest was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestReplaced {
    pub book_id: String,
    pub item_count: usize,
}

pub struct AudioBook {
    id: String,
    title: RwLock<String>,
    order: Arc<ReadingOrder>,
    tasks: Vec<ItemDownloadTask>,
    whole_book: WholeBookDownloadTask,
    status: StatusChannel,
    manifest_updates: broadcast::Sender<ManifestReplaced>,
}

impl AudioBook {
    /// Opens a book from its manifest.
    ///
    /// Must be called from within a Tokio runtime; download tasks spawn onto
    /// it. Items whose media is already present in the download directory
    /// start out `Downloaded`.
    ///
    /// # Errors
    ///
    /// - [`BookError::EmptyReadingOrder`] / [`BookError::DuplicateItem`] for
    ///   malformed reading orders
    /// - [`BookError::Runtime`] if the configuration is invalid
    /// - [`BookError::NoRuntime`] outside a Tokio runtime
    #[instrument(skip_all, fields(book = %manifest.id))]
    pub fn open(manifest: &Manifest, config: &PlayerConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| BookError::NoRuntime(e.to_string()))?;
        let order = Arc::new(ReadingOrder::from_manifest(manifest)?);
        let status = StatusChannel::new();

        let tasks: Vec<ItemDownloadTask> = order
            .iter()
            .map(|item| {
                ItemDownloadTask::new(
                    Arc::clone(&order),
                    item.index(),
                    item_output_path(
                        &config.download_dir,
                        &manifest.id,
                        item.index(),
                        item.id().as_str(),
                    ),
                    Arc::clone(&config.download_provider),
                    config.download_extensions.clone(),
                    status.clone(),
                    runtime.clone(),
                )
            })
            .collect();

        let whole_book = WholeBookDownloadTask::new(manifest.id.clone(), tasks.clone());
        let (manifest_updates, _) = broadcast::channel(MANIFEST_CHANNEL_CAPACITY);

        let downloaded = order
            .iter()
            .filter(|item| item.download_status().is_downloaded())
            .count();
        info!(
            items = order.len(),
            downloaded,
            extensions = config.download_extensions.len(),
            "Opened book"
        );

        Ok(Self {
            id: manifest.id.clone(),
            title: RwLock::new(manifest.title.clone()),
            order,
            tasks,
            whole_book,
            status,
            manifest_updates,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> String {
        self.title.read().clone()
    }

    pub fn reading_order(&self) -> &ReadingOrder {
        &self.order
    }

    pub fn item(&self, index: usize) -> Option<&ReadingOrderItem> {
        self.order.get(index)
    }

    pub fn download_task(&self, index: usize) -> Option<&ItemDownloadTask> {
        self.tasks.get(index)
    }

    pub fn download_task_for(&self, item_id: &str) -> Option<&ItemDownloadTask> {
        self.order
            .by_id(item_id)
            .and_then(|item| self.tasks.get(item.index()))
    }

    pub fn whole_book_task(&self) -> &WholeBookDownloadTask {
        &self.whole_book
    }

    pub fn download_status(&self, index: usize) -> Option<DownloadStatus> {
        self.order.get(index).map(ReadingOrderItem::download_status)
    }

    /// Receives every download status transition of every item.
    pub fn subscribe_status(&self) -> StatusReceiver {
        self.status.subscribe()
    }

    pub fn subscribe_manifest_updates(&self) -> broadcast::Receiver<ManifestReplaced> {
        self.manifest_updates.subscribe()
    }

    /// Applies a refreshed manifest, typically one carrying renewed links
    /// after downloads expired.
    ///
    /// The new manifest must describe the same book with the same number of
    /// reading-order items. On mismatch nothing is changed and the book keeps
    /// working with its current manifest.
    #[instrument(skip_all, fields(book = %self.id))]
    pub fn replace_manifest(&self, manifest: &Manifest) -> Result<()> {
        if manifest.id != self.id {
            warn!(received = %manifest.id, "Rejected manifest for another book");
            return Err(BookError::BookIdMismatch {
                expected: self.id.clone(),
                received: manifest.id.clone(),
            });
        }

        if manifest.reading_order.len() != self.order.len() {
            warn!(
                expected = self.order.len(),
                received = manifest.reading_order.len(),
                "Rejected manifest with a different reading order"
            );
            return Err(BookError::ItemCountMismatch {
                expected: self.order.len(),
                received: manifest.reading_order.len(),
            });
        }

        for (item, entry) in self.order.iter().zip(&manifest.reading_order) {
            item.replace_link(entry.link());
            if let Some(duration) = entry.duration_ms() {
                if item.set_duration_ms(duration) {
                    debug!(item = %item.id(), duration, "Duration learned from manifest");
                }
            }
        }
        *self.title.write() = manifest.title.clone();

        let _ = self.manifest_updates.send(ManifestReplaced {
            book_id: self.id.clone(),
            item_count: self.order.len(),
        });
        info!(items = self.order.len(), "Manifest replaced");
        Ok(())
    }
}

impl fmt::Debug for AudioBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioBook")
            .field("id", &self.id)
            .field("items", &self.order.len())
            .finish()
    }
}
