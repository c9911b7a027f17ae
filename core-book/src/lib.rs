//! # Book Model
//!
//! Everything the player knows about an open audiobook apart from playback
//! itself:
//! - The manifest handed over by the host
//! - The reading order, with per-item duration, link and download status
//! - Per-item download tasks and the whole-book aggregate
//!
//! ## Overview
//!
//! [`AudioBook::open`] builds the reading order from a [`Manifest`] and
//! attaches a download task to every item. Download tasks are independent
//! of each other and of playback; the only thing they share with the
//! playback engine is the item's status cell, and the engine learns about
//! changes to it exclusively through [`AudioBook::subscribe_status`].

pub mod book;
pub mod download;
pub mod error;
pub mod manifest;
pub mod reading_order;
pub mod status;

pub use book::{AudioBook, ManifestReplaced};
pub use download::{item_output_path, ItemDownloadTask, WholeBookDownloadTask};
pub use error::{BookError, Result};
pub use manifest::{Manifest, ManifestItem};
pub use reading_order::{
    ChapterKey, OffsetTranslation, ReadingOrder, ReadingOrderId, ReadingOrderItem,
};
pub use status::{DownloadStatus, DownloadStatusChange, StatusReceiver};
