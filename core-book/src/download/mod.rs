//! # Download Coordination
//!
//! Every reading-order item owns an [`ItemDownloadTask`] that drives its
//! download status; [`WholeBookDownloadTask`] fans the same operations out
//! over the whole book.
//!
//! ## Status transitions
//!
//! ```text
//!                 fetch()                 provider Ok
//! NotDownloaded ──────────> Downloading ─────────────> Downloaded
//!      ^   ^                  │  │  │                      │
//!      │   └──── cancel() ────┘  │  │ provider Err         │ delete()
//!      │                         │  └──────> Failed ───────┤
//!      │     (expiring link)     └─────────> Expired ──────┤
//!      └───────────────────────────────────────────────────┘
//! ```
//!
//! Each transition is written under the item's status lock and broadcast on
//! the book's status channel before the lock is released.
//!
//! ## Transport
//!
//! The request is offered to each registered `DownloadExtension` in order;
//! the first that returns a future performs the transfer. Otherwise the
//! default `DownloadProvider` does.

mod task;
mod whole_book;

pub use task::ItemDownloadTask;
pub use whole_book::WholeBookDownloadTask;

use std::path::{Path, PathBuf};

/// File extension used for downloaded items.
pub const AUDIO_FILE_EXTENSION: &str = "audio";

/// Where the media of one item is stored:
/// `<download_dir>/<book id>/<index>-<item id>.audio`, with both identifiers
/// reduced to filesystem-safe characters.
pub fn item_output_path(download_dir: &Path, book_id: &str, index: usize, item_id: &str) -> PathBuf {
    download_dir
        .join(sanitize_component(book_id))
        .join(format!(
            "{}-{}.{}",
            index,
            sanitize_component(item_id),
            AUDIO_FILE_EXTENSION
        ))
}

fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}
