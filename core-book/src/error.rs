use thiserror::Error;

#[derive(Error, Debug)]
pub enum BookError {
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Manifest {book_id} has an empty reading order")]
    EmptyReadingOrder { book_id: String },

    #[error("Reading order item {item_id} appears more than once")]
    DuplicateItem { item_id: String },

    /// A replacement manifest describes a different book.
    #[error("Manifest book id mismatch: expected {expected}, received {received}")]
    BookIdMismatch { expected: String, received: String },

    /// A replacement manifest has a different number of reading-order items.
    #[error("Manifest item count mismatch: expected {expected}, received {received}")]
    ItemCountMismatch { expected: usize, received: usize },

    #[error("Unknown reading order item: {0}")]
    UnknownItem(String),

    #[error("Download tasks require a Tokio runtime: {0}")]
    NoRuntime(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),
}

impl BookError {
    /// Returns `true` if the error was raised while validating a replacement manifest.
    pub fn is_manifest_mismatch(&self) -> bool {
        matches!(
            self,
            BookError::BookIdMismatch { .. } | BookError::ItemCountMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BookError>;
