//! # Playback Error Types
//!
//! Errors returned by the engine handle and by `PlaybackAdapter`
//! implementations.

use core_book::BookError;
use thiserror::Error;

/// Errors that can occur during playback operations.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Engine Lifecycle
    // ========================================================================
    /// The engine was closed; no further operations are accepted.
    #[error("Playback engine is closed")]
    Closed,

    /// The engine must be started from within a Tokio runtime.
    #[error("Playback engine requires a Tokio runtime: {0}")]
    NoRuntime(String),

    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown reading order item: {0}")]
    UnknownItem(String),

    #[error("Book error: {0}")]
    Book(#[from] BookError),

    // ========================================================================
    // Decoder Errors
    // ========================================================================
    /// Media could not be opened (file missing, stream refused).
    #[error("Audio source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),

    #[error("Seek position out of bounds: {0:?}")]
    SeekOutOfBounds(std::time::Duration),

    /// Attempted a transport operation with nothing loaded.
    #[error("No media loaded")]
    NoMediaLoaded,

    #[error("Audio device unavailable: {0}")]
    AudioDeviceUnavailable(String),

    /// Decoder-specific failure with its own error code.
    #[error("Decoder error {code}: {message}")]
    Adapter { code: i32, message: String },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PlaybackError {
    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlaybackError::SourceUnavailable(_) | PlaybackError::AudioDeviceUnavailable(_)
        )
    }

    /// Opaque code carried by `PlaybackError` events.
    pub fn code(&self) -> i32 {
        match self {
            PlaybackError::Adapter { code, .. } => *code,
            PlaybackError::SourceUnavailable(_) => 1001,
            PlaybackError::DecodingError(_) => 1002,
            PlaybackError::SeekOutOfBounds(_) => 1003,
            PlaybackError::NoMediaLoaded => 1004,
            PlaybackError::AudioDeviceUnavailable(_) => 1005,
            PlaybackError::IoError(_) => 1006,
            PlaybackError::Closed
            | PlaybackError::NoRuntime(_)
            | PlaybackError::InvalidConfig(_)
            | PlaybackError::UnknownItem(_)
            | PlaybackError::Book(_) => -1,
        }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
