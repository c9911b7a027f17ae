//! # Decoder Abstraction
//!
//! The playback engine never decodes audio. It drives a host-provided
//! [`PlaybackAdapter`] (ExoPlayer, AVPlayer, a GStreamer pipeline, ...) and
//! listens to the adapter's callbacks through an
//! [`AdapterEventSink`](crate::engine::AdapterEventSink).
//!
//! ## Call pattern
//!
//! For every item the engine starts, the adapter sees:
//!
//! ```text
//! load(media) → prepare() → seek(offset) → play() | pause()
//! ```
//!
//! followed by any number of `seek`, `play`, `pause` and position queries,
//! and eventually `stop()` or another `load`. `release()` is called exactly
//! once, when the engine closes.
//!
//! ## Threading Model
//!
//! All calls come from the engine task, one at a time. Implementations must be
//! `Send + Sync` so the engine task can hold them.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Media Types
// ============================================================================

/// Where the decoder reads an item from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Downloaded media on the local filesystem.
    LocalFile {
        path: PathBuf,
    },

    /// The item's remote link, streamed directly.
    RemoteStream {
        url: String,
        /// HTTP headers to include in the request (e.g., Authorization)
        headers: HashMap<String, String>,
    },
}

impl AudioSource {
    /// Returns `true` if this source requires network access.
    pub fn is_remote(&self) -> bool {
        matches!(self, AudioSource::RemoteStream { .. })
    }
}

/// A reading-order item handed to the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
    pub item_id: String,
    pub item_index: usize,
    pub source: AudioSource,
}

impl MediaSource {
    pub fn is_streaming(&self) -> bool {
        self.source.is_remote()
    }
}

// ============================================================================
// Adapter Callbacks
// ============================================================================

/// Notifications a decoder posts back to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdapterEvent {
    /// The decoder reached the end of `item_id`.
    TrackEnded { item_id: String },
    /// The decoder failed. The engine reports it and keeps its state.
    Error { code: i32, message: String },
    /// The decoder stalled waiting for data while rendering `item_id`.
    Buffering { item_id: String },
}

// ============================================================================
// Core Trait
// ============================================================================

/// Host audio decoder/renderer.
///
/// ## Example
///
/// ```rust,no_run
/// # use core_playback::{MediaSource, PlaybackAdapter};
/// # use std::time::Duration;
/// # struct MyAdapter;
/// # #[async_trait::async_trait]
/// # impl PlaybackAdapter for MyAdapter {
/// #     async fn load(&self, media: MediaSource) -> core_playback::Result<()> { unimplemented!() }
/// #     async fn prepare(&self) -> core_playback::Result<()> { unimplemented!() }
/// #     async fn seek(&self, position: Duration) -> core_playback::Result<()> { unimplemented!() }
/// #     async fn play(&self) -> core_playback::Result<()> { unimplemented!() }
/// #     async fn pause(&self) -> core_playback::Result<()> { unimplemented!() }
/// #     async fn stop(&self) -> core_playback::Result<()> { unimplemented!() }
/// #     async fn set_playback_rate(&self, rate: f64) -> core_playback::Result<()> { unimplemented!() }
/// #     async fn get_position(&self) -> core_playback::Result<Duration> { unimplemented!() }
/// #     async fn get_duration(&self) -> core_playback::Result<Option<Duration>> { unimplemented!() }
/// # }
/// async fn resume_at(adapter: &impl PlaybackAdapter, media: MediaSource) {
///     adapter.load(media).await.unwrap();
///     adapter.prepare().await.unwrap();
///     adapter.seek(Duration::from_secs(30)).await.unwrap();
///     adapter.play().await.unwrap();
/// }
/// ```
#[async_trait]
pub trait PlaybackAdapter: Send + Sync {
    /// Replace whatever is loaded with `media`. Must not start rendering.
    async fn load(&self, media: MediaSource) -> Result<()>;

    /// Get the loaded media ready to render.
    async fn prepare(&self) -> Result<()>;

    /// Seek to an absolute position in the loaded media.
    async fn seek(&self, position: Duration) -> Result<()>;

    /// Start or resume rendering.
    async fn play(&self) -> Result<()>;

    /// Pause rendering, keeping the media loaded.
    async fn pause(&self) -> Result<()>;

    /// Stop rendering and unload the media.
    async fn stop(&self) -> Result<()>;

    /// Release decoder resources. Called once, when the engine closes.
    async fn release(&self) -> Result<()> {
        Ok(())
    }

    /// Set the speed multiplier (1.0 is normal speed).
    async fn set_playback_rate(&self, rate: f64) -> Result<()>;

    /// Elapsed time from the start of the loaded media.
    async fn get_position(&self) -> Result<Duration>;

    /// Duration of the loaded media, if the decoder knows it.
    async fn get_duration(&self) -> Result<Option<Duration>>;
}
