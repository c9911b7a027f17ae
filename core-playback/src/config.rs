//! # Engine Configuration
//!
//! Tuning knobs for the playback engine and the bookmark observer.

use core_runtime::events::PlaybackRate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Playback engine configuration.
///
/// Controls progress polling, the initial speed, the last-read bookmark
/// heuristic and the zero-duration detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between decoder position polls while playing.
    ///
    /// Every poll emits one `PlaybackProgressUpdate`.
    ///
    /// Default: 1000 ms.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Rate applied (and announced) when the engine starts.
    ///
    /// Default: `Normal`.
    #[serde(default)]
    pub initial_rate: PlaybackRate,

    /// Minimum time between two last-read bookmarks.
    ///
    /// Default: 5000 ms.
    #[serde(default = "default_bookmark_min_interval_ms")]
    pub bookmark_min_interval_ms: u64,

    /// Progress updates closer than this to the start of an item never
    /// produce a last-read bookmark.
    ///
    /// Default: 100 ms.
    #[serde(default = "default_bookmark_min_offset_ms")]
    pub bookmark_min_offset_ms: u64,

    /// Decoder durations below this are reported as suspicious.
    ///
    /// Default: 1000 ms.
    #[serde(default = "default_zero_duration_threshold_ms")]
    pub zero_duration_threshold_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: default_progress_interval_ms(),
            initial_rate: PlaybackRate::default(),
            bookmark_min_interval_ms: default_bookmark_min_interval_ms(),
            bookmark_min_offset_ms: default_bookmark_min_offset_ms(),
            zero_duration_threshold_ms: default_zero_duration_threshold_ms(),
        }
    }
}

impl EngineConfig {
    /// Faster polling for hosts that draw a live progress bar.
    pub fn responsive() -> Self {
        Self {
            progress_interval_ms: 250,
            ..Default::default()
        }
    }

    pub fn with_progress_interval_ms(mut self, interval_ms: u64) -> Self {
        self.progress_interval_ms = interval_ms;
        self
    }

    pub fn with_initial_rate(mut self, rate: PlaybackRate) -> Self {
        self.initial_rate = rate;
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.progress_interval_ms == 0 {
            return Err("progress_interval_ms must be > 0".to_string());
        }

        if self.bookmark_min_interval_ms == 0 {
            return Err("bookmark_min_interval_ms must be > 0".to_string());
        }

        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn bookmark_min_interval(&self) -> Duration {
        Duration::from_millis(self.bookmark_min_interval_ms)
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_progress_interval_ms() -> u64 {
    1000
}

fn default_bookmark_min_interval_ms() -> u64 {
    5000
}

fn default_bookmark_min_offset_ms() -> u64 {
    100
}

fn default_zero_duration_threshold_ms() -> u64 {
    1000
}
