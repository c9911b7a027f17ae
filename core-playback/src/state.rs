//! Engine state and host-facing positions.

use core_book::ReadingOrderId;
use core_runtime::events::PlaybackRate;
use serde::{Deserialize, Serialize};

/// Where the engine is in its lifecycle.
///
/// ```text
///            play / playAtLocation
///  Initial ─────────────────────────► Playing ◄──────────► Stopped
///     │                                 │  ▲    pause/play    │
///     │ item not downloaded             │  │ item downloaded  │ item deleted
///     ▼                                 ▼  │                  ▼
///  WaitingForElement ◄──────────────────────────────────────────
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EngineState {
    /// Nothing loaded yet.
    #[default]
    Initial,
    /// The decoder is rendering item `index`.
    Playing { index: usize },
    /// Item `index` is not available yet. `autoplay` says whether playback
    /// resumes by itself once it is downloaded.
    WaitingForElement {
        index: usize,
        offset_ms: u64,
        autoplay: bool,
    },
    /// Item `index` is loaded and paused.
    Stopped { index: usize },
}

impl EngineState {
    pub fn index(&self) -> Option<usize> {
        match self {
            EngineState::Initial => None,
            EngineState::Playing { index }
            | EngineState::Stopped { index }
            | EngineState::WaitingForElement { index, .. } => Some(*index),
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, EngineState::Playing { .. })
    }

    /// `true` when the decoder holds media for the current item.
    pub fn has_media(&self) -> bool {
        matches!(
            self,
            EngineState::Playing { .. } | EngineState::Stopped { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            EngineState::Initial => "initial",
            EngineState::Playing { .. } => "playing",
            EngineState::WaitingForElement { .. } => "waiting_for_element",
            EngineState::Stopped { .. } => "stopped",
        }
    }
}

/// A position in the book as addressed by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerPosition {
    pub item_id: ReadingOrderId,
    /// Milliseconds from the start of the item. Negative values and values
    /// past the item's end are carried over into neighbouring items.
    pub offset_ms: i64,
}

impl PlayerPosition {
    pub fn new(item_id: impl Into<ReadingOrderId>, offset_ms: i64) -> Self {
        Self {
            item_id: item_id.into(),
            offset_ms,
        }
    }
}

/// What the engine publishes after every command it applies.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub state: EngineState,
    /// Playhead as of the last command or progress poll.
    pub position: Option<PlayerPosition>,
    pub rate: PlaybackRate,
}
