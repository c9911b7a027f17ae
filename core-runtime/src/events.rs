//! # Player Event Bus
//!
//! Ordered stream of domain events produced by the playback engine and
//! consumed by UI, bookmark and analytics collaborators.
//!
//! ## Overview
//!
//! The event bus consists of:
//! - **Event Types**: [`PlayerEvent`] and the small value types it carries
//!   ([`EventPosition`], [`PlaybackRate`], [`PauseReason`], [`BookmarkKind`])
//! - **EventBus**: a `tokio::sync::broadcast` channel that also remembers the
//!   most recent event and replays it to late subscribers
//! - **EventStream**: a subscription handle with optional filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  emit   ┌─────────────────────┐  subscribe  ┌────────────┐
//! │ Engine task  ├────────>│ EventBus            ├────────────>│ UI         │
//! └──────────────┘         │  latest + broadcast │             └────────────┘
//!                          │                     │  subscribe  ┌────────────┐
//!                          │                     ├────────────>│ Bookmarks  │
//!                          └─────────────────────┘             └────────────┘
//! ```
//!
//! ## Ordering
//!
//! Only the engine task emits, and emission happens under the bus lock, so
//! every subscriber sees events in the order the engine produced them. A
//! subscriber that joins late first receives the latest event (if any) and
//! then every subsequent one, with no gap and no duplicate.
//!
//! ## Closing
//!
//! [`EventBus::close`] drops the broadcast sender exactly once. Subscribers
//! drain what is buffered and then receive `RecvError::Closed`; later calls
//! to `emit` fail with [`Error::EventBusClosed`].
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, EventPosition, PlayerEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! bus.emit(PlayerEvent::PlaybackStarted {
//!     position: EventPosition::new("urn:chapter:0", 0, 0),
//! })
//! .unwrap();
//!
//! // Subscribed after the fact, still sees the latest event.
//! let mut stream = bus.subscribe();
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.description(), "Playback started");
//! # }
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::{Error, Result};

// Re-export commonly used types
pub use tokio::sync::broadcast::error::RecvError;

/// Default buffer size for the event bus channel.
///
/// Subscribers that fall further behind than this receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Event Payload Types
// ============================================================================

/// Where in the book an event happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventPosition {
    /// Identifier of the reading-order item.
    pub item_id: String,
    /// Index of the item in the reading order.
    pub item_index: usize,
    /// Milliseconds from the start of the item.
    pub offset_ms: u64,
    /// `true` when the decoder is reading remote data rather than a local file.
    pub is_streaming: bool,
}

impl EventPosition {
    pub fn new(item_id: impl Into<String>, item_index: usize, offset_ms: u64) -> Self {
        Self {
            item_id: item_id.into(),
            item_index,
            offset_ms,
            is_streaming: false,
        }
    }

    pub fn streaming(mut self, is_streaming: bool) -> Self {
        self.is_streaming = is_streaming;
        self
    }
}

/// Supported playback speeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackRate {
    ThreeQuarters,
    #[default]
    Normal,
    OneAndAQuarter,
    OneAndAHalf,
    Double,
}

impl PlaybackRate {
    /// Speed multiplier handed to the decoder.
    pub fn speed(&self) -> f64 {
        match self {
            PlaybackRate::ThreeQuarters => 0.75,
            PlaybackRate::Normal => 1.0,
            PlaybackRate::OneAndAQuarter => 1.25,
            PlaybackRate::OneAndAHalf => 1.5,
            PlaybackRate::Double => 2.0,
        }
    }

    pub fn all() -> [PlaybackRate; 5] {
        [
            PlaybackRate::ThreeQuarters,
            PlaybackRate::Normal,
            PlaybackRate::OneAndAQuarter,
            PlaybackRate::OneAndAHalf,
            PlaybackRate::Double,
        ]
    }
}

/// Why playback was paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    UserExplicitlyPaused,
    /// The sleep timer ran out.
    SleepTimer,
    AudioFocusLost,
    BluetoothDeviceChanged,
    /// Playback was loaded without being started.
    InitiallyPaused,
}

/// Origin of a bookmark request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookmarkKind {
    /// Derived automatically from playback progress.
    LastRead,
    /// Requested by the user.
    Explicit,
}

// ============================================================================
// Player Events
// ============================================================================

/// Events published by the playback engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlayerEvent {
    /// The playback speed changed.
    PlaybackRateChanged { rate: PlaybackRate },
    /// A replacement manifest was applied to the open book.
    ManifestUpdated,
    /// The decoder reported an error. Engine state is unchanged.
    PlaybackError {
        /// Item that was current when the error occurred, if any.
        position: Option<EventPosition>,
        /// Opaque code from the decoder.
        code: i32,
        message: String,
    },
    /// Decoder started rendering.
    PlaybackStarted { position: EventPosition },
    /// Content is being loaded into the decoder.
    PlaybackBuffering { position: EventPosition },
    /// Content is loaded but playback was not requested.
    PlaybackWaitingForAction { position: EventPosition },
    /// Periodic position report while playing.
    PlaybackProgressUpdate { position: EventPosition },
    /// The item finished, or was skipped past.
    ChapterCompleted { position: EventPosition },
    /// Playback wants this item but it is not downloaded yet.
    ChapterWaiting { position: EventPosition },
    PlaybackPaused {
        position: EventPosition,
        reason: PauseReason,
    },
    PlaybackStopped { position: EventPosition },
    /// A bookmark should be stored at this position.
    CreateBookmark {
        position: EventPosition,
        kind: BookmarkKind,
    },
    /// The host should remove the given bookmark.
    DeleteBookmark { bookmark_id: String },
}

impl PlayerEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            PlayerEvent::PlaybackRateChanged { .. } => "Playback rate changed",
            PlayerEvent::ManifestUpdated => "Manifest updated",
            PlayerEvent::PlaybackError { .. } => "Playback error",
            PlayerEvent::PlaybackStarted { .. } => "Playback started",
            PlayerEvent::PlaybackBuffering { .. } => "Playback buffering",
            PlayerEvent::PlaybackWaitingForAction { .. } => "Playback waiting for action",
            PlayerEvent::PlaybackProgressUpdate { .. } => "Playback progress",
            PlayerEvent::ChapterCompleted { .. } => "Chapter completed",
            PlayerEvent::ChapterWaiting { .. } => "Waiting for chapter download",
            PlayerEvent::PlaybackPaused { .. } => "Playback paused",
            PlayerEvent::PlaybackStopped { .. } => "Playback stopped",
            PlayerEvent::CreateBookmark { .. } => "Create bookmark",
            PlayerEvent::DeleteBookmark { .. } => "Delete bookmark",
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            PlayerEvent::PlaybackError { .. } => EventSeverity::Error,
            PlayerEvent::ChapterWaiting { .. } => EventSeverity::Warning,
            PlayerEvent::PlaybackProgressUpdate { .. } => EventSeverity::Debug,
            _ => EventSeverity::Info,
        }
    }

    /// Position the event refers to, if it carries one.
    pub fn position(&self) -> Option<&EventPosition> {
        match self {
            PlayerEvent::PlaybackError { position, .. } => position.as_ref(),
            PlayerEvent::PlaybackStarted { position }
            | PlayerEvent::PlaybackBuffering { position }
            | PlayerEvent::PlaybackWaitingForAction { position }
            | PlayerEvent::PlaybackProgressUpdate { position }
            | PlayerEvent::ChapterCompleted { position }
            | PlayerEvent::ChapterWaiting { position }
            | PlayerEvent::PlaybackPaused { position, .. }
            | PlayerEvent::PlaybackStopped { position }
            | PlayerEvent::CreateBookmark { position, .. } => Some(position),
            PlayerEvent::PlaybackRateChanged { .. }
            | PlayerEvent::ManifestUpdated
            | PlayerEvent::DeleteBookmark { .. } => None,
        }
    }

    /// Whether the event came from streamed (remote) data.
    pub fn is_streaming(&self) -> bool {
        self.position().map(|p| p.is_streaming).unwrap_or(false)
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus with replay of the latest event.
///
/// Cloning is cheap; clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<BusState>>,
}

struct BusState {
    sender: Option<broadcast::Sender<PlayerEvent>>,
    latest: Option<PlayerEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Mutex::new(BusState {
                sender: Some(sender),
                latest: None,
            })),
        }
    }

    /// Publishes an event to all subscribers and records it for replay.
    ///
    /// Returns the number of live subscribers that received it (possibly zero).
    ///
    /// # Errors
    ///
    /// Returns [`Error::EventBusClosed`] once [`close`](Self::close) was called.
    pub fn emit(&self, event: PlayerEvent) -> Result<usize> {
        let mut state = self.inner.lock();
        let sender = state.sender.as_ref().ok_or(Error::EventBusClosed)?;
        let delivered = sender.send(event.clone()).unwrap_or(0);
        state.latest = Some(event);
        Ok(delivered)
    }

    /// Creates a new subscriber.
    ///
    /// The stream first yields the latest event published so far, then every
    /// event published after this call.
    pub fn subscribe(&self) -> EventStream {
        let state = self.inner.lock();
        let receiver = match &state.sender {
            Some(sender) => sender.subscribe(),
            None => {
                // Closed bus: hand out a receiver whose sender is already gone.
                let (sender, receiver) = broadcast::channel(1);
                drop(sender);
                receiver
            }
        };
        EventStream {
            replay: state.latest.clone(),
            receiver,
            filter: None,
        }
    }

    /// Closes the bus. Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        self.inner.lock().sender.take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().sender.is_none()
    }

    /// The most recently published event.
    pub fn latest(&self) -> Option<PlayerEvent> {
        self.inner.lock().latest.clone()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .sender
            .as_ref()
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&PlayerEvent) -> bool + Send + Sync>;

/// Subscription to an [`EventBus`].
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{EventBus, PlayerEvent};
///
/// let bus = EventBus::new(16);
/// let progress = bus
///     .subscribe()
///     .filter(|event| matches!(event, PlayerEvent::PlaybackProgressUpdate { .. }));
/// ```
pub struct EventStream {
    replay: Option<PlayerEvent>,
    receiver: broadcast::Receiver<PlayerEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Only events matching `predicate` will be returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PlayerEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Drop the replayed event, keeping only events published after subscription.
    pub fn skip_replay(mut self) -> Self {
        self.replay = None;
        self
    }

    fn accepts(&self, event: &PlayerEvent) -> bool {
        self.filter.as_ref().map(|f| f(event)).unwrap_or(true)
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` once the bus is closed and drained.
    pub async fn recv(&mut self) -> std::result::Result<PlayerEvent, RecvError> {
        if let Some(event) = self.replay.take() {
            if self.accepts(&event) {
                return Ok(event);
            }
        }

        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<std::result::Result<PlayerEvent, RecvError>> {
        if let Some(event) = self.replay.take() {
            if self.accepts(&event) {
                return Some(Ok(event));
            }
        }

        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("pending_replay", &self.replay.is_some())
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn started(index: usize, offset_ms: u64) -> PlayerEvent {
        PlayerEvent::PlaybackStarted {
            position: EventPosition::new(format!("item-{}", index), index, offset_ms),
        }
    }

    fn progress(offset_ms: u64) -> PlayerEvent {
        PlayerEvent::PlaybackProgressUpdate {
            position: EventPosition::new("item-0", 0, offset_ms),
        }
    }

    #[tokio::test]
    async fn test_event_bus_creation() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(!bus.is_closed());
        assert!(bus.latest().is_none());
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_recorded() {
        let bus = EventBus::new(10);
        assert_eq!(bus.emit(started(0, 0)).unwrap(), 0);
        assert_eq!(bus.latest(), Some(started(0, 0)));
    }

    #[tokio::test]
    async fn test_late_subscriber_receives_latest_then_new_events() {
        let bus = EventBus::new(10);
        bus.emit(PlayerEvent::PlaybackRateChanged {
            rate: PlaybackRate::Normal,
        })
        .unwrap();

        let mut stream = bus.subscribe();
        bus.emit(started(0, 0)).unwrap();

        assert_eq!(
            stream.recv().await.unwrap(),
            PlayerEvent::PlaybackRateChanged {
                rate: PlaybackRate::Normal
            }
        );
        assert_eq!(stream.recv().await.unwrap(), started(0, 0));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_skip_replay() {
        let bus = EventBus::new(10);
        bus.emit(started(0, 0)).unwrap();
        let mut stream = bus.subscribe().skip_replay();
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_order() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        for offset in [1_000, 2_000, 3_000] {
            bus.emit(progress(offset)).unwrap();
        }

        for expected in [1_000, 2_000, 3_000] {
            assert_eq!(sub1.recv().await.unwrap(), progress(expected));
            assert_eq!(sub2.recv().await.unwrap(), progress(expected));
        }
    }

    #[tokio::test]
    async fn test_filter_applies_to_replay() {
        let bus = EventBus::new(10);
        bus.emit(progress(500)).unwrap();

        let mut stream = bus
            .subscribe()
            .filter(|event| matches!(event, PlayerEvent::PlaybackStarted { .. }));
        bus.emit(progress(1_500)).unwrap();
        bus.emit(started(1, 0)).unwrap();

        assert_eq!(stream.recv().await.unwrap(), started(1, 0));
    }

    #[tokio::test]
    async fn test_close_happens_once() {
        let bus = EventBus::new(10);
        let mut stream = bus.subscribe();
        bus.emit(started(0, 0)).unwrap();

        assert!(bus.close());
        assert!(!bus.close());
        assert!(bus.is_closed());
        assert!(matches!(bus.emit(started(1, 0)), Err(Error::EventBusClosed)));

        // Buffered events drain before the close is observed.
        assert_eq!(stream.recv().await.unwrap(), started(0, 0));
        assert!(matches!(stream.recv().await, Err(RecvError::Closed)));
    }

    #[tokio::test]
    async fn test_subscribe_after_close_replays_then_closes() {
        let bus = EventBus::new(10);
        bus.emit(started(2, 10)).unwrap();
        bus.close();

        let mut stream = bus.subscribe();
        assert_eq!(stream.recv().await.unwrap(), started(2, 10));
        assert!(matches!(stream.recv().await, Err(RecvError::Closed)));
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut stream = bus.subscribe();

        for offset in 0..5 {
            bus.emit(progress(offset * 1_000)).unwrap();
        }

        assert!(matches!(stream.recv().await, Err(RecvError::Lagged(_))));
    }

    #[tokio::test]
    async fn test_concurrent_publishers_share_one_order() {
        let bus = EventBus::new(100);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let bus1 = bus.clone();
        let bus2 = bus.clone();
        let h1 = tokio::spawn(async move {
            for i in 0..10 {
                bus1.emit(progress(i)).ok();
            }
        });
        let h2 = tokio::spawn(async move {
            for i in 0..10 {
                bus2.emit(started(1, i)).ok();
            }
        });
        h1.await.ok();
        h2.await.ok();

        let mut seen_a = Vec::new();
        while let Some(Ok(event)) = a.try_recv() {
            seen_a.push(event);
        }
        let mut seen_b = Vec::new();
        while let Some(Ok(event)) = b.try_recv() {
            seen_b.push(event);
        }
        assert_eq!(seen_a.len(), 20);
        assert_eq!(seen_a, seen_b);
    }

    #[test]
    fn test_event_accessors() {
        let event = PlayerEvent::PlaybackPaused {
            position: EventPosition::new("item-3", 3, 42).streaming(true),
            reason: PauseReason::SleepTimer,
        };
        assert_eq!(event.description(), "Playback paused");
        assert_eq!(event.severity(), EventSeverity::Info);
        assert_eq!(event.position().map(|p| p.offset_ms), Some(42));
        assert!(event.is_streaming());

        let error = PlayerEvent::PlaybackError {
            position: None,
            code: 7,
            message: "decoder failed".to_string(),
        };
        assert_eq!(error.severity(), EventSeverity::Error);
        assert!(!error.is_streaming());
    }

    #[test]
    fn test_playback_rate_speeds() {
        let speeds: Vec<f64> = PlaybackRate::all().iter().map(|r| r.speed()).collect();
        assert_eq!(speeds, vec![0.75, 1.0, 1.25, 1.5, 2.0]);
        assert_eq!(PlaybackRate::default(), PlaybackRate::Normal);
    }

    #[test]
    fn test_event_serialization() {
        let event = PlayerEvent::CreateBookmark {
            position: EventPosition::new("urn:chapter:4", 4, 5_200),
            kind: BookmarkKind::LastRead,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"CreateBookmark\""));
        assert!(json.contains("last_read"));

        let back: PlayerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
