//! # Last-Read Bookmarks
//!
//! Derives `CreateBookmark { kind: LastRead }` events from the progress
//! updates of a running engine, rate-limited so that a host persisting every
//! bookmark does not write on every poll.
//!
//! A progress update produces a bookmark when:
//! - It is at least `bookmark_min_offset_ms` into its item
//! - No bookmark was produced yet, or the last one is at least
//!   `bookmark_min_interval_ms` old
//!
//! Updates rejected by either rule do not restart the interval.

use bridge_traits::time::Clock;
use core_runtime::events::{BookmarkKind, EventStream, PlayerEvent};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::EngineConfig;

pub struct BookmarkObserver {
    clock: Arc<dyn Clock>,
    min_interval_ms: i64,
    min_offset_ms: u64,
    last_emitted_ms: Option<i64>,
}

impl BookmarkObserver {
    pub fn new(clock: Arc<dyn Clock>, config: &EngineConfig) -> Self {
        Self {
            clock,
            min_interval_ms: i64::try_from(config.bookmark_min_interval_ms).unwrap_or(i64::MAX),
            min_offset_ms: config.bookmark_min_offset_ms,
            last_emitted_ms: None,
        }
    }

    /// Feeds one engine event; returns the bookmark it produces, if any.
    pub fn observe(&mut self, event: &PlayerEvent) -> Option<PlayerEvent> {
        let PlayerEvent::PlaybackProgressUpdate { position } = event else {
            return None;
        };
        if position.offset_ms < self.min_offset_ms {
            return None;
        }

        let now = self.clock.unix_timestamp_millis();
        let due = self
            .last_emitted_ms
            .map_or(true, |last| now.saturating_sub(last) >= self.min_interval_ms);
        if !due {
            return None;
        }

        self.last_emitted_ms = Some(now);
        Some(PlayerEvent::CreateBookmark {
            position: position.clone(),
            kind: BookmarkKind::LastRead,
        })
    }

    /// Runs the observer over `events` until the stream closes, handing every
    /// bookmark to `on_bookmark`.
    pub fn spawn<F>(mut self, mut events: EventStream, on_bookmark: F) -> JoinHandle<()>
    where
        F: Fn(PlayerEvent) + Send + 'static,
    {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Some(bookmark) = self.observe(&event) {
                            on_bookmark(bookmark);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Bookmark observer lagged behind the engine");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Bookmark observer finished");
        })
    }
}

impl std::fmt::Debug for BookmarkObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookmarkObserver")
            .field("min_interval_ms", &self.min_interval_ms)
            .field("min_offset_ms", &self.min_offset_ms)
            .field("last_emitted_ms", &self.last_emitted_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::ManualClock;
    use core_runtime::events::{EventBus, EventPosition};
    use std::time::Duration;

    fn progress(offset_ms: u64) -> PlayerEvent {
        PlayerEvent::PlaybackProgressUpdate {
            position: EventPosition::new("t0", 0, offset_ms),
        }
    }

    fn bookmarked_offset(event: Option<PlayerEvent>) -> Option<u64> {
        match event {
            Some(PlayerEvent::CreateBookmark {
                position,
                kind: BookmarkKind::LastRead,
            }) => Some(position.offset_ms),
            _ => None,
        }
    }

    #[test]
    fn test_rate_limits_bookmarks() {
        let clock = Arc::new(ManualClock::at_epoch());
        let mut observer = BookmarkObserver::new(clock.clone(), &EngineConfig::default());

        // Too close to the start of the item.
        assert_eq!(bookmarked_offset(observer.observe(&progress(50))), None);

        // First eligible update.
        clock.advance(Duration::from_secs(1));
        assert_eq!(bookmarked_offset(observer.observe(&progress(200))), Some(200));

        // Within the interval.
        clock.advance(Duration::from_secs(1));
        assert_eq!(bookmarked_offset(observer.observe(&progress(1_200))), None);

        // Interval elapsed since the last bookmark, not the last update.
        clock.advance(Duration::from_secs(4));
        assert_eq!(
            bookmarked_offset(observer.observe(&progress(5_200))),
            Some(5_200)
        );

        clock.advance(Duration::from_millis(100));
        assert_eq!(bookmarked_offset(observer.observe(&progress(5_300))), None);
    }

    #[test]
    fn test_progress_in_real_time() {
        // Progress reported at wall-clock pace from the start of the item.
        let clock = Arc::new(ManualClock::at_epoch());
        let mut observer = BookmarkObserver::new(clock.clone(), &EngineConfig::default());

        let mut elapsed = 0;
        let mut bookmarks = Vec::new();
        for offset in [50, 200, 5_200, 5_300] {
            clock.advance(Duration::from_millis(offset - elapsed));
            elapsed = offset;
            bookmarks.extend(bookmarked_offset(observer.observe(&progress(offset))));
        }
        assert_eq!(bookmarks, vec![200, 5_200]);
    }

    #[test]
    fn test_ignores_other_events() {
        let clock = Arc::new(ManualClock::at_epoch());
        let mut observer = BookmarkObserver::new(clock, &EngineConfig::default());
        let started = PlayerEvent::PlaybackStarted {
            position: EventPosition::new("t0", 0, 5_000),
        };
        assert!(observer.observe(&started).is_none());
    }

    #[tokio::test]
    async fn test_spawned_observer_stops_with_bus() {
        let clock = Arc::new(ManualClock::at_epoch());
        let observer = BookmarkObserver::new(clock, &EngineConfig::default());
        let bus = EventBus::new(16);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let task = observer.spawn(bus.subscribe(), move |bookmark| {
            let _ = tx.send(bookmark);
        });
        bus.emit(progress(300)).unwrap();
        bus.emit(progress(400)).unwrap();
        bus.close();
        task.await.unwrap();

        assert_eq!(bookmarked_offset(rx.recv().await), Some(300));
        assert!(rx.recv().await.is_none());
    }
}
