//! # Engine State Machine
//!
//! The decision-making half of the playback engine. [`EngineMachine`] takes
//! one [`Command`] at a time and answers with the [`Effect`]s the engine task
//! must carry out, in order: decoder calls, polling changes and events to
//! publish. It performs no I/O and never awaits, so every transition can be
//! tested without a runtime.
//!
//! ## Positions
//!
//! The machine tracks the offset of the current item from two sources:
//! - Its own decisions (loads, seeks)
//! - Decoder positions fed in through [`EngineMachine::observe_position`] and
//!   [`Command::Tick`]
//!
//! ## End of item
//!
//! A decoder that overshoots can report `position >= duration` on a single
//! poll while it still has audio buffered. The machine only treats the item
//! as finished when two consecutive polls report the end; a decoder
//! `TrackEnded` callback ends it immediately.

use core_book::{AudioBook, DownloadStatusChange, OffsetTranslation};
use core_runtime::events::{
    BookmarkKind, EventPosition, PauseReason, PlaybackRate, PlayerEvent,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::state::{EngineSnapshot, EngineState, PlayerPosition};
use crate::traits::{AdapterEvent, AudioSource, MediaSource};

/// Inputs of the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause { reason: PauseReason },
    SkipToNext { offset_ms: i64 },
    SkipToPrevious { offset_ms: i64 },
    SkipPlayhead { delta_ms: i64 },
    PlayAtLocation { index: usize, offset_ms: i64 },
    MovePlayheadToLocation { index: usize, offset_ms: i64 },
    SetPlaybackRate(PlaybackRate),
    Bookmark,
    DeleteBookmark { bookmark_id: String },
    /// Periodic decoder poll while playing.
    Tick {
        position_ms: u64,
        duration_ms: Option<u64>,
    },
    Adapter(AdapterEvent),
    /// The decoder rejected the `Load` issued for item `index`.
    LoadFailed {
        index: usize,
        offset_ms: u64,
        autoplay: bool,
    },
    DownloadStatusChanged(DownloadStatusChange),
    ManifestUpdated,
    Close,
}

impl Command {
    /// Commands whose outcome depends on the decoder's current position.
    pub fn reads_position(&self) -> bool {
        matches!(
            self,
            Command::Pause { .. }
                | Command::SkipToNext { .. }
                | Command::SkipPlayhead { .. }
                | Command::Bookmark
                | Command::Adapter(AdapterEvent::Error { .. })
                | Command::Close
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Play => "play",
            Command::Pause { .. } => "pause",
            Command::SkipToNext { .. } => "skip_to_next",
            Command::SkipToPrevious { .. } => "skip_to_previous",
            Command::SkipPlayhead { .. } => "skip_playhead",
            Command::PlayAtLocation { .. } => "play_at_location",
            Command::MovePlayheadToLocation { .. } => "move_playhead_to_location",
            Command::SetPlaybackRate(_) => "set_playback_rate",
            Command::Bookmark => "bookmark",
            Command::DeleteBookmark { .. } => "delete_bookmark",
            Command::Tick { .. } => "tick",
            Command::Adapter(_) => "adapter_event",
            Command::LoadFailed { .. } => "load_failed",
            Command::DownloadStatusChanged(_) => "download_status_changed",
            Command::ManifestUpdated => "manifest_updated",
            Command::Close => "close",
        }
    }
}

/// Outputs of the state machine, executed in order by the engine task.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// `load` → `prepare` → `seek(offset_ms)` → `play` or `pause`.
    Load {
        media: MediaSource,
        offset_ms: u64,
        play_when_ready: bool,
    },
    Seek { offset_ms: u64 },
    /// `play` when `true`, `pause` when `false`.
    SetPlayWhenReady(bool),
    Stop,
    Release,
    SetRate(f64),
    StartPolling,
    StopPolling,
    Emit(PlayerEvent),
}

pub struct EngineMachine {
    book: Arc<AudioBook>,
    streaming_permitted: bool,
    state: EngineState,
    /// Offset in the current item while `Playing` or `Stopped`.
    offset_ms: u64,
    /// Whether the loaded media is the remote link.
    streaming: bool,
    /// One poll has already reported the end of the current item.
    end_pending: bool,
    rate: PlaybackRate,
    closed: bool,
}

impl EngineMachine {
    pub fn new(book: Arc<AudioBook>, streaming_permitted: bool) -> Self {
        Self {
            book,
            streaming_permitted,
            state: EngineState::Initial,
            offset_ms: 0,
            streaming: false,
            end_pending: false,
            rate: PlaybackRate::default(),
            closed: false,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn rate(&self) -> PlaybackRate {
        self.rate
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Where the engine is, as reported in events. `None` before the first
    /// item was chosen.
    pub fn current_position(&self) -> Option<EventPosition> {
        match self.state {
            EngineState::Initial => None,
            EngineState::Playing { index } | EngineState::Stopped { index } => {
                Some(self.position(index, self.offset_ms))
            }
            EngineState::WaitingForElement {
                index, offset_ms, ..
            } => Some(self.position(index, offset_ms)),
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.state,
            position: self.current_position().map(|position| {
                let offset_ms = i64::try_from(position.offset_ms).unwrap_or(i64::MAX);
                PlayerPosition::new(position.item_id, offset_ms)
            }),
            rate: self.rate,
        }
    }

    /// Records a decoder position for the loaded item.
    pub fn observe_position(&mut self, position_ms: u64) {
        if self.state.has_media() {
            self.offset_ms = position_ms;
        }
    }

    /// Applies one command and returns the effects to execute.
    pub fn handle(&mut self, command: Command) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.closed {
            trace!(command = command.name(), "Ignoring command after close");
            return fx;
        }

        match command {
            Command::Play => self.play(&mut fx),
            Command::Pause { reason } => self.pause(reason, &mut fx),
            Command::SkipToNext { offset_ms } => self.skip_to_next(offset_ms, &mut fx),
            Command::SkipToPrevious { offset_ms } => self.skip_to_previous(offset_ms, &mut fx),
            Command::SkipPlayhead { delta_ms } => self.skip_playhead(delta_ms, &mut fx),
            Command::PlayAtLocation { index, offset_ms } => {
                self.play_at_location(index, offset_ms, &mut fx)
            }
            Command::MovePlayheadToLocation { index, offset_ms } => {
                self.move_playhead(index, offset_ms, &mut fx)
            }
            Command::SetPlaybackRate(rate) => {
                self.rate = rate;
                fx.push(Effect::SetRate(rate.speed()));
                fx.push(Effect::Emit(PlayerEvent::PlaybackRateChanged { rate }));
            }
            Command::Bookmark => match self.current_position() {
                Some(position) => fx.push(Effect::Emit(PlayerEvent::CreateBookmark {
                    position,
                    kind: BookmarkKind::Explicit,
                })),
                None => debug!("Nothing to bookmark before playback started"),
            },
            Command::DeleteBookmark { bookmark_id } => {
                fx.push(Effect::Emit(PlayerEvent::DeleteBookmark { bookmark_id }))
            }
            Command::Tick {
                position_ms,
                duration_ms,
            } => self.tick(position_ms, duration_ms, &mut fx),
            Command::Adapter(event) => self.adapter_event(event, &mut fx),
            Command::LoadFailed {
                index,
                offset_ms,
                autoplay,
            } => self.load_failed(index, offset_ms, autoplay, &mut fx),
            Command::DownloadStatusChanged(change) => self.status_changed(change, &mut fx),
            Command::ManifestUpdated => fx.push(Effect::Emit(PlayerEvent::ManifestUpdated)),
            Command::Close => self.close(&mut fx),
        }

        fx
    }

    // ========================================================================
    // Transport
    // ========================================================================

    fn play(&mut self, fx: &mut Vec<Effect>) {
        match self.state {
            EngineState::Initial => self.play_item(0, 0, true, fx),
            EngineState::Playing { .. } => {}
            EngineState::WaitingForElement {
                index, offset_ms, ..
            } => self.play_item(index, offset_ms, true, fx),
            EngineState::Stopped { index } => self.resume(index, fx),
        }
    }

    fn pause(&mut self, reason: PauseReason, fx: &mut Vec<Effect>) {
        match self.state {
            EngineState::Playing { index } => {
                fx.push(Effect::StopPolling);
                fx.push(Effect::SetPlayWhenReady(false));
                self.state = EngineState::Stopped { index };
                fx.push(Effect::Emit(PlayerEvent::PlaybackPaused {
                    position: self.position(index, self.offset_ms),
                    reason,
                }));
            }
            EngineState::WaitingForElement {
                index,
                offset_ms,
                autoplay: true,
            } => {
                debug!(index, "Paused while waiting; will not start on download");
                self.state = EngineState::WaitingForElement {
                    index,
                    offset_ms,
                    autoplay: false,
                };
            }
            _ => {}
        }
    }

    fn skip_to_next(&mut self, offset_ms: i64, fx: &mut Vec<Effect>) {
        if self.state == EngineState::Initial {
            self.play(fx);
        }
        let Some(current) = self.state.index() else {
            return;
        };

        if self.state.has_media() {
            fx.push(Effect::Emit(PlayerEvent::ChapterCompleted {
                position: self.position(current, self.offset_ms),
            }));
        }

        match self.book.reading_order()[current].next_index() {
            Some(next) => {
                let (index, offset) = self.resolve(next, offset_ms);
                self.play_item(index, offset, true, fx);
            }
            None => self.stop_at_end(current, fx),
        }
    }

    fn skip_to_previous(&mut self, offset_ms: i64, fx: &mut Vec<Effect>) {
        let Some(current) = self.state.index() else {
            let last = self.book.reading_order().len() - 1;
            self.play_item(last, 0, true, fx);
            return;
        };

        let Some(previous) = self.book.reading_order()[current].previous_index() else {
            self.rewind_in_place(current, fx);
            return;
        };

        // Negative offsets count back from the end of the previous item.
        // Anything else would land on or past its end, so it starts over.
        let duration = self.book.reading_order()[previous].duration_ms();
        let (index, offset) = match duration {
            Some(duration) if offset_ms < 0 => self.resolve(previous, duration as i64 + offset_ms),
            _ => (previous, 0),
        };
        self.play_item(index, offset, true, fx);
    }

    fn skip_playhead(&mut self, delta_ms: i64, fx: &mut Vec<Effect>) {
        if delta_ms == 0 {
            return;
        }
        let (current, was_playing) = match self.state {
            EngineState::Playing { index } => (index, true),
            EngineState::Stopped { index } => (index, false),
            state => {
                debug!(state = state.name(), "Nothing loaded to skip within");
                return;
            }
        };

        let (index, offset) = self.resolve(current, self.offset_ms as i64 + delta_ms);
        if index == current {
            self.seek_in_place(offset, fx);
            if !was_playing {
                self.emit_waiting_for_action(current, fx);
            }
            return;
        }

        if index > current {
            fx.push(Effect::Emit(PlayerEvent::ChapterCompleted {
                position: self.position(current, self.offset_ms),
            }));
        }
        self.play_item(index, offset, was_playing, fx);
    }

    fn play_at_location(&mut self, index: usize, offset_ms: i64, fx: &mut Vec<Effect>) {
        let (target, offset) = self.resolve(index, offset_ms);
        match self.state {
            EngineState::Playing { index } if index == target => self.seek_in_place(offset, fx),
            EngineState::Stopped { index } if index == target => {
                self.seek_in_place(offset, fx);
                self.resume(index, fx);
            }
            _ => self.play_item(target, offset, true, fx),
        }
    }

    fn move_playhead(&mut self, index: usize, offset_ms: i64, fx: &mut Vec<Effect>) {
        let (target, offset) = self.resolve(index, offset_ms);
        match self.state {
            EngineState::Playing { index } if index == target => self.seek_in_place(offset, fx),
            EngineState::Stopped { index } if index == target => {
                self.seek_in_place(offset, fx);
                self.emit_waiting_for_action(index, fx);
            }
            EngineState::Playing { .. } => self.play_item(target, offset, true, fx),
            EngineState::WaitingForElement { autoplay, .. } => {
                self.play_item(target, offset, autoplay, fx)
            }
            _ => self.play_item(target, offset, false, fx),
        }
    }

    // ========================================================================
    // Decoder and download feedback
    // ========================================================================

    fn tick(&mut self, position_ms: u64, duration_ms: Option<u64>, fx: &mut Vec<Effect>) {
        let EngineState::Playing { index } = self.state else {
            return;
        };

        self.offset_ms = position_ms;
        fx.push(Effect::Emit(PlayerEvent::PlaybackProgressUpdate {
            position: self.position(index, position_ms),
        }));

        let duration = self.book.reading_order()[index]
            .duration_ms()
            .or(duration_ms)
            .filter(|duration| *duration > 0);
        match duration {
            Some(duration) if position_ms >= duration => {
                if self.end_pending {
                    self.end_pending = false;
                    self.track_ended(fx);
                } else {
                    trace!(index, position_ms, "End of item reported once");
                    self.end_pending = true;
                }
            }
            _ => self.end_pending = false,
        }
    }

    fn track_ended(&mut self, fx: &mut Vec<Effect>) {
        debug!(index = ?self.state.index(), "Item finished");
        self.skip_to_next(0, fx);
    }

    fn adapter_event(&mut self, event: AdapterEvent, fx: &mut Vec<Effect>) {
        match event {
            AdapterEvent::TrackEnded { item_id } => {
                if self.is_playing_item(&item_id) {
                    self.track_ended(fx);
                } else {
                    debug!(item = %item_id, "Ignoring end of an item that is not playing");
                }
            }
            AdapterEvent::Error { code, message } => {
                fx.push(Effect::Emit(PlayerEvent::PlaybackError {
                    position: self.current_position(),
                    code,
                    message,
                }));
            }
            AdapterEvent::Buffering { item_id } => {
                if self.is_playing_item(&item_id) {
                    if let Some(position) = self.current_position() {
                        fx.push(Effect::Emit(PlayerEvent::PlaybackBuffering { position }));
                    }
                }
            }
        }
    }

    /// Parks on the item the decoder could not load, so that `Play` or its
    /// download finishing tries again.
    fn load_failed(
        &mut self,
        index: usize,
        offset_ms: u64,
        autoplay: bool,
        fx: &mut Vec<Effect>,
    ) {
        if self.state.index() != Some(index) || !self.state.has_media() {
            debug!(index, state = self.state.name(), "Ignoring stale load failure");
            return;
        }
        debug!(index, offset_ms, autoplay, "Decoder could not load item");
        fx.push(Effect::StopPolling);
        self.end_pending = false;
        self.offset_ms = offset_ms;
        self.state = EngineState::WaitingForElement {
            index,
            offset_ms,
            autoplay,
        };
        fx.push(Effect::Emit(PlayerEvent::PlaybackStopped {
            position: self.position(index, offset_ms),
        }));
    }

    fn status_changed(&mut self, change: DownloadStatusChange, fx: &mut Vec<Effect>) {
        match self.state {
            EngineState::WaitingForElement {
                index,
                offset_ms,
                autoplay,
            } if index == change.index && change.status.is_downloaded() => {
                debug!(index, autoplay, "Awaited item downloaded");
                self.play_item(index, offset_ms, autoplay, fx);
            }
            EngineState::Playing { index } | EngineState::Stopped { index }
                if index == change.index
                    && !self.streaming
                    && !change.status.is_downloaded() =>
            {
                debug!(index, status = change.status.name(), "Loaded item lost its media");
                if self.state.is_playing() {
                    fx.push(Effect::StopPolling);
                }
                fx.push(Effect::Stop);
                self.end_pending = false;
                self.state = EngineState::WaitingForElement {
                    index,
                    offset_ms: self.offset_ms,
                    autoplay: false,
                };
                fx.push(Effect::Emit(PlayerEvent::PlaybackStopped {
                    position: self.position(index, self.offset_ms),
                }));
            }
            _ => {}
        }
    }

    fn close(&mut self, fx: &mut Vec<Effect>) {
        if self.state.is_playing() {
            fx.push(Effect::StopPolling);
        }
        if self.state.has_media() {
            fx.push(Effect::Stop);
            if let Some(position) = self.current_position() {
                fx.push(Effect::Emit(PlayerEvent::PlaybackStopped { position }));
            }
        }
        fx.push(Effect::Release);
        self.closed = true;
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Loads item `index` at `offset_ms`, or waits for it if its media is not
    /// available.
    fn play_item(&mut self, index: usize, offset_ms: u64, autoplay: bool, fx: &mut Vec<Effect>) {
        let book = Arc::clone(&self.book);
        let item = &book.reading_order()[index];

        if self.state.is_playing() {
            fx.push(Effect::StopPolling);
        }

        let source = if item.download_status().is_downloaded() {
            book.download_task(index).map(|task| AudioSource::LocalFile {
                path: task.output_path().to_path_buf(),
            })
        } else if self.streaming_permitted {
            Some(AudioSource::RemoteStream {
                url: item.link().href,
                headers: HashMap::new(),
            })
        } else {
            None
        };

        self.end_pending = false;
        self.offset_ms = offset_ms;

        let Some(source) = source else {
            if self.state.has_media() {
                fx.push(Effect::Stop);
            }
            self.streaming = false;
            self.state = EngineState::WaitingForElement {
                index,
                offset_ms,
                autoplay,
            };
            let position = self.position(index, offset_ms);
            fx.push(Effect::Emit(PlayerEvent::ChapterWaiting {
                position: position.clone(),
            }));
            fx.push(Effect::Emit(PlayerEvent::PlaybackStopped { position }));
            return;
        };

        self.streaming = source.is_remote();
        fx.push(Effect::Load {
            media: MediaSource {
                item_id: item.id().to_string(),
                item_index: index,
                source,
            },
            offset_ms,
            play_when_ready: autoplay,
        });

        if autoplay {
            self.state = EngineState::Playing { index };
            fx.push(Effect::Emit(PlayerEvent::PlaybackStarted {
                position: self.position(index, offset_ms),
            }));
            fx.push(Effect::StartPolling);
        } else {
            self.state = EngineState::Stopped { index };
            self.emit_waiting_for_action(index, fx);
        }
    }

    fn resume(&mut self, index: usize, fx: &mut Vec<Effect>) {
        fx.push(Effect::SetPlayWhenReady(true));
        self.state = EngineState::Playing { index };
        fx.push(Effect::Emit(PlayerEvent::PlaybackStarted {
            position: self.position(index, self.offset_ms),
        }));
        fx.push(Effect::StartPolling);
    }

    fn seek_in_place(&mut self, offset_ms: u64, fx: &mut Vec<Effect>) {
        fx.push(Effect::Seek { offset_ms });
        self.offset_ms = offset_ms;
        self.end_pending = false;
    }

    fn rewind_in_place(&mut self, index: usize, fx: &mut Vec<Effect>) {
        match self.state {
            EngineState::Playing { .. } => self.seek_in_place(0, fx),
            EngineState::Stopped { .. } => {
                self.seek_in_place(0, fx);
                self.emit_waiting_for_action(index, fx);
            }
            EngineState::WaitingForElement { autoplay, .. } => {
                self.state = EngineState::WaitingForElement {
                    index,
                    offset_ms: 0,
                    autoplay,
                };
            }
            EngineState::Initial => {}
        }
    }

    /// Parks at the end of the last item.
    fn stop_at_end(&mut self, index: usize, fx: &mut Vec<Effect>) {
        let end = self.book.reading_order()[index]
            .duration_ms()
            .unwrap_or(self.offset_ms);

        match self.state {
            EngineState::Playing { .. } => {
                fx.push(Effect::StopPolling);
                fx.push(Effect::Seek { offset_ms: end });
                fx.push(Effect::SetPlayWhenReady(false));
                self.state = EngineState::Stopped { index };
                self.offset_ms = end;
            }
            EngineState::Stopped { .. } => {
                fx.push(Effect::Seek { offset_ms: end });
                self.offset_ms = end;
            }
            EngineState::WaitingForElement { .. } => {
                self.state = EngineState::WaitingForElement {
                    index,
                    offset_ms: end,
                    autoplay: false,
                };
                self.offset_ms = end;
            }
            EngineState::Initial => return,
        }

        self.end_pending = false;
        debug!(index, "Reached the end of the book");
        fx.push(Effect::Emit(PlayerEvent::PlaybackStopped {
            position: self.position(index, end),
        }));
    }

    fn emit_waiting_for_action(&self, index: usize, fx: &mut Vec<Effect>) {
        fx.push(Effect::Emit(PlayerEvent::PlaybackWaitingForAction {
            position: self.position(index, self.offset_ms),
        }));
    }

    fn is_playing_item(&self, item_id: &str) -> bool {
        match self.state {
            EngineState::Playing { index } => {
                self.book.reading_order()[index].id().as_str() == item_id
            }
            _ => false,
        }
    }

    /// Resolves a signed offset relative to `index` into a concrete item and
    /// offset. Where durations are missing the walk stops early and the
    /// remaining offset is used as-is (negative remainders become 0).
    fn resolve(&self, index: usize, offset_ms: i64) -> (usize, u64) {
        match self.book.reading_order().translate(index, offset_ms) {
            OffsetTranslation::Unresolved { index, offset_ms } => {
                debug!(index, offset_ms, "Offset crosses an item of unknown duration");
                (index, offset_ms.max(0) as u64)
            }
            translation => (translation.index(), translation.offset_ms().unwrap_or(0)),
        }
    }

    fn position(&self, index: usize, offset_ms: u64) -> EventPosition {
        EventPosition::new(
            self.book.reading_order()[index].id().to_string(),
            index,
            offset_ms,
        )
        .streaming(self.streaming)
    }
}

impl std::fmt::Debug for EngineMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMachine")
            .field("book", &self.book.id())
            .field("state", &self.state)
            .field("offset_ms", &self.offset_ms)
            .field("streaming", &self.streaming)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::download::{DownloadProvider, DownloadRequest};
    use bridge_traits::error::Result as BridgeResult;
    use core_book::{item_output_path, DownloadStatus, Manifest, ManifestItem, ReadingOrderId};
    use core_runtime::config::PlayerConfig;
    use tempfile::TempDir;

    struct NoopProvider;

    #[async_trait]
    impl DownloadProvider for NoopProvider {
        async fn download(&self, _request: DownloadRequest) -> BridgeResult<()> {
            Ok(())
        }
    }

    /// Three 10 s items; `downloaded` lists the items whose media exists.
    fn open_book(dir: &TempDir, downloaded: &[usize], streaming: bool) -> Arc<AudioBook> {
        let manifest = (0..3).fold(Manifest::new("book", "Book"), |m, i| {
            m.with_item(
                ManifestItem::new(format!("t{}", i), format!("https://cdn/{}", i))
                    .duration_secs(10.0),
            )
        });
        for &index in downloaded {
            let path = item_output_path(dir.path(), "book", index, &format!("t{}", index));
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"audio").unwrap();
        }
        let config = PlayerConfig::builder()
            .download_dir(dir.path())
            .download_provider(Arc::new(NoopProvider))
            .streaming_permitted(streaming)
            .build()
            .unwrap();
        Arc::new(AudioBook::open(&manifest, &config).unwrap())
    }

    fn events(effects: &[Effect]) -> Vec<PlayerEvent> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Emit(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    fn loads(effects: &[Effect]) -> Vec<(usize, u64)> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Load {
                    media, offset_ms, ..
                } => Some((media.item_index, *offset_ms)),
                _ => None,
            })
            .collect()
    }

    fn pos(index: usize, offset_ms: u64) -> EventPosition {
        EventPosition::new(format!("t{}", index), index, offset_ms)
    }

    fn change(index: usize, status: DownloadStatus) -> DownloadStatusChange {
        DownloadStatusChange {
            item_id: ReadingOrderId::new(format!("t{}", index)),
            index,
            status,
        }
    }

    #[tokio::test]
    async fn test_play_downloaded_item() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = EngineMachine::new(open_book(&dir, &[0, 1, 2], false), false);

        let fx = machine.handle(Command::Play);
        assert!(matches!(
            &fx[0],
            Effect::Load { media, offset_ms: 0, play_when_ready: true }
                if matches!(media.source, AudioSource::LocalFile { .. })
        ));
        assert_eq!(
            events(&fx),
            vec![PlayerEvent::PlaybackStarted { position: pos(0, 0) }]
        );
        assert_eq!(fx.last(), Some(&Effect::StartPolling));
        assert_eq!(machine.state(), EngineState::Playing { index: 0 });

        // Already playing.
        assert!(machine.handle(Command::Play).is_empty());
    }

    #[tokio::test]
    async fn test_play_missing_item_waits() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = EngineMachine::new(open_book(&dir, &[], false), false);

        let fx = machine.handle(Command::Play);
        assert!(loads(&fx).is_empty());
        assert_eq!(
            events(&fx),
            vec![
                PlayerEvent::ChapterWaiting { position: pos(0, 0) },
                PlayerEvent::PlaybackStopped { position: pos(0, 0) },
            ]
        );
        assert_eq!(
            machine.state(),
            EngineState::WaitingForElement {
                index: 0,
                offset_ms: 0,
                autoplay: true
            }
        );

        // Progress of the download does not start anything.
        let fx = machine.handle(Command::DownloadStatusChanged(change(
            0,
            DownloadStatus::Downloading { progress: 0.5 },
        )));
        assert!(fx.is_empty());
    }

    #[tokio::test]
    async fn test_pause_while_waiting_clears_autoplay() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = EngineMachine::new(open_book(&dir, &[], false), false);
        machine.handle(Command::Play);

        let fx = machine.handle(Command::Pause {
            reason: PauseReason::UserExplicitlyPaused,
        });
        assert!(fx.is_empty());
        assert_eq!(
            machine.state(),
            EngineState::WaitingForElement {
                index: 0,
                offset_ms: 0,
                autoplay: false
            }
        );
    }

    #[tokio::test]
    async fn test_streaming_loads_remote_link() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = EngineMachine::new(open_book(&dir, &[], true), true);

        let fx = machine.handle(Command::Play);
        match &fx[0] {
            Effect::Load { media, .. } => assert_eq!(
                media.source,
                AudioSource::RemoteStream {
                    url: "https://cdn/0".to_string(),
                    headers: HashMap::new()
                }
            ),
            other => panic!("expected load, got {:?}", other),
        }
        assert_eq!(
            events(&fx),
            vec![PlayerEvent::PlaybackStarted {
                position: pos(0, 0).streaming(true)
            }]
        );

        // Streaming playback ignores download status.
        let fx = machine.handle(Command::DownloadStatusChanged(change(
            0,
            DownloadStatus::NotDownloaded,
        )));
        assert!(fx.is_empty());
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = EngineMachine::new(open_book(&dir, &[0, 1, 2], false), false);
        machine.handle(Command::Play);
        machine.observe_position(1200);

        let fx = machine.handle(Command::Pause {
            reason: PauseReason::SleepTimer,
        });
        assert_eq!(
            fx,
            vec![
                Effect::StopPolling,
                Effect::SetPlayWhenReady(false),
                Effect::Emit(PlayerEvent::PlaybackPaused {
                    position: pos(0, 1200),
                    reason: PauseReason::SleepTimer
                }),
            ]
        );

        let fx = machine.handle(Command::Play);
        assert_eq!(
            fx,
            vec![
                Effect::SetPlayWhenReady(true),
                Effect::Emit(PlayerEvent::PlaybackStarted {
                    position: pos(0, 1200)
                }),
                Effect::StartPolling,
            ]
        );
    }

    #[tokio::test]
    async fn test_end_of_item_needs_two_polls() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = EngineMachine::new(open_book(&dir, &[0, 1, 2], false), false);
        machine.handle(Command::Play);

        let fx = machine.handle(Command::Tick {
            position_ms: 10_000,
            duration_ms: Some(10_000),
        });
        assert_eq!(
            events(&fx),
            vec![PlayerEvent::PlaybackProgressUpdate {
                position: pos(0, 10_000)
            }]
        );
        assert_eq!(machine.state(), EngineState::Playing { index: 0 });

        let fx = machine.handle(Command::Tick {
            position_ms: 10_000,
            duration_ms: Some(10_000),
        });
        assert_eq!(
            events(&fx),
            vec![
                PlayerEvent::PlaybackProgressUpdate {
                    position: pos(0, 10_000)
                },
                PlayerEvent::ChapterCompleted {
                    position: pos(0, 10_000)
                },
                PlayerEvent::PlaybackStarted { position: pos(1, 0) },
            ]
        );
        assert_eq!(loads(&fx), vec![(1, 0)]);
    }

    #[tokio::test]
    async fn test_end_report_is_forgotten_after_position_moves_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = EngineMachine::new(open_book(&dir, &[0, 1, 2], false), false);
        machine.handle(Command::Play);

        for position_ms in [10_000, 9_000, 10_000] {
            machine.handle(Command::Tick {
                position_ms,
                duration_ms: None,
            });
        }
        assert_eq!(machine.state(), EngineState::Playing { index: 0 });
    }

    #[tokio::test]
    async fn test_stale_track_end_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = EngineMachine::new(open_book(&dir, &[0, 1, 2], false), false);
        machine.handle(Command::PlayAtLocation {
            index: 1,
            offset_ms: 0,
        });

        let fx = machine.handle(Command::Adapter(AdapterEvent::TrackEnded {
            item_id: "t0".into(),
        }));
        assert!(fx.is_empty());

        let fx = machine.handle(Command::Adapter(AdapterEvent::TrackEnded {
            item_id: "t1".into(),
        }));
        assert_eq!(loads(&fx), vec![(2, 0)]);
    }

    #[tokio::test]
    async fn test_skip_playhead_crosses_items() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = EngineMachine::new(open_book(&dir, &[0, 1, 2], false), false);
        machine.handle(Command::PlayAtLocation {
            index: 1,
            offset_ms: 2_000,
        });

        // Back 5 s from 2 s into item 1 lands 3 s before the end of item 0.
        let fx = machine.handle(Command::SkipPlayhead { delta_ms: -5_000 });
        assert_eq!(loads(&fx), vec![(0, 7_000)]);
        assert_eq!(
            events(&fx),
            vec![PlayerEvent::PlaybackStarted {
                position: pos(0, 7_000)
            }]
        );

        // Forward 5 s completes item 0.
        let fx = machine.handle(Command::SkipPlayhead { delta_ms: 5_000 });
        assert_eq!(loads(&fx), vec![(1, 2_000)]);
        assert_eq!(
            events(&fx)[0],
            PlayerEvent::ChapterCompleted {
                position: pos(0, 7_000)
            }
        );

        // Within the item it is a plain seek.
        let fx = machine.handle(Command::SkipPlayhead { delta_ms: 1_000 });
        assert_eq!(fx, vec![Effect::Seek { offset_ms: 3_000 }]);
    }

    #[tokio::test]
    async fn test_skip_playhead_while_stopped_stays_paused() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = EngineMachine::new(open_book(&dir, &[0, 1, 2], false), false);
        machine.handle(Command::Play);
        machine.handle(Command::Pause {
            reason: PauseReason::UserExplicitlyPaused,
        });

        let fx = machine.handle(Command::SkipPlayhead { delta_ms: 12_000 });
        assert!(matches!(
            &fx[1],
            Effect::Load {
                play_when_ready: false,
                offset_ms: 2_000,
                ..
            }
        ));
        assert_eq!(machine.state(), EngineState::Stopped { index: 1 });
        assert_eq!(
            events(&fx).last(),
            Some(&PlayerEvent::PlaybackWaitingForAction {
                position: pos(1, 2_000)
            })
        );
    }

    #[tokio::test]
    async fn test_skip_to_previous() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = EngineMachine::new(open_book(&dir, &[0, 1, 2], false), false);

        // From the start, the last item.
        let fx = machine.handle(Command::SkipToPrevious { offset_ms: 0 });
        assert_eq!(loads(&fx), vec![(2, 0)]);

        let fx = machine.handle(Command::SkipToPrevious { offset_ms: 0 });
        assert_eq!(loads(&fx), vec![(1, 0)]);

        let fx = machine.handle(Command::SkipToPrevious { offset_ms: -3_000 });
        assert_eq!(loads(&fx), vec![(0, 7_000)]);

        // No previous item: back to the start of the current one.
        let fx = machine.handle(Command::SkipToPrevious { offset_ms: 0 });
        assert_eq!(fx, vec![Effect::Seek { offset_ms: 0 }]);
    }

    #[tokio::test]
    async fn test_skip_to_next_at_last_item_stops_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = EngineMachine::new(open_book(&dir, &[0, 1, 2], false), false);
        machine.handle(Command::PlayAtLocation {
            index: 2,
            offset_ms: 4_000,
        });

        let fx = machine.handle(Command::SkipToNext { offset_ms: 0 });
        assert_eq!(
            events(&fx),
            vec![
                PlayerEvent::ChapterCompleted {
                    position: pos(2, 4_000)
                },
                PlayerEvent::PlaybackStopped {
                    position: pos(2, 10_000)
                },
            ]
        );
        assert!(fx.contains(&Effect::Seek { offset_ms: 10_000 }));
        assert_eq!(machine.state(), EngineState::Stopped { index: 2 });
    }

    #[tokio::test]
    async fn test_end_of_book_while_waiting_parks_at_duration() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = EngineMachine::new(open_book(&dir, &[0, 1], false), false);
        machine.handle(Command::PlayAtLocation {
            index: 2,
            offset_ms: 4_000,
        });

        let fx = machine.handle(Command::SkipToNext { offset_ms: 0 });
        assert_eq!(
            events(&fx),
            vec![PlayerEvent::PlaybackStopped {
                position: pos(2, 10_000)
            }]
        );
        assert_eq!(
            machine.state(),
            EngineState::WaitingForElement {
                index: 2,
                offset_ms: 10_000,
                autoplay: false
            }
        );
        assert_eq!(machine.current_position(), Some(pos(2, 10_000)));
    }

    #[tokio::test]
    async fn test_failed_load_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = EngineMachine::new(open_book(&dir, &[0, 1, 2], false), false);
        machine.handle(Command::PlayAtLocation {
            index: 1,
            offset_ms: 2_500,
        });

        let fx = machine.handle(Command::LoadFailed {
            index: 1,
            offset_ms: 2_500,
            autoplay: true,
        });
        assert_eq!(
            fx,
            vec![
                Effect::StopPolling,
                Effect::Emit(PlayerEvent::PlaybackStopped {
                    position: pos(1, 2_500)
                }),
            ]
        );
        assert_eq!(
            machine.state(),
            EngineState::WaitingForElement {
                index: 1,
                offset_ms: 2_500,
                autoplay: true
            }
        );

        // Nothing is loaded, so seeking within the item is refused.
        assert!(machine.handle(Command::SkipPlayhead { delta_ms: 1_000 }).is_empty());

        let fx = machine.handle(Command::Play);
        assert_eq!(loads(&fx), vec![(1, 2_500)]);
        assert_eq!(machine.state(), EngineState::Playing { index: 1 });

        // A failure reported for an item that is no longer current changes nothing.
        let fx = machine.handle(Command::LoadFailed {
            index: 0,
            offset_ms: 0,
            autoplay: true,
        });
        assert!(fx.is_empty());
        assert_eq!(machine.state(), EngineState::Playing { index: 1 });
    }

    #[tokio::test]
    async fn test_snapshot_tracks_playhead_and_rate() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = EngineMachine::new(open_book(&dir, &[0, 1, 2], false), false);
        assert_eq!(machine.snapshot(), EngineSnapshot::default());

        machine.handle(Command::SetPlaybackRate(PlaybackRate::Double));
        machine.handle(Command::PlayAtLocation {
            index: 2,
            offset_ms: 1_000,
        });
        machine.handle(Command::Tick {
            position_ms: 3_250,
            duration_ms: None,
        });

        let snapshot = machine.snapshot();
        assert_eq!(snapshot.state, EngineState::Playing { index: 2 });
        assert_eq!(snapshot.position, Some(PlayerPosition::new("t2", 3_250)));
        assert_eq!(snapshot.rate, PlaybackRate::Double);
    }

    #[tokio::test]
    async fn test_deleted_item_stops_playback() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = EngineMachine::new(open_book(&dir, &[0, 1, 2], false), false);
        machine.handle(Command::Play);
        machine.observe_position(3_000);

        let fx = machine.handle(Command::DownloadStatusChanged(change(
            0,
            DownloadStatus::NotDownloaded,
        )));
        assert_eq!(
            fx,
            vec![
                Effect::StopPolling,
                Effect::Stop,
                Effect::Emit(PlayerEvent::PlaybackStopped {
                    position: pos(0, 3_000)
                }),
            ]
        );
        assert_eq!(
            machine.state(),
            EngineState::WaitingForElement {
                index: 0,
                offset_ms: 3_000,
                autoplay: false
            }
        );

        // Other items are irrelevant.
        let fx = machine.handle(Command::DownloadStatusChanged(change(
            1,
            DownloadStatus::NotDownloaded,
        )));
        assert!(fx.is_empty());
    }

    #[tokio::test]
    async fn test_move_playhead_keeps_transport_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = EngineMachine::new(open_book(&dir, &[0, 1, 2], false), false);

        let fx = machine.handle(Command::MovePlayheadToLocation {
            index: 1,
            offset_ms: 500,
        });
        assert_eq!(machine.state(), EngineState::Stopped { index: 1 });
        assert_eq!(
            events(&fx),
            vec![PlayerEvent::PlaybackWaitingForAction {
                position: pos(1, 500)
            }]
        );

        let fx = machine.handle(Command::MovePlayheadToLocation {
            index: 1,
            offset_ms: 900,
        });
        assert_eq!(fx[0], Effect::Seek { offset_ms: 900 });
        assert_eq!(machine.state(), EngineState::Stopped { index: 1 });
    }

    #[tokio::test]
    async fn test_bookmark_and_errors_report_position() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = EngineMachine::new(open_book(&dir, &[0, 1, 2], false), false);
        assert!(machine.handle(Command::Bookmark).is_empty());

        machine.handle(Command::Play);
        machine.observe_position(4_200);
        assert_eq!(
            events(&machine.handle(Command::Bookmark)),
            vec![PlayerEvent::CreateBookmark {
                position: pos(0, 4_200),
                kind: BookmarkKind::Explicit
            }]
        );

        let fx = machine.handle(Command::Adapter(AdapterEvent::Error {
            code: 7,
            message: "renderer".into(),
        }));
        assert_eq!(
            events(&fx),
            vec![PlayerEvent::PlaybackError {
                position: Some(pos(0, 4_200)),
                code: 7,
                message: "renderer".into()
            }]
        );
        assert_eq!(machine.state(), EngineState::Playing { index: 0 });
    }

    #[tokio::test]
    async fn test_close_releases_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = EngineMachine::new(open_book(&dir, &[0, 1, 2], false), false);
        machine.handle(Command::Play);

        let fx = machine.handle(Command::Close);
        assert_eq!(
            fx,
            vec![
                Effect::StopPolling,
                Effect::Stop,
                Effect::Emit(PlayerEvent::PlaybackStopped { position: pos(0, 0) }),
                Effect::Release,
            ]
        );
        assert!(machine.is_closed());
        assert!(machine.handle(Command::Play).is_empty());
        assert!(machine.handle(Command::Close).is_empty());
    }
}
