//! # Playback Engine
//!
//! Runs the [`EngineMachine`] on a dedicated task and exposes it through a
//! cloneable [`PlaybackEngine`] handle.
//!
//! ## Architecture
//!
//! ```text
//! host calls ──┐
//! decoder ─────┼─► command queue ─► engine task ─► PlaybackAdapter
//! downloads ───┤      (FIFO)           │
//! poll timer ──┘                       └─────────► EventBus ─► subscribers
//! ```
//!
//! Every input, whoever sends it, goes through one unbounded FIFO queue and is
//! applied by the engine task one at a time. Handle methods only enqueue, so
//! they never block and can be called from any thread, and commands take
//! effect in the order they were issued.
//!
//! ## Usage
//!
//! ```ignore
//! use core_playback::{EngineConfig, PlaybackEngine};
//!
//! let engine = PlaybackEngine::start(book, adapter, &config, EngineConfig::default())?;
//! let mut events = engine.events();
//!
//! engine.play()?;
//! while let Ok(event) = events.recv().await {
//!     println!("{}", event.description());
//! }
//! engine.close().await?;
//! ```

use core_book::AudioBook;
use core_runtime::config::PlayerConfig;
use core_runtime::events::{EventBus, EventStream, PauseReason, PlaybackRate, PlayerEvent};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::EngineConfig;
use crate::error::{PlaybackError, Result};
use crate::machine::{Command, Effect, EngineMachine};
use crate::state::{EngineSnapshot, EngineState, PlayerPosition};
use crate::traits::{AdapterEvent, MediaSource, PlaybackAdapter};

/// Distance covered by [`PlaybackEngine::skip_forward`] and
/// [`PlaybackEngine::skip_back`].
pub const SKIP_INTERVAL_MS: i64 = 30_000;

enum Envelope {
    Command(Command),
    /// Poll from the progress timer of the given generation.
    Tick { generation: u64 },
    Close(oneshot::Sender<()>),
}

// ============================================================================
// Handle
// ============================================================================

/// Handle to a running playback engine.
///
/// Cloning is cheap; all clones drive the same engine. The engine shuts down
/// on [`close`](Self::close), or when the last handle is dropped.
#[derive(Clone)]
pub struct PlaybackEngine {
    inner: Arc<EngineHandle>,
}

struct EngineHandle {
    commands: mpsc::UnboundedSender<Envelope>,
    closed: AtomicBool,
    bus: EventBus,
    snapshot: watch::Receiver<EngineSnapshot>,
    book: Arc<AudioBook>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackEngine {
    /// Starts an engine for `book` on the current Tokio runtime.
    ///
    /// The engine applies `engine_config.initial_rate` first, so the first
    /// event every subscriber sees is `PlaybackRateChanged`.
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::InvalidConfig`] if either configuration is invalid
    /// - [`PlaybackError::NoRuntime`] outside a Tokio runtime
    #[instrument(skip_all, fields(book = %book.id()))]
    pub fn start(
        book: Arc<AudioBook>,
        adapter: Arc<dyn PlaybackAdapter>,
        config: &PlayerConfig,
        engine_config: EngineConfig,
    ) -> Result<Self> {
        engine_config
            .validate()
            .map_err(PlaybackError::InvalidConfig)?;
        config
            .validate()
            .map_err(|e| PlaybackError::InvalidConfig(e.to_string()))?;
        let runtime = Handle::try_current().map_err(|e| PlaybackError::NoRuntime(e.to_string()))?;

        let bus = EventBus::new(config.event_buffer_size);
        let (commands, queue) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(EngineSnapshot {
            rate: engine_config.initial_rate,
            ..EngineSnapshot::default()
        });

        // Enqueued before anything a caller can send.
        let _ = commands.send(Envelope::Command(Command::SetPlaybackRate(
            engine_config.initial_rate,
        )));

        let forwarders = spawn_forwarders(&runtime, &book, &commands);
        let runner = EngineRunner {
            machine: EngineMachine::new(Arc::clone(&book), config.streaming_permitted),
            adapter,
            bus: bus.clone(),
            book: Arc::clone(&book),
            config: engine_config,
            queue,
            requeue: commands.downgrade(),
            polling: None,
            generation: 0,
            forwarders,
            snapshot: snapshot_tx,
        };
        let task = runtime.spawn(runner.run());

        info!(
            items = book.reading_order().len(),
            streaming = config.streaming_permitted,
            "Playback engine started"
        );

        Ok(Self {
            inner: Arc::new(EngineHandle {
                commands,
                closed: AtomicBool::new(false),
                bus,
                snapshot,
                book,
                task: Mutex::new(Some(task)),
            }),
        })
    }

    /// Subscribes to engine events, starting with the latest one.
    pub fn events(&self) -> EventStream {
        self.inner.bus.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn book(&self) -> &Arc<AudioBook> {
        &self.inner.book
    }

    /// State, playhead and rate after the last applied command.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn state(&self) -> EngineState {
        self.inner.snapshot.borrow().state
    }

    /// The playhead as of the last command or progress poll, `None` until an
    /// item was chosen.
    pub fn current_position(&self) -> Option<PlayerPosition> {
        self.inner.snapshot.borrow().position.clone()
    }

    pub fn playback_rate(&self) -> PlaybackRate {
        self.inner.snapshot.borrow().rate
    }

    /// Resolves when the engine publishes a snapshot that satisfies `f`.
    pub async fn wait_for<F>(&self, f: F) -> Result<EngineSnapshot>
    where
        F: FnMut(&EngineSnapshot) -> bool,
    {
        let mut snapshots = self.inner.snapshot.clone();
        let snapshot = snapshots
            .wait_for(f)
            .await
            .map_err(|_| PlaybackError::Closed)?;
        Ok(snapshot.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Sink the decoder posts its callbacks to.
    pub fn adapter_events(&self) -> AdapterEventSink {
        AdapterEventSink {
            queue: self.inner.commands.downgrade(),
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    pub fn play(&self) -> Result<()> {
        self.send(Command::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.pause_with_reason(PauseReason::UserExplicitlyPaused)
    }

    pub fn pause_with_reason(&self, reason: PauseReason) -> Result<()> {
        self.send(Command::Pause { reason })
    }

    /// Moves to the next item, starting `offset_ms` into it.
    pub fn skip_to_next(&self, offset_ms: i64) -> Result<()> {
        self.send(Command::SkipToNext { offset_ms })
    }

    /// Moves to the previous item. A negative `offset_ms` starts that far
    /// before its end; otherwise it starts from the beginning.
    pub fn skip_to_previous(&self, offset_ms: i64) -> Result<()> {
        self.send(Command::SkipToPrevious { offset_ms })
    }

    /// Moves the playhead by `delta_ms`, crossing item boundaries as needed.
    pub fn skip_playhead(&self, delta_ms: i64) -> Result<()> {
        self.send(Command::SkipPlayhead { delta_ms })
    }

    pub fn skip_forward(&self) -> Result<()> {
        self.skip_playhead(SKIP_INTERVAL_MS)
    }

    pub fn skip_back(&self) -> Result<()> {
        self.skip_playhead(-SKIP_INTERVAL_MS)
    }

    pub fn play_at_location(&self, position: &PlayerPosition) -> Result<()> {
        let index = self.index_of(position)?;
        self.send(Command::PlayAtLocation {
            index,
            offset_ms: position.offset_ms,
        })
    }

    /// Like [`play_at_location`](Self::play_at_location), but keeps the
    /// current play/pause state.
    pub fn move_playhead_to_location(&self, position: &PlayerPosition) -> Result<()> {
        let index = self.index_of(position)?;
        self.send(Command::MovePlayheadToLocation {
            index,
            offset_ms: position.offset_ms,
        })
    }

    pub fn play_at_book_start(&self) -> Result<()> {
        self.send(Command::PlayAtLocation {
            index: 0,
            offset_ms: 0,
        })
    }

    pub fn move_playhead_to_book_start(&self) -> Result<()> {
        self.send(Command::MovePlayheadToLocation {
            index: 0,
            offset_ms: 0,
        })
    }

    pub fn set_playback_rate(&self, rate: PlaybackRate) -> Result<()> {
        self.send(Command::SetPlaybackRate(rate))
    }

    /// Requests an explicit bookmark at the current position.
    pub fn bookmark(&self) -> Result<()> {
        self.send(Command::Bookmark)
    }

    pub fn delete_bookmark(&self, bookmark_id: impl Into<String>) -> Result<()> {
        self.send(Command::DeleteBookmark {
            bookmark_id: bookmark_id.into(),
        })
    }

    /// Stops and releases the decoder, then closes the event bus.
    ///
    /// Completes once the engine task has finished. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let (ack, done) = oneshot::channel();
        if self.inner.commands.send(Envelope::Close(ack)).is_ok() {
            let _ = done.await;
        }

        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Engine task ended abnormally");
            }
        }
        info!(book = %self.inner.book.id(), "Playback engine closed");
        Ok(())
    }

    fn send(&self, command: Command) -> Result<()> {
        if self.is_closed() {
            return Err(PlaybackError::Closed);
        }
        trace!(command = command.name(), "Enqueue");
        self.inner
            .commands
            .send(Envelope::Command(command))
            .map_err(|_| PlaybackError::Closed)
    }

    fn index_of(&self, position: &PlayerPosition) -> Result<usize> {
        self.inner
            .book
            .reading_order()
            .by_id(position.item_id.as_str())
            .map(|item| item.index())
            .ok_or_else(|| PlaybackError::UnknownItem(position.item_id.to_string()))
    }
}

impl std::fmt::Debug for PlaybackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackEngine")
            .field("book", &self.inner.book.id())
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Posts decoder callbacks onto the engine queue.
///
/// Does not keep the engine alive.
#[derive(Clone, Debug)]
pub struct AdapterEventSink {
    queue: mpsc::WeakUnboundedSender<Envelope>,
}

impl AdapterEventSink {
    /// Returns `false` once the engine is gone.
    pub fn send(&self, event: AdapterEvent) -> bool {
        forward(&self.queue, Command::Adapter(event))
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Envelope::Command(command) => write!(f, "Command({})", command.name()),
            Envelope::Tick { generation } => write!(f, "Tick({})", generation),
            Envelope::Close(_) => f.write_str("Close"),
        }
    }
}

fn forward(queue: &mpsc::WeakUnboundedSender<Envelope>, command: Command) -> bool {
    match queue.upgrade() {
        Some(sender) => sender.send(Envelope::Command(command)).is_ok(),
        None => false,
    }
}

/// Relays download status changes and manifest replacements into the queue.
///
/// Subscriptions are taken here, before the engine task runs, so no change
/// made after `start` returns can be missed.
fn spawn_forwarders(
    runtime: &Handle,
    book: &Arc<AudioBook>,
    commands: &mpsc::UnboundedSender<Envelope>,
) -> Vec<JoinHandle<()>> {
    let mut statuses = book.subscribe_status();
    let mut manifests = book.subscribe_manifest_updates();
    let status_queue = commands.downgrade();
    let manifest_queue = commands.downgrade();
    let resync_book = Arc::clone(book);

    let status = runtime.spawn(async move {
        loop {
            match statuses.recv().await {
                Ok(change) => {
                    if !forward(&status_queue, Command::DownloadStatusChanged(change)) {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    // Replay the current status of every item instead.
                    warn!(missed, "Status forwarder lagged; resynchronising");
                    for (index, item) in resync_book.reading_order().iter().enumerate() {
                        let change = core_book::DownloadStatusChange {
                            item_id: item.id().clone(),
                            index,
                            status: item.download_status(),
                        };
                        if !forward(&status_queue, Command::DownloadStatusChanged(change)) {
                            return;
                        }
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let manifest = runtime.spawn(async move {
        loop {
            match manifests.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    if !forward(&manifest_queue, Command::ManifestUpdated) {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    vec![status, manifest]
}

// ============================================================================
// Engine Task
// ============================================================================

struct Polling {
    generation: u64,
    task: JoinHandle<()>,
}

struct EngineRunner {
    machine: EngineMachine,
    adapter: Arc<dyn PlaybackAdapter>,
    bus: EventBus,
    book: Arc<AudioBook>,
    config: EngineConfig,
    queue: mpsc::UnboundedReceiver<Envelope>,
    /// Weak, so the queue closes when every handle is gone.
    requeue: mpsc::WeakUnboundedSender<Envelope>,
    polling: Option<Polling>,
    generation: u64,
    forwarders: Vec<JoinHandle<()>>,
    snapshot: watch::Sender<EngineSnapshot>,
}

impl EngineRunner {
    async fn run(mut self) {
        while let Some(envelope) = self.queue.recv().await {
            match envelope {
                Envelope::Command(command) => self.dispatch(command).await,
                Envelope::Tick { generation } => {
                    let current = self
                        .polling
                        .as_ref()
                        .is_some_and(|polling| polling.generation == generation);
                    if current {
                        self.poll().await;
                    } else {
                        trace!(generation, "Dropping stale tick");
                    }
                }
                Envelope::Close(ack) => {
                    self.shutdown().await;
                    let _ = ack.send(());
                    return;
                }
            }
        }

        debug!("All engine handles dropped");
        self.shutdown().await;
    }

    async fn dispatch(&mut self, mut command: Command) {
        if command.reads_position() && self.machine.state().has_media() {
            match self.adapter.get_position().await {
                Ok(position) => self.machine.observe_position(millis(position)),
                Err(e) => debug!(error = %e, "Decoder position unavailable"),
            }
        }

        loop {
            let name = command.name();
            let effects = self.machine.handle(command);
            trace!(command = name, effects = effects.len(), "Applied");

            let mut follow_up = None;
            for effect in effects {
                follow_up = self.apply(effect).await;
                if follow_up.is_some() {
                    break;
                }
            }
            match follow_up {
                Some(next) => command = next,
                None => break,
            }
        }
        self.snapshot.send_replace(self.machine.snapshot());
    }

    async fn poll(&mut self) {
        let position = match self.adapter.get_position().await {
            Ok(position) => millis(position),
            Err(e) => {
                debug!(error = %e, "Skipping progress poll");
                return;
            }
        };
        let duration = self.adapter.get_duration().await.ok().flatten().map(millis);
        self.dispatch(Command::Tick {
            position_ms: position,
            duration_ms: duration,
        })
        .await;
    }

    /// Executes one effect. A failed load abandons the rest of the command and
    /// hands back the command that reports it to the machine.
    async fn apply(&mut self, effect: Effect) -> Option<Command> {
        let result = match effect {
            Effect::Load {
                media,
                offset_ms,
                play_when_ready,
            } => {
                let index = media.item_index;
                match self.load(media, offset_ms, play_when_ready).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        self.report_failure(&e);
                        return Some(Command::LoadFailed {
                            index,
                            offset_ms,
                            autoplay: play_when_ready,
                        });
                    }
                }
            }
            Effect::Seek { offset_ms } => {
                self.adapter
                    .seek(Duration::from_millis(offset_ms))
                    .await
            }
            Effect::SetPlayWhenReady(true) => self.adapter.play().await,
            Effect::SetPlayWhenReady(false) => self.adapter.pause().await,
            Effect::Stop => self.adapter.stop().await,
            Effect::Release => self.adapter.release().await,
            Effect::SetRate(speed) => self.adapter.set_playback_rate(speed).await,
            Effect::StartPolling => {
                self.start_polling();
                Ok(())
            }
            Effect::StopPolling => {
                self.stop_polling();
                Ok(())
            }
            Effect::Emit(event) => {
                if let Err(e) = self.bus.emit(event) {
                    debug!(error = %e, "Event dropped");
                }
                Ok(())
            }
        };

        if let Err(e) = result {
            self.report_failure(&e);
        }
        None
    }

    fn report_failure(&self, error: &PlaybackError) {
        warn!(error = %error, code = error.code(), "Decoder call failed");
        let event = PlayerEvent::PlaybackError {
            position: self.machine.current_position(),
            code: error.code(),
            message: error.to_string(),
        };
        if let Err(e) = self.bus.emit(event) {
            debug!(error = %e, "Event dropped");
        }
    }

    #[instrument(skip_all, fields(item = %media.item_id, offset_ms = offset_ms, autoplay = play_when_ready))]
    async fn load(&mut self, media: MediaSource, offset_ms: u64, play_when_ready: bool) -> Result<()> {
        let index = media.item_index;
        debug!(streaming = media.is_streaming(), "Loading item");

        self.adapter.load(media).await?;
        self.adapter.prepare().await?;
        self.adapter.seek(Duration::from_millis(offset_ms)).await?;
        self.adapter
            .set_playback_rate(self.machine.rate().speed())
            .await?;
        if play_when_ready {
            self.adapter.play().await?;
        } else {
            self.adapter.pause().await?;
        }

        self.backfill_duration(index).await;
        Ok(())
    }

    async fn backfill_duration(&self, index: usize) {
        let Some(item) = self.book.item(index) else {
            return;
        };
        let duration = match self.adapter.get_duration().await {
            Ok(Some(duration)) => millis(duration),
            Ok(None) => return,
            Err(e) => {
                debug!(error = %e, "Decoder duration unavailable");
                return;
            }
        };

        if duration < self.config.zero_duration_threshold_ms {
            warn!(
                item = %item.id(),
                duration_ms = duration,
                "Decoder reported a suspiciously short duration"
            );
        } else if item.set_duration_ms(duration) {
            debug!(item = %item.id(), duration_ms = duration, "Duration learned from decoder");
        }
    }

    fn start_polling(&mut self) {
        self.stop_polling();
        self.generation += 1;
        let generation = self.generation;
        let queue = self.requeue.clone();
        let period = self.config.progress_interval();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(sender) = queue.upgrade() else {
                    break;
                };
                if sender.send(Envelope::Tick { generation }).is_err() {
                    break;
                }
            }
        });
        self.polling = Some(Polling { generation, task });
    }

    fn stop_polling(&mut self) {
        if let Some(polling) = self.polling.take() {
            polling.task.abort();
        }
    }

    async fn shutdown(&mut self) {
        self.dispatch(Command::Close).await;
        self.stop_polling();
        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }
        self.bus.close();
        debug!("Engine task finished");
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
