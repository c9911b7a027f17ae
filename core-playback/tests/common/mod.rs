//! Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::download::{DownloadProvider, DownloadRequest};
use bridge_traits::error::Result as BridgeResult;
use core_book::{item_output_path, AudioBook, Manifest, ManifestItem};
use core_playback::{EngineConfig, MediaSource, PlaybackAdapter, PlaybackEngine, PlaybackError, Result};
use core_runtime::config::PlayerConfig;
use core_runtime::events::{EventPosition, EventStream, PlayerEvent};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const BOOK_ID: &str = "book-1";

// ============================================================================
// Recording decoder
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Load { index: usize, streaming: bool },
    Prepare,
    Seek(u64),
    Play,
    Pause,
    Stop,
    Release,
    Rate(f64),
}

/// Decoder fake that records every call and reports a settable position.
#[derive(Default)]
pub struct RecordingAdapter {
    calls: Mutex<Vec<Call>>,
    position_ms: AtomicU64,
    duration_ms: Mutex<Option<u64>>,
    fail_seeks: AtomicBool,
}

impl RecordingAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_duration(duration_ms: u64) -> Arc<Self> {
        let adapter = Self::default();
        *adapter.duration_ms.lock() = Some(duration_ms);
        Arc::new(adapter)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn loaded(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Load { index, .. } => Some(index),
                _ => None,
            })
            .collect()
    }

    pub fn set_position(&self, position_ms: u64) {
        self.position_ms.store(position_ms, Ordering::SeqCst);
    }

    pub fn fail_seeks(&self, fail: bool) {
        self.fail_seeks.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl PlaybackAdapter for RecordingAdapter {
    async fn load(&self, media: MediaSource) -> Result<()> {
        self.record(Call::Load {
            index: media.item_index,
            streaming: media.is_streaming(),
        });
        self.position_ms.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn prepare(&self) -> Result<()> {
        self.record(Call::Prepare);
        Ok(())
    }

    async fn seek(&self, position: Duration) -> Result<()> {
        if self.fail_seeks.load(Ordering::SeqCst) {
            return Err(PlaybackError::Adapter {
                code: 9,
                message: "seek refused".to_string(),
            });
        }
        let position_ms = position.as_millis() as u64;
        self.record(Call::Seek(position_ms));
        self.position_ms.store(position_ms, Ordering::SeqCst);
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        self.record(Call::Play);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.record(Call::Pause);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record(Call::Stop);
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        self.record(Call::Release);
        Ok(())
    }

    async fn set_playback_rate(&self, rate: f64) -> Result<()> {
        self.record(Call::Rate(rate));
        Ok(())
    }

    async fn get_position(&self) -> Result<Duration> {
        Ok(Duration::from_millis(self.position_ms.load(Ordering::SeqCst)))
    }

    async fn get_duration(&self) -> Result<Option<Duration>> {
        Ok(self.duration_ms.lock().map(Duration::from_millis))
    }
}

// ============================================================================
// Book fixtures
// ============================================================================

pub struct NoopProvider;

#[async_trait]
impl DownloadProvider for NoopProvider {
    async fn download(&self, request: DownloadRequest) -> BridgeResult<()> {
        std::fs::write(&request.output_path, b"audio")?;
        Ok(())
    }
}

/// Three items `t0..t2`, 10 s each unless `durations` is false.
pub fn manifest(durations: bool) -> Manifest {
    (0..3).fold(Manifest::new(BOOK_ID, "Book"), |m, i| {
        let item = ManifestItem::new(format!("t{}", i), format!("https://cdn.example.com/{}", i));
        m.with_item(if durations { item.duration_secs(10.0) } else { item })
    })
}

pub fn mark_downloaded(dir: &TempDir, indices: &[usize]) {
    for &index in indices {
        let path = item_output_path(dir.path(), BOOK_ID, index, &format!("t{}", index));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"audio").unwrap();
    }
}

pub fn player_config(dir: &TempDir, provider: Arc<dyn DownloadProvider>) -> PlayerConfig {
    PlayerConfig::builder()
        .download_dir(dir.path())
        .download_provider(provider)
        .build()
        .unwrap()
}

/// Polling slow enough that no progress update shows up during a test.
pub fn quiet_engine_config() -> EngineConfig {
    EngineConfig::default().with_progress_interval_ms(60_000)
}

pub struct Fixture {
    pub dir: TempDir,
    pub book: Arc<AudioBook>,
    pub adapter: Arc<RecordingAdapter>,
    pub engine: PlaybackEngine,
}

pub fn start(
    dir: TempDir,
    manifest: &Manifest,
    config: &PlayerConfig,
    adapter: Arc<RecordingAdapter>,
    engine_config: EngineConfig,
) -> Fixture {
    let book = Arc::new(AudioBook::open(manifest, config).unwrap());
    let engine = PlaybackEngine::start(
        Arc::clone(&book),
        adapter.clone(),
        config,
        engine_config,
    )
    .unwrap();
    Fixture {
        dir,
        book,
        adapter,
        engine,
    }
}

/// Engine over a fully downloaded three-item book.
pub fn downloaded_fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    mark_downloaded(&dir, &[0, 1, 2]);
    let config = player_config(&dir, Arc::new(NoopProvider));
    start(
        dir,
        &manifest(true),
        &config,
        RecordingAdapter::new(),
        quiet_engine_config(),
    )
}

// ============================================================================
// Event helpers
// ============================================================================

pub fn pos(index: usize, offset_ms: u64) -> EventPosition {
    EventPosition::new(format!("t{}", index), index, offset_ms)
}

pub async fn next_event(events: &mut EventStream) -> PlayerEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

/// Waits until `predicate` holds for the adapter's call log.
pub async fn wait_for_calls<F>(adapter: &RecordingAdapter, predicate: F)
where
    F: Fn(&[Call]) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !predicate(&adapter.calls()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for decoder calls");
}
