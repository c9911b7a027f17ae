//! # Playback Engine Demo
//!
//! Opens a three-chapter book whose chapters are "downloaded" by a fake
//! provider, plays through it with a console decoder, and prints the events
//! and last-read bookmarks the engine produces.
//!
//! Run with: `cargo run --example playback_demo --package core-playback`

use async_trait::async_trait;
use bridge_traits::download::{DownloadProvider, DownloadRequest};
use bridge_traits::time::{LogLevel, SystemClock};
use core_book::{AudioBook, Manifest, ManifestItem};
use core_playback::{
    AdapterEvent, BookmarkObserver, EngineConfig, MediaSource, PlaybackAdapter, PlaybackEngine,
    PlayerPosition, Result,
};
use core_runtime::config::PlayerConfig;
use core_runtime::events::{PlaybackRate, PlayerEvent};
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Fake host capabilities
// ============================================================================

/// Writes a few bytes per chapter after a short delay.
struct FakeProvider;

#[async_trait]
impl DownloadProvider for FakeProvider {
    async fn download(&self, request: DownloadRequest) -> bridge_traits::error::Result<()> {
        for step in 1..=4 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            request.report_progress(step as f64 / 4.0);
        }
        std::fs::write(&request.output_path, b"not really audio")?;
        Ok(())
    }
}

/// Pretends to render audio in real time at the requested speed.
#[derive(Default)]
struct ConsoleAdapter {
    base_ms: AtomicU64,
    started: parking_lot::Mutex<Option<Instant>>,
    rate: parking_lot::Mutex<f64>,
}

impl ConsoleAdapter {
    fn position_ms(&self) -> u64 {
        let elapsed = self
            .started
            .lock()
            .map(|started| started.elapsed().as_millis() as f64 * *self.rate.lock())
            .unwrap_or(0.0);
        self.base_ms.load(Ordering::SeqCst) + elapsed as u64
    }
}

#[async_trait]
impl PlaybackAdapter for ConsoleAdapter {
    async fn load(&self, media: MediaSource) -> Result<()> {
        println!("   [decoder] load {} from {:?}", media.item_id, media.source);
        *self.started.lock() = None;
        self.base_ms.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn seek(&self, position: Duration) -> Result<()> {
        self.base_ms
            .store(position.as_millis() as u64, Ordering::SeqCst);
        if self.started.lock().is_some() {
            *self.started.lock() = Some(Instant::now());
        }
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        *self.started.lock() = Some(Instant::now());
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        let position = self.position_ms();
        self.base_ms.store(position, Ordering::SeqCst);
        *self.started.lock() = None;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        println!("   [decoder] stop");
        self.pause().await
    }

    async fn release(&self) -> Result<()> {
        println!("   [decoder] release");
        Ok(())
    }

    async fn set_playback_rate(&self, rate: f64) -> Result<()> {
        *self.rate.lock() = rate;
        Ok(())
    }

    async fn get_position(&self) -> Result<Duration> {
        Ok(Duration::from_millis(self.position_ms()))
    }

    async fn get_duration(&self) -> Result<Option<Duration>> {
        Ok(Some(Duration::from_secs(3)))
    }
}

// ============================================================================
// Demo
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(
        LoggingConfig::default()
            .with_format(LogFormat::Compact)
            .with_level(LogLevel::Info),
    )?;

    println!("Core Playback - Engine Demo\n");

    let dir = tempfile::tempdir()?;
    let config = PlayerConfig::builder()
        .download_dir(dir.path())
        .download_provider(Arc::new(FakeProvider))
        .clock(Arc::new(SystemClock))
        .build()?;

    // Durations are left out; the decoder fills them in.
    let manifest = (1..=3).fold(Manifest::new("urn:demo:book", "Demo Book"), |m, i| {
        m.with_item(
            ManifestItem::new(format!("chapter-{}", i), format!("https://cdn.example.com/{}.mp3", i))
                .title(format!("Chapter {}", i)),
        )
    });
    let book = Arc::new(AudioBook::open(&manifest, &config)?);

    let engine_config = EngineConfig::responsive();
    let adapter = Arc::new(ConsoleAdapter::default());
    let engine = PlaybackEngine::start(
        Arc::clone(&book),
        adapter.clone(),
        &config,
        engine_config.clone(),
    )?;

    let bookmarks = BookmarkObserver::new(config.clock.clone(), &engine_config).spawn(
        engine.events().skip_replay(),
        |bookmark| {
            if let PlayerEvent::CreateBookmark { position, .. } = bookmark {
                println!("   [bookmark] {} @ {} ms", position.item_id, position.offset_ms);
            }
        },
    );

    let mut events = engine
        .events()
        .filter(|event| !matches!(event, PlayerEvent::PlaybackProgressUpdate { .. }));
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event.position() {
                Some(position) => println!(
                    "{:<28} {} @ {} ms",
                    event.description(),
                    position.item_id,
                    position.offset_ms
                ),
                None => println!("{}", event.description()),
            }
        }
    });

    println!("1. Play before anything is downloaded");
    engine.play()?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("\n2. Download the whole book; playback starts once chapter 1 lands");
    book.whole_book_task().fetch();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    println!("\n3. Double speed, then skip 2 s back across the chapter boundary");
    engine.set_playback_rate(PlaybackRate::Double)?;
    engine.play_at_location(&PlayerPosition::new("chapter-2", 500))?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    engine.skip_playhead(-2_000)?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    println!("\n4. The decoder reports the end of the chapter");
    let decoder = engine.adapter_events();
    if let Some(position) = engine.current_position() {
        println!(
            "   at {} + {} ms, {}x",
            position.item_id,
            position.offset_ms,
            engine.playback_rate().speed()
        );
        decoder.send(AdapterEvent::TrackEnded {
            item_id: position.item_id.to_string(),
        });
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    println!("\n5. Pause and close");
    engine.pause()?;
    engine.close().await?;
    printer.await?;
    bookmarks.await?;

    println!(
        "\nLearned durations: {:?}",
        book.reading_order()
            .iter()
            .map(|item| item.duration_ms())
            .collect::<Vec<_>>()
    );
    Ok(())
}
