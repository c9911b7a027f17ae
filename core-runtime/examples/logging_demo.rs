//! Logging system demonstration
//!
//! Run with:
//! ```bash
//! cargo run -p core-runtime --example logging_demo
//! cargo run -p core-runtime --example logging_demo -- json
//! cargo run -p core-runtime --example logging_demo -- compact "core_book=trace"
//! ```

use bridge_traits::time::{ConsoleLogger, LogLevel};
use core_runtime::events::{EventBus, EventPosition, PlayerEvent};
use core_runtime::logging::{init_logging, redact_if_sensitive, strip_path, LogFormat, LoggingConfig};
use std::env;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    let format = match args.get(1) {
        Some(name) => name.parse()?,
        None => LogFormat::default(),
    };

    let mut config = LoggingConfig::default()
        .with_format(format)
        .with_level(LogLevel::Trace)
        .with_logger_sink(Arc::new(ConsoleLogger {
            min_level: LogLevel::Warn,
        }));

    if let Some(filter) = args.get(2) {
        config = config.with_filter(filter.clone());
    }

    init_logging(config)?;
    info!(%format, "Logging initialized");

    simulate_download("urn:chapter:3", "https://cdn.example.com/ch3.mp3?sig=secret").await;

    let bus = EventBus::default();
    let mut stream = bus.subscribe();
    bus.emit(PlayerEvent::PlaybackStarted {
        position: EventPosition::new("urn:chapter:3", 3, 0),
    })?;
    let event = stream.recv().await?;
    info!(event = event.description(), severity = ?event.severity(), "event observed");

    Ok(())
}

#[instrument(skip(uri))]
async fn simulate_download(item: &str, uri: &str) {
    debug!(uri = %redact_if_sensitive("uri", uri), "starting transfer");
    let path = format!("/tmp/audiobooks/9781/3-{}.audio", item.replace(':', "_"));
    info!(file = %strip_path(&path), "transfer complete");
    warn!("this line is mirrored to the console sink as well");
}
