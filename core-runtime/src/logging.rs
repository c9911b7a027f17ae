//! # Logging
//!
//! One `tracing` subscriber for every player crate. It writes human or
//! machine readable output to stdout and, when the host asks for it, mirrors
//! each event into a [`LoggerSink`] so the host's own log pipeline sees
//! engine and download activity next to its UI logs.
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//! use bridge_traits::time::{ConsoleLogger, LogLevel};
//! use std::sync::Arc;
//!
//! init_logging(
//!     LoggingConfig::default()
//!         .with_format("compact".parse()?)
//!         .with_level(LogLevel::Debug)
//!         .with_logger_sink(Arc::new(ConsoleLogger::default())),
//! )?;
//! tracing::info!(target: "core_playback", "engine started");
//! ```
//!
//! Signed download links are the main secret that passes through the
//! player. Call sites wrap them in [`redact_if_sensitive`]; the sink layer
//! applies the same masking to every field it forwards unless redaction is
//! switched off.

use crate::error::{Error, Result};

use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Crates whose verbosity follows [`LoggingConfig::level`].
const PLAYER_CRATES: [&str; 5] = [
    "audiobook_workspace",
    "bridge_traits",
    "core_runtime",
    "core_book",
    "core_playback",
];

/// Directive applied to every crate outside the player.
const DEPENDENCY_LEVEL: &str = "warn";

const MASK: &str = "[REDACTED]";

// ============================================================================
// Configuration
// ============================================================================

/// Shape of the stdout output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, colored, with span enter and exit lines
    Pretty,
    /// Flattened JSON, one object per line
    Json,
    /// One line per event
    Compact,
}

impl Default for LogFormat {
    /// Pretty while developing, JSON in release builds.
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            other => Err(Error::Config(format!("unknown log format '{}'", other))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
            Self::Compact => "compact",
        })
    }
}

/// Settings for [`init_logging`]. Built with the `with_*` methods.
#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Verbosity of the player crates; dependencies stay at `warn`
    pub level: LogLevel,
    /// Raw `EnvFilter` directives. Replaces the level-derived filter entirely.
    pub filter: Option<String>,
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    /// Mask credentials before entries reach the sink
    pub redact_pii: bool,
    pub enable_spans: bool,
    pub display_target: bool,
    pub display_thread_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            logger_sink: None,
            redact_pii: true,
            enable_spans: true,
            display_target: true,
            display_thread_info: false,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("filter", &self.filter)
            .field("has_sink", &self.logger_sink.is_some())
            .field("redact_pii", &self.redact_pii)
            .field("enable_spans", &self.enable_spans)
            .finish_non_exhaustive()
    }
}

impl LoggingConfig {
    pub fn with_format(self, format: LogFormat) -> Self {
        Self { format, ..self }
    }

    pub fn with_level(self, level: LogLevel) -> Self {
        Self { level, ..self }
    }

    pub fn with_pii_redaction(self, redact_pii: bool) -> Self {
        Self { redact_pii, ..self }
    }

    pub fn with_filter(self, directives: impl Into<String>) -> Self {
        Self {
            filter: Some(directives.into()),
            ..self
        }
    }

    pub fn with_logger_sink(self, sink: Arc<dyn LoggerSink>) -> Self {
        Self {
            logger_sink: Some(sink),
            ..self
        }
    }

    pub fn with_spans(self, enable_spans: bool) -> Self {
        Self {
            enable_spans,
            ..self
        }
    }

    pub fn with_target(self, display_target: bool) -> Self {
        Self {
            display_target,
            ..self
        }
    }

    pub fn with_thread_info(self, display_thread_info: bool) -> Self {
        Self {
            display_thread_info,
            ..self
        }
    }

    /// The filter directives this configuration resolves to.
    fn directives(&self) -> String {
        if let Some(custom) = &self.filter {
            return custom.clone();
        }
        let level = self.level.as_str();
        std::iter::once(DEPENDENCY_LEVEL.to_string())
            .chain(PLAYER_CRATES.iter().map(|krate| format!("{}={}", krate, level)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

// ============================================================================
// Subscriber
// ============================================================================

/// Installs the global subscriber.
///
/// # Errors
///
/// [`Error::Config`] when the filter directives do not parse, or when a
/// global subscriber already exists (the function is meant to run once at
/// startup).
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.directives())
        .map_err(|e| Error::Config(format!("bad log filter: {}", e)))?;
    let sink_layer = config
        .logger_sink
        .clone()
        .map(|sink| LoggerSinkLayer::new(sink, config.redact_pii));

    tracing_subscriber::registry()
        .with(stdout_layer(&config))
        .with(sink_layer)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {}", e)))
}

fn stdout_layer(config: &LoggingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let threads = config.display_thread_info;
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_target(config.display_target)
        .with_thread_ids(threads)
        .with_thread_names(threads);

    match config.format {
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Json => layer
            .json()
            .flatten_event(true)
            .with_current_span(config.enable_spans)
            .with_span_list(config.enable_spans)
            .boxed(),
        LogFormat::Pretty => {
            let span_events = match config.enable_spans {
                true => FmtSpan::ACTIVE,
                false => FmtSpan::NONE,
            };
            layer.pretty().with_span_events(span_events).boxed()
        }
    }
}

// ============================================================================
// Host sink
// ============================================================================

/// Mirrors events into a host [`LoggerSink`].
///
/// Entries below the sink's `min_level` are skipped before any formatting
/// work. Delivery is spawned onto the current Tokio runtime when there is one
/// and done inline otherwise.
pub struct LoggerSinkLayer {
    sink: Arc<dyn LoggerSink>,
    redact: bool,
}

impl LoggerSinkLayer {
    pub fn new(sink: Arc<dyn LoggerSink>, redact: bool) -> Self {
        Self { sink, redact }
    }

    fn entry_for<S>(&self, event: &Event<'_>, ctx: &Context<'_, S>, level: LogLevel) -> LogEntry
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let meta = event.metadata();
        let mut collected = CollectedFields::default();
        event.record(&mut collected);

        let message = collected.message.unwrap_or_else(|| meta.name().to_owned());
        let mut entry = collected.fields.into_iter().fold(
            LogEntry::new(level, meta.target(), message),
            |entry, (name, value)| {
                let value = match self.redact {
                    true => redact_if_sensitive(&name, &value),
                    false => value,
                };
                entry.with_field(name, value)
            },
        );
        entry.span_id = ctx.event_span(event).map(|span| span.name().to_owned());
        entry
    }
}

impl<S> Layer<S> for LoggerSinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let level = sink_level(event.metadata().level());
        if level < self.sink.min_level() {
            return;
        }
        let entry = self.entry_for(event, &ctx, level);
        let sink = Arc::clone(&self.sink);
        let deliver = async move {
            if let Err(err) = sink.log(entry).await {
                // Logging through tracing here would recurse into this layer.
                eprintln!("logger sink rejected entry: {}", err);
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => drop(runtime.spawn(deliver)),
            Err(_) => futures::executor::block_on(deliver),
        }
    }
}

fn sink_level(level: &Level) -> LogLevel {
    match *level {
        Level::ERROR => LogLevel::Error,
        Level::WARN => LogLevel::Warn,
        Level::INFO => LogLevel::Info,
        Level::DEBUG => LogLevel::Debug,
        Level::TRACE => LogLevel::Trace,
    }
}

/// Field values of one event, stringified. Numbers, booleans and errors
/// reach `record_debug` through the trait's default methods.
#[derive(Default)]
struct CollectedFields {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl CollectedFields {
    fn push(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            name => self.fields.push((name.to_owned(), value)),
        }
    }
}

impl Visit for CollectedFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format!("{:?}", value));
    }
}

// ============================================================================
// Redaction helpers
// ============================================================================

/// Masks `value` when `field_name` suggests it is sensitive.
///
/// - Credential-like names (`token`, `password`, `authorization`, ...) are
///   replaced outright.
/// - Link-like names (`uri`, `url`, `href`, `link`) keep scheme, host and
///   path but lose the query and fragment, where signed CDN links keep
///   their signatures.
/// - Any other value that looks like an e-mail address keeps only its first
///   character.
///
/// ```ignore
/// tracing::debug!(uri = %redact_if_sensitive("uri", &request.link.href), "fetching");
/// ```
pub fn redact_if_sensitive(field_name: &str, value: &str) -> String {
    const CREDENTIALS: [&str; 7] = [
        "token",
        "password",
        "secret",
        "api_key",
        "authorization",
        "bearer",
        "credential",
    ];
    const LINKS: [&str; 4] = ["uri", "url", "href", "link"];

    let name = field_name.to_ascii_lowercase();
    let named = |needles: &[&str]| needles.iter().any(|needle| name.contains(needle));

    if named(&CREDENTIALS) {
        return MASK.to_owned();
    }
    if named(&LINKS) {
        return redact_query(value);
    }
    match value.split_once('@') {
        Some((local, domain)) if domain.contains('.') && !value.contains("://") => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@{}", first, MASK)
        }
        _ => value.to_owned(),
    }
}

/// Drops the query string and fragment of a link.
pub fn redact_query(uri: &str) -> String {
    match uri.split_once(['?', '#']) {
        Some((base, _)) => format!("{}?{}", base, MASK),
        None => uri.to_owned(),
    }
}

/// The file name of a local path. Download paths embed the device's storage
/// layout, which does not belong in shared logs.
///
/// ```ignore
/// tracing::info!(file = %strip_path("/data/user/0/org.app/files/books/1234/0-ch.audio"), "done");
/// // file=0-ch.audio
/// ```
pub fn strip_path(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as SinkResult;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CapturingSink {
        captured: Mutex<Vec<LogEntry>>,
    }

    #[async_trait]
    impl LoggerSink for CapturingSink {
        async fn log(&self, entry: LogEntry) -> SinkResult<()> {
            self.captured.lock().push(entry);
            Ok(())
        }

        fn min_level(&self) -> LogLevel {
            LogLevel::Debug
        }
    }

    fn with_sink<F: FnOnce()>(redact: bool, emit: F) -> Vec<LogEntry> {
        let sink = Arc::new(CapturingSink::default());
        let subscriber = tracing_subscriber::registry()
            .with(LoggerSinkLayer::new(sink.clone() as Arc<dyn LoggerSink>, redact));
        tracing::subscriber::with_default(subscriber, emit);
        let captured = std::mem::take(&mut *sink.captured.lock());
        captured
    }

    #[test]
    fn test_builder_sets_every_option() {
        let config = LoggingConfig::default()
            .with_format(LogFormat::Json)
            .with_level(LogLevel::Trace)
            .with_pii_redaction(false)
            .with_filter("core_book=debug")
            .with_spans(false)
            .with_target(false)
            .with_thread_info(true);

        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, LogLevel::Trace);
        assert_eq!(config.filter.as_deref(), Some("core_book=debug"));
        assert!(!config.redact_pii);
        assert!(!config.enable_spans);
        assert!(!config.display_target);
        assert!(config.display_thread_info);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" compact ".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Pretty.to_string(), "pretty");
        assert_eq!(
            LogFormat::default(),
            if cfg!(debug_assertions) {
                LogFormat::Pretty
            } else {
                LogFormat::Json
            }
        );
    }

    #[test]
    fn test_level_drives_player_crates_only() {
        let directives = LoggingConfig::default()
            .with_level(LogLevel::Debug)
            .directives();
        assert!(directives.starts_with("warn,"));
        for krate in PLAYER_CRATES {
            assert!(directives.contains(&format!("{}=debug", krate)));
        }
        assert!(EnvFilter::try_new(directives).is_ok());
    }

    #[test]
    fn test_custom_filter_replaces_defaults() {
        let directives = LoggingConfig::default()
            .with_filter("core_playback=trace")
            .directives();
        assert_eq!(directives, "core_playback=trace");
    }

    #[test]
    fn test_sink_receives_redacted_entry() {
        let entries = with_sink(true, || {
            tracing::info!(
                target: "core_book",
                item = "urn:chapter:2",
                index = 2,
                uri = "https://cdn/2.mp3?token=abc",
                "download started"
            );
        });

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.target, "core_book");
        assert_eq!(entry.message, "download started");
        assert_eq!(entry.fields.get("item").map(String::as_str), Some("urn:chapter:2"));
        assert_eq!(entry.fields.get("index").map(String::as_str), Some("2"));
        assert_eq!(
            entry.fields.get("uri").map(String::as_str),
            Some("https://cdn/2.mp3?[REDACTED]")
        );
    }

    #[test]
    fn test_sink_threshold_and_spans() {
        let entries = with_sink(false, || {
            let span = tracing::info_span!("load");
            let _entered = span.enter();
            tracing::trace!("below the sink threshold");
            tracing::debug!(uri = "https://cdn/a.mp3?sig=1", "inside load");
        });

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].span_id.as_deref(), Some("load"));
        assert_eq!(
            entries[0].fields.get("uri").map(String::as_str),
            Some("https://cdn/a.mp3?sig=1")
        );
    }

    #[test]
    fn test_redaction_rules() {
        assert_eq!(redact_if_sensitive("access_token", "abc"), MASK);
        assert_eq!(redact_if_sensitive("Authorization", "Bearer x"), MASK);
        assert_eq!(
            redact_if_sensitive("href", "https://cdn.example.com/ch1.mp3?sig=abc&exp=1"),
            "https://cdn.example.com/ch1.mp3?[REDACTED]"
        );
        assert_eq!(
            redact_if_sensitive("url", "https://cdn.example.com/ch1.mp3"),
            "https://cdn.example.com/ch1.mp3"
        );
        assert_eq!(redact_if_sensitive("patron", "reader@example.com"), "r***@[REDACTED]");
        assert_eq!(redact_if_sensitive("item", "urn:chapter:3"), "urn:chapter:3");
    }

    #[test]
    fn test_strip_path_keeps_file_name() {
        assert_eq!(strip_path("/data/books/1234/0-intro.audio"), "0-intro.audio");
        assert_eq!(strip_path("C:\\Books\\1234\\0-intro.audio"), "0-intro.audio");
        assert_eq!(strip_path("0-intro.audio"), "0-intro.audio");
        assert_eq!(strip_path("/var/log/"), "");
    }
}
