//! # Player Configuration
//!
//! Collects the host capabilities and switches the player core needs before a
//! book can be opened.
//!
//! ## Overview
//!
//! The configuration uses a builder that fails fast: a missing download
//! provider is reported when the configuration is built, not when the first
//! chapter is fetched.
//!
//! ## Required
//!
//! - `download_dir` - Root directory for downloaded chapter files
//! - `DownloadProvider` - Default transport for chapter downloads
//!
//! ## Optional
//!
//! - `DownloadExtension`s - Tried in registration order before the provider
//! - `Clock` - Defaults to [`SystemClock`]
//! - `streaming_permitted` - Play items that are not downloaded from their
//!   remote link instead of waiting for the download
//! - `event_buffer_size` - Per-subscriber buffer of the event bus
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::PlayerConfig;
//! use std::sync::Arc;
//!
//! let config = PlayerConfig::builder()
//!     .download_dir("/data/audiobooks")
//!     .download_provider(Arc::new(MyProvider))
//!     .download_extension(Arc::new(BearerTokenExtension::new(token)))
//!     .streaming_permitted(true)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::download::{DownloadExtension, DownloadProvider};
use bridge_traits::time::{Clock, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;

/// Upper bound for the event bus buffer.
const MAX_EVENT_BUFFER_SIZE: usize = 10_000;

/// Configuration shared by the book model and the playback engine.
///
/// Use [`PlayerConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct PlayerConfig {
    /// Root directory for downloaded chapter files
    pub download_dir: PathBuf,

    /// Default download transport (required)
    pub download_provider: Arc<dyn DownloadProvider>,

    /// Extensions that may take over a download, in priority order
    pub download_extensions: Vec<Arc<dyn DownloadExtension>>,

    /// Time source
    pub clock: Arc<dyn Clock>,

    /// Whether items that are not downloaded may be streamed
    pub streaming_permitted: bool,

    /// Per-subscriber buffer of the event bus
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for PlayerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let extensions: Vec<&str> = self.download_extensions.iter().map(|e| e.name()).collect();
        f.debug_struct("PlayerConfig")
            .field("download_dir", &self.download_dir)
            .field("download_provider", &"DownloadProvider { ... }")
            .field("download_extensions", &extensions)
            .field("clock", &"Clock { ... }")
            .field("streaming_permitted", &self.streaming_permitted)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl PlayerConfig {
    /// Creates a new builder for constructing a `PlayerConfig`.
    pub fn builder() -> PlayerConfigBuilder {
        PlayerConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Download directory is not empty
    /// - Event buffer size is within `1..=10_000`
    /// - Extension names are not empty
    pub fn validate(&self) -> Result<()> {
        if self.download_dir.as_os_str().is_empty() {
            return Err(Error::Config(
                "Download directory cannot be empty".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer_size > MAX_EVENT_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "Event buffer size exceeds maximum of {}",
                MAX_EVENT_BUFFER_SIZE
            )));
        }

        if let Some(position) = self
            .download_extensions
            .iter()
            .position(|e| e.name().trim().is_empty())
        {
            return Err(Error::Config(format!(
                "Download extension #{} has an empty name",
                position
            )));
        }

        Ok(())
    }
}

fn download_provider_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "DownloadProvider".to_string(),
        message: "A DownloadProvider implementation is required to fetch chapters. \
                 Inject the platform's HTTP download adapter with .download_provider()."
            .to_string(),
    }
}

/// Builder for constructing [`PlayerConfig`] instances.
#[derive(Default)]
pub struct PlayerConfigBuilder {
    download_dir: Option<PathBuf>,
    download_provider: Option<Arc<dyn DownloadProvider>>,
    download_extensions: Vec<Arc<dyn DownloadExtension>>,
    clock: Option<Arc<dyn Clock>>,
    streaming_permitted: bool,
    event_buffer_size: Option<usize>,
}

impl PlayerConfigBuilder {
    /// Sets the root directory for downloaded chapters.
    pub fn download_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.download_dir = Some(path.into());
        self
    }

    /// Sets the default download transport.
    pub fn download_provider(mut self, provider: Arc<dyn DownloadProvider>) -> Self {
        self.download_provider = Some(provider);
        self
    }

    /// Appends a download extension. Extensions are consulted in the order
    /// they were added.
    pub fn download_extension(mut self, extension: Arc<dyn DownloadExtension>) -> Self {
        self.download_extensions.push(extension);
        self
    }

    /// Replaces the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Allows streaming items that have not been downloaded.
    pub fn streaming_permitted(mut self, permitted: bool) -> Self {
        self.streaming_permitted = permitted;
        self
    }

    /// Sets the per-subscriber event buffer.
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the download directory is missing or a value is out of range
    /// - [`Error::CapabilityMissing`] if no download provider was injected
    pub fn build(self) -> Result<PlayerConfig> {
        let download_dir = self.download_dir.ok_or_else(|| {
            Error::Config(
                "Download directory is required. Use .download_dir() to set it.".to_string(),
            )
        })?;

        let download_provider = self
            .download_provider
            .ok_or_else(download_provider_missing_error)?;

        let config = PlayerConfig {
            download_dir,
            download_provider,
            download_extensions: self.download_extensions,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            streaming_permitted: self.streaming_permitted,
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::download::{DownloadFuture, DownloadRequest};
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::time::ManualClock;

    struct MockProvider;

    #[async_trait]
    impl DownloadProvider for MockProvider {
        async fn download(&self, _request: DownloadRequest) -> BridgeResult<()> {
            Ok(())
        }
    }

    struct NamedExtension(&'static str);

    impl DownloadExtension for NamedExtension {
        fn name(&self) -> &str {
            self.0
        }

        fn on_download_link(
            &self,
            _provider: Arc<dyn DownloadProvider>,
            _request: &DownloadRequest,
        ) -> Option<DownloadFuture> {
            None
        }
    }

    fn base() -> PlayerConfigBuilder {
        PlayerConfig::builder()
            .download_dir("/tmp/audiobooks")
            .download_provider(Arc::new(MockProvider))
    }

    #[test]
    fn test_builder_defaults() {
        let config = base().build().unwrap();

        assert_eq!(config.download_dir, PathBuf::from("/tmp/audiobooks"));
        assert!(config.download_extensions.is_empty());
        assert!(!config.streaming_permitted);
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
    }

    #[test]
    fn test_builder_with_all_options() {
        let clock = Arc::new(ManualClock::at_epoch());
        let config = base()
            .download_extension(Arc::new(NamedExtension("bearer")))
            .download_extension(Arc::new(NamedExtension("feedbooks")))
            .clock(clock)
            .streaming_permitted(true)
            .event_buffer_size(32)
            .build()
            .unwrap();

        let names: Vec<&str> = config.download_extensions.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["bearer", "feedbooks"]);
        assert_eq!(config.clock.unix_timestamp_millis(), 0);
        assert!(config.streaming_permitted);
        assert_eq!(config.event_buffer_size, 32);
    }

    #[test]
    fn test_missing_download_dir() {
        let result = PlayerConfig::builder()
            .download_provider(Arc::new(MockProvider))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_provider_is_capability_error() {
        let result = PlayerConfig::builder().download_dir("/tmp/x").build();
        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "DownloadProvider")
            }
            other => panic!("expected CapabilityMissing, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(base().event_buffer_size(0).build().is_err());
        assert!(base().event_buffer_size(20_000).build().is_err());
        assert!(base()
            .download_extension(Arc::new(NamedExtension("  ")))
            .build()
            .is_err());
        assert!(PlayerConfig::builder()
            .download_dir("")
            .download_provider(Arc::new(MockProvider))
            .build()
            .is_err());
    }

    #[test]
    fn test_debug_hides_capabilities() {
        let config = base()
            .download_extension(Arc::new(NamedExtension("bearer")))
            .build()
            .unwrap();
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("DownloadProvider { ... }"));
        assert!(rendered.contains("bearer"));
    }
}
