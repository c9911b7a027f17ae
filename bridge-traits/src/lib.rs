//! # Host Bridge Traits
//!
//! Capabilities the audiobook player core needs from its host, expressed as
//! traits so each platform can plug in its own implementation.
//!
//! ## Overview
//!
//! The core decides *when* to download a chapter and *what* to do with the
//! resulting status changes. Moving bytes over the network, attaching
//! credentials and writing logs to the platform's log facility are left to the
//! host, through the traits below.
//!
//! ## Traits
//!
//! ### Downloads
//! - [`DownloadProvider`](download::DownloadProvider) - Default transfer path for a reading-order item
//! - [`DownloadExtension`](download::DownloadExtension) - Hooks that may substitute the transfer
//!   (bearer tokens, alternate credential flows)
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with a descriptive error when a required capability is
//! missing, rather than discovering it on the first download:
//!
//! ```ignore
//! use core_runtime::config::PlayerConfig;
//!
//! let config = PlayerConfig::builder()
//!     .download_dir("/data/books")
//!     .build(); // Err(CapabilityMissing { capability: "DownloadProvider", .. })
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Providers should
//! map an aborted transfer to [`BridgeError::Cancelled`] so the core treats it
//! as a cancellation instead of a failure.
//!
//! ## Thread Safety
//!
//! On native targets every bridge trait requires `Send + Sync` (see
//! [`platform`]); on `wasm32` those bounds are lifted.

pub mod download;
pub mod error;
pub mod platform;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use download::{
    DownloadExtension, DownloadFuture, DownloadKind, DownloadLink, DownloadProvider,
    DownloadRequest, ProgressCallback,
};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
