//! # Playback Engine
//!
//! Drives a host audio decoder through an audiobook's reading order.
//!
//! ## Overview
//!
//! This crate handles:
//! - The engine state machine (play, pause, skips, seeks across items)
//! - Reacting to download status changes of the items it plays or waits for
//! - Progress polling and end-of-item detection
//! - Publishing player events, and deriving last-read bookmarks from them
//!
//! Decoding and rendering are delegated to a [`PlaybackAdapter`] supplied by
//! the host.

pub mod bookmark;
pub mod config;
pub mod engine;
pub mod error;
pub mod machine;
pub mod state;
pub mod traits;

pub use bookmark::BookmarkObserver;
pub use config::EngineConfig;
pub use engine::{AdapterEventSink, PlaybackEngine};
pub use error::{PlaybackError, Result};
pub use machine::{Command, Effect, EngineMachine};
pub use state::{EngineSnapshot, EngineState, PlayerPosition};
pub use traits::{AdapterEvent, AudioSource, MediaSource, PlaybackAdapter};
