//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the audiobook player crates:
//! - Logging and tracing bootstrap
//! - Player configuration (capabilities and feature switches)
//! - The player event bus and its event types
//!
//! ## Overview
//!
//! `core-book` and `core-playback` depend on this crate for the conventions
//! they share: how they log, how the host hands them its capabilities, and how
//! state transitions are published to UI and bookmark collaborators.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
