//! Workspace facade crate.
//!
//! Re-exports the player crates behind feature flags so host applications can
//! depend on `audiobook-workspace` alone:
//!
//! - always: [`bridge_traits`] (host capabilities) and [`core_runtime`]
//!   (configuration, logging, events)
//! - `book`: [`core_book`] (manifest, reading order, downloads)
//! - `playback` (default): [`core_playback`] (the playback engine)

pub use bridge_traits;
pub use core_runtime;

#[cfg(feature = "book")]
pub use core_book;

#[cfg(feature = "playback")]
pub use core_playback;
