//! # Manifest
//!
//! The already-parsed description of a book that the host hands to the core.
//! Parsing publication formats is the host's business; this module only
//! carries the fields the reading order and the download tasks need.
//!
//! ## Example
//!
//! ```rust
//! use core_book::manifest::Manifest;
//!
//! let manifest = Manifest::from_json(r#"{
//!     "id": "urn:isbn:9780000000001",
//!     "title": "Example",
//!     "reading_order": [
//!         { "id": "track-1", "href": "https://example.com/1.mp3", "duration_secs": 61.5 },
//!         { "id": "track-2", "href": "https://example.com/2.mp3" }
//!     ]
//! }"#).unwrap();
//!
//! assert_eq!(manifest.reading_order.len(), 2);
//! assert_eq!(manifest.reading_order[0].duration_ms(), Some(61_500));
//! ```

use bridge_traits::download::DownloadLink;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{BookError, Result};

/// Book-level manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Book identifier. Replacement manifests must carry the same one.
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub reading_order: Vec<ManifestItem>,
}

/// One entry of the manifest reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestItem {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub href: String,
    /// Declared duration, if the manifest knows it.
    #[serde(default)]
    pub duration_secs: Option<f64>,
    /// Whether `href` has a finite lifetime.
    #[serde(default)]
    pub expires: bool,
    #[serde(default)]
    pub part: Option<u32>,
    #[serde(default)]
    pub chapter: Option<u32>,
}

impl Manifest {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            reading_order: Vec::new(),
        }
    }

    pub fn with_item(mut self, item: ManifestItem) -> Self {
        self.reading_order.push(item);
        self
    }

    /// Deserialize a manifest from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| BookError::InvalidManifest(e.to_string()))
    }

    /// Checks the structural rules a reading order must satisfy: at least one
    /// item, and unique item identifiers.
    pub fn validate(&self) -> Result<()> {
        if self.reading_order.is_empty() {
            return Err(BookError::EmptyReadingOrder {
                book_id: self.id.clone(),
            });
        }

        let mut seen = HashSet::with_capacity(self.reading_order.len());
        for item in &self.reading_order {
            if !seen.insert(item.id.as_str()) {
                return Err(BookError::DuplicateItem {
                    item_id: item.id.clone(),
                });
            }
        }

        Ok(())
    }
}

impl ManifestItem {
    pub fn new(id: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            href: href.into(),
            duration_secs: None,
            expires: false,
            part: None,
            chapter: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn duration_secs(mut self, seconds: f64) -> Self {
        self.duration_secs = Some(seconds);
        self
    }

    pub fn expiring(mut self, expires: bool) -> Self {
        self.expires = expires;
        self
    }

    pub fn chapter_key(mut self, part: u32, chapter: u32) -> Self {
        self.part = Some(part);
        self.chapter = Some(chapter);
        self
    }

    /// Declared duration in milliseconds. Negative or non-finite values count
    /// as unknown.
    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_secs
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(|secs| (secs * 1000.0).round() as u64)
    }

    pub fn link(&self) -> DownloadLink {
        DownloadLink::new(self.href.clone()).expiring(self.expires)
    }
}
