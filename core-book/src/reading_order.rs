//! # Reading Order
//!
//! Ordered, index-linked list of the playable items of a book.
//!
//! ## Overview
//!
//! Items live in a single vector owned by [`ReadingOrder`]. Each item knows
//! its own position and the positions of its neighbours, so traversal is a
//! matter of indexing; there are no back-references between items.
//!
//! ```text
//!   [0] ⇄ [1] ⇄ [2] ⇄ … ⇄ [n-1]
//!    ^                      ^
//!  first()               last()
//! ```
//!
//! The structure itself is immutable once built. Three per-item cells are
//! not:
//! - `duration` may be filled in once, when the decoder first reports it
//! - the download link is swapped when a replacement manifest is applied
//! - the download status is written by the item's download task
//!
//! ## Offset translation
//!
//! [`ReadingOrder::translate`] resolves `(item, signed offset)` pairs whose
//! offset falls outside `[0, duration)` by walking neighbours and carrying the
//! remainder. It stops at the first item whose duration is unknown.

use bridge_traits::download::DownloadLink;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Index;
use std::sync::OnceLock;

use crate::error::Result;
use crate::manifest::Manifest;
use crate::status::DownloadStatus;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a reading-order item, as given by the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadingOrderId(String);

impl ReadingOrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReadingOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReadingOrderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ReadingOrderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for ReadingOrderId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Part/chapter address some manifests expose alongside item identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChapterKey {
    pub part: u32,
    pub chapter: u32,
}

impl ChapterKey {
    pub fn new(part: u32, chapter: u32) -> Self {
        Self { part, chapter }
    }
}

// ============================================================================
// Items
// ============================================================================

/// One playable unit of the book.
pub struct ReadingOrderItem {
    id: ReadingOrderId,
    index: usize,
    title: Option<String>,
    key: Option<ChapterKey>,
    previous: Option<usize>,
    next: Option<usize>,
    duration_ms: OnceLock<u64>,
    link: RwLock<DownloadLink>,
    status: Mutex<DownloadStatus>,
}

impl ReadingOrderItem {
    pub fn id(&self) -> &ReadingOrderId {
        &self.id
    }

    /// Zero-based position in the reading order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn key(&self) -> Option<ChapterKey> {
        self.key
    }

    pub fn next_index(&self) -> Option<usize> {
        self.next
    }

    pub fn previous_index(&self) -> Option<usize> {
        self.previous
    }

    pub fn is_first(&self) -> bool {
        self.previous.is_none()
    }

    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }

    /// Duration in milliseconds, if known.
    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms.get().copied()
    }

    /// Records the duration reported by the decoder.
    ///
    /// The first value wins; returns `false` if a duration was already known.
    pub fn set_duration_ms(&self, duration_ms: u64) -> bool {
        self.duration_ms.set(duration_ms).is_ok()
    }

    /// Current download link.
    pub fn link(&self) -> DownloadLink {
        self.link.read().clone()
    }

    pub(crate) fn replace_link(&self, link: DownloadLink) {
        *self.link.write() = link;
    }

    /// Snapshot of the download status.
    pub fn download_status(&self) -> DownloadStatus {
        self.status.lock().clone()
    }

    /// Lock guarding the status cell. Held across the status write and its
    /// broadcast so subscribers observe transitions in order.
    pub(crate) fn status_cell(&self) -> MutexGuard<'_, DownloadStatus> {
        self.status.lock()
    }
}

impl fmt::Debug for ReadingOrderItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadingOrderItem")
            .field("id", &self.id)
            .field("index", &self.index)
            .field("duration_ms", &self.duration_ms())
            .field("status", &self.status.lock().name())
            .finish()
    }
}

// ============================================================================
// Offset translation
// ============================================================================

/// Result of [`ReadingOrder::translate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetTranslation {
    /// The offset falls inside `[0, duration)` of `index`.
    Resolved { index: usize, offset_ms: u64 },
    /// Walked back past the first item; clamped to its start.
    ClampedToStart { index: usize },
    /// Walked forward past the last item; clamped to its end.
    ClampedToEnd { index: usize, offset_ms: u64 },
    /// Hit an item whose duration is unknown. `offset_ms` is what remained
    /// relative to `index` at that point.
    Unresolved { index: usize, offset_ms: i64 },
}

impl OffsetTranslation {
    /// Target item of the translation.
    pub fn index(&self) -> usize {
        match self {
            OffsetTranslation::Resolved { index, .. }
            | OffsetTranslation::ClampedToStart { index }
            | OffsetTranslation::ClampedToEnd { index, .. }
            | OffsetTranslation::Unresolved { index, .. } => *index,
        }
    }

    /// Offset within the target item, or `None` if unresolved.
    pub fn offset_ms(&self) -> Option<u64> {
        match self {
            OffsetTranslation::Resolved { offset_ms, .. }
            | OffsetTranslation::ClampedToEnd { offset_ms, .. } => Some(*offset_ms),
            OffsetTranslation::ClampedToStart { .. } => Some(0),
            OffsetTranslation::Unresolved { .. } => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, OffsetTranslation::Unresolved { .. })
    }
}

// ============================================================================
// Reading order
// ============================================================================

/// All items of a book, in manifest order.
pub struct ReadingOrder {
    items: Vec<ReadingOrderItem>,
    by_id: HashMap<ReadingOrderId, usize>,
    by_key: BTreeMap<ChapterKey, usize>,
}

impl ReadingOrder {
    /// Builds the reading order from a validated manifest.
    ///
    /// # Errors
    ///
    /// Fails if the manifest has no items or repeats an item identifier.
    pub fn from_manifest(manifest: &Manifest) -> Result<Self> {
        manifest.validate()?;

        let count = manifest.reading_order.len();
        let mut items = Vec::with_capacity(count);
        let mut by_id = HashMap::with_capacity(count);
        let mut by_key = BTreeMap::new();

        for (index, entry) in manifest.reading_order.iter().enumerate() {
            let id = ReadingOrderId::new(entry.id.clone());
            let key = match (entry.part, entry.chapter) {
                (Some(part), Some(chapter)) => Some(ChapterKey::new(part, chapter)),
                _ => None,
            };

            let duration_ms = OnceLock::new();
            if let Some(duration) = entry.duration_ms() {
                let _ = duration_ms.set(duration);
            }

            if let Some(key) = key {
                by_key.entry(key).or_insert(index);
            }
            by_id.insert(id.clone(), index);

            items.push(ReadingOrderItem {
                id,
                index,
                title: entry.title.clone(),
                key,
                previous: index.checked_sub(1),
                next: (index + 1 < count).then_some(index + 1),
                duration_ms,
                link: RwLock::new(entry.link()),
                status: Mutex::new(DownloadStatus::NotDownloaded),
            });
        }

        Ok(Self {
            items,
            by_id,
            by_key,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Always `false` for a constructed reading order.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn first(&self) -> &ReadingOrderItem {
        &self.items[0]
    }

    pub fn last(&self) -> &ReadingOrderItem {
        &self.items[self.items.len() - 1]
    }

    pub fn get(&self, index: usize) -> Option<&ReadingOrderItem> {
        self.items.get(index)
    }

    pub fn by_id(&self, id: &str) -> Option<&ReadingOrderItem> {
        self.by_id.get(id).map(|&index| &self.items[index])
    }

    pub fn by_key(&self, key: ChapterKey) -> Option<&ReadingOrderItem> {
        self.by_key.get(&key).map(|&index| &self.items[index])
    }

    pub fn next(&self, item: &ReadingOrderItem) -> Option<&ReadingOrderItem> {
        item.next.map(|index| &self.items[index])
    }

    pub fn previous(&self, item: &ReadingOrderItem) -> Option<&ReadingOrderItem> {
        item.previous.map(|index| &self.items[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReadingOrderItem> {
        self.items.iter()
    }

    /// Sum of all durations, if every one is known.
    pub fn total_duration_ms(&self) -> Option<u64> {
        self.items.iter().map(|item| item.duration_ms()).sum()
    }

    /// Resolves a signed offset relative to item `start` into an offset
    /// inside some item.
    ///
    /// Offsets inside `[0, duration)` of `start` come back unchanged. Offsets
    /// past the end carry over into following items; negative offsets borrow
    /// from preceding ones. The walk clamps at either end of the book and
    /// stops at the first item whose duration it needs but does not know.
    ///
    /// Cost is linear in the number of items crossed.
    pub fn translate(&self, start: usize, offset_ms: i64) -> OffsetTranslation {
        let mut index = start;
        let mut offset = offset_ms;

        loop {
            let Some(item) = self.items.get(index) else {
                return OffsetTranslation::Unresolved {
                    index,
                    offset_ms: offset,
                };
            };

            if offset < 0 {
                let Some(previous) = item.previous else {
                    return OffsetTranslation::ClampedToStart { index };
                };
                match self.items[previous].duration_ms() {
                    Some(duration) => {
                        offset += duration as i64;
                        index = previous;
                    }
                    None => {
                        return OffsetTranslation::Unresolved {
                            index: previous,
                            offset_ms: offset,
                        }
                    }
                }
                continue;
            }

            let Some(duration) = item.duration_ms() else {
                if offset == 0 {
                    return OffsetTranslation::Resolved {
                        index,
                        offset_ms: 0,
                    };
                }
                return OffsetTranslation::Unresolved {
                    index,
                    offset_ms: offset,
                };
            };

            if (offset as u64) < duration {
                return OffsetTranslation::Resolved {
                    index,
                    offset_ms: offset as u64,
                };
            }

            match item.next {
                Some(next) => {
                    offset -= duration as i64;
                    index = next;
                }
                None => {
                    return OffsetTranslation::ClampedToEnd {
                        index,
                        offset_ms: duration,
                    }
                }
            }
        }
    }
}

impl Index<usize> for ReadingOrder {
    type Output = ReadingOrderItem;

    fn index(&self, index: usize) -> &ReadingOrderItem {
        &self.items[index]
    }
}

impl fmt::Debug for ReadingOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}
