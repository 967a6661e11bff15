//! The jukebox play queue.
//!
//! An ordered list of [`Item`]s plus a cursor pointing at the current one.
//! Everything goes through one `RwLock`; readers get clones, never references
//! into the list.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::RwLock;

/// A single entry in the playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    id: i64,
    path: PathBuf,
    seek: Duration,
}

impl Item {
    /// Create an item. The id is the caller's and need not be unique.
    pub fn new(id: i64, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
            seek: Duration::ZERO,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset playback of this item starts from.
    pub fn seek(&self) -> Duration {
        self.seek
    }

    /// Display name: the file stem, or the whole path if there is none.
    pub fn display_title(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Playlist errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaylistError {
    #[error("Playlist index {index} out of bounds (len {len})")]
    OutOfBounds { index: usize, len: usize },
}

#[derive(Debug, Default)]
struct Inner {
    items: Vec<Item>,
    /// `None` = nothing targeted yet; otherwise always a valid index
    cursor: Option<usize>,
}

impl Inner {
    fn check(&self, index: usize) -> Result<(), PlaylistError> {
        if index < self.items.len() {
            Ok(())
        } else {
            Err(PlaylistError::OutOfBounds {
                index,
                len: self.items.len(),
            })
        }
    }

    fn set_cursor(&mut self, index: usize) -> Result<Item, PlaylistError> {
        self.check(index)?;
        self.cursor = Some(index);
        Ok(self.items[index].clone())
    }

    fn next_index(&self) -> usize {
        self.cursor.map_or(0, |c| c + 1)
    }
}

/// Thread-safe playlist with a cursor.
#[derive(Debug, Default)]
pub struct Playlist {
    inner: RwLock<Inner>,
}

impl Playlist {
    /// Create an empty playlist with no current item.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all items.
    pub fn items(&self) -> Vec<Item> {
        self.inner.read().items.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().items.is_empty()
    }

    /// The current item and its index, if any.
    pub fn peek(&self) -> Option<(usize, Item)> {
        let inner = self.inner.read();
        inner.cursor.map(|i| (i, inner.items[i].clone()))
    }

    /// Move to the next item (the first one if nothing is current yet).
    ///
    /// Fails without moving when there is no next item.
    pub fn advance(&self) -> Result<Item, PlaylistError> {
        let mut inner = self.inner.write();
        let next = inner.next_index();
        inner.set_cursor(next)
    }

    /// Move to the first item, but only if nothing is current.
    ///
    /// Returns `Ok(None)` when an item is already current.
    pub fn advance_if_unset(&self) -> Result<Option<Item>, PlaylistError> {
        let mut inner = self.inner.write();
        if inner.cursor.is_some() {
            return Ok(None);
        }
        inner.set_cursor(0).map(Some)
    }

    /// Make `index` current.
    pub fn set_target(&self, index: usize) -> Result<Item, PlaylistError> {
        self.inner.write().set_cursor(index)
    }

    /// Make `index` current and have it start from `seek`.
    pub fn set_target_with_seek(&self, index: usize, seek: Duration) -> Result<Item, PlaylistError> {
        let mut inner = self.inner.write();
        inner.check(index)?;
        inner.items[index].seek = seek;
        inner.set_cursor(index)
    }

    /// Remove the item at `index`, shifting the tail down.
    ///
    /// The cursor keeps its numeric value. If that no longer points into the
    /// list it becomes unset.
    pub fn remove_at(&self, index: usize) -> Result<Item, PlaylistError> {
        let mut inner = self.inner.write();
        inner.check(index)?;
        let removed = inner.items.remove(index);
        if inner.cursor.is_some_and(|c| c >= inner.items.len()) {
            inner.cursor = None;
        }
        Ok(removed)
    }

    /// Replace every item and unset the cursor.
    pub fn replace_all(&self, items: Vec<Item>) {
        let mut inner = self.inner.write();
        inner.items = items;
        inner.cursor = None;
    }

    /// Add items at the end. The cursor is untouched.
    pub fn append(&self, items: Vec<Item>) {
        self.inner.write().items.extend(items);
    }

    /// Empty the playlist.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.items.clear();
        inner.cursor = None;
    }
}
