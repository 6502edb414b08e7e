//! Content-addressed store for historical paragraphs.
//!
//! Paragraphs pushed out of the active region are interned here once and
//! referenced by opaque tags, so a scroll-back full of repeated output
//! (build logs, progress spinners) costs one copy per distinct paragraph.
//!
//! The tag is derived from a 64-bit content hash; a colliding tag with
//! different content probes forward until a free or matching slot is found,
//! so equal tags always mean equal bytes.

use crate::cell::Cell;
use rustc_hash::{FxHashMap, FxHasher};
use std::hash::{Hash, Hasher};

/// Opaque handle for an interned paragraph.
pub type Tag = u64;

struct Entry {
    cells: Vec<Cell>,
    refs: u32,
}

/// The paragraph store.
#[derive(Default)]
pub struct Deduper {
    entries: FxHashMap<Tag, Entry>,
    /// Running totals, for the debug dump.
    total_refs: u64,
}

impl Deduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a paragraph, returning its tag. If an identical paragraph is
    /// already stored its refcount is bumped instead.
    pub fn store(&mut self, cells: Vec<Cell>) -> Tag {
        let mut tag = content_hash(&cells);

        loop {
            match self.entries.get_mut(&tag) {
                Some(entry) if entry.cells == cells => {
                    entry.refs += 1;
                    self.total_refs += 1;
                    return tag;
                }
                Some(_) => {
                    // Hash collision with different content: probe to the
                    // next tag. Equality above compared the full content.
                    tag = tag.wrapping_mul(6364136223846793005).wrapping_add(1);
                }
                None => {
                    self.entries.insert(tag, Entry { cells, refs: 1 });
                    self.total_refs += 1;
                    return tag;
                }
            }
        }
    }

    /// The cells of an interned paragraph.
    ///
    /// The tag must be live (stored and not fully released).
    pub fn lookup(&self, tag: Tag) -> &[Cell] {
        match self.entries.get(&tag) {
            Some(entry) => &entry.cells,
            None => {
                debug_assert!(false, "lookup of dead tag {:#x}", tag);
                &[]
            }
        }
    }

    /// Releases one reference; the entry is evicted when the last reference
    /// dies.
    pub fn release(&mut self, tag: Tag) {
        match self.entries.get_mut(&tag) {
            Some(entry) => {
                debug_assert!(entry.refs > 0);
                entry.refs -= 1;
                self.total_refs -= 1;
                if entry.refs == 0 {
                    self.entries.remove(&tag);
                }
            }
            None => debug_assert!(false, "release of dead tag {:#x}", tag),
        }
    }

    /// Number of distinct paragraphs stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current reference count of a tag; 0 if absent. Test support.
    pub fn refs(&self, tag: Tag) -> u32 {
        self.entries.get(&tag).map(|e| e.refs).unwrap_or(0)
    }

    /// Log a one-line summary of the store.
    pub fn dump(&self) {
        let bytes: usize = self
            .entries
            .values()
            .map(|e| e.cells.len() * std::mem::size_of::<Cell>())
            .sum();
        log::debug!(
            "deduper: {} paragraphs, {} refs, ~{} bytes",
            self.entries.len(),
            self.total_refs,
            bytes
        );
    }
}

fn content_hash(cells: &[Cell]) -> u64 {
    let mut hasher = FxHasher::default();
    for cell in cells {
        cell.hash(&mut hasher);
    }
    // Mix in the length so a paragraph of n blanks and one of n+1 blanks
    // that hash equally stay distinct.
    cells.len().hash(&mut hasher);
    hasher.finish()
}
