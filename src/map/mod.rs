//! Element map: ordered links from document nodes to offsets in both views

mod entry;

pub use entry::{BrailleSpan, EntryKind, MapEntry, PageIndicator, View};

use serde::Serialize;

use crate::document::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("entry {index} would overlap its predecessor in the {view:?} view")]
    Overlap { index: usize, view: View },

    #[error("entry index {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },

    #[error("entry {index} has no braille span")]
    MissingBraille { index: usize },
}

/// Ordered, index-addressable entries plus the entry nearest the caret.
///
/// Entries are kept in document order and neither view's ranges overlap.
/// Lookups on an empty map return nothing; callers re-resolve nodes after
/// every rebuild because old handles may be stale.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ElementMap {
    entries: Vec<MapEntry>,
    current: usize,
}

impl ElementMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from entries already in document order
    pub fn from_entries(entries: Vec<MapEntry>) -> Result<Self, MapError> {
        let mut map = Self::new();
        for entry in entries {
            map.push(entry)?;
        }
        Ok(map)
    }

    pub fn push(&mut self, entry: MapEntry) -> Result<(), MapError> {
        let index = self.entries.len();
        self.check_fits(index, &entry, None)?;
        self.entries.push(entry);
        Ok(())
    }

    pub fn insert(&mut self, index: usize, entry: MapEntry) -> Result<(), MapError> {
        if index > self.entries.len() {
            return Err(MapError::OutOfRange {
                index,
                len: self.entries.len(),
            });
        }
        self.check_fits(index, &entry, self.entries.get(index))?;
        self.entries.insert(index, entry);
        if self.entries.len() > 1 && index <= self.current {
            self.current += 1;
        }
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Option<MapEntry> {
        if index >= self.entries.len() {
            return None;
        }
        let removed = self.entries.remove(index);
        if index < self.current {
            self.current -= 1;
        }
        self.current = self.current.min(self.entries.len().saturating_sub(1));
        Some(removed)
    }

    fn check_fits(
        &self,
        index: usize,
        entry: &MapEntry,
        next: Option<&MapEntry>,
    ) -> Result<(), MapError> {
        if entry.braille.is_empty() {
            return Err(MapError::MissingBraille { index });
        }
        for view in [View::Source, View::Braille] {
            let range = entry.range(view);
            let after_prev = index
                .checked_sub(1)
                .and_then(|i| self.entries.get(i))
                .is_none_or(|prev| prev.range(view).end <= range.start);
            let before_next = next.is_none_or(|next| range.end <= next.range(view).start);
            if range.start > range.end || !after_prev || !before_next {
                return Err(MapError::Overlap { index, view });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&MapEntry> {
        self.entries.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut MapEntry> {
        self.entries.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MapEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn current(&self) -> Option<usize> {
        (!self.entries.is_empty()).then_some(self.current)
    }

    #[must_use]
    pub fn current_entry(&self) -> Option<&MapEntry> {
        self.entries.get(self.current)
    }

    /// Move the current index, clamped to the map
    pub fn set_current(&mut self, index: usize) {
        self.current = index.min(self.entries.len().saturating_sub(1));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current = 0;
    }

    /// Entry containing or most closely preceding a source offset
    #[must_use]
    pub fn find_closest(&self, offset: usize, prefer_node: bool) -> Option<&MapEntry> {
        self.find_closest_index(View::Source, offset, prefer_node)
            .and_then(|i| self.entries.get(i))
    }

    /// Entry containing or most closely preceding a braille offset
    #[must_use]
    pub fn find_closest_braille(&self, offset: usize, prefer_node: bool) -> Option<&MapEntry> {
        self.find_closest_index(View::Braille, offset, prefer_node)
            .and_then(|i| self.entries.get(i))
    }

    /// Binary search over start offsets. When `prefer_node` is set and
    /// several entries touch `offset`, an entry backed by a node wins over
    /// whitespace.
    #[must_use]
    pub fn find_closest_index(&self, view: View, offset: usize, prefer_node: bool) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let after = self
            .entries
            .partition_point(|e| e.range(view).start <= offset);
        if after == 0 {
            return Some(0);
        }
        let best = after - 1;
        if !prefer_node || self.entries[best].has_node() {
            return Some(best);
        }

        for i in (0..best).rev() {
            let entry = &self.entries[i];
            if entry.range(view).end < offset {
                break;
            }
            if entry.has_node() {
                return Some(i);
            }
        }
        Some(best)
    }

    /// Forward scan for a node starting at a hint index
    #[must_use]
    pub fn find_node_index(&self, node: NodeId, from: usize) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, e)| e.node == Some(node))
            .map(|(i, _)| i)
    }

    /// Shift every entry from `from` onwards by `delta` in one view.
    ///
    /// Fails without changing anything if the shift would push an entry
    /// before the end of its predecessor.
    pub fn adjust_offsets(&mut self, view: View, from: usize, delta: isize) -> Result<(), MapError> {
        let Some(first) = self.entries.get(from) else {
            return Ok(());
        };
        let new_start = first.range(view).start.checked_add_signed(delta);
        let floor = from
            .checked_sub(1)
            .map_or(0, |i| self.entries[i].range(view).end);
        match new_start {
            Some(start) if start >= floor => {}
            _ => return Err(MapError::Overlap { index: from, view }),
        }
        for entry in &mut self.entries[from..] {
            entry.shift(view, delta);
        }
        Ok(())
    }

    /// Give one entry a new length in a view and move its successors.
    /// Braille resizing stretches the entry's last span.
    pub fn resize_entry(&mut self, index: usize, view: View, new_len: usize) -> Result<(), MapError> {
        let len = self.entries.len();
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(MapError::OutOfRange { index, len })?;
        let old_len = entry.len(view);
        let start = entry.range(view).start;
        match view {
            View::Source => entry.end = start + new_len,
            View::Braille => {
                let last = entry
                    .braille
                    .last_mut()
                    .ok_or(MapError::MissingBraille { index })?;
                let new_end = start + new_len;
                if new_end < last.start {
                    return Err(MapError::Overlap { index, view });
                }
                last.end = new_end;
            }
        }
        let delta = new_len as isize - old_len as isize;
        if delta != 0 {
            for entry in &mut self.entries[index + 1..] {
                entry.shift(view, delta);
            }
        }
        Ok(())
    }

    /// Page boundaries in this map
    #[must_use]
    pub fn page_indicators(&self) -> Vec<PageIndicator> {
        self.entries
            .iter()
            .filter_map(|e| match &e.kind {
                EntryKind::PageBreak {
                    braille_page,
                    print_page,
                    line,
                } => Some(PageIndicator {
                    print_page: print_page.clone(),
                    braille_page: *braille_page,
                    line: *line,
                }),
                _ => None,
            })
            .collect()
    }

    /// True when adjacent entries never overlap in either view
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.entries.windows(2).all(|pair| {
            [View::Source, View::Braille]
                .iter()
                .all(|&view| pair[0].range(view).end <= pair[1].range(view).start)
        })
    }

    /// End offset of the last entry in a view
    #[must_use]
    pub fn extent(&self, view: View) -> usize {
        self.entries.last().map_or(0, |e| e.range(view).end)
    }
}
