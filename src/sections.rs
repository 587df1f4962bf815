//! Section windowing: only a bounded set of sections keep a built map

use std::collections::HashMap;
use std::num::NonZeroUsize;

use log::{debug, info};
use lru::LruCache;

use crate::document::{Document, NodeId, NodeKind};
use crate::layout::{RenderedViews, build_section};
use crate::map::{ElementMap, MapEntry, MapError};

pub const DEFAULT_WINDOW_SIZE: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SectionError {
    #[error("section {index} out of range ({len} sections)")]
    OutOfRange { index: usize, len: usize },

    #[error("section {index} failed to build: {source}")]
    Build {
        index: usize,
        #[source]
        source: MapError,
    },
}

/// A materialized section: its map and the text both views show
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BufferedSection {
    pub map: ElementMap,
    pub views: RenderedViews,
}

#[derive(Debug)]
pub struct Section {
    index: usize,
    /// `Section` node, or the root for single-section documents
    node: NodeId,
    page_count: u32,
    visible: bool,
    buffer: Option<BufferedSection>,
}

impl Section {
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    #[must_use]
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    #[must_use]
    pub fn is_buffered(&self) -> bool {
        self.buffer.is_some()
    }
}

/// Ordered sections of one document plus the window of built maps
#[derive(Debug)]
pub struct SectionWindow {
    sections: Vec<Section>,
    by_node: HashMap<NodeId, usize>,
    recency: LruCache<usize, ()>,
}

impl SectionWindow {
    /// Discover sections: `Section` children of the root, or the whole
    /// document when there are none.
    #[must_use]
    pub fn discover(doc: &Document, window_size: usize) -> Self {
        let capacity = NonZeroUsize::new(window_size).unwrap_or(NonZeroUsize::MIN);
        let mut window = Self {
            sections: Vec::new(),
            by_node: HashMap::new(),
            recency: LruCache::new(capacity),
        };
        window.index_sections(doc);
        window
    }

    /// Re-read the section list after a whole-document change. All built
    /// maps are dropped.
    pub fn rediscover(&mut self, doc: &Document) {
        self.recency.clear();
        self.index_sections(doc);
    }

    fn index_sections(&mut self, doc: &Document) {
        let root = doc.root();
        let mut nodes: Vec<NodeId> = doc
            .children(root)
            .iter()
            .copied()
            .filter(|&c| doc.kind(c) == Some(&NodeKind::Section))
            .collect();
        if nodes.is_empty() {
            nodes.push(root);
        }

        self.by_node = nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        self.sections = nodes
            .into_iter()
            .enumerate()
            .map(|(index, node)| Section {
                index,
                node,
                page_count: 0,
                visible: false,
                buffer: None,
            })
            .collect();
        self.refresh_page_counts(doc);
        info!("Indexed {} section(s)", self.sections.len());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Single-section documents never partition
    #[must_use]
    pub fn is_single(&self) -> bool {
        self.sections.len() <= 1
    }

    #[must_use]
    pub fn window_size(&self) -> usize {
        self.recency.cap().get()
    }

    #[must_use]
    pub fn section(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    fn check_index(&self, index: usize) -> Result<(), SectionError> {
        if index < self.sections.len() {
            Ok(())
        } else {
            Err(SectionError::OutOfRange {
                index,
                len: self.sections.len(),
            })
        }
    }

    /// Return the section's map, building it first if needed. Building may
    /// evict the least recently used section to respect the window size.
    pub fn buffer_section(
        &mut self,
        doc: &Document,
        index: usize,
    ) -> Result<&BufferedSection, SectionError> {
        self.check_index(index)?;
        if self.sections[index].buffer.is_none() {
            self.materialize(doc, index)?;
        } else {
            self.recency.promote(&index);
        }
        self.buffered(index)
            .ok_or(SectionError::OutOfRange { index, len: self.sections.len() })
    }

    /// Rebuild the section's map even if one is cached
    pub fn reset_section(
        &mut self,
        doc: &Document,
        index: usize,
    ) -> Result<&BufferedSection, SectionError> {
        self.check_index(index)?;
        self.materialize(doc, index)?;
        self.buffered(index)
            .ok_or(SectionError::OutOfRange { index, len: self.sections.len() })
    }

    fn materialize(&mut self, doc: &Document, index: usize) -> Result<(), SectionError> {
        let section_node = self.sections[index].node;
        let (map, views) =
            build_section(doc, section_node).map_err(|source| SectionError::Build { index, source })?;
        debug!("Buffered section {index} ({} entries)", map.len());

        if let Some((evicted, ())) = self.recency.push(index, ()) {
            if evicted != index {
                self.drop_buffer(evicted);
            }
        }
        let section = &mut self.sections[index];
        section.page_count = count_pages(doc, section_node, index);
        section.buffer = Some(BufferedSection { map, views });
        section.visible = true;
        Ok(())
    }

    /// Discard a section's map
    pub fn unbuffer_section(&mut self, index: usize) {
        if index < self.sections.len() {
            self.recency.pop(&index);
            self.drop_buffer(index);
        }
    }

    fn drop_buffer(&mut self, index: usize) {
        if let Some(section) = self.sections.get_mut(index) {
            if section.buffer.take().is_some() {
                debug!("Unbuffered section {index}");
            }
            section.visible = false;
        }
    }

    #[must_use]
    pub fn buffered(&self, index: usize) -> Option<&BufferedSection> {
        self.sections.get(index).and_then(|s| s.buffer.as_ref())
    }

    pub fn buffered_mut(&mut self, index: usize) -> Option<&mut BufferedSection> {
        self.sections.get_mut(index).and_then(|s| s.buffer.as_mut())
    }

    /// Indices of sections holding a built map, in document order
    #[must_use]
    pub fn materialized(&self) -> Vec<usize> {
        self.sections
            .iter()
            .filter(|s| s.buffer.is_some())
            .map(|s| s.index)
            .collect()
    }

    #[must_use]
    pub fn visible(&self) -> Vec<usize> {
        self.sections
            .iter()
            .filter(|s| s.visible)
            .map(|s| s.index)
            .collect()
    }

    pub fn refresh_page_counts(&mut self, doc: &Document) {
        for section in &mut self.sections {
            section.page_count = count_pages(doc, section.node, section.index);
        }
    }

    /// Pages currently shown across all visible sections
    #[must_use]
    pub fn pages_in_view(&self) -> u32 {
        self.sections
            .iter()
            .filter(|s| s.visible)
            .map(|s| s.page_count)
            .sum()
    }

    /// Section holding a node, by walking up to the top-level partition
    #[must_use]
    pub fn section_of_node(&self, doc: &Document, node: NodeId) -> Option<usize> {
        if !doc.is_attached(node) {
            return None;
        }
        if self.is_single() {
            return (!self.sections.is_empty()).then_some(0);
        }
        doc.ancestors(node)
            .find_map(|ancestor| self.by_node.get(&ancestor).copied())
    }

    /// Section holding a map entry. Whitespace entries carry no node and
    /// resolve to the buffered section that owns them.
    #[must_use]
    pub fn section_of_entry(&self, doc: &Document, entry: &MapEntry) -> Option<usize> {
        if let Some(node) = entry.node {
            return self.section_of_node(doc, node);
        }
        self.sections
            .iter()
            .find(|s| {
                s.buffer
                    .as_ref()
                    .is_some_and(|b| b.map.iter().any(|e| std::ptr::eq(e, entry)))
            })
            .map(|s| s.index)
    }
}

/// Pages starting inside a section: its page breaks, plus the implicit
/// first page of the document.
fn count_pages(doc: &Document, section: NodeId, index: usize) -> u32 {
    let breaks = doc
        .descendants(section)
        .into_iter()
        .filter(|&d| doc.kind(d).is_some_and(NodeKind::is_page_break))
        .count();
    let breaks = u32::try_from(breaks).unwrap_or(u32::MAX);
    if index == 0 { breaks.saturating_add(1) } else { breaks }
}
