use std::ops::Range;

use serde::Serialize;

use crate::document::NodeId;

/// Which rendering an offset refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    Source,
    Braille,
}

/// One piece of an entry's braille rendering
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BrailleSpan {
    pub node: Option<NodeId>,
    pub start: usize,
    pub end: usize,
}

impl BrailleSpan {
    #[must_use]
    pub fn new(node: Option<NodeId>, range: Range<usize>) -> Self {
        Self {
            node,
            start: range.start,
            end: range.end,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    /// Ordinary translated block
    Text,
    /// Separator between units, owns no node
    Whitespace,
    TableCell { row: usize, col: usize },
    PrintPage { number: String },
    /// Braille page boundary; `line` is the braille-view line it sits on
    PageBreak {
        braille_page: u32,
        print_page: Option<String>,
        line: usize,
    },
}

/// One addressable unit of rendered content
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MapEntry {
    pub node: Option<NodeId>,
    pub start: usize,
    pub end: usize,
    pub braille: Vec<BrailleSpan>,
    #[serde(flatten)]
    pub kind: EntryKind,
}

impl MapEntry {
    #[must_use]
    pub fn new(
        kind: EntryKind,
        node: Option<NodeId>,
        source: Range<usize>,
        braille: Vec<BrailleSpan>,
    ) -> Self {
        Self {
            node,
            start: source.start,
            end: source.end,
            braille,
            kind,
        }
    }

    #[must_use]
    pub fn whitespace(source: Range<usize>, braille: Range<usize>) -> Self {
        Self::new(
            EntryKind::Whitespace,
            None,
            source,
            vec![BrailleSpan::new(None, braille)],
        )
    }

    #[must_use]
    pub fn is_whitespace(&self) -> bool {
        matches!(self.kind, EntryKind::Whitespace)
    }

    /// Entries that tie-breaking lookups prefer
    #[must_use]
    pub fn has_node(&self) -> bool {
        self.node.is_some() && !self.is_whitespace()
    }

    /// Offset range in the given view. Braille ranges span all sub-entries.
    #[must_use]
    pub fn range(&self, view: View) -> Range<usize> {
        match view {
            View::Source => self.start..self.end,
            View::Braille => match (self.braille.first(), self.braille.last()) {
                (Some(first), Some(last)) => first.start..last.end,
                _ => 0..0,
            },
        }
    }

    #[must_use]
    pub fn len(&self, view: View) -> usize {
        let range = self.range(view);
        range.end - range.start
    }

    #[must_use]
    pub fn contains(&self, view: View, offset: usize) -> bool {
        let range = self.range(view);
        range.start <= offset && offset <= range.end
    }

    pub(crate) fn shift(&mut self, view: View, delta: isize) {
        let apply = |value: usize| value.saturating_add_signed(delta);
        match view {
            View::Source => {
                self.start = apply(self.start);
                self.end = apply(self.end);
            }
            View::Braille => {
                for span in &mut self.braille {
                    span.start = apply(span.start);
                    span.end = apply(span.end);
                }
            }
        }
    }
}

/// One page boundary derived from the map
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PageIndicator {
    pub print_page: Option<String>,
    pub braille_page: u32,
    pub line: usize,
}
