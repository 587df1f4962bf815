use std::fmt;

use serde::Serialize;

/// Handle to a node in a [`super::Document`] arena.
///
/// Ids never get reused, so a handle held by a map entry keeps pointing at
/// the same node even after it is detached. Such a handle is stale and
/// lookups through it fail instead of landing on unrelated content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    /// Top-level partition used for windowing
    Section,
    /// Non-table grouping such as a list or a sidebar
    Container { name: String },
    Table,
    TableRow,
    TableCell,
    /// Translatable paragraph-level block
    Block { style: String },
    Text(String),
    /// Transcription output attached to a block, cell or print page marker
    Braille(String),
    /// Print page marker from the source book
    PrintPage { number: String },
    /// Braille page boundary inserted by the transcription engine
    PageBreak {
        braille_page: u32,
        print_page: Option<String>,
    },
}

impl NodeKind {
    #[must_use]
    pub fn block(style: impl Into<String>) -> Self {
        Self::Block {
            style: style.into(),
        }
    }

    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    #[must_use]
    pub fn print_page(number: impl Into<String>) -> Self {
        Self::PrintPage {
            number: number.into(),
        }
    }

    /// Units the engine translates as a whole
    #[must_use]
    pub fn is_translatable(&self) -> bool {
        matches!(self, Self::Block { .. } | Self::PrintPage { .. } | Self::Table)
    }

    /// Structural containers whose children are translated one by one
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Section | Self::Container { .. })
    }

    /// Nodes produced by the engine rather than the author
    #[must_use]
    pub fn is_generated(&self) -> bool {
        matches!(self, Self::Braille(_) | Self::PageBreak { .. })
    }

    #[must_use]
    pub fn is_page_break(&self) -> bool {
        matches!(self, Self::PageBreak { .. })
    }

    #[must_use]
    pub fn is_table_part(&self) -> bool {
        matches!(self, Self::Table | Self::TableRow | Self::TableCell)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
        }
    }
}
