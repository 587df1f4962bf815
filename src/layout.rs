//! Renders a section of the tree into both views and its element map

use log::debug;
use serde::Serialize;

use crate::document::{Document, NodeId, NodeKind};
use crate::map::{BrailleSpan, ElementMap, EntryKind, MapEntry, MapError};

/// Braille-ready page separator
pub const FORM_FEED: char = '\u{000C}';

/// Text of both views for one section
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RenderedViews {
    pub source: String,
    pub braille: String,
}

impl RenderedViews {
    #[must_use]
    pub fn braille_lines(&self) -> usize {
        self.braille.lines().count()
    }
}

/// Source-view text of a print page marker
#[must_use]
pub fn print_page_label(number: &str) -> String {
    format!("[page {number}]")
}

struct Builder<'a> {
    doc: &'a Document,
    map: ElementMap,
    views: RenderedViews,
    line: usize,
}

impl<'a> Builder<'a> {
    fn new(doc: &'a Document) -> Self {
        Self {
            doc,
            map: ElementMap::new(),
            views: RenderedViews::default(),
            line: 0,
        }
    }

    fn push_unit(
        &mut self,
        kind: EntryKind,
        node: NodeId,
        source: &str,
        braille: &str,
    ) -> Result<(), MapError> {
        let source_start = self.views.source.len();
        self.views.source.push_str(source);
        let braille_start = self.views.braille.len();
        self.views.braille.push_str(braille);
        self.line += braille.matches('\n').count();

        self.map.push(MapEntry::new(
            kind,
            Some(node),
            source_start..self.views.source.len(),
            vec![BrailleSpan::new(
                self.doc.braille_child(node),
                braille_start..self.views.braille.len(),
            )],
        ))?;
        self.push_separator()
    }

    fn push_separator(&mut self) -> Result<(), MapError> {
        let source = self.views.source.len();
        let braille = self.views.braille.len();
        self.views.source.push('\n');
        self.views.braille.push('\n');
        self.line += 1;
        self.map
            .push(MapEntry::whitespace(source..source + 1, braille..braille + 1))
    }

    fn push_page_break(
        &mut self,
        node: NodeId,
        braille_page: u32,
        print_page: Option<String>,
    ) -> Result<(), MapError> {
        let source = self.views.source.len();
        let braille_start = self.views.braille.len();
        self.views.braille.push(FORM_FEED);
        self.views.braille.push('\n');
        let entry = MapEntry::new(
            EntryKind::PageBreak {
                braille_page,
                print_page,
                line: self.line,
            },
            Some(node),
            source..source,
            vec![BrailleSpan::new(
                Some(node),
                braille_start..self.views.braille.len(),
            )],
        );
        self.line += 1;
        self.map.push(entry)
    }

    fn visit_children(&mut self, parent: NodeId) -> Result<(), MapError> {
        for &child in self.doc.children(parent) {
            self.visit(child)?;
        }
        Ok(())
    }

    fn visit(&mut self, node: NodeId) -> Result<(), MapError> {
        let Some(kind) = self.doc.kind(node) else {
            return Ok(());
        };
        match kind {
            NodeKind::Block { .. } => {
                let text = self.doc.text_content(node);
                let braille = self.doc.braille_text(node).unwrap_or_default().to_owned();
                self.push_unit(EntryKind::Text, node, &text, &braille)
            }
            NodeKind::PrintPage { number } => {
                let label = print_page_label(number);
                let braille = self.doc.braille_text(node).unwrap_or_default().to_owned();
                self.push_unit(
                    EntryKind::PrintPage {
                        number: number.clone(),
                    },
                    node,
                    &label,
                    &braille,
                )
            }
            NodeKind::Table => self.visit_table(node),
            NodeKind::PageBreak {
                braille_page,
                print_page,
            } => self.push_page_break(node, *braille_page, print_page.clone()),
            NodeKind::Section | NodeKind::Container { .. } | NodeKind::Root => {
                self.visit_children(node)
            }
            NodeKind::TableRow | NodeKind::TableCell => {
                debug!("Table part {node} outside a table, skipping");
                Ok(())
            }
            NodeKind::Text(_) | NodeKind::Braille(_) => Ok(()),
        }
    }

    fn visit_table(&mut self, table: NodeId) -> Result<(), MapError> {
        let rows: Vec<NodeId> = self
            .doc
            .children(table)
            .iter()
            .copied()
            .filter(|&r| self.doc.kind(r) == Some(&NodeKind::TableRow))
            .collect();
        for (row, row_node) in rows.into_iter().enumerate() {
            let cells: Vec<NodeId> = self
                .doc
                .children(row_node)
                .iter()
                .copied()
                .filter(|&c| self.doc.kind(c) == Some(&NodeKind::TableCell))
                .collect();
            for (col, cell) in cells.into_iter().enumerate() {
                let text = self.doc.text_content(cell);
                let braille = self.doc.braille_text(cell).unwrap_or_default().to_owned();
                self.push_unit(EntryKind::TableCell { row, col }, cell, &text, &braille)?;
            }
        }
        Ok(())
    }
}

/// Build the element map and both views for everything under `section`.
///
/// Each unit is followed by a newline separator entry. Page breaks occupy
/// no source text and a form feed line in braille.
pub fn build_section(
    doc: &Document,
    section: NodeId,
) -> Result<(ElementMap, RenderedViews), MapError> {
    let mut builder = Builder::new(doc);
    builder.visit_children(section)?;
    Ok((builder.map, builder.views))
}
