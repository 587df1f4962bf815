use std::collections::HashSet;

use log::{debug, warn};

use super::braille::transcribe;
use super::{FormatError, FormatProgress, Transcriber};
use crate::document::{Document, DocumentError, NodeId, NodeKind, SharedDocument};
use crate::reformatter::ReformatRequest;

pub const DEFAULT_CELLS_PER_LINE: usize = 40;
pub const DEFAULT_LINES_PER_PAGE: usize = 25;

/// Braille page geometry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub cells_per_line: usize,
    pub lines_per_page: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cells_per_line: DEFAULT_CELLS_PER_LINE,
            lines_per_page: DEFAULT_LINES_PER_PAGE,
        }
    }
}

/// Grade 1 transcription with block-granular pagination.
///
/// Page breaks are only ever placed directly before a unit, which lets a
/// partial run recognise and reuse the breaks a previous run left behind.
#[derive(Clone, Debug, Default)]
pub struct GradeOneEngine {
    config: EngineConfig,
}

/// Access to the tree for one step of a run
trait TreeAccess {
    fn edit<R>(&mut self, f: impl FnOnce(&mut Document) -> R) -> R;
}

struct Exclusive<'a>(&'a mut Document);

impl TreeAccess for Exclusive<'_> {
    fn edit<R>(&mut self, f: impl FnOnce(&mut Document) -> R) -> R {
        f(self.0)
    }
}

/// Takes the write lock per step so callbacks run unlocked
struct Locked<'a>(&'a SharedDocument);

impl TreeAccess for Locked<'_> {
    fn edit<R>(&mut self, f: impl FnOnce(&mut Document) -> R) -> R {
        f(&mut self.0.write())
    }
}

#[derive(Clone, Debug)]
struct Pager {
    lines_per_page: usize,
    braille_page: u32,
    line: usize,
    print_page: Option<String>,
}

impl Pager {
    fn new(lines_per_page: usize, braille_page: u32, print_page: Option<String>) -> Self {
        Self {
            lines_per_page: lines_per_page.max(1),
            braille_page,
            line: 0,
            print_page,
        }
    }

    /// Account for a unit; true when it has to open a new page
    fn place(&mut self, lines: usize) -> bool {
        let mut new_page = false;
        if self.line > 0 && self.line + lines > self.lines_per_page {
            self.braille_page += 1;
            self.line = 0;
            new_page = true;
        }
        self.line += lines;
        while self.line > self.lines_per_page {
            self.line -= self.lines_per_page;
            self.braille_page += 1;
        }
        new_page
    }
}

struct Walk {
    /// Units are walked strictly after this node; `None` walks everything
    after: Option<NodeId>,
    pager: Pager,
    retranslate_all: bool,
}

impl GradeOneEngine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> EngineConfig {
        self.config
    }

    fn wrap(&self, braille: &str) -> String {
        textwrap::wrap(braille, self.config.cells_per_line.max(1)).join("\n")
    }

    fn print_page_indicator(&self, number: &str) -> String {
        let digits = transcribe(number);
        let fill = self
            .config
            .cells_per_line
            .saturating_sub(digits.chars().count());
        format!("{}{digits}", "⠤".repeat(fill))
    }

    fn translate_unit(&self, doc: &mut Document, unit: NodeId) -> Result<(), FormatError> {
        match doc.kind(unit).cloned() {
            Some(NodeKind::Block { .. }) => {
                let braille = self.wrap(&transcribe(&doc.text_content(unit)));
                doc.set_braille(unit, braille)?;
            }
            Some(NodeKind::PrintPage { number }) => {
                let indicator = self.print_page_indicator(&number);
                doc.set_braille(unit, indicator)?;
            }
            Some(NodeKind::Table) => {
                for cell in table_cells(doc, unit) {
                    let braille = self.wrap(&transcribe(&doc.text_content(cell)));
                    doc.set_braille(cell, braille)?;
                }
            }
            Some(_) => {
                return Err(FormatError::failed(format!(
                    "node {unit} is not a translatable unit"
                )));
            }
            None => return Err(DocumentError::UnknownNode(unit).into()),
        }
        Ok(())
    }

    fn resolve_start(&self, doc: &Document, request: &ReformatRequest) -> Walk {
        if doc.is_attached(request.start) {
            if let Some(NodeKind::PageBreak {
                braille_page,
                print_page,
            }) = doc.kind(request.start)
            {
                let print_page = request
                    .print_page
                    .filter(|&marker| doc.is_attached(marker))
                    .and_then(|marker| match doc.kind(marker) {
                        Some(NodeKind::PrintPage { number }) => Some(number.clone()),
                        _ => None,
                    })
                    .or_else(|| print_page.clone());
                return Walk {
                    after: Some(request.start),
                    pager: Pager::new(self.config.lines_per_page, *braille_page, print_page),
                    retranslate_all: false,
                };
            }
        }
        warn!(
            "Anchor {} is not a live page break, restarting pagination from the document start",
            request.start
        );
        Walk {
            after: None,
            pager: Pager::new(self.config.lines_per_page, 1, None),
            retranslate_all: false,
        }
    }

    fn run(
        &self,
        tree: &mut impl TreeAccess,
        walk: Walk,
        progress: &mut dyn FormatProgress,
    ) -> Result<(), FormatError> {
        let Walk {
            after,
            mut pager,
            retranslate_all,
        } = walk;

        let (root, units, mut old_breaks) = tree.edit(|doc| {
            let order = doc.order_positions();
            let floor = after.and_then(|a| order.get(&a).copied());
            let is_after = |n: &NodeId| floor.is_none_or(|f| order.get(n).is_some_and(|&p| p > f));
            let units: Vec<NodeId> = doc
                .flow_units(doc.root())
                .into_iter()
                .filter(is_after)
                .collect();
            let breaks: HashSet<NodeId> = doc
                .preorder()
                .into_iter()
                .filter(|n| doc.kind(*n).is_some_and(NodeKind::is_page_break))
                .filter(is_after)
                .collect();
            (doc.root(), units, breaks)
        });
        debug!(
            "Paginating {} unit(s) from page {}",
            units.len(),
            pager.braille_page
        );

        for unit in units {
            let step = tree.edit(|doc| -> Result<Option<Option<NodeId>>, FormatError> {
                if !doc.is_attached(unit) {
                    return Ok(None);
                }
                if retranslate_all || !has_output(doc, unit) {
                    self.translate_unit(doc, unit)?;
                }

                let new_page = pager.place(doc.braille_lines(unit));
                let previous = doc
                    .previous_sibling(unit)
                    .filter(|p| old_breaks.contains(p));
                let boundary = if new_page {
                    let kind = NodeKind::PageBreak {
                        braille_page: pager.braille_page,
                        print_page: pager.print_page.clone(),
                    };
                    match previous {
                        Some(old) => {
                            old_breaks.remove(&old);
                            doc.set_kind(old, kind)?;
                            Some(old)
                        }
                        None => Some(doc.insert_before(unit, kind)?),
                    }
                } else {
                    if let Some(old) = previous {
                        old_breaks.remove(&old);
                        doc.detach(old)?;
                    }
                    None
                };

                if let Some(NodeKind::PrintPage { number }) = doc.kind(unit) {
                    pager.print_page = Some(number.clone());
                }
                Ok(Some(boundary))
            })?;

            let Some(boundary) = step else {
                continue;
            };
            if let Some(page_break) = boundary {
                progress.on_node_updated(page_break, true)?;
            }
            progress.on_node_updated(unit, false)?;
        }

        tree.edit(|doc| -> Result<(), DocumentError> {
            for leftover in old_breaks.drain() {
                if doc.is_attached(leftover) {
                    doc.detach(leftover)?;
                }
            }
            Ok(())
        })?;
        progress.on_run_complete(root);
        Ok(())
    }
}

fn table_cells(doc: &Document, table: NodeId) -> Vec<NodeId> {
    doc.descendants(table)
        .into_iter()
        .filter(|&d| doc.kind(d) == Some(&NodeKind::TableCell))
        .collect()
}

fn has_output(doc: &Document, unit: NodeId) -> bool {
    match doc.kind(unit) {
        Some(NodeKind::Table) => table_cells(doc, unit)
            .into_iter()
            .all(|cell| doc.braille_child(cell).is_some()),
        _ => doc.braille_child(unit).is_some(),
    }
}

impl Transcriber for GradeOneEngine {
    fn format(
        &self,
        doc: &mut Document,
        progress: &mut dyn FormatProgress,
    ) -> Result<(), FormatError> {
        let walk = Walk {
            after: None,
            pager: Pager::new(self.config.lines_per_page, 1, None),
            retranslate_all: true,
        };
        self.run(&mut Exclusive(doc), walk, progress)
    }

    fn partial_format(
        &self,
        doc: &SharedDocument,
        request: &ReformatRequest,
        progress: &mut dyn FormatProgress,
    ) -> Result<(), FormatError> {
        let walk = self.resolve_start(&doc.read(), request);
        self.run(&mut Locked(doc), walk, progress)
    }

    fn translate_and_replace(
        &self,
        doc: &mut Document,
        units: &[NodeId],
    ) -> Result<Vec<NodeId>, FormatError> {
        let mut translated = Vec::with_capacity(units.len());
        for &unit in units {
            if !doc.is_attached(unit) {
                debug!("Skipping stale unit {unit}");
                continue;
            }
            self.translate_unit(doc, unit)?;
            translated.push(unit);
        }
        Ok(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Interrupted, NoProgress};

    fn engine(lines_per_page: usize) -> GradeOneEngine {
        GradeOneEngine::new(EngineConfig {
            cells_per_line: 10,
            lines_per_page,
        })
    }

    fn paragraphs(count: usize) -> (Document, Vec<NodeId>) {
        let mut doc = Document::new();
        let blocks = (0..count)
            .map(|i| {
                let block = doc.append(doc.root(), NodeKind::block("p")).unwrap();
                doc.append(block, NodeKind::text(format!("para {i}"))).unwrap();
                block
            })
            .collect();
        (doc, blocks)
    }

    fn breaks(doc: &Document) -> Vec<(u32, Option<String>)> {
        doc.preorder()
            .into_iter()
            .filter_map(|n| match doc.kind(n) {
                Some(NodeKind::PageBreak {
                    braille_page,
                    print_page,
                }) => Some((*braille_page, print_page.clone())),
                _ => None,
            })
            .collect()
    }

    struct Recorder(Vec<(NodeId, bool)>);

    impl FormatProgress for Recorder {
        fn on_node_updated(&mut self, node: NodeId, page_boundary: bool) -> Result<(), Interrupted> {
            self.0.push((node, page_boundary));
            Ok(())
        }
    }

    #[test]
    fn pager_opens_pages_between_units() {
        let mut pager = Pager::new(3, 1, None);
        assert!(!pager.place(2));
        assert!(pager.place(2));
        assert_eq!(pager.braille_page, 2);
        assert!(!pager.place(1));
        assert!(pager.place(1));
        assert_eq!(pager.braille_page, 3);
    }

    #[test]
    fn format_translates_and_paginates() {
        let (mut doc, blocks) = paragraphs(5);
        engine(2).format(&mut doc, &mut NoProgress).unwrap();

        assert_eq!(doc.braille_text(blocks[0]), Some("⠏⠁⠗⠁ ⠼⠚"));
        assert_eq!(breaks(&doc), vec![(2, None), (3, None)]);
    }

    #[test]
    fn format_is_idempotent() {
        let (mut doc, _) = paragraphs(7);
        let engine = engine(3);
        engine.format(&mut doc, &mut NoProgress).unwrap();
        let first = breaks(&doc);
        engine.format(&mut doc, &mut NoProgress).unwrap();
        assert_eq!(breaks(&doc), first);
        assert_eq!(
            doc.preorder()
                .into_iter()
                .filter(|&n| doc.kind(n).is_some_and(NodeKind::is_page_break))
                .count(),
            first.len()
        );
    }

    #[test]
    fn reformatting_reuses_output_nodes() {
        let (mut doc, _) = paragraphs(7);
        let engine = engine(3);
        engine.format(&mut doc, &mut NoProgress).unwrap();
        let nodes = doc.node_count();

        for _ in 0..3 {
            engine.format(&mut doc, &mut NoProgress).unwrap();
        }
        assert_eq!(doc.node_count(), nodes);
    }

    #[test]
    fn print_pages_flow_into_breaks() {
        let (mut doc, blocks) = paragraphs(4);
        doc.insert_before(blocks[1], NodeKind::print_page("9")).unwrap();
        engine(2).format(&mut doc, &mut NoProgress).unwrap();

        assert_eq!(breaks(&doc), vec![(2, Some("9".into())), (3, Some("9".into()))]);
    }

    #[test]
    fn partial_matches_full_pagination() {
        let (mut doc, blocks) = paragraphs(9);
        let engine = engine(2);
        engine.format(&mut doc, &mut NoProgress).unwrap();

        doc.set_text(blocks[5], "a much longer paragraph that wraps").unwrap();
        engine.translate_and_replace(&mut doc, &[blocks[5]]).unwrap();
        let mut full = doc.clone();
        engine.format(&mut full, &mut NoProgress).unwrap();

        let anchor = doc
            .preorder()
            .into_iter()
            .filter(|&n| doc.kind(n).is_some_and(NodeKind::is_page_break))
            .nth(1)
            .unwrap();
        let shared = SharedDocument::new(doc);
        let request = ReformatRequest::new(anchor, None);
        engine
            .partial_format(&shared, &request, &mut NoProgress)
            .unwrap();

        assert_eq!(breaks(&shared.read()), breaks(&full));
    }

    #[test]
    fn partial_reports_page_boundaries() {
        let (mut doc, _) = paragraphs(6);
        let engine = engine(2);
        engine.format(&mut doc, &mut NoProgress).unwrap();
        let anchor = doc
            .preorder()
            .into_iter()
            .find(|&n| doc.kind(n).is_some_and(NodeKind::is_page_break))
            .unwrap();

        let shared = SharedDocument::new(doc);
        let mut recorder = Recorder(Vec::new());
        engine
            .partial_format(&shared, &ReformatRequest::new(anchor, None), &mut recorder)
            .unwrap();

        let boundaries = recorder.0.iter().filter(|(_, b)| *b).count();
        assert_eq!(boundaries, 1);
        assert_eq!(recorder.0.len(), 5);
    }

    #[test]
    fn stale_anchor_restarts_from_the_top() {
        let (mut doc, _) = paragraphs(6);
        let engine = engine(2);
        engine.format(&mut doc, &mut NoProgress).unwrap();
        let expected = breaks(&doc);
        let anchor = doc
            .preorder()
            .into_iter()
            .find(|&n| doc.kind(n).is_some_and(NodeKind::is_page_break))
            .unwrap();
        doc.detach(anchor).unwrap();

        let shared = SharedDocument::new(doc);
        engine
            .partial_format(&shared, &ReformatRequest::new(anchor, None), &mut NoProgress)
            .unwrap();
        assert_eq!(breaks(&shared.read()), expected);
    }

    #[test]
    fn tables_translate_every_cell() {
        let mut doc = Document::new();
        let table = doc.append(doc.root(), NodeKind::Table).unwrap();
        let row = doc.append(table, NodeKind::TableRow).unwrap();
        let cell = doc.append(row, NodeKind::TableCell).unwrap();
        doc.append(cell, NodeKind::text("ab")).unwrap();

        let translated = engine(5).translate_and_replace(&mut doc, &[table]).unwrap();
        assert_eq!(translated, vec![table]);
        assert_eq!(doc.braille_text(cell), Some("⠁⠃"));
    }

    #[test]
    fn translate_rejects_non_units() {
        let (mut doc, blocks) = paragraphs(1);
        let text = doc.children(blocks[0])[0];
        assert!(engine(5).translate_and_replace(&mut doc, &[text]).is_err());
    }

    #[test]
    fn print_page_indicator_fills_the_line() {
        let engine = engine(5);
        assert_eq!(engine.print_page_indicator("3"), "⠤⠤⠤⠼⠉");
    }
}
