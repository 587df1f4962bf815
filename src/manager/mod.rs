//! Session orchestration: edits in, reformats dispatched, views rebuilt

mod affected;
mod error;
mod observer;

pub use affected::{EditPlan, plan_edit};
pub use error::SessionError;
pub use observer::{NullObserver, RecordingObserver, SessionObserver};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLockReadGuard};

use flume::RecvError;
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::document::{Document, EditOp, NodeId, NodeKind, SharedDocument};
use crate::engine::{EngineConfig, GradeOneEngine, NoProgress, Transcriber};
use crate::layout::{RenderedViews, print_page_label};
use crate::map::{ElementMap, MapEntry, PageIndicator, View};
use crate::notification::Notification;
use crate::reformatter::{
    FormatTicket, FormatterFailure, ReformatOutcome, ReformatRequest, ReformatResult, Recovery,
    Reformatter, SchedulerConfig,
};
use crate::sections::{DEFAULT_WINDOW_SIZE, SectionError, SectionWindow};

/// What the session needs to know about its collaborators' tuning
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub window_size: usize,
    pub scheduler: SchedulerConfig,
    pub engine: EngineConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            scheduler: SchedulerConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// How an edit was brought into the views
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EditPath {
    Nothing,
    /// Views rebuilt without retranslation
    ViewsOnly,
    /// Map patched in place, no repagination
    InPlace,
    /// Partial run dispatched to the reformat worker
    Partial,
    WholeDocument,
}

/// Caret position, anchored to a node so it survives rebuilds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Caret {
    pub node: NodeId,
    /// Offset inside the node's entry
    pub offset: usize,
    pub view: View,
}

/// Coordinates one open document.
///
/// All view mutation happens on the thread that owns the manager. Partial
/// reformats run on the reformat worker; while one is in flight the manager
/// only touches the tree while the worker is parked on its resume signal.
pub struct Manager {
    doc: SharedDocument,
    engine: Arc<dyn Transcriber>,
    sections: SectionWindow,
    reformatter: Reformatter,
    ticket: Option<FormatTicket>,
    /// First section to rebuild once the in-flight run completes
    pending_rebuild: Option<usize>,
    current_section: usize,
    /// Last known good tree
    snapshot: Document,
    caret: Option<Caret>,
    /// Anchor of a cancelled run whose tail was never repaginated
    interrupted_anchor: Option<NodeId>,
    observer: Box<dyn SessionObserver>,
    config: SessionConfig,
}

impl Manager {
    /// Format the document, index its sections and show the first one
    pub fn new(
        mut doc: Document,
        engine: Arc<dyn Transcriber>,
        config: SessionConfig,
        observer: Box<dyn SessionObserver>,
    ) -> Result<Self, SessionError> {
        engine.format(&mut doc, &mut NoProgress)?;
        let sections = SectionWindow::discover(&doc, config.window_size);
        let snapshot = doc.clone();
        let doc = SharedDocument::new(doc);
        let reformatter = Reformatter::spawn(Arc::clone(&engine), doc.clone(), config.scheduler)?;

        let mut manager = Self {
            doc,
            engine,
            sections,
            reformatter,
            ticket: None,
            pending_rebuild: None,
            current_section: 0,
            snapshot,
            caret: None,
            interrupted_anchor: None,
            observer,
            config,
        };
        manager.show_section(0)?;
        info!(
            "Session opened with {} section(s)",
            manager.sections.len()
        );
        Ok(manager)
    }

    /// Session driven by the bundled grade 1 engine
    pub fn with_grade_one(
        doc: Document,
        config: SessionConfig,
        observer: Box<dyn SessionObserver>,
    ) -> Result<Self, SessionError> {
        let engine = Arc::new(GradeOneEngine::new(config.engine));
        Self::new(doc, engine, config, observer)
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Read access to the tree. Do not hold it across session calls.
    pub fn document(&self) -> RwLockReadGuard<'_, Document> {
        self.doc.read()
    }

    #[must_use]
    pub fn sections(&self) -> &SectionWindow {
        &self.sections
    }

    #[must_use]
    pub fn current_section(&self) -> usize {
        self.current_section
    }

    #[must_use]
    pub fn is_formatting(&self) -> bool {
        self.ticket.is_some()
    }

    /// Map of the section in view
    #[must_use]
    pub fn element_map(&self) -> Option<&ElementMap> {
        self.sections
            .buffered(self.current_section)
            .map(|b| &b.map)
    }

    /// Both views of the section in view
    #[must_use]
    pub fn views(&self) -> Option<&RenderedViews> {
        self.sections
            .buffered(self.current_section)
            .map(|b| &b.views)
    }

    #[must_use]
    pub fn page_indicators(&self) -> Vec<PageIndicator> {
        self.element_map()
            .map(ElementMap::page_indicators)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn section_of_node(&self, node: NodeId) -> Option<usize> {
        self.sections.section_of_node(&self.doc.read(), node)
    }

    #[must_use]
    pub fn section_of_entry(&self, entry: &MapEntry) -> Option<usize> {
        self.sections.section_of_entry(&self.doc.read(), entry)
    }

    /// Bring a section into view, building its map if needed
    pub fn buffer_section(&mut self, index: usize) -> Result<&ElementMap, SessionError> {
        self.wait_for_formatting(true)?;
        self.show_section(index)?;
        self.current_map()
    }

    /// Rebuild a section's map even if it is cached
    pub fn reset_section(&mut self, index: usize) -> Result<&ElementMap, SessionError> {
        self.wait_for_formatting(true)?;
        self.current_section = index;
        self.rebuild_section(index)?;
        self.current_map()
    }

    fn current_map(&self) -> Result<&ElementMap, SessionError> {
        self.element_map().ok_or(SessionError::Section(SectionError::OutOfRange {
            index: self.current_section,
            len: self.sections.len(),
        }))
    }

    fn show_section(&mut self, index: usize) -> Result<(), SessionError> {
        {
            let doc = self.doc.read();
            let buffered = self.sections.buffer_section(&doc, index)?;
            self.observer.repaint(index, buffered);
        }
        self.current_section = index;
        self.restore_caret();
        Ok(())
    }

    fn rebuild_section(&mut self, index: usize) -> Result<(), SessionError> {
        {
            let doc = self.doc.read();
            let buffered = self.sections.reset_section(&doc, index)?;
            self.observer.repaint(index, buffered);
        }
        self.restore_caret();
        Ok(())
    }

    /// Rebuild every materialized section from `first` on
    fn rebuild_from(&mut self, first: usize) -> Result<(), SessionError> {
        let targets: Vec<usize> = self
            .sections
            .materialized()
            .into_iter()
            .filter(|&i| i >= first)
            .collect();
        debug!("Rebuilding sections {targets:?}");
        for index in targets {
            self.rebuild_section(index)?;
        }
        Ok(())
    }

    fn rebuild_views(&mut self) -> Result<(), SessionError> {
        self.rebuild_from(0)
    }

    /// Place the caret at an offset of the section in view
    pub fn set_caret(&mut self, view: View, offset: usize) -> Option<Caret> {
        let buffered = self.sections.buffered_mut(self.current_section)?;
        let index = buffered.map.find_closest_index(view, offset, true)?;
        buffered.map.set_current(index);
        let entry = buffered.map.get(index)?;
        let start = entry.range(view).start;
        let caret = Caret {
            node: entry.node?,
            offset: offset.saturating_sub(start).min(entry.len(view)),
            view,
        };
        self.caret = Some(caret);
        Some(caret)
    }

    #[must_use]
    pub fn caret(&self) -> Option<Caret> {
        self.caret
    }

    /// Absolute offset of the caret in the section in view
    #[must_use]
    pub fn caret_offset(&self) -> Option<usize> {
        let caret = self.caret?;
        let map = self.element_map()?;
        let entry = map.get(map.find_node_index(caret.node, 0)?)?;
        Some(entry.range(caret.view).start + caret.offset.min(entry.len(caret.view)))
    }

    fn restore_caret(&mut self) {
        let Some(caret) = self.caret else {
            return;
        };
        let Some(buffered) = self.sections.buffered_mut(self.current_section) else {
            return;
        };
        match buffered.map.find_node_index(caret.node, 0) {
            Some(index) => buffered.map.set_current(index),
            None => debug!("Caret node {} left the section in view", caret.node),
        }
    }

    /// Apply a structural edit and bring the views up to date
    pub fn apply_edit(&mut self, op: &EditOp) -> Result<EditPath, SessionError> {
        self.stop_formatting()?;
        self.snapshot = self.doc.snapshot();

        let applied = op.apply(&mut self.doc.write());
        match applied {
            Ok(changed) => self.handle_edit(&changed, true),
            Err(e) => {
                warn!("Edit {op:?} failed: {e}");
                self.doc.replace(self.snapshot.clone());
                self.observer
                    .notify(Notification::error(format!("Edit failed: {e}")));
                Err(SessionError::Editing(e))
            }
        }
    }

    /// Entry point for edits the views already applied to the tree
    pub fn handle_edit(
        &mut self,
        changed: &[NodeId],
        should_translate: bool,
    ) -> Result<EditPath, SessionError> {
        self.stop_formatting()?;
        if !should_translate {
            self.rebuild_views()?;
            return Ok(EditPath::ViewsOnly);
        }

        let plan = plan_edit(&self.doc.read(), changed);
        debug!("Edit of {changed:?} planned as {plan:?}");
        let units = match plan {
            EditPlan::WholeDocument => {
                self.interrupted_anchor = None;
                self.format_whole()?;
                return Ok(EditPath::WholeDocument);
            }
            EditPlan::Nothing => match self.interrupted_anchor {
                Some(anchor) => {
                    let print_page = print_page_before(&self.doc.read(), anchor);
                    return self.reformat_from(anchor, print_page, anchor);
                }
                None => return Ok(EditPath::Nothing),
            },
            EditPlan::Units(units) => units,
        };

        let old_lines: Vec<usize> = {
            let doc = self.doc.read();
            units.iter().map(|&u| doc.braille_lines(u)).collect()
        };
        let translated = self
            .engine
            .translate_and_replace(&mut self.doc.write(), &units);
        let translated = match translated {
            Ok(translated) => translated,
            Err(e) => {
                self.recover(FormatterFailure::new(
                    e.to_string(),
                    Recovery::ReformatWholeDocument,
                ))?;
                return Ok(EditPath::WholeDocument);
            }
        };
        let Some(&first) = translated.first() else {
            return Ok(EditPath::Nothing);
        };

        if units.len() == 1 && translated.len() == 1 && self.interrupted_anchor.is_none() {
            let same_height = old_lines.first() == Some(&self.doc.read().braille_lines(first));
            if same_height && self.patch_in_place(first) {
                self.snapshot = self.doc.snapshot();
                return Ok(EditPath::InPlace);
            }
        }

        if self.sections.is_single() {
            self.format_whole()?;
            return Ok(EditPath::WholeDocument);
        }
        let anchors = find_anchors(&self.doc.read(), first);
        match anchors {
            Some((anchor, print_page)) => self.reformat_from(anchor, print_page, first),
            None => {
                debug!("No page break before {first}, reformatting the whole document");
                self.format_whole()?;
                Ok(EditPath::WholeDocument)
            }
        }
    }

    /// Splice a retranslated unit into its built map without repaginating
    fn patch_in_place(&mut self, unit: NodeId) -> bool {
        let doc = self.doc.read();
        let Some(index) = self.sections.section_of_node(&doc, unit) else {
            return false;
        };
        let source = match doc.kind(unit) {
            Some(NodeKind::Block { .. }) => doc.text_content(unit),
            Some(NodeKind::PrintPage { number }) => print_page_label(number),
            _ => return false,
        };
        let braille = doc.braille_text(unit).unwrap_or_default().to_owned();
        let braille_node = doc.braille_child(unit);
        drop(doc);

        let Some(buffered) = self.sections.buffered_mut(index) else {
            return false;
        };
        let Some(entry_index) = buffered.map.find_node_index(unit, 0) else {
            return false;
        };
        let Some(entry) = buffered.map.get(entry_index) else {
            return false;
        };
        let source_range = entry.range(View::Source);
        let braille_range = entry.range(View::Braille);

        let resized = buffered
            .map
            .resize_entry(entry_index, View::Source, source.len())
            .and_then(|()| {
                buffered
                    .map
                    .resize_entry(entry_index, View::Braille, braille.len())
            });
        if let Err(e) = resized {
            warn!("In-place patch of {unit} failed: {e}");
            return false;
        }
        buffered.views.source.replace_range(source_range, &source);
        buffered.views.braille.replace_range(braille_range, &braille);
        if let Some(span) = buffered
            .map
            .get_mut(entry_index)
            .and_then(|e| e.braille.last_mut())
        {
            span.node = braille_node;
        }
        debug!("Patched {unit} in place in section {index}");

        self.observer.repaint(index, buffered);
        true
    }

    /// Dispatch a partial run and wait until the views can be rebuilt.
    /// Sections from the one holding `edited` on are rebuilt.
    fn reformat_from(
        &mut self,
        anchor: NodeId,
        print_page: Option<NodeId>,
        edited: NodeId,
    ) -> Result<EditPath, SessionError> {
        let mut edited = edited;
        let request = {
            let doc = self.doc.read();
            let order = doc.order_positions();
            let position = |n: NodeId| order.get(&n).copied().unwrap_or(usize::MAX);

            let (anchor, print_page) = match self.interrupted_anchor.take() {
                Some(earlier)
                    if doc.is_attached(earlier) && position(earlier) < position(anchor) =>
                {
                    edited = earlier;
                    let print_page = print_page_before(&doc, earlier);
                    (earlier, print_page)
                }
                _ => (anchor, print_page),
            };
            let before = self.pages_before(&doc, position(anchor), &order);
            ReformatRequest::new(anchor, print_page)
                .with_page_budget(before, self.sections.pages_in_view())
        };
        let first_section = self
            .section_of_node(edited)
            .unwrap_or(self.current_section);

        self.observer.set_busy(true);
        let ticket = match self.reformatter.start_format(request) {
            Ok(ticket) => ticket,
            Err(e) => {
                self.observer.set_busy(false);
                return Err(e.into());
            }
        };

        if ticket.wait_enough() {
            let rebuilt = self.rebuild_from(first_section);
            ticket.resume();
            self.ticket = Some(ticket);
            self.pending_rebuild = Some(first_section);
            self.observer.set_busy(false);
            rebuilt?;
        } else {
            let result = ticket.wait_done();
            self.observer.set_busy(false);
            let recovered = !matches!(
                &result,
                Ok(ReformatResult {
                    outcome: ReformatOutcome::Completed | ReformatOutcome::Interrupted,
                    ..
                })
            );
            self.pending_rebuild = Some(first_section);
            self.finish(result, true)?;
            if recovered {
                return Ok(EditPath::WholeDocument);
            }
        }
        Ok(EditPath::Partial)
    }

    /// Pages of the visible sections that come before a tree position
    fn pages_before(
        &self,
        doc: &Document,
        position: usize,
        order: &HashMap<NodeId, usize>,
    ) -> u32 {
        let count = self
            .sections
            .visible()
            .into_iter()
            .filter_map(|i| self.sections.section(i))
            .flat_map(|s| doc.descendants(s.node()))
            .filter(|&n| doc.kind(n).is_some_and(NodeKind::is_page_break))
            .filter(|n| order.get(n).is_some_and(|&p| p < position))
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Block until the in-flight run, if any, is over.
    ///
    /// With `update_map` the sections it touched are rebuilt afterwards.
    pub fn wait_for_formatting(&mut self, update_map: bool) -> Result<(), SessionError> {
        let Some(ticket) = self.ticket.take() else {
            if update_map {
                if let Some(first) = self.pending_rebuild.take() {
                    self.rebuild_from(first)?;
                }
            }
            return Ok(());
        };
        self.observer.set_busy(true);
        let result = ticket.wait_done();
        self.observer.set_busy(false);
        self.finish(result, update_map)
    }

    /// Non-blocking check; true when a run finished and was applied
    pub fn poll_formatting(&mut self) -> Result<bool, SessionError> {
        let Some(result) = self.ticket.as_ref().and_then(FormatTicket::try_done) else {
            return Ok(false);
        };
        self.ticket = None;
        self.finish(Ok(result), true)?;
        Ok(true)
    }

    /// Cancel the in-flight run and wait for the worker to acknowledge
    pub fn stop_formatting(&mut self) -> Result<(), SessionError> {
        let Some(ticket) = self.ticket.take() else {
            return Ok(());
        };
        self.reformatter.stop_format();
        let result = ticket.wait_done();
        self.finish(result, false)
    }

    fn finish(
        &mut self,
        result: Result<ReformatResult, RecvError>,
        update_map: bool,
    ) -> Result<(), SessionError> {
        self.reformatter.acknowledge();
        let result = match result {
            Ok(result) => result,
            Err(_) => {
                error!("Reformat worker went away without a result");
                return self.recover(FormatterFailure::new(
                    "reformat worker disconnected",
                    Recovery::ReformatWholeDocument,
                ));
            }
        };

        match result.outcome {
            ReformatOutcome::Completed => {
                debug!(
                    "Reformat from {} completed after {} page(s)",
                    result.request.start, result.pages_seen
                );
                self.sections.refresh_page_counts(&self.doc.read());
                self.snapshot = self.doc.snapshot();
                if update_map {
                    if let Some(first) = self.pending_rebuild.take() {
                        self.rebuild_from(first)?;
                    }
                }
                Ok(())
            }
            ReformatOutcome::Interrupted => {
                let anchor = result.request.start;
                let doc = self.doc.read();
                let order = doc.order_positions();
                let earliest = match self.interrupted_anchor {
                    Some(previous)
                        if order.get(&previous).is_some_and(|p| {
                            order.get(&anchor).is_none_or(|a| p < a)
                        }) =>
                    {
                        previous
                    }
                    _ => anchor,
                };
                drop(doc);
                info!("Reformat from {anchor} interrupted");
                self.interrupted_anchor = Some(earliest);
                Ok(())
            }
            ReformatOutcome::Failed(failure) => self.recover(failure),
        }
    }

    /// Synchronous full run on the interactive thread
    fn format_whole(&mut self) -> Result<(), SessionError> {
        info!("Reformatting the whole document");
        let formatted = self.engine.format(&mut self.doc.write(), &mut NoProgress);
        if let Err(e) = formatted {
            return self.recover(FormatterFailure::new(
                e.to_string(),
                Recovery::RestoreSnapshot,
            ));
        }
        self.interrupted_anchor = None;
        self.pending_rebuild = None;
        self.reindex()?;
        self.snapshot = self.doc.snapshot();
        Ok(())
    }

    /// Re-read sections after a whole-document change and show the current one
    fn reindex(&mut self) -> Result<(), SessionError> {
        self.sections.rediscover(&self.doc.read());
        let last = self.sections.len().saturating_sub(1);
        self.show_section(self.current_section.min(last))
    }

    /// Try the recovery a failure asks for, once
    fn recover(&mut self, failure: FormatterFailure) -> Result<(), SessionError> {
        warn!(
            "Formatter failure '{}', recovering with {:?}",
            failure.message, failure.recovery
        );
        self.interrupted_anchor = None;
        self.pending_rebuild = None;
        let attempt = match failure.recovery {
            Recovery::ReformatWholeDocument => {
                let formatted = self.engine.format(&mut self.doc.write(), &mut NoProgress);
                formatted
                    .map_err(SessionError::from)
                    .and_then(|()| self.reindex())
                    .map(|()| "The document was reformatted after a formatting error")
            }
            Recovery::RestoreSnapshot => {
                self.doc.replace(self.snapshot.clone());
                self.reindex()
                    .map(|()| "The document was auto-repaired from its last good state")
            }
        };

        match attempt {
            Ok(message) => {
                self.snapshot = self.doc.snapshot();
                self.observer.notify(Notification::warning(message));
                Ok(())
            }
            Err(e) => {
                error!("Recovery failed: {e}");
                self.observer.notify(Notification::error(format!(
                    "Could not recover from a formatting error: {e}"
                )));
                Err(SessionError::Unrecoverable {
                    failure,
                    detail: e.to_string(),
                })
            }
        }
    }

    /// Stop any run and shut the worker down
    pub fn close(&mut self) -> Result<(), SessionError> {
        let stopped = self.stop_formatting();
        self.reformatter.close();
        stopped
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        if let Err(e) = self.stop_formatting() {
            warn!("Closing session with a failed reformat: {e}");
        }
    }
}

/// Page break a partial run can restart from, and the nearest print page
/// marker before it.
///
/// The break must have at least one unit between it and `unit`: a break
/// directly in front of a changed unit may itself move or disappear.
fn find_anchors(doc: &Document, unit: NodeId) -> Option<(NodeId, Option<NodeId>)> {
    let preorder = doc.preorder();
    let position = preorder.iter().position(|&n| n == unit)?;
    let units: HashSet<NodeId> = doc.flow_units(doc.root()).into_iter().collect();
    let mut passed_unit = false;
    let anchor = preorder[..position].iter().rev().copied().find(|&n| {
        if units.contains(&n) {
            passed_unit = true;
        }
        passed_unit && doc.kind(n).is_some_and(NodeKind::is_page_break)
    })?;
    Some((anchor, print_page_before(doc, anchor)))
}

/// Nearest print page marker before a node
fn print_page_before(doc: &Document, node: NodeId) -> Option<NodeId> {
    let preorder = doc.preorder();
    let position = preorder.iter().position(|&n| n == node)?;
    preorder[..position]
        .iter()
        .rev()
        .copied()
        .find(|&n| matches!(doc.kind(n), Some(NodeKind::PrintPage { .. })))
}
