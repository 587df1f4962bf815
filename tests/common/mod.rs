#![allow(dead_code)]

use std::ops::Range;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use dotweaver::document::{Document, NodeId, NodeKind, SharedDocument};
use dotweaver::engine::{
    EngineConfig, FormatError, FormatProgress, GradeOneEngine, Interrupted, Transcriber,
};
use dotweaver::manager::SessionConfig;
use dotweaver::map::{ElementMap, EntryKind, View};
use dotweaver::reformatter::{ReformatRequest, SchedulerConfig};

pub const LONG_TEXT: &str = "this paragraph now runs across several braille lines of text";

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        cells_per_line: 20,
        lines_per_page: 3,
    }
}

pub fn session_config() -> SessionConfig {
    SessionConfig {
        window_size: 3,
        scheduler: SchedulerConfig {
            poll_interval: Duration::from_millis(20),
            safety_margin: 2,
        },
        engine: engine_config(),
    }
}

/// Sections opening with a print page marker followed by short paragraphs
pub fn sectioned(sections: usize, paragraphs: usize) -> (Document, Vec<Vec<NodeId>>) {
    let mut doc = Document::new();
    let mut blocks = Vec::new();
    for s in 0..sections {
        let section = doc.append(doc.root(), NodeKind::Section).unwrap();
        doc.append(section, NodeKind::print_page((s + 1).to_string()))
            .unwrap();
        let mut in_section = Vec::new();
        for p in 0..paragraphs {
            let block = doc.append(section, NodeKind::block("p")).unwrap();
            doc.append(block, NodeKind::text(format!("para {s} {p}")))
                .unwrap();
            in_section.push(block);
        }
        blocks.push(in_section);
    }
    (doc, blocks)
}

/// Paragraphs directly under the root
pub fn flat(paragraphs: usize) -> (Document, Vec<NodeId>) {
    let mut doc = Document::new();
    let blocks = (0..paragraphs)
        .map(|p| {
            let block = doc.append(doc.root(), NodeKind::block("p")).unwrap();
            doc.append(block, NodeKind::text(format!("para {p}")))
                .unwrap();
            block
        })
        .collect();
    (doc, blocks)
}

/// Page breaks in document order
pub fn page_breaks(doc: &Document) -> Vec<(u32, Option<String>)> {
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

/// Pagination a whole-document run would produce for the same tree
pub fn fully_paginated(doc: &Document) -> Vec<(u32, Option<String>)> {
    let mut copy = doc.clone();
    GradeOneEngine::new(engine_config())
        .format(&mut copy, &mut dotweaver::engine::NoProgress)
        .unwrap();
    page_breaks(&copy)
}

/// Map contents without node ids, which differ between equivalent runs
pub fn shape(map: &ElementMap) -> Vec<(EntryKind, Range<usize>, Range<usize>)> {
    map.iter()
        .map(|e| (e.kind.clone(), e.range(View::Source), e.range(View::Braille)))
        .collect()
}

struct Slow<'a> {
    inner: &'a mut dyn FormatProgress,
    delay: Duration,
}

impl FormatProgress for Slow<'_> {
    fn on_node_updated(&mut self, node: NodeId, page_boundary: bool) -> Result<(), Interrupted> {
        thread::sleep(self.delay);
        self.inner.on_node_updated(node, page_boundary)
    }

    fn on_run_complete(&mut self, root: NodeId) {
        self.inner.on_run_complete(root);
    }
}

/// Grade 1 engine whose partial runs take `delay` per node and which
/// records every unit list it was asked to translate
pub struct ThrottledEngine {
    inner: GradeOneEngine,
    delay: Duration,
    translated: Mutex<Vec<Vec<NodeId>>>,
}

impl ThrottledEngine {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: GradeOneEngine::new(engine_config()),
            delay,
            translated: Mutex::new(Vec::new()),
        }
    }

    pub fn translated(&self) -> Vec<Vec<NodeId>> {
        self.translated.lock().unwrap().clone()
    }
}

impl Transcriber for ThrottledEngine {
    fn format(
        &self,
        doc: &mut Document,
        progress: &mut dyn FormatProgress,
    ) -> Result<(), FormatError> {
        self.inner.format(doc, progress)
    }

    fn partial_format(
        &self,
        doc: &SharedDocument,
        request: &ReformatRequest,
        progress: &mut dyn FormatProgress,
    ) -> Result<(), FormatError> {
        let mut slow = Slow {
            inner: progress,
            delay: self.delay,
        };
        self.inner.partial_format(doc, request, &mut slow)
    }

    fn translate_and_replace(
        &self,
        doc: &mut Document,
        units: &[NodeId],
    ) -> Result<Vec<NodeId>, FormatError> {
        self.translated.lock().unwrap().push(units.to_vec());
        self.inner.translate_and_replace(doc, units)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    Healthy,
    /// Partial runs return an error
    PartialFails,
    /// Partial runs panic on the worker thread
    PartialPanics,
    /// Partial and whole-document runs both return errors
    EverythingFails,
}

/// Grade 1 engine that can be switched into a failure mode after the
/// session opened
pub struct FaultyEngine {
    inner: GradeOneEngine,
    fault: Mutex<Fault>,
}

impl FaultyEngine {
    pub fn new() -> Self {
        Self {
            inner: GradeOneEngine::new(engine_config()),
            fault: Mutex::new(Fault::Healthy),
        }
    }

    pub fn set_fault(&self, fault: Fault) {
        *self.fault.lock().unwrap() = fault;
    }

    fn fault(&self) -> Fault {
        *self.fault.lock().unwrap()
    }
}

impl Transcriber for FaultyEngine {
    fn format(
        &self,
        doc: &mut Document,
        progress: &mut dyn FormatProgress,
    ) -> Result<(), FormatError> {
        match self.fault() {
            Fault::EverythingFails => Err(FormatError::failed("engine offline")),
            _ => self.inner.format(doc, progress),
        }
    }

    fn partial_format(
        &self,
        doc: &SharedDocument,
        request: &ReformatRequest,
        progress: &mut dyn FormatProgress,
    ) -> Result<(), FormatError> {
        match self.fault() {
            Fault::Healthy => self.inner.partial_format(doc, request, progress),
            Fault::PartialFails | Fault::EverythingFails => {
                Err(FormatError::failed("partial run refused"))
            }
            Fault::PartialPanics => panic!("engine crashed mid-run"),
        }
    }

    fn translate_and_replace(
        &self,
        doc: &mut Document,
        units: &[NodeId],
    ) -> Result<Vec<NodeId>, FormatError> {
        self.inner.translate_and_replace(doc, units)
    }
}
