mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use dotweaver::document::{Document, EditOp, NodeId, NodeKind, SharedDocument};
use dotweaver::engine::{GradeOneEngine, NoProgress, Transcriber};
use dotweaver::layout::build_section;
use dotweaver::manager::{EditPath, Manager, RecordingObserver, SessionError};
use dotweaver::map::View;
use dotweaver::reformatter::ReformatRequest;

use common::{
    Fault, FaultyEngine, LONG_TEXT, ThrottledEngine, engine_config, flat, fully_paginated,
    page_breaks, sectioned, session_config, shape,
};

const TWO_LINES: &str = "a paragraph long enough to wrap";

fn open(doc: Document) -> (Manager, RecordingObserver) {
    let observer = RecordingObserver::new();
    let manager =
        Manager::with_grade_one(doc, session_config(), Box::new(observer.clone())).unwrap();
    (manager, observer)
}

fn open_throttled(doc: Document, delay: Duration) -> (Manager, Arc<ThrottledEngine>) {
    let engine = Arc::new(ThrottledEngine::new(delay));
    let manager = Manager::new(
        doc,
        engine.clone(),
        session_config(),
        Box::new(RecordingObserver::new()),
    )
    .unwrap();
    (manager, engine)
}

fn open_faulty(doc: Document) -> (Manager, Arc<FaultyEngine>, RecordingObserver) {
    let engine = Arc::new(FaultyEngine::new());
    let observer = RecordingObserver::new();
    let manager = Manager::new(
        doc,
        engine.clone(),
        session_config(),
        Box::new(observer.clone()),
    )
    .unwrap();
    (manager, engine, observer)
}

fn set_text(block: NodeId, text: &str) -> EditOp {
    EditOp::SetText {
        block,
        text: text.to_string(),
    }
}

#[test]
fn keystroke_in_single_section_is_patched_in_place() {
    let (doc, blocks) = flat(6);
    let (mut manager, _) = open(doc);

    let map = manager.element_map().unwrap().clone();
    let edited = map.find_node_index(blocks[2], 0).unwrap();
    let next = map.find_node_index(blocks[3], 0).unwrap();
    let old_braille = map.get(edited).unwrap().len(View::Braille);

    let path = manager.apply_edit(&set_text(blocks[2], "paragraph 2")).unwrap();
    assert_eq!(path, EditPath::InPlace);
    assert!(!manager.is_formatting());

    let patched = manager.element_map().unwrap();
    assert_eq!(patched.len(), map.len());
    assert!(patched.is_ordered());

    let new_braille = patched.get(edited).unwrap().len(View::Braille);
    let before = map.get(next).unwrap();
    let after = patched.get(next).unwrap();
    assert_eq!(after.start, before.start + 5);
    assert_eq!(
        after.range(View::Braille).start,
        before.range(View::Braille).start + new_braille - old_braille
    );

    let views = manager.views().unwrap();
    let entry = patched.get(edited).unwrap();
    assert_eq!(&views.source[entry.range(View::Source)], "paragraph 2");
}

#[test]
fn edit_in_second_section_reformats_partially() {
    let (doc, blocks) = sectioned(5, 6);
    let (mut manager, observer) = open(doc);
    manager.buffer_section(1).unwrap();
    let first_section = manager.sections().buffered(0).cloned();
    observer.clear();

    let path = manager.apply_edit(&set_text(blocks[1][3], LONG_TEXT)).unwrap();
    assert_eq!(path, EditPath::Partial);
    manager.wait_for_formatting(true).unwrap();

    let doc = manager.document().clone();
    assert_eq!(page_breaks(&doc), fully_paginated(&doc));

    let repaints = observer.repaints();
    assert!(!repaints.is_empty());
    assert!(repaints.iter().all(|&s| s == 1), "repainted {repaints:?}");
    assert_eq!(manager.sections().buffered(0).cloned(), first_section);
    for untouched in 2..5 {
        assert!(!manager.sections().section(untouched).unwrap().is_buffered());
    }

    let map = manager.element_map().unwrap();
    assert!(map.is_ordered());
    let entry = map.get(map.find_node_index(blocks[1][3], 0).unwrap()).unwrap();
    assert_eq!(
        &manager.views().unwrap().source[entry.range(View::Source)],
        LONG_TEXT
    );
}

#[test]
fn shrinking_a_unit_behind_a_page_break_drops_the_break() {
    let (mut doc, blocks) = sectioned(3, 6);
    doc.set_text(blocks[1][0], TWO_LINES).unwrap();
    let (mut manager, _) = open(doc);
    {
        let doc = manager.document();
        let previous = doc.previous_sibling(blocks[1][0]).unwrap();
        assert!(doc.kind(previous).is_some_and(NodeKind::is_page_break));
    }

    let path = manager.apply_edit(&set_text(blocks[1][0], "short")).unwrap();
    assert_eq!(path, EditPath::Partial);
    manager.wait_for_formatting(true).unwrap();

    let doc = manager.document().clone();
    assert_eq!(page_breaks(&doc), fully_paginated(&doc));
    let previous = doc.previous_sibling(blocks[1][0]).unwrap();
    assert!(!doc.kind(previous).is_some_and(NodeKind::is_page_break));
}

#[test]
fn failed_partial_run_reformats_the_whole_document() {
    let (doc, blocks) = sectioned(5, 6);
    let (mut manager, engine, observer) = open_faulty(doc);
    manager.buffer_section(1).unwrap();
    engine.set_fault(Fault::PartialFails);

    let path = manager.apply_edit(&set_text(blocks[1][3], LONG_TEXT)).unwrap();

    assert_eq!(path, EditPath::WholeDocument);
    assert!(!manager.is_formatting());
    assert_eq!(
        observer.messages(),
        vec!["The document was reformatted after a formatting error"]
    );
    let doc = manager.document().clone();
    assert_eq!(doc.text_content(blocks[1][3]), LONG_TEXT);
    assert_eq!(page_breaks(&doc), fully_paginated(&doc));
    assert!(manager.element_map().unwrap().is_ordered());
}

#[test]
fn engine_panic_restores_the_last_good_tree() {
    let (doc, blocks) = sectioned(5, 6);
    let (mut manager, engine, observer) = open_faulty(doc);
    manager.buffer_section(1).unwrap();
    engine.set_fault(Fault::PartialPanics);

    let path = manager.apply_edit(&set_text(blocks[1][3], LONG_TEXT)).unwrap();

    assert_eq!(path, EditPath::WholeDocument);
    assert_eq!(
        observer.messages(),
        vec!["The document was auto-repaired from its last good state"]
    );
    assert_eq!(manager.document().text_content(blocks[1][3]), "para 1 3");
    let views = manager.views().unwrap();
    assert!(!views.source.contains(LONG_TEXT));

    engine.set_fault(Fault::Healthy);
    let path = manager.apply_edit(&set_text(blocks[1][3], LONG_TEXT)).unwrap();
    assert_eq!(path, EditPath::Partial);
    manager.wait_for_formatting(true).unwrap();
    let doc = manager.document().clone();
    assert_eq!(page_breaks(&doc), fully_paginated(&doc));
}

#[test]
fn failed_recovery_is_unrecoverable() {
    let (doc, blocks) = sectioned(5, 6);
    let (mut manager, engine, observer) = open_faulty(doc);
    engine.set_fault(Fault::EverythingFails);

    let err = manager
        .apply_edit(&set_text(blocks[1][3], LONG_TEXT))
        .unwrap_err();

    assert!(matches!(err, SessionError::Unrecoverable { .. }), "{err:?}");
    let messages = observer.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Could not recover from a formatting error"));
}

#[test]
fn removing_the_only_child_reformats_everything() {
    let (doc, blocks) = flat(1);
    let (mut manager, _) = open(doc);

    let path = manager
        .apply_edit(&EditOp::RemoveNode { node: blocks[0] })
        .unwrap();

    assert_eq!(path, EditPath::WholeDocument);
    assert!(manager.element_map().unwrap().is_empty());
    assert_eq!(manager.views().unwrap().source, "");
    assert!(manager.page_indicators().is_empty());
}

#[test]
fn removing_a_section_reindexes_sections() {
    let (doc, _) = sectioned(3, 4);
    let (mut manager, _) = open(doc);
    let section = manager.sections().section(1).unwrap().node();

    let path = manager
        .apply_edit(&EditOp::RemoveNode { node: section })
        .unwrap();

    assert_eq!(path, EditPath::WholeDocument);
    assert_eq!(manager.sections().len(), 2);
    let doc = manager.document().clone();
    assert_eq!(page_breaks(&doc), fully_paginated(&doc));
}

#[test]
fn table_cell_edit_retranslates_the_whole_table() {
    let (mut doc, _) = flat(2);
    let table = doc.append(doc.root(), NodeKind::Table).unwrap();
    let mut cells = Vec::new();
    for r in 0..2 {
        let row = doc.append(table, NodeKind::TableRow).unwrap();
        for c in 0..2 {
            let cell = doc.append(row, NodeKind::TableCell).unwrap();
            doc.append(cell, NodeKind::text(format!("r{r}c{c}"))).unwrap();
            cells.push(cell);
        }
    }
    let (mut manager, engine) = open_throttled(doc, Duration::ZERO);

    manager
        .apply_edit(&EditOp::SetCellText {
            cell: cells[3],
            text: "new".into(),
        })
        .unwrap();

    assert_eq!(engine.translated().last(), Some(&vec![table]));
    assert_eq!(manager.document().braille_text(cells[3]), Some("⠝⠑⠺"));
    assert!(manager.views().unwrap().source.contains("new"));
}

#[test]
fn second_edit_stops_the_first_run() {
    let (doc, blocks) = sectioned(8, 20);
    let (mut manager, _) = open_throttled(doc, Duration::from_millis(10));
    manager.buffer_section(1).unwrap();

    let first = manager.apply_edit(&set_text(blocks[1][5], LONG_TEXT)).unwrap();
    assert_eq!(first, EditPath::Partial);
    assert!(manager.is_formatting());

    let second = manager.apply_edit(&set_text(blocks[1][10], LONG_TEXT)).unwrap();
    assert_eq!(second, EditPath::Partial);
    manager.wait_for_formatting(true).unwrap();
    assert!(!manager.is_formatting());

    let doc = manager.document().clone();
    assert_eq!(page_breaks(&doc), fully_paginated(&doc));
    assert!(manager.element_map().unwrap().is_ordered());
}

#[test]
fn cancel_then_restart_matches_an_uninterrupted_run() {
    let (doc, blocks) = sectioned(6, 20);
    let edited = blocks[1][4];

    let (mut interrupted, _) = open_throttled(doc.clone(), Duration::from_millis(5));
    interrupted.buffer_section(1).unwrap();
    interrupted.apply_edit(&set_text(edited, LONG_TEXT)).unwrap();
    interrupted.stop_formatting().unwrap();
    interrupted.handle_edit(&[edited], true).unwrap();
    interrupted.wait_for_formatting(true).unwrap();

    let (mut clean, _) = open(doc);
    clean.buffer_section(1).unwrap();
    clean.apply_edit(&set_text(edited, LONG_TEXT)).unwrap();
    clean.wait_for_formatting(true).unwrap();

    assert_eq!(
        page_breaks(&interrupted.document()),
        page_breaks(&clean.document())
    );
    assert_eq!(
        shape(interrupted.element_map().unwrap()),
        shape(clean.element_map().unwrap())
    );
}

#[test]
fn single_section_whole_document_matches_partial_run() {
    let (doc, blocks) = flat(12);
    let edited = blocks[7];

    let mut reference = doc.clone();
    let engine = GradeOneEngine::new(engine_config());
    engine.format(&mut reference, &mut NoProgress).unwrap();
    reference.set_text(edited, LONG_TEXT).unwrap();
    engine
        .translate_and_replace(&mut reference, &[edited])
        .unwrap();
    let anchor = {
        let order = reference.preorder();
        let position = order.iter().position(|&n| n == edited).unwrap();
        order[..position]
            .iter()
            .rev()
            .copied()
            .find(|&n| reference.kind(n).is_some_and(NodeKind::is_page_break))
            .unwrap()
    };
    let shared = SharedDocument::new(reference);
    engine
        .partial_format(&shared, &ReformatRequest::new(anchor, None), &mut NoProgress)
        .unwrap();
    let reference = shared.snapshot();
    let (expected, _) = build_section(&reference, reference.root()).unwrap();

    let (mut manager, _) = open(doc);
    let path = manager.apply_edit(&set_text(edited, LONG_TEXT)).unwrap();
    assert_eq!(path, EditPath::WholeDocument);
    assert_eq!(shape(manager.element_map().unwrap()), shape(&expected));
}

#[test]
fn close_while_busy_returns_promptly() {
    let (doc, blocks) = sectioned(8, 20);
    let (mut manager, _) = open_throttled(doc, Duration::from_millis(10));
    manager.buffer_section(1).unwrap();
    manager.apply_edit(&set_text(blocks[1][2], LONG_TEXT)).unwrap();
    assert!(manager.is_formatting());

    let started = Instant::now();
    manager.close().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!manager.is_formatting());
}

#[test]
fn window_never_exceeds_its_size() {
    let (doc, _) = sectioned(8, 4);
    let (mut manager, _) = open(doc);
    let walk: Vec<usize> = (0..8).chain((0..8).rev()).chain([3, 7, 0, 5, 5, 2]).collect();

    for index in walk {
        let map = manager.buffer_section(index).unwrap();
        assert!(map.is_ordered());
        assert!(manager.sections().materialized().len() <= 3);
        assert_eq!(manager.current_section(), index);
    }
}

#[test]
fn entries_resolve_to_their_sections() {
    let (doc, blocks) = sectioned(3, 2);
    let (mut manager, _) = open(doc);
    manager.buffer_section(2).unwrap();

    assert_eq!(manager.section_of_node(blocks[2][1]), Some(2));
    let map = manager.element_map().unwrap();
    let whitespace = map.iter().find(|e| e.is_whitespace()).unwrap();
    assert_eq!(manager.section_of_entry(whitespace), Some(2));
}
