mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use dotweaver::document::{Document, NodeId, NodeKind, SharedDocument};
use dotweaver::engine::{GradeOneEngine, NoProgress, Transcriber};
use dotweaver::reformatter::{
    FormatState, ReformatError, ReformatOutcome, ReformatRequest, Reformatter,
};

use common::{
    LONG_TEXT, ThrottledEngine, engine_config, fully_paginated, page_breaks, sectioned,
    session_config,
};

/// A formatted document with one paragraph lengthened but not yet
/// repaginated, and the page break a partial run should restart from
fn edited_document() -> (SharedDocument, NodeId) {
    let (mut doc, blocks) = sectioned(6, 20);
    let engine = GradeOneEngine::new(engine_config());
    engine.format(&mut doc, &mut NoProgress).unwrap();

    let edited = blocks[1][4];
    doc.set_text(edited, LONG_TEXT).unwrap();
    engine.translate_and_replace(&mut doc, &[edited]).unwrap();
    let anchor = preceding_break(&doc, edited);
    (SharedDocument::new(doc), anchor)
}

fn preceding_break(doc: &Document, node: NodeId) -> NodeId {
    let order = doc.preorder();
    let position = order.iter().position(|&n| n == node).unwrap();
    order[..position]
        .iter()
        .rev()
        .copied()
        .find(|&n| doc.kind(n).is_some_and(NodeKind::is_page_break))
        .unwrap()
}

fn spawn(doc: &SharedDocument, delay: Duration) -> Reformatter {
    Reformatter::spawn(
        Arc::new(ThrottledEngine::new(delay)),
        doc.clone(),
        session_config().scheduler,
    )
    .unwrap()
}

#[test]
fn one_request_in_flight_and_restart_after_stop() {
    let (doc, anchor) = edited_document();
    let reformatter = spawn(&doc, Duration::from_millis(5));
    let request = ReformatRequest::new(anchor, None).with_page_budget(0, 1);

    let ticket = reformatter.start_format(request.clone()).unwrap();
    assert!(matches!(
        reformatter.start_format(request.clone()),
        Err(ReformatError::IllegalState)
    ));
    assert!(reformatter.is_busy());

    reformatter.stop_format();
    let stopped = ticket.wait_done().unwrap();
    assert_ne!(reformatter.state(), FormatState::Busy);
    assert!(matches!(
        stopped.outcome,
        ReformatOutcome::Interrupted | ReformatOutcome::Completed
    ));
    reformatter.acknowledge();
    assert_eq!(reformatter.state(), FormatState::Idle);

    let ticket = reformatter.start_format(request).unwrap();
    assert!(ticket.wait_enough());
    ticket.resume();
    let result = ticket.wait_done().unwrap();
    assert!(result.is_completed());
    assert_eq!(reformatter.state(), FormatState::Completed);

    let doc = doc.snapshot();
    assert_eq!(page_breaks(&doc), fully_paginated(&doc));
}

#[test]
fn every_accepted_request_gets_one_result() {
    let (doc, anchor) = edited_document();
    let reformatter = spawn(&doc, Duration::ZERO);

    for _ in 0..3 {
        let ticket = reformatter
            .start_format(ReformatRequest::new(anchor, None))
            .unwrap();
        let result = ticket.wait_done().unwrap();
        assert!(result.is_completed());
        assert!(result.pages_seen > 0);
        reformatter.acknowledge();
    }
}

#[test]
fn close_interrupts_a_parked_run() {
    let (doc, anchor) = edited_document();
    let mut reformatter = spawn(&doc, Duration::from_millis(2));

    let ticket = reformatter
        .start_format(ReformatRequest::new(anchor, None).with_page_budget(0, 1))
        .unwrap();
    assert!(ticket.wait_enough());

    let started = Instant::now();
    reformatter.close();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(reformatter.is_closed());

    let result = ticket.wait_done().unwrap();
    assert_eq!(result.outcome, ReformatOutcome::Interrupted);
    assert!(matches!(
        reformatter.start_format(ReformatRequest::new(anchor, None)),
        Err(ReformatError::Closed)
    ));
}
