//! Reformat worker - runs in its own thread

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use super::request::{FormatterFailure, ReformatOutcome, ReformatRequest, ReformatResult, Recovery};
use super::{FormatState, SchedulerConfig, SchedulerShared};
use crate::document::{NodeId, SharedDocument};
use crate::engine::{FormatError, FormatProgress, Interrupted, Transcriber};
use crate::panic_handler::panic_message;

/// One accepted request together with the worker's ends of its signals
pub(super) struct Job {
    pub request: ReformatRequest,
    pub enough: Sender<u32>,
    pub resume: Receiver<()>,
    pub done: Sender<ReformatResult>,
}

/// Progress callback of one partial run.
///
/// Counts page boundaries and, at the threshold, signals `enough` and parks
/// until the session resumes it.
struct PageCounter<'a> {
    shared: &'a SchedulerShared,
    threshold: u32,
    pages: u32,
    enough: Option<Sender<u32>>,
    resume: &'a Receiver<()>,
    poll_interval: Duration,
}

impl PageCounter<'_> {
    fn signal_enough(&mut self) -> bool {
        match self.enough.take() {
            Some(tx) => {
                debug!("Enough pages regenerated ({})", self.pages);
                let _ = tx.send(self.pages);
                true
            }
            None => false,
        }
    }

    fn park(&self) -> Result<(), Interrupted> {
        loop {
            match self.resume.recv_timeout(self.poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(()),
                Err(RecvTimeoutError::Timeout) => {
                    if self.shared.is_cancelled() {
                        return Err(Interrupted);
                    }
                }
            }
        }
    }
}

impl FormatProgress for PageCounter<'_> {
    fn on_node_updated(&mut self, _node: NodeId, page_boundary: bool) -> Result<(), Interrupted> {
        if self.shared.is_cancelled() {
            return Err(Interrupted);
        }
        if page_boundary {
            self.pages += 1;
            if self.pages >= self.threshold && self.signal_enough() {
                self.park()?;
            }
        }
        Ok(())
    }

    fn on_run_complete(&mut self, _root: NodeId) {
        self.signal_enough();
    }
}

/// Main worker function - runs in a dedicated thread
#[allow(
    clippy::needless_pass_by_value,
    reason = "Values moved into thread, need ownership"
)]
pub(super) fn reformat_worker(
    engine: Arc<dyn Transcriber>,
    doc: SharedDocument,
    jobs: Receiver<Job>,
    shared: Arc<SchedulerShared>,
    config: SchedulerConfig,
) {
    info!("Reformat worker started");
    loop {
        let job = match jobs.recv_timeout(config.poll_interval) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => {
                if shared.is_closed() {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };
        run_job(engine.as_ref(), &doc, &shared, &config, job);
    }
    info!("Reformat worker stopped");
}

fn run_job(
    engine: &dyn Transcriber,
    doc: &SharedDocument,
    shared: &SchedulerShared,
    config: &SchedulerConfig,
    job: Job,
) {
    let Job {
        request,
        enough,
        resume,
        done,
    } = job;
    debug!(
        "Partial run from {} (print page {:?}, {} page(s) before, {} wanted)",
        request.start, request.print_page, request.pages_before_anchor, request.max_pages
    );

    let mut counter = PageCounter {
        shared,
        threshold: request
            .pages_before_anchor
            .saturating_add(request.max_pages)
            .saturating_add(config.safety_margin),
        pages: 0,
        enough: Some(enough),
        resume: &resume,
        poll_interval: config.poll_interval,
    };

    let outcome = if shared.is_cancelled() {
        ReformatOutcome::Interrupted
    } else {
        let run = catch_unwind(AssertUnwindSafe(|| {
            engine.partial_format(doc, &request, &mut counter)
        }));
        match run {
            Ok(Ok(())) => ReformatOutcome::Completed,
            Ok(Err(FormatError::Interrupted(_))) => ReformatOutcome::Interrupted,
            Ok(Err(e)) => {
                warn!("Partial run failed: {e}");
                ReformatOutcome::Failed(FormatterFailure::new(
                    e.to_string(),
                    Recovery::ReformatWholeDocument,
                ))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Transcription engine panicked: {message}");
                ReformatOutcome::Failed(FormatterFailure::new(
                    format!("transcription engine panicked: {message}"),
                    Recovery::RestoreSnapshot,
                ))
            }
        }
    };

    let pages_seen = counter.pages;
    drop(counter);
    shared.set_state(match outcome {
        ReformatOutcome::Completed => FormatState::Completed,
        ReformatOutcome::Interrupted => FormatState::Interrupted,
        ReformatOutcome::Failed(_) => FormatState::Failed,
    });
    debug!("Partial run finished: {outcome:?}");
    let _ = done.send(ReformatResult {
        request,
        outcome,
        pages_seen,
    });
}
