//! Reformat request, result and per-cycle signal types

use flume::{Receiver, RecvError, Sender, TryRecvError};
use serde::Serialize;

use crate::document::NodeId;

/// A partial run anchored at a page break
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReformatRequest {
    /// Page break the run restarts pagination from
    pub start: NodeId,
    /// Nearest print page marker before the anchor
    pub print_page: Option<NodeId>,
    /// Pages of the visible window that precede the anchor
    pub pages_before_anchor: u32,
    /// Pages the views need regenerated before they can repaint
    pub max_pages: u32,
}

impl ReformatRequest {
    #[must_use]
    pub const fn new(start: NodeId, print_page: Option<NodeId>) -> Self {
        Self {
            start,
            print_page,
            pages_before_anchor: 0,
            max_pages: 0,
        }
    }

    #[must_use]
    pub const fn with_page_budget(mut self, pages_before_anchor: u32, max_pages: u32) -> Self {
        self.pages_before_anchor = pages_before_anchor;
        self.max_pages = max_pages;
        self
    }
}

/// How the session should recover from a failed run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Recovery {
    ReformatWholeDocument,
    RestoreSnapshot,
}

/// A run that failed for a reason other than cancellation
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct FormatterFailure {
    pub message: String,
    pub recovery: Recovery,
}

impl FormatterFailure {
    pub fn new(message: impl Into<String>, recovery: Recovery) -> Self {
        Self {
            message: message.into(),
            recovery,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReformatOutcome {
    Completed,
    Interrupted,
    Failed(FormatterFailure),
}

/// Sent once per accepted request when the worker is done with it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReformatResult {
    pub request: ReformatRequest,
    pub outcome: ReformatOutcome,
    /// Page boundaries the run passed
    pub pages_seen: u32,
}

impl ReformatResult {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.outcome == ReformatOutcome::Completed
    }
}

/// The signals of one reformat cycle.
///
/// `enough` fires once the run has regenerated the pages the views need, or
/// when it completes. The worker then waits for `resume` before mutating the
/// tree again. `done` carries the result.
#[derive(Debug)]
pub struct FormatTicket {
    pub(super) enough: Receiver<u32>,
    pub(super) resume: Sender<()>,
    pub(super) done: Receiver<ReformatResult>,
}

impl FormatTicket {
    /// Block until the worker has produced enough pages.
    ///
    /// Returns false when the run ended without signalling, i.e. it was
    /// interrupted or failed.
    pub fn wait_enough(&self) -> bool {
        self.enough.recv().is_ok()
    }

    /// Let a parked worker continue
    pub fn resume(&self) {
        let _ = self.resume.send(());
    }

    /// Block until the run is over
    pub fn wait_done(self) -> Result<ReformatResult, RecvError> {
        let Self {
            enough,
            resume,
            done,
        } = self;
        drop(resume);
        drop(enough);
        done.recv()
    }

    /// The result if the run is already over
    pub fn try_done(&self) -> Option<ReformatResult> {
        match self.done.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}
