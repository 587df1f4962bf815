//! Transcription engine interface and the bundled grade 1 engine

mod braille;
mod grade_one;

pub use braille::transcribe;
pub use grade_one::{EngineConfig, GradeOneEngine};

use crate::document::{Document, DocumentError, NodeId, SharedDocument};
use crate::reformatter::ReformatRequest;

/// Raised from a progress callback to abort the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("formatting run interrupted")]
pub struct Interrupted;

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("transcription failed: {detail}")]
    Failed { detail: String },
}

impl FormatError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed { detail: msg.into() }
    }
}

/// Per-run progress callbacks, passed into each run
pub trait FormatProgress {
    /// Called after the engine finishes a node, without holding the
    /// document lock. `page_boundary` marks page break nodes.
    fn on_node_updated(&mut self, node: NodeId, page_boundary: bool) -> Result<(), Interrupted>;

    /// Called once when the run walked to the end of the document
    fn on_run_complete(&mut self, _root: NodeId) {}
}

/// Progress sink for synchronous runs nobody needs to observe
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl FormatProgress for NoProgress {
    fn on_node_updated(&mut self, _node: NodeId, _page_boundary: bool) -> Result<(), Interrupted> {
        Ok(())
    }
}

/// The transcription engine the session drives.
///
/// `format` runs on the interactive thread with exclusive access.
/// `partial_format` runs on the reformat worker and must take the document
/// lock per node, releasing it before calling back into `progress`, so the
/// session can read a consistent tree while the worker is parked.
pub trait Transcriber: Send + Sync {
    /// Retranslate and repaginate the whole document
    fn format(&self, doc: &mut Document, progress: &mut dyn FormatProgress)
    -> Result<(), FormatError>;

    /// Repaginate from the request's start anchor to the end of the document
    fn partial_format(
        &self,
        doc: &SharedDocument,
        request: &ReformatRequest,
        progress: &mut dyn FormatProgress,
    ) -> Result<(), FormatError>;

    /// Retranslate the given units in place and return the translated units
    fn translate_and_replace(
        &self,
        doc: &mut Document,
        units: &[NodeId],
    ) -> Result<Vec<NodeId>, FormatError>;
}
