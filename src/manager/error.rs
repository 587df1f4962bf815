use crate::document::DocumentError;
use crate::engine::FormatError;
use crate::reformatter::{FormatterFailure, ReformatError};
use crate::sections::SectionError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a reformat was requested while another one is in flight")]
    IllegalReformatState,

    #[error("edit failed: {0}")]
    Editing(#[source] DocumentError),

    #[error(transparent)]
    Formatter(#[from] FormatError),

    #[error("could not recover from '{failure}': {detail}")]
    Unrecoverable {
        failure: FormatterFailure,
        detail: String,
    },

    #[error(transparent)]
    Reformatter(ReformatError),

    #[error(transparent)]
    Section(#[from] SectionError),
}

impl From<ReformatError> for SessionError {
    fn from(err: ReformatError) -> Self {
        match err {
            ReformatError::IllegalState => Self::IllegalReformatState,
            other => Self::Reformatter(other),
        }
    }
}
