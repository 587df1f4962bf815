//! Document tree shared by both views

mod edit;
mod node;
mod shared;
mod tree;

pub use edit::EditOp;
pub use node::{NodeId, NodeKind};
pub use shared::SharedDocument;
pub use tree::Document;

/// Errors from structural tree operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("node {0} is detached from the document")]
    Detached(NodeId),

    #[error("the document root cannot be moved or removed")]
    RootImmutable,

    #[error("node {node} cannot hold {what}")]
    InvalidTarget { node: NodeId, what: &'static str },
}
