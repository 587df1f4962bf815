use super::{Document, DocumentError, NodeId, NodeKind};

/// Structural edits the views can request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditOp {
    /// Replace the text of a block
    SetText { block: NodeId, text: String },
    /// Insert a new block after an existing node
    InsertBlock {
        after: NodeId,
        style: String,
        text: String,
    },
    /// Remove a node and its subtree
    RemoveNode { node: NodeId },
    /// Insert a print page marker before a node
    InsertPrintPage { before: NodeId, number: String },
    /// Replace the text of a table cell
    SetCellText { cell: NodeId, text: String },
}

impl EditOp {
    /// Apply the edit and return the nodes the session has to reconsider.
    ///
    /// Removal reports the former parent: the removed subtree is stale and
    /// cannot anchor a retranslation.
    pub fn apply(&self, doc: &mut Document) -> Result<Vec<NodeId>, DocumentError> {
        match self {
            Self::SetText { block, text } => {
                match doc.kind(*block) {
                    Some(NodeKind::Block { .. }) => {}
                    Some(_) => {
                        return Err(DocumentError::InvalidTarget {
                            node: *block,
                            what: "block text",
                        });
                    }
                    None => return Err(DocumentError::UnknownNode(*block)),
                }
                doc.set_text(*block, text)?;
                Ok(vec![*block])
            }

            Self::InsertBlock { after, style, text } => {
                let block = doc.insert_after(*after, NodeKind::block(style.as_str()))?;
                doc.append(block, NodeKind::text(text.as_str()))?;
                Ok(vec![block])
            }

            Self::RemoveNode { node } => {
                let parent = doc.parent(*node).ok_or(if doc.contains(*node) {
                    DocumentError::Detached(*node)
                } else {
                    DocumentError::UnknownNode(*node)
                })?;
                doc.detach(*node)?;
                Ok(vec![parent])
            }

            Self::InsertPrintPage { before, number } => {
                let marker = doc.insert_before(*before, NodeKind::print_page(number.as_str()))?;
                Ok(vec![marker])
            }

            Self::SetCellText { cell, text } => {
                if doc.kind(*cell) != Some(&NodeKind::TableCell) {
                    return Err(DocumentError::InvalidTarget {
                        node: *cell,
                        what: "cell text",
                    });
                }
                doc.set_text(*cell, text)?;
                Ok(vec![*cell])
            }
        }
    }
}
