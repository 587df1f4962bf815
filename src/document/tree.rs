use std::collections::HashMap;

use super::DocumentError;
use super::node::{Node, NodeId, NodeKind};

/// Arena-backed document tree.
///
/// Cloning the tree is how edit cycles take their snapshot: node ids stay
/// valid across the clone, so a restored snapshot can be addressed with the
/// same handles the views already hold.
#[derive(Clone, Debug)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    revision: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(NodeKind::Root)],
            root: NodeId(0),
            revision: 0,
        }
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Bumped on every structural or content mutation
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Nodes allocated in the arena, detached ones included
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    #[must_use]
    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.nodes.get(id.index()).map(|n| &n.kind)
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.index()).and_then(|n| n.parent)
    }

    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.index())
            .map_or(&[][..], |n| n.children.as_slice())
    }

    /// True when the node is reachable from the root
    #[must_use]
    pub fn is_attached(&self, id: NodeId) -> bool {
        if !self.contains(id) {
            return false;
        }
        let mut cursor = id;
        loop {
            if cursor == self.root {
                return true;
            }
            match self.parent(cursor) {
                Some(parent) => cursor = parent,
                None => return false,
            }
        }
    }

    /// The node itself followed by its parent chain up to the root
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.contains(id).then_some(id), move |&n| self.parent(n))
    }

    /// Descendants in document order, excluding the node itself
    #[must_use]
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Every attached node in document order, root first
    #[must_use]
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut out = vec![self.root];
        out.extend(self.descendants(self.root));
        out
    }

    /// Document-order position of every attached node
    #[must_use]
    pub fn order_positions(&self) -> HashMap<NodeId, usize> {
        self.preorder()
            .into_iter()
            .enumerate()
            .map(|(pos, id)| (id, pos))
            .collect()
    }

    /// Block nodes in document order
    #[must_use]
    pub fn blocks(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|&id| matches!(self.kind(id), Some(NodeKind::Block { .. })))
            .collect()
    }

    /// Translatable units in document order; tables are not descended into
    #[must_use]
    pub fn flow_units(&self, within: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_units(within, &mut out);
        out
    }

    fn collect_units(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for &child in self.children(id) {
            match self.kind(child) {
                Some(kind) if kind.is_translatable() => out.push(child),
                Some(kind) if kind.is_container() => self.collect_units(child, out),
                _ => {}
            }
        }
    }

    #[must_use]
    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|&c| c == id)
    }

    #[must_use]
    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let index = self.index_in_parent(id)?;
        index
            .checked_sub(1)
            .map(|i| self.children(parent)[i])
    }

    #[must_use]
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let index = self.index_in_parent(id)?;
        self.children(parent).get(index + 1).copied()
    }

    /// Concatenated text of all `Text` descendants, braille output excluded
    #[must_use]
    pub fn text_content(&self, id: NodeId) -> String {
        if let Some(NodeKind::Text(text)) = self.kind(id) {
            return text.clone();
        }
        self.descendants(id)
            .into_iter()
            .filter_map(|d| match self.kind(d) {
                Some(NodeKind::Text(text)) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn braille_child(&self, id: NodeId) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|&c| matches!(self.kind(c), Some(NodeKind::Braille(_))))
    }

    #[must_use]
    pub fn braille_text(&self, id: NodeId) -> Option<&str> {
        match self.kind(self.braille_child(id)?) {
            Some(NodeKind::Braille(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Lines occupied by a unit's transcription, at least one
    #[must_use]
    pub fn braille_lines(&self, unit: NodeId) -> usize {
        let count = |text: &str| text.lines().count().max(1);
        match self.kind(unit) {
            Some(NodeKind::Table) => self
                .descendants(unit)
                .into_iter()
                .filter(|&d| matches!(self.kind(d), Some(NodeKind::TableCell)))
                .map(|cell| self.braille_text(cell).map_or(1, count))
                .sum::<usize>()
                .max(1),
            _ => self.braille_text(unit).map_or(1, count),
        }
    }

    /// Create a detached node
    pub fn create(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(kind));
        self.revision += 1;
        id
    }

    pub fn append(&mut self, parent: NodeId, kind: NodeKind) -> Result<NodeId, DocumentError> {
        self.check_attached(parent)?;
        let id = self.create(kind);
        self.link(parent, id, None);
        Ok(id)
    }

    pub fn insert_before(
        &mut self,
        sibling: NodeId,
        kind: NodeKind,
    ) -> Result<NodeId, DocumentError> {
        let (parent, index) = self.slot_of(sibling)?;
        let id = self.create(kind);
        self.link(parent, id, Some(index));
        Ok(id)
    }

    pub fn insert_after(
        &mut self,
        sibling: NodeId,
        kind: NodeKind,
    ) -> Result<NodeId, DocumentError> {
        let (parent, index) = self.slot_of(sibling)?;
        let id = self.create(kind);
        self.link(parent, id, Some(index + 1));
        Ok(id)
    }

    /// Unlink a node from its parent. The subtree stays in the arena.
    pub fn detach(&mut self, id: NodeId) -> Result<(), DocumentError> {
        if id == self.root {
            return Err(DocumentError::RootImmutable);
        }
        let (parent, index) = self.slot_of(id)?;
        self.nodes[parent.index()].children.remove(index);
        self.nodes[id.index()].parent = None;
        self.revision += 1;
        Ok(())
    }

    pub fn set_kind(&mut self, id: NodeId, kind: NodeKind) -> Result<(), DocumentError> {
        let node = self
            .nodes
            .get_mut(id.index())
            .ok_or(DocumentError::UnknownNode(id))?;
        node.kind = kind;
        self.revision += 1;
        Ok(())
    }

    /// Replace the text of a block or cell with a single `Text` child,
    /// keeping any attached braille output in place.
    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<(), DocumentError> {
        self.check_attached(id)?;
        match self.kind(id) {
            Some(NodeKind::Block { .. } | NodeKind::TableCell) => {}
            Some(NodeKind::Text(_)) => return self.set_kind(id, NodeKind::text(text)),
            _ => {
                return Err(DocumentError::InvalidTarget {
                    node: id,
                    what: "text",
                });
            }
        }
        let texts: Vec<NodeId> = self
            .children(id)
            .iter()
            .copied()
            .filter(|&c| matches!(self.kind(c), Some(NodeKind::Text(_))))
            .collect();
        if let [only] = texts.as_slice() {
            return self.set_kind(*only, NodeKind::text(text));
        }
        for child in texts {
            self.detach(child)?;
        }
        let fresh = self.create(NodeKind::text(text));
        self.link(id, fresh, Some(0));
        Ok(())
    }

    /// Store a unit's braille output, rewriting its `Braille` child when it
    /// already has one. Returns the `Braille` node.
    pub fn set_braille(&mut self, id: NodeId, braille: String) -> Result<NodeId, DocumentError> {
        self.check_attached(id)?;
        if let Some(existing) = self.braille_child(id) {
            self.set_kind(existing, NodeKind::Braille(braille))?;
            return Ok(existing);
        }
        let fresh = self.create(NodeKind::Braille(braille));
        self.link(id, fresh, None);
        Ok(fresh)
    }

    fn check_attached(&self, id: NodeId) -> Result<(), DocumentError> {
        if !self.contains(id) {
            return Err(DocumentError::UnknownNode(id));
        }
        if !self.is_attached(id) {
            return Err(DocumentError::Detached(id));
        }
        Ok(())
    }

    fn slot_of(&self, id: NodeId) -> Result<(NodeId, usize), DocumentError> {
        if id == self.root {
            return Err(DocumentError::RootImmutable);
        }
        self.check_attached(id)?;
        let parent = self.parent(id).ok_or(DocumentError::Detached(id))?;
        let index = self
            .index_in_parent(id)
            .ok_or(DocumentError::Detached(id))?;
        Ok((parent, index))
    }

    fn link(&mut self, parent: NodeId, child: NodeId, at: Option<usize>) {
        let children = &mut self.nodes[parent.index()].children;
        match at {
            Some(index) if index <= children.len() => children.insert(index, child),
            _ => children.push(child),
        }
        self.nodes[child.index()].parent = Some(parent);
        self.revision += 1;
    }
}
