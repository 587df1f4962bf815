//! Which units an edit forces the engine to retranslate

use std::collections::HashSet;

use log::debug;

use crate::document::{Document, NodeId, NodeKind};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditPlan {
    /// Nothing translatable changed
    Nothing,
    /// The root itself changed
    WholeDocument,
    /// Units to retranslate, in document order
    Units(Vec<NodeId>),
}

/// Resolve changed nodes to the units that need retranslation.
///
/// Rules, first match wins: the root means the whole document; anything
/// inside a table means that table; a section or container means each unit
/// inside it; anything else means its nearest translatable ancestor.
#[must_use]
pub fn plan_edit(doc: &Document, changed: &[NodeId]) -> EditPlan {
    let mut units = Vec::new();
    let mut seen = HashSet::new();
    let mut add = |unit: NodeId, units: &mut Vec<NodeId>| {
        if seen.insert(unit) {
            units.push(unit);
        }
    };

    for &node in changed {
        if node == doc.root() {
            return EditPlan::WholeDocument;
        }
        if !doc.is_attached(node) {
            debug!("Ignoring stale node {node}");
            continue;
        }
        let Some(kind) = doc.kind(node) else {
            continue;
        };
        if kind.is_page_break() {
            continue;
        }

        if let Some(table) = doc
            .ancestors(node)
            .find(|&a| doc.kind(a) == Some(&NodeKind::Table))
        {
            add(table, &mut units);
        } else if kind.is_container() {
            for unit in doc.flow_units(node) {
                add(unit, &mut units);
            }
        } else if let Some(unit) = doc
            .ancestors(node)
            .find(|&a| doc.kind(a).is_some_and(NodeKind::is_translatable))
        {
            add(unit, &mut units);
        }
    }

    if units.is_empty() {
        return EditPlan::Nothing;
    }
    let order = doc.order_positions();
    units.sort_by_key(|unit| order.get(unit).copied().unwrap_or(usize::MAX));
    EditPlan::Units(units)
}
