//! Numbers interactive nodes of the simplified tree and builds the selector map.

use std::collections::HashSet;

use tracing::debug;

use crate::judges;
use crate::model::{EnhancedTree, NodeId, SelectorMap, SimplifiedTree};

/// Assigns indices `1..=n` in document order to interactive nodes.
///
/// Indices are contiguous; excluded nodes are skipped without leaving a gap.
pub fn assign(
    tree: &EnhancedTree,
    simplified: &mut SimplifiedTree,
    excluded: &HashSet<NodeId>,
) -> SelectorMap {
    let mut map = SelectorMap::default();
    let mut next: u32 = 1;
    for id in simplified.preorder() {
        let node = simplified.get(id).node;
        if excluded.contains(&node) || !judges::is_interactive(tree, node) {
            continue;
        }
        simplified.set_index(id, next);
        map.insert(next, node);
        next += 1;
    }
    debug!(target: "perceiver.filter", indexed = map.len(), "selector map built");
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::fixture::TreeBuilder;
    use crate::model::Rect;

    #[test]
    fn indices_follow_document_order_and_skip_excluded() {
        let mut b = TreeBuilder::new();
        let doc = b.document();
        let first = b.element(doc, "button", &[]);
        b.layout(first, Rect::new(0.0, 0.0, 10.0, 10.0));
        let skipped = b.element(doc, "a", &[("href", "/")]);
        let plain = b.element(doc, "div", &[]);
        let last = b.element(plain, "input", &[]);

        let mut simplified = SimplifiedTree::default();
        let root = simplified.push(doc, None);
        let s_first = simplified.push(first, Some(root));
        simplified.push(skipped, Some(root));
        let s_plain = simplified.push(plain, Some(root));
        let s_last = simplified.push(last, Some(s_plain));

        let excluded: HashSet<NodeId> = [skipped].into_iter().collect();
        let map = assign(&b.tree, &mut simplified, &excluded);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(1), Some(first));
        assert_eq!(map.get(2), Some(last));
        assert_eq!(simplified.get(s_first).index, Some(1));
        assert_eq!(simplified.get(s_last).index, Some(2));
        assert_eq!(simplified.get(s_plain).index, None);
    }
}
