use std::collections::HashSet;

use super::{FilterStats, Verdict};
use crate::judges;
use crate::model::{EnhancedTree, NodeId};
use crate::policy::FilterPolicy;

/// Folds interactive nodes that sit inside the box of an interactive ancestor.
///
/// A `<span onclick>` filling an `<a href>` is the same target twice; the
/// ancestor keeps the index, the descendant is hoisted and returned so the
/// indexer never numbers it. Tags listed in `containment_exempt_tags` keep
/// their own index; none are listed by default.
pub(super) fn apply(
    tree: &EnhancedTree,
    policy: &FilterPolicy,
    verdicts: &mut [Verdict],
    stats: &mut FilterStats,
) -> HashSet<NodeId> {
    let mut excluded = HashSet::new();
    let Some(root) = tree.root() else {
        return excluded;
    };

    let mut stack: Vec<(NodeId, Option<NodeId>)> = vec![(root, None)];
    while let Some((id, owner)) = stack.pop() {
        if verdicts[id.0] == Verdict::Drop {
            continue;
        }
        let node = tree.node(id);
        let mut next_owner = owner;
        if verdicts[id.0] == Verdict::Keep && judges::is_interactive(tree, id) {
            let exempt = policy
                .containment_exempt_tags
                .iter()
                .any(|tag| tag.eq_ignore_ascii_case(node.tag()));
            let contained = owner
                .and_then(|owner| tree.node(owner).bounds())
                .zip(node.bounds())
                .map_or(false, |(outer, inner)| {
                    inner.covered_by(&outer) >= policy.containment_threshold
                });
            if contained && !exempt {
                verdicts[id.0] = Verdict::Hoist;
                excluded.insert(id);
                stats.contained += 1;
            } else {
                next_owner = Some(id);
            }
        }
        for child in node.children.iter().rev() {
            stack.push((*child, next_owner));
        }
    }
    excluded
}
