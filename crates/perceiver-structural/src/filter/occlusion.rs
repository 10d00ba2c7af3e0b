use std::collections::HashMap;

use super::{FilterStats, Verdict};
use crate::model::{EnhancedTree, NodeId, NodeKind, Rect};
use crate::policy::FilterPolicy;

struct Occluder {
    node: NodeId,
    bounds: Rect,
    paint_order: i64,
}

/// Entry/exit times of a preorder walk; `a` contains `b` iff `a.0 <= b.0 && b.1 <= a.1`.
fn euler_times(tree: &EnhancedTree) -> Vec<(usize, usize)> {
    let mut times = vec![(0, 0); tree.len()];
    let Some(root) = tree.root() else {
        return times;
    };
    let mut clock = 0;
    let mut stack = vec![(root, false)];
    while let Some((id, exiting)) = stack.pop() {
        if exiting {
            times[id.0].1 = clock;
            continue;
        }
        times[id.0].0 = clock;
        clock += 1;
        stack.push((id, true));
        for child in tree.node(id).children.iter().rev() {
            stack.push((*child, false));
        }
    }
    times
}

/// Paint orders only compare within one document; map every node to its owning document.
fn paint_groups(tree: &EnhancedTree) -> Vec<NodeId> {
    let mut groups: Vec<NodeId> = (0..tree.len()).map(NodeId).collect();
    for id in tree.preorder() {
        let node = tree.node(id);
        if node.raw.kind == NodeKind::Document {
            continue;
        }
        if let Some(parent) = node.parent {
            groups[id.0] = groups[parent.0];
        }
    }
    groups
}

/// Hides nodes fully painted over by a single later, opaque box.
///
/// Ancestors and descendants never occlude each other; only one occluder is
/// considered at a time, so several partial overlaps never add up.
pub(super) fn apply(
    tree: &EnhancedTree,
    policy: &FilterPolicy,
    verdicts: &mut [Verdict],
    stats: &mut FilterStats,
) {
    let times = euler_times(tree);
    let groups = paint_groups(tree);
    let related = |a: NodeId, b: NodeId| {
        let (ta, tb) = (times[a.0], times[b.0]);
        (ta.0 <= tb.0 && tb.1 <= ta.1) || (tb.0 <= ta.0 && ta.1 <= tb.1)
    };

    let mut occluders: HashMap<NodeId, Vec<Occluder>> = HashMap::new();
    for node in tree.preorder().into_iter().map(|id| tree.node(id)) {
        if verdicts[node.id.0] != Verdict::Keep || !node.is_element() {
            continue;
        }
        let Some(layout) = node.layout.as_ref() else {
            continue;
        };
        let opacity = layout.style.opacity * layout.style.background_alpha();
        if !layout.visible || layout.bounds.is_empty() || opacity < policy.occluder_min_opacity {
            continue;
        }
        occluders.entry(groups[node.id.0]).or_default().push(Occluder {
            node: node.id,
            bounds: layout.bounds,
            paint_order: layout.paint_order,
        });
    }
    for list in occluders.values_mut() {
        list.sort_by(|a, b| b.paint_order.cmp(&a.paint_order));
    }

    for id in tree.preorder() {
        if verdicts[id.0] != Verdict::Keep {
            continue;
        }
        let node = tree.node(id);
        let Some(layout) = node.layout.as_ref() else {
            continue;
        };
        if layout.bounds.is_empty() {
            continue;
        }
        let Some(candidates) = occluders.get(&groups[id.0]) else {
            continue;
        };
        let hidden = candidates
            .iter()
            .take_while(|occluder| occluder.paint_order > layout.paint_order)
            .filter(|occluder| !related(occluder.node, id))
            .any(|occluder| layout.bounds.covered_by(&occluder.bounds) >= policy.occlusion_threshold);
        if hidden {
            stats.occluded += 1;
            verdicts[id.0] = if node.is_text() {
                Verdict::Drop
            } else {
                Verdict::Hoist
            };
        }
    }
}
