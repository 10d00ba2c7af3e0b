//! Reduces the fused tree to what a user could actually see and act on.
//!
//! Each pass assigns a [`Verdict`] per fused node. `Drop` removes the node and
//! its subtree, `Hoist` removes only the node and re-parents its children to
//! the nearest kept ancestor. The simplified tree is built from the verdicts
//! and then pruned of empty leaves.

mod containment;
mod occlusion;
mod visibility;

use std::collections::HashSet;

use cdp_adapter::ViewportMetrics;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::judges;
use crate::model::{EnhancedTree, NodeId, SimpleId, SimplifiedTree};
use crate::policy::FilterPolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Verdict {
    Keep,
    Hoist,
    Drop,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    pub input_nodes: usize,
    pub kept_nodes: usize,
    pub hidden: usize,
    pub offscreen: usize,
    pub occluded: usize,
    pub contained: usize,
    pub pruned: usize,
}

#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub simplified: SimplifiedTree,
    /// Interactive nodes folded into an interactive ancestor; never indexed.
    pub excluded: HashSet<NodeId>,
    pub stats: FilterStats,
}

pub fn filter(
    tree: &EnhancedTree,
    viewport: &ViewportMetrics,
    policy: &FilterPolicy,
) -> FilterOutcome {
    let mut stats = FilterStats {
        input_nodes: tree.len(),
        ..FilterStats::default()
    };
    let Some(root) = tree.root() else {
        return FilterOutcome {
            stats,
            ..FilterOutcome::default()
        };
    };

    let mut verdicts = vec![Verdict::Keep; tree.len()];
    visibility::apply(tree, viewport, policy, &mut verdicts, &mut stats);
    if tree.layout_available {
        occlusion::apply(tree, policy, &mut verdicts, &mut stats);
    }
    let excluded = containment::apply(tree, policy, &mut verdicts, &mut stats);
    verdicts[root.0] = Verdict::Keep;

    let mut simplified = build(tree, root, &verdicts);
    stats.pruned = prune(tree, &mut simplified);
    stats.kept_nodes = simplified.preorder().len();

    debug!(
        target: "perceiver.filter",
        input = stats.input_nodes,
        kept = stats.kept_nodes,
        occluded = stats.occluded,
        contained = stats.contained,
        "filter finished"
    );
    FilterOutcome {
        simplified,
        excluded,
        stats,
    }
}

fn build(tree: &EnhancedTree, root: NodeId, verdicts: &[Verdict]) -> SimplifiedTree {
    let mut simplified = SimplifiedTree::default();
    let mut stack: Vec<(NodeId, Option<SimpleId>)> = vec![(root, None)];
    while let Some((id, parent)) = stack.pop() {
        let attach_to = match verdicts[id.0] {
            Verdict::Drop => continue,
            Verdict::Hoist => parent,
            Verdict::Keep => Some(simplified.push(id, parent)),
        };
        for child in tree.node(id).children.iter().rev() {
            stack.push((*child, attach_to));
        }
    }
    simplified
}

/// Whether a node carries meaning on its own, independent of its children.
fn meaningful(tree: &EnhancedTree, id: NodeId) -> bool {
    let node = tree.node(id);
    if node.is_text() {
        return node
            .raw
            .text
            .as_deref()
            .map_or(false, |text| !text.trim().is_empty());
    }
    node.placeholder
        || node.ax_name().is_some()
        || node.is_scrollable()
        || node.raw.shadow_root.map_or(false, |kind| kind.is_author())
        || judges::heading_level(node).is_some()
        || judges::is_interactive(tree, id)
}

/// Detaches leaves with nothing to show, bottom-up. Returns how many were removed.
fn prune(tree: &EnhancedTree, simplified: &mut SimplifiedTree) -> usize {
    let root = simplified.root();
    let mut removed = 0;
    for id in simplified.preorder().into_iter().rev() {
        if Some(id) == root || !simplified.get(id).children.is_empty() {
            continue;
        }
        if !meaningful(tree, simplified.get(id).node) {
            simplified.detach(id);
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
pub(crate) mod fixture {
    use std::collections::BTreeMap;

    use cdp_adapter::{DocumentIdentity, ViewportMetrics};

    use crate::model::{
        AccessibilityRecord, ComputedStyle, EnhancedTree, LayoutRecord, NodeId, NodeKind,
        RawElementRecord, Rect, Snapshot,
    };
    use crate::policy::FilterPolicy;

    pub fn identity() -> DocumentIdentity {
        DocumentIdentity {
            frame_id: "MAIN".into(),
            loader_id: "L1".into(),
            url: "https://example.com/".into(),
        }
    }

    /// Filters and indexes `tree` with default policies.
    pub fn snapshot(tree: EnhancedTree) -> Snapshot {
        snapshot_with_identity(tree, identity())
    }

    pub fn snapshot_with_identity(tree: EnhancedTree, identity: DocumentIdentity) -> Snapshot {
        crate::pipeline::assemble(
            identity,
            ViewportMetrics::default(),
            tree,
            Vec::new(),
            &FilterPolicy::default(),
        )
    }

    /// Small builder for hand-made fused trees.
    pub struct TreeBuilder {
        pub tree: EnhancedTree,
        next_backend: i64,
        next_paint: i64,
    }

    impl TreeBuilder {
        pub fn new() -> Self {
            Self {
                tree: EnhancedTree::new(true),
                next_backend: 1,
                next_paint: 1,
            }
        }

        /// Trees built this way have no geometry; every node counts as visible.
        pub fn without_layout() -> Self {
            let mut builder = Self::new();
            builder.tree.layout_available = false;
            builder
        }

        fn raw(&mut self, kind: NodeKind, tag: &str) -> RawElementRecord {
            let backend_node_id = self.next_backend;
            self.next_backend += 1;
            RawElementRecord {
                backend_node_id,
                kind,
                tag: tag.to_string(),
                attributes: BTreeMap::new(),
                text: None,
                shadow_root: None,
                frame_id: None,
            }
        }

        pub fn document(&mut self) -> NodeId {
            let raw = self.raw(NodeKind::Document, "#document");
            self.tree.push(raw, None)
        }

        pub fn element(&mut self, parent: NodeId, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
            let mut raw = self.raw(NodeKind::Element, tag);
            raw.attributes = attrs
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect();
            self.tree.push(raw, Some(parent))
        }

        pub fn text(&mut self, parent: NodeId, value: &str) -> NodeId {
            let mut raw = self.raw(NodeKind::Text, "#text");
            raw.text = Some(value.to_string());
            let id = self.tree.push(raw, Some(parent));
            if let Some(bounds) = self.tree.node(parent).bounds() {
                self.layout(id, bounds);
            }
            id
        }

        /// Lays out `id` with increasing paint order and an opaque white background.
        pub fn layout(&mut self, id: NodeId, bounds: Rect) -> &mut LayoutRecord {
            let paint_order = self.next_paint;
            self.next_paint += 1;
            let node = self.tree.node_mut(id);
            node.layout = Some(LayoutRecord {
                bounds,
                paint_order,
                visible: true,
                style: ComputedStyle {
                    display: "block".into(),
                    visibility: "visible".into(),
                    background_color: "rgb(255, 255, 255)".into(),
                    ..ComputedStyle::default()
                },
                client_rect: None,
                scroll_rect: None,
                is_scrollable: false,
            });
            node.layout.as_mut().expect("layout just set")
        }

        pub fn ax(&mut self, id: NodeId, role: &str, name: &str) {
            self.tree.node_mut(id).ax = Some(AccessibilityRecord {
                role: Some(role.to_string()),
                name: (!name.is_empty()).then(|| name.to_string()),
                ..AccessibilityRecord::default()
            });
        }
    }
}
