use cdp_adapter::ViewportMetrics;

use super::{FilterStats, Verdict};
use crate::model::{EnhancedNode, EnhancedTree, NodeKind, Rect};
use crate::policy::FilterPolicy;

const NON_CONTENT_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "head", "meta", "link", "title", "base",
];

/// What the node's own markup and style say, before any geometry against other nodes.
fn intrinsic(
    tree: &EnhancedTree,
    node: &EnhancedNode,
    policy: &FilterPolicy,
    stats: &mut FilterStats,
) -> Verdict {
    match node.raw.kind {
        NodeKind::Comment | NodeKind::DocumentType | NodeKind::Other(_) => return Verdict::Drop,
        NodeKind::Document | NodeKind::DocumentFragment => return Verdict::Hoist,
        NodeKind::Text => {
            let blank = node
                .raw
                .text
                .as_deref()
                .map_or(true, |text| text.trim().is_empty());
            if blank || (tree.layout_available && node.layout.is_none()) {
                return Verdict::Drop;
            }
            // Text carries its element's visibility; a hidden parent is only hoisted.
            let hidden_self = node
                .layout
                .as_ref()
                .map_or(false, |layout| !layout.visible || layout.style.visibility_hidden());
            let hidden_parent = tree
                .parent(node.id)
                .and_then(|parent| parent.layout.as_ref())
                .map_or(false, |layout| layout.style.visibility_hidden());
            if hidden_self || hidden_parent {
                stats.hidden += 1;
                return Verdict::Drop;
            }
            return Verdict::Keep;
        }
        NodeKind::Element => {}
    }

    if NON_CONTENT_TAGS.contains(&node.tag()) {
        return Verdict::Drop;
    }
    if tree.parent(node.id).map_or(false, |parent| parent.tag() == "svg") {
        return Verdict::Drop;
    }
    if node.attr("aria-hidden") == Some("true") || node.attr("hidden").is_some() {
        stats.hidden += 1;
        return Verdict::Drop;
    }
    if !tree.layout_available {
        return Verdict::Keep;
    }
    let Some(layout) = node.layout.as_ref() else {
        return Verdict::Hoist;
    };
    if layout.style.display_none() || layout.style.opacity <= policy.min_opacity {
        stats.hidden += 1;
        return Verdict::Drop;
    }
    if layout.style.visibility_hidden() || layout.bounds.is_empty() {
        return Verdict::Hoist;
    }
    Verdict::Keep
}

/// Applies the intrinsic rules and the viewport-distance rule in one walk.
///
/// The clip rectangle starts as the viewport grown by the threshold and is
/// narrowed by every scroll container and frame on the way down.
pub(super) fn apply(
    tree: &EnhancedTree,
    viewport: &ViewportMetrics,
    policy: &FilterPolicy,
    verdicts: &mut [Verdict],
    stats: &mut FilterStats,
) {
    let Some(root) = tree.root() else {
        return;
    };
    let threshold = policy.viewport_threshold_px;
    let screen = Rect::new(
        viewport.page_x,
        viewport.page_y,
        viewport.width,
        viewport.height,
    )
    .expand(threshold);

    let mut stack = vec![(root, Some(screen), false)];
    while let Some((id, clip, dropped)) = stack.pop() {
        let node = tree.node(id);
        let mut verdict = if dropped {
            Verdict::Drop
        } else {
            intrinsic(tree, node, policy, stats)
        };

        let bounds = node.bounds().filter(|_| tree.layout_available);
        if verdict == Verdict::Keep {
            if let Some(bounds) = bounds {
                let on_screen = clip
                    .as_ref()
                    .and_then(|clip| bounds.intersection(clip))
                    .is_some();
                if !on_screen {
                    stats.offscreen += 1;
                    verdict = if node.is_text() {
                        Verdict::Drop
                    } else {
                        Verdict::Hoist
                    };
                }
            }
        }
        verdicts[id.0] = verdict;

        let child_clip = match bounds {
            Some(bounds) if node.is_scrollable() || node.is_frame() => {
                clip.and_then(|clip| clip.intersection(&bounds.expand(threshold)))
            }
            _ => clip,
        };
        let child_dropped = verdict == Verdict::Drop;
        for child in node.children.iter().rev() {
            stack.push((*child, child_clip, child_dropped));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixture::TreeBuilder;
    use super::*;

    #[test]
    fn nodes_far_outside_the_viewport_are_hoisted() {
        let mut b = TreeBuilder::new();
        let doc = b.document();
        let body = b.element(doc, "body", &[]);
        b.layout(body, Rect::new(0.0, 0.0, 1280.0, 10_000.0));
        let near = b.element(body, "button", &[]);
        b.layout(near, Rect::new(0.0, 1_500.0, 80.0, 30.0));
        let far = b.element(body, "button", &[]);
        b.layout(far, Rect::new(0.0, 5_000.0, 80.0, 30.0));
        let far_text = b.text(far, "Far away");

        let mut verdicts = vec![Verdict::Keep; b.tree.len()];
        let mut stats = FilterStats::default();
        apply(
            &b.tree,
            &ViewportMetrics::default(),
            &FilterPolicy::default(),
            &mut verdicts,
            &mut stats,
        );
        assert_eq!(verdicts[near.0], Verdict::Keep);
        assert_eq!(verdicts[far.0], Verdict::Hoist);
        assert_eq!(verdicts[far_text.0], Verdict::Drop);
        assert_eq!(stats.offscreen, 2);
    }

    #[test]
    fn scroll_containers_clip_their_content() {
        let mut b = TreeBuilder::new();
        let doc = b.document();
        let body = b.element(doc, "body", &[]);
        b.layout(body, Rect::new(0.0, 0.0, 1280.0, 800.0));
        let list = b.element(body, "div", &[]);
        b.layout(list, Rect::new(0.0, 0.0, 300.0, 200.0)).is_scrollable = true;
        let visible = b.element(list, "a", &[("href", "/1")]);
        b.layout(visible, Rect::new(0.0, 50.0, 300.0, 20.0));
        let clipped = b.element(list, "a", &[("href", "/2")]);
        b.layout(clipped, Rect::new(0.0, 1_500.0, 300.0, 20.0));

        let policy = FilterPolicy {
            viewport_threshold_px: 100.0,
            ..FilterPolicy::default()
        };
        let mut verdicts = vec![Verdict::Keep; b.tree.len()];
        apply(
            &b.tree,
            &ViewportMetrics::default(),
            &policy,
            &mut verdicts,
            &mut FilterStats::default(),
        );
        assert_eq!(verdicts[visible.0], Verdict::Keep);
        assert_eq!(verdicts[clipped.0], Verdict::Hoist);
    }

    #[test]
    fn hidden_visibility_hoists_so_visible_children_survive() {
        let mut b = TreeBuilder::new();
        let doc = b.document();
        let outer = b.element(doc, "div", &[]);
        b.layout(outer, Rect::new(0.0, 0.0, 200.0, 200.0)).style.visibility = "hidden".into();
        let svg = b.element(outer, "svg", &[]);
        b.layout(svg, Rect::new(0.0, 0.0, 20.0, 20.0));
        let path = b.element(svg, "path", &[]);
        b.layout(path, Rect::new(0.0, 0.0, 20.0, 20.0));

        let mut verdicts = vec![Verdict::Keep; b.tree.len()];
        apply(
            &b.tree,
            &ViewportMetrics::default(),
            &FilterPolicy::default(),
            &mut verdicts,
            &mut FilterStats::default(),
        );
        assert_eq!(verdicts[outer.0], Verdict::Hoist);
        assert_eq!(verdicts[svg.0], Verdict::Keep);
        assert_eq!(verdicts[path.0], Verdict::Drop);
    }

    #[test]
    fn text_of_hidden_elements_is_dropped() {
        let mut b = TreeBuilder::new();
        let doc = b.document();
        let body = b.element(doc, "body", &[]);
        b.layout(body, Rect::new(0.0, 0.0, 1280.0, 800.0));
        let tooltip = b.element(body, "div", &[("class", "tooltip")]);
        b.layout(tooltip, Rect::new(0.0, 0.0, 200.0, 40.0))
            .style
            .visibility = "hidden".into();
        let secret = b.text(tooltip, "hidden tooltip");
        let menu = b.element(body, "div", &[]);
        b.layout(menu, Rect::new(0.0, 50.0, 200.0, 40.0));
        let collapsed = b.text(menu, "collapsed entry");
        b.tree.node_mut(collapsed).layout.as_mut().expect("text layout").visible = false;
        let shown = b.element(body, "p", &[]);
        b.layout(shown, Rect::new(0.0, 100.0, 200.0, 40.0));
        let plain = b.text(shown, "Plain copy");

        let mut verdicts = vec![Verdict::Keep; b.tree.len()];
        let mut stats = FilterStats::default();
        apply(
            &b.tree,
            &ViewportMetrics::default(),
            &FilterPolicy::default(),
            &mut verdicts,
            &mut stats,
        );
        assert_eq!(verdicts[tooltip.0], Verdict::Hoist);
        assert_eq!(verdicts[secret.0], Verdict::Drop);
        assert_eq!(verdicts[collapsed.0], Verdict::Drop);
        assert_eq!(verdicts[plain.0], Verdict::Keep);
        assert_eq!(stats.hidden, 2);
    }
}
