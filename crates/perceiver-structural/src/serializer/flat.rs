use std::collections::HashSet;

use super::format;
use crate::judges;
use crate::model::{SimpleId, Snapshot};
use crate::policy::SerializePolicy;
use crate::text::{collapse_whitespace, truncate_chars};

/// Walks a simplified subtree and emits indented lines.
///
/// Both output modes go through this walker; the outline mode only differs by
/// rendering headings as markers and by choosing which subtrees to start from.
pub(crate) struct TreeRenderer<'a> {
    snapshot: &'a Snapshot,
    policy: &'a SerializePolicy,
    heading_markers: bool,
}

impl<'a> TreeRenderer<'a> {
    pub(crate) fn new(snapshot: &'a Snapshot, policy: &'a SerializePolicy, heading_markers: bool) -> Self {
        Self {
            snapshot,
            policy,
            heading_markers,
        }
    }

    /// Renders `start` and its subtree, leaving out every subtree rooted in `skip`.
    pub(crate) fn render(
        &self,
        start: SimpleId,
        skip: &HashSet<SimpleId>,
        depth: usize,
        out: &mut Vec<String>,
    ) {
        self.visit(start, skip, depth, false, out);
    }

    fn visit(
        &self,
        id: SimpleId,
        skip: &HashSet<SimpleId>,
        depth: usize,
        quiet: bool,
        out: &mut Vec<String>,
    ) {
        if skip.contains(&id) {
            return;
        }
        let simple = self.snapshot.simplified.get(id);
        let node = self.snapshot.enhanced.node(simple.node);

        if node.is_text() {
            if !quiet {
                let text = collapse_whitespace(node.raw.text.as_deref().unwrap_or_default());
                if !text.is_empty() {
                    out.push(format!(
                        "{}{}",
                        format::indent(depth),
                        truncate_chars(&text, self.policy.max_text_len)
                    ));
                }
            }
            return;
        }

        let (child_depth, child_quiet) = if simple.index.is_some() {
            out.push(format!(
                "{}{}",
                format::indent(depth),
                format::element_line(self.snapshot, id, self.policy)
            ));
            (depth + 1, true)
        } else if let Some(level) = judges::heading_level(node).filter(|_| self.heading_markers) {
            let text = node
                .ax_name()
                .map(collapse_whitespace)
                .unwrap_or_else(|| self.snapshot.enhanced.text_content(node.id, 3));
            if text.is_empty() {
                (depth, quiet)
            } else {
                out.push(format!(
                    "{}{} {}",
                    format::indent(depth),
                    "#".repeat(usize::from(level)),
                    truncate_chars(&text, self.policy.max_text_len)
                ));
                (depth, true)
            }
        } else if node.placeholder || !format::markers(node).is_empty() {
            out.push(format!(
                "{}{}",
                format::indent(depth),
                format::context_line(self.snapshot, id, self.policy)
            ));
            (depth + 1, quiet)
        } else {
            (depth, quiet)
        };

        for child in &simple.children {
            self.visit(*child, skip, child_depth, child_quiet, out);
        }
    }
}

/// Flat rendering: the whole simplified tree, no grouping.
pub(crate) fn render(snapshot: &Snapshot, policy: &SerializePolicy) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(root) = snapshot.simplified.root() {
        TreeRenderer::new(snapshot, policy, false).render(root, &HashSet::new(), 0, &mut lines);
    }
    lines
}
