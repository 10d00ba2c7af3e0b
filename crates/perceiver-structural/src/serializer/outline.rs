use std::collections::{BTreeMap, HashSet};

use super::flat::TreeRenderer;
use super::format;
use super::landmarks::{
    analyze, detect_unchanged_regions, LandmarkAnalysis, LandmarkFingerprints, LandmarkRegion,
};
use crate::model::{SimpleId, Snapshot};
use crate::policy::SerializePolicy;

pub(crate) const OUTLINE_HEADER: &str = "=== PAGE OUTLINE ===";
pub(crate) const OUTLINE_FOOTER: &str = "=== END OUTLINE ===";
pub(crate) const UNGROUPED: &str = "(ungrouped)";
const UNCHANGED_SUFFIX: &str = " (unchanged since last step)";

struct OutlineWriter<'a> {
    renderer: TreeRenderer<'a>,
    unchanged: BTreeMap<String, bool>,
}

impl OutlineWriter<'_> {
    fn region(&self, region: &LandmarkRegion, depth: usize, out: &mut Vec<String>) {
        let mut header = format!("{}{}", format::indent(depth), region.landmark.label());
        if self
            .unchanged
            .get(&region.landmark.key)
            .copied()
            .unwrap_or(false)
        {
            header.push_str(UNCHANGED_SUFFIX);
        }
        out.push(header);

        let Some(node) = region.node else {
            return;
        };
        // Nested regions render under their own header, never twice.
        let skip: HashSet<SimpleId> = region
            .sub_regions
            .iter()
            .filter_map(|sub| sub.node)
            .collect();
        self.renderer.render(node, &skip, depth + 1, out);
        for sub in &region.sub_regions {
            self.region(sub, depth + 1, out);
        }
    }
}

/// Outline rendering: regions with their own content, then everything outside any region.
pub(crate) fn render(
    snapshot: &Snapshot,
    policy: &SerializePolicy,
    previous: Option<&LandmarkFingerprints>,
) -> Vec<String> {
    let analysis = analyze(snapshot);
    render_with(snapshot, policy, &analysis, previous)
}

pub(crate) fn render_with(
    snapshot: &Snapshot,
    policy: &SerializePolicy,
    analysis: &LandmarkAnalysis,
    previous: Option<&LandmarkFingerprints>,
) -> Vec<String> {
    let unchanged = match previous {
        Some(previous) if policy.annotate_unchanged => detect_unchanged_regions(
            &LandmarkFingerprints::from_analysis(snapshot, analysis),
            Some(previous),
        ),
        _ => BTreeMap::new(),
    };
    let writer = OutlineWriter {
        renderer: TreeRenderer::new(snapshot, policy, true),
        unchanged,
    };

    let mut lines = vec![OUTLINE_HEADER.to_string()];
    if let Some(root) = snapshot.simplified.root() {
        for region in &analysis.regions {
            writer.region(region, 0, &mut lines);
        }
        let skip: HashSet<SimpleId> = analysis
            .regions
            .iter()
            .filter_map(|region| region.node)
            .collect();
        let mut rest = Vec::new();
        writer.renderer.render(root, &skip, 0, &mut rest);
        if !rest.is_empty() {
            lines.push(UNGROUPED.to_string());
            lines.extend(rest);
        }
    }
    lines.push(OUTLINE_FOOTER.to_string());
    lines
}
