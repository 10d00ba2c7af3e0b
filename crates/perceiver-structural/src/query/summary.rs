use serde::{Deserialize, Serialize};

use crate::serializer::{HeadingNode, LandmarkAnalysis, LandmarkRef};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSummary {
    pub landmark: LandmarkRef,
    /// Nesting depth, `0` for top-level regions.
    pub depth: usize,
    pub element_count: usize,
    pub headings: Vec<HeadingNode>,
}

/// Page-level overview: every region with its element count and heading tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSummary {
    /// Depth-first, document order.
    pub landmarks: Vec<LandmarkSummary>,
    pub ungrouped_elements: usize,
    pub ungrouped_headings: Vec<HeadingNode>,
    pub total_elements: usize,
}

impl PageSummary {
    pub(crate) fn from_analysis(analysis: &LandmarkAnalysis, total_elements: usize) -> Self {
        let landmarks = analysis
            .flatten()
            .into_iter()
            .map(|region| LandmarkSummary {
                landmark: region.landmark.clone(),
                depth: region.depth,
                element_count: region.element_count,
                headings: region.headings.clone(),
            })
            .collect();
        Self {
            landmarks,
            ungrouped_elements: analysis.ungrouped_elements.len(),
            ungrouped_headings: analysis.ungrouped_headings.clone(),
            total_elements,
        }
    }

    pub fn render(&self) -> String {
        let mut lines = vec![format!(
            "Page summary: {} interactive elements",
            self.total_elements
        )];
        for summary in &self.landmarks {
            let pad = "  ".repeat(summary.depth);
            lines.push(format!(
                "{pad}{} ({})",
                summary.landmark.label(),
                count(summary.element_count)
            ));
            push_headings(&mut lines, &summary.headings, summary.depth + 1);
        }
        if self.ungrouped_elements > 0 || !self.ungrouped_headings.is_empty() {
            lines.push(format!("(ungrouped) ({})", count(self.ungrouped_elements)));
            push_headings(&mut lines, &self.ungrouped_headings, 1);
        }
        lines.join("\n")
    }
}

fn count(n: usize) -> String {
    if n == 1 {
        "1 element".to_string()
    } else {
        format!("{n} elements")
    }
}

fn push_headings(lines: &mut Vec<String>, headings: &[HeadingNode], depth: usize) {
    for heading in headings {
        lines.push(format!(
            "{}{} {}",
            "  ".repeat(depth),
            "#".repeat(heading.level as usize),
            heading.text
        ));
        push_headings(lines, &heading.children, depth + 1);
    }
}
