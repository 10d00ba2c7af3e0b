use serde::{Deserialize, Serialize};

use crate::model::Snapshot;
use crate::policy::SerializePolicy;
use crate::serializer::{self, LandmarkAnalysis, LandmarkRef, LandmarkRegion};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionExpansion {
    pub landmark: LandmarkRef,
    pub heading: Option<String>,
    /// Element lines in the serializer format, document order.
    pub lines: Vec<String>,
    pub indices: Vec<u32>,
}

impl RegionExpansion {
    pub fn render(&self) -> String {
        let mut header = self.landmark.label();
        if let Some(heading) = &self.heading {
            header.push_str(&format!(" > \"{heading}\""));
        }
        let mut out = vec![header];
        if self.lines.is_empty() {
            out.push("(no interactive elements)".to_string());
        }
        out.extend(self.lines.iter().map(|line| format!("\t{line}")));
        out.join("\n")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegionLookup {
    Found(RegionExpansion),
    NotFound { landmark: String },
}

impl RegionLookup {
    pub fn found(&self) -> Option<&RegionExpansion> {
        match self {
            RegionLookup::Found(expansion) => Some(expansion),
            RegionLookup::NotFound { .. } => None,
        }
    }
}

/// Lines of every element in the matched region.
///
/// With a heading, only elements under a matching heading of the expanded
/// region are kept. Elements of nested regions are judged by the headings
/// open where their region starts followed by their own.
pub(crate) fn expand(
    snapshot: &Snapshot,
    analysis: &LandmarkAnalysis,
    landmark: &str,
    heading: Option<&str>,
    policy: &SerializePolicy,
) -> RegionLookup {
    let Some(region) = analysis.find(landmark) else {
        return RegionLookup::NotFound {
            landmark: landmark.to_string(),
        };
    };
    let heading = heading.map(str::trim).filter(|heading| !heading.is_empty());

    let mut selected = match heading {
        Some(heading) => {
            let mut selected = Vec::new();
            collect_under_heading(region, analysis, &[], &heading.to_lowercase(), &mut selected);
            selected
        }
        None => region.all_elements(),
    };
    selected.sort_unstable();

    let mut indices = Vec::new();
    let mut lines = Vec::new();
    for index in selected {
        if let Some(line) = serializer::element_line(snapshot, index, policy) {
            indices.push(index);
            lines.push(line);
        }
    }

    RegionLookup::Found(RegionExpansion {
        landmark: region.landmark.clone(),
        heading: heading.map(str::to_string),
        lines,
        indices,
    })
}

fn collect_under_heading(
    region: &LandmarkRegion,
    analysis: &LandmarkAnalysis,
    outer: &[String],
    heading: &str,
    out: &mut Vec<u32>,
) {
    for index in &region.elements {
        let own = analysis
            .context(*index)
            .map(|context| context.headings.as_slice())
            .unwrap_or_default();
        if outer
            .iter()
            .chain(own)
            .any(|open| open.to_lowercase().contains(heading))
        {
            out.push(*index);
        }
    }
    for sub in &region.sub_regions {
        let mut nested = outer.to_vec();
        nested.extend(sub.opened_under.iter().cloned());
        collect_under_heading(sub, analysis, &nested, heading, out);
    }
}
