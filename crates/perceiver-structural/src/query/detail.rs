use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::PerceiverError;
use crate::judges;
use crate::model::{AccessibilityRecord, JudgeReport, LayoutRecord, Snapshot};
use crate::policy::SerializePolicy;
use crate::serializer::{self, LandmarkAnalysis, LandmarkRef};

/// Full record of one indexed element and its immediate structural context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementDetail {
    pub index: u32,
    pub backend_node_id: i64,
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    pub text: String,
    pub frame_id: Option<String>,
    pub ax: Option<AccessibilityRecord>,
    pub layout: Option<LayoutRecord>,
    pub roles: Vec<String>,
    pub signals: Vec<String>,
    pub landmark: Option<LandmarkRef>,
    pub heading: Option<String>,
    pub parent_tag: Option<String>,
    pub visible: JudgeReport,
    pub clickable: JudgeReport,
    pub enabled: JudgeReport,
    /// The line this element prints as.
    pub line: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DetailLookup {
    Found(Box<ElementDetail>),
    NotFound { index: u32 },
}

impl DetailLookup {
    pub fn found(&self) -> Option<&ElementDetail> {
        match self {
            DetailLookup::Found(detail) => Some(detail),
            DetailLookup::NotFound { .. } => None,
        }
    }

    /// For callers that treat a miss as an error.
    pub fn into_result(self) -> Result<ElementDetail, PerceiverError> {
        match self {
            DetailLookup::Found(detail) => Ok(*detail),
            DetailLookup::NotFound { index } => Err(PerceiverError::IndexNotFound(index)),
        }
    }
}

pub(crate) fn detail(
    snapshot: &Snapshot,
    analysis: &LandmarkAnalysis,
    index: u32,
    policy: &SerializePolicy,
) -> DetailLookup {
    let (Some(node_id), Some(line)) = (
        snapshot.selector_map.get(index),
        serializer::element_line(snapshot, index, policy),
    ) else {
        return DetailLookup::NotFound { index };
    };
    let tree = &snapshot.enhanced;
    let node = tree.node(node_id);
    let context = analysis.context(index);

    DetailLookup::Found(Box::new(ElementDetail {
        index,
        backend_node_id: node.raw.backend_node_id,
        tag: node.tag().to_string(),
        attributes: node.raw.attributes.clone(),
        text: serializer::element_text(snapshot, index, policy.max_text_len).unwrap_or_default(),
        frame_id: node.raw.frame_id.clone(),
        ax: node.ax.clone(),
        layout: node.layout.clone(),
        roles: judges::roles(node),
        signals: judges::interaction_signals(tree, node_id),
        landmark: context.and_then(|context| context.landmark().cloned()),
        heading: context.and_then(|context| context.heading().map(str::to_string)),
        parent_tag: tree
            .ancestors(node_id)
            .find(|ancestor| ancestor.is_element())
            .map(|ancestor| ancestor.tag().to_string()),
        visible: judges::visible(node, tree.layout_available),
        clickable: judges::clickable(tree, node_id),
        enabled: judges::enabled(node),
        line,
    }))
}
