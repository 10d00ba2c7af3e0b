use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::scoring::{Field, Scorer, Tier};
use crate::judges;
use crate::model::{EnhancedNode, ScoreBreakdown, ScoreComponent, Snapshot};
use crate::reason;
use crate::serializer::{self, LandmarkAnalysis};

/// Attributes searched in the accessible tier.
const ACCESSIBLE_ATTRIBUTES: &[&str] = &["aria-label", "title", "placeholder", "alt"];
/// Attributes searched in the raw-attribute tier.
const SEARCHED_ATTRIBUTES: &[&str] = &["id", "name", "value", "href", "type", "role", "data-testid"];
/// Attributes copied into results.
const RESULT_ATTRIBUTES: &[&str] = &[
    "id", "name", "type", "href", "placeholder", "aria-label", "title", "value", "role",
];

/// Any combination of criteria; all given criteria must hold.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    /// Scored against visible text, accessible names and attributes.
    pub text: Option<String>,
    /// Required role (explicit, accessibility or implicit).
    pub role: Option<String>,
    /// Scored against the accessible name only.
    pub name: Option<String>,
    /// Exact, case-insensitive attribute values.
    pub attributes: BTreeMap<String, String>,
    /// Restricts to elements inside a landmark matching role, key or name.
    pub landmark: Option<String>,
    /// Restricts to elements under a heading containing this text.
    pub heading: Option<String>,
    /// Overrides the configured result limit.
    pub max_results: Option<usize>,
}

impl SearchQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_landmark(mut self, landmark: impl Into<String>) -> Self {
        self.landmark = Some(landmark.into());
        self
    }

    pub fn with_heading(mut self, heading: impl Into<String>) -> Self {
        self.heading = Some(heading.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub index: u32,
    pub tag: String,
    pub text: String,
    pub role: Option<String>,
    pub name: Option<String>,
    pub landmark: Option<String>,
    pub heading: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub score: f32,
    pub breakdown: ScoreBreakdown,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub results: Vec<QueryResult>,
    /// Matches before the result limit was applied.
    pub total_matches: usize,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

fn text_fields(node: &EnhancedNode, visible: &str) -> Vec<Field> {
    let mut fields = Vec::new();
    if !visible.is_empty() {
        fields.push(Field {
            tier: Tier::Text,
            value: visible.to_string(),
        });
    }
    if let Some(name) = node.ax_name() {
        fields.push(Field {
            tier: Tier::Accessible,
            value: name.to_string(),
        });
    }
    for attr in ACCESSIBLE_ATTRIBUTES {
        if let Some(value) = node.attr(attr) {
            fields.push(Field {
                tier: Tier::Accessible,
                value: value.to_string(),
            });
        }
    }
    for attr in SEARCHED_ATTRIBUTES {
        if let Some(value) = node.attr(attr) {
            fields.push(Field {
                tier: Tier::Attribute,
                value: value.to_string(),
            });
        }
    }
    fields
}

fn name_fields(node: &EnhancedNode) -> Vec<Field> {
    node.ax_name()
        .or_else(|| node.attr("aria-label"))
        .map(|name| {
            vec![Field {
                tier: Tier::Accessible,
                value: name.to_string(),
            }]
        })
        .unwrap_or_default()
}

fn primary_role(node: &EnhancedNode) -> Option<String> {
    judges::roles(node).into_iter().next()
}

pub(crate) fn search(
    snapshot: &Snapshot,
    analysis: &LandmarkAnalysis,
    query: &SearchQuery,
    max_results: usize,
    fuzzy_threshold: f64,
    max_text_len: usize,
) -> SearchResults {
    let mut text_scorer = query
        .text
        .as_deref()
        .map(|text| Scorer::new(text, fuzzy_threshold))
        .filter(|scorer| !scorer.is_empty());
    let mut name_scorer = query
        .name
        .as_deref()
        .map(|name| Scorer::new(name, fuzzy_threshold))
        .filter(|scorer| !scorer.is_empty());
    let role = query.role.as_deref().map(str::to_ascii_lowercase);

    let mut results = Vec::new();
    for (index, node_id) in snapshot.selector_map.iter() {
        let node = snapshot.enhanced.node(node_id);
        let context = analysis.context(index).cloned().unwrap_or_default();

        if let Some(role) = role.as_deref() {
            if !judges::roles(node).iter().any(|candidate| candidate == role) {
                continue;
            }
        }
        let attributes_match = query.attributes.iter().all(|(name, expected)| {
            node.attr(&name.to_ascii_lowercase())
                .map_or(false, |value| value.trim().eq_ignore_ascii_case(expected.trim()))
        });
        if !attributes_match {
            continue;
        }
        if let Some(landmark) = query.landmark.as_deref() {
            if !context.in_landmark(landmark) {
                continue;
            }
        }
        if let Some(heading) = query.heading.as_deref() {
            if !context.under_heading(heading) {
                continue;
            }
        }

        let visible = serializer::element_text(snapshot, index, max_text_len).unwrap_or_default();
        let mut components: Vec<ScoreComponent> = Vec::new();
        let mut total = 0.0f32;
        if let Some(scorer) = text_scorer.as_mut() {
            match scorer.score("text", &text_fields(node, &visible)) {
                Some(breakdown) => {
                    total += breakdown.total;
                    components.extend(breakdown.components);
                }
                None => continue,
            }
        }
        if let Some(scorer) = name_scorer.as_mut() {
            match scorer.score("name", &name_fields(node)) {
                Some(breakdown) => {
                    total += breakdown.total;
                    components.extend(breakdown.components);
                }
                None => continue,
            }
        }
        if components.is_empty() {
            // Structural filters only; every survivor ranks equally.
            total = 1.0;
            components.push(ScoreComponent {
                label: "filter".to_string(),
                weight: 1.0,
                contribution: 1.0,
            });
        }

        let breakdown = ScoreBreakdown { total, components };
        results.push(QueryResult {
            index,
            tag: node.tag().to_string(),
            text: visible,
            role: primary_role(node),
            name: node.ax_name().map(str::to_string),
            landmark: context.landmark().map(|landmark| landmark.label()),
            heading: context.heading().map(str::to_string),
            attributes: RESULT_ATTRIBUTES
                .iter()
                .filter_map(|attr| node.attr(attr).map(|value| (attr.to_string(), value.to_string())))
                .collect(),
            score: total,
            reason: reason::summarize(&breakdown),
            breakdown,
        });
    }

    results.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
    let total_matches = results.len();
    results.truncate(max_results);
    SearchResults {
        results,
        total_matches,
    }
}
