use serde::{Deserialize, Serialize};

use crate::errors::PerceiverError;
use crate::serializer::MARKER_RESERVE;

/// Attributes rendered on element lines unless the caller overrides the list.
pub const DEFAULT_INCLUDE_ATTRIBUTES: &[&str] = &[
    "title",
    "type",
    "checked",
    "id",
    "name",
    "role",
    "value",
    "placeholder",
    "alt",
    "href",
    "aria-label",
    "aria-expanded",
    "aria-checked",
    "aria-selected",
    "aria-valuemin",
    "aria-valuemax",
    "aria-valuenow",
    "aria-placeholder",
    "data-state",
    "pattern",
    "min",
    "max",
    "minlength",
    "maxlength",
    "step",
    "accept",
    "multiple",
    "inputmode",
    "autocomplete",
    "contenteditable",
    "selected",
    "expanded",
    "pressed",
    "disabled",
    "invalid",
    "required",
    "valuetext",
    "haspopup",
    "ax_name",
];

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectPolicy {
    pub timeout_ms: u64,
    pub cross_origin_iframes: bool,
    pub max_iframe_depth: usize,
    pub max_shadow_depth: usize,
    pub max_tree_depth: usize,
}

impl Default for CollectPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            cross_origin_iframes: false,
            max_iframe_depth: 3,
            max_shadow_depth: 16,
            max_tree_depth: 512,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilterPolicy {
    /// Distance in CSS px past any viewport edge within which nodes still count as relevant.
    pub viewport_threshold_px: f64,
    /// Share of a node's box a single higher-painted opaque box must cover to hide it.
    pub occlusion_threshold: f64,
    /// Share of an interactive node's box inside its interactive ancestor that makes it a duplicate.
    pub containment_threshold: f64,
    /// Tags that keep their own index even when contained. Empty by default.
    pub containment_exempt_tags: Vec<String>,
    /// Nodes at or below this opacity are treated as hidden.
    pub min_opacity: f64,
    pub occluder_min_opacity: f64,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            viewport_threshold_px: 1_000.0,
            occlusion_threshold: 0.95,
            containment_threshold: 0.99,
            containment_exempt_tags: Vec::new(),
            min_opacity: 0.0,
            occluder_min_opacity: 0.8,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SerializeMode {
    #[default]
    Flat,
    Outline,
}

impl std::str::FromStr for SerializeMode {
    type Err = PerceiverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(SerializeMode::Flat),
            "outline" => Ok(SerializeMode::Outline),
            other => Err(PerceiverError::internal(format!(
                "unknown serialization mode '{other}'"
            ))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SerializePolicy {
    pub mode: SerializeMode,
    pub include_attributes: Vec<String>,
    pub max_chars: usize,
    pub max_text_len: usize,
    pub max_attribute_len: usize,
    /// Annotate outline regions that match the fingerprints passed by the caller.
    pub annotate_unchanged: bool,
}

impl Default for SerializePolicy {
    fn default() -> Self {
        Self {
            mode: SerializeMode::Flat,
            include_attributes: DEFAULT_INCLUDE_ATTRIBUTES
                .iter()
                .map(|name| name.to_string())
                .collect(),
            max_chars: 40_000,
            max_text_len: 100,
            max_attribute_len: 100,
            annotate_unchanged: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryPolicy {
    pub max_results: usize,
    pub fuzzy_threshold: f64,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self {
            max_results: 10,
            fuzzy_threshold: 0.45,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservePolicy {
    pub collect: CollectPolicy,
    pub filter: FilterPolicy,
    pub serialize: SerializePolicy,
    pub query: QueryPolicy,
}

impl ObservePolicy {
    pub fn validate(&self) -> Result<(), PerceiverError> {
        let ratio = |name: &str, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(PerceiverError::internal(format!(
                    "{name} must be within 0..=1, got {value}"
                )))
            }
        };
        ratio("filter.occlusion_threshold", self.filter.occlusion_threshold)?;
        ratio(
            "filter.containment_threshold",
            self.filter.containment_threshold,
        )?;
        ratio("filter.min_opacity", self.filter.min_opacity)?;
        ratio(
            "filter.occluder_min_opacity",
            self.filter.occluder_min_opacity,
        )?;
        ratio("query.fuzzy_threshold", self.query.fuzzy_threshold)?;
        if !self.filter.viewport_threshold_px.is_finite() || self.filter.viewport_threshold_px < 0.0
        {
            return Err(PerceiverError::internal(
                "filter.viewport_threshold_px must be a non-negative number",
            ));
        }
        if self.collect.timeout_ms == 0 {
            return Err(PerceiverError::internal("collect.timeout_ms must be positive"));
        }
        if self.collect.max_tree_depth == 0 {
            return Err(PerceiverError::internal(
                "collect.max_tree_depth must be positive",
            ));
        }
        if self.serialize.max_chars < MARKER_RESERVE {
            return Err(PerceiverError::internal(format!(
                "serialize.max_chars must be at least {MARKER_RESERVE}"
            )));
        }
        if self.query.max_results == 0 {
            return Err(PerceiverError::internal("query.max_results must be positive"));
        }
        Ok(())
    }
}
