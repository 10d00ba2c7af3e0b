//! Command parameter types exposed by the CDP adapter interface.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Computed style properties captured with every layout snapshot, in capture order.
pub const DEFAULT_COMPUTED_STYLES: &[&str] = &[
    "display",
    "visibility",
    "opacity",
    "overflow",
    "overflow-x",
    "overflow-y",
    "cursor",
    "pointer-events",
    "background-color",
    "position",
];

/// Parameters for `DOM.getDocument`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DomFetchConfig {
    /// `-1` fetches the entire subtree.
    pub depth: i32,
    pub pierce: bool,
}

impl Default for DomFetchConfig {
    fn default() -> Self {
        Self {
            depth: -1,
            pierce: true,
        }
    }
}

impl DomFetchConfig {
    pub fn to_params(&self) -> Value {
        json!({ "depth": self.depth, "pierce": self.pierce })
    }
}

/// Parameters for `DOMSnapshot.captureSnapshot`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayoutSnapshotConfig {
    pub computed_styles: Vec<String>,
    pub include_paint_order: bool,
    pub include_dom_rects: bool,
}

impl Default for LayoutSnapshotConfig {
    fn default() -> Self {
        Self {
            computed_styles: DEFAULT_COMPUTED_STYLES
                .iter()
                .map(|name| name.to_string())
                .collect(),
            include_paint_order: true,
            include_dom_rects: true,
        }
    }
}

impl LayoutSnapshotConfig {
    /// Minimal capture used only to read the `isClickable` flags.
    pub fn listeners_only() -> Self {
        Self {
            computed_styles: Vec::new(),
            include_paint_order: false,
            include_dom_rects: false,
        }
    }

    pub fn to_params(&self) -> Value {
        // The protocol field is "computedStyles"; "computedStyleWhitelist" is rejected.
        let mut params = json!({ "computedStyles": self.computed_styles });
        if self.include_paint_order {
            params["includePaintOrder"] = Value::Bool(true);
        }
        if self.include_dom_rects {
            params["includeDOMRects"] = Value::Bool(true);
        }
        params
    }
}

/// Parameters for `Accessibility.getFullAXTree`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AxTreeConfig {
    pub frame_id: Option<String>,
    pub max_depth: Option<u32>,
}

impl AxTreeConfig {
    pub fn for_frame(frame_id: impl Into<String>) -> Self {
        Self {
            frame_id: Some(frame_id.into()),
            max_depth: None,
        }
    }

    pub fn to_params(&self) -> Value {
        let mut params = serde_json::Map::new();
        if let Some(frame_id) = &self.frame_id {
            params.insert("frameId".into(), Value::String(frame_id.clone()));
        }
        if let Some(depth) = self.max_depth {
            params.insert("depth".into(), Value::from(depth));
        }
        Value::Object(params)
    }
}
