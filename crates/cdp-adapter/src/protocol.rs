//! Typed payloads returned by the inspection commands.
//!
//! Only the fields the observation pipeline reads are modelled; everything is
//! `#[serde(default)]` so that older or newer browsers with extra/missing fields
//! still decode.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Navigation identity of the top-level document, from `Page.getFrameTree`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentIdentity {
    pub frame_id: String,
    pub loader_id: String,
    pub url: String,
}

impl DocumentIdentity {
    /// Two identities describe the same document when the frame and loader agree.
    pub fn same_document(&self, other: &DocumentIdentity) -> bool {
        self.frame_id == other.frame_id && self.loader_id == other.loader_id
    }
}

impl std::fmt::Display for DocumentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{} ({})", self.frame_id, self.loader_id, self.url)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FrameTreeResponse {
    pub frame_tree: FrameTreeNode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FrameTreeNode {
    pub frame: FrameDescriptor,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FrameDescriptor {
    pub id: String,
    pub loader_id: String,
    #[serde(default)]
    pub url: String,
}

/// One node of `DOM.getDocument` with `pierce: true`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DomNode {
    pub node_id: i64,
    pub backend_node_id: i64,
    pub node_type: u32,
    pub node_name: String,
    pub local_name: String,
    pub node_value: String,
    /// Flat `[name, value, name, value, ...]` list.
    pub attributes: Vec<String>,
    pub children: Vec<DomNode>,
    pub shadow_roots: Vec<DomNode>,
    /// `"user-agent"`, `"open"` or `"closed"` on shadow root fragments.
    pub shadow_root_type: Option<String>,
    pub content_document: Option<Box<DomNode>>,
    pub frame_id: Option<String>,
    #[serde(rename = "documentURL")]
    pub document_url: Option<String>,
}

impl DomNode {
    pub fn attribute_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .chunks(2)
            .filter(|pair| pair.len() == 2)
            .map(|pair| (pair[0].as_str(), pair[1].as_str()))
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attribute_pairs()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct GetDocumentResponse {
    pub root: DomNode,
}

/// Result of `DOMSnapshot.captureSnapshot`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapturedSnapshot {
    pub documents: Vec<SnapshotDocument>,
    pub strings: Vec<String>,
    /// Style property names in the order they were requested; filled in by the adapter.
    #[serde(skip)]
    pub computed_styles: Vec<String>,
}

impl CapturedSnapshot {
    pub fn string(&self, index: i64) -> Option<&str> {
        usize::try_from(index)
            .ok()
            .and_then(|idx| self.strings.get(idx))
            .map(String::as_str)
    }

    /// Position of a computed style within each `styles` entry.
    pub fn style_slot(&self, property: &str) -> Option<usize> {
        self.computed_styles.iter().position(|name| name == property)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotDocument {
    #[serde(rename = "documentURL")]
    pub document_url: i64,
    pub frame_id: i64,
    pub nodes: NodeTreeSnapshot,
    pub layout: LayoutTreeSnapshot,
    pub scroll_offset_x: Option<f64>,
    pub scroll_offset_y: Option<f64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeTreeSnapshot {
    pub parent_index: Vec<i64>,
    pub node_type: Vec<i64>,
    pub node_name: Vec<i64>,
    pub backend_node_id: Vec<i64>,
    pub is_clickable: Option<RareBooleanData>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RareBooleanData {
    pub index: Vec<i64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayoutTreeSnapshot {
    pub node_index: Vec<i64>,
    /// Per layout node, string-table indices aligned with the requested computed styles.
    pub styles: Vec<Vec<i64>>,
    pub bounds: Vec<Vec<f64>>,
    pub text: Vec<i64>,
    pub paint_orders: Option<Vec<i64>>,
    pub client_rects: Option<Vec<Vec<f64>>>,
    pub scroll_rects: Option<Vec<Vec<f64>>>,
}

/// Accessibility node from `Accessibility.getFullAXTree`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AxNode {
    pub node_id: String,
    pub ignored: bool,
    pub role: Option<AxValue>,
    pub name: Option<AxValue>,
    pub description: Option<AxValue>,
    pub value: Option<AxValue>,
    pub properties: Vec<AxProperty>,
    #[serde(rename = "backendDOMNodeId")]
    pub backend_dom_node_id: Option<i64>,
    pub frame_id: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AxValue {
    #[serde(rename = "type")]
    pub value_type: String,
    pub value: Option<Value>,
}

impl AxValue {
    /// Scalar value rendered as text; `None` for empty strings and non-scalars.
    pub fn as_text(&self) -> Option<String> {
        match self.value.as_ref()? {
            Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
            Value::Bool(flag) => Some(flag.to_string()),
            Value::Number(num) => Some(num.to_string()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AxProperty {
    pub name: String,
    pub value: AxValue,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FullAxTreeResponse {
    #[serde(default)]
    pub nodes: Vec<AxNode>,
}

/// Viewport geometry derived from `Page.getLayoutMetrics`, in CSS pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewportMetrics {
    pub page_x: f64,
    pub page_y: f64,
    pub width: f64,
    pub height: f64,
    pub content_width: f64,
    pub content_height: f64,
    pub device_pixel_ratio: f64,
}

impl Default for ViewportMetrics {
    fn default() -> Self {
        Self {
            page_x: 0.0,
            page_y: 0.0,
            width: 1280.0,
            height: 720.0,
            content_width: 1280.0,
            content_height: 720.0,
            device_pixel_ratio: 1.0,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct LayoutMetricsResponse {
    pub css_visual_viewport: Option<VisualViewport>,
    pub visual_viewport: Option<VisualViewport>,
    pub css_content_size: Option<ContentSize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct VisualViewport {
    pub page_x: f64,
    pub page_y: f64,
    pub client_width: f64,
    pub client_height: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ContentSize {
    pub width: f64,
    pub height: f64,
}

impl LayoutMetricsResponse {
    pub(crate) fn into_metrics(self) -> Option<ViewportMetrics> {
        let css = self.css_visual_viewport?;
        if css.client_width <= 0.0 || css.client_height <= 0.0 {
            return None;
        }
        let device_pixel_ratio = self
            .visual_viewport
            .map(|device| device.client_width / css.client_width)
            .filter(|ratio| ratio.is_finite() && *ratio > 0.0)
            .unwrap_or(1.0);
        let (content_width, content_height) = self
            .css_content_size
            .map(|size| (size.width, size.height))
            .unwrap_or((css.client_width, css.client_height));
        Some(ViewportMetrics {
            page_x: css.page_x,
            page_y: css.page_y,
            width: css.client_width,
            height: css.client_height,
            content_width,
            content_height,
            device_pixel_ratio,
        })
    }
}

/// Everything fetched for an out-of-process frame over its own session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameDocument {
    pub frame_id: String,
    pub dom: DomNode,
    pub layout: Option<CapturedSnapshot>,
    pub ax: Option<Vec<AxNode>>,
    /// Sources that failed for this frame, with the reason.
    pub degraded: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dom_node_decodes_shadow_and_frames() {
        let node: DomNode = serde_json::from_value(json!({
            "nodeId": 1,
            "backendNodeId": 10,
            "nodeType": 1,
            "nodeName": "SELECT",
            "localName": "select",
            "nodeValue": "",
            "attributes": ["name", "color", "disabled", ""],
            "shadowRoots": [{
                "nodeId": 2, "backendNodeId": 11, "nodeType": 11,
                "nodeName": "#document-fragment", "localName": "", "nodeValue": "",
                "shadowRootType": "user-agent"
            }]
        }))
        .expect("decode");
        assert_eq!(node.attribute("NAME"), Some("color"));
        assert_eq!(node.attribute("disabled"), Some(""));
        assert_eq!(
            node.shadow_roots[0].shadow_root_type.as_deref(),
            Some("user-agent")
        );
        assert!(node.content_document.is_none());
    }

    #[test]
    fn layout_metrics_derive_device_pixel_ratio() {
        let raw: LayoutMetricsResponse = serde_json::from_value(json!({
            "cssVisualViewport": { "pageX": 0, "pageY": 300, "clientWidth": 800, "clientHeight": 600 },
            "visualViewport": { "pageX": 0, "pageY": 600, "clientWidth": 1600, "clientHeight": 1200 },
            "cssContentSize": { "x": 0, "y": 0, "width": 800, "height": 4000 }
        }))
        .expect("decode");
        let metrics = raw.into_metrics().expect("metrics");
        assert_eq!(metrics.device_pixel_ratio, 2.0);
        assert_eq!(metrics.page_y, 300.0);
        assert_eq!(metrics.content_height, 4000.0);
    }

    #[test]
    fn ax_value_text_skips_blank_strings() {
        let blank = AxValue {
            value_type: "computedString".into(),
            value: Some(json!("  ")),
        };
        let level = AxValue {
            value_type: "integer".into(),
            value: Some(json!(2)),
        };
        assert_eq!(blank.as_text(), None);
        assert_eq!(level.as_text().as_deref(), Some("2"));
    }
}
