//! Data model of one structural observation.
//!
//! The fused tree is an arena: nodes live in a `Vec` and refer to each other by
//! [`NodeId`]. Accessibility and layout facts are attached per node during
//! fusion and never mutated afterwards. The filtered tree ([`SimplifiedTree`])
//! is a second arena pointing back into the fused one.

use std::collections::{BTreeMap, HashMap};

use cdp_adapter::{DocumentIdentity, ViewportMetrics};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::Diagnostic;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SimpleId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Element,
    Text,
    Comment,
    Document,
    DocumentType,
    DocumentFragment,
    Other(u32),
}

impl From<u32> for NodeKind {
    fn from(node_type: u32) -> Self {
        match node_type {
            1 => NodeKind::Element,
            3 | 4 => NodeKind::Text,
            8 => NodeKind::Comment,
            9 => NodeKind::Document,
            10 => NodeKind::DocumentType,
            11 => NodeKind::DocumentFragment,
            other => NodeKind::Other(other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShadowMode {
    Open,
    Closed,
}

/// Shadow root attached to a host element.
///
/// User-agent roots implement native controls (a `<select>` popup, a range
/// track) and are never advertised as component boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ShadowRootKind {
    Author { mode: ShadowMode },
    UserAgent,
}

impl ShadowRootKind {
    pub fn from_protocol(value: &str) -> Option<Self> {
        match value {
            "open" => Some(ShadowRootKind::Author {
                mode: ShadowMode::Open,
            }),
            "closed" => Some(ShadowRootKind::Author {
                mode: ShadowMode::Closed,
            }),
            "user-agent" => Some(ShadowRootKind::UserAgent),
            _ => None,
        }
    }

    pub fn is_author(&self) -> bool {
        matches!(self, ShadowRootKind::Author { .. })
    }
}

/// Axis-aligned box in CSS pixels of the top-level document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Reads an `[x, y, width, height]` quad as sent by the layout snapshot.
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        match values {
            [x, y, width, height, ..] if [x, y, width, height].iter().all(|v| v.is_finite()) => {
                Some(Self::new(*x, *y, *width, *height))
            }
            _ => None,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.area() <= 0.0
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (right > left && bottom > top).then(|| Rect::new(left, top, right - left, bottom - top))
    }

    /// Share of `self`'s area lying inside `other`, in `0.0..=1.0`.
    pub fn covered_by(&self, other: &Rect) -> f64 {
        let area = self.area();
        if area <= 0.0 {
            return 0.0;
        }
        self.intersection(other)
            .map(|overlap| (overlap.area() / area).min(1.0))
            .unwrap_or(0.0)
    }

    pub fn expand(&self, amount: f64) -> Rect {
        Rect::new(
            self.x - amount,
            self.y - amount,
            self.width + amount * 2.0,
            self.height + amount * 2.0,
        )
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    pub fn scale(&self, factor: f64) -> Rect {
        Rect::new(
            self.x * factor,
            self.y * factor,
            self.width * factor,
            self.height * factor,
        )
    }
}

/// Subset of computed style the filter and serializers look at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputedStyle {
    pub display: String,
    pub visibility: String,
    pub opacity: f64,
    pub overflow: String,
    pub overflow_x: String,
    pub overflow_y: String,
    pub cursor: String,
    pub pointer_events: String,
    pub background_color: String,
    pub position: String,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: String::new(),
            visibility: String::new(),
            opacity: 1.0,
            overflow: String::new(),
            overflow_x: String::new(),
            overflow_y: String::new(),
            cursor: String::new(),
            pointer_events: String::new(),
            background_color: String::new(),
            position: String::new(),
        }
    }
}

impl ComputedStyle {
    pub fn display_none(&self) -> bool {
        self.display == "none"
    }

    pub fn visibility_hidden(&self) -> bool {
        matches!(self.visibility.as_str(), "hidden" | "collapse")
    }

    pub fn pointer_cursor(&self) -> bool {
        self.cursor == "pointer"
    }

    pub fn allows_scroll(&self) -> bool {
        [&self.overflow, &self.overflow_x, &self.overflow_y]
            .iter()
            .flat_map(|value| value.split_whitespace())
            .any(|value| matches!(value, "auto" | "scroll" | "overlay"))
    }

    /// Alpha channel of `background-color`; `0.0` when transparent or unknown.
    pub fn background_alpha(&self) -> f64 {
        let color = self.background_color.trim();
        if color.is_empty() || color == "transparent" {
            return 0.0;
        }
        let Some(open) = color.find('(') else {
            return 1.0;
        };
        let inner = color[open + 1..].trim_end_matches(')');
        let parts: Vec<&str> = inner
            .split(|c: char| c == ',' || c == '/' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .collect();
        if parts.len() < 4 {
            return 1.0;
        }
        let alpha = parts[3];
        match alpha.strip_suffix('%') {
            Some(pct) => pct.parse::<f64>().map(|v| v / 100.0).unwrap_or(1.0),
            None => alpha.parse::<f64>().unwrap_or(1.0),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessibilityRecord {
    pub role: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub value: Option<String>,
    pub ignored: bool,
    /// State and relation properties (`disabled`, `expanded`, `checked`, `level`, ...).
    pub properties: BTreeMap<String, String>,
}

impl AccessibilityRecord {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.property(name) == Some("true")
    }

    pub fn role_is(&self, role: &str) -> bool {
        !self.ignored
            && self
                .role
                .as_deref()
                .map_or(false, |value| value.eq_ignore_ascii_case(role))
    }

    pub fn level(&self) -> Option<u8> {
        self.property("level")
            .and_then(|value| value.parse::<f64>().ok())
            .map(|level| level.clamp(1.0, 6.0) as u8)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayoutRecord {
    pub bounds: Rect,
    pub paint_order: i64,
    /// Result of evaluating the computed style alone (display, visibility, opacity).
    pub visible: bool,
    pub style: ComputedStyle,
    pub client_rect: Option<Rect>,
    pub scroll_rect: Option<Rect>,
    pub is_scrollable: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawElementRecord {
    pub backend_node_id: i64,
    pub kind: NodeKind,
    /// Lowercase tag for elements, `#text`/`#document`/... otherwise.
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    pub text: Option<String>,
    pub shadow_root: Option<ShadowRootKind>,
    pub frame_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnhancedNode {
    pub id: NodeId,
    pub raw: RawElementRecord,
    pub ax: Option<AccessibilityRecord>,
    pub layout: Option<LayoutRecord>,
    pub has_listener: bool,
    /// Frame whose content could not be fused; rendered as an opaque stand-in.
    pub placeholder: bool,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl EnhancedNode {
    pub fn tag(&self) -> &str {
        &self.raw.tag
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.raw.attributes.get(name).map(String::as_str)
    }

    pub fn is_element(&self) -> bool {
        self.raw.kind == NodeKind::Element
    }

    pub fn is_text(&self) -> bool {
        self.raw.kind == NodeKind::Text
    }

    pub fn ax_name(&self) -> Option<&str> {
        self.ax
            .as_ref()
            .filter(|ax| !ax.ignored)
            .and_then(|ax| ax.name.as_deref())
            .filter(|name| !name.trim().is_empty())
    }

    pub fn ax_role(&self) -> Option<&str> {
        self.ax
            .as_ref()
            .filter(|ax| !ax.ignored)
            .and_then(|ax| ax.role.as_deref())
    }

    pub fn bounds(&self) -> Option<Rect> {
        self.layout.as_ref().map(|layout| layout.bounds)
    }

    pub fn is_scrollable(&self) -> bool {
        self.layout.as_ref().map_or(false, |layout| layout.is_scrollable)
    }

    pub fn is_frame(&self) -> bool {
        matches!(self.raw.tag.as_str(), "iframe" | "frame")
    }
}

/// Fused tree for one observation.
#[derive(Clone, Debug, Default)]
pub struct EnhancedTree {
    nodes: Vec<EnhancedNode>,
    root: Option<NodeId>,
    by_backend: HashMap<i64, NodeId>,
    /// False when the layout snapshot failed; every node then counts as visible.
    pub layout_available: bool,
}

impl EnhancedTree {
    pub fn new(layout_available: bool) -> Self {
        Self {
            layout_available,
            ..Self::default()
        }
    }

    pub fn push(&mut self, raw: RawElementRecord, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.by_backend.entry(raw.backend_node_id).or_insert(id);
        self.nodes.push(EnhancedNode {
            id,
            raw,
            ax: None,
            layout: None,
            has_listener: false,
            placeholder: false,
            parent,
            children: Vec::new(),
        });
        match parent {
            Some(parent) => self.nodes[parent.0].children.push(id),
            None => {
                if self.root.is_none() {
                    self.root = Some(id);
                }
            }
        }
        id
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&EnhancedNode> {
        self.nodes.get(id.0)
    }

    /// Ids are only minted by [`EnhancedTree::push`], so indexing cannot miss.
    pub fn node(&self, id: NodeId) -> &EnhancedNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut EnhancedNode {
        &mut self.nodes[id.0]
    }

    pub fn by_backend(&self, backend_node_id: i64) -> Option<NodeId> {
        self.by_backend.get(&backend_node_id).copied()
    }

    pub fn parent(&self, id: NodeId) -> Option<&EnhancedNode> {
        self.node(id).parent.map(|parent| self.node(parent))
    }

    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = &EnhancedNode> + '_ {
        let mut cursor = self.node(id).parent;
        std::iter::from_fn(move || {
            let current = cursor?;
            let node = self.node(current);
            cursor = node.parent;
            Some(node)
        })
    }

    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.node(id).children.iter().rev().copied());
        }
        order
    }

    /// Concatenated descendant text, whitespace collapsed, up to `max_depth` levels down.
    pub fn text_content(&self, id: NodeId, max_depth: usize) -> String {
        let mut parts = Vec::new();
        let mut stack = vec![(id, 0usize)];
        while let Some((current, depth)) = stack.pop() {
            let node = self.node(current);
            if node.is_text() {
                if let Some(text) = node.raw.text.as_deref() {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        parts.push(trimmed.to_string());
                    }
                }
                continue;
            }
            if depth >= max_depth {
                continue;
            }
            for child in node.children.iter().rev() {
                stack.push((*child, depth + 1));
            }
        }
        crate::text::collapse_whitespace(&parts.join(" "))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimplifiedNode {
    pub node: NodeId,
    pub index: Option<u32>,
    pub parent: Option<SimpleId>,
    pub children: Vec<SimpleId>,
}

/// Post-filter tree; only nodes worth showing survive.
#[derive(Clone, Debug, Default)]
pub struct SimplifiedTree {
    nodes: Vec<SimplifiedNode>,
    root: Option<SimpleId>,
    by_node: HashMap<NodeId, SimpleId>,
}

impl SimplifiedTree {
    pub fn push(&mut self, node: NodeId, parent: Option<SimpleId>) -> SimpleId {
        let id = SimpleId(self.nodes.len());
        self.nodes.push(SimplifiedNode {
            node,
            index: None,
            parent,
            children: Vec::new(),
        });
        self.by_node.insert(node, id);
        match parent {
            Some(parent) => self.nodes[parent.0].children.push(id),
            None => {
                if self.root.is_none() {
                    self.root = Some(id);
                }
            }
        }
        id
    }

    pub fn root(&self) -> Option<SimpleId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: SimpleId) -> &SimplifiedNode {
        &self.nodes[id.0]
    }

    pub fn find(&self, node: NodeId) -> Option<SimpleId> {
        self.by_node.get(&node).copied()
    }

    pub fn set_index(&mut self, id: SimpleId, index: u32) {
        self.nodes[id.0].index = Some(index);
    }

    pub fn preorder(&self) -> Vec<SimpleId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<SimpleId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.get(id).children.iter().rev().copied());
        }
        order
    }

    pub fn ancestors(&self, id: SimpleId) -> impl Iterator<Item = SimpleId> + '_ {
        let mut cursor = self.get(id).parent;
        std::iter::from_fn(move || {
            let current = cursor?;
            cursor = self.get(current).parent;
            Some(current)
        })
    }

    /// Drops `id` from its parent's child list; the node stays in the arena but is unreachable.
    pub(crate) fn detach(&mut self, id: SimpleId) {
        if let Some(parent) = self.nodes[id.0].parent {
            self.nodes[parent.0].children.retain(|child| *child != id);
        }
        let node = self.nodes[id.0].node;
        if self.by_node.get(&node) == Some(&id) {
            self.by_node.remove(&node);
        }
    }
}

/// Index → fused node binding for one snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectorMap {
    entries: BTreeMap<u32, NodeId>,
}

impl SelectorMap {
    pub(crate) fn insert(&mut self, index: u32, node: NodeId) {
        self.entries.insert(index, node);
    }

    pub fn get(&self, index: u32) -> Option<NodeId> {
        self.entries.get(&index).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, NodeId)> + '_ {
        self.entries.iter().map(|(index, node)| (*index, *node))
    }
}

/// Immutable result of one observation; shared read-only by serializers and queries.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub id: Uuid,
    pub identity: DocumentIdentity,
    pub viewport: ViewportMetrics,
    pub enhanced: EnhancedTree,
    pub simplified: SimplifiedTree,
    pub selector_map: SelectorMap,
    pub diagnostics: Vec<Diagnostic>,
}

impl Snapshot {
    pub fn resolve(&self, index: u32) -> Option<&EnhancedNode> {
        self.selector_map
            .get(index)
            .and_then(|node| self.enhanced.get(node))
    }

    pub fn simple_for_index(&self, index: u32) -> Option<SimpleId> {
        self.selector_map
            .get(index)
            .and_then(|node| self.simplified.find(node))
    }

    pub fn interactive_count(&self) -> usize {
        self.selector_map.len()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub label: String,
    pub weight: f32,
    pub contribution: f32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub total: f32,
    pub components: Vec<ScoreComponent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JudgeReport {
    pub ok: bool,
    pub reason: String,
    pub facts: Value,
}
