//! Joins DOM, layout, accessibility and listener sources into one tree.
//!
//! Sources are treated as tables keyed by backend node id; the DOM drives the
//! walk and every other source is looked up per node. Shadow roots and
//! same-process frame documents are recursed in place, out-of-process frames
//! are grafted from their own fetched documents with their own layout table.

use std::collections::{HashMap, HashSet};

use cdp_adapter::{AxNode, AxValue, CapturedSnapshot, DomNode, FrameDocument};
use tracing::{debug, warn};

use crate::collector::CollectedState;
use crate::errors::{Diagnostic, SourceKind};
use crate::model::{
    AccessibilityRecord, ComputedStyle, EnhancedTree, LayoutRecord, NodeId, NodeKind,
    RawElementRecord, Rect, ShadowRootKind,
};
use crate::policy::CollectPolicy;

#[derive(Debug)]
pub struct FusionOutcome {
    pub tree: EnhancedTree,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Default)]
struct StyleSlots {
    display: Option<usize>,
    visibility: Option<usize>,
    opacity: Option<usize>,
    overflow: Option<usize>,
    overflow_x: Option<usize>,
    overflow_y: Option<usize>,
    cursor: Option<usize>,
    pointer_events: Option<usize>,
    background_color: Option<usize>,
    position: Option<usize>,
}

struct LayoutTable<'a> {
    snapshot: &'a CapturedSnapshot,
    by_backend: HashMap<i64, (usize, usize)>,
    slots: StyleSlots,
}

impl<'a> LayoutTable<'a> {
    fn new(snapshot: &'a CapturedSnapshot) -> Self {
        let mut by_backend = HashMap::new();
        for (doc_idx, document) in snapshot.documents.iter().enumerate() {
            for (layout_idx, node_index) in document.layout.node_index.iter().enumerate() {
                let backend = usize::try_from(*node_index)
                    .ok()
                    .and_then(|idx| document.nodes.backend_node_id.get(idx));
                if let Some(backend) = backend {
                    by_backend.entry(*backend).or_insert((doc_idx, layout_idx));
                }
            }
        }
        let slots = StyleSlots {
            display: snapshot.style_slot("display"),
            visibility: snapshot.style_slot("visibility"),
            opacity: snapshot.style_slot("opacity"),
            overflow: snapshot.style_slot("overflow"),
            overflow_x: snapshot.style_slot("overflow-x"),
            overflow_y: snapshot.style_slot("overflow-y"),
            cursor: snapshot.style_slot("cursor"),
            pointer_events: snapshot.style_slot("pointer-events"),
            background_color: snapshot.style_slot("background-color"),
            position: snapshot.style_slot("position"),
        };
        Self {
            snapshot,
            by_backend,
            slots,
        }
    }

    fn style(&self, values: Option<&Vec<i64>>) -> ComputedStyle {
        let read = |slot: Option<usize>| -> String {
            slot.and_then(|slot| values.and_then(|values| values.get(slot)))
                .and_then(|idx| self.snapshot.string(*idx))
                .map(str::to_string)
                .unwrap_or_default()
        };
        let opacity = read(self.slots.opacity).trim().parse::<f64>().unwrap_or(1.0);
        ComputedStyle {
            display: read(self.slots.display),
            visibility: read(self.slots.visibility),
            opacity,
            overflow: read(self.slots.overflow),
            overflow_x: read(self.slots.overflow_x),
            overflow_y: read(self.slots.overflow_y),
            cursor: read(self.slots.cursor),
            pointer_events: read(self.slots.pointer_events),
            background_color: read(self.slots.background_color),
            position: read(self.slots.position),
        }
    }

    fn record(&self, backend: i64, dpr: f64, offset: (f64, f64)) -> Option<LayoutRecord> {
        let (doc_idx, layout_idx) = *self.by_backend.get(&backend)?;
        let layout = &self.snapshot.documents.get(doc_idx)?.layout;
        let scale = 1.0 / dpr;
        let bounds = layout
            .bounds
            .get(layout_idx)
            .and_then(|quad| Rect::from_slice(quad))?
            .scale(scale)
            .translate(offset.0, offset.1);
        let style = self.style(layout.styles.get(layout_idx));
        let paint_order = layout
            .paint_orders
            .as_ref()
            .and_then(|orders| orders.get(layout_idx))
            .copied()
            .unwrap_or(0);
        let rect_at = |rects: &Option<Vec<Vec<f64>>>| {
            rects
                .as_ref()
                .and_then(|rects| rects.get(layout_idx))
                .and_then(|quad| Rect::from_slice(quad))
                .map(|rect| rect.scale(scale))
        };
        let client_rect = rect_at(&layout.client_rects);
        let scroll_rect = rect_at(&layout.scroll_rects);
        let overflowing = match (client_rect, scroll_rect) {
            (Some(client), Some(scroll)) => {
                scroll.height > client.height + 1.0 || scroll.width > client.width + 1.0
            }
            _ => false,
        };
        let visible = !style.display_none() && !style.visibility_hidden() && style.opacity > 0.0;
        Some(LayoutRecord {
            bounds,
            paint_order,
            visible,
            is_scrollable: overflowing && style.allows_scroll(),
            style,
            client_rect,
            scroll_rect,
        })
    }
}

#[derive(Clone, Copy)]
struct Scope<'a> {
    depth: usize,
    shadow_depth: usize,
    iframe_depth: usize,
    offset: (f64, f64),
    table: usize,
    frame_id: Option<&'a str>,
}

struct Fuser<'a> {
    policy: &'a CollectPolicy,
    tree: EnhancedTree,
    diagnostics: Vec<Diagnostic>,
    ax: HashMap<i64, &'a AxNode>,
    tables: Vec<Option<LayoutTable<'a>>>,
    frame_tables: HashMap<&'a str, usize>,
    listeners: Option<&'a HashSet<i64>>,
    frames: &'a HashMap<String, FrameDocument>,
    frame_failures: &'a HashMap<String, String>,
    dpr: f64,
    active_frames: HashSet<String>,
}

fn accessibility_record(node: &AxNode) -> AccessibilityRecord {
    AccessibilityRecord {
        role: node.role.as_ref().and_then(AxValue::as_text),
        name: node.name.as_ref().and_then(AxValue::as_text),
        description: node.description.as_ref().and_then(AxValue::as_text),
        value: node.value.as_ref().and_then(AxValue::as_text),
        ignored: node.ignored,
        properties: node
            .properties
            .iter()
            .filter_map(|prop| prop.value.as_text().map(|value| (prop.name.clone(), value)))
            .collect(),
    }
}

fn index_ax<'a>(map: &mut HashMap<i64, &'a AxNode>, nodes: &'a [AxNode]) {
    for node in nodes {
        let Some(backend) = node.backend_dom_node_id else {
            continue;
        };
        match map.get(&backend) {
            Some(existing) if !existing.ignored || node.ignored => {}
            _ => {
                map.insert(backend, node);
            }
        }
    }
}

fn validate(dom: &DomNode, kind: NodeKind) -> Result<(), &'static str> {
    if dom.node_type == 0 {
        return Err("missing node type");
    }
    if kind == NodeKind::Element && dom.node_name.is_empty() && dom.local_name.is_empty() {
        return Err("element without a tag name");
    }
    if dom.attributes.len() % 2 != 0 {
        return Err("unpaired attribute list");
    }
    Ok(())
}

fn shadow_kind(dom: &DomNode) -> Option<ShadowRootKind> {
    let kinds: Vec<ShadowRootKind> = dom
        .shadow_roots
        .iter()
        .filter_map(|root| root.shadow_root_type.as_deref())
        .filter_map(ShadowRootKind::from_protocol)
        .collect();
    kinds
        .iter()
        .find(|kind| kind.is_author())
        .or_else(|| kinds.first())
        .copied()
}

impl<'a> Fuser<'a> {
    fn skip(&mut self, backend_node_id: i64, reason: &str) {
        warn!(target: "perceiver.fusion", backend_node_id, reason, "subtree skipped");
        self.diagnostics.push(Diagnostic::SubtreeSkipped {
            backend_node_id,
            reason: reason.to_string(),
        });
    }

    fn placeholder(&mut self, id: NodeId, frame_id: Option<&str>, reason: String) {
        let backend_node_id = self.tree.node(id).raw.backend_node_id;
        warn!(
            target: "perceiver.fusion",
            backend_node_id,
            frame_id = frame_id.unwrap_or(""),
            %reason,
            "frame left opaque"
        );
        self.tree.node_mut(id).placeholder = true;
        self.diagnostics.push(Diagnostic::FramePlaceholder {
            backend_node_id,
            frame_id: frame_id.map(str::to_string),
            reason,
        });
    }

    fn raw_record(&self, dom: &DomNode, kind: NodeKind, scope: Scope<'a>) -> RawElementRecord {
        let tag = if kind == NodeKind::Element && !dom.local_name.is_empty() {
            dom.local_name.to_ascii_lowercase()
        } else {
            dom.node_name.to_ascii_lowercase()
        };
        let text = matches!(kind, NodeKind::Text | NodeKind::Comment).then(|| dom.node_value.clone());
        RawElementRecord {
            backend_node_id: dom.backend_node_id,
            kind,
            tag,
            attributes: dom
                .attribute_pairs()
                .map(|(name, value)| (name.to_ascii_lowercase(), value.to_string()))
                .collect(),
            text,
            shadow_root: shadow_kind(dom),
            frame_id: dom
                .frame_id
                .clone()
                .or_else(|| scope.frame_id.map(str::to_string)),
        }
    }

    fn enrich(&mut self, id: NodeId, backend: i64, scope: Scope<'a>) {
        let layout = self
            .tables
            .get(scope.table)
            .and_then(Option::as_ref)
            .and_then(|table| table.record(backend, self.dpr, scope.offset));
        let ax = self.ax.get(&backend).map(|node| accessibility_record(node));
        let has_listener = self
            .listeners
            .map_or(false, |listeners| listeners.contains(&backend));
        let node = self.tree.node_mut(id);
        node.layout = layout;
        node.ax = ax;
        node.has_listener = has_listener;
    }

    fn visit(&mut self, dom: &'a DomNode, parent: Option<NodeId>, scope: Scope<'a>) {
        if scope.depth > self.policy.max_tree_depth {
            self.skip(dom.backend_node_id, "tree depth limit reached");
            return;
        }
        let kind = NodeKind::from(dom.node_type);
        if let Err(reason) = validate(dom, kind) {
            self.skip(dom.backend_node_id, reason);
            return;
        }

        let raw = self.raw_record(dom, kind, scope);
        let is_frame = kind == NodeKind::Element && matches!(raw.tag.as_str(), "iframe" | "frame");
        let id = self.tree.push(raw, parent);
        self.enrich(id, dom.backend_node_id, scope);

        let child_scope = Scope {
            depth: scope.depth + 1,
            ..scope
        };
        for root in &dom.shadow_roots {
            if scope.shadow_depth >= self.policy.max_shadow_depth {
                self.skip(root.backend_node_id, "shadow depth limit reached");
                continue;
            }
            self.visit(
                root,
                Some(id),
                Scope {
                    shadow_depth: scope.shadow_depth + 1,
                    ..child_scope
                },
            );
        }
        for child in &dom.children {
            self.visit(child, Some(id), child_scope);
        }
        if is_frame {
            self.visit_frame(dom, id, child_scope);
        }
    }

    fn frame_offset(&self, id: NodeId, scope: Scope<'a>) -> (f64, f64) {
        self.tree
            .node(id)
            .bounds()
            .map(|bounds| (bounds.x, bounds.y))
            .unwrap_or(scope.offset)
    }

    fn visit_frame(&mut self, dom: &'a DomNode, id: NodeId, scope: Scope<'a>) {
        let frame_id = dom.frame_id.as_deref().filter(|id| !id.is_empty());

        if let Some(document) = dom.content_document.as_deref() {
            if scope.iframe_depth >= self.policy.max_iframe_depth {
                self.placeholder(id, frame_id, "frame depth limit reached".into());
                return;
            }
            let key = frame_id
                .map(str::to_string)
                .unwrap_or_else(|| format!("doc:{}", document.backend_node_id));
            if !self.active_frames.insert(key.clone()) {
                self.skip(document.backend_node_id, "frame already on the current path");
                return;
            }
            let inner = Scope {
                iframe_depth: scope.iframe_depth + 1,
                offset: self.frame_offset(id, scope),
                frame_id: document.frame_id.as_deref().or(frame_id),
                ..scope
            };
            self.visit(document, Some(id), inner);
            self.active_frames.remove(&key);
            return;
        }

        let Some(frame_id) = frame_id else {
            return;
        };
        let frames = self.frames;
        match frames.get(frame_id) {
            Some(document) if scope.iframe_depth < self.policy.max_iframe_depth => {
                if !self.active_frames.insert(frame_id.to_string()) {
                    self.skip(document.dom.backend_node_id, "frame already on the current path");
                    return;
                }
                for (source, reason) in &document.degraded {
                    let source_kind = match source.as_str() {
                        "layout" => SourceKind::Layout,
                        "accessibility" => SourceKind::Accessibility,
                        _ => SourceKind::Frame,
                    };
                    self.diagnostics.push(Diagnostic::SourceDegraded {
                        source_kind,
                        frame_id: Some(frame_id.to_string()),
                        reason: reason.clone(),
                    });
                }
                let table = self.frame_tables.get(frame_id).copied().unwrap_or(usize::MAX);
                let inner = Scope {
                    iframe_depth: scope.iframe_depth + 1,
                    offset: self.frame_offset(id, scope),
                    table,
                    frame_id: Some(frame_id),
                    ..scope
                };
                self.visit(&document.dom, Some(id), inner);
                self.active_frames.remove(frame_id);
            }
            Some(_) => self.placeholder(id, Some(frame_id), "frame depth limit reached".into()),
            None => {
                let reason = match self.frame_failures.get(frame_id) {
                    Some(reason) => reason.clone(),
                    None if !self.policy.cross_origin_iframes => {
                        "cross-origin frame recursion disabled".to_string()
                    }
                    None => "frame not fetched".to_string(),
                };
                self.placeholder(id, Some(frame_id), reason);
            }
        }
    }
}

/// Fuses collected sources into the enhanced tree. Never fails; problems become diagnostics.
pub fn fuse(state: &CollectedState, policy: &CollectPolicy) -> FusionOutcome {
    let mut ax = HashMap::new();
    index_ax(&mut ax, &state.ax);

    let mut tables = vec![state.layout.as_ref().map(LayoutTable::new)];
    let mut frame_tables = HashMap::new();
    for (frame_id, document) in &state.frames {
        if let Some(nodes) = document.ax.as_deref() {
            index_ax(&mut ax, nodes);
        }
        frame_tables.insert(frame_id.as_str(), tables.len());
        tables.push(document.layout.as_ref().map(LayoutTable::new));
    }

    let dpr = Some(state.viewport.device_pixel_ratio)
        .filter(|ratio| ratio.is_finite() && *ratio > 0.0)
        .unwrap_or(1.0);

    let mut fuser = Fuser {
        policy,
        tree: EnhancedTree::new(state.layout.is_some()),
        diagnostics: Vec::new(),
        ax,
        tables,
        frame_tables,
        listeners: state.listeners.as_ref(),
        frames: &state.frames,
        frame_failures: &state.frame_failures,
        dpr,
        active_frames: HashSet::new(),
    };
    let root_scope = Scope {
        depth: 0,
        shadow_depth: 0,
        iframe_depth: 0,
        offset: (0.0, 0.0),
        table: 0,
        frame_id: state.dom.frame_id.as_deref(),
    };
    fuser.visit(&state.dom, None, root_scope);

    debug!(
        target: "perceiver.fusion",
        nodes = fuser.tree.len(),
        skipped = fuser.diagnostics.len(),
        "fusion finished"
    );
    FusionOutcome {
        tree: fuser.tree,
        diagnostics: fuser.diagnostics,
    }
}
