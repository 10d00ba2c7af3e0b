//! Per-node judgements: interactivity, visibility, enabled state, headings.

use serde_json::{json, Map as JsonMap, Value};

use crate::model::{EnhancedNode, EnhancedTree, JudgeReport, NodeId};

pub const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "menuitem",
    "menuitemcheckbox",
    "menuitemradio",
    "tab",
    "checkbox",
    "radio",
    "switch",
    "option",
    "combobox",
    "textbox",
    "searchbox",
    "slider",
    "spinbutton",
    "listbox",
    "treeitem",
];

const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

fn interactive_role(role: &str) -> bool {
    let lowered = role.to_ascii_lowercase();
    INTERACTIVE_ROLES.contains(&lowered.as_str())
}

/// Reasons a node accepts user input; empty when it does not.
pub fn interaction_signals(tree: &EnhancedTree, id: NodeId) -> Vec<String> {
    let node = tree.node(id);
    let mut signals = Vec::new();
    if !node.is_element() || matches!(node.tag(), "html" | "body") {
        return signals;
    }

    match node.tag() {
        "a" if node.attr("href").is_some() => signals.push("tag:a[href]".to_string()),
        "button" | "select" | "textarea" | "summary" => {
            signals.push(format!("tag:{}", node.tag()));
        }
        "input" if !node.attr("type").map_or(false, |t| t.eq_ignore_ascii_case("hidden")) => {
            signals.push("tag:input".to_string());
        }
        _ => {}
    }

    if let Some(role) = node.attr("role").filter(|role| interactive_role(role)) {
        signals.push(format!("role:{}", role.to_ascii_lowercase()));
    }
    if let Some(role) = node.ax_role().filter(|role| interactive_role(role)) {
        signals.push(format!("ax-role:{}", role.to_ascii_lowercase()));
    }
    if node.attr("onclick").is_some() {
        signals.push("onclick".to_string());
    }
    if node
        .attr("tabindex")
        .and_then(|value| value.trim().parse::<i32>().ok())
        .map_or(false, |tabindex| tabindex >= 0)
    {
        signals.push("tabindex".to_string());
    }
    if node
        .attr("contenteditable")
        .map_or(false, |value| matches!(value, "" | "true" | "plaintext-only"))
    {
        signals.push("contenteditable".to_string());
    }
    if node.has_listener {
        signals.push("listener".to_string());
    }
    if let Some(ax) = node.ax.as_ref().filter(|ax| !ax.ignored) {
        if ax.property("checked").is_some() || ax.property("expanded").is_some() {
            signals.push("ax-state".to_string());
        }
    }
    let pointer = node
        .layout
        .as_ref()
        .map_or(false, |layout| layout.style.pointer_cursor());
    if pointer {
        // Inherited cursors mark whole subtrees; only the element that sets it counts.
        let parent_pointer = tree
            .parent(id)
            .and_then(|parent| parent.layout.as_ref())
            .map_or(false, |layout| layout.style.pointer_cursor());
        if !parent_pointer {
            signals.push("cursor:pointer".to_string());
        }
    }
    signals
}

pub fn is_interactive(tree: &EnhancedTree, id: NodeId) -> bool {
    !interaction_signals(tree, id).is_empty()
}

pub fn heading_level(node: &EnhancedNode) -> Option<u8> {
    if !node.is_element() {
        return None;
    }
    let tag_level = HEADING_TAGS
        .iter()
        .position(|tag| *tag == node.tag())
        .map(|pos| pos as u8 + 1);
    if let Some(ax) = node.ax.as_ref().filter(|ax| ax.role_is("heading")) {
        return Some(ax.level().or(tag_level).unwrap_or(1));
    }
    tag_level
}

pub fn is_disabled(node: &EnhancedNode) -> bool {
    node.attr("disabled").is_some()
        || node.attr("aria-disabled") == Some("true")
        || node.ax.as_ref().map_or(false, |ax| ax.flag("disabled"))
}

/// Role a tag carries without an explicit `role` attribute.
pub fn implicit_role(node: &EnhancedNode) -> Option<&'static str> {
    let role = match node.tag() {
        "a" if node.attr("href").is_some() => "link",
        "button" | "summary" => "button",
        "select" => {
            if node.attr("multiple").is_some() {
                "listbox"
            } else {
                "combobox"
            }
        }
        "textarea" => "textbox",
        "input" => match node
            .attr("type")
            .map(str::to_ascii_lowercase)
            .as_deref()
            .unwrap_or("text")
        {
            "checkbox" => "checkbox",
            "radio" => "radio",
            "range" => "slider",
            "number" => "spinbutton",
            "search" => "searchbox",
            "button" | "submit" | "reset" | "image" | "file" => "button",
            "hidden" => return None,
            _ => "textbox",
        },
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => "heading",
        "img" => "img",
        "nav" => "navigation",
        "main" => "main",
        "aside" => "complementary",
        "form" => "form",
        _ => return None,
    };
    Some(role)
}

/// Every role the node answers to: explicit attribute, accessibility tree, implicit.
pub fn roles(node: &EnhancedNode) -> Vec<String> {
    let mut roles: Vec<String> = Vec::new();
    if let Some(role) = node.attr("role") {
        roles.extend(role.split_whitespace().map(str::to_ascii_lowercase));
    }
    if let Some(role) = node.ax_role() {
        roles.push(role.to_ascii_lowercase());
    }
    if let Some(role) = implicit_role(node) {
        roles.push(role.to_string());
    }
    roles.dedup();
    roles
}

pub fn visible(node: &EnhancedNode, layout_available: bool) -> JudgeReport {
    let mut facts = JsonMap::new();
    let mut issues = Vec::new();

    if node.attr("hidden").is_some() {
        issues.push("hidden_attribute".to_string());
    }
    if node.attr("aria-hidden") == Some("true") {
        issues.push("aria_hidden".to_string());
    }
    match node.layout.as_ref() {
        Some(layout) => {
            let bounds = layout.bounds;
            facts.insert(
                "geometry".into(),
                json!({
                    "x": bounds.x,
                    "y": bounds.y,
                    "width": bounds.width,
                    "height": bounds.height,
                    "area": bounds.area().round(),
                }),
            );
            facts.insert("opacity".into(), json!(layout.style.opacity));
            facts.insert("paint_order".into(), json!(layout.paint_order));
            if bounds.area() <= 0.0 {
                issues.push("zero_area".to_string());
            }
            if layout.style.display_none() {
                issues.push("display_none".to_string());
            }
            if layout.style.visibility_hidden() {
                issues.push("visibility_hidden".to_string());
            }
            if layout.style.opacity <= 0.0 {
                issues.push("opacity_zero".to_string());
            }
        }
        None if layout_available => issues.push("missing_geometry".to_string()),
        None => {
            facts.insert("layout".into(), json!("unavailable"));
        }
    }

    let ok = issues.is_empty();
    if !ok {
        facts.insert("issues".into(), json!(issues.clone()));
    }
    JudgeReport {
        ok,
        reason: format_reason(if ok { "visible" } else { "not_visible" }, &issues),
        facts: Value::Object(facts),
    }
}

pub fn clickable(tree: &EnhancedTree, id: NodeId) -> JudgeReport {
    let node = tree.node(id);
    let visibility = visible(node, tree.layout_available);
    let signals = interaction_signals(tree, id);

    let mut facts = JsonMap::new();
    facts.insert("visibility".into(), visibility.facts.clone());
    facts.insert("signals".into(), json!(signals));

    let mut issues = Vec::new();
    if !visibility.ok {
        issues.push("not_visible".to_string());
    }
    if signals.is_empty() {
        issues.push("no_click_signal".to_string());
    }
    if node
        .layout
        .as_ref()
        .map_or(false, |layout| layout.style.pointer_events == "none")
    {
        issues.push("pointer_events_none".to_string());
    }
    if is_disabled(node) {
        issues.push("disabled".to_string());
    }

    let ok = issues.is_empty();
    JudgeReport {
        ok,
        reason: format_reason(if ok { "clickable" } else { "not_clickable" }, &issues),
        facts: Value::Object(facts),
    }
}

pub fn enabled(node: &EnhancedNode) -> JudgeReport {
    let mut issues = Vec::new();
    if node.attr("disabled").is_some() || node.attr("aria-disabled") == Some("true") {
        issues.push("disabled".to_string());
    }
    if node.ax.as_ref().map_or(false, |ax| ax.flag("disabled")) {
        issues.push("ax_disabled".to_string());
    }
    if node.attr("readonly").is_some() {
        issues.push("readonly".to_string());
    }
    if node.ax.as_ref().map_or(false, |ax| ax.flag("readonly")) {
        issues.push("ax_readonly".to_string());
    }

    let ok = issues.is_empty();
    JudgeReport {
        ok,
        reason: format_reason(if ok { "enabled" } else { "disabled" }, &issues),
        facts: json!({ "issues": issues }),
    }
}

fn format_reason(base: &str, issues: &[String]) -> String {
    if issues.is_empty() {
        base.to_string()
    } else {
        format!("{}({})", base, issues.join(","))
    }
}
