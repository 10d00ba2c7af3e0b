//! Line formats shared by every rendering of a snapshot.

use serde::{Deserialize, Serialize};

use crate::model::{EnhancedNode, NodeId, ShadowMode, ShadowRootKind, SimpleId, Snapshot};
use crate::policy::SerializePolicy;
use crate::text::{collapse_whitespace, normalize, truncate_chars};

/// Accessibility states worth printing even when false.
const STATEFUL_FALSE: &[&str] = &["checked", "expanded", "pressed", "selected"];

const MAX_LISTED_OPTIONS: usize = 4;

/// Room kept at the end of truncated output for the marker line. Also the
/// smallest accepted character ceiling.
pub(crate) const MARKER_RESERVE: usize = 64;

/// Output was capped at the character ceiling. Not an error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationApplied {
    pub original_chars: usize,
    pub kept_chars: usize,
    pub truncated_chars: usize,
}

pub(crate) fn indent(depth: usize) -> String {
    "\t".repeat(depth)
}

pub(crate) fn markers(node: &EnhancedNode) -> String {
    let mut out = String::new();
    if node.is_scrollable() {
        out.push_str("|SCROLL|");
    }
    match node.raw.shadow_root {
        Some(ShadowRootKind::Author {
            mode: ShadowMode::Open,
        }) => out.push_str("|SHADOW(open)|"),
        Some(ShadowRootKind::Author {
            mode: ShadowMode::Closed,
        }) => out.push_str("|SHADOW(closed)|"),
        _ => {}
    }
    if node.is_frame() {
        out.push_str("|IFRAME|");
    }
    out
}

fn option_nodes(snapshot: &Snapshot, select: NodeId) -> Vec<NodeId> {
    let tree = &snapshot.enhanced;
    let mut found = Vec::new();
    let mut stack: Vec<NodeId> = tree.node(select).children.iter().rev().copied().collect();
    while let Some(id) = stack.pop() {
        let node = tree.node(id);
        match node.tag() {
            "option" => found.push(id),
            "optgroup" => stack.extend(node.children.iter().rev().copied()),
            _ => {}
        }
    }
    found
}

fn option_text(snapshot: &Snapshot, option: NodeId) -> String {
    let text = snapshot.enhanced.text_content(option, 2);
    if !text.is_empty() {
        return text;
    }
    let node = snapshot.enhanced.node(option);
    node.attr("label")
        .or_else(|| node.attr("value"))
        .map(collapse_whitespace)
        .unwrap_or_default()
}

fn selected_option(snapshot: &Snapshot, select: NodeId) -> Option<String> {
    let options = option_nodes(snapshot, select);
    if let Some(selected) = options
        .iter()
        .find(|id| snapshot.enhanced.node(**id).attr("selected").is_some())
    {
        return Some(option_text(snapshot, *selected));
    }
    let node = snapshot.enhanced.node(select);
    if let Some(value) = node.ax.as_ref().and_then(|ax| ax.value.as_deref()) {
        return Some(collapse_whitespace(value));
    }
    options.first().map(|id| option_text(snapshot, *id))
}

/// Visible text of an element, excluding text owned by nested indexed elements.
pub(crate) fn element_text(snapshot: &Snapshot, id: SimpleId, max_len: usize) -> String {
    let simplified = &snapshot.simplified;
    let node = snapshot.enhanced.node(simplified.get(id).node);
    if node.tag() == "select" {
        let selected = selected_option(snapshot, node.id).unwrap_or_default();
        return truncate_chars(&selected, max_len);
    }

    let mut parts = Vec::new();
    let mut stack: Vec<SimpleId> = simplified.get(id).children.iter().rev().copied().collect();
    while let Some(current) = stack.pop() {
        let simple = simplified.get(current);
        if simple.index.is_some() {
            continue;
        }
        let child = snapshot.enhanced.node(simple.node);
        if child.is_text() {
            if let Some(text) = child.raw.text.as_deref() {
                parts.push(text.trim().to_string());
            }
            continue;
        }
        stack.extend(simple.children.iter().rev().copied());
    }
    truncate_chars(&collapse_whitespace(&parts.join(" ")), max_len)
}

fn attribute_value(node: &EnhancedNode, name: &str) -> Option<String> {
    if let Some(value) = node.attr(name) {
        return Some(value.to_string());
    }
    let ax = node.ax.as_ref().filter(|ax| !ax.ignored)?;
    if name == "value" {
        return ax.value.clone();
    }
    let value = ax.property(name)?;
    if value == "false" && !STATEFUL_FALSE.contains(&name) {
        return None;
    }
    Some(value.to_string())
}

/// Curated attributes in configured order, with duplicates of the text and of each other removed.
pub(crate) fn curated_attributes(
    node: &EnhancedNode,
    text: &str,
    policy: &SerializePolicy,
) -> Vec<(String, String)> {
    let normalized_text = normalize(text);
    let mut pairs: Vec<(String, String)> = Vec::new();
    for name in &policy.include_attributes {
        if name == "ax_name" {
            continue;
        }
        let Some(value) = attribute_value(node, name) else {
            continue;
        };
        let value = truncate_chars(value.trim(), policy.max_attribute_len);
        let normalized = normalize(&value);
        if name != "type" && !normalized.is_empty() && normalized == normalized_text {
            continue;
        }
        if value.chars().count() > 5 && pairs.iter().any(|(_, seen)| normalize(seen) == normalized)
        {
            continue;
        }
        pairs.push((name.clone(), value));
    }

    if policy.include_attributes.iter().any(|name| name == "ax_name") {
        if let Some(name) = node.ax_name() {
            let name = truncate_chars(&collapse_whitespace(name), policy.max_attribute_len);
            let normalized = normalize(&name);
            let repeated = normalized == normalized_text
                || pairs.iter().any(|(_, value)| normalize(value) == normalized);
            if !repeated {
                pairs.push(("ax_name".to_string(), name));
            }
        }
    }
    pairs
}

fn render_pair(name: &str, value: &str) -> String {
    if value.is_empty() {
        name.to_string()
    } else if value.chars().any(char::is_whitespace) {
        format!("{name}=\"{}\"", value.replace('"', "'"))
    } else {
        format!("{name}={value}")
    }
}

/// Auxiliary state of native composite controls, detected from tag and children.
pub(crate) fn compound_components(snapshot: &Snapshot, id: NodeId) -> Option<String> {
    let tree = &snapshot.enhanced;
    let node = tree.node(id);
    let input_type = node
        .attr("type")
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let current = || {
        node.attr("value")
            .map(str::to_string)
            .or_else(|| node.ax.as_ref().and_then(|ax| ax.value.clone()))
    };
    let parts: Vec<String> = match (node.tag(), input_type.as_str()) {
        ("select", _) => {
            let options = option_nodes(snapshot, id);
            let mut listed: Vec<String> = options
                .iter()
                .take(MAX_LISTED_OPTIONS)
                .map(|option| truncate_chars(&option_text(snapshot, *option), 30))
                .collect();
            if options.len() > MAX_LISTED_OPTIONS {
                listed.push("…".to_string());
            }
            let mut parts = vec![
                "role=listbox".to_string(),
                "name=Options".to_string(),
                format!("count={}", options.len()),
                format!("options={}", listed.join("|")),
            ];
            if let Some(selected) = selected_option(snapshot, id) {
                parts.push(format!("selected={selected}"));
            }
            parts
        }
        ("input", "range") => {
            let min = node.attr("min").unwrap_or("0").to_string();
            let max = node.attr("max").unwrap_or("100").to_string();
            let value = current().unwrap_or_else(|| {
                let low = min.parse::<f64>().unwrap_or(0.0);
                let high = max.parse::<f64>().unwrap_or(100.0);
                format!("{}", (low + high) / 2.0)
            });
            vec![
                "role=slider".to_string(),
                format!("min={min}"),
                format!("max={max}"),
                format!("value={value}"),
            ]
        }
        ("input", "number") => {
            let mut parts = vec!["role=spinbutton".to_string()];
            if let Some(min) = node.attr("min") {
                parts.push(format!("min={min}"));
            }
            if let Some(max) = node.attr("max") {
                parts.push(format!("max={max}"));
            }
            if let Some(value) = current().filter(|value| !value.is_empty()) {
                parts.push(format!("value={value}"));
            }
            parts
        }
        ("input", "file") => {
            let selected = current()
                .map(|value| value.rsplit(['\\', '/']).next().unwrap_or_default().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "none".to_string());
            vec![
                "role=button".to_string(),
                "name=Browse Files".to_string(),
                format!("selected={selected}"),
            ]
        }
        ("summary", _) => {
            let details = tree.parent(id).filter(|parent| parent.tag() == "details")?;
            vec![
                "role=button".to_string(),
                format!("expanded={}", details.attr("open").is_some()),
            ]
        }
        _ => return None,
    };
    Some(format!("({})", parts.join(",")))
}

fn attribute_block(snapshot: &Snapshot, node: &EnhancedNode, text: &str, policy: &SerializePolicy) -> String {
    let mut rendered: Vec<String> = curated_attributes(node, text, policy)
        .iter()
        .map(|(name, value)| render_pair(name, value))
        .collect();
    if let Some(compound) = compound_components(snapshot, node.id) {
        rendered.push(format!("compound_components={compound}"));
    }
    if rendered.is_empty() {
        String::new()
    } else {
        format!(" {}", rendered.join(" "))
    }
}

/// `[i]<tag attrs>text</tag>` for an indexed element, without indentation.
pub(crate) fn element_line(snapshot: &Snapshot, id: SimpleId, policy: &SerializePolicy) -> String {
    let simple = snapshot.simplified.get(id);
    let node = snapshot.enhanced.node(simple.node);
    let text = element_text(snapshot, id, policy.max_text_len);
    let prefix = simple
        .index
        .map(|index| format!("[{index}]"))
        .unwrap_or_default();
    let attrs = attribute_block(snapshot, node, &text, policy);
    let mut line = if text.is_empty() {
        format!("{prefix}{}<{}{attrs} />", markers(node), node.tag())
    } else {
        format!("{prefix}{}<{}{attrs}>{text}</{}>", markers(node), node.tag(), node.tag())
    };
    if node.placeholder {
        line.push_str(" (content unavailable)");
    }
    line
}

/// Marker line for a non-indexed scroll container, shadow host or frame.
pub(crate) fn context_line(snapshot: &Snapshot, id: SimpleId, policy: &SerializePolicy) -> String {
    let node = snapshot.enhanced.node(snapshot.simplified.get(id).node);
    let attrs = attribute_block(snapshot, node, "", policy);
    if node.placeholder {
        format!("{}<{}{attrs}> (content unavailable)", markers(node), node.tag())
    } else {
        format!("{}<{}{attrs} />", markers(node), node.tag())
    }
}

/// Caps `text` at `max_chars` on a line boundary and appends the marker.
pub(crate) fn truncate_output(text: String, max_chars: usize) -> (String, Option<TruncationApplied>) {
    let original_chars = text.chars().count();
    if original_chars <= max_chars {
        return (text, None);
    }
    let budget = max_chars.saturating_sub(MARKER_RESERVE);
    let mut kept = String::new();
    let mut kept_chars = 0;
    for line in text.lines() {
        let cost = line.chars().count() + usize::from(!kept.is_empty());
        if kept_chars + cost > budget {
            break;
        }
        if !kept.is_empty() {
            kept.push('\n');
        }
        kept.push_str(line);
        kept_chars += cost;
    }
    if kept.is_empty() {
        kept = text.chars().take(budget).collect();
        kept_chars = kept.chars().count();
    }
    let truncated_chars = original_chars - kept_chars;
    if !kept.is_empty() {
        kept.push('\n');
    }
    kept.push_str(&format!(
        "... more content below ({truncated_chars} characters truncated) ..."
    ));
    // The ceiling holds even when it cannot fit the whole marker.
    if kept.chars().count() > max_chars {
        kept = kept.chars().take(max_chars).collect();
    }
    (
        kept,
        Some(TruncationApplied {
            original_chars,
            kept_chars,
            truncated_chars,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_quote_only_when_needed() {
        assert_eq!(render_pair("required", ""), "required");
        assert_eq!(render_pair("type", "email"), "type=email");
        assert_eq!(
            render_pair("placeholder", "Your \"work\" email"),
            "placeholder=\"Your 'work' email\""
        );
    }

    #[test]
    fn truncation_keeps_whole_lines_and_always_marks() {
        let text = (0..50)
            .map(|i| format!("line number {i:02}"))
            .collect::<Vec<_>>()
            .join("\n");
        let (out, applied) = truncate_output(text.clone(), 200);
        let applied = applied.expect("truncated");
        assert!(out.ends_with("characters truncated) ..."));
        assert!(out.chars().count() <= 200);
        assert_eq!(applied.original_chars, text.chars().count());
        assert_eq!(applied.kept_chars + applied.truncated_chars, applied.original_chars);
        for line in out.lines().filter(|line| !line.starts_with("...")) {
            assert!(line.starts_with("line number "), "partial line {line}");
        }

        let (out, applied) = truncate_output("short".into(), 200);
        assert_eq!(out, "short");
        assert!(applied.is_none());
    }

    #[test]
    fn single_oversized_line_is_still_cut_with_marker() {
        let (out, applied) = truncate_output("x".repeat(500), 100);
        assert!(applied.is_some());
        assert!(out.contains("more content below"));
        assert!(out.starts_with("xxxx"));
    }

    #[test]
    fn ceiling_at_the_marker_reserve_keeps_only_the_marker() {
        let text = "word ".repeat(40);
        let (out, applied) = truncate_output(text.clone(), MARKER_RESERVE);
        let applied = applied.expect("truncated");
        assert!(out.chars().count() <= MARKER_RESERVE);
        assert!(out.starts_with("... more content below"));
        assert_eq!(applied.kept_chars, 0);
        assert_eq!(applied.truncated_chars, text.chars().count());

        let (out, _) = truncate_output(text, 20);
        assert_eq!(out.chars().count(), 20);
    }
}
