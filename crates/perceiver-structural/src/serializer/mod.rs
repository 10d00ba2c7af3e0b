//! Text renderings of a snapshot for a decision-making consumer.

mod flat;
mod format;
pub mod landmarks;
mod outline;

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::events;
use crate::model::Snapshot;
use crate::policy::{SerializeMode, SerializePolicy};

pub(crate) use format::MARKER_RESERVE;
pub use format::TruncationApplied;
pub use landmarks::{
    analyze, classify, detect_unchanged_regions, ElementContext, HeadingNode, LandmarkAnalysis,
    LandmarkFingerprints, LandmarkRef, LandmarkRegion, LandmarkRole, RegionFingerprint,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedPage {
    pub text: String,
    pub mode: SerializeMode,
    pub truncation: Option<TruncationApplied>,
    /// Number of indices in the snapshot, printed or not.
    pub index_count: usize,
}

impl SerializedPage {
    pub fn is_truncated(&self) -> bool {
        self.truncation.is_some()
    }
}

/// Renders `snapshot` in the configured mode, capped at `policy.max_chars`.
///
/// `previous` is only read in outline mode with `annotate_unchanged` set; it
/// adds a suffix to region headers and never hides content.
pub fn serialize(
    snapshot: &Snapshot,
    policy: &SerializePolicy,
    previous: Option<&LandmarkFingerprints>,
) -> SerializedPage {
    let started = Instant::now();
    let lines = match policy.mode {
        SerializeMode::Flat => flat::render(snapshot, policy),
        SerializeMode::Outline => outline::render(snapshot, policy, previous),
    };
    let (text, truncation) = format::truncate_output(lines.join("\n"), policy.max_chars);
    events::emit_serialize(policy.mode, text.chars().count(), truncation.is_some(), started.elapsed());
    SerializedPage {
        text,
        mode: policy.mode,
        truncation,
        index_count: snapshot.interactive_count(),
    }
}

/// The element line printed for `index`, without indentation.
pub fn element_line(snapshot: &Snapshot, index: u32, policy: &SerializePolicy) -> Option<String> {
    snapshot
        .simple_for_index(index)
        .map(|id| format::element_line(snapshot, id, policy))
}

pub(crate) fn element_text(snapshot: &Snapshot, index: u32, max_len: usize) -> Option<String> {
    snapshot
        .simple_for_index(index)
        .map(|id| format::element_text(snapshot, id, max_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::fixture::{snapshot, snapshot_with_identity, TreeBuilder};
    use crate::model::{ShadowMode, ShadowRootKind};
    use cdp_adapter::DocumentIdentity;

    fn flat() -> SerializePolicy {
        SerializePolicy::default()
    }

    fn outline() -> SerializePolicy {
        SerializePolicy {
            mode: SerializeMode::Outline,
            ..SerializePolicy::default()
        }
    }

    fn element_lines(text: &str) -> Vec<String> {
        text.lines()
            .map(str::trim_start)
            .filter(|line| line.starts_with('[') || line.starts_with('|'))
            .map(str::to_string)
            .collect()
    }

    fn login_page() -> TreeBuilder {
        let mut b = TreeBuilder::without_layout();
        let doc = b.document();
        let body = b.element(doc, "body", &[]);
        let intro = b.element(body, "p", &[]);
        b.text(intro, "Welcome back");
        let form = b.element(body, "form", &[]);
        b.element(form, "input", &[("type", "email"), ("placeholder", "Email")]);
        let submit = b.element(form, "button", &[]);
        b.text(submit, "Sign In");
        b
    }

    #[test]
    fn flat_output_lists_text_and_indexed_elements() {
        let snap = snapshot(login_page().tree);
        let page = serialize(&snap, &flat(), None);
        assert_eq!(
            page.text,
            "Welcome back\n[1]<input type=email placeholder=Email />\n[2]<button>Sign In</button>"
        );
        assert_eq!(page.index_count, 2);
        assert!(!page.is_truncated());
    }

    #[test]
    fn nested_navigation_renders_once_under_its_own_header() {
        let mut b = TreeBuilder::without_layout();
        let doc = b.document();
        let body = b.element(doc, "body", &[]);
        let header = b.element(body, "header", &[]);
        let nav = b.element(header, "nav", &[]);
        let home = b.element(nav, "a", &[("href", "/home")]);
        b.text(home, "Home");
        let menu = b.element(header, "button", &[]);
        b.text(menu, "Menu");
        let main = b.element(body, "main", &[]);
        let title = b.element(main, "h1", &[]);
        b.text(title, "Products");
        let buy = b.element(main, "a", &[("href", "/buy")]);
        b.text(buy, "Buy");
        let help = b.element(body, "a", &[("href", "/help")]);
        b.text(help, "Help");

        let snap = snapshot(b.tree);
        let page = serialize(&snap, &outline(), None);
        let expected = [
            "=== PAGE OUTLINE ===",
            "BANNER",
            "\t[2]<button>Menu</button>",
            "\tNAVIGATION",
            "\t\t[1]<a href=/home>Home</a>",
            "MAIN",
            "\t# Products",
            "\t[3]<a href=/buy>Buy</a>",
            "(ungrouped)",
            "[4]<a href=/help>Help</a>",
            "=== END OUTLINE ===",
        ]
        .join("\n");
        assert_eq!(page.text, expected);
        assert_eq!(page.text.matches("Home").count(), 1);
    }

    #[test]
    fn landmark_free_outline_matches_flat_element_lines() {
        let mut b = login_page();
        let doc = b.tree.root().expect("root");
        let body = b.tree.node(doc).children[0];
        let heading = b.element(body, "h2", &[]);
        b.text(heading, "Need help?");
        let link = b.element(body, "a", &[("href", "/reset"), ("aria-label", "Reset password")]);
        b.ax(link, "link", "Reset password");
        b.text(link, "Forgot?");
        let snap = snapshot(b.tree);

        let flat_page = serialize(&snap, &flat(), None);
        let outline_page = serialize(&snap, &outline(), None);
        assert!(outline_page.text.contains("(ungrouped)"));
        assert!(outline_page.text.contains("## Need help?"));
        assert_eq!(element_lines(&flat_page.text), element_lines(&outline_page.text));
        assert!(flat_page
            .text
            .contains("[3]<a href=/reset aria-label=\"Reset password\">Forgot?</a>"));
    }

    #[test]
    fn only_author_shadow_roots_are_marked() {
        let mut b = TreeBuilder::without_layout();
        let doc = b.document();
        let body = b.element(doc, "body", &[]);
        let select = b.element(body, "select", &[("name", "color")]);
        b.tree.node_mut(select).raw.shadow_root = Some(ShadowRootKind::UserAgent);
        for (label, selected) in [("Red", false), ("Green", true), ("Blue", false)] {
            let attrs: &[(&str, &str)] = if selected { &[("selected", "")] } else { &[] };
            let option = b.element(select, "option", attrs);
            b.text(option, label);
        }
        let widget = b.element(body, "my-widget", &[]);
        b.tree.node_mut(widget).raw.shadow_root = Some(ShadowRootKind::Author {
            mode: ShadowMode::Open,
        });
        let go = b.element(widget, "button", &[]);
        b.text(go, "Go");

        let page = serialize(&snapshot(b.tree), &flat(), None);
        let lines: Vec<&str> = page.text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[1]<select name=color compound_components=(role=listbox,name=Options,count=3,options=Red|Green|Blue,selected=Green)>Green</select>",
                "|SHADOW(open)|<my-widget />",
                "\t[2]<button>Go</button>",
            ]
        );
    }

    #[test]
    fn range_and_file_inputs_show_their_state() {
        let mut b = TreeBuilder::without_layout();
        let doc = b.document();
        b.element(doc, "input", &[("type", "range"), ("min", "1"), ("max", "5"), ("value", "3")]);
        b.element(doc, "input", &[("type", "file")]);
        let page = serialize(&snapshot(b.tree), &flat(), None);
        assert!(page
            .text
            .contains("compound_components=(role=slider,min=1,max=5,value=3)"));
        assert!(page
            .text
            .contains("compound_components=(role=button,name=Browse Files,selected=none)"));
    }

    #[test]
    fn long_pages_are_cut_with_marker() {
        let mut b = TreeBuilder::without_layout();
        let doc = b.document();
        for i in 0..200 {
            let button = b.element(doc, "button", &[]);
            b.text(button, &format!("Action number {i}"));
        }
        let policy = SerializePolicy {
            max_chars: 500,
            ..SerializePolicy::default()
        };
        let page = serialize(&snapshot(b.tree), &policy, None);
        let truncation = page.truncation.as_ref().expect("truncated");
        assert!(truncation.truncated_chars > 0);
        assert!(page.text.contains("more content below"));
        assert!(page.text.chars().count() <= 500);
        assert_eq!(page.index_count, 200);
    }

    #[test]
    fn unchanged_regions_are_annotated_only_on_request() {
        let mut b = TreeBuilder::without_layout();
        let doc = b.document();
        let nav = b.element(doc, "nav", &[("aria-label", "Primary")]);
        let link = b.element(nav, "a", &[("href", "/")]);
        b.text(link, "Home");
        let snap = snapshot(b.tree.clone());
        let previous = LandmarkFingerprints::capture(&snap);

        let plain = serialize(&snap, &outline(), Some(&previous));
        assert!(!plain.text.contains("unchanged"));

        let annotate = SerializePolicy {
            annotate_unchanged: true,
            ..outline()
        };
        let marked = serialize(&snap, &annotate, Some(&previous));
        assert!(marked
            .text
            .contains("NAVIGATION \"Primary\" (unchanged since last step)"));
        assert!(marked.text.contains("[1]<a href=/>Home</a>"));

        let navigated = snapshot_with_identity(
            b.tree,
            DocumentIdentity {
                frame_id: "MAIN".into(),
                loader_id: "L2".into(),
                url: "https://example.com/next".into(),
            },
        );
        let fresh = serialize(&navigated, &annotate, Some(&previous));
        assert!(!fresh.text.contains("unchanged"));
    }

    #[test]
    fn unchanged_detection_is_conservative() {
        let mut b = TreeBuilder::without_layout();
        let doc = b.document();
        let nav = b.element(doc, "nav", &[]);
        let link = b.element(nav, "a", &[("href", "/")]);
        b.text(link, "Home");
        let before = LandmarkFingerprints::capture(&snapshot(b.tree.clone()));
        let extra = b.element(nav, "a", &[("href", "/more")]);
        b.text(extra, "More");
        let after = LandmarkFingerprints::capture(&snapshot(b.tree));

        assert_eq!(detect_unchanged_regions(&after, None).get("navigation:"), Some(&false));
        assert_eq!(
            detect_unchanged_regions(&before, Some(&before)).get("navigation:"),
            Some(&true)
        );
        assert_eq!(
            detect_unchanged_regions(&after, Some(&before)).get("navigation:"),
            Some(&false)
        );
    }

    #[test]
    fn forms_need_a_name_and_scoped_headers_are_not_banners() {
        let mut b = TreeBuilder::without_layout();
        let doc = b.document();
        let anonymous = b.element(doc, "form", &[]);
        b.element(anonymous, "input", &[("name", "q")]);
        let named = b.element(doc, "form", &[("aria-label", "Login")]);
        b.element(named, "input", &[("name", "user")]);
        let article = b.element(doc, "article", &[]);
        let article_header = b.element(article, "header", &[]);
        let share = b.element(article_header, "button", &[]);
        b.text(share, "Share");

        let snap = snapshot(b.tree);
        let analysis = analyze(&snap);
        let keys: Vec<&str> = analysis
            .flatten()
            .into_iter()
            .map(|region| region.landmark.key.as_str())
            .collect();
        assert_eq!(keys, vec!["form:Login"]);
        assert_eq!(analysis.ungrouped_elements, vec![1, 3]);
        assert_eq!(
            analysis.context(2).and_then(|ctx| ctx.landmark()).map(|l| l.label()),
            Some("FORM \"Login\"".to_string())
        );
    }

    #[test]
    fn rendering_is_deterministic() {
        let snap = snapshot(login_page().tree);
        assert_eq!(
            serialize(&snap, &outline(), None),
            serialize(&snap, &outline(), None)
        );
    }
}
