//! Read-only queries over one snapshot.
//!
//! The engine analyses landmarks once on construction; every operation after
//! that is a pure function of the snapshot. Misses come back as explicit
//! empty or not-found values.

mod detail;
mod region;
mod scoring;
mod search;
mod summary;

use std::time::Instant;

use crate::events;
use crate::model::Snapshot;
use crate::policy::{ObservePolicy, QueryPolicy, SerializePolicy};
use crate::serializer::{self, LandmarkAnalysis};

pub use detail::{DetailLookup, ElementDetail};
pub use region::{RegionExpansion, RegionLookup};
pub use search::{QueryResult, SearchQuery, SearchResults};
pub use summary::{LandmarkSummary, PageSummary};

pub struct QueryEngine<'a> {
    snapshot: &'a Snapshot,
    analysis: LandmarkAnalysis,
    policy: &'a QueryPolicy,
    serialize: &'a SerializePolicy,
}

impl<'a> QueryEngine<'a> {
    pub fn new(snapshot: &'a Snapshot, policy: &'a ObservePolicy) -> Self {
        Self {
            snapshot,
            analysis: serializer::analyze(snapshot),
            policy: &policy.query,
            serialize: &policy.serialize,
        }
    }

    pub fn analysis(&self) -> &LandmarkAnalysis {
        &self.analysis
    }

    pub fn search(&self, query: &SearchQuery) -> SearchResults {
        let started = Instant::now();
        let results = search::search(
            self.snapshot,
            &self.analysis,
            query,
            query.max_results.unwrap_or(self.policy.max_results),
            self.policy.fuzzy_threshold,
            self.serialize.max_text_len,
        );
        events::emit_query("search", results.results.len(), started.elapsed());
        results
    }

    pub fn page_summary(&self) -> PageSummary {
        let started = Instant::now();
        let summary =
            PageSummary::from_analysis(&self.analysis, self.snapshot.interactive_count());
        events::emit_query("page_summary", summary.landmarks.len(), started.elapsed());
        summary
    }

    /// Elements of the first region matching `landmark`, optionally only those under `heading`.
    pub fn expand_region(&self, landmark: &str, heading: Option<&str>) -> RegionLookup {
        let started = Instant::now();
        let lookup = region::expand(
            self.snapshot,
            &self.analysis,
            landmark,
            heading,
            self.serialize,
        );
        let count = lookup.found().map_or(0, |expansion| expansion.indices.len());
        events::emit_query("expand_region", count, started.elapsed());
        lookup
    }

    pub fn element_detail(&self, index: u32) -> DetailLookup {
        let started = Instant::now();
        let lookup = detail::detail(self.snapshot, &self.analysis, index, self.serialize);
        let count = usize::from(lookup.found().is_some());
        events::emit_query("element_detail", count, started.elapsed());
        lookup
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PerceiverError;
    use crate::filter::fixture::{snapshot, TreeBuilder};

    fn policy() -> ObservePolicy {
        ObservePolicy::default()
    }

    fn auth_page() -> Snapshot {
        let mut b = TreeBuilder::without_layout();
        let doc = b.document();
        let body = b.element(doc, "body", &[]);
        let register = b.element(body, "button", &[]);
        b.text(register, "Register");
        let sign_in = b.element(body, "button", &[]);
        b.text(sign_in, "Sign In");
        snapshot(b.tree)
    }

    fn shop_page() -> Snapshot {
        let mut b = TreeBuilder::without_layout();
        let doc = b.document();
        let body = b.element(doc, "body", &[]);
        let header = b.element(body, "header", &[]);
        let nav = b.element(header, "nav", &[("aria-label", "Primary")]);
        let home = b.element(nav, "a", &[("href", "/")]);
        b.text(home, "Home");
        let deals = b.element(nav, "a", &[("href", "/deals")]);
        b.text(deals, "Deals");
        let main = b.element(body, "main", &[]);
        let shoes = b.element(main, "h2", &[]);
        b.text(shoes, "Shoes");
        let boots = b.element(main, "a", &[("href", "/boots")]);
        b.text(boots, "Boots");
        let hats = b.element(main, "h2", &[]);
        b.text(hats, "Hats");
        let cap = b.element(main, "a", &[("href", "/cap")]);
        b.text(cap, "Cap");
        let buy = b.element(main, "button", &[("id", "buy"), ("type", "submit")]);
        b.text(buy, "Buy now");
        let terms = b.element(body, "a", &[("href", "/terms")]);
        b.text(terms, "Terms");
        snapshot(b.tree)
    }

    #[test]
    fn login_ranks_sign_in_first() {
        let snap = auth_page();
        let policy = policy();
        let engine = QueryEngine::new(&snap, &policy);

        let found = engine.search(&SearchQuery::text("login"));
        assert!(!found.is_empty());
        assert_eq!(found.results[0].text, "Sign In");
        assert_eq!(found.results[0].index, 2);
        assert!(found
            .results
            .iter()
            .all(|result| result.text != "Register" || result.score < found.results[0].score));
        assert!(found.results[0].reason.starts_with("score="));
    }

    #[test]
    fn structural_filters_are_hard_constraints() {
        let snap = shop_page();
        let policy = policy();
        let engine = QueryEngine::new(&snap, &policy);

        let links = engine.search(&SearchQuery::default().with_role("link").with_landmark("navigation"));
        let texts: Vec<&str> = links.results.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["Home", "Deals"]);
        assert!(links.results.iter().all(|r| r.landmark.as_deref() == Some("NAVIGATION \"Primary\"")));

        let scoped = engine.search(&SearchQuery::default().with_heading("hats"));
        let texts: Vec<&str> = scoped.results.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["Cap", "Buy now"]);

        let by_attr = engine.search(&SearchQuery::default().with_attribute("id", "BUY"));
        assert_eq!(by_attr.results.len(), 1);
        assert_eq!(by_attr.results[0].tag, "button");

        let nothing = engine.search(&SearchQuery::text("boots").with_landmark("navigation"));
        assert!(nothing.is_empty());
        assert_eq!(nothing.total_matches, 0);
    }

    #[test]
    fn result_limit_keeps_total() {
        let snap = shop_page();
        let policy = policy();
        let engine = QueryEngine::new(&snap, &policy);
        let query = SearchQuery {
            role: Some("link".into()),
            max_results: Some(2),
            ..SearchQuery::default()
        };
        let found = engine.search(&query);
        assert_eq!(found.results.len(), 2);
        assert_eq!(found.total_matches, 5);
        assert_eq!(found.results[0].index, 1);
    }

    #[test]
    fn page_summary_lists_regions_and_headings() {
        let snap = shop_page();
        let policy = policy();
        let summary = QueryEngine::new(&snap, &policy).page_summary();

        assert_eq!(summary.total_elements, 6);
        assert_eq!(summary.ungrouped_elements, 1);
        let counts: Vec<(String, usize, usize)> = summary
            .landmarks
            .iter()
            .map(|l| (l.landmark.label(), l.depth, l.element_count))
            .collect();
        assert_eq!(
            counts,
            vec![
                ("BANNER".to_string(), 0, 2),
                ("NAVIGATION \"Primary\"".to_string(), 1, 2),
                ("MAIN".to_string(), 0, 3),
            ]
        );
        let rendered = summary.render();
        assert!(rendered.starts_with("Page summary: 6 interactive elements"));
        assert!(rendered.contains("  NAVIGATION \"Primary\" (2 elements)"));
        assert!(rendered.contains("MAIN (3 elements)\n  ## Shoes\n  ## Hats"));
        assert!(rendered.ends_with("(ungrouped) (1 element)"));
    }

    #[test]
    fn region_expansion_uses_serializer_lines() {
        let snap = shop_page();
        let policy = policy();
        let engine = QueryEngine::new(&snap, &policy);

        let banner = engine.expand_region("banner", None);
        let expansion = banner.found().expect("banner region");
        assert_eq!(expansion.indices, vec![1, 2]);
        assert_eq!(expansion.lines[0], "[1]<a href=/>Home</a>");

        let hats = engine.expand_region("main", Some("Hats"));
        let expansion = hats.found().expect("main region");
        assert_eq!(expansion.indices, vec![4, 5]);
        assert_eq!(
            expansion.render(),
            "MAIN > \"Hats\"\n\t[4]<a href=/cap>Cap</a>\n\t[5]<button type=submit id=buy>Buy now</button>"
        );

        assert_eq!(
            engine.expand_region("search", None),
            RegionLookup::NotFound {
                landmark: "search".into()
            }
        );
    }

    #[test]
    fn heading_scope_reaches_into_nested_regions() {
        let mut b = TreeBuilder::without_layout();
        let doc = b.document();
        let body = b.element(doc, "body", &[]);
        let main = b.element(body, "main", &[]);
        let shoes = b.element(main, "h2", &[]);
        b.text(shoes, "Shoes");
        let boots = b.element(main, "a", &[("href", "/boots")]);
        b.text(boots, "Boots");
        let hats = b.element(main, "h2", &[]);
        b.text(hats, "Hats");
        let brands = b.element(main, "nav", &[("aria-label", "Hat brands")]);
        let acme = b.element(brands, "a", &[("href", "/acme")]);
        b.text(acme, "Acme");
        let cap = b.element(main, "a", &[("href", "/cap")]);
        b.text(cap, "Cap");
        let snap = snapshot(b.tree);
        let policy = policy();
        let engine = QueryEngine::new(&snap, &policy);

        let hats = engine.expand_region("main", Some("hats"));
        assert_eq!(hats.found().expect("main region").indices, vec![2, 3]);
        let shoes = engine.expand_region("main", Some("Shoes"));
        assert_eq!(shoes.found().expect("main region").indices, vec![1]);
        let nested = engine.expand_region("Hat brands", Some("Hats"));
        assert!(nested.found().expect("brands region").indices.is_empty());
    }

    #[test]
    fn element_detail_reports_context_and_misses() {
        let snap = shop_page();
        let policy = policy();
        let engine = QueryEngine::new(&snap, &policy);

        let detail = engine.element_detail(4);
        let detail = detail.found().expect("index 4");
        assert_eq!(detail.tag, "a");
        assert_eq!(detail.text, "Cap");
        assert_eq!(detail.parent_tag.as_deref(), Some("main"));
        assert_eq!(detail.heading.as_deref(), Some("Hats"));
        assert_eq!(detail.landmark.as_ref().map(|l| l.label()), Some("MAIN".to_string()));
        assert!(detail.roles.contains(&"link".to_string()));
        assert!(detail.enabled.ok);
        assert_eq!(detail.line, "[4]<a href=/cap>Cap</a>");

        let missing = engine.element_detail(99);
        assert_eq!(missing, DetailLookup::NotFound { index: 99 });
        assert!(matches!(
            missing.into_result(),
            Err(PerceiverError::IndexNotFound(99))
        ));
    }
}
