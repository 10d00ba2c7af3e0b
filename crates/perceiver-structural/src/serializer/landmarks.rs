//! Landmark regions and heading hierarchy of a snapshot.
//!
//! A single walk over the simplified tree yields the region tree, the heading
//! tree of every region, and the structural context (landmark path, heading
//! path) of every indexed element. Outline rendering, the page summary and
//! scoped search all read from the same [`LandmarkAnalysis`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use cdp_adapter::DocumentIdentity;
use serde::{Deserialize, Serialize};

use crate::judges;
use crate::model::{EnhancedNode, EnhancedTree, SimpleId, Snapshot};

/// Ancestors that turn header/footer into sectioning content instead of page landmarks.
const SECTIONING_TAGS: &[&str] = &["article", "section", "aside", "main", "nav"];
const SECTIONING_ROLES: &[&str] = &["article", "region", "complementary", "main", "navigation"];

const HEADING_TEXT_DEPTH: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LandmarkRole {
    Banner,
    Navigation,
    Main,
    Complementary,
    Contentinfo,
    Search,
    Form,
    Region,
}

impl LandmarkRole {
    pub fn from_role(role: &str) -> Option<Self> {
        let role = match role.to_ascii_lowercase().as_str() {
            "banner" => LandmarkRole::Banner,
            "navigation" => LandmarkRole::Navigation,
            "main" => LandmarkRole::Main,
            "complementary" => LandmarkRole::Complementary,
            "contentinfo" => LandmarkRole::Contentinfo,
            "search" => LandmarkRole::Search,
            "form" => LandmarkRole::Form,
            "region" => LandmarkRole::Region,
            _ => return None,
        };
        Some(role)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LandmarkRole::Banner => "banner",
            LandmarkRole::Navigation => "navigation",
            LandmarkRole::Main => "main",
            LandmarkRole::Complementary => "complementary",
            LandmarkRole::Contentinfo => "contentinfo",
            LandmarkRole::Search => "search",
            LandmarkRole::Form => "form",
            LandmarkRole::Region => "region",
        }
    }

    /// `form` and `region` only count as landmarks when they carry an accessible name.
    pub fn requires_name(&self) -> bool {
        matches!(self, LandmarkRole::Form | LandmarkRole::Region)
    }

    fn from_tag(tag: &str) -> Option<Self> {
        let role = match tag {
            "header" => LandmarkRole::Banner,
            "nav" => LandmarkRole::Navigation,
            "main" => LandmarkRole::Main,
            "aside" => LandmarkRole::Complementary,
            "footer" => LandmarkRole::Contentinfo,
            "search" => LandmarkRole::Search,
            "form" => LandmarkRole::Form,
            "section" => LandmarkRole::Region,
            _ => return None,
        };
        Some(role)
    }
}

impl std::fmt::Display for LandmarkRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a region as seen from an element inside it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandmarkRef {
    pub role: LandmarkRole,
    pub name: Option<String>,
    /// `role:name`, suffixed with `#n` when several regions share it.
    pub key: String,
}

impl LandmarkRef {
    /// Header text: `NAVIGATION "Main menu"`.
    pub fn label(&self) -> String {
        let role = self.role.as_str().to_ascii_uppercase();
        match &self.name {
            Some(name) => format!("{role} \"{name}\""),
            None => role,
        }
    }

    /// Case-insensitive match against role, key or name.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return false;
        }
        self.role.as_str() == query
            || self.key.to_lowercase() == query
            || self
                .name
                .as_deref()
                .map_or(false, |name| name.to_lowercase().contains(&query))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeadingNode {
    pub level: u8,
    pub text: String,
    #[serde(skip)]
    pub node: Option<SimpleId>,
    pub index: Option<u32>,
    /// Key of the enclosing region, `None` at page level.
    pub landmark: Option<String>,
    pub children: Vec<HeadingNode>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LandmarkRegion {
    pub landmark: LandmarkRef,
    #[serde(skip)]
    pub node: Option<SimpleId>,
    pub depth: usize,
    /// Interactive elements anywhere below the region, nested regions included.
    pub element_count: usize,
    /// Indices scoped directly to this region, excluding nested regions.
    pub elements: Vec<u32>,
    pub headings: Vec<HeadingNode>,
    /// Headings of the enclosing region still open where this one starts.
    #[serde(default)]
    pub opened_under: Vec<String>,
    pub sub_regions: Vec<LandmarkRegion>,
}

impl LandmarkRegion {
    /// Every index below the region in document order, nested regions included.
    pub fn all_elements(&self) -> Vec<u32> {
        let mut all = self.elements.clone();
        for sub in &self.sub_regions {
            all.extend(sub.all_elements());
        }
        all.sort_unstable();
        all
    }

    pub(crate) fn visit<'a>(&'a self, out: &mut Vec<&'a LandmarkRegion>) {
        out.push(self);
        for sub in &self.sub_regions {
            sub.visit(out);
        }
    }
}

/// Structural position of one indexed element.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementContext {
    /// Outermost first.
    pub landmarks: Vec<LandmarkRef>,
    /// Open headings of the innermost region, outermost first.
    pub headings: Vec<String>,
}

impl ElementContext {
    pub fn landmark(&self) -> Option<&LandmarkRef> {
        self.landmarks.last()
    }

    pub fn heading(&self) -> Option<&str> {
        self.headings.last().map(String::as_str)
    }

    pub fn in_landmark(&self, query: &str) -> bool {
        self.landmarks.iter().any(|landmark| landmark.matches(query))
    }

    pub fn under_heading(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        !query.is_empty()
            && self
                .headings
                .iter()
                .any(|heading| heading.to_lowercase().contains(&query))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkAnalysis {
    pub regions: Vec<LandmarkRegion>,
    pub ungrouped_elements: Vec<u32>,
    pub ungrouped_headings: Vec<HeadingNode>,
    pub contexts: BTreeMap<u32, ElementContext>,
}

impl LandmarkAnalysis {
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// All regions, depth-first in document order.
    pub fn flatten(&self) -> Vec<&LandmarkRegion> {
        let mut out = Vec::new();
        for region in &self.regions {
            region.visit(&mut out);
        }
        out
    }

    /// First region (document order) whose role, key or name matches.
    pub fn find(&self, query: &str) -> Option<&LandmarkRegion> {
        let flat = self.flatten();
        let lowered = query.trim().to_lowercase();
        flat.iter()
            .find(|region| region.landmark.key.to_lowercase() == lowered)
            .or_else(|| flat.iter().find(|region| region.landmark.matches(query)))
            .copied()
    }

    pub fn context(&self, index: u32) -> Option<&ElementContext> {
        self.contexts.get(&index)
    }
}

fn accessible_name(node: &EnhancedNode) -> Option<String> {
    node.ax_name()
        .or_else(|| node.attr("aria-label"))
        .map(crate::text::collapse_whitespace)
        .filter(|name| !name.is_empty())
}

fn inside_sectioning(tree: &EnhancedTree, node: &EnhancedNode) -> bool {
    tree.ancestors(node.id).any(|ancestor| {
        SECTIONING_TAGS.contains(&ancestor.tag())
            || ancestor.attr("role").map_or(false, |role| {
                role.split_whitespace()
                    .any(|role| SECTIONING_ROLES.contains(&role.to_ascii_lowercase().as_str()))
            })
    })
}

/// Landmark role and name of `node`, if it opens a region.
///
/// An explicit `role` attribute wins, then the accessibility role, then the
/// tag. Header and footer scoped inside sectioning content are not page-level
/// banner/contentinfo unless the author said so explicitly.
pub fn classify(tree: &EnhancedTree, node: &EnhancedNode) -> Option<(LandmarkRole, Option<String>)> {
    if !node.is_element() {
        return None;
    }
    let name = accessible_name(node);
    let explicit = node
        .attr("role")
        .and_then(|role| role.split_whitespace().find_map(LandmarkRole::from_role));
    let role = match explicit {
        Some(role) => role,
        None => {
            let derived = node
                .ax_role()
                .and_then(LandmarkRole::from_role)
                .or_else(|| LandmarkRole::from_tag(node.tag()))?;
            let scoped = matches!(node.tag(), "header" | "footer")
                && matches!(derived, LandmarkRole::Banner | LandmarkRole::Contentinfo);
            if scoped && inside_sectioning(tree, node) {
                return None;
            }
            derived
        }
    };
    if role.requires_name() && name.is_none() {
        return None;
    }
    Some((role, name))
}

#[derive(Default)]
struct HeadingStack {
    roots: Vec<HeadingNode>,
    open: Vec<HeadingNode>,
}

impl HeadingStack {
    fn close_to(&mut self, level: u8) {
        while self.open.last().map_or(false, |top| top.level >= level) {
            if let Some(done) = self.open.pop() {
                match self.open.last_mut() {
                    Some(parent) => parent.children.push(done),
                    None => self.roots.push(done),
                }
            }
        }
    }

    fn push(&mut self, heading: HeadingNode) {
        self.close_to(heading.level);
        self.open.push(heading);
    }

    fn path(&self) -> Vec<String> {
        self.open.iter().map(|heading| heading.text.clone()).collect()
    }

    fn finish(mut self) -> Vec<HeadingNode> {
        self.close_to(0);
        self.roots
    }
}

#[derive(Default)]
struct Scope {
    elements: Vec<u32>,
    count: usize,
    regions: Vec<LandmarkRegion>,
    headings: HeadingStack,
}

struct Analyzer<'a> {
    snapshot: &'a Snapshot,
    keys: HashMap<String, usize>,
    contexts: BTreeMap<u32, ElementContext>,
}

impl<'a> Analyzer<'a> {
    fn landmark_ref(&mut self, role: LandmarkRole, name: Option<String>) -> LandmarkRef {
        let base = format!("{}:{}", role.as_str(), name.as_deref().unwrap_or(""));
        let seen = self.keys.entry(base.clone()).or_insert(0);
        *seen += 1;
        let key = if *seen == 1 {
            base
        } else {
            format!("{base}#{seen}")
        };
        LandmarkRef { role, name, key }
    }

    fn walk(&mut self, id: SimpleId, depth: usize, scope: &mut Scope, path: &mut Vec<LandmarkRef>) {
        let snapshot = self.snapshot;
        let tree = &snapshot.enhanced;
        let node = tree.node(snapshot.simplified.get(id).node);

        if Some(id) != snapshot.simplified.root() {
            if let Some((role, name)) = classify(tree, node) {
                let landmark = self.landmark_ref(role, name);
                let opened_under = scope.headings.path();
                path.push(landmark.clone());
                let mut inner = Scope::default();
                self.visit_self_and_children(id, depth + 1, &mut inner, path);
                path.pop();
                scope.count += inner.count;
                scope.regions.push(LandmarkRegion {
                    landmark,
                    node: Some(id),
                    depth,
                    element_count: inner.count,
                    elements: inner.elements,
                    headings: inner.headings.finish(),
                    opened_under,
                    sub_regions: inner.regions,
                });
                return;
            }
        }
        self.visit_self_and_children(id, depth, scope, path);
    }

    fn visit_self_and_children(
        &mut self,
        id: SimpleId,
        depth: usize,
        scope: &mut Scope,
        path: &mut Vec<LandmarkRef>,
    ) {
        let snapshot = self.snapshot;
        let simple = snapshot.simplified.get(id);
        let node = snapshot.enhanced.node(simple.node);

        if let Some(level) = judges::heading_level(node) {
            let text = node
                .ax_name()
                .map(crate::text::collapse_whitespace)
                .unwrap_or_else(|| snapshot.enhanced.text_content(node.id, HEADING_TEXT_DEPTH));
            if !text.is_empty() {
                scope.headings.push(HeadingNode {
                    level,
                    text,
                    node: Some(id),
                    index: simple.index,
                    landmark: path.last().map(|landmark| landmark.key.clone()),
                    children: Vec::new(),
                });
            }
        }
        if let Some(index) = simple.index {
            scope.elements.push(index);
            scope.count += 1;
            self.contexts.insert(
                index,
                ElementContext {
                    landmarks: path.clone(),
                    headings: scope.headings.path(),
                },
            );
        }
        for child in &simple.children {
            self.walk(*child, depth, scope, path);
        }
    }
}

pub fn analyze(snapshot: &Snapshot) -> LandmarkAnalysis {
    let Some(root) = snapshot.simplified.root() else {
        return LandmarkAnalysis::default();
    };
    let mut analyzer = Analyzer {
        snapshot,
        keys: HashMap::new(),
        contexts: BTreeMap::new(),
    };
    let mut scope = Scope::default();
    analyzer.walk(root, 0, &mut scope, &mut Vec::new());
    LandmarkAnalysis {
        regions: scope.regions,
        ungrouped_elements: scope.elements,
        ungrouped_headings: scope.headings.finish(),
        contexts: analyzer.contexts,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionFingerprint {
    pub element_count: usize,
    pub backend_ids: BTreeSet<i64>,
}

/// Consumer-held summary of one snapshot's regions, passed back explicitly
/// to the next outline call. Nothing is cached inside the perceiver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LandmarkFingerprints {
    pub identity: DocumentIdentity,
    pub regions: BTreeMap<String, RegionFingerprint>,
}

impl LandmarkFingerprints {
    pub fn capture(snapshot: &Snapshot) -> Self {
        Self::from_analysis(snapshot, &analyze(snapshot))
    }

    pub(crate) fn from_analysis(snapshot: &Snapshot, analysis: &LandmarkAnalysis) -> Self {
        let regions = analysis
            .flatten()
            .into_iter()
            .map(|region| {
                let backend_ids = region
                    .all_elements()
                    .into_iter()
                    .filter_map(|index| snapshot.resolve(index))
                    .map(|node| node.raw.backend_node_id)
                    .collect();
                (
                    region.landmark.key.clone(),
                    RegionFingerprint {
                        element_count: region.element_count,
                        backend_ids,
                    },
                )
            })
            .collect();
        Self {
            identity: snapshot.identity.clone(),
            regions,
        }
    }
}

/// Per region key, whether it matches the previous fingerprint exactly.
///
/// Without a previous value nothing is unchanged. A region only counts as
/// unchanged when the document is the same and both the element count and
/// the element id set are identical.
pub fn detect_unchanged_regions(
    current: &LandmarkFingerprints,
    previous: Option<&LandmarkFingerprints>,
) -> BTreeMap<String, bool> {
    current
        .regions
        .iter()
        .map(|(key, fingerprint)| {
            let unchanged = previous.map_or(false, |previous| {
                previous.identity.same_document(&current.identity)
                    && previous.regions.get(key) == Some(fingerprint)
            });
            (key.clone(), unchanged)
        })
        .collect()
}
