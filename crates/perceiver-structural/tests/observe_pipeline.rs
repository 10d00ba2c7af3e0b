//! End-to-end pipeline runs against an in-memory inspection port.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{
    AdapterError, AdapterErrorKind, AxNode, CapturedSnapshot, DocumentIdentity, DomNode,
    FrameDocument, PageId, ViewportMetrics,
};
use perceiver_structural::{
    CdpPerceptionPort, Diagnostic, ObservePolicy, PerceiverError, SourceKind, StructuralPerceiver,
    StructuralPerceiverImpl,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const OPAQUE: &str = "rgb(255, 255, 255)";
const CLEAR: &str = "rgba(0, 0, 0, 0)";

fn identity(loader: &str) -> DocumentIdentity {
    DocumentIdentity {
        frame_id: "MAIN".into(),
        loader_id: loader.into(),
        url: format!("https://example.com/{loader}"),
    }
}

fn unavailable(what: &str) -> AdapterError {
    AdapterError::new(AdapterErrorKind::CdpIo).with_hint(format!("{what} unavailable"))
}

struct FakePort {
    identities: Mutex<VecDeque<DocumentIdentity>>,
    dom: DomNode,
    layout: Option<CapturedSnapshot>,
    ax: Option<Vec<AxNode>>,
    listeners: Vec<i64>,
    stall_layout: bool,
    layout_delay: Option<Duration>,
    hidden: Vec<i64>,
}

impl FakePort {
    fn new(dom: Value) -> Self {
        Self {
            identities: Mutex::new(VecDeque::from([identity("L1")])),
            dom: serde_json::from_value(dom).expect("dom fixture"),
            layout: None,
            ax: None,
            listeners: Vec::new(),
            stall_layout: false,
            layout_delay: None,
            hidden: Vec::new(),
        }
    }

    /// Identity answers in order; the last one repeats.
    fn with_identities(self, loaders: &[&str]) -> Self {
        *self.identities.lock().expect("identities") =
            loaders.iter().map(|loader| identity(loader)).collect();
        self
    }

    /// Nodes laid out with `visibility: hidden`; set before `with_layout`.
    fn with_hidden(mut self, backends: &[i64]) -> Self {
        self.hidden = backends.to_vec();
        self
    }

    /// `(backend id, [x, y, w, h], paint order, background)` per laid-out node.
    fn with_layout(mut self, boxes: &[(i64, [f64; 4], i64, &str)]) -> Self {
        let strings = vec!["block", "visible", "1", OPAQUE, CLEAR, "hidden"];
        let background = |color: &str| if color == OPAQUE { 3 } else { 4 };
        let visibility = |backend: i64| if self.hidden.contains(&backend) { 5 } else { 1 };
        let mut snapshot: CapturedSnapshot = serde_json::from_value(json!({
            "documents": [{
                "nodes": { "backendNodeId": boxes.iter().map(|b| b.0).collect::<Vec<_>>() },
                "layout": {
                    "nodeIndex": (0..boxes.len()).collect::<Vec<_>>(),
                    "bounds": boxes.iter().map(|b| b.1.to_vec()).collect::<Vec<_>>(),
                    "styles": boxes.iter().map(|b| vec![0, visibility(b.0), 2, background(b.3)]).collect::<Vec<_>>(),
                    "text": boxes.iter().map(|_| -1).collect::<Vec<_>>(),
                    "paintOrders": boxes.iter().map(|b| b.2).collect::<Vec<_>>()
                }
            }],
            "strings": strings
        }))
        .expect("layout fixture");
        snapshot.computed_styles = vec![
            "display".into(),
            "visibility".into(),
            "opacity".into(),
            "background-color".into(),
        ];
        self.layout = Some(snapshot);
        self
    }

    fn with_ax(mut self, nodes: Value) -> Self {
        self.ax = Some(serde_json::from_value(nodes).expect("ax fixture"));
        self
    }
}

#[async_trait]
impl CdpPerceptionPort for FakePort {
    async fn document_identity(&self, _page: PageId) -> Result<DocumentIdentity, AdapterError> {
        let mut queue = self.identities.lock().expect("identities");
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        next.ok_or_else(|| unavailable("frame tree"))
    }

    async fn fetch_dom(&self, _page: PageId) -> Result<DomNode, AdapterError> {
        Ok(self.dom.clone())
    }

    async fn fetch_layout(&self, _page: PageId) -> Result<CapturedSnapshot, AdapterError> {
        if self.stall_layout {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.layout_delay {
            tokio::time::sleep(delay).await;
        }
        self.layout.clone().ok_or_else(|| unavailable("layout"))
    }

    async fn fetch_ax_tree(
        &self,
        _page: PageId,
        _frame_id: Option<&str>,
    ) -> Result<Vec<AxNode>, AdapterError> {
        self.ax.clone().ok_or_else(|| unavailable("accessibility"))
    }

    async fn fetch_listeners(&self, _page: PageId) -> Result<Vec<i64>, AdapterError> {
        Ok(self.listeners.clone())
    }

    async fn fetch_viewport(&self, _page: PageId) -> Result<ViewportMetrics, AdapterError> {
        Ok(ViewportMetrics::default())
    }

    async fn fetch_frame_document(
        &self,
        _page: PageId,
        frame_id: &str,
    ) -> Result<FrameDocument, AdapterError> {
        Err(unavailable(frame_id))
    }
}

fn page() -> PageId {
    PageId(Uuid::new_v4())
}

fn element(backend: i64, tag: &str, attributes: &[&str], children: Vec<Value>) -> Value {
    json!({
        "nodeType": 1,
        "nodeName": tag.to_ascii_uppercase(),
        "localName": tag,
        "backendNodeId": backend,
        "attributes": attributes,
        "children": children
    })
}

fn text(backend: i64, value: &str) -> Value {
    json!({ "nodeType": 3, "nodeName": "#text", "nodeValue": value, "backendNodeId": backend })
}

fn document(children: Vec<Value>) -> Value {
    json!({ "nodeType": 9, "nodeName": "#document", "backendNodeId": 1, "frameId": "MAIN", "children": children })
}

fn login_dom() -> Value {
    document(vec![element(
        2,
        "body",
        &[],
        vec![
            element(3, "button", &[], vec![text(4, "Register")]),
            element(5, "button", &[], vec![text(6, "Sign In")]),
        ],
    )])
}

fn printed_indices(text: &str) -> Vec<u32> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim_start();
            let rest = line.strip_prefix('[')?;
            rest.split(']').next()?.parse().ok()
        })
        .collect()
}

#[tokio::test]
async fn navigation_during_collection_is_reported_stale() {
    let port = Arc::new(FakePort::new(login_dom()).with_identities(&["D1", "D2"]));
    let perceiver = StructuralPerceiverImpl::new(port);

    let err = perceiver.observe(page()).await.expect_err("stale document");
    match err {
        PerceiverError::DocumentStale { expected, found } => {
            assert_eq!(expected.loader_id, "D1");
            assert_eq!(found.loader_id, "D2");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn retry_succeeds_once_the_document_settles() {
    let port = Arc::new(FakePort::new(login_dom()).with_identities(&["D1", "D2", "D2"]));
    let perceiver = StructuralPerceiverImpl::new(port);

    let snapshot = perceiver
        .observe_with_retry(page(), 3)
        .await
        .expect("settled snapshot");
    assert_eq!(snapshot.identity.loader_id, "D2");
    assert_eq!(snapshot.interactive_count(), 2);
}

#[tokio::test]
async fn cancellation_aborts_pending_fetches() {
    let mut fake = FakePort::new(login_dom());
    fake.stall_layout = true;
    let token = CancellationToken::new();
    let perceiver = StructuralPerceiverImpl::new(Arc::new(fake)).with_cancellation(token.clone());

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });
    let err = perceiver.observe(page()).await.expect_err("cancelled");
    trigger.await.expect("trigger task");
    assert!(matches!(err, PerceiverError::Cancelled));
}

#[tokio::test]
async fn missing_sources_degrade_instead_of_failing() {
    let port = Arc::new(FakePort::new(login_dom()));
    let perceiver = StructuralPerceiverImpl::new(port);

    let snapshot = perceiver.observe(page()).await.expect("degraded snapshot");
    assert!(!snapshot.enhanced.layout_available);
    let degraded: Vec<SourceKind> = snapshot
        .diagnostics
        .iter()
        .filter_map(|diagnostic| match diagnostic {
            Diagnostic::SourceDegraded { source_kind, .. } => Some(*source_kind),
            _ => None,
        })
        .collect();
    assert!(degraded.contains(&SourceKind::Layout));
    assert!(degraded.contains(&SourceKind::Accessibility));

    let page_text = perceiver.serialize(&snapshot, None).text;
    assert_eq!(page_text, "[1]<button>Register</button>\n[2]<button>Sign In</button>");
}

#[tokio::test]
async fn printed_indices_resolve_to_printed_nodes() {
    let dom = document(vec![element(
        2,
        "body",
        &[],
        vec![
            element(3, "a", &["href", "/docs"], vec![text(4, "Docs")]),
            element(5, "input", &["type", "search", "placeholder", "Search docs"], vec![]),
            element(6, "div", &["role", "button"], vec![text(7, "Menu")]),
        ],
    )]);
    let port = Arc::new(
        FakePort::new(dom)
            .with_layout(&[
                (2, [0.0, 0.0, 1280.0, 720.0], 1, CLEAR),
                (3, [10.0, 10.0, 80.0, 20.0], 2, CLEAR),
                (4, [10.0, 10.0, 80.0, 20.0], 3, CLEAR),
                (5, [10.0, 40.0, 200.0, 20.0], 4, OPAQUE),
                (6, [10.0, 70.0, 80.0, 20.0], 5, CLEAR),
                (7, [10.0, 70.0, 80.0, 20.0], 6, CLEAR),
            ])
            .with_ax(json!([
                { "nodeId": "a", "role": { "type": "role", "value": "searchbox" },
                  "name": { "type": "computedString", "value": "Search docs" }, "backendDOMNodeId": 5 }
            ])),
    );
    let perceiver = StructuralPerceiverImpl::new(port);
    let snapshot = perceiver.observe(page()).await.expect("snapshot");
    let rendered = perceiver.serialize(&snapshot, None);

    let indices = printed_indices(&rendered.text);
    assert_eq!(indices, vec![1, 2, 3]);
    for index in indices {
        let node = snapshot.resolve(index).expect("printed index resolves");
        let line = perceiver
            .element_detail(&snapshot, index)
            .found()
            .map(|detail| detail.line.clone())
            .expect("detail for printed index");
        assert!(rendered.text.contains(&line));
        assert!(line.contains(&format!("<{}", node.tag())));
    }
    assert!(rendered.text.contains("[2]<input type=search placeholder=\"Search docs\" />"));
}

#[tokio::test]
async fn content_under_an_opaque_overlay_is_not_indexed() {
    let dom = document(vec![element(
        2,
        "body",
        &[],
        vec![
            element(3, "button", &[], vec![text(4, "Buy")]),
            element(
                5,
                "div",
                &["class", "modal"],
                vec![element(6, "button", &[], vec![text(7, "Accept cookies")])],
            ),
        ],
    )]);
    let port = Arc::new(FakePort::new(dom).with_layout(&[
        (2, [0.0, 0.0, 1280.0, 720.0], 1, CLEAR),
        (3, [100.0, 100.0, 80.0, 30.0], 2, OPAQUE),
        (4, [100.0, 100.0, 80.0, 30.0], 3, CLEAR),
        (5, [0.0, 0.0, 1280.0, 720.0], 4, OPAQUE),
        (6, [500.0, 300.0, 200.0, 40.0], 5, OPAQUE),
        (7, [500.0, 300.0, 200.0, 40.0], 6, CLEAR),
    ]));
    let perceiver = StructuralPerceiverImpl::new(port);
    let snapshot = perceiver.observe(page()).await.expect("snapshot");

    assert_eq!(snapshot.interactive_count(), 1);
    let text = perceiver.serialize(&snapshot, None).text;
    assert!(text.contains("[1]<button>Accept cookies</button>"));
    assert!(!text.contains("Buy"));
}

#[tokio::test]
async fn control_filling_its_interactive_parent_shares_one_index() {
    let dom = document(vec![element(
        2,
        "body",
        &[],
        vec![element(
            3,
            "a",
            &["href", "/checkout"],
            vec![element(4, "button", &[], vec![text(5, "Checkout")])],
        )],
    )]);
    let port = Arc::new(FakePort::new(dom).with_layout(&[
        (2, [0.0, 0.0, 1280.0, 720.0], 1, CLEAR),
        (3, [20.0, 20.0, 120.0, 40.0], 2, CLEAR),
        (4, [20.0, 20.0, 120.0, 40.0], 3, CLEAR),
        (5, [20.0, 20.0, 120.0, 40.0], 4, CLEAR),
    ]));
    let perceiver = StructuralPerceiverImpl::new(port);
    let snapshot = perceiver.observe(page()).await.expect("snapshot");

    assert_eq!(snapshot.interactive_count(), 1);
    assert_eq!(snapshot.resolve(1).map(|node| node.tag()), Some("a"));
    let text = perceiver.serialize(&snapshot, None).text;
    assert_eq!(text, "[1]<a href=/checkout>Checkout</a>");
}

#[tokio::test]
async fn invalid_policy_is_rejected() {
    let mut policy = ObservePolicy::default();
    policy.filter.occlusion_threshold = 1.5;
    let port = Arc::new(FakePort::new(login_dom()));
    assert!(StructuralPerceiverImpl::with_policy(port, policy).is_err());
}

#[tokio::test]
async fn hidden_tooltip_text_is_not_printed() {
    let dom = document(vec![element(
        2,
        "body",
        &[],
        vec![
            element(3, "button", &[], vec![text(4, "Save")]),
            element(
                5,
                "div",
                &["role", "tooltip"],
                vec![text(6, "Saves a draft"), element(7, "a", &["href", "/drafts"], vec![text(8, "Drafts")])],
            ),
        ],
    )]);
    let port = Arc::new(
        FakePort::new(dom)
            .with_hidden(&[5, 6])
            .with_layout(&[
                (2, [0.0, 0.0, 1280.0, 720.0], 1, CLEAR),
                (3, [20.0, 20.0, 80.0, 30.0], 2, CLEAR),
                (4, [20.0, 20.0, 80.0, 30.0], 3, CLEAR),
                (5, [20.0, 60.0, 200.0, 60.0], 4, CLEAR),
                (6, [20.0, 60.0, 200.0, 20.0], 5, CLEAR),
                (7, [20.0, 90.0, 80.0, 20.0], 6, CLEAR),
                (8, [20.0, 90.0, 80.0, 20.0], 7, CLEAR),
            ]),
    );
    let perceiver = StructuralPerceiverImpl::new(port);
    let snapshot = perceiver.observe(page()).await.expect("snapshot");

    let text = perceiver.serialize(&snapshot, None).text;
    assert!(!text.contains("Saves a draft"));
    assert!(text.contains("[1]<button>Save</button>"));
    assert!(text.contains("[2]<a href=/drafts>Drafts</a>"));
}

#[tokio::test(start_paused = true)]
async fn slow_layout_times_out_into_a_degraded_snapshot() {
    let mut policy = ObservePolicy::default();
    policy.collect.timeout_ms = 200;
    let mut fake = FakePort::new(login_dom()).with_layout(&[
        (2, [0.0, 0.0, 1280.0, 720.0], 1, CLEAR),
        (3, [10.0, 10.0, 80.0, 20.0], 2, CLEAR),
    ]);
    fake.layout_delay = Some(Duration::from_secs(5));
    let perceiver = StructuralPerceiverImpl::with_policy(Arc::new(fake), policy).expect("policy");

    let snapshot = perceiver.observe(page()).await.expect("degraded snapshot");
    assert!(!snapshot.enhanced.layout_available);
    let reason = snapshot.diagnostics.iter().find_map(|diagnostic| match diagnostic {
        Diagnostic::SourceDegraded {
            source_kind: SourceKind::Layout,
            frame_id: None,
            reason,
        } => Some(reason.clone()),
        _ => None,
    });
    assert_eq!(reason.as_deref(), Some("deadline elapsed"));
    assert_eq!(snapshot.interactive_count(), 2);
}
