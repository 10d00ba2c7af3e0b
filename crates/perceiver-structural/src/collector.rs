//! Concurrent collection of the raw page sources.
//!
//! Phase one fetches identity, DOM, layout, the main-frame accessibility
//! tree, listener flags and viewport metrics in parallel. Phase two uses the
//! DOM to discover subframes and fetches their accessibility trees (and, when
//! enabled, out-of-process frame documents). Every fetch shares one deadline
//! and the caller's cancellation token. Only the DOM is mandatory.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::time::Duration;

use cdp_adapter::{
    AdapterError, AxNode, CapturedSnapshot, DocumentIdentity, DomNode, FrameDocument, PageId,
    ViewportMetrics,
};
use futures::future::join_all;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{Diagnostic, PerceiverError, SourceKind};
use crate::policy::CollectPolicy;
use crate::ports::CdpPerceptionPort;
use crate::{events, metrics};

/// Raw sources of one observation, before fusion.
#[derive(Clone, Debug)]
pub struct CollectedState {
    pub identity: DocumentIdentity,
    pub dom: DomNode,
    pub layout: Option<CapturedSnapshot>,
    /// Accessibility nodes of every frame that answered, keyed later by backend id.
    pub ax: Vec<AxNode>,
    pub listeners: Option<HashSet<i64>>,
    pub viewport: ViewportMetrics,
    /// Out-of-process frame documents by frame id.
    pub frames: HashMap<String, FrameDocument>,
    /// Out-of-process frames that could not be fetched, with the reason.
    pub frame_failures: HashMap<String, String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CollectedState {
    /// State with only a DOM; every other source counts as unavailable.
    pub fn from_dom(identity: DocumentIdentity, dom: DomNode) -> Self {
        Self {
            identity,
            dom,
            layout: None,
            ax: Vec::new(),
            listeners: None,
            viewport: ViewportMetrics::default(),
            frames: HashMap::new(),
            frame_failures: HashMap::new(),
            diagnostics: Vec::new(),
        }
    }
}

#[derive(Debug)]
enum FetchFailure {
    Cancelled,
    TimedOut,
    Failed(AdapterError),
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::Cancelled => f.write_str("cancelled"),
            FetchFailure::TimedOut => f.write_str("deadline elapsed"),
            FetchFailure::Failed(err) => write!(f, "{err}"),
        }
    }
}

async fn guarded<T, F>(
    fut: F,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<T, FetchFailure>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(FetchFailure::Cancelled),
        outcome = timeout_at(deadline, fut) => match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(FetchFailure::Failed(err)),
            Err(_) => Err(FetchFailure::TimedOut),
        },
    }
}

/// A subframe found while walking the DOM.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct DiscoveredFrame {
    pub frame_id: String,
    pub depth: usize,
    /// Content document was inlined by the DOM fetch (same renderer process).
    pub in_process: bool,
}

pub(crate) fn discover_frames(root: &DomNode) -> Vec<DiscoveredFrame> {
    let mut frames = Vec::new();
    let mut stack: Vec<(&DomNode, usize)> = vec![(root, 0)];
    while let Some((node, depth)) = stack.pop() {
        let is_frame = matches!(
            node.local_name.to_ascii_lowercase().as_str(),
            "iframe" | "frame"
        );
        if is_frame {
            if let Some(frame_id) = node.frame_id.as_deref().filter(|id| !id.is_empty()) {
                frames.push(DiscoveredFrame {
                    frame_id: frame_id.to_string(),
                    depth: depth + 1,
                    in_process: node.content_document.is_some(),
                });
            }
        }
        if let Some(document) = node.content_document.as_deref() {
            stack.push((document, depth + 1));
        }
        for child in node.shadow_roots.iter().chain(node.children.iter()).rev() {
            stack.push((child, depth));
        }
    }
    frames
}

pub struct Collector<'a, P: ?Sized> {
    port: &'a P,
    policy: &'a CollectPolicy,
    cancel: CancellationToken,
}

impl<'a, P> Collector<'a, P>
where
    P: CdpPerceptionPort + ?Sized,
{
    pub fn new(port: &'a P, policy: &'a CollectPolicy, cancel: CancellationToken) -> Self {
        Self {
            port,
            policy,
            cancel,
        }
    }

    pub async fn collect(&self, page: PageId) -> Result<CollectedState, PerceiverError> {
        let started = std::time::Instant::now();
        let deadline = Instant::now() + Duration::from_millis(self.policy.timeout_ms);
        let cancel = &self.cancel;
        let port = self.port;

        let (identity, dom, layout, ax, listeners, viewport) = tokio::join!(
            guarded(port.document_identity(page), deadline, cancel),
            guarded(port.fetch_dom(page), deadline, cancel),
            guarded(port.fetch_layout(page), deadline, cancel),
            guarded(port.fetch_ax_tree(page, None), deadline, cancel),
            guarded(port.fetch_listeners(page), deadline, cancel),
            guarded(port.fetch_viewport(page), deadline, cancel),
        );

        let cancelled = [
            identity.as_ref().err(),
            dom.as_ref().err(),
            layout.as_ref().err(),
            ax.as_ref().err(),
            listeners.as_ref().err(),
            viewport.as_ref().err(),
        ]
        .into_iter()
        .flatten()
        .any(|failure| matches!(failure, FetchFailure::Cancelled));
        if cancelled {
            metrics::record_cancelled();
            return Err(PerceiverError::Cancelled);
        }

        let dom = dom.map_err(|failure| {
            warn!(target: "perceiver.collector", %failure, "dom fetch failed; observation aborted");
            PerceiverError::SourceUnavailable {
                source_kind: SourceKind::Dom,
                reason: failure.to_string(),
            }
        })?;

        let mut diagnostics = Vec::new();
        let mut degrade = |source_kind: SourceKind, frame_id: Option<String>, failure: &FetchFailure| {
            warn!(
                target: "perceiver.collector",
                %source_kind,
                frame_id = frame_id.as_deref().unwrap_or("main"),
                %failure,
                "source degraded"
            );
            diagnostics.push(Diagnostic::SourceDegraded {
                source_kind,
                frame_id,
                reason: failure.to_string(),
            });
        };

        let expected = match identity {
            Ok(identity) => Some(identity),
            Err(failure) => {
                degrade(SourceKind::Identity, None, &failure);
                None
            }
        };
        let layout = match layout {
            Ok(snapshot) => Some(snapshot),
            Err(failure) => {
                degrade(SourceKind::Layout, None, &failure);
                None
            }
        };
        let mut ax_nodes = match ax {
            Ok(nodes) => nodes,
            Err(failure) => {
                degrade(SourceKind::Accessibility, None, &failure);
                Vec::new()
            }
        };
        let listeners = match listeners {
            Ok(ids) => Some(ids.into_iter().collect::<HashSet<_>>()),
            Err(failure) => {
                degrade(SourceKind::Listeners, None, &failure);
                None
            }
        };
        let viewport = match viewport {
            Ok(metrics) => metrics,
            Err(failure) => {
                degrade(SourceKind::Viewport, None, &failure);
                ViewportMetrics::default()
            }
        };

        let discovered = discover_frames(&dom);
        let in_process: Vec<&DiscoveredFrame> = discovered
            .iter()
            .filter(|frame| frame.in_process && frame.depth <= self.policy.max_iframe_depth)
            .collect();
        let out_of_process: Vec<&DiscoveredFrame> = discovered
            .iter()
            .filter(|frame| {
                !frame.in_process
                    && self.policy.cross_origin_iframes
                    && frame.depth <= self.policy.max_iframe_depth
            })
            .collect();

        let (frame_ax, frame_docs) = tokio::join!(
            join_all(in_process.iter().copied().map(|frame| {
                guarded(
                    port.fetch_ax_tree(page, Some(frame.frame_id.as_str())),
                    deadline,
                    cancel,
                )
            })),
            join_all(out_of_process.iter().copied().map(|frame| {
                guarded(
                    port.fetch_frame_document(page, frame.frame_id.as_str()),
                    deadline,
                    cancel,
                )
            })),
        );

        if frame_ax
            .iter()
            .filter_map(|outcome| outcome.as_ref().err())
            .chain(frame_docs.iter().filter_map(|outcome| outcome.as_ref().err()))
            .any(|failure| matches!(failure, FetchFailure::Cancelled))
        {
            metrics::record_cancelled();
            return Err(PerceiverError::Cancelled);
        }

        for (frame, outcome) in in_process.iter().zip(frame_ax) {
            match outcome {
                Ok(nodes) => ax_nodes.extend(nodes),
                Err(failure) => {
                    degrade(
                        SourceKind::Accessibility,
                        Some(frame.frame_id.clone()),
                        &failure,
                    );
                }
            }
        }

        let mut frames = HashMap::new();
        let mut frame_failures = HashMap::new();
        for (frame, outcome) in out_of_process.iter().zip(frame_docs) {
            match outcome {
                Ok(document) => {
                    frames.insert(frame.frame_id.clone(), document);
                }
                Err(failure) => {
                    degrade(SourceKind::Frame, Some(frame.frame_id.clone()), &failure);
                    frame_failures.insert(frame.frame_id.clone(), failure.to_string());
                }
            }
        }

        let identity = match expected {
            Some(expected) => {
                match guarded(port.document_identity(page), deadline, cancel).await {
                    Ok(found) if !expected.same_document(&found) => {
                        events::emit_stale(&expected, &found);
                        return Err(PerceiverError::DocumentStale { expected, found });
                    }
                    Ok(_) => expected,
                    Err(FetchFailure::Cancelled) => {
                        metrics::record_cancelled();
                        return Err(PerceiverError::Cancelled);
                    }
                    Err(failure) => {
                        degrade(SourceKind::Identity, None, &failure);
                        expected
                    }
                }
            }
            None => DocumentIdentity {
                frame_id: dom.frame_id.clone().unwrap_or_default(),
                loader_id: String::new(),
                url: dom.document_url.clone().unwrap_or_default(),
            },
        };

        metrics::record_degraded(diagnostics.len());
        events::emit_collect(&identity, diagnostics.len(), started.elapsed());
        debug!(
            target: "perceiver.collector",
            frames = discovered.len(),
            oopif = frames.len(),
            ax_nodes = ax_nodes.len(),
            "collection finished"
        );

        Ok(CollectedState {
            identity,
            dom,
            layout,
            ax: ax_nodes,
            listeners,
            viewport,
            frames,
            frame_failures,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dom(value: serde_json::Value) -> DomNode {
        serde_json::from_value(value).expect("dom fixture")
    }

    #[test]
    fn discovers_in_process_and_remote_frames() {
        let root = dom(json!({
            "nodeType": 9, "nodeName": "#document", "backendNodeId": 1,
            "children": [{
                "nodeType": 1, "nodeName": "IFRAME", "localName": "iframe",
                "backendNodeId": 2, "frameId": "SAME",
                "contentDocument": {
                    "nodeType": 9, "nodeName": "#document", "backendNodeId": 3,
                    "children": [{
                        "nodeType": 1, "nodeName": "IFRAME", "localName": "iframe",
                        "backendNodeId": 4, "frameId": "REMOTE"
                    }]
                }
            }]
        }));

        let frames = discover_frames(&root);
        assert_eq!(
            frames,
            vec![
                DiscoveredFrame {
                    frame_id: "SAME".into(),
                    depth: 1,
                    in_process: true
                },
                DiscoveredFrame {
                    frame_id: "REMOTE".into(),
                    depth: 2,
                    in_process: false
                },
            ]
        );
    }
}
