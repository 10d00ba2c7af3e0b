//! The inspection surface consumed by the observation pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::{select, spawn};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::{AxTreeConfig, DomFetchConfig, LayoutSnapshotConfig};
use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::ids::{BrowserId, PageId, SessionId};
use crate::metrics;
use crate::protocol::{
    AxNode, CapturedSnapshot, DocumentIdentity, DomNode, FrameDocument, FrameTreeResponse,
    FullAxTreeResponse, GetDocumentResponse, LayoutMetricsResponse, ViewportMetrics,
};
use crate::registry::Registry;
use crate::transport::{
    CdpTransport, ChromiumTransport, CommandTarget, NoopTransport, TransportEvent,
};

/// Read-only inspection capabilities, each independently callable and failable.
#[async_trait]
pub trait Cdp: Send + Sync {
    async fn document_identity(&self, page: PageId) -> Result<DocumentIdentity, AdapterError>;

    async fn fetch_dom(&self, page: PageId, config: DomFetchConfig)
        -> Result<DomNode, AdapterError>;

    /// Fetches an out-of-process frame's document over its own flattened session.
    async fn fetch_frame_document(
        &self,
        page: PageId,
        frame_id: &str,
    ) -> Result<FrameDocument, AdapterError>;

    async fn fetch_layout_snapshot(
        &self,
        page: PageId,
        config: LayoutSnapshotConfig,
    ) -> Result<CapturedSnapshot, AdapterError>;

    async fn fetch_ax_tree(
        &self,
        page: PageId,
        config: AxTreeConfig,
    ) -> Result<Vec<AxNode>, AdapterError>;

    /// Backend node ids of nodes with click-style event handlers attached.
    async fn fetch_listeners(&self, page: PageId) -> Result<Vec<i64>, AdapterError>;

    async fn fetch_viewport_metrics(&self, page: PageId) -> Result<ViewportMetrics, AdapterError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
    target_id: String,
    #[serde(rename = "type")]
    target_type: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetCreatedParams {
    target_info: TargetInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetDestroyedParams {
    target_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachedToTargetParams {
    session_id: String,
    target_info: TargetInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetachedFromTargetParams {
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachToTargetResponse {
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetTargetsResponse {
    target_infos: Vec<TargetInfo>,
}

/// Adapter implementation with pluggable transport.
pub struct CdpAdapter {
    pub browser_id: BrowserId,
    pub cfg: CdpConfig,
    pub registry: Arc<Registry>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    transport: Arc<dyn CdpTransport>,
}

impl CdpAdapter {
    pub fn new(cfg: CdpConfig) -> Self {
        let transport: Arc<dyn CdpTransport> = if cfg.websocket_url.is_some() {
            info!(target: "cdp-adapter", "using chromium websocket transport");
            Arc::new(ChromiumTransport::new(cfg.clone()))
        } else {
            warn!(
                target: "cdp-adapter",
                remediation = "set SOULBROWSER_WS_URL to the browser's devtools websocket",
                "no browser endpoint configured; every inspection command will fail"
            );
            Arc::new(NoopTransport)
        };
        Self::with_transport(cfg, transport)
    }

    pub fn with_transport(cfg: CdpConfig, transport: Arc<dyn CdpTransport>) -> Self {
        Self {
            browser_id: BrowserId::new(),
            cfg,
            registry: Arc::new(Registry::new()),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            transport,
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn start(self: Arc<Self>) -> Result<(), AdapterError> {
        {
            let guard = self.tasks.lock().await;
            if !guard.is_empty() {
                return Ok(());
            }
        }

        self.transport.start().await?;
        let loop_task = spawn(Self::event_loop(Arc::clone(&self)));
        self.tasks.lock().await.push(loop_task);
        info!(target: "cdp-adapter", "event loop started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut handles = self.tasks.lock().await;
        while let Some(handle) = handles.pop() {
            let _ = handle.await;
        }
    }

    pub fn register_page(
        &self,
        page: PageId,
        session: SessionId,
        target_id: Option<String>,
        cdp_session: Option<String>,
    ) {
        self.registry
            .insert_page(page, session, target_id, cdp_session);
    }

    /// Attaches a flattened session to `target_id`, registering the page if needed.
    pub async fn attach_page(&self, target_id: &str) -> Result<PageId, AdapterError> {
        if let Some(page) = self.registry.find_by_target(target_id) {
            if self.registry.get_cdp_session(&page).is_some() {
                return Ok(page);
            }
        }
        let response = self
            .send_command(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let attached: AttachToTargetResponse = decode("Target.attachToTarget", response)?;
        let page = match self.registry.find_by_target(target_id) {
            Some(page) => {
                self.registry.set_cdp_session(&page, attached.session_id);
                page
            }
            None => {
                let page = PageId::new();
                self.register_page(
                    page,
                    SessionId::new(),
                    Some(target_id.to_string()),
                    Some(attached.session_id),
                );
                page
            }
        };
        debug!(target: "cdp-adapter", target_id, ?page, "page attached");
        Ok(page)
    }

    /// Attaches to the first page target the browser reports.
    pub async fn attach_first_page(&self) -> Result<PageId, AdapterError> {
        let response = self.send_command("Target.getTargets", json!({})).await?;
        let targets: GetTargetsResponse = decode("Target.getTargets", response)?;
        let target = targets
            .target_infos
            .into_iter()
            .find(|info| info.target_type == "page")
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::TargetNotFound)
                    .with_hint("browser reported no page targets")
            })?;
        let page = self.attach_page(&target.target_id).await?;
        if let Some(url) = target.url.filter(|u| !u.is_empty()) {
            self.registry.set_recent_url(&page, url);
        }
        Ok(page)
    }

    async fn event_loop(self: Arc<Self>) {
        debug!(target: "cdp-adapter", "event loop entered");
        const MIN_BACKOFF: Duration = Duration::from_millis(100);
        const MAX_BACKOFF: Duration = Duration::from_secs(5);
        let mut backoff = MIN_BACKOFF;

        loop {
            select! {
                _ = self.shutdown.cancelled() => {
                    break;
                }
                event = self.transport.next_event() => {
                    match event {
                        Some(ev) => {
                            backoff = MIN_BACKOFF;
                            if let Err(err) = self.process_event(ev) {
                                warn!(target: "cdp-adapter", ?err, "cdp event handling error");
                            }
                        }
                        None => {
                            if self.shutdown.is_cancelled() {
                                break;
                            }
                            warn!(target: "cdp-adapter", "transport stream ended; attempting restart");
                            if let Err(err) = self.transport.start().await {
                                warn!(target: "cdp-adapter", ?err, "transport restart failed");
                            }
                            sleep(backoff).await;
                            backoff = (backoff + MIN_BACKOFF).min(MAX_BACKOFF);
                        }
                    }
                }
            }
        }
        debug!(target: "cdp-adapter", "event loop exiting");
    }

    fn process_event(&self, event: TransportEvent) -> Result<(), AdapterError> {
        metrics::record_event();
        match event.method.as_str() {
            "Target.targetCreated" => {
                let payload: TargetCreatedParams = decode(&event.method, event.params)?;
                if payload.target_info.target_type != "page"
                    || self
                        .registry
                        .find_by_target(&payload.target_info.target_id)
                        .is_some()
                {
                    return Ok(());
                }
                let page = PageId::new();
                self.register_page(
                    page,
                    SessionId::new(),
                    Some(payload.target_info.target_id),
                    None,
                );
                if let Some(url) = payload.target_info.url.filter(|u| !u.is_empty()) {
                    self.registry.set_recent_url(&page, url);
                }
            }
            "Target.attachedToTarget" => {
                let payload: AttachedToTargetParams = decode(&event.method, event.params)?;
                if payload.target_info.target_type != "page" {
                    return Ok(());
                }
                match self.registry.find_by_target(&payload.target_info.target_id) {
                    Some(page) => self.registry.set_cdp_session(&page, payload.session_id),
                    None => self.register_page(
                        PageId::new(),
                        SessionId::new(),
                        Some(payload.target_info.target_id),
                        Some(payload.session_id),
                    ),
                }
            }
            "Target.targetInfoChanged" => {
                let payload: TargetCreatedParams = decode(&event.method, event.params)?;
                if let (Some(page), Some(url)) = (
                    self.registry.find_by_target(&payload.target_info.target_id),
                    payload.target_info.url,
                ) {
                    self.registry.set_recent_url(&page, url);
                }
            }
            "Target.detachedFromTarget" => {
                let payload: DetachedFromTargetParams = decode(&event.method, event.params)?;
                self.registry.forget_cdp_session(&payload.session_id);
            }
            "Target.targetDestroyed" => {
                let payload: TargetDestroyedParams = decode(&event.method, event.params)?;
                if let Some(page) = self.registry.find_by_target(&payload.target_id) {
                    self.registry.remove_page(&page);
                }
            }
            _ => {
                debug!(target: "cdp-adapter", method = %event.method, "unhandled cdp event");
            }
        }
        Ok(())
    }

    async fn send_command(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.dispatch(CommandTarget::Browser, method, params).await
    }

    async fn send_page_command(
        &self,
        page: PageId,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let session = self.registry.get_cdp_session(&page).ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::MissingSession)
                .with_hint(format!("missing cdp session for page {page:?}"))
        })?;
        self.dispatch(CommandTarget::Session(session), method, params)
            .await
    }

    async fn dispatch(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let start = Instant::now();
        metrics::record_command(method);
        match self.transport.send_command(target, method, params).await {
            Ok(value) => {
                metrics::record_command_success(method, start.elapsed());
                Ok(value)
            }
            Err(err) => {
                metrics::record_command_failure(method);
                Err(err)
            }
        }
    }

    async fn frame_session(&self, page: PageId, frame_id: &str) -> Result<String, AdapterError> {
        if let Some(session) = self.registry.frame_session(&page, frame_id) {
            return Ok(session);
        }
        // Out-of-process frame targets share their id with the frame they render.
        let response = self
            .send_command(
                "Target.attachToTarget",
                json!({ "targetId": frame_id, "flatten": true }),
            )
            .await?;
        let attached: AttachToTargetResponse = decode("Target.attachToTarget", response)?;
        self.registry
            .set_frame_session(page, frame_id, attached.session_id.clone());
        Ok(attached.session_id)
    }

    async fn capture(
        &self,
        target: CommandTarget,
        config: LayoutSnapshotConfig,
    ) -> Result<CapturedSnapshot, AdapterError> {
        if let Err(err) = self
            .dispatch(target.clone(), "DOMSnapshot.enable", json!({}))
            .await
        {
            debug!(target: "cdp-adapter", ?err, "DOMSnapshot.enable failed; capturing anyway");
        }
        let response = self
            .dispatch(target, "DOMSnapshot.captureSnapshot", config.to_params())
            .await?;
        let mut snapshot: CapturedSnapshot = decode("DOMSnapshot.captureSnapshot", response)?;
        snapshot.computed_styles = config.computed_styles;
        Ok(snapshot)
    }

    async fn full_ax_tree(
        &self,
        target: CommandTarget,
        config: AxTreeConfig,
    ) -> Result<Vec<AxNode>, AdapterError> {
        if let Err(err) = self
            .dispatch(target.clone(), "Accessibility.enable", json!({}))
            .await
        {
            debug!(target: "cdp-adapter", ?err, "Accessibility.enable failed; fetching anyway");
        }
        let response = self
            .dispatch(target, "Accessibility.getFullAXTree", config.to_params())
            .await?;
        let tree: FullAxTreeResponse = decode("Accessibility.getFullAXTree", response)?;
        Ok(tree.nodes)
    }

    async fn document(
        &self,
        target: CommandTarget,
        config: DomFetchConfig,
    ) -> Result<DomNode, AdapterError> {
        let response = self
            .dispatch(target, "DOM.getDocument", config.to_params())
            .await?;
        let document: GetDocumentResponse = decode("DOM.getDocument", response)?;
        Ok(document.root)
    }

    fn page_target(&self, page: PageId) -> Result<CommandTarget, AdapterError> {
        self.registry
            .get_cdp_session(&page)
            .map(CommandTarget::Session)
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::MissingSession)
                    .with_hint(format!("missing cdp session for page {page:?}"))
            })
    }
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, AdapterError> {
    serde_json::from_value(value).map_err(|err| {
        metrics::record_decode_failure(method);
        AdapterError::protocol(method, err)
    })
}

#[async_trait]
impl Cdp for CdpAdapter {
    async fn document_identity(&self, page: PageId) -> Result<DocumentIdentity, AdapterError> {
        let response = self
            .send_page_command(page, "Page.getFrameTree", json!({}))
            .await?;
        let tree: FrameTreeResponse = decode("Page.getFrameTree", response)?;
        Ok(DocumentIdentity {
            frame_id: tree.frame_tree.frame.id,
            loader_id: tree.frame_tree.frame.loader_id,
            url: tree.frame_tree.frame.url,
        })
    }

    async fn fetch_dom(
        &self,
        page: PageId,
        config: DomFetchConfig,
    ) -> Result<DomNode, AdapterError> {
        let target = self.page_target(page)?;
        self.document(target, config).await
    }

    async fn fetch_frame_document(
        &self,
        page: PageId,
        frame_id: &str,
    ) -> Result<FrameDocument, AdapterError> {
        let session = self.frame_session(page, frame_id).await?;
        let target = CommandTarget::Session(session);

        let (dom, layout, ax) = tokio::join!(
            self.document(target.clone(), DomFetchConfig::default()),
            self.capture(target.clone(), LayoutSnapshotConfig::default()),
            self.full_ax_tree(target.clone(), AxTreeConfig::default()),
        );

        let dom = dom?;
        let mut degraded = Vec::new();
        let layout = match layout {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                degraded.push(("layout".to_string(), err.to_string()));
                None
            }
        };
        let ax = match ax {
            Ok(nodes) => Some(nodes),
            Err(err) => {
                degraded.push(("accessibility".to_string(), err.to_string()));
                None
            }
        };
        Ok(FrameDocument {
            frame_id: frame_id.to_string(),
            dom,
            layout,
            ax,
            degraded,
        })
    }

    async fn fetch_layout_snapshot(
        &self,
        page: PageId,
        config: LayoutSnapshotConfig,
    ) -> Result<CapturedSnapshot, AdapterError> {
        let target = self.page_target(page)?;
        self.capture(target, config).await
    }

    async fn fetch_ax_tree(
        &self,
        page: PageId,
        config: AxTreeConfig,
    ) -> Result<Vec<AxNode>, AdapterError> {
        let target = self.page_target(page)?;
        self.full_ax_tree(target, config).await
    }

    async fn fetch_listeners(&self, page: PageId) -> Result<Vec<i64>, AdapterError> {
        let target = self.page_target(page)?;
        let snapshot = self
            .capture(target, LayoutSnapshotConfig::listeners_only())
            .await?;
        let mut ids = Vec::new();
        for document in &snapshot.documents {
            let Some(clickable) = &document.nodes.is_clickable else {
                continue;
            };
            for index in &clickable.index {
                let backend = usize::try_from(*index)
                    .ok()
                    .and_then(|idx| document.nodes.backend_node_id.get(idx));
                if let Some(id) = backend {
                    ids.push(*id);
                }
            }
        }
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn fetch_viewport_metrics(&self, page: PageId) -> Result<ViewportMetrics, AdapterError> {
        let response = self
            .send_page_command(page, "Page.getLayoutMetrics", json!({}))
            .await?;
        let raw: LayoutMetricsResponse = decode("Page.getLayoutMetrics", response)?;
        raw.into_metrics().ok_or_else(|| {
            AdapterError::protocol("Page.getLayoutMetrics", "missing css visual viewport")
        })
    }
}
