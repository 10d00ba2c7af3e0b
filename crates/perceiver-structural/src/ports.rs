use std::sync::Arc;

use async_trait::async_trait;
use cdp_adapter::{
    AdapterError, AxNode, AxTreeConfig, CapturedSnapshot, Cdp, DocumentIdentity, DomFetchConfig,
    DomNode, FrameDocument, LayoutSnapshotConfig, PageId, ViewportMetrics,
};

/// Page-inspection capabilities the collector depends on.
///
/// Every method is independently failable; the collector decides which
/// failures degrade the snapshot and which abort it.
#[async_trait]
pub trait CdpPerceptionPort: Send + Sync {
    async fn document_identity(&self, page: PageId) -> Result<DocumentIdentity, AdapterError>;
    async fn fetch_dom(&self, page: PageId) -> Result<DomNode, AdapterError>;
    async fn fetch_layout(&self, page: PageId) -> Result<CapturedSnapshot, AdapterError>;
    /// `None` targets the main frame.
    async fn fetch_ax_tree(
        &self,
        page: PageId,
        frame_id: Option<&str>,
    ) -> Result<Vec<AxNode>, AdapterError>;
    async fn fetch_listeners(&self, page: PageId) -> Result<Vec<i64>, AdapterError>;
    async fn fetch_viewport(&self, page: PageId) -> Result<ViewportMetrics, AdapterError>;
    async fn fetch_frame_document(
        &self,
        page: PageId,
        frame_id: &str,
    ) -> Result<FrameDocument, AdapterError>;
}

pub struct AdapterPort<C>
where
    C: Cdp + Send + Sync,
{
    adapter: Arc<C>,
}

impl<C> AdapterPort<C>
where
    C: Cdp + Send + Sync,
{
    pub fn new(adapter: Arc<C>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl<C> CdpPerceptionPort for AdapterPort<C>
where
    C: Cdp + Send + Sync,
{
    async fn document_identity(&self, page: PageId) -> Result<DocumentIdentity, AdapterError> {
        self.adapter.document_identity(page).await
    }

    async fn fetch_dom(&self, page: PageId) -> Result<DomNode, AdapterError> {
        self.adapter
            .fetch_dom(page, DomFetchConfig::default())
            .await
    }

    async fn fetch_layout(&self, page: PageId) -> Result<CapturedSnapshot, AdapterError> {
        self.adapter
            .fetch_layout_snapshot(page, LayoutSnapshotConfig::default())
            .await
    }

    async fn fetch_ax_tree(
        &self,
        page: PageId,
        frame_id: Option<&str>,
    ) -> Result<Vec<AxNode>, AdapterError> {
        let config = match frame_id {
            Some(frame) => AxTreeConfig::for_frame(frame),
            None => AxTreeConfig::default(),
        };
        self.adapter.fetch_ax_tree(page, config).await
    }

    async fn fetch_listeners(&self, page: PageId) -> Result<Vec<i64>, AdapterError> {
        self.adapter.fetch_listeners(page).await
    }

    async fn fetch_viewport(&self, page: PageId) -> Result<ViewportMetrics, AdapterError> {
        self.adapter.fetch_viewport_metrics(page).await
    }

    async fn fetch_frame_document(
        &self,
        page: PageId,
        frame_id: &str,
    ) -> Result<FrameDocument, AdapterError> {
        self.adapter.fetch_frame_document(page, frame_id).await
    }
}
