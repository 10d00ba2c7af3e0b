//! Wiring of the inspection channel to the structural perceiver.

use std::sync::Arc;

use anyhow::{Context, Result};
use cdp_adapter::{CdpAdapter, PageId};
use perceiver_structural::{
    AdapterPort, DetailLookup, LandmarkFingerprints, ObservePolicy, PageSummary, RegionLookup,
    SearchQuery, SearchResults, SerializedPage, Snapshot, StructuralPerceiver,
    StructuralPerceiverImpl,
};
use tracing::info;

use crate::config::ObserveConfig;

const STALE_RETRY_ATTEMPTS: usize = 3;

/// One observation as handed to a decision-making consumer.
#[derive(Clone, Debug)]
pub struct Observation {
    pub snapshot: Snapshot,
    pub page: SerializedPage,
    /// Pass back into the next [`Observer::observe`] call to annotate unchanged regions.
    pub fingerprints: LandmarkFingerprints,
}

pub struct Observer {
    adapter: Arc<CdpAdapter>,
    page: PageId,
    perceiver: StructuralPerceiverImpl<AdapterPort<CdpAdapter>>,
}

impl Observer {
    /// Connects to the configured browser and attaches to its first page.
    pub async fn connect(config: &ObserveConfig) -> Result<Self> {
        let adapter = Arc::new(CdpAdapter::new(config.cdp.clone()));
        Arc::clone(&adapter)
            .start()
            .await
            .context("Failed to start the inspection channel")?;
        let page = adapter
            .attach_first_page()
            .await
            .context("Failed to attach to a page")?;
        info!(?page, "attached to page");
        Self::attach(adapter, page, config.observe.clone())
    }

    /// Uses an already started adapter and registered page.
    pub fn attach(adapter: Arc<CdpAdapter>, page: PageId, policy: ObservePolicy) -> Result<Self> {
        let port = Arc::new(AdapterPort::new(Arc::clone(&adapter)));
        let perceiver = StructuralPerceiverImpl::with_policy(port, policy)
            .context("Invalid observation policy")?
            .with_cancellation(adapter.cancel_token().child_token());
        Ok(Self {
            adapter,
            page,
            perceiver,
        })
    }

    pub fn page_id(&self) -> PageId {
        self.page
    }

    pub fn perceiver(&self) -> &StructuralPerceiverImpl<AdapterPort<CdpAdapter>> {
        &self.perceiver
    }

    pub async fn observe(&self, previous: Option<&LandmarkFingerprints>) -> Result<Observation> {
        let snapshot = self
            .perceiver
            .observe_with_retry(self.page, STALE_RETRY_ATTEMPTS)
            .await
            .context("Observation failed")?;
        let page = self.perceiver.serialize(&snapshot, previous);
        let fingerprints = LandmarkFingerprints::capture(&snapshot);
        Ok(Observation {
            snapshot,
            page,
            fingerprints,
        })
    }

    pub fn search(&self, observation: &Observation, query: &SearchQuery) -> SearchResults {
        self.perceiver.search(&observation.snapshot, query)
    }

    pub fn page_summary(&self, observation: &Observation) -> PageSummary {
        self.perceiver.page_summary(&observation.snapshot)
    }

    pub fn expand_region(
        &self,
        observation: &Observation,
        landmark: &str,
        heading: Option<&str>,
    ) -> RegionLookup {
        self.perceiver
            .expand_region(&observation.snapshot, landmark, heading)
    }

    pub fn element_detail(&self, observation: &Observation, index: u32) -> DetailLookup {
        self.perceiver.element_detail(&observation.snapshot, index)
    }

    pub async fn shutdown(&self) {
        self.adapter.shutdown().await;
    }
}
