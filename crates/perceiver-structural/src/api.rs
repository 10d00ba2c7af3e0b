use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::PageId;
use tracing::warn;

use crate::errors::PerceiverError;
use crate::model::Snapshot;
use crate::policy::ObservePolicy;
use crate::query::{DetailLookup, PageSummary, QueryEngine, RegionLookup, SearchQuery, SearchResults};
use crate::serializer::{self, LandmarkFingerprints, SerializedPage};

const RETRY_BACKOFF: Duration = Duration::from_millis(50);

#[async_trait]
pub trait StructuralPerceiver: Send + Sync {
    fn policy(&self) -> &ObservePolicy;

    /// Collects, fuses, filters and indexes the page once. Never retries.
    async fn observe(&self, page: PageId) -> Result<Snapshot, PerceiverError>;

    /// Like [`observe`](Self::observe), re-running up to `attempts` times while the
    /// document keeps changing underneath the collection.
    async fn observe_with_retry(
        &self,
        page: PageId,
        attempts: usize,
    ) -> Result<Snapshot, PerceiverError> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.observe(page).await {
                Err(err) if err.is_retriable() && attempt < attempts => {
                    warn!(
                        target: "perceiver.collector",
                        attempt,
                        error = %err,
                        "observation discarded; retrying"
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt as u32).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    fn serialize(
        &self,
        snapshot: &Snapshot,
        previous: Option<&LandmarkFingerprints>,
    ) -> SerializedPage {
        serializer::serialize(snapshot, &self.policy().serialize, previous)
    }

    fn search(&self, snapshot: &Snapshot, query: &SearchQuery) -> SearchResults {
        QueryEngine::new(snapshot, self.policy()).search(query)
    }

    fn page_summary(&self, snapshot: &Snapshot) -> PageSummary {
        QueryEngine::new(snapshot, self.policy()).page_summary()
    }

    fn expand_region(
        &self,
        snapshot: &Snapshot,
        landmark: &str,
        heading: Option<&str>,
    ) -> RegionLookup {
        QueryEngine::new(snapshot, self.policy()).expand_region(landmark, heading)
    }

    fn element_detail(&self, snapshot: &Snapshot, index: u32) -> DetailLookup {
        QueryEngine::new(snapshot, self.policy()).element_detail(index)
    }
}
