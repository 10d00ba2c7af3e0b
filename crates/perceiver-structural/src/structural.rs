use std::sync::Arc;

use async_trait::async_trait;
use cdp_adapter::PageId;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::StructuralPerceiver;
use crate::collector::Collector;
use crate::errors::PerceiverError;
use crate::model::Snapshot;
use crate::pipeline;
use crate::policy::ObservePolicy;
use crate::ports::CdpPerceptionPort;

pub struct StructuralPerceiverImpl<P>
where
    P: CdpPerceptionPort + Send + Sync,
{
    port: Arc<P>,
    policy: ObservePolicy,
    cancel: CancellationToken,
}

impl<P> StructuralPerceiverImpl<P>
where
    P: CdpPerceptionPort + Send + Sync,
{
    pub fn new(port: Arc<P>) -> Self {
        Self {
            port,
            policy: ObservePolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policy(port: Arc<P>, policy: ObservePolicy) -> Result<Self, PerceiverError> {
        policy.validate()?;
        Ok(Self {
            port,
            policy,
            cancel: CancellationToken::new(),
        })
    }

    /// Observations in flight (and later ones) fail with `Cancelled` once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl<P> StructuralPerceiver for StructuralPerceiverImpl<P>
where
    P: CdpPerceptionPort + Send + Sync,
{
    fn policy(&self) -> &ObservePolicy {
        &self.policy
    }

    async fn observe(&self, page: PageId) -> Result<Snapshot, PerceiverError> {
        if self.cancel.is_cancelled() {
            return Err(PerceiverError::Cancelled);
        }
        let collector = Collector::new(
            self.port.as_ref(),
            &self.policy.collect,
            self.cancel.child_token(),
        );
        let state = collector.collect(page).await?;
        let snapshot = pipeline::build_snapshot(state, &self.policy)?;
        debug!(
            target: "perceiver.collector",
            snapshot = %snapshot.id,
            indexed = snapshot.interactive_count(),
            diagnostics = snapshot.diagnostics.len(),
            "observation complete"
        );
        Ok(snapshot)
    }
}
