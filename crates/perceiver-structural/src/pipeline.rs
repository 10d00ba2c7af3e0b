//! Synchronous half of an observation: fusion, filtering and indexing.
//!
//! Runs on already collected data only; nothing here talks to the page.

use std::time::Instant;

use cdp_adapter::{DocumentIdentity, ViewportMetrics};
use tracing::warn;
use uuid::Uuid;

use crate::collector::CollectedState;
use crate::errors::{Diagnostic, PerceiverError};
use crate::events;
use crate::filter;
use crate::fusion;
use crate::indexer;
use crate::model::{EnhancedTree, Snapshot};
use crate::policy::{FilterPolicy, ObservePolicy};

pub fn build_snapshot(
    state: CollectedState,
    policy: &ObservePolicy,
) -> Result<Snapshot, PerceiverError> {
    let started = Instant::now();
    let outcome = fusion::fuse(&state, &policy.collect);
    events::emit_fuse(
        outcome.tree.len(),
        outcome.diagnostics.len(),
        started.elapsed(),
    );
    if outcome.tree.is_empty() {
        warn!(
            target: "perceiver.fusion",
            backend_node_id = state.dom.backend_node_id,
            "document root could not be fused"
        );
        return Err(PerceiverError::MalformedSubtree {
            backend_node_id: state.dom.backend_node_id,
            reason: "document root could not be fused".into(),
        });
    }

    let mut diagnostics = state.diagnostics;
    diagnostics.extend(outcome.diagnostics);
    Ok(assemble(
        state.identity,
        state.viewport,
        outcome.tree,
        diagnostics,
        &policy.filter,
    ))
}

pub(crate) fn assemble(
    identity: DocumentIdentity,
    viewport: ViewportMetrics,
    tree: EnhancedTree,
    diagnostics: Vec<Diagnostic>,
    policy: &FilterPolicy,
) -> Snapshot {
    let started = Instant::now();
    let filter::FilterOutcome {
        mut simplified,
        excluded,
        stats,
    } = filter::filter(&tree, &viewport, policy);
    let selector_map = indexer::assign(&tree, &mut simplified, &excluded);
    events::emit_filter(stats.kept_nodes, selector_map.len(), started.elapsed());

    Snapshot {
        id: Uuid::new_v4(),
        identity,
        viewport,
        enhanced: tree,
        simplified,
        selector_map,
        diagnostics,
    }
}
