use std::fmt;

use cdp_adapter::DocumentIdentity;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One independently fetched input of an observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Identity,
    Dom,
    Layout,
    Accessibility,
    Listeners,
    Viewport,
    Frame,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SourceKind::Identity => "identity",
            SourceKind::Dom => "dom",
            SourceKind::Layout => "layout",
            SourceKind::Accessibility => "accessibility",
            SourceKind::Listeners => "listeners",
            SourceKind::Viewport => "viewport",
            SourceKind::Frame => "frame",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum PerceiverError {
    #[error("source unavailable: {source_kind}: {reason}")]
    SourceUnavailable {
        source_kind: SourceKind,
        reason: String,
    },
    #[error("document changed during observation: expected {expected}, found {found}")]
    DocumentStale {
        expected: DocumentIdentity,
        found: DocumentIdentity,
    },
    #[error("malformed subtree at backend node {backend_node_id}: {reason}")]
    MalformedSubtree { backend_node_id: i64, reason: String },
    #[error("index not found: {0}")]
    IndexNotFound(u32),
    #[error("observation cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl PerceiverError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Only a stale document warrants re-running the observation.
    pub fn is_retriable(&self) -> bool {
        matches!(self, PerceiverError::DocumentStale { .. })
    }
}

/// Non-fatal problem absorbed while building a snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Diagnostic {
    SourceDegraded {
        source_kind: SourceKind,
        frame_id: Option<String>,
        reason: String,
    },
    SubtreeSkipped {
        backend_node_id: i64,
        reason: String,
    },
    FramePlaceholder {
        backend_node_id: i64,
        frame_id: Option<String>,
        reason: String,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::SourceDegraded {
                source_kind,
                frame_id: Some(frame),
                reason,
            } => write!(f, "{source_kind} degraded for frame {frame}: {reason}"),
            Diagnostic::SourceDegraded {
                source_kind,
                reason,
                ..
            } => write!(f, "{source_kind} degraded: {reason}"),
            Diagnostic::SubtreeSkipped {
                backend_node_id,
                reason,
            } => write!(f, "skipped subtree at {backend_node_id}: {reason}"),
            Diagnostic::FramePlaceholder {
                backend_node_id,
                reason,
                ..
            } => write!(f, "frame at {backend_node_id} left opaque: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(loader: &str) -> DocumentIdentity {
        DocumentIdentity {
            frame_id: "F".into(),
            loader_id: loader.into(),
            url: format!("https://example.com/{loader}"),
        }
    }

    #[test]
    fn only_stale_documents_are_retriable() {
        let stale = PerceiverError::DocumentStale {
            expected: identity("D1"),
            found: identity("D2"),
        };
        assert!(stale.is_retriable());
        assert!(stale.to_string().contains("F@D2"));
        assert!(!PerceiverError::IndexNotFound(3).is_retriable());
        assert!(!PerceiverError::Cancelled.is_retriable());
    }

    #[test]
    fn diagnostics_serialize_as_tagged_variants() {
        let diag = Diagnostic::SourceDegraded {
            source_kind: SourceKind::Accessibility,
            frame_id: Some("F2".into()),
            reason: "timeout".into(),
        };
        let value = serde_json::to_value(&diag).expect("serialize");
        assert_eq!(value["kind"], "source-degraded");
        assert_eq!(value["source_kind"], "accessibility");
        assert_eq!(diag.to_string(), "accessibility degraded for frame F2: timeout");
    }
}
