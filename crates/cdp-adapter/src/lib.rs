//! SoulBrowser L0 page-inspection channel.
//!
//! The crate exposes a narrow, read-only view of the Chromium DevTools Protocol: document
//! identity, the shadow-piercing DOM tree, the layout/paint snapshot, per-frame accessibility
//! trees, listener presence and viewport geometry. Every call is independently failable so
//! the observation pipeline above can degrade per source.

pub mod ids {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// Unique identifier for the browser connection managed by the adapter.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct BrowserId(pub Uuid);

    /// Unique identifier for a page/tab.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct PageId(pub Uuid);

    /// Unique identifier for an adapter-side session record.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct SessionId(pub Uuid);

    impl BrowserId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl PageId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl SessionId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl Default for PageId {
        fn default() -> Self {
            Self::new()
        }
    }
}

pub mod error {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use thiserror::Error;

    /// High-level error categories surfaced by the adapter.
    #[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
    pub enum AdapterErrorKind {
        #[error("command timed out")]
        CommandTimeout,
        #[error("cdp i/o failure")]
        CdpIo,
        #[error("no cdp session for page")]
        MissingSession,
        #[error("target not found")]
        TargetNotFound,
        #[error("malformed protocol payload")]
        Protocol,
        #[error("internal error")]
        Internal,
    }

    /// Enriched error metadata passed back to higher layers.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct AdapterError {
        pub kind: AdapterErrorKind,
        pub hint: Option<String>,
        pub retriable: bool,
        pub data: Option<serde_json::Value>,
    }

    impl fmt::Display for AdapterError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.kind)?;
            if let Some(hint) = &self.hint {
                write!(f, ": {}", hint)?;
            }
            Ok(())
        }
    }

    impl std::error::Error for AdapterError {}

    impl AdapterError {
        pub fn new(kind: AdapterErrorKind) -> Self {
            Self {
                kind,
                hint: None,
                retriable: false,
                data: None,
            }
        }

        pub fn protocol(method: &str, err: impl fmt::Display) -> Self {
            Self::new(AdapterErrorKind::Protocol)
                .with_hint(format!("{method} returned an unexpected payload: {err}"))
        }

        pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
            self.hint = Some(hint.into());
            self
        }

        pub fn retriable(mut self, flag: bool) -> Self {
            self.retriable = flag;
            self
        }

        pub fn with_data(mut self, data: serde_json::Value) -> Self {
            self.data = Some(data);
            self
        }
    }
}

pub mod config {
    use serde::{Deserialize, Serialize};
    use std::env;

    /// Connection settings for an already running Chromium instance.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    #[serde(default)]
    pub struct CdpConfig {
        pub websocket_url: Option<String>,
        pub default_deadline_ms: u64,
        pub heartbeat_interval_ms: u64,
    }

    impl Default for CdpConfig {
        fn default() -> Self {
            Self {
                websocket_url: resolve_websocket_url(),
                default_deadline_ms: 10_000,
                heartbeat_interval_ms: 15_000,
            }
        }
    }

    fn resolve_websocket_url() -> Option<String> {
        match env::var("SOULBROWSER_WS_URL") {
            Ok(value) => {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Err(_) => None,
        }
    }

}

pub mod adapter;
pub mod commands;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use adapter::{Cdp, CdpAdapter};
pub use commands::{AxTreeConfig, DomFetchConfig, LayoutSnapshotConfig};
pub use config::CdpConfig;
pub use error::{AdapterError, AdapterErrorKind};
pub use ids::{BrowserId, PageId, SessionId};
pub use metrics::AdapterMetricsSnapshot;
pub use protocol::{
    AxNode, AxProperty, AxValue, CapturedSnapshot, DocumentIdentity, DomNode, FrameDocument,
    LayoutTreeSnapshot, NodeTreeSnapshot, RareBooleanData, SnapshotDocument, ViewportMetrics,
};
pub use transport::{CdpTransport, ChromiumTransport, CommandTarget, NoopTransport, TransportEvent};
