pub mod api;
pub mod collector;
pub mod errors;
pub mod events;
pub mod filter;
pub mod fusion;
pub mod indexer;
pub mod judges;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod policy;
pub mod ports;
pub mod query;
pub mod reason;
pub mod serializer;
pub mod structural;
pub mod text;

pub use api::StructuralPerceiver;
pub use collector::{CollectedState, Collector};
pub use errors::{Diagnostic, PerceiverError, SourceKind};
pub use model::{EnhancedNode, EnhancedTree, JudgeReport, Rect, SelectorMap, Snapshot};
pub use policy::{ObservePolicy, SerializeMode};
pub use ports::{AdapterPort, CdpPerceptionPort};
pub use query::{
    DetailLookup, ElementDetail, PageSummary, QueryEngine, QueryResult, RegionExpansion,
    RegionLookup, SearchQuery, SearchResults,
};
pub use serializer::{
    detect_unchanged_regions, LandmarkFingerprints, SerializedPage, TruncationApplied,
};
pub use structural::StructuralPerceiverImpl;
