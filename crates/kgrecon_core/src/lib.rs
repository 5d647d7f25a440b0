//! Entity resolution and knowledge-graph reconciliation core.
//! This crate is the single source of truth for reconciliation invariants.

pub mod analysis;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod repo;
pub mod service;
pub mod sink;
pub mod text;

pub use config::{ConfigError, ReconcileConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::entity::{CanonicalEntity, EntityMetadata, EntityType};
pub use model::raw::{RawEntity, RawRelationship};
pub use model::relationship::{EvidenceClass, Relationship, RelationshipSource};
pub use model::resolution::{MatchMethod, ResolutionRecord};
pub use model::EntityId;
pub use pipeline::{Pipeline, PipelineError, PipelineSummary, RunPlan, SourceInput, Stage};
pub use repo::{RepoError, RepoResult};
pub use service::aggregator::{RelationshipAggregator, SourceBatch};
pub use service::merge::{MergeEngine, MergeError, MergeReport};
pub use service::resolver::{EntityResolver, ResolveError, Resolution};
pub use sink::{MemorySink, OutputRecord, RecordSink, SinkError};
pub use text::normalize;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
