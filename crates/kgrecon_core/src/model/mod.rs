//! Domain model for the reconciliation graph.
//!
//! # Responsibility
//! - Define canonical entities, resolution audit rows, typed relationships
//!   and their provenance, plus merge/conflict/review audit records.
//! - Define the uniform raw record shapes ingestion adapters produce.
//!
//! # Invariants
//! - Every canonical entity is identified by a stable, type-prefixed id.
//! - Audit records (`ResolutionRecord`, `MergeRecord`) are append-only.

pub mod audit;
pub mod entity;
pub mod raw;
pub mod relationship;
pub mod resolution;

/// Stable, type-prefixed canonical entity id such as `PER-00042`.
pub type EntityId = String;
