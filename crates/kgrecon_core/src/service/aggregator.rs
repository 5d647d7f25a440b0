//! Relationship aggregator and source ingestion.
//!
//! # Responsibility
//! - Feed one source's raw entity and relationship streams through the
//!   resolver.
//! - Consolidate edges by (unordered pair, type), attaching one provenance
//!   row per assertion.
//! - Derive edge dates and weights from the most confident asserting source.
//!
//! # Invariants
//! - A name resolves once per (source, name, type) per session, so repeated
//!   mentions do not inflate the resolution log.
//! - Self-referencing assertions are skipped, never stored.
//! - Obvious non-entities are dropped before resolution.

use crate::config::ReconcileConfig;
use crate::model::entity::EntityType;
use crate::model::raw::{RawEntity, RawRelationship};
use crate::model::relationship::EvidenceClass;
use crate::model::EntityId;
use crate::repo::relationship_repo::{
    NewRelationship, NewSource, RelationshipRepository, SqliteRelationshipRepository,
};
use crate::service::resolver::{EntityResolver, ResolveError};
use crate::text::noise::looks_like_non_entity;
use log::debug;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Counters describing one ingestion session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub entities_resolved: u64,
    pub entities_skipped: u64,
    pub relationships_created: u64,
    pub relationships_corroborated: u64,
    pub relationships_skipped: u64,
    /// Resolution count per match method.
    pub methods: BTreeMap<String, u64>,
}

impl IngestReport {
    pub fn records_processed(&self) -> u64 {
        self.entities_resolved
            + self.entities_skipped
            + self.relationships_created
            + self.relationships_corroborated
            + self.relationships_skipped
    }
}

/// What happened to one relationship assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionOutcome {
    Created(i64),
    Corroborated(i64),
    SkippedSelfLoop,
    SkippedNonEntity,
}

/// One source's contribution to a pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceBatch {
    pub source_system: String,
    /// Whether this batch seeds the canonical base.
    pub is_base: bool,
    pub entities: Vec<RawEntity>,
    pub relationships: Vec<RawRelationship>,
}

/// Resolves endpoints and consolidates relationship assertions.
pub struct RelationshipAggregator<'conn> {
    conn: &'conn Connection,
    config: &'conn ReconcileConfig,
    resolver: EntityResolver<'conn>,
    cache: HashMap<(String, String, EntityType), EntityId>,
    report: IngestReport,
}

impl<'conn> RelationshipAggregator<'conn> {
    pub fn new(conn: &'conn Connection, config: &'conn ReconcileConfig) -> Result<Self, ResolveError> {
        Ok(Self {
            conn,
            config,
            resolver: EntityResolver::load(conn, config.resolver.clone())?,
            cache: HashMap::new(),
            report: IngestReport::default(),
        })
    }

    /// Ingests a whole batch: entities first, then relationships.
    pub fn ingest_batch(&mut self, batch: &SourceBatch) -> Result<(), ResolveError> {
        for raw in &batch.entities {
            self.ingest_entity(raw, batch.is_base)?;
        }
        for raw in &batch.relationships {
            self.ingest_relationship(raw)?;
        }
        Ok(())
    }

    /// Resolves one entity record. Returns `None` when the name was dropped
    /// by the non-entity filter.
    pub fn ingest_entity(&mut self, raw: &RawEntity, base: bool) -> Result<Option<EntityId>, ResolveError> {
        if looks_like_non_entity(&raw.name) {
            self.report.entities_skipped += 1;
            debug!(
                "event=entity_skipped module=aggregator status=ok reason=non_entity source={}",
                raw.source_system
            );
            return Ok(None);
        }
        let resolution = if base {
            self.resolver.seed_base(raw)?
        } else {
            self.resolver.resolve(raw)?
        };
        self.report.entities_resolved += 1;
        *self
            .report
            .methods
            .entry(resolution.method.as_str().to_string())
            .or_default() += 1;
        self.cache.insert(
            cache_key(&raw.source_system, &raw.name, raw.entity_type()),
            resolution.canonical_id.clone(),
        );
        Ok(Some(resolution.canonical_id))
    }

    /// Resolves both endpoints and records the assertion.
    pub fn ingest_relationship(&mut self, raw: &RawRelationship) -> Result<AssertionOutcome, ResolveError> {
        let source = self.endpoint(&raw.source_name, raw.source_type_hint, &raw.source_system)?;
        let target = self.endpoint(&raw.target_name, raw.target_type_hint, &raw.source_system)?;
        let (Some(source), Some(target)) = (source, target) else {
            self.report.relationships_skipped += 1;
            return Ok(AssertionOutcome::SkippedNonEntity);
        };
        if source == target {
            self.report.relationships_skipped += 1;
            debug!(
                "event=relationship_skipped module=aggregator status=ok reason=self_loop entity={source}"
            );
            return Ok(AssertionOutcome::SkippedSelfLoop);
        }

        let relationship_type = raw.relationship_type.trim().to_lowercase();
        let repo = SqliteRelationshipRepository::new(self.conn);
        let (relationship_id, outcome) =
            match repo.find_relationship(&source, &target, &relationship_type)? {
                Some(id) => (id, AssertionOutcome::Corroborated(id)),
                None => {
                    let id = repo.insert_relationship(&NewRelationship {
                        source_entity_id: &source,
                        target_entity_id: &target,
                        relationship_type: &relationship_type,
                        subtype: raw.subtype.as_deref(),
                    })?;
                    (id, AssertionOutcome::Created(id))
                }
            };

        repo.add_source(
            relationship_id,
            &NewSource {
                source_system: &raw.source_system,
                evidence_class: self.evidence_class(raw),
                source_confidence: raw.source_confidence.unwrap_or(1.0).clamp(0.0, 1.0),
                evidence_detail: raw.evidence_detail.as_deref(),
                asserted_type: &raw.relationship_type,
                asserted_date_start: raw.date.as_deref(),
                asserted_date_end: raw.date_end.as_deref(),
                asserted_weight: raw.weight,
                document_refs: &raw.document_refs,
            },
        )?;
        repo.refresh_attributes(relationship_id)?;

        match outcome {
            AssertionOutcome::Created(_) => self.report.relationships_created += 1,
            _ => self.report.relationships_corroborated += 1,
        }
        Ok(outcome)
    }

    pub fn report(&self) -> &IngestReport {
        &self.report
    }

    pub fn into_report(self) -> IngestReport {
        self.report
    }

    fn endpoint(
        &mut self,
        name: &str,
        type_hint: Option<EntityType>,
        source_system: &str,
    ) -> Result<Option<EntityId>, ResolveError> {
        let entity_type = type_hint.unwrap_or(EntityType::Person);
        if let Some(id) = self.cache.get(&cache_key(source_system, name, entity_type)) {
            return Ok(Some(id.clone()));
        }
        let mut raw = RawEntity::new(name, source_system);
        raw.type_hint = Some(entity_type);
        self.ingest_entity(&raw, false)
    }

    fn evidence_class(&self, raw: &RawRelationship) -> EvidenceClass {
        raw.evidence_class
            .or_else(|| self.config.default_evidence_class(&raw.source_system))
            .unwrap_or(EvidenceClass::Cooccurrence)
    }
}

fn cache_key(source_system: &str, name: &str, entity_type: EntityType) -> (String, String, EntityType) {
    let folded = name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    (source_system.to_string(), folded, entity_type)
}
