//! Corroboration scorer.
//!
//! # Responsibility
//! - Score every live relationship from its provenance set.
//! - Flag prominent single-source edges as weakly corroborated.
//!
//! # Invariants
//! - Scores lie in `[0, 1]`.
//! - The score never decreases when a source system or a stronger
//!   evidence class is added.
//! - Relationships touching an excluded entity are left unscored.

use crate::config::{EvidenceWeights, ScoringConfig};
use crate::model::relationship::{EvidenceClass, RelationshipSource};
use crate::model::EntityId;
use crate::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use crate::repo::relationship_repo::{RelationshipRepository, SqliteRelationshipRepository};
use crate::repo::RepoResult;
use log::info;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Base tier from independent corroboration alone.
pub fn base_score(source_systems: usize, documents: usize) -> f64 {
    match (source_systems, documents) {
        (0, _) => 0.0,
        (s, d) if s >= 3 && d >= 5 => 1.0,
        (s, d) if s >= 2 && d >= 2 => 0.8,
        (s, _) if s >= 2 => 0.6,
        (_, d) if d >= 2 => 0.4,
        _ => 0.2,
    }
}

/// Distinct systems, distinct documents and the strongest evidence class in
/// a provenance set.
#[derive(Debug, Clone, PartialEq)]
pub struct Corroboration {
    pub source_systems: usize,
    pub documents: usize,
    pub best_class: Option<EvidenceClass>,
    pub best_weight: f64,
}

impl Corroboration {
    pub fn from_sources(sources: &[RelationshipSource], weights: &EvidenceWeights) -> Self {
        let systems: BTreeSet<&str> = sources.iter().map(|source| source.source_system.as_str()).collect();
        let documents: BTreeSet<&str> = sources
            .iter()
            .flat_map(|source| source.document_refs.iter().map(String::as_str))
            .collect();
        let best = sources
            .iter()
            .map(|source| (weights.weight(source.evidence_class), source.evidence_class))
            .max_by(|a, b| a.0.total_cmp(&b.0));
        Self {
            source_systems: systems.len(),
            documents: documents.len(),
            best_class: best.map(|(_, class)| class),
            best_weight: best.map_or(0.0, |(weight, _)| weight),
        }
    }

    pub fn score(&self) -> f64 {
        (base_score(self.source_systems, self.documents) * self.best_weight).clamp(0.0, 1.0)
    }
}

/// One scored edge, as emitted to the record sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRelationship {
    pub relationship_id: i64,
    pub source_entity_id: EntityId,
    pub target_entity_id: EntityId,
    pub relationship_type: String,
    pub source_systems: usize,
    pub documents: usize,
    pub best_evidence_class: Option<EvidenceClass>,
    pub confidence_score: f64,
    pub weakly_corroborated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoringReport {
    pub scored: u64,
    pub weak: u64,
    pub skipped_excluded: u64,
}

pub struct CorroborationScorer<'conn> {
    conn: &'conn Connection,
    config: &'conn ScoringConfig,
}

impl<'conn> CorroborationScorer<'conn> {
    pub fn new(conn: &'conn Connection, config: &'conn ScoringConfig) -> Self {
        Self { conn, config }
    }

    /// Scores and persists every live relationship.
    pub fn run(&self) -> RepoResult<(ScoringReport, Vec<ScoredRelationship>)> {
        let excluded: HashSet<EntityId> = SqliteEntityRepository::new(self.conn)
            .list_entities(None)?
            .into_iter()
            .filter(|entity| entity.exclude_from_analysis)
            .map(|entity| entity.id)
            .collect();
        let repo = SqliteRelationshipRepository::new(self.conn);
        let relationships = repo.list_relationships()?;

        let mut degrees: HashMap<&str, u32> = HashMap::new();
        for relationship in &relationships {
            *degrees.entry(relationship.source_entity_id.as_str()).or_default() += 1;
            *degrees.entry(relationship.target_entity_id.as_str()).or_default() += 1;
        }

        let mut report = ScoringReport::default();
        let mut scored = Vec::with_capacity(relationships.len());
        for relationship in &relationships {
            if excluded.contains(&relationship.source_entity_id)
                || excluded.contains(&relationship.target_entity_id)
            {
                report.skipped_excluded += 1;
                continue;
            }
            let sources = repo.list_sources(relationship.id)?;
            let corroboration = Corroboration::from_sources(&sources, &self.config.evidence_weights);
            let score = corroboration.score();
            let prominent = [&relationship.source_entity_id, &relationship.target_entity_id]
                .into_iter()
                .any(|id| degrees.get(id.as_str()).copied().unwrap_or(0) >= self.config.weak_prominence_min);
            let weak = is_weak(&corroboration, prominent);
            repo.set_score(relationship.id, score, weak)?;

            report.scored += 1;
            report.weak += u64::from(weak);
            scored.push(ScoredRelationship {
                relationship_id: relationship.id,
                source_entity_id: relationship.source_entity_id.clone(),
                target_entity_id: relationship.target_entity_id.clone(),
                relationship_type: relationship.relationship_type.clone(),
                source_systems: corroboration.source_systems,
                documents: corroboration.documents,
                best_evidence_class: corroboration.best_class,
                confidence_score: score,
                weakly_corroborated: weak,
            });
        }
        info!(
            "event=relationships_scored module=corroboration status=ok scored={} weak={} skipped_excluded={}",
            report.scored, report.weak, report.skipped_excluded
        );
        Ok((report, scored))
    }
}

/// Single-system edge with better-than-co-occurrence evidence touching a
/// prominent entity.
pub fn is_weak(corroboration: &Corroboration, prominent_endpoint: bool) -> bool {
    corroboration.source_systems == 1
        && corroboration
            .best_class
            .is_some_and(|class| class != EvidenceClass::Cooccurrence)
        && prominent_endpoint
}

#[cfg(test)]
mod tests {
    use super::{base_score, is_weak, Corroboration};
    use crate::config::EvidenceWeights;
    use crate::model::relationship::{EvidenceClass, RelationshipSource};

    fn source(system: &str, class: EvidenceClass, docs: &[&str]) -> RelationshipSource {
        RelationshipSource {
            id: 0,
            relationship_id: 1,
            source_system: system.to_string(),
            evidence_class: class,
            source_confidence: 1.0,
            evidence_detail: None,
            asserted_type: "associated_with".to_string(),
            asserted_date_start: None,
            asserted_date_end: None,
            asserted_weight: None,
            document_refs: docs.iter().map(|doc| doc.to_string()).collect(),
        }
    }

    #[test]
    fn base_table_matches_tiers() {
        assert_eq!(base_score(3, 5), 1.0);
        assert_eq!(base_score(3, 4), 0.8);
        assert_eq!(base_score(2, 2), 0.8);
        assert_eq!(base_score(2, 1), 0.6);
        assert_eq!(base_score(2, 0), 0.6);
        assert_eq!(base_score(1, 2), 0.4);
        assert_eq!(base_score(1, 1), 0.2);
        assert_eq!(base_score(1, 0), 0.2);
        assert_eq!(base_score(0, 9), 0.0);
    }

    #[test]
    fn two_systems_without_documents_use_the_strongest_class() {
        let weights = EvidenceWeights::default();
        let sources = vec![
            source("alpha", EvidenceClass::Rdf, &[]),
            source("beta", EvidenceClass::Cooccurrence, &[]),
        ];
        let corroboration = Corroboration::from_sources(&sources, &weights);
        assert_eq!(corroboration.source_systems, 2);
        assert!((corroboration.score() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn curated_single_source_is_not_drowned_out_and_is_clamped() {
        let weights = EvidenceWeights::default();
        let single = Corroboration::from_sources(&[source("alpha", EvidenceClass::Curated, &["d1"])], &weights);
        assert!((single.score() - 0.3).abs() < 1e-9);

        let strong = Corroboration::from_sources(
            &[
                source("alpha", EvidenceClass::Curated, &["d1", "d2"]),
                source("beta", EvidenceClass::Rdf, &["d3"]),
            ],
            &weights,
        );
        assert_eq!(strong.score(), 1.0);
    }

    #[test]
    fn weak_flag_needs_one_system_real_evidence_and_prominence() {
        let weights = EvidenceWeights::default();
        let curated = Corroboration::from_sources(&[source("alpha", EvidenceClass::Curated, &[])], &weights);
        let cooccurrence =
            Corroboration::from_sources(&[source("alpha", EvidenceClass::Cooccurrence, &[])], &weights);
        assert!(is_weak(&curated, true));
        assert!(!is_weak(&curated, false));
        assert!(!is_weak(&cooccurrence, true));
    }
}
