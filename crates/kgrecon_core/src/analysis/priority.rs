//! Priority ranker: where to look next.
//!
//! # Responsibility
//! - Collect per-entity signals from the store and the graph analyses.
//! - Combine them into a capped composite score and a stable ranking.
//!
//! # Invariants
//! - Every factor is capped independently before summing.
//! - Ranking is deterministic: score descending, then entity id.
//! - Excluded entities are never ranked.

use super::graph::{CommunityBridge, LiveGraph, StructuralGap};
use crate::model::audit::{ConflictStatus, Severity, SubjectKind};
use crate::model::entity::EntityType;
use crate::model::EntityId;
use crate::repo::audit_repo::{AuditRepository, SqliteAuditRepository};
use crate::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use crate::repo::relationship_repo::{RelationshipRepository, SqliteRelationshipRepository};
use crate::repo::RepoResult;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

const PROMINENCE_CAP: f64 = 20.0;
const COVERAGE_CAP: f64 = 30.0;
const COVERAGE_MIN_UNANALYZED: u64 = 10;
const CORPUS_CAP: f64 = 25.0;
const CORPUS_MIN_DOCUMENTS: u64 = 20;
const WEAK_CAP: f64 = 20.0;
const GAP_CAP: f64 = 25.0;
const BRIDGE_CAP: f64 = 15.0;
const CONFLICT_CAP: f64 = 10.0;

/// Raw per-entity inputs to the ranker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntitySignals {
    pub entity_id: EntityId,
    pub display_name: String,
    pub entity_type: Option<EntityType>,
    pub degree: u32,
    /// Documents known to mention the entity.
    pub document_mentions: Option<u64>,
    /// Distinct documents cited by the entity's relationships.
    pub documents_in_graph: u64,
    /// Full-text corpus documents mentioning the entity.
    pub corpus_documents: Option<u64>,
    pub weak_relationships: u32,
    pub gap_involvements: u32,
    pub bridge_communities: u32,
    pub conflicts: Vec<Severity>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PriorityFactors {
    pub prominence: f64,
    pub document_coverage: f64,
    pub corpus_disparity: f64,
    pub weak_relationships: f64,
    pub structural_gaps: f64,
    pub community_bridges: f64,
    pub contradictions: f64,
}

impl PriorityFactors {
    pub fn total(&self) -> f64 {
        self.prominence
            + self.document_coverage
            + self.corpus_disparity
            + self.weak_relationships
            + self.structural_gaps
            + self.community_bridges
            + self.contradictions
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityScore {
    pub rank: usize,
    pub entity_id: EntityId,
    pub display_name: String,
    pub entity_type: Option<EntityType>,
    pub degree: u32,
    pub score: f64,
    pub factors: PriorityFactors,
}

pub fn score_entity(signals: &EntitySignals) -> PriorityFactors {
    let document_coverage = signals
        .document_mentions
        .map(|mentions| mentions.saturating_sub(signals.documents_in_graph))
        .filter(|unanalyzed| *unanalyzed >= COVERAGE_MIN_UNANALYZED)
        .map_or(0.0, |unanalyzed| (unanalyzed as f64 / 10.0).min(COVERAGE_CAP));
    let corpus_disparity = signals
        .corpus_documents
        .filter(|documents| {
            *documents > CORPUS_MIN_DOCUMENTS && f64::from(signals.degree) < *documents as f64 / 10.0
        })
        .map_or(0.0, |documents| (documents as f64 / 50.0).min(CORPUS_CAP));
    let contradictions: f64 = signals
        .conflicts
        .iter()
        .map(|severity| match severity {
            Severity::High => 10.0,
            Severity::Medium => 5.0,
            Severity::Low => 2.0,
        })
        .sum();

    PriorityFactors {
        prominence: ((f64::from(signals.degree) + 1.0).log2() * 2.0).min(PROMINENCE_CAP),
        document_coverage,
        corpus_disparity,
        weak_relationships: (f64::from(signals.weak_relationships) * 3.0).min(WEAK_CAP),
        structural_gaps: (f64::from(signals.gap_involvements) * 5.0).min(GAP_CAP),
        community_bridges: (f64::from(signals.bridge_communities) * 3.0).min(BRIDGE_CAP),
        contradictions: contradictions.min(CONFLICT_CAP),
    }
}

/// Scores and orders every entity.
pub fn rank(signals: &[EntitySignals]) -> Vec<PriorityScore> {
    let mut scores: Vec<PriorityScore> = signals
        .iter()
        .map(|signals| {
            let factors = score_entity(signals);
            PriorityScore {
                rank: 0,
                entity_id: signals.entity_id.clone(),
                display_name: signals.display_name.clone(),
                entity_type: signals.entity_type,
                degree: signals.degree,
                score: factors.total(),
                factors,
            }
        })
        .collect();
    scores.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.entity_id.cmp(&b.entity_id)));
    for (index, score) in scores.iter_mut().enumerate() {
        score.rank = index + 1;
    }
    scores
}

/// Gathers ranker inputs for every non-excluded entity.
pub fn collect_signals(
    conn: &Connection,
    graph: &LiveGraph,
    gaps: &[StructuralGap],
    bridges: &[CommunityBridge],
) -> RepoResult<Vec<EntitySignals>> {
    let mut signals: BTreeMap<EntityId, EntitySignals> = SqliteEntityRepository::new(conn)
        .list_entities(None)?
        .into_iter()
        .filter(|entity| !entity.exclude_from_analysis)
        .map(|entity| {
            let signals = EntitySignals {
                degree: graph.degree(&entity.id),
                document_mentions: entity.metadata.document_mention_count,
                corpus_documents: entity.metadata.corpus_document_count,
                entity_type: Some(entity.entity_type),
                display_name: entity.display_name,
                entity_id: entity.id.clone(),
                ..EntitySignals::default()
            };
            (entity.id, signals)
        })
        .collect();

    let relationships = SqliteRelationshipRepository::new(conn);
    let live: Vec<_> = relationships
        .list_relationships()?
        .into_iter()
        .filter(|relationship| {
            signals.contains_key(&relationship.source_entity_id)
                && signals.contains_key(&relationship.target_entity_id)
        })
        .collect();
    let endpoints: HashMap<i64, (EntityId, EntityId)> = live
        .iter()
        .map(|relationship| {
            (
                relationship.id,
                (relationship.source_entity_id.clone(), relationship.target_entity_id.clone()),
            )
        })
        .collect();

    let mut documents: HashMap<&str, BTreeSet<String>> = HashMap::new();
    for source in relationships.list_all_sources()? {
        let Some((a, b)) = endpoints.get(&source.relationship_id) else {
            continue;
        };
        for id in [a, b] {
            documents
                .entry(id.as_str())
                .or_default()
                .extend(source.document_refs.iter().cloned());
        }
    }

    for relationship in live.iter().filter(|relationship| relationship.weakly_corroborated) {
        for id in [&relationship.source_entity_id, &relationship.target_entity_id] {
            if let Some(entry) = signals.get_mut(id) {
                entry.weak_relationships += 1;
            }
        }
    }
    for gap in gaps {
        for id in [&gap.entity_a, &gap.entity_b] {
            if let Some(entry) = signals.get_mut(id) {
                entry.gap_involvements += 1;
            }
        }
    }
    for bridge in bridges {
        if let Some(entry) = signals.get_mut(&bridge.entity_id) {
            entry.bridge_communities = bridge.communities_spanned;
        }
    }
    for conflict in SqliteAuditRepository::new(conn).list_conflicts(Some(ConflictStatus::Unresolved))? {
        let involved: Vec<EntityId> = match conflict.subject_kind {
            SubjectKind::Entity => vec![conflict.subject_id.clone()],
            SubjectKind::Relationship => conflict
                .subject_id
                .parse::<i64>()
                .ok()
                .and_then(|id| endpoints.get(&id))
                .map(|(a, b)| vec![a.clone(), b.clone()])
                .unwrap_or_default(),
        };
        for id in involved {
            if let Some(entry) = signals.get_mut(&id) {
                entry.conflicts.push(conflict.severity);
            }
        }
    }

    for (id, entry) in signals.iter_mut() {
        entry.documents_in_graph = documents.get(id.as_str()).map_or(0, |docs| docs.len() as u64);
    }
    Ok(signals.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::{rank, score_entity, EntitySignals};
    use crate::model::audit::Severity;

    fn signals(id: &str, degree: u32) -> EntitySignals {
        EntitySignals {
            entity_id: id.to_string(),
            display_name: id.to_string(),
            degree,
            ..EntitySignals::default()
        }
    }

    #[test]
    fn prominence_is_log_scaled_and_capped() {
        assert_eq!(score_entity(&signals("A", 0)).prominence, 0.0);
        assert!((score_entity(&signals("A", 3)).prominence - 4.0).abs() < 1e-9);
        assert_eq!(score_entity(&signals("A", 5000)).prominence, 20.0);
    }

    #[test]
    fn factors_are_capped_individually() {
        let mut entity = signals("A", 0);
        entity.document_mentions = Some(5000);
        entity.documents_in_graph = 10;
        entity.corpus_documents = Some(10_000);
        entity.weak_relationships = 40;
        entity.gap_involvements = 40;
        entity.bridge_communities = 9;
        entity.conflicts = vec![Severity::High, Severity::Medium];
        let factors = score_entity(&entity);
        assert_eq!(factors.document_coverage, 30.0);
        assert_eq!(factors.corpus_disparity, 25.0);
        assert_eq!(factors.weak_relationships, 20.0);
        assert_eq!(factors.structural_gaps, 25.0);
        assert_eq!(factors.community_bridges, 15.0);
        assert_eq!(factors.contradictions, 10.0);
        assert_eq!(factors.total(), 125.0);
    }

    #[test]
    fn small_coverage_gaps_and_well_connected_corpus_entities_score_nothing() {
        let mut entity = signals("A", 10);
        entity.document_mentions = Some(15);
        entity.documents_in_graph = 6;
        entity.corpus_documents = Some(90);
        let factors = score_entity(&entity);
        assert_eq!(factors.document_coverage, 0.0);
        assert_eq!(factors.corpus_disparity, 0.0);
    }

    #[test]
    fn ties_break_by_entity_id() {
        let ranked = rank(&[signals("PER-00002", 3), signals("PER-00001", 3), signals("PER-00003", 7)]);
        let order: Vec<&str> = ranked.iter().map(|score| score.entity_id.as_str()).collect();
        assert_eq!(order, vec!["PER-00003", "PER-00001", "PER-00002"]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[2].rank, 3);
    }
}
