//! Cross-source contradiction detection.
//!
//! # Responsibility
//! - Flag entities whose sources assign different categories.
//! - Flag entity pairs that sources describe with different relationship
//!   types, and relationships whose sources disagree on the start date.
//!
//! # Invariants
//! - Detection only inserts `unresolved` rows; it never changes the status
//!   of an existing conflict.
//! - Re-running detection on an unchanged store inserts nothing.

use crate::model::audit::{Conflict, ConflictStatus, Severity, SubjectKind};
use crate::model::entity::EntityType;
use crate::model::relationship::pair_key;
use crate::repo::audit_repo::{AuditRepository, SqliteAuditRepository};
use crate::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use crate::repo::relationship_repo::{RelationshipRepository, SqliteRelationshipRepository};
use crate::repo::RepoResult;
use log::info;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Categories too vague to contradict anything.
const TRIVIAL_CATEGORIES: &[&str] = &["associate", "other"];
/// Categories whose disagreement deserves a closer look.
const SENSITIVE_CATEGORIES: &[&str] = &["victim", "perpetrator"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub detected: u64,
    pub inserted: u64,
}

pub struct ConflictDetector<'conn> {
    conn: &'conn Connection,
}

impl<'conn> ConflictDetector<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Detects every contradiction kind and stores the new ones.
    pub fn run(&self) -> RepoResult<ConflictReport> {
        let mut found = self.category_conflicts()?;
        found.extend(self.relationship_conflicts()?);

        let audit = SqliteAuditRepository::new(self.conn);
        let mut report = ConflictReport {
            detected: found.len() as u64,
            inserted: 0,
        };
        for conflict in &found {
            if audit.insert_conflict(conflict)? {
                report.inserted += 1;
            }
        }
        info!(
            "event=conflicts_detected module=conflicts status=ok detected={} inserted={}",
            report.detected, report.inserted
        );
        Ok(report)
    }

    pub fn category_conflicts(&self) -> RepoResult<Vec<Conflict>> {
        let entities = SqliteEntityRepository::new(self.conn);
        let mut conflicts = Vec::new();
        for entity in entities.list_entities(Some(EntityType::Person))? {
            let categories: BTreeMap<&str, String> = entity
                .metadata
                .source_categories
                .iter()
                .map(|(system, category)| (system.as_str(), category.trim().to_lowercase()))
                .filter(|(_, category)| !category.is_empty())
                .collect();
            let distinct: BTreeSet<&str> = categories.values().map(String::as_str).collect();
            let non_trivial = distinct
                .iter()
                .filter(|category| !TRIVIAL_CATEGORIES.contains(category))
                .count();
            if distinct.len() < 2 || non_trivial == 0 {
                continue;
            }
            let Some((source_a, value_a, source_b, value_b)) = first_disagreement(&categories) else {
                continue;
            };
            let severity = if distinct.iter().any(|category| SENSITIVE_CATEGORIES.contains(category)) {
                Severity::Medium
            } else {
                Severity::Low
            };
            conflicts.push(unresolved(
                SubjectKind::Entity,
                entity.id.clone(),
                "category",
                (source_a, value_a),
                (source_b, value_b),
                severity,
            ));
        }
        Ok(conflicts)
    }

    pub fn relationship_conflicts(&self) -> RepoResult<Vec<Conflict>> {
        let repo = SqliteRelationshipRepository::new(self.conn);
        let mut relationships = repo.list_relationships()?;
        relationships.sort_by_key(|relationship| relationship.id);

        // (pair) -> (first relationship id, system -> asserted type)
        let mut pair_types: BTreeMap<(String, String), (i64, BTreeMap<String, String>)> = BTreeMap::new();
        let mut conflicts = Vec::new();
        for relationship in &relationships {
            let sources = repo.list_sources(relationship.id)?;
            let mut dates: BTreeMap<&str, String> = BTreeMap::new();
            let (lo, hi) = pair_key(
                &relationship.source_entity_id,
                &relationship.target_entity_id,
            );
            let entry = pair_types
                .entry((lo.to_string(), hi.to_string()))
                .or_insert_with(|| (relationship.id, BTreeMap::new()));
            for source in &sources {
                let asserted = source.asserted_type.trim().to_lowercase();
                let asserted = if asserted.is_empty() {
                    relationship.relationship_type.clone()
                } else {
                    asserted
                };
                entry.1.entry(source.source_system.clone()).or_insert(asserted);
                if let Some(date) = source.asserted_date_start.as_deref().map(str::trim) {
                    if !date.is_empty() {
                        dates.entry(source.source_system.as_str()).or_insert_with(|| date.to_string());
                    }
                }
            }
            if let Some((source_a, value_a, source_b, value_b)) = first_disagreement(&dates) {
                conflicts.push(unresolved(
                    SubjectKind::Relationship,
                    relationship.id.to_string(),
                    "date_start",
                    (source_a, value_a),
                    (source_b, value_b),
                    Severity::Medium,
                ));
            }
        }

        for (first_id, types) in pair_types.values() {
            let by_system: BTreeMap<&str, String> =
                types.iter().map(|(system, kind)| (system.as_str(), kind.clone())).collect();
            if let Some((source_a, value_a, source_b, value_b)) = first_disagreement(&by_system) {
                conflicts.push(unresolved(
                    SubjectKind::Relationship,
                    first_id.to_string(),
                    "relationship_type",
                    (source_a, value_a),
                    (source_b, value_b),
                    Severity::Low,
                ));
            }
        }
        Ok(conflicts)
    }
}

/// First source (by name) and the first later source whose value differs.
fn first_disagreement(values: &BTreeMap<&str, String>) -> Option<(String, String, String, String)> {
    let (source_a, value_a) = values.iter().next()?;
    let (source_b, value_b) = values.iter().find(|(_, value)| *value != value_a)?;
    Some((
        (*source_a).to_string(),
        value_a.clone(),
        (*source_b).to_string(),
        value_b.clone(),
    ))
}

fn unresolved(
    subject_kind: SubjectKind,
    subject_id: String,
    field_name: &str,
    (source_a, value_a): (String, String),
    (source_b, value_b): (String, String),
    severity: Severity,
) -> Conflict {
    Conflict {
        id: None,
        subject_kind,
        subject_id,
        field_name: field_name.to_string(),
        source_a,
        value_a,
        source_b,
        value_b,
        severity,
        status: ConflictStatus::Unresolved,
        resolution_notes: None,
    }
}
