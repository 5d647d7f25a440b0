//! Merge engine: noise removal, duplicate consolidation, cosmetic cleanup.
//!
//! # Responsibility
//! - Pass A: delete low-degree noise entities, flag high-degree ones.
//! - Pass B: consolidate duplicate persons found by cleaned-name equality
//!   and by last-name-only disambiguation, repointing every reference.
//! - Pass C: tidy display names of every type, keeping the previous form as
//!   an alias.
//!
//! # Invariants
//! - After a merge no row references the absorbed id; a leftover reference
//!   is a fatal `IntegrityViolation`. Open review items and unresolved
//!   conflicts follow the survivor, or are retired with a deleted noise entity.
//! - Repointing never leaves a self-loop or a duplicate (pair, type) row.
//! - Ambiguous last-name matches are queued for review, never forced.
//! - Running the passes again on the merged store changes nothing.

use crate::config::MergeConfig;
use crate::model::audit::{MergeRecord, ReviewItem, ReviewKind, NOISE_DELETED};
use crate::model::entity::{CanonicalEntity, EntityType};
use crate::model::EntityId;
use crate::repo::audit_repo::{AuditRepository, SqliteAuditRepository};
use crate::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use crate::repo::relationship_repo::{RelationshipRepository, SqliteRelationshipRepository};
use crate::repo::resolution_repo::{ResolutionLog, SqliteResolutionLog};
use crate::repo::{RepoError, RepoResult};
use crate::text::noise::classify_noise;
use crate::text::titles::{
    better_name, clean_for_matching, name_quality, strip_titles, tidy_display_name,
    tidy_non_person_name,
};
use chrono::Utc;
use log::{info, warn};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

#[derive(Debug)]
pub enum MergeError {
    Repo(RepoError),
    /// A row still references an absorbed id after repointing.
    IntegrityViolation {
        absorbed_id: EntityId,
        table: &'static str,
        remaining: u64,
    },
    SelfMerge(EntityId),
}

impl Display for MergeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::IntegrityViolation {
                absorbed_id,
                table,
                remaining,
            } => write!(
                f,
                "integrity violation: {remaining} row(s) in {table} still reference absorbed entity {absorbed_id}"
            ),
            Self::SelfMerge(id) => write!(f, "refusing to merge entity {id} into itself"),
        }
    }
}

impl Error for MergeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::IntegrityViolation { .. } | Self::SelfMerge(_) => None,
        }
    }
}

impl From<RepoError> for MergeError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for MergeError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(value.into())
    }
}

/// Counters for one merge engine run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeReport {
    pub batch_id: String,
    pub noise_deleted: u32,
    pub noise_flagged: u32,
    pub merges: u32,
    pub reviews_queued: u32,
    pub renamed: u32,
    pub consolidation_rounds: u32,
}

impl MergeReport {
    pub fn records_processed(&self) -> u64 {
        u64::from(self.noise_deleted + self.noise_flagged + self.merges + self.renamed)
    }
}

/// A consolidation decision waiting to be applied.
#[derive(Debug, Clone, PartialEq)]
struct MergePlan {
    survivor_id: EntityId,
    absorbed_id: EntityId,
    reason: &'static str,
    match_key: String,
}

pub struct MergeEngine<'conn> {
    conn: &'conn Connection,
    config: MergeConfig,
    batch_id: String,
}

impl<'conn> MergeEngine<'conn> {
    pub fn new(conn: &'conn Connection, config: MergeConfig) -> Self {
        Self {
            conn,
            config,
            batch_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Runs passes A, B and C in order.
    pub fn run(&self) -> Result<MergeReport, MergeError> {
        let mut report = MergeReport {
            batch_id: self.batch_id.clone(),
            ..MergeReport::default()
        };
        self.noise_pass(&mut report)?;
        self.consolidation_pass(&mut report)?;
        self.cleanup_pass(&mut report)?;
        info!(
            "event=merge_run module=merge status=ok batch_id={} noise_deleted={} noise_flagged={} merges={} reviews_queued={} renamed={} rounds={}",
            report.batch_id,
            report.noise_deleted,
            report.noise_flagged,
            report.merges,
            report.reviews_queued,
            report.renamed,
            report.consolidation_rounds
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Pass A
    // -----------------------------------------------------------------------

    pub fn noise_pass(&self, report: &mut MergeReport) -> Result<(), MergeError> {
        let entities = SqliteEntityRepository::new(self.conn);
        for entity in entities.list_entities(None)? {
            if entity.exclude_from_analysis {
                continue;
            }
            let Some(reason) = classify_noise(&entity.display_name)
                .or_else(|| classify_noise(&strip_titles(&entity.display_name)))
            else {
                continue;
            };
            let reason = format!("noise:{reason}");
            let degree = entities.degree(&entity.id)?;
            if degree <= self.config.noise_degree_threshold {
                self.delete_noise(&entity, &reason)?;
                report.noise_deleted += 1;
            } else {
                entities.set_exclusion(&entity.id, &reason)?;
                report.noise_flagged += 1;
                info!(
                    "event=noise_flagged module=merge status=ok canonical_id={} degree={degree} reason={reason}",
                    entity.id
                );
            }
        }
        Ok(())
    }

    /// Hard-deletes a noise entity with its edges; resolution records keep a
    /// tombstone pointer.
    pub fn delete_noise(&self, entity: &CanonicalEntity, reason: &str) -> Result<MergeRecord, MergeError> {
        let relationships = SqliteRelationshipRepository::new(self.conn);
        let mut dropped_ids = Vec::new();
        for relationship in relationships.list_for_entity(&entity.id)? {
            relationships.delete_relationship(relationship.id)?;
            dropped_ids.push(relationship.id);
        }
        let dropped = dropped_ids.len() as u32;
        let tombstoned = SqliteResolutionLog::new(self.conn).tombstone(&entity.id)?;
        let retired = SqliteAuditRepository::new(self.conn).retire_refs(Some(entity.id.as_str()), &dropped_ids)?;
        self.assert_unreferenced(&entity.id)?;
        SqliteEntityRepository::new(self.conn).delete_entity(&entity.id)?;

        let record = MergeRecord {
            batch_id: self.batch_id.clone(),
            survivor_id: NOISE_DELETED.to_string(),
            absorbed_id: entity.id.clone(),
            absorbed_name: entity.display_name.clone(),
            reason: reason.to_string(),
            match_key: None,
            relationships_repointed: 0,
            relationships_consolidated: 0,
            relationships_dropped: dropped,
            resolutions_repointed: tombstoned,
            survivor_degree_before: 0,
            survivor_degree_after: 0,
            merged_at: Utc::now(),
        };
        SqliteAuditRepository::new(self.conn).insert_merge(&record)?;
        info!(
            "event=noise_deleted module=merge status=ok canonical_id={} relationships_dropped={dropped} resolutions_tombstoned={tombstoned} reviews_closed={} conflicts_dropped={} reason={reason}",
            entity.id, retired.reviews_closed, retired.conflicts_dropped
        );
        Ok(record)
    }

    // -----------------------------------------------------------------------
    // Pass B
    // -----------------------------------------------------------------------

    pub fn consolidation_pass(&self, report: &mut MergeReport) -> Result<(), MergeError> {
        for _ in 0..self.config.max_consolidation_rounds {
            report.consolidation_rounds += 1;
            let persons: Vec<CanonicalEntity> = SqliteEntityRepository::new(self.conn)
                .list_entities(Some(EntityType::Person))?
                .into_iter()
                .filter(|entity| !entity.exclude_from_analysis)
                .collect();
            let degrees = self.degrees(&persons)?;

            let mut plans = cleaned_name_plans(&persons, &degrees);
            let touched: HashSet<&str> = plans
                .iter()
                .flat_map(|plan| [plan.survivor_id.as_str(), plan.absorbed_id.as_str()])
                .collect();
            let untouched: Vec<&CanonicalEntity> = persons
                .iter()
                .filter(|entity| !touched.contains(entity.id.as_str()))
                .collect();
            let lastname = self.lastname_plans(&untouched, &degrees, report)?;
            plans.extend(lastname);

            let applied = self.apply_plans(&plans)?;
            report.merges += applied;
            if applied == 0 {
                break;
            }
        }
        Ok(())
    }

    fn lastname_plans(
        &self,
        persons: &[&CanonicalEntity],
        degrees: &HashMap<EntityId, u32>,
        report: &mut MergeReport,
    ) -> Result<Vec<MergePlan>, MergeError> {
        let mut full_names: BTreeMap<String, Vec<&CanonicalEntity>> = BTreeMap::new();
        let mut singles: Vec<(&CanonicalEntity, String)> = Vec::new();
        for entity in persons {
            let cleaned = clean_for_matching(&entity.display_name);
            let tokens: Vec<&str> = cleaned.split_whitespace().collect();
            match tokens.as_slice() {
                [] => {}
                [single] => singles.push((entity, (*single).to_string())),
                [.., last] => full_names.entry((*last).to_string()).or_default().push(entity),
            }
        }

        let relationships = SqliteRelationshipRepository::new(self.conn);
        let audit = SqliteAuditRepository::new(self.conn);
        let mut plans = Vec::new();
        for (single, token) in singles {
            let Some(candidates) = full_names.get(&token) else {
                continue;
            };
            let chosen = if let [only] = candidates.as_slice() {
                Some(*only)
            } else {
                let own: BTreeSet<String> = relationships.neighbor_ids(&single.id)?.into_iter().collect();
                let mut scored: Vec<(f64, &CanonicalEntity)> = Vec::with_capacity(candidates.len());
                for candidate in candidates {
                    let theirs: BTreeSet<String> =
                        relationships.neighbor_ids(&candidate.id)?.into_iter().collect();
                    scored.push((jaccard(&own, &theirs), *candidate));
                }
                scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
                let (top_score, top) = scored[0];
                let runner_up = scored.get(1).map_or(0.0, |(score, _)| *score);
                if top_score >= self.config.jaccard_min
                    && top_score >= self.config.jaccard_margin * runner_up
                {
                    Some(top)
                } else {
                    let queued = audit.enqueue_review(&ReviewItem {
                        id: None,
                        kind: ReviewKind::LastnameAmbiguous,
                        subject_name: single.display_name.clone(),
                        entity_a: single.id.clone(),
                        entity_b: top.id.clone(),
                        score: top_score,
                        runner_up_score: Some(runner_up),
                    })?;
                    if queued {
                        report.reviews_queued += 1;
                        info!(
                            "event=review_enqueued module=merge status=ok kind=lastname_ambiguous entity_a={} entity_b={} score={top_score:.4} runner_up={runner_up:.4}",
                            single.id, top.id
                        );
                    }
                    None
                }
            };
            if let Some(full) = chosen {
                let (survivor, absorbed) = rank_pair(single, full, degrees);
                plans.push(MergePlan {
                    survivor_id: survivor.id.clone(),
                    absorbed_id: absorbed.id.clone(),
                    reason: "lastname_match",
                    match_key: token,
                });
            }
        }
        Ok(plans)
    }

    fn apply_plans(&self, plans: &[MergePlan]) -> Result<u32, MergeError> {
        let mut redirects: HashMap<EntityId, EntityId> = HashMap::new();
        let mut applied = 0;
        for plan in plans {
            let survivor = follow(&redirects, &plan.survivor_id);
            let absorbed = follow(&redirects, &plan.absorbed_id);
            if survivor == absorbed {
                continue;
            }
            self.merge_pair(&survivor, &absorbed, plan.reason, Some(&plan.match_key))?;
            redirects.insert(absorbed, survivor);
            applied += 1;
        }
        Ok(applied)
    }

    /// Absorbs `absorbed_id` into `survivor_id`, repointing every reference.
    pub fn merge_pair(
        &self,
        survivor_id: &str,
        absorbed_id: &str,
        reason: &str,
        match_key: Option<&str>,
    ) -> Result<MergeRecord, MergeError> {
        if survivor_id == absorbed_id {
            return Err(MergeError::SelfMerge(survivor_id.to_string()));
        }
        let entities = SqliteEntityRepository::new(self.conn);
        let relationships = SqliteRelationshipRepository::new(self.conn);
        let audit = SqliteAuditRepository::new(self.conn);
        let mut survivor = entities
            .get_entity(survivor_id)?
            .ok_or_else(|| RepoError::NotFound(format!("entity {survivor_id}")))?;
        let absorbed = entities
            .get_entity(absorbed_id)?
            .ok_or_else(|| RepoError::NotFound(format!("entity {absorbed_id}")))?;
        let degree_before = entities.degree(survivor_id)?;

        let (mut repointed, mut consolidated) = (0u32, 0u32);
        let mut dropped_ids = Vec::new();
        for relationship in relationships.list_for_entity(absorbed_id)? {
            let Some(other) = relationship.other_end(absorbed_id) else {
                continue;
            };
            if other == survivor_id {
                relationships.delete_relationship(relationship.id)?;
                dropped_ids.push(relationship.id);
                continue;
            }
            match relationships.find_relationship(survivor_id, other, &relationship.relationship_type)? {
                Some(existing) => {
                    relationships.move_sources(relationship.id, existing)?;
                    audit.repoint_relationship_conflicts(relationship.id, existing)?;
                    relationships.delete_relationship(relationship.id)?;
                    relationships.refresh_attributes(existing)?;
                    consolidated += 1;
                }
                None => {
                    relationships.repoint_endpoint(relationship.id, absorbed_id, survivor_id)?;
                    repointed += 1;
                }
            }
        }
        let dropped = dropped_ids.len() as u32;
        audit.retire_refs(None, &dropped_ids)?;
        let resolutions = SqliteResolutionLog::new(self.conn).repoint(absorbed_id, survivor_id)?;
        let refs = audit.repoint_entity_refs(absorbed_id, survivor_id)?;
        self.assert_unreferenced(absorbed_id)?;

        let preferred = better_name(&survivor.display_name, &absorbed.display_name).to_string();
        if preferred != survivor.display_name {
            survivor.rename(preferred);
        }
        for name in absorbed.names() {
            survivor.add_alias(name);
        }
        survivor.metadata.absorb(&absorbed.metadata);
        entities.update_entity(&survivor)?;
        entities.delete_entity(absorbed_id)?;

        let record = MergeRecord {
            batch_id: self.batch_id.clone(),
            survivor_id: survivor_id.to_string(),
            absorbed_id: absorbed_id.to_string(),
            absorbed_name: absorbed.display_name.clone(),
            reason: reason.to_string(),
            match_key: match_key.map(str::to_string),
            relationships_repointed: repointed,
            relationships_consolidated: consolidated,
            relationships_dropped: dropped,
            resolutions_repointed: resolutions,
            survivor_degree_before: degree_before,
            survivor_degree_after: entities.degree(survivor_id)?,
            merged_at: Utc::now(),
        };
        audit.insert_merge(&record)?;
        info!(
            "event=entity_merged module=merge status=ok survivor={survivor_id} absorbed={absorbed_id} reason={reason} repointed={repointed} consolidated={consolidated} dropped={dropped} resolutions={resolutions} reviews_repointed={} reviews_closed={} conflicts_repointed={}",
            refs.reviews_repointed, refs.reviews_closed, refs.conflicts_repointed
        );
        Ok(record)
    }

    fn assert_unreferenced(&self, entity_id: &str) -> Result<(), MergeError> {
        let count = |sql: &str| -> Result<u64, MergeError> {
            Ok(self.conn.query_row(sql, [entity_id], |row| row.get::<_, u64>(0))?)
        };
        let checks: [(&'static str, &str); 4] = [
            (
                "relationships",
                "SELECT COUNT(*) FROM relationships WHERE source_entity_id = ?1 OR target_entity_id = ?1;",
            ),
            (
                "entity_resolution_log",
                "SELECT COUNT(*) FROM entity_resolution_log WHERE canonical_id = ?1;",
            ),
            (
                "review_queue",
                "SELECT COUNT(*) FROM review_queue
                 WHERE status = 'open' AND (entity_a = ?1 OR entity_b = ?1);",
            ),
            (
                "conflicts",
                "SELECT COUNT(*) FROM conflicts
                 WHERE subject_kind = 'entity' AND subject_id = ?1 AND status = 'unresolved';",
            ),
        ];
        for (table, sql) in checks {
            let remaining = count(sql)?;
            if remaining > 0 {
                warn!(
                    "event=integrity_violation module=merge status=error entity={entity_id} table={table} remaining={remaining}"
                );
                return Err(MergeError::IntegrityViolation {
                    absorbed_id: entity_id.to_string(),
                    table,
                    remaining,
                });
            }
        }
        Ok(())
    }

    fn degrees(&self, entities: &[CanonicalEntity]) -> RepoResult<HashMap<EntityId, u32>> {
        let repo = SqliteEntityRepository::new(self.conn);
        entities
            .iter()
            .map(|entity| Ok((entity.id.clone(), repo.degree(&entity.id)?)))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Pass C
    // -----------------------------------------------------------------------

    pub fn cleanup_pass(&self, report: &mut MergeReport) -> Result<(), MergeError> {
        let entities = SqliteEntityRepository::new(self.conn);
        for mut entity in entities.list_entities(None)? {
            let tidy = match entity.entity_type {
                EntityType::Person => tidy_display_name(&entity.display_name),
                _ => tidy_non_person_name(&entity.display_name),
            };
            if tidy.is_empty() || tidy == entity.display_name {
                continue;
            }
            let previous = entity.display_name.clone();
            entity.rename(tidy);
            entities.update_entity(&entity)?;
            report.renamed += 1;
            info!(
                "event=entity_renamed module=merge status=ok canonical_id={} from={previous:?} to={:?}",
                entity.id, entity.display_name
            );
        }
        Ok(())
    }
}

/// Groups persons whose cleaned display name (or multi-token cleaned alias)
/// is identical and plans merges into each group's top-ranked member.
fn cleaned_name_plans(persons: &[CanonicalEntity], degrees: &HashMap<EntityId, u32>) -> Vec<MergePlan> {
    let by_id: HashMap<&str, &CanonicalEntity> =
        persons.iter().map(|entity| (entity.id.as_str(), entity)).collect();
    let mut groups: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
    for entity in persons {
        for (position, name) in entity.names().enumerate() {
            let key = clean_for_matching(name);
            let multi_token = key.split_whitespace().nth(1).is_some();
            if key.is_empty() || (position > 0 && !multi_token) {
                continue;
            }
            groups.entry(key).or_default().insert(entity.id.as_str());
        }
    }

    let mut plans = Vec::new();
    for (key, ids) in groups {
        if ids.len() < 2 {
            continue;
        }
        let mut members: Vec<&CanonicalEntity> = ids.iter().filter_map(|id| by_id.get(id).copied()).collect();
        members.sort_by(|a, b| survivor_order(a, b, degrees));
        let survivor = members[0];
        for absorbed in &members[1..] {
            plans.push(MergePlan {
                survivor_id: survivor.id.clone(),
                absorbed_id: absorbed.id.clone(),
                reason: "cleaned_name_match",
                match_key: key.clone(),
            });
        }
    }
    plans
}

/// Higher degree first, then the better-formed name, then the smaller id.
fn survivor_order(
    a: &CanonicalEntity,
    b: &CanonicalEntity,
    degrees: &HashMap<EntityId, u32>,
) -> std::cmp::Ordering {
    let degree = |entity: &CanonicalEntity| degrees.get(&entity.id).copied().unwrap_or(0);
    let full = |entity: &CanonicalEntity| clean_for_matching(&entity.display_name).split_whitespace().count() >= 2;
    degree(b)
        .cmp(&degree(a))
        .then_with(|| full(b).cmp(&full(a)))
        .then_with(|| name_quality(&b.display_name).cmp(&name_quality(&a.display_name)))
        .then_with(|| a.id.cmp(&b.id))
}

fn rank_pair<'a>(
    a: &'a CanonicalEntity,
    b: &'a CanonicalEntity,
    degrees: &HashMap<EntityId, u32>,
) -> (&'a CanonicalEntity, &'a CanonicalEntity) {
    if survivor_order(a, b, degrees).is_le() {
        (a, b)
    } else {
        (b, a)
    }
}

fn follow(redirects: &HashMap<EntityId, EntityId>, id: &str) -> EntityId {
    let mut current = id.to_string();
    while let Some(next) = redirects.get(&current) {
        current = next.clone();
    }
    current
}

/// Jaccard overlap of two neighbor sets; 0 when both are empty.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::jaccard;
    use std::collections::BTreeSet;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn jaccard_handles_overlap_and_empty_sets() {
        assert_eq!(jaccard(&set(&[]), &set(&[])), 0.0);
        assert_eq!(jaccard(&set(&["a", "b"]), &set(&["b", "c"])), 1.0 / 3.0);
        assert_eq!(jaccard(&set(&["a"]), &set(&["a"])), 1.0);
    }
}
