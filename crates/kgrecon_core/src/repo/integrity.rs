//! Structural integrity report over the whole store.
//!
//! Run after the merge stage: every structural counter must be zero, the
//! exact-name duplicate count is informational.

use super::RepoResult;
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    /// Relationships whose endpoint is missing from `canonical_entities`.
    pub orphaned_relationships: u64,
    pub self_loops: u64,
    /// Extra rows beyond the first per (unordered pair, type).
    pub duplicate_pairs: u64,
    /// Resolution records pointing at a missing canonical entity.
    pub dangling_resolutions: u64,
    /// Relationships with no provenance row.
    pub unsourced_relationships: u64,
    /// Open review items naming a missing canonical entity.
    pub stale_reviews: u64,
    /// Unresolved conflicts about a missing entity or relationship.
    pub stale_conflicts: u64,
    /// Same-type entities sharing a case-insensitive display name.
    pub exact_name_duplicates: u64,
}

impl IntegrityReport {
    /// Whether every structural counter is zero.
    pub fn is_sound(&self) -> bool {
        self.orphaned_relationships == 0
            && self.self_loops == 0
            && self.duplicate_pairs == 0
            && self.dangling_resolutions == 0
            && self.unsourced_relationships == 0
            && self.stale_reviews == 0
            && self.stale_conflicts == 0
    }
}

pub fn check_integrity(conn: &Connection) -> RepoResult<IntegrityReport> {
    let count = |sql: &str| -> RepoResult<u64> { Ok(conn.query_row(sql, [], |row| row.get(0))?) };

    Ok(IntegrityReport {
        orphaned_relationships: count(
            "SELECT COUNT(*) FROM relationships r
             WHERE NOT EXISTS (SELECT 1 FROM canonical_entities e WHERE e.id = r.source_entity_id)
                OR NOT EXISTS (SELECT 1 FROM canonical_entities e WHERE e.id = r.target_entity_id);",
        )?,
        self_loops: count(
            "SELECT COUNT(*) FROM relationships WHERE source_entity_id = target_entity_id;",
        )?,
        duplicate_pairs: count(
            "SELECT COALESCE(SUM(n - 1), 0) FROM (
                SELECT COUNT(*) AS n FROM relationships
                GROUP BY pair_lo, pair_hi, relationship_type
             );",
        )?,
        dangling_resolutions: count(
            "SELECT COUNT(*) FROM entity_resolution_log l
             WHERE l.canonical_id IS NOT NULL
               AND NOT EXISTS (SELECT 1 FROM canonical_entities e WHERE e.id = l.canonical_id);",
        )?,
        unsourced_relationships: count(
            "SELECT COUNT(*) FROM relationships r
             WHERE NOT EXISTS (SELECT 1 FROM relationship_sources s WHERE s.relationship_id = r.id);",
        )?,
        stale_reviews: count(
            "SELECT COUNT(*) FROM review_queue q
             WHERE q.status = 'open'
               AND (NOT EXISTS (SELECT 1 FROM canonical_entities e WHERE e.id = q.entity_a)
                 OR NOT EXISTS (SELECT 1 FROM canonical_entities e WHERE e.id = q.entity_b));",
        )?,
        stale_conflicts: count(
            "SELECT COUNT(*) FROM conflicts c
             WHERE c.status = 'unresolved'
               AND ((c.subject_kind = 'entity'
                     AND NOT EXISTS (SELECT 1 FROM canonical_entities e WHERE e.id = c.subject_id))
                 OR (c.subject_kind = 'relationship'
                     AND NOT EXISTS (SELECT 1 FROM relationships r WHERE CAST(r.id AS TEXT) = c.subject_id)));",
        )?,
        exact_name_duplicates: count(
            "SELECT COALESCE(SUM(n - 1), 0) FROM (
                SELECT COUNT(*) AS n FROM canonical_entities
                GROUP BY entity_type, lower(display_name)
             );",
        )?,
    })
}
